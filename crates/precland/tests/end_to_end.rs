use approx::assert_relative_eq;
use nalgebra::{Point2, Point3};
use parking_lot::Mutex;
use precland::aruco::builtins::{builtin_dictionary, DICT_4X4_50};
use precland::aruco::{draw_marker, ArucoDetector, ArucoParams};
use precland::capture::{CaptureError, Frame, FrameSource};
use precland::core::{CalibrationProfile, CameraMountOffset, GrayImage, GrayImageView};
use precland::link::{
    encode_v2, FrameParser, Heartbeat, LandingTarget, LinkConfig, Message, TelemetryLink,
    Transport,
};
use precland::pipeline::{Pipeline, PipelineOptions, StopSignal};
use precland::{
    DetectedMarker, LengthUnit, MarkerDetector, NoReport, PadGeometry, PositionAggregator,
};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Frames from memory, then exhausted.
struct MemorySource(VecDeque<GrayImage>);

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        let image = self.0.pop_front().ok_or(CaptureError::Exhausted)?;
        Ok(Frame {
            image,
            captured_at: Instant::now(),
        })
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}

/// Serial double: hands out one autopilot heartbeat, records everything written.
struct LoopbackTransport {
    inbound: VecDeque<Vec<u8>>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl Transport for LoopbackTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(chunk) = self.inbound.pop_front() else {
            return Ok(0);
        };
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    fn bytes_pending(&mut self) -> io::Result<usize> {
        Ok(self.inbound.front().map_or(0, Vec::len))
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.written.lock().extend_from_slice(bytes);
        Ok(())
    }

    fn describe(&self) -> String {
        "loopback".into()
    }
}

/// Serial-like double: a read with nothing queued waits out the port timeout.
struct QuietSerial {
    inner: LoopbackTransport,
    read_timeout: Duration,
}

impl Transport for QuietSerial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.inner.inbound.is_empty() {
            std::thread::sleep(self.read_timeout);
            return Ok(0);
        }
        self.inner.read(buf)
    }

    fn bytes_pending(&mut self) -> io::Result<usize> {
        self.inner.bytes_pending()
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)
    }

    fn describe(&self) -> String {
        "quiet serial".into()
    }
}

/// Detector that reports the same markers for every frame.
struct FixedDetector(Vec<DetectedMarker>);

impl MarkerDetector for FixedDetector {
    fn detect(&self, _image: &GrayImageView<'_>) -> Vec<DetectedMarker> {
        self.0.clone()
    }
}

fn autopilot_heartbeat() -> Vec<u8> {
    let heartbeat = Heartbeat {
        custom_mode: 0,
        mav_type: 2,
        autopilot: 3,
        base_mode: 81,
        system_status: 4,
        mavlink_version: 3,
    };
    encode_v2(0, 1, 1, &Message::Heartbeat(heartbeat))
}

fn connected_link() -> (TelemetryLink, Arc<Mutex<Vec<u8>>>) {
    let written = Arc::new(Mutex::new(Vec::new()));
    let mut link = TelemetryLink::new(LinkConfig::default());
    link.attach(Box::new(LoopbackTransport {
        inbound: VecDeque::from(vec![autopilot_heartbeat()]),
        written: written.clone(),
    }));
    link.poll().expect("poll");
    assert!(link.is_connected());
    (link, written)
}

fn landing_targets(written: &[u8]) -> Vec<LandingTarget> {
    let mut parser = FrameParser::new();
    parser.push(written);
    std::iter::from_fn(|| parser.next_message())
        .filter_map(|m| match m.expect("valid frame").message {
            Message::LandingTarget(lt) => Some(lt),
            _ => None,
        })
        .collect()
}

fn identity_profile(width: u32, height: u32) -> CalibrationProfile {
    CalibrationProfile::from_rows(
        [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        &[],
        width,
        height,
    )
    .expect("profile")
}

fn pad() -> PadGeometry {
    PadGeometry::new([(7, 100.0), (2, 40.0)], 7, LengthUnit::Millimeters).expect("pad")
}

#[test]
fn payload_one_meter_ahead_reports_once() {
    let _ = env_logger::builder().is_test(true).try_init();

    // 100 mm marker 1000 mm ahead under identity intrinsics spans +-0.05
    let payload = DetectedMarker {
        id: 7,
        corners: [
            Point2::new(-0.05, -0.05),
            Point2::new(0.05, -0.05),
            Point2::new(0.05, 0.05),
            Point2::new(-0.05, 0.05),
        ],
    };
    let source = MemorySource(VecDeque::from(vec![GrayImage::filled(32, 32, 128)]));
    let aggregator = PositionAggregator::new(
        identity_profile(32, 32),
        pad(),
        CameraMountOffset::default(),
    );
    let (link, written) = connected_link();

    let mut pipeline = Pipeline::new(
        Box::new(source),
        FixedDetector(vec![payload]),
        aggregator,
        PipelineOptions::default(),
    )
    .with_link(link);
    let stats = pipeline.run(&StopSignal::new()).expect("run");
    assert_eq!((stats.frames, stats.reports, stats.reports_sent), (1, 1, 1));

    let sent = landing_targets(&written.lock());
    assert_eq!(sent.len(), 1);
    let lt = sent[0];
    assert_relative_eq!(lt.x, 1.0, epsilon = 1e-4);
    assert_relative_eq!(lt.y, 0.0, epsilon = 1e-4);
    assert_relative_eq!(lt.z, 0.0, epsilon = 1e-4);
    assert_eq!(lt.position_valid, 1);
    assert_eq!(lt.frame, 8);

    // the transport is released when the run ends
    assert!(!pipeline.link().expect("link").is_connected());
}

#[test]
fn quiet_link_does_not_throttle_frames() {
    let config = LinkConfig::default();
    let written = Arc::new(Mutex::new(Vec::new()));
    let mut link = TelemetryLink::new(config.clone());
    link.attach(Box::new(QuietSerial {
        inner: LoopbackTransport {
            inbound: VecDeque::from(vec![autopilot_heartbeat()]),
            written: written.clone(),
        },
        read_timeout: config.read_timeout,
    }));
    link.poll().expect("poll");
    assert!(link.is_connected());

    let frames = (0..20).map(|_| GrayImage::filled(32, 32, 128)).collect();
    let payload = DetectedMarker {
        id: 7,
        corners: [
            Point2::new(-0.05, -0.05),
            Point2::new(0.05, -0.05),
            Point2::new(0.05, 0.05),
            Point2::new(-0.05, 0.05),
        ],
    };
    let options = PipelineOptions {
        link_poll_interval: Duration::ZERO,
        ..PipelineOptions::default()
    };
    let mut pipeline = Pipeline::new(
        Box::new(MemorySource(frames)),
        FixedDetector(vec![payload]),
        PositionAggregator::new(identity_profile(32, 32), pad(), CameraMountOffset::default()),
        options,
    )
    .with_link(link);

    let started = Instant::now();
    let stats = pipeline.run(&StopSignal::new()).expect("run");
    let elapsed = started.elapsed();
    assert_eq!((stats.frames, stats.reports_sent), (20, 20));
    assert!(elapsed < Duration::from_millis(500), "run took {elapsed:?}");
    assert_eq!(landing_targets(&written.lock()).len(), 20);
}

#[test]
fn structural_markers_without_payload_send_nothing() {
    let structural = DetectedMarker {
        id: 2,
        corners: [
            Point2::new(-0.02, -0.02),
            Point2::new(0.02, -0.02),
            Point2::new(0.02, 0.02),
            Point2::new(-0.02, 0.02),
        ],
    };
    let frames = (0..3).map(|_| GrayImage::filled(32, 32, 128)).collect();
    let (link, written) = connected_link();
    let mut pipeline = Pipeline::new(
        Box::new(MemorySource(frames)),
        FixedDetector(vec![structural]),
        PositionAggregator::new(identity_profile(32, 32), pad(), CameraMountOffset::default()),
        PipelineOptions::default(),
    )
    .with_link(link);

    let stats = pipeline.run(&StopSignal::new()).expect("run");
    assert_eq!((stats.frames, stats.reports, stats.payload_absent), (3, 0, 3));
    assert!(landing_targets(&written.lock()).is_empty());
}

/// Camera 800 px focal, 640x480; marker 7 drawn fronto-parallel 1 m ahead,
/// marker 2 beside it.
fn rendered_scene() -> (GrayImage, CalibrationProfile) {
    let profile = CalibrationProfile::from_rows(
        [[800.0, 0.0, 320.0], [0.0, 800.0, 240.0], [0.0, 0.0, 1.0]],
        &[],
        640,
        480,
    )
    .expect("profile");
    let dict = builtin_dictionary(DICT_4X4_50).expect("builtin");
    let mut img = GrayImage::filled(640, 480, 200);

    let project_square = |cx: f64, cy: f64, z: f64, side: f64| -> [Point2<f64>; 4] {
        let h = side / 2.0;
        [(-h, -h), (h, -h), (h, h), (-h, h)].map(|(dx, dy)| {
            profile
                .project(&Point3::new(cx + dx, cy + dy, z))
                .expect("in front")
        })
    };
    let payload = project_square(0.0, 0.0, 1000.0, 100.0);
    let structural = project_square(-220.0, 60.0, 1000.0, 40.0);
    assert!(draw_marker(&mut img, &dict, 7, &payload).expect("draw"));
    assert!(draw_marker(&mut img, &dict, 2, &structural).expect("draw"));
    (img, profile)
}

#[test]
fn detects_and_reports_a_rendered_pad() {
    let (img, profile) = rendered_scene();
    let dict = builtin_dictionary(DICT_4X4_50).expect("builtin");
    let detector = ArucoDetector::new(&dict, ArucoParams::default()).expect("detector");
    let mount = CameraMountOffset {
        translation: [0.05, 0.0, 0.1],
        rotation_deg: [0.0, 0.0, 0.0],
    };
    let aggregator = PositionAggregator::new(profile, pad(), mount);

    let detections = detector.detect(&img.view());
    let mut ids: Vec<u32> = detections.iter().map(|d| d.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![2, 7]);

    let report = aggregator.process(&detections, 7).expect("report");
    assert_relative_eq!(report.forward, 1.05, epsilon = 5e-3);
    assert_relative_eq!(report.right, 0.0, epsilon = 5e-3);
    assert_relative_eq!(report.down, 0.1, epsilon = 5e-3);

    // same frame, same answer
    let again = aggregator
        .process(&detector.detect(&img.view()), 7)
        .expect("report");
    assert_eq!(report, again);
}

#[test]
fn blank_frame_has_no_payload() {
    let (_, profile) = rendered_scene();
    let dict = builtin_dictionary(DICT_4X4_50).expect("builtin");
    let detector = ArucoDetector::new(&dict, ArucoParams::default()).expect("detector");
    let aggregator = PositionAggregator::new(profile, pad(), CameraMountOffset::default());

    let blank = GrayImage::filled(640, 480, 200);
    assert_eq!(
        aggregator.process(&detector.detect(&blank.view()), 0),
        Err(NoReport::PayloadAbsent(7))
    );
}
