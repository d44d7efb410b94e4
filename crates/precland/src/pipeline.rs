//! Control loop: capture, detect, aggregate, report, visualize.

use crate::aggregate::{NoReport, PositionAggregator};
use crate::capture::{CaptureError, Frame, FrameSource};
use crate::viz::VectorSink;
use log::{debug, info, warn};
use nalgebra::Vector3;
use precland_core::{MarkerDetector, PositionReport};
use precland_link::{LandingTarget, TelemetryLink};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Cooperative stop flag, shared with signal handlers.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Set the flag on SIGINT / SIGTERM. Only one handler per process.
    pub fn install_handler(&self) -> Result<(), ctrlc::Error> {
        let flag = self.flag.clone();
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
    }
}

#[derive(Clone, Debug)]
pub struct PipelineOptions {
    /// Stop after this many captured frames.
    pub max_frames: Option<u64>,
    /// Consecutive capture failures tolerated before the run is aborted.
    pub max_consecutive_capture_failures: u32,
    /// Minimum spacing of telemetry link service calls.
    pub link_poll_interval: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_frames: None,
            max_consecutive_capture_failures: 30,
            link_poll_interval: Duration::from_millis(50),
        }
    }
}

/// Counters for one run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub frames: u64,
    pub reports: u64,
    pub reports_sent: u64,
    pub send_failures: u64,
    pub capture_failures: u64,
    pub payload_absent: u64,
    pub payload_unresolved: u64,
    pub pose_failures: u64,
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("camera lost after {failures} consecutive capture failures: {last}")]
    CaptureLost {
        failures: u32,
        #[source]
        last: CaptureError,
    },
}

/// `LANDING_TARGET` carrying a body-frame position.
pub fn landing_target(report: &PositionReport) -> LandingTarget {
    LandingTarget::body_position(
        report.timestamp_us,
        report.forward as f32,
        report.right as f32,
        report.down as f32,
    )
}

/// Frame source, detector and aggregator wired to optional telemetry and visualization.
pub struct Pipeline<D> {
    source: Box<dyn FrameSource>,
    detector: D,
    aggregator: PositionAggregator,
    link: Option<TelemetryLink>,
    viz: Option<VectorSink>,
    options: PipelineOptions,
    epoch: Instant,
    last_link_poll: Option<Instant>,
    size_warned: bool,
    stats: RunStats,
}

impl<D: MarkerDetector> Pipeline<D> {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: D,
        aggregator: PositionAggregator,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            detector,
            aggregator,
            link: None,
            viz: None,
            options,
            epoch: Instant::now(),
            last_link_poll: None,
            size_warned: false,
            stats: RunStats::default(),
        }
    }

    /// Send reports over `link` whenever it is connected.
    pub fn with_link(mut self, link: TelemetryLink) -> Self {
        self.link = Some(link);
        self
    }

    /// Publish each report's vectors to a running sink.
    pub fn with_visualization(mut self, sink: VectorSink) -> Self {
        self.viz = Some(sink);
        self
    }

    #[inline]
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    #[inline]
    pub fn link(&self) -> Option<&TelemetryLink> {
        self.link.as_ref()
    }

    /// Detect, aggregate and dispatch one frame.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
    pub fn process_frame(&mut self, frame: &Frame) -> Result<PositionReport, NoReport> {
        self.stats.frames += 1;
        self.check_frame_size(frame);

        let detections = self.detector.detect(&frame.image.view());
        let timestamp_us = frame
            .captured_at
            .saturating_duration_since(self.epoch)
            .as_micros() as u64;

        let report = match self.aggregator.process(&detections, timestamp_us) {
            Ok(report) => report,
            Err(reason) => {
                match reason {
                    NoReport::PayloadAbsent(_) => self.stats.payload_absent += 1,
                    NoReport::PayloadNotInGeometry(_) | NoReport::PoseUnavailable(_) => {
                        self.stats.payload_unresolved += 1
                    }
                    NoReport::PoseFailed { .. } => self.stats.pose_failures += 1,
                }
                debug!(
                    "frame {}: {} markers, no report: {reason}",
                    self.stats.frames,
                    detections.len()
                );
                return Err(reason);
            }
        };
        self.stats.reports += 1;
        debug!(
            "frame {}: forward {:.3} right {:.3} down {:.3} m",
            self.stats.frames, report.forward, report.right, report.down
        );

        if let Some(link) = self.link.as_mut().filter(|l| l.is_connected()) {
            match link.send_landing_target(&landing_target(&report)) {
                Ok(()) => self.stats.reports_sent += 1,
                Err(e) => {
                    self.stats.send_failures += 1;
                    warn!("landing target not sent: {e}");
                }
            }
        }

        if let Some(sink) = &self.viz {
            let mount = Vector3::from(self.aggregator.mount().translation);
            sink.publish(vec![mount, report.as_vector() - mount]);
        }
        Ok(report)
    }

    /// Run until stopped, out of frames, at the frame budget, or the camera is lost.
    pub fn run(&mut self, stop: &StopSignal) -> Result<RunStats, PipelineError> {
        info!("pipeline running: {}", self.source.describe());
        let max_failures = self.options.max_consecutive_capture_failures;
        let mut failures = 0u32;

        loop {
            if stop.is_stopped() {
                info!("stop requested");
                break;
            }
            if self.options.max_frames.is_some_and(|n| self.stats.frames >= n) {
                info!("frame budget reached");
                break;
            }
            self.service_link();

            match self.source.next_frame() {
                Ok(frame) => {
                    failures = 0;
                    let _ = self.process_frame(&frame);
                }
                Err(CaptureError::Exhausted) => {
                    info!("frame source exhausted");
                    break;
                }
                Err(e) => {
                    failures += 1;
                    self.stats.capture_failures += 1;
                    if failures > max_failures {
                        self.finish();
                        return Err(PipelineError::CaptureLost { failures, last: e });
                    }
                    warn!("capture failed ({failures}/{max_failures}): {e}");
                }
            }
        }

        self.finish();
        Ok(self.stats.clone())
    }

    fn service_link(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let now = Instant::now();
        if self
            .last_link_poll
            .is_some_and(|t| now.saturating_duration_since(t) < self.options.link_poll_interval)
        {
            return;
        }
        self.last_link_poll = Some(now);
        if let Err(e) = link.poll() {
            warn!("telemetry link: {e}");
        }
    }

    fn check_frame_size(&mut self, frame: &Frame) {
        if self.size_warned {
            return;
        }
        let (w, h) = self.aggregator.calibration().resolution();
        if (frame.image.width, frame.image.height) != (w as usize, h as usize) {
            warn!(
                "frame is {}x{} but the calibration is for {w}x{h}",
                frame.image.width, frame.image.height
            );
            self.size_warned = true;
        }
    }

    fn finish(&mut self) {
        if let Some(sink) = self.viz.as_mut() {
            sink.stop();
        }
        if let Some(link) = self.link.as_mut() {
            link.close();
        }
        let s = &self.stats;
        info!(
            "run finished: {} frames, {} reports ({} sent, {} send failures), \
             skipped: {} payload absent, {} unresolved, {} pose failures, {} capture failures",
            s.frames,
            s.reports,
            s.reports_sent,
            s.send_failures,
            s.payload_absent,
            s.payload_unresolved,
            s.pose_failures,
            s.capture_failures
        );
    }
}
