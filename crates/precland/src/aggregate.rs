//! Per-frame fusion: marker poses against the pad layout, into one body-frame position.

use crate::pad::PadGeometry;
use log::debug;
use precland_core::{
    solve_square_pose, CalibrationProfile, CameraMountOffset, DetectedMarker, MarkerPose,
    PoseSolveFailure, PositionReport,
};
use std::collections::BTreeMap;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Why a frame produced no position.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum NoReport {
    #[error("payload marker {0} not detected")]
    PayloadAbsent(u32),
    #[error("payload marker {0} has no pad geometry entry")]
    PayloadNotInGeometry(u32),
    #[error("payload marker {0} was detected but its pose was not solved")]
    PoseUnavailable(u32),
    #[error("payload marker {id} pose solve failed: {reason}")]
    PoseFailed { id: u32, reason: PoseSolveFailure },
}

/// Per-id pose outcome for one frame.
pub type MarkerPoses = BTreeMap<u32, Result<MarkerPose, PoseSolveFailure>>;

/// Solve a pose for every detection whose id the pad knows. The first
/// detection of an id wins; later duplicates are ignored.
pub fn solve_marker_poses(
    detections: &[DetectedMarker],
    pad: &PadGeometry,
    calibration: &CalibrationProfile,
) -> MarkerPoses {
    let mut poses = MarkerPoses::new();
    for det in detections {
        if poses.contains_key(&det.id) {
            debug!("ignoring duplicate detection of marker {}", det.id);
            continue;
        }
        let Some(side) = pad.side_length(det.id) else {
            continue;
        };
        let pose = solve_square_pose(&det.corners, side, calibration);
        if let Err(e) = &pose {
            debug!("marker {}: {e}", det.id);
        }
        poses.insert(det.id, pose);
    }
    poses
}

/// Body-frame position of the payload marker.
///
/// Only the payload pose is used; structural markers are solved but never
/// averaged in. The pose translation is converted from pad units to meters
/// once, then mapped through the mount offset.
pub fn aggregate(
    detections: &[DetectedMarker],
    poses: &MarkerPoses,
    pad: &PadGeometry,
    mount: &CameraMountOffset,
    timestamp_us: u64,
) -> Result<PositionReport, NoReport> {
    let payload = pad.payload_id();
    if !detections.iter().any(|d| d.id == payload) {
        return Err(NoReport::PayloadAbsent(payload));
    }
    if !pad.contains(payload) {
        return Err(NoReport::PayloadNotInGeometry(payload));
    }
    let pose = match poses.get(&payload) {
        Some(Ok(pose)) => pose,
        Some(Err(reason)) => {
            return Err(NoReport::PoseFailed {
                id: payload,
                reason: *reason,
            })
        }
        None => return Err(NoReport::PoseUnavailable(payload)),
    };

    let optical_m = pose.translation * pad.unit().meters_per_unit();
    let body = mount.to_body(&optical_m);
    Ok(PositionReport {
        forward: body.x,
        right: body.y,
        down: body.z,
        timestamp_us,
    })
}

/// Immutable inputs of the aggregation step, bundled for the pipeline.
#[derive(Clone, Debug)]
pub struct PositionAggregator {
    calibration: CalibrationProfile,
    pad: PadGeometry,
    mount: CameraMountOffset,
}

impl PositionAggregator {
    pub fn new(calibration: CalibrationProfile, pad: PadGeometry, mount: CameraMountOffset) -> Self {
        Self {
            calibration,
            pad,
            mount,
        }
    }

    #[inline]
    pub fn calibration(&self) -> &CalibrationProfile {
        &self.calibration
    }

    #[inline]
    pub fn pad(&self) -> &PadGeometry {
        &self.pad
    }

    #[inline]
    pub fn mount(&self) -> &CameraMountOffset {
        &self.mount
    }

    /// Solve and aggregate one frame's detections.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, detections), fields(n = detections.len()))
    )]
    pub fn process(
        &self,
        detections: &[DetectedMarker],
        timestamp_us: u64,
    ) -> Result<PositionReport, NoReport> {
        let poses = solve_marker_poses(detections, &self.pad, &self.calibration);
        aggregate(detections, &poses, &self.pad, &self.mount, timestamp_us)
    }
}
