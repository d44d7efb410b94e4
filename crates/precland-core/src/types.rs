use crate::GrayImageView;
use nalgebra::{Point2, Vector3};
use serde::{Deserialize, Serialize};

/// One marker found in a frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectedMarker {
    pub id: u32,
    /// Image corners in the marker's own orientation: top-left, top-right,
    /// bottom-right, bottom-left (clockwise on screen).
    pub corners: [Point2<f64>; 4],
}

/// Marker pose in the camera optical frame (x right, y down, z forward).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerPose {
    /// Axis-angle rotation, marker frame -> camera frame.
    pub rotation: Vector3<f64>,
    /// Marker center in the camera frame, in the unit of the side length.
    pub translation: Vector3<f64>,
    /// RMS reprojection error of the four corners, pixels.
    pub reprojection_rms_px: f64,
}

/// Fused vehicle-relative position of the landing pad payload marker.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    /// Body-frame offsets in meters.
    pub forward: f64,
    pub right: f64,
    pub down: f64,
    /// Frame capture time, microseconds since the pipeline epoch.
    pub timestamp_us: u64,
}

impl PositionReport {
    pub fn as_vector(&self) -> Vector3<f64> {
        Vector3::new(self.forward, self.right, self.down)
    }
}

/// Anything that turns a grayscale frame into marker detections.
pub trait MarkerDetector {
    fn detect(&self, image: &GrayImageView<'_>) -> Vec<DetectedMarker>;
}
