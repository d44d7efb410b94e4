//! Core geometry for marker-based precision landing.
//!
//! Camera calibration and distortion, homographies, the square-marker pose
//! solver, and the camera-mount frame composition. The crate knows nothing
//! about image sources, marker dictionaries or telemetry; detectors plug in
//! through [`MarkerDetector`].

mod camera;
mod frames;
mod homography;
mod image;
mod logger;
mod pose;
mod types;

pub use camera::{CalibrationError, CalibrationProfile, RadialTangentialDistortion};
pub use frames::{euler_rotation, optical_to_body, CameraMountOffset};
pub use homography::{homography_from_4pt, Homography};
pub use image::{sample_bilinear, GrayImage, GrayImageView};
pub use pose::{
    solve_square_pose, square_object_points, PoseSolveFailure, MAX_REPROJECTION_RMS_PX,
};
pub use types::{DetectedMarker, MarkerDetector, MarkerPose, PositionReport};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init, init_with_level, LogConfig};
