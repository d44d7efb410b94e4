//! Marker-based precision landing.
//!
//! A camera looks down at a landing pad carrying square fiducial markers.
//! Each frame is searched for markers, the pose of the pad's payload marker
//! is solved and mapped into the vehicle body frame, and the resulting
//! forward / right / down offset is sent to the flight controller as a
//! MAVLink `LANDING_TARGET`.
//!
//! ## Quickstart
//!
//! ```no_run
//! use precland::aruco::ArucoDetector;
//! use precland::capture::open_frame_source;
//! use precland::pipeline::{Pipeline, PipelineOptions, StopSignal};
//! use precland::{CameraConfig, PadConfig, PositionAggregator};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let camera = CameraConfig::load("calibration.json")?;
//! let pad = PadConfig::load("pad.json")?;
//! let detector = ArucoDetector::new(&pad.dictionary, camera.detector.clone())?;
//! let (w, h) = camera.calibration.resolution();
//! let source = open_frame_source(&camera.capture, w, h)?;
//! let aggregator = PositionAggregator::new(camera.calibration, pad.geometry, camera.mount);
//!
//! let mut pipeline = Pipeline::new(source, detector, aggregator, PipelineOptions::default());
//! let stats = pipeline.run(&StopSignal::new())?;
//! println!("{} reports", stats.reports);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `precland::core`: calibration, pose solver, body-frame composition.
//! - `precland::aruco`: dictionaries and the square-marker detector.
//! - `precland::link`: MAVLink codec and the telemetry link state machine.
//! - [`config`], [`pad`]: JSON inputs.
//! - [`aggregate`]: payload pose into a [`PositionReport`].
//! - [`capture`], [`viz`], [`pipeline`]: the running system.

pub use precland_aruco as aruco;
pub use precland_core as core;
pub use precland_link as link;

pub mod aggregate;
pub mod capture;
pub mod config;
pub mod pad;
pub mod pipeline;
pub mod viz;

pub use aggregate::{aggregate, solve_marker_poses, NoReport, PositionAggregator};
pub use config::{CalibrationFile, CameraConfig, CaptureMethod, ConfigError};
pub use pad::{LengthUnit, PadConfig, PadFile, PadGeometry, PadGeometryError};
pub use precland_core::{DetectedMarker, MarkerDetector, MarkerPose, PositionReport};
