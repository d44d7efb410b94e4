//! Camera calibration file: intrinsics, distortion, mount offset and capture method.

use precland_aruco::ArucoParams;
use precland_core::{CalibrationError, CalibrationProfile, CameraMountOffset};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("unrecognised capture method `{0}` (expected OpenCV/generic, PiCamera/board or replay)")]
    UnknownCaptureMethod(String),
    #[error("capture method `replay` needs `replay_dir`")]
    MissingReplayDir,
    #[error("mount offset must be finite")]
    NonFiniteMountOffset,
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}

fn default_device() -> String {
    "/dev/video0".to_string()
}

/// Calibration file as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationFile {
    /// `"OpenCV"`/`"generic"`, `"PiCamera"`/`"board"` or `"replay"`.
    pub capture_method: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Row-major intrinsic matrix.
    pub camera_matrix: [[f64; 3]; 3],
    /// k1 k2 p1 p2 [k3]; empty means no distortion.
    #[serde(default, alias = "dist_coeffs")]
    pub distortion: Vec<f64>,
    #[serde(default)]
    pub mount_offset: CameraMountOffset,
    /// V4L2 node for the generic capture method.
    #[serde(default = "default_device")]
    pub device: String,
    /// Image directory for the replay method; relative to the calibration file.
    #[serde(default)]
    pub replay_dir: Option<PathBuf>,
    /// Detector tuning overrides.
    #[serde(default)]
    pub detector: Option<ArucoParams>,
}

impl CalibrationFile {
    /// Load a JSON calibration file from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this calibration to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn build_profile(&self) -> Result<CalibrationProfile, ConfigError> {
        Ok(CalibrationProfile::from_rows(
            self.camera_matrix,
            &self.distortion,
            self.camera_width,
            self.camera_height,
        )?)
    }

    /// Resolve the capture method; `base_dir` anchors a relative `replay_dir`.
    pub fn capture_method(&self, base_dir: &Path) -> Result<CaptureMethod, ConfigError> {
        match self.capture_method.to_ascii_lowercase().as_str() {
            "opencv" | "generic" | "v4l2" => Ok(CaptureMethod::Generic {
                device: self.device.clone(),
            }),
            "picamera" | "board" | "rpicam" => Ok(CaptureMethod::BoardCamera),
            "replay" => {
                let dir = self.replay_dir.as_ref().ok_or(ConfigError::MissingReplayDir)?;
                Ok(CaptureMethod::Replay {
                    dir: base_dir.join(dir),
                })
            }
            _ => Err(ConfigError::UnknownCaptureMethod(self.capture_method.clone())),
        }
    }
}

/// Where frames come from; chosen once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureMethod {
    /// Any V4L2 camera, read through `ffmpeg`.
    Generic { device: String },
    /// Raspberry Pi board camera, read through `rpicam-vid`.
    BoardCamera,
    /// Still images from a directory, in file name order.
    Replay { dir: PathBuf },
}

/// Validated, immutable camera setup.
#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub calibration: CalibrationProfile,
    pub mount: CameraMountOffset,
    pub capture: CaptureMethod,
    pub detector: ArucoParams,
}

impl CameraConfig {
    pub fn from_file(file: &CalibrationFile, base_dir: &Path) -> Result<Self, ConfigError> {
        if !file.mount_offset.is_finite() {
            return Err(ConfigError::NonFiniteMountOffset);
        }
        Ok(Self {
            calibration: file.build_profile()?,
            mount: file.mount_offset,
            capture: file.capture_method(base_dir)?,
            detector: file.detector.clone().unwrap_or_default(),
        })
    }

    /// Load and validate a calibration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = CalibrationFile::load_json(path)?;
        Self::from_file(&file, path.parent().unwrap_or(Path::new(".")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> CalibrationFile {
        serde_json::from_str(
            r#"{
                "capture_method": "PiCamera",
                "camera_width": 1280,
                "camera_height": 720,
                "camera_matrix": [[910.0, 0.0, 640.0], [0.0, 910.0, 360.0], [0.0, 0.0, 1.0]],
                "distortion": [0.1, -0.05, 0.0, 0.0, 0.0],
                "mount_offset": { "translation": [0.1, 0.0, 0.05], "rotation": [0.0, 90.0, 0.0] }
            }"#,
        )
        .expect("parse")
    }

    #[test]
    fn parses_capture_method_aliases() {
        let mut file = sample_file();
        let base = Path::new("/etc/precland");
        assert_eq!(
            file.capture_method(base).expect("method"),
            CaptureMethod::BoardCamera
        );

        file.capture_method = "OpenCV".into();
        assert_eq!(
            file.capture_method(base).expect("method"),
            CaptureMethod::Generic {
                device: "/dev/video0".into()
            }
        );

        file.capture_method = "replay".into();
        assert!(matches!(
            file.capture_method(base),
            Err(ConfigError::MissingReplayDir)
        ));
        file.replay_dir = Some("frames".into());
        assert_eq!(
            file.capture_method(base).expect("method"),
            CaptureMethod::Replay {
                dir: PathBuf::from("/etc/precland/frames")
            }
        );

        file.capture_method = "webcam".into();
        assert!(matches!(
            file.capture_method(base),
            Err(ConfigError::UnknownCaptureMethod(m)) if m == "webcam"
        ));
    }

    #[test]
    fn builds_camera_config() {
        let cfg = CameraConfig::from_file(&sample_file(), Path::new(".")).expect("config");
        assert_eq!(cfg.calibration.resolution(), (1280, 720));
        assert_eq!(cfg.mount.rotation_deg, [0.0, 90.0, 0.0]);
        assert_eq!(cfg.detector.threshold_window, 31);
    }

    #[test]
    fn rejects_bad_intrinsics_and_distortion() {
        let mut file = sample_file();
        file.camera_matrix = [[0.0; 3]; 3];
        assert!(matches!(
            CameraConfig::from_file(&file, Path::new(".")),
            Err(ConfigError::Calibration(_))
        ));

        let mut file = sample_file();
        file.distortion = vec![0.1, 0.2, 0.3];
        assert!(matches!(
            CameraConfig::from_file(&file, Path::new(".")),
            Err(ConfigError::Calibration(_))
        ));

        let mut file = sample_file();
        file.mount_offset.translation[1] = f64::NAN;
        assert!(matches!(
            CameraConfig::from_file(&file, Path::new(".")),
            Err(ConfigError::NonFiniteMountOffset)
        ));
    }

    #[test]
    fn write_then_load_keeps_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("calibration.json");
        let file = sample_file();
        file.write_json(&path).expect("write");

        let loaded = CalibrationFile::load_json(&path).expect("load");
        assert_eq!(loaded.camera_matrix, file.camera_matrix);
        assert_eq!(loaded.distortion, file.distortion);
        assert_eq!(loaded.mount_offset, file.mount_offset);
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            CalibrationFile::load_json("/nonexistent/calibration.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
