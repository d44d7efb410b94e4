//! Camera calibration profile: pinhole intrinsics plus Brown-Conrady distortion.
//!
//! Distortion coefficients use the OpenCV ordering `k1 k2 p1 p2 [k3]`.
//! Pixel coordinates follow the detector convention (pixel `i` covers `[i, i + 1)`),
//! which matches the convention the intrinsics were calibrated with.

use nalgebra::{Matrix3, Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Calibration validation errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("camera matrix is not invertible or contains non-finite values")]
    InvalidCameraMatrix,
    #[error("expected 0, 4 or 5 distortion coefficients, got {0}")]
    DistortionLength(usize),
    #[error("distortion coefficients must be finite")]
    NonFiniteDistortion,
    #[error("invalid frame resolution {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },
}

/// Brown-Conrady radial-tangential distortion coefficients.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RadialTangentialDistortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl RadialTangentialDistortion {
    /// Build from an OpenCV-style coefficient vector (`[]`, 4 or 5 entries).
    pub fn from_coefficients(coeffs: &[f64]) -> Result<Self, CalibrationError> {
        if coeffs.iter().any(|c| !c.is_finite()) {
            return Err(CalibrationError::NonFiniteDistortion);
        }
        match *coeffs {
            [] => Ok(Self::default()),
            [k1, k2, p1, p2] => Ok(Self {
                k1,
                k2,
                p1,
                p2,
                k3: 0.0,
            }),
            [k1, k2, p1, p2, k3] => Ok(Self { k1, k2, p1, p2, k3 }),
            _ => Err(CalibrationError::DistortionLength(coeffs.len())),
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Apply distortion to normalized coordinates.
    pub fn distort(&self, p: Point2<f64>) -> Point2<f64> {
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Point2::new(x * radial + x_tan, y * radial + y_tan)
    }

    /// Invert [`Self::distort`] by fixed-point iteration.
    pub fn undistort(&self, distorted: Point2<f64>) -> Option<Point2<f64>> {
        const MAX_ITERS: usize = 20;
        const EPS: f64 = 1e-14;

        if self.is_zero() {
            return Some(distorted);
        }

        let mut x = distorted.x;
        let mut y = distorted.y;
        for _ in 0..MAX_ITERS {
            let r2 = x * x + y * y;
            let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
            if !radial.is_finite() || radial.abs() < 1e-12 {
                return None;
            }
            let dx_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            let x_next = (distorted.x - dx_tan) / radial;
            let y_next = (distorted.y - dy_tan) / radial;
            if !x_next.is_finite() || !y_next.is_finite() {
                return None;
            }
            let step = (x_next - x).powi(2) + (y_next - y).powi(2);
            x = x_next;
            y = y_next;
            if step <= EPS * EPS {
                break;
            }
        }
        Some(Point2::new(x, y))
    }
}

/// Immutable camera calibration: intrinsics, distortion and frame size.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationProfile {
    camera_matrix: Matrix3<f64>,
    camera_matrix_inv: Matrix3<f64>,
    distortion: RadialTangentialDistortion,
    width: u32,
    height: u32,
}

impl CalibrationProfile {
    /// Validate and build a profile.
    pub fn new(
        camera_matrix: Matrix3<f64>,
        distortion: &[f64],
        width: u32,
        height: u32,
    ) -> Result<Self, CalibrationError> {
        if camera_matrix.iter().any(|v| !v.is_finite()) {
            return Err(CalibrationError::InvalidCameraMatrix);
        }
        let camera_matrix_inv = camera_matrix
            .try_inverse()
            .ok_or(CalibrationError::InvalidCameraMatrix)?;
        if width == 0 || height == 0 {
            return Err(CalibrationError::InvalidResolution { width, height });
        }
        Ok(Self {
            camera_matrix,
            camera_matrix_inv,
            distortion: RadialTangentialDistortion::from_coefficients(distortion)?,
            width,
            height,
        })
    }

    /// Build from a row-major 3×3 matrix.
    pub fn from_rows(
        rows: [[f64; 3]; 3],
        distortion: &[f64],
        width: u32,
        height: u32,
    ) -> Result<Self, CalibrationError> {
        let k = Matrix3::from_row_slice(&[
            rows[0][0], rows[0][1], rows[0][2], //
            rows[1][0], rows[1][1], rows[1][2], //
            rows[2][0], rows[2][1], rows[2][2],
        ]);
        Self::new(k, distortion, width, height)
    }

    #[inline]
    pub fn camera_matrix(&self) -> &Matrix3<f64> {
        &self.camera_matrix
    }

    #[inline]
    pub fn distortion(&self) -> &RadialTangentialDistortion {
        &self.distortion
    }

    #[inline]
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Image pixel -> undistorted normalized camera coordinates.
    pub fn normalize_pixel(&self, pixel: Point2<f64>) -> Option<Point2<f64>> {
        let v = self.camera_matrix_inv * Vector3::new(pixel.x, pixel.y, 1.0);
        if v.z.abs() < 1e-12 {
            return None;
        }
        let distorted = Point2::new(v.x / v.z, v.y / v.z);
        self.distortion.undistort(distorted)
    }

    /// Project a camera-frame point to image pixels, `None` behind the camera.
    pub fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        if p.z <= 1e-12 {
            return None;
        }
        let d = self.distortion.distort(Point2::new(p.x / p.z, p.y / p.z));
        let v = self.camera_matrix * Vector3::new(d.x, d.y, 1.0);
        Some(Point2::new(v.x / v.z, v.y / v.z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_profile() -> CalibrationProfile {
        CalibrationProfile::from_rows(
            [[900.0, 0.0, 640.0], [0.0, 920.0, 480.0], [0.0, 0.0, 1.0]],
            &[-0.12, 0.03, 0.001, -0.0008, 0.0],
            1280,
            960,
        )
        .expect("valid profile")
    }

    #[test]
    fn singular_camera_matrix_is_rejected() {
        let err = CalibrationProfile::new(Matrix3::zeros(), &[], 640, 480).unwrap_err();
        assert_eq!(err, CalibrationError::InvalidCameraMatrix);
    }

    #[test]
    fn odd_distortion_length_is_rejected() {
        let err = RadialTangentialDistortion::from_coefficients(&[0.1, 0.2, 0.3]).unwrap_err();
        assert_eq!(err, CalibrationError::DistortionLength(3));
    }

    #[test]
    fn project_then_normalize_round_trips() {
        let cam = sample_profile();
        let p = Point3::new(0.3, -0.2, 2.5);
        let px = cam.project(&p).expect("in front");
        let n = cam.normalize_pixel(px).expect("undistortable");
        assert!((n.x - p.x / p.z).abs() < 1e-9, "x={}", n.x);
        assert!((n.y - p.y / p.z).abs() < 1e-9, "y={}", n.y);
    }

    #[test]
    fn points_behind_camera_do_not_project() {
        let cam = sample_profile();
        assert!(cam.project(&Point3::new(0.0, 0.0, -1.0)).is_none());
    }
}
