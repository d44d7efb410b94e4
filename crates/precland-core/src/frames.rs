//! Camera optical frame -> vehicle body frame (forward, right, down).

use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Fixed axis map from the optical frame (x right, y down, z forward) to
/// the body frame (forward, right, down).
pub fn optical_to_body() -> Matrix3<f64> {
    Matrix3::new(
        0.0, 0.0, 1.0, //
        1.0, 0.0, 0.0, //
        0.0, 1.0, 0.0,
    )
}

/// Rigid offset of the camera relative to the vehicle body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraMountOffset {
    /// Camera position in the body frame, meters.
    #[serde(default)]
    pub translation: [f64; 3],
    /// Euler angles about X, Y, Z in degrees, applied X first.
    #[serde(default, alias = "rotation")]
    pub rotation_deg: [f64; 3],
}

impl CameraMountOffset {
    pub fn rotation(&self) -> Rotation3<f64> {
        let [x, y, z] = self.rotation_deg;
        euler_rotation(x.to_radians(), y.to_radians(), z.to_radians())
    }

    pub fn is_finite(&self) -> bool {
        self.translation
            .iter()
            .chain(self.rotation_deg.iter())
            .all(|v| v.is_finite())
    }

    /// Map a camera-frame translation (already in meters) into the body frame.
    pub fn to_body(&self, optical_m: &Vector3<f64>) -> Vector3<f64> {
        self.rotation() * (optical_to_body() * optical_m) + Vector3::from(self.translation)
    }
}

/// `Rz(z) * Ry(y) * Rx(x)`, angles in radians.
pub fn euler_rotation(x: f64, y: f64, z: f64) -> Rotation3<f64> {
    let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), x);
    let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), y);
    let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), z);
    rz * ry * rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_mount_maps_optical_axes() {
        let mount = CameraMountOffset::default();
        let body = mount.to_body(&Vector3::new(0.1, 0.2, 1.0));
        assert_relative_eq!(body, Vector3::new(1.0, 0.1, 0.2), epsilon = 1e-12);
    }

    #[test]
    fn yaw_by_ninety_degrees_turns_forward_into_right() {
        let mount = CameraMountOffset {
            translation: [0.0; 3],
            rotation_deg: [0.0, 0.0, 90.0],
        };
        let body = mount.to_body(&Vector3::new(0.0, 0.0, 1.0));
        assert_relative_eq!(body, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn pitch_then_translation_is_applied() {
        // downward-looking camera: pitch -90 deg sends forward into down
        let mount = CameraMountOffset {
            translation: [0.05, 0.0, 0.1],
            rotation_deg: [0.0, -90.0, 0.0],
        };
        let body = mount.to_body(&Vector3::new(0.0, 0.0, 2.0));
        assert_relative_eq!(body, Vector3::new(0.05, 0.0, 2.1), epsilon = 1e-12);
    }

    #[test]
    fn x_rotation_is_applied_before_z() {
        let r = euler_rotation(90f64.to_radians(), 0.0, 90f64.to_radians());
        // Rx sends y to z, Rz leaves z alone
        assert_relative_eq!(r * Vector3::y(), Vector3::z(), epsilon = 1e-12);
        // Rx leaves x alone, Rz sends x to y
        assert_relative_eq!(r * Vector3::x(), Vector3::y(), epsilon = 1e-12);
    }

    #[test]
    fn rotation_alias_is_accepted() {
        let mount: CameraMountOffset =
            serde_json::from_str(r#"{"translation":[0,0,0],"rotation":[0,0,45]}"#)
                .expect("parse");
        assert_eq!(mount.rotation_deg, [0.0, 0.0, 45.0]);
    }
}
