//! Square-marker pose from four corners (IPPE specialised to a centered square).
//!
//! Pipeline:
//! 1. undistort the corners into normalized camera coordinates,
//! 2. fit the model-plane -> image homography (model origin = marker center),
//! 3. take its Jacobian at the origin and recover the two rotations that are
//!    consistent with it,
//! 4. solve translation for each rotation by linear least squares,
//! 5. keep the candidate with the lower reprojection error, rejecting it when
//!    that error exceeds [`MAX_REPROJECTION_RMS_PX`].

use crate::{homography_from_4pt, CalibrationProfile, MarkerPose};
use nalgebra::{Matrix2, Matrix3, Point2, Point3, Rotation3, SMatrix, SVector, Vector3};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Reasons a marker pose could not be recovered.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum PoseSolveFailure {
    #[error("marker side length must be positive and finite (got {0})")]
    InvalidSideLength(f64),
    #[error("corner could not be mapped to normalized camera coordinates")]
    Undistortion,
    #[error("degenerate corner configuration")]
    Degenerate,
    #[error("no pose candidate lies in front of the camera")]
    BehindCamera,
    #[error("best pose reprojects with {0:.2} px rms")]
    ReprojectionTooLarge(f64),
}

/// Largest reprojection RMS (pixels) accepted for a solved pose. Corners that
/// are not the image of a square cannot be fit below this.
pub const MAX_REPROJECTION_RMS_PX: f64 = 4.0;

/// Marker-frame corners of a square of side `side`, centered on the origin
/// in the z = 0 plane, ordered top-left, top-right, bottom-right, bottom-left.
pub fn square_object_points(side: f64) -> [Point3<f64>; 4] {
    let h = side / 2.0;
    [
        Point3::new(-h, h, 0.0),
        Point3::new(h, h, 0.0),
        Point3::new(h, -h, 0.0),
        Point3::new(-h, -h, 0.0),
    ]
}

/// Solve the pose of a square marker of side `side_length` from its image corners.
///
/// `corners` must follow the [`square_object_points`] order. The translation is
/// expressed in the unit of `side_length`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "trace", skip(corners, calibration), fields(side = side_length))
)]
pub fn solve_square_pose(
    corners: &[Point2<f64>; 4],
    side_length: f64,
    calibration: &CalibrationProfile,
) -> Result<MarkerPose, PoseSolveFailure> {
    if !side_length.is_finite() || side_length <= 0.0 {
        return Err(PoseSolveFailure::InvalidSideLength(side_length));
    }
    if !is_proper_quad(corners) {
        return Err(PoseSolveFailure::Degenerate);
    }

    let mut normalized = [Point2::origin(); 4];
    for (n, c) in normalized.iter_mut().zip(corners) {
        *n = calibration
            .normalize_pixel(*c)
            .ok_or(PoseSolveFailure::Undistortion)?;
    }

    if !is_proper_quad(&normalized) {
        return Err(PoseSolveFailure::Degenerate);
    }

    let object = square_object_points(side_length);
    let model = object.map(|p| Point2::new(p.x, p.y));
    let h = homography_from_4pt(&model, &normalized)
        .ok_or(PoseSolveFailure::Degenerate)?
        .h;

    let best = candidate_rotations(&h)?
        .into_iter()
        .filter_map(|rotation| {
            let translation = solve_translation(&rotation, &object, &normalized)?;
            if translation.z <= 0.0 {
                return None;
            }
            let rms = reprojection_rms(&rotation, &translation, &object, corners, calibration)?;
            Some((rotation, translation, rms))
        })
        .min_by(|a, b| a.2.total_cmp(&b.2));

    let (rotation, translation, rms) = best.ok_or(PoseSolveFailure::BehindCamera)?;
    if rms > MAX_REPROJECTION_RMS_PX {
        return Err(PoseSolveFailure::ReprojectionTooLarge(rms));
    }
    Ok(MarkerPose {
        rotation: rotation.scaled_axis(),
        translation,
        reprojection_rms_px: rms,
    })
}

/// No three corners collinear (relative to the quad's own scale).
fn is_proper_quad(pts: &[Point2<f64>; 4]) -> bool {
    let scale: f64 = (0..4).map(|i| (pts[(i + 1) % 4] - pts[i]).norm_squared()).sum();
    if !(scale.is_finite() && scale > 0.0) {
        return false;
    }
    (0..4).all(|skip| {
        let [a, b, c] = [1, 2, 3].map(|k| pts[(skip + k) % 4]);
        let area2 = (b - a).perp(&(c - a));
        area2.abs() > 1e-9 * scale
    })
}

/// Both rotations consistent with the homography Jacobian at the model origin.
///
/// `h` maps model-plane points to normalized image coordinates with `h33 = 1`.
fn candidate_rotations(h: &Matrix3<f64>) -> Result<[Rotation3<f64>; 2], PoseSolveFailure> {
    // image of the marker center
    let p = h[(0, 2)];
    let q = h[(1, 2)];
    let jac = Matrix2::new(
        h[(0, 0)] - h[(2, 0)] * p,
        h[(0, 1)] - h[(2, 1)] * p,
        h[(1, 0)] - h[(2, 0)] * q,
        h[(1, 1)] - h[(2, 1)] * q,
    );

    // Rv takes the optical axis onto the viewing ray of the marker center.
    let ray = Vector3::new(p, q, 1.0).normalize();
    let rv = Rotation3::rotation_between(&Vector3::z(), &ray).unwrap_or_else(Rotation3::identity);
    let rv = rv.matrix();

    // The projection Jacobian at the ray annihilates Rv's third column, so
    // jac = (1/depth) * B * R'[0..2, 0..2] with B the leading 2x2 block below.
    let b = Matrix2::new(
        rv[(0, 0)] - p * rv[(2, 0)],
        rv[(0, 1)] - p * rv[(2, 1)],
        rv[(1, 0)] - q * rv[(2, 0)],
        rv[(1, 1)] - q * rv[(2, 1)],
    );
    let a = b.try_inverse().ok_or(PoseSolveFailure::Degenerate)? * jac;

    // largest singular value of `a` is 1/depth
    let ata = a.transpose() * a;
    let tr = ata[(0, 0)] + ata[(1, 1)];
    let diff = ata[(0, 0)] - ata[(1, 1)];
    let gamma2 = 0.5 * (tr + (diff * diff + 4.0 * ata[(0, 1)] * ata[(0, 1)]).sqrt());
    if !gamma2.is_finite() || gamma2 <= 1e-24 {
        return Err(PoseSolveFailure::Degenerate);
    }
    let r = a / gamma2.sqrt();

    let b0 = (1.0 - r[(0, 0)].powi(2) - r[(1, 0)].powi(2)).max(0.0).sqrt();
    let mut b1 = (1.0 - r[(0, 1)].powi(2) - r[(1, 1)].powi(2)).max(0.0).sqrt();
    // columns must stay orthogonal: b0 * b1 = -(r00 r01 + r10 r11)
    if r[(0, 0)] * r[(0, 1)] + r[(1, 0)] * r[(1, 1)] > 0.0 {
        b1 = -b1;
    }

    let build = |sign: f64| {
        let c0 = Vector3::new(r[(0, 0)], r[(1, 0)], sign * b0);
        let c1 = Vector3::new(r[(0, 1)], r[(1, 1)], sign * b1);
        orthonormal_frame(c0, c1).map(|local| Rotation3::from_matrix_unchecked(rv * local))
    };

    match (build(1.0), build(-1.0)) {
        (Some(a), Some(b)) => Ok([a, b]),
        _ => Err(PoseSolveFailure::Degenerate),
    }
}

/// Gram-Schmidt on the first two columns, third column by cross product.
fn orthonormal_frame(c0: Vector3<f64>, c1: Vector3<f64>) -> Option<Matrix3<f64>> {
    let c0 = c0.try_normalize(1e-12)?;
    let c1 = (c1 - c0 * c0.dot(&c1)).try_normalize(1e-12)?;
    let c2 = c0.cross(&c1);
    let m = Matrix3::from_columns(&[c0, c1, c2]);
    m.iter().all(|v| v.is_finite()).then_some(m)
}

/// Least-squares translation for a fixed rotation (linear in `t`).
fn solve_translation(
    rotation: &Rotation3<f64>,
    object: &[Point3<f64>; 4],
    normalized: &[Point2<f64>; 4],
) -> Option<Vector3<f64>> {
    let mut a = SMatrix::<f64, 8, 3>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for (k, (x, n)) in object.iter().zip(normalized).enumerate() {
        let pr = rotation * x.coords;
        // u * (Pz + tz) = Px + tx  ->  tx - u tz = u Pz - Px
        a[(2 * k, 0)] = 1.0;
        a[(2 * k, 2)] = -n.x;
        b[2 * k] = n.x * pr.z - pr.x;

        a[(2 * k + 1, 1)] = 1.0;
        a[(2 * k + 1, 2)] = -n.y;
        b[2 * k + 1] = n.y * pr.z - pr.y;
    }

    let at = a.transpose();
    let t = (at * a).cholesky()?.solve(&(at * b));
    t.iter().all(|v| v.is_finite()).then_some(t)
}

fn reprojection_rms(
    rotation: &Rotation3<f64>,
    translation: &Vector3<f64>,
    object: &[Point3<f64>; 4],
    corners: &[Point2<f64>; 4],
    calibration: &CalibrationProfile,
) -> Option<f64> {
    let mut sum = 0.0;
    for (x, c) in object.iter().zip(corners) {
        let pc = Point3::from(rotation * x.coords + translation);
        let px = calibration.project(&pc)?;
        sum += (px - c).norm_squared();
    }
    Some((sum / 4.0).sqrt())
}
