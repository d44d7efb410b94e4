//! Quadrilateral candidates from a dark-pixel mask.
//!
//! Connected dark components are reduced to their outer boundary, a
//! four-corner polygon is fitted by farthest-point search, and the corners
//! are refined by intersecting least-squares edge lines.

use crate::threshold::DarkMask;
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Candidate filtering parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadParams {
    /// Minimum quad perimeter relative to the larger image dimension.
    pub min_perimeter_rate: f64,
    /// Maximum quad perimeter relative to the larger image dimension.
    pub max_perimeter_rate: f64,
    /// Minimum side length in pixels.
    pub min_side_px: f64,
    /// Boundary points may deviate from the fitted edges by this fraction of
    /// the mean side length (never less than `min_edge_tolerance_px`).
    pub edge_tolerance_rate: f64,
    pub min_edge_tolerance_px: f64,
}

impl Default for QuadParams {
    fn default() -> Self {
        Self {
            min_perimeter_rate: 0.03,
            max_perimeter_rate: 4.0,
            min_side_px: 8.0,
            edge_tolerance_rate: 0.06,
            min_edge_tolerance_px: 1.5,
        }
    }
}

/// A quadrilateral candidate, corners clockwise on screen.
#[derive(Clone, Debug)]
pub(crate) struct QuadCandidate {
    pub corners: [Point2<f64>; 4],
    pub perimeter: f64,
}

struct Component {
    label: u32,
    x0: usize,
    y0: usize,
    x1: usize,
    y1: usize,
    touches_border: bool,
}

/// All quad candidates in raster order of their components' first pixel.
pub(crate) fn find_quad_candidates(mask: &DarkMask, params: &QuadParams) -> Vec<QuadCandidate> {
    let (labels, components) = label_components(mask);
    let max_dim = mask.width.max(mask.height) as f64;
    let min_perimeter = params.min_perimeter_rate * max_dim;
    let max_perimeter = params.max_perimeter_rate * max_dim;

    let mut out = Vec::new();
    for comp in components.iter().filter(|c| !c.touches_border) {
        let (bw, bh) = ((comp.x1 - comp.x0 + 1) as f64, (comp.y1 - comp.y0 + 1) as f64);
        if 2.0 * (bw + bh) < min_perimeter || bw < params.min_side_px || bh < params.min_side_px {
            continue;
        }

        let boundary = outer_boundary(&labels, mask.width, comp);
        let Some(quad) = fit_quad(&boundary, params) else {
            continue;
        };
        let corners = refine_corners(&boundary, &quad, params).unwrap_or(quad);
        let perimeter = polygon_perimeter(&corners);
        if perimeter < min_perimeter || perimeter > max_perimeter {
            continue;
        }
        out.push(QuadCandidate { corners, perimeter });
    }
    out
}

/// 8-connected labelling of dark pixels. Label 0 is background.
fn label_components(mask: &DarkMask) -> (Vec<u32>, Vec<Component>) {
    let (w, h) = (mask.width, mask.height);
    let mut labels = vec![0u32; w * h];
    let mut components = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..w * h {
        if mask.data[start] == 0 || labels[start] != 0 {
            continue;
        }
        let label = components.len() as u32 + 1;
        let mut comp = Component {
            label,
            x0: usize::MAX,
            y0: usize::MAX,
            x1: 0,
            y1: 0,
            touches_border: false,
        };

        labels[start] = label;
        queue.push_back(start);
        while let Some(idx) = queue.pop_front() {
            let (x, y) = (idx % w, idx / w);
            comp.x0 = comp.x0.min(x);
            comp.y0 = comp.y0.min(y);
            comp.x1 = comp.x1.max(x);
            comp.y1 = comp.y1.max(y);
            if x == 0 || y == 0 || x + 1 == w || y + 1 == h {
                comp.touches_border = true;
            }

            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let n = ny * w + nx;
                    if mask.data[n] != 0 && labels[n] == 0 {
                        labels[n] = label;
                        queue.push_back(n);
                    }
                }
            }
        }
        components.push(comp);
    }

    (labels, components)
}

/// Pixel centers of component pixels 4-adjacent to the background that
/// surrounds the component (holes do not count).
fn outer_boundary(labels: &[u32], width: usize, comp: &Component) -> Vec<Point2<f64>> {
    // Box grown by one pixel on each side; valid because the component does
    // not touch the image border.
    let bx0 = comp.x0 - 1;
    let by0 = comp.y0 - 1;
    let bw = comp.x1 - comp.x0 + 3;
    let bh = comp.y1 - comp.y0 + 3;
    let is_member = |lx: usize, ly: usize| labels[(by0 + ly) * width + bx0 + lx] == comp.label;

    let mut outside = vec![false; bw * bh];
    let mut queue = VecDeque::new();
    for lx in 0..bw {
        for ly in [0, bh - 1] {
            if !outside[ly * bw + lx] {
                outside[ly * bw + lx] = true;
                queue.push_back((lx, ly));
            }
        }
    }
    for ly in 0..bh {
        for lx in [0, bw - 1] {
            if !outside[ly * bw + lx] {
                outside[ly * bw + lx] = true;
                queue.push_back((lx, ly));
            }
        }
    }
    while let Some((lx, ly)) = queue.pop_front() {
        for (nx, ny) in neighbours4(lx, ly, bw, bh) {
            let n = ny * bw + nx;
            if !outside[n] && !is_member(nx, ny) {
                outside[n] = true;
                queue.push_back((nx, ny));
            }
        }
    }

    let mut points = Vec::new();
    for ly in 1..bh - 1 {
        for lx in 1..bw - 1 {
            if is_member(lx, ly)
                && neighbours4(lx, ly, bw, bh).any(|(nx, ny)| outside[ny * bw + nx])
            {
                points.push(Point2::new(
                    (bx0 + lx) as f64 + 0.5,
                    (by0 + ly) as f64 + 0.5,
                ));
            }
        }
    }
    points
}

fn neighbours4(
    x: usize,
    y: usize,
    w: usize,
    h: usize,
) -> impl Iterator<Item = (usize, usize)> {
    let candidates = [
        (x.checked_sub(1), Some(y)),
        (Some(x + 1).filter(|&v| v < w), Some(y)),
        (Some(x), y.checked_sub(1)),
        (Some(x), Some(y + 1).filter(|&v| v < h)),
    ];
    candidates
        .into_iter()
        .filter_map(|(nx, ny)| Some((nx?, ny?)))
}

/// Farthest-point quad fit followed by an edge-distance check.
fn fit_quad(points: &[Point2<f64>], params: &QuadParams) -> Option<[Point2<f64>; 4]> {
    if points.len() < 8 {
        return None;
    }
    let n = points.len() as f64;
    let centroid = Point2::from(points.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n);

    let farthest_from = |q: Point2<f64>| {
        points
            .iter()
            .copied()
            .max_by(|a, b| (a - q).norm_squared().total_cmp(&(b - q).norm_squared()))
    };
    let c0 = farthest_from(centroid)?;
    let c2 = farthest_from(c0)?;

    let axis = c2 - c0;
    let axis_len = axis.norm();
    if axis_len < params.min_side_px {
        return None;
    }
    // signed distance from the c0 -> c2 diagonal
    let side = |p: &Point2<f64>| (axis.x * (p.y - c0.y) - axis.y * (p.x - c0.x)) / axis_len;
    let c1 = points.iter().copied().max_by(|a, b| side(a).total_cmp(&side(b)))?;
    let c3 = points.iter().copied().min_by(|a, b| side(a).total_cmp(&side(b)))?;
    if side(&c1) < 0.5 * params.min_side_px || -side(&c3) < 0.5 * params.min_side_px {
        return None;
    }

    let mut quad = [c0, c1, c2, c3];
    if signed_area2(&quad) < 0.0 {
        quad.swap(1, 3);
    }
    if !is_convex(&quad) {
        return None;
    }

    let sides = side_lengths(&quad);
    if sides.iter().any(|&s| s < params.min_side_px) {
        return None;
    }
    let mean_side = sides.iter().sum::<f64>() / 4.0;
    let tol = (params.edge_tolerance_rate * mean_side).max(params.min_edge_tolerance_px);
    points
        .iter()
        .all(|p| nearest_edge(p, &quad).1 <= tol)
        .then_some(quad)
}

/// Intersect total-least-squares lines through each edge's interior points,
/// shifted half a pixel outward from the pixel centers.
fn refine_corners(
    points: &[Point2<f64>],
    quad: &[Point2<f64>; 4],
    params: &QuadParams,
) -> Option<[Point2<f64>; 4]> {
    let mean_side = side_lengths(quad).iter().sum::<f64>() / 4.0;
    let tol = (params.edge_tolerance_rate * mean_side).max(params.min_edge_tolerance_px);
    let center = Point2::from(quad.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / 4.0);

    let mut edge_points: [Vec<Point2<f64>>; 4] = Default::default();
    for p in points {
        let (edge, dist, t) = nearest_edge(p, quad);
        // skip the corner regions, where two edges blend
        if dist <= tol && (0.1..=0.9).contains(&t) {
            edge_points[edge].push(*p);
        }
    }

    let mut lines = [(Vector2::zeros(), 0.0); 4];
    for (i, pts) in edge_points.iter().enumerate() {
        lines[i] = fit_line(pts, center)?;
    }

    let mut corners = [Point2::origin(); 4];
    for (i, corner) in corners.iter_mut().enumerate() {
        let prev = lines[(i + 3) % 4];
        let next = lines[i];
        *corner = intersect(prev, next)?;
        if (*corner - quad[i]).norm() > 2.0 * tol {
            return None;
        }
    }
    Some(corners)
}

/// Line `n · p = c` with unit normal pointing away from `center`, moved
/// half a pixel along the normal.
fn fit_line(points: &[Point2<f64>], center: Point2<f64>) -> Option<(Vector2<f64>, f64)> {
    if points.len() < 3 {
        return None;
    }
    let n = points.len() as f64;
    let mean = points.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in points {
        let d = p.coords - mean;
        sxx += d.x * d.x;
        sxy += d.x * d.y;
        syy += d.y * d.y;
    }
    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    let mut normal = Vector2::new(-theta.sin(), theta.cos());
    if normal.dot(&(center.coords - mean)) > 0.0 {
        normal = -normal;
    }
    Some((normal, normal.dot(&mean) + 0.5))
}

fn intersect(a: (Vector2<f64>, f64), b: (Vector2<f64>, f64)) -> Option<Point2<f64>> {
    let (n1, c1) = a;
    let (n2, c2) = b;
    let det = n1.x * n2.y - n1.y * n2.x;
    if det.abs() < 1e-6 {
        return None;
    }
    Some(Point2::new(
        (c1 * n2.y - c2 * n1.y) / det,
        (n1.x * c2 - n2.x * c1) / det,
    ))
}

/// `(edge index, distance, position along the edge in [0, 1])` of the edge
/// closest to `p`. Edge `i` runs from corner `i` to corner `i + 1`.
fn nearest_edge(p: &Point2<f64>, quad: &[Point2<f64>; 4]) -> (usize, f64, f64) {
    let mut best = (0, f64::INFINITY, 0.0);
    for i in 0..4 {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        let ab = b - a;
        let t = ((p - a).dot(&ab) / ab.norm_squared()).clamp(0.0, 1.0);
        let d = (p - (a + ab * t)).norm();
        if d < best.1 {
            best = (i, d, t);
        }
    }
    best
}

/// Twice the signed polygon area; positive when clockwise on screen (y down).
pub(crate) fn signed_area2(quad: &[Point2<f64>; 4]) -> f64 {
    (0..4)
        .map(|i| {
            let a = quad[i];
            let b = quad[(i + 1) % 4];
            a.x * b.y - b.x * a.y
        })
        .sum()
}

fn is_convex(quad: &[Point2<f64>; 4]) -> bool {
    (0..4).all(|i| {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        let c = quad[(i + 2) % 4];
        let (ab, bc) = (b - a, c - b);
        ab.x * bc.y - ab.y * bc.x > 0.0
    })
}

fn side_lengths(quad: &[Point2<f64>; 4]) -> [f64; 4] {
    [0, 1, 2, 3].map(|i| (quad[(i + 1) % 4] - quad[i]).norm())
}

fn polygon_perimeter(quad: &[Point2<f64>; 4]) -> f64 {
    side_lengths(quad).iter().sum()
}
