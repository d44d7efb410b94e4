//! Bit sampling inside a quad.

use crate::threshold::otsu_threshold_from_samples;
use nalgebra::Point2;
use precland_core::{homography_from_4pt, sample_bilinear, GrayImageView, Homography};

#[derive(Clone, Copy, Debug)]
pub(crate) struct MarkerObservation {
    /// Inner bits, row-major, black = 1, in the quad's own orientation.
    pub code: u64,
    /// Fraction of border cells read as black.
    pub border_score: f32,
}

/// Samples the `(bits + 2 * border)²` cell grid of a marker through the
/// homography of its quad. Coordinates of the canonical square are in cells.
pub(crate) struct QuadDecoder {
    cells: usize,
    bits: usize,
    border: usize,
    min_border_score: f32,
    /// Per cell: sub-sample points inside the cell's central area.
    cell_points: Vec<[Point2<f64>; 9]>,
    threshold_points: Vec<Point2<f64>>,
}

impl QuadDecoder {
    pub fn new(bits: usize, border: usize, min_border_score: f32) -> Self {
        let cells = bits + 2 * border;

        let mut cell_points = Vec::with_capacity(cells * cells);
        for cy in 0..cells {
            for cx in 0..cells {
                let mut pts = [Point2::origin(); 9];
                for (k, p) in pts.iter_mut().enumerate() {
                    let ox = 0.25 * ((k % 3) as f64 - 1.0);
                    let oy = 0.25 * ((k / 3) as f64 - 1.0);
                    *p = Point2::new(cx as f64 + 0.5 + ox, cy as f64 + 0.5 + oy);
                }
                cell_points.push(pts);
            }
        }

        Self {
            cells,
            bits,
            border,
            min_border_score,
            cell_points,
            threshold_points: build_threshold_points(cells),
        }
    }

    /// Read the code inside `corners` (clockwise, corner 0 = sampling origin).
    pub fn decode(
        &self,
        img: &GrayImageView<'_>,
        corners: &[Point2<f64>; 4],
    ) -> Option<MarkerObservation> {
        let s = self.cells as f64;
        let square = [
            Point2::new(0.0, 0.0),
            Point2::new(s, 0.0),
            Point2::new(s, s),
            Point2::new(0.0, s),
        ];
        let h = homography_from_4pt(&square, corners)?;

        let samples: Vec<u8> = self
            .cell_points
            .iter()
            .map(|pts| {
                let sum: f64 = pts.iter().map(|p| sample_at(img, &h, *p)).sum();
                (sum / pts.len() as f64).round().clamp(0.0, 255.0) as u8
            })
            .collect();
        let thr_samples: Vec<u8> = self
            .threshold_points
            .iter()
            .map(|p| sample_at(img, &h, *p).round().clamp(0.0, 255.0) as u8)
            .collect();

        decode_samples(
            &samples,
            &thr_samples,
            self.cells,
            self.bits,
            self.border,
            self.min_border_score,
        )
    }
}

/// Image intensity at a canonical-square point; pixel values sit at pixel centers.
#[inline]
fn sample_at(img: &GrayImageView<'_>, h: &Homography, p: Point2<f64>) -> f64 {
    let q = h.apply(p);
    sample_bilinear(img, q.x - 0.5, q.y - 0.5)
}

fn decode_samples(
    samples: &[u8],
    thr_samples: &[u8],
    cells: usize,
    bits: usize,
    border: usize,
    min_border_score: f32,
) -> Option<MarkerObservation> {
    if samples.len() != cells * cells {
        return None;
    }

    let thr = if thr_samples.is_empty() {
        otsu_threshold_from_samples(samples)
    } else {
        otsu_threshold_from_samples(thr_samples)
    };

    let mut border_ok = 0u32;
    let mut border_total = 0u32;
    let mut code: u64 = 0;

    for cy in 0..cells {
        for cx in 0..cells {
            let is_black = samples[cy * cells + cx] < thr;
            let in_border = cx < border || cy < border || cx >= cells - border || cy >= cells - border;
            if in_border {
                border_total += 1;
                border_ok += is_black as u32;
            } else if is_black {
                let idx = (cy - border) * bits + (cx - border);
                code |= 1u64 << idx;
            }
        }
    }

    let border_score = if border_total > 0 {
        border_ok as f32 / border_total as f32
    } else {
        1.0
    };
    (border_score >= min_border_score).then_some(MarkerObservation { code, border_score })
}

fn build_threshold_points(cells: usize) -> Vec<Point2<f64>> {
    const THRESH_SUBDIV: usize = 3;
    let grid = cells * THRESH_SUBDIV;
    let step = cells as f64 / grid as f64;
    let mut points = Vec::with_capacity(grid * grid);
    for ty in 0..grid {
        for tx in 0..grid {
            points.push(Point2::new(
                (tx as f64 + 0.5) * step,
                (ty as f64 + 0.5) * step,
            ));
        }
    }
    points
}
