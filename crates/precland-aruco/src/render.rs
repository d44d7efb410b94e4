//! Marker image generation: flat printable markers and markers drawn into
//! an existing image through a perspective quad.

use crate::{Dictionary, DictionaryError};
use nalgebra::Point2;
use precland_core::{homography_from_4pt, GrayImage};

const BLACK: u8 = 0;
const WHITE: u8 = 255;
/// Sub-samples per pixel side when drawing through a homography.
const SUPERSAMPLE: usize = 4;

/// Cell colour at `(cx, cy)` of the `(n + 2)²` grid (one-cell black border).
fn cell_is_black(code: u64, n: usize, cx: usize, cy: usize) -> bool {
    let cells = n + 2;
    if cx == 0 || cy == 0 || cx + 1 == cells || cy + 1 == cells {
        return true;
    }
    (code >> ((cy - 1) * n + (cx - 1))) & 1 == 1
}

/// Render marker `id` with `cell_px` pixels per cell and a white quiet zone
/// of `quiet_zone_cells` cells on every side.
pub fn render_marker(
    dict: &Dictionary,
    id: u32,
    cell_px: usize,
    quiet_zone_cells: usize,
) -> Result<GrayImage, DictionaryError> {
    let code = dict.code(id)?;
    let n = dict.marker_size;
    let cells = n + 2;
    let side = (cells + 2 * quiet_zone_cells) * cell_px;
    let offset = quiet_zone_cells * cell_px;

    let mut img = GrayImage::filled(side, side, WHITE);
    for cy in 0..cells {
        for cx in 0..cells {
            if !cell_is_black(code, n, cx, cy) {
                continue;
            }
            for y in 0..cell_px {
                let row = (offset + cy * cell_px + y) * side;
                let x0 = offset + cx * cell_px;
                img.data[row + x0..row + x0 + cell_px].fill(BLACK);
            }
        }
    }
    Ok(img)
}

/// Draw marker `id` into `img` so that its outer border corners land on
/// `corners` (top-left, top-right, bottom-right, bottom-left, image pixels).
///
/// Edge pixels are anti-aliased by supersampling. Returns `Ok(false)` when
/// the quad is degenerate and nothing was drawn.
pub fn draw_marker(
    img: &mut GrayImage,
    dict: &Dictionary,
    id: u32,
    corners: &[Point2<f64>; 4],
) -> Result<bool, DictionaryError> {
    let code = dict.code(id)?;
    let n = dict.marker_size;
    let cells = (n + 2) as f64;
    let square = [
        Point2::new(0.0, 0.0),
        Point2::new(cells, 0.0),
        Point2::new(cells, cells),
        Point2::new(0.0, cells),
    ];
    let Some(img_to_cells) = homography_from_4pt(corners, &square) else {
        return Ok(false);
    };

    let min_x = corners.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
    let max_x = corners.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
    let min_y = corners.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
    let max_y = corners.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
    let x0 = min_x.floor().max(0.0) as usize;
    let y0 = min_y.floor().max(0.0) as usize;
    let x1 = (max_x.ceil().max(0.0) as usize).min(img.width);
    let y1 = (max_y.ceil().max(0.0) as usize).min(img.height);

    let sub = SUPERSAMPLE as f64;
    for y in y0..y1 {
        for x in x0..x1 {
            let mut covered = 0usize;
            let mut sum = 0usize;
            for sy in 0..SUPERSAMPLE {
                for sx in 0..SUPERSAMPLE {
                    let p = Point2::new(
                        x as f64 + (sx as f64 + 0.5) / sub,
                        y as f64 + (sy as f64 + 0.5) / sub,
                    );
                    let q = img_to_cells.apply(p);
                    if !(0.0..cells).contains(&q.x) || !(0.0..cells).contains(&q.y) {
                        continue;
                    }
                    covered += 1;
                    if !cell_is_black(code, n, q.x as usize, q.y as usize) {
                        sum += WHITE as usize;
                    }
                }
            }
            if covered == 0 {
                continue;
            }
            let total = SUPERSAMPLE * SUPERSAMPLE;
            let idx = y * img.width + x;
            let background = img.data[idx] as usize * (total - covered);
            img.data[idx] = ((background + sum + total / 2) / total) as u8;
        }
    }
    Ok(true)
}
