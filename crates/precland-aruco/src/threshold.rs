//! Global (Otsu) and local (mean-window) thresholding.

use precland_core::GrayImageView;

/// Otsu threshold over a set of sample intensities; values `< t` are dark.
pub(crate) fn otsu_threshold_from_samples(samples: &[u8]) -> u8 {
    let Some((&min_v, &max_v)) = samples.iter().min().zip(samples.iter().max()) else {
        return 127;
    };
    if min_v == max_v {
        return min_v;
    }

    let mut hist = [0u32; 256];
    for &v in samples {
        hist[v as usize] += 1;
    }
    if hist.iter().filter(|&&h| h > 0).count() <= 2 {
        return ((min_v as u16 + max_v as u16).div_ceil(2)) as u8;
    }

    let total = samples.len() as f64;
    let sum_total: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &h)| i as f64 * h as f64)
        .sum();

    let mut sum_b = 0f64;
    let mut w_b = 0f64;
    let mut best_var = -1f64;
    let mut best_t = 127u8;

    for (t, &h) in hist.iter().enumerate() {
        w_b += h as f64;
        sum_b += t as f64 * h as f64;
        if w_b < 1.0 {
            continue;
        }
        let w_f = total - w_b;
        if w_f < 1.0 {
            break;
        }

        let m_b = sum_b / w_b;
        let m_f = (sum_total - sum_b) / w_f;
        let var_between = w_b * w_f * (m_b - m_f) * (m_b - m_f);
        if var_between > best_var {
            best_var = var_between;
            // classes are [0, t] and [t + 1, 255]
            best_t = (t + 1).min(255) as u8;
        }
    }

    best_t
}

/// Binary image where `1` marks pixels darker than their neighbourhood.
#[derive(Clone, Debug)]
pub(crate) struct DarkMask {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl DarkMask {
    #[inline]
    pub fn is_dark(&self, x: usize, y: usize) -> bool {
        self.data[y * self.width + x] != 0
    }
}

/// Mark pixels with `v < mean(window) - offset` as dark.
///
/// The window is a `window × window` box clipped at the image border; the
/// mean comes from an integral image so the cost is independent of `window`.
pub(crate) fn adaptive_dark_mask(img: &GrayImageView<'_>, window: usize, offset: i32) -> DarkMask {
    let (w, h) = (img.width, img.height);
    let half = window.max(3) / 2;
    let iw = w + 1;

    let mut integral = vec![0u64; iw * (h + 1)];
    for y in 0..h {
        let mut row = 0u64;
        for x in 0..w {
            row += img.data[y * w + x] as u64;
            integral[(y + 1) * iw + x + 1] = integral[y * iw + x + 1] + row;
        }
    }

    let mut data = vec![0u8; w * h];
    for y in 0..h {
        let y0 = y.saturating_sub(half);
        let y1 = (y + half + 1).min(h);
        for x in 0..w {
            let x0 = x.saturating_sub(half);
            let x1 = (x + half + 1).min(w);
            let area = ((x1 - x0) * (y1 - y0)) as i64;
            let sum = (integral[y1 * iw + x1] + integral[y0 * iw + x0]) as i64
                - (integral[y0 * iw + x1] + integral[y1 * iw + x0]) as i64;
            let v = img.data[y * w + x] as i64;
            // v < sum / area - offset, kept in integers
            if v * area < sum - offset as i64 * area {
                data[y * w + x] = 1;
            }
        }
    }

    DarkMask {
        width: w,
        height: h,
        data,
    }
}
