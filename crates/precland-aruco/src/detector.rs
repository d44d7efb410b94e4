use crate::decode::QuadDecoder;
use crate::quads::{find_quad_candidates, QuadParams};
use crate::threshold::adaptive_dark_mask;
use crate::{Dictionary, DictionaryError, Matcher};
use log::debug;
use precland_core::{DetectedMarker, GrayImageView, MarkerDetector};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Configuration for [`ArucoDetector`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ArucoParams {
    /// Side of the local-mean window used for adaptive thresholding, pixels.
    pub threshold_window: usize,
    /// A pixel is dark when it is this much below its local mean.
    pub threshold_offset: i32,
    /// Candidate quad filtering.
    pub quads: QuadParams,
    /// Marker border width in cells.
    pub border_bits: usize,
    /// Require border-black ratio >= this.
    pub min_border_score: f32,
    /// Maximum Hamming distance for matching; `None` uses the dictionary's
    /// own correction capacity.
    pub max_hamming: Option<u8>,
}

impl Default for ArucoParams {
    fn default() -> Self {
        Self {
            threshold_window: 31,
            threshold_offset: 7,
            quads: QuadParams::default(),
            border_bits: 1,
            min_border_score: 0.85,
            max_hamming: None,
        }
    }
}

/// Square fiducial detector for one dictionary.
#[derive(Clone, Debug)]
pub struct ArucoDetector {
    params: ArucoParams,
    matcher: Matcher,
    decoder_bits: usize,
}

struct Decoded {
    marker: DetectedMarker,
    perimeter: f64,
}

impl ArucoDetector {
    pub fn new(dictionary: &Dictionary, params: ArucoParams) -> Result<Self, DictionaryError> {
        let max_hamming = params
            .max_hamming
            .unwrap_or(dictionary.max_correction_bits);
        let matcher = Matcher::new(dictionary, max_hamming)?;
        Ok(Self {
            decoder_bits: dictionary.marker_size,
            params,
            matcher,
        })
    }

    #[inline]
    pub fn params(&self) -> &ArucoParams {
        &self.params
    }

    #[inline]
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }
}

impl MarkerDetector for ArucoDetector {
    /// Markers in raster order of their outlines, corners in the marker's
    /// own top-left, top-right, bottom-right, bottom-left order.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, image), fields(w = image.width, h = image.height))
    )]
    fn detect(&self, image: &GrayImageView<'_>) -> Vec<DetectedMarker> {
        if image.width < 3 || image.height < 3 || image.data.len() < image.width * image.height {
            return Vec::new();
        }

        let mask = adaptive_dark_mask(
            image,
            self.params.threshold_window,
            self.params.threshold_offset,
        );
        let candidates = find_quad_candidates(&mask, &self.params.quads);
        let decoder = QuadDecoder::new(
            self.decoder_bits,
            self.params.border_bits,
            self.params.min_border_score,
        );

        let mut decoded: Vec<Decoded> = Vec::new();
        for cand in &candidates {
            let Some(obs) = decoder.decode(image, &cand.corners) else {
                continue;
            };
            let Some(m) = self.matcher.match_code(obs.code) else {
                continue;
            };
            // observed == rotate(dict, r): the marker's top-left sits at quad corner r
            let mut corners = cand.corners;
            corners.rotate_left(m.rotation as usize);
            let marker = DetectedMarker { id: m.id, corners };

            if let Some(prev) = decoded
                .iter_mut()
                .find(|d| same_marker(&d.marker, &marker, d.perimeter.min(cand.perimeter)))
            {
                if cand.perimeter > prev.perimeter {
                    prev.marker = marker;
                    prev.perimeter = cand.perimeter;
                }
                continue;
            }
            decoded.push(Decoded {
                marker,
                perimeter: cand.perimeter,
            });
        }

        debug!(
            "{} quad candidates, {} markers decoded ({})",
            candidates.len(),
            decoded.len(),
            self.matcher.dictionary_name()
        );
        decoded.into_iter().map(|d| d.marker).collect()
    }
}

/// Two decodes of the same physical marker: same id, centers within an
/// eighth of the side.
fn same_marker(a: &DetectedMarker, b: &DetectedMarker, perimeter: f64) -> bool {
    if a.id != b.id {
        return false;
    }
    let center = |m: &DetectedMarker| m.corners.iter().map(|p| p.coords).sum::<nalgebra::Vector2<f64>>() / 4.0;
    (center(a) - center(b)).norm() < perimeter / 32.0
}
