//! Dictionary matching and rotation helpers.

use crate::{Dictionary, DictionaryError};

/// A dictionary match for an observed marker code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Match {
    /// Marker id in the dictionary.
    pub id: u32,
    /// Rotation `0..=3` such that: `observed_code == rotate(dict_code, rotation)`.
    pub rotation: u8,
    /// Hamming distance between observed and dictionary code (after rotation).
    pub hamming: u8,
}

/// Brute-force matcher over all ids and rotations of one dictionary.
#[derive(Clone, Debug)]
pub struct Matcher {
    name: String,
    marker_size: usize,
    max_hamming: u8,
    rotated: Vec<[u64; 4]>,
}

impl Matcher {
    /// Build a matcher for the given dictionary and Hamming threshold.
    pub fn new(dict: &Dictionary, max_hamming: u8) -> Result<Self, DictionaryError> {
        dict.validate()?;
        let n = dict.marker_size;
        let rotated = dict
            .codes
            .iter()
            .map(|&base| [0, 1, 2, 3].map(|rot| rotate_code_u64(base, n, rot)))
            .collect();

        Ok(Self {
            name: dict.name.clone(),
            marker_size: n,
            max_hamming,
            rotated,
        })
    }

    #[inline]
    pub fn dictionary_name(&self) -> &str {
        &self.name
    }

    /// Inner bits per marker side.
    #[inline]
    pub fn marker_size(&self) -> usize {
        self.marker_size
    }

    #[inline]
    pub fn max_hamming(&self) -> u8 {
        self.max_hamming
    }

    /// Find the best match within `max_hamming`. Ties keep the lowest id.
    pub fn match_code(&self, observed: u64) -> Option<Match> {
        let mut best: Option<Match> = None;

        for (id, rots) in self.rotated.iter().enumerate() {
            for (rot, &cand) in rots.iter().enumerate() {
                let h = (observed ^ cand).count_ones() as u8;
                if h > self.max_hamming {
                    continue;
                }
                if best.is_some_and(|prev| prev.hamming <= h) {
                    continue;
                }
                best = Some(Match {
                    id: id as u32,
                    rotation: rot as u8,
                    hamming: h,
                });
                if h == 0 {
                    return best;
                }
            }
        }

        best
    }
}

/// Rotate a code stored in row-major bits: `idx = y * N + x`.
pub fn rotate_code_u64(code: u64, n: usize, rot: u8) -> u64 {
    let rot = rot & 3;
    if rot == 0 {
        return code;
    }

    let mut out = 0u64;
    for y in 0..n {
        for x in 0..n {
            let (sx, sy) = match rot {
                1 => (y, n - 1 - x),
                2 => (n - 1 - x, n - 1 - y),
                _ => (n - 1 - y, x),
            };
            out |= ((code >> (sy * n + sx)) & 1) << (y * n + x);
        }
    }
    out
}
