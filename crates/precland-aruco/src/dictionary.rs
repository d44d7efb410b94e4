//! Dictionary metadata and packed marker codes.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Dictionary loading and validation errors.
#[derive(thiserror::Error, Debug)]
pub enum DictionaryError {
    #[error("failed to read dictionary: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse dictionary JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("marker_size must be at least 1")]
    ZeroMarkerSize,
    #[error("marker_size {marker_size} implies {bits} bits > 64 (unsupported)")]
    TooManyBits { marker_size: usize, bits: usize },
    #[error("dictionary `{0}` has no codes")]
    Empty(String),
    #[error("code for id {id} ({code:#x}) does not fit in {bits} bits")]
    CodeOutOfRange { id: usize, code: u64, bits: usize },
    #[error("marker id {id} is not in dictionary `{name}` ({len} codes)")]
    UnknownId { id: u32, name: String, len: usize },
}

/// An ArUco-style dictionary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dictionary {
    /// Human-readable name (for logging).
    pub name: String,
    /// Inner bits per marker side.
    pub marker_size: usize,
    /// Maximum error-correcting Hamming distance supported by the dictionary.
    pub max_correction_bits: u8,
    /// One `u64` per marker id, encoding the inner `marker_size × marker_size` bits.
    ///
    /// Bits are stored in row-major order (`idx = y * marker_size + x`) with **black = 1**.
    pub codes: Vec<u64>,
}

impl Dictionary {
    /// Build and validate a dictionary.
    pub fn new(
        name: impl Into<String>,
        marker_size: usize,
        max_correction_bits: u8,
        codes: Vec<u64>,
    ) -> Result<Self, DictionaryError> {
        let dict = Self {
            name: name.into(),
            marker_size,
            max_correction_bits,
            codes,
        };
        dict.validate()?;
        Ok(dict)
    }

    /// Load and validate a dictionary from a JSON file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, DictionaryError> {
        let file = File::open(path)?;
        let dict: Self = serde_json::from_reader(BufReader::new(file))?;
        dict.validate()?;
        Ok(dict)
    }

    /// Total number of inner bits per marker.
    #[inline]
    pub fn bit_count(&self) -> usize {
        self.marker_size * self.marker_size
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Code of marker `id`.
    pub fn code(&self, id: u32) -> Result<u64, DictionaryError> {
        self.codes
            .get(id as usize)
            .copied()
            .ok_or_else(|| DictionaryError::UnknownId {
                id,
                name: self.name.clone(),
                len: self.codes.len(),
            })
    }

    pub fn validate(&self) -> Result<(), DictionaryError> {
        if self.marker_size == 0 {
            return Err(DictionaryError::ZeroMarkerSize);
        }
        let bits = self.bit_count();
        if bits > 64 {
            return Err(DictionaryError::TooManyBits {
                marker_size: self.marker_size,
                bits,
            });
        }
        if self.codes.is_empty() {
            return Err(DictionaryError::Empty(self.name.clone()));
        }
        if bits < 64 {
            if let Some((id, &code)) = self
                .codes
                .iter()
                .enumerate()
                .find(|(_, &c)| c >> bits != 0)
            {
                return Err(DictionaryError::CodeOutOfRange { id, code, bits });
            }
        }
        Ok(())
    }
}
