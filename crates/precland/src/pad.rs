//! Landing pad layout: marker side lengths, the payload marker, the dictionary.

use log::warn;
use precland_aruco::builtins::{builtin_dictionary, DICT_4X4_50};
use precland_aruco::{Dictionary, DictionaryError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(thiserror::Error, Debug)]
pub enum PadGeometryError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("marker key `{0}` is not a non-negative integer id")]
    InvalidMarkerId(String),
    #[error("marker id {0} is listed more than once")]
    DuplicateMarkerId(u32),
    #[error("marker {0} has no side length")]
    MissingSideLength(u32),
    #[error("marker {id} side length must be positive and finite (got {value})")]
    InvalidSideLength { id: u32, value: f64 },
    #[error("pad lists no markers")]
    Empty,
    #[error("no builtin dictionary named `{0}`")]
    UnknownBuiltinDictionary(String),
    #[error("marker dictionary: {0}")]
    Dictionary(#[from] DictionaryError),
}

/// Unit of every length in a pad file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
    #[default]
    #[serde(alias = "mm")]
    Millimeters,
    #[serde(alias = "m")]
    Meters,
}

impl LengthUnit {
    #[inline]
    pub fn meters_per_unit(self) -> f64 {
        match self {
            LengthUnit::Millimeters => 1e-3,
            LengthUnit::Meters => 1.0,
        }
    }
}

/// Pad file as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PadFile {
    /// Marker id (decimal string) -> `[side_length, ...]`. Extra entries are
    /// reserved for placement data and ignored.
    pub markers: BTreeMap<String, Vec<f64>>,
    pub payload_id: u32,
    #[serde(default)]
    pub units: LengthUnit,
    /// Builtin dictionary name or JSON path relative to the pad file.
    #[serde(default)]
    pub dictionary: Option<String>,
}

impl PadFile {
    /// Load a JSON pad file from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, PadGeometryError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this pad file to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), PadGeometryError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn build_geometry(&self) -> Result<PadGeometry, PadGeometryError> {
        let mut sides = BTreeMap::new();
        for (key, values) in &self.markers {
            let id: u32 = key
                .trim()
                .parse()
                .map_err(|_| PadGeometryError::InvalidMarkerId(key.clone()))?;
            let side = *values
                .first()
                .ok_or(PadGeometryError::MissingSideLength(id))?;
            if sides.insert(id, side).is_some() {
                return Err(PadGeometryError::DuplicateMarkerId(id));
            }
        }
        PadGeometry::new(sides, self.payload_id, self.units)
    }

    pub fn dictionary_source(&self, base_dir: &Path) -> DictionarySource {
        match self.dictionary.as_deref() {
            None => DictionarySource::Builtin(DICT_4X4_50.to_string()),
            Some(name) if builtin_dictionary(name).is_some() => {
                DictionarySource::Builtin(name.to_string())
            }
            Some(path) => DictionarySource::File(base_dir.join(path)),
        }
    }
}

/// Marker id -> side length, plus the payload id. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct PadGeometry {
    sides: BTreeMap<u32, f64>,
    payload_id: u32,
    unit: LengthUnit,
}

impl PadGeometry {
    /// A payload id without a side length is accepted (with a warning): the
    /// aggregator then never reports, which is the safe outcome.
    pub fn new(
        sides: impl IntoIterator<Item = (u32, f64)>,
        payload_id: u32,
        unit: LengthUnit,
    ) -> Result<Self, PadGeometryError> {
        let mut map = BTreeMap::new();
        for (id, value) in sides {
            if !(value.is_finite() && value > 0.0) {
                return Err(PadGeometryError::InvalidSideLength { id, value });
            }
            if map.insert(id, value).is_some() {
                return Err(PadGeometryError::DuplicateMarkerId(id));
            }
        }
        if map.is_empty() {
            return Err(PadGeometryError::Empty);
        }
        if !map.contains_key(&payload_id) {
            warn!("payload marker {payload_id} has no pad geometry entry; no position will be reported");
        }
        Ok(Self {
            sides: map,
            payload_id,
            unit,
        })
    }

    /// Side length in pad units.
    #[inline]
    pub fn side_length(&self, id: u32) -> Option<f64> {
        self.sides.get(&id).copied()
    }

    #[inline]
    pub fn contains(&self, id: u32) -> bool {
        self.sides.contains_key(&id)
    }

    #[inline]
    pub fn payload_id(&self) -> u32 {
        self.payload_id
    }

    #[inline]
    pub fn unit(&self) -> LengthUnit {
        self.unit
    }

    pub fn len(&self) -> usize {
        self.sides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sides.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.sides.keys().copied()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DictionarySource {
    Builtin(String),
    File(PathBuf),
}

impl DictionarySource {
    pub fn load(&self) -> Result<Dictionary, PadGeometryError> {
        match self {
            DictionarySource::Builtin(name) => builtin_dictionary(name)
                .ok_or_else(|| PadGeometryError::UnknownBuiltinDictionary(name.clone())),
            DictionarySource::File(path) => Ok(Dictionary::load_json(path)?),
        }
    }
}

/// Validated pad geometry plus its marker dictionary.
#[derive(Clone, Debug)]
pub struct PadConfig {
    pub geometry: PadGeometry,
    pub dictionary: Dictionary,
}

impl PadConfig {
    /// Load a pad file and the dictionary it names.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PadGeometryError> {
        let path = path.as_ref();
        let file = PadFile::load_json(path)?;
        let geometry = file.build_geometry()?;
        let source = file.dictionary_source(path.parent().unwrap_or(Path::new(".")));
        Ok(Self {
            geometry,
            dictionary: source.load()?,
        })
    }
}
