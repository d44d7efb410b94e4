//! Square fiducial (ArUco-style) marker detection.
//!
//! This crate focuses on:
//! - dictionaries loaded from JSON or embedded ([`builtins`]),
//! - matching observed marker codes against a dictionary,
//! - finding marker quads in a grayscale frame and decoding their bits,
//! - rendering markers for printing and synthetic test scenes.
//!
//! [`ArucoDetector`] implements [`precland_core::MarkerDetector`].

pub mod builtins;
mod decode;
mod detector;
mod dictionary;
mod matcher;
mod quads;
mod render;
mod threshold;

pub use detector::{ArucoDetector, ArucoParams};
pub use dictionary::{Dictionary, DictionaryError};
pub use matcher::{rotate_code_u64, Match, Matcher};
pub use quads::QuadParams;
pub use render::{draw_marker, render_marker};
