//! Object-key grammar for the ML folder.
//!
//! Keys look like `<base>/ML/<split>/<label>/<frame_id>.<ext>`, e.g.
//! `tuttle_twins/ML/validate/Rare/TT_S01_E01_FRM-00-00-09-01.jpg`.
//! Parsing is pure and total over that grammar: a well-formed key yields exactly one
//! [`MlObjectKey`], and `Display` reproduces the original string.

use std::fmt;

use thiserror::Error;

use crate::types::{valid_segment, FrameId, FrameIdError, MlKey};

pub const ML_MARKER: &str = "ML";
pub const DEFAULT_ML_ROOT: &str = "tuttle_twins/ML";
pub const DEFAULT_IMAGE_EXT: &str = "jpg";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyDefect {
    #[error("expected 5 '/'-separated segments, found {0}")]
    SegmentCount(usize),
    #[error("second segment must be {ML_MARKER:?}, found {0:?}")]
    MissingMarker(String),
    #[error("empty or invalid path segment {0:?}")]
    BadSegment(String),
    #[error("file name {0:?} has no extension")]
    MissingExtension(String),
    #[error(transparent)]
    Frame(#[from] FrameIdError),
}

/// A listed key that does not match the ML folder grammar.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed key {key:?}: {defect}")]
pub struct MalformedKeyError {
    pub key: String,
    pub defect: KeyDefect,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MlObjectKey {
    pub base: String,
    pub ml_key: MlKey,
    pub frame_id: FrameId,
    pub ext: String,
}

impl MlObjectKey {
    pub fn parse(key: &str) -> Result<Self, MalformedKeyError> {
        let fail = |defect: KeyDefect| MalformedKeyError {
            key: key.to_string(),
            defect,
        };

        let parts: Vec<&str> = key.split('/').collect();
        let [base, marker, split, label, file_name] = parts.as_slice() else {
            return Err(fail(KeyDefect::SegmentCount(parts.len())));
        };
        if *marker != ML_MARKER {
            return Err(fail(KeyDefect::MissingMarker((*marker).to_string())));
        }
        for seg in [base, split, label] {
            if !valid_segment(seg) {
                return Err(fail(KeyDefect::BadSegment((*seg).to_string())));
            }
        }
        let Some((stem, ext)) = file_name.rsplit_once('.') else {
            return Err(fail(KeyDefect::MissingExtension((*file_name).to_string())));
        };
        if ext.is_empty() || !valid_segment(ext) {
            return Err(fail(KeyDefect::MissingExtension((*file_name).to_string())));
        }
        // FrameId::parse trims; reject padding here so Display round-trips.
        if stem.trim() != stem {
            return Err(fail(KeyDefect::BadSegment(stem.to_string())));
        }
        let frame_id = FrameId::parse(stem).map_err(|e| fail(KeyDefect::Frame(e)))?;

        Ok(Self {
            base: (*base).to_string(),
            ml_key: MlKey {
                split: (*split).to_string(),
                label: (*label).to_string(),
            },
            frame_id,
            ext: ext.to_string(),
        })
    }
}

impl fmt::Display for MlObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{ML_MARKER}/{}/{}/{}.{}",
            self.base, self.ml_key.split, self.ml_key.label, self.frame_id, self.ext
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MlLayoutError {
    #[error("ml root {0:?} must have the form <base>/{ML_MARKER}")]
    Root(String),
    #[error("invalid image extension {0:?}")]
    Ext(String),
}

/// Where ML keys live and which extension the images carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MlLayout {
    base: String,
    ext: String,
}

impl Default for MlLayout {
    fn default() -> Self {
        Self {
            base: "tuttle_twins".to_string(),
            ext: DEFAULT_IMAGE_EXT.to_string(),
        }
    }
}

impl MlLayout {
    /// `root` is `<base>/ML`, e.g. `tuttle_twins/ML`.
    pub fn new(root: &str, ext: &str) -> Result<Self, MlLayoutError> {
        let root = root.trim().trim_matches('/');
        let Some((base, marker)) = root.split_once('/') else {
            return Err(MlLayoutError::Root(root.to_string()));
        };
        if marker != ML_MARKER || !valid_segment(base) {
            return Err(MlLayoutError::Root(root.to_string()));
        }
        let ext = ext.trim().trim_start_matches('.');
        if ext.is_empty() || !valid_segment(ext) || ext.contains('.') {
            return Err(MlLayoutError::Ext(ext.to_string()));
        }
        Ok(Self {
            base: base.to_string(),
            ext: ext.to_string(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn ext(&self) -> &str {
        &self.ext
    }

    /// Listing prefix, with trailing slash: `tuttle_twins/ML/`.
    pub fn list_prefix(&self) -> String {
        format!("{}/{ML_MARKER}/", self.base)
    }

    pub fn object_key(&self, ml_key: &MlKey, frame_id: &FrameId) -> MlObjectKey {
        MlObjectKey {
            base: self.base.clone(),
            ml_key: ml_key.clone(),
            frame_id: frame_id.clone(),
            ext: self.ext.clone(),
        }
    }

    pub fn key_string(&self, ml_key: &MlKey, frame_id: &FrameId) -> String {
        self.object_key(ml_key, frame_id).to_string()
    }

    /// File name of a frame inside a split/label folder: `TT_S01_E01_FRM-00-00-08-11.jpg`.
    pub fn file_name(&self, frame_id: &FrameId) -> String {
        format!("{frame_id}.{}", self.ext)
    }
}
