use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::episode::EpisodeId;

/// Stable identifier of one extracted frame, e.g. `TT_S01_E02_FRM-00-00-08-11`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FrameId(String);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameIdError {
    #[error("frame id {0:?} does not start with TT_S<NN>_E<NN>_FRM-")]
    BadPrefix(String),
    #[error("frame id {0:?} has an empty frame suffix")]
    EmptySuffix(String),
    #[error("frame id {0:?} contains '/' or whitespace")]
    BadCharacter(String),
}

impl FrameId {
    pub fn parse(input: &str) -> Result<Self, FrameIdError> {
        let s = input.trim();
        if s.chars().any(|c| c == '/' || c.is_whitespace()) {
            return Err(FrameIdError::BadCharacter(s.to_string()));
        }
        // TT_S01_E02_FRM-
        let b = s.as_bytes();
        let prefix_ok = b.len() >= 15
            && &b[0..4] == b"TT_S"
            && b[4].is_ascii_digit()
            && b[5].is_ascii_digit()
            && &b[6..8] == b"_E"
            && b[8].is_ascii_digit()
            && b[9].is_ascii_digit()
            && &b[10..15] == b"_FRM-";
        if !prefix_ok {
            return Err(FrameIdError::BadPrefix(s.to_string()));
        }
        if s.len() == 15 {
            return Err(FrameIdError::EmptySuffix(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Episode embedded in the frame id (`TT_S01_E02_...` -> `S01E02`).
    pub fn episode_id(&self) -> EpisodeId {
        // Grammar was checked in `parse`, so both codes are well formed.
        EpisodeId::from_checked_codes(&self.0[3..6], &self.0[7..10])
    }

    /// The timecode-like suffix after `_FRM-`.
    pub fn suffix(&self) -> &str {
        &self.0[15..]
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FrameId {
    type Error = FrameIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FrameId> for String {
    fn from(value: FrameId) -> Self {
        value.0
    }
}

/// `split/label` placement of a frame inside the ML folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MlKey {
    pub split: String,
    pub label: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MlKeyError {
    #[error("ml key {0:?} must have the form <split>/<label>")]
    Shape(String),
    #[error("ml key segment {0:?} must be non-empty, not `.` or `..`, and free of '/', '\\' and control characters")]
    BadSegment(String),
}

pub(crate) fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s.trim() == s
        && !s.contains(['/', '\\'])
        && !s.chars().any(char::is_control)
}

/// A label must be usable as a single key segment.
pub fn check_label(label: &str) -> Result<(), MlKeyError> {
    if valid_segment(label) {
        Ok(())
    } else {
        Err(MlKeyError::BadSegment(label.to_string()))
    }
}

impl MlKey {
    pub fn new(split: impl Into<String>, label: impl Into<String>) -> Result<Self, MlKeyError> {
        let split = split.into();
        let label = label.into();
        for seg in [&split, &label] {
            if !valid_segment(seg) {
                return Err(MlKeyError::BadSegment(seg.clone()));
            }
        }
        Ok(Self { split, label })
    }

    pub fn parse(input: &str) -> Result<Self, MlKeyError> {
        let Some((split, label)) = input.split_once('/') else {
            return Err(MlKeyError::Shape(input.to_string()));
        };
        Self::new(split, label)
    }
}

impl fmt::Display for MlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.split, self.label)
    }
}

/// Join key shared by the desired and observed tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameKey {
    pub episode_id: EpisodeId,
    pub frame_id: FrameId,
}

/// A normalized spreadsheet row before a split bucket is drawn for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledRow {
    pub episode_id: EpisodeId,
    pub frame_id: FrameId,
    pub source_url: String,
    pub label: String,
}

impl LabeledRow {
    pub fn new(
        episode_id: EpisodeId,
        frame_id: FrameId,
        source_url: String,
        label: impl Into<String>,
    ) -> Result<Self, MlKeyError> {
        let label = label.into();
        check_label(&label)?;
        Ok(Self {
            episode_id,
            frame_id,
            source_url,
            label,
        })
    }
}

/// One image's desired state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRow {
    pub episode_id: EpisodeId,
    pub frame_id: FrameId,
    pub source_url: String,
    pub desired_key: MlKey,
}

impl CanonicalRow {
    pub fn frame_key(&self) -> FrameKey {
        FrameKey {
            episode_id: self.episode_id.clone(),
            frame_id: self.frame_id.clone(),
        }
    }

    pub fn label(&self) -> &str {
        &self.desired_key.label
    }

    pub fn split(&self) -> &str {
        &self.desired_key.split
    }
}

/// One image's actual placement, parsed from a listed object key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedRow {
    pub episode_id: EpisodeId,
    pub frame_id: FrameId,
    pub observed_key: MlKey,
    /// Full object key the row was parsed from.
    pub object_key: String,
    pub size: u64,
    pub last_modified_unix_ms: Option<u64>,
}

impl ObservedRow {
    pub fn frame_key(&self) -> FrameKey {
        FrameKey {
            episode_id: self.episode_id.clone(),
            frame_id: self.frame_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_id_exposes_episode_and_suffix() {
        let f = FrameId::parse("TT_S01_E02_FRM-00-00-08-11").unwrap();
        assert_eq!(f.episode_id().to_string(), "S01E02");
        assert_eq!(f.suffix(), "00-00-08-11");
    }

    #[test]
    fn frame_id_rejects_bad_shapes() {
        assert!(matches!(
            FrameId::parse("TT_S01_E02_FRM-"),
            Err(FrameIdError::EmptySuffix(_))
        ));
        assert!(matches!(
            FrameId::parse("TT_S1_E02_FRM-00"),
            Err(FrameIdError::BadPrefix(_))
        ));
        assert!(matches!(
            FrameId::parse("TT_S01_E02_FRM-00/01"),
            Err(FrameIdError::BadCharacter(_))
        ));
    }

    #[test]
    fn ml_key_display_and_parse() {
        let k = MlKey::parse("train/Common").unwrap();
        assert_eq!(k.split, "train");
        assert_eq!(k.label, "Common");
        assert_eq!(k.to_string(), "train/Common");
        assert!(MlKey::parse("train").is_err());
        assert!(MlKey::parse("train/Com/mon").is_err());
        assert!(MlKey::new("", "Common").is_err());
        assert!(MlKey::new("train", "N/A").is_err());
        assert!(MlKey::new("train", "..").is_err());
        assert!(MlKey::new("train", "a\\b").is_err());
        assert!(check_label("Not Sure").is_ok());
    }
}
