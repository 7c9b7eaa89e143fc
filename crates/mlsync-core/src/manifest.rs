use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::episode::EpisodeId;

/// Current manifest record schema.
///
/// - 0: unversioned `{"src_url", "dst_key"}` lines written before versioning existed.
/// - 1: same fields plus an explicit `schema_version`.
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// One line of a `.jl` manifest: where an image comes from and where it belongs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    #[serde(default)]
    pub schema_version: u32,
    pub src_url: String,
    pub dst_key: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManifestRecordError {
    #[error("src_url must be non-empty")]
    EmptySrcUrl,
    #[error("dst_key must be non-empty")]
    EmptyDstKey,
    #[error("unsupported manifest schema_version {0} (max {MANIFEST_SCHEMA_VERSION})")]
    UnsupportedVersion(u32),
    #[error("fields must not contain newlines")]
    Newline,
}

impl ManifestRecord {
    pub fn new(src_url: impl Into<String>, dst_key: impl Into<String>) -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            src_url: src_url.into(),
            dst_key: dst_key.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ManifestRecordError> {
        if self.schema_version > MANIFEST_SCHEMA_VERSION {
            return Err(ManifestRecordError::UnsupportedVersion(self.schema_version));
        }
        if self.src_url.trim().is_empty() {
            return Err(ManifestRecordError::EmptySrcUrl);
        }
        if self.dst_key.trim().is_empty() {
            return Err(ManifestRecordError::EmptyDstKey);
        }
        if self.src_url.contains('\n') || self.dst_key.contains('\n') {
            return Err(ManifestRecordError::Newline);
        }
        Ok(())
    }
}

const NAME_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// `S01E01-manifest-2022-04-28T10:43:48.733843.jl`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManifestName {
    pub created: NaiveDateTime,
    pub episode_id: EpisodeId,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid manifest file name {0:?}; expected S<NN>E<NN>-manifest-<utc-iso>.jl")]
pub struct ManifestNameError(pub String);

impl ManifestName {
    pub fn new(episode_id: EpisodeId, created: DateTime<Utc>) -> Self {
        Self {
            created: created.naive_utc(),
            episode_id,
        }
    }

    /// Accepts a bare file name or a key whose last segment is the file name.
    pub fn parse(input: &str) -> Result<Self, ManifestNameError> {
        let err = || ManifestNameError(input.to_string());
        let file_name = input.rsplit('/').next().unwrap_or(input);
        let stem = file_name.strip_suffix(".jl").ok_or_else(err)?;
        let (id, ts) = stem.split_once("-manifest-").ok_or_else(err)?;
        let episode_id = EpisodeId::parse(id).map_err(|_| err())?;
        let created = NaiveDateTime::parse_from_str(ts, NAME_TIMESTAMP_FORMAT)
            .map_err(|_| err())?;
        Ok(Self {
            created,
            episode_id,
        })
    }

    /// Listing prefix for every manifest of `episode_id`.
    pub fn prefix_for(episode_id: &EpisodeId) -> String {
        format!("{episode_id}-manifest-")
    }
}

impl fmt::Display for ManifestName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-manifest-{}.jl",
            self.episode_id,
            self.created.format(NAME_TIMESTAMP_FORMAT)
        )
    }
}
