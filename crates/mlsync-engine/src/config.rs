use std::path::{Path, PathBuf};

use mlsync_core::episode::{EpisodeId, EpisodeIdError};
use mlsync_core::key::{MlLayout, MlLayoutError};
use mlsync_core::split::{SplitConfig, SplitConfigError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{what} does not exist: {}", .path.display())]
    MissingPath { what: &'static str, path: PathBuf },
    #[error("subsample rate must be a positive integer")]
    ZeroSubsample,
    #[error("invalid split configuration: {0}")]
    Splits(#[from] SplitConfigError),
    #[error("invalid ml root: {0}")]
    Layout(#[from] MlLayoutError),
    #[error("invalid episode filter: {0}")]
    Episode(#[from] EpisodeIdError),
}

/// Where spreadsheets come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetsConfig {
    /// `<dir>/<spreadsheet_id>.tsv` exports.
    Dir(PathBuf),
    /// Live spreadsheets, optionally through the values API with a key read from a file.
    Http { api_key_file: Option<PathBuf> },
}

/// Everything one invocation needs, resolved once and passed down explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// `s3://[bucket]` or a local directory standing in for the store root.
    pub store_root: String,
    pub bucket: String,
    /// Key prefix holding `*-episodes.json` season files and `.jl` manifests.
    pub manifests_dir: String,
    pub layout: MlLayout,
    pub data_files_dir: PathBuf,
    pub sheets: SheetsConfig,
    pub splits: SplitConfig,
    pub seed: Option<u64>,
    /// Keep `round(rows / subsample)` rows per sheet; 1 keeps everything.
    pub subsample: u32,
    /// Empty means every discovered episode.
    pub episodes: Vec<EpisodeId>,
}

impl SyncConfig {
    /// Checks everything that can be checked before touching the store.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_root.trim().is_empty() {
            return Err(ConfigError::Missing("store root (MLSYNC_STORE_ROOT)"));
        }
        let is_s3 = self.store_root.trim().starts_with("s3://");
        if self.bucket.trim().is_empty() && !is_s3 {
            return Err(ConfigError::Missing("bucket (MLSYNC_BUCKET)"));
        }
        if !is_s3 {
            require_dir("store root", Path::new(self.store_root.trim()))?;
        }
        if self.manifests_dir.trim_matches('/').trim().is_empty() {
            return Err(ConfigError::Missing("manifests dir (MLSYNC_MANIFESTS_DIR)"));
        }
        if self.subsample == 0 {
            return Err(ConfigError::ZeroSubsample);
        }
        match &self.sheets {
            SheetsConfig::Dir(dir) => require_dir("sheets dir", dir)?,
            SheetsConfig::Http {
                api_key_file: Some(path),
            } => {
                if !path.is_file() {
                    return Err(ConfigError::MissingPath {
                        what: "sheets api key file",
                        path: path.clone(),
                    });
                }
            }
            SheetsConfig::Http { api_key_file: None } => {}
        }
        Ok(())
    }

    /// Key prefix for season files and manifests, with trailing slash.
    pub fn manifests_prefix(&self) -> String {
        format!("{}/", self.manifests_dir.trim().trim_matches('/'))
    }

    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

fn require_dir(what: &'static str, path: &Path) -> Result<(), ConfigError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(ConfigError::MissingPath {
            what,
            path: path.to_path_buf(),
        })
    }
}
