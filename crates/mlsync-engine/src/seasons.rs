//! Season files (`<manifests_dir>/S01-episodes.json`) and the episode filter.

use std::collections::BTreeSet;

use mlsync_core::episode::{EpisodeDescriptor, EpisodeDescriptorError, EpisodeId, RawEpisodeDescriptor};
use mlsync_store::{ObjectStore, StoreError};
use thiserror::Error;
use tracing::info;

pub const SEASON_FILE_SUFFIX: &str = "-episodes.json";

#[derive(Debug, Error)]
pub enum SeasonError {
    #[error("list season files under {prefix}: {source}")]
    List {
        prefix: String,
        #[source]
        source: StoreError,
    },
    #[error("read season file {key}: {source}")]
    Read {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("season file {key} is not a json array of episodes: {source}")]
    Parse {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("season file {key}: {source}")]
    Descriptor {
        key: String,
        #[source]
        source: EpisodeDescriptorError,
    },
    #[error("episode {0} appears in more than one season entry")]
    DuplicateEpisode(EpisodeId),
    #[error("no season files found under {0}")]
    NoSeasons(String),
    #[error("episode {0} is not in any season file")]
    UnknownEpisode(EpisodeId),
}

/// Parses one season file body.
pub fn parse_season_file(key: &str, bytes: &[u8]) -> Result<Vec<EpisodeDescriptor>, SeasonError> {
    let raw: Vec<RawEpisodeDescriptor> =
        serde_json::from_slice(bytes).map_err(|source| SeasonError::Parse {
            key: key.to_string(),
            source,
        })?;
    raw.into_iter()
        .map(|r| {
            EpisodeDescriptor::try_from(r).map_err(|source| SeasonError::Descriptor {
                key: key.to_string(),
                source,
            })
        })
        .collect()
}

/// Every episode of every season file, seasons in key order, episodes in file order.
pub fn discover_episodes(
    store: &dyn ObjectStore,
    manifests_prefix: &str,
) -> Result<Vec<EpisodeDescriptor>, SeasonError> {
    let listing = store
        .list(manifests_prefix)
        .map_err(|source| SeasonError::List {
            prefix: manifests_prefix.to_string(),
            source,
        })?;
    let season_keys: Vec<&str> = listing
        .iter()
        .map(|m| m.key.as_str())
        .filter(|k| k.ends_with(SEASON_FILE_SUFFIX))
        .collect();
    if season_keys.is_empty() {
        return Err(SeasonError::NoSeasons(manifests_prefix.to_string()));
    }

    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for key in season_keys {
        let bytes = store.get(key).map_err(|source| SeasonError::Read {
            key: key.to_string(),
            source,
        })?;
        let episodes = parse_season_file(key, &bytes)?;
        info!(
            target: "mlsync_proof",
            event = "season_loaded",
            season_file = key,
            episodes = episodes.len(),
            "season file loaded"
        );
        for ep in episodes {
            if !seen.insert(ep.episode_id.clone()) {
                return Err(SeasonError::DuplicateEpisode(ep.episode_id));
            }
            out.push(ep);
        }
    }
    Ok(out)
}

/// Keeps the named episodes in discovery order; an empty filter keeps everything.
pub fn filter_episodes(
    episodes: Vec<EpisodeDescriptor>,
    wanted: &[EpisodeId],
) -> Result<Vec<EpisodeDescriptor>, SeasonError> {
    if wanted.is_empty() {
        return Ok(episodes);
    }
    for id in wanted {
        if !episodes.iter().any(|e| &e.episode_id == id) {
            return Err(SeasonError::UnknownEpisode(id.clone()));
        }
    }
    Ok(episodes
        .into_iter()
        .filter(|e| wanted.contains(&e.episode_id))
        .collect())
}
