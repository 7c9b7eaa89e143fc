use std::collections::BTreeMap;

use mlsync_core::episode::EpisodeId;
use mlsync_core::key::{MlLayout, MlObjectKey};
use mlsync_core::types::{FrameId, ObservedRow};
use mlsync_store::{ObjectMeta, ObjectStore, StoreError};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ObservedStateError {
    #[error("list {prefix}: {source}")]
    List {
        prefix: String,
        #[source]
        source: StoreError,
    },
}

/// One episode's current placement in the ML folder.
///
/// A frame normally has one location; more than one means an earlier run copied
/// without finishing the delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedState {
    pub episode_id: EpisodeId,
    frames: BTreeMap<FrameId, Vec<ObservedRow>>,
    /// Keys naming this episode's frames that do not parse under the layout.
    pub malformed_keys: usize,
}

impl ObservedState {
    /// Pure part of the builder: filters a listing down to `episode_id` and parses it.
    pub fn from_listing(
        episode_id: &EpisodeId,
        layout: &MlLayout,
        listing: &[ObjectMeta],
    ) -> Self {
        let frame_code = episode_id.frame_code();
        let mut frames: BTreeMap<FrameId, Vec<ObservedRow>> = BTreeMap::new();
        let mut malformed_keys = 0usize;

        for meta in listing {
            let file_name = meta.key.rsplit('/').next().unwrap_or(&meta.key);
            if !file_name.starts_with(&frame_code) {
                continue;
            }
            let parsed = match MlObjectKey::parse(&meta.key) {
                Ok(p) if p.base == layout.base() && p.ext == layout.ext() => p,
                Ok(_) => {
                    debug!(key = %meta.key, "key outside the ml layout; excluded");
                    malformed_keys += 1;
                    continue;
                }
                Err(err) => {
                    debug!(error = %err, "malformed ml key; excluded");
                    malformed_keys += 1;
                    continue;
                }
            };
            let row = ObservedRow {
                episode_id: parsed.frame_id.episode_id(),
                frame_id: parsed.frame_id.clone(),
                observed_key: parsed.ml_key,
                object_key: meta.key.clone(),
                size: meta.size,
                last_modified_unix_ms: meta.last_modified_unix_ms,
            };
            frames.entry(parsed.frame_id).or_default().push(row);
        }
        for locations in frames.values_mut() {
            locations.sort_by(|a, b| a.observed_key.cmp(&b.observed_key));
        }
        if malformed_keys > 0 {
            warn!(episode_id = %episode_id, malformed_keys, "malformed keys excluded from observed state");
        }

        Self {
            episode_id: episode_id.clone(),
            frames,
            malformed_keys,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Total placements, counting every location of a duplicated frame.
    pub fn len(&self) -> usize {
        self.frames.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Locations of `frame_id`, ordered by `split/label`.
    pub fn locations(&self, frame_id: &FrameId) -> &[ObservedRow] {
        self.frames.get(frame_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn frames(&self) -> impl Iterator<Item = (&FrameId, &[ObservedRow])> {
        self.frames.iter().map(|(f, rows)| (f, rows.as_slice()))
    }

    pub fn rows(&self) -> impl Iterator<Item = &ObservedRow> {
        self.frames.values().flatten()
    }
}

/// Lists the ML folder and keeps this episode's well-formed placements.
///
/// No keys is a valid state: the episode was never synced.
pub fn build_observed_state(
    store: &dyn ObjectStore,
    layout: &MlLayout,
    episode_id: &EpisodeId,
) -> Result<ObservedState, ObservedStateError> {
    let prefix = layout.list_prefix();
    let listing = store
        .list(&prefix)
        .map_err(|source| ObservedStateError::List {
            prefix: prefix.clone(),
            source,
        })?;
    let state = ObservedState::from_listing(episode_id, layout, &listing);
    debug!(
        episode_id = %episode_id,
        listed = listing.len(),
        frames = state.frame_count(),
        placements = state.len(),
        "observed state built"
    );
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(key: &str) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            size: 10,
            last_modified_unix_ms: Some(1),
        }
    }

    #[test]
    fn groups_locations_per_frame() {
        let listing = vec![
            meta("tuttle_twins/ML/validate/Common/TT_S01_E01_FRM-00-00-08-11.jpg"),
            meta("tuttle_twins/ML/train/Common/TT_S01_E01_FRM-00-00-08-11.jpg"),
            meta("tuttle_twins/ML/train/Rare/TT_S01_E01_FRM-00-00-08-12.jpg"),
            meta("tuttle_twins/ML/train/Rare/TT_S01_E02_FRM-00-00-08-12.jpg"),
        ];
        let ep = EpisodeId::parse("S01E01").unwrap();
        let state = ObservedState::from_listing(&ep, &MlLayout::default(), &listing);
        assert_eq!(state.frame_count(), 2);
        assert_eq!(state.len(), 3);
        assert_eq!(state.malformed_keys, 0);

        let f = FrameId::parse("TT_S01_E01_FRM-00-00-08-11").unwrap();
        let locs = state.locations(&f);
        assert_eq!(locs.len(), 2);
        assert_eq!(locs[0].observed_key.to_string(), "train/Common");
        assert_eq!(locs[1].observed_key.to_string(), "validate/Common");
        assert!(state.rows().all(|r| r.episode_id == ep));
    }

    #[test]
    fn counts_malformed_keys_for_the_episode_only() {
        let listing = vec![
            meta("tuttle_twins/ML/train/TT_S01_E01_FRM-00-00-08-11.jpg"),
            meta("tuttle_twins/ML/train/Rare/TT_S01_E01_FRM-00-00-08-12.png"),
            meta("tuttle_twins/ML/train/Rare/notes.txt"),
            meta("tuttle_twins/ML/train/Rare/TT_S01_E01_FRM-00-00-08-13.jpg"),
        ];
        let ep = EpisodeId::parse("S01E01").unwrap();
        let state = ObservedState::from_listing(&ep, &MlLayout::default(), &listing);
        assert_eq!(state.frame_count(), 1);
        assert_eq!(state.malformed_keys, 2);
    }

    #[test]
    fn empty_listing_is_empty_state() {
        let ep = EpisodeId::parse("S01E01").unwrap();
        let state = ObservedState::from_listing(&ep, &MlLayout::default(), &[]);
        assert!(state.is_empty());
        assert_eq!(state.len(), 0);
    }
}
