//! `.jl` snapshots of an episode's desired state and the diff between two of them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mlsync_core::episode::EpisodeId;
use mlsync_core::key::MlLayout;
use mlsync_core::manifest::{ManifestName, ManifestRecord, ManifestRecordError};
use mlsync_store::{ObjectStore, StoreError};
use thiserror::Error;
use tracing::{debug, info};

use crate::desired::DesiredState;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest store error: {0}")]
    Store(#[from] StoreError),
    #[error("manifest {key} line {line}: {message}")]
    Parse {
        key: String,
        line: usize,
        message: String,
    },
    #[error("manifest record invalid: {0}")]
    Record(#[from] ManifestRecordError),
    #[error("manifest encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("no manifests found for {0}")]
    NoManifests(EpisodeId),
}

/// `src_url -> dst_key` record per desired frame, in desired-state order.
pub fn manifest_records(desired: &DesiredState, layout: &MlLayout) -> Vec<ManifestRecord> {
    desired
        .rows
        .iter()
        .map(|r| {
            ManifestRecord::new(
                r.source_url.clone(),
                layout.key_string(&r.desired_key, &r.frame_id),
            )
        })
        .collect()
}

pub fn encode_manifest(records: &[ManifestRecord]) -> Result<Vec<u8>, ManifestError> {
    let mut out = Vec::new();
    for r in records {
        r.validate()?;
        serde_json::to_writer(&mut out, r)?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Parses a manifest body; blank lines are skipped.
pub fn parse_manifest(key: &str, bytes: &[u8]) -> Result<Vec<ManifestRecord>, ManifestError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ManifestError::Parse {
        key: key.to_string(),
        line: 0,
        message: "not valid utf-8".to_string(),
    })?;
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let parse_err = |message: String| ManifestError::Parse {
            key: key.to_string(),
            line: line_no,
            message,
        };
        let record: ManifestRecord =
            serde_json::from_str(line).map_err(|e| parse_err(e.to_string()))?;
        record.validate().map_err(|e| parse_err(e.to_string()))?;
        out.push(record);
    }
    Ok(out)
}

/// Writes `<prefix><episode>-manifest-<utc>.jl` and returns its key.
pub fn write_manifest(
    store: &dyn ObjectStore,
    manifests_prefix: &str,
    episode_id: &EpisodeId,
    records: &[ManifestRecord],
    now: DateTime<Utc>,
) -> Result<String, ManifestError> {
    let name = ManifestName::new(episode_id.clone(), now);
    let key = format!("{manifests_prefix}{name}");
    let bytes = encode_manifest(records)?;
    store.put(&key, &bytes)?;
    info!(
        target: "mlsync_proof",
        event = "manifest_written",
        episode_id = %episode_id,
        manifest_key = %key,
        records = records.len(),
        "manifest written"
    );
    Ok(key)
}

/// Every manifest of `episode_id`, oldest first.
pub fn list_manifests(
    store: &dyn ObjectStore,
    manifests_prefix: &str,
    episode_id: &EpisodeId,
) -> Result<Vec<(ManifestName, String)>, ManifestError> {
    let prefix = format!("{manifests_prefix}{}", ManifestName::prefix_for(episode_id));
    let mut out: Vec<(ManifestName, String)> = store
        .list(&prefix)?
        .into_iter()
        .filter_map(|m| match ManifestName::parse(&m.key) {
            Ok(name) if &name.episode_id == episode_id => Some((name, m.key)),
            Ok(_) => None,
            Err(err) => {
                debug!(error = %err, "skipping non-manifest key");
                None
            }
        })
        .collect();
    out.sort();
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestManifests {
    pub latest: (ManifestName, String),
    pub previous: Option<(ManifestName, String)>,
}

/// Latest and previous manifests by embedded timestamp, or `None` when there are none.
pub fn find_latest_manifests(
    store: &dyn ObjectStore,
    manifests_prefix: &str,
    episode_id: &EpisodeId,
) -> Result<Option<LatestManifests>, ManifestError> {
    let mut all = list_manifests(store, manifests_prefix, episode_id)?;
    let Some(latest) = all.pop() else {
        return Ok(None);
    };
    Ok(Some(LatestManifests {
        latest,
        previous: all.pop(),
    }))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub src_url: String,
    pub from_key: String,
    pub to_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDiff {
    pub added: Vec<ManifestRecord>,
    pub removed: Vec<ManifestRecord>,
    pub relocated: Vec<Relocation>,
}

impl ManifestDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.relocated.is_empty()
    }
}

/// Records are matched on `src_url`; output is ordered by `src_url`.
pub fn diff_manifests(previous: &[ManifestRecord], latest: &[ManifestRecord]) -> ManifestDiff {
    let prev: BTreeMap<&str, &ManifestRecord> =
        previous.iter().map(|r| (r.src_url.as_str(), r)).collect();
    let last: BTreeMap<&str, &ManifestRecord> =
        latest.iter().map(|r| (r.src_url.as_str(), r)).collect();

    let mut diff = ManifestDiff::default();
    for (src, rec) in &last {
        match prev.get(src) {
            None => diff.added.push((*rec).clone()),
            Some(old) if old.dst_key != rec.dst_key => diff.relocated.push(Relocation {
                src_url: src.to_string(),
                from_key: old.dst_key.clone(),
                to_key: rec.dst_key.clone(),
            }),
            Some(_) => {}
        }
    }
    for (src, rec) in &prev {
        if !last.contains_key(src) {
            diff.removed.push((*rec).clone());
        }
    }
    diff
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestChanges {
    pub latest_key: String,
    /// `None` when only one manifest exists; the diff is then against an empty manifest.
    pub previous_key: Option<String>,
    pub diff: ManifestDiff,
}

pub fn manifest_changes(
    store: &dyn ObjectStore,
    manifests_prefix: &str,
    episode_id: &EpisodeId,
) -> Result<ManifestChanges, ManifestError> {
    let found = find_latest_manifests(store, manifests_prefix, episode_id)?
        .ok_or_else(|| ManifestError::NoManifests(episode_id.clone()))?;
    let (_, latest_key) = found.latest;
    let latest = parse_manifest(&latest_key, &store.get(&latest_key)?)?;
    let (previous_key, previous) = match found.previous {
        Some((_, key)) => {
            let records = parse_manifest(&key, &store.get(&key)?)?;
            (Some(key), records)
        }
        None => (None, Vec::new()),
    };
    Ok(ManifestChanges {
        diff: diff_manifests(&previous, &latest),
        latest_key,
        previous_key,
    })
}
