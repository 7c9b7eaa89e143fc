//! Desired vs observed diff and its application.
//!
//! Every frame in the union of both tables gets exactly one [`Disposition`]. Actions are
//! derived from dispositions plus cleanup of extra placements, and are applied in the
//! order DELETE, MOVE, COPY. Individual storage failures are recorded and never stop the
//! remaining work; the verifier catches what is left for the next run.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use mlsync_core::episode::EpisodeId;
use mlsync_core::key::MlLayout;
use mlsync_core::types::{CanonicalRow, FrameId};
use mlsync_observe::metrics::{OpStats, OpStatsSnapshot, ScopedTimer};
use mlsync_store::{ObjectLocation, ObjectStore, StoreError};
use tracing::{debug, info, warn};

use crate::observed::ObservedState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionKind {
    Delete,
    Move,
    Copy,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Delete => "delete",
            ActionKind::Move => "move",
            ActionKind::Copy => "copy",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a DELETE was planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeleteReason {
    /// The frame is no longer in the desired state.
    Unwanted,
    /// An extra placement of a frame that is kept or moved elsewhere.
    Redundant,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionOp {
    Delete { key: String, reason: DeleteReason },
    /// Copy inside the store's bucket, then delete the source.
    Move { from_key: String, to_key: String },
    /// Copy from the sheet-referenced source asset.
    Copy { source_url: String, to_key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReconciliationAction {
    pub episode_id: EpisodeId,
    pub frame_id: FrameId,
    pub op: ActionOp,
}

impl ReconciliationAction {
    pub fn kind(&self) -> ActionKind {
        match self.op {
            ActionOp::Delete { .. } => ActionKind::Delete,
            ActionOp::Move { .. } => ActionKind::Move,
            ActionOp::Copy { .. } => ActionKind::Copy,
        }
    }

    /// Object key or source URL the action reads from or removes.
    pub fn from_key(&self) -> Option<&str> {
        match &self.op {
            ActionOp::Delete { key, .. } => Some(key),
            ActionOp::Move { from_key, .. } => Some(from_key),
            ActionOp::Copy { source_url, .. } => Some(source_url),
        }
    }

    pub fn to_key(&self) -> Option<&str> {
        match &self.op {
            ActionOp::Delete { .. } => None,
            ActionOp::Move { to_key, .. } | ActionOp::Copy { to_key, .. } => Some(to_key),
        }
    }
}

impl fmt::Display for ReconciliationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.op {
            ActionOp::Delete { key, .. } => write!(f, "delete {key}"),
            ActionOp::Move { from_key, to_key } => write!(f, "move {from_key} -> {to_key}"),
            ActionOp::Copy { source_url, to_key } => write!(f, "copy {source_url} -> {to_key}"),
        }
    }
}

/// What happens to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Disposition {
    Unchanged,
    Delete,
    Move,
    Copy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanCounts {
    pub needed: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub moved: usize,
    pub copied: usize,
    pub redundant: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub episode_id: EpisodeId,
    pub dispositions: BTreeMap<FrameId, Disposition>,
    /// DELETEs first, then MOVEs, then COPYs.
    pub actions: Vec<ReconciliationAction>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions_of(&self, kind: ActionKind) -> impl Iterator<Item = &ReconciliationAction> {
        self.actions.iter().filter(move |a| a.kind() == kind)
    }

    pub fn counts(&self) -> PlanCounts {
        let mut c = PlanCounts::default();
        for d in self.dispositions.values() {
            match d {
                Disposition::Unchanged => c.unchanged += 1,
                Disposition::Delete => c.deleted += 1,
                Disposition::Move => c.moved += 1,
                Disposition::Copy => c.copied += 1,
            }
        }
        c.needed = c.unchanged + c.moved + c.copied;
        c.redundant = self
            .actions
            .iter()
            .filter(|a| {
                matches!(
                    a.op,
                    ActionOp::Delete {
                        reason: DeleteReason::Redundant,
                        ..
                    }
                )
            })
            .count();
        c
    }
}

/// Diffs one episode's desired rows against its observed placements.
///
/// `desired` must hold at most one row per frame.
pub fn plan(
    episode_id: &EpisodeId,
    desired: &[CanonicalRow],
    observed: &ObservedState,
    layout: &MlLayout,
) -> Plan {
    let wanted: BTreeMap<&FrameId, &CanonicalRow> =
        desired.iter().map(|r| (&r.frame_id, r)).collect();

    let mut dispositions = BTreeMap::new();
    let mut deletes = Vec::new();
    let mut moves = Vec::new();
    let mut copies = Vec::new();

    let action = |frame_id: &FrameId, op: ActionOp| ReconciliationAction {
        episode_id: episode_id.clone(),
        frame_id: frame_id.clone(),
        op,
    };

    // Left side: every stored frame.
    for (frame_id, locations) in observed.frames() {
        match wanted.get(frame_id) {
            None => {
                dispositions.insert(frame_id.clone(), Disposition::Delete);
                for loc in locations {
                    deletes.push(action(
                        frame_id,
                        ActionOp::Delete {
                            key: loc.object_key.clone(),
                            reason: DeleteReason::Unwanted,
                        },
                    ));
                }
            }
            Some(row) => {
                let keep = locations
                    .iter()
                    .position(|loc| loc.observed_key == row.desired_key);
                let (disposition, anchor) = match keep {
                    Some(i) => (Disposition::Unchanged, i),
                    // Locations are sorted by ml key, so the first one moves.
                    None => (Disposition::Move, 0),
                };
                dispositions.insert(frame_id.clone(), disposition);
                for (i, loc) in locations.iter().enumerate() {
                    if i != anchor {
                        deletes.push(action(
                            frame_id,
                            ActionOp::Delete {
                                key: loc.object_key.clone(),
                                reason: DeleteReason::Redundant,
                            },
                        ));
                    }
                }
                if disposition == Disposition::Move {
                    if let Some(src) = locations.get(anchor) {
                        moves.push(action(
                            frame_id,
                            ActionOp::Move {
                                from_key: src.object_key.clone(),
                                to_key: layout.key_string(&row.desired_key, frame_id),
                            },
                        ));
                    }
                }
            }
        }
    }

    // Right side: desired frames never stored.
    for row in desired {
        if dispositions.contains_key(&row.frame_id) {
            continue;
        }
        dispositions.insert(row.frame_id.clone(), Disposition::Copy);
        copies.push(action(
            &row.frame_id,
            ActionOp::Copy {
                source_url: row.source_url.clone(),
                to_key: layout.key_string(&row.desired_key, &row.frame_id),
            },
        ));
    }

    let mut actions = deletes;
    actions.extend(moves);
    actions.extend(copies);
    Plan {
        episode_id: episode_id.clone(),
        dispositions,
        actions,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionFailure {
    pub action: ReconciliationAction,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub dry_run: bool,
    pub deletes: OpStatsSnapshot,
    pub moves: OpStatsSnapshot,
    pub copies: OpStatsSnapshot,
    pub failures: Vec<ActionFailure>,
}

impl ApplyReport {
    pub fn stats(&self, kind: ActionKind) -> &OpStatsSnapshot {
        match kind {
            ActionKind::Delete => &self.deletes,
            ActionKind::Move => &self.moves,
            ActionKind::Copy => &self.copies,
        }
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn succeeded(&self) -> u64 {
        self.deletes.succeeded + self.moves.succeeded + self.copies.succeeded
    }
}

/// Resolves a copy source: an object-store URL, or a bare key in the store's own bucket.
pub fn source_location(
    store: &dyn ObjectStore,
    source_url: &str,
) -> Result<ObjectLocation, StoreError> {
    match ObjectLocation::from_url(source_url) {
        Ok(loc) => Ok(loc),
        Err(err) if source_url.contains("://") => Err(err),
        Err(_) => {
            let key = source_url.trim().trim_start_matches('/');
            if mlsync_store::validate_key(key) {
                Ok(store.location(key))
            } else {
                Err(StoreError::UnsupportedLocation(source_url.to_string()))
            }
        }
    }
}

/// Executes a plan against `store`. With `dry_run` nothing is mutated.
pub fn apply(plan: &Plan, store: &dyn ObjectStore, dry_run: bool) -> ApplyReport {
    let mut report = ApplyReport {
        dry_run,
        ..ApplyReport::default()
    };
    if dry_run {
        for a in &plan.actions {
            info!(
                target: "mlsync_proof",
                event = "planned_action",
                episode_id = %plan.episode_id,
                kind = %a.kind(),
                action = %a,
                "dry run"
            );
        }
        return report;
    }

    let episode_id = &plan.episode_id;

    // DELETE batch.
    let delete_stats = OpStats::default();
    let started = Instant::now();
    let deletes: Vec<&ReconciliationAction> = plan.actions_of(ActionKind::Delete).collect();
    if !deletes.is_empty() {
        let keys: Vec<String> = deletes
            .iter()
            .filter_map(|a| a.from_key().map(str::to_string))
            .collect();
        delete_stats.attempted.inc_by(keys.len() as u64);
        let outcomes = {
            let _t = ScopedTimer::new(&delete_stats.latency);
            store.delete_many(&keys)
        };
        for (action, (_, outcome)) in deletes.iter().zip(outcomes) {
            match outcome {
                Ok(()) => delete_stats.succeeded.inc(),
                Err(err) => {
                    delete_stats.failed.inc();
                    record_failure(&mut report, action, err.to_string());
                }
            }
        }
    }
    report.deletes = delete_stats.snapshot(started.elapsed());
    log_throughput(episode_id, ActionKind::Delete, &report.deletes);

    // MOVE batch: copy, then delete the source only when the copy landed.
    let move_stats = OpStats::default();
    let started = Instant::now();
    for action in plan.actions_of(ActionKind::Move) {
        let ActionOp::Move { from_key, to_key } = &action.op else {
            continue;
        };
        move_stats.attempted.inc();
        let _t = ScopedTimer::new(&move_stats.latency);
        let outcome = store
            .copy(&store.location(from_key), to_key)
            .map_err(|e| format!("copy failed: {e}"))
            .and_then(|()| {
                store
                    .delete(from_key)
                    .map_err(|e| format!("copied but source delete failed: {e}"))
            });
        match outcome {
            Ok(()) => move_stats.succeeded.inc(),
            Err(err) => {
                move_stats.failed.inc();
                record_failure(&mut report, action, err);
            }
        }
    }
    report.moves = move_stats.snapshot(started.elapsed());
    log_throughput(episode_id, ActionKind::Move, &report.moves);

    // COPY batch from the original source assets.
    let copy_stats = OpStats::default();
    let started = Instant::now();
    for action in plan.actions_of(ActionKind::Copy) {
        let ActionOp::Copy { source_url, to_key } = &action.op else {
            continue;
        };
        copy_stats.attempted.inc();
        let _t = ScopedTimer::new(&copy_stats.latency);
        let outcome =
            source_location(store, source_url).and_then(|src| store.copy(&src, to_key));
        match outcome {
            Ok(()) => copy_stats.succeeded.inc(),
            Err(err) => {
                copy_stats.failed.inc();
                record_failure(&mut report, action, err.to_string());
            }
        }
    }
    report.copies = copy_stats.snapshot(started.elapsed());
    log_throughput(episode_id, ActionKind::Copy, &report.copies);

    report
}

fn record_failure(report: &mut ApplyReport, action: &ReconciliationAction, error: String) {
    warn!(
        episode_id = %action.episode_id,
        frame_id = %action.frame_id,
        kind = %action.kind(),
        error = %error,
        "storage operation failed"
    );
    report.failures.push(ActionFailure {
        action: action.clone(),
        error,
    });
}

fn log_throughput(episode_id: &EpisodeId, kind: ActionKind, stats: &OpStatsSnapshot) {
    if stats.attempted == 0 {
        return;
    }
    debug!(
        target: "mlsync_metrics",
        episode_id = %episode_id,
        kind = %kind,
        num_files = stats.succeeded,
        failed = stats.failed,
        num_sec = stats.wall.as_secs_f64(),
        files_per_sec = stats.files_per_sec(),
        avg_call_us = stats.latency.avg_ns() / 1_000,
        "storage throughput"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlsync_core::types::MlKey;
    use mlsync_store::ObjectMeta;

    fn ep() -> EpisodeId {
        EpisodeId::parse("S01E01").unwrap()
    }

    fn desired(frame: &str, key: &str) -> CanonicalRow {
        CanonicalRow {
            episode_id: ep(),
            frame_id: FrameId::parse(frame).unwrap(),
            source_url: format!("s3://media/stamps/{frame}.jpg"),
            desired_key: MlKey::parse(key).unwrap(),
        }
    }

    fn observed(keys: &[&str]) -> ObservedState {
        let listing: Vec<ObjectMeta> = keys
            .iter()
            .map(|k| ObjectMeta {
                key: k.to_string(),
                size: 1,
                last_modified_unix_ms: None,
            })
            .collect();
        ObservedState::from_listing(&ep(), &MlLayout::default(), &listing)
    }

    #[test]
    fn relabel_moves_one_file() {
        let p = plan(
            &ep(),
            &[desired("TT_S01_E01_FRM-00-00-08-11", "train/Common")],
            &observed(&["tuttle_twins/ML/validate/Common/TT_S01_E01_FRM-00-00-08-11.jpg"]),
            &MlLayout::default(),
        );
        assert_eq!(p.actions.len(), 1);
        assert_eq!(
            p.actions[0].op,
            ActionOp::Move {
                from_key: "tuttle_twins/ML/validate/Common/TT_S01_E01_FRM-00-00-08-11.jpg"
                    .to_string(),
                to_key: "tuttle_twins/ML/train/Common/TT_S01_E01_FRM-00-00-08-11.jpg".to_string(),
            }
        );
    }

    #[test]
    fn new_frame_is_copied_from_source() {
        let p = plan(
            &ep(),
            &[desired("TT_S01_E01_FRM-00-00-08-11", "train/Common")],
            &observed(&[]),
            &MlLayout::default(),
        );
        assert_eq!(p.actions.len(), 1);
        assert_eq!(p.actions[0].kind(), ActionKind::Copy);
        assert_eq!(
            p.actions[0].from_key(),
            Some("s3://media/stamps/TT_S01_E01_FRM-00-00-08-11.jpg")
        );
        assert_eq!(
            p.actions[0].to_key(),
            Some("tuttle_twins/ML/train/Common/TT_S01_E01_FRM-00-00-08-11.jpg")
        );
    }

    #[test]
    fn removed_frame_is_deleted() {
        let p = plan(
            &ep(),
            &[],
            &observed(&["tuttle_twins/ML/test/Rare/TT_S01_E01_FRM-00-00-08-11.jpg"]),
            &MlLayout::default(),
        );
        assert_eq!(p.actions.len(), 1);
        assert_eq!(
            p.actions[0].op,
            ActionOp::Delete {
                key: "tuttle_twins/ML/test/Rare/TT_S01_E01_FRM-00-00-08-11.jpg".to_string(),
                reason: DeleteReason::Unwanted,
            }
        );
        assert_eq!(p.counts().deleted, 1);
    }

    #[test]
    fn matching_frame_is_unchanged() {
        let p = plan(
            &ep(),
            &[desired("TT_S01_E01_FRM-00-00-08-11", "train/Common")],
            &observed(&["tuttle_twins/ML/train/Common/TT_S01_E01_FRM-00-00-08-11.jpg"]),
            &MlLayout::default(),
        );
        assert!(p.is_empty());
        assert_eq!(p.counts().unchanged, 1);
        assert_eq!(p.counts().needed, 1);
    }

    #[test]
    fn duplicate_placements_keep_the_desired_one() {
        let p = plan(
            &ep(),
            &[desired("TT_S01_E01_FRM-00-00-08-11", "train/Common")],
            &observed(&[
                "tuttle_twins/ML/train/Common/TT_S01_E01_FRM-00-00-08-11.jpg",
                "tuttle_twins/ML/validate/Rare/TT_S01_E01_FRM-00-00-08-11.jpg",
            ]),
            &MlLayout::default(),
        );
        assert_eq!(p.dispositions.len(), 1);
        assert_eq!(p.counts().unchanged, 1);
        assert_eq!(p.counts().redundant, 1);
        assert_eq!(p.actions.len(), 1);
        assert_eq!(
            p.actions[0].from_key(),
            Some("tuttle_twins/ML/validate/Rare/TT_S01_E01_FRM-00-00-08-11.jpg")
        );
    }

    #[test]
    fn duplicate_placements_move_the_first_and_delete_the_rest() {
        let p = plan(
            &ep(),
            &[desired("TT_S01_E01_FRM-00-00-08-11", "train/Common")],
            &observed(&[
                "tuttle_twins/ML/validate/Rare/TT_S01_E01_FRM-00-00-08-11.jpg",
                "tuttle_twins/ML/test/Rare/TT_S01_E01_FRM-00-00-08-11.jpg",
            ]),
            &MlLayout::default(),
        );
        let kinds: Vec<ActionKind> = p.actions.iter().map(|a| a.kind()).collect();
        assert_eq!(kinds, vec![ActionKind::Delete, ActionKind::Move]);
        assert_eq!(
            p.actions[1].from_key(),
            Some("tuttle_twins/ML/test/Rare/TT_S01_E01_FRM-00-00-08-11.jpg")
        );
        assert_eq!(p.counts().moved, 1);
    }

    #[test]
    fn bare_key_sources_resolve_in_store_bucket() -> anyhow::Result<()> {
        let root = std::env::temp_dir().join(format!("mlsync-reconcile-src-{}", std::process::id()));
        let store = mlsync_store::FsObjectStore::new(&root, "media")?;
        let loc = source_location(&store, "tuttle_twins/s01e01/stamps/a.jpg")?;
        assert_eq!(loc, ObjectLocation::new("media", "tuttle_twins/s01e01/stamps/a.jpg"));
        assert!(source_location(&store, "https://example.com/a.jpg").is_err());
        Ok(())
    }
}
