//! Per-episode flow: desired, observed, plan, apply, verify.
//!
//! Episodes run strictly in discovery order. An episode-level error stops that episode
//! only; the run continues with the next one.

use chrono::{DateTime, Utc};
use mlsync_core::episode::{EpisodeDescriptor, EpisodeId};
use mlsync_core::split::split_histogram;
use mlsync_store::ObjectStore;
use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::desired::{desired_from_source, DesiredOptions, DesiredState, DesiredStateError};
use crate::manifest::{manifest_records, write_manifest, ManifestError};
use crate::observed::{build_observed_state, ObservedStateError};
use crate::reconcile::{apply, plan, ApplyReport};
use crate::sheet::SheetSource;
use crate::verify::{verify, Verification};

#[derive(Debug, Error)]
pub enum EpisodeError {
    #[error("desired state: {0}")]
    Desired(#[from] DesiredStateError),
    #[error("observed state: {0}")]
    Observed(#[from] ObservedStateError),
    #[error("manifest: {0}")]
    Manifest(#[from] ManifestError),
}

/// Collaborators shared by every episode of a run.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub store: &'a dyn ObjectStore,
    pub sheets: &'a dyn SheetSource,
    pub config: &'a SyncConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub dry_run: bool,
    pub write_manifest: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeSummary {
    pub episode_id: EpisodeId,
    pub files_needed: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub moved: usize,
    pub copied: usize,
    /// Extra placements of kept or moved frames.
    pub redundant: usize,
    pub failed: usize,
    pub malformed_keys: usize,
    pub missing_label_rows: usize,
    pub invalid_label_rows: usize,
    pub duplicate_rows: usize,
    pub manifest_key: Option<String>,
    pub apply: ApplyReport,
    /// `None` on a dry run.
    pub verification: Option<Verification>,
}

impl EpisodeSummary {
    /// A dry run counts as converged; there was nothing to check.
    pub fn converged(&self) -> bool {
        self.verification.as_ref().map_or(true, Verification::converged)
    }
}

pub fn build_desired<R: Rng + ?Sized>(
    ctx: RunContext<'_>,
    descriptor: &EpisodeDescriptor,
    rng: &mut R,
) -> Result<DesiredState, DesiredStateError> {
    let opts = DesiredOptions {
        splits: &ctx.config.splits,
        subsample: ctx.config.subsample,
    };
    let desired = desired_from_source(
        ctx.sheets,
        &descriptor.episode_id,
        &descriptor.spreadsheet_share_link,
        opts,
        rng,
    )?;
    let histogram = split_histogram(&desired.rows);
    info!(
        target: "mlsync_proof",
        event = "desired_state_built",
        episode_id = %descriptor.episode_id,
        sheet_rows = desired.sheet_rows,
        sampled_rows = desired.sampled_rows,
        rows = desired.len(),
        missing_label_rows = desired.missing_label_rows,
        invalid_label_rows = desired.invalid_label_rows,
        duplicate_rows = desired.duplicate_rows,
        splits = ?histogram,
        "desired state built"
    );
    Ok(desired)
}

pub fn process_episode<R: Rng + ?Sized>(
    ctx: RunContext<'_>,
    descriptor: &EpisodeDescriptor,
    opts: RunOptions,
    rng: &mut R,
    now: DateTime<Utc>,
) -> Result<EpisodeSummary, EpisodeError> {
    let episode_id = &descriptor.episode_id;
    let layout = &ctx.config.layout;
    info!(
        target: "mlsync_proof",
        event = "episode_started",
        episode_id = %episode_id,
        dry_run = opts.dry_run,
        "episode started"
    );

    let desired = build_desired(ctx, descriptor, rng)?;

    let manifest_key = if opts.write_manifest && !opts.dry_run {
        let records = manifest_records(&desired, layout);
        Some(write_manifest(
            ctx.store,
            &ctx.config.manifests_prefix(),
            episode_id,
            &records,
            now,
        )?)
    } else {
        None
    };

    let observed = build_observed_state(ctx.store, layout, episode_id)?;
    let plan = plan(episode_id, &desired.rows, &observed, layout);
    let counts = plan.counts();
    info!(
        target: "mlsync_proof",
        event = "plan_computed",
        episode_id = %episode_id,
        files_needed = counts.needed,
        unchanged = counts.unchanged,
        deleted = counts.deleted,
        moved = counts.moved,
        copied = counts.copied,
        redundant = counts.redundant,
        malformed_keys = observed.malformed_keys,
        "plan computed"
    );

    let report = apply(&plan, ctx.store, opts.dry_run);

    let verification = if opts.dry_run {
        None
    } else {
        let after = build_observed_state(ctx.store, layout, episode_id)?;
        let v = verify(&desired.rows, &after);
        if v.converged() {
            info!(
                target: "mlsync_proof",
                event = "verified",
                episode_id = %episode_id,
                expected = v.expected,
                observed = v.observed,
                "episode converged"
            );
        } else {
            warn!(
                target: "mlsync_proof",
                event = "verify_mismatch",
                episode_id = %episode_id,
                expected = v.expected,
                observed = v.observed,
                missing = v.missing.len(),
                unexpected = v.unexpected.len(),
                misplaced = v.misplaced.len(),
                "episode did not converge"
            );
        }
        Some(v)
    };

    let summary = EpisodeSummary {
        episode_id: episode_id.clone(),
        files_needed: counts.needed,
        unchanged: counts.unchanged,
        deleted: counts.deleted,
        moved: counts.moved,
        copied: counts.copied,
        redundant: counts.redundant,
        failed: report.failed(),
        malformed_keys: observed.malformed_keys,
        missing_label_rows: desired.missing_label_rows,
        invalid_label_rows: desired.invalid_label_rows,
        duplicate_rows: desired.duplicate_rows,
        manifest_key,
        apply: report,
        verification,
    };
    info!(
        target: "mlsync_proof",
        event = "episode_summary",
        episode_id = %episode_id,
        files_needed = summary.files_needed,
        deleted = summary.deleted,
        moved = summary.moved,
        copied = summary.copied,
        unchanged = summary.unchanged,
        failed = summary.failed,
        converged = summary.converged(),
        "episode finished"
    );
    Ok(summary)
}

#[derive(Debug)]
pub struct EpisodeOutcome {
    pub episode_id: EpisodeId,
    pub result: Result<EpisodeSummary, EpisodeError>,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub episodes: Vec<EpisodeOutcome>,
}

impl RunReport {
    pub fn failed(&self) -> impl Iterator<Item = &EpisodeOutcome> {
        self.episodes.iter().filter(|o| o.result.is_err())
    }

    pub fn unconverged(&self) -> impl Iterator<Item = &EpisodeSummary> {
        self.episodes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .filter(|s| !s.converged())
    }

    /// True when every episode ran and converged.
    pub fn all_converged(&self) -> bool {
        self.failed().next().is_none() && self.unconverged().next().is_none()
    }
}

pub fn process_all<R: Rng + ?Sized>(
    ctx: RunContext<'_>,
    episodes: &[EpisodeDescriptor],
    opts: RunOptions,
    rng: &mut R,
) -> RunReport {
    let now = Utc::now();
    let mut report = RunReport::default();
    for descriptor in episodes {
        let result = process_episode(ctx, descriptor, opts, rng, now);
        if let Err(err) = &result {
            warn!(
                target: "mlsync_proof",
                event = "episode_failed",
                episode_id = %descriptor.episode_id,
                error = %err,
                "episode skipped"
            );
        }
        report.episodes.push(EpisodeOutcome {
            episode_id: descriptor.episode_id.clone(),
            result,
        });
    }
    info!(
        target: "mlsync_proof",
        event = "run_finished",
        episodes = report.episodes.len(),
        failed = report.failed().count(),
        unconverged = report.unconverged().count(),
        "run finished"
    );
    report
}

/// Desired state for every episode; episodes whose sheet cannot be used are reported and skipped.
pub fn build_all_desired<R: Rng + ?Sized>(
    ctx: RunContext<'_>,
    episodes: &[EpisodeDescriptor],
    rng: &mut R,
) -> (Vec<DesiredState>, Vec<(EpisodeId, DesiredStateError)>) {
    let mut built = Vec::with_capacity(episodes.len());
    let mut failed = Vec::new();
    for descriptor in episodes {
        match build_desired(ctx, descriptor, rng) {
            Ok(d) => built.push(d),
            Err(err) => {
                warn!(
                    target: "mlsync_proof",
                    event = "episode_failed",
                    episode_id = %descriptor.episode_id,
                    error = %err,
                    "episode skipped"
                );
                failed.push((descriptor.episode_id.clone(), err));
            }
        }
    }
    (built, failed)
}
