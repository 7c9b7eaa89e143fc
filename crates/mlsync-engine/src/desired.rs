use std::collections::BTreeSet;

use mlsync_core::episode::EpisodeId;
use mlsync_core::split::{assign_splits, SplitConfig};
use mlsync_core::types::{CanonicalRow, FrameId};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

use crate::normalize::{normalize_row, validate_frame, NormalizeError, RowContext, SheetColumns};
use crate::sheet::{SheetError, SheetSource, SheetTable};

#[derive(Debug, Error)]
pub enum DesiredStateError {
    #[error("sheet for {0} has no rows")]
    EmptySheet(EpisodeId),
    #[error("base url {base_url:?} does not mention {expected}; the sheet is linked to the wrong episode")]
    BaseUrlMismatch { base_url: String, expected: String },
    #[error(transparent)]
    Columns(NormalizeError),
    #[error("{count} rows have FRAME NUMBER values that don't contain {frame_code}")]
    RowValidation { count: usize, frame_code: String },
    #[error("sheet error: {0}")]
    Sheet(#[from] SheetError),
}

/// One episode's desired-state table plus what was left out of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    pub episode_id: EpisodeId,
    /// One row per frame, in sheet order.
    pub rows: Vec<CanonicalRow>,
    pub sheet_rows: usize,
    pub sampled_rows: usize,
    pub missing_label_rows: usize,
    /// Rows whose label can't be a key segment, e.g. `N/A`.
    pub invalid_label_rows: usize,
    pub duplicate_rows: usize,
}

impl DesiredState {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Knobs for turning a sheet into desired state.
#[derive(Debug, Clone, Copy)]
pub struct DesiredOptions<'a> {
    pub splits: &'a SplitConfig,
    /// Keep `round(rows / subsample)` rows; 1 keeps all.
    pub subsample: u32,
}

/// Indices of the rows kept by subsampling, ascending.
///
/// Keeps `round(n / rate)` rows (at least one when `n > 0`), drawn without replacement.
/// Halves round to even: 250 rows at rate 100 keep 2, 350 keep 4.
pub fn subsample_indices<R: Rng + ?Sized>(n: usize, rate: u32, rng: &mut R) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    if rate <= 1 {
        return (0..n).collect();
    }
    let keep = ((n as f64 / f64::from(rate)).round_ties_even() as usize).clamp(1, n);
    let mut picked = rand::seq::index::sample(rng, n, keep).into_vec();
    picked.sort_unstable();
    picked
}

pub fn build_desired_state<R: Rng + ?Sized>(
    episode_id: &EpisodeId,
    table: &SheetTable,
    opts: DesiredOptions<'_>,
    rng: &mut R,
) -> Result<DesiredState, DesiredStateError> {
    if table.is_empty() {
        return Err(DesiredStateError::EmptySheet(episode_id.clone()));
    }

    let base_url = table.headers.first().map(String::as_str).unwrap_or("");
    let expected = episode_id.lower();
    if !base_url.contains(&expected) {
        return Err(DesiredStateError::BaseUrlMismatch {
            base_url: base_url.to_string(),
            expected,
        });
    }

    let cols = SheetColumns::locate(table).map_err(DesiredStateError::Columns)?;
    let ctx = RowContext::new(episode_id.clone(), base_url);

    // Validate every row up front so a mislinked sheet fails whatever the sample.
    let mut invalid = 0usize;
    for row in &table.rows {
        let frame = row.get(cols.frame_number()).map(String::as_str).unwrap_or("");
        if validate_frame(frame, &ctx).is_err() {
            invalid += 1;
        }
    }
    if invalid > 0 {
        return Err(DesiredStateError::RowValidation {
            count: invalid,
            frame_code: ctx.frame_code,
        });
    }

    let picked = subsample_indices(table.len(), opts.subsample, rng);
    let sampled_rows = picked.len();

    let mut seen: BTreeSet<FrameId> = BTreeSet::new();
    let mut labeled = Vec::with_capacity(sampled_rows);
    let mut missing_label_rows = 0usize;
    let mut invalid_label_rows = 0usize;
    let mut duplicate_rows = 0usize;
    for i in picked {
        match normalize_row(&table.rows[i], &cols, &ctx) {
            Ok(row) => {
                if seen.insert(row.frame_id.clone()) {
                    labeled.push(row);
                } else {
                    duplicate_rows += 1;
                }
            }
            Err(NormalizeError::MissingLabel(frame)) => {
                debug!(episode_id = %episode_id, frame_id = %frame, "row has no label; excluded");
                missing_label_rows += 1;
            }
            Err(NormalizeError::InvalidLabel { frame, label, .. }) => {
                debug!(episode_id = %episode_id, frame_id = %frame, label = %label, "row label is not a key segment; excluded");
                invalid_label_rows += 1;
            }
            // Frames were validated above; anything else here is a column problem.
            Err(other) => return Err(DesiredStateError::Columns(other)),
        }
    }
    if missing_label_rows > 0 || invalid_label_rows > 0 || duplicate_rows > 0 {
        warn!(
            episode_id = %episode_id,
            missing_label_rows,
            invalid_label_rows,
            duplicate_rows,
            "rows excluded from desired state"
        );
    }

    let rows = assign_splits(labeled, opts.splits, rng);
    Ok(DesiredState {
        episode_id: episode_id.clone(),
        rows,
        sheet_rows: table.len(),
        sampled_rows,
        missing_label_rows,
        invalid_label_rows,
        duplicate_rows,
    })
}

/// Fetches the episode's sheet and builds its desired state.
pub fn desired_from_source<R: Rng + ?Sized>(
    source: &dyn SheetSource,
    episode_id: &EpisodeId,
    share_link: &str,
    opts: DesiredOptions<'_>,
    rng: &mut R,
) -> Result<DesiredState, DesiredStateError> {
    let table = source.fetch(share_link)?;
    build_desired_state(episode_id, &table, opts, rng)
}
