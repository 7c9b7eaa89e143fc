//! Raw sheet row -> [`LabeledRow`].

use mlsync_core::episode::EpisodeId;
use mlsync_core::types::{FrameId, FrameIdError, LabeledRow, MlKeyError};
use thiserror::Error;

use crate::sheet::SheetTable;

pub const FRAME_NUMBER_COLUMN: &str = "FRAME NUMBER";
pub const RECLASSIFICATION_COLUMN: &str = "JONNY's RECLASSIFICATION";
pub const SUPERVISED_COLUMN: &str = "SUPERVISED CLASSIFICATION";
pub const UNSUPERVISED_COLUMN: &str = "UNSUPERVISED CLASSIFICATION";

const THUMBNAILS_SEGMENT: &str = "thumbnails";
const STAMPS_SEGMENT: &str = "stamps";
const SOURCE_EXT: &str = "jpg";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("sheet is missing column {0:?}")]
    MissingColumn(&'static str),
    #[error("no classification column is populated for frame {0:?}")]
    MissingLabel(String),
    #[error("label {label:?} of frame {frame:?} cannot be used as a key segment: {source}")]
    InvalidLabel {
        frame: String,
        label: String,
        source: MlKeyError,
    },
    #[error("frame number {frame:?} does not contain {frame_code}")]
    FrameCode { frame: String, frame_code: String },
    #[error(transparent)]
    Frame(#[from] FrameIdError),
}

impl NormalizeError {
    /// Frame-code and frame-grammar failures make the whole sheet suspect.
    pub fn is_validation_failure(&self) -> bool {
        matches!(self, NormalizeError::FrameCode { .. } | NormalizeError::Frame(_))
    }
}

/// First non-empty of reclassification, supervised, unsupervised.
pub fn resolve_label<'a>(
    reclassification: &'a str,
    supervised: &'a str,
    unsupervised: &'a str,
) -> Option<&'a str> {
    [reclassification, supervised, unsupervised]
        .into_iter()
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// Column positions resolved once per sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetColumns {
    frame_number: usize,
    reclassification: usize,
    supervised: usize,
    unsupervised: usize,
}

impl SheetColumns {
    pub fn locate(table: &SheetTable) -> Result<Self, NormalizeError> {
        let find = |name: &'static str| {
            table
                .column(name)
                .ok_or(NormalizeError::MissingColumn(name))
        };
        Ok(Self {
            frame_number: find(FRAME_NUMBER_COLUMN)?,
            reclassification: find(RECLASSIFICATION_COLUMN)?,
            supervised: find(SUPERVISED_COLUMN)?,
            unsupervised: find(UNSUPERVISED_COLUMN)?,
        })
    }

    pub fn frame_number(&self) -> usize {
        self.frame_number
    }
}

/// Per-sheet context for turning rows into labeled rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowContext {
    pub episode_id: EpisodeId,
    /// `TT_S01_E01_FRM`
    pub frame_code: String,
    /// Thumbnails base URL with the thumbnails segment swapped for stamps, ending in `/`.
    pub stamps_base_url: String,
}

impl RowContext {
    pub fn new(episode_id: EpisodeId, thumbnails_base_url: &str) -> Self {
        Self {
            frame_code: episode_id.frame_code(),
            stamps_base_url: stamps_base_url(thumbnails_base_url),
            episode_id,
        }
    }

    pub fn source_url(&self, frame_id: &FrameId) -> String {
        format!("{}{frame_id}.{SOURCE_EXT}", self.stamps_base_url)
    }
}

/// `.../frames/thumbnails/` -> `.../frames/stamps/`.
pub fn stamps_base_url(thumbnails_base_url: &str) -> String {
    let base = thumbnails_base_url.trim();
    let segments: Vec<&str> = base
        .split('/')
        .map(|s| if s == THUMBNAILS_SEGMENT { STAMPS_SEGMENT } else { s })
        .collect();
    let mut out = segments.join("/");
    if !out.ends_with('/') {
        out.push('/');
    }
    out
}

/// Checks the frame number against the episode before anything else about the row.
pub fn validate_frame(raw_frame: &str, ctx: &RowContext) -> Result<FrameId, NormalizeError> {
    let frame = raw_frame.trim();
    if !frame
        .to_ascii_uppercase()
        .contains(&ctx.frame_code.to_ascii_uppercase())
    {
        return Err(NormalizeError::FrameCode {
            frame: frame.to_string(),
            frame_code: ctx.frame_code.clone(),
        });
    }
    let frame_id = FrameId::parse(frame)?;
    if frame_id.episode_id() != ctx.episode_id {
        return Err(NormalizeError::FrameCode {
            frame: frame.to_string(),
            frame_code: ctx.frame_code.clone(),
        });
    }
    Ok(frame_id)
}

pub fn normalize_row(
    row: &[String],
    cols: &SheetColumns,
    ctx: &RowContext,
) -> Result<LabeledRow, NormalizeError> {
    let cell = |i: usize| row.get(i).map(String::as_str).unwrap_or("");
    let frame_id = validate_frame(cell(cols.frame_number), ctx)?;
    let label = resolve_label(
        cell(cols.reclassification),
        cell(cols.supervised),
        cell(cols.unsupervised),
    )
    .ok_or_else(|| NormalizeError::MissingLabel(frame_id.to_string()))?;
    let source_url = ctx.source_url(&frame_id);
    LabeledRow::new(ctx.episode_id.clone(), frame_id.clone(), source_url, label).map_err(|source| {
        NormalizeError::InvalidLabel {
            frame: frame_id.to_string(),
            label: label.to_string(),
            source,
        }
    })
}
