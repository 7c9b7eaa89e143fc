use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Season + episode pair, e.g. `S01E02`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EpisodeId {
    season_code: String,
    episode_code: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EpisodeIdError {
    #[error("empty episode id")]
    Empty,
    #[error("invalid episode id {0:?}; expected S<NN>E<NN>")]
    Invalid(String),
    #[error("invalid season code {0:?}; expected S<NN>")]
    InvalidSeason(String),
    #[error("invalid episode code {0:?}; expected E<NN>")]
    InvalidEpisode(String),
}

fn is_code(s: &str, lead: u8) -> bool {
    let b = s.as_bytes();
    b.len() == 3 && b[0] == lead && b[1].is_ascii_digit() && b[2].is_ascii_digit()
}

impl EpisodeId {
    pub fn parse(input: &str) -> Result<Self, EpisodeIdError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(EpisodeIdError::Empty);
        }
        if input.len() != 6 || !input.is_ascii() {
            return Err(EpisodeIdError::Invalid(input.to_string()));
        }
        let (season, episode) = input.split_at(3);
        if !is_code(season, b'S') || !is_code(episode, b'E') {
            return Err(EpisodeIdError::Invalid(input.to_string()));
        }
        Ok(Self {
            season_code: season.to_string(),
            episode_code: episode.to_string(),
        })
    }

    pub fn from_codes(season_code: &str, episode_code: &str) -> Result<Self, EpisodeIdError> {
        let season = season_code.trim();
        let episode = episode_code.trim();
        if !is_code(season, b'S') {
            return Err(EpisodeIdError::InvalidSeason(season.to_string()));
        }
        if !is_code(episode, b'E') {
            return Err(EpisodeIdError::InvalidEpisode(episode.to_string()));
        }
        Ok(Self {
            season_code: season.to_string(),
            episode_code: episode.to_string(),
        })
    }

    pub(crate) fn from_checked_codes(season_code: &str, episode_code: &str) -> Self {
        Self {
            season_code: season_code.to_string(),
            episode_code: episode_code.to_string(),
        }
    }

    pub fn season_code(&self) -> &str {
        &self.season_code
    }

    pub fn episode_code(&self) -> &str {
        &self.episode_code
    }

    /// `S01_E02`
    pub fn split_form(&self) -> String {
        format!("{}_{}", self.season_code, self.episode_code)
    }

    /// Prefix every frame id of this episode starts with: `TT_S01_E02_FRM`.
    pub fn frame_code(&self) -> String {
        format!("TT_{}_FRM", self.split_form())
    }

    /// `s01e02`, the form embedded in source asset URLs.
    pub fn lower(&self) -> String {
        self.to_string().to_ascii_lowercase()
    }
}

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.season_code, self.episode_code)
    }
}

impl FromStr for EpisodeId {
    type Err = EpisodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EpisodeId {
    type Error = EpisodeIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EpisodeId> for String {
    fn from(value: EpisodeId) -> Self {
        value.to_string()
    }
}

/// One entry of a season descriptor file (`S01-episodes.json`).
///
/// Older season files carry `season_code` + `episode_code` and the `google_` prefixed
/// spreadsheet fields; newer ones carry `episode_id` directly. Both are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawEpisodeDescriptor {
    #[serde(default)]
    pub episode_id: Option<String>,
    #[serde(default)]
    pub season_code: Option<String>,
    #[serde(default)]
    pub episode_code: Option<String>,
    #[serde(alias = "google_spreadsheet_share_link")]
    pub spreadsheet_share_link: String,
    #[serde(default, alias = "google_spreadsheet_title")]
    pub spreadsheet_title: Option<String>,
    #[serde(default, alias = "google_spreadsheet_url")]
    pub spreadsheet_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpisodeDescriptor {
    pub episode_id: EpisodeId,
    pub spreadsheet_share_link: String,
    pub spreadsheet_title: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EpisodeDescriptorError {
    #[error(transparent)]
    Id(#[from] EpisodeIdError),
    #[error("episode descriptor needs episode_id or season_code + episode_code")]
    MissingId,
    #[error("episode {episode_id} has codes {season_code}{episode_code} that disagree with its id")]
    CodeMismatch {
        episode_id: String,
        season_code: String,
        episode_code: String,
    },
    #[error("episode {0} has an empty spreadsheet share link")]
    MissingShareLink(String),
}

impl TryFrom<RawEpisodeDescriptor> for EpisodeDescriptor {
    type Error = EpisodeDescriptorError;

    fn try_from(raw: RawEpisodeDescriptor) -> Result<Self, Self::Error> {
        let from_codes = match (&raw.season_code, &raw.episode_code) {
            (Some(s), Some(e)) => Some(EpisodeId::from_codes(s, e)?),
            _ => None,
        };
        let episode_id = match (raw.episode_id.as_deref(), from_codes) {
            (Some(id), Some(codes)) => {
                let id = EpisodeId::parse(id)?;
                if id != codes {
                    return Err(EpisodeDescriptorError::CodeMismatch {
                        episode_id: id.to_string(),
                        season_code: codes.season_code,
                        episode_code: codes.episode_code,
                    });
                }
                id
            }
            (Some(id), None) => EpisodeId::parse(id)?,
            (None, Some(codes)) => codes,
            (None, None) => return Err(EpisodeDescriptorError::MissingId),
        };

        let share_link = raw.spreadsheet_share_link.trim().to_string();
        if share_link.is_empty() {
            return Err(EpisodeDescriptorError::MissingShareLink(
                episode_id.to_string(),
            ));
        }

        Ok(Self {
            episode_id,
            spreadsheet_share_link: share_link,
            spreadsheet_title: raw.spreadsheet_title,
        })
    }
}
