//! Spreadsheet access.
//!
//! A sheet is read as a header row plus string cells. The first header cell carries the
//! episode's thumbnails base URL, the remaining headers name columns.

use std::path::{Path, PathBuf};
use std::time::Duration;

use mlsync_store::runtime::block_on;
use mlsync_store::StoreError;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("cannot find a spreadsheet id in share link {0:?}")]
    BadShareLink(String),
    #[error("sheet export not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("read sheet {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("fetch sheet {url}: {message}")]
    Http { url: String, message: String },
    #[error("sheet values response is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sheet is not valid utf-8")]
    Utf8,
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error(transparent)]
    Blocking(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetTable {
    pub headers: Vec<String>,
    /// Every row has exactly `headers.len()` cells.
    pub rows: Vec<Vec<String>>,
}

impl SheetTable {
    /// Pads short rows with empty cells and drops cells beyond the header width.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut r| {
                r.resize(width, String::new());
                r
            })
            .collect();
        Self { headers, rows }
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Reads the first sheet behind a share link.
pub trait SheetSource: Send + Sync {
    fn fetch(&self, share_link: &str) -> Result<SheetTable, SheetError>;
}

/// `https://docs.google.com/spreadsheets/d/<id>/edit?usp=sharing` -> `<id>`.
pub fn spreadsheet_id_from_link(link: &str) -> Result<String, SheetError> {
    let bad = || SheetError::BadShareLink(link.to_string());
    let (_, rest) = link.split_once("/spreadsheets/d/").ok_or_else(bad)?;
    let id = rest
        .split(|c| c == '/' || c == '?' || c == '#')
        .next()
        .unwrap_or("");
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(id.to_string())
    } else {
        Err(bad())
    }
}

/// Tab-separated export: first non-blank line is the header, blank lines are skipped.
pub fn parse_tsv(text: &str) -> SheetTable {
    let mut lines = text
        .lines()
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return SheetTable::default();
    };
    let headers: Vec<String> = header.split('\t').map(|s| s.trim().to_string()).collect();
    let rows = lines
        .map(|l| l.split('\t').map(|s| s.trim().to_string()).collect())
        .collect();
    SheetTable::new(headers, rows)
}

/// Local TSV exports named after the spreadsheet id.
#[derive(Debug, Clone)]
pub struct DirSheetSource {
    dir: PathBuf,
}

impl DirSheetSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, share_link: &str) -> Result<PathBuf, SheetError> {
        let id = spreadsheet_id_from_link(share_link)?;
        Ok(self.dir.join(format!("{id}.tsv")))
    }
}

impl SheetSource for DirSheetSource {
    fn fetch(&self, share_link: &str) -> Result<SheetTable, SheetError> {
        let path = self.path_for(share_link)?;
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SheetError::NotFound(path));
            }
            Err(source) => return Err(SheetError::Io { path, source }),
        };
        let text = String::from_utf8(bytes).map_err(|_| SheetError::Utf8)?;
        debug!(path = %path.display(), "read sheet export");
        Ok(parse_tsv(&text))
    }
}

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DOCS_BASE: &str = "https://docs.google.com/spreadsheets/d";

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// Live spreadsheets over HTTP.
///
/// With an API key the first sheet is read through the values endpoint; without one the
/// link-shared TSV export is downloaded.
#[derive(Debug, Clone)]
pub struct HttpSheetSource {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl HttpSheetSource {
    pub fn new(api_key: Option<String>) -> Result<Self, SheetError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| SheetError::Runtime(format!("http client init failed: {e}")))?;
        Ok(Self { client, api_key })
    }

    pub fn from_key_file(path: Option<&Path>) -> Result<Self, SheetError> {
        let api_key = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p).map_err(|source| SheetError::Io {
                    path: p.to_path_buf(),
                    source,
                })?;
                Some(raw.trim().to_string()).filter(|k| !k.is_empty())
            }
            None => None,
        };
        Self::new(api_key)
    }

    async fn get_text(&self, url: &str, shown: &str) -> Result<String, SheetError> {
        let http_err = |message: String| SheetError::Http {
            url: shown.to_string(),
            message,
        };
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| http_err(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(http_err(format!("status={}", resp.status())));
        }
        resp.text().await.map_err(|e| http_err(e.to_string()))
    }
}

impl SheetSource for HttpSheetSource {
    fn fetch(&self, share_link: &str) -> Result<SheetTable, SheetError> {
        let id = spreadsheet_id_from_link(share_link)?;
        match &self.api_key {
            Some(key) => {
                let shown = format!("{SHEETS_API_BASE}/{id}/values/A:ZZ");
                let url = format!("{shown}?key={key}");
                let body = block_on(self.get_text(&url, &shown))??;
                let parsed: ValueRange = serde_json::from_str(&body)?;
                Ok(values_to_table(parsed.values))
            }
            None => {
                let url = format!("{DOCS_BASE}/{id}/export?format=tsv");
                let body = block_on(self.get_text(&url, &url))??;
                Ok(parse_tsv(&body))
            }
        }
    }
}

fn values_to_table(values: Vec<Vec<serde_json::Value>>) -> SheetTable {
    let cell = |v: serde_json::Value| match v {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    };
    let mut rows = values
        .into_iter()
        .map(|r| r.into_iter().map(cell).collect::<Vec<String>>())
        .filter(|r| r.iter().any(|c| !c.is_empty()));
    let Some(headers) = rows.next() else {
        return SheetTable::default();
    };
    SheetTable::new(headers, rows.collect())
}
