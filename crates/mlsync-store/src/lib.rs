#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod fs;
pub mod runtime;
#[cfg(feature = "s3")]
pub mod s3;

use std::fmt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

pub use fs::FsObjectStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid object key {0:?}")]
    InvalidKey(String),
    #[error("invalid bucket name {0:?}")]
    InvalidBucket(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("unsupported object location {0:?}")]
    UnsupportedLocation(String),
    #[error("unsupported store root: {0}")]
    UnsupportedRoot(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub last_modified_unix_ms: Option<u64>,
}

/// Copy source; may live in another bucket than the store's own.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Accepts `s3://bucket/key`, path-style `https://s3.<region>.amazonaws.com/<bucket>/<key>`
    /// and virtual-hosted `https://<bucket>.s3[.<region>].amazonaws.com/<key>`.
    pub fn from_url(url: &str) -> Result<Self, StoreError> {
        let unsupported = || StoreError::UnsupportedLocation(url.to_string());
        let url = url.trim();

        if let Some(rest) = url.strip_prefix("s3://") {
            let (bucket, key) = rest.split_once('/').ok_or_else(unsupported)?;
            return Self::checked(bucket, key).ok_or_else(unsupported);
        }

        let rest = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .ok_or_else(unsupported)?;
        let (host, path) = rest.split_once('/').ok_or_else(unsupported)?;
        let host = host.split(':').next().unwrap_or(host);
        if !host.ends_with(".amazonaws.com") {
            return Err(unsupported());
        }

        if host.starts_with("s3.") || host.starts_with("s3-") {
            let (bucket, key) = path.split_once('/').ok_or_else(unsupported)?;
            return Self::checked(bucket, key).ok_or_else(unsupported);
        }
        let (bucket, _) = host.split_once(".s3").ok_or_else(unsupported)?;
        Self::checked(bucket, path).ok_or_else(unsupported)
    }

    fn checked(bucket: &str, key: &str) -> Option<Self> {
        if !validate_bucket(bucket) || !validate_key(key) {
            return None;
        }
        Some(Self::new(bucket, key))
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Typed list/copy/delete/get/put over one bucket.
///
/// - `list` returns keys in lexicographic order and hides pagination.
/// - `copy` of a missing source is `StoreError::NotFound`.
/// - `delete` of a missing key succeeds.
/// - No call is retried here.
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError>;

    fn copy(&self, src: &ObjectLocation, dst_key: &str) -> Result<(), StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Per-key outcomes, in input order.
    fn delete_many(&self, keys: &[String]) -> Vec<(String, Result<(), StoreError>)> {
        keys.iter()
            .map(|k| (k.clone(), self.delete(k)))
            .collect()
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Location of `key` in this store's bucket, usable as a copy source.
    fn location(&self, key: &str) -> ObjectLocation {
        ObjectLocation::new(self.bucket(), key)
    }
}

/// `s3://[bucket]` selects S3 (feature `s3`); anything else is a local directory
/// standing in for an object-store root.
pub fn open_from_root(root: &str, bucket: &str) -> Result<Box<dyn ObjectStore>, StoreError> {
    let root = root.trim();
    if let Some(rest) = root.strip_prefix("s3://") {
        let named = rest.trim_matches('/');
        let bucket = match (named.is_empty(), bucket.trim().is_empty()) {
            (false, true) => named,
            (true, false) => bucket.trim(),
            (false, false) if named == bucket.trim() => named,
            (false, false) => {
                return Err(StoreError::UnsupportedRoot(format!(
                    "store root {root} names bucket {named:?} but bucket {bucket:?} was requested"
                )))
            }
            (true, true) => return Err(StoreError::InvalidBucket(String::new())),
        };
        return open_s3(bucket);
    }
    if root.is_empty() {
        return Err(StoreError::UnsupportedRoot("empty store root".to_string()));
    }
    Ok(Box::new(FsObjectStore::new(root, bucket)?))
}

#[cfg(feature = "s3")]
fn open_s3(bucket: &str) -> Result<Box<dyn ObjectStore>, StoreError> {
    Ok(Box::new(s3::S3ObjectStore::from_env(bucket)?))
}

#[cfg(not(feature = "s3"))]
fn open_s3(bucket: &str) -> Result<Box<dyn ObjectStore>, StoreError> {
    Err(StoreError::UnsupportedRoot(format!(
        "s3://{bucket} requires the `s3` feature"
    )))
}

pub fn validate_bucket(bucket: &str) -> bool {
    !bucket.trim().is_empty()
        && bucket.trim() == bucket
        && !bucket.contains('/')
        && !bucket.contains('\\')
        && !bucket.contains("..")
}

/// Keys are `/`-separated, relative, with no empty or `..` segments.
pub fn validate_key(key: &str) -> bool {
    if key.trim().is_empty() || key.contains('\\') {
        return false;
    }
    key.split('/')
        .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    use std::io::Write;

    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path must have parent")
    })?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = path.to_path_buf();
    let suffix = format!("{TMP_MARKER}{}.{}", std::process::id(), unix_time_ms());
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad filename"))?;
    tmp.set_file_name(format!("{file_name}{suffix}"));

    {
        let mut f = std::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }

    std::fs::rename(tmp, path)?;
    Ok(())
}

const TMP_MARKER: &str = ".mlsync-tmp.";

pub(crate) fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_from_s3_url() {
        let loc = ObjectLocation::from_url("s3://media.tuttletwins/stamps/s01e01/a.jpg").unwrap();
        assert_eq!(loc.bucket, "media.tuttletwins");
        assert_eq!(loc.key, "stamps/s01e01/a.jpg");
        assert_eq!(loc.to_string(), "s3://media.tuttletwins/stamps/s01e01/a.jpg");
    }

    #[test]
    fn location_from_path_style_url() {
        let loc = ObjectLocation::from_url(
            "https://s3.us-west-2.amazonaws.com/media.tuttletwins.com/stamps/s01e01/TT_S01_E01_FRM-00-00-08-11.jpg",
        )
        .unwrap();
        assert_eq!(loc.bucket, "media.tuttletwins.com");
        assert_eq!(loc.key, "stamps/s01e01/TT_S01_E01_FRM-00-00-08-11.jpg");
    }

    #[test]
    fn location_from_virtual_hosted_url() {
        let loc =
            ObjectLocation::from_url("https://media.s3.us-west-2.amazonaws.com/stamps/x.jpg")
                .unwrap();
        assert_eq!(loc.bucket, "media");
        assert_eq!(loc.key, "stamps/x.jpg");

        let loc = ObjectLocation::from_url("https://media.s3.amazonaws.com/x.jpg").unwrap();
        assert_eq!(loc.bucket, "media");
    }

    #[test]
    fn location_rejects_foreign_urls() {
        assert!(ObjectLocation::from_url("https://example.com/a/b.jpg").is_err());
        assert!(ObjectLocation::from_url("s3://bucket-only").is_err());
        assert!(ObjectLocation::from_url("ftp://x/y").is_err());
        assert!(ObjectLocation::from_url("s3://b/../etc/passwd").is_err());
    }

    #[test]
    fn key_validation() {
        assert!(validate_key("tuttle_twins/ML/train/Common/a.jpg"));
        assert!(!validate_key("/abs"));
        assert!(!validate_key("a//b"));
        assert!(!validate_key("a/../b"));
        assert!(!validate_key("  "));
    }
}
