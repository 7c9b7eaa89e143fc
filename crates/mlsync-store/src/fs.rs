use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::{
    validate_bucket, validate_key, write_atomic, ObjectLocation, ObjectMeta, ObjectStore,
    StoreError, TMP_MARKER,
};

/// Object store laid out on a local filesystem as `<root>/<bucket>/<key>`.
///
/// Copy sources in other buckets resolve to sibling directories under the same root.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    bucket: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, bucket: &str) -> Result<Self, StoreError> {
        if !validate_bucket(bucket) {
            return Err(StoreError::InvalidBucket(bucket.to_string()));
        }
        Ok(Self {
            root: root.into(),
            bucket: bucket.to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        if !validate_bucket(bucket) {
            return Err(StoreError::InvalidBucket(bucket.to_string()));
        }
        if !validate_key(key) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        let mut path = self.root.join(bucket);
        for seg in key.split('/') {
            path.push(seg);
        }
        Ok(path)
    }
}

impl ObjectStore for FsObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        let bucket_dir = self.root.join(&self.bucket);
        let mut out = Vec::new();
        if bucket_dir.is_dir() {
            walk(&bucket_dir, "", prefix, &mut out)?;
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    fn copy(&self, src: &ObjectLocation, dst_key: &str) -> Result<(), StoreError> {
        let src_path = self.object_path(&src.bucket, &src.key)?;
        let dst_path = self.object_path(&self.bucket, dst_key)?;
        let bytes = match std::fs::read(&src_path) {
            Ok(b) => b,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(src.to_string()));
            }
            Err(err) => return Err(StoreError::Io(err)),
        };
        write_atomic(&dst_path, &bytes)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.object_path(&self.bucket, key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.object_path(&self.bucket, key)?;
        match std::fs::read(&path) {
            Ok(b) => Ok(b),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(self.location(key).to_string()))
            }
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.object_path(&self.bucket, key)?;
        write_atomic(&path, bytes)?;
        Ok(())
    }
}

fn walk(dir: &Path, rel: &str, prefix: &str, out: &mut Vec<ObjectMeta>) -> Result<(), StoreError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let key = if rel.is_empty() {
            name.clone()
        } else {
            format!("{rel}/{name}")
        };
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            // Prune subtrees that cannot contain a match.
            let dir_key = format!("{key}/");
            if dir_key.starts_with(prefix) || prefix.starts_with(&dir_key) {
                walk(&entry.path(), &key, prefix, out)?;
            }
            continue;
        }
        if !file_type.is_file() || name.contains(TMP_MARKER) || !key.starts_with(prefix) {
            continue;
        }
        let meta = entry.metadata()?;
        let last_modified_unix_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis().min(u64::MAX as u128) as u64);
        out.push(ObjectMeta {
            key,
            size: meta.len(),
            last_modified_unix_ms,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(test_name: &str) -> anyhow::Result<PathBuf> {
        let mut root = std::env::temp_dir();
        let suffix = format!(
            "mlsync-store-{}-{}-{}",
            test_name,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis()
        );
        root.push(suffix);
        std::fs::create_dir_all(&root)?;
        Ok(root)
    }

    #[test]
    fn list_is_sorted_and_prefix_filtered() -> anyhow::Result<()> {
        let root = temp_root("list")?;
        let store = FsObjectStore::new(&root, "data")?;
        store.put("tuttle_twins/ML/train/Rare/b.jpg", b"b")?;
        store.put("tuttle_twins/ML/test/Common/a.jpg", b"aa")?;
        store.put("tuttle_twins/manifests/S01-episodes.json", b"[]")?;

        let listed = store.list("tuttle_twins/ML/")?;
        let keys: Vec<&str> = listed.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "tuttle_twins/ML/test/Common/a.jpg",
                "tuttle_twins/ML/train/Rare/b.jpg"
            ]
        );
        assert_eq!(listed[0].size, 2);
        assert!(listed[0].last_modified_unix_ms.is_some());

        assert_eq!(store.list("tuttle_twins/manifests/S01")?.len(), 1);
        assert!(store.list("nothing/")?.is_empty());
        Ok(())
    }

    #[test]
    fn copy_across_buckets_and_missing_source() -> anyhow::Result<()> {
        let root = temp_root("copy")?;
        let media = FsObjectStore::new(&root, "media")?;
        media.put("stamps/s01e01/a.jpg", b"jpeg")?;

        let store = FsObjectStore::new(&root, "data")?;
        store.copy(
            &ObjectLocation::new("media", "stamps/s01e01/a.jpg"),
            "tuttle_twins/ML/train/Common/a.jpg",
        )?;
        assert_eq!(store.get("tuttle_twins/ML/train/Common/a.jpg")?, b"jpeg");

        let err = store
            .copy(
                &ObjectLocation::new("media", "stamps/s01e01/missing.jpg"),
                "tuttle_twins/ML/train/Common/missing.jpg",
            )
            .unwrap_err();
        assert!(err.is_not_found(), "{err:?}");
        assert!(store.list("tuttle_twins/ML/train/Common/missing")?.is_empty());
        Ok(())
    }

    #[test]
    fn delete_is_idempotent() -> anyhow::Result<()> {
        let root = temp_root("delete")?;
        let store = FsObjectStore::new(&root, "data")?;
        store.put("a/b.jpg", b"x")?;
        store.delete("a/b.jpg")?;
        store.delete("a/b.jpg")?;
        assert!(store.get("a/b.jpg").unwrap_err().is_not_found());

        store.put("a/c.jpg", b"x")?;
        let outcomes = store.delete_many(&["a/c.jpg".to_string(), "a/never.jpg".to_string()]);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|(_, r)| r.is_ok()));
        assert!(store.list("a/")?.is_empty());
        Ok(())
    }

    #[test]
    fn rejects_escaping_keys() -> anyhow::Result<()> {
        let root = temp_root("escape")?;
        let store = FsObjectStore::new(&root, "data")?;
        assert!(matches!(
            store.put("../outside", b"x"),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(FsObjectStore::new(&root, "../up").is_err());
        Ok(())
    }
}
