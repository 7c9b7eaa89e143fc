#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use mlsync_store::{ObjectLocation, ObjectMeta, ObjectStore, StoreError};

/// In-memory store keyed by `(bucket, key)`; copies may read any bucket.
#[derive(Default)]
pub struct MemoryStore {
    bucket: String,
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    /// Keys whose copy (as destination) or delete always fails.
    fail_keys: Mutex<BTreeSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            ..Self::default()
        }
    }

    pub fn insert(&self, bucket: &str, key: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .expect("objects mutex poisoned")
            .insert((bucket.to_string(), key.to_string()), bytes.to_vec());
    }

    pub fn fail_on(&self, key: &str) {
        self.fail_keys
            .lock()
            .expect("fail_keys mutex poisoned")
            .insert(key.to_string());
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .expect("objects mutex poisoned")
            .keys()
            .filter(|(b, _)| b == &self.bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .lock()
            .expect("objects mutex poisoned")
            .contains_key(&(self.bucket.clone(), key.to_string()))
    }

    /// `copy <dst>` / `delete <key>` in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }

    fn failing(&self, key: &str) -> bool {
        self.fail_keys
            .lock()
            .expect("fail_keys mutex poisoned")
            .contains(key)
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls mutex poisoned").push(call);
    }
}

impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        let objects = self.objects.lock().expect("objects mutex poisoned");
        Ok(objects
            .iter()
            .filter(|((b, k), _)| b == &self.bucket && k.starts_with(prefix))
            .map(|((_, k), v)| ObjectMeta {
                key: k.clone(),
                size: v.len() as u64,
                last_modified_unix_ms: None,
            })
            .collect())
    }

    fn copy(&self, src: &ObjectLocation, dst_key: &str) -> Result<(), StoreError> {
        self.record(format!("copy {dst_key}"));
        if self.failing(dst_key) {
            return Err(StoreError::Runtime(format!("injected failure for {dst_key}")));
        }
        let mut objects = self.objects.lock().expect("objects mutex poisoned");
        let bytes = objects
            .get(&(src.bucket.clone(), src.key.clone()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(src.to_string()))?;
        objects.insert((self.bucket.clone(), dst_key.to_string()), bytes);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.record(format!("delete {key}"));
        if self.failing(key) {
            return Err(StoreError::Runtime(format!("injected failure for {key}")));
        }
        self.objects
            .lock()
            .expect("objects mutex poisoned")
            .remove(&(self.bucket.clone(), key.to_string()));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.objects
            .lock()
            .expect("objects mutex poisoned")
            .get(&(self.bucket.clone(), key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.insert(&self.bucket.clone(), key, bytes);
        Ok(())
    }
}

pub const SOURCE_BUCKET: &str = "media.source";

pub fn ml_key(split: &str, label: &str, frame: &str) -> String {
    format!("tuttle_twins/ML/{split}/{label}/{frame}.jpg")
}

pub fn source_url(frame: &str) -> String {
    format!("s3://{SOURCE_BUCKET}/tuttle_twins/s01e01/frames/stamps/{frame}.jpg")
}

pub fn temp_dir(test_name: &str) -> anyhow::Result<std::path::PathBuf> {
    let mut root = std::env::temp_dir();
    root.push(format!(
        "mlsync-engine-{test_name}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
    ));
    std::fs::create_dir_all(&root)?;
    Ok(root)
}
