use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::{AggregatedBytes, ByteStream};
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use tracing::debug;

use crate::runtime::block_on;
use crate::{validate_bucket, validate_key, ObjectLocation, ObjectMeta, ObjectStore, StoreError};

/// S3 caps `DeleteObjects` at 1000 keys per request.
const DELETE_BATCH: usize = 1000;

#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Client from the ambient AWS environment; `MLSYNC_S3_ENDPOINT_URL` and
    /// `MLSYNC_S3_FORCE_PATH_STYLE` point it at S3-compatible endpoints.
    pub fn from_env(bucket: &str) -> Result<Self, StoreError> {
        if !validate_bucket(bucket) {
            return Err(StoreError::InvalidBucket(bucket.to_string()));
        }
        let client = block_on(client_from_env())??;
        Ok(Self::with_client(client, bucket))
    }

    pub fn with_client(client: aws_sdk_s3::Client, bucket: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
        }
    }

    async fn list_async(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        let mut out = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut req = self.client.list_objects_v2().bucket(&self.bucket);
            if !prefix.is_empty() {
                req = req.prefix(prefix);
            }
            if let Some(t) = token.as_deref() {
                req = req.continuation_token(t);
            }
            let resp = req.send().await.map_err(|e| {
                StoreError::Runtime(format!(
                    "s3 list_objects_v2 s3://{}/{prefix} failed: {}",
                    self.bucket,
                    describe(&e)
                ))
            })?;
            for obj in resp.contents() {
                let Some(key) = obj.key() else { continue };
                if key.ends_with('/') {
                    continue;
                }
                out.push(ObjectMeta {
                    key: key.to_string(),
                    size: obj.size().and_then(|v| u64::try_from(v).ok()).unwrap_or(0),
                    last_modified_unix_ms: obj
                        .last_modified()
                        .and_then(|t| t.to_millis().ok())
                        .and_then(|ms| u64::try_from(ms).ok()),
                });
            }
            if resp.is_truncated().unwrap_or(false) {
                token = resp.next_continuation_token().map(str::to_string);
                if token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    async fn delete_batch(&self, keys: &[String]) -> Vec<(String, Result<(), StoreError>)> {
        let mut ids = Vec::with_capacity(keys.len());
        for k in keys {
            match ObjectIdentifier::builder().key(k).build() {
                Ok(id) => ids.push(id),
                Err(e) => {
                    return fail_all(keys, &format!("build object identifier failed: {e}"));
                }
            }
        }
        let delete = match Delete::builder().set_objects(Some(ids)).quiet(true).build() {
            Ok(d) => d,
            Err(e) => return fail_all(keys, &format!("build delete request failed: {e}")),
        };
        let resp = match self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return fail_all(keys, &format!("s3 delete_objects failed: {}", describe(&e)));
            }
        };

        let mut errors: std::collections::BTreeMap<&str, String> = Default::default();
        for e in resp.errors() {
            if let Some(k) = e.key() {
                errors.insert(
                    k,
                    format!(
                        "{}: {}",
                        e.code().unwrap_or("unknown"),
                        e.message().unwrap_or("")
                    ),
                );
            }
        }
        keys.iter()
            .map(|k| {
                let outcome = match errors.get(k.as_str()) {
                    Some(msg) => Err(StoreError::Runtime(format!(
                        "s3 delete s3://{}/{k} failed: {msg}",
                        self.bucket
                    ))),
                    None => Ok(()),
                };
                (k.clone(), outcome)
            })
            .collect()
    }
}

impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        block_on(self.list_async(prefix))?
    }

    fn copy(&self, src: &ObjectLocation, dst_key: &str) -> Result<(), StoreError> {
        if !validate_key(dst_key) {
            return Err(StoreError::InvalidKey(dst_key.to_string()));
        }
        let copy_source = format!("{}/{}", src.bucket, percent_encode(&src.key));
        let out = block_on({
            let c = self.client.clone();
            let b = self.bucket.clone();
            let k = dst_key.to_string();
            async move {
                c.copy_object()
                    .bucket(b)
                    .key(k)
                    .copy_source(copy_source)
                    .send()
                    .await
            }
        })?;
        match out {
            Ok(_) => Ok(()),
            Err(err) if err.code() == Some("NoSuchKey") || err.code() == Some("NotFound") => {
                Err(StoreError::NotFound(src.to_string()))
            }
            Err(err) => Err(StoreError::Runtime(format!(
                "s3 copy_object {src} -> s3://{}/{dst_key} failed: {}",
                self.bucket,
                describe(&err)
            ))),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        if !validate_key(key) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        block_on({
            let c = self.client.clone();
            let b = self.bucket.clone();
            let k = key.to_string();
            async move {
                c.delete_object()
                    .bucket(&b)
                    .key(&k)
                    .send()
                    .await
                    .map_err(|e| {
                        StoreError::Runtime(format!(
                            "s3 delete_object s3://{b}/{k} failed: {}",
                            describe(&e)
                        ))
                    })?;
                Ok::<(), StoreError>(())
            }
        })?
    }

    fn delete_many(&self, keys: &[String]) -> Vec<(String, Result<(), StoreError>)> {
        let mut out = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(DELETE_BATCH) {
            let (valid, invalid): (Vec<String>, Vec<String>) =
                chunk.iter().cloned().partition(|k| validate_key(k));
            for k in invalid {
                out.push((k.clone(), Err(StoreError::InvalidKey(k))));
            }
            if valid.is_empty() {
                continue;
            }
            debug!(bucket = %self.bucket, keys = valid.len(), "delete_objects batch");
            match block_on(self.delete_batch(&valid)) {
                Ok(results) => out.extend(results),
                Err(e) => out.extend(fail_all(&valid, &e.to_string())),
            }
        }
        out
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        if !validate_key(key) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        let location = self.location(key);
        block_on({
            let c = self.client.clone();
            let b = self.bucket.clone();
            let k = key.to_string();
            async move {
                let out = match c.get_object().bucket(b).key(k).send().await {
                    Ok(out) => out,
                    Err(SdkError::ServiceError(se)) if se.err().is_no_such_key() => {
                        return Err(StoreError::NotFound(location.to_string()));
                    }
                    Err(e) => {
                        return Err(StoreError::Runtime(format!(
                            "s3 get_object {location} failed: {}",
                            describe(&e)
                        )));
                    }
                };
                let bytes: AggregatedBytes = out.body.collect().await.map_err(|e| {
                    StoreError::Runtime(format!("get_object body collect failed: {e:?}"))
                })?;
                Ok(bytes.into_bytes().to_vec())
            }
        })?
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        if !validate_key(key) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        block_on({
            let c = self.client.clone();
            let b = self.bucket.clone();
            let k = key.to_string();
            let body = bytes.to_vec();
            async move {
                c.put_object()
                    .bucket(&b)
                    .key(&k)
                    .body(ByteStream::from(body))
                    .send()
                    .await
                    .map_err(|e| {
                        StoreError::Runtime(format!(
                            "s3 put_object s3://{b}/{k} failed: {}",
                            describe(&e)
                        ))
                    })?;
                Ok::<(), StoreError>(())
            }
        })?
    }
}

fn fail_all(keys: &[String], msg: &str) -> Vec<(String, Result<(), StoreError>)> {
    keys.iter()
        .map(|k| (k.clone(), Err(StoreError::Runtime(msg.to_string()))))
        .collect()
}

fn describe<E, R>(err: &SdkError<E, R>) -> String
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    match err {
        SdkError::ServiceError(se) => format!(
            "{}: {}",
            se.err().code().unwrap_or("unknown"),
            se.err().message().unwrap_or("")
        ),
        other => format!("{other:?}"),
    }
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(*b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

async fn client_from_env() -> Result<aws_sdk_s3::Client, StoreError> {
    let cfg = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

    let endpoint_url: Option<String> = std::env::var("MLSYNC_S3_ENDPOINT_URL").ok();
    let force_path_style = match parse_env_bool("MLSYNC_S3_FORCE_PATH_STYLE")? {
        Some(v) => v,
        None => endpoint_url.is_some(),
    };

    let mut b = aws_sdk_s3::config::Builder::from(&cfg);
    if let Some(url) = endpoint_url {
        b = b.endpoint_url(url);
    }
    if force_path_style {
        b = b.force_path_style(true);
    }

    Ok(aws_sdk_s3::Client::from_conf(b.build()))
}

fn parse_env_bool(key: &str) -> Result<Option<bool>, StoreError> {
    match std::env::var(key) {
        Ok(v) => {
            let s = v.trim().to_ascii_lowercase();
            let b = match s.as_str() {
                "1" | "true" | "yes" | "y" | "on" => true,
                "0" | "false" | "no" | "n" | "off" => false,
                _ => {
                    return Err(StoreError::Runtime(format!(
                        "invalid boolean env var {key}={v:?} (expected true/false/1/0)"
                    )))
                }
            };
            Ok(Some(b))
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(StoreError::Runtime(format!(
            "read env var {key} failed: {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_source_keeps_slashes() {
        assert_eq!(
            percent_encode("stamps/s01e01/TT_S01_E01_FRM-00 01.jpg"),
            "stamps/s01e01/TT_S01_E01_FRM-00%2001.jpg"
        );
    }
}
