use async_trait::async_trait;
use bytes::Bytes;
use edh_common::{uri::S3Uri, EdhError, Result};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{ObjectStore, ObjectSummary};

type ObjectMap = BTreeMap<(String, String), Bytes>;

/// In-process object store keyed by `(bucket, key)`.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<ObjectMap>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, ObjectMap> {
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Bytes>) {
        self.objects()
            .insert((bucket.to_string(), key.to_string()), body.into());
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn read(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys in `bucket` starting with `prefix`, sorted.
    pub fn keys(&self, bucket: &str, prefix: &str) -> Vec<String> {
        self.objects()
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>> {
        Ok(self
            .objects()
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, k), body)| ObjectSummary::new(k.clone(), body.len() as u64))
            .collect())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes> {
        self.read(bucket, key)
            .ok_or_else(|| EdhError::Storage(format!("NoSuchKey: s3://{}/{}", bucket, key)))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        _content_type: Option<&str>,
    ) -> Result<()> {
        self.insert(bucket, key, body);
        Ok(())
    }

    async fn copy(&self, source: &S3Uri, destination: &S3Uri) -> Result<()> {
        let body = self.get(&source.bucket, &source.key).await?;
        self.insert(&destination.bucket, &destination.key, body);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        // S3 deletes are idempotent
        self.objects().remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}
