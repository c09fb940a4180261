//! Object store seam
//!
//! The engine only needs five object operations: list a prefix, read an
//! object, write an object, server-side copy, delete. [`ObjectStore`] is that
//! surface; [`S3ObjectStore`] talks to S3 (or any S3-compatible endpoint) and
//! [`MemoryObjectStore`] backs tests and dry runs.

use async_trait::async_trait;
use bytes::Bytes;
use edh_common::{uri::S3Uri, Result};

pub mod memory;
pub mod s3;

pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

/// One listed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

impl ObjectSummary {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }

    /// Zero-byte "folder" placeholders created by consoles and sync tools.
    pub fn is_folder_marker(&self) -> bool {
        self.key.ends_with('/')
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every object under `prefix`, in key order.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes>;

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<()>;

    async fn copy(&self, source: &S3Uri, destination: &S3Uri) -> Result<()>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;
}
