//! Object URI and key helpers
//!
//! Buckets arrive from global variables in several spellings (`s3://raw`,
//! `S3://raw`, `raw`) and keys are assembled from configured prefixes that may
//! or may not carry a trailing slash. Everything here normalises those into
//! plain `bucket` + `key` pairs.

use crate::error::{EdhError, Result};
use std::fmt;
use std::str::FromStr;

const SCHEME: &str = "s3://";

/// Remove a leading `s3://` (any case) from a bucket reference.
pub fn strip_scheme(value: &str) -> &str {
    let trimmed = value.trim();
    match trimmed.get(..SCHEME.len()) {
        Some(head) if head.eq_ignore_ascii_case(SCHEME) => &trimmed[SCHEME.len()..],
        _ => trimmed,
    }
}

/// Join key segments with single `/` separators.
///
/// Empty segments are dropped. A trailing slash on the last segment is kept so
/// that `join_key(&["raw", "orders/"])` still names a folder prefix.
pub fn join_key(segments: &[&str]) -> String {
    let parts: Vec<&str> = segments
        .iter()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect();

    let mut key = parts.join("/");
    if segments.last().is_some_and(|s| s.ends_with('/')) && !key.is_empty() {
        key.push('/');
    }
    key
}

/// Final path component of a key.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Fully-qualified object location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct S3Uri {
    pub bucket: String,
    pub key: String,
}

impl S3Uri {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn file_name(&self) -> &str {
        file_name(&self.key)
    }
}

impl fmt::Display for S3Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", SCHEME, self.bucket, self.key)
    }
}

impl FromStr for S3Uri {
    type Err = EdhError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if strip_scheme(trimmed).len() == trimmed.len() {
            return Err(EdhError::Parse(format!("Not an s3:// URI: {}", s)));
        }

        let rest = strip_scheme(trimmed);
        match rest.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok(S3Uri::new(bucket, key))
            },
            _ => Err(EdhError::Parse(format!("URI has no bucket/key: {}", s))),
        }
    }
}
