//! EDH Common Library
//!
//! Shared error handling, logging and object-URI helpers for the EDH ingestion
//! workspace.
//!
//! # Example
//!
//! ```no_run
//! use edh_common::{Result, EdhError};
//! use edh_common::uri::S3Uri;
//!
//! fn bucket_of(uri: &str) -> Result<String> {
//!     let parsed: S3Uri = uri.parse()?;
//!     Ok(parsed.bucket)
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod uri;

// Re-export commonly used types
pub use error::{EdhError, Result};
