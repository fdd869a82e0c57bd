//! ZeroToHire Local Storage
//!
//! Device-scoped persistence for the session synchronization engine.
//!
//! This crate provides the two leaf stores the client builds on: the
//! [`CodeCache`], which keeps per-problem code snapshots and preference flags,
//! and the [`TokenStore`], which keeps the access and refresh credentials.
//! Both are backed by a small JSON document on disk and can also run purely
//! in memory.

mod cache;
mod file;
mod tokens;

use std::path::PathBuf;

use thiserror::Error;

pub use cache::{CodeCache, DEFAULT_PREFIX, FLAG_PREFIX, GLOBAL_SCOPE};
pub use tokens::{Credentials, TokenStore};

/// A specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while reading or writing a store file.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store file exists but could not be read.
    #[error("failed to read store file '{path}': {source}")]
    Read {
        /// Path to the store file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The store file could not be written.
    #[error("failed to write store file '{path}': {source}")]
    Write {
        /// Path to the store file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The in-memory contents could not be encoded as JSON.
    #[error("failed to encode store file '{path}': {source}")]
    Encode {
        /// Path to the store file.
        path: PathBuf,
        /// Underlying serialization error.
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Returns the path of the store file involved in the failure.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Read { path, .. } | Self::Write { path, .. } | Self::Encode { path, .. } => path,
        }
    }
}
