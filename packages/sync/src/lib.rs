#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Diff-and-upload engine for one-way incremental bucket backups.
//!
//! For each [`SyncTarget`](bucket_backup_sync_models::SyncTarget) the engine
//! snapshots every remote key under the target's prefix, walks the local
//! tree lazily, maps each file to its object key, and uploads only the files
//! whose key is absent. Nothing is ever deleted, and a key that exists
//! remotely is never re-uploaded, whatever its content.
//!
//! Storage access goes through the [`ObjectStore`] trait and local access
//! through [`local::LocalTree`], so the decision logic runs unchanged against
//! the real S3 client, a real directory, or the in-memory doubles of the
//! `memory` module (built for tests and with the `test-utils` feature).

pub mod engine;
pub mod local;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod remote;
pub mod retry;
pub mod snapshot;

use std::path::PathBuf;

use async_trait::async_trait;

pub use engine::{SnapshotReport, SyncEngine, TreeReport};
pub use remote::RemoteKeySet;

/// Error returned by an [`ObjectStore`] implementation.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that abort a backup job.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The base directory of a tree job is missing or unreadable.
    #[error("Cannot read base directory {}: {source}", path.display())]
    BaseDir {
        /// Configured base directory.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The base directory exists but is not a directory.
    #[error("Base directory {} is not a directory", path.display())]
    NotADirectory {
        /// Configured base directory.
        path: PathBuf,
    },

    /// A directory below the base could not be read during the walk.
    #[error("Failed to walk {}: {source}", path.display())]
    Walk {
        /// Path the walk failed on.
        path: PathBuf,
        /// Underlying walk error.
        source: walkdir::Error,
    },

    /// A file name cannot be represented in an object key.
    #[error("Path is not valid UTF-8: {}", path.display())]
    NonUtf8Path {
        /// The offending path.
        path: PathBuf,
    },

    /// Listing the remote prefix failed on some page.
    #[error("Failed to list remote prefix {prefix:?}: {source}")]
    List {
        /// Key prefix being listed.
        prefix: String,
        /// Underlying store error.
        source: StoreError,
    },

    /// An upload failed after all retries.
    #[error("Failed to upload {key}: {source}")]
    Upload {
        /// Destination key.
        key: String,
        /// Underlying store error.
        source: StoreError,
    },

    /// The snapshot directory is missing or unreadable.
    #[error("Cannot read snapshot directory {}: {source}", path.display())]
    SnapshotDir {
        /// Configured snapshot directory.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The snapshot directory has no entries to choose from.
    #[error("Snapshot directory {} is empty", path.display())]
    EmptySnapshotDir {
        /// Configured snapshot directory.
        path: PathBuf,
    },

    /// The selected snapshot entry is not a regular file.
    #[error("Selected snapshot {} is not a regular file", path.display())]
    SnapshotNotFile {
        /// The selected entry.
        path: PathBuf,
    },
}

/// Content handed to [`ObjectStore::put_object`].
///
/// Borrowed by the store so that a retried upload can reopen the same
/// source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadBody {
    /// A local file, opened when the upload starts.
    File(PathBuf),
    /// In-memory bytes.
    Bytes(Vec<u8>),
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Object keys on this page.
    pub keys: Vec<String>,
    /// Token to request the following page; `None` on the last page.
    pub next: Option<String>,
}

/// The remote operations the engine consumes: a paginated prefix listing and
/// an unconditional put. No delete, copy, or head operations are needed.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one page of keys under `prefix`, continuing after
    /// `continuation` if given.
    ///
    /// # Errors
    ///
    /// Returns the transport or authorization error of the listing call.
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StoreError>;

    /// Upload `body` to `key`, replacing any existing object.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be read or the put fails.
    async fn put_object(&self, key: &str, body: &UploadBody) -> Result<(), StoreError>;
}
