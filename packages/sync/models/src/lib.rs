#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared types for one-way bucket backups.
//!
//! Holds the static job definitions ([`SyncTarget`], [`SnapshotTarget`]),
//! the per-run flags ([`RunContext`]), transfer statistics
//! ([`SyncStats`]), and the pure key mapping ([`object_key`]) used both when
//! naming uploaded objects and when deciding whether an upload is needed.

pub mod progress;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Separator used between key segments. Local paths are normalized to it
/// before they are mapped to keys.
pub const KEY_SEPARATOR: char = '/';

/// A local directory tree mirrored under a remote key prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    /// Local base directory walked recursively.
    pub local: PathBuf,
    /// Remote key prefix, e.g. `"music/"`.
    pub prefix: String,
}

impl SyncTarget {
    #[must_use]
    pub fn new(local: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            prefix: prefix.into(),
        }
    }
}

/// A directory of dated dumps whose most recent entry is uploaded to a
/// fixed key on every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotTarget {
    /// Directory holding the candidate files.
    pub dir: PathBuf,
    /// Fixed key the selected file overwrites.
    pub key: String,
    /// How the "most recent" entry is chosen.
    pub policy: SnapshotPolicy,
}

/// Rule for picking the snapshot file out of a backups directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotPolicy {
    /// The entry whose file name sorts last, byte-wise. Works when names
    /// carry a sortable timestamp such as `2024-03-15.sql.gz`.
    #[default]
    LexicographicMax,
    /// The entry with the latest modification time. Ties fall back to the
    /// file name.
    NewestModified,
}

impl SnapshotPolicy {
    /// Returns the kebab-case name used in configuration files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LexicographicMax => "lexicographic-max",
            Self::NewestModified => "newest-modified",
        }
    }
}

impl fmt::Display for SnapshotPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded retry with exponential backoff for remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. `1` disables retrying.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay to wait after the failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

/// Process-scoped flags, fixed at startup and passed explicitly to every
/// operation that logs or transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    /// Compute and log every decision but never call the transfer API.
    pub dry_run: bool,
    /// Log each upload decision at `info` instead of `debug`.
    pub verbose: bool,
    /// Maximum number of uploads in flight within one tree job.
    pub concurrency: usize,
    /// Retry policy applied to listing pages and uploads.
    pub retry: RetryPolicy,
}

impl RunContext {
    #[must_use]
    pub fn new(dry_run: bool, verbose: bool) -> Self {
        Self {
            dry_run,
            verbose,
            ..Self::default()
        }
    }

    /// Default log filter when `RUST_LOG` is unset: progress is only
    /// reported when verbose, warnings and errors always.
    #[must_use]
    pub const fn log_filter(&self) -> log::LevelFilter {
        if self.verbose {
            log::LevelFilter::Info
        } else {
            log::LevelFilter::Warn
        }
    }

    /// Log level for per-file decision lines.
    #[must_use]
    pub const fn decision_level(&self) -> log::Level {
        if self.verbose {
            log::Level::Info
        } else {
            log::Level::Debug
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            dry_run: false,
            verbose: false,
            concurrency: 1,
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of a backup job: how many files were uploaded vs skipped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    /// Files uploaded (or, in a dry run, that would have been uploaded).
    pub uploaded: u64,
    /// Files skipped because their key already existed remotely.
    pub skipped: u64,
    /// Size of the remote key set the decisions were made against.
    pub remote_objects: u64,
}

impl SyncStats {
    /// Merge another stats into this one.
    pub const fn merge(&mut self, other: Self) {
        self.uploaded += other.uploaded;
        self.skipped += other.skipped;
        self.remote_objects += other.remote_objects;
    }

    /// Total number of local files considered.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.uploaded + self.skipped
    }
}

impl fmt::Display for SyncStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} uploaded, {} skipped (already present), {} remote objects",
            self.uploaded, self.skipped, self.remote_objects
        )
    }
}

/// Maps a remote prefix and a `/`-separated relative path to an object key.
///
/// Trailing separators on the prefix are dropped before joining, so
/// `"music/"` and `"music"` name the same objects. An empty prefix maps the
/// relative path to itself. No other normalization is applied: case and
/// characters pass through unchanged.
#[must_use]
pub fn object_key(prefix: &str, relative: &str) -> String {
    let prefix = prefix.trim_end_matches(KEY_SEPARATOR);
    if prefix.is_empty() {
        relative.to_string()
    } else {
        format!("{prefix}{KEY_SEPARATOR}{relative}")
    }
}

/// Returns `prefix` with exactly one trailing separator, or empty.
#[must_use]
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches(KEY_SEPARATOR);
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}{KEY_SEPARATOR}")
    }
}
