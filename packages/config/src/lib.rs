#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Configuration file for bucket backups.
//!
//! A single TOML document supplies the S3 endpoint and credentials, optional
//! tuning (bucket, region, concurrency, retry), and the ordered list of
//! backup jobs:
//!
//! ```toml
//! endpoint_url = "https://<account>.r2.cloudflarestorage.com"
//! aws_access_key_id = "..."
//! aws_secret_access_key = "..."
//!
//! [[jobs]]
//! kind = "tree"
//! local = "/mnt/data/music"
//! prefix = "music/"
//!
//! [[jobs]]
//! kind = "snapshot"
//! dir = "/mnt/data/immich/library/backups"
//! key = "immich/db-backup.sql.gz"
//! ```
//!
//! Every problem found here is reported before any network call is made.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bucket_backup_r2::{DEFAULT_BUCKET, DEFAULT_REGION, R2Settings};
use bucket_backup_sync_models::{
    RetryPolicy, RunContext, SnapshotPolicy, SnapshotTarget, SyncTarget, normalize_prefix,
};
use serde::Deserialize;

/// File name looked up in the working directory when `--config` is not
/// given.
pub const DEFAULT_CONFIG_FILE: &str = "bucket_backup.toml";

/// Errors that can occur while loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the expected shape.
    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// The file parsed but its values are unusable.
    #[error("Invalid config: {message}")]
    Invalid {
        /// What is wrong.
        message: String,
    },
}

/// One backup job, run in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Mirror a directory tree under a prefix.
    Tree(SyncTarget),
    /// Upload the latest file of a directory to a fixed key.
    Snapshot(SnapshotTarget),
}

/// Fully validated configuration.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Endpoint, credentials, and bucket.
    pub storage: R2Settings,
    /// Jobs in the order they run.
    pub jobs: Vec<Job>,
    /// Maximum uploads in flight within one tree job.
    pub concurrency: usize,
    /// Retry policy for remote calls.
    pub retry: RetryPolicy,
}

impl BackupConfig {
    /// Builds the run context from this configuration and the CLI flags.
    #[must_use]
    pub const fn run_context(&self, dry_run: bool, verbose: bool) -> RunContext {
        RunContext {
            dry_run,
            verbose,
            concurrency: self.concurrency,
            retry: self.retry,
        }
    }

    /// Logs a summary of the loaded configuration without credentials.
    pub fn trace_loaded(&self) {
        log::info!(
            "Loaded config: bucket={} endpoint={} jobs={} concurrency={}",
            self.storage.bucket,
            self.storage.endpoint_url,
            self.jobs.len(),
            self.concurrency
        );
        for job in &self.jobs {
            match job {
                Job::Tree(t) => log::debug!("  tree {} -> {}", t.local.display(), t.prefix),
                Job::Snapshot(s) => log::debug!(
                    "  snapshot {} -> {} ({})",
                    s.dir.display(),
                    s.key,
                    s.policy
                ),
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    endpoint_url: String,
    aws_access_key_id: String,
    aws_secret_access_key: String,
    #[serde(default = "default_bucket")]
    bucket: String,
    #[serde(default = "default_region")]
    region: String,
    #[serde(default = "default_concurrency")]
    concurrency: usize,
    #[serde(default)]
    retry: RawRetry,
    #[serde(default)]
    jobs: Vec<RawJob>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRetry {
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    base_delay_ms: u64,
}

impl Default for RawRetry {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
enum RawJob {
    Tree {
        local: PathBuf,
        prefix: String,
    },
    Snapshot {
        dir: PathBuf,
        key: String,
        #[serde(default)]
        policy: SnapshotPolicy,
    },
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

const fn default_concurrency() -> usize {
    1
}

fn default_max_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_base_delay_ms() -> u64 {
    u64::try_from(RetryPolicy::default().base_delay.as_millis()).unwrap_or(u64::MAX)
}

/// Reads and validates the configuration file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file is missing, malformed, or invalid.
pub fn load_config(path: &Path) -> Result<BackupConfig, ConfigError> {
    log::debug!("Loading configuration from {}", path.display());

    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let raw: RawConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    validate(raw)
}

/// Parses and validates a configuration document held in memory.
///
/// # Errors
///
/// Returns [`ConfigError`] if the document is malformed or invalid.
pub fn parse_config(text: &str) -> Result<BackupConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
        path: PathBuf::from("<inline>"),
        source,
    })?;

    validate(raw)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        message: message.into(),
    }
}

fn validate(raw: RawConfig) -> Result<BackupConfig, ConfigError> {
    for (name, value) in [
        ("endpoint_url", &raw.endpoint_url),
        ("aws_access_key_id", &raw.aws_access_key_id),
        ("aws_secret_access_key", &raw.aws_secret_access_key),
        ("bucket", &raw.bucket),
    ] {
        if value.trim().is_empty() {
            return Err(invalid(format!("{name} must not be empty")));
        }
    }

    if raw.concurrency == 0 {
        return Err(invalid("concurrency must be at least 1"));
    }
    if raw.retry.max_attempts == 0 {
        return Err(invalid("retry.max_attempts must be at least 1"));
    }
    if raw.jobs.is_empty() {
        return Err(invalid("at least one [[jobs]] entry is required"));
    }

    let jobs: Vec<Job> = raw
        .jobs
        .into_iter()
        .map(|job| match job {
            RawJob::Tree { local, prefix } => {
                Job::Tree(SyncTarget::new(local, normalize_prefix(&prefix)))
            }
            RawJob::Snapshot { dir, key, policy } => {
                Job::Snapshot(SnapshotTarget { dir, key, policy })
            }
        })
        .collect();

    for job in &jobs {
        if let Job::Snapshot(s) = job
            && s.key.trim().is_empty()
        {
            return Err(invalid(format!(
                "snapshot job for {} has an empty key",
                s.dir.display()
            )));
        }
    }

    check_disjoint_prefixes(&jobs)?;

    Ok(BackupConfig {
        storage: R2Settings {
            endpoint_url: raw.endpoint_url,
            access_key_id: raw.aws_access_key_id,
            secret_access_key: raw.aws_secret_access_key,
            region: raw.region,
            bucket: raw.bucket,
        },
        jobs,
        concurrency: raw.concurrency,
        retry: RetryPolicy {
            max_attempts: raw.retry.max_attempts,
            base_delay: Duration::from_millis(raw.retry.base_delay_ms),
        },
    })
}

/// Two tree jobs must never map files to the same key, so no tree prefix
/// may contain another.
fn check_disjoint_prefixes(jobs: &[Job]) -> Result<(), ConfigError> {
    let prefixes: Vec<(String, &str)> = jobs
        .iter()
        .filter_map(|job| match job {
            Job::Tree(t) => Some((normalize_prefix(&t.prefix), t.prefix.as_str())),
            Job::Snapshot(_) => None,
        })
        .collect();

    for (i, (a, a_raw)) in prefixes.iter().enumerate() {
        for (b, b_raw) in &prefixes[i + 1..] {
            if a.starts_with(b.as_str()) || b.starts_with(a.as_str()) {
                return Err(invalid(format!(
                    "tree prefixes {a_raw:?} and {b_raw:?} overlap"
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREDENTIALS: &str = r#"
endpoint_url = "https://acct.r2.cloudflarestorage.com"
aws_access_key_id = "id"
aws_secret_access_key = "secret"
"#;

    fn with_jobs(jobs: &str) -> String {
        format!("{CREDENTIALS}\n{jobs}")
    }

    #[test]
    fn parses_full_document_in_job_order() {
        let text = with_jobs(
            r#"
bucket = "archive"
concurrency = 4

[retry]
max_attempts = 5
base_delay_ms = 250

[[jobs]]
kind = "tree"
local = "/mnt/data/immich/library/upload"
prefix = "immich/"

[[jobs]]
kind = "snapshot"
dir = "/mnt/data/immich/library/backups"
key = "immich/db-backup.sql.gz"

[[jobs]]
kind = "tree"
local = "/mnt/data/music"
prefix = "music/"
"#,
        );

        let config = parse_config(&text).unwrap();

        assert_eq!(config.storage.bucket, "archive");
        assert_eq!(config.storage.region, "auto");
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(
            config.jobs,
            vec![
                Job::Tree(SyncTarget::new("/mnt/data/immich/library/upload", "immich/")),
                Job::Snapshot(SnapshotTarget {
                    dir: PathBuf::from("/mnt/data/immich/library/backups"),
                    key: "immich/db-backup.sql.gz".to_string(),
                    policy: SnapshotPolicy::LexicographicMax,
                }),
                Job::Tree(SyncTarget::new("/mnt/data/music", "music/")),
            ]
        );
    }

    #[test]
    fn applies_defaults() {
        let text = with_jobs(
            r#"
[[jobs]]
kind = "tree"
local = "/data"
prefix = "data/"
"#,
        );

        let config = parse_config(&text).unwrap();

        assert_eq!(config.storage.bucket, "backup");
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.retry, RetryPolicy::default());

        let ctx = config.run_context(true, false);
        assert!(ctx.dry_run);
        assert!(!ctx.verbose);
    }

    #[test]
    fn parses_snapshot_policy() {
        let text = with_jobs(
            r#"
[[jobs]]
kind = "snapshot"
dir = "/backups"
key = "db.sql.gz"
policy = "newest-modified"
"#,
        );

        let config = parse_config(&text).unwrap();

        assert!(matches!(
            &config.jobs[0],
            Job::Snapshot(s) if s.policy == SnapshotPolicy::NewestModified
        ));
    }

    #[test]
    fn missing_credentials_fail_to_parse() {
        let err = parse_config("[[jobs]]\nkind = \"tree\"\nlocal = \"/a\"\nprefix = \"a/\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn empty_secret_is_invalid() {
        let text = r#"
endpoint_url = "https://acct.r2.cloudflarestorage.com"
aws_access_key_id = "id"
aws_secret_access_key = ""

[[jobs]]
kind = "tree"
local = "/a"
prefix = "a/"
"#;
        let err = parse_config(text).unwrap_err();
        assert!(err.to_string().contains("aws_secret_access_key"));
    }

    #[test]
    fn no_jobs_is_invalid() {
        let err = parse_config(CREDENTIALS).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn unknown_job_kind_fails_to_parse() {
        let text = with_jobs("[[jobs]]\nkind = \"mirror\"\nlocal = \"/a\"\nprefix = \"a/\"\n");
        assert!(matches!(
            parse_config(&text).unwrap_err(),
            ConfigError::Parse { .. }
        ));
    }

    #[test]
    fn overlapping_prefixes_are_invalid() {
        let text = with_jobs(
            r#"
[[jobs]]
kind = "tree"
local = "/a"
prefix = "media"

[[jobs]]
kind = "tree"
local = "/b"
prefix = "media/music/"
"#,
        );

        let err = parse_config(&text).unwrap_err();

        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn tree_prefixes_are_normalized_on_load() {
        let text = with_jobs(
            r#"
[[jobs]]
kind = "tree"
local = "/a"
prefix = "music//"

[[jobs]]
kind = "tree"
local = "/b"
prefix = "photos"
"#,
        );

        let config = parse_config(&text).unwrap();

        assert_eq!(
            config.jobs,
            vec![
                Job::Tree(SyncTarget::new("/a", "music/")),
                Job::Tree(SyncTarget::new("/b", "photos/")),
            ]
        );
    }

    #[test]
    fn sibling_prefixes_sharing_a_stem_are_allowed() {
        let text = with_jobs(
            r#"
[[jobs]]
kind = "tree"
local = "/a"
prefix = "music/"

[[jobs]]
kind = "tree"
local = "/b"
prefix = "musical/"
"#,
        );

        assert!(parse_config(&text).is_ok());
    }

    #[test]
    fn zero_concurrency_is_invalid() {
        let text = with_jobs(
            "concurrency = 0\n[[jobs]]\nkind = \"tree\"\nlocal = \"/a\"\nprefix = \"a/\"\n",
        );
        assert!(matches!(
            parse_config(&text).unwrap_err(),
            ConfigError::Invalid { .. }
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let path = std::env::temp_dir().join("bucket_backup_config_missing.toml");
        let _ = std::fs::remove_file(&path);

        assert!(matches!(
            load_config(&path).unwrap_err(),
            ConfigError::Read { .. }
        ));
    }

    #[test]
    fn loads_from_disk() {
        let path = std::env::temp_dir().join(format!(
            "bucket_backup_config_{}.toml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            with_jobs("[[jobs]]\nkind = \"tree\"\nlocal = \"/a\"\nprefix = \"a/\"\n"),
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.jobs.len(), 1);

        let _ = std::fs::remove_file(&path);
    }
}
