//! The diff-and-upload decision engine.
//!
//! [`SyncEngine::backup_tree`] uploads every local file whose key is absent
//! from the remote snapshot taken at the start of the job.
//! [`SyncEngine::backup_snapshot`] uploads one selected file to a fixed key
//! unconditionally. Both reach the store through a single transfer gate,
//! which is where dry-run suppresses the upload.

use std::path::PathBuf;
use std::sync::Arc;

use bucket_backup_sync_models::progress::{ProgressCallback, null_progress};
use bucket_backup_sync_models::{
    RunContext, SnapshotTarget, SyncStats, SyncTarget, normalize_prefix, object_key,
};
use futures::stream::{self, StreamExt as _};

use crate::local::{FsTree, LocalTree};
use crate::remote::{RemoteKeySet, remote_key_set};
use crate::retry::with_retry;
use crate::snapshot::select_snapshot;
use crate::{ObjectStore, SyncError, UploadBody};

/// Outcome of a tree job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeReport {
    /// Remote prefix the tree was mirrored under.
    pub prefix: String,
    /// Upload/skip counts.
    pub stats: SyncStats,
    /// Keys uploaded (or, in a dry run, selected for upload), in completion
    /// order.
    pub uploaded: Vec<String>,
}

/// Outcome of a snapshot job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotReport {
    /// The file chosen from the backups directory.
    pub selected: PathBuf,
    /// Key it was written to.
    pub key: String,
    /// `false` when the upload was suppressed by dry-run.
    pub transferred: bool,
}

enum Decision {
    Present,
    Upload(String),
}

/// Runs backup jobs against an [`ObjectStore`] under a fixed [`RunContext`].
pub struct SyncEngine<'a> {
    store: &'a dyn ObjectStore,
    ctx: RunContext,
    progress: Arc<dyn ProgressCallback>,
}

impl<'a> SyncEngine<'a> {
    #[must_use]
    pub fn new(store: &'a dyn ObjectStore, ctx: RunContext) -> Self {
        Self {
            store,
            ctx,
            progress: null_progress(),
        }
    }

    /// Reports each examined file to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Mirrors `target.local` under `target.prefix`.
    ///
    /// # Errors
    ///
    /// Fails on the first listing, walk, or upload error. Uploads completed
    /// before the failure stay in the bucket.
    pub async fn backup_tree(&self, target: &SyncTarget) -> Result<TreeReport, SyncError> {
        log::info!(
            "Backing up {} -> {}",
            target.local.display(),
            target.prefix
        );
        self.backup_tree_from(&target.prefix, &FsTree::new(&target.local))
            .await
    }

    /// Mirrors any [`LocalTree`] under `prefix`.
    ///
    /// `prefix` is listed and mapped in its normalized form (one trailing
    /// separator), so `"music"`, `"music/"` and `"music//"` all name the same
    /// objects.
    ///
    /// The remote key set is fully listed before the first local file is
    /// examined, then files are pulled from the tree one at a time. With
    /// `concurrency > 1` up to that many uploads are in flight, all reading
    /// the same immutable key set.
    ///
    /// # Errors
    ///
    /// See [`Self::backup_tree`].
    pub async fn backup_tree_from(
        &self,
        prefix: &str,
        tree: &dyn LocalTree,
    ) -> Result<TreeReport, SyncError> {
        let prefix = normalize_prefix(prefix);
        let prefix = prefix.as_str();
        let remote = remote_key_set(self.store, prefix, &self.ctx.retry).await?;
        log::info!("Got {} objects from {prefix:?}", remote.len());

        let mut report = TreeReport {
            prefix: prefix.to_string(),
            stats: SyncStats {
                remote_objects: remote.len() as u64,
                ..SyncStats::default()
            },
            uploaded: Vec::new(),
        };

        let files = tree.files()?;
        let remote = &remote;
        self.progress.set_message(format!("Checking {prefix}"));

        let mut decisions = stream::iter(files)
            .map(|relative| self.process_file(prefix, remote, tree, relative))
            .buffer_unordered(self.ctx.concurrency.max(1));

        while let Some(decision) = decisions.next().await {
            match decision {
                Ok(Decision::Present) => report.stats.skipped += 1,
                Ok(Decision::Upload(key)) => {
                    report.stats.uploaded += 1;
                    report.uploaded.push(key);
                }
                Err(e) => {
                    log::error!("{prefix}: aborted after {}", report.stats);
                    return Err(e);
                }
            }
            self.progress.inc(1);
        }

        self.progress.set_message(format!("{prefix}: {}", report.stats));
        Ok(report)
    }

    /// Decides one file and uploads it if its key is absent.
    async fn process_file(
        &self,
        prefix: &str,
        remote: &RemoteKeySet,
        tree: &dyn LocalTree,
        relative: Result<String, SyncError>,
    ) -> Result<Decision, SyncError> {
        let relative = relative?;
        let key = object_key(prefix, &relative);

        if remote.contains(&key) {
            log::trace!("{key}: already present");
            return Ok(Decision::Present);
        }

        log::log!(self.ctx.decision_level(), "Uploading {relative} -> {key}");
        self.transfer(&key, &tree.body(&relative)).await?;
        Ok(Decision::Upload(key))
    }

    /// Uploads the file of `target.dir` chosen by `target.policy` to
    /// `target.key`, replacing whatever is stored there.
    ///
    /// # Errors
    ///
    /// Fails if the directory is unreadable or empty, the selected entry is
    /// not a file, or the upload fails.
    pub async fn backup_snapshot(
        &self,
        target: &SnapshotTarget,
    ) -> Result<SnapshotReport, SyncError> {
        let selected = select_snapshot(&target.dir, target.policy)?;
        log::log!(
            self.ctx.decision_level(),
            "Uploading snapshot {} -> {} ({})",
            selected.display(),
            target.key,
            target.policy
        );

        let transferred = self
            .transfer(&target.key, &UploadBody::File(selected.clone()))
            .await?;

        Ok(SnapshotReport {
            selected,
            key: target.key.clone(),
            transferred,
        })
    }

    /// The only place the store's put is called. Returns `false` when the
    /// upload was suppressed by dry-run.
    async fn transfer(&self, key: &str, body: &UploadBody) -> Result<bool, SyncError> {
        if self.ctx.dry_run {
            log::debug!("{key}: dry run, not uploading");
            return Ok(false);
        }

        with_retry(&self.ctx.retry, &format!("upload {key}"), || {
            self.store.put_object(key, body)
        })
        .await
        .map_err(|source| SyncError::Upload {
            key: key.to_string(),
            source,
        })?;

        log::debug!("{key}: uploaded");
        Ok(true)
    }
}
