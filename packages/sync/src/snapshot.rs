//! Snapshot selection: picking the single "latest" file out of a backups
//! directory.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bucket_backup_sync_models::SnapshotPolicy;

use crate::SyncError;

struct Candidate {
    path: PathBuf,
    modified: Option<SystemTime>,
}

/// Selects the entry of `dir` that `policy` considers most recent.
///
/// Every entry of the directory takes part in the selection; the winner must
/// then be a regular file (or a symlink to one).
///
/// # Errors
///
/// * [`SyncError::SnapshotDir`] if the directory cannot be read.
/// * [`SyncError::EmptySnapshotDir`] if it has no entries.
/// * [`SyncError::SnapshotNotFile`] if the selected entry is not a file.
pub fn select_snapshot(dir: &Path, policy: SnapshotPolicy) -> Result<PathBuf, SyncError> {
    let io_err = |source| SyncError::SnapshotDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let modified = match policy {
            SnapshotPolicy::LexicographicMax => None,
            SnapshotPolicy::NewestModified => {
                Some(std::fs::metadata(&path).and_then(|m| m.modified()).map_err(io_err)?)
            }
        };
        candidates.push(Candidate { path, modified });
    }

    let selected = candidates
        .into_iter()
        .max_by(|a, b| {
            a.modified
                .cmp(&b.modified)
                .then_with(|| a.path.file_name().cmp(&b.path.file_name()))
        })
        .ok_or_else(|| SyncError::EmptySnapshotDir {
            path: dir.to_path_buf(),
        })?;

    if !selected.path.is_file() {
        return Err(SyncError::SnapshotNotFile {
            path: selected.path,
        });
    }

    Ok(selected.path)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "bucket_backup_snapshot_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn picks_lexicographic_maximum() {
        let dir = scratch_dir("lexmax");
        for name in ["2024-01-01.sql.gz", "2024-03-15.sql.gz", "2024-02-10.sql.gz"] {
            std::fs::write(dir.join(name), name).unwrap();
        }

        let selected = select_snapshot(&dir, SnapshotPolicy::LexicographicMax).unwrap();

        assert_eq!(selected, dir.join("2024-03-15.sql.gz"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = scratch_dir("empty");

        let err = select_snapshot(&dir, SnapshotPolicy::LexicographicMax).unwrap_err();

        assert!(matches!(err, SyncError::EmptySnapshotDir { .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = std::env::temp_dir().join("bucket_backup_snapshot_missing_dir");
        let _ = std::fs::remove_dir_all(&dir);

        let err = select_snapshot(&dir, SnapshotPolicy::LexicographicMax).unwrap_err();

        assert!(matches!(err, SyncError::SnapshotDir { .. }));
    }

    #[test]
    fn selected_directory_is_an_error() {
        let dir = scratch_dir("subdir");
        std::fs::write(dir.join("2024-01-01.sql.gz"), b"x").unwrap();
        std::fs::create_dir(dir.join("zz-archive")).unwrap();

        let err = select_snapshot(&dir, SnapshotPolicy::LexicographicMax).unwrap_err();

        assert!(matches!(err, SyncError::SnapshotNotFile { .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn newest_modified_ignores_names() {
        let dir = scratch_dir("mtime");
        let old = dir.join("zzz-old.sql.gz");
        let new = dir.join("aaa-new.sql.gz");
        std::fs::write(&old, b"old").unwrap();
        std::fs::write(&new, b"new").unwrap();

        let now = SystemTime::now();
        std::fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(now - Duration::from_secs(3600))
            .unwrap();
        std::fs::File::options()
            .write(true)
            .open(&new)
            .unwrap()
            .set_modified(now)
            .unwrap();

        let selected = select_snapshot(&dir, SnapshotPolicy::NewestModified).unwrap();

        assert_eq!(selected, new);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
