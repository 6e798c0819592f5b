//! Local inventory: lazy enumeration of the files under a base directory.
//!
//! [`LocalTree`] yields `/`-separated paths relative to the base, one at a
//! time and in no particular order. [`FsTree`] walks a real directory with
//! `walkdir`.

use std::path::{Component, Path, PathBuf};

use bucket_backup_sync_models::KEY_SEPARATOR;
use walkdir::WalkDir;

use crate::{SyncError, UploadBody};

/// Lazy sequence of relative file paths produced by [`LocalTree::files`].
pub type LocalFiles<'a> = Box<dyn Iterator<Item = Result<String, SyncError>> + Send + 'a>;

/// A finite, restartable source of files to back up.
pub trait LocalTree: Send + Sync {
    /// Starts a fresh walk over every file in the tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree's root cannot be read. Errors found
    /// deeper in the walk are yielded as items.
    fn files(&self) -> Result<LocalFiles<'_>, SyncError>;

    /// Upload body for a path previously yielded by [`Self::files`].
    fn body(&self, relative: &str) -> UploadBody;
}

/// A directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsTree {
    base: PathBuf,
}

impl FsTree {
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl LocalTree for FsTree {
    fn files(&self) -> Result<LocalFiles<'_>, SyncError> {
        let meta = std::fs::metadata(&self.base).map_err(|source| SyncError::BaseDir {
            path: self.base.clone(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(SyncError::NotADirectory {
                path: self.base.clone(),
            });
        }

        let walk = WalkDir::new(&self.base)
            .follow_links(false)
            .min_depth(1)
            .into_iter()
            .filter_map(move |entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(source) => {
                        let path = source
                            .path()
                            .map_or_else(|| self.base.clone(), Path::to_path_buf);
                        return Some(Err(SyncError::Walk { path, source }));
                    }
                };

                let file_type = entry.file_type();
                if file_type.is_dir() {
                    return None;
                }
                if file_type.is_symlink() {
                    // Directory symlinks are not descended into.
                    let target = entry.path();
                    if target.is_dir() {
                        return None;
                    }
                    if !target.is_file() {
                        log::warn!(
                            "Skipping {}: symlink does not resolve to a regular file",
                            target.display()
                        );
                        return None;
                    }
                } else if !file_type.is_file() {
                    log::warn!("Skipping {}: not a regular file", entry.path().display());
                    return None;
                }

                Some(relative_path(&self.base, entry.path()))
            });

        Ok(Box::new(walk))
    }

    fn body(&self, relative: &str) -> UploadBody {
        UploadBody::File(self.base.join(relative))
    }
}

/// Renders `path` relative to `base` with [`KEY_SEPARATOR`] between
/// components, regardless of the platform separator.
///
/// # Errors
///
/// Returns [`SyncError::NonUtf8Path`] if a component is not valid UTF-8.
pub fn relative_path(base: &Path, path: &Path) -> Result<String, SyncError> {
    let relative = path.strip_prefix(base).unwrap_or(path);
    let mut out = String::new();

    for component in relative.components() {
        let Component::Normal(part) = component else {
            continue;
        };
        let part = part.to_str().ok_or_else(|| SyncError::NonUtf8Path {
            path: path.to_path_buf(),
        })?;
        if !out.is_empty() {
            out.push(KEY_SEPARATOR);
        }
        out.push_str(part);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "bucket_backup_local_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn collect(tree: &dyn LocalTree) -> BTreeSet<String> {
        tree.files()
            .unwrap()
            .collect::<Result<BTreeSet<_>, _>>()
            .unwrap()
    }

    #[test]
    fn walks_nested_directories() {
        let base = scratch_dir("nested");
        std::fs::create_dir_all(base.join("Artist/Album/Disc 1")).unwrap();
        std::fs::write(base.join("top.txt"), b"a").unwrap();
        std::fs::write(base.join("Artist/Album/cover.jpg"), b"b").unwrap();
        std::fs::write(base.join("Artist/Album/Disc 1/01.flac"), b"c").unwrap();
        std::fs::create_dir_all(base.join("empty")).unwrap();

        let files = collect(&FsTree::new(&base));

        let expected: BTreeSet<String> = [
            "top.txt",
            "Artist/Album/cover.jpg",
            "Artist/Album/Disc 1/01.flac",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(files, expected);

        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn walk_is_restartable() {
        let base = scratch_dir("restart");
        std::fs::write(base.join("a"), b"a").unwrap();
        let tree = FsTree::new(&base);

        assert_eq!(collect(&tree), collect(&tree));

        let _ = std::fs::remove_dir_all(&base);
    }

    #[cfg(unix)]
    #[test]
    fn yields_file_symlinks_but_not_directory_or_broken_ones() {
        let base = scratch_dir("symlinks");
        let outside = scratch_dir("symlinks_outside");
        std::fs::write(outside.join("real.txt"), b"x").unwrap();
        std::fs::write(outside.join("hidden.txt"), b"x").unwrap();

        std::os::unix::fs::symlink(outside.join("real.txt"), base.join("link.txt")).unwrap();
        std::os::unix::fs::symlink(&outside, base.join("linked_dir")).unwrap();
        std::os::unix::fs::symlink(base.join("missing"), base.join("broken")).unwrap();

        let files = collect(&FsTree::new(&base));

        assert_eq!(files, BTreeSet::from(["link.txt".to_string()]));

        let _ = std::fs::remove_dir_all(&base);
        let _ = std::fs::remove_dir_all(&outside);
    }

    #[test]
    fn missing_base_directory_is_an_error() {
        let base = std::env::temp_dir().join("bucket_backup_local_does_not_exist");
        let _ = std::fs::remove_dir_all(&base);

        let err = FsTree::new(&base).files().err().unwrap();

        assert!(matches!(err, SyncError::BaseDir { .. }));
    }

    #[test]
    fn file_as_base_directory_is_an_error() {
        let base = scratch_dir("file_base");
        let file = base.join("plain");
        std::fs::write(&file, b"x").unwrap();

        let err = FsTree::new(&file).files().err().unwrap();

        assert!(matches!(err, SyncError::NotADirectory { .. }));

        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn relative_path_uses_forward_slashes() {
        let base = Path::new("/data/music");
        let path = base.join("Artist").join("Album").join("track.flac");

        assert_eq!(
            relative_path(base, &path).unwrap(),
            "Artist/Album/track.flac"
        );
    }

    #[test]
    fn file_body_points_into_base() {
        let tree = FsTree::new("/data/music");

        assert_eq!(
            tree.body("a/b.mp3"),
            UploadBody::File(PathBuf::from("/data/music/a/b.mp3"))
        );
    }
}
