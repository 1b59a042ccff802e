//! Initial snapshot of the watch root
//!
//! Every regular file below the root is fingerprinted. Symlinks are never
//! followed and never tracked, so link cycles cannot occur.

use std::io;
use std::path::{Path, PathBuf};
use ignore::WalkBuilder;
use crate::error::WatchError;
use crate::hasher::Hasher;
use crate::store::ChangeStore;

/// Canonicalize `root` and check that it is a directory.
pub fn resolve_root<P: AsRef<Path>>(root: P) -> Result<PathBuf, WatchError> {
    let root = root.as_ref();
    let canonical = root.canonicalize().map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => WatchError::RootMissing(root.to_path_buf()),
        _ => WatchError::RootInaccessible {
            path: root.to_path_buf(),
            source,
        },
    })?;

    let metadata = std::fs::metadata(&canonical).map_err(|source| WatchError::RootInaccessible {
        path: canonical.clone(),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(WatchError::NotADirectory(canonical));
    }

    // An unreadable root would silently produce an empty baseline.
    std::fs::read_dir(&canonical).map_err(|source| WatchError::RootInaccessible {
        path: canonical.clone(),
        source,
    })?;

    Ok(canonical)
}

/// All regular files below `dir`, without applying any ignore rules.
pub fn walk_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for result in WalkBuilder::new(dir)
        .standard_filters(false)
        .follow_links(false)
        .build()
    {
        match result {
            Ok(entry) => {
                if entry.file_type().map_or(false, |ft| ft.is_file()) {
                    files.push(entry.into_path());
                }
            }
            Err(err) => {
                tracing::warn!("Error walking directory: {}", err);
            }
        }
    }

    files
}

/// Fingerprint every regular file under `root`.
///
/// Unreadable files are kept with an unknown fingerprint so a later change
/// notification can still settle them.
pub fn build_baseline(root: &Path, hasher: &Hasher) -> Result<ChangeStore, WatchError> {
    let root = resolve_root(root)?;
    Ok(scan(&root, hasher))
}

/// Same as [`build_baseline`] for a root that has already been resolved.
pub(crate) fn scan(root: &Path, hasher: &Hasher) -> ChangeStore {
    let store: ChangeStore = walk_files(root)
        .into_iter()
        .map(|path| {
            let fingerprint = hasher.fingerprint(&path);
            (path, fingerprint)
        })
        .collect();

    let unknown = store.iter().filter(|(_, fp)| fp.is_unknown()).count();
    tracing::debug!(
        "Scanned {}: {} files ({} unreadable)",
        root.display(),
        store.len(),
        unknown
    );

    store
}
