use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use crate::hasher::Fingerprint;

/// One tracked file.
#[derive(Debug, Clone)]
pub struct WatchedFile {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
}

/// Last known fingerprint of every file under the watch root.
///
/// Only the classifier mutates a live store; the baseline builder fills one
/// before it is handed over.
#[derive(Debug, Clone, Default)]
pub struct ChangeStore {
    entries: BTreeMap<PathBuf, Fingerprint>,
}

impl ChangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&Fingerprint> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    /// Insert or overwrite, returning the previous fingerprint.
    pub fn insert(&mut self, path: PathBuf, fingerprint: Fingerprint) -> Option<Fingerprint> {
        self.entries.insert(path, fingerprint)
    }

    pub fn remove(&mut self, path: &Path) -> Option<Fingerprint> {
        self.entries.remove(path)
    }

    /// Tracked paths strictly below `dir`, in path order.
    pub fn paths_under(&self, dir: &Path) -> Vec<PathBuf> {
        self.entries
            .range::<Path, _>((std::ops::Bound::Excluded(dir), std::ops::Bound::Unbounded))
            .map(|(path, _)| path)
            .take_while(|path| path.starts_with(dir))
            .cloned()
            .collect()
    }

    /// Drop every entry below `dir` and return the removed paths.
    pub fn remove_under(&mut self, dir: &Path) -> Vec<PathBuf> {
        let paths = self.paths_under(dir);
        for path in &paths {
            self.entries.remove(path);
        }
        paths
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &Fingerprint)> {
        self.entries.iter().map(|(path, fp)| (path.as_path(), fp))
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.keys().map(PathBuf::as_path)
    }

    pub fn watched_files(&self) -> Vec<WatchedFile> {
        self.entries
            .iter()
            .map(|(path, fingerprint)| WatchedFile {
                path: path.clone(),
                fingerprint: *fingerprint,
            })
            .collect()
    }
}

impl FromIterator<(PathBuf, Fingerprint)> for ChangeStore {
    fn from_iter<I: IntoIterator<Item = (PathBuf, Fingerprint)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl Extend<(PathBuf, Fingerprint)> for ChangeStore {
    fn extend<I: IntoIterator<Item = (PathBuf, Fingerprint)>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::ContentDigest;

    fn known(content: &str) -> Fingerprint {
        Fingerprint::Known(ContentDigest::of_bytes(content.as_bytes()))
    }

    #[test]
    fn test_insert_and_remove() {
        let mut store = ChangeStore::new();
        assert!(store.insert(PathBuf::from("/r/a.txt"), known("a")).is_none());
        assert!(store.insert(PathBuf::from("/r/a.txt"), known("b")).is_some());
        assert_eq!(store.len(), 1);

        assert!(store.remove(Path::new("/r/a.txt")).is_some());
        assert!(store.remove(Path::new("/r/a.txt")).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_under_only_touches_subtree() {
        let mut store: ChangeStore = [
            (PathBuf::from("/r/dir/a.txt"), known("a")),
            (PathBuf::from("/r/dir/nested/b.txt"), known("b")),
            (PathBuf::from("/r/dir-sibling.txt"), known("c")),
            (PathBuf::from("/r/dirx/d.txt"), known("d")),
            (PathBuf::from("/r/e.txt"), Fingerprint::Unknown),
        ]
        .into_iter()
        .collect();

        let removed = store.remove_under(Path::new("/r/dir"));

        assert_eq!(
            removed,
            vec![PathBuf::from("/r/dir/a.txt"), PathBuf::from("/r/dir/nested/b.txt")]
        );
        assert_eq!(store.len(), 3);
        assert!(store.contains(Path::new("/r/dir-sibling.txt")));
        assert!(store.contains(Path::new("/r/dirx/d.txt")));
    }

    #[test]
    fn test_watched_files_in_path_order() {
        let store: ChangeStore = [
            (PathBuf::from("/r/b"), known("b")),
            (PathBuf::from("/r/a"), Fingerprint::Unknown),
        ]
        .into_iter()
        .collect();

        let files = store.watched_files();
        assert_eq!(files[0].path, PathBuf::from("/r/a"));
        assert!(files[0].fingerprint.is_unknown());
        assert_eq!(files[1].fingerprint.digest(), Some(ContentDigest::of_bytes(b"b")));
    }
}
