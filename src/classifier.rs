//! Change classification
//!
//! Turns normalized notifications into added / removed / modified events,
//! suppressing everything that does not reflect a real content change. The
//! classifier is the only writer of its [`ChangeStore`].

use std::fs;
use std::path::{Path, PathBuf};
use crate::baseline;
use crate::events::{ChangeEvent, ChangeKind, EventClock, RawEventKind, RawFsEvent};
use crate::hasher::{Comparison, Fingerprint, Hasher};
use crate::store::ChangeStore;

/// Why a notification produced no event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    /// Content is byte-for-byte what the store already holds.
    Unchanged,
    /// The file could not be read, so its content is unknown.
    Inconclusive,
    /// Removal of a path that is not tracked.
    AlreadyAbsent,
    /// The path vanished before it could be inspected.
    Vanished,
    /// Directories, symlinks and other non-regular entries.
    NotAFile,
}

/// Classification of a single notification.
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Added(Fingerprint),
    Modified(Fingerprint),
    Removed,
    Suppressed(Suppression),
}

enum Entry {
    File,
    Dir,
    Other,
    Missing,
}

fn inspect(path: &Path) -> Entry {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_file() => Entry::File,
        Ok(meta) if meta.file_type().is_dir() => Entry::Dir,
        Ok(_) => Entry::Other,
        Err(_) => Entry::Missing,
    }
}

pub struct Classifier {
    root: PathBuf,
    store: ChangeStore,
    hasher: Hasher,
    clock: EventClock,
}

impl Classifier {
    /// `root` must already be resolved and `store` built from it.
    pub fn new(root: PathBuf, store: ChangeStore, hasher: Hasher) -> Self {
        Self {
            root,
            store,
            hasher,
            clock: EventClock::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &ChangeStore {
        &self.store
    }

    pub fn into_store(self) -> ChangeStore {
        self.store
    }

    /// Decide what `event` means without touching the store.
    pub fn decide(&self, event: &RawFsEvent) -> Outcome {
        let path = event.path.as_path();
        match event.kind {
            RawEventKind::Removed => {
                if self.store.contains(path) {
                    Outcome::Removed
                } else {
                    Outcome::Suppressed(Suppression::AlreadyAbsent)
                }
            }
            RawEventKind::Created | RawEventKind::Changed => match inspect(path) {
                Entry::Missing => Outcome::Suppressed(Suppression::Vanished),
                // A tracked file replaced by a directory or symlink is gone.
                Entry::Dir | Entry::Other if self.store.contains(path) => Outcome::Removed,
                Entry::Dir | Entry::Other => Outcome::Suppressed(Suppression::NotAFile),
                Entry::File => self.compare_with_store(path),
            },
        }
    }

    fn compare_with_store(&self, path: &Path) -> Outcome {
        let fresh = self.hasher.fingerprint(path);
        match self.store.get(path) {
            None => Outcome::Added(fresh),
            Some(stored) => match stored.compare(&fresh) {
                Comparison::Different => Outcome::Modified(fresh),
                Comparison::Same => Outcome::Suppressed(Suppression::Unchanged),
                Comparison::Inconclusive => Outcome::Suppressed(Suppression::Inconclusive),
            },
        }
    }

    /// Apply `outcome` for `path` to the store and produce the event, if any.
    fn commit(&mut self, path: &Path, outcome: Outcome) -> Option<ChangeEvent> {
        let kind = match outcome {
            Outcome::Added(fingerprint) => {
                self.store.insert(path.to_path_buf(), fingerprint);
                ChangeKind::Added
            }
            Outcome::Modified(fingerprint) => {
                self.store.insert(path.to_path_buf(), fingerprint);
                ChangeKind::Modified
            }
            Outcome::Removed => {
                self.store.remove(path);
                ChangeKind::Removed
            }
            Outcome::Suppressed(reason) => {
                tracing::debug!("Suppressed {}: {:?}", path.display(), reason);
                return None;
            }
        };

        let digest = match outcome {
            Outcome::Added(fp) | Outcome::Modified(fp) => fp.digest(),
            Outcome::Removed | Outcome::Suppressed(_) => None,
        };
        let event = self.clock.event(kind, path.to_path_buf(), digest);
        tracing::debug!("{} {}", event.kind.label(), path.display());
        Some(event)
    }

    /// Classify one notification for a single path, updating the store.
    pub fn classify(&mut self, event: &RawFsEvent) -> Option<ChangeEvent> {
        let outcome = self.decide(event);
        self.commit(&event.path, outcome)
    }

    /// Classify a notification that may name a directory.
    ///
    /// A new directory yields an addition for every file already inside it;
    /// removing a directory removes every tracked file beneath it.
    pub fn apply(&mut self, event: &RawFsEvent) -> Vec<ChangeEvent> {
        let path = event.path.as_path();
        match event.kind {
            RawEventKind::Created if matches!(inspect(path), Entry::Dir) => {
                let mut events: Vec<ChangeEvent> = self.classify(event).into_iter().collect();
                events.extend(
                    baseline::walk_files(path)
                        .into_iter()
                        .filter_map(|file| self.classify(&RawFsEvent::created(file))),
                );
                events
            }
            RawEventKind::Removed if !self.store.contains(path) => {
                let removed = self.store.remove_under(path);
                if removed.is_empty() {
                    tracing::debug!("Suppressed {}: {:?}", path.display(), Suppression::AlreadyAbsent);
                }
                removed
                    .into_iter()
                    .map(|file| self.clock.event(ChangeKind::Removed, file, None))
                    .collect()
            }
            _ => self.classify(event).into_iter().collect(),
        }
    }

    /// Rescan the root and reconcile the store with what is on disk,
    /// returning an event for every difference.
    ///
    /// Used after notifications may have been lost. If the root can no
    /// longer be scanned the store is left untouched.
    pub fn resync(&mut self) -> Vec<ChangeEvent> {
        if let Err(err) = baseline::resolve_root(&self.root) {
            tracing::warn!("Resync skipped: {}", err);
            return Vec::new();
        }

        let fresh = baseline::scan(&self.root, &self.hasher);
        let mut events = Vec::new();

        let gone: Vec<PathBuf> = self
            .store
            .paths()
            .filter(|path| !fresh.contains(path))
            .map(Path::to_path_buf)
            .collect();
        for path in gone {
            self.store.remove(&path);
            events.push(self.clock.event(ChangeKind::Removed, path, None));
        }

        for (path, fingerprint) in fresh.iter() {
            let outcome = match self.store.get(path) {
                None => Outcome::Added(*fingerprint),
                Some(stored) => match stored.compare(fingerprint) {
                    Comparison::Different => Outcome::Modified(*fingerprint),
                    Comparison::Same => Outcome::Suppressed(Suppression::Unchanged),
                    Comparison::Inconclusive => Outcome::Suppressed(Suppression::Inconclusive),
                },
            };
            events.extend(self.commit(path, outcome));
        }

        tracing::info!(
            "Resynchronized {}: {} files, {} changes",
            self.root.display(),
            self.store.len(),
            events.len()
        );
        events
    }
}
