use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use serde::Serialize;
use crate::hasher::ContentDigest;

/// Normalized OS notification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawEventKind {
    Created,
    Removed,
    Changed,
}

/// One normalized notification from the event source. Never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFsEvent {
    pub kind: RawEventKind,
    pub path: PathBuf,
}

impl RawFsEvent {
    pub fn new(kind: RawEventKind, path: impl Into<PathBuf>) -> Self {
        Self { kind, path: path.into() }
    }

    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(RawEventKind::Created, path)
    }

    pub fn removed(path: impl Into<PathBuf>) -> Self {
        Self::new(RawEventKind::Removed, path)
    }

    pub fn changed(path: impl Into<PathBuf>) -> Self {
        Self::new(RawEventKind::Changed, path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

impl ChangeKind {
    pub fn label(&self) -> &'static str {
        match self {
            ChangeKind::Added => "ADDED",
            ChangeKind::Removed => "REMOVED",
            ChangeKind::Modified => "MODIFIED",
        }
    }
}

/// A classified change, as delivered to an event sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
    pub timestamp: SystemTime,
    /// Strictly increasing within a session.
    pub sequence: u64,
    /// Digest of the new content for additions and modifications, when readable.
    pub digest: Option<ContentDigest>,
}

impl ChangeEvent {
    pub fn is_added(&self) -> bool {
        self.kind == ChangeKind::Added
    }

    pub fn is_removed(&self) -> bool {
        self.kind == ChangeKind::Removed
    }

    pub fn is_modified(&self) -> bool {
        self.kind == ChangeKind::Modified
    }
}

/// Stamps emitted events so timestamps never go backwards, even when the
/// wall clock does.
#[derive(Debug, Clone)]
pub struct EventClock {
    last: SystemTime,
    sequence: u64,
}

impl Default for EventClock {
    fn default() -> Self {
        Self {
            last: SystemTime::UNIX_EPOCH,
            sequence: 0,
        }
    }
}

impl EventClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stamp(&mut self) -> (SystemTime, u64) {
        self.stamp_at(SystemTime::now())
    }

    fn stamp_at(&mut self, now: SystemTime) -> (SystemTime, u64) {
        let timestamp = if now > self.last {
            now
        } else {
            self.last + Duration::from_nanos(1)
        };
        self.last = timestamp;
        self.sequence += 1;
        (timestamp, self.sequence)
    }

    pub fn event(&mut self, kind: ChangeKind, path: PathBuf, digest: Option<ContentDigest>) -> ChangeEvent {
        let (timestamp, sequence) = self.stamp();
        ChangeEvent {
            kind,
            path,
            timestamp,
            sequence,
            digest,
        }
    }
}
