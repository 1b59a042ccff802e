//! Error types shared by the watcher components

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A file whose content could not be read to the end.
///
/// This is never fatal: callers record the file with an unknown fingerprint.
#[derive(Debug, Error)]
pub enum HashError {
    #[error("cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors that prevent a watch session from starting or stopping cleanly.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch root does not exist: {}", .0.display())]
    RootMissing(PathBuf),

    #[error("watch root is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("watch root is not accessible: {}: {source}", path.display())]
    RootInaccessible {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to subscribe to filesystem notifications")]
    Subscribe(#[from] notify::Error),

    #[error("{0} thread panicked")]
    WorkerPanicked(&'static str),
}

/// The consumer behind an [`EventSink`](crate::sink::EventSink) went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event sink closed")]
pub struct SinkClosed;
