pub mod baseline;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod hasher;
pub mod sink;
pub mod source;
pub mod store;
pub mod watcher;

pub use baseline::build_baseline;
pub use classifier::{Classifier, Outcome, Suppression};
pub use config::HashWatchConfig;
pub use error::{HashError, SinkClosed, WatchError};
pub use events::*;
pub use hasher::{ContentDigest, Fingerprint, Hasher};
pub use sink::{EventSink, FnSink};
pub use store::{ChangeStore, WatchedFile};
pub use watcher::*;
