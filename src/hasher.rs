//! Content fingerprints
//!
//! Files are streamed through SHA-256 in fixed-size chunks, so arbitrarily
//! large files never have to fit in memory.

use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::time::SystemTime;
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use crate::config::HasherConfig;
use crate::error::HashError;

/// A SHA-256 digest of a file's full content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn short(&self) -> String {
        self.to_string()[..12].to_string()
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.short())
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Last known state of a file's content.
///
/// `Unknown` is recorded when the file exists but could not be read. It is
/// deliberately not `PartialEq`: use [`Fingerprint::compare`].
#[derive(Debug, Clone, Copy)]
pub enum Fingerprint {
    Known(ContentDigest),
    Unknown,
}

/// Result of comparing a stored fingerprint with a fresh observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Same,
    Different,
    /// The fresh read failed; nothing can be said about the content.
    Inconclusive,
}

impl Fingerprint {
    pub fn digest(&self) -> Option<ContentDigest> {
        match self {
            Fingerprint::Known(digest) => Some(*digest),
            Fingerprint::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Fingerprint::Unknown)
    }

    /// Compare `self` (stored) against `fresh` (just observed).
    pub fn compare(&self, fresh: &Fingerprint) -> Comparison {
        match (self, fresh) {
            (_, Fingerprint::Unknown) => Comparison::Inconclusive,
            (Fingerprint::Unknown, Fingerprint::Known(_)) => Comparison::Different,
            (Fingerprint::Known(old), Fingerprint::Known(new)) if old == new => Comparison::Same,
            (Fingerprint::Known(_), Fingerprint::Known(_)) => Comparison::Different,
        }
    }
}

impl From<Result<ContentDigest, HashError>> for Fingerprint {
    fn from(result: Result<ContentDigest, HashError>) -> Self {
        match result {
            Ok(digest) => Fingerprint::Known(digest),
            Err(err) => {
                tracing::debug!("{}", err);
                Fingerprint::Unknown
            }
        }
    }
}

/// Streams `path` through SHA-256 using a buffer of `buffer_size` bytes.
pub fn hash_file(path: &Path, buffer_size: usize) -> Result<ContentDigest, HashError> {
    let unreadable = |source| HashError::Unreadable {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(unreadable)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; buffer_size.max(1)];

    loop {
        let n = file.read(&mut buffer).map_err(unreadable)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(ContentDigest(hasher.finalize().into()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatStamp {
    len: u64,
    modified: Option<SystemTime>,
}

fn stat_stamp(path: &Path) -> Option<StatStamp> {
    fs::metadata(path).ok().map(|meta| StatStamp {
        len: meta.len(),
        modified: meta.modified().ok(),
    })
}

/// Fingerprints files, re-reading when a concurrent writer is detected.
#[derive(Debug, Clone)]
pub struct Hasher {
    buffer_size: usize,
    stable_read_attempts: u32,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new(&HasherConfig::default())
    }
}

impl Hasher {
    pub fn new(config: &HasherConfig) -> Self {
        Self {
            buffer_size: config.buffer_size,
            stable_read_attempts: config.stable_read_attempts.max(1),
        }
    }

    pub fn hash(&self, path: &Path) -> Result<ContentDigest, HashError> {
        hash_file(path, self.buffer_size)
    }

    /// Hash `path`, retrying while its size or mtime moves underneath the read.
    ///
    /// A read counts as settled when the stat taken before it matches the one
    /// taken after, including when both fail. If the file never settles the
    /// last digest wins; the next change notification for the path will pick
    /// up whatever follows.
    pub fn fingerprint(&self, path: &Path) -> Fingerprint {
        self.fingerprint_with(path, stat_stamp)
    }

    fn fingerprint_with<F>(&self, path: &Path, mut stat: F) -> Fingerprint
    where
        F: FnMut(&Path) -> Option<StatStamp>,
    {
        let mut last = Fingerprint::Unknown;

        for attempt in 1..=self.stable_read_attempts {
            let before = stat(path);
            let result = self.hash(path);
            let after = stat(path);

            if result.is_err() || before == after {
                return result.into();
            }

            tracing::debug!(
                "{} changed while hashing (attempt {}/{})",
                path.display(),
                attempt,
                self.stable_read_attempts
            );
            last = result.into();
        }

        last
    }
}
