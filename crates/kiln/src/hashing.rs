//! Content hashing for rule keys and fan-out input gates.
//!
//! All fingerprints in kiln are SHA-1 hex digests. Collision resistance
//! against benign input is sufficient for cache keying, and the short
//! digests keep success markers and log lines readable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use sha1::{Digest, Sha1};

/// SHA-1 of a byte slice as lowercase hex.
pub fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Provider of per-file content hashes.
///
/// Rule-key computation and the fan-out planner both consult a hasher; the
/// planner expects a memoized snapshot rather than a live view, which both
/// implementations here satisfy.
pub trait ContentHasher: Send + Sync {
    /// Hash of the file's content as lowercase hex.
    ///
    /// Relative paths are resolved against the implementation's root.
    fn hash_file(&self, path: &Path) -> Result<String>;
}

/// Memoizing [`ContentHasher`] backed by the real filesystem.
///
/// Each file is read and hashed at most once per build session; the snapshot
/// is never invalidated within a session.
#[derive(Debug)]
pub struct FileHashCache {
    root: PathBuf,
    memo: Mutex<BTreeMap<PathBuf, String>>,
}

impl FileHashCache {
    /// Create a cache resolving relative paths against `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            memo: Mutex::new(BTreeMap::new()),
        }
    }
}

impl ContentHasher for FileHashCache {
    fn hash_file(&self, path: &Path) -> Result<String> {
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        if let Some(hash) = self.memo.lock().unwrap().get(&resolved) {
            return Ok(hash.clone());
        }
        let bytes = std::fs::read(&resolved)
            .with_context(|| format!("failed to read {} for hashing", resolved.display()))?;
        let hash = sha1_hex(&bytes);
        self.memo
            .lock()
            .unwrap()
            .insert(resolved, hash.clone());
        Ok(hash)
    }
}

/// Fixed hash table, for tests and for callers that pre-record input hashes.
#[derive(Debug, Default, Clone)]
pub struct FixedHashes {
    hashes: BTreeMap<PathBuf, String>,
}

impl FixedHashes {
    /// Build from `(path, hash)` pairs.
    pub fn new<I, P, H>(entries: I) -> Self
    where
        I: IntoIterator<Item = (P, H)>,
        P: Into<PathBuf>,
        H: Into<String>,
    {
        Self {
            hashes: entries
                .into_iter()
                .map(|(p, h)| (p.into(), h.into()))
                .collect(),
        }
    }

    /// Record one more hash.
    pub fn insert(&mut self, path: impl Into<PathBuf>, hash: impl Into<String>) {
        self.hashes.insert(path.into(), hash.into());
    }
}

impl ContentHasher for FixedHashes {
    fn hash_file(&self, path: &Path) -> Result<String> {
        match self.hashes.get(path) {
            Some(hash) => Ok(hash.clone()),
            None => bail!("no recorded content hash for {}", path.display()),
        }
    }
}
