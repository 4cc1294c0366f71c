//! Action cache interface.
//!
//! A key-value store keyed by rule key, off the critical path: a hit
//! restores a rule's recorded outputs without running any steps, and both
//! misses and fetch errors fall through to local execution. Implementations
//! beyond the in-memory one are expected to live outside the core.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use kiln_types::BuildTarget;
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactFilesystem;
use crate::rulekey::RuleKey;

/// Payload of one cached output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactPayload {
    Bytes(Vec<u8>),
    Symlink(PathBuf),
}

/// The recorded outputs of one successful rule execution, keyed by output
/// name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSet {
    files: BTreeMap<String, ArtifactPayload>,
}

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one output.
    pub fn insert(&mut self, name: impl Into<String>, payload: ArtifactPayload) {
        self.files.insert(name.into(), payload);
    }

    pub fn get(&self, name: &str) -> Option<&ArtifactPayload> {
        self.files.get(name)
    }

    /// Output names in order.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.files.keys()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Read a rule's declared outputs off disk into a set.
    pub fn collect(
        filesystem: &ArtifactFilesystem,
        target: &BuildTarget,
        output_names: &[String],
    ) -> Result<ArtifactSet> {
        let mut set = ArtifactSet::new();
        for name in output_names {
            let path = filesystem.output_path(target, name);
            let bytes = std::fs::read(&path).with_context(|| {
                format!("failed to read output {} of {target}", path.display())
            })?;
            set.insert(name.clone(), ArtifactPayload::Bytes(bytes));
        }
        Ok(set)
    }

    /// Write the set back to a rule's output directory.
    pub fn restore(&self, filesystem: &ArtifactFilesystem, target: &BuildTarget) -> Result<()> {
        for (name, payload) in &self.files {
            let path = filesystem.output_path(target, name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create directory {}", parent.display())
                })?;
            }
            match payload {
                ArtifactPayload::Bytes(bytes) => {
                    std::fs::write(&path, bytes).with_context(|| {
                        format!("failed to restore output {}", path.display())
                    })?;
                }
                #[cfg(unix)]
                ArtifactPayload::Symlink(dest) => {
                    if path.exists() {
                        std::fs::remove_file(&path).with_context(|| {
                            format!("failed to replace {}", path.display())
                        })?;
                    }
                    std::os::unix::fs::symlink(dest, &path).with_context(|| {
                        format!("failed to restore symlink {}", path.display())
                    })?;
                }
                #[cfg(not(unix))]
                ArtifactPayload::Symlink(dest) => {
                    anyhow::bail!(
                        "cannot restore symlink {} -> {} on this platform",
                        path.display(),
                        dest.display()
                    );
                }
            }
        }
        Ok(())
    }
}

/// Fetch/store by rule key.
///
/// Misses and fetch errors are indistinguishable by design; implementations
/// swallow errors and return `None`. `store` is idempotent, last writer wins
/// per key.
pub trait ActionCache: Send + Sync {
    fn fetch(&self, key: &RuleKey) -> Option<ArtifactSet>;
    fn store(&self, key: &RuleKey, artifacts: ArtifactSet);
}

/// Cache that never hits and never stores.
#[derive(Debug, Default)]
pub struct NoopCache;

impl ActionCache for NoopCache {
    fn fetch(&self, _key: &RuleKey) -> Option<ArtifactSet> {
        None
    }

    fn store(&self, _key: &RuleKey, _artifacts: ArtifactSet) {}
}

/// In-memory cache, useful in tests and for warm rebuilds within a session.
#[derive(Debug, Default)]
pub struct MemoryCache {
    inner: Mutex<BTreeMap<String, ArtifactSet>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

impl ActionCache for MemoryCache {
    fn fetch(&self, key: &RuleKey) -> Option<ArtifactSet> {
        self.inner.lock().unwrap().get(key.as_hex()).cloned()
    }

    fn store(&self, key: &RuleKey, artifacts: ArtifactSet) {
        self.inner
            .lock()
            .unwrap()
            .insert(key.as_hex().to_string(), artifacts);
    }
}
