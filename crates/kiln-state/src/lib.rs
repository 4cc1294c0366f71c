//! Success-marker persistence for kiln fan-out actions.
//!
//! A success directory maps output file names to the hash of the inputs that
//! last produced them: `<dir>/<outputFileName>` holds a single hex line. The
//! presence of a marker with hash `H` means "the last successful run produced
//! this output from inputs hashing to `H`". Markers survive across builds and
//! are written only after every other step of an output's pipeline succeeded,
//! so a partial failure leaves the marker absent and forces a rebuild.
//!
//! # Example
//!
//! ```
//! use kiln_state::SuccessDir;
//! use tempfile::tempdir;
//!
//! let td = tempdir().expect("tempdir");
//! let markers = SuccessDir::new(td.path());
//!
//! markers.record("classes.dex", "a94a8fe5").expect("record");
//! assert_eq!(
//!     markers.recorded_hash("classes.dex").expect("read"),
//!     Some("a94a8fe5".to_string()),
//! );
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Handle on a success-marker directory.
#[derive(Debug, Clone)]
pub struct SuccessDir {
    root: PathBuf,
}

impl SuccessDir {
    /// Wrap a directory path. The directory is created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the marker file for one output name.
    pub fn marker_path(&self, output_name: &str) -> PathBuf {
        self.root.join(output_name)
    }

    /// Read the recorded input hash for an output, if a marker exists.
    ///
    /// Only the first line counts; anything after it is ignored.
    pub fn recorded_hash(&self, output_name: &str) -> Result<Option<String>> {
        let path = self.marker_path(output_name);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read success marker {}", path.display()))?;
        Ok(content.lines().next().map(|line| line.trim().to_string()))
    }

    /// Record the input hash for an output, replacing any previous marker.
    ///
    /// The write is atomic: a temp file in the same directory is renamed over
    /// the marker so a crash never leaves a truncated hash behind.
    pub fn record(&self, output_name: &str, hash: &str) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create success dir {}", self.root.display()))?;
        let path = self.marker_path(output_name);
        let tmp = self.root.join(format!(".{output_name}.tmp"));
        fs::write(&tmp, hash)
            .with_context(|| format!("failed to write success marker {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| {
            format!("failed to finalize success marker {}", path.display())
        })?;
        Ok(())
    }

    /// Remove the marker for an output; missing markers are fine.
    pub fn remove(&self, output_name: &str) -> Result<()> {
        let path = self.marker_path(output_name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("failed to remove success marker {}", path.display())),
        }
    }

    /// All recorded markers, name → hash, in name order.
    pub fn entries(&self) -> Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        if !self.root.exists() {
            return Ok(out);
        }
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("failed to list success dir {}", self.root.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            if let Some(hash) = self.recorded_hash(&name)? {
                out.insert(name, hash);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn record_and_read_back() {
        let td = tempdir().expect("tempdir");
        let markers = SuccessDir::new(td.path().join("success"));

        assert_eq!(markers.recorded_hash("classes.dex").expect("read"), None);
        markers.record("classes.dex", "abc123").expect("record");
        assert_eq!(
            markers.recorded_hash("classes.dex").expect("read"),
            Some("abc123".to_string())
        );
    }

    #[test]
    fn record_replaces_previous_hash() {
        let td = tempdir().expect("tempdir");
        let markers = SuccessDir::new(td.path());

        markers.record("out.dex.jar", "old").expect("record");
        markers.record("out.dex.jar", "new").expect("record");
        assert_eq!(
            markers.recorded_hash("out.dex.jar").expect("read"),
            Some("new".to_string())
        );
    }

    #[test]
    fn only_first_line_counts() {
        let td = tempdir().expect("tempdir");
        let markers = SuccessDir::new(td.path());
        std::fs::write(td.path().join("x.dex"), "first\nsecond\n").expect("write");
        assert_eq!(
            markers.recorded_hash("x.dex").expect("read"),
            Some("first".to_string())
        );
    }

    #[test]
    fn remove_is_idempotent() {
        let td = tempdir().expect("tempdir");
        let markers = SuccessDir::new(td.path());
        markers.record("a.dex", "h").expect("record");
        markers.remove("a.dex").expect("remove");
        markers.remove("a.dex").expect("remove again");
        assert_eq!(markers.recorded_hash("a.dex").expect("read"), None);
    }

    #[test]
    fn entries_lists_markers_sorted() {
        let td = tempdir().expect("tempdir");
        let markers = SuccessDir::new(td.path());
        markers.record("b.dex", "h2").expect("record");
        markers.record("a.dex", "h1").expect("record");

        let all = markers.entries().expect("entries");
        let names: Vec<&String> = all.keys().collect();
        assert_eq!(names, ["a.dex", "b.dex"]);
        assert_eq!(all["a.dex"], "h1");
    }

    #[test]
    fn missing_dir_reads_as_empty() {
        let td = tempdir().expect("tempdir");
        let markers = SuccessDir::new(td.path().join("never-created"));
        assert!(markers.entries().expect("entries").is_empty());
    }
}
