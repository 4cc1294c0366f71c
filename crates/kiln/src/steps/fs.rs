//! Pure filesystem steps: make directory, write file, copy, remove,
//! concatenate.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::step::{Step, StepContext};

/// Create a directory and all missing parents.
#[derive(Debug, Clone)]
pub struct MakeDirStep {
    pub path: PathBuf,
}

impl MakeDirStep {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Step for MakeDirStep {
    fn short_name(&self) -> &str {
        "mkdir"
    }

    fn description(&self) -> String {
        format!("mkdir -p {}", self.path.display())
    }

    fn execute(&self, _ctx: &StepContext) -> Result<()> {
        fs::create_dir_all(&self.path)
            .with_context(|| format!("failed to create directory {}", self.path.display()))
    }
}

/// Write bytes to a file, creating parent directories.
#[derive(Debug, Clone)]
pub struct WriteFileStep {
    pub path: PathBuf,
    pub contents: Vec<u8>,
}

impl WriteFileStep {
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

impl Step for WriteFileStep {
    fn short_name(&self) -> &str {
        "write-file"
    }

    fn description(&self) -> String {
        format!("write {} bytes to {}", self.contents.len(), self.path.display())
    }

    fn execute(&self, _ctx: &StepContext) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        fs::write(&self.path, &self.contents)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

/// Copy one file, creating the destination's parent directories.
#[derive(Debug, Clone)]
pub struct CopyFileStep {
    pub from: PathBuf,
    pub to: PathBuf,
}

impl CopyFileStep {
    pub fn new(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl Step for CopyFileStep {
    fn short_name(&self) -> &str {
        "copy"
    }

    fn description(&self) -> String {
        format!("copy {} -> {}", self.from.display(), self.to.display())
    }

    fn execute(&self, _ctx: &StepContext) -> Result<()> {
        if let Some(parent) = self.to.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        fs::copy(&self.from, &self.to).with_context(|| {
            format!(
                "failed to copy {} to {}",
                self.from.display(),
                self.to.display()
            )
        })?;
        Ok(())
    }
}

/// Remove one file.
#[derive(Debug, Clone)]
pub struct RemoveFileStep {
    pub path: PathBuf,
    /// Treat a missing file as success.
    pub ignore_missing: bool,
}

impl RemoveFileStep {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ignore_missing: false,
        }
    }

    pub fn ignoring_missing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ignore_missing: true,
        }
    }
}

impl Step for RemoveFileStep {
    fn short_name(&self) -> &str {
        "rm"
    }

    fn description(&self) -> String {
        format!("rm {}", self.path.display())
    }

    fn execute(&self, _ctx: &StepContext) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound && self.ignore_missing => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("failed to remove {}", self.path.display()))
            }
        }
    }
}

/// Concatenate input files, in order, into one output file.
#[derive(Debug, Clone)]
pub struct ConcatStep {
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
}

impl ConcatStep {
    pub fn new(inputs: Vec<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            inputs,
            output: output.into(),
        }
    }
}

impl Step for ConcatStep {
    fn short_name(&self) -> &str {
        "concat"
    }

    fn description(&self) -> String {
        format!(
            "concat {} files into {}",
            self.inputs.len(),
            self.output.display()
        )
    }

    fn execute(&self, _ctx: &StepContext) -> Result<()> {
        if let Some(parent) = self.output.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let mut writer = BufWriter::new(
            File::create(&self.output)
                .with_context(|| format!("failed to create {}", self.output.display()))?,
        );
        for input in &self.inputs {
            let mut reader = File::open(input)
                .with_context(|| format!("failed to open {}", input.display()))?;
            io::copy(&mut reader, &mut writer).with_context(|| {
                format!(
                    "failed to append {} to {}",
                    input.display(),
                    self.output.display()
                )
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;
    use crate::artifact::ArtifactFilesystem;
    use crate::testing::FakeDexToolchain;

    fn ctx(root: &std::path::Path) -> StepContext {
        StepContext::new(
            Arc::new(ArtifactFilesystem::new(root)),
            Arc::new(FakeDexToolchain::new()),
        )
    }

    #[test]
    fn write_creates_parents() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("a/b/marker.txt");
        let step = WriteFileStep::new(&path, "deadbeef");
        step.execute(&ctx(td.path())).expect("execute");
        assert_eq!(fs::read_to_string(&path).expect("read"), "deadbeef");
    }

    #[test]
    fn copy_and_remove() {
        let td = tempdir().expect("tempdir");
        let src = td.path().join("src.jar");
        let dst = td.path().join("out/dst.jar");
        fs::write(&src, b"jarbytes").expect("write");

        CopyFileStep::new(&src, &dst)
            .execute(&ctx(td.path()))
            .expect("copy");
        assert_eq!(fs::read(&dst).expect("read"), b"jarbytes");

        RemoveFileStep::new(&dst)
            .execute(&ctx(td.path()))
            .expect("remove");
        assert!(!dst.exists());

        // Second removal fails unless missing files are tolerated.
        assert!(RemoveFileStep::new(&dst).execute(&ctx(td.path())).is_err());
        RemoveFileStep::ignoring_missing(&dst)
            .execute(&ctx(td.path()))
            .expect("tolerant remove");
    }

    #[test]
    fn concat_preserves_order() {
        let td = tempdir().expect("tempdir");
        let a = td.path().join("a.bin");
        let b = td.path().join("b.bin");
        fs::write(&a, b"AA").expect("write");
        fs::write(&b, b"BB").expect("write");

        let out = td.path().join("joined.bin");
        ConcatStep::new(vec![b.clone(), a.clone()], &out)
            .execute(&ctx(td.path()))
            .expect("concat");
        assert_eq!(fs::read(&out).expect("read"), b"BBAA");
    }

    #[test]
    fn concat_missing_input_fails() {
        let td = tempdir().expect("tempdir");
        let out = td.path().join("joined.bin");
        let step = ConcatStep::new(vec![td.path().join("missing.bin")], &out);
        assert!(step.execute(&ctx(td.path())).is_err());
    }
}
