//! Archive repacking.
//!
//! Secondary dex jars are repacked so the dex entry is STOREd uncompressed:
//! the Android runtime maps dex files directly out of the jar, and xz over
//! an uncompressed entry compresses better than xz over deflate output.

use std::fs::File;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::step::{Step, StepContext};

/// Rewrite a zip so entries matching the store suffix are uncompressed and
/// everything else stays deflated.
#[derive(Debug, Clone)]
pub struct RepackZipStep {
    pub src: PathBuf,
    pub dest: PathBuf,
    /// Entry-name suffix selecting the entries to STORE, e.g. `.dex`.
    pub store_suffix: String,
}

impl RepackZipStep {
    pub fn new(src: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            store_suffix: ".dex".to_string(),
        }
    }
}

impl Step for RepackZipStep {
    fn short_name(&self) -> &str {
        "repack-zip"
    }

    fn description(&self) -> String {
        format!(
            "repack {} -> {} (STORE *{})",
            self.src.display(),
            self.dest.display(),
            self.store_suffix
        )
    }

    fn execute(&self, _ctx: &StepContext) -> Result<()> {
        let reader = File::open(&self.src)
            .with_context(|| format!("failed to open {}", self.src.display()))?;
        let mut archive = ZipArchive::new(reader)
            .with_context(|| format!("failed to read zip {}", self.src.display()))?;

        if let Some(parent) = self.dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let writer = File::create(&self.dest)
            .with_context(|| format!("failed to create {}", self.dest.display()))?;
        let mut out = ZipWriter::new(writer);

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .with_context(|| format!("failed to read entry {index} of {}", self.src.display()))?;
            let name = entry.name().to_string();

            let method = if name.ends_with(&self.store_suffix) {
                CompressionMethod::Stored
            } else {
                CompressionMethod::Deflated
            };
            let options = SimpleFileOptions::default().compression_method(method);

            if entry.is_dir() {
                out.add_directory(name, options)
                    .with_context(|| format!("failed to repack dir entry in {}", self.src.display()))?;
            } else {
                out.start_file(name.clone(), options)
                    .with_context(|| format!("failed to start entry {name}"))?;
                io::copy(&mut entry, &mut out)
                    .with_context(|| format!("failed to repack entry {name}"))?;
            }
        }

        out.finish()
            .with_context(|| format!("failed to finish zip {}", self.dest.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
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

    fn write_jar(path: &std::path::Path) {
        let mut writer = ZipWriter::new(File::create(path).expect("create"));
        let deflated =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        writer
            .start_file("classes.dex", deflated)
            .expect("start dex");
        writer.write_all(b"dex-bytes-dex-bytes-dex-bytes").expect("write");
        writer
            .start_file("META-INF/metadata.txt", deflated)
            .expect("start meta");
        writer.write_all(b"metadata").expect("write");
        writer.finish().expect("finish");
    }

    #[test]
    fn repack_stores_dex_entries() {
        let td = tempdir().expect("tempdir");
        let src = td.path().join("in.tmp.jar");
        let dest = td.path().join("out.dex.jar");
        write_jar(&src);

        RepackZipStep::new(&src, &dest)
            .execute(&ctx(td.path()))
            .expect("repack");

        let mut repacked = ZipArchive::new(File::open(&dest).expect("open")).expect("read");
        {
            let dex = repacked.by_name("classes.dex").expect("dex entry");
            assert_eq!(dex.compression(), CompressionMethod::Stored);
        }
        {
            let meta = repacked.by_name("META-INF/metadata.txt").expect("meta entry");
            assert_eq!(meta.compression(), CompressionMethod::Deflated);
        }
    }

    #[test]
    fn repack_preserves_contents() {
        let td = tempdir().expect("tempdir");
        let src = td.path().join("in.tmp.jar");
        let dest = td.path().join("out.dex.jar");
        write_jar(&src);

        RepackZipStep::new(&src, &dest)
            .execute(&ctx(td.path()))
            .expect("repack");

        let mut repacked = ZipArchive::new(File::open(&dest).expect("open")).expect("read");
        let mut dex = repacked.by_name("classes.dex").expect("dex entry");
        let mut bytes = Vec::new();
        std::io::Read::read_to_end(&mut dex, &mut bytes).expect("read entry");
        assert_eq!(bytes, b"dex-bytes-dex-bytes-dex-bytes");
    }

    #[test]
    fn repack_missing_source_fails() {
        let td = tempdir().expect("tempdir");
        let step = RepackZipStep::new(td.path().join("nope.jar"), td.path().join("out.jar"));
        assert!(step.execute(&ctx(td.path())).is_err());
    }
}
