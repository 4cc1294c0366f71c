//! Test doubles: a recording fake toolchain and a collecting reporter.
//!
//! The fake toolchain implements the external tools' file-in/file-out
//! contracts with trivial byte formats, so planner and engine behavior can
//! be exercised end-to-end without a dexer, xz, or PEX linker installed.
//! Every invocation is recorded for assertions.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use kiln_process::{ToolInvocation, ToolOutput};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::runner::Reporter;
use crate::step::ToolRunner;

/// Reporter that collects every line for later assertions.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    pub lines: Vec<String>,
}

impl Reporter for CollectingReporter {
    fn info(&mut self, msg: &str) {
        self.lines.push(format!("info: {msg}"));
    }

    fn warn(&mut self, msg: &str) {
        self.lines.push(format!("warn: {msg}"));
    }

    fn error(&mut self, msg: &str) {
        self.lines.push(format!("error: {msg}"));
    }
}

/// Recording [`ToolRunner`] that simulates the dexer, xz, the zip scrubber,
/// the dex analyzer, and the PEX linker.
#[derive(Debug, Default)]
pub struct FakeDexToolchain {
    invocations: Mutex<Vec<ToolInvocation>>,
    dexer_failure: Option<String>,
}

impl FakeDexToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// A toolchain whose dexer always fails with the given stderr.
    pub fn with_failing_dexer(stderr: impl Into<String>) -> Self {
        Self {
            invocations: Mutex::new(Vec::new()),
            dexer_failure: Some(stderr.into()),
        }
    }

    /// Snapshot of everything launched so far.
    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// How many launches used a program with the given base name.
    pub fn launches_of(&self, program: &str) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|inv| base_name(&inv.program) == program)
            .count()
    }
}

fn base_name(program: &str) -> &str {
    Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(program)
}

fn ok_output() -> ToolOutput {
    ToolOutput {
        exit_code: 0,
        stdout: String::new(),
        stderr: String::new(),
        timed_out: false,
        duration: Duration::ZERO,
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

/// Split a dexer argv into the output path and the input paths, skipping
/// the flags the dex step emits.
fn parse_dexer_args(args: &[String]) -> Result<(PathBuf, Vec<PathBuf>)> {
    let mut output = None;
    let mut inputs = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--output" => output = iter.next().map(PathBuf::from),
            "--min-api" | "--lib" => {
                iter.next();
            }
            "--no-desugaring" => {}
            other => inputs.push(PathBuf::from(other)),
        }
    }
    let output = output.ok_or_else(|| anyhow!("fake dexer: no --output in {args:?}"))?;
    Ok((output, inputs))
}

fn run_fake_dexer(args: &[String]) -> Result<()> {
    let (output, inputs) = parse_dexer_args(args)?;
    let mut payload = Vec::new();
    for input in &inputs {
        payload.extend(
            fs::read(input)
                .with_context(|| format!("fake dexer: missing input {}", input.display()))?,
        );
    }
    ensure_parent(&output)?;

    if output.extension().is_some_and(|ext| ext == "jar") {
        // Dex containers must be real archives so the repack step works.
        let mut writer = ZipWriter::new(fs::File::create(&output)?);
        writer.start_file("classes.dex", SimpleFileOptions::default())?;
        writer.write_all(&payload)?;
        writer.finish()?;
    } else {
        fs::write(&output, payload)?;
    }
    Ok(())
}

fn run_fake_xz(args: &[String]) -> Result<()> {
    let mut suffix = ".xz".to_string();
    let mut source = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-S" => {
                suffix = iter
                    .next()
                    .ok_or_else(|| anyhow!("fake xz: -S without a suffix"))?
                    .clone();
            }
            flag if flag.starts_with('-') => {}
            path => source = Some(PathBuf::from(path)),
        }
    }
    let source = source.ok_or_else(|| anyhow!("fake xz: no source in {args:?}"))?;

    let bytes = fs::read(&source)
        .with_context(|| format!("fake xz: missing source {}", source.display()))?;
    let mut compressed = b"XZ:".to_vec();
    compressed.extend(bytes);

    let mut destination = source.as_os_str().to_os_string();
    destination.push(&suffix);
    fs::write(PathBuf::from(destination), compressed)?;
    fs::remove_file(&source)?;
    Ok(())
}

impl ToolRunner for FakeDexToolchain {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        self.invocations.lock().unwrap().push(invocation.clone());

        match base_name(&invocation.program) {
            "d8" | "dx" => {
                if let Some(stderr) = &self.dexer_failure {
                    return Ok(ToolOutput {
                        exit_code: 2,
                        stdout: String::new(),
                        stderr: stderr.clone(),
                        timed_out: false,
                        duration: Duration::ZERO,
                    });
                }
                run_fake_dexer(&invocation.args)?;
                Ok(ok_output())
            }
            "xz" => {
                run_fake_xz(&invocation.args)?;
                Ok(ok_output())
            }
            "zipscrub" => Ok(ok_output()),
            "dexmeta" => {
                let [jar, meta] = invocation.args.as_slice() else {
                    return Err(anyhow!(
                        "fake dex analyzer expects <jar> <meta>, got {:?}",
                        invocation.args
                    ));
                };
                let meta = PathBuf::from(meta);
                ensure_parent(&meta)?;
                fs::write(&meta, format!("meta for {jar}"))?;
                Ok(ok_output())
            }
            _ => {
                // PEX linker and other generic tools: honor --output if
                // present, otherwise succeed without touching the disk.
                if let Some(position) =
                    invocation.args.iter().position(|a| a == "--output")
                {
                    let output = PathBuf::from(&invocation.args[position + 1]);
                    ensure_parent(&output)?;
                    fs::write(&output, b"PEX")?;
                }
                Ok(ok_output())
            }
        }
    }
}
