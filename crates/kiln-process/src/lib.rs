//! Process execution for kiln.
//!
//! External build tools (dexers, compressors, archive scrubbers) are opaque
//! programs from kiln's point of view: files in, files out. This crate runs
//! them with captured output, an optional working directory and environment,
//! and an optional wall-clock timeout.
//!
//! # Example
//!
//! ```ignore
//! use kiln_process::{run_tool, ToolInvocation};
//!
//! let out = run_tool(&ToolInvocation::new("xz", ["--version"])).expect("run");
//! assert_eq!(out.exit_code, 0);
//! ```

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A fully-described tool launch: program, arguments, environment, working
/// directory, and optional timeout.
///
/// Kept as plain data so callers can log, hash, or record invocations without
/// running anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Program name or path.
    pub program: String,
    /// Arguments in order.
    pub args: Vec<String>,
    /// Extra environment, ordered by key.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory; the caller's when absent.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Wall-clock timeout; none means wait forever.
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl ToolInvocation {
    /// Build an invocation of `program` with the given arguments.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            working_dir: None,
            timeout: None,
        }
    }

    /// Add one environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the wall-clock timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Render the launch as a shell-like line for logs.
    pub fn render(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Result of a tool execution with timeout bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Exit code (or -1 when not available).
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Whether execution exceeded the timeout.
    pub timed_out: bool,
    /// Total wall-clock duration.
    pub duration: Duration,
}

impl ToolOutput {
    /// Whether the tool exited successfully.
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Run a tool to completion and capture its output.
///
/// With a timeout set, the child is polled and killed once the deadline
/// passes; the kill is best-effort and the output is marked `timed_out`.
pub fn run_tool(invocation: &ToolInvocation) -> Result<ToolOutput> {
    let start = Instant::now();

    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in &invocation.env {
        command.env(key, value);
    }
    if let Some(dir) = &invocation.working_dir {
        command.current_dir(dir);
    }

    let Some(timeout) = invocation.timeout else {
        let output = command.output().with_context(|| {
            format!(
                "failed to run tool: {}; is it installed and on PATH?",
                invocation.render()
            )
        })?;
        return Ok(ToolOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            timed_out: false,
            duration: start.elapsed(),
        });
    };

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn tool: {}", invocation.program))?;

    let deadline = Instant::now() + timeout;
    loop {
        match child
            .try_wait()
            .with_context(|| format!("failed to poll tool: {}", invocation.program))?
        {
            Some(status) => {
                return Ok(ToolOutput {
                    exit_code: status.code().unwrap_or(-1),
                    stdout: read_pipe(child.stdout.take()),
                    stderr: read_pipe(child.stderr.take()),
                    timed_out: false,
                    duration: start.elapsed(),
                });
            }
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();

                    let mut stderr = read_pipe(child.stderr.take());
                    stderr.push_str(&format!(
                        "\n{} timed out after {}",
                        invocation.program,
                        humantime::format_duration(timeout)
                    ));

                    return Ok(ToolOutput {
                        exit_code: -1,
                        stdout: read_pipe(child.stdout.take()),
                        stderr,
                        timed_out: true,
                        duration: start.elapsed(),
                    });
                }

                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

fn read_pipe<R: Read>(stream: Option<R>) -> String {
    let mut buffer = Vec::new();
    if let Some(mut s) = stream {
        let _ = s.read_to_end(&mut buffer);
    }
    String::from_utf8_lossy(&buffer).to_string()
}
