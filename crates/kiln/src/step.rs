//! The step contract.
//!
//! A step is the smallest executable unit: files in, files out. Steps carry
//! only data; process launches are materialized through the execution
//! context's [`ToolRunner`], so tests can substitute a recording runner and
//! never fork anything.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use kiln_process::{ToolInvocation, ToolOutput};
use thiserror::Error;

use crate::artifact::ArtifactFilesystem;
use crate::events::EventLog;
use crate::runner::{NullReporter, Reporter};

/// Launches external tools on behalf of steps.
pub trait ToolRunner: Send + Sync {
    /// Run one tool to completion.
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput>;
}

/// Tool runner that actually forks processes.
#[derive(Debug, Default)]
pub struct SystemToolRunner {
    /// Timeout applied to invocations that do not set their own.
    pub default_timeout: Option<Duration>,
}

impl ToolRunner for SystemToolRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        if invocation.timeout.is_none() {
            if let Some(timeout) = self.default_timeout {
                let mut with_timeout = invocation.clone();
                with_timeout.timeout = Some(timeout);
                return kiln_process::run_tool(&with_timeout);
            }
        }
        kiln_process::run_tool(invocation)
    }
}

/// Shared execution context handed to every step.
///
/// Cloning is cheap; worker threads each hold their own clone.
#[derive(Clone)]
pub struct StepContext {
    pub filesystem: Arc<ArtifactFilesystem>,
    pub tools: Arc<dyn ToolRunner>,
    pub reporter: Arc<Mutex<dyn Reporter + Send>>,
    pub events: Arc<Mutex<EventLog>>,
}

impl StepContext {
    /// Build a context with a silent reporter and a fresh event log.
    pub fn new(filesystem: Arc<ArtifactFilesystem>, tools: Arc<dyn ToolRunner>) -> Self {
        Self {
            filesystem,
            tools,
            reporter: Arc::new(Mutex::new(NullReporter)),
            events: Arc::new(Mutex::new(EventLog::new())),
        }
    }

    /// Replace the reporter.
    pub fn with_reporter(mut self, reporter: Arc<Mutex<dyn Reporter + Send>>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Replace the event log.
    pub fn with_events(mut self, events: Arc<Mutex<EventLog>>) -> Self {
        self.events = events;
        self
    }
}

/// Failure of one step, with enough structure for classification.
#[derive(Debug, Clone, Error)]
#[error("step '{step}' failed: {message}")]
pub struct StepError {
    /// The failing step's short name.
    pub step: String,
    /// Exit code when the failure came from an external tool.
    pub exit_code: Option<i32>,
    /// Tool stderr tail or an I/O error description.
    pub message: String,
}

impl StepError {
    /// Build from a finished-but-failed tool invocation, keeping the stderr
    /// tail for diagnostics.
    pub fn from_tool_output(step: &str, output: &ToolOutput) -> Self {
        let tail = tail_lines(&output.stderr, 20);
        let message = if output.timed_out {
            format!("timed out: {tail}")
        } else {
            format!("exit {}: {tail}", output.exit_code)
        };
        Self {
            step: step.to_string(),
            exit_code: Some(output.exit_code),
            message,
        }
    }
}

/// Last `n` lines of a tool's output, joined.
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Smallest executable unit of a build.
pub trait Step: Send + Sync {
    /// Short name for logs and failure classification, e.g. `dx`.
    fn short_name(&self) -> &str;

    /// Human-readable description of what this execution will do.
    fn description(&self) -> String;

    /// Run to completion. Failures carry a [`StepError`] in their chain when
    /// an external tool was involved.
    fn execute(&self, ctx: &StepContext) -> Result<()>;
}

/// Owned step, as produced by rule materialization.
pub type BoxedStep = Box<dyn Step>;
