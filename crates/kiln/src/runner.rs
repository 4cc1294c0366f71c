//! Step execution with logging and failure attribution.
//!
//! The runner executes one logical work item's steps strictly in order,
//! propagating the first failure with the owning target attached. There is
//! no retry policy here; retries are a higher-layer concern.

use std::time::Instant;

use anyhow::{Context, Result};
use kiln_types::{BuildEventType, BuildTarget};

use crate::step::{BoxedStep, Step, StepContext};

/// Receives human-readable progress lines.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Reporter that swallows everything.
#[derive(Debug, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn info(&mut self, _msg: &str) {}
    fn warn(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
}

fn subject_for(owning_target: Option<&BuildTarget>, step: &dyn Step) -> String {
    match owning_target {
        Some(target) => target.canonical(),
        None => format!("step:{}", step.short_name()),
    }
}

/// Run one step, recording events and attaching the owning target to any
/// failure.
pub fn run_step(
    ctx: &StepContext,
    step: &dyn Step,
    owning_target: Option<&BuildTarget>,
) -> Result<()> {
    let subject = subject_for(owning_target, step);

    {
        let mut reporter = ctx.reporter.lock().unwrap();
        reporter.info(&format!("[{subject}] {}: {}", step.short_name(), step.description()));
    }
    {
        let mut events = ctx.events.lock().unwrap();
        events.record_now(
            BuildEventType::StepStarted {
                step: step.short_name().to_string(),
            },
            subject.clone(),
        );
    }

    let started = Instant::now();
    match step.execute(ctx) {
        Ok(()) => {
            let mut events = ctx.events.lock().unwrap();
            events.record_now(
                BuildEventType::StepFinished {
                    step: step.short_name().to_string(),
                    duration_ms: started.elapsed().as_millis() as u64,
                },
                subject,
            );
            Ok(())
        }
        Err(e) => {
            {
                let mut events = ctx.events.lock().unwrap();
                events.record_now(
                    BuildEventType::StepFailed {
                        step: step.short_name().to_string(),
                        message: e.to_string(),
                    },
                    subject.clone(),
                );
            }
            {
                let mut reporter = ctx.reporter.lock().unwrap();
                reporter.error(&format!("[{subject}] {} failed: {e}", step.short_name()));
            }
            match owning_target {
                Some(target) => Err(e).with_context(|| {
                    format!("step '{}' failed for {}", step.short_name(), target)
                }),
                None => Err(e),
            }
        }
    }
}

/// Run a step list strictly in order, stopping at the first failure.
///
/// Returns the number of steps that executed successfully.
pub fn run_steps(
    ctx: &StepContext,
    steps: &[BoxedStep],
    owning_target: Option<&BuildTarget>,
) -> Result<usize> {
    let mut completed = 0;
    for step in steps {
        run_step(ctx, step.as_ref(), owning_target)?;
        completed += 1;
    }
    Ok(completed)
}
