//! The build engine.
//!
//! Walks the frozen rule graph in dependency order, computes each rule's
//! key, consults the action cache, and otherwise runs the rule's steps.
//! Per-rule receipts and the JSONL event log are the audit trail of a
//! session. The first failure wins: later rules are skipped, the failure
//! is classified, and the receipt reports the session as failed.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use kiln_types::{
    BuildEventType, BuildOutcome, BuildReceipt, CURRENT_RECEIPT_VERSION, FailureClass, KilnError,
    RuleReceipt, RuleState,
};
use kiln_types::BuildTarget;

use crate::artifact::ArtifactFilesystem;
use crate::cache::{ActionCache, ArtifactSet, NoopCache};
use crate::config::Config;
use crate::events::EventLog;
use crate::hashing::{ContentHasher, FileHashCache};
use crate::resolver::RuleGraph;
use crate::rule::{BuildContext, BuildRule};
use crate::rulekey::{RuleKey, compute_rule_key};
use crate::runner::{Reporter, run_steps};
use crate::step::{StepContext, SystemToolRunner, ToolRunner};

/// Everything a finished build hands back to the caller.
pub struct BuildSession {
    pub receipt: BuildReceipt,
    pub events: EventLog,
}

/// Build driver over a frozen rule graph.
pub struct BuildEngine {
    filesystem: Arc<ArtifactFilesystem>,
    config: Arc<Config>,
    hasher: Arc<dyn ContentHasher>,
    cache: Arc<dyn ActionCache>,
    tools: Arc<dyn ToolRunner>,
}

impl BuildEngine {
    /// An engine with the real filesystem hasher, no cache, and real tool
    /// launches.
    pub fn new(filesystem: Arc<ArtifactFilesystem>, config: Arc<Config>) -> Self {
        let root = filesystem.root().to_path_buf();
        Self {
            filesystem,
            config,
            hasher: Arc::new(FileHashCache::new(root)),
            cache: Arc::new(NoopCache),
            tools: Arc::new(SystemToolRunner::default()),
        }
    }

    /// Use an action cache.
    pub fn with_cache(mut self, cache: Arc<dyn ActionCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Substitute the tool runner (tests use a recording toolchain).
    pub fn with_tools(mut self, tools: Arc<dyn ToolRunner>) -> Self {
        self.tools = tools;
        self
    }

    /// Substitute the content hasher.
    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Build the transitive closure of `roots`, dependencies first.
    pub fn build(
        &self,
        graph: &RuleGraph,
        roots: &[BuildTarget],
        reporter: Arc<Mutex<dyn Reporter + Send>>,
    ) -> Result<BuildSession> {
        let order = graph.transitive_closure(roots)?;

        let events = Arc::new(Mutex::new(EventLog::new()));
        let step_ctx = StepContext {
            filesystem: self.filesystem.clone(),
            tools: self.tools.clone(),
            reporter: reporter.clone(),
            events: events.clone(),
        };
        let build_ctx = BuildContext::new(self.filesystem.clone(), self.config.clone());

        let mut rules = Vec::with_capacity(order.len());
        let mut failed = false;

        for rule in order {
            let target = rule.target().clone();
            let subject = target.canonical();
            let started_at = Utc::now();
            let start = Instant::now();

            if failed {
                rules.push(RuleReceipt {
                    target: subject,
                    rule_key: None,
                    state: RuleState::Skipped {
                        reason: "an earlier rule failed".into(),
                    },
                    started_at,
                    finished_at: Utc::now(),
                    duration_ms: 0,
                    steps_run: 0,
                });
                continue;
            }

            events
                .lock()
                .unwrap()
                .record_now(BuildEventType::RuleStarted, subject.clone());

            let outcome = self.build_rule(&step_ctx, &build_ctx, rule.as_ref(), &events);
            let duration_ms = start.elapsed().as_millis();
            match outcome {
                Ok((key, state, steps_run)) => {
                    rules.push(RuleReceipt {
                        target: subject,
                        rule_key: Some(key.as_hex().to_string()),
                        state,
                        started_at,
                        finished_at: Utc::now(),
                        duration_ms,
                        steps_run,
                    });
                }
                Err(error) => {
                    let class = classify_failure(&error);
                    let message = format!("{error:#}");
                    {
                        let mut rep = reporter.lock().unwrap();
                        rep.error(&format!("{subject}: {message}"));
                    }
                    events.lock().unwrap().record_now(
                        BuildEventType::RuleFailed {
                            class,
                            message: message.clone(),
                        },
                        subject.clone(),
                    );
                    rules.push(RuleReceipt {
                        target: subject,
                        rule_key: None,
                        state: RuleState::Failed { class, message },
                        started_at,
                        finished_at: Utc::now(),
                        duration_ms,
                        steps_run: 0,
                    });
                    failed = true;
                }
            }
        }

        drop(step_ctx);
        let events_log = std::mem::take(&mut *events.lock().unwrap());
        Ok(BuildSession {
            receipt: BuildReceipt {
                version: CURRENT_RECEIPT_VERSION.to_string(),
                created_at: Utc::now(),
                outcome: if failed {
                    BuildOutcome::Failed
                } else {
                    BuildOutcome::Success
                },
                rules,
            },
            events: events_log,
        })
    }

    fn build_rule(
        &self,
        step_ctx: &StepContext,
        build_ctx: &BuildContext,
        rule: &dyn BuildRule,
        events: &Arc<Mutex<EventLog>>,
    ) -> Result<(RuleKey, RuleState, u32)> {
        let target = rule.target();
        let subject = target.canonical();
        let start = Instant::now();

        let key = compute_rule_key(rule, self.hasher.as_ref())?;

        if let Some(artifacts) = self.cache.fetch(&key) {
            artifacts.restore(&self.filesystem, target)?;
            events.lock().unwrap().record_now(
                BuildEventType::RuleCached {
                    rule_key: key.as_hex().to_string(),
                },
                subject,
            );
            return Ok((key, RuleState::Cached, 0));
        }

        let steps = rule.steps(build_ctx)?;
        let steps_run = run_steps(step_ctx, &steps, Some(target))? as u32;

        let outputs = rule.outputs();
        if !outputs.is_empty() {
            let artifacts = ArtifactSet::collect(&self.filesystem, target, &outputs)?;
            self.cache.store(&key, artifacts);
        }

        events.lock().unwrap().record_now(
            BuildEventType::RuleBuilt {
                duration_ms: start.elapsed().as_millis() as u64,
            },
            subject,
        );
        Ok((key, RuleState::Built, steps_run))
    }
}

/// Map an error chain to the failure class of its most specific cause.
fn classify_failure(error: &anyhow::Error) -> FailureClass {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<KilnError>())
        .map(KilnError::class)
        .unwrap_or(FailureClass::Execution)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_defaults_to_execution() {
        let plain = anyhow::anyhow!("disk full");
        assert_eq!(classify_failure(&plain), FailureClass::Execution);

        let config: anyhow::Error = KilnError::Config("bad tool".into()).into();
        assert_eq!(classify_failure(&config), FailureClass::Config);

        let overflow: anyhow::Error = KilnError::DexOverflow {
            output: "classes.dex".into(),
            message: "too many methods".into(),
        }
        .into();
        assert_eq!(
            classify_failure(&overflow.context("dexing failed")),
            FailureClass::Overflow
        );
    }
}
