//! The build-rule contract.
//!
//! Rules are immutable nodes in the build DAG, produced by descriptions
//! during assembly. A rule knows its target, its dependencies, its rule-key
//! contribution, and how to materialize its steps against a build context.

use std::sync::Arc;

use anyhow::Result;
use kiln_types::BuildTarget;

use crate::artifact::ArtifactFilesystem;
use crate::config::Config;
use crate::rulekey::RuleKeyBuilder;
use crate::step::BoxedStep;

/// Everything a rule needs to materialize its steps.
#[derive(Clone)]
pub struct BuildContext {
    /// Resolves source paths and artifacts to on-disk locations.
    pub filesystem: Arc<ArtifactFilesystem>,
    /// Tool programs and dexing knobs.
    pub config: Arc<Config>,
}

impl BuildContext {
    pub fn new(filesystem: Arc<ArtifactFilesystem>, config: Arc<Config>) -> Self {
        Self { filesystem, config }
    }
}

/// Immutable node in the build DAG.
///
/// Implementations are created by descriptions, registered with the resolver,
/// and never mutated afterwards. Steps are transient: materialized right
/// before execution, discarded after.
pub trait BuildRule: Send + Sync {
    /// Canonical rule-type name, e.g. `python_test`.
    fn rule_type(&self) -> &'static str;

    /// The target this rule builds.
    fn target(&self) -> &BuildTarget;

    /// Declared plus extra dependencies, as targets.
    fn deps(&self) -> Vec<BuildTarget> {
        Vec::new()
    }

    /// Append everything beyond rule type and target that can affect this
    /// rule's outputs: contributing attributes, step contributions, command
    /// lines. Called exactly once per key computation.
    fn append_rule_key(&self, key: &mut RuleKeyBuilder<'_>) -> Result<()>;

    /// Materialize the ordered step list for one execution.
    fn steps(&self, ctx: &BuildContext) -> Result<Vec<BoxedStep>>;

    /// Names of the outputs this rule records, relative to its output
    /// directory. Empty for rules that only contribute to the graph.
    fn outputs(&self) -> Vec<String> {
        Vec::new()
    }
}

impl std::fmt::Debug for dyn BuildRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildRule")
            .field("rule_type", &self.rule_type())
            .field("target", &self.target())
            .finish()
    }
}
