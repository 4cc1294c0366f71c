//! Rule resolution and DAG assembly.
//!
//! The resolver is a grow-only index from target to rule during assembly.
//! Descriptions pull their dependencies through [`RuleResolver::require_rule`],
//! which materializes targets on demand, memoizes, and detects cycles via
//! the in-progress assembly stack. Assembly is single-threaded; freezing
//! yields the read-only [`RuleGraph`] used during parallel execution.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Result;
use kiln_types::BuildTarget;

use crate::artifact::{Artifact, OutputArtifact, assembly_error};
use crate::description::{DescriptionRegistry, TargetGraph};
use crate::rule::BuildRule;

/// Mutable rule index used while descriptions run.
pub struct RuleResolver<'a> {
    registry: &'a DescriptionRegistry,
    targets: &'a TargetGraph,
    index: BTreeMap<BuildTarget, Arc<dyn BuildRule>>,
    in_progress: Vec<BuildTarget>,
    claimed_outputs: BTreeSet<(BuildTarget, String)>,
}

impl<'a> RuleResolver<'a> {
    /// Start assembling against a registry and a declared target graph.
    pub fn new(registry: &'a DescriptionRegistry, targets: &'a TargetGraph) -> Self {
        Self {
            registry,
            targets,
            index: BTreeMap::new(),
            in_progress: Vec::new(),
            claimed_outputs: BTreeSet::new(),
        }
    }

    /// Insert a rule; a second rule for the same target is an assembly
    /// error.
    pub fn add_to_index(&mut self, rule: Arc<dyn BuildRule>) -> Result<()> {
        let target = rule.target().clone();
        if self.index.contains_key(&target) {
            return assembly_error(&target, "a rule for this target is already registered");
        }
        self.index.insert(target, rule);
        Ok(())
    }

    /// Declare an output artifact bound to `owner`; binding the same
    /// `(target, output)` twice is an assembly error.
    pub fn declare_output(
        &mut self,
        owner: &BuildTarget,
        output: impl Into<String>,
    ) -> Result<OutputArtifact> {
        let output = output.into();
        if !self
            .claimed_outputs
            .insert((owner.clone(), output.clone()))
        {
            return assembly_error(
                owner,
                format!("output '{output}' is bound by more than one action"),
            );
        }
        Ok(OutputArtifact::new(Artifact::declared(owner.clone(), output)))
    }

    /// Ensure the target's description has been invoked, memoizing.
    ///
    /// Flavored targets with no declaration of their own resolve through
    /// their base declaration: the base target is materialized first, which
    /// registers any flavored siblings its description synthesizes.
    pub fn require_rule(&mut self, target: &BuildTarget) -> Result<Arc<dyn BuildRule>> {
        if let Some(rule) = self.index.get(target) {
            return Ok(rule.clone());
        }

        if let Some(position) = self.in_progress.iter().position(|t| t == target) {
            let mut chain: Vec<String> = self.in_progress[position..]
                .iter()
                .map(BuildTarget::canonical)
                .collect();
            chain.push(target.canonical());
            return assembly_error(
                target,
                format!("dependency cycle detected: {}", chain.join(" -> ")),
            );
        }

        let node = match self.targets.get(target) {
            Some(node) => node.clone(),
            None if !target.flavors().is_empty()
                && self.targets.get(&target.unflavored()).is_some() =>
            {
                // Flavored variants are synthesized while their base target
                // assembles; materialize the base and retry the index.
                let base = target.unflavored();
                self.require_rule(&base)?;
                return match self.index.get(target) {
                    Some(rule) => Ok(rule.clone()),
                    None => assembly_error(
                        target,
                        "base target declares no such flavored variant",
                    ),
                };
            }
            None => {
                return assembly_error(target, "no declaration found for this target");
            }
        };

        let registry = self.registry;
        self.in_progress.push(target.clone());
        let created = registry.create(target, &node.rule_type, &node.args, self);
        self.in_progress.pop();
        let rule = created?;

        if rule.target() != target {
            return assembly_error(
                target,
                format!(
                    "description for rule type '{}' produced a rule for {}",
                    node.rule_type,
                    rule.target()
                ),
            );
        }
        if !self.index.contains_key(target) {
            self.add_to_index(rule.clone())?;
        }
        Ok(rule)
    }

    /// Resolve several targets, preserving caller order.
    pub fn get_all_rules(&mut self, targets: &[BuildTarget]) -> Result<Vec<Arc<dyn BuildRule>>> {
        targets.iter().map(|t| self.require_rule(t)).collect()
    }

    /// Number of rules assembled so far.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Finish assembly; the graph is read-only from here on.
    pub fn freeze(self) -> RuleGraph {
        RuleGraph { index: self.index }
    }
}

/// Frozen, read-only rule graph.
pub struct RuleGraph {
    index: BTreeMap<BuildTarget, Arc<dyn BuildRule>>,
}

impl RuleGraph {
    /// The rule for a target, if assembled.
    pub fn get(&self, target: &BuildTarget) -> Option<Arc<dyn BuildRule>> {
        self.index.get(target).cloned()
    }

    /// All rules in target order.
    pub fn rules(&self) -> impl Iterator<Item = &Arc<dyn BuildRule>> {
        self.index.values()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Resolve several targets, preserving caller order; unresolved targets
    /// are assembly errors.
    pub fn get_all_rules(&self, targets: &[BuildTarget]) -> Result<Vec<Arc<dyn BuildRule>>> {
        targets
            .iter()
            .map(|t| match self.get(t) {
                Some(rule) => Ok(rule),
                None => assembly_error(t, "target was never assembled"),
            })
            .collect()
    }

    /// Dependencies-first ordering of the transitive closure of `roots`.
    ///
    /// Deterministic for a fixed graph; every dependency precedes its
    /// dependents.
    pub fn transitive_closure(&self, roots: &[BuildTarget]) -> Result<Vec<Arc<dyn BuildRule>>> {
        let mut order = Vec::new();
        let mut finished: BTreeSet<BuildTarget> = BTreeSet::new();
        let mut on_stack: BTreeSet<BuildTarget> = BTreeSet::new();

        for root in roots {
            self.visit(root, &mut finished, &mut on_stack, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        target: &BuildTarget,
        finished: &mut BTreeSet<BuildTarget>,
        on_stack: &mut BTreeSet<BuildTarget>,
        order: &mut Vec<Arc<dyn BuildRule>>,
    ) -> Result<()> {
        if finished.contains(target) {
            return Ok(());
        }
        if !on_stack.insert(target.clone()) {
            return assembly_error(target, "dependency cycle detected in frozen graph");
        }
        let rule = match self.get(target) {
            Some(rule) => rule,
            None => {
                return assembly_error(target, "dependency was never assembled");
            }
        };
        for dep in rule.deps() {
            self.visit(&dep, finished, on_stack, order)?;
        }
        on_stack.remove(target);
        finished.insert(target.clone());
        order.push(rule);
        Ok(())
    }
}
