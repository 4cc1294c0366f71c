//! The description registry.
//!
//! A description is the factory and schema for one rule type: it names the
//! type, declares the options it accepts, and converts a validated attribute
//! bag plus the resolver into one or more rules. The registry owns the set
//! of known rule types; duplicates are rejected at registration time so a
//! misconfigured plugin set fails before any target is materialized.

use std::any::TypeId;
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use kiln_types::{BuildTarget, KilnError};

use crate::args::{ArgBag, ArgSpec, RawArgs, validate_args};
use crate::resolver::RuleResolver;
use crate::rule::BuildRule;

/// Factory and schema for one rule type.
pub trait Description: Send + Sync {
    /// Canonical rule-type name, e.g. `python_test`.
    fn rule_type(&self) -> &'static str;

    /// The options this rule type accepts. Unknown options are rejected at
    /// construction time.
    fn arg_specs(&self) -> Vec<ArgSpec>;

    /// Convert a validated attribute bag into a rule. The description may
    /// register auxiliary rules (flavored siblings, generated sources)
    /// through the resolver before returning the primary rule.
    fn create(
        &self,
        target: &BuildTarget,
        args: &ArgBag,
        resolver: &mut RuleResolver<'_>,
    ) -> Result<Arc<dyn BuildRule>>;
}

impl std::fmt::Debug for dyn Description {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Description")
            .field("rule_type", &self.rule_type())
            .finish()
    }
}

/// A declared target before materialization: rule type plus raw attributes.
#[derive(Debug, Clone)]
pub struct RawTargetNode {
    pub rule_type: String,
    pub args: RawArgs,
}

/// The declared target graph handed to the core by the build-file front-end.
#[derive(Debug, Clone, Default)]
pub struct TargetGraph {
    nodes: BTreeMap<BuildTarget, RawTargetNode>,
}

impl TargetGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare one target. Re-declaring replaces the previous node; the
    /// front-end owns duplicate detection at the build-file level.
    pub fn add(&mut self, target: BuildTarget, rule_type: impl Into<String>, args: RawArgs) {
        self.nodes.insert(
            target,
            RawTargetNode {
                rule_type: rule_type.into(),
                args,
            },
        );
    }

    pub fn get(&self, target: &BuildTarget) -> Option<&RawTargetNode> {
        self.nodes.get(target)
    }

    pub fn targets(&self) -> impl Iterator<Item = &BuildTarget> {
        self.nodes.keys()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Owner of the known rule types.
#[derive(Default)]
pub struct DescriptionRegistry {
    by_name: BTreeMap<String, Arc<dyn Description>>,
    by_type: BTreeMap<TypeId, String>,
}

impl DescriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one description; a second description with the same
    /// rule-type name is an error.
    pub fn register<D: Description + 'static>(&mut self, description: D) -> Result<()> {
        let name = description.rule_type().to_string();
        if self.by_name.contains_key(&name) {
            bail!(KilnError::Config(format!(
                "rule type '{name}' registered twice"
            )));
        }
        self.by_type.insert(TypeId::of::<D>(), name.clone());
        self.by_name.insert(name, Arc::new(description));
        Ok(())
    }

    /// Look up a description by rule-type name.
    pub fn lookup_by_name(&self, name: &str) -> Result<Arc<dyn Description>> {
        match self.by_name.get(name) {
            Some(description) => Ok(description.clone()),
            None => {
                let known: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
                bail!(KilnError::Config(format!(
                    "unknown rule type '{name}'; known rule types: {}",
                    known.join(", ")
                )))
            }
        }
    }

    /// Look up a description by its concrete Rust type.
    pub fn lookup_by_type<D: Description + 'static>(&self) -> Result<Arc<dyn Description>> {
        match self.by_type.get(&TypeId::of::<D>()) {
            Some(name) => Ok(self.by_name[name].clone()),
            None => bail!(KilnError::Config(format!(
                "no description registered for type {}",
                std::any::type_name::<D>()
            ))),
        }
    }

    /// Validate a raw attribute bag against the named rule type's options
    /// and invoke the description.
    ///
    /// Unknown options, missing required options, and type mismatches are
    /// configuration errors; the description may register auxiliary rules
    /// through the resolver before returning.
    pub fn create(
        &self,
        target: &BuildTarget,
        rule_type: &str,
        raw: &RawArgs,
        resolver: &mut RuleResolver<'_>,
    ) -> Result<Arc<dyn BuildRule>> {
        let description = self.lookup_by_name(rule_type)?;
        let bag = validate_args(rule_type, target, &description.arg_specs(), raw)?;
        description.create(target, &bag, resolver)
    }

    /// Names of all registered rule types, sorted.
    pub fn known_types(&self) -> Vec<&str> {
        self.by_name.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rulekey::RuleKeyBuilder;

    struct DummyRule {
        target: BuildTarget,
    }

    impl BuildRule for DummyRule {
        fn rule_type(&self) -> &'static str {
            "dummy"
        }

        fn target(&self) -> &BuildTarget {
            &self.target
        }

        fn append_rule_key(&self, _key: &mut RuleKeyBuilder<'_>) -> Result<()> {
            Ok(())
        }

        fn steps(&self, _ctx: &crate::rule::BuildContext) -> Result<Vec<crate::step::BoxedStep>> {
            Ok(Vec::new())
        }
    }

    struct DummyDescription;

    impl Description for DummyDescription {
        fn rule_type(&self) -> &'static str {
            "dummy"
        }

        fn arg_specs(&self) -> Vec<ArgSpec> {
            Vec::new()
        }

        fn create(
            &self,
            target: &BuildTarget,
            _args: &ArgBag,
            _resolver: &mut RuleResolver<'_>,
        ) -> Result<Arc<dyn BuildRule>> {
            Ok(Arc::new(DummyRule {
                target: target.clone(),
            }))
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = DescriptionRegistry::new();
        registry.register(DummyDescription).expect("register");

        assert!(registry.lookup_by_name("dummy").is_ok());
        assert!(registry.lookup_by_type::<DummyDescription>().is_ok());
        assert_eq!(registry.known_types(), vec!["dummy"]);
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut registry = DescriptionRegistry::new();
        registry.register(DummyDescription).expect("register");
        let err = registry.register(DummyDescription).expect_err("dup");
        assert!(err.to_string().contains("registered twice"));
    }

    #[test]
    fn unknown_lookup_names_known_types() {
        let mut registry = DescriptionRegistry::new();
        registry.register(DummyDescription).expect("register");

        let err = registry.lookup_by_name("pythn_test").expect_err("unknown");
        let msg = err.to_string();
        assert!(msg.contains("unknown rule type 'pythn_test'"), "{msg}");
        assert!(msg.contains("dummy"), "{msg}");
    }

    #[test]
    fn target_graph_holds_nodes() {
        let mut graph = TargetGraph::new();
        graph.add(BuildTarget::new("x", "y"), "dummy", RawArgs::new());
        assert_eq!(graph.len(), 1);
        assert!(graph.get(&BuildTarget::new("x", "y")).is_some());
        assert!(graph.get(&BuildTarget::new("x", "z")).is_none());
    }
}
