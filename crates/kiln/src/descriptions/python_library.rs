//! `python_library`: sources and resources contributed to dependents.

use std::sync::Arc;

use anyhow::Result;
use kiln_types::BuildTarget;

use crate::args::{ArgBag, ArgKind, ArgSpec};
use crate::description::Description;
use crate::resolver::RuleResolver;
use crate::rule::{BuildContext, BuildRule};
use crate::rulekey::RuleKeyBuilder;
use crate::step::BoxedStep;

pub struct PythonLibraryDescription;

impl Description for PythonLibraryDescription {
    fn rule_type(&self) -> &'static str {
        "python_library"
    }

    fn arg_specs(&self) -> Vec<ArgSpec> {
        vec![
            ArgSpec::optional("srcs", ArgKind::SourceMap),
            ArgSpec::optional("resources", ArgKind::SourceMap),
            ArgSpec::optional("base_module", ArgKind::Str),
            ArgSpec::optional("deps", ArgKind::TargetList),
        ]
    }

    fn create(
        &self,
        target: &BuildTarget,
        args: &ArgBag,
        resolver: &mut RuleResolver<'_>,
    ) -> Result<Arc<dyn BuildRule>> {
        let deps = args.target_list("deps");
        for dep in &deps {
            resolver.require_rule(dep)?;
        }
        Ok(Arc::new(PythonLibraryRule {
            target: target.clone(),
            args: args.clone(),
            deps,
        }))
    }
}

/// Pure graph node: no steps, no outputs, but its sources contribute to the
/// rule keys of everything that depends on it.
pub struct PythonLibraryRule {
    target: BuildTarget,
    args: ArgBag,
    deps: Vec<BuildTarget>,
}

impl BuildRule for PythonLibraryRule {
    fn rule_type(&self) -> &'static str {
        "python_library"
    }

    fn target(&self) -> &BuildTarget {
        &self.target
    }

    fn deps(&self) -> Vec<BuildTarget> {
        self.deps.clone()
    }

    fn append_rule_key(&self, key: &mut RuleKeyBuilder<'_>) -> Result<()> {
        for (name, value) in self.args.iter() {
            key.put_attr(name, value)?;
        }
        Ok(())
    }

    fn steps(&self, _ctx: &BuildContext) -> Result<Vec<BoxedStep>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use kiln_types::{AttrValue, SourcePath};

    use super::*;
    use crate::args::{RawArgs, validate_args};
    use crate::description::TargetGraph;
    use crate::description::DescriptionRegistry;

    #[test]
    fn create_materializes_deps() {
        let mut registry = DescriptionRegistry::new();
        registry.register(PythonLibraryDescription).expect("register");

        let util = BuildTarget::new("lib", "util");
        let io = BuildTarget::new("lib", "io");

        let mut graph = TargetGraph::new();
        graph.add(util.clone(), "python_library", RawArgs::new());
        let mut io_args = RawArgs::new();
        io_args.insert("deps".into(), AttrValue::TargetList(vec![util.clone()]));
        io_args.insert("srcs".into(), {
            let mut m = std::collections::BTreeMap::new();
            m.insert("io.py".to_string(), SourcePath::path("lib/io.py"));
            AttrValue::SourceMap(m)
        });
        graph.add(io.clone(), "python_library", io_args);

        let mut resolver = RuleResolver::new(&registry, &graph);
        let rule = resolver.require_rule(&io).expect("require");
        assert_eq!(rule.deps(), vec![util]);
        assert_eq!(resolver.len(), 2);
        assert!(rule.outputs().is_empty());
    }

    #[test]
    fn unknown_option_is_rejected() {
        let desc = PythonLibraryDescription;
        let target = BuildTarget::new("lib", "x");
        let mut raw = RawArgs::new();
        raw.insert("src".into(), AttrValue::Str("typo".into()));
        let err =
            validate_args(desc.rule_type(), &target, &desc.arg_specs(), &raw).expect_err("typo");
        assert!(err.to_string().contains("unknown option 'src'"));
    }
}
