//! `prebuilt_jar`: a checked-in jar republished as a rule output.

use std::sync::Arc;

use anyhow::Result;
use kiln_types::{BuildTarget, SourcePath};

use crate::args::{ArgBag, ArgKind, ArgSpec};
use crate::description::Description;
use crate::resolver::RuleResolver;
use crate::rule::{BuildContext, BuildRule};
use crate::rulekey::RuleKeyBuilder;
use crate::step::BoxedStep;
use crate::steps::CopyFileStep;

pub struct PrebuiltJarDescription;

impl Description for PrebuiltJarDescription {
    fn rule_type(&self) -> &'static str {
        "prebuilt_jar"
    }

    fn arg_specs(&self) -> Vec<ArgSpec> {
        vec![
            ArgSpec::required("binary_jar", ArgKind::Source),
            ArgSpec::optional("source_jar", ArgKind::Source),
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
        let output_name = format!("{}.jar", target.name());
        resolver.declare_output(target, output_name.clone())?;
        Ok(Arc::new(PrebuiltJarRule {
            target: target.clone(),
            args: args.clone(),
            deps,
            output_name,
        }))
    }
}

pub struct PrebuiltJarRule {
    target: BuildTarget,
    args: ArgBag,
    deps: Vec<BuildTarget>,
    output_name: String,
}

impl PrebuiltJarRule {
    fn binary_jar(&self) -> &SourcePath {
        self.args
            .opt_source("binary_jar")
            .expect("binary_jar is required by validation")
    }
}

impl BuildRule for PrebuiltJarRule {
    fn rule_type(&self) -> &'static str {
        "prebuilt_jar"
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
        key.put_step("copy", &[]);
        Ok(())
    }

    fn steps(&self, ctx: &BuildContext) -> Result<Vec<BoxedStep>> {
        let from = ctx.filesystem.resolve(self.binary_jar())?;
        let to = ctx.filesystem.output_path(&self.target, &self.output_name);
        Ok(vec![Box::new(CopyFileStep::new(from, to))])
    }

    fn outputs(&self) -> Vec<String> {
        vec![self.output_name.clone()]
    }
}

#[cfg(test)]
mod tests {
    use kiln_types::AttrValue;

    use super::*;
    use crate::args::RawArgs;
    use crate::description::{DescriptionRegistry, TargetGraph};

    #[test]
    fn publishes_jar_under_its_own_name() {
        let mut registry = DescriptionRegistry::new();
        registry.register(PrebuiltJarDescription).expect("register");

        let target = BuildTarget::new("third-party", "guava");
        let mut raw = RawArgs::new();
        raw.insert(
            "binary_jar".into(),
            AttrValue::Source(SourcePath::path("third-party/guava-31.jar")),
        );
        let mut graph = TargetGraph::new();
        graph.add(target.clone(), "prebuilt_jar", raw);

        let mut resolver = RuleResolver::new(&registry, &graph);
        let rule = resolver.require_rule(&target).expect("require");
        assert_eq!(rule.outputs(), vec!["guava.jar"]);
    }

    #[test]
    fn missing_binary_jar_is_rejected() {
        let mut registry = DescriptionRegistry::new();
        registry.register(PrebuiltJarDescription).expect("register");

        let target = BuildTarget::new("third-party", "guava");
        let mut graph = TargetGraph::new();
        graph.add(target.clone(), "prebuilt_jar", RawArgs::new());

        let mut resolver = RuleResolver::new(&registry, &graph);
        let err = resolver.require_rule(&target).expect_err("missing");
        assert!(err.to_string().contains("binary_jar"), "{err:#}");
    }
}
