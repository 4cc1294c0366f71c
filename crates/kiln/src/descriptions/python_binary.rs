//! `python_binary`: link dependency outputs into one PEX.
//!
//! The PEX linker's command line references the rule's own output artifact,
//! which is exactly the shape the rule-key cycle break exists for: the
//! argument contributes the target's canonical form, never the artifact's
//! content.

use std::sync::Arc;

use anyhow::Result;
use kiln_types::{AttrValue, BuildTarget, SourcePath};

use crate::args::{ArgBag, ArgKind, ArgSpec, CmdObject, CommandArgs};
use crate::artifact::{Artifact, OutputArtifact};
use crate::description::Description;
use crate::resolver::RuleResolver;
use crate::rule::{BuildContext, BuildRule};
use crate::rulekey::RuleKeyBuilder;
use crate::step::BoxedStep;
use crate::steps::{CommandStep, MakeDirStep};

pub struct PythonBinaryDescription;

impl Description for PythonBinaryDescription {
    fn rule_type(&self) -> &'static str {
        "python_binary"
    }

    fn arg_specs(&self) -> Vec<ArgSpec> {
        vec![
            ArgSpec::required("main_module", ArgKind::Str),
            ArgSpec::optional("deps", ArgKind::TargetList),
            ArgSpec::optional("zip_safe", ArgKind::Bool),
        ]
    }

    fn create(
        &self,
        target: &BuildTarget,
        args: &ArgBag,
        resolver: &mut RuleResolver<'_>,
    ) -> Result<Arc<dyn BuildRule>> {
        let deps = args.target_list("deps");
        let sources = collect_dep_outputs(resolver, &deps)?;
        let output = resolver.declare_output(target, format!("{}.pex", target.name()))?;
        Ok(Arc::new(PythonBinaryRule::new(
            target.clone(),
            args.str_value("main_module").to_string(),
            deps,
            sources,
            output,
            args.bool_value("zip_safe", true),
        )))
    }
}

/// Artifacts for every output of every dependency, in dependency order.
pub(crate) fn collect_dep_outputs(
    resolver: &mut RuleResolver<'_>,
    deps: &[BuildTarget],
) -> Result<Vec<Artifact>> {
    let mut sources = Vec::new();
    for dep in deps {
        let rule = resolver.require_rule(dep)?;
        for output in rule.outputs() {
            sources.push(Artifact::from_source(SourcePath::build(dep.clone(), output)));
        }
    }
    Ok(sources)
}

pub struct PythonBinaryRule {
    target: BuildTarget,
    main_module: String,
    deps: Vec<BuildTarget>,
    zip_safe: bool,
    output_name: String,
    command: CommandArgs,
}

impl PythonBinaryRule {
    pub(crate) fn new(
        target: BuildTarget,
        main_module: String,
        deps: Vec<BuildTarget>,
        sources: Vec<Artifact>,
        output: OutputArtifact,
        zip_safe: bool,
    ) -> Self {
        let output_name = format!("{}.pex", target.name());
        let mut command = CommandArgs::new()
            .add_formatted("--entry-point={}", CmdObject::Literal(main_module.clone()))
            .add(CmdObject::Literal("--output".into()))
            .add(CmdObject::Output(output));
        if !zip_safe {
            command = command.add(CmdObject::Literal("--not-zip-safe".into()));
        }
        for source in sources {
            command = command.add(CmdObject::Artifact(source));
        }

        Self {
            target,
            main_module,
            deps,
            zip_safe,
            output_name,
            command,
        }
    }
}

impl BuildRule for PythonBinaryRule {
    fn rule_type(&self) -> &'static str {
        "python_binary"
    }

    fn target(&self) -> &BuildTarget {
        &self.target
    }

    fn deps(&self) -> Vec<BuildTarget> {
        self.deps.clone()
    }

    fn append_rule_key(&self, key: &mut RuleKeyBuilder<'_>) -> Result<()> {
        key.put_attr("main_module", &AttrValue::Str(self.main_module.clone()))?;
        key.put_attr("deps", &AttrValue::TargetList(self.deps.clone()))?;
        key.put_attr("zip_safe", &AttrValue::Bool(self.zip_safe))?;
        key.put_step("pex", &[]);
        key.put_command_args(&self.command);
        Ok(())
    }

    fn steps(&self, ctx: &BuildContext) -> Result<Vec<BoxedStep>> {
        Ok(vec![
            Box::new(MakeDirStep::new(ctx.filesystem.rule_out_dir(&self.target))),
            Box::new(CommandStep::new(
                "pex",
                ctx.config.pex_program(),
                self.command.clone(),
            )),
        ])
    }

    fn outputs(&self) -> Vec<String> {
        vec![self.output_name.clone()]
    }
}
