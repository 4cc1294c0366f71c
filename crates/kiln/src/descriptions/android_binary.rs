//! `android_binary`: dex the dependency jars into a primary `classes.dex`
//! plus per-jar secondary dex containers, through the smart fan-out step.

use std::sync::Arc;

use anyhow::Result;
use kiln_types::{BuildTarget, KilnError, SourcePath};

use crate::args::{ArgBag, ArgKind, ArgSpec};
use crate::description::Description;
use crate::hashing::FileHashCache;
use crate::planner::{DexOptions, OutputsToInputs, SmartDexStep};
use crate::resolver::RuleResolver;
use crate::rule::{BuildContext, BuildRule};
use crate::rulekey::RuleKeyBuilder;
use crate::step::BoxedStep;
use crate::steps::MakeDirStep;
use kiln_state::SuccessDir;

const PRIMARY_DEX: &str = "classes.dex";
const SUCCESS_DIR: &str = ".dex_success";

pub struct AndroidBinaryDescription;

impl Description for AndroidBinaryDescription {
    fn rule_type(&self) -> &'static str {
        "android_binary"
    }

    fn arg_specs(&self) -> Vec<ArgSpec> {
        vec![
            ArgSpec::required("deps", ArgKind::TargetList),
            ArgSpec::optional("secondary_dex_compression", ArgKind::Str),
            ArgSpec::optional("secondary_dex_dir", ArgKind::Str),
        ]
    }

    fn create(
        &self,
        target: &BuildTarget,
        args: &ArgBag,
        resolver: &mut RuleResolver<'_>,
    ) -> Result<Arc<dyn BuildRule>> {
        let compression = args
            .opt_str("secondary_dex_compression")
            .unwrap_or("raw")
            .to_string();
        let secondary_suffix = match compression.as_str() {
            "raw" => ".dex.jar",
            "xz" => ".dex.jar.xz",
            "xzs" => ".dex.jar.xzs",
            other => {
                return Err(KilnError::Config(format!(
                    "android_binary rule {target}: secondary_dex_compression must be \
                     'raw', 'xz' or 'xzs', got '{other}'"
                ))
                .into());
            }
        };

        let deps = args.target_list("deps");
        let mut jar_sources = Vec::new();
        for dep in &deps {
            let rule = resolver.require_rule(dep)?;
            for output in rule.outputs() {
                if output.ends_with(".jar") {
                    jar_sources.push(SourcePath::build(dep.clone(), output));
                }
            }
        }
        if jar_sources.is_empty() {
            return Err(KilnError::Config(format!(
                "android_binary rule {target} has no jar-producing dependencies to dex"
            ))
            .into());
        }

        let secondary_dir = args
            .opt_str("secondary_dex_dir")
            .unwrap_or("secondary_dexes")
            .to_string();

        let rule = AndroidBinaryRule {
            target: target.clone(),
            args: args.clone(),
            deps,
            jar_sources,
            secondary_suffix,
            secondary_dir,
        };
        for output in rule.outputs() {
            resolver.declare_output(target, output)?;
        }
        Ok(Arc::new(rule))
    }
}

pub struct AndroidBinaryRule {
    target: BuildTarget,
    args: ArgBag,
    deps: Vec<BuildTarget>,
    /// Jar outputs of the dependencies, in dependency order; the first jar
    /// feeds the primary dex, the rest one secondary each.
    jar_sources: Vec<SourcePath>,
    secondary_suffix: &'static str,
    secondary_dir: String,
}

impl AndroidBinaryRule {
    fn secondary_names(&self) -> Vec<String> {
        (1..self.jar_sources.len())
            .map(|index| {
                format!(
                    "{}/secondary-{index}{}",
                    self.secondary_dir, self.secondary_suffix
                )
            })
            .collect()
    }
}

impl BuildRule for AndroidBinaryRule {
    fn rule_type(&self) -> &'static str {
        "android_binary"
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
        for source in &self.jar_sources {
            key.put_source(source)?;
        }
        key.put_step(
            "smart-dex",
            &[
                self.secondary_suffix.to_string(),
                self.secondary_dir.clone(),
            ],
        );
        Ok(())
    }

    fn steps(&self, ctx: &BuildContext) -> Result<Vec<BoxedStep>> {
        let filesystem = ctx.filesystem.clone();
        let out_dir = filesystem.rule_out_dir(&self.target);
        let secondary_dir = out_dir.join(&self.secondary_dir);
        let success_dir = SuccessDir::new(out_dir.join(SUCCESS_DIR));

        let jar_sources = self.jar_sources.clone();
        let secondary_suffix = self.secondary_suffix;
        let supplier_fs = filesystem.clone();
        let supplier_out_dir = out_dir.clone();
        let supplier_secondary_dir = secondary_dir.clone();
        let supplier = move || -> Result<OutputsToInputs> {
            let mut multimap = OutputsToInputs::new();
            let mut resolved = Vec::with_capacity(jar_sources.len());
            for source in &jar_sources {
                resolved.push(supplier_fs.resolve(source)?);
            }
            multimap.insert(
                supplier_out_dir.join(PRIMARY_DEX),
                [resolved[0].clone()].into(),
            );
            for (index, jar) in resolved.iter().enumerate().skip(1) {
                multimap.insert(
                    supplier_secondary_dir.join(format!("secondary-{index}{secondary_suffix}")),
                    [jar.clone()].into(),
                );
            }
            Ok(multimap)
        };

        let options = DexOptions::from_config(&ctx.config);
        let hasher = Arc::new(FileHashCache::new(filesystem.root().to_path_buf()));
        let mut smart_dex =
            SmartDexStep::new(supplier, hasher, success_dir, options);
        let has_secondaries = self.jar_sources.len() > 1;
        if has_secondaries {
            smart_dex = smart_dex.with_secondary_output_dir(secondary_dir.clone());
        }

        let mut steps: Vec<BoxedStep> = vec![Box::new(MakeDirStep::new(out_dir))];
        if has_secondaries {
            steps.push(Box::new(MakeDirStep::new(secondary_dir)));
        }
        steps.push(Box::new(smart_dex));
        Ok(steps)
    }

    fn outputs(&self) -> Vec<String> {
        let mut outputs = vec![PRIMARY_DEX.to_string()];
        outputs.extend(self.secondary_names());
        outputs
    }
}
