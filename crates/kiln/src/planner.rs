//! The fan-out dexing planner.
//!
//! One smart step covers a whole family of dex outputs: given a multimap
//! from output path to input paths, it hashes each output's inputs, consults
//! the on-disk success markers, skips up-to-date outputs, and runs the
//! remaining per-output pipelines in parallel waves bounded by the thread
//! budget. Post-processing (stale-sibling pruning, solid xz compression of
//! grouped outputs) runs after every pipeline finished.
//!
//! The set of steps emitted depends only on the multimap, the input hashes,
//! and the success-directory contents; never on wall clock or host CPU
//! count. Within one output's pipeline steps run strictly in order, with the
//! success-marker write last, so a partial failure leaves the marker absent
//! and forces a full rebuild of that output next time.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use kiln_state::SuccessDir;
use kiln_types::{BuildEventType, KilnError};

use crate::config::Config;
use crate::hashing::{ContentHasher, sha1_hex};
use crate::runner::run_steps;
use crate::step::{BoxedStep, Step, StepContext, StepError};
use crate::steps::{
    ConcatStep, DexMetaStep, DexStep, RemoveFileStep, RepackZipStep, WriteFileStep, XzStep,
    ZipScrubStep,
};
use crate::steps::tool::DEX_STEP_NAME;

/// Action-specific knobs for one smart dexing run.
#[derive(Debug, Clone)]
pub struct DexOptions {
    pub dexer_program: String,
    pub xz_program: String,
    pub zip_scrubber_program: String,
    pub dex_analyzer_program: String,
    pub max_heap: Option<String>,
    pub min_sdk_version: Option<u32>,
    pub no_desugar: bool,
    /// Additional classpath-visible jars for desugaring.
    pub desugar_classpath: Vec<PathBuf>,
    pub xz_compression_level: u32,
    pub thread_budget: usize,
}

impl DexOptions {
    /// Derive options from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            dexer_program: config.dexer_program().to_string(),
            xz_program: config.xz_program().to_string(),
            zip_scrubber_program: config.zip_scrubber_program().to_string(),
            dex_analyzer_program: config.dex_analyzer_program().to_string(),
            max_heap: config.max_heap().map(String::from),
            min_sdk_version: config.min_sdk_version(),
            no_desugar: config.no_desugar(),
            desugar_classpath: Vec::new(),
            xz_compression_level: config.xz_compression_level(),
            thread_budget: config.dex_threads().unwrap_or_else(recommended_thread_budget),
        }
    }
}

/// Recommended dexing thread budget: `max(logical cores / 2, 1)`.
///
/// An estimate of physical cores, on the premise that the bottleneck is
/// CPU-bound external tooling rather than I/O.
pub fn recommended_thread_budget() -> usize {
    std::cmp::max(num_cpus::get() / 2, 1)
}

/// Multimap from output path to the inputs it is built from.
pub type OutputsToInputs = BTreeMap<PathBuf, BTreeSet<PathBuf>>;

/// Deferred multimap construction; resolved once, at execution time.
pub type MultimapSupplier = Box<dyn FnOnce() -> Result<OutputsToInputs> + Send + Sync>;

/// The post-dex treatment an output's suffix selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    /// Bare `.dex` file, `classes.dex` included.
    PlainDex,
    /// `.dex.jar`: dex, analyze, scrub.
    DexJar,
    /// `.dex.jar.xz`: dex, repack, analyze, compress per jar.
    XzJar,
    /// `.dex.jar.xzs`: dex, repack, analyze; compression deferred to the
    /// solid phase.
    XzsJar,
}

/// Classify an output file name by suffix.
pub fn pipeline_kind(output_name: &str) -> Result<PipelineKind> {
    if output_name.ends_with(".dex.jar.xzs") {
        Ok(PipelineKind::XzsJar)
    } else if output_name.ends_with(".dex.jar.xz") {
        Ok(PipelineKind::XzJar)
    } else if output_name.ends_with(".dex.jar") {
        Ok(PipelineKind::DexJar)
    } else if output_name.ends_with(".dex") {
        Ok(PipelineKind::PlainDex)
    } else {
        Err(KilnError::Config(format!(
            "cannot infer dex pipeline for output '{output_name}': \
             expected a .dex, .dex.jar, .dex.jar.xz or .dex.jar.xzs suffix"
        ))
        .into())
    }
}

/// Hash that decides freshness of one output: SHA-1 over the concatenation
/// of its inputs' content hashes, inputs in sorted order.
///
/// Missing entries are a programmer error: the caller snapshots hashes for
/// exactly the multimap's inputs.
pub fn combined_input_hash(
    inputs: &BTreeSet<PathBuf>,
    hashes: &BTreeMap<PathBuf, String>,
) -> String {
    let mut concatenated = String::new();
    for input in inputs {
        let hash = hashes
            .get(input)
            .unwrap_or_else(|| panic!("no input hash recorded for {}", input.display()));
        concatenated.push_str(hash);
    }
    sha1_hex(concatenated.as_bytes())
}

/// Solid-compression grouping key: the first dash-separated token of the
/// file name. `secondary-1.dex.jar.xzs` groups under `secondary`.
pub fn xzs_group_prefix(file_name: &str) -> String {
    match file_name.split_once('-') {
        Some((prefix, _)) => prefix.to_string(),
        None => file_name.trim_end_matches(".dex.jar.xzs").to_string(),
    }
}

/// Patterns marking a dexer failure as a format-limit overflow.
const OVERFLOW_PATTERNS: &[&str] = &[
    "method ID not in [0, 0xffff]",
    "field ID not in [0, 0xffff]",
    "Cannot fit requested classes in a single dex",
    "Too many method references",
    "Too many field references",
];

/// Whether a failed step is a dex-overflow.
pub fn is_dex_overflow(error: &StepError) -> bool {
    error.step == DEX_STEP_NAME
        && OVERFLOW_PATTERNS
            .iter()
            .any(|pattern| error.message.contains(pattern))
}

fn output_file_name(output: &Path) -> Result<&str> {
    output
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("dex output path {} has no file name", output.display()))
}

/// The smart fan-out step: per-output hashing gate, parallel pipelines,
/// pruning, and solid compression.
pub struct SmartDexStep {
    supplier: Mutex<Option<MultimapSupplier>>,
    hashes: Arc<dyn ContentHasher>,
    success_dir: SuccessDir,
    secondary_output_dir: Option<PathBuf>,
    options: DexOptions,
}

impl SmartDexStep {
    /// Build the step. The multimap supplier runs once, at execution time,
    /// after upstream rules have produced their outputs.
    pub fn new(
        supplier: impl FnOnce() -> Result<OutputsToInputs> + Send + Sync + 'static,
        hashes: Arc<dyn ContentHasher>,
        success_dir: SuccessDir,
        options: DexOptions,
    ) -> Self {
        Self {
            supplier: Mutex::new(Some(Box::new(supplier))),
            hashes,
            success_dir,
            secondary_output_dir: None,
            options,
        }
    }

    /// Enable stale-sibling pruning for a secondary output directory.
    pub fn with_secondary_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.secondary_output_dir = Some(dir.into());
        self
    }

    fn dex_step(&self, inputs: Vec<PathBuf>, output: PathBuf) -> DexStep {
        let mut step = DexStep::new(&self.options.dexer_program, inputs, output);
        step.max_heap = self.options.max_heap.clone();
        step.min_sdk_version = self.options.min_sdk_version;
        step.no_desugar = self.options.no_desugar;
        step.desugar_classpath = self.options.desugar_classpath.clone();
        step
    }

    /// The ordered pipeline for one stale output. The dex step is first and
    /// the success-marker write is last, always.
    fn build_pipeline(
        &self,
        output: &Path,
        name: &str,
        inputs: &BTreeSet<PathBuf>,
        new_hash: &str,
    ) -> Result<Vec<BoxedStep>> {
        let input_list: Vec<PathBuf> = inputs.iter().cloned().collect();
        let parent = output
            .parent()
            .ok_or_else(|| anyhow!("dex output path {} has no parent", output.display()))?;

        let mut steps: Vec<BoxedStep> = Vec::new();
        match pipeline_kind(name)? {
            PipelineKind::PlainDex => {
                steps.push(Box::new(self.dex_step(input_list, output.to_path_buf())));
            }
            PipelineKind::DexJar => {
                steps.push(Box::new(self.dex_step(input_list, output.to_path_buf())));
                steps.push(Box::new(DexMetaStep::new(
                    &self.options.dex_analyzer_program,
                    output,
                )));
                steps.push(Box::new(ZipScrubStep::new(
                    &self.options.zip_scrubber_program,
                    output,
                )));
            }
            PipelineKind::XzJar => {
                let repacked = parent.join(name.trim_end_matches(".xz"));
                let tmp = parent.join(name.replace(".dex.jar.xz", ".tmp.jar"));
                steps.push(Box::new(self.dex_step(input_list, tmp.clone())));
                steps.push(Box::new(RepackZipStep::new(&tmp, &repacked)));
                steps.push(Box::new(RemoveFileStep::new(&tmp)));
                steps.push(Box::new(DexMetaStep::new(
                    &self.options.dex_analyzer_program,
                    &repacked,
                )));
                steps.push(Box::new(XzStep::new(
                    &self.options.xz_program,
                    repacked,
                    self.options.xz_compression_level,
                )));
            }
            PipelineKind::XzsJar => {
                // The repacked jar parks at the output path; the actual xz
                // run happens in the solid-concat phase over the whole group.
                let tmp = parent.join(name.replace(".dex.jar.xzs", ".tmp.jar"));
                steps.push(Box::new(self.dex_step(input_list, tmp.clone())));
                steps.push(Box::new(RepackZipStep::new(&tmp, output)));
                steps.push(Box::new(RemoveFileStep::new(&tmp)));
                steps.push(Box::new(DexMetaStep::new(
                    &self.options.dex_analyzer_program,
                    output,
                )));
            }
        }

        steps.push(Box::new(WriteFileStep::new(
            self.success_dir.marker_path(name),
            new_hash.as_bytes().to_vec(),
        )));
        Ok(steps)
    }

    fn prune_stale_siblings(
        &self,
        ctx: &StepContext,
        dir: &Path,
        produced: &BTreeSet<PathBuf>,
    ) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".meta") || produced.contains(&path) {
                continue;
            }
            std::fs::remove_file(&path)?;
            ctx.events
                .lock()
                .unwrap()
                .record_now(BuildEventType::OutputPruned, path.display().to_string());
        }
        Ok(())
    }

    fn solid_compress_groups(&self, ctx: &StepContext, multimap: &OutputsToInputs) -> Result<()> {
        let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for output in multimap.keys() {
            let name = output_file_name(output)?;
            if pipeline_kind(name)? == PipelineKind::XzsJar {
                groups
                    .entry(xzs_group_prefix(name))
                    .or_default()
                    .push(output.clone());
            }
        }

        // One group at a time, strictly after the dex phase.
        for (prefix, members) in groups {
            let dir = members[0]
                .parent()
                .ok_or_else(|| anyhow!("xzs output has no parent directory"))?
                .to_path_buf();
            let blob = dir.join(format!("{prefix}.dex.jar"));
            let steps: Vec<BoxedStep> = vec![
                Box::new(ConcatStep::new(members, blob.clone())),
                Box::new(
                    XzStep::new(
                        &self.options.xz_program,
                        blob,
                        self.options.xz_compression_level,
                    )
                    .with_suffix(".xzs"),
                ),
            ];
            run_steps(ctx, &steps, None)?;
        }
        Ok(())
    }

    fn report_failures(
        &self,
        ctx: &StepContext,
        failures: Vec<(PathBuf, anyhow::Error)>,
    ) -> anyhow::Error {
        {
            let mut reporter = ctx.reporter.lock().unwrap();
            for (output, error) in failures.iter().skip(1) {
                reporter.warn(&format!("dexing {} also failed: {error}", output.display()));
            }
        }

        let (output, error) = failures
            .into_iter()
            .next()
            .expect("report_failures called with no failures");

        let overflow = error
            .chain()
            .find_map(|cause| cause.downcast_ref::<StepError>())
            .filter(|step_error| is_dex_overflow(step_error))
            .cloned();
        match overflow {
            Some(step_error) => KilnError::DexOverflow {
                output: output.display().to_string(),
                message: format!(
                    "{}\nthe inputs for this output no longer fit one dex file; \
                     split them across more secondary dex files or raise the \
                     minimum SDK level to enable native multidex",
                    step_error.message
                ),
            }
            .into(),
            None => error.context(format!("dexing {} failed", output.display())),
        }
    }
}

impl Step for SmartDexStep {
    fn short_name(&self) -> &str {
        "smart-dex"
    }

    fn description(&self) -> String {
        "hash, dex and compress a family of dex outputs".to_string()
    }

    fn execute(&self, ctx: &StepContext) -> Result<()> {
        let supplier = self
            .supplier
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow!("smart dex step executed twice"))?;
        let multimap = supplier()?;

        // Snapshot every input's content hash once, up front.
        let mut hashes: BTreeMap<PathBuf, String> = BTreeMap::new();
        for inputs in multimap.values() {
            for input in inputs {
                if !hashes.contains_key(input) {
                    hashes.insert(input.clone(), self.hashes.hash_file(input)?);
                }
            }
        }

        // Gate each output on its recorded success marker.
        let mut pending: Vec<(PathBuf, Vec<BoxedStep>)> = Vec::new();
        for (output, inputs) in &multimap {
            let name = output_file_name(output)?;
            let new_hash = combined_input_hash(inputs, &hashes);
            let previous = self.success_dir.recorded_hash(name)?;
            if output.exists() && previous.as_deref() == Some(new_hash.as_str()) {
                ctx.events
                    .lock()
                    .unwrap()
                    .record_now(BuildEventType::OutputUpToDate, output.display().to_string());
                continue;
            }
            pending.push((output.clone(), self.build_pipeline(output, name, inputs, &new_hash)?));
        }

        // Run pipelines in waves bounded by the thread budget. A failing
        // wave drains; later waves are never submitted.
        let budget = self.options.thread_budget.max(1);
        let mut failures: Vec<(PathBuf, anyhow::Error)> = Vec::new();
        let mut remaining = pending;
        while !remaining.is_empty() && failures.is_empty() {
            let take = budget.min(remaining.len());
            let wave: Vec<(PathBuf, Vec<BoxedStep>)> = remaining.drain(..take).collect();

            let results: Vec<(PathBuf, Result<usize>)> = std::thread::scope(|scope| {
                let handles: Vec<_> = wave
                    .into_iter()
                    .map(|(output, steps)| {
                        let worker_ctx = ctx.clone();
                        scope.spawn(move || {
                            let result = run_steps(&worker_ctx, &steps, None);
                            (output, result)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| handle.join().expect("dex worker thread panicked"))
                    .collect()
            });

            for (output, result) in results {
                match result {
                    Ok(_) => {
                        ctx.events
                            .lock()
                            .unwrap()
                            .record_now(BuildEventType::OutputBuilt, output.display().to_string());
                    }
                    Err(error) => failures.push((output, error)),
                }
            }
        }

        if !failures.is_empty() {
            return Err(self.report_failures(ctx, failures));
        }

        if let Some(dir) = &self.secondary_output_dir {
            if !multimap.is_empty() && dir.exists() {
                let produced: BTreeSet<PathBuf> = multimap.keys().cloned().collect();
                self.prune_stale_siblings(ctx, dir, &produced)?;
            }
        }

        self.solid_compress_groups(ctx, &multimap)?;
        Ok(())
    }
}

/// Convenience: build a multimap from `(output, inputs)` pairs.
pub fn outputs_to_inputs<I, O, P>(pairs: I) -> OutputsToInputs
where
    I: IntoIterator<Item = (O, Vec<P>)>,
    O: Into<PathBuf>,
    P: Into<PathBuf>,
{
    pairs
        .into_iter()
        .map(|(output, inputs)| {
            (
                output.into(),
                inputs.into_iter().map(Into::into).collect::<BTreeSet<_>>(),
            )
        })
        .collect()
}
