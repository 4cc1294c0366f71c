//! Steps that launch opaque external tools.
//!
//! Only the file-in/file-out contract of each tool matters here; the exact
//! CLI shape is owned by the configured program. Launches go through the
//! context's tool runner so tests can intercept them.

use std::path::PathBuf;

use anyhow::Result;
use kiln_process::ToolInvocation;

use crate::args::CommandArgs;
use crate::step::{Step, StepContext, StepError};

/// Short name of the dexer step; failure classification keys off it.
pub const DEX_STEP_NAME: &str = "dx";

fn run_checked(ctx: &StepContext, step: &str, invocation: &ToolInvocation) -> Result<()> {
    let output = ctx.tools.run(invocation)?;
    if !output.success() {
        return Err(StepError::from_tool_output(step, &output).into());
    }
    Ok(())
}

/// Run the external dexer over a set of jars, producing one dex container.
#[derive(Debug, Clone)]
pub struct DexStep {
    pub program: String,
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub max_heap: Option<String>,
    pub min_sdk_version: Option<u32>,
    pub no_desugar: bool,
    /// Additional classpath-visible jars for desugaring.
    pub desugar_classpath: Vec<PathBuf>,
}

impl DexStep {
    pub fn new(program: impl Into<String>, inputs: Vec<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            inputs,
            output: output.into(),
            max_heap: None,
            min_sdk_version: None,
            no_desugar: false,
            desugar_classpath: Vec::new(),
        }
    }

    fn invocation(&self) -> ToolInvocation {
        let mut args: Vec<String> = vec!["--output".into(), self.output.display().to_string()];
        if let Some(min_sdk) = self.min_sdk_version {
            args.push("--min-api".into());
            args.push(min_sdk.to_string());
        }
        if self.no_desugar {
            args.push("--no-desugaring".into());
        }
        for lib in &self.desugar_classpath {
            args.push("--lib".into());
            args.push(lib.display().to_string());
        }
        for input in &self.inputs {
            args.push(input.display().to_string());
        }

        let mut invocation = ToolInvocation::new(&self.program, args);
        if let Some(heap) = &self.max_heap {
            invocation = invocation.env("JAVA_OPTS", format!("-Xmx{heap}"));
        }
        invocation
    }
}

impl Step for DexStep {
    fn short_name(&self) -> &str {
        DEX_STEP_NAME
    }

    fn description(&self) -> String {
        format!(
            "dex {} inputs into {}",
            self.inputs.len(),
            self.output.display()
        )
    }

    fn execute(&self, ctx: &StepContext) -> Result<()> {
        run_checked(ctx, DEX_STEP_NAME, &self.invocation())
    }
}

/// Compress a file with the external xz tool.
///
/// On success the source file is replaced by `<source><suffix>`; this is the
/// "compress in place" behavior the dex pipelines rely on.
#[derive(Debug, Clone)]
pub struct XzStep {
    pub program: String,
    pub source: PathBuf,
    /// Destination suffix; `.xz` for per-jar compression, `.xzs` for solid
    /// blobs.
    pub suffix: String,
    pub compression_level: u32,
}

impl XzStep {
    pub fn new(program: impl Into<String>, source: impl Into<PathBuf>, level: u32) -> Self {
        Self {
            program: program.into(),
            source: source.into(),
            suffix: ".xz".to_string(),
            compression_level: level,
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// The path the compressed output lands at.
    pub fn destination(&self) -> PathBuf {
        let mut name = self.source.as_os_str().to_os_string();
        name.push(&self.suffix);
        PathBuf::from(name)
    }

    fn invocation(&self) -> ToolInvocation {
        let mut args: Vec<String> = vec!["-z".into(), format!("-{}", self.compression_level)];
        if self.suffix != ".xz" {
            args.push("-S".into());
            args.push(self.suffix.clone());
        }
        args.push(self.source.display().to_string());
        ToolInvocation::new(&self.program, args)
    }
}

impl Step for XzStep {
    fn short_name(&self) -> &str {
        "xz"
    }

    fn description(&self) -> String {
        format!(
            "xz -{} {} -> {}",
            self.compression_level,
            self.source.display(),
            self.destination().display()
        )
    }

    fn execute(&self, ctx: &StepContext) -> Result<()> {
        run_checked(ctx, "xz", &self.invocation())
    }
}

/// Normalize zip metadata (timestamps, ordering) for deterministic output.
#[derive(Debug, Clone)]
pub struct ZipScrubStep {
    pub program: String,
    pub archive: PathBuf,
}

impl ZipScrubStep {
    pub fn new(program: impl Into<String>, archive: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            archive: archive.into(),
        }
    }
}

impl Step for ZipScrubStep {
    fn short_name(&self) -> &str {
        "zip-scrub"
    }

    fn description(&self) -> String {
        format!("scrub zip metadata in {}", self.archive.display())
    }

    fn execute(&self, ctx: &StepContext) -> Result<()> {
        let invocation =
            ToolInvocation::new(&self.program, [self.archive.display().to_string()]);
        run_checked(ctx, "zip-scrub", &invocation)
    }
}

/// Analyze a dex jar and record the result next to it as `<jar>.meta`.
#[derive(Debug, Clone)]
pub struct DexMetaStep {
    pub program: String,
    pub jar: PathBuf,
    pub output: PathBuf,
}

impl DexMetaStep {
    pub fn new(program: impl Into<String>, jar: impl Into<PathBuf>) -> Self {
        let jar = jar.into();
        let mut meta = jar.as_os_str().to_os_string();
        meta.push(".meta");
        Self {
            program: program.into(),
            jar,
            output: PathBuf::from(meta),
        }
    }
}

impl Step for DexMetaStep {
    fn short_name(&self) -> &str {
        "dex-meta"
    }

    fn description(&self) -> String {
        format!(
            "analyze {} into {}",
            self.jar.display(),
            self.output.display()
        )
    }

    fn execute(&self, ctx: &StepContext) -> Result<()> {
        let invocation = ToolInvocation::new(
            &self.program,
            [self.jar.display().to_string(), self.output.display().to_string()],
        );
        run_checked(ctx, "dex-meta", &invocation)
    }
}

/// Run an arbitrary program with a late-rendered command line.
///
/// The argument bundle is stringified against the artifact filesystem at
/// execution time, so artifact references resolve to the paths of the
/// current build.
#[derive(Debug, Clone)]
pub struct CommandStep {
    pub name: String,
    pub program: String,
    pub command: CommandArgs,
}

impl CommandStep {
    pub fn new(
        name: impl Into<String>,
        program: impl Into<String>,
        command: CommandArgs,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            command,
        }
    }
}

impl Step for CommandStep {
    fn short_name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        format!("run {}", self.program)
    }

    fn execute(&self, ctx: &StepContext) -> Result<()> {
        let argv = self.command.stringify(&ctx.filesystem)?;
        let mut invocation = ToolInvocation::new(&self.program, argv);
        invocation.env = self.command.env().clone();
        run_checked(ctx, &self.name, &invocation)
    }
}
