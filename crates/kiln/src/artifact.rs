//! Artifacts and the output-path layout.
//!
//! An [`Artifact`] is a typed reference to a file an action consumes or
//! produces. Unbound artifacts are declared outputs not yet wired to a
//! producing action; binding turns them into build-target sources. A bound
//! artifact never holds a reference to its producing rule, only the
//! `(target, output)` pair, so following the edge requires the frozen rule
//! graph and rule-key computation cannot recurse through it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use kiln_types::{BuildTarget, KilnError, SourcePath};

/// Directory name of the build output tree under the project root.
pub const OUT_DIR: &str = "kiln-out";

/// Typed reference to a file, either declared (unbound) or bound to a
/// source path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    inner: ArtifactInner,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ArtifactInner {
    /// Declared output of an action, not yet wired.
    Unbound { owner: BuildTarget, output: String },
    /// Wired to a concrete source path.
    Bound { source: SourcePath },
}

impl Artifact {
    /// Declare an output artifact owned by `owner`.
    pub fn declared(owner: BuildTarget, output: impl Into<String>) -> Self {
        Self {
            inner: ArtifactInner::Unbound {
                owner,
                output: output.into(),
            },
        }
    }

    /// An artifact already bound to a source path.
    pub fn from_source(source: SourcePath) -> Self {
        Self {
            inner: ArtifactInner::Bound { source },
        }
    }

    /// Whether this artifact has been bound.
    pub fn is_bound(&self) -> bool {
        matches!(self.inner, ArtifactInner::Bound { .. })
    }

    /// Bind a declared artifact to its owner's output.
    ///
    /// Binding an already-bound artifact is a no-op.
    pub fn bind(self) -> Artifact {
        match self.inner {
            ArtifactInner::Unbound { owner, output } => {
                Artifact::from_source(SourcePath::build(owner, output))
            }
            bound @ ArtifactInner::Bound { .. } => Artifact { inner: bound },
        }
    }

    /// The bound source path, if any.
    pub fn source(&self) -> Option<&SourcePath> {
        match &self.inner {
            ArtifactInner::Unbound { .. } => None,
            ArtifactInner::Bound { source } => Some(source),
        }
    }

    /// Canonical representation for rule keys.
    ///
    /// A bound artifact whose source is a build-target source contributes
    /// the target's canonical form only; recursing into the producing rule
    /// would reintroduce the cycle this representation exists to break.
    pub fn rule_key_form(&self) -> String {
        match &self.inner {
            ArtifactInner::Unbound { owner, output } => format!("{owner}[{output}]"),
            ArtifactInner::Bound { source } => match source {
                SourcePath::Build { target, .. } => target.canonical(),
                SourcePath::Path { path } => path.display().to_string(),
            },
        }
    }
}

/// An artifact that a particular action promises to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact(Artifact);

impl OutputArtifact {
    /// Wrap an artifact as the promised output of an action.
    pub fn new(artifact: Artifact) -> Self {
        Self(artifact)
    }

    /// The wrapped artifact.
    pub fn artifact(&self) -> &Artifact {
        &self.0
    }

    /// Rule-key representation: the inner artifact's.
    pub fn rule_key_form(&self) -> String {
        self.0.rule_key_form()
    }
}

/// Resolves source paths and artifacts to concrete on-disk paths.
///
/// Layout contract: rule outputs live under
/// `<root>/kiln-out/[<cell>/]<package>/<name>[#flavors]/<output>`; path
/// sources resolve against their cell root (`cell//rel/path` selects a
/// configured cell, plain relative paths the root cell).
#[derive(Debug, Clone)]
pub struct ArtifactFilesystem {
    root: PathBuf,
    cells: BTreeMap<String, PathBuf>,
}

impl ArtifactFilesystem {
    /// A filesystem rooted at the project directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cells: BTreeMap::new(),
        }
    }

    /// Register a named cell root.
    pub fn with_cell(mut self, name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        self.cells.insert(name.into(), root.into());
        self
    }

    /// The project root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root of the build output tree.
    pub fn out_root(&self) -> PathBuf {
        self.root.join(OUT_DIR)
    }

    /// Root of a named cell; the empty name is the root cell.
    pub fn cell_root(&self, name: &str) -> Result<&Path> {
        if name.is_empty() {
            return Ok(&self.root);
        }
        match self.cells.get(name) {
            Some(root) => Ok(root.as_path()),
            None => Err(KilnError::Config(format!("unknown cell '{name}'")).into()),
        }
    }

    /// Output directory for one rule.
    pub fn rule_out_dir(&self, target: &BuildTarget) -> PathBuf {
        let mut dir = self.out_root();
        if !target.cell().is_empty() {
            dir.push(target.cell());
        }
        if !target.package().is_empty() {
            dir.push(target.package());
        }
        let mut leaf = target.name().to_string();
        if !target.flavors().is_empty() {
            let tags: Vec<&str> = target.flavors().iter().map(|f| f.as_str()).collect();
            leaf.push('#');
            leaf.push_str(&tags.join(","));
        }
        dir.push(leaf);
        dir
    }

    /// On-disk path of one named output of a rule.
    pub fn output_path(&self, target: &BuildTarget, output: &str) -> PathBuf {
        self.rule_out_dir(target).join(output)
    }

    /// Resolve a source path to a concrete on-disk path.
    pub fn resolve(&self, source: &SourcePath) -> Result<PathBuf> {
        match source {
            SourcePath::Path { path } => {
                let raw = path.to_string_lossy();
                if let Some((cell, rest)) = raw.split_once("//") {
                    Ok(self.cell_root(cell)?.join(rest))
                } else {
                    Ok(self.root.join(path))
                }
            }
            SourcePath::Build { target, output } => Ok(self.output_path(target, output)),
        }
    }

    /// Resolve an artifact; unbound artifacts resolve to their owner's
    /// promised output path.
    pub fn resolve_artifact(&self, artifact: &Artifact) -> Result<PathBuf> {
        match &artifact.inner {
            ArtifactInner::Unbound { owner, output } => Ok(self.output_path(owner, output)),
            ArtifactInner::Bound { source } => self.resolve(source),
        }
    }
}

/// Fail with an assembly error naming the offending target.
pub(crate) fn assembly_error<T>(target: &BuildTarget, message: impl Into<String>) -> Result<T> {
    bail!(KilnError::Assembly {
        target: target.canonical(),
        message: message.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_turns_declared_into_build_source() {
        let owner = BuildTarget::new("app", "main");
        let declared = Artifact::declared(owner.clone(), "main.pex");
        assert!(!declared.is_bound());
        assert!(declared.source().is_none());

        let bound = declared.bind();
        assert!(bound.is_bound());
        assert_eq!(
            bound.source(),
            Some(&SourcePath::build(owner, "main.pex"))
        );
    }

    #[test]
    fn rule_key_form_breaks_cycles() {
        let owner = BuildTarget::new("app", "main");
        let bound = Artifact::declared(owner.clone(), "main.pex").bind();
        // Only the producing target's canonical form, never the content.
        assert_eq!(bound.rule_key_form(), "//app:main");

        let path_bound = Artifact::from_source(SourcePath::path("src/a.py"));
        assert_eq!(path_bound.rule_key_form(), "src/a.py");

        let output = OutputArtifact::new(Artifact::declared(owner, "main.pex"));
        assert_eq!(output.rule_key_form(), "//app:main[main.pex]");
    }

    #[test]
    fn output_paths_follow_layout() {
        let fs = ArtifactFilesystem::new("/work");
        let target = BuildTarget::new("lib/util", "io");
        assert_eq!(
            fs.output_path(&target, "io.jar"),
            PathBuf::from("/work/kiln-out/lib/util/io/io.jar")
        );

        let flavored = target.with_flavor("binary");
        assert_eq!(
            fs.output_path(&flavored, "io.pex"),
            PathBuf::from("/work/kiln-out/lib/util/io#binary/io.pex")
        );
    }

    #[test]
    fn resolve_path_sources_against_cells() {
        let fs = ArtifactFilesystem::new("/work").with_cell("toolchain", "/srv/toolchain");
        assert_eq!(
            fs.resolve(&SourcePath::path("src/a.py")).expect("resolve"),
            PathBuf::from("/work/src/a.py")
        );
        assert_eq!(
            fs.resolve(&SourcePath::path("toolchain//lib/rt.jar"))
                .expect("resolve"),
            PathBuf::from("/srv/toolchain/lib/rt.jar")
        );
        assert!(fs.resolve(&SourcePath::path("nope//x")).is_err());
    }

    #[test]
    fn resolve_build_sources_to_output_paths() {
        let fs = ArtifactFilesystem::new("/work");
        let src = SourcePath::build(BuildTarget::new("lib", "a"), "a.jar");
        assert_eq!(
            fs.resolve(&src).expect("resolve"),
            PathBuf::from("/work/kiln-out/lib/a/a.jar")
        );
    }
}
