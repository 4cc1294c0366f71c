//! Attribute bags and command-line argument bundles.
//!
//! Each description declares the options it recognizes as a list of
//! [`ArgSpec`]s; [`validate_args`] checks a raw attribute bag against them,
//! rejecting unknown keys and filling empty defaults for absent optional
//! collections. The validated [`ArgBag`] is what descriptions consume.
//!
//! [`CommandArgs`] models a rule's command line: an ordered list of
//! `(object, format-string)` pairs plus an environment map. Objects are
//! stringified late, when the artifact filesystem can resolve artifact
//! references to concrete paths; for rule keys they contribute canonical
//! representations instead (see [`crate::rulekey`]).

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::{Result, bail};
use kiln_types::{AttrValue, BuildTarget, KilnError, SourcePath};
use serde::{Deserialize, Serialize};

use crate::artifact::{Artifact, ArtifactFilesystem, OutputArtifact};

/// Expected type of one declared option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Bool,
    Int,
    Str,
    StrList,
    StrSet,
    Source,
    SourceMap,
    Target,
    TargetList,
}

impl ArgKind {
    fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Str => "string",
            Self::StrList => "string_list",
            Self::StrSet => "string_set",
            Self::Source => "source",
            Self::SourceMap => "source_map",
            Self::Target => "target",
            Self::TargetList => "target_list",
        }
    }

    fn matches(self, value: &AttrValue) -> bool {
        matches!(
            (self, value),
            (Self::Bool, AttrValue::Bool(_))
                | (Self::Int, AttrValue::Int(_))
                | (Self::Str, AttrValue::Str(_))
                | (Self::StrList, AttrValue::StrList(_))
                | (Self::StrSet, AttrValue::StrSet(_))
                | (Self::Source, AttrValue::Source(_))
                | (Self::SourceMap, AttrValue::SourceMap(_))
                | (Self::Target, AttrValue::Target(_))
                | (Self::TargetList, AttrValue::TargetList(_))
        )
    }

    /// Empty default for collection kinds; scalar kinds have none.
    fn empty_default(self) -> Option<AttrValue> {
        match self {
            Self::StrList => Some(AttrValue::StrList(Vec::new())),
            Self::StrSet => Some(AttrValue::StrSet(BTreeSet::new())),
            Self::SourceMap => Some(AttrValue::SourceMap(BTreeMap::new())),
            Self::TargetList => Some(AttrValue::TargetList(Vec::new())),
            _ => None,
        }
    }
}

/// One declared option of a rule type.
#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
}

impl ArgSpec {
    /// A required option.
    pub fn required(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    /// An optional option; collection kinds default to empty.
    pub fn optional(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

/// Raw attribute bag as handed to the core by the build-file front-end.
pub type RawArgs = BTreeMap<String, AttrValue>;

/// Validated attribute bag with defaults filled in.
///
/// Serializes losslessly; restoring a bag reproduces the same rule-key
/// contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgBag {
    values: BTreeMap<String, AttrValue>,
}

impl ArgBag {
    /// The raw value of an option, if present.
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.values.get(name)
    }

    /// A required string option; validation guarantees presence and type.
    pub fn str_value(&self, name: &str) -> &str {
        match self.values.get(name) {
            Some(AttrValue::Str(s)) => s,
            _ => panic!("option '{name}' missing after validation"),
        }
    }

    /// An optional string option.
    pub fn opt_str(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(AttrValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// An optional bool option with a default.
    pub fn bool_value(&self, name: &str, default: bool) -> bool {
        match self.values.get(name) {
            Some(AttrValue::Bool(b)) => *b,
            _ => default,
        }
    }

    /// An optional int option.
    pub fn opt_int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(AttrValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    /// A string-set option; empty when absent.
    pub fn str_set(&self, name: &str) -> BTreeSet<String> {
        match self.values.get(name) {
            Some(AttrValue::StrSet(s)) => s.clone(),
            _ => BTreeSet::new(),
        }
    }

    /// A source-map option; empty when absent.
    pub fn source_map(&self, name: &str) -> BTreeMap<String, SourcePath> {
        match self.values.get(name) {
            Some(AttrValue::SourceMap(m)) => m.clone(),
            _ => BTreeMap::new(),
        }
    }

    /// A target-list option; empty when absent.
    pub fn target_list(&self, name: &str) -> Vec<BuildTarget> {
        match self.values.get(name) {
            Some(AttrValue::TargetList(ts)) => ts.clone(),
            _ => Vec::new(),
        }
    }

    /// An optional source option.
    pub fn opt_source(&self, name: &str) -> Option<&SourcePath> {
        match self.values.get(name) {
            Some(AttrValue::Source(s)) => Some(s),
            _ => None,
        }
    }

    /// Iterate options in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.values.iter()
    }
}

/// Validate a raw attribute bag against a description's declared options.
pub fn validate_args(
    rule_type: &str,
    target: &BuildTarget,
    specs: &[ArgSpec],
    raw: &RawArgs,
) -> Result<ArgBag> {
    let known: BTreeMap<&str, &ArgSpec> = specs.iter().map(|s| (s.name, s)).collect();

    for key in raw.keys() {
        if !known.contains_key(key.as_str()) {
            let mut expected: Vec<&str> = known.keys().copied().collect();
            expected.sort_unstable();
            bail!(KilnError::Config(format!(
                "unknown option '{key}' for {rule_type} rule {target}; recognized options: {}",
                expected.join(", ")
            )));
        }
    }

    let mut values = BTreeMap::new();
    for spec in specs {
        match raw.get(spec.name) {
            Some(value) => {
                if !spec.kind.matches(value) {
                    bail!(KilnError::Config(format!(
                        "option '{}' of {rule_type} rule {target} expects {}, got {}",
                        spec.name,
                        spec.kind.name(),
                        value.type_tag()
                    )));
                }
                values.insert(spec.name.to_string(), value.clone());
            }
            None if spec.required => {
                bail!(KilnError::Config(format!(
                    "missing required option '{}' for {rule_type} rule {target}",
                    spec.name
                )));
            }
            None => {
                if let Some(default) = spec.kind.empty_default() {
                    values.insert(spec.name.to_string(), default);
                }
            }
        }
    }

    Ok(ArgBag { values })
}

/// An object on a command line, stringified late.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmdObject {
    /// Verbatim text.
    Literal(String),
    /// A concrete path.
    Path(PathBuf),
    /// An artifact reference, resolved by the artifact filesystem.
    Artifact(Artifact),
    /// An artifact the owning action promises to produce.
    Output(OutputArtifact),
}

impl CmdObject {
    fn stringify(&self, filesystem: &ArtifactFilesystem) -> Result<String> {
        match self {
            Self::Literal(s) => Ok(s.clone()),
            Self::Path(p) => Ok(p.display().to_string()),
            Self::Artifact(a) => Ok(filesystem.resolve_artifact(a)?.display().to_string()),
            Self::Output(o) => Ok(filesystem
                .resolve_artifact(o.artifact())?
                .display()
                .to_string()),
        }
    }

    /// Canonical representation for rule keys.
    ///
    /// Artifact objects contribute `(target, output)` forms, never content
    /// or a producing rule's key; a rule may therefore reference its own
    /// outputs on its command line without creating a key cycle.
    pub fn rule_key_form(&self) -> String {
        match self {
            Self::Literal(s) => s.clone(),
            Self::Path(p) => p.display().to_string(),
            Self::Artifact(a) => a.rule_key_form(),
            Self::Output(o) => o.rule_key_form(),
        }
    }
}

/// One `(object, format-string)` pair; the format's `{}` receives the
/// stringified object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandArg {
    pub object: CmdObject,
    pub format: String,
}

/// An ordered command line plus environment, built by rules and rendered at
/// execution time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandArgs {
    args: Vec<CommandArg>,
    env: BTreeMap<String, String>,
}

impl CommandArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an object with the pass-through format `{}`.
    pub fn add(mut self, object: CmdObject) -> Self {
        self.args.push(CommandArg {
            object,
            format: "{}".to_string(),
        });
        self
    }

    /// Append an object with an explicit format string.
    pub fn add_formatted(mut self, format: impl Into<String>, object: CmdObject) -> Self {
        self.args.push(CommandArg {
            object,
            format: format.into(),
        });
        self
    }

    /// Set one environment variable.
    pub fn set_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// The ordered `(object, format)` pairs.
    pub fn args(&self) -> &[CommandArg] {
        &self.args
    }

    /// The environment map, ordered by key.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Render the argv, resolving artifact references to concrete paths.
    pub fn stringify(&self, filesystem: &ArtifactFilesystem) -> Result<Vec<String>> {
        self.args
            .iter()
            .map(|arg| {
                let rendered = arg.object.stringify(filesystem)?;
                Ok(arg.format.replacen("{}", &rendered, 1))
            })
            .collect()
    }
}
