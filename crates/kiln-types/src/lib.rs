//! # Types
//!
//! Core domain types for kiln, the target-graph build system.
//!
//! This crate defines the fundamental data structures shared by every other
//! kiln crate:
//! - [`BuildTarget`] - Fully-qualified target identifier with flavors
//! - [`SourcePath`] - Typed reference to a file (literal path or target output)
//! - [`AttrValue`] - Attribute-bag value for declarative rule arguments
//! - [`RuleState`] / [`RuleReceipt`] - Per-rule execution bookkeeping
//! - [`BuildEvent`] - Structured events for the append-only JSONL log
//! - [`KilnError`] - Classified configuration/assembly/execution errors
//!
//! ## Serialization
//!
//! Most types implement `Serialize` and `Deserialize` from `serde` for
//! persistence to disk. Build targets serialize as their canonical textual
//! form (`//package:name#flavor`) so that persisted state stays readable and
//! stable across releases.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Error raised when a target string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid build target '{input}': {reason}")]
pub struct TargetParseError {
    /// The offending input string.
    pub input: String,
    /// Human-readable description of what was wrong.
    pub reason: String,
}

impl TargetParseError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// A small string tag selecting a variant of a base target.
///
/// Flavors distinguish sibling rules synthesized from the same declaration,
/// e.g. the `binary` PEX next to a test, or a platform tag. Flavor sets are
/// ordered so that the canonical target form is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flavor(String);

impl Flavor {
    /// Create a flavor from a tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// The flavor tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Flavor {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// Fully-qualified build target: `cell//package/path:name#flavor1,flavor2`.
///
/// The cell prefix is omitted in the canonical form when the target lives in
/// the root cell (`//package:name`). Two targets with the same base but
/// different flavor sets are distinct rules.
///
/// # Example
///
/// ```
/// use kiln_types::BuildTarget;
///
/// let t: BuildTarget = "//lib/util:io".parse().expect("parse");
/// assert_eq!(t.package(), "lib/util");
/// assert_eq!(t.name(), "io");
///
/// let flavored = t.with_flavor("binary");
/// assert_eq!(flavored.to_string(), "//lib/util:io#binary");
/// assert_ne!(t, flavored);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuildTarget {
    cell: String,
    package: String,
    name: String,
    flavors: BTreeSet<Flavor>,
}

impl BuildTarget {
    /// Create an unflavored target in the root cell.
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            cell: String::new(),
            package: package.into(),
            name: name.into(),
            flavors: BTreeSet::new(),
        }
    }

    /// Create an unflavored target in a named cell.
    pub fn in_cell(
        cell: impl Into<String>,
        package: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            cell: cell.into(),
            package: package.into(),
            name: name.into(),
            flavors: BTreeSet::new(),
        }
    }

    /// Parse a target from its canonical textual form.
    pub fn parse(input: &str) -> Result<Self, TargetParseError> {
        let (base, flavor_part) = match input.split_once('#') {
            Some((base, flavors)) => (base, Some(flavors)),
            None => (input, None),
        };

        let slash = base
            .find("//")
            .ok_or_else(|| TargetParseError::new(input, "missing '//' separator"))?;
        let cell = &base[..slash];
        let rest = &base[slash + 2..];

        let (package, name) = rest
            .split_once(':')
            .ok_or_else(|| TargetParseError::new(input, "missing ':' before target name"))?;
        if name.is_empty() {
            return Err(TargetParseError::new(input, "empty target name"));
        }
        if name.contains(':') || package.contains(':') {
            return Err(TargetParseError::new(input, "more than one ':'"));
        }

        let mut flavors = BTreeSet::new();
        if let Some(flavor_part) = flavor_part {
            if flavor_part.is_empty() {
                return Err(TargetParseError::new(input, "empty flavor list after '#'"));
            }
            for tag in flavor_part.split(',') {
                if tag.is_empty() {
                    return Err(TargetParseError::new(input, "empty flavor"));
                }
                flavors.insert(Flavor::new(tag));
            }
        }

        Ok(Self {
            cell: cell.to_string(),
            package: package.to_string(),
            name: name.to_string(),
            flavors,
        })
    }

    /// The cell name; empty for the root cell.
    pub fn cell(&self) -> &str {
        &self.cell
    }

    /// The package path between `//` and `:`.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// The short target name after `:`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The ordered flavor set.
    pub fn flavors(&self) -> &BTreeSet<Flavor> {
        &self.flavors
    }

    /// Whether this target carries the given flavor.
    pub fn has_flavor(&self, tag: &str) -> bool {
        self.flavors.iter().any(|f| f.as_str() == tag)
    }

    /// A copy of this target with one more flavor.
    pub fn with_flavor(&self, flavor: impl Into<Flavor>) -> Self {
        let mut out = self.clone();
        out.flavors.insert(flavor.into());
        out
    }

    /// A copy of this target with all flavors removed.
    pub fn unflavored(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            package: self.package.clone(),
            name: self.name.clone(),
            flavors: BTreeSet::new(),
        }
    }

    /// Canonical textual form: base plus the sorted flavor set.
    ///
    /// This is the representation used in rule keys, persisted state, and
    /// error messages.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}//{}:{}", self.cell, self.package, self.name)?;
        if !self.flavors.is_empty() {
            let tags: Vec<&str> = self.flavors.iter().map(Flavor::as_str).collect();
            write!(f, "#{}", tags.join(","))?;
        }
        Ok(())
    }
}

impl FromStr for BuildTarget {
    type Err = TargetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for BuildTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for BuildTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Typed reference to a file.
///
/// A *path source* names a file relative to its cell root and is hashed by
/// content. A *build-target source* names the output of another rule and is
/// represented in rule keys by the producing target's canonical form only,
/// never by the output's content.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePath {
    /// Literal path relative to a cell root.
    Path { path: PathBuf },
    /// The named output of another build target.
    Build { target: BuildTarget, output: String },
}

impl SourcePath {
    /// A cell-relative path source.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path { path: path.into() }
    }

    /// A build-target source referencing `(target, output)`.
    pub fn build(target: BuildTarget, output: impl Into<String>) -> Self {
        Self::Build {
            target,
            output: output.into(),
        }
    }

    /// The producing target, when this is a build-target source.
    pub fn producing_target(&self) -> Option<&BuildTarget> {
        match self {
            Self::Path { .. } => None,
            Self::Build { target, .. } => Some(target),
        }
    }
}

impl fmt::Display for SourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path { path } => write!(f, "{}", path.display()),
            Self::Build { target, output } => write!(f, "{target}[{output}]"),
        }
    }
}

/// A typed attribute value inside a rule's argument bag.
///
/// Sets and maps use BTree collections so that iteration order, and therefore
/// every derived fingerprint, is canonical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Str(String),
    StrList(Vec<String>),
    StrSet(BTreeSet<String>),
    Source(SourcePath),
    SourceMap(BTreeMap<String, SourcePath>),
    Target(BuildTarget),
    TargetList(Vec<BuildTarget>),
}

impl AttrValue {
    /// Short tag naming the value's type, used in error messages and as the
    /// type prefix when hashing.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "string",
            Self::StrList(_) => "string_list",
            Self::StrSet(_) => "string_set",
            Self::Source(_) => "source",
            Self::SourceMap(_) => "source_map",
            Self::Target(_) => "target",
            Self::TargetList(_) => "target_list",
        }
    }
}

/// Classification attached to a failed rule.
///
/// The class determines how the failure is rendered, not whether it is
/// retried; kiln has no retry policy of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Bad user input: unknown rule type, unknown attribute, missing tool.
    Config,
    /// The target graph could not be assembled: duplicate target, cycle.
    Assembly,
    /// A step failed while executing.
    Execution,
    /// A dexer run exceeded a format limit; rendered with diagnostics.
    Overflow,
}

/// Structured kiln error with the classification from [`FailureClass`].
///
/// Orchestration code wraps these in `anyhow::Error`; callers that need the
/// class downcast to this type.
#[derive(Debug, Clone, Error)]
pub enum KilnError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("assembly error for {target}: {message}")]
    Assembly { target: String, message: String },
    #[error("step '{step}' failed for {target}: {message}")]
    Execution {
        target: String,
        step: String,
        message: String,
    },
    #[error("dex limit exceeded while producing {output}: {message}")]
    DexOverflow { output: String, message: String },
}

impl KilnError {
    /// The failure class for this error.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Config(_) => FailureClass::Config,
            Self::Assembly { .. } => FailureClass::Assembly,
            Self::Execution { .. } => FailureClass::Execution,
            Self::DexOverflow { .. } => FailureClass::Overflow,
        }
    }
}

/// Lifecycle state of one rule within a build, persisted in receipts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleState {
    /// Not reached yet.
    Pending,
    /// Restored from the action cache without running any steps.
    Cached,
    /// All steps ran and the outputs were recorded.
    Built,
    /// Skipped because an earlier rule failed.
    Skipped { reason: String },
    /// A step failed.
    Failed {
        class: FailureClass,
        message: String,
    },
}

/// Audit record for one rule in a finished build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleReceipt {
    /// Canonical target form.
    pub target: String,
    /// Hex rule key, when computation got that far.
    pub rule_key: Option<String>,
    /// Final state.
    pub state: RuleState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u128,
    /// Number of steps that actually executed.
    pub steps_run: u32,
}

/// Overall outcome of a build session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildOutcome {
    Success,
    Failed,
}

/// Receipt for a whole build session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReceipt {
    /// Schema version tag.
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub outcome: BuildOutcome,
    pub rules: Vec<RuleReceipt>,
}

/// Current receipt schema version.
pub const CURRENT_RECEIPT_VERSION: &str = "kiln.receipt.v1";

/// One structured entry in the append-only build event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event_type: BuildEventType,
    /// Canonical form of the owning target, or the output path for fan-out
    /// events that have no single target.
    pub subject: String,
}

/// The kind payload of a [`BuildEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BuildEventType {
    RuleStarted,
    RuleCached { rule_key: String },
    RuleBuilt { duration_ms: u64 },
    RuleFailed { class: FailureClass, message: String },
    StepStarted { step: String },
    StepFinished { step: String, duration_ms: u64 },
    StepFailed { step: String, message: String },
    /// A fan-out output was already up to date; no steps were emitted.
    OutputUpToDate,
    /// A fan-out output was rebuilt.
    OutputBuilt,
    /// A stale file was pruned from a secondary output directory.
    OutputPruned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_root_cell_target() {
        let t = BuildTarget::parse("//lib/util:io").expect("parse");
        assert_eq!(t.cell(), "");
        assert_eq!(t.package(), "lib/util");
        assert_eq!(t.name(), "io");
        assert!(t.flavors().is_empty());
        assert_eq!(t.to_string(), "//lib/util:io");
    }

    #[test]
    fn parse_cell_and_flavors() {
        let t = BuildTarget::parse("toolchain//dex:runtime#min21,release").expect("parse");
        assert_eq!(t.cell(), "toolchain");
        assert_eq!(t.package(), "dex");
        assert_eq!(t.name(), "runtime");
        assert!(t.has_flavor("min21"));
        assert!(t.has_flavor("release"));
        // Flavor set is sorted in the canonical form regardless of input order.
        assert_eq!(t.to_string(), "toolchain//dex:runtime#min21,release");
        let swapped = BuildTarget::parse("toolchain//dex:runtime#release,min21").expect("parse");
        assert_eq!(t, swapped);
    }

    #[test]
    fn flavored_targets_are_distinct() {
        let base = BuildTarget::new("x", "y");
        let binary = base.with_flavor("binary");
        assert_ne!(base, binary);
        assert_eq!(binary.unflavored(), base);
        assert_eq!(binary.to_string(), "//x:y#binary");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(BuildTarget::parse("lib/util:io").is_err());
        assert!(BuildTarget::parse("//lib/util").is_err());
        assert!(BuildTarget::parse("//a:b:c").is_err());
        assert!(BuildTarget::parse("//a:").is_err());
        assert!(BuildTarget::parse("//a:b#").is_err());
        assert!(BuildTarget::parse("//a:b#x,,y").is_err());
    }

    #[test]
    fn target_serde_uses_canonical_string() {
        let t = BuildTarget::new("x", "y").with_flavor("binary");
        let json = serde_json::to_string(&t).expect("serialize");
        assert_eq!(json, "\"//x:y#binary\"");
        let back: BuildTarget = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, t);
    }

    #[test]
    fn source_path_roundtrip() {
        let src = SourcePath::build(BuildTarget::new("x", "y"), "out.jar");
        let json = serde_json::to_string(&src).expect("serialize");
        let back: SourcePath = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, src);
        assert_eq!(src.producing_target().map(|t| t.name()), Some("y"));
        assert!(SourcePath::path("a/b.py").producing_target().is_none());
    }

    #[test]
    fn attr_value_type_tags() {
        assert_eq!(AttrValue::Bool(true).type_tag(), "bool");
        assert_eq!(AttrValue::Str("s".into()).type_tag(), "string");
        assert_eq!(
            AttrValue::SourceMap(BTreeMap::new()).type_tag(),
            "source_map"
        );
    }

    #[test]
    fn error_classes() {
        assert_eq!(
            KilnError::Config("x".into()).class(),
            FailureClass::Config
        );
        let err = KilnError::Assembly {
            target: "//x:y".into(),
            message: "duplicate".into(),
        };
        assert_eq!(err.class(), FailureClass::Assembly);
        assert!(err.to_string().contains("//x:y"));
    }

    #[test]
    fn build_event_serde() {
        let event = BuildEvent {
            timestamp: Utc::now(),
            event_type: BuildEventType::StepFinished {
                step: "dx".into(),
                duration_ms: 12,
            },
            subject: "//x:y".into(),
        };
        let json = serde_json::to_string(&event).expect("serialize");
        assert!(json.contains("\"event\":\"step_finished\""));
        let back: BuildEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, event);
    }
}
