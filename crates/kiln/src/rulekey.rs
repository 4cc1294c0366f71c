//! Rule-key computation.
//!
//! A rule key is a deterministic fingerprint of everything that can affect a
//! rule's outputs: the rule type, the canonical target, every contributing
//! attribute, each declared step's contribution, the command line, and the
//! environment. Every field is fed to the digest with a type tag and a
//! length prefix so adjacent values cannot alias.
//!
//! Path sources contribute the content hash of the referenced file.
//! Build-target sources and artifact references contribute the producing
//! target's canonical form only — hashing never recurses into another rule
//! or into an artifact a rule itself produces.

use std::fmt;

use anyhow::Result;
use kiln_types::{AttrValue, BuildTarget, SourcePath};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::args::CommandArgs;
use crate::hashing::ContentHasher;
use crate::rule::BuildRule;

/// Hex-encoded rule fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleKey(String);

impl RuleKey {
    /// The fingerprint as lowercase hex.
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental rule-key hasher.
pub struct RuleKeyBuilder<'a> {
    hasher: Sha1,
    files: &'a dyn ContentHasher,
}

impl<'a> RuleKeyBuilder<'a> {
    /// Start a key, resolving file content hashes through `files`.
    pub fn new(files: &'a dyn ContentHasher) -> Self {
        Self {
            hasher: Sha1::new(),
            files,
        }
    }

    fn feed(&mut self, tag: &str, bytes: &[u8]) {
        self.hasher.update(tag.as_bytes());
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }

    /// The rule type's canonical name.
    pub fn put_rule_type(&mut self, name: &str) {
        self.feed("rule-type", name.as_bytes());
    }

    /// The build target's canonical form (base plus sorted flavors).
    pub fn put_target(&mut self, target: &BuildTarget) {
        self.feed("target", target.canonical().as_bytes());
    }

    /// One contributing attribute: name, type tag, canonical value.
    pub fn put_attr(&mut self, name: &str, value: &AttrValue) -> Result<()> {
        self.feed("attr", name.as_bytes());
        self.feed("attr-type", value.type_tag().as_bytes());
        self.put_value(value)
    }

    fn put_value(&mut self, value: &AttrValue) -> Result<()> {
        match value {
            AttrValue::Bool(b) => self.feed("bool", &[u8::from(*b)]),
            AttrValue::Int(i) => self.feed("int", &i.to_le_bytes()),
            AttrValue::Str(s) => self.feed("string", s.as_bytes()),
            AttrValue::StrList(items) => {
                self.feed("count", &(items.len() as u64).to_le_bytes());
                for item in items {
                    self.feed("string", item.as_bytes());
                }
            }
            AttrValue::StrSet(items) => {
                // BTreeSet iteration is already the canonical sort order.
                self.feed("count", &(items.len() as u64).to_le_bytes());
                for item in items {
                    self.feed("string", item.as_bytes());
                }
            }
            AttrValue::Source(source) => self.put_source(source)?,
            AttrValue::SourceMap(map) => {
                self.feed("count", &(map.len() as u64).to_le_bytes());
                for (key, source) in map {
                    self.feed("key", key.as_bytes());
                    self.put_source(source)?;
                }
            }
            AttrValue::Target(target) => self.feed("target", target.canonical().as_bytes()),
            AttrValue::TargetList(targets) => {
                self.feed("count", &(targets.len() as u64).to_le_bytes());
                for target in targets {
                    self.feed("target", target.canonical().as_bytes());
                }
            }
        }
        Ok(())
    }

    /// One source path. Path sources add the referenced file's content hash;
    /// build-target sources add the canonical target form only.
    pub fn put_source(&mut self, source: &SourcePath) -> Result<()> {
        match source {
            SourcePath::Path { path } => {
                self.feed("path", path.to_string_lossy().as_bytes());
                let content_hash = self.files.hash_file(path)?;
                self.feed("content", content_hash.as_bytes());
            }
            SourcePath::Build { target, output } => {
                self.feed("build-target", target.canonical().as_bytes());
                self.feed("output", output.as_bytes());
            }
        }
        Ok(())
    }

    /// One declared step's contribution: short name plus designated params.
    pub fn put_step(&mut self, short_name: &str, params: &[String]) {
        self.feed("step", short_name.as_bytes());
        self.feed("count", &(params.len() as u64).to_le_bytes());
        for param in params {
            self.feed("param", param.as_bytes());
        }
    }

    /// A command-line bundle: each `(object, format)` pair in order, then
    /// the sorted environment map.
    pub fn put_command_args(&mut self, args: &CommandArgs) {
        self.feed("argv-count", &(args.args().len() as u64).to_le_bytes());
        for arg in args.args() {
            self.feed("format", arg.format.as_bytes());
            self.feed("arg", arg.object.rule_key_form().as_bytes());
        }
        self.feed("env-count", &(args.env().len() as u64).to_le_bytes());
        for (key, value) in args.env() {
            self.feed("env-key", key.as_bytes());
            self.feed("env-value", value.as_bytes());
        }
    }

    /// Finish and return the hex fingerprint.
    pub fn finish(self) -> RuleKey {
        RuleKey(hex::encode(self.hasher.finalize()))
    }
}

/// Compute the full rule key of one rule.
pub fn compute_rule_key(rule: &dyn BuildRule, files: &dyn ContentHasher) -> Result<RuleKey> {
    let mut builder = RuleKeyBuilder::new(files);
    builder.put_rule_type(rule.rule_type());
    builder.put_target(rule.target());
    rule.append_rule_key(&mut builder)?;
    Ok(builder.finish())
}
