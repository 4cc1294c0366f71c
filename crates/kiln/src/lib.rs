//! # Kiln
//!
//! The core of a polyglot, target-graph-driven build system.
//!
//! Kiln consumes declarative build descriptions (targets with typed
//! attributes), assembles a DAG of build rules through pluggable
//! descriptions, computes content-addressed rule keys, and executes step
//! pipelines with caching and parallelism.
//!
//! ## Pipeline
//!
//! The core flow is **declare → assemble → key → execute**:
//!
//! 1. The front-end hands over a [`description::TargetGraph`] of raw
//!    attribute bags. (Build-file parsing lives outside the core.)
//! 2. [`resolver::RuleResolver`] materializes targets into rules through the
//!    [`description::DescriptionRegistry`], memoizing and detecting cycles,
//!    then freezes into a read-only [`resolver::RuleGraph`].
//! 3. [`rulekey::compute_rule_key`] fingerprints every input that can affect
//!    a rule's outputs, breaking cycles through target-produced artifacts.
//! 4. [`engine::BuildEngine`] walks the frozen graph dependencies-first,
//!    restores cache hits, and runs the remaining rules' steps; the fan-out
//!    [`planner::SmartDexStep`] adds per-output caching and parallel
//!    pipelines for multi-output dexing actions.
//!
//! ## Key types
//!
//! - [`types::BuildTarget`] — `cell//package:name#flavors` identifier
//! - [`description::Description`] — factory and schema for one rule type
//! - [`rule::BuildRule`] — immutable DAG node with a steps factory
//! - [`rulekey::RuleKey`] — deterministic fingerprint of a rule's inputs
//! - [`step::Step`] — smallest executable unit, files in → files out
//! - [`cache::ActionCache`] — fetch/store of output sets by rule key
//!
//! ## Modules
//!
//! - [`description`] — rule-type registry and raw target graph
//! - [`resolver`] — DAG assembly and the frozen rule graph
//! - [`rulekey`] — canonical rule-key hashing
//! - [`planner`] — the smart fan-out dexing planner
//! - [`engine`] — build driver: keys, cache, steps, receipts
//! - [`steps`] — filesystem, archive, and external-tool steps
//! - [`runner`] — ordered step execution with failure attribution
//! - [`cache`] — action cache interface and in-memory implementation
//! - [`config`] — `.kiln.toml` loading and merging
//! - [`events`] — append-only JSONL event log
//! - [`testing`] — recording toolchain and reporter for tests

pub mod args;
pub mod artifact;
pub mod cache;
pub mod config;
pub mod description;
pub mod descriptions;
pub mod engine;
pub mod events;
pub mod hashing;
pub mod planner;
pub mod resolver;
pub mod rule;
pub mod rulekey;
pub mod runner;
pub mod step;
pub mod steps;
pub mod testing;

#[cfg(test)]
mod property_tests;

pub use kiln_process as process;
pub use kiln_state as state;
pub use kiln_types as types;

pub use kiln_types::{AttrValue, BuildTarget, Flavor, KilnError, SourcePath};
