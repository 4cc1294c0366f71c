//! Property-based tests for kiln invariants.
//!
//! These verify properties that should hold for all inputs:
//! - Target canonical form round-trips through parsing
//! - Rule keys are deterministic and survive attribute serialization
//! - Set-valued attributes hash independently of insertion order
//! - Fan-out input hashing follows the documented formula

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use proptest::prelude::*;

use crate::hashing::{FixedHashes, sha1_hex};
use crate::planner::{combined_input_hash, pipeline_kind, xzs_group_prefix};
use crate::rulekey::{RuleKey, RuleKeyBuilder};
use kiln_types::{AttrValue, BuildTarget, SourcePath};

fn target_strategy() -> impl Strategy<Value = BuildTarget> {
    (
        prop::collection::vec("[a-z][a-z0-9_]{0,5}", 1..3),
        "[a-z][a-z0-9_]{0,8}",
        prop::collection::btree_set("[a-z][a-z0-9]{0,4}", 0..3),
    )
        .prop_map(|(segments, name, flavors)| {
            let mut target = BuildTarget::new(segments.join("/"), name);
            for flavor in flavors {
                target = target.with_flavor(flavor.as_str());
            }
            target
        })
}

fn attr_value_strategy() -> impl Strategy<Value = AttrValue> {
    prop_oneof![
        any::<bool>().prop_map(AttrValue::Bool),
        any::<i64>().prop_map(AttrValue::Int),
        "[a-z0-9_./-]{0,16}".prop_map(AttrValue::Str),
        prop::collection::vec("[a-z0-9_]{0,8}", 0..4).prop_map(AttrValue::StrList),
        prop::collection::btree_set("[a-z0-9_]{0,8}", 0..4).prop_map(AttrValue::StrSet),
        target_strategy().prop_map(AttrValue::Target),
        prop::collection::vec(target_strategy(), 0..3).prop_map(AttrValue::TargetList),
        (target_strategy(), "[a-z0-9_.]{1,8}")
            .prop_map(|(target, output)| AttrValue::Source(SourcePath::build(target, output))),
    ]
}

fn attr_bag_strategy() -> impl Strategy<Value = BTreeMap<String, AttrValue>> {
    prop::collection::btree_map("[a-z][a-z0-9_]{0,10}", attr_value_strategy(), 0..6)
}

fn key_of(target: &BuildTarget, attrs: &BTreeMap<String, AttrValue>) -> RuleKey {
    let files = FixedHashes::default();
    let mut builder = RuleKeyBuilder::new(&files);
    builder.put_rule_type("property_rule");
    builder.put_target(target);
    for (name, value) in attrs {
        builder.put_attr(name, value).expect("attr");
    }
    builder.finish()
}

proptest! {
    /// Property: the canonical target form parses back to the same target.
    #[test]
    fn target_canonical_roundtrip(target in target_strategy()) {
        let parsed = BuildTarget::parse(&target.canonical()).expect("parse");
        prop_assert_eq!(parsed, target);
    }

    /// Property: computing a rule key twice yields identical digests.
    #[test]
    fn rule_key_is_deterministic(
        target in target_strategy(),
        attrs in attr_bag_strategy(),
    ) {
        prop_assert_eq!(key_of(&target, &attrs), key_of(&target, &attrs));
    }

    /// Property: serializing an attribute bag and restoring it reproduces
    /// the same rule key.
    #[test]
    fn rule_key_survives_attr_serialization(
        target in target_strategy(),
        attrs in attr_bag_strategy(),
    ) {
        let json = serde_json::to_string(&attrs).expect("serialize");
        let restored: BTreeMap<String, AttrValue> =
            serde_json::from_str(&json).expect("deserialize");
        prop_assert_eq!(key_of(&target, &attrs), key_of(&target, &restored));
    }

    /// Property: set-valued attributes hash independently of insertion
    /// order.
    #[test]
    fn set_attrs_ignore_insertion_order(
        target in target_strategy(),
        mut items in prop::collection::vec("[a-z0-9_]{1,8}", 0..6),
    ) {
        let forward: BTreeSet<String> = items.iter().cloned().collect();
        items.reverse();
        let reversed: BTreeSet<String> = items.into_iter().collect();

        let mut attrs_a = BTreeMap::new();
        attrs_a.insert("labels".to_string(), AttrValue::StrSet(forward));
        let mut attrs_b = BTreeMap::new();
        attrs_b.insert("labels".to_string(), AttrValue::StrSet(reversed));

        prop_assert_eq!(key_of(&target, &attrs_a), key_of(&target, &attrs_b));
    }

    /// Property: the per-output input hash is SHA-1 over the sorted inputs'
    /// hashes, independent of how the input list was presented.
    #[test]
    fn combined_hash_follows_formula(
        mut entries in prop::collection::vec(
            ("[a-z][a-z0-9]{1,8}", "[0-9a-f]{8}"),
            1..6,
        ),
    ) {
        let hashes: BTreeMap<PathBuf, String> = entries
            .iter()
            .map(|(name, hash)| (PathBuf::from(format!("/in/{name}.jar")), hash.clone()))
            .collect();
        let inputs: BTreeSet<PathBuf> = hashes.keys().cloned().collect();

        let expected: String = {
            let concatenated: String =
                hashes.values().map(String::as_str).collect();
            sha1_hex(concatenated.as_bytes())
        };
        prop_assert_eq!(combined_input_hash(&inputs, &hashes), expected.clone());

        // Presenting the entries in any order changes nothing.
        entries.reverse();
        let reversed_inputs: BTreeSet<PathBuf> = entries
            .iter()
            .map(|(name, _)| PathBuf::from(format!("/in/{name}.jar")))
            .collect();
        prop_assert_eq!(combined_input_hash(&reversed_inputs, &hashes), expected);
    }

    /// Property: solid-compression grouping keys off the first dash token.
    #[test]
    fn group_prefix_is_first_dash_token(
        prefix in "[a-z]{1,10}",
        index in 0u32..100,
    ) {
        let name = format!("{prefix}-{index}.dex.jar.xzs");
        prop_assert_eq!(xzs_group_prefix(&name), prefix);
    }

    /// Property: every recognized dex suffix classifies, and the classifier
    /// never panics on arbitrary names.
    #[test]
    fn pipeline_kind_total_over_names(name in "[a-zA-Z0-9_.-]{1,24}") {
        let _ = pipeline_kind(&name);
    }
}
