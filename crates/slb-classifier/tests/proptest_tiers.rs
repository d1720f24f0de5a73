// crates/slb-classifier/tests/proptest_tiers.rs
// ============================================================================
// Module: Classifier Property Tests
// Description: Property coverage for tier monotonicity and parse upgrades.
// Purpose: Verify compound aggregation and fail-closed behavior broadly.
// ============================================================================

//! Property-based tests for tier aggregation laws.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use proptest::prelude::*;
use slb_classifier::PatternEngine;
use slb_classifier::RiskTier;

/// Quote-free vocabulary with known single-command tiers.
const VOCABULARY: &[(&str, Option<RiskTier>)] = &[
    ("git status", Some(RiskTier::Safe)),
    ("ls -la", Some(RiskTier::Safe)),
    ("echo ok", Some(RiskTier::Safe)),
    ("cat README.md", Some(RiskTier::Safe)),
    ("mv a.txt b.txt", Some(RiskTier::Caution)),
    ("rm notes.txt", Some(RiskTier::Caution)),
    ("chmod 644 a.txt", Some(RiskTier::Caution)),
    ("git reset --hard", Some(RiskTier::Dangerous)),
    ("rm -rf build", Some(RiskTier::Dangerous)),
    ("kubectl delete pod web", Some(RiskTier::Dangerous)),
    ("rm -rf /etc", Some(RiskTier::Critical)),
    ("terraform destroy", Some(RiskTier::Critical)),
    ("mkfs.ext4 /dev/sdb1", Some(RiskTier::Critical)),
    ("true", None),
    ("my-custom-tool run", None),
];

/// Shell connectors used to build compound commands.
const CONNECTORS: &[&str] = &[";", "&&", "||"];

fn engine() -> PatternEngine {
    PatternEngine::with_builtins().expect("builtin taxonomy compiles")
}

fn command_strategy() -> impl Strategy<Value = (String, Option<RiskTier>)> {
    (0 .. VOCABULARY.len()).prop_map(|index| {
        let (text, tier) = VOCABULARY[index];
        (text.to_string(), tier)
    })
}

proptest! {
    /// Vocabulary entries classify to their expected single-command tier.
    #[test]
    fn vocabulary_tiers_hold((command, expected) in command_strategy()) {
        let result = engine().classify(&command, Some("/work"));
        prop_assert_eq!(result.tier, expected);
    }

    /// `tier(a <op> b) == max(tier(a), tier(b))` for every connector.
    #[test]
    fn compound_tier_is_segment_maximum(
        (left, left_tier) in command_strategy(),
        (right, right_tier) in command_strategy(),
        connector in 0 .. CONNECTORS.len(),
    ) {
        let compound = format!("{left} {} {right}", CONNECTORS[connector]);
        let result = engine().classify(&compound, Some("/work"));
        prop_assert_eq!(result.tier, RiskTier::max_opt(left_tier, right_tier));
        prop_assert!(!result.parse_error);
    }

    /// Three-way compounds still aggregate to the highest segment tier.
    #[test]
    fn triple_compound_tier_is_maximum(
        (a, tier_a) in command_strategy(),
        (b, tier_b) in command_strategy(),
        (c, tier_c) in command_strategy(),
    ) {
        let compound = format!("{a}; {b} && {c}");
        let result = engine().classify(&compound, Some("/work"));
        let expected = RiskTier::max_opt(RiskTier::max_opt(tier_a, tier_b), tier_c);
        prop_assert_eq!(result.tier, expected);
    }

    /// Appending an unparseable segment upgrades exactly one tier.
    #[test]
    fn parse_error_upgrades_one_tier((command, tier) in command_strategy()) {
        let broken = format!("{command} && echo 'unterminated");
        let result = engine().classify(&broken, Some("/work"));
        prop_assert!(result.parse_error);
        let expected = tier.map_or(RiskTier::Caution, RiskTier::upgrade_one);
        prop_assert_eq!(result.tier, Some(expected));
        prop_assert!(result.needs_approval);
        prop_assert!(result.min_approvals >= 1);
    }

    /// Classification is stable across repeated calls.
    #[test]
    fn classification_is_deterministic((command, _tier) in command_strategy()) {
        let engine = engine();
        let first = engine.classify(&command, Some("/work"));
        let second = engine.classify(&command, Some("/work"));
        prop_assert_eq!(first, second);
    }
}
