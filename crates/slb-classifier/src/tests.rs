// crates/slb-classifier/src/tests.rs
// ============================================================================
// Module: Classifier Unit Tests
// Description: Unit coverage for normalization and engine internals.
// Purpose: Exercise tier precedence, fallbacks, and pattern mutation.
// Dependencies: slb-classifier
// ============================================================================

//! ## Overview
//! Unit tests for the classifier internals; scenario-level coverage lives in
//! the integration suites under `tests/`.

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
    reason = "Test-only output and panic-based assertions are permitted."
)]

use crate::builtin::builtin_patterns;
use crate::engine::PatternEngine;
use crate::normalize::lift_wrapper;
use crate::normalize::normalize_command;
use crate::normalize::split_connectors;
use crate::pattern::PatternSource;
use crate::tier::RiskTier;

fn engine() -> PatternEngine {
    PatternEngine::with_builtins().expect("builtin taxonomy compiles")
}

#[test]
fn builtin_taxonomy_compiles() {
    let patterns = builtin_patterns().expect("builtin taxonomy compiles");
    assert!(patterns.len() > 40);
}

#[test]
fn split_respects_quotes() {
    let segments = split_connectors(r#"echo "a && b"; ls"#);
    assert_eq!(segments, vec![r#"echo "a && b""#.to_string(), " ls".to_string()]);
}

#[test]
fn split_handles_pipes_and_or() {
    let segments = split_connectors("cat f | grep x || echo missing");
    assert_eq!(segments.len(), 3);
}

#[test]
fn xargs_wrapper_is_lifted() {
    assert_eq!(lift_wrapper("xargs -0 -n 1 rm -f"), "rm -f");
    assert_eq!(lift_wrapper("/usr/bin/xargs rm"), "rm");
    assert_eq!(lift_wrapper("ls -l"), "ls -l");
}

#[test]
fn relative_paths_resolve_against_cwd() {
    let normalized = normalize_command("rm -rf ./build", Some("/work/project"));
    assert_eq!(normalized.segments.len(), 1);
    assert_eq!(normalized.segments[0].text, "rm -rf /work/project/build");
}

#[test]
fn unterminated_quote_sets_parse_error() {
    let normalized = normalize_command("rm -rf 'unterminated", None);
    assert!(normalized.parse_error);
}

#[test]
fn tier_upgrade_saturates_at_critical() {
    assert_eq!(RiskTier::Safe.upgrade_one(), RiskTier::Caution);
    assert_eq!(RiskTier::Caution.upgrade_one(), RiskTier::Dangerous);
    assert_eq!(RiskTier::Dangerous.upgrade_one(), RiskTier::Critical);
    assert_eq!(RiskTier::Critical.upgrade_one(), RiskTier::Critical);
}

#[test]
fn safe_precedence_beats_caution() {
    let result = engine().classify("git status", Some("/tmp/p"));
    assert_eq!(result.tier, Some(RiskTier::Safe));
    assert!(result.is_safe);
    assert!(!result.needs_approval);
}

#[test]
fn add_pattern_replaces_same_source() {
    let engine = engine();
    let before = engine.pattern_count();
    engine
        .add_pattern(RiskTier::Dangerous, r"\bmyctl\s+wipe\b", "first", PatternSource::Agent)
        .expect("pattern compiles");
    engine
        .add_pattern(RiskTier::Dangerous, r"\bmyctl\s+wipe\b", "second", PatternSource::Human)
        .expect("pattern compiles");
    assert_eq!(engine.pattern_count(), before + 1);
    let result = engine.classify("myctl wipe", None);
    assert_eq!(result.tier, Some(RiskTier::Dangerous));
}

#[test]
fn add_pattern_rejects_bad_regex() {
    let engine = engine();
    let err = engine.add_pattern(RiskTier::Caution, r"([unclosed", "bad", PatternSource::Agent);
    assert!(err.is_err());
}

#[test]
fn remove_pattern_reports_outcome() {
    let engine = engine();
    engine
        .add_pattern(RiskTier::Caution, r"\bmytool\b", "tool", PatternSource::Agent)
        .expect("pattern compiles");
    assert!(engine.remove_pattern(RiskTier::Caution, r"\bmytool\b"));
    assert!(!engine.remove_pattern(RiskTier::Caution, r"\bmytool\b"));
}

#[test]
fn export_hash_is_insertion_order_independent() {
    let engine_a = engine();
    let engine_b = engine();
    engine_a
        .add_pattern(RiskTier::Caution, r"\baaa\b", "a", PatternSource::Agent)
        .expect("pattern compiles");
    engine_a
        .add_pattern(RiskTier::Caution, r"\bbbb\b", "b", PatternSource::Agent)
        .expect("pattern compiles");
    engine_b
        .add_pattern(RiskTier::Caution, r"\bbbb\b", "b", PatternSource::Agent)
        .expect("pattern compiles");
    engine_b
        .add_pattern(RiskTier::Caution, r"\baaa\b", "a", PatternSource::Agent)
        .expect("pattern compiles");
    let export_a = engine_a.export();
    let export_b = engine_b.export();
    assert_eq!(export_a.sha256, export_b.sha256);
    assert_eq!(export_a.tiers, export_b.tiers);
    assert_eq!(export_a.metadata.pattern_count, engine_a.pattern_count());
}

#[test]
fn empty_command_is_unmatched() {
    let result = engine().classify("   ", None);
    assert_eq!(result.tier, None);
    assert!(!result.needs_approval);
    assert!(!result.is_safe);
}
