// crates/slb-classifier/src/export.rs
// ============================================================================
// Module: Pattern Export
// Description: Deterministic export document for loaded pattern sets.
// Purpose: Produce a stable, hashable manifest of the active taxonomy.
// Dependencies: serde, sha2, crate::{pattern, tier}
// ============================================================================

//! ## Overview
//! The export document is deterministic: tiers and pattern lists are sorted,
//! and the manifest hash is SHA-256 over the sorted `tier:pattern` lines
//! joined by NUL bytes. Two engines with the same rules export the same
//! hash regardless of insertion order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::pattern::Pattern;
use crate::tier::RiskTier;

// ============================================================================
// SECTION: Export Document
// ============================================================================

/// Export format version.
const EXPORT_VERSION: u32 = 1;

/// Per-tier slice of the export document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierExport {
    /// Human-readable tier description.
    pub description: String,
    /// Approval quorum floor for the tier.
    pub min_approvals: u32,
    /// Sorted regex sources for the tier.
    pub patterns: Vec<String>,
}

/// Counts recorded alongside the export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    /// Total number of exported patterns.
    pub pattern_count: usize,
    /// Pattern count per tier name.
    pub tier_counts: BTreeMap<String, usize>,
}

/// Deterministic export of the active pattern taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternExport {
    /// Export format version.
    pub version: u32,
    /// Unix seconds when the export was generated.
    pub generated_at: u64,
    /// Manifest hash over the sorted `tier:pattern` lines.
    pub sha256: String,
    /// Per-tier pattern slices keyed by tier name.
    pub tiers: BTreeMap<String, TierExport>,
    /// Export counts.
    pub metadata: ExportMetadata,
}

// ============================================================================
// SECTION: Builders
// ============================================================================

/// Builds the export document from a pattern snapshot.
#[must_use]
pub fn build_export(patterns: &[Pattern]) -> PatternExport {
    let mut tiers: BTreeMap<String, TierExport> = BTreeMap::new();
    for tier in RiskTier::ALL {
        let mut sources: Vec<String> = patterns
            .iter()
            .filter(|pattern| pattern.tier == tier)
            .map(|pattern| pattern.source_text.clone())
            .collect();
        sources.sort();
        tiers.insert(
            tier.label().to_string(),
            TierExport {
                description: tier_description(tier).to_string(),
                min_approvals: tier.min_approvals(),
                patterns: sources,
            },
        );
    }
    let tier_counts: BTreeMap<String, usize> = tiers
        .iter()
        .map(|(name, slice)| (name.clone(), slice.patterns.len()))
        .collect();
    let pattern_count = tier_counts.values().sum();
    PatternExport {
        version: EXPORT_VERSION,
        generated_at: unix_seconds(),
        sha256: manifest_sha256(patterns),
        tiers,
        metadata: ExportMetadata {
            pattern_count,
            tier_counts,
        },
    }
}

/// Computes the manifest hash over sorted `tier:pattern` lines, NUL-joined.
#[must_use]
pub fn manifest_sha256(patterns: &[Pattern]) -> String {
    let mut lines: Vec<String> = patterns
        .iter()
        .map(|pattern| format!("{}:{}", pattern.tier.label(), pattern.source_text))
        .collect();
    lines.sort();
    let mut hasher = Sha256::new();
    for (index, line) in lines.iter().enumerate() {
        if index > 0 {
            hasher.update([0u8]);
        }
        hasher.update(line.as_bytes());
    }
    hex_encode(&hasher.finalize())
}

/// Returns the fixed description for a tier.
const fn tier_description(tier: RiskTier) -> &'static str {
    match tier {
        RiskTier::Safe => "read-only or harmless commands",
        RiskTier::Caution => "low-impact mutations, logged but not gated",
        RiskTier::Dangerous => "destructive operations requiring one approval",
        RiskTier::Critical => "irreversible operations requiring two approvals",
    }
}

/// Returns the current unix time in seconds, zero when the clock is unset.
fn unix_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |elapsed| elapsed.as_secs())
}

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}
