// crates/slb-classifier/src/tier.rs
// ============================================================================
// Module: Risk Tiers
// Description: Total-ordered risk tiers for classified commands.
// Purpose: Replace stringly-typed tier handling with an enumerated type.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Risk tiers order commands by blast radius. The ordering is total
//! (`Safe < Caution < Dangerous < Critical`) and drives quorum sizing,
//! approval TTL selection, and the conservative parse-error upgrade. The
//! on-wire representation is the lowercase tier name.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Risk Tier
// ============================================================================

/// Risk tier assigned to a classified command.
///
/// # Invariants
/// - Variants are stable for serialization; the wire form is lowercase.
/// - `Ord` ranks by risk: `Safe < Caution < Dangerous < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    /// Known-harmless command; executes without review.
    Safe,
    /// Low-impact mutation; logged but not gated.
    Caution,
    /// Destructive or hard-to-undo operation; requires one approval.
    Dangerous,
    /// Irreversible or system-wide operation; requires two approvals.
    Critical,
}

impl RiskTier {
    /// All tiers ordered from lowest to highest risk.
    pub const ALL: [Self; 4] = [Self::Safe, Self::Caution, Self::Dangerous, Self::Critical];

    /// Returns the lowercase wire label for the tier.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Caution => "caution",
            Self::Dangerous => "dangerous",
            Self::Critical => "critical",
        }
    }

    /// Parses a lowercase tier label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "safe" => Some(Self::Safe),
            "caution" => Some(Self::Caution),
            "dangerous" => Some(Self::Dangerous),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Returns the approval quorum floor for the tier.
    #[must_use]
    pub const fn min_approvals(self) -> u32 {
        match self {
            Self::Safe | Self::Caution => 0,
            Self::Dangerous => 1,
            Self::Critical => 2,
        }
    }

    /// Returns true when commands at this tier require peer review.
    #[must_use]
    pub const fn needs_approval(self) -> bool {
        self.min_approvals() > 0
    }

    /// Returns the next tier up, saturating at [`RiskTier::Critical`].
    ///
    /// Applied when tokenization fails so unparseable commands never
    /// classify below their parseable form.
    #[must_use]
    pub const fn upgrade_one(self) -> Self {
        match self {
            Self::Safe => Self::Caution,
            Self::Caution => Self::Dangerous,
            Self::Dangerous | Self::Critical => Self::Critical,
        }
    }

    /// Returns the higher-risk of two optional tiers.
    ///
    /// `None` represents an unmatched command and ranks below every tier.
    #[must_use]
    pub fn max_opt(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (Some(left), Some(right)) => Some(left.max(right)),
            (Some(tier), None) | (None, Some(tier)) => Some(tier),
            (None, None) => None,
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
