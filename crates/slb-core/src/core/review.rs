// crates/slb-core/src/core/review.rs
// ============================================================================
// Module: Peer Reviews
// Description: One peer decision on a gated request.
// Purpose: Record reviewer identity, decision, and signature.
// Dependencies: serde, crate::core::{identifiers, time}
// ============================================================================

//! ## Overview
//! Reviews reference their request by id; at most one active review exists
//! per (request, reviewer session), and later submissions replace earlier
//! ones. The reviewer signature is an opaque string stored verbatim.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::RequestId;
use crate::core::identifiers::ReviewId;
use crate::core::identifiers::SessionId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Review Decision
// ============================================================================

/// Decision carried by one review.
///
/// # Invariants
/// - Variants are stable for serialization; the wire form is lowercase.
/// - `Defer` counts as neither approval nor rejection in quorum tallies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    /// Approve the request.
    Approve,
    /// Reject the request.
    Reject,
    /// Decline to decide.
    Defer,
}

impl ReviewDecision {
    /// Returns the lowercase wire label for the decision.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Defer => "defer",
        }
    }

    /// Parses a lowercase decision label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            "defer" => Some(Self::Defer),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Review
// ============================================================================

/// One peer decision on a request.
///
/// # Invariants
/// - At most one active review exists per (`request_id`,
///   `reviewer_session`); the store upserts on that key.
/// - `reviewer_model` differs from the requestor's model whenever the
///   request requires a different model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    /// Unique review identifier.
    pub id: ReviewId,
    /// Request the review applies to.
    pub request_id: RequestId,
    /// Reviewer session identifier.
    pub reviewer_session: SessionId,
    /// Reviewer agent name.
    pub reviewer_agent: String,
    /// Reviewer model identifier.
    pub reviewer_model: String,
    /// Review decision.
    pub decision: ReviewDecision,
    /// Free-form reviewer comments.
    pub comments: String,
    /// Opaque reviewer signature stored verbatim.
    pub signature: String,
    /// When the review was submitted.
    pub created_at: Timestamp,
}
