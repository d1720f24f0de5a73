// crates/slb-core/src/runtime/verifier.rs
// ============================================================================
// Module: Execution Verifier
// Description: Re-validation gates between approval and execution.
// Purpose: Prove the approved command has not mutated or lost its quorum.
// Dependencies: slb-classifier, crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! The verifier runs five gates before an approved command may execute:
//! status, approval TTL, command hash, current classification against the
//! approved tier, and a fresh quorum recount. Failing any gate aborts the
//! attempt without altering the request.

// ============================================================================
// SECTION: Imports
// ============================================================================

use slb_classifier::PatternEngine;
use slb_classifier::RiskTier;
use thiserror::Error;

use crate::core::Request;
use crate::core::RequestId;
use crate::core::RequestStatus;
use crate::core::Timestamp;
use crate::interfaces::NotaryStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the execution verifier.
///
/// # Invariants
/// - Variants are stable for programmatic handling; each gate has its own
///   variant so hosts can report precise refusal reasons.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Request does not exist.
    #[error("request not found: {0}")]
    NotFound(RequestId),
    /// Request has not been approved.
    #[error("request is {0}, not approved")]
    NotApproved(&'static str),
    /// Another executor already claimed the request.
    #[error("request is already executing")]
    AlreadyExecuting,
    /// The request already finished executing.
    #[error("request was already executed")]
    AlreadyExecuted,
    /// The approval TTL has elapsed.
    #[error("approval expired")]
    ApprovalExpired,
    /// The stored command hash does not match the recomputed hash.
    #[error("command hash mismatch")]
    HashMismatch,
    /// Current classification outranks the approved tier.
    #[error("policy escalated: approved {approved}, now {current}")]
    PolicyEscalated {
        /// Tier the request was approved at.
        approved: RiskTier,
        /// Tier the classifier reports now.
        current: RiskTier,
    },
    /// The active approval count dropped below the quorum.
    #[error("approval quorum no longer met")]
    QuorumLost,
    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Verified Request
// ============================================================================

/// An approved request that passed every verification gate.
#[derive(Debug, Clone)]
pub struct VerifiedRequest {
    /// The verified request record.
    pub request: Request,
    /// Seconds of approval validity remaining.
    pub approval_remaining_secs: i64,
}

// ============================================================================
// SECTION: Verification
// ============================================================================

/// Runs the execution gates against a request.
///
/// Gate order: status, approval TTL, command hash, re-classification, and
/// quorum recount. The request record is never modified here; claiming the
/// `Executing` status is the executor's separate compare-and-swap.
///
/// # Errors
///
/// Returns the [`VerifyError`] for the first gate that fails.
pub fn verify_execution_allowed(
    store: &dyn NotaryStore,
    classifier: &PatternEngine,
    request_id: &RequestId,
    now: Timestamp,
) -> Result<VerifiedRequest, VerifyError> {
    let request = store
        .get_request(request_id)?
        .ok_or_else(|| VerifyError::NotFound(request_id.clone()))?;
    match request.status {
        RequestStatus::Approved => {}
        RequestStatus::Executing => return Err(VerifyError::AlreadyExecuting),
        RequestStatus::Executed | RequestStatus::ExecutionFailed => {
            return Err(VerifyError::AlreadyExecuted);
        }
        other => return Err(VerifyError::NotApproved(other.label())),
    }
    let Some(approval_expires_at) = request.approval_expires_at else {
        return Err(VerifyError::ApprovalExpired);
    };
    if approval_expires_at <= now {
        return Err(VerifyError::ApprovalExpired);
    }
    if !request.command.hash_matches() {
        return Err(VerifyError::HashMismatch);
    }
    let verdict = classifier.classify(&request.command.raw, Some(&request.command.cwd));
    if let Some(current) = verdict.tier {
        if current > request.tier {
            return Err(VerifyError::PolicyEscalated {
                approved: request.tier,
                current,
            });
        }
    }
    let tally = store.review_tally(&request.id)?;
    if tally.approvals < request.min_approvals {
        return Err(VerifyError::QuorumLost);
    }
    Ok(VerifiedRequest {
        approval_remaining_secs: now.secs_until(approval_expires_at),
        request,
    })
}
