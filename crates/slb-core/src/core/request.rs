// crates/slb-core/src/core/request.rs
// ============================================================================
// Module: Gated Requests
// Description: Request records, status machine, executions, and rollbacks.
// Purpose: Model a gated execution intent across its whole lifecycle.
// Dependencies: serde, slb-classifier, crate::core::{command, identifiers, time}
// ============================================================================

//! ## Overview
//! A request is one gated execution intent. Its status moves through the
//! machine below; every transition is validated, and an illegal transition
//! leaves the record unchanged.
//!
//! ```text
//! PENDING ─approve-quorum→ APPROVED ─execute-claim→ EXECUTING
//!    │                         │                       ├─exit=0→ EXECUTED
//!    ├─reject→ REJECTED        │                       ├─exit≠0→ EXECUTION_FAILED
//!    ├─timeout→ TIMED_OUT ─→ ESCALATED | REJECTED      ├─deadline→ TIMED_OUT
//!    ├─diff-model-timeout→ ESCALATED                   └─revert→ APPROVED
//!    └─cancel→ CANCELLED
//! ```

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use slb_classifier::RiskTier;

use crate::core::command::CommandSpec;
use crate::core::identifiers::RequestId;
use crate::core::identifiers::SessionId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Request Status
// ============================================================================

/// Lifecycle status of a gated request.
///
/// # Invariants
/// - Variants are stable for serialization; the wire form is lowercase
///   snake case.
/// - Legal transitions are exactly those accepted by
///   [`RequestStatus::can_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Awaiting peer review.
    Pending,
    /// Quorum reached; executable until the approval expires.
    Approved,
    /// Rejected by review.
    Rejected,
    /// Claimed by an executor; the command is running.
    Executing,
    /// Command exited zero.
    Executed,
    /// Command failed to spawn or exited nonzero.
    ExecutionFailed,
    /// Review window or execution deadline elapsed.
    TimedOut,
    /// Escalated for human attention.
    Escalated,
    /// Withdrawn by the requestor.
    Cancelled,
}

impl RequestStatus {
    /// Returns the lowercase wire label for the status.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Executing => "executing",
            Self::Executed => "executed",
            Self::ExecutionFailed => "execution_failed",
            Self::TimedOut => "timed_out",
            Self::Escalated => "escalated",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a lowercase status label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "executing" => Some(Self::Executing),
            "executed" => Some(Self::Executed),
            "execution_failed" => Some(Self::ExecutionFailed),
            "timed_out" => Some(Self::TimedOut),
            "escalated" => Some(Self::Escalated),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Returns true when no further transition is legal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Executed | Self::ExecutionFailed | Self::Escalated
                | Self::Cancelled
        )
    }

    /// Returns true when `from → to` is a legal transition.
    ///
    /// `Executing → Approved` is the revert path for claimed executions
    /// whose child process never started; it is only taken while the
    /// approval is still valid.
    #[must_use]
    pub const fn can_transition(from: Self, to: Self) -> bool {
        matches!(
            (from, to),
            (
                Self::Pending,
                Self::Approved | Self::Rejected | Self::TimedOut | Self::Escalated
                    | Self::Cancelled
            ) | (Self::Approved, Self::Executing)
                | (
                    Self::Executing,
                    Self::Executed | Self::ExecutionFailed | Self::TimedOut | Self::Approved
                )
                | (Self::TimedOut, Self::Escalated | Self::Rejected)
        )
    }
}

// ============================================================================
// SECTION: Justification
// ============================================================================

/// Requestor-supplied reasoning attached to a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Justification {
    /// Why the command is needed now.
    pub reason: String,
    /// What the command is expected to change.
    pub expected_effect: String,
    /// The task-level goal the command serves.
    pub goal: String,
    /// Why the requestor believes the command is safe.
    pub safety_argument: String,
}

// ============================================================================
// SECTION: Execution Record
// ============================================================================

/// Append-only record of one execution attempt.
///
/// # Invariants
/// - Set only while the request status is `Executing` or later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// When execution started.
    pub executed_at: Timestamp,
    /// Executor session identifier.
    pub executed_by: SessionId,
    /// Executor agent name.
    pub executor_agent: String,
    /// Executor model identifier.
    pub executor_model: String,
    /// Child exit code, unset when the spawn or wait failed.
    pub exit_code: Option<i32>,
    /// Wall-clock duration in milliseconds, unset until completion.
    pub duration_ms: Option<u64>,
    /// Path of the execution transcript.
    pub log_path: String,
    /// Path of the rollback artifact directory, when captured.
    pub rollback_path: Option<String>,
}

// ============================================================================
// SECTION: Rollback Descriptor
// ============================================================================

/// One typed rollback capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RollbackCapture {
    /// Gzipped tarball of the paths a delete would remove.
    Filesystem {
        /// Tarball path relative to the rollback base directory.
        archive: String,
        /// Captured paths relative to the command working directory.
        paths: Vec<String>,
    },
    /// Git head, branch, and working-tree diff.
    Git {
        /// HEAD commit hash at capture time.
        head: String,
        /// Checked-out branch at capture time.
        branch: String,
        /// Diff file path relative to the rollback base directory.
        diff_file: String,
    },
    /// Kubernetes manifests for the objects a delete would remove.
    Kubernetes {
        /// Manifest file paths relative to the rollback base directory.
        manifests: Vec<String>,
    },
}

/// Per-request rollback capture metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackDescriptor {
    /// Base directory holding the rollback artifacts.
    pub base_dir: String,
    /// Typed captures taken before execution.
    pub captures: Vec<RollbackCapture>,
    /// When the capture was taken.
    pub captured_at: Timestamp,
}

// ============================================================================
// SECTION: Request
// ============================================================================

/// A gated execution intent.
///
/// # Invariants
/// - `command.hash` is immutable after creation.
/// - `min_approvals >= 1` whenever `status` requires review.
/// - `approval_expires_at` is set exactly when the status enters
///   `Approved`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique request identifier.
    pub id: RequestId,
    /// Absolute project path the request belongs to.
    pub project_path: String,
    /// Requestor session identifier.
    pub requestor_session: SessionId,
    /// Requestor agent name.
    pub requestor_agent: String,
    /// Requestor model identifier.
    pub requestor_model: String,
    /// Hash-sealed command specification.
    pub command: CommandSpec,
    /// Risk tier assigned at creation.
    pub tier: RiskTier,
    /// Requestor-supplied justification.
    pub justification: Justification,
    /// Current lifecycle status.
    pub status: RequestStatus,
    /// Approval quorum for this request.
    pub min_approvals: u32,
    /// True when reviewers must run a different model.
    pub require_different_model: bool,
    /// When the request was created.
    pub created_at: Timestamp,
    /// When the pending review window closes.
    pub expires_at: Timestamp,
    /// When an approval stops being executable, set on approval.
    pub approval_expires_at: Option<Timestamp>,
    /// When execution started, set on the executing claim.
    pub executed_at: Option<Timestamp>,
    /// Execution record, set while executing or later.
    pub execution: Option<ExecutionRecord>,
    /// Rollback capture metadata, when captured.
    pub rollback: Option<RollbackDescriptor>,
}
