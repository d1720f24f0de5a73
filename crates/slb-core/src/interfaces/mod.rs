// crates/slb-core/src/interfaces/mod.rs
// ============================================================================
// Module: Notary Interfaces
// Description: Store and notifier seams between the core and its hosts.
// Purpose: Define the capability sets the runtime engines depend on.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! The engines depend on two seams: [`NotaryStore`], the durable relational
//! state holding sessions, requests, and reviews; and [`RequestNotifier`],
//! the lifecycle hook set hosts use for desktop or chat notifications.
//! Store implementations serialize writes and validate every status
//! transition; an illegal transition must fail without changing state.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::ExecutionRecord;
use crate::core::Request;
use crate::core::RequestId;
use crate::core::RequestStatus;
use crate::core::Review;
use crate::core::RollbackDescriptor;
use crate::core::Session;
use crate::core::SessionId;
use crate::core::Timestamp;

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// Errors returned by notary store implementations.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Uniqueness constraint violated.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Status transition is illegal or was lost to a concurrent writer.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    /// Stored data failed validation on read.
    #[error("invalid store data: {0}")]
    Invalid(String),
    /// Store is busy; the operation may be retried.
    #[error("store busy: {0}")]
    Busy(String),
    /// Underlying storage failure.
    #[error("store failure: {0}")]
    Store(String),
}

// ============================================================================
// SECTION: Store Value Objects
// ============================================================================

/// Active review tally for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReviewTally {
    /// Count of active approve reviews.
    pub approvals: u32,
    /// Count of active reject reviews.
    pub rejections: u32,
}

/// Field updates applied atomically with a status transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionEffects {
    /// Approval expiry stamped when entering `Approved`.
    pub approval_expires_at: Option<Timestamp>,
    /// Execution start stamped when entering `Executing`.
    pub executed_at: Option<Timestamp>,
    /// Execution record attached when entering `Executing` or later.
    pub execution: Option<ExecutionRecord>,
}

// ============================================================================
// SECTION: Notary Store
// ============================================================================

/// Durable relational state for sessions, requests, and reviews.
///
/// Implementations serialize writes internally; per-request status
/// transitions are compare-and-swap so concurrent callers racing on the
/// same transition see at most one winner.
pub trait NotaryStore: Send + Sync {
    /// Inserts a new session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when an active session already
    /// exists for the same (agent, project path).
    fn create_session(&self, session: &Session) -> Result<(), StoreError>;

    /// Loads a session by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn get_session(&self, id: &SessionId) -> Result<Option<Session>, StoreError>;

    /// Finds the active session for an (agent, project path) pair.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn find_active_session(
        &self,
        agent: &str,
        project_path: &str,
    ) -> Result<Option<Session>, StoreError>;

    /// Lists active sessions for a project.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn list_active_sessions(&self, project_path: &str) -> Result<Vec<Session>, StoreError>;

    /// Updates a session's last-active heartbeat.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown sessions.
    fn touch_session(&self, id: &SessionId, at: Timestamp) -> Result<(), StoreError>;

    /// Ends a session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown sessions.
    fn end_session(&self, id: &SessionId, at: Timestamp) -> Result<(), StoreError>;

    /// Finds active sessions whose heartbeat is older than the threshold.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn find_stale_sessions(
        &self,
        now: Timestamp,
        threshold_secs: u64,
    ) -> Result<Vec<Session>, StoreError>;

    /// Inserts a new request.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] for duplicate ids.
    fn insert_request(&self, request: &Request) -> Result<(), StoreError>;

    /// Loads a request by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn get_request(&self, id: &RequestId) -> Result<Option<Request>, StoreError>;

    /// Lists pending requests for a project, ordered by creation ascending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn list_pending_requests(&self, project_path: &str) -> Result<Vec<Request>, StoreError>;

    /// Finds pending requests whose review window has closed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn find_expired_requests(&self, now: Timestamp) -> Result<Vec<Request>, StoreError>;

    /// Applies `from → to` atomically, with any transition effects.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] when the transition is
    /// illegal or the request is no longer in `from`; state is unchanged
    /// in both cases. Returns [`StoreError::NotFound`] for unknown ids.
    fn transition_request(
        &self,
        id: &RequestId,
        from: RequestStatus,
        to: RequestStatus,
        effects: &TransitionEffects,
    ) -> Result<(), StoreError>;

    /// Updates the execution record of a request.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown ids.
    fn record_execution(
        &self,
        id: &RequestId,
        execution: &ExecutionRecord,
    ) -> Result<(), StoreError>;

    /// Attaches rollback capture metadata to a request.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown ids.
    fn set_rollback(
        &self,
        id: &RequestId,
        rollback: &RollbackDescriptor,
    ) -> Result<(), StoreError>;

    /// Upserts a review and recounts the tally in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the request does not exist.
    fn upsert_review(&self, review: &Review) -> Result<ReviewTally, StoreError>;

    /// Lists reviews for a request, ordered by creation ascending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn list_reviews(&self, request_id: &RequestId) -> Result<Vec<Review>, StoreError>;

    /// Recounts the active review tally for a request.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn review_tally(&self, request_id: &RequestId) -> Result<ReviewTally, StoreError>;

    /// Counts pending requests created by a session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn count_pending_for_session(&self, session: &SessionId) -> Result<u32, StoreError>;

    /// Counts requests created by a session at or after `since`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn count_requests_since(
        &self,
        session: &SessionId,
        since: Timestamp,
    ) -> Result<u32, StoreError>;

    /// Finds a recent approved-or-executed request with the same redacted
    /// display form created by the same session at or after `since`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn find_recent_preapproved(
        &self,
        project_path: &str,
        session: &SessionId,
        display_redacted: &str,
        since: Timestamp,
    ) -> Result<Option<Request>, StoreError>;

    /// Searches requests whose redacted display form matches the query.
    ///
    /// Search is best-effort; implementations without a text index may
    /// fall back to substring matching.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn search_requests(
        &self,
        project_path: &str,
        query: &str,
    ) -> Result<Vec<Request>, StoreError>;
}

// ============================================================================
// SECTION: Request Notifier
// ============================================================================

/// Lifecycle hook set consumed by notification integrations.
pub trait RequestNotifier: Send + Sync {
    /// Called after a request is created.
    fn on_created(&self, request: &Request);

    /// Called after a request reaches quorum.
    fn on_approved(&self, request: &Request);

    /// Called after a request is rejected.
    fn on_rejected(&self, request: &Request);

    /// Called after an execution attempt records its outcome.
    fn on_executed(&self, request: &Request);
}

/// Notifier that ignores every lifecycle event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRequestNotifier;

impl RequestNotifier for NoopRequestNotifier {
    fn on_created(&self, _request: &Request) {}

    fn on_approved(&self, _request: &Request) {}

    fn on_rejected(&self, _request: &Request) {}

    fn on_executed(&self, _request: &Request) {}
}
