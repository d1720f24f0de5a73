// crates/slb-core/src/runtime/store.rs
// ============================================================================
// Module: In-Memory Notary Store
// Description: Simple in-memory store for tests and local demos.
// Purpose: Provide a deterministic store implementation without external deps.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! This module provides an in-memory implementation of [`NotaryStore`] plus
//! a shared `Arc` wrapper. The in-memory store honors the same transition
//! and uniqueness rules as the durable store so engine tests exercise
//! identical semantics.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::core::ExecutionRecord;
use crate::core::Request;
use crate::core::RequestId;
use crate::core::RequestStatus;
use crate::core::Review;
use crate::core::ReviewDecision;
use crate::core::RollbackDescriptor;
use crate::core::Session;
use crate::core::SessionId;
use crate::core::Timestamp;
use crate::interfaces::NotaryStore;
use crate::interfaces::ReviewTally;
use crate::interfaces::StoreError;
use crate::interfaces::TransitionEffects;

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// Mutable tables behind the store mutex.
#[derive(Debug, Default)]
struct Tables {
    /// Sessions keyed by id.
    sessions: BTreeMap<String, Session>,
    /// Requests keyed by id.
    requests: BTreeMap<String, Request>,
    /// Reviews keyed by request id, in submission order.
    reviews: BTreeMap<String, Vec<Review>>,
}

/// In-memory notary store for tests and local demos.
#[derive(Debug, Default, Clone)]
pub struct InMemoryNotaryStore {
    /// Tables protected by a mutex.
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryNotaryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the tables, mapping poisoning to a store error.
    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Store("store mutex poisoned".to_string()))
    }
}

/// Counts active approve and reject reviews.
fn tally_reviews(reviews: &[Review]) -> ReviewTally {
    let mut tally = ReviewTally::default();
    for review in reviews {
        match review.decision {
            ReviewDecision::Approve => tally.approvals += 1,
            ReviewDecision::Reject => tally.rejections += 1,
            ReviewDecision::Defer => {}
        }
    }
    tally
}

impl NotaryStore for InMemoryNotaryStore {
    fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let duplicate = tables.sessions.values().any(|existing| {
            existing.agent == session.agent
                && existing.project_path == session.project_path
                && existing.is_active()
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "active session already exists for agent {} in {}",
                session.agent, session.project_path
            )));
        }
        tables.sessions.insert(session.id.as_str().to_string(), session.clone());
        Ok(())
    }

    fn get_session(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.lock()?.sessions.get(id.as_str()).cloned())
    }

    fn find_active_session(
        &self,
        agent: &str,
        project_path: &str,
    ) -> Result<Option<Session>, StoreError> {
        Ok(self
            .lock()?
            .sessions
            .values()
            .find(|session| {
                session.agent == agent
                    && session.project_path == project_path
                    && session.is_active()
            })
            .cloned())
    }

    fn list_active_sessions(&self, project_path: &str) -> Result<Vec<Session>, StoreError> {
        Ok(self
            .lock()?
            .sessions
            .values()
            .filter(|session| session.project_path == project_path && session.is_active())
            .cloned()
            .collect())
    }

    fn touch_session(&self, id: &SessionId, at: Timestamp) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let session = tables
            .sessions
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        session.last_active_at = at;
        Ok(())
    }

    fn end_session(&self, id: &SessionId, at: Timestamp) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let session = tables
            .sessions
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        if session.ended_at.is_none() {
            session.ended_at = Some(at);
        }
        Ok(())
    }

    fn find_stale_sessions(
        &self,
        now: Timestamp,
        threshold_secs: u64,
    ) -> Result<Vec<Session>, StoreError> {
        Ok(self
            .lock()?
            .sessions
            .values()
            .filter(|session| session.is_stale(now, threshold_secs))
            .cloned()
            .collect())
    }

    fn insert_request(&self, request: &Request) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables.requests.contains_key(request.id.as_str()) {
            return Err(StoreError::Conflict(format!("request {} exists", request.id)));
        }
        tables.requests.insert(request.id.as_str().to_string(), request.clone());
        Ok(())
    }

    fn get_request(&self, id: &RequestId) -> Result<Option<Request>, StoreError> {
        Ok(self.lock()?.requests.get(id.as_str()).cloned())
    }

    fn list_pending_requests(&self, project_path: &str) -> Result<Vec<Request>, StoreError> {
        let mut pending: Vec<Request> = self
            .lock()?
            .requests
            .values()
            .filter(|request| {
                request.project_path == project_path
                    && request.status == RequestStatus::Pending
            })
            .cloned()
            .collect();
        pending.sort_by_key(|request| request.created_at);
        Ok(pending)
    }

    fn find_expired_requests(&self, now: Timestamp) -> Result<Vec<Request>, StoreError> {
        Ok(self
            .lock()?
            .requests
            .values()
            .filter(|request| {
                request.status == RequestStatus::Pending && request.expires_at <= now
            })
            .cloned()
            .collect())
    }

    fn transition_request(
        &self,
        id: &RequestId,
        from: RequestStatus,
        to: RequestStatus,
        effects: &TransitionEffects,
    ) -> Result<(), StoreError> {
        if !RequestStatus::can_transition(from, to) {
            return Err(StoreError::InvalidTransition(format!(
                "{} -> {} is not a legal transition",
                from.label(),
                to.label()
            )));
        }
        let mut tables = self.lock()?;
        let request = tables
            .requests
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("request {id}")))?;
        if request.status != from {
            return Err(StoreError::InvalidTransition(format!(
                "request {} is {} not {}",
                id,
                request.status.label(),
                from.label()
            )));
        }
        request.status = to;
        if let Some(expiry) = effects.approval_expires_at {
            request.approval_expires_at = Some(expiry);
        }
        if let Some(executed_at) = effects.executed_at {
            request.executed_at = Some(executed_at);
        }
        if let Some(execution) = &effects.execution {
            request.execution = Some(execution.clone());
        }
        Ok(())
    }

    fn record_execution(
        &self,
        id: &RequestId,
        execution: &ExecutionRecord,
    ) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let request = tables
            .requests
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("request {id}")))?;
        request.execution = Some(execution.clone());
        Ok(())
    }

    fn set_rollback(
        &self,
        id: &RequestId,
        rollback: &RollbackDescriptor,
    ) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let request = tables
            .requests
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("request {id}")))?;
        request.rollback = Some(rollback.clone());
        Ok(())
    }

    fn upsert_review(&self, review: &Review) -> Result<ReviewTally, StoreError> {
        let mut tables = self.lock()?;
        if !tables.requests.contains_key(review.request_id.as_str()) {
            return Err(StoreError::NotFound(format!("request {}", review.request_id)));
        }
        let reviews = tables.reviews.entry(review.request_id.as_str().to_string()).or_default();
        reviews.retain(|existing| existing.reviewer_session != review.reviewer_session);
        reviews.push(review.clone());
        Ok(tally_reviews(reviews))
    }

    fn list_reviews(&self, request_id: &RequestId) -> Result<Vec<Review>, StoreError> {
        Ok(self.lock()?.reviews.get(request_id.as_str()).cloned().unwrap_or_default())
    }

    fn review_tally(&self, request_id: &RequestId) -> Result<ReviewTally, StoreError> {
        Ok(self
            .lock()?
            .reviews
            .get(request_id.as_str())
            .map_or_else(ReviewTally::default, |reviews| tally_reviews(reviews)))
    }

    fn count_pending_for_session(&self, session: &SessionId) -> Result<u32, StoreError> {
        let count = self
            .lock()?
            .requests
            .values()
            .filter(|request| {
                request.requestor_session == *session
                    && request.status == RequestStatus::Pending
            })
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    fn count_requests_since(
        &self,
        session: &SessionId,
        since: Timestamp,
    ) -> Result<u32, StoreError> {
        let count = self
            .lock()?
            .requests
            .values()
            .filter(|request| {
                request.requestor_session == *session && request.created_at >= since
            })
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    fn find_recent_preapproved(
        &self,
        project_path: &str,
        session: &SessionId,
        display_redacted: &str,
        since: Timestamp,
    ) -> Result<Option<Request>, StoreError> {
        Ok(self
            .lock()?
            .requests
            .values()
            .find(|request| {
                request.project_path == project_path
                    && request.requestor_session == *session
                    && request.command.display_redacted == display_redacted
                    && request.created_at >= since
                    && matches!(
                        request.status,
                        RequestStatus::Approved | RequestStatus::Executed
                    )
            })
            .cloned())
    }

    fn search_requests(
        &self,
        project_path: &str,
        query: &str,
    ) -> Result<Vec<Request>, StoreError> {
        let needle = query.to_lowercase();
        Ok(self
            .lock()?
            .requests
            .values()
            .filter(|request| {
                request.project_path == project_path
                    && request.command.display_redacted.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }
}

// ============================================================================
// SECTION: Shared Store Wrapper
// ============================================================================

/// Shared notary store backed by an `Arc` trait object.
#[derive(Clone)]
pub struct SharedNotaryStore {
    /// Inner store implementation.
    inner: Arc<dyn NotaryStore>,
}

impl SharedNotaryStore {
    /// Wraps a notary store in a shared, clonable wrapper.
    #[must_use]
    pub fn from_store(store: impl NotaryStore + 'static) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// Wraps an existing shared store.
    #[must_use]
    pub const fn new(store: Arc<dyn NotaryStore>) -> Self {
        Self {
            inner: store,
        }
    }

    /// Returns the inner trait object.
    #[must_use]
    pub fn as_dyn(&self) -> &dyn NotaryStore {
        self.inner.as_ref()
    }
}

impl NotaryStore for SharedNotaryStore {
    fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        self.inner.create_session(session)
    }

    fn get_session(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        self.inner.get_session(id)
    }

    fn find_active_session(
        &self,
        agent: &str,
        project_path: &str,
    ) -> Result<Option<Session>, StoreError> {
        self.inner.find_active_session(agent, project_path)
    }

    fn list_active_sessions(&self, project_path: &str) -> Result<Vec<Session>, StoreError> {
        self.inner.list_active_sessions(project_path)
    }

    fn touch_session(&self, id: &SessionId, at: Timestamp) -> Result<(), StoreError> {
        self.inner.touch_session(id, at)
    }

    fn end_session(&self, id: &SessionId, at: Timestamp) -> Result<(), StoreError> {
        self.inner.end_session(id, at)
    }

    fn find_stale_sessions(
        &self,
        now: Timestamp,
        threshold_secs: u64,
    ) -> Result<Vec<Session>, StoreError> {
        self.inner.find_stale_sessions(now, threshold_secs)
    }

    fn insert_request(&self, request: &Request) -> Result<(), StoreError> {
        self.inner.insert_request(request)
    }

    fn get_request(&self, id: &RequestId) -> Result<Option<Request>, StoreError> {
        self.inner.get_request(id)
    }

    fn list_pending_requests(&self, project_path: &str) -> Result<Vec<Request>, StoreError> {
        self.inner.list_pending_requests(project_path)
    }

    fn find_expired_requests(&self, now: Timestamp) -> Result<Vec<Request>, StoreError> {
        self.inner.find_expired_requests(now)
    }

    fn transition_request(
        &self,
        id: &RequestId,
        from: RequestStatus,
        to: RequestStatus,
        effects: &TransitionEffects,
    ) -> Result<(), StoreError> {
        self.inner.transition_request(id, from, to, effects)
    }

    fn record_execution(
        &self,
        id: &RequestId,
        execution: &ExecutionRecord,
    ) -> Result<(), StoreError> {
        self.inner.record_execution(id, execution)
    }

    fn set_rollback(
        &self,
        id: &RequestId,
        rollback: &RollbackDescriptor,
    ) -> Result<(), StoreError> {
        self.inner.set_rollback(id, rollback)
    }

    fn upsert_review(&self, review: &Review) -> Result<ReviewTally, StoreError> {
        self.inner.upsert_review(review)
    }

    fn list_reviews(&self, request_id: &RequestId) -> Result<Vec<Review>, StoreError> {
        self.inner.list_reviews(request_id)
    }

    fn review_tally(&self, request_id: &RequestId) -> Result<ReviewTally, StoreError> {
        self.inner.review_tally(request_id)
    }

    fn count_pending_for_session(&self, session: &SessionId) -> Result<u32, StoreError> {
        self.inner.count_pending_for_session(session)
    }

    fn count_requests_since(
        &self,
        session: &SessionId,
        since: Timestamp,
    ) -> Result<u32, StoreError> {
        self.inner.count_requests_since(session, since)
    }

    fn find_recent_preapproved(
        &self,
        project_path: &str,
        session: &SessionId,
        display_redacted: &str,
        since: Timestamp,
    ) -> Result<Option<Request>, StoreError> {
        self.inner.find_recent_preapproved(project_path, session, display_redacted, since)
    }

    fn search_requests(
        &self,
        project_path: &str,
        query: &str,
    ) -> Result<Vec<Request>, StoreError> {
        self.inner.search_requests(project_path, query)
    }
}
