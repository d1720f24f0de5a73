// crates/slb-core/src/runtime/lifecycle.rs
// ============================================================================
// Module: Request Lifecycle Engine
// Description: Session admission, request creation, review, and timeouts.
// Purpose: Drive persisted requests through the approval state machine.
// Dependencies: slb-classifier, crate::{core, interfaces, runtime::store}
// ============================================================================

//! ## Overview
//! The lifecycle engine authenticates sessions by id and bearer key,
//! creates hash-sealed requests from classified commands, tallies reviews
//! under quorum and different-model rules, and applies timeout and
//! escalation policy. Every transition goes through the store's
//! compare-and-swap so racing callers see at most one winner.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use slb_classifier::PatternEngine;
use slb_classifier::RiskTier;
use thiserror::Error;

use crate::core::CommandSpec;
use crate::core::Justification;
use crate::core::Request;
use crate::core::RequestId;
use crate::core::RequestStatus;
use crate::core::Review;
use crate::core::ReviewDecision;
use crate::core::ReviewId;
use crate::core::Session;
use crate::core::SessionId;
use crate::core::SessionKey;
use crate::core::Timestamp;
use crate::interfaces::NoopRequestNotifier;
use crate::interfaces::NotaryStore;
use crate::interfaces::RequestNotifier;
use crate::interfaces::StoreError;
use crate::interfaces::TransitionEffects;
use crate::runtime::store::SharedNotaryStore;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors surfaced by the lifecycle engine.
///
/// # Invariants
/// - Variants are stable for programmatic handling; quorum violations are
///   distinct variants rather than strings.
#[derive(Debug, Error)]
pub enum NotaryError {
    /// Missing or malformed caller input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Referenced session or request does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Operation is illegal in the record's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Session key did not match or the session has ended.
    #[error("authentication failed")]
    Auth,
    /// Reviewer and requestor are the same session.
    #[error("self review forbidden")]
    SelfReviewForbidden,
    /// Reviewer runs the same model as the requestor.
    #[error("reviewer must use a different model")]
    RequireDifferentModel,
    /// Requestor agent is on the blocked list.
    #[error("agent blocked: {0}")]
    AgentBlocked(String),
    /// Admission rate limit exceeded.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Sweeper behavior applied to expired pending requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAction {
    /// Escalate for human attention.
    Escalate,
    /// Treat the timeout as a terminal rejection.
    AutoReject,
    /// Approve with a warning; refused for critical and dangerous tiers.
    AutoApproveWarn,
}

/// Behavior when an admission rate limit is hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitAction {
    /// Reject the request.
    Block,
    /// Admit the request; the host surfaces a warning.
    Warn,
}

/// Per-tier policy overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct TierPolicy {
    /// Quorum override for the tier, when set.
    pub min_approvals: Option<u32>,
    /// True when the quorum floor scales with active sessions.
    pub dynamic_quorum: bool,
    /// Quorum applied when enough sessions are active.
    pub dynamic_quorum_floor: u32,
    /// Delay before trusted self-approval applies, when set.
    pub auto_approve_delay_secs: Option<u64>,
}

/// Validated lifecycle policy derived from host configuration.
#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    /// Quorum floor applied regardless of tier.
    pub min_approvals: u32,
    /// Default different-model requirement for new requests.
    pub require_different_model: bool,
    /// Grace before a request lacking different-model reviewers escalates.
    pub different_model_timeout_secs: u64,
    /// Pending review window in seconds.
    pub request_timeout_secs: u64,
    /// Approval validity in minutes for non-critical tiers.
    pub approval_ttl_mins: u64,
    /// Approval validity in minutes for the critical tier.
    pub approval_ttl_critical_mins: u64,
    /// Sweeper behavior for expired pending requests.
    pub timeout_action: TimeoutAction,
    /// Maximum pending requests per session, zero for unlimited.
    pub max_pending_per_session: u32,
    /// Maximum requests per minute per session, zero for unlimited.
    pub max_requests_per_minute: u32,
    /// Behavior when an admission limit is hit.
    pub rate_limit_action: RateLimitAction,
    /// Agents allowed delayed self-approval below the critical tier.
    pub trusted_self_approve: Vec<String>,
    /// Delay before trusted self-approval applies.
    pub trusted_self_approve_delay_secs: u64,
    /// Agents that may not create requests.
    pub blocked_agents: Vec<String>,
    /// Per-tier policy overrides.
    pub tier_overrides: BTreeMap<RiskTier, TierPolicy>,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            min_approvals: 1,
            require_different_model: false,
            different_model_timeout_secs: 300,
            request_timeout_secs: 1800,
            approval_ttl_mins: 15,
            approval_ttl_critical_mins: 5,
            timeout_action: TimeoutAction::Escalate,
            max_pending_per_session: 10,
            max_requests_per_minute: 30,
            rate_limit_action: RateLimitAction::Block,
            trusted_self_approve: Vec::new(),
            trusted_self_approve_delay_secs: 60,
            blocked_agents: Vec::new(),
            tier_overrides: BTreeMap::new(),
        }
    }
}

impl LifecyclePolicy {
    /// Returns the approval TTL in minutes for a tier.
    #[must_use]
    pub const fn approval_ttl_mins(&self, tier: RiskTier) -> u64 {
        match tier {
            RiskTier::Critical => self.approval_ttl_critical_mins,
            RiskTier::Safe | RiskTier::Caution | RiskTier::Dangerous => self.approval_ttl_mins,
        }
    }
}

// ============================================================================
// SECTION: Operation Parameters
// ============================================================================

/// Parameters for starting or resuming a session.
#[derive(Debug, Clone)]
pub struct StartSessionParams {
    /// Agent display name.
    pub agent: String,
    /// Program identifier.
    pub program: String,
    /// Model identifier.
    pub model: String,
    /// Absolute project path.
    pub project_path: String,
}

/// Parameters for creating a request.
#[derive(Debug, Clone)]
pub struct CreateRequestParams {
    /// Requestor session identifier.
    pub session_id: SessionId,
    /// Requestor bearer key.
    pub session_key: SessionKey,
    /// Command to gate.
    pub command: CommandSpec,
    /// Requestor-supplied justification.
    pub justification: Justification,
}

/// Parameters for submitting a review.
#[derive(Debug, Clone)]
pub struct SubmitReviewParams {
    /// Request under review.
    pub request_id: RequestId,
    /// Reviewer session identifier.
    pub session_id: SessionId,
    /// Reviewer bearer key.
    pub session_key: SessionKey,
    /// Review decision.
    pub decision: ReviewDecision,
    /// Free-form comments.
    pub comments: String,
    /// Opaque reviewer signature stored verbatim.
    pub signature: String,
}

// ============================================================================
// SECTION: Operation Results
// ============================================================================

/// Outcome of a review submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewOutcome {
    /// Request status after the tally was applied.
    pub status: RequestStatus,
    /// Active approve count.
    pub approvals: u32,
    /// Active reject count.
    pub rejections: u32,
    /// Quorum required for approval.
    pub min_approvals: u32,
}

/// Report from the different-model escalation check.
#[derive(Debug, Clone)]
pub struct EscalationReport {
    /// True when the request requires a different-model reviewer.
    pub needs_different_model: bool,
    /// True when an active session with a different model exists.
    pub different_model_available: bool,
    /// Agent names of eligible different-model sessions.
    pub available_agents: Vec<String>,
    /// True when the escalation grace period has elapsed.
    pub timeout_expired: bool,
    /// Seconds until escalation, negative once elapsed.
    pub time_until_escalation_secs: i64,
    /// True when the request was (or should be) escalated.
    pub should_escalate: bool,
    /// Human-readable explanation.
    pub reason: String,
}

/// Outcome applied to one expired pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// Timed out and escalated for human attention.
    Escalated,
    /// Timed out terminally (auto-reject policy).
    TimedOut,
    /// Approved with a warning (auto-approve policy, low tiers only).
    AutoApproved,
}

/// Report from a stale-session sweep.
#[derive(Debug, Clone, Default)]
pub struct GcReport {
    /// Sessions ended by the sweep.
    pub ended: Vec<SessionId>,
    /// Stale sessions left untouched.
    pub skipped: Vec<SessionId>,
}

// ============================================================================
// SECTION: Lifecycle Engine
// ============================================================================

/// Drives requests through the approval state machine.
pub struct LifecycleEngine {
    /// Durable notary state.
    store: SharedNotaryStore,
    /// Risk classifier used at creation time.
    classifier: Arc<PatternEngine>,
    /// Validated policy derived from host configuration.
    policy: LifecyclePolicy,
    /// Lifecycle hook sink.
    notifier: Arc<dyn RequestNotifier>,
}

impl LifecycleEngine {
    /// Creates a lifecycle engine with a no-op notifier.
    #[must_use]
    pub fn new(
        store: SharedNotaryStore,
        classifier: Arc<PatternEngine>,
        policy: LifecyclePolicy,
    ) -> Self {
        Self::with_notifier(store, classifier, policy, Arc::new(NoopRequestNotifier))
    }

    /// Creates a lifecycle engine with an explicit notifier.
    #[must_use]
    pub fn with_notifier(
        store: SharedNotaryStore,
        classifier: Arc<PatternEngine>,
        policy: LifecyclePolicy,
        notifier: Arc<dyn RequestNotifier>,
    ) -> Self {
        Self {
            store,
            classifier,
            policy,
            notifier,
        }
    }

    /// Returns the engine's store handle.
    #[must_use]
    pub const fn store(&self) -> &SharedNotaryStore {
        &self.store
    }

    /// Returns the engine's classifier handle.
    #[must_use]
    pub const fn classifier(&self) -> &Arc<PatternEngine> {
        &self.classifier
    }

    /// Returns the engine's policy.
    #[must_use]
    pub const fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Starts a session, or resumes the active one for the same agent.
    ///
    /// # Errors
    ///
    /// Returns [`NotaryError::InvalidInput`] for empty fields and
    /// [`NotaryError::Store`] on storage failure.
    pub fn start_session(
        &self,
        params: StartSessionParams,
        now: Timestamp,
    ) -> Result<Session, NotaryError> {
        if params.agent.trim().is_empty() {
            return Err(NotaryError::InvalidInput("agent name must not be empty".to_string()));
        }
        if params.project_path.trim().is_empty() {
            return Err(NotaryError::InvalidInput("project path must not be empty".to_string()));
        }
        if let Some(existing) =
            self.store.find_active_session(&params.agent, &params.project_path)?
        {
            self.store.touch_session(&existing.id, now)?;
            return Ok(Session {
                last_active_at: now,
                ..existing
            });
        }
        let session = Session {
            id: SessionId::generate(),
            agent: params.agent,
            program: params.program,
            model: params.model,
            project_path: params.project_path,
            session_key: SessionKey::generate(),
            started_at: now,
            last_active_at: now,
            ended_at: None,
            rate_limit_reset_at: None,
        };
        self.store.create_session(&session)?;
        Ok(session)
    }

    /// Records a heartbeat for an authenticated session.
    ///
    /// # Errors
    ///
    /// Returns [`NotaryError::Auth`] for bad credentials.
    pub fn heartbeat(
        &self,
        session_id: &SessionId,
        session_key: &SessionKey,
        now: Timestamp,
    ) -> Result<(), NotaryError> {
        let session = self.authenticate(session_id, session_key)?;
        self.store.touch_session(&session.id, now)?;
        Ok(())
    }

    /// Ends an authenticated session.
    ///
    /// # Errors
    ///
    /// Returns [`NotaryError::Auth`] for bad credentials.
    pub fn end_session(
        &self,
        session_id: &SessionId,
        session_key: &SessionKey,
        now: Timestamp,
    ) -> Result<(), NotaryError> {
        let session = self.authenticate(session_id, session_key)?;
        self.store.end_session(&session.id, now)?;
        Ok(())
    }

    /// Authenticates a session by id and bearer key.
    ///
    /// # Errors
    ///
    /// Returns [`NotaryError::Auth`] when the session is missing, ended,
    /// or the key does not match.
    pub fn authenticate(
        &self,
        session_id: &SessionId,
        session_key: &SessionKey,
    ) -> Result<Session, NotaryError> {
        let session = self.store.get_session(session_id)?.ok_or(NotaryError::Auth)?;
        if !session.is_active() || !session.session_key.matches(session_key) {
            return Err(NotaryError::Auth);
        }
        Ok(session)
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Creates a pending request from a classified command.
    ///
    /// # Errors
    ///
    /// Returns [`NotaryError::Auth`] for bad credentials,
    /// [`NotaryError::AgentBlocked`] for blocked agents, and
    /// [`NotaryError::RateLimited`] when admission limits block the call.
    pub fn create_request(
        &self,
        params: CreateRequestParams,
        now: Timestamp,
    ) -> Result<Request, NotaryError> {
        if params.command.raw.trim().is_empty() {
            return Err(NotaryError::InvalidInput("command must not be empty".to_string()));
        }
        let session = self.authenticate(&params.session_id, &params.session_key)?;
        if self.policy.blocked_agents.iter().any(|blocked| *blocked == session.agent) {
            return Err(NotaryError::AgentBlocked(session.agent));
        }
        self.check_rate_limits(&session, now)?;
        let verdict =
            self.classifier.classify(&params.command.raw, Some(&params.command.cwd));
        let tier = verdict.tier.unwrap_or(RiskTier::Caution);
        let min_approvals = self.quorum_for(tier, &session.project_path)?;
        let request = Request {
            id: RequestId::generate(),
            project_path: session.project_path.clone(),
            requestor_session: session.id.clone(),
            requestor_agent: session.agent.clone(),
            requestor_model: session.model.clone(),
            command: params.command,
            tier,
            justification: params.justification,
            status: RequestStatus::Pending,
            min_approvals,
            require_different_model: self.policy.require_different_model,
            created_at: now,
            expires_at: now.add_secs(self.policy.request_timeout_secs),
            approval_expires_at: None,
            executed_at: None,
            execution: None,
            rollback: None,
        };
        self.store.insert_request(&request)?;
        self.notifier.on_created(&request);
        Ok(request)
    }

    /// Cancels a pending request; only the requestor may cancel.
    ///
    /// # Errors
    ///
    /// Returns [`NotaryError::InvalidState`] when the request is not
    /// pending and [`NotaryError::Auth`] for non-requestor callers.
    pub fn cancel_request(
        &self,
        request_id: &RequestId,
        session_id: &SessionId,
        session_key: &SessionKey,
    ) -> Result<(), NotaryError> {
        let session = self.authenticate(session_id, session_key)?;
        let request = self.get_request(request_id)?;
        if request.requestor_session != session.id {
            return Err(NotaryError::Auth);
        }
        self.store
            .transition_request(
                request_id,
                RequestStatus::Pending,
                RequestStatus::Cancelled,
                &TransitionEffects::default(),
            )
            .map_err(|err| match err {
                StoreError::InvalidTransition(message) => NotaryError::InvalidState(message),
                other => NotaryError::Store(other),
            })
    }

    // ------------------------------------------------------------------
    // Reviews
    // ------------------------------------------------------------------

    /// Submits (or replaces) a review and applies the quorum outcome.
    ///
    /// # Errors
    ///
    /// Returns [`NotaryError::InvalidState`] for non-pending requests,
    /// [`NotaryError::SelfReviewForbidden`] for self review, and
    /// [`NotaryError::RequireDifferentModel`] when the model rule blocks
    /// the reviewer.
    pub fn submit_review(
        &self,
        params: SubmitReviewParams,
        now: Timestamp,
    ) -> Result<ReviewOutcome, NotaryError> {
        let reviewer = self.authenticate(&params.session_id, &params.session_key)?;
        let request = self.get_request(&params.request_id)?;
        if request.status != RequestStatus::Pending {
            return Err(NotaryError::InvalidState(format!(
                "request {} is {}",
                request.id,
                request.status.label()
            )));
        }
        if reviewer.id == request.requestor_session {
            return Err(NotaryError::SelfReviewForbidden);
        }
        if request.require_different_model && reviewer.model == request.requestor_model {
            return Err(NotaryError::RequireDifferentModel);
        }
        let review = Review {
            id: ReviewId::generate(),
            request_id: request.id.clone(),
            reviewer_session: reviewer.id.clone(),
            reviewer_agent: reviewer.agent.clone(),
            reviewer_model: reviewer.model.clone(),
            decision: params.decision,
            comments: params.comments,
            signature: params.signature,
            created_at: now,
        };
        let tally = self.store.upsert_review(&review)?;
        let target = compute_outcome(&request, tally.approvals, tally.rejections);
        let status = match target {
            Some(RequestStatus::Approved) => {
                let ttl = self.policy.approval_ttl_mins(request.tier);
                let effects = TransitionEffects {
                    approval_expires_at: Some(now.add_mins(ttl)),
                    ..TransitionEffects::default()
                };
                self.apply_outcome(&request, RequestStatus::Approved, &effects)?
            }
            Some(RequestStatus::Rejected) => self.apply_outcome(
                &request,
                RequestStatus::Rejected,
                &TransitionEffects::default(),
            )?,
            _ => RequestStatus::Pending,
        };
        Ok(ReviewOutcome {
            status,
            approvals: tally.approvals,
            rejections: tally.rejections,
            min_approvals: request.min_approvals,
        })
    }

    /// Applies a quorum outcome, tolerating a lost race.
    fn apply_outcome(
        &self,
        request: &Request,
        to: RequestStatus,
        effects: &TransitionEffects,
    ) -> Result<RequestStatus, NotaryError> {
        match self.store.transition_request(&request.id, RequestStatus::Pending, to, effects) {
            Ok(()) => {
                let updated = self.get_request(&request.id)?;
                match to {
                    RequestStatus::Approved => self.notifier.on_approved(&updated),
                    RequestStatus::Rejected => self.notifier.on_rejected(&updated),
                    _ => {}
                }
                Ok(to)
            }
            // A concurrent reviewer already moved the request; report the
            // state they produced.
            Err(StoreError::InvalidTransition(_)) => {
                Ok(self.get_request(&request.id)?.status)
            }
            Err(other) => Err(NotaryError::Store(other)),
        }
    }

    // ------------------------------------------------------------------
    // Escalation and timeouts
    // ------------------------------------------------------------------

    /// Checks the different-model escalation clock and escalates when due.
    ///
    /// # Errors
    ///
    /// Returns [`NotaryError::NotFound`] for unknown requests.
    pub fn check_different_model_escalation(
        &self,
        request_id: &RequestId,
        now: Timestamp,
    ) -> Result<EscalationReport, NotaryError> {
        let request = self.get_request(request_id)?;
        if !request.require_different_model {
            return Ok(EscalationReport {
                needs_different_model: false,
                different_model_available: false,
                available_agents: Vec::new(),
                timeout_expired: false,
                time_until_escalation_secs: 0,
                should_escalate: false,
                reason: "request does not require a different-model reviewer".to_string(),
            });
        }
        let sessions = self.store.list_active_sessions(&request.project_path)?;
        let available_agents: Vec<String> = sessions
            .iter()
            .filter(|session| {
                session.id != request.requestor_session
                    && session.model != request.requestor_model
            })
            .map(|session| session.agent.clone())
            .collect();
        let deadline = request.created_at.add_secs(self.policy.different_model_timeout_secs);
        let timeout_expired = now >= deadline;
        let different_model_available = !available_agents.is_empty();
        let should_escalate = !different_model_available
            && timeout_expired
            && request.status == RequestStatus::Pending;
        let reason = if different_model_available {
            "different-model reviewers are available".to_string()
        } else if timeout_expired {
            "no different-model reviewer appeared before the deadline".to_string()
        } else {
            "waiting for a different-model reviewer".to_string()
        };
        if should_escalate {
            // A lost race means another sweeper already escalated.
            let _ = self.store.transition_request(
                request_id,
                RequestStatus::Pending,
                RequestStatus::Escalated,
                &TransitionEffects::default(),
            );
        }
        Ok(EscalationReport {
            needs_different_model: true,
            different_model_available,
            available_agents,
            timeout_expired,
            time_until_escalation_secs: now.secs_until(deadline),
            should_escalate,
            reason,
        })
    }

    /// Applies the configured timeout action to one expired request.
    ///
    /// # Errors
    ///
    /// Returns [`NotaryError::Store`] on storage failure; a lost
    /// transition race surfaces as [`NotaryError::InvalidState`].
    pub fn apply_timeout(
        &self,
        request: &Request,
        now: Timestamp,
    ) -> Result<TimeoutOutcome, NotaryError> {
        let action = match self.policy.timeout_action {
            // Auto-approval never applies to critical or dangerous tiers.
            TimeoutAction::AutoApproveWarn if request.tier >= RiskTier::Dangerous => {
                TimeoutAction::Escalate
            }
            action => action,
        };
        match action {
            TimeoutAction::Escalate => {
                self.transition(&request.id, RequestStatus::Pending, RequestStatus::TimedOut)?;
                self.transition(&request.id, RequestStatus::TimedOut, RequestStatus::Escalated)?;
                Ok(TimeoutOutcome::Escalated)
            }
            TimeoutAction::AutoReject => {
                self.transition(&request.id, RequestStatus::Pending, RequestStatus::TimedOut)?;
                Ok(TimeoutOutcome::TimedOut)
            }
            TimeoutAction::AutoApproveWarn => {
                // The policy approval is recorded as a review so the
                // execution-time quorum recount still holds.
                self.record_policy_review(request, "auto_approve_warn", now)?;
                let ttl = self.policy.approval_ttl_mins(request.tier);
                let effects = TransitionEffects {
                    approval_expires_at: Some(now.add_mins(ttl)),
                    ..TransitionEffects::default()
                };
                self.store.transition_request(
                    &request.id,
                    RequestStatus::Pending,
                    RequestStatus::Approved,
                    &effects,
                )?;
                let updated = self.get_request(&request.id)?;
                self.notifier.on_approved(&updated);
                Ok(TimeoutOutcome::AutoApproved)
            }
        }
    }

    /// Applies trusted self-approval when the policy allows it.
    ///
    /// Returns true when the request transitioned to approved.
    ///
    /// # Errors
    ///
    /// Returns [`NotaryError::Store`] on storage failure.
    pub fn apply_trusted_self_approval(
        &self,
        request_id: &RequestId,
        now: Timestamp,
    ) -> Result<bool, NotaryError> {
        let request = self.get_request(request_id)?;
        if request.status != RequestStatus::Pending
            || request.tier >= RiskTier::Critical
            || !self
                .policy
                .trusted_self_approve
                .iter()
                .any(|trusted| *trusted == request.requestor_agent)
        {
            return Ok(false);
        }
        let delay = self
            .policy
            .tier_overrides
            .get(&request.tier)
            .and_then(|tier| tier.auto_approve_delay_secs)
            .unwrap_or(self.policy.trusted_self_approve_delay_secs);
        if now < request.created_at.add_secs(delay) {
            return Ok(false);
        }
        self.record_policy_review(&request, "trusted_self_approve", now)?;
        let ttl = self.policy.approval_ttl_mins(request.tier);
        let effects = TransitionEffects {
            approval_expires_at: Some(now.add_mins(ttl)),
            ..TransitionEffects::default()
        };
        match self.store.transition_request(
            request_id,
            RequestStatus::Pending,
            RequestStatus::Approved,
            &effects,
        ) {
            Ok(()) => {
                let updated = self.get_request(request_id)?;
                self.notifier.on_approved(&updated);
                Ok(true)
            }
            Err(StoreError::InvalidTransition(_)) => Ok(false),
            Err(other) => Err(NotaryError::Store(other)),
        }
    }

    /// Sweeps stale sessions, optionally ending them.
    ///
    /// # Errors
    ///
    /// Returns [`NotaryError::Store`] on storage failure while listing.
    pub fn gc_stale_sessions(
        &self,
        now: Timestamp,
        threshold_secs: u64,
        end: bool,
    ) -> Result<GcReport, NotaryError> {
        let stale = self.store.find_stale_sessions(now, threshold_secs)?;
        let mut report = GcReport::default();
        for session in stale {
            if end && self.store.end_session(&session.id, now).is_ok() {
                report.ended.push(session.id);
            } else {
                report.skipped.push(session.id);
            }
        }
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Records a policy-originated approval review on the requestor's
    /// behalf so the execution-time quorum recount still holds.
    fn record_policy_review(
        &self,
        request: &Request,
        origin: &str,
        now: Timestamp,
    ) -> Result<(), NotaryError> {
        let review = Review {
            id: ReviewId::generate(),
            request_id: request.id.clone(),
            reviewer_session: request.requestor_session.clone(),
            reviewer_agent: request.requestor_agent.clone(),
            reviewer_model: request.requestor_model.clone(),
            decision: ReviewDecision::Approve,
            comments: format!("approved by {origin} policy"),
            signature: origin.to_string(),
            created_at: now,
        };
        self.store.upsert_review(&review)?;
        Ok(())
    }

    /// Loads a request or maps its absence to [`NotaryError::NotFound`].
    fn get_request(&self, request_id: &RequestId) -> Result<Request, NotaryError> {
        self.store
            .get_request(request_id)?
            .ok_or_else(|| NotaryError::NotFound(format!("request {request_id}")))
    }

    /// Applies a CAS transition, mapping lost races to invalid state.
    fn transition(
        &self,
        request_id: &RequestId,
        from: RequestStatus,
        to: RequestStatus,
    ) -> Result<(), NotaryError> {
        self.store
            .transition_request(request_id, from, to, &TransitionEffects::default())
            .map_err(|err| match err {
                StoreError::InvalidTransition(message) => NotaryError::InvalidState(message),
                other => NotaryError::Store(other),
            })
    }

    /// Enforces per-session admission limits.
    fn check_rate_limits(&self, session: &Session, now: Timestamp) -> Result<(), NotaryError> {
        if self.policy.rate_limit_action == RateLimitAction::Warn {
            return Ok(());
        }
        if self.policy.max_pending_per_session > 0 {
            let pending = self.store.count_pending_for_session(&session.id)?;
            if pending >= self.policy.max_pending_per_session {
                return Err(NotaryError::RateLimited(format!(
                    "session has {pending} pending requests (max {})",
                    self.policy.max_pending_per_session
                )));
            }
        }
        if self.policy.max_requests_per_minute > 0 {
            let recent = self.store.count_requests_since(&session.id, now.sub_secs(60))?;
            if recent >= self.policy.max_requests_per_minute {
                return Err(NotaryError::RateLimited(format!(
                    "session created {recent} requests in the last minute (max {})",
                    self.policy.max_requests_per_minute
                )));
            }
        }
        Ok(())
    }

    /// Computes the quorum for a new request at the given tier.
    fn quorum_for(&self, tier: RiskTier, project_path: &str) -> Result<u32, NotaryError> {
        let override_policy = self.policy.tier_overrides.get(&tier).copied().unwrap_or_default();
        let mut quorum = tier
            .min_approvals()
            .max(self.policy.min_approvals)
            .max(override_policy.min_approvals.unwrap_or(0))
            .max(1);
        if override_policy.dynamic_quorum && override_policy.dynamic_quorum_floor > quorum {
            let active = self.store.list_active_sessions(project_path)?.len();
            let active = u32::try_from(active).unwrap_or(u32::MAX);
            // The floor only applies when enough peers exist to satisfy it;
            // the requestor cannot review its own request.
            if active > override_policy.dynamic_quorum_floor {
                quorum = override_policy.dynamic_quorum_floor;
            }
        }
        Ok(quorum)
    }
}

// ============================================================================
// SECTION: Outcome Computation
// ============================================================================

/// Computes the target status for a tally, `None` to stay pending.
fn compute_outcome(request: &Request, approvals: u32, rejections: u32) -> Option<RequestStatus> {
    let reject_threshold = if request.tier >= RiskTier::Dangerous {
        1
    } else {
        request.min_approvals
    };
    if rejections >= reject_threshold {
        return Some(RequestStatus::Rejected);
    }
    if approvals >= request.min_approvals {
        return Some(RequestStatus::Approved);
    }
    None
}
