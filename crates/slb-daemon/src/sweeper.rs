// crates/slb-daemon/src/sweeper.rs
// ============================================================================
// Module: Timeout Sweeper
// Description: Periodic expiry, escalation, and self-approval sweep.
// Purpose: Drive time-based transitions and critical-pending alerts.
// Dependencies: slb-core, tokio, crate::{debounce, rpc, subscribers}
// ============================================================================

//! ## Overview
//! The sweeper ticks on the configured interval. Each pass applies the
//! configured timeout action to expired pending requests, checks the
//! different-model escalation clock, applies trusted self-approval policy,
//! and fires at-most-once desktop notifications for critical requests that
//! have waited past the alert delay.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use slb_classifier::RiskTier;
use slb_core::LifecycleEngine;
use slb_core::NotaryStore;
use slb_core::Request;
use slb_core::RequestStatus;
use slb_core::TimeoutOutcome;
use slb_core::Timestamp;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::debounce::DesktopNotifier;
use crate::debounce::NotificationDebouncer;
use crate::rpc::EventEnvelope;
use crate::rpc::EventType;
use crate::subscribers::SubscriberTable;

// ============================================================================
// SECTION: Sweeper
// ============================================================================

/// Periodic timeout and escalation sweeper.
pub struct TimeoutSweeper {
    /// Lifecycle engine applying policy transitions.
    lifecycle: Arc<LifecycleEngine>,
    /// Subscriber fan-out receiving lifecycle events.
    subscribers: Arc<SubscriberTable>,
    /// At-most-once notification keyset.
    debouncer: Arc<NotificationDebouncer>,
    /// Desktop notification sink.
    desktop: DesktopNotifier,
    /// Whether desktop notifications fire at all.
    desktop_enabled: bool,
    /// Project this sweeper serves.
    project_path: String,
    /// Tick interval.
    check_interval: Duration,
    /// Age a critical pending request reaches before notifying, seconds.
    desktop_delay_secs: u64,
}

impl TimeoutSweeper {
    /// Creates a sweeper.
    #[must_use]
    #[allow(
        clippy::too_many_arguments,
        reason = "The sweeper aggregates every time-based policy input."
    )]
    pub fn new(
        lifecycle: Arc<LifecycleEngine>,
        subscribers: Arc<SubscriberTable>,
        debouncer: Arc<NotificationDebouncer>,
        desktop: DesktopNotifier,
        desktop_enabled: bool,
        project_path: String,
        check_interval: Duration,
        desktop_delay_secs: u64,
    ) -> Self {
        Self {
            lifecycle,
            subscribers,
            debouncer,
            desktop,
            desktop_enabled,
            project_path,
            check_interval,
            desktop_delay_secs,
        }
    }

    /// Runs the sweep loop until `shutdown` flips to true.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.check_interval);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        self.sweep_once(Timestamp::now());
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Runs one sweep pass at the given instant.
    pub fn sweep_once(&self, now: Timestamp) {
        self.sweep_expired(now);
        self.sweep_pending(now);
    }

    /// Applies the configured timeout action to expired pending requests.
    fn sweep_expired(&self, now: Timestamp) {
        let expired = match self.lifecycle.store().find_expired_requests(now) {
            Ok(expired) => expired,
            Err(err) => {
                warn(&format!("expired-request query failed: {err}"));
                return;
            }
        };
        for request in expired {
            match self.lifecycle.apply_timeout(&request, now) {
                Ok(TimeoutOutcome::Escalated) => {
                    self.broadcast(&request.id, EventType::RequestEscalated, now);
                    self.notify_desktop(
                        "command request escalated",
                        &format!(
                            "{} expired without quorum: {}",
                            request.requestor_agent, request.command.display_redacted
                        ),
                    );
                }
                Ok(TimeoutOutcome::TimedOut) => {
                    self.broadcast(&request.id, EventType::RequestTimeout, now);
                }
                Ok(TimeoutOutcome::AutoApproved) => {
                    self.broadcast(&request.id, EventType::RequestApproved, now);
                    self.notify_desktop(
                        "command request auto-approved",
                        &format!(
                            "approved after timeout: {}",
                            request.command.display_redacted
                        ),
                    );
                }
                Err(err) => {
                    warn(&format!("timeout action failed for {}: {err}", request.id));
                }
            }
        }
    }

    /// Walks pending requests for escalation, self-approval, and alerts.
    fn sweep_pending(&self, now: Timestamp) {
        let pending = match self.lifecycle.store().list_pending_requests(&self.project_path) {
            Ok(pending) => pending,
            Err(err) => {
                warn(&format!("pending-request query failed: {err}"));
                return;
            }
        };
        for request in pending {
            if request.require_different_model {
                match self.lifecycle.check_different_model_escalation(&request.id, now) {
                    Ok(report) if report.should_escalate => {
                        self.broadcast(&request.id, EventType::RequestEscalated, now);
                        self.notify_desktop(
                            "command request escalated",
                            &format!("no different-model reviewer: {}", report.reason),
                        );
                        continue;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn(&format!("escalation check failed for {}: {err}", request.id));
                    }
                }
            }
            match self.lifecycle.apply_trusted_self_approval(&request.id, now) {
                Ok(true) => {
                    self.broadcast(&request.id, EventType::RequestApproved, now);
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    warn(&format!("self-approval check failed for {}: {err}", request.id));
                }
            }
            self.alert_critical_pending(&request, now);
        }
    }

    /// Fires the at-most-once alert for old critical pending requests.
    fn alert_critical_pending(&self, request: &Request, now: Timestamp) {
        if request.tier < RiskTier::Critical
            || request.status != RequestStatus::Pending
            || now < request.created_at.add_secs(self.desktop_delay_secs)
        {
            return;
        }
        let key = NotificationDebouncer::critical_pending_key(&request.id);
        if self.debouncer.should_fire(&key, now) {
            self.notify_desktop(
                "critical command awaiting review",
                &format!(
                    "{} wants to run: {}",
                    request.requestor_agent, request.command.display_redacted
                ),
            );
        }
    }

    /// Broadcasts a lifecycle event from the request's fresh state.
    fn broadcast(&self, request_id: &slb_core::RequestId, event_type: EventType, now: Timestamp) {
        if let Ok(Some(request)) = self.lifecycle.store().get_request(request_id) {
            self.subscribers
                .broadcast(&EventEnvelope::for_request(event_type, &request, now));
        }
    }

    /// Fires a desktop notification when enabled.
    fn notify_desktop(&self, title: &str, body: &str) {
        if self.desktop_enabled {
            (self.desktop)(title, body);
        }
    }
}

/// Writes a one-line operational warning to stderr.
fn warn(message: &str) {
    let _ = writeln!(std::io::stderr(), "slb-daemon: WARNING: {message}");
}
