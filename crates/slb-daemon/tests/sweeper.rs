// crates/slb-daemon/tests/sweeper.rs
// ============================================================================
// Module: Sweeper Tests
// Description: Timeout actions, escalation, and at-most-once alerts.
// Purpose: Verify one sweep pass drives every time-based policy.
// ============================================================================

//! Sweeper coverage over the in-memory store.

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
    reason = "Test-only assertions and helpers are permitted."
)]

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use slb_classifier::PatternEngine;
use slb_core::CommandSpec;
use slb_core::CreateRequestParams;
use slb_core::InMemoryNotaryStore;
use slb_core::Justification;
use slb_core::LifecycleEngine;
use slb_core::LifecyclePolicy;
use slb_core::NotaryStore;
use slb_core::RequestStatus;
use slb_core::Session;
use slb_core::SharedNotaryStore;
use slb_core::StartSessionParams;
use slb_core::Timestamp;
use slb_daemon::NotificationDebouncer;
use slb_daemon::SubscriberTable;
use slb_daemon::TimeoutSweeper;
use slb_daemon::rpc::EventType;

const PROJECT: &str = "/work/project";

/// Recording desktop notifier used to count alert firings.
type Recorded = Arc<Mutex<Vec<(String, String)>>>;

struct Fixture {
    lifecycle: Arc<LifecycleEngine>,
    sweeper: TimeoutSweeper,
    subscribers: Arc<SubscriberTable>,
    notifications: Recorded,
}

fn fixture(policy: LifecyclePolicy) -> Fixture {
    let store = SharedNotaryStore::from_store(InMemoryNotaryStore::new());
    let classifier = Arc::new(PatternEngine::with_builtins().expect("builtins compile"));
    let lifecycle = Arc::new(LifecycleEngine::new(store, classifier, policy));
    let subscribers = Arc::new(SubscriberTable::new());
    let notifications: Recorded = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&notifications);
    let sweeper = TimeoutSweeper::new(
        Arc::clone(&lifecycle),
        Arc::clone(&subscribers),
        Arc::new(NotificationDebouncer::new()),
        Arc::new(move |title: &str, body: &str| {
            if let Ok(mut recorded) = sink.lock() {
                recorded.push((title.to_string(), body.to_string()));
            }
        }),
        true,
        PROJECT.to_string(),
        Duration::from_secs(10),
        30,
    );
    Fixture {
        lifecycle,
        sweeper,
        subscribers,
        notifications,
    }
}

fn start(fixture: &Fixture, agent: &str, model: &str, now: Timestamp) -> Session {
    fixture
        .lifecycle
        .start_session(
            StartSessionParams {
                agent: agent.to_string(),
                program: "claude-code".to_string(),
                model: model.to_string(),
                project_path: PROJECT.to_string(),
            },
            now,
        )
        .expect("session starts")
}

fn create(fixture: &Fixture, session: &Session, raw: &str, now: Timestamp) -> slb_core::Request {
    fixture
        .lifecycle
        .create_request(
            CreateRequestParams {
                session_id: session.id.clone(),
                session_key: session.session_key.clone(),
                command: CommandSpec::new(raw, PROJECT, true),
                justification: Justification::default(),
            },
            now,
        )
        .expect("request created")
}

#[test]
fn expired_requests_escalate_and_broadcast() {
    let fixture = fixture(LifecyclePolicy::default());
    let (_, mut events) = fixture.subscribers.subscribe();
    let now = Timestamp::from_unix_millis(1_000_000);
    let session = start(&fixture, "alpha", "gpt-5.2", now);
    let request = create(&fixture, &session, "rm -rf build", now);

    fixture.sweeper.sweep_once(request.expires_at.add_secs(1));

    let reloaded =
        fixture.lifecycle.store().get_request(&request.id).expect("load").expect("exists");
    assert_eq!(reloaded.status, RequestStatus::Escalated);
    let event = events.try_recv().expect("escalation broadcast");
    assert_eq!(event.event.event_type, EventType::RequestEscalated);
    let recorded = fixture.notifications.lock().expect("notifications lock");
    assert_eq!(recorded.len(), 1);
    assert!(recorded[0].0.contains("escalated"));
}

#[test]
fn critical_pending_alerts_fire_exactly_once() {
    let fixture = fixture(LifecyclePolicy::default());
    let now = Timestamp::from_unix_millis(1_000_000);
    let session = start(&fixture, "alpha", "gpt-5.2", now);
    let request = create(&fixture, &session, "rm -rf /etc", now);
    assert_eq!(request.tier, slb_classifier::RiskTier::Critical);

    // Before the delay: no alert.
    fixture.sweeper.sweep_once(now.add_secs(5));
    assert!(fixture.notifications.lock().expect("lock").is_empty());

    // Past the delay: exactly one alert across repeated sweeps.
    fixture.sweeper.sweep_once(now.add_secs(60));
    fixture.sweeper.sweep_once(now.add_secs(90));
    fixture.sweeper.sweep_once(now.add_secs(120));
    let recorded = fixture.notifications.lock().expect("lock");
    assert_eq!(recorded.len(), 1);
    assert!(recorded[0].0.contains("critical"));
}

#[test]
fn different_model_deadline_escalates_via_sweep() {
    let policy = LifecyclePolicy {
        require_different_model: true,
        different_model_timeout_secs: 120,
        ..LifecyclePolicy::default()
    };
    let fixture = fixture(policy);
    let now = Timestamp::from_unix_millis(1_000_000);
    let session = start(&fixture, "alpha", "gpt-5.2", now);
    let request = create(&fixture, &session, "rm -rf build", now);

    fixture.sweeper.sweep_once(now.add_secs(60));
    let still_pending =
        fixture.lifecycle.store().get_request(&request.id).expect("load").expect("exists");
    assert_eq!(still_pending.status, RequestStatus::Pending);

    fixture.sweeper.sweep_once(now.add_secs(180));
    let escalated =
        fixture.lifecycle.store().get_request(&request.id).expect("load").expect("exists");
    assert_eq!(escalated.status, RequestStatus::Escalated);
}

#[test]
fn trusted_agents_self_approve_via_sweep() {
    let policy = LifecyclePolicy {
        trusted_self_approve: vec!["alpha".to_string()],
        trusted_self_approve_delay_secs: 60,
        ..LifecyclePolicy::default()
    };
    let fixture = fixture(policy);
    let (_, mut events) = fixture.subscribers.subscribe();
    let now = Timestamp::from_unix_millis(1_000_000);
    let session = start(&fixture, "alpha", "gpt-5.2", now);
    let request = create(&fixture, &session, "rm -rf build", now);

    fixture.sweeper.sweep_once(now.add_secs(30));
    assert_eq!(
        fixture
            .lifecycle
            .store()
            .get_request(&request.id)
            .expect("load")
            .expect("exists")
            .status,
        RequestStatus::Pending
    );

    fixture.sweeper.sweep_once(now.add_secs(90));
    assert_eq!(
        fixture
            .lifecycle
            .store()
            .get_request(&request.id)
            .expect("load")
            .expect("exists")
            .status,
        RequestStatus::Approved
    );
    let event = events.try_recv().expect("approval broadcast");
    assert_eq!(event.event.event_type, EventType::RequestApproved);
}
