// crates/slb-core/tests/state_machine.rs
// ============================================================================
// Module: State Machine Tests
// Description: Transition legality over the request status machine.
// Purpose: Verify only enumerated transitions are accepted, under load too.
// ============================================================================

//! Transition legality coverage, including a randomized workload check.

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

use proptest::prelude::*;
use slb_core::CommandSpec;
use slb_core::InMemoryNotaryStore;
use slb_core::Justification;
use slb_core::NotaryStore;
use slb_core::Request;
use slb_core::RequestId;
use slb_core::RequestStatus;
use slb_core::SessionId;
use slb_core::StoreError;
use slb_core::Timestamp;
use slb_core::TransitionEffects;

/// All statuses, for exhaustive pairing.
const ALL_STATUSES: [RequestStatus; 9] = [
    RequestStatus::Pending,
    RequestStatus::Approved,
    RequestStatus::Rejected,
    RequestStatus::Executing,
    RequestStatus::Executed,
    RequestStatus::ExecutionFailed,
    RequestStatus::TimedOut,
    RequestStatus::Escalated,
    RequestStatus::Cancelled,
];

/// The legal transition set from the lifecycle design.
const LEGAL: [(RequestStatus, RequestStatus); 12] = [
    (RequestStatus::Pending, RequestStatus::Approved),
    (RequestStatus::Pending, RequestStatus::Rejected),
    (RequestStatus::Pending, RequestStatus::TimedOut),
    (RequestStatus::Pending, RequestStatus::Escalated),
    (RequestStatus::Pending, RequestStatus::Cancelled),
    (RequestStatus::Approved, RequestStatus::Executing),
    (RequestStatus::Executing, RequestStatus::Executed),
    (RequestStatus::Executing, RequestStatus::ExecutionFailed),
    (RequestStatus::Executing, RequestStatus::TimedOut),
    (RequestStatus::Executing, RequestStatus::Approved),
    (RequestStatus::TimedOut, RequestStatus::Escalated),
    (RequestStatus::TimedOut, RequestStatus::Rejected),
];

fn request_with_status(status: RequestStatus) -> Request {
    let now = Timestamp::from_unix_millis(1_000);
    Request {
        id: RequestId::generate(),
        project_path: "/work/project".to_string(),
        requestor_session: SessionId::generate(),
        requestor_agent: "alpha".to_string(),
        requestor_model: "gpt-5.2".to_string(),
        command: CommandSpec::new("rm -rf build", "/work/project", true),
        tier: slb_classifier::RiskTier::Dangerous,
        justification: Justification::default(),
        status,
        min_approvals: 1,
        require_different_model: false,
        created_at: now,
        expires_at: now.add_secs(1_800),
        approval_expires_at: None,
        executed_at: None,
        execution: None,
        rollback: None,
    }
}

#[test]
fn legality_relation_matches_the_design() {
    for from in ALL_STATUSES {
        for to in ALL_STATUSES {
            let expected = LEGAL.contains(&(from, to));
            assert_eq!(
                RequestStatus::can_transition(from, to),
                expected,
                "{} -> {}",
                from.label(),
                to.label()
            );
        }
    }
}

#[test]
fn terminal_statuses_have_no_exits() {
    for from in ALL_STATUSES {
        if from.is_terminal() {
            for to in ALL_STATUSES {
                assert!(!RequestStatus::can_transition(from, to));
            }
        }
    }
}

#[test]
fn store_rejects_illegal_transitions_without_mutation() {
    let store = InMemoryNotaryStore::new();
    let request = request_with_status(RequestStatus::Pending);
    store.insert_request(&request).expect("insert");
    let err = store
        .transition_request(
            &request.id,
            RequestStatus::Pending,
            RequestStatus::Executed,
            &TransitionEffects::default(),
        )
        .expect_err("illegal transition rejected");
    assert!(matches!(err, StoreError::InvalidTransition(_)));
    let reloaded = store.get_request(&request.id).expect("load").expect("exists");
    assert_eq!(reloaded.status, RequestStatus::Pending);
}

#[test]
fn store_rejects_stale_expectations() {
    let store = InMemoryNotaryStore::new();
    let request = request_with_status(RequestStatus::Approved);
    store.insert_request(&request).expect("insert");
    let err = store
        .transition_request(
            &request.id,
            RequestStatus::Pending,
            RequestStatus::Approved,
            &TransitionEffects::default(),
        )
        .expect_err("stale expectation rejected");
    assert!(matches!(err, StoreError::InvalidTransition(_)));
}

proptest! {
    /// Under a randomized transition workload every accepted step is in the
    /// enumerated legal set and every rejected step leaves state unchanged.
    #[test]
    fn randomized_workload_observes_only_legal_traces(
        steps in prop::collection::vec((0usize .. 9, 0usize .. 9), 1 .. 40),
    ) {
        let store = InMemoryNotaryStore::new();
        let request = request_with_status(RequestStatus::Pending);
        store.insert_request(&request).expect("insert");
        let mut trace = vec![RequestStatus::Pending];
        for (from_index, to_index) in steps {
            let from = ALL_STATUSES[from_index];
            let to = ALL_STATUSES[to_index];
            let before = store
                .get_request(&request.id)
                .expect("load")
                .expect("exists")
                .status;
            match store.transition_request(
                &request.id,
                from,
                to,
                &TransitionEffects::default(),
            ) {
                Ok(()) => {
                    prop_assert_eq!(before, from);
                    prop_assert!(RequestStatus::can_transition(from, to));
                    trace.push(to);
                }
                Err(_) => {
                    let after = store
                        .get_request(&request.id)
                        .expect("load")
                        .expect("exists")
                        .status;
                    prop_assert_eq!(before, after);
                }
            }
        }
        for pair in trace.windows(2) {
            prop_assert!(RequestStatus::can_transition(pair[0], pair[1]));
        }
    }
}
