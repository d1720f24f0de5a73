// crates/slb-core/tests/verifier.rs
// ============================================================================
// Module: Execution Verifier Tests
// Description: Gate coverage for execution-time re-validation.
// Purpose: Verify TTL, hash, policy, and quorum gates fire in order.
// ============================================================================

//! Verifier gate coverage over the in-memory store.

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

use slb_classifier::PatternEngine;
use slb_classifier::RiskTier;
use slb_core::CommandSpec;
use slb_core::InMemoryNotaryStore;
use slb_core::Justification;
use slb_core::NotaryStore;
use slb_core::Request;
use slb_core::RequestId;
use slb_core::RequestStatus;
use slb_core::Review;
use slb_core::ReviewDecision;
use slb_core::ReviewId;
use slb_core::SessionId;
use slb_core::Timestamp;
use slb_core::VerifyError;
use slb_core::verify_execution_allowed;

const NOW: Timestamp = Timestamp::from_unix_millis(10_000_000);

fn classifier() -> PatternEngine {
    PatternEngine::with_builtins().expect("builtins compile")
}

fn approved_request(raw: &str, tier: RiskTier) -> Request {
    Request {
        id: RequestId::generate(),
        project_path: "/work/project".to_string(),
        requestor_session: SessionId::generate(),
        requestor_agent: "alpha".to_string(),
        requestor_model: "gpt-5.2".to_string(),
        command: CommandSpec::new(raw, "/work/project", true),
        tier,
        justification: Justification::default(),
        status: RequestStatus::Approved,
        min_approvals: 1,
        require_different_model: false,
        created_at: NOW.sub_secs(120),
        expires_at: NOW.add_secs(1_800),
        approval_expires_at: Some(NOW.add_secs(600)),
        executed_at: None,
        execution: None,
        rollback: None,
    }
}

fn approve(store: &InMemoryNotaryStore, request: &Request) {
    let review = Review {
        id: ReviewId::generate(),
        request_id: request.id.clone(),
        reviewer_session: SessionId::generate(),
        reviewer_agent: "beta".to_string(),
        reviewer_model: "claude-4".to_string(),
        decision: ReviewDecision::Approve,
        comments: String::new(),
        signature: "sig".to_string(),
        created_at: NOW.sub_secs(60),
    };
    store.upsert_review(&review).expect("review upserts");
}

#[test]
fn approved_request_passes_all_gates() {
    let store = InMemoryNotaryStore::new();
    let request = approved_request("rm -rf build", RiskTier::Dangerous);
    store.insert_request(&request).expect("insert");
    approve(&store, &request);
    let verified = verify_execution_allowed(&store, &classifier(), &request.id, NOW)
        .expect("gates pass");
    assert_eq!(verified.request.id, request.id);
    assert_eq!(verified.approval_remaining_secs, 600);
}

#[test]
fn unknown_request_is_not_found() {
    let store = InMemoryNotaryStore::new();
    let err = verify_execution_allowed(&store, &classifier(), &RequestId::generate(), NOW)
        .expect_err("unknown request");
    assert!(matches!(err, VerifyError::NotFound(_)));
}

#[test]
fn pending_request_is_not_approved() {
    let store = InMemoryNotaryStore::new();
    let mut request = approved_request("rm -rf build", RiskTier::Dangerous);
    request.status = RequestStatus::Pending;
    request.approval_expires_at = None;
    store.insert_request(&request).expect("insert");
    let err = verify_execution_allowed(&store, &classifier(), &request.id, NOW)
        .expect_err("not approved");
    assert!(matches!(err, VerifyError::NotApproved("pending")));
}

#[test]
fn executing_request_reports_already_executing() {
    let store = InMemoryNotaryStore::new();
    let mut request = approved_request("rm -rf build", RiskTier::Dangerous);
    request.status = RequestStatus::Executing;
    store.insert_request(&request).expect("insert");
    let err = verify_execution_allowed(&store, &classifier(), &request.id, NOW)
        .expect_err("already executing");
    assert!(matches!(err, VerifyError::AlreadyExecuting));
}

#[test]
fn finished_request_reports_already_executed() {
    let store = InMemoryNotaryStore::new();
    for status in [RequestStatus::Executed, RequestStatus::ExecutionFailed] {
        let mut request = approved_request("rm -rf build", RiskTier::Dangerous);
        request.status = status;
        store.insert_request(&request).expect("insert");
        let err = verify_execution_allowed(&store, &classifier(), &request.id, NOW)
            .expect_err("already executed");
        assert!(matches!(err, VerifyError::AlreadyExecuted));
    }
}

#[test]
fn expired_approval_fails_and_leaves_status() {
    let store = InMemoryNotaryStore::new();
    let mut request = approved_request("rm -rf build", RiskTier::Dangerous);
    request.approval_expires_at = Some(NOW.sub_secs(1));
    store.insert_request(&request).expect("insert");
    approve(&store, &request);
    let err = verify_execution_allowed(&store, &classifier(), &request.id, NOW)
        .expect_err("expired approval");
    assert!(matches!(err, VerifyError::ApprovalExpired));
    let reloaded = store.get_request(&request.id).expect("load").expect("exists");
    assert_eq!(reloaded.status, RequestStatus::Approved);
}

#[test]
fn tampered_command_fails_the_hash_gate() {
    let store = InMemoryNotaryStore::new();
    let mut request = approved_request("rm -rf build", RiskTier::Dangerous);
    request.command.raw = "rm -rf / --no-preserve-root".to_string();
    store.insert_request(&request).expect("insert");
    approve(&store, &request);
    let err = verify_execution_allowed(&store, &classifier(), &request.id, NOW)
        .expect_err("hash mismatch");
    assert!(matches!(err, VerifyError::HashMismatch));
}

#[test]
fn reclassification_above_approved_tier_escalates() {
    let store = InMemoryNotaryStore::new();
    // Approved as caution, but the command now classifies critical.
    let mut request = approved_request("rm -rf /etc", RiskTier::Caution);
    request.min_approvals = 1;
    store.insert_request(&request).expect("insert");
    approve(&store, &request);
    let err = verify_execution_allowed(&store, &classifier(), &request.id, NOW)
        .expect_err("policy escalated");
    assert!(matches!(
        err,
        VerifyError::PolicyEscalated {
            approved: RiskTier::Caution,
            current: RiskTier::Critical,
        }
    ));
}

#[test]
fn missing_quorum_fails_the_recount_gate() {
    let store = InMemoryNotaryStore::new();
    let request = approved_request("rm -rf build", RiskTier::Dangerous);
    store.insert_request(&request).expect("insert");
    let err = verify_execution_allowed(&store, &classifier(), &request.id, NOW)
        .expect_err("quorum lost");
    assert!(matches!(err, VerifyError::QuorumLost));
}
