// crates/slb-exec/tests/executor.rs
// ============================================================================
// Module: Executor Tests
// Description: Execution outcomes, transcripts, and the first-claim race.
// Purpose: Verify exactly one executor wins and outcomes are recorded.
// ============================================================================

//! Executor coverage over the in-memory store.

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

use slb_classifier::PatternEngine;
use slb_classifier::RiskTier;
use slb_core::CommandSpec;
use slb_core::InMemoryNotaryStore;
use slb_core::Justification;
use slb_core::NoopRequestNotifier;
use slb_core::NotaryStore;
use slb_core::Request;
use slb_core::RequestId;
use slb_core::RequestStatus;
use slb_core::Review;
use slb_core::ReviewDecision;
use slb_core::ReviewId;
use slb_core::Session;
use slb_core::SessionId;
use slb_core::SessionKey;
use slb_core::SharedNotaryStore;
use slb_core::Timestamp;
use slb_core::VerifyError;
use slb_exec::ExecError;
use slb_exec::ExecuteOptions;
use slb_exec::Executor;
use slb_exec::ExecutorConfig;
use tempfile::TempDir;

fn session(agent: &str, project: &str) -> Session {
    let now = Timestamp::now();
    Session {
        id: SessionId::generate(),
        agent: agent.to_string(),
        program: "claude-code".to_string(),
        model: "gpt-5.2".to_string(),
        project_path: project.to_string(),
        session_key: SessionKey::generate(),
        started_at: now,
        last_active_at: now,
        ended_at: None,
        rate_limit_reset_at: None,
    }
}

fn approved_request(owner: &Session, raw: &str, cwd: &str) -> Request {
    let now = Timestamp::now();
    Request {
        id: RequestId::generate(),
        project_path: owner.project_path.clone(),
        requestor_session: owner.id.clone(),
        requestor_agent: owner.agent.clone(),
        requestor_model: owner.model.clone(),
        command: CommandSpec::new(raw, cwd, true),
        tier: RiskTier::Dangerous,
        justification: Justification::default(),
        status: RequestStatus::Approved,
        min_approvals: 1,
        require_different_model: false,
        created_at: now.sub_secs(60),
        expires_at: now.add_secs(1_800),
        approval_expires_at: Some(now.add_secs(600)),
        executed_at: None,
        execution: None,
        rollback: None,
    }
}

struct Fixture {
    store: SharedNotaryStore,
    executor: Arc<Executor>,
    owner: Session,
    _dirs: (TempDir, TempDir),
}

fn fixture(capture_rollback: bool) -> Fixture {
    let store = SharedNotaryStore::from_store(InMemoryNotaryStore::new());
    let classifier = Arc::new(PatternEngine::with_builtins().expect("builtins compile"));
    let log_dir = TempDir::new().expect("log dir");
    let rollback_dir = TempDir::new().expect("rollback dir");
    let executor = Arc::new(Executor::new(
        store.clone(),
        classifier,
        Arc::new(NoopRequestNotifier),
        ExecutorConfig {
            log_dir: log_dir.path().to_path_buf(),
            rollback_dir: rollback_dir.path().to_path_buf(),
            capture_rollback,
            max_rollback_bytes: 10 * 1024 * 1024,
        },
    ));
    let owner = session("alpha", "/work/project");
    store.create_session(&owner).expect("session inserts");
    Fixture {
        store,
        executor,
        owner,
        _dirs: (log_dir, rollback_dir),
    }
}

fn insert_approved(fixture: &Fixture, raw: &str, cwd: &str) -> Request {
    let request = approved_request(&fixture.owner, raw, cwd);
    fixture.store.insert_request(&request).expect("request inserts");
    let reviewer = session("beta", &fixture.owner.project_path);
    fixture.store.create_session(&reviewer).expect("reviewer inserts");
    fixture
        .store
        .upsert_review(&Review {
            id: ReviewId::generate(),
            request_id: request.id.clone(),
            reviewer_session: reviewer.id,
            reviewer_agent: "beta".to_string(),
            reviewer_model: "claude-4".to_string(),
            decision: ReviewDecision::Approve,
            comments: String::new(),
            signature: "sig".to_string(),
            created_at: Timestamp::now(),
        })
        .expect("review inserts");
    request
}

#[tokio::test]
async fn successful_execution_records_exit_zero() {
    let fixture = fixture(false);
    let request = insert_approved(&fixture, "echo hello from the gate", "/tmp");
    let outcome = fixture
        .executor
        .execute(
            &request.id,
            &fixture.owner.id,
            &fixture.owner.session_key,
            ExecuteOptions::default(),
        )
        .await
        .expect("execution runs");
    assert_eq!(outcome.status, RequestStatus::Executed);
    assert_eq!(outcome.exit_code, Some(0));
    assert!(String::from_utf8_lossy(&outcome.output).contains("hello from the gate"));

    let transcript = std::fs::read_to_string(&outcome.log_path).expect("transcript reads");
    assert!(transcript.contains("command: echo hello from the gate"));
    assert!(transcript.contains("hello from the gate"));
    assert!(transcript.contains("exit_code: 0"));

    let reloaded =
        fixture.store.get_request(&request.id).expect("load").expect("exists");
    assert_eq!(reloaded.status, RequestStatus::Executed);
    let execution = reloaded.execution.expect("execution record");
    assert_eq!(execution.exit_code, Some(0));
    assert_eq!(execution.executor_agent, "alpha");
    assert!(execution.duration_ms.is_some());
}

#[tokio::test]
async fn nonzero_exit_records_execution_failed() {
    let fixture = fixture(false);
    let request = insert_approved(&fixture, "exit 3", "/tmp");
    let outcome = fixture
        .executor
        .execute(
            &request.id,
            &fixture.owner.id,
            &fixture.owner.session_key,
            ExecuteOptions::default(),
        )
        .await
        .expect("execution runs");
    assert_eq!(outcome.status, RequestStatus::ExecutionFailed);
    assert_eq!(outcome.exit_code, Some(3));
    let reloaded =
        fixture.store.get_request(&request.id).expect("load").expect("exists");
    assert_eq!(reloaded.status, RequestStatus::ExecutionFailed);
}

#[tokio::test]
async fn deadline_rolls_the_request_to_timed_out() {
    let fixture = fixture(false);
    let request = insert_approved(&fixture, "sleep 30", "/tmp");
    let outcome = fixture
        .executor
        .execute(
            &request.id,
            &fixture.owner.id,
            &fixture.owner.session_key,
            ExecuteOptions {
                timeout_secs: Some(1),
                ..ExecuteOptions::default()
            },
        )
        .await
        .expect("execution runs");
    assert_eq!(outcome.status, RequestStatus::TimedOut);
    assert_eq!(outcome.exit_code, None);
    let reloaded =
        fixture.store.get_request(&request.id).expect("load").expect("exists");
    assert_eq!(reloaded.status, RequestStatus::TimedOut);
}

#[tokio::test]
async fn bad_session_key_is_refused() {
    let fixture = fixture(false);
    let request = insert_approved(&fixture, "echo hi", "/tmp");
    let err = fixture
        .executor
        .execute(
            &request.id,
            &fixture.owner.id,
            &SessionKey::generate(),
            ExecuteOptions::default(),
        )
        .await
        .expect_err("auth refused");
    assert!(matches!(err, ExecError::Auth));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_executors_see_one_winner() {
    let fixture = fixture(false);
    let request = insert_approved(&fixture, "sleep 0.3 && echo raced", "/tmp");
    let mut attempts = Vec::new();
    for _ in 0 .. 4 {
        let executor = Arc::clone(&fixture.executor);
        let id = request.id.clone();
        let session_id = fixture.owner.id.clone();
        let key = fixture.owner.session_key.clone();
        attempts.push(tokio::spawn(async move {
            executor.execute(&id, &session_id, &key, ExecuteOptions::default()).await
        }));
    }
    let mut winners = 0;
    let mut losers = 0;
    for attempt in attempts {
        match attempt.await.expect("task joins") {
            Ok(outcome) => {
                winners += 1;
                assert_eq!(outcome.status, RequestStatus::Executed);
                assert_eq!(outcome.exit_code, Some(0));
            }
            Err(ExecError::Verify(
                VerifyError::AlreadyExecuting | VerifyError::AlreadyExecuted,
            )) => {
                losers += 1;
            }
            Err(other) => panic!("unexpected error {other}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(losers, 3);
    let reloaded =
        fixture.store.get_request(&request.id).expect("load").expect("exists");
    assert_eq!(reloaded.status, RequestStatus::Executed);
}

#[tokio::test]
async fn pre_spawn_cancellation_reverts_to_approved() {
    let fixture = fixture(false);
    let request = insert_approved(&fixture, "echo never-runs", "/tmp");
    let (sender, receiver) = tokio::sync::watch::channel(true);
    let err = fixture
        .executor
        .execute(
            &request.id,
            &fixture.owner.id,
            &fixture.owner.session_key,
            ExecuteOptions {
                cancel: Some(receiver),
                ..ExecuteOptions::default()
            },
        )
        .await
        .expect_err("cancelled before start");
    drop(sender);
    assert!(matches!(err, ExecError::Cancelled));
    let reloaded =
        fixture.store.get_request(&request.id).expect("load").expect("exists");
    assert_eq!(reloaded.status, RequestStatus::Approved);
}

#[tokio::test]
async fn rollback_is_captured_before_destructive_commands() {
    let fixture = fixture(true);
    let project = TempDir::new().expect("project dir");
    let build = project.path().join("build");
    std::fs::create_dir_all(&build).expect("build dir");
    std::fs::write(build.join("artifact.txt"), b"bytes").expect("artifact");

    let request = insert_approved(
        &fixture,
        "rm -rf build",
        &project.path().to_string_lossy(),
    );
    let outcome = fixture
        .executor
        .execute(
            &request.id,
            &fixture.owner.id,
            &fixture.owner.session_key,
            ExecuteOptions::default(),
        )
        .await
        .expect("execution runs");
    assert_eq!(outcome.status, RequestStatus::Executed);
    assert!(!build.exists(), "the command really deleted the target");

    let reloaded =
        fixture.store.get_request(&request.id).expect("load").expect("exists");
    let rollback = reloaded.rollback.expect("rollback captured");
    let archive = std::path::Path::new(&rollback.base_dir).join("filesystem.tar.gz");
    assert!(archive.exists());
    slb_exec::restore_rollback(&rollback, project.path()).expect("restore succeeds");
    assert_eq!(
        std::fs::read(build.join("artifact.txt")).expect("artifact restored"),
        b"bytes"
    );
}
