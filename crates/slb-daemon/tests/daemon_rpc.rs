// crates/slb-daemon/tests/daemon_rpc.rs
// ============================================================================
// Module: Daemon RPC Tests
// Description: Method dispatch, subscriptions, and TCP admission.
// Purpose: Exercise the wire protocol over live unix and TCP transports.
// ============================================================================

//! Integration coverage for the daemon's IPC surface.

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
use std::time::Duration;

use serde_json::Value;
use serde_json::json;
use slb_classifier::PatternEngine;
use slb_classifier::RiskTier;
use slb_config::SlbConfig;
use slb_core::CommandSpec;
use slb_core::InMemoryNotaryStore;
use slb_core::Justification;
use slb_core::LifecycleEngine;
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
use slb_daemon::DaemonConfig;
use slb_daemon::DaemonHandle;
use slb_daemon::DaemonServer;
use tempfile::TempDir;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::UnixStream;

struct Fixture {
    handle: DaemonHandle,
    store: SharedNotaryStore,
    project: TempDir,
}

async fn start_daemon(mutate: impl FnOnce(&mut SlbConfig)) -> Fixture {
    let project = TempDir::new().expect("project dir");
    let mut config = SlbConfig::default();
    mutate(&mut config);
    config.validate().expect("config validates");
    let store = SharedNotaryStore::from_store(InMemoryNotaryStore::new());
    let classifier = Arc::new(PatternEngine::with_builtins().expect("builtins compile"));
    let lifecycle = Arc::new(LifecycleEngine::new(
        store.clone(),
        Arc::clone(&classifier),
        config.lifecycle_policy(),
    ));
    let daemon_config = DaemonConfig::from_config(&config, project.path().to_path_buf())
        .expect("daemon config");
    let server = DaemonServer::new(daemon_config, store.clone(), classifier, lifecycle);
    let handle = server.start().await.expect("daemon starts");
    Fixture {
        handle,
        store,
        project,
    }
}

async fn connect(fixture: &Fixture) -> BufReader<UnixStream> {
    let stream =
        UnixStream::connect(&fixture.handle.socket_path).await.expect("socket connects");
    BufReader::new(stream)
}

async fn call(reader: &mut BufReader<UnixStream>, frame: Value) -> Value {
    let mut payload = frame.to_string().into_bytes();
    payload.push(b'\n');
    reader.get_mut().write_all(&payload).await.expect("frame writes");
    read_frame(reader).await
}

async fn read_frame(reader: &mut BufReader<UnixStream>) -> Value {
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
        .await
        .expect("frame arrives")
        .expect("frame reads");
    serde_json::from_str(line.trim()).expect("frame parses")
}

fn session(fixture: &Fixture, agent: &str) -> Session {
    let now = Timestamp::now();
    let session = Session {
        id: SessionId::generate(),
        agent: agent.to_string(),
        program: "claude-code".to_string(),
        model: "gpt-5.2".to_string(),
        project_path: fixture.project.path().to_string_lossy().into_owned(),
        session_key: SessionKey::generate(),
        started_at: now,
        last_active_at: now,
        ended_at: None,
        rate_limit_reset_at: None,
    };
    fixture.store.create_session(&session).expect("session inserts");
    session
}

fn approved_request(fixture: &Fixture, owner: &Session, raw: &str) -> Request {
    let now = Timestamp::now();
    let request = Request {
        id: RequestId::generate(),
        project_path: owner.project_path.clone(),
        requestor_session: owner.id.clone(),
        requestor_agent: owner.agent.clone(),
        requestor_model: owner.model.clone(),
        command: CommandSpec::new(raw, owner.project_path.clone(), true),
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
    };
    fixture.store.insert_request(&request).expect("request inserts");
    let reviewer = session(fixture, "reviewer");
    fixture
        .store
        .upsert_review(&Review {
            id: ReviewId::generate(),
            request_id: request.id.clone(),
            reviewer_session: reviewer.id,
            reviewer_agent: reviewer.agent,
            reviewer_model: "claude-4".to_string(),
            decision: ReviewDecision::Approve,
            comments: String::new(),
            signature: "sig".to_string(),
            created_at: now,
        })
        .expect("review inserts");
    request
}

#[tokio::test]
async fn ping_and_status_respond() {
    let fixture = start_daemon(|_| {}).await;
    let mut connection = connect(&fixture).await;

    let pong = call(&mut connection, json!({"method": "ping", "id": 1})).await;
    assert_eq!(pong["result"]["pong"], json!(true));
    assert_eq!(pong["id"], json!(1));

    let status = call(&mut connection, json!({"method": "status", "id": 2})).await;
    assert_eq!(status["result"]["pendingCount"], json!(0));
    assert_eq!(status["result"]["activeSessions"], json!(0));
    fixture.handle.shutdown().await;
}

#[tokio::test]
async fn unknown_methods_and_bad_frames_report_codes() {
    let fixture = start_daemon(|_| {}).await;
    let mut connection = connect(&fixture).await;

    let unknown = call(&mut connection, json!({"method": "frobnicate", "id": 7})).await;
    assert_eq!(unknown["error"]["code"], json!(-32601));

    connection.get_mut().write_all(b"this is not json\n").await.expect("garbage writes");
    let parse_error = read_frame(&mut connection).await;
    assert_eq!(parse_error["error"]["code"], json!(-32700));
    fixture.handle.shutdown().await;
}

#[tokio::test]
async fn hook_query_allows_safe_and_asks_for_dangerous() {
    let fixture = start_daemon(|_| {}).await;
    let agent = session(&fixture, "alpha");
    let mut connection = connect(&fixture).await;

    let safe = call(
        &mut connection,
        json!({
            "method": "hook_query",
            "params": {"command": "git status", "sessionId": agent.id.as_str()},
            "id": 1,
        }),
    )
    .await;
    assert_eq!(safe["result"]["action"], json!("allow"));
    assert_eq!(safe["result"]["tier"], json!("safe"));

    let dangerous = call(
        &mut connection,
        json!({
            "method": "hook_query",
            "params": {"command": "rm -rf build", "sessionId": agent.id.as_str()},
            "id": 2,
        }),
    )
    .await;
    assert_eq!(dangerous["result"]["action"], json!("ask"));
    assert_eq!(dangerous["result"]["tier"], json!("dangerous"));
    assert_eq!(dangerous["result"]["minApprovals"], json!(1));
    fixture.handle.shutdown().await;
}

#[tokio::test]
async fn hook_query_honors_recent_preapproval() {
    let fixture = start_daemon(|_| {}).await;
    let agent = session(&fixture, "alpha");
    let approved = approved_request(&fixture, &agent, "rm -rf build");
    let mut connection = connect(&fixture).await;

    let response = call(
        &mut connection,
        json!({
            "method": "hook_query",
            "params": {"command": "rm -rf build", "sessionId": agent.id.as_str()},
            "id": 1,
        }),
    )
    .await;
    assert_eq!(response["result"]["action"], json!("allow"));
    assert_eq!(response["result"]["requestId"], json!(approved.id.as_str()));
    fixture.handle.shutdown().await;
}

#[tokio::test]
async fn hook_query_blocks_blocked_agents() {
    let fixture = start_daemon(|config| {
        config.agents.blocked = vec!["mallory".to_string()];
    })
    .await;
    let agent = session(&fixture, "mallory");
    let mut connection = connect(&fixture).await;

    let response = call(
        &mut connection,
        json!({
            "method": "hook_query",
            "params": {"command": "rm -rf build", "sessionId": agent.id.as_str()},
            "id": 1,
        }),
    )
    .await;
    assert_eq!(response["result"]["action"], json!("block"));
    fixture.handle.shutdown().await;
}

#[tokio::test]
async fn hook_health_reports_pattern_manifest() {
    let fixture = start_daemon(|_| {}).await;
    let mut connection = connect(&fixture).await;
    let health = call(&mut connection, json!({"method": "hook_health", "id": 1})).await;
    assert_eq!(health["result"]["status"], json!("ok"));
    assert_eq!(health["result"]["patternHash"].as_str().map(str::len), Some(64));
    assert!(health["result"]["patternCount"].as_u64().unwrap_or(0) > 40);
    fixture.handle.shutdown().await;
}

#[tokio::test]
async fn verify_execute_reports_gate_results() {
    let fixture = start_daemon(|_| {}).await;
    let agent = session(&fixture, "alpha");
    let approved = approved_request(&fixture, &agent, "rm -rf build");
    let mut connection = connect(&fixture).await;

    let allowed = call(
        &mut connection,
        json!({
            "method": "verify_execute",
            "params": {"requestId": approved.id.as_str(), "sessionId": agent.id.as_str()},
            "id": 1,
        }),
    )
    .await;
    assert_eq!(allowed["result"]["allowed"], json!(true));
    assert_eq!(allowed["result"]["riskTier"], json!("dangerous"));
    assert!(allowed["result"]["approvalRemainingSeconds"].as_i64().unwrap_or(0) > 0);

    let missing = call(
        &mut connection,
        json!({
            "method": "verify_execute",
            "params": {"requestId": "nope", "sessionId": agent.id.as_str()},
            "id": 2,
        }),
    )
    .await;
    assert_eq!(missing["result"]["allowed"], json!(false));
    fixture.handle.shutdown().await;
}

#[tokio::test]
async fn subscribers_receive_notify_broadcasts() {
    let fixture = start_daemon(|_| {}).await;
    let mut subscriber = connect(&fixture).await;
    let subscribed = call(&mut subscriber, json!({"method": "subscribe", "id": 1})).await;
    assert_eq!(subscribed["result"]["subscribed"], json!(true));
    assert!(subscribed["result"]["subscriptionId"].as_u64().unwrap_or(0) > 0);

    let mut publisher = connect(&fixture).await;
    let sent = call(
        &mut publisher,
        json!({
            "method": "notify",
            "params": {"type": "request_created", "payload": {"requestId": "r1"}},
            "id": 2,
        }),
    )
    .await;
    assert_eq!(sent["result"]["sent"], json!(true));

    let event = read_frame(&mut subscriber).await;
    assert_eq!(event["event"]["type"], json!("request_created"));
    assert_eq!(event["event"]["payload"]["requestId"], json!("r1"));
    assert!(event.get("id").is_none());
    fixture.handle.shutdown().await;
}

#[tokio::test]
async fn tcp_allowlist_closes_disallowed_peers_without_reply() {
    let fixture = start_daemon(|config| {
        config.daemon.tcp_addr = Some("127.0.0.1:0".to_string());
        config.daemon.tcp_require_auth = true;
        config.daemon.tcp_allowed_ips = vec!["10.0.0.0/8".to_string()];
    })
    .await;
    let addr = fixture.handle.tcp_addr.expect("tcp bound");
    let mut stream = TcpStream::connect(addr).await.expect("tcp connects");
    stream
        .write_all(b"{\"auth\":\"some-key\"}\n{\"method\":\"ping\",\"id\":1}\n")
        .await
        .expect("frames write");
    let mut buffer = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buffer))
        .await
        .expect("connection closes")
        .expect("read completes");
    assert_eq!(read, 0, "disallowed peers receive no bytes");
    fixture.handle.shutdown().await;
}

#[tokio::test]
async fn tcp_handshake_gates_the_method_set() {
    let fixture = start_daemon(|config| {
        config.daemon.tcp_addr = Some("127.0.0.1:0".to_string());
        config.daemon.tcp_require_auth = true;
    })
    .await;
    let addr = fixture.handle.tcp_addr.expect("tcp bound");

    // A valid handshake admits the connection.
    let mut stream = TcpStream::connect(addr).await.expect("tcp connects");
    stream
        .write_all(b"{\"auth\":\"session-key\"}\n{\"method\":\"ping\",\"id\":1}\n")
        .await
        .expect("frames write");
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
        .await
        .expect("response arrives")
        .expect("response reads");
    let response: Value = serde_json::from_str(line.trim()).expect("response parses");
    assert_eq!(response["result"]["pong"], json!(true));

    // An empty key is rejected without a reply.
    let mut rejected = TcpStream::connect(addr).await.expect("tcp connects");
    rejected.write_all(b"{\"auth\":\"\"}\n").await.expect("handshake writes");
    let mut buffer = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), rejected.read_to_end(&mut buffer))
        .await
        .expect("connection closes")
        .expect("read completes");
    assert_eq!(read, 0);
    fixture.handle.shutdown().await;
}
