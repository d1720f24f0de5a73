// crates/slb-daemon/src/server.rs
// ============================================================================
// Module: Daemon IPC Server
// Description: Line-delimited JSON-RPC over unix and authenticated TCP.
// Purpose: Serve the notary method set and fan events out to subscribers.
// Dependencies: slb-core, slb-classifier, tokio, crate::*
// ============================================================================

//! ## Overview
//! One accept task per listener, one task per connection. Unix connections
//! are trusted by socket permissions; TCP connections pass the IP allowlist
//! and must send `{"auth": "<session-key>"}` as their first line within
//! three seconds or be closed without a reply. A connection that invokes
//! `subscribe` keeps serving requests while event frames are interleaved
//! onto its write half.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write as _;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use serde_json::Value;
use serde_json::json;
use slb_classifier::PatternEngine;
use slb_classifier::export::manifest_sha256;
use slb_config::SlbConfig;
use slb_core::LifecycleEngine;
use slb_core::NotaryStore;
use slb_core::RequestId;
use slb_core::SessionId;
use slb_core::SharedNotaryStore;
use slb_core::Timestamp;
use slb_core::VerifyError;
use slb_core::verify_execution_allowed;
use thiserror::Error;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::allowlist::IpAllowlist;
use crate::debounce::DesktopNotifier;
use crate::debounce::NotificationDebouncer;
use crate::debounce::noop_desktop_notifier;
use crate::paths;
use crate::rpc::CODE_INTERNAL;
use crate::rpc::CODE_INVALID_PARAMS;
use crate::rpc::CODE_METHOD_NOT_FOUND;
use crate::rpc::CODE_PARSE;
use crate::rpc::EventEnvelope;
use crate::rpc::HookAction;
use crate::rpc::HookHealthResult;
use crate::rpc::HookQueryParams;
use crate::rpc::HookQueryResult;
use crate::rpc::NotifyParams;
use crate::rpc::RpcRequest;
use crate::rpc::RpcResponse;
use crate::rpc::StatusResult;
use crate::rpc::VerifyExecuteParams;
use crate::rpc::VerifyExecuteResult;
use crate::subscribers::SubscriberTable;
use crate::sweeper::TimeoutSweeper;
use crate::watcher::StateWatcher;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted line length per frame.
const MAX_LINE_BYTES: u64 = 1024 * 1024;
/// TCP auth handshake deadline.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while starting or running the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Listener bind failure; fatal.
    #[error("daemon bind failed: {0}")]
    Bind(String),
    /// Configuration problem surfaced at start.
    #[error("daemon config error: {0}")]
    Config(String),
    /// Filesystem failure while preparing state directories.
    #[error("daemon io error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Pluggable TCP handshake validator.
pub type AuthValidator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Runtime configuration for the daemon.
#[derive(Clone)]
pub struct DaemonConfig {
    /// Project working tree the daemon serves.
    pub project_path: PathBuf,
    /// Unix socket path; derived from the project when unset.
    pub socket_path: Option<PathBuf>,
    /// Optional TCP bind address.
    pub tcp_addr: Option<SocketAddr>,
    /// Whether TCP connections must complete the auth handshake.
    pub tcp_require_auth: bool,
    /// Allowlist applied to TCP peers before the handshake.
    pub allowlist: IpAllowlist,
    /// PID file path; derived from the user when unset.
    pub pid_file: Option<PathBuf>,
    /// Sweeper tick interval.
    pub check_interval: Duration,
    /// Whether desktop notifications fire.
    pub desktop_enabled: bool,
    /// Age a critical pending request reaches before notifying, seconds.
    pub desktop_delay_secs: u64,
    /// Hook pre-approval lookback window in seconds.
    pub preapproval_window_secs: u64,
}

impl DaemonConfig {
    /// Builds the runtime configuration from the validated value object.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::Config`] when the address or allowlist
    /// entries fail to parse (the value object validates them, so this
    /// indicates a caller skipping validation).
    pub fn from_config(
        config: &SlbConfig,
        project_path: PathBuf,
    ) -> Result<Self, DaemonError> {
        let tcp_addr = config
            .daemon
            .tcp_addr
            .as_ref()
            .map(|addr| {
                addr.parse::<SocketAddr>()
                    .map_err(|_| DaemonError::Config(format!("invalid tcp addr {addr}")))
            })
            .transpose()?;
        let allowlist = IpAllowlist::parse(&config.daemon.tcp_allowed_ips)
            .map_err(|err| DaemonError::Config(err.to_string()))?;
        Ok(Self {
            socket_path: config.daemon.ipc_socket.as_ref().map(PathBuf::from),
            tcp_addr,
            tcp_require_auth: config.daemon.tcp_require_auth,
            allowlist,
            pid_file: config.daemon.pid_file.as_ref().map(PathBuf::from),
            check_interval: Duration::from_secs(config.check_interval_secs()),
            desktop_enabled: config.notifications.desktop_enabled,
            desktop_delay_secs: config.notifications.desktop_delay_secs,
            preapproval_window_secs: config.notifications.preapproval_window_secs,
            project_path,
        })
    }

    /// Returns the effective unix socket path.
    #[must_use]
    pub fn effective_socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| paths::socket_path(&self.project_path))
    }
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// The per-project notary daemon.
pub struct DaemonServer {
    /// Runtime configuration.
    config: DaemonConfig,
    /// Durable notary state.
    store: SharedNotaryStore,
    /// Risk classifier.
    classifier: Arc<PatternEngine>,
    /// Lifecycle engine used by the sweeper.
    lifecycle: Arc<LifecycleEngine>,
    /// Subscriber fan-out.
    subscribers: Arc<SubscriberTable>,
    /// At-most-once notification keyset.
    debouncer: Arc<NotificationDebouncer>,
    /// Desktop notification sink.
    desktop: DesktopNotifier,
    /// TCP handshake validator.
    auth: AuthValidator,
    /// Blocked agent names from policy.
    blocked_agents: Vec<String>,
    /// Daemon start instant.
    started: Instant,
}

/// Handle to a running daemon; shutting down joins every task.
pub struct DaemonHandle {
    /// Shutdown signal sender.
    shutdown: watch::Sender<bool>,
    /// Long-lived task handles.
    tasks: Vec<JoinHandle<()>>,
    /// Bound unix socket path.
    pub socket_path: PathBuf,
    /// Bound TCP address, when a TCP listener is active.
    pub tcp_addr: Option<SocketAddr>,
    /// PID file written at start.
    pid_file: PathBuf,
}

impl DaemonHandle {
    /// Signals shutdown, joins the tasks, and removes socket and PID files.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        let _ = std::fs::remove_file(&self.socket_path);
        paths::remove_pid_file(&self.pid_file);
    }
}

impl DaemonServer {
    /// Creates a daemon server over an existing store and lifecycle engine.
    #[must_use]
    pub fn new(
        config: DaemonConfig,
        store: SharedNotaryStore,
        classifier: Arc<PatternEngine>,
        lifecycle: Arc<LifecycleEngine>,
    ) -> Self {
        let tcp_require_auth = config.tcp_require_auth;
        Self {
            blocked_agents: lifecycle.policy().blocked_agents.clone(),
            config,
            store,
            classifier,
            lifecycle,
            subscribers: Arc::new(SubscriberTable::new()),
            debouncer: Arc::new(NotificationDebouncer::new()),
            desktop: noop_desktop_notifier(),
            // The default validator accepts any non-empty key when auth is
            // required, and everything otherwise.
            auth: Arc::new(move |key: &str| !tcp_require_auth || !key.is_empty()),
            started: Instant::now(),
        }
    }

    /// Replaces the desktop notification sink.
    #[must_use]
    pub fn with_desktop_notifier(mut self, desktop: DesktopNotifier) -> Self {
        self.desktop = desktop;
        self
    }

    /// Replaces the TCP handshake validator.
    #[must_use]
    pub fn with_auth_validator(mut self, auth: AuthValidator) -> Self {
        self.auth = auth;
        self
    }

    /// Returns the subscriber table, for in-process event posting.
    #[must_use]
    pub fn subscribers(&self) -> Arc<SubscriberTable> {
        Arc::clone(&self.subscribers)
    }

    /// Starts the listeners, watcher, and sweeper.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError`] when a listener cannot bind or the state
    /// directories cannot be prepared; both are fatal.
    pub async fn start(self) -> Result<DaemonHandle, DaemonError> {
        let (shutdown_sender, shutdown) = watch::channel(false);
        let server = Arc::new(self);
        let mut tasks = Vec::new();

        let socket_path = server.config.effective_socket_path();
        let _ = std::fs::remove_file(&socket_path);
        #[cfg(unix)]
        {
            let listener = tokio::net::UnixListener::bind(&socket_path)
                .map_err(|err| DaemonError::Bind(format!("unix {}: {err}", socket_path.display())))?;
            let mut permissions = std::fs::metadata(&socket_path)
                .map_err(|err| DaemonError::Io(err.to_string()))?
                .permissions();
            {
                use std::os::unix::fs::PermissionsExt;
                permissions.set_mode(0o600);
            }
            std::fs::set_permissions(&socket_path, permissions)
                .map_err(|err| DaemonError::Io(err.to_string()))?;
            let accept_server = Arc::clone(&server);
            let mut accept_shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        accepted = listener.accept() => {
                            let Ok((stream, _)) = accepted else { continue };
                            let connection_server = Arc::clone(&accept_server);
                            let connection_shutdown = accept_shutdown.clone();
                            tokio::spawn(async move {
                                serve_connection(connection_server, stream, connection_shutdown)
                                    .await;
                            });
                        }
                        changed = accept_shutdown.changed() => {
                            if changed.is_err() || *accept_shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }));
        }

        let tcp_addr = match server.config.tcp_addr {
            Some(requested) => {
                let listener = TcpListener::bind(requested)
                    .await
                    .map_err(|err| DaemonError::Bind(format!("tcp {requested}: {err}")))?;
                let bound = listener
                    .local_addr()
                    .map_err(|err| DaemonError::Bind(err.to_string()))?;
                let accept_server = Arc::clone(&server);
                let mut accept_shutdown = shutdown.clone();
                tasks.push(tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            accepted = listener.accept() => {
                                let Ok((stream, peer)) = accepted else { continue };
                                let connection_server = Arc::clone(&accept_server);
                                let connection_shutdown = accept_shutdown.clone();
                                tokio::spawn(async move {
                                    serve_tcp_connection(
                                        connection_server,
                                        stream,
                                        peer,
                                        connection_shutdown,
                                    )
                                    .await;
                                });
                            }
                            changed = accept_shutdown.changed() => {
                                if changed.is_err() || *accept_shutdown.borrow() {
                                    break;
                                }
                            }
                        }
                    }
                }));
                Some(bound)
            }
            None => None,
        };

        match StateWatcher::spawn(&server.config.project_path, shutdown.clone()) {
            Ok((watcher, mut events)) => {
                // Watcher events are advisory; consumers re-read the store.
                // The daemon drains them to keep the channel moving.
                tasks.push(tokio::spawn(async move {
                    let _watcher = watcher;
                    while events.recv().await.is_some() {}
                }));
            }
            Err(err) => warn(&format!("state watcher unavailable: {err}")),
        }

        let sweeper = TimeoutSweeper::new(
            Arc::clone(&server.lifecycle),
            Arc::clone(&server.subscribers),
            Arc::clone(&server.debouncer),
            Arc::clone(&server.desktop),
            server.config.desktop_enabled,
            server.config.project_path.to_string_lossy().into_owned(),
            server.config.check_interval,
            server.config.desktop_delay_secs,
        );
        tasks.push(sweeper.spawn(shutdown.clone()));

        let pid_file = server.config.pid_file.clone().unwrap_or_else(paths::pid_file_path);
        paths::write_pid_file(&pid_file, std::process::id())
            .map_err(|err| DaemonError::Io(format!("pid file: {err}")))?;

        Ok(DaemonHandle {
            shutdown: shutdown_sender,
            tasks,
            socket_path,
            tcp_addr,
            pid_file,
        })
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Dispatches one request frame.
    fn dispatch(&self, request: RpcRequest) -> Dispatch {
        let id = request.id.clone();
        match request.method.as_str() {
            "ping" => Dispatch::Respond(RpcResponse::ok(id, json!({"pong": true}))),
            "status" => Dispatch::Respond(self.handle_status(id)),
            "notify" => Dispatch::Respond(self.handle_notify(id, request.params)),
            "subscribe" => {
                let (subscription_id, receiver) = self.subscribers.subscribe();
                Dispatch::Subscribe {
                    response: RpcResponse::ok(
                        id,
                        json!({"subscribed": true, "subscriptionId": subscription_id}),
                    ),
                    subscription_id,
                    receiver,
                }
            }
            "hook_query" => Dispatch::Respond(self.handle_hook_query(id, request.params)),
            "hook_health" => Dispatch::Respond(self.handle_hook_health(id)),
            "verify_execute" => {
                Dispatch::Respond(self.handle_verify_execute(id, request.params))
            }
            other => Dispatch::Respond(RpcResponse::fail(
                id,
                CODE_METHOD_NOT_FOUND,
                format!("unknown method {other}"),
            )),
        }
    }

    /// Handles `status`.
    fn handle_status(&self, id: Value) -> RpcResponse {
        let project = self.config.project_path.to_string_lossy();
        let pending_count =
            self.store.list_pending_requests(&project).map(|pending| pending.len());
        let active_sessions =
            self.store.list_active_sessions(&project).map(|sessions| sessions.len());
        match (pending_count, active_sessions) {
            (Ok(pending_count), Ok(active_sessions)) => ok_json(
                id,
                &StatusResult {
                    uptime_seconds: self.started.elapsed().as_secs(),
                    pending_count,
                    active_sessions,
                    subscribers: self.subscribers.len(),
                },
            ),
            (Err(err), _) | (_, Err(err)) => {
                RpcResponse::fail(id, CODE_INTERNAL, err.to_string())
            }
        }
    }

    /// Handles `notify`: re-broadcast to subscribers.
    fn handle_notify(&self, id: Value, params: Option<Value>) -> RpcResponse {
        let params: NotifyParams = match parse_params(params) {
            Ok(params) => params,
            Err(message) => return RpcResponse::fail(id, CODE_INVALID_PARAMS, message),
        };
        let envelope =
            EventEnvelope::from_raw(params.event_type, params.payload, Timestamp::now());
        self.subscribers.broadcast(&envelope);
        RpcResponse::ok(id, json!({"sent": true}))
    }

    /// Handles `hook_query`: classify and consult recent approvals.
    fn handle_hook_query(&self, id: Value, params: Option<Value>) -> RpcResponse {
        let params: HookQueryParams = match parse_params(params) {
            Ok(params) => params,
            Err(message) => return RpcResponse::fail(id, CODE_INVALID_PARAMS, message),
        };
        let project = self.config.project_path.to_string_lossy().into_owned();
        let cwd = params.cwd.clone().unwrap_or_else(|| project.clone());
        let verdict = self.classifier.classify(&params.command, Some(&cwd));
        let session_id = SessionId::new(params.session_id.clone());
        let session = self.store.get_session(&session_id).ok().flatten();

        if let Some(session) = &session {
            if self.blocked_agents.iter().any(|blocked| *blocked == session.agent) {
                return hook_response(
                    id,
                    HookQueryResult {
                        action: HookAction::Block,
                        message: format!("agent {} is blocked by policy", session.agent),
                        tier: verdict.tier.map(|tier| tier.label().to_string()),
                        matched_pattern: verdict.matched_pattern,
                        min_approvals: verdict.min_approvals,
                        request_id: None,
                    },
                );
            }
        }

        if !verdict.needs_approval {
            let message = if verdict.is_safe {
                "command matched the safe tier".to_string()
            } else {
                "command requires no approval".to_string()
            };
            return hook_response(
                id,
                HookQueryResult {
                    action: HookAction::Allow,
                    message,
                    tier: verdict.tier.map(|tier| tier.label().to_string()),
                    matched_pattern: verdict.matched_pattern,
                    min_approvals: verdict.min_approvals,
                    request_id: None,
                },
            );
        }

        // A recent approved-or-executed request with the same redacted form
        // from the same session short-circuits a fresh approval round.
        let redacted =
            slb_core::CommandSpec::new(params.command.clone(), cwd, true).display_redacted;
        let since = Timestamp::now().sub_secs(self.config.preapproval_window_secs);
        let preapproved = self
            .store
            .find_recent_preapproved(&project, &session_id, &redacted, since)
            .ok()
            .flatten();
        if let Some(existing) = preapproved {
            return hook_response(
                id,
                HookQueryResult {
                    action: HookAction::Allow,
                    message: "matching request approved recently".to_string(),
                    tier: verdict.tier.map(|tier| tier.label().to_string()),
                    matched_pattern: verdict.matched_pattern,
                    min_approvals: verdict.min_approvals,
                    request_id: Some(existing.id.as_str().to_string()),
                },
            );
        }
        hook_response(
            id,
            HookQueryResult {
                action: HookAction::Ask,
                message: format!(
                    "command requires {} approval(s); create a request",
                    verdict.min_approvals
                ),
                tier: verdict.tier.map(|tier| tier.label().to_string()),
                matched_pattern: verdict.matched_pattern,
                min_approvals: verdict.min_approvals,
                request_id: None,
            },
        )
    }

    /// Handles `hook_health`.
    fn handle_hook_health(&self, id: Value) -> RpcResponse {
        let snapshot = self.classifier.snapshot();
        ok_json(
            id,
            &HookHealthResult {
                status: "ok".to_string(),
                uptime_seconds: self.started.elapsed().as_secs(),
                pattern_hash: manifest_sha256(&snapshot),
                pattern_count: snapshot.len(),
                server_time: Timestamp::now().as_unix_millis(),
            },
        )
    }

    /// Handles `verify_execute`: run the execution gates read-only.
    fn handle_verify_execute(&self, id: Value, params: Option<Value>) -> RpcResponse {
        let params: VerifyExecuteParams = match parse_params(params) {
            Ok(params) => params,
            Err(message) => return RpcResponse::fail(id, CODE_INVALID_PARAMS, message),
        };
        let session_id = SessionId::new(params.session_id);
        let session_ok = self
            .store
            .get_session(&session_id)
            .ok()
            .flatten()
            .is_some_and(|session| session.is_active());
        if !session_ok {
            return verify_response(
                id,
                VerifyExecuteResult {
                    allowed: false,
                    reason: Some("unknown or ended session".to_string()),
                    approval_remaining_seconds: 0,
                    request_id: None,
                    command: None,
                    command_hash: None,
                    risk_tier: None,
                },
            );
        }
        let request_id = RequestId::new(params.request_id);
        match verify_execution_allowed(
            self.store.as_dyn(),
            &self.classifier,
            &request_id,
            Timestamp::now(),
        ) {
            Ok(verified) => verify_response(
                id,
                VerifyExecuteResult {
                    allowed: true,
                    reason: None,
                    approval_remaining_seconds: verified.approval_remaining_secs,
                    request_id: Some(verified.request.id.as_str().to_string()),
                    command: Some(verified.request.command.display_redacted.clone()),
                    command_hash: Some(verified.request.command.hash.clone()),
                    risk_tier: Some(verified.request.tier.label().to_string()),
                },
            ),
            Err(VerifyError::Store(err)) => {
                RpcResponse::fail(id, CODE_INTERNAL, err.to_string())
            }
            Err(gate) => verify_response(
                id,
                VerifyExecuteResult {
                    allowed: false,
                    reason: Some(gate.to_string()),
                    approval_remaining_seconds: 0,
                    request_id: Some(request_id.as_str().to_string()),
                    command: None,
                    command_hash: None,
                    risk_tier: None,
                },
            ),
        }
    }
}

/// Outcome of dispatching one frame.
enum Dispatch {
    /// Write the response and continue.
    Respond(RpcResponse),
    /// Write the response, then interleave event frames.
    Subscribe {
        /// Response acknowledging the subscription.
        response: RpcResponse,
        /// Subscription id for deregistration on close.
        subscription_id: u64,
        /// Event stream for this connection.
        receiver: mpsc::Receiver<EventEnvelope>,
    },
}

// ============================================================================
// SECTION: Connection Loops
// ============================================================================

/// Serialized frames queued per connection before the writer backs up.
const OUTBOUND_BUFFER: usize = 64;

/// Serves one authenticated stream until EOF or shutdown.
///
/// Responses and subscribed event frames share one writer task so frames
/// never interleave mid-line; the read loop stays free of racing futures.
async fn serve_connection<S>(
    server: Arc<DaemonServer>,
    stream: S,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let (outbound, mut outbound_receiver) = mpsc::channel::<Vec<u8>>(OUTBOUND_BUFFER);
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_receiver.recv().await {
            if write_half.write_all(&frame).await.is_err() || write_half.flush().await.is_err() {
                break;
            }
        }
    });

    let mut reader = BufReader::new(read_half).take(MAX_LINE_BYTES);
    let mut line = String::new();
    let mut subscription_id: Option<u64> = None;
    loop {
        line.clear();
        let read = tokio::select! {
            read = reader.read_line(&mut line) => read,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };
        match read {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        reader.set_limit(MAX_LINE_BYTES);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let dispatch = match serde_json::from_str::<RpcRequest>(trimmed) {
            Ok(request) => server.dispatch(request),
            Err(err) => Dispatch::Respond(RpcResponse::fail(
                Value::Null,
                CODE_PARSE,
                format!("invalid frame: {err}"),
            )),
        };
        match dispatch {
            Dispatch::Respond(response) => {
                if send_frame(&outbound, &response).await.is_err() {
                    break;
                }
            }
            Dispatch::Subscribe {
                response,
                subscription_id: new_id,
                mut receiver,
            } => {
                if send_frame(&outbound, &response).await.is_err() {
                    server.subscribers.unsubscribe(new_id);
                    break;
                }
                if let Some(previous) = subscription_id.replace(new_id) {
                    server.subscribers.unsubscribe(previous);
                }
                // Events flow through the shared writer; the forwarder ends
                // when the table drops the subscriber or the writer closes.
                let forward_outbound = outbound.clone();
                tokio::spawn(async move {
                    while let Some(event) = receiver.recv().await {
                        if send_frame(&forward_outbound, &event).await.is_err() {
                            break;
                        }
                    }
                });
            }
        }
    }
    if let Some(id) = subscription_id {
        server.subscribers.unsubscribe(id);
    }
    drop(outbound);
    let _ = writer.await;
}

/// Serializes a frame and queues it on the connection writer.
async fn send_frame<T: serde::Serialize>(
    outbound: &mpsc::Sender<Vec<u8>>,
    frame: &T,
) -> Result<(), ()> {
    let mut payload = serde_json::to_vec(frame).map_err(|_| ())?;
    payload.push(b'\n');
    outbound.send(payload).await.map_err(|_| ())
}

/// Applies the allowlist and auth handshake, then serves the stream.
async fn serve_tcp_connection(
    server: Arc<DaemonServer>,
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    shutdown: watch::Receiver<bool>,
) {
    if !server.config.allowlist.allows(peer.ip()) {
        // Disallowed peers are closed without a reply.
        return;
    }
    let mut stream = stream;
    if server.config.tcp_require_auth {
        let handshake =
            tokio::time::timeout(HANDSHAKE_TIMEOUT, read_handshake_line(&mut stream)).await;
        let accepted = match handshake {
            Ok(Some(first_line)) => {
                parse_handshake(&first_line).is_some_and(|key| (server.auth)(&key))
            }
            _ => false,
        };
        if !accepted {
            // Rejected handshakes are closed without a reply.
            return;
        }
    }
    serve_connection(server, stream, shutdown).await;
}

/// Maximum accepted handshake line length.
const MAX_HANDSHAKE_BYTES: usize = 4_096;

/// Reads the handshake line byte-wise so no later frame bytes are buffered
/// away before the stream is handed to the connection loop.
async fn read_handshake_line(stream: &mut tokio::net::TcpStream) -> Option<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match stream.read_exact(&mut byte).await {
            Ok(_) if byte[0] == b'\n' => break,
            Ok(_) => {
                if line.len() >= MAX_HANDSHAKE_BYTES {
                    return None;
                }
                line.push(byte[0]);
            }
            Err(_) => return None,
        }
    }
    String::from_utf8(line).ok()
}

/// Extracts the session key from the `{"auth": "..."}` handshake line.
fn parse_handshake(line: &str) -> Option<String> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;
    value.get("auth")?.as_str().map(str::to_string)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Parses method params, reporting a message for invalid-params responses.
fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, String> {
    let params = params.unwrap_or(Value::Null);
    serde_json::from_value(params).map_err(|err| format!("invalid params: {err}"))
}

/// Serializes a result payload into a success response.
fn ok_json<T: serde::Serialize>(id: Value, result: &T) -> RpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => RpcResponse::ok(id, value),
        Err(_) => RpcResponse::fail(id, CODE_INTERNAL, "serialization failed"),
    }
}

/// Serializes a hook query result into a success response.
fn hook_response(id: Value, result: HookQueryResult) -> RpcResponse {
    ok_json(id, &result)
}

/// Serializes a verify result into a success response.
fn verify_response(id: Value, result: VerifyExecuteResult) -> RpcResponse {
    ok_json(id, &result)
}

/// Writes a one-line operational warning to stderr.
fn warn(message: &str) {
    let _ = writeln!(std::io::stderr(), "slb-daemon: WARNING: {message}");
}
