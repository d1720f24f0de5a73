// crates/slb-daemon/src/rpc.rs
// ============================================================================
// Module: IPC Wire Protocol
// Description: Newline-delimited JSON-RPC envelopes and event frames.
// Purpose: Fix the wire contract shared by the daemon and agent CLIs.
// Dependencies: serde, serde_json, slb-core, slb-classifier
// ============================================================================

//! ## Overview
//! Every frame is one JSON object per line. Requests carry
//! `{method, params, id}`; responses `{result | error: {code, message}, id}`;
//! events pushed to subscribers use `{event: {type, time, payload}}` with no
//! id. Standard codes cover parse, params, method, and internal failures;
//! domain codes sit above `-32000` and are documented by their message text.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use slb_core::Request;
use slb_core::RequestStatus;
use slb_core::Timestamp;

// ============================================================================
// SECTION: Error Codes
// ============================================================================

/// Parse failure on an incoming frame.
pub const CODE_PARSE: i64 = -32700;
/// Parameters failed validation.
pub const CODE_INVALID_PARAMS: i64 = -32602;
/// Unknown method name.
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
/// Internal daemon failure.
pub const CODE_INTERNAL: i64 = -32603;
/// Authentication failure (domain code).
pub const CODE_AUTH: i64 = -31000;
/// Referenced record missing (domain code).
pub const CODE_NOT_FOUND: i64 = -31001;
/// Operation illegal in the record's current state (domain code).
pub const CODE_INVALID_STATE: i64 = -31002;

// ============================================================================
// SECTION: Envelopes
// ============================================================================

/// One request frame.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    /// Method name.
    pub method: String,
    /// Method parameters, absent for nullary methods.
    #[serde(default)]
    pub params: Option<Value>,
    /// Caller-chosen request identifier echoed in the response.
    #[serde(default)]
    pub id: Value,
}

/// Error payload inside a response frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

/// One response frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Successful result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload when the request failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// Request identifier echoed from the request.
    pub id: Value,
}

impl RpcResponse {
    /// Builds a success response.
    #[must_use]
    pub const fn ok(id: Value, result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Builds an error response.
    #[must_use]
    pub fn fail(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
            id,
        }
    }
}

// ============================================================================
// SECTION: Event Frames
// ============================================================================

/// Event types broadcast by the lifecycle and executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A request was created.
    RequestCreated,
    /// A request reached quorum.
    RequestApproved,
    /// A request was rejected.
    RequestRejected,
    /// A request finished executing.
    RequestExecuted,
    /// A request escalated for human attention.
    RequestEscalated,
    /// A request timed out.
    RequestTimeout,
}

/// Inner event body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBody {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Unix milliseconds when the event was posted.
    pub time: i64,
    /// Event payload.
    pub payload: Value,
}

/// One event frame pushed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// The event body.
    pub event: EventBody,
}

impl EventEnvelope {
    /// Builds an envelope for a lifecycle event on a request.
    #[must_use]
    pub fn for_request(event_type: EventType, request: &Request, at: Timestamp) -> Self {
        let mut payload = json!({
            "requestId": request.id.as_str(),
            "tier": request.tier.label(),
            "command": request.command.display_redacted,
            "requestor": request.requestor_agent,
        });
        if matches!(event_type, EventType::RequestExecuted) {
            if let Some(execution) = &request.execution {
                payload["exitCode"] = execution.exit_code.map_or(Value::Null, Value::from);
            }
        }
        Self {
            event: EventBody {
                event_type,
                time: at.as_unix_millis(),
                payload,
            },
        }
    }

    /// Builds an envelope from a raw type and payload (the `notify` method).
    #[must_use]
    pub fn from_raw(event_type: EventType, payload: Value, at: Timestamp) -> Self {
        Self {
            event: EventBody {
                event_type,
                time: at.as_unix_millis(),
                payload,
            },
        }
    }

    /// Maps a terminal status onto the event type broadcast for it.
    #[must_use]
    pub const fn type_for_status(status: RequestStatus) -> Option<EventType> {
        match status {
            RequestStatus::Approved => Some(EventType::RequestApproved),
            RequestStatus::Rejected => Some(EventType::RequestRejected),
            RequestStatus::Executed | RequestStatus::ExecutionFailed => {
                Some(EventType::RequestExecuted)
            }
            RequestStatus::Escalated => Some(EventType::RequestEscalated),
            RequestStatus::TimedOut => Some(EventType::RequestTimeout),
            RequestStatus::Pending | RequestStatus::Executing | RequestStatus::Cancelled => None,
        }
    }
}

// ============================================================================
// SECTION: Method Parameters and Results
// ============================================================================

/// Parameters for `hook_query`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookQueryParams {
    /// Raw command the pre-exec hook intercepted.
    pub command: String,
    /// Querying session identifier.
    pub session_id: String,
    /// Working directory of the command.
    #[serde(default)]
    pub cwd: Option<String>,
}

/// Action returned to a pre-exec hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookAction {
    /// Run the command without gating.
    Allow,
    /// Refuse the command outright.
    Block,
    /// Queue the command for review before running.
    Ask,
}

/// Result of `hook_query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookQueryResult {
    /// Action the hook should take.
    pub action: HookAction,
    /// Human-readable explanation.
    pub message: String,
    /// Tier label, absent for unmatched commands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    /// Pattern that determined the tier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_pattern: Option<String>,
    /// Approval quorum the tier requires.
    pub min_approvals: u32,
    /// Pre-approved request id, when a recent approval matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Parameters for `verify_execute`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyExecuteParams {
    /// Request to verify.
    pub request_id: String,
    /// Executing session identifier.
    pub session_id: String,
}

/// Result of `verify_execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyExecuteResult {
    /// True when every gate passed.
    pub allowed: bool,
    /// Refusal reason when a gate failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Seconds of approval validity remaining.
    pub approval_remaining_seconds: i64,
    /// Request identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Redacted command text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Sealed command hash.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_hash: Option<String>,
    /// Risk tier label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_tier: Option<String>,
}

/// Parameters for `notify`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyParams {
    /// Event type to re-broadcast.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Event payload forwarded verbatim.
    #[serde(default)]
    pub payload: Value,
}

/// Result of `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResult {
    /// Seconds since the daemon started.
    pub uptime_seconds: u64,
    /// Pending requests in the project.
    pub pending_count: usize,
    /// Active sessions in the project.
    pub active_sessions: usize,
    /// Connected subscribers.
    pub subscribers: usize,
}

/// Result of `hook_health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookHealthResult {
    /// Fixed health marker.
    pub status: String,
    /// Seconds since the daemon started.
    pub uptime_seconds: u64,
    /// Manifest hash of the loaded pattern taxonomy.
    pub pattern_hash: String,
    /// Number of loaded patterns.
    pub pattern_count: usize,
    /// Daemon wall-clock time in unix milliseconds.
    pub server_time: i64,
}
