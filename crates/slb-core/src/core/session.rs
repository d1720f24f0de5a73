// crates/slb-core/src/core/session.rs
// ============================================================================
// Module: Agent Sessions
// Description: Live agent attachments to a project working tree.
// Purpose: Identify requestors and reviewers and carry their bearer keys.
// Dependencies: serde, crate::core::{identifiers, time}
// ============================================================================

//! ## Overview
//! A session records one agent attached to one project. The store enforces
//! at most one active session per (agent name, project path); heartbeats
//! refresh `last_active_at` and the stale-session sweep ends sessions whose
//! heartbeat lapsed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::SessionId;
use crate::core::identifiers::SessionKey;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Session
// ============================================================================

/// One live agent attachment to a project.
///
/// # Invariants
/// - At most one active session (`ended_at` unset) exists per
///   (`agent`, `project_path`); the store enforces this.
/// - `session_key` authenticates every operation the session performs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: SessionId,
    /// Agent display name.
    pub agent: String,
    /// Program identifier (which tool the agent runs under).
    pub program: String,
    /// Model identifier used for the different-model rule.
    pub model: String,
    /// Absolute project path the session is attached to.
    pub project_path: String,
    /// Bearer key proving session ownership.
    pub session_key: SessionKey,
    /// When the session started.
    pub started_at: Timestamp,
    /// Last successful heartbeat.
    pub last_active_at: Timestamp,
    /// When the session ended, unset while active.
    pub ended_at: Option<Timestamp>,
    /// When an upstream rate limit resets, when known.
    pub rate_limit_reset_at: Option<Timestamp>,
}

impl Session {
    /// Returns true while the session has not ended.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Returns true when the last heartbeat is older than the threshold.
    #[must_use]
    pub fn is_stale(&self, now: Timestamp, threshold_secs: u64) -> bool {
        self.is_active() && self.last_active_at < now.sub_secs(threshold_secs)
    }
}
