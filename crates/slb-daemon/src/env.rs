// crates/slb-daemon/src/env.rs
// ============================================================================
// Module: Client Environment
// Description: Environment variables consumed by agent CLIs and hooks.
// Purpose: Keep env var names and parsing consistent across clients.
// Dependencies: none
// ============================================================================

//! ## Overview
//! Agent CLIs prefer TCP when `SLB_HOST` is set (falling back to the unix
//! socket on failure), send `SLB_SESSION_KEY` in the TCP handshake, and
//! enable the in-process daemon when `SLB_DAEMON_MODE` is truthy.

// ============================================================================
// SECTION: Variable Names
// ============================================================================

/// TCP `host:port` clients prefer over the unix socket.
pub const SLB_HOST: &str = "SLB_HOST";
/// Bearer token sent in the TCP handshake.
pub const SLB_SESSION_KEY: &str = "SLB_SESSION_KEY";
/// Enables the in-process daemon for certain invocations.
pub const SLB_DAEMON_MODE: &str = "SLB_DAEMON_MODE";

// ============================================================================
// SECTION: Accessors
// ============================================================================

/// Returns the preferred TCP `host:port`, when configured.
#[must_use]
pub fn tcp_host() -> Option<String> {
    std::env::var(SLB_HOST).ok().filter(|value| !value.trim().is_empty())
}

/// Returns the handshake bearer token, when configured.
#[must_use]
pub fn session_key() -> Option<String> {
    std::env::var(SLB_SESSION_KEY).ok().filter(|value| !value.trim().is_empty())
}

/// Returns true when in-process daemon mode is enabled.
#[must_use]
pub fn daemon_mode_enabled() -> bool {
    std::env::var(SLB_DAEMON_MODE)
        .map(|value| {
            let value = value.trim().to_ascii_lowercase();
            value == "1" || value == "true"
        })
        .unwrap_or(false)
}
