// crates/slb-config/src/config.rs
// ============================================================================
// Module: Notary Configuration
// Description: Configuration parsing and validation for the notary core.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: slb-classifier, slb-core, serde, toml
// ============================================================================

//! ## Overview
//! The configuration value object mirrors the contract the core consumes:
//! approval floors, timeouts, TTLs, transports, rate limits, per-tier
//! pattern overrides, and agent trust policy. Unknown fields are rejected
//! and invalid values fail closed with field-naming errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::net::SocketAddr;

use serde::Deserialize;
use slb_classifier::RiskTier;
use slb_core::LifecyclePolicy;
use slb_core::RateLimitAction;
use slb_core::TierPolicy;
use slb_core::TimeoutAction;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum configuration document size in bytes.
pub const MAX_CONFIG_SIZE: usize = 256 * 1024;
/// Maximum entries in the TCP allowlist.
const MAX_ALLOWED_IPS: usize = 64;
/// Maximum entries in agent lists.
const MAX_AGENT_ENTRIES: usize = 64;
/// Maximum user-supplied patterns per tier.
const MAX_TIER_PATTERNS: usize = 256;
/// Maximum CIDR prefix length for IPv4.
const MAX_IPV4_PREFIX: u8 = 32;
/// Maximum CIDR prefix length for IPv6.
const MAX_IPV6_PREFIX: u8 = 128;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration parse and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Document failed TOML parsing.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Document exceeded the size limit.
    #[error("config document too large: {0} bytes (max {MAX_CONFIG_SIZE})")]
    TooLarge(usize),
    /// A field failed validation.
    #[error("config field {field}: {message}")]
    Invalid {
        /// Dotted field path.
        field: &'static str,
        /// Why the value was rejected.
        message: String,
    },
}

/// Builds a field validation error.
fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// Timeout sweeper behavior names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutActionConfig {
    /// Escalate expired requests for human attention.
    #[default]
    Escalate,
    /// Treat expiry as a terminal rejection.
    AutoReject,
    /// Approve with a warning; refused for high tiers.
    AutoApproveWarn,
}

impl From<TimeoutActionConfig> for TimeoutAction {
    fn from(value: TimeoutActionConfig) -> Self {
        match value {
            TimeoutActionConfig::Escalate => Self::Escalate,
            TimeoutActionConfig::AutoReject => Self::AutoReject,
            TimeoutActionConfig::AutoApproveWarn => Self::AutoApproveWarn,
        }
    }
}

/// Rate limit behavior names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitActionConfig {
    /// Reject over-limit requests.
    #[default]
    Block,
    /// Admit over-limit requests; the host surfaces a warning.
    Warn,
}

impl From<RateLimitActionConfig> for RateLimitAction {
    fn from(value: RateLimitActionConfig) -> Self {
        match value {
            RateLimitActionConfig::Block => Self::Block,
            RateLimitActionConfig::Warn => Self::Warn,
        }
    }
}

/// General approval policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GeneralConfig {
    /// Quorum floor applied regardless of tier.
    pub min_approvals: u32,
    /// Default different-model requirement for new requests.
    pub require_different_model: bool,
    /// Grace before different-model escalation, in seconds.
    pub different_model_timeout_secs: u64,
    /// Pending review window in seconds.
    pub request_timeout_secs: u64,
    /// Approval validity in minutes for non-critical tiers.
    pub approval_ttl_mins: u64,
    /// Approval validity in minutes for the critical tier.
    pub approval_ttl_critical_mins: u64,
    /// Sweeper behavior for expired pending requests.
    pub timeout_action: TimeoutActionConfig,
    /// Whether executors capture rollback state before running.
    pub enable_rollback_capture: bool,
    /// Rollback capture budget in megabytes.
    pub max_rollback_size_mb: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            min_approvals: 1,
            require_different_model: false,
            different_model_timeout_secs: 300,
            request_timeout_secs: 1800,
            approval_ttl_mins: 15,
            approval_ttl_critical_mins: 5,
            timeout_action: TimeoutActionConfig::default(),
            enable_rollback_capture: true,
            max_rollback_size_mb: 100,
        }
    }
}

/// Daemon transport configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DaemonConfig {
    /// Unix socket path override; derived from the project when unset.
    pub ipc_socket: Option<String>,
    /// Optional TCP bind address (`host:port`).
    pub tcp_addr: Option<String>,
    /// Whether TCP connections must complete the auth handshake.
    pub tcp_require_auth: bool,
    /// CIDR blocks or bare IPs allowed over TCP; empty allows all.
    pub tcp_allowed_ips: Vec<String>,
    /// PID file path override; derived from the user when unset.
    pub pid_file: Option<String>,
    /// Timeout sweeper interval in seconds.
    pub check_interval_secs: Option<u64>,
}

/// Admission rate limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RateLimitsConfig {
    /// Maximum pending requests per session, zero for unlimited.
    pub max_pending_per_session: u32,
    /// Maximum requests per minute per session, zero for unlimited.
    pub max_requests_per_minute: u32,
    /// Behavior when a limit is hit.
    pub rate_limit_action: RateLimitActionConfig,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            max_pending_per_session: 10,
            max_requests_per_minute: 30,
            rate_limit_action: RateLimitActionConfig::default(),
        }
    }
}

/// Desktop notification policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct NotificationsConfig {
    /// Whether desktop notifications fire at all.
    pub desktop_enabled: bool,
    /// Age a critical pending request reaches before notifying, seconds.
    pub desktop_delay_secs: u64,
    /// Hook pre-approval lookback window in seconds.
    pub preapproval_window_secs: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            desktop_enabled: true,
            desktop_delay_secs: 30,
            preapproval_window_secs: 3600,
        }
    }
}

/// Per-tier classifier and quorum overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TierPatternConfig {
    /// Quorum override for the tier.
    pub min_approvals: Option<u32>,
    /// Whether the quorum floor scales with active sessions.
    pub dynamic_quorum: bool,
    /// Quorum applied when enough sessions are active.
    pub dynamic_quorum_floor: u32,
    /// Delay before trusted self-approval applies at this tier.
    pub auto_approve_delay_seconds: Option<u64>,
    /// Additional regex patterns for the tier.
    pub patterns: Vec<String>,
}

/// Agent trust policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AgentsConfig {
    /// Agents allowed delayed self-approval below the critical tier.
    pub trusted_self_approve: Vec<String>,
    /// Delay before trusted self-approval applies, in seconds.
    pub trusted_self_approve_delay_secs: u64,
    /// Agents that may not create requests.
    pub blocked: Vec<String>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            trusted_self_approve: Vec::new(),
            trusted_self_approve_delay_secs: 60,
            blocked: Vec::new(),
        }
    }
}

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Validated notary configuration value object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SlbConfig {
    /// General approval policy.
    pub general: GeneralConfig,
    /// Daemon transport settings.
    pub daemon: DaemonConfig,
    /// Admission rate limits.
    pub rate_limits: RateLimitsConfig,
    /// Desktop notification policy.
    pub notifications: NotificationsConfig,
    /// Per-tier overrides keyed by tier name.
    pub patterns: BTreeMap<String, TierPatternConfig>,
    /// Agent trust policy.
    pub agents: AgentsConfig,
}

impl SlbConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for oversized documents, parse failures,
    /// and any field that fails validation.
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        if document.len() > MAX_CONFIG_SIZE {
            return Err(ConfigError::TooLarge(document.len()));
        }
        let config: Self =
            toml::from_str(document).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section, failing closed on the first violation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.general.min_approvals < 1 {
            return Err(invalid("general.min_approvals", "must be at least 1"));
        }
        if self.general.request_timeout_secs == 0 {
            return Err(invalid("general.request_timeout_secs", "must be greater than zero"));
        }
        if self.general.approval_ttl_mins == 0 {
            return Err(invalid("general.approval_ttl_mins", "must be greater than zero"));
        }
        if self.general.approval_ttl_critical_mins == 0 {
            return Err(invalid(
                "general.approval_ttl_critical_mins",
                "must be greater than zero",
            ));
        }
        if let Some(addr) = &self.daemon.tcp_addr {
            addr.parse::<SocketAddr>().map_err(|_| {
                invalid("daemon.tcp_addr", format!("{addr} is not a host:port address"))
            })?;
        }
        if self.daemon.tcp_allowed_ips.len() > MAX_ALLOWED_IPS {
            return Err(invalid(
                "daemon.tcp_allowed_ips",
                format!("at most {MAX_ALLOWED_IPS} entries"),
            ));
        }
        for entry in &self.daemon.tcp_allowed_ips {
            validate_allowlist_entry(entry)?;
        }
        if let Some(interval) = self.daemon.check_interval_secs {
            if interval == 0 {
                return Err(invalid("daemon.check_interval_secs", "must be greater than zero"));
            }
        }
        for (tier_name, tier_config) in &self.patterns {
            if RiskTier::parse(tier_name).is_none() {
                return Err(invalid("patterns", format!("unknown tier {tier_name}")));
            }
            if tier_config.patterns.len() > MAX_TIER_PATTERNS {
                return Err(invalid(
                    "patterns",
                    format!("tier {tier_name} has more than {MAX_TIER_PATTERNS} patterns"),
                ));
            }
            if let Some(quorum) = tier_config.min_approvals {
                if quorum < 1 {
                    return Err(invalid(
                        "patterns",
                        format!("tier {tier_name} min_approvals must be at least 1"),
                    ));
                }
            }
            if tier_config.dynamic_quorum && tier_config.dynamic_quorum_floor < 1 {
                return Err(invalid(
                    "patterns",
                    format!("tier {tier_name} dynamic_quorum_floor must be at least 1"),
                ));
            }
        }
        if self.agents.trusted_self_approve.len() > MAX_AGENT_ENTRIES {
            return Err(invalid(
                "agents.trusted_self_approve",
                format!("at most {MAX_AGENT_ENTRIES} entries"),
            ));
        }
        if self.agents.blocked.len() > MAX_AGENT_ENTRIES {
            return Err(invalid("agents.blocked", format!("at most {MAX_AGENT_ENTRIES} entries")));
        }
        for agent in self.agents.trusted_self_approve.iter().chain(&self.agents.blocked) {
            if agent.trim().is_empty() {
                return Err(invalid("agents", "agent names must not be empty"));
            }
        }
        Ok(())
    }

    /// Builds the lifecycle policy the core consumes.
    #[must_use]
    pub fn lifecycle_policy(&self) -> LifecyclePolicy {
        let tier_overrides: BTreeMap<RiskTier, TierPolicy> = self
            .patterns
            .iter()
            .filter_map(|(name, tier_config)| {
                RiskTier::parse(name).map(|tier| {
                    (
                        tier,
                        TierPolicy {
                            min_approvals: tier_config.min_approvals,
                            dynamic_quorum: tier_config.dynamic_quorum,
                            dynamic_quorum_floor: tier_config.dynamic_quorum_floor,
                            auto_approve_delay_secs: tier_config.auto_approve_delay_seconds,
                        },
                    )
                })
            })
            .collect();
        LifecyclePolicy {
            min_approvals: self.general.min_approvals,
            require_different_model: self.general.require_different_model,
            different_model_timeout_secs: self.general.different_model_timeout_secs,
            request_timeout_secs: self.general.request_timeout_secs,
            approval_ttl_mins: self.general.approval_ttl_mins,
            approval_ttl_critical_mins: self.general.approval_ttl_critical_mins,
            timeout_action: self.general.timeout_action.into(),
            max_pending_per_session: self.rate_limits.max_pending_per_session,
            max_requests_per_minute: self.rate_limits.max_requests_per_minute,
            rate_limit_action: self.rate_limits.rate_limit_action.into(),
            trusted_self_approve: self.agents.trusted_self_approve.clone(),
            trusted_self_approve_delay_secs: self.agents.trusted_self_approve_delay_secs,
            blocked_agents: self.agents.blocked.clone(),
            tier_overrides,
        }
    }

    /// Returns the rollback budget in bytes.
    #[must_use]
    pub const fn max_rollback_size_bytes(&self) -> u64 {
        self.general.max_rollback_size_mb.saturating_mul(1024 * 1024)
    }

    /// Returns the sweeper interval in seconds.
    #[must_use]
    pub fn check_interval_secs(&self) -> u64 {
        self.daemon.check_interval_secs.unwrap_or(10)
    }
}

// ============================================================================
// SECTION: Allowlist Validation
// ============================================================================

/// Validates one allowlist entry as a bare IP or CIDR block.
fn validate_allowlist_entry(entry: &str) -> Result<(), ConfigError> {
    let field = "daemon.tcp_allowed_ips";
    if let Some((address, prefix)) = entry.split_once('/') {
        let address: IpAddr = address
            .parse()
            .map_err(|_| invalid(field, format!("{entry} has an invalid address")))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| invalid(field, format!("{entry} has an invalid prefix")))?;
        let max = if address.is_ipv4() { MAX_IPV4_PREFIX } else { MAX_IPV6_PREFIX };
        if prefix > max {
            return Err(invalid(field, format!("{entry} prefix exceeds {max}")));
        }
        return Ok(());
    }
    entry
        .parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| invalid(field, format!("{entry} is not an ip or cidr block")))
}
