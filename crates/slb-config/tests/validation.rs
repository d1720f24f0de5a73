// crates/slb-config/tests/validation.rs
// ============================================================================
// Module: Configuration Validation Tests
// Description: Parse and fail-closed validation coverage.
// Purpose: Verify defaults, field checks, and the lifecycle policy mapping.
// ============================================================================

//! Validation coverage for the notary configuration contract.

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

use slb_classifier::RiskTier;
use slb_config::ConfigError;
use slb_config::SlbConfig;
use slb_core::RateLimitAction;
use slb_core::TimeoutAction;

#[test]
fn empty_document_yields_valid_defaults() {
    let config = SlbConfig::from_toml_str("").expect("defaults parse");
    assert_eq!(config.general.min_approvals, 1);
    assert_eq!(config.general.request_timeout_secs, 1800);
    assert!(config.general.enable_rollback_capture);
    assert_eq!(config.check_interval_secs(), 10);
    assert_eq!(config.notifications.preapproval_window_secs, 3600);
    config.validate().expect("defaults validate");
}

#[test]
fn unknown_fields_are_rejected() {
    let err = SlbConfig::from_toml_str("[general]\nfrobnicate = true\n")
        .expect_err("unknown field rejected");
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn zero_min_approvals_fails_closed() {
    let err = SlbConfig::from_toml_str("[general]\nmin_approvals = 0\n")
        .expect_err("zero floor rejected");
    assert!(matches!(
        err,
        ConfigError::Invalid {
            field: "general.min_approvals",
            ..
        }
    ));
}

#[test]
fn zero_timeouts_fail_closed() {
    for (field, document) in [
        ("general.request_timeout_secs", "[general]\nrequest_timeout_secs = 0\n"),
        ("general.approval_ttl_mins", "[general]\napproval_ttl_mins = 0\n"),
        (
            "general.approval_ttl_critical_mins",
            "[general]\napproval_ttl_critical_mins = 0\n",
        ),
    ] {
        let err = SlbConfig::from_toml_str(document).expect_err("zero value rejected");
        match err {
            ConfigError::Invalid {
                field: found,
                ..
            } => assert_eq!(found, field),
            other => panic!("unexpected error {other}"),
        }
    }
}

#[test]
fn unknown_timeout_action_is_a_parse_error() {
    let err = SlbConfig::from_toml_str("[general]\ntimeout_action = \"shrug\"\n")
        .expect_err("unknown action rejected");
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn tcp_addr_must_be_host_port() {
    let err = SlbConfig::from_toml_str("[daemon]\ntcp_addr = \"not-an-addr\"\n")
        .expect_err("bad address rejected");
    assert!(matches!(
        err,
        ConfigError::Invalid {
            field: "daemon.tcp_addr",
            ..
        }
    ));
    SlbConfig::from_toml_str("[daemon]\ntcp_addr = \"127.0.0.1:8787\"\n")
        .expect("valid address accepted");
}

#[test]
fn allowlist_entries_are_validated() {
    SlbConfig::from_toml_str(
        "[daemon]\ntcp_allowed_ips = [\"10.0.0.0/8\", \"192.168.1.7\", \"::1\"]\n",
    )
    .expect("valid entries accepted");
    for entry in ["10.0.0.0/64", "300.1.1.1", "corp-network"] {
        let document = format!("[daemon]\ntcp_allowed_ips = [\"{entry}\"]\n");
        let err = SlbConfig::from_toml_str(&document).expect_err("bad entry rejected");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "daemon.tcp_allowed_ips",
                ..
            }
        ));
    }
}

#[test]
fn unknown_pattern_tier_fails_closed() {
    let err = SlbConfig::from_toml_str("[patterns.apocalyptic]\nmin_approvals = 3\n")
        .expect_err("unknown tier rejected");
    assert!(matches!(
        err,
        ConfigError::Invalid {
            field: "patterns",
            ..
        }
    ));
}

#[test]
fn oversized_documents_are_rejected() {
    let document = format!("# {}\n", "x".repeat(300 * 1024));
    let err = SlbConfig::from_toml_str(&document).expect_err("oversized rejected");
    assert!(matches!(err, ConfigError::TooLarge(_)));
}

#[test]
fn lifecycle_policy_maps_every_section() {
    let document = r#"
[general]
min_approvals = 2
require_different_model = true
different_model_timeout_secs = 90
request_timeout_secs = 600
approval_ttl_mins = 20
approval_ttl_critical_mins = 4
timeout_action = "auto_reject"

[rate_limits]
max_pending_per_session = 3
max_requests_per_minute = 12
rate_limit_action = "warn"

[patterns.critical]
min_approvals = 3
dynamic_quorum = true
dynamic_quorum_floor = 3

[agents]
trusted_self_approve = ["alpha"]
trusted_self_approve_delay_secs = 45
blocked = ["mallory"]
"#;
    let config = SlbConfig::from_toml_str(document).expect("document parses");
    let policy = config.lifecycle_policy();
    assert_eq!(policy.min_approvals, 2);
    assert!(policy.require_different_model);
    assert_eq!(policy.different_model_timeout_secs, 90);
    assert_eq!(policy.request_timeout_secs, 600);
    assert_eq!(policy.approval_ttl_mins(RiskTier::Dangerous), 20);
    assert_eq!(policy.approval_ttl_mins(RiskTier::Critical), 4);
    assert_eq!(policy.timeout_action, TimeoutAction::AutoReject);
    assert_eq!(policy.max_pending_per_session, 3);
    assert_eq!(policy.max_requests_per_minute, 12);
    assert_eq!(policy.rate_limit_action, RateLimitAction::Warn);
    assert_eq!(policy.trusted_self_approve, vec!["alpha".to_string()]);
    assert_eq!(policy.trusted_self_approve_delay_secs, 45);
    assert_eq!(policy.blocked_agents, vec!["mallory".to_string()]);
    let critical = policy.tier_overrides.get(&RiskTier::Critical).expect("override present");
    assert_eq!(critical.min_approvals, Some(3));
    assert!(critical.dynamic_quorum);
    assert_eq!(critical.dynamic_quorum_floor, 3);
}

#[test]
fn rollback_budget_converts_to_bytes() {
    let config = SlbConfig::from_toml_str("[general]\nmax_rollback_size_mb = 2\n")
        .expect("document parses");
    assert_eq!(config.max_rollback_size_bytes(), 2 * 1024 * 1024);
}
