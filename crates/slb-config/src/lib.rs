// crates/slb-config/src/lib.rs
// ============================================================================
// Module: Notary Configuration Library
// Description: Validated configuration value object for the notary.
// Purpose: Expose config types, parsing, and fail-closed validation.
// Dependencies: crate::config
// ============================================================================

//! ## Overview
//! Configuration is parsed from TOML into a strict value object and
//! validated before the core starts. File discovery and precedence
//! (defaults, user file, project file, environment, flags) belong to the
//! hosting CLI; this crate owns the contract the core consumes.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::AgentsConfig;
pub use config::ConfigError;
pub use config::DaemonConfig;
pub use config::GeneralConfig;
pub use config::NotificationsConfig;
pub use config::RateLimitActionConfig;
pub use config::RateLimitsConfig;
pub use config::SlbConfig;
pub use config::TierPatternConfig;
pub use config::TimeoutActionConfig;
