// crates/slb-core/src/core/time.rs
// ============================================================================
// Module: Notary Time Model
// Description: Unix-millisecond timestamps for notary records.
// Purpose: Provide explicit, comparable time values across the data model.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! All persisted times are unix milliseconds. Engines take timestamps as
//! explicit arguments so tests control the clock; [`Timestamp::now`] exists
//! for the daemon and CLI boundary only.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Unix-millisecond timestamp.
///
/// # Invariants
/// - Serializes transparently as a signed integer.
/// - Arithmetic saturates instead of wrapping.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the current wall-clock time.
    ///
    /// Engines should accept timestamps from callers; this constructor is
    /// for the daemon and CLI boundary.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX));
        Self(millis)
    }

    /// Returns the timestamp as unix milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Returns the timestamp as unix seconds, truncating.
    #[must_use]
    pub const fn as_unix_secs(self) -> i64 {
        self.0.div_euclid(1000)
    }

    /// Adds whole seconds, saturating.
    #[must_use]
    pub fn add_secs(self, secs: u64) -> Self {
        let millis = i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000);
        Self(self.0.saturating_add(millis))
    }

    /// Subtracts whole seconds, saturating.
    #[must_use]
    pub fn sub_secs(self, secs: u64) -> Self {
        let millis = i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000);
        Self(self.0.saturating_sub(millis))
    }

    /// Adds whole minutes, saturating.
    #[must_use]
    pub fn add_mins(self, mins: u64) -> Self {
        self.add_secs(mins.saturating_mul(60))
    }

    /// Returns whole seconds from `self` until `other`, negative when past.
    #[must_use]
    pub const fn secs_until(self, other: Self) -> i64 {
        other.0.saturating_sub(self.0).div_euclid(1000)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
