// crates/slb-daemon/src/debounce.rs
// ============================================================================
// Module: Notification Debouncer
// Description: At-most-once desktop notification keys with bounded memory.
// Purpose: Keep critical-pending alerts from repeating every sweep.
// Dependencies: slb-core
// ============================================================================

//! ## Overview
//! The debouncer remembers which notification keys have fired. A key fires
//! at most once while remembered; the memory is a bounded LRU with an age
//! cap so a long-lived daemon with many critical requests cannot grow it
//! without bound.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use slb_core::RequestId;
use slb_core::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum remembered notification keys.
const MAX_KEYS: usize = 4_096;
/// Remembered keys older than this are evicted.
const KEY_AGE_CAP_SECS: u64 = 24 * 60 * 60;

// ============================================================================
// SECTION: Desktop Notifier
// ============================================================================

/// Pluggable desktop notification function (title, body).
///
/// Platform-specific invocation lives with the hosting integration; the
/// daemon only decides when to fire.
pub type DesktopNotifier = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Returns a notifier that discards every notification.
#[must_use]
pub fn noop_desktop_notifier() -> DesktopNotifier {
    Arc::new(|_title, _body| {})
}

// ============================================================================
// SECTION: Debouncer
// ============================================================================

/// At-most-once notification keyset with bounded memory.
#[derive(Debug, Default)]
pub struct NotificationDebouncer {
    /// Fired keys and when they fired.
    fired: Mutex<HashMap<String, Timestamp>>,
}

impl NotificationDebouncer {
    /// Creates an empty debouncer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the debounce key for a critical pending request.
    #[must_use]
    pub fn critical_pending_key(request_id: &RequestId) -> String {
        format!("critical_pending:{request_id}")
    }

    /// Returns true exactly once per remembered key.
    ///
    /// Eviction runs opportunistically: keys past the age cap are dropped,
    /// and when the table is full the oldest key makes room.
    pub fn should_fire(&self, key: &str, now: Timestamp) -> bool {
        let Ok(mut fired) = self.fired.lock() else {
            return false;
        };
        let cutoff = now.sub_secs(KEY_AGE_CAP_SECS);
        fired.retain(|_, at| *at >= cutoff);
        if fired.contains_key(key) {
            return false;
        }
        if fired.len() >= MAX_KEYS {
            if let Some(oldest) =
                fired.iter().min_by_key(|(_, at)| **at).map(|(key, _)| key.clone())
            {
                fired.remove(&oldest);
            }
        }
        fired.insert(key.to_string(), now);
        true
    }

    /// Returns the number of remembered keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fired.lock().map_or(0, |fired| fired.len())
    }

    /// Returns true when no keys are remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
