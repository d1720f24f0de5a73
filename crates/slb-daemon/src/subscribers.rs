// crates/slb-daemon/src/subscribers.rs
// ============================================================================
// Module: Subscriber Fan-Out
// Description: Bounded per-subscriber event channels with drop-on-full.
// Purpose: Deliver events best-effort without blocking the poster.
// Dependencies: tokio, crate::rpc
// ============================================================================

//! ## Overview
//! Each subscriber owns a bounded channel. Posting an event tries every
//! channel without blocking; a subscriber whose buffer is full or whose
//! connection closed is dropped from the table. Delivery is best-effort and
//! per-subscriber ordered; there is no total order across subscribers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;

use crate::rpc::EventEnvelope;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Events buffered per subscriber before it is dropped.
const SUBSCRIBER_BUFFER: usize = 64;

// ============================================================================
// SECTION: Subscriber Table
// ============================================================================

/// Registry of connected subscribers.
#[derive(Debug, Default)]
pub struct SubscriberTable {
    /// Per-subscriber senders keyed by subscription id.
    channels: Mutex<HashMap<u64, mpsc::Sender<EventEnvelope>>>,
    /// Next subscription id.
    next_id: AtomicU64,
}

impl SubscriberTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber and returns its id and event receiver.
    #[must_use]
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<EventEnvelope>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);
        if let Ok(mut channels) = self.channels.lock() {
            channels.insert(id, sender);
        }
        (id, receiver)
    }

    /// Removes a subscriber.
    pub fn unsubscribe(&self, id: u64) {
        if let Ok(mut channels) = self.channels.lock() {
            channels.remove(&id);
        }
    }

    /// Returns the number of connected subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.lock().map_or(0, |channels| channels.len())
    }

    /// Returns true when no subscribers are connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Posts an event to every subscriber, dropping slow or closed ones.
    pub fn broadcast(&self, event: &EventEnvelope) {
        if let Ok(mut channels) = self.channels.lock() {
            channels.retain(|_, sender| sender.try_send(event.clone()).is_ok());
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
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

    use serde_json::json;
    use slb_core::Timestamp;

    use super::SUBSCRIBER_BUFFER;
    use super::SubscriberTable;
    use crate::rpc::EventEnvelope;
    use crate::rpc::EventType;

    fn event() -> EventEnvelope {
        EventEnvelope::from_raw(
            EventType::RequestCreated,
            json!({"requestId": "r1"}),
            Timestamp::from_unix_millis(1_000),
        )
    }

    #[test]
    fn subscribers_receive_posted_events() {
        let table = SubscriberTable::new();
        let (id, mut receiver) = table.subscribe();
        assert!(id > 0);
        assert_eq!(table.len(), 1);
        table.broadcast(&event());
        let received = receiver.try_recv().expect("event delivered");
        assert_eq!(received.event.event_type, EventType::RequestCreated);
    }

    #[test]
    fn full_subscribers_are_dropped() {
        let table = SubscriberTable::new();
        let (_id, receiver) = table.subscribe();
        for _ in 0 .. SUBSCRIBER_BUFFER {
            table.broadcast(&event());
        }
        assert_eq!(table.len(), 1);
        // One more than the buffer drops the subscriber.
        table.broadcast(&event());
        assert_eq!(table.len(), 0);
        drop(receiver);
    }

    #[test]
    fn closed_subscribers_are_dropped_on_broadcast() {
        let table = SubscriberTable::new();
        let (_id, receiver) = table.subscribe();
        drop(receiver);
        table.broadcast(&event());
        assert!(table.is_empty());
    }

    #[test]
    fn unsubscribe_removes_the_channel() {
        let table = SubscriberTable::new();
        let (id, _receiver) = table.subscribe();
        table.unsubscribe(id);
        assert!(table.is_empty());
    }
}
