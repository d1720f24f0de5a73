// crates/slb-daemon/tests/watcher.rs
// ============================================================================
// Module: Watcher Tests
// Description: Debounce coalescing and relevance filtering.
// Purpose: Verify bursts collapse to one event and noise is ignored.
// ============================================================================

//! Filesystem watcher coverage against a real temp directory.

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

use std::time::Duration;

use slb_daemon::DebouncedEvent;
use slb_daemon::FileOps;
use slb_daemon::StateWatcher;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::sync::watch;

async fn next_event(
    events: &mut mpsc::Receiver<DebouncedEvent>,
    within: Duration,
) -> Option<DebouncedEvent> {
    tokio::time::timeout(within, events.recv()).await.ok().flatten()
}

#[tokio::test]
async fn pending_file_writes_produce_one_coalesced_event() {
    let project = TempDir::new().expect("project dir");
    let (_shutdown_tx, shutdown) = watch::channel(false);
    let (_watcher, mut events) =
        StateWatcher::spawn(project.path(), shutdown).expect("watcher starts");

    let pending = project.path().join(".slb/pending/request-1.json");
    std::fs::write(&pending, b"{}").expect("first write");
    std::fs::write(&pending, b"{\"status\":\"pending\"}").expect("second write");

    let event = next_event(&mut events, Duration::from_secs(5))
        .await
        .expect("coalesced event arrives");
    assert_eq!(event.path, pending);
    assert!(event.ops.contains(FileOps::CREATE) || event.ops.contains(FileOps::WRITE));

    // Both writes landed inside one debounce window.
    assert!(next_event(&mut events, Duration::from_millis(300)).await.is_none());
}

#[tokio::test]
async fn state_db_siblings_other_than_wal_are_ignored() {
    let project = TempDir::new().expect("project dir");
    let (_shutdown_tx, shutdown) = watch::channel(false);
    let (_watcher, mut events) =
        StateWatcher::spawn(project.path(), shutdown).expect("watcher starts");

    let state_dir = project.path().join(".slb");
    std::fs::write(state_dir.join("scratch.tmp"), b"noise").expect("noise write");
    assert!(
        next_event(&mut events, Duration::from_millis(500)).await.is_none(),
        "irrelevant siblings must not emit"
    );

    std::fs::write(state_dir.join("state.db-wal"), b"wal bytes").expect("wal write");
    let event = next_event(&mut events, Duration::from_secs(5))
        .await
        .expect("wal sibling is relevant");
    assert_eq!(event.path, state_dir.join("state.db-wal"));
}

#[tokio::test]
async fn session_files_are_watched() {
    let project = TempDir::new().expect("project dir");
    let (_shutdown_tx, shutdown) = watch::channel(false);
    let (_watcher, mut events) =
        StateWatcher::spawn(project.path(), shutdown).expect("watcher starts");

    let session_file = project.path().join(".slb/sessions/alpha.json");
    std::fs::write(&session_file, b"{}").expect("session write");
    let event = next_event(&mut events, Duration::from_secs(5))
        .await
        .expect("session event arrives");
    assert_eq!(event.path, session_file);
    std::fs::remove_file(&session_file).expect("session remove");
    let event = next_event(&mut events, Duration::from_secs(5))
        .await
        .expect("removal event arrives");
    assert!(event.ops.contains(FileOps::REMOVE));
}
