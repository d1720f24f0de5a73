// crates/slb-daemon/src/watcher.rs
// ============================================================================
// Module: State File Watcher
// Description: Debounced filesystem watching over the project state files.
// Purpose: Coalesce bursts of writes into one notification per path.
// Dependencies: notify, tokio, crate::paths
// ============================================================================

//! ## Overview
//! The watcher monitors the state directory, the pending directory, and the
//! sessions directory. Raw events are debounced per path with a 100 ms
//! window: within the window, operation kinds are OR-ed together and one
//! event is emitted at window close. Consumers must re-read the store; a
//! coalesced event says only that something changed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::watch;

use crate::paths::STATE_DB_NAME;
use crate::paths::watched_dirs;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Debounce window per path.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);
/// Flush scan interval.
const FLUSH_TICK: Duration = Duration::from_millis(25);
/// Buffered debounced events before the consumer must drain.
const EVENT_BUFFER: usize = 256;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while starting the watcher.
#[derive(Debug, Error)]
pub enum WatcherError {
    /// Watch registration failed.
    #[error("watcher setup failed: {0}")]
    Setup(String),
    /// Watched directory could not be created.
    #[error("watcher io error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Operation Kinds
// ============================================================================

/// OR-able operation kinds observed within one debounce window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileOps(u8);

impl FileOps {
    /// A file or directory was created.
    pub const CREATE: Self = Self(0b0001);
    /// File contents were written.
    pub const WRITE: Self = Self(0b0010);
    /// A file or directory was removed.
    pub const REMOVE: Self = Self(0b0100);
    /// A file or directory was renamed.
    pub const RENAME: Self = Self(0b1000);

    /// Returns the union of two kind sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns true when every kind in `other` is present.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true when no kind is present.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Maps a raw notify event kind onto the OR-able set.
fn ops_for_kind(kind: &notify::EventKind) -> FileOps {
    use notify::EventKind;
    use notify::event::ModifyKind;
    match kind {
        EventKind::Create(_) => FileOps::CREATE,
        EventKind::Modify(ModifyKind::Name(_)) => FileOps::RENAME,
        EventKind::Modify(_) => FileOps::WRITE,
        EventKind::Remove(_) => FileOps::REMOVE,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => FileOps::default(),
    }
}

// ============================================================================
// SECTION: Debounced Events
// ============================================================================

/// One coalesced notification for a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebouncedEvent {
    /// Path the operations applied to.
    pub path: PathBuf,
    /// Union of operation kinds seen in the window.
    pub ops: FileOps,
}

// ============================================================================
// SECTION: Watcher
// ============================================================================

/// Debounced watcher over the project state directories.
pub struct StateWatcher {
    /// Underlying filesystem watcher; kept alive for its registrations.
    _watcher: RecommendedWatcher,
}

impl StateWatcher {
    /// Starts watching the project state directories.
    ///
    /// Returns the watcher handle and the debounced event stream. The
    /// debounce task exits when `shutdown` flips to true or the consumer
    /// drops the receiver.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError`] when the directories cannot be created or
    /// registered.
    pub fn spawn(
        project_path: &Path,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(Self, mpsc::Receiver<DebouncedEvent>), WatcherError> {
        let roots = watched_dirs(project_path);
        for root in &roots {
            std::fs::create_dir_all(root).map_err(|err| WatcherError::Io(err.to_string()))?;
        }
        let (raw_sender, mut raw_receiver) = mpsc::unbounded_channel::<notify::Event>();
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<notify::Event, notify::Error>| {
                if let Ok(event) = result {
                    let _ = raw_sender.send(event);
                }
            },
            notify::Config::default(),
        )
        .map_err(|err| WatcherError::Setup(err.to_string()))?;
        for root in &roots {
            watcher
                .watch(root, RecursiveMode::NonRecursive)
                .map_err(|err| WatcherError::Setup(err.to_string()))?;
        }

        let (event_sender, event_receiver) = mpsc::channel(EVENT_BUFFER);
        let relevance_roots = roots.clone();
        tokio::spawn(async move {
            let mut pending: HashMap<PathBuf, (FileOps, Instant)> = HashMap::new();
            let mut tick = tokio::time::interval(FLUSH_TICK);
            loop {
                tokio::select! {
                    raw = raw_receiver.recv() => {
                        let Some(raw) = raw else { break };
                        let ops = ops_for_kind(&raw.kind);
                        if ops.is_empty() {
                            continue;
                        }
                        for path in raw.paths {
                            if !is_relevant(&relevance_roots, &path) {
                                continue;
                            }
                            let entry = pending
                                .entry(path)
                                .or_insert((FileOps::default(), Instant::now()));
                            entry.0 = entry.0.union(ops);
                        }
                    }
                    _ = tick.tick() => {
                        let due: Vec<PathBuf> = pending
                            .iter()
                            .filter(|(_, (_, first))| first.elapsed() >= DEBOUNCE_WINDOW)
                            .map(|(path, _)| path.clone())
                            .collect();
                        for path in due {
                            if let Some((ops, _)) = pending.remove(&path) {
                                let event = DebouncedEvent { path, ops };
                                if event_sender.send(event).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        Ok((
            Self {
                _watcher: watcher,
            },
            event_receiver,
        ))
    }
}

/// Returns true when a path is one the watcher reports.
///
/// Inside the state root only the database and its write-ahead and
/// shared-memory files are relevant; the pending and sessions directories
/// report every direct child.
fn is_relevant(roots: &[PathBuf; 3], path: &Path) -> bool {
    let [state_root, pending_root, sessions_root] = roots;
    if path == state_root || path == pending_root || path == sessions_root {
        return true;
    }
    match path.parent() {
        Some(parent) if parent == pending_root || parent == sessions_root => true,
        Some(parent) if parent == state_root => path.file_name().is_some_and(|name| {
            let name = name.to_string_lossy();
            name == STATE_DB_NAME
                || name == format!("{STATE_DB_NAME}-wal")
                || name == format!("{STATE_DB_NAME}-shm")
        }),
        _ => false,
    }
}
