// crates/slb-daemon/src/paths.rs
// ============================================================================
// Module: Daemon Paths
// Description: Project-derived socket, PID, and state directory paths.
// Purpose: Keep on-disk locations consistent across daemon and CLIs.
// Dependencies: sha2, slb-core
// ============================================================================

//! ## Overview
//! The unix socket lives in the system temp directory under a name derived
//! from the project path hash, so every process attached to the same
//! working tree finds the same daemon. State files live under
//! `<project>/.slb/`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use slb_core::DEFAULT_HASH_ALGORITHM;
use slb_core::hash_bytes;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Hex characters of the project hash used in the socket name.
const SOCKET_HASH_CHARS: usize = 12;
/// Name of the per-project state directory.
pub const STATE_DIR_NAME: &str = ".slb";
/// Database file name inside the state directory.
pub const STATE_DB_NAME: &str = "state.db";
/// Pending-request directory name inside the state directory.
pub const PENDING_DIR_NAME: &str = "pending";
/// Session bookkeeping directory name inside the state directory.
pub const SESSIONS_DIR_NAME: &str = "sessions";
/// Execution transcript directory name inside the state directory.
pub const LOGS_DIR_NAME: &str = "logs";
/// Rollback artifact directory name inside the state directory.
pub const ROLLBACK_DIR_NAME: &str = "rollback";

// ============================================================================
// SECTION: Socket and PID Paths
// ============================================================================

/// Returns the unix socket path for a project working tree.
#[must_use]
pub fn socket_path(project_path: &Path) -> PathBuf {
    let digest = hash_bytes(
        DEFAULT_HASH_ALGORITHM,
        project_path.to_string_lossy().as_bytes(),
    );
    let short = &digest.value[.. SOCKET_HASH_CHARS.min(digest.value.len())];
    std::env::temp_dir().join(format!("slb-{short}.sock"))
}

/// Returns the per-user PID file path.
#[must_use]
pub fn pid_file_path() -> PathBuf {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    std::env::temp_dir().join(format!("slb-daemon-{user}.pid"))
}

/// Writes the PID file: the decimal PID followed by a newline.
///
/// # Errors
///
/// Returns [`std::io::Error`] when the file cannot be written.
pub fn write_pid_file(path: &Path, pid: u32) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "{pid}")
}

/// Removes the PID file, ignoring a missing file.
pub fn remove_pid_file(path: &Path) {
    let _ = std::fs::remove_file(path);
}

// ============================================================================
// SECTION: State Directory Layout
// ============================================================================

/// Returns the project state directory (`<project>/.slb`).
#[must_use]
pub fn project_state_dir(project_path: &Path) -> PathBuf {
    project_path.join(STATE_DIR_NAME)
}

/// Returns the state database path.
#[must_use]
pub fn state_db_path(project_path: &Path) -> PathBuf {
    project_state_dir(project_path).join(STATE_DB_NAME)
}

/// Returns the directories the filesystem watcher monitors.
#[must_use]
pub fn watched_dirs(project_path: &Path) -> [PathBuf; 3] {
    let state = project_state_dir(project_path);
    [state.clone(), state.join(PENDING_DIR_NAME), state.join(SESSIONS_DIR_NAME)]
}

/// Returns the execution transcript directory.
#[must_use]
pub fn logs_dir(project_path: &Path) -> PathBuf {
    project_state_dir(project_path).join(LOGS_DIR_NAME)
}

/// Returns the rollback artifact directory.
#[must_use]
pub fn rollback_dir(project_path: &Path) -> PathBuf {
    project_state_dir(project_path).join(ROLLBACK_DIR_NAME)
}
