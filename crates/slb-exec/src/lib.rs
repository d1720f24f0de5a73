// crates/slb-exec/src/lib.rs
// ============================================================================
// Module: Execution Runner Library
// Description: Verified command execution with transcripts and rollbacks.
// Purpose: Expose the executor, transcript writer, and rollback capturer.
// Dependencies: crate::{executor, logfile, rollback}
// ============================================================================

//! ## Overview
//! The execution runner turns an approved request into a running child
//! process: it re-verifies the request, captures rollback state for
//! supported destructive operations, claims the executing status with a
//! compare-and-swap so exactly one executor wins, tees output to a
//! transcript, and records the terminal status.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod executor;
pub mod logfile;
pub mod rollback;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use executor::ExecError;
pub use executor::ExecuteOptions;
pub use executor::ExecutionOutcome;
pub use executor::Executor;
pub use executor::ExecutorConfig;
pub use logfile::TranscriptFile;
pub use rollback::RollbackError;
pub use rollback::RollbackPlan;
pub use rollback::capture_rollback;
pub use rollback::plan_rollback;
pub use rollback::restore_rollback;
