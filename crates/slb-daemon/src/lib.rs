// crates/slb-daemon/src/lib.rs
// ============================================================================
// Module: Notary Daemon Library
// Description: Long-lived per-project notary, event hub, and timeout handler.
// Purpose: Expose the IPC server, watcher, sweeper, and notification plumbing.
// Dependencies: crate::{allowlist, debounce, env, paths, rpc, server, subscribers, sweeper,
//              watcher}
// ============================================================================

//! ## Overview
//! The daemon owns the project's coordination plane: a line-delimited
//! JSON-RPC server over a unix socket (optionally authenticated TCP),
//! pub/sub event broadcast to subscribers, a debounced filesystem watcher
//! over the state files, a timeout sweeper, and an at-most-once desktop
//! notification debouncer. Every long-lived responsibility runs as an
//! independently cancellable task.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod allowlist;
pub mod debounce;
pub mod env;
pub mod paths;
pub mod rpc;
pub mod server;
pub mod subscribers;
pub mod sweeper;
pub mod watcher;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use allowlist::IpAllowlist;
pub use debounce::DesktopNotifier;
pub use debounce::NotificationDebouncer;
pub use paths::pid_file_path;
pub use paths::project_state_dir;
pub use paths::socket_path;
pub use rpc::EventEnvelope;
pub use rpc::RpcError;
pub use rpc::RpcRequest;
pub use rpc::RpcResponse;
pub use server::DaemonConfig;
pub use server::DaemonError;
pub use server::DaemonHandle;
pub use server::DaemonServer;
pub use subscribers::SubscriberTable;
pub use sweeper::TimeoutSweeper;
pub use watcher::DebouncedEvent;
pub use watcher::FileOps;
pub use watcher::StateWatcher;
