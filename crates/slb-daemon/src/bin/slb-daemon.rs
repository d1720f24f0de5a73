// crates/slb-daemon/src/bin/slb-daemon.rs
// ============================================================================
// Module: Daemon Entrypoint
// Description: Starts the per-project notary daemon for the current tree.
// Purpose: Wire config, store, classifier, and lifecycle into the server.
// Dependencies: slb-config, slb-core, slb-daemon, slb-store-sqlite, tokio
// ============================================================================

//! ## Overview
//! Minimal daemon entrypoint: reads `<project>/.slb/config.toml` when
//! present (file discovery and precedence belong to the hosting CLI), opens
//! the state database, loads persisted user patterns into the classifier,
//! and serves until interrupted.

use std::io::Write;
use std::sync::Arc;

use slb_classifier::PatternEngine;
use slb_classifier::PatternSource;
use slb_config::SlbConfig;
use slb_core::LifecycleEngine;
use slb_core::SharedNotaryStore;
use slb_daemon::DaemonConfig;
use slb_daemon::DaemonServer;
use slb_store_sqlite::SqliteNotaryStore;
use slb_store_sqlite::SqliteStoreConfig;

/// Entry point; exits nonzero on fatal setup failure.
fn main() -> std::process::ExitCode {
    match run() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(message) => {
            let _ = writeln!(std::io::stderr(), "slb-daemon: FATAL: {message}");
            std::process::ExitCode::FAILURE
        }
    }
}

/// Builds and serves the daemon until interrupted.
fn run() -> Result<(), String> {
    let project_path =
        std::env::current_dir().map_err(|err| format!("cannot resolve project dir: {err}"))?;
    let config_path = slb_daemon::project_state_dir(&project_path).join("config.toml");
    let config = if config_path.exists() {
        let document = std::fs::read_to_string(&config_path)
            .map_err(|err| format!("cannot read {}: {err}", config_path.display()))?;
        SlbConfig::from_toml_str(&document).map_err(|err| err.to_string())?
    } else {
        SlbConfig::default()
    };
    config.validate().map_err(|err| err.to_string())?;

    let db_path = slb_daemon::project_state_dir(&project_path).join("state.db");
    let store = SqliteNotaryStore::new(&SqliteStoreConfig::new(db_path))
        .map_err(|err| err.to_string())?;
    let classifier =
        Arc::new(PatternEngine::with_builtins().map_err(|err| err.to_string())?);
    // Persisted user patterns load best-effort; compile failures are
    // discarded with a warning.
    if let Ok(patterns) = store.list_patterns() {
        for pattern in patterns {
            let added = classifier.add_pattern(
                pattern.tier,
                &pattern.regex,
                &pattern.description,
                PatternSource::Human,
            );
            if added.is_err() {
                let _ = writeln!(
                    std::io::stderr(),
                    "slb-daemon: WARNING: discarding stored pattern {}",
                    pattern.regex
                );
            }
        }
    }

    let shared = SharedNotaryStore::from_store(store);
    let lifecycle = Arc::new(LifecycleEngine::new(
        shared.clone(),
        Arc::clone(&classifier),
        config.lifecycle_policy(),
    ));
    let daemon_config = DaemonConfig::from_config(&config, project_path)
        .map_err(|err| err.to_string())?;
    let server = DaemonServer::new(daemon_config, shared, classifier, lifecycle);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| format!("runtime build failed: {err}"))?;
    runtime.block_on(async move {
        let handle = server.start().await.map_err(|err| err.to_string())?;
        let _ = writeln!(
            std::io::stderr(),
            "slb-daemon: listening on {}",
            handle.socket_path.display()
        );
        let _ = tokio::signal::ctrl_c().await;
        handle.shutdown().await;
        Ok(())
    })
}
