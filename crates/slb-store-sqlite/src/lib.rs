// crates/slb-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Notary Store Library
// Description: Durable notary store backed by SQLite WAL.
// Purpose: Expose the store type, configuration, and errors.
// Dependencies: crate::store
// ============================================================================

//! ## Overview
//! Durable [`slb_core::NotaryStore`] implementation on `SQLite`. The store
//! runs WAL journal mode with foreign keys enforced so daemon readers can
//! open the database while an agent CLI writes.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteJournalMode;
pub use store::SqliteNotaryStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteSyncMode;
pub use store::StoredPattern;
