// crates/slb-core/src/core/mod.rs
// ============================================================================
// Module: Notary Core Types
// Description: Data model shared by the notary subsystems.
// Purpose: Group identifiers, time, hashing, and record types.
// Dependencies: crate::core::{command, hashing, identifiers, request, review, session, time}
// ============================================================================

//! ## Overview
//! Core record types for the notary: sessions, command specs, requests,
//! reviews, executions, and rollback descriptors. Everything here is a plain
//! serializable value; behavior lives in [`crate::runtime`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod command;
pub mod hashing;
pub mod identifiers;
pub mod request;
pub mod review;
pub mod session;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use command::CommandSpec;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use hashing::hash_bytes;
pub use identifiers::RequestId;
pub use identifiers::ReviewId;
pub use identifiers::SessionId;
pub use identifiers::SessionKey;
pub use request::ExecutionRecord;
pub use request::Justification;
pub use request::Request;
pub use request::RequestStatus;
pub use request::RollbackCapture;
pub use request::RollbackDescriptor;
pub use review::Review;
pub use review::ReviewDecision;
pub use session::Session;
pub use time::Timestamp;
