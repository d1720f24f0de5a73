// crates/slb-core/src/core/identifiers.rs
// ============================================================================
// Module: Notary Identifiers
// Description: Opaque identifiers and bearer keys for notary records.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: rand, serde, subtle
// ============================================================================

//! ## Overview
//! Identifiers are opaque lowercase-hex strings generated from OS randomness
//! and serialize transparently. [`SessionKey`] is the 256-bit bearer token
//! used for IPC authentication and review authorship proof; it compares in
//! constant time and never appears in debug output.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use rand::RngCore;
use rand::rngs::OsRng;
use serde::Deserialize;
use serde::Serialize;
use subtle::ConstantTimeEq;

// ============================================================================
// SECTION: Generation
// ============================================================================

/// Generates `len` random bytes as a lowercase hex string.
fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    let mut out = String::with_capacity(len * 2);
    for byte in bytes {
        out.push(char::from_digit(u32::from(byte >> 4), 16).unwrap_or('0'));
        out.push(char::from_digit(u32::from(byte & 0x0f), 16).unwrap_or('0'));
    }
    out
}

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

/// Session identifier for a live agent attachment.
///
/// # Invariants
/// - Opaque UTF-8 string; generated ids are 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a session identifier from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random session identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(random_hex(16))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request identifier for a gated execution intent.
///
/// # Invariants
/// - Opaque UTF-8 string; generated ids are 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Creates a request identifier from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random request identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(random_hex(16))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first eight characters used in log file names.
    #[must_use]
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[.. end]
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Review identifier for one peer decision.
///
/// # Invariants
/// - Opaque UTF-8 string; generated ids are 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewId(String);

impl ReviewId {
    /// Creates a review identifier from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random review identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(random_hex(16))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// SECTION: Session Key
// ============================================================================

/// 256-bit bearer key proving session ownership.
///
/// # Invariants
/// - Generated keys are 64 lowercase hex characters.
/// - Equality checks run in constant time.
/// - Debug output never includes the key material.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Creates a session key from an existing string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Generates a fresh 256-bit random key.
    #[must_use]
    pub fn generate() -> Self {
        Self(random_hex(32))
    }

    /// Returns the key as a string slice for transport.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compares two keys in constant time.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(***)")
    }
}
