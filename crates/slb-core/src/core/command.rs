// crates/slb-core/src/core/command.rs
// ============================================================================
// Module: Command Specification
// Description: Hash-sealed command value object embedded in requests.
// Purpose: Bind raw text, working directory, and invocation mode to a digest.
// Dependencies: serde, serde_jcs, crate::core::hashing
// ============================================================================

//! ## Overview
//! A [`CommandSpec`] captures exactly what an agent intends to run. The
//! digest is computed over `raw`, `cwd`, the JSON form of `argv`, and the
//! shell flag, newline-separated; the digest stored at request creation must
//! equal the digest recomputed at execution time. Display forms mask values
//! that follow credential-shaped tokens.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::hashing::hash_bytes;

// ============================================================================
// SECTION: Redaction
// ============================================================================

/// Lowercase substrings marking a token as credential-shaped.
const SENSITIVE_KEYWORDS: &[&str] =
    &["password", "passwd", "secret", "token", "apikey", "api_key", "bearer", "credential"];

/// Flags whose following token is masked.
const SENSITIVE_FLAGS: &[&str] = &["--password", "--token", "--secret", "--api-key"];

/// Mask substituted for redacted values.
const MASK: &str = "***";

/// Builds the display-redacted form and reports whether anything was masked.
fn redact(raw: &str) -> (String, bool) {
    let mut redacted = Vec::new();
    let mut masked = false;
    let mut mask_next = false;
    for token in raw.split_whitespace() {
        if mask_next {
            redacted.push(MASK.to_string());
            masked = true;
            mask_next = false;
            continue;
        }
        let lower = token.to_lowercase();
        if SENSITIVE_FLAGS.contains(&lower.as_str()) {
            redacted.push(token.to_string());
            mask_next = true;
            continue;
        }
        if let Some(eq) = token.find('=') {
            let key = lower[.. eq].to_string();
            if SENSITIVE_KEYWORDS.iter().any(|keyword| key.contains(keyword)) {
                redacted.push(format!("{}={MASK}", &token[.. eq]));
                masked = true;
                continue;
            }
        }
        redacted.push(token.to_string());
    }
    (redacted.join(" "), masked)
}

// ============================================================================
// SECTION: Command Spec
// ============================================================================

/// Hash-sealed command specification embedded in a request.
///
/// # Invariants
/// - `hash` always equals [`CommandSpec::compute_hash`] over the other
///   fields; construction enforces this and mutation is not exposed.
/// - `display_redacted` never contains values that followed
///   credential-shaped tokens in `raw`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Raw command text as supplied by the agent.
    pub raw: String,
    /// Working directory the command runs in.
    pub cwd: String,
    /// True when the command runs through the platform shell.
    pub shell: bool,
    /// Pre-tokenized argument vector, when the caller supplied one.
    pub argv: Option<Vec<String>>,
    /// Hex-encoded SHA-256 digest sealing the fields above.
    pub hash: String,
    /// True when the raw text contained credential-shaped tokens.
    pub contains_sensitive: bool,
    /// Display form with credential values masked.
    pub display_redacted: String,
}

impl CommandSpec {
    /// Builds a sealed command spec from its parts.
    #[must_use]
    pub fn new(raw: impl Into<String>, cwd: impl Into<String>, shell: bool) -> Self {
        Self::with_argv(raw, cwd, shell, None)
    }

    /// Builds a sealed command spec with a pre-tokenized argument vector.
    #[must_use]
    pub fn with_argv(
        raw: impl Into<String>,
        cwd: impl Into<String>,
        shell: bool,
        argv: Option<Vec<String>>,
    ) -> Self {
        let raw = raw.into();
        let cwd = cwd.into();
        let hash = Self::compute_digest(&raw, &cwd, shell, argv.as_deref());
        let (display_redacted, contains_sensitive) = redact(&raw);
        Self {
            raw,
            cwd,
            shell,
            argv,
            hash,
            contains_sensitive,
            display_redacted,
        }
    }

    /// Recomputes the digest from the current field values.
    #[must_use]
    pub fn compute_hash(&self) -> String {
        Self::compute_digest(&self.raw, &self.cwd, self.shell, self.argv.as_deref())
    }

    /// Returns true when the stored digest matches the recomputed digest.
    #[must_use]
    pub fn hash_matches(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Digest over `raw`, `cwd`, canonical-JSON argv, and the shell flag,
    /// newline-separated and hex-encoded.
    fn compute_digest(raw: &str, cwd: &str, shell: bool, argv: Option<&[String]>) -> String {
        let argv_json = serde_jcs::to_string(&argv).unwrap_or_else(|_| "null".to_string());
        let shell_text = if shell { "true" } else { "false" };
        let material = format!("{raw}\n{cwd}\n{argv_json}\n{shell_text}");
        hash_bytes(DEFAULT_HASH_ALGORITHM, material.as_bytes()).value
    }
}
