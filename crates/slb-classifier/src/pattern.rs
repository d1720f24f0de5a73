// crates/slb-classifier/src/pattern.rs
// ============================================================================
// Module: Classification Patterns
// Description: Compiled classification rules and their provenance.
// Purpose: Pair a tier with a case-insensitive regex and a source tag.
// Dependencies: regex, serde, crate::tier
// ============================================================================

//! ## Overview
//! A pattern binds a regex to a risk tier. Builtin patterns are program
//! constants and must compile; user-supplied patterns that fail to compile
//! are rejected at the API boundary and discarded by config loaders.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use regex::Regex;
use regex::RegexBuilder;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::tier::RiskTier;

// ============================================================================
// SECTION: Pattern Source
// ============================================================================

/// Provenance of a classification pattern.
///
/// # Invariants
/// - Variants are stable for serialization; the wire form is lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSource {
    /// Shipped with the classifier.
    Builtin,
    /// Added by an agent at runtime.
    Agent,
    /// Added by a human operator.
    Human,
    /// Proposed by an agent, pending human confirmation.
    Suggested,
}

impl PatternSource {
    /// Returns the lowercase wire label for the source.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Builtin => "builtin",
            Self::Agent => "agent",
            Self::Human => "human",
            Self::Suggested => "suggested",
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when building classification patterns.
#[derive(Debug, Error)]
pub enum PatternError {
    /// Regex source failed to compile.
    #[error("pattern failed to compile: {source_text}: {message}")]
    Compile {
        /// Regex source text that failed.
        source_text: String,
        /// Compiler error message.
        message: String,
    },
    /// Pattern source text was empty.
    #[error("pattern source must not be empty")]
    Empty,
}

// ============================================================================
// SECTION: Pattern
// ============================================================================

/// A compiled classification rule.
///
/// # Invariants
/// - `compiled` is always the case-insensitive compilation of `source_text`.
#[derive(Debug, Clone)]
pub struct Pattern {
    /// Tier assigned on match.
    pub tier: RiskTier,
    /// Regex source text as supplied.
    pub source_text: String,
    /// Case-insensitive compiled form.
    pub compiled: Regex,
    /// Human-readable description of what the rule catches.
    pub description: String,
    /// Provenance tag.
    pub source: PatternSource,
}

impl Pattern {
    /// Compiles a pattern from its regex source.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError::Empty`] for empty source text and
    /// [`PatternError::Compile`] when the regex does not compile.
    pub fn compile(
        tier: RiskTier,
        source_text: &str,
        description: &str,
        source: PatternSource,
    ) -> Result<Self, PatternError> {
        if source_text.is_empty() {
            return Err(PatternError::Empty);
        }
        let compiled = RegexBuilder::new(source_text)
            .case_insensitive(true)
            .build()
            .map_err(|err| PatternError::Compile {
                source_text: source_text.to_string(),
                message: err.to_string(),
            })?;
        Ok(Self {
            tier,
            source_text: source_text.to_string(),
            compiled,
            description: description.to_string(),
            source,
        })
    }

    /// Returns true when the pattern matches the given command text.
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        self.compiled.is_match(text)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tier.label(), self.source_text)
    }
}
