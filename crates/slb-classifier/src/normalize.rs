// crates/slb-classifier/src/normalize.rs
// ============================================================================
// Module: Command Normalization
// Description: Compound splitting, wrapper lifting, and path resolution.
// Purpose: Canonicalize raw shell text before tier matching.
// Dependencies: shlex
// ============================================================================

//! ## Overview
//! Normalization is a quote-aware scanner, not a shell grammar. Compound
//! commands are split on connectors outside quotes, `xargs`-style wrappers
//! are lifted so the inner command is what gets matched, and relative path
//! tokens are resolved against the caller's working directory. Tokenization
//! failures are recorded rather than masked; the engine upgrades the tier of
//! any command it could not tokenize.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

// ============================================================================
// SECTION: Normalized Command
// ============================================================================

/// One normalized segment of a compound command.
///
/// # Invariants
/// - `parse_error` is true when shell tokenization failed for this segment;
///   such segments are never pattern-matched and rely on the engine's
///   fail-closed tier upgrade instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSegment {
    /// Normalized segment text.
    pub text: String,
    /// True when tokenization failed for this segment.
    pub parse_error: bool,
}

/// Result of normalizing one raw command line.
///
/// # Invariants
/// - `segments` is never empty for non-empty trimmed input.
/// - `parse_error` is true when any segment failed shell tokenization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedCommand {
    /// Trimmed raw command text.
    pub raw: String,
    /// Normalized segments of a compound command, in order.
    pub segments: Vec<NormalizedSegment>,
    /// True when tokenization failed for any segment.
    pub parse_error: bool,
}

/// Normalizes a raw command against an optional working directory.
#[must_use]
pub fn normalize_command(raw: &str, cwd: Option<&str>) -> NormalizedCommand {
    let trimmed = raw.trim();
    let mut parse_error = false;
    let mut segments = Vec::new();
    for piece in split_connectors(trimmed) {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let lifted = lift_wrapper(piece);
        let segment_error = shlex::split(&lifted).is_none();
        parse_error |= segment_error;
        let resolved = cwd.map_or_else(|| lifted.clone(), |dir| resolve_paths(&lifted, dir));
        segments.push(NormalizedSegment {
            text: resolved,
            parse_error: segment_error,
        });
    }
    if segments.is_empty() && !trimmed.is_empty() {
        segments.push(NormalizedSegment {
            text: trimmed.to_string(),
            parse_error,
        });
    }
    NormalizedCommand {
        raw: trimmed.to_string(),
        segments,
        parse_error,
    }
}

// ============================================================================
// SECTION: Connector Splitting
// ============================================================================

/// Splits a command on `;`, `&&`, `||`, and `|` outside quotes.
#[must_use]
pub fn split_connectors(raw: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if !in_single => {
                current.push(ch);
                escaped = true;
            }
            '\'' if !in_double => {
                current.push(ch);
                in_single = !in_single;
            }
            '"' if !in_single => {
                current.push(ch);
                in_double = !in_double;
            }
            ';' if !in_single && !in_double => {
                segments.push(std::mem::take(&mut current));
            }
            '&' if !in_single && !in_double && chars.peek() == Some(&'&') => {
                chars.next();
                segments.push(std::mem::take(&mut current));
            }
            '|' if !in_single && !in_double => {
                if chars.peek() == Some(&'|') {
                    chars.next();
                }
                segments.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    segments.push(current);
    segments
}

// ============================================================================
// SECTION: Wrapper Lifting
// ============================================================================

/// `xargs` flags that consume the following token.
const XARGS_FLAGS_WITH_ARG: &[&str] = &["-n", "-I", "-L", "-P", "-s", "-d", "-a", "-E"];
/// `xargs` flags with no argument.
const XARGS_FLAGS_BARE: &[&str] = &["-0", "-r", "-t", "-x", "-p", "--no-run-if-empty"];

/// Lifts the inner command out of an `xargs`-style wrapper.
///
/// Returns the segment unchanged when it is not a wrapper invocation or
/// when no inner command remains after the wrapper's flags.
#[must_use]
pub fn lift_wrapper(segment: &str) -> String {
    let tokens: Vec<&str> = segment.split_whitespace().collect();
    let Some((first, rest)) = tokens.split_first() else {
        return segment.to_string();
    };
    let program = first.rsplit('/').next().unwrap_or(first);
    if program != "xargs" {
        return segment.to_string();
    }
    let mut index = 0;
    while index < rest.len() {
        let token = rest[index];
        if XARGS_FLAGS_BARE.contains(&token) {
            index += 1;
        } else if XARGS_FLAGS_WITH_ARG.contains(&token) {
            index += 2;
        } else if XARGS_FLAGS_WITH_ARG.iter().any(|flag| token.starts_with(flag)) {
            index += 1;
        } else {
            break;
        }
    }
    if index >= rest.len() {
        return segment.to_string();
    }
    rest[index..].join(" ")
}

// ============================================================================
// SECTION: Path Resolution
// ============================================================================

/// Resolves `./` and `../` tokens in a segment against a working directory.
#[must_use]
pub fn resolve_paths(segment: &str, cwd: &str) -> String {
    let resolved: Vec<String> = segment
        .split_whitespace()
        .map(|token| {
            if token.starts_with("./") || token.starts_with("../") {
                lexical_join(cwd, token)
            } else {
                token.to_string()
            }
        })
        .collect();
    resolved.join(" ")
}

/// Joins a relative token onto a base directory without touching the
/// filesystem, collapsing `.` and `..` components lexically.
fn lexical_join(base: &str, relative: &str) -> String {
    let joined = Path::new(base).join(relative);
    let mut parts: Vec<std::ffi::OsString> = Vec::new();
    let mut prefix = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::RootDir | Component::Prefix(_) => {
                prefix.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    // `..` above the base stays in the output.
                    parts.push(component.as_os_str().to_os_string());
                }
            }
            Component::Normal(part) => parts.push(part.to_os_string()),
        }
    }
    let mut out = prefix;
    for part in parts {
        out.push(part);
    }
    out.to_string_lossy().into_owned()
}
