// crates/slb-classifier/src/engine.rs
// ============================================================================
// Module: Pattern Engine
// Description: Tiered regex matching with fail-closed parse handling.
// Purpose: Classify normalized commands and manage the pattern sets.
// Dependencies: regex, serde, crate::{builtin, normalize, pattern, tier}
// ============================================================================

//! ## Overview
//! The engine walks the tier lists in precedence order
//! (SAFE → CRITICAL → DANGEROUS → CAUTION) per segment, aggregates compound
//! commands to the highest-risk segment, applies the SQL data-deletion
//! fallback over the raw text, and upgrades one tier when tokenization
//! failed. Classification takes a read lock; pattern mutation takes the
//! write lock, so matching is safe against concurrent additions.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::RwLock;

use regex::Regex;
use regex::RegexBuilder;
use serde::Deserialize;
use serde::Serialize;

use crate::builtin::FALLBACK_SQL_DELETE;
use crate::builtin::PARSE_ERROR_PATTERN;
use crate::builtin::SQL_DELETE_REGEX;
use crate::builtin::SQL_WHERE_REGEX;
use crate::builtin::builtin_patterns;
use crate::export::PatternExport;
use crate::export::build_export;
use crate::normalize::normalize_command;
use crate::pattern::Pattern;
use crate::pattern::PatternError;
use crate::pattern::PatternSource;
use crate::tier::RiskTier;

// ============================================================================
// SECTION: Match Results
// ============================================================================

/// One matched segment of a compound command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMatch {
    /// Normalized segment text.
    pub segment: String,
    /// Tier assigned to the segment.
    pub tier: RiskTier,
    /// Source text of the pattern that matched.
    pub pattern: String,
}

/// Outcome of classifying one raw command.
///
/// # Invariants
/// - `tier` is `None` only for commands no pattern matched and no fallback
///   or parse-error upgrade applied to.
/// - `needs_approval` implies `min_approvals >= 1`.
/// - `is_safe` implies `tier == Some(RiskTier::Safe)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Overall tier, highest-risk across segments.
    pub tier: Option<RiskTier>,
    /// Pattern that determined the overall tier, when any.
    pub matched_pattern: Option<String>,
    /// Approval quorum floor derived from the tier.
    pub min_approvals: u32,
    /// True when the command must be queued for review.
    pub needs_approval: bool,
    /// True when the command matched the SAFE tier.
    pub is_safe: bool,
    /// True when tokenization failed and the tier was upgraded.
    pub parse_error: bool,
    /// Per-segment matches, in segment order.
    pub segment_matches: Vec<SegmentMatch>,
}

impl MatchResult {
    /// Result for empty input: unmatched, unreviewed, not safe.
    #[must_use]
    fn unmatched() -> Self {
        Self {
            tier: None,
            matched_pattern: None,
            min_approvals: 0,
            needs_approval: false,
            is_safe: false,
            parse_error: false,
            segment_matches: Vec::new(),
        }
    }
}

// ============================================================================
// SECTION: Pattern Engine
// ============================================================================

/// Tier precedence for per-segment matching.
const MATCH_ORDER: [RiskTier; 4] =
    [RiskTier::Safe, RiskTier::Critical, RiskTier::Dangerous, RiskTier::Caution];

/// Tiered pattern sets behind the engine's read-write lock.
#[derive(Debug, Default)]
struct TierSets {
    /// Patterns grouped per tier, in insertion order.
    safe: Vec<Pattern>,
    /// Critical-tier patterns.
    critical: Vec<Pattern>,
    /// Dangerous-tier patterns.
    dangerous: Vec<Pattern>,
    /// Caution-tier patterns.
    caution: Vec<Pattern>,
}

impl TierSets {
    /// Returns the list for a tier.
    const fn list(&self, tier: RiskTier) -> &Vec<Pattern> {
        match tier {
            RiskTier::Safe => &self.safe,
            RiskTier::Caution => &self.caution,
            RiskTier::Dangerous => &self.dangerous,
            RiskTier::Critical => &self.critical,
        }
    }

    /// Returns the mutable list for a tier.
    const fn list_mut(&mut self, tier: RiskTier) -> &mut Vec<Pattern> {
        match tier {
            RiskTier::Safe => &mut self.safe,
            RiskTier::Caution => &mut self.caution,
            RiskTier::Dangerous => &mut self.dangerous,
            RiskTier::Critical => &mut self.critical,
        }
    }
}

/// Command risk classifier over tiered regex sets.
pub struct PatternEngine {
    /// Tiered pattern sets; read for matching, written for mutation.
    sets: RwLock<TierSets>,
    /// Compiled SQL `DELETE FROM` fallback matcher.
    sql_delete: Regex,
    /// Compiled `WHERE` clause matcher for the fallback.
    sql_where: Regex,
}

impl PatternEngine {
    /// Creates an engine preloaded with the builtin taxonomy.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] when a builtin rule fails to compile, which
    /// is a program defect rather than a runtime condition.
    pub fn with_builtins() -> Result<Self, PatternError> {
        Self::from_patterns(builtin_patterns()?)
    }

    /// Creates an engine from an explicit pattern list.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] when the fallback matchers fail to compile.
    pub fn from_patterns(patterns: Vec<Pattern>) -> Result<Self, PatternError> {
        let sql_delete = compile_fallback(SQL_DELETE_REGEX)?;
        let sql_where = compile_fallback(SQL_WHERE_REGEX)?;
        let mut sets = TierSets::default();
        for pattern in patterns {
            sets.list_mut(pattern.tier).push(pattern);
        }
        Ok(Self {
            sets: RwLock::new(sets),
            sql_delete,
            sql_where,
        })
    }

    /// Classifies a raw command against the tier sets.
    ///
    /// The command is normalized first; compound commands take the
    /// highest-risk segment tier, and tokenization failures upgrade the
    /// result one tier with `min_approvals` recomputed afterwards.
    #[must_use]
    pub fn classify(&self, raw: &str, cwd: Option<&str>) -> MatchResult {
        let normalized = normalize_command(raw, cwd);
        if normalized.raw.is_empty() {
            return MatchResult::unmatched();
        }
        let mut segment_matches = Vec::new();
        let mut tier: Option<RiskTier> = None;
        let mut matched_pattern: Option<String> = None;
        if let Ok(sets) = self.sets.read() {
            for segment in &normalized.segments {
                // Unparseable segments are never matched; the fail-closed
                // upgrade below covers them instead.
                if segment.parse_error {
                    continue;
                }
                let Some(found) = classify_segment(&sets, &segment.text) else {
                    continue;
                };
                if tier.is_none_or(|current| found.tier > current) {
                    tier = Some(found.tier);
                    matched_pattern = Some(found.pattern.clone());
                }
                segment_matches.push(found);
            }
        }
        // Fallback pass over the raw text covers SQL wrappers such as
        // `psql -c "DELETE FROM ..."` that no segment pattern sees.
        if self.sql_delete.is_match(&normalized.raw)
            && !self.sql_where.is_match(&normalized.raw)
            && tier.is_none_or(|current| current < RiskTier::Critical)
        {
            tier = Some(RiskTier::Critical);
            matched_pattern = Some(FALLBACK_SQL_DELETE.to_string());
        }
        if normalized.parse_error {
            tier = Some(tier.map_or(RiskTier::Caution, RiskTier::upgrade_one));
            if matched_pattern.is_none() {
                matched_pattern = Some(PARSE_ERROR_PATTERN.to_string());
            }
        }
        let mut min_approvals = tier.map_or(0, RiskTier::min_approvals);
        if normalized.parse_error && tier.is_some() {
            min_approvals = min_approvals.max(1);
        }
        MatchResult {
            tier,
            matched_pattern,
            min_approvals,
            needs_approval: min_approvals > 0,
            is_safe: tier == Some(RiskTier::Safe),
            parse_error: normalized.parse_error,
            segment_matches,
        }
    }

    /// Adds a pattern to a tier, replacing any rule with the same source.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] when the regex fails to compile; callers
    /// loading user-supplied pattern files discard such entries.
    pub fn add_pattern(
        &self,
        tier: RiskTier,
        source_text: &str,
        description: &str,
        source: PatternSource,
    ) -> Result<(), PatternError> {
        let pattern = Pattern::compile(tier, source_text, description, source)?;
        if let Ok(mut sets) = self.sets.write() {
            let list = sets.list_mut(tier);
            list.retain(|existing| existing.source_text != source_text);
            list.push(pattern);
        }
        Ok(())
    }

    /// Removes a pattern by tier and regex source.
    ///
    /// Returns true when a rule was removed.
    pub fn remove_pattern(&self, tier: RiskTier, source_text: &str) -> bool {
        self.sets.write().map_or(false, |mut sets| {
            let list = sets.list_mut(tier);
            let before = list.len();
            list.retain(|existing| existing.source_text != source_text);
            list.len() != before
        })
    }

    /// Returns a snapshot of every pattern, tier order then insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Pattern> {
        self.sets.read().map_or_else(
            |_| Vec::new(),
            |sets| {
                RiskTier::ALL
                    .iter()
                    .flat_map(|tier| sets.list(*tier).iter().cloned())
                    .collect()
            },
        )
    }

    /// Returns the number of loaded patterns.
    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.sets.read().map_or(0, |sets| {
            RiskTier::ALL.iter().map(|tier| sets.list(*tier).len()).sum()
        })
    }

    /// Builds the deterministic export document for the loaded sets.
    #[must_use]
    pub fn export(&self) -> PatternExport {
        build_export(&self.snapshot())
    }
}

/// Matches one segment against the tier lists in precedence order.
fn classify_segment(sets: &TierSets, segment: &str) -> Option<SegmentMatch> {
    for tier in MATCH_ORDER {
        for pattern in sets.list(tier) {
            if pattern.matches(segment) {
                return Some(SegmentMatch {
                    segment: segment.to_string(),
                    tier,
                    pattern: pattern.source_text.clone(),
                });
            }
        }
    }
    None
}

/// Compiles a fallback matcher, mapping failures to [`PatternError`].
fn compile_fallback(source_text: &str) -> Result<Regex, PatternError> {
    RegexBuilder::new(source_text)
        .case_insensitive(true)
        .build()
        .map_err(|err| PatternError::Compile {
            source_text: source_text.to_string(),
            message: err.to_string(),
        })
}

// ============================================================================
// SECTION: Shared Engine
// ============================================================================

/// Process-scope engine shared by CLI callsites.
static SHARED_ENGINE: OnceLock<Arc<PatternEngine>> = OnceLock::new();

/// Returns the lazily-initialized process-scope engine.
///
/// Library consumers should pass an engine explicitly; this accessor exists
/// for short-lived CLI callsites only.
///
/// # Errors
///
/// Returns [`PatternError`] when the builtin taxonomy fails to compile.
pub fn shared_engine() -> Result<Arc<PatternEngine>, PatternError> {
    if let Some(engine) = SHARED_ENGINE.get() {
        return Ok(Arc::clone(engine));
    }
    let engine = Arc::new(PatternEngine::with_builtins()?);
    Ok(Arc::clone(SHARED_ENGINE.get_or_init(|| engine)))
}
