// crates/slb-classifier/src/builtin.rs
// ============================================================================
// Module: Builtin Pattern Taxonomy
// Description: Shipped classification rules for the four risk tiers.
// Purpose: Provide the default taxonomy loaded into every pattern engine.
// Dependencies: crate::{pattern, tier}
// ============================================================================

//! ## Overview
//! Builtin rules are program constants: a compile failure here is a defect,
//! so construction returns an error instead of discarding the rule the way
//! user-supplied patterns are discarded. The SAFE list is matched before any
//! risk tier, so its entries are deliberately narrow; a wildcard there would
//! mask a destructive suffix.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::pattern::Pattern;
use crate::pattern::PatternError;
use crate::pattern::PatternSource;
use crate::tier::RiskTier;

// ============================================================================
// SECTION: Tier Tables
// ============================================================================

/// Read-only or otherwise harmless commands.
const SAFE_PATTERNS: &[(&str, &str)] = &[
    (r"^git\s+(status|log|diff|show|branch|remote|stash\s+list)\b", "read-only git inspection"),
    (r"^ls\b", "directory listing"),
    (r"^pwd$", "print working directory"),
    (r"^whoami$", "identity query"),
    (r"^echo\b", "echo text"),
    (r"^cat\s", "file read"),
    (r"^head\b", "file head read"),
    (r"^tail\b", "file tail read"),
    (r"^(e|f)?grep\b", "text search"),
    (r"^rg\b", "ripgrep text search"),
    (r"^wc\b", "line and word count"),
    (r"^which\b", "binary lookup"),
    (r"^date\b", "clock read"),
    (r"^uname\b", "kernel identification"),
    (r"^uptime$", "uptime query"),
    (r"^df\b", "disk usage summary"),
    (r"^du\b", "directory usage summary"),
    (r"^ps\b", "process listing"),
    (r"^cargo\s+(check|fmt|clippy|tree|metadata)\b", "non-mutating cargo subcommand"),
];

/// Irreversible or system-wide destruction.
const CRITICAL_PATTERNS: &[(&str, &str)] = &[
    (
        r"\brm\s+(-[a-zA-Z]+\s+)*/(etc|usr|var|home|bin|sbin|lib|lib64|boot|root|opt|srv|dev|sys|proc)\b",
        "delete of a system directory",
    ),
    (r"\brm\s+(-[a-zA-Z]+\s+)*/\s*$", "delete of the filesystem root"),
    (r"\brm\s+.*--no-preserve-root", "delete with root preservation disabled"),
    (r"\bmkfs(\.[a-z0-9]+)?\b", "filesystem format"),
    (r"\bdd\s+.*\bof=/dev/", "raw write to a block device"),
    (r">\s*/dev/sd[a-z]\b", "redirect onto a block device"),
    (r"\bshutdown\b", "host shutdown"),
    (r"\breboot\b", "host reboot"),
    (r"\bpoweroff\b", "host power-off"),
    (r":\(\)\s*\{\s*:\|:&\s*\};\s*:", "fork bomb"),
    (r"\bgit\s+push\s+.*(--force|-f)\b.*\b(main|master)\b", "force push to a protected branch"),
    (r"\bdrop\s+database\b", "sql database drop"),
    (r"\bkubectl\s+delete\s+(ns|namespace)\b", "kubernetes namespace delete"),
    (r"\bterraform\s+destroy\b", "terraform stack destroy"),
    (r"\buserdel\b", "account removal"),
    (r"\biptables\s+(-F\b|--flush)", "firewall flush"),
];

/// Destructive or hard-to-undo operations scoped to a project.
const DANGEROUS_PATTERNS: &[(&str, &str)] = &[
    (r"\brm\s+-[a-zA-Z]*[rR]", "recursive delete"),
    (r"\brm\s+-[a-zA-Z]*[fF]", "forced delete"),
    (r"\bgit\s+reset\s+--hard\b", "hard reset of the working tree"),
    (r"\bgit\s+clean\s+-[a-zA-Z]*[fd]", "removal of untracked files"),
    (r"\bgit\s+push\s+.*(--force\b|--force-with-lease\b|\s-f\b)", "history rewrite push"),
    (r"\bgit\s+branch\s+-[a-zA-Z]*D", "forced branch delete"),
    (r"\bchmod\s+-[a-zA-Z]*R\b", "recursive permission change"),
    (r"\bchown\s+-[a-zA-Z]*R\b", "recursive ownership change"),
    (r"\bkubectl\s+delete\b", "kubernetes resource delete"),
    (r"\bdocker\s+(system\s+prune|rm\b|rmi\b|volume\s+rm)", "docker resource removal"),
    (r"\bdrop\s+table\b", "sql table drop"),
    (r"\btruncate\s+table\b", "sql table truncate"),
    (r"\bfind\s+.*-delete\b", "find with delete action"),
    (r"\bfind\s+.*-exec\s+rm\b", "find executing rm"),
    (r"\bapt(-get)?\s+(remove|purge|autoremove)\b", "package removal"),
    (r"\bnpm\s+unpublish\b", "registry unpublish"),
    (r"\bgh\s+(repo|release)\s+delete\b", "github resource delete"),
];

/// Low-impact mutations worth logging but not gating.
const CAUTION_PATTERNS: &[(&str, &str)] = &[
    (r"\brm\s+", "file delete"),
    (r"\bmv\s+", "file move"),
    (r"\bgit\s+(checkout|switch|restore|rebase|merge|cherry-pick|stash)\b", "working-tree mutation"),
    (r"\bchmod\s+", "permission change"),
    (r"\bchown\s+", "ownership change"),
    (r"\bkill(all)?\b", "process signal"),
    (r"\bdocker\s+(stop|restart|kill)\b", "container stop"),
    (r"\bsystemctl\s+(stop|restart|reload)\b", "service restart"),
    (r"\b(npm|pnpm|yarn)\s+install\b", "node dependency install"),
    (r"\bpip3?\s+install\b", "python dependency install"),
    (r"\bcargo\s+install\b", "cargo binary install"),
    (r"\bapt(-get)?\s+install\b", "package install"),
    (r"^(ba|z|da)?sh$", "bare shell invocation"),
    (r"\bcrontab\b", "crontab edit"),
    (r"\bkubectl\s+(apply|scale|rollout)\b", "kubernetes mutation"),
];

// ============================================================================
// SECTION: Fallback Rules
// ============================================================================

/// Name reported when the SQL data-deletion fallback fires.
pub const FALLBACK_SQL_DELETE: &str = "fallback_sql_delete_no_where";
/// Name reported when a tokenization failure forced a tier upgrade.
pub const PARSE_ERROR_PATTERN: &str = "parse_error";

/// Regex for SQL `DELETE FROM` statements anywhere in the raw command.
pub(crate) const SQL_DELETE_REGEX: &str = r"\bdelete\s+from\s+\S+";
/// Regex for a `WHERE` clause; its absence makes the delete unbounded.
pub(crate) const SQL_WHERE_REGEX: &str = r"\bwhere\b";

// ============================================================================
// SECTION: Construction
// ============================================================================

/// Compiles the builtin taxonomy.
///
/// # Errors
///
/// Returns [`PatternError`] when any builtin regex fails to compile. The
/// tables are constants, so a failure here is a program defect surfaced by
/// the compile test rather than discarded at runtime.
pub fn builtin_patterns() -> Result<Vec<Pattern>, PatternError> {
    let tables: [(RiskTier, &[(&str, &str)]); 4] = [
        (RiskTier::Safe, SAFE_PATTERNS),
        (RiskTier::Critical, CRITICAL_PATTERNS),
        (RiskTier::Dangerous, DANGEROUS_PATTERNS),
        (RiskTier::Caution, CAUTION_PATTERNS),
    ];
    let mut patterns = Vec::new();
    for (tier, table) in tables {
        for (source_text, description) in table {
            patterns.push(Pattern::compile(
                tier,
                source_text,
                description,
                PatternSource::Builtin,
            )?);
        }
    }
    Ok(patterns)
}
