// crates/slb-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Notary Store
// Description: Durable NotaryStore backed by SQLite WAL.
// Purpose: Persist sessions, requests, and reviews with guarded transitions.
// Dependencies: slb-core, rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements a durable [`NotaryStore`] using `SQLite`. Status
//! transitions are compare-and-swap updates keyed on the expected current
//! status, so concurrent writers racing on the same transition see exactly
//! one winner. Review upserts recount the tally inside the same
//! transaction. Full-text search over redacted commands uses FTS5 when the
//! build provides it and falls back to substring matching otherwise.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use slb_classifier::RiskTier;
use slb_core::CommandSpec;
use slb_core::ExecutionRecord;
use slb_core::Justification;
use slb_core::NotaryStore;
use slb_core::Request;
use slb_core::RequestId;
use slb_core::RequestStatus;
use slb_core::Review;
use slb_core::ReviewDecision;
use slb_core::ReviewTally;
use slb_core::RollbackDescriptor;
use slb_core::Session;
use slb_core::SessionId;
use slb_core::SessionKey;
use slb_core::StoreError;
use slb_core::Timestamp;
use slb_core::TransitionEffects;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` notary store.
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Database file path.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: Option<u64>,
    /// Journal mode.
    pub journal_mode: SqliteJournalMode,
    /// Synchronous mode.
    pub sync_mode: SqliteSyncMode,
    /// Open the database read-only (daemon observers).
    pub read_only: bool,
}

impl SqliteStoreConfig {
    /// Creates a writable configuration with defaults for a path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: None,
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
            read_only: false,
        }
    }

    /// Returns the effective busy timeout.
    #[must_use]
    pub fn busy_timeout_ms(&self) -> u64 {
        self.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store is busy.
    #[error("sqlite store busy: {0}")]
    Busy(String),
    /// Uniqueness constraint violated.
    #[error("sqlite store conflict: {0}")]
    Conflict(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) | SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Busy(message) => Self::Busy(message),
            SqliteStoreError::Conflict(message) => Self::Conflict(message),
            SqliteStoreError::Invalid(message)
            | SqliteStoreError::VersionMismatch(message) => Self::Invalid(message),
        }
    }
}

/// Maps a rusqlite error to a store error, classifying busy and conflict.
fn map_db_error(error: &rusqlite::Error) -> SqliteStoreError {
    if let rusqlite::Error::SqliteFailure(failure, message) = error {
        let text = message.clone().unwrap_or_else(|| failure.to_string());
        return match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => SqliteStoreError::Busy(text),
            ErrorCode::ConstraintViolation => SqliteStoreError::Conflict(text),
            _ => SqliteStoreError::Db(text),
        };
    }
    SqliteStoreError::Db(error.to_string())
}

// ============================================================================
// SECTION: Stored Patterns
// ============================================================================

/// One user-supplied classification pattern persisted in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPattern {
    /// Tier the pattern assigns.
    pub tier: RiskTier,
    /// Regex source text.
    pub regex: String,
    /// Human-readable description.
    pub description: String,
    /// Provenance tag (agent, human, suggested).
    pub source: String,
    /// When the pattern was saved.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed notary store with WAL support.
#[derive(Clone)]
pub struct SqliteNotaryStore {
    /// Shared `SQLite` connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
    /// True when the FTS5 mirror table is available.
    fts_enabled: bool,
}

impl SqliteNotaryStore {
    /// Opens an `SQLite`-backed notary store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        if !config.read_only {
            ensure_parent_dir(&config.path)?;
        }
        let connection = open_connection(config)?;
        let fts_enabled = if config.read_only {
            fts_table_exists(&connection)
        } else {
            initialize_schema(&connection)?
        };
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            fts_enabled,
        })
    }

    /// Locks the connection, mapping poisoning to a store error.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection
            .lock()
            .map_err(|_| SqliteStoreError::Io("store mutex poisoned".to_string()))
    }

    /// Persists a user-supplied classification pattern.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::Conflict`] when the (tier, regex) pair
    /// already exists.
    pub fn save_pattern(&self, pattern: &StoredPattern) -> Result<(), SqliteStoreError> {
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO patterns (tier, regex, description, source, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    pattern.tier.label(),
                    pattern.regex,
                    pattern.description,
                    pattern.source,
                    pattern.created_at.as_unix_millis(),
                ],
            )
            .map_err(|err| map_db_error(&err))?;
        Ok(())
    }

    /// Deletes a persisted pattern, returning whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] on storage failure.
    pub fn delete_pattern(&self, tier: RiskTier, regex: &str) -> Result<bool, SqliteStoreError> {
        let guard = self.lock()?;
        let removed = guard
            .execute(
                "DELETE FROM patterns WHERE tier = ?1 AND regex = ?2",
                params![tier.label(), regex],
            )
            .map_err(|err| map_db_error(&err))?;
        Ok(removed > 0)
    }

    /// Lists persisted patterns in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] on storage failure.
    pub fn list_patterns(&self) -> Result<Vec<StoredPattern>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT tier, regex, description, source, created_at
                 FROM patterns ORDER BY created_at ASC, regex ASC",
            )
            .map_err(|err| map_db_error(&err))?;
        let rows = statement
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .map_err(|err| map_db_error(&err))?;
        let mut patterns = Vec::new();
        for row in rows {
            let (tier, regex, description, source, created_at) =
                row.map_err(|err| map_db_error(&err))?;
            let tier = RiskTier::parse(&tier)
                .ok_or_else(|| SqliteStoreError::Invalid(format!("unknown tier {tier}")))?;
            patterns.push(StoredPattern {
                tier,
                regex,
                description,
                source,
                created_at: Timestamp::from_unix_millis(created_at),
            });
        }
        Ok(patterns)
    }
}

// ============================================================================
// SECTION: Path Validation
// ============================================================================

/// Validates the store path against length and traversal limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path too long".to_string()));
    }
    for component in path.components() {
        if let Component::Normal(part) = component {
            if part.to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
                return Err(SqliteStoreError::Invalid(
                    "store path component too long".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Creates the parent directory of the store path when missing.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|err| SqliteStoreError::Io(err.to_string()))?;
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Connection Setup
// ============================================================================

/// Opens a connection and applies the configured pragmas.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let connection = if config.read_only {
        Connection::open_with_flags(&config.path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|err| map_db_error(&err))?
    } else {
        Connection::open(&config.path).map_err(|err| map_db_error(&err))?
    };
    if !config.read_only {
        let journal: String = connection
            .query_row(
                &format!("PRAGMA journal_mode = {}", config.journal_mode.pragma_value()),
                [],
                |row| row.get(0),
            )
            .map_err(|err| map_db_error(&err))?;
        drop(journal);
        connection
            .execute_batch(&format!(
                "PRAGMA synchronous = {};",
                config.sync_mode.pragma_value()
            ))
            .map_err(|err| map_db_error(&err))?;
    }
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| map_db_error(&err))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms()))
        .map_err(|err| map_db_error(&err))?;
    Ok(connection)
}

/// Creates tables and records the schema version.
///
/// Returns whether the FTS5 mirror is available.
fn initialize_schema(connection: &Connection) -> Result<bool, SqliteStoreError> {
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                agent TEXT NOT NULL,
                program TEXT NOT NULL,
                model TEXT NOT NULL,
                project_path TEXT NOT NULL,
                session_key TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                last_active_at INTEGER NOT NULL,
                ended_at INTEGER,
                rate_limit_reset_at INTEGER
             );
             CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_active
                ON sessions (agent, project_path) WHERE ended_at IS NULL;
             CREATE TABLE IF NOT EXISTS requests (
                id TEXT PRIMARY KEY,
                project_path TEXT NOT NULL,
                requestor_session TEXT NOT NULL REFERENCES sessions (id),
                requestor_agent TEXT NOT NULL,
                requestor_model TEXT NOT NULL,
                command_json TEXT NOT NULL,
                command_hash TEXT NOT NULL,
                display_redacted TEXT NOT NULL,
                tier TEXT NOT NULL,
                justification_json TEXT NOT NULL,
                status TEXT NOT NULL,
                min_approvals INTEGER NOT NULL,
                require_different_model INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                approval_expires_at INTEGER,
                executed_at INTEGER,
                execution_json TEXT,
                rollback_json TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_requests_pending
                ON requests (project_path, status, created_at);
             CREATE TABLE IF NOT EXISTS reviews (
                id TEXT PRIMARY KEY,
                request_id TEXT NOT NULL REFERENCES requests (id),
                reviewer_session TEXT NOT NULL REFERENCES sessions (id),
                reviewer_agent TEXT NOT NULL,
                reviewer_model TEXT NOT NULL,
                decision TEXT NOT NULL,
                comments TEXT NOT NULL,
                signature TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (request_id, reviewer_session)
             );
             CREATE TABLE IF NOT EXISTS patterns (
                tier TEXT NOT NULL,
                regex TEXT NOT NULL,
                description TEXT NOT NULL,
                source TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (tier, regex)
             );",
        )
        .map_err(|err| map_db_error(&err))?;
    let version: Option<String> = connection
        .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| row.get(0))
        .optional()
        .map_err(|err| map_db_error(&err))?;
    match version {
        None => {
            connection
                .execute(
                    "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
                    params![SCHEMA_VERSION.to_string()],
                )
                .map_err(|err| map_db_error(&err))?;
        }
        Some(found) if found == SCHEMA_VERSION.to_string() => {}
        Some(found) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "expected schema {SCHEMA_VERSION}, found {found}"
            )));
        }
    }
    // The FTS mirror is best-effort; builds without FTS5 fall back to
    // substring search.
    let fts = connection.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS requests_fts
            USING fts5 (request_id UNINDEXED, display_redacted);",
    );
    Ok(fts.is_ok())
}

/// Returns whether the FTS mirror table exists (read-only connections).
fn fts_table_exists(connection: &Connection) -> bool {
    connection
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'requests_fts'",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .ok()
        .flatten()
        .is_some()
}

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// Column list shared by request queries.
const REQUEST_COLUMNS: &str = "id, project_path, requestor_session, requestor_agent, \
                               requestor_model, command_json, tier, justification_json, status, \
                               min_approvals, require_different_model, created_at, expires_at, \
                               approval_expires_at, executed_at, execution_json, rollback_json";

/// Raw request row prior to JSON decoding.
struct RequestRow {
    /// Request identifier.
    id: String,
    /// Project path.
    project_path: String,
    /// Requestor session id.
    requestor_session: String,
    /// Requestor agent name.
    requestor_agent: String,
    /// Requestor model identifier.
    requestor_model: String,
    /// Serialized command spec.
    command_json: String,
    /// Tier label.
    tier: String,
    /// Serialized justification.
    justification_json: String,
    /// Status label.
    status: String,
    /// Approval quorum.
    min_approvals: i64,
    /// Different-model flag.
    require_different_model: i64,
    /// Creation time.
    created_at: i64,
    /// Review window close.
    expires_at: i64,
    /// Approval expiry.
    approval_expires_at: Option<i64>,
    /// Execution start time.
    executed_at: Option<i64>,
    /// Serialized execution record.
    execution_json: Option<String>,
    /// Serialized rollback descriptor.
    rollback_json: Option<String>,
}

/// Maps one row of [`REQUEST_COLUMNS`] into a raw request row.
fn read_request_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RequestRow> {
    Ok(RequestRow {
        id: row.get(0)?,
        project_path: row.get(1)?,
        requestor_session: row.get(2)?,
        requestor_agent: row.get(3)?,
        requestor_model: row.get(4)?,
        command_json: row.get(5)?,
        tier: row.get(6)?,
        justification_json: row.get(7)?,
        status: row.get(8)?,
        min_approvals: row.get(9)?,
        require_different_model: row.get(10)?,
        created_at: row.get(11)?,
        expires_at: row.get(12)?,
        approval_expires_at: row.get(13)?,
        executed_at: row.get(14)?,
        execution_json: row.get(15)?,
        rollback_json: row.get(16)?,
    })
}

/// Decodes a raw row into a request, validating labels and JSON.
fn build_request(row: RequestRow) -> Result<Request, SqliteStoreError> {
    let command: CommandSpec = serde_json::from_str(&row.command_json)
        .map_err(|err| SqliteStoreError::Invalid(format!("command json: {err}")))?;
    let justification: Justification = serde_json::from_str(&row.justification_json)
        .map_err(|err| SqliteStoreError::Invalid(format!("justification json: {err}")))?;
    let execution: Option<ExecutionRecord> = row
        .execution_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|err| SqliteStoreError::Invalid(format!("execution json: {err}")))?;
    let rollback: Option<RollbackDescriptor> = row
        .rollback_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|err| SqliteStoreError::Invalid(format!("rollback json: {err}")))?;
    let tier = RiskTier::parse(&row.tier)
        .ok_or_else(|| SqliteStoreError::Invalid(format!("unknown tier {}", row.tier)))?;
    let status = RequestStatus::parse(&row.status)
        .ok_or_else(|| SqliteStoreError::Invalid(format!("unknown status {}", row.status)))?;
    let min_approvals = u32::try_from(row.min_approvals)
        .map_err(|_| SqliteStoreError::Invalid("negative min_approvals".to_string()))?;
    Ok(Request {
        id: RequestId::new(row.id),
        project_path: row.project_path,
        requestor_session: SessionId::new(row.requestor_session),
        requestor_agent: row.requestor_agent,
        requestor_model: row.requestor_model,
        command,
        tier,
        justification,
        status,
        min_approvals,
        require_different_model: row.require_different_model != 0,
        created_at: Timestamp::from_unix_millis(row.created_at),
        expires_at: Timestamp::from_unix_millis(row.expires_at),
        approval_expires_at: row.approval_expires_at.map(Timestamp::from_unix_millis),
        executed_at: row.executed_at.map(Timestamp::from_unix_millis),
        execution,
        rollback,
    })
}

/// Maps one session row into a session record.
fn read_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: SessionId::new(row.get::<_, String>(0)?),
        agent: row.get(1)?,
        program: row.get(2)?,
        model: row.get(3)?,
        project_path: row.get(4)?,
        session_key: SessionKey::new(row.get::<_, String>(5)?),
        started_at: Timestamp::from_unix_millis(row.get(6)?),
        last_active_at: Timestamp::from_unix_millis(row.get(7)?),
        ended_at: row.get::<_, Option<i64>>(8)?.map(Timestamp::from_unix_millis),
        rate_limit_reset_at: row.get::<_, Option<i64>>(9)?.map(Timestamp::from_unix_millis),
    })
}

/// Column list shared by session queries.
const SESSION_COLUMNS: &str = "id, agent, program, model, project_path, session_key, \
                               started_at, last_active_at, ended_at, rate_limit_reset_at";

/// Maps one review row into a review record.
fn read_review_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Review, String)> {
    let decision: String = row.get(5)?;
    let review = Review {
        id: slb_core::ReviewId::new(row.get::<_, String>(0)?),
        request_id: RequestId::new(row.get::<_, String>(1)?),
        reviewer_session: SessionId::new(row.get::<_, String>(2)?),
        reviewer_agent: row.get(3)?,
        reviewer_model: row.get(4)?,
        decision: ReviewDecision::Approve,
        comments: row.get(6)?,
        signature: row.get(7)?,
        created_at: Timestamp::from_unix_millis(row.get(8)?),
    };
    Ok((review, decision))
}

/// Recounts the active review tally inside a transaction.
fn tally_in_tx(tx: &Transaction<'_>, request_id: &RequestId) -> Result<ReviewTally, SqliteStoreError> {
    let (approvals, rejections): (i64, i64) = tx
        .query_row(
            "SELECT
                COUNT(CASE WHEN decision = 'approve' THEN 1 END),
                COUNT(CASE WHEN decision = 'reject' THEN 1 END)
             FROM reviews WHERE request_id = ?1",
            params![request_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|err| map_db_error(&err))?;
    Ok(ReviewTally {
        approvals: u32::try_from(approvals).unwrap_or(0),
        rejections: u32::try_from(rejections).unwrap_or(0),
    })
}

// ============================================================================
// SECTION: NotaryStore Implementation
// ============================================================================

impl NotaryStore for SqliteNotaryStore {
    fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let result = guard.execute(
            "INSERT INTO sessions (id, agent, program, model, project_path, session_key,
                                   started_at, last_active_at, ended_at, rate_limit_reset_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, NULL)",
            params![
                session.id.as_str(),
                session.agent,
                session.program,
                session.model,
                session.project_path,
                session.session_key.as_str(),
                session.started_at.as_unix_millis(),
                session.last_active_at.as_unix_millis(),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(err) => match map_db_error(&err) {
                SqliteStoreError::Conflict(_) => Err(StoreError::Conflict(format!(
                    "active session already exists for agent {} in {}",
                    session.agent, session.project_path
                ))),
                other => Err(StoreError::from(other)),
            },
        }
    }

    fn get_session(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        guard
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id.as_str()],
                read_session_row,
            )
            .optional()
            .map_err(|err| StoreError::from(map_db_error(&err)))
    }

    fn find_active_session(
        &self,
        agent: &str,
        project_path: &str,
    ) -> Result<Option<Session>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        guard
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE agent = ?1 AND project_path = ?2 AND ended_at IS NULL"
                ),
                params![agent, project_path],
                read_session_row,
            )
            .optional()
            .map_err(|err| StoreError::from(map_db_error(&err)))
    }

    fn list_active_sessions(&self, project_path: &str) -> Result<Vec<Session>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let mut statement = guard
            .prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE project_path = ?1 AND ended_at IS NULL
                 ORDER BY started_at ASC"
            ))
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        let rows = statement
            .query_map(params![project_path], read_session_row)
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row.map_err(|err| StoreError::from(map_db_error(&err)))?);
        }
        Ok(sessions)
    }

    fn touch_session(&self, id: &SessionId, at: Timestamp) -> Result<(), StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let changed = guard
            .execute(
                "UPDATE sessions SET last_active_at = ?2 WHERE id = ?1",
                params![id.as_str(), at.as_unix_millis()],
            )
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("session {id}")));
        }
        Ok(())
    }

    fn end_session(&self, id: &SessionId, at: Timestamp) -> Result<(), StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let changed = guard
            .execute(
                "UPDATE sessions SET ended_at = ?2 WHERE id = ?1 AND ended_at IS NULL",
                params![id.as_str(), at.as_unix_millis()],
            )
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        if changed == 0 {
            let exists: Option<String> = guard
                .query_row(
                    "SELECT id FROM sessions WHERE id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|err| StoreError::from(map_db_error(&err)))?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
        }
        Ok(())
    }

    fn find_stale_sessions(
        &self,
        now: Timestamp,
        threshold_secs: u64,
    ) -> Result<Vec<Session>, StoreError> {
        let cutoff = now.sub_secs(threshold_secs);
        let guard = self.lock().map_err(StoreError::from)?;
        let mut statement = guard
            .prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE ended_at IS NULL AND last_active_at < ?1
                 ORDER BY last_active_at ASC"
            ))
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        let rows = statement
            .query_map(params![cutoff.as_unix_millis()], read_session_row)
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row.map_err(|err| StoreError::from(map_db_error(&err)))?);
        }
        Ok(sessions)
    }

    fn insert_request(&self, request: &Request) -> Result<(), StoreError> {
        let command_json = serde_json::to_string(&request.command)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let justification_json = serde_json::to_string(&request.justification)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let mut guard = self.lock().map_err(StoreError::from)?;
        let tx = guard
            .transaction()
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        tx.execute(
            "INSERT INTO requests (id, project_path, requestor_session, requestor_agent,
                                   requestor_model, command_json, command_hash,
                                   display_redacted, tier, justification_json, status,
                                   min_approvals, require_different_model, created_at,
                                   expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                request.id.as_str(),
                request.project_path,
                request.requestor_session.as_str(),
                request.requestor_agent,
                request.requestor_model,
                command_json,
                request.command.hash,
                request.command.display_redacted,
                request.tier.label(),
                justification_json,
                request.status.label(),
                request.min_approvals,
                i64::from(request.require_different_model),
                request.created_at.as_unix_millis(),
                request.expires_at.as_unix_millis(),
            ],
        )
        .map_err(|err| StoreError::from(map_db_error(&err)))?;
        if self.fts_enabled {
            // Best-effort mirror; search degrades to LIKE on failure.
            let _ = tx.execute(
                "INSERT INTO requests_fts (request_id, display_redacted) VALUES (?1, ?2)",
                params![request.id.as_str(), request.command.display_redacted],
            );
        }
        tx.commit().map_err(|err| StoreError::from(map_db_error(&err)))
    }

    fn get_request(&self, id: &RequestId) -> Result<Option<Request>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let row = guard
            .query_row(
                &format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?1"),
                params![id.as_str()],
                read_request_row,
            )
            .optional()
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        drop(guard);
        row.map(|raw| build_request(raw).map_err(StoreError::from)).transpose()
    }

    fn list_pending_requests(&self, project_path: &str) -> Result<Vec<Request>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let mut statement = guard
            .prepare(&format!(
                "SELECT {REQUEST_COLUMNS} FROM requests
                 WHERE project_path = ?1 AND status = 'pending'
                 ORDER BY created_at ASC"
            ))
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        let rows = statement
            .query_map(params![project_path], read_request_row)
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        let mut requests = Vec::new();
        for row in rows {
            let raw = row.map_err(|err| StoreError::from(map_db_error(&err)))?;
            requests.push(build_request(raw).map_err(StoreError::from)?);
        }
        Ok(requests)
    }

    fn find_expired_requests(&self, now: Timestamp) -> Result<Vec<Request>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let mut statement = guard
            .prepare(&format!(
                "SELECT {REQUEST_COLUMNS} FROM requests
                 WHERE status = 'pending' AND expires_at <= ?1
                 ORDER BY expires_at ASC"
            ))
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        let rows = statement
            .query_map(params![now.as_unix_millis()], read_request_row)
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        let mut requests = Vec::new();
        for row in rows {
            let raw = row.map_err(|err| StoreError::from(map_db_error(&err)))?;
            requests.push(build_request(raw).map_err(StoreError::from)?);
        }
        Ok(requests)
    }

    fn transition_request(
        &self,
        id: &RequestId,
        from: RequestStatus,
        to: RequestStatus,
        effects: &TransitionEffects,
    ) -> Result<(), StoreError> {
        if !RequestStatus::can_transition(from, to) {
            return Err(StoreError::InvalidTransition(format!(
                "{} -> {} is not a legal transition",
                from.label(),
                to.label()
            )));
        }
        let execution_json = effects
            .execution
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let guard = self.lock().map_err(StoreError::from)?;
        let changed = guard
            .execute(
                "UPDATE requests SET
                    status = ?3,
                    approval_expires_at = COALESCE(?4, approval_expires_at),
                    executed_at = COALESCE(?5, executed_at),
                    execution_json = COALESCE(?6, execution_json)
                 WHERE id = ?1 AND status = ?2",
                params![
                    id.as_str(),
                    from.label(),
                    to.label(),
                    effects.approval_expires_at.map(Timestamp::as_unix_millis),
                    effects.executed_at.map(Timestamp::as_unix_millis),
                    execution_json,
                ],
            )
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        if changed == 1 {
            return Ok(());
        }
        let current: Option<String> = guard
            .query_row(
                "SELECT status FROM requests WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        match current {
            None => Err(StoreError::NotFound(format!("request {id}"))),
            Some(status) => Err(StoreError::InvalidTransition(format!(
                "request {id} is {status} not {}",
                from.label()
            ))),
        }
    }

    fn record_execution(
        &self,
        id: &RequestId,
        execution: &ExecutionRecord,
    ) -> Result<(), StoreError> {
        let execution_json = serde_json::to_string(execution)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let guard = self.lock().map_err(StoreError::from)?;
        let changed = guard
            .execute(
                "UPDATE requests SET execution_json = ?2 WHERE id = ?1",
                params![id.as_str(), execution_json],
            )
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("request {id}")));
        }
        Ok(())
    }

    fn set_rollback(
        &self,
        id: &RequestId,
        rollback: &RollbackDescriptor,
    ) -> Result<(), StoreError> {
        let rollback_json = serde_json::to_string(rollback)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let guard = self.lock().map_err(StoreError::from)?;
        let changed = guard
            .execute(
                "UPDATE requests SET rollback_json = ?2 WHERE id = ?1",
                params![id.as_str(), rollback_json],
            )
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("request {id}")));
        }
        Ok(())
    }

    fn upsert_review(&self, review: &Review) -> Result<ReviewTally, StoreError> {
        let mut guard = self.lock().map_err(StoreError::from)?;
        let tx = guard
            .transaction()
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        let request_exists: Option<String> = tx
            .query_row(
                "SELECT id FROM requests WHERE id = ?1",
                params![review.request_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        if request_exists.is_none() {
            return Err(StoreError::NotFound(format!("request {}", review.request_id)));
        }
        tx.execute(
            "INSERT INTO reviews (id, request_id, reviewer_session, reviewer_agent,
                                  reviewer_model, decision, comments, signature, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (request_id, reviewer_session) DO UPDATE SET
                id = excluded.id,
                reviewer_agent = excluded.reviewer_agent,
                reviewer_model = excluded.reviewer_model,
                decision = excluded.decision,
                comments = excluded.comments,
                signature = excluded.signature,
                created_at = excluded.created_at",
            params![
                review.id.as_str(),
                review.request_id.as_str(),
                review.reviewer_session.as_str(),
                review.reviewer_agent,
                review.reviewer_model,
                review.decision.label(),
                review.comments,
                review.signature,
                review.created_at.as_unix_millis(),
            ],
        )
        .map_err(|err| StoreError::from(map_db_error(&err)))?;
        let tally = tally_in_tx(&tx, &review.request_id).map_err(StoreError::from)?;
        tx.commit().map_err(|err| StoreError::from(map_db_error(&err)))?;
        Ok(tally)
    }

    fn list_reviews(&self, request_id: &RequestId) -> Result<Vec<Review>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let mut statement = guard
            .prepare(
                "SELECT id, request_id, reviewer_session, reviewer_agent, reviewer_model,
                        decision, comments, signature, created_at
                 FROM reviews WHERE request_id = ?1 ORDER BY created_at ASC",
            )
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        let rows = statement
            .query_map(params![request_id.as_str()], read_review_row)
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        let mut reviews = Vec::new();
        for row in rows {
            let (mut review, decision) =
                row.map_err(|err| StoreError::from(map_db_error(&err)))?;
            review.decision = ReviewDecision::parse(&decision)
                .ok_or_else(|| StoreError::Invalid(format!("unknown decision {decision}")))?;
            reviews.push(review);
        }
        Ok(reviews)
    }

    fn review_tally(&self, request_id: &RequestId) -> Result<ReviewTally, StoreError> {
        let mut guard = self.lock().map_err(StoreError::from)?;
        let tx = guard
            .transaction()
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        let tally = tally_in_tx(&tx, request_id).map_err(StoreError::from)?;
        tx.commit().map_err(|err| StoreError::from(map_db_error(&err)))?;
        Ok(tally)
    }

    fn count_pending_for_session(&self, session: &SessionId) -> Result<u32, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let count: i64 = guard
            .query_row(
                "SELECT COUNT(*) FROM requests
                 WHERE requestor_session = ?1 AND status = 'pending'",
                params![session.as_str()],
                |row| row.get(0),
            )
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    fn count_requests_since(
        &self,
        session: &SessionId,
        since: Timestamp,
    ) -> Result<u32, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let count: i64 = guard
            .query_row(
                "SELECT COUNT(*) FROM requests
                 WHERE requestor_session = ?1 AND created_at >= ?2",
                params![session.as_str(), since.as_unix_millis()],
                |row| row.get(0),
            )
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    fn find_recent_preapproved(
        &self,
        project_path: &str,
        session: &SessionId,
        display_redacted: &str,
        since: Timestamp,
    ) -> Result<Option<Request>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let row = guard
            .query_row(
                &format!(
                    "SELECT {REQUEST_COLUMNS} FROM requests
                     WHERE project_path = ?1 AND requestor_session = ?2
                       AND display_redacted = ?3 AND created_at >= ?4
                       AND status IN ('approved', 'executed')
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![
                    project_path,
                    session.as_str(),
                    display_redacted,
                    since.as_unix_millis()
                ],
                read_request_row,
            )
            .optional()
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        drop(guard);
        row.map(|raw| build_request(raw).map_err(StoreError::from)).transpose()
    }

    fn search_requests(
        &self,
        project_path: &str,
        query: &str,
    ) -> Result<Vec<Request>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        if self.fts_enabled {
            let fts_result = search_with_fts(&guard, project_path, query);
            if let Ok(requests) = fts_result {
                return Ok(requests);
            }
        }
        let mut statement = guard
            .prepare(&format!(
                "SELECT {REQUEST_COLUMNS} FROM requests
                 WHERE project_path = ?1 AND display_redacted LIKE ?2
                 ORDER BY created_at DESC"
            ))
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        let needle = format!("%{}%", query.replace('%', ""));
        let rows = statement
            .query_map(params![project_path, needle], read_request_row)
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        let mut requests = Vec::new();
        for row in rows {
            let raw = row.map_err(|err| StoreError::from(map_db_error(&err)))?;
            requests.push(build_request(raw).map_err(StoreError::from)?);
        }
        Ok(requests)
    }
}

/// FTS-backed search path; errors fall back to substring search.
fn search_with_fts(
    connection: &Connection,
    project_path: &str,
    query: &str,
) -> Result<Vec<Request>, SqliteStoreError> {
    let mut statement = connection
        .prepare(&format!(
            "SELECT {columns} FROM requests
             WHERE project_path = ?1 AND id IN (
                SELECT request_id FROM requests_fts WHERE requests_fts MATCH ?2
             )
             ORDER BY created_at DESC",
            columns = REQUEST_COLUMNS
        ))
        .map_err(|err| map_db_error(&err))?;
    let rows = statement
        .query_map(params![project_path, query], read_request_row)
        .map_err(|err| map_db_error(&err))?;
    let mut requests = Vec::new();
    for row in rows {
        let raw = row.map_err(|err| map_db_error(&err))?;
        requests.push(build_request(raw)?);
    }
    Ok(requests)
}
