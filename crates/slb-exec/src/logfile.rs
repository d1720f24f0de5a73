// crates/slb-exec/src/logfile.rs
// ============================================================================
// Module: Execution Transcripts
// Description: Owner-only transcript files with header and footer blocks.
// Purpose: Record what ran, where, and how it exited.
// Dependencies: slb-core
// ============================================================================

//! ## Overview
//! Each execution writes one transcript under the log directory, named
//! `<YYYYmmdd-HHMMSS>_<id[:8]>.log` and created with mode 0600. The header
//! records the command, working directory, shell flag, and sealed hash; the
//! footer records the exit code and duration.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use slb_core::CommandSpec;
use slb_core::RequestId;
use slb_core::Timestamp;

// ============================================================================
// SECTION: Transcript File
// ============================================================================

/// One open execution transcript.
#[derive(Debug)]
pub struct TranscriptFile {
    /// Transcript path.
    path: PathBuf,
    /// Open file handle.
    file: File,
}

impl TranscriptFile {
    /// Creates the transcript under `log_dir` with mode 0600.
    ///
    /// # Errors
    ///
    /// Returns [`io::Error`] when the directory or file cannot be created.
    pub fn create(
        log_dir: &Path,
        request_id: &RequestId,
        started_at: Timestamp,
    ) -> io::Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let name = format!("{}_{}.log", format_stamp(started_at), request_id.short());
        let path = log_dir.join(name);
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(&path)?;
        Ok(Self {
            path,
            file,
        })
    }

    /// Returns the transcript path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the header block before the command starts.
    ///
    /// # Errors
    ///
    /// Returns [`io::Error`] on write failure.
    pub fn write_header(
        &mut self,
        command: &CommandSpec,
        started_at: Timestamp,
    ) -> io::Result<()> {
        writeln!(self.file, "=== execution start ===")?;
        writeln!(self.file, "time_unix_ms: {}", started_at.as_unix_millis())?;
        writeln!(self.file, "command: {}", command.raw)?;
        writeln!(self.file, "cwd: {}", command.cwd)?;
        writeln!(self.file, "shell: {}", command.shell)?;
        writeln!(self.file, "hash: {}", command.hash)?;
        writeln!(self.file, "=== output ===")?;
        self.file.flush()
    }

    /// Appends captured output bytes.
    ///
    /// # Errors
    ///
    /// Returns [`io::Error`] on write failure.
    pub fn write_output(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk)
    }

    /// Writes the footer block after the command finishes.
    ///
    /// # Errors
    ///
    /// Returns [`io::Error`] on write failure.
    pub fn write_footer(
        &mut self,
        exit_code: Option<i32>,
        duration_ms: u64,
        finished_at: Timestamp,
    ) -> io::Result<()> {
        writeln!(self.file, "=== execution end ===")?;
        writeln!(self.file, "time_unix_ms: {}", finished_at.as_unix_millis())?;
        match exit_code {
            Some(code) => writeln!(self.file, "exit_code: {code}")?,
            None => writeln!(self.file, "exit_code: none")?,
        }
        writeln!(self.file, "duration_ms: {duration_ms}")?;
        self.file.flush()
    }
}

// ============================================================================
// SECTION: Timestamp Formatting
// ============================================================================

/// Formats a timestamp as `YYYYmmdd-HHMMSS` in UTC.
#[must_use]
pub fn format_stamp(at: Timestamp) -> String {
    let secs = at.as_unix_secs();
    let days = secs.div_euclid(86_400);
    let seconds_of_day = secs.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    let hour = seconds_of_day / 3_600;
    let minute = (seconds_of_day % 3_600) / 60;
    let second = seconds_of_day % 60;
    format!("{year:04}{month:02}{day:02}-{hour:02}{minute:02}{second:02}")
}

/// Converts days since the unix epoch to a (year, month, day) civil date.
///
/// Uses the proleptic Gregorian calendar; valid across the full range the
/// notary stores.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { year + 1 } else { year };
    (
        year,
        u32::try_from(month).unwrap_or(1),
        u32::try_from(day).unwrap_or(1),
    )
}

// ============================================================================
// SECTION: Tests
// ============================================================================
