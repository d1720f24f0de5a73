// crates/slb-exec/src/executor.rs
// ============================================================================
// Module: Verified Executor
// Description: Claims approved requests and runs them with output tee.
// Purpose: Enforce first-executor-wins and record terminal outcomes.
// Dependencies: slb-core, slb-classifier, tokio, crate::{logfile, rollback}
// ============================================================================

//! ## Overview
//! Execution re-runs the verification gates, captures rollback state when
//! configured, then claims `Approved → Executing` with the store's
//! compare-and-swap so concurrent executors see exactly one winner. The
//! child inherits the process environment and the controlling terminal's
//! stdin; stdout and stderr are teed to an in-memory buffer, the transcript
//! file, and optionally the caller's stdout. Deadlines and cancellation
//! terminate the child with a grace period before the hard kill.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use slb_classifier::PatternEngine;
use slb_core::CommandSpec;
use slb_core::ExecutionRecord;
use slb_core::NotaryStore;
use slb_core::Request;
use slb_core::RequestId;
use slb_core::RequestNotifier;
use slb_core::RequestStatus;
use slb_core::SessionId;
use slb_core::SessionKey;
use slb_core::SharedNotaryStore;
use slb_core::StoreError;
use slb_core::Timestamp;
use slb_core::TransitionEffects;
use slb_core::VerifyError;
use slb_core::verify_execution_allowed;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::process::Command;
use tokio::sync::watch;

use crate::logfile::TranscriptFile;
use crate::rollback::RollbackError;
use crate::rollback::capture_rollback;
use crate::rollback::plan_rollback;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Grace period between the polite terminate and the hard kill.
const KILL_GRACE: Duration = Duration::from_millis(500);
/// Read chunk size for the output tee.
const TEE_CHUNK_BYTES: usize = 8 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the executor before a terminal status is recorded.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Session key did not match or the session has ended.
    #[error("authentication failed")]
    Auth,
    /// A verification gate refused the execution.
    #[error(transparent)]
    Verify(#[from] VerifyError),
    /// Rollback capture failed; the command did not run.
    #[error(transparent)]
    Rollback(#[from] RollbackError),
    /// Transcript or filesystem failure.
    #[error("execution io error: {0}")]
    Io(String),
    /// The execution was cancelled before the child started.
    #[error("execution cancelled before start")]
    Cancelled,
    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Options and Outcome
// ============================================================================

/// Per-call execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Mirror child output to the caller's stdout.
    pub echo_output: bool,
    /// Execution deadline in seconds, unset for no deadline.
    pub timeout_secs: Option<u64>,
    /// Cancellation signal; flips to true to cancel.
    pub cancel: Option<watch::Receiver<bool>>,
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Terminal request status.
    pub status: RequestStatus,
    /// Child exit code, unset for spawn failures and timeouts.
    pub exit_code: Option<i32>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Transcript path.
    pub log_path: PathBuf,
    /// Captured stdout and stderr, interleaved.
    pub output: Vec<u8>,
}

/// Executor configuration derived from host configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Directory receiving execution transcripts.
    pub log_dir: PathBuf,
    /// Directory receiving per-request rollback artifacts.
    pub rollback_dir: PathBuf,
    /// Whether rollback capture runs before destructive commands.
    pub capture_rollback: bool,
    /// Rollback capture budget in bytes.
    pub max_rollback_bytes: u64,
}

// ============================================================================
// SECTION: Output Tee
// ============================================================================

/// Shared sink receiving child output from both stream readers.
struct TeeSink {
    /// Open transcript file.
    transcript: TranscriptFile,
    /// In-memory copy of the interleaved output.
    buffer: Vec<u8>,
    /// Mirror chunks to the caller's stdout.
    echo: bool,
}

impl TeeSink {
    /// Appends one chunk to every destination.
    fn write_chunk(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
        let _ = self.transcript.write_output(chunk);
        if self.echo {
            use std::io::Write;
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(chunk);
            let _ = stdout.flush();
        }
    }
}

/// Drains one child stream into the shared sink.
async fn drain_stream(
    mut stream: impl AsyncReadExt + Unpin,
    sink: Arc<Mutex<TeeSink>>,
) {
    let mut chunk = [0u8; TEE_CHUNK_BYTES];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(read) => {
                if let Ok(mut guard) = sink.lock() {
                    guard.write_chunk(&chunk[.. read]);
                }
            }
        }
    }
}

// ============================================================================
// SECTION: Executor
// ============================================================================

/// How the child process finished waiting.
enum WaitOutcome {
    /// Child exited on its own.
    Exited(Option<i32>),
    /// Deadline elapsed; the child was killed.
    DeadlineExceeded,
    /// Cancellation fired; the child was killed.
    Cancelled,
}

/// Runs approved requests under the verification gates.
pub struct Executor {
    /// Durable notary state.
    store: SharedNotaryStore,
    /// Classifier used for execution-time re-validation.
    classifier: Arc<PatternEngine>,
    /// Lifecycle hook sink.
    notifier: Arc<dyn RequestNotifier>,
    /// Executor configuration.
    config: ExecutorConfig,
}

impl Executor {
    /// Creates an executor.
    #[must_use]
    pub fn new(
        store: SharedNotaryStore,
        classifier: Arc<PatternEngine>,
        notifier: Arc<dyn RequestNotifier>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            classifier,
            notifier,
            config,
        }
    }

    /// Executes an approved request as the given session.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError`] when authentication, verification, rollback
    /// capture, or the executing claim fails; spawn and wait failures are
    /// recorded as terminal statuses in the returned outcome instead.
    pub async fn execute(
        &self,
        request_id: &RequestId,
        session_id: &SessionId,
        session_key: &SessionKey,
        options: ExecuteOptions,
    ) -> Result<ExecutionOutcome, ExecError> {
        let session = self
            .store
            .get_session(session_id)?
            .filter(|session| session.is_active() && session.session_key.matches(session_key))
            .ok_or(ExecError::Auth)?;
        let now = Timestamp::now();
        let verified =
            verify_execution_allowed(self.store.as_dyn(), &self.classifier, request_id, now)?;
        let request = verified.request;

        let mut transcript = TranscriptFile::create(&self.config.log_dir, &request.id, now)
            .map_err(|err| ExecError::Io(format!("transcript create failed: {err}")))?;
        transcript
            .write_header(&request.command, now)
            .map_err(|err| ExecError::Io(format!("transcript header failed: {err}")))?;
        let log_path = transcript.path().to_path_buf();

        let rollback_path = self.capture_rollback_if_needed(&request, now)?;

        let execution = ExecutionRecord {
            executed_at: now,
            executed_by: session.id.clone(),
            executor_agent: session.agent.clone(),
            executor_model: session.model.clone(),
            exit_code: None,
            duration_ms: None,
            log_path: log_path.to_string_lossy().into_owned(),
            rollback_path: rollback_path.clone(),
        };
        let claim = self.store.transition_request(
            &request.id,
            RequestStatus::Approved,
            RequestStatus::Executing,
            &TransitionEffects {
                executed_at: Some(now),
                execution: Some(execution.clone()),
                ..TransitionEffects::default()
            },
        );
        if let Err(err) = claim {
            return Err(match err {
                StoreError::InvalidTransition(_) => {
                    ExecError::Verify(VerifyError::AlreadyExecuting)
                }
                other => ExecError::Store(other),
            });
        }

        // A cancellation that lands before the spawn reverts the claim; the
        // approval is still valid because the TTL gate just passed.
        if let Some(cancel) = &options.cancel {
            if *cancel.borrow() {
                self.revert_claim(&request, now)?;
                return Err(ExecError::Cancelled);
            }
        }

        self.run_child(&request, execution, transcript, log_path, options).await
    }

    /// Captures rollback state when configured and not already captured.
    fn capture_rollback_if_needed(
        &self,
        request: &Request,
        now: Timestamp,
    ) -> Result<Option<String>, ExecError> {
        if let Some(existing) = &request.rollback {
            return Ok(Some(existing.base_dir.clone()));
        }
        if !self.config.capture_rollback {
            return Ok(None);
        }
        let Some(plan) = plan_rollback(&request.command) else {
            return Ok(None);
        };
        let base_dir = self.config.rollback_dir.join(request.id.as_str());
        let descriptor = capture_rollback(
            &plan,
            &request.command,
            &base_dir,
            self.config.max_rollback_bytes,
            now,
        )?;
        self.store.set_rollback(&request.id, &descriptor)?;
        Ok(Some(descriptor.base_dir))
    }

    /// Reverts an executing claim whose child never started.
    fn revert_claim(&self, request: &Request, now: Timestamp) -> Result<(), ExecError> {
        let still_valid =
            request.approval_expires_at.is_some_and(|expires| expires > now);
        let target = if still_valid { RequestStatus::Approved } else { RequestStatus::TimedOut };
        self.store
            .transition_request(
                &request.id,
                RequestStatus::Executing,
                target,
                &TransitionEffects::default(),
            )
            .map_err(ExecError::Store)
    }

    /// Spawns the child, tees output, and records the terminal status.
    async fn run_child(
        &self,
        request: &Request,
        mut execution: ExecutionRecord,
        transcript: TranscriptFile,
        log_path: PathBuf,
        options: ExecuteOptions,
    ) -> Result<ExecutionOutcome, ExecError> {
        let started = Instant::now();
        let spawned = build_command(&request.command).spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(err) => {
                let duration_ms = elapsed_ms(started);
                return self.finish(
                    request,
                    &mut execution,
                    Arc::new(Mutex::new(TeeSink {
                        transcript,
                        buffer: format!("spawn failed: {err}\n").into_bytes(),
                        echo: false,
                    })),
                    RequestStatus::ExecutionFailed,
                    None,
                    duration_ms,
                    log_path,
                );
            }
        };

        let sink = Arc::new(Mutex::new(TeeSink {
            transcript,
            buffer: Vec::new(),
            echo: options.echo_output,
        }));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(drain_stream(stdout, Arc::clone(&sink))));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(drain_stream(stderr, Arc::clone(&sink))));
        }

        let wait = wait_for_child(&mut child, &options).await;
        for reader in readers {
            let _ = reader.await;
        }
        let duration_ms = elapsed_ms(started);
        let (status, exit_code) = match wait {
            WaitOutcome::Exited(Some(0)) => (RequestStatus::Executed, Some(0)),
            WaitOutcome::Exited(code) => (RequestStatus::ExecutionFailed, code),
            WaitOutcome::DeadlineExceeded => (RequestStatus::TimedOut, None),
            WaitOutcome::Cancelled => (RequestStatus::ExecutionFailed, None),
        };
        self.finish(request, &mut execution, sink, status, exit_code, duration_ms, log_path)
    }

    /// Writes the footer, persists the terminal status, and notifies.
    #[allow(
        clippy::too_many_arguments,
        reason = "Terminal bookkeeping needs the full execution context."
    )]
    fn finish(
        &self,
        request: &Request,
        execution: &mut ExecutionRecord,
        sink: Arc<Mutex<TeeSink>>,
        status: RequestStatus,
        exit_code: Option<i32>,
        duration_ms: u64,
        log_path: PathBuf,
    ) -> Result<ExecutionOutcome, ExecError> {
        let finished_at = Timestamp::now();
        let output = sink.lock().map_or_else(
            |_| Vec::new(),
            |mut guard| {
                let _ = guard.transcript.write_footer(exit_code, duration_ms, finished_at);
                std::mem::take(&mut guard.buffer)
            },
        );
        execution.exit_code = exit_code;
        execution.duration_ms = Some(duration_ms);
        self.store.record_execution(&request.id, execution)?;
        self.store.transition_request(
            &request.id,
            RequestStatus::Executing,
            status,
            &TransitionEffects::default(),
        )?;
        if let Ok(Some(updated)) = self.store.get_request(&request.id) {
            self.notifier.on_executed(&updated);
        }
        Ok(ExecutionOutcome {
            status,
            exit_code,
            duration_ms,
            log_path,
            output,
        })
    }
}

// ============================================================================
// SECTION: Child Process Helpers
// ============================================================================

/// Builds the child command per the spec's invocation mode.
fn build_command(spec: &CommandSpec) -> Command {
    let mut command = if spec.shell {
        let mut shell = Command::new("/bin/sh");
        shell.arg("-c").arg(&spec.raw);
        shell
    } else if let Some(argv) = spec.argv.as_ref().filter(|argv| !argv.is_empty()) {
        let mut direct = Command::new(&argv[0]);
        direct.args(&argv[1 ..]);
        direct
    } else {
        let mut parts = spec.raw.split_whitespace();
        let program = parts.next().unwrap_or("");
        let mut direct = Command::new(program);
        direct.args(parts);
        direct
    };
    command
        .current_dir(&spec.cwd)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    command
}

/// Waits for the child under the deadline and cancellation signals.
async fn wait_for_child(child: &mut Child, options: &ExecuteOptions) -> WaitOutcome {
    let deadline = options
        .timeout_secs
        .map_or(Duration::from_secs(u64::MAX / 4), Duration::from_secs);
    let mut cancel = options.cancel.clone();
    let cancelled = async {
        match cancel.as_mut() {
            Some(receiver) => {
                loop {
                    if *receiver.borrow() {
                        break;
                    }
                    if receiver.changed().await.is_err() {
                        // Sender dropped without cancelling; wait forever.
                        std::future::pending::<()>().await;
                    }
                }
            }
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        status = child.wait() => {
            WaitOutcome::Exited(status.ok().and_then(|status| status.code()))
        }
        () = tokio::time::sleep(deadline) => {
            terminate_child(child).await;
            WaitOutcome::DeadlineExceeded
        }
        () = cancelled => {
            terminate_child(child).await;
            WaitOutcome::Cancelled
        }
    }
}

/// Politely terminates the child, then hard-kills after the grace period.
async fn terminate_child(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = Command::new("kill").arg("-TERM").arg(pid.to_string()).status().await;
        if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.kill().await;
}

/// Elapsed wall-clock milliseconds since `started`.
fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
