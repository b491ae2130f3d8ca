//! One run request against the shared runtime.
//!
//! `CodeRunner::execute` never fails: initialization problems, sandboxed
//! errors, timeouts and runaway output all come back as an `ExecutionOutcome`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::sandbox::{Interpreter, OutputChunk, RunJob, SandboxRuntime, Stream};

/// Chunks queued between the interpreter and the runner.
const OUTPUT_BACKLOG: usize = 64;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    None,
    RuntimeError,
    Timeout,
    InitializationFailure,
    /// The run printed more than the runner keeps and was stopped.
    OutputLimit,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub output: String,
    pub stderr: String,
    pub error: Option<String>,
    pub error_kind: ErrorKind,
    pub success: bool,
    pub duration_ms: u64,
    /// `output`/`stderr` were cut at the runner's output limit.
    #[serde(default)]
    pub truncated: bool,
}

impl ExecutionOutcome {
    fn failed(capture: Capture, kind: ErrorKind, error: String, elapsed: Duration) -> Self {
        Self {
            truncated: capture.truncated,
            output: capture.stdout,
            stderr: capture.stderr,
            error: Some(error),
            error_kind: kind,
            success: false,
            duration_ms: elapsed.as_millis() as u64,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ExecutionRequest {
    pub code: String,
    pub stdin: Option<String>,
    /// Overrides the runner's default timeout.
    pub timeout: Option<Duration>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into(), ..Default::default() }
    }
}

/// Output collected for one run, capped at `limit` bytes across both streams.
#[derive(Debug, Default)]
struct Capture {
    stdout: String,
    stderr: String,
    used: usize,
    limit: usize,
    truncated: bool,
}

impl Capture {
    fn new(limit: usize) -> Self {
        Self { limit, ..Default::default() }
    }

    /// Append a chunk. Returns `false` once the limit has been hit.
    fn push(&mut self, chunk: OutputChunk) -> bool {
        if self.truncated {
            return false;
        }
        let room = self.limit - self.used;
        let mut text = chunk.text.as_str();
        if text.len() > room {
            let mut end = room;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text = &text[..end];
            self.truncated = true;
        }
        self.used += text.len();
        match chunk.stream {
            Stream::Stdout => self.stdout.push_str(text),
            Stream::Stderr => self.stderr.push_str(text),
        }
        !self.truncated
    }
}

/// How the race between the run, its output and the clock ended.
enum Ended {
    Finished(Result<Option<String>, SandboxError>),
    TimedOut,
    Overflow,
}

/// Serializes executions on the shared interpreter and enforces the timeout
/// and the output cap.
pub struct CodeRunner {
    runtime: Arc<SandboxRuntime>,
    permit: Semaphore,
    default_timeout: Duration,
    max_output_bytes: usize,
}

impl CodeRunner {
    pub fn new(runtime: Arc<SandboxRuntime>, default_timeout: Duration) -> Self {
        Self {
            runtime,
            permit: Semaphore::new(1),
            default_timeout,
            max_output_bytes: SandboxConfig::default().max_output_bytes,
        }
    }

    pub fn with_output_limit(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    pub fn runtime(&self) -> &Arc<SandboxRuntime> {
        &self.runtime
    }

    #[instrument(level = "info", skip(self, request), fields(run_id = tracing::field::Empty, code_len = request.code.len(), has_stdin = request.stdin.is_some()))]
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        // One execution at a time on the shared instance.
        let _permit = match self.permit.acquire().await {
            Ok(p) => p,
            Err(_) => {
                return ExecutionOutcome::failed(
                    Capture::default(),
                    ErrorKind::InitializationFailure,
                    "execution permits closed".into(),
                    Duration::ZERO,
                )
            }
        };

        let mut retried = false;
        let outcome = loop {
            let interpreter = match self.runtime.ensure_ready().await {
                Ok(i) => i,
                Err(e) => {
                    warn!(target: "sandbox", error = %e, "Run aborted: interpreter unavailable");
                    break ExecutionOutcome::failed(
                        Capture::default(),
                        ErrorKind::InitializationFailure,
                        e.to_string(),
                        Duration::ZERO,
                    );
                }
            };

            let start = Instant::now();
            let (ended, capture) = self.race(interpreter.as_ref(), &request, timeout).await;
            let elapsed = start.elapsed();

            match ended {
                Ended::Finished(Ok(None)) => {
                    break ExecutionOutcome {
                        truncated: capture.truncated,
                        output: capture.stdout,
                        stderr: capture.stderr,
                        error: None,
                        error_kind: ErrorKind::None,
                        success: true,
                        duration_ms: elapsed.as_millis() as u64,
                    }
                }
                Ended::Finished(Ok(Some(trace))) => {
                    break ExecutionOutcome::failed(capture, ErrorKind::RuntimeError, trace, elapsed)
                }
                Ended::Finished(Err(SandboxError::Stale(reason))) if !retried => {
                    // Nothing was executed yet: replace the instance and try once more.
                    warn!(target: "sandbox", %reason, "Interpreter out of step before the run; replacing it");
                    self.runtime.discard(&interpreter).await;
                    retried = true;
                }
                Ended::Finished(Err(SandboxError::OutputLimit(_))) | Ended::Overflow => {
                    self.runtime.discard(&interpreter).await;
                    let mut capture = capture;
                    capture.truncated = true;
                    break ExecutionOutcome::failed(
                        capture,
                        ErrorKind::OutputLimit,
                        format!("Output exceeded {} bytes; the run was stopped", self.max_output_bytes),
                        elapsed,
                    );
                }
                Ended::Finished(Err(e)) => {
                    // The instance itself is broken; start over on the next run.
                    self.runtime.discard(&interpreter).await;
                    break ExecutionOutcome::failed(capture, ErrorKind::RuntimeError, e.to_string(), elapsed);
                }
                Ended::TimedOut => {
                    if interpreter.interruptible() {
                        self.runtime.discard(&interpreter).await;
                    } else {
                        warn!(target: "sandbox", "Interpreter cannot be interrupted; timed-out run may still be executing");
                    }
                    break ExecutionOutcome::failed(
                        capture,
                        ErrorKind::Timeout,
                        format!("Execution timed out after {} ms", timeout.as_millis()),
                        elapsed,
                    );
                }
            }
        };

        info!(
            target: "sandbox",
            success = outcome.success,
            error_kind = ?outcome.error_kind,
            duration_ms = outcome.duration_ms,
            output_len = outcome.output.len(),
            truncated = outcome.truncated,
            "Run finished"
        );
        outcome
    }

    /// Run the job while collecting its output, until it finishes, the clock
    /// runs out or the output cap is hit. Output produced up to that point is
    /// kept on every path.
    async fn race(&self, interpreter: &dyn Interpreter, request: &ExecutionRequest, timeout: Duration) -> (Ended, Capture) {
        let (sink, mut output) = mpsc::channel::<OutputChunk>(OUTPUT_BACKLOG);
        let mut capture = Capture::new(self.max_output_bytes);
        let job = RunJob {
            code: &request.code,
            stdin: request.stdin.as_deref(),
        };

        let ended = {
            let run = interpreter.run(job, sink);
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(run, deadline);
            loop {
                tokio::select! {
                    biased;
                    Some(chunk) = output.recv() => {
                        if !capture.push(chunk) {
                            break Ended::Overflow;
                        }
                    }
                    result = &mut run => break Ended::Finished(result),
                    _ = &mut deadline => break Ended::TimedOut,
                }
            }
        };

        // The run future (and its sender) is gone; take what is still queued.
        if !matches!(ended, Ended::Overflow) {
            while let Ok(chunk) = output.try_recv() {
                if !capture.push(chunk) {
                    return (Ended::Overflow, capture);
                }
            }
        }
        (ended, capture)
    }
}
