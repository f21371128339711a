//! Execution Sandbox
//!
//! Runs one code unit in a dedicated interpreter process under a wall-clock
//! deadline, with scripted input and captured standard streams.

mod capture;
mod worker;

use omniprof_core::{
    ExecutionOutcome, ExecutionRequest, LoadedSource, RequestError, WorkerCommand,
    resolve_interpreter,
};
use omniprof_ipc::{
    ExecutePlan, FrameError, Instruments, RuntimeTelemetry, WireError, WireStatus,
    WorkerCapabilities,
};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;
use worker::{Attempt, AttemptEnd, WorkerHandle};

/// Exception type reported for a worker killed by a signal
pub const WORKER_TERMINATED: &str = "WorkerTerminated";

/// Exception type reported when the driver's final report cannot be decoded
pub const MALFORMED_REPORT: &str = "MalformedWorkerReport";

/// Harness failure while running a code unit
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The request was rejected before a worker started
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The interpreter could not be started
    #[error("Failed to spawn interpreter {}: {source}", .interpreter.display())]
    Spawn {
        /// Interpreter that was launched
        interpreter: PathBuf,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The driver never announced itself
    #[error("Worker handshake failed: {0}")]
    Handshake(String),

    /// The pipe to the driver failed
    #[error("IPC error: {0}")]
    Ipc(#[from] FrameError),

    /// The driver sent a message out of turn
    #[error("Worker protocol error: expected {expected}, got {got}")]
    Protocol {
        /// What the supervisor was waiting for
        expected: String,
        /// What arrived instead
        got: String,
    },

    /// The driver reported an internal failure
    #[error("Driver failure: {0}")]
    Driver(String),

    /// The worker could not be waited for
    #[error("Failed to reap worker: {0}")]
    Wait(#[source] std::io::Error),
}

/// What instrumentation sees of a live worker
#[derive(Debug, Clone)]
pub struct WorkerProbe {
    /// Process id of the interpreter
    pub pid: u32,
    /// Capabilities advertised at handshake
    pub capabilities: WorkerCapabilities,
}

/// Callbacks bracketing the measured execution.
///
/// `before_measured` runs after warm-ups, right before the measured unit is
/// sent, and returns the interpreter-side instruments to arm.
/// `after_measured` runs once the unit finished or was abandoned, while the
/// worker process still exists.
pub trait ExecutionHooks {
    /// Called once the worker is ready for the measured execution
    fn before_measured(&mut self, probe: &WorkerProbe) -> Instruments;

    /// Called once the measured execution ended
    fn after_measured(
        &mut self,
        probe: &WorkerProbe,
        telemetry: Option<&RuntimeTelemetry>,
        elapsed: Duration,
    );
}

/// Hooks that arm nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl ExecutionHooks for NoHooks {
    fn before_measured(&mut self, _probe: &WorkerProbe) -> Instruments {
        Instruments::none()
    }

    fn after_measured(
        &mut self,
        _probe: &WorkerProbe,
        _telemetry: Option<&RuntimeTelemetry>,
        _elapsed: Duration,
    ) {
    }
}

/// Result of a sandboxed run
#[derive(Debug, Clone)]
pub struct SandboxRun {
    /// How the measured execution ended
    pub outcome: ExecutionOutcome,
    /// Capabilities of the worker that ran the measured execution
    pub capabilities: WorkerCapabilities,
}

/// Runs code units in isolated worker processes.
#[derive(Debug, Clone)]
pub struct ExecutionSandbox {
    interpreter: PathBuf,
    abort_grace: Duration,
    max_output_bytes: usize,
    handshake_timeout: Duration,
    output_join_bound: Duration,
}

impl Default for ExecutionSandbox {
    fn default() -> Self {
        Self {
            interpreter: resolve_interpreter(None),
            abort_grace: Duration::from_millis(500),
            max_output_bytes: 8 * 1024 * 1024,
            handshake_timeout: Duration::from_secs(10),
            output_join_bound: Duration::from_millis(250),
        }
    }
}

impl ExecutionSandbox {
    /// Sandbox with the default interpreter and limits
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpreter binary used for workers
    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    /// Time an aborted unit gets to flush telemetry before it is abandoned.
    pub fn with_abort_grace(mut self, grace: Duration) -> Self {
        self.abort_grace = grace;
        self
    }

    /// Per-stream capture limit.
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// How long a fresh worker may take to announce itself
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Interpreter binary used for workers
    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    fn spawn(&self, request: &ExecutionRequest) -> Result<WorkerHandle, SandboxError> {
        let command =
            WorkerCommand::new(&self.interpreter).working_directory(request.working_directory());
        WorkerHandle::spawn(&command, self.max_output_bytes, self.handshake_timeout)
    }

    /// Start a worker, read its capabilities, and shut it down again.
    pub fn probe(&self) -> Result<WorkerCapabilities, SandboxError> {
        let command = WorkerCommand::new(&self.interpreter);
        let worker = WorkerHandle::spawn(&command, self.max_output_bytes, self.handshake_timeout)?;
        let capabilities = worker.capabilities().clone();
        worker.finish(true, self.abort_grace, self.output_join_bound);
        Ok(capabilities)
    }

    /// Execute the request without instrumentation.
    pub fn run(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, SandboxError> {
        self.run_instrumented(request, &mut NoHooks)
            .map(|run| run.outcome)
    }

    /// Execute warm-ups and the measured run, calling `hooks` around the
    /// measured one.
    pub fn run_instrumented(
        &self,
        request: &ExecutionRequest,
        hooks: &mut dyn ExecutionHooks,
    ) -> Result<SandboxRun, SandboxError> {
        let source = request.load()?;
        self.run_loaded(request, &source, hooks)
    }

    /// Like [`run_instrumented`](Self::run_instrumented), executing source
    /// text the caller already loaded. Every execution of the request runs
    /// exactly this text, whatever happens to the file afterwards.
    pub fn run_loaded(
        &self,
        request: &ExecutionRequest,
        source: &LoadedSource,
        hooks: &mut dyn ExecutionHooks,
    ) -> Result<SandboxRun, SandboxError> {
        request.validate()?;
        let timeout = request.timeout();
        let mut worker = self.spawn(request)?;

        let warmups = request.warmup_runs();
        if warmups > 0 {
            tracing::warn!(
                "{}: {} warm-up run(s) requested; side effects of the code will happen {} times",
                source.label,
                warmups,
                warmups + 1
            );
        }
        for run in 1..=warmups {
            let plan = execute_plan(source, request, Instruments::none(), false);
            let mut inputs = request.input_source()?;
            let attempt = worker.execute(plan, &mut inputs, timeout, self.abort_grace)?;
            if attempt.worker_reusable() {
                tracing::debug!("{}: warm-up {}/{} done", source.label, run, warmups);
            } else {
                tracing::debug!(
                    "{}: warm-up {}/{} did not leave a usable worker, respawning",
                    source.label,
                    run,
                    warmups
                );
                worker.finish(false, self.abort_grace, self.output_join_bound);
                worker = self.spawn(request)?;
            }
        }

        let probe = WorkerProbe {
            pid: worker.pid(),
            capabilities: worker.capabilities().clone(),
        };
        let instruments = hooks.before_measured(&probe);
        let plan = execute_plan(source, request, instruments, true);
        let mut inputs = request.input_source()?;
        let attempt = worker.execute(plan, &mut inputs, timeout, self.abort_grace)?;
        hooks.after_measured(&probe, attempt.telemetry(), attempt.elapsed);

        let graceful = attempt.worker_reusable();
        let (stdout, stderr) = worker.finish(graceful, self.abort_grace, self.output_join_bound);
        let outcome = outcome_from_attempt(attempt, timeout, stdout, stderr);
        tracing::debug!(
            "{}: {} in {:?}",
            source.label,
            outcome.status(),
            outcome.duration()
        );

        Ok(SandboxRun {
            outcome,
            capabilities: probe.capabilities,
        })
    }
}

fn execute_plan(
    source: &LoadedSource,
    request: &ExecutionRequest,
    instruments: Instruments,
    measured: bool,
) -> ExecutePlan {
    ExecutePlan {
        source: source.code.clone(),
        filename: source.filename.clone(),
        entry: request.entry().cloned(),
        instruments: Instruments {
            line_trace: instruments.line_trace && request.line_level(),
            ..instruments
        },
        measured,
    }
}

/// Translate what the supervisor observed into an outcome.
fn outcome_from_attempt(
    attempt: Attempt,
    timeout: Duration,
    stdout: String,
    stderr: String,
) -> ExecutionOutcome {
    let elapsed = attempt.elapsed;
    match attempt.end {
        AttemptEnd::TimedOut { .. }
        | AttemptEnd::Finished {
            status: WireStatus::Interrupted,
            ..
        } => ExecutionOutcome::timed_out(timeout, stdout, stderr, elapsed),
        AttemptEnd::Finished {
            status: WireStatus::Completed,
            ..
        } => ExecutionOutcome::completed(stdout, stderr, elapsed),
        AttemptEnd::Finished {
            status: WireStatus::SystemExited,
            error,
            ..
        } => match error {
            Some(WireError::Exit { code, message }) => {
                ExecutionOutcome::exited(code, message, stdout, stderr, elapsed)
            }
            _ => ExecutionOutcome::exited(0, None, stdout, stderr, elapsed),
        },
        AttemptEnd::Finished {
            status: WireStatus::RaisedException,
            error,
            ..
        } => match error {
            Some(WireError::Exception {
                type_name,
                message,
                traceback,
            }) => ExecutionOutcome::raised(type_name, message, traceback, stdout, stderr, elapsed),
            _ => ExecutionOutcome::raised(
                "Exception",
                "exception without detail",
                None,
                stdout,
                stderr,
                elapsed,
            ),
        },
        AttemptEnd::Exited(status) => outcome_from_exit(status, stdout, stderr, elapsed),
        AttemptEnd::Malformed { reason } => ExecutionOutcome::raised(
            MALFORMED_REPORT,
            reason,
            None,
            stdout,
            stderr,
            elapsed,
        ),
    }
}

/// A worker that ended without reporting: an explicit process exit keeps its
/// code, a signal becomes an exception.
fn outcome_from_exit(
    status: ExitStatus,
    stdout: String,
    stderr: String,
    elapsed: Duration,
) -> ExecutionOutcome {
    match (status.code(), status.signal()) {
        (Some(code), _) => ExecutionOutcome::exited(i64::from(code), None, stdout, stderr, elapsed),
        (None, Some(signal)) => ExecutionOutcome::raised(
            WORKER_TERMINATED,
            format!("worker terminated by signal {signal}"),
            None,
            stdout,
            stderr,
            elapsed,
        ),
        (None, None) => ExecutionOutcome::raised(
            WORKER_TERMINATED,
            "worker ended without an exit status",
            None,
            stdout,
            stderr,
            elapsed,
        ),
    }
}
