//! Worker process handle.
//!
//! One interpreter process per request, spoken to over fd 3/4.

use super::SandboxError;
use super::capture::StreamCapture;
use omniprof_core::{InputSource, WORKER_COMMAND_FD, WORKER_MESSAGE_FD, WorkerCommand};
use omniprof_ipc::{
    ExecutePlan, FrameError, FrameReader, FrameWriter, RuntimeTelemetry, SupervisorCommand,
    WireError, WireStatus, WorkerCapabilities, WorkerMessage,
};
use std::fs::File;
use std::io;
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, ExitStatus};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// How one execution attempt ended, seen from the supervisor
#[derive(Debug)]
pub(crate) enum AttemptEnd {
    /// The driver reported completion
    Finished {
        status: WireStatus,
        error: Option<WireError>,
        telemetry: RuntimeTelemetry,
    },
    /// The deadline fired; telemetry is present if the driver flushed in time
    TimedOut { telemetry: Option<RuntimeTelemetry> },
    /// The worker process ended without reporting
    Exited(ExitStatus),
    /// The driver's report arrived but could not be decoded
    Malformed { reason: String },
}

#[derive(Debug)]
pub(crate) struct Attempt {
    pub end: AttemptEnd,
    pub elapsed: Duration,
}

impl Attempt {
    pub(crate) fn telemetry(&self) -> Option<&RuntimeTelemetry> {
        match &self.end {
            AttemptEnd::Finished { telemetry, .. } => Some(telemetry),
            AttemptEnd::TimedOut { telemetry } => telemetry.as_ref(),
            AttemptEnd::Exited(_) | AttemptEnd::Malformed { .. } => None,
        }
    }

    /// Whether the worker can take another execution.
    pub(crate) fn worker_reusable(&self) -> bool {
        matches!(
            self.end,
            AttemptEnd::Finished { status, .. } if status != WireStatus::Interrupted
        )
    }
}

/// Create a pipe pair with close-on-exec set on both ends.
fn create_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as RawFd; 2];

    #[cfg(target_os = "linux")]
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };

    #[cfg(not(target_os = "linux"))]
    let ret = unsafe {
        let ret = libc::pipe(fds.as_mut_ptr());
        if ret == 0 {
            for &fd in &fds {
                let flags = libc::fcntl(fd, libc::F_GETFD);
                libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
            }
        }
        ret
    };

    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: both descriptors were just returned by pipe() and are owned by nobody else
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// SIGKILL the worker's whole process group.
///
/// Only valid while the worker is unreaped: the group id is the worker's pid,
/// which the kernel may hand out again once the worker is waited for.
fn kill_process_group(pid: u32) {
    unsafe {
        libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
    }
}

/// `start + span`, or `None` when that is beyond what `Instant` can hold.
/// `None` means no deadline.
pub(crate) fn deadline_after(start: Instant, span: Duration) -> Option<Instant> {
    start.checked_add(span)
}

/// Whether the worker has exited, leaving it unreaped so that its pid and
/// process group id stay reserved.
#[cfg(target_os = "linux")]
fn exited_unreaped(pid: u32) -> io::Result<bool> {
    // SAFETY: siginfo_t is plain data; waitid only writes into it.
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    let ret = unsafe {
        libc::waitid(
            libc::P_PID,
            pid as libc::id_t,
            &mut info,
            libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    // With WNOHANG and no state change the kernel leaves si_pid at zero
    Ok(unsafe { info.si_pid() } != 0)
}

/// Receive with an optional deadline; `None` waits for as long as it takes.
fn recv_until<T>(
    messages: &Receiver<T>,
    deadline: Option<Instant>,
) -> Result<T, RecvTimeoutError> {
    match deadline {
        Some(deadline) => {
            messages.recv_timeout(deadline.saturating_duration_since(Instant::now()))
        }
        None => messages.recv().map_err(|_| RecvTimeoutError::Disconnected),
    }
}

/// Live worker process with its IPC channel and output captures
pub(crate) struct WorkerHandle {
    child: Child,
    pid: u32,
    writer: FrameWriter<File>,
    messages: Receiver<Result<WorkerMessage, FrameError>>,
    stdout: Option<StreamCapture>,
    stderr: Option<StreamCapture>,
    capabilities: WorkerCapabilities,
    exit_status: Option<ExitStatus>,
}

impl WorkerHandle {
    /// Spawn a worker and complete the handshake.
    pub(crate) fn spawn(
        command: &WorkerCommand,
        max_output_bytes: usize,
        handshake_timeout: Duration,
    ) -> Result<Self, SandboxError> {
        let spawn_error = |source: io::Error| SandboxError::Spawn {
            interpreter: command.interpreter().to_path_buf(),
            source,
        };

        // cmd pipe: supervisor writes commands → worker reads from fd 3
        let (cmd_read, cmd_write) = create_pipe().map_err(spawn_error)?;
        // msg pipe: worker writes messages to fd 4 → supervisor reads
        let (msg_read, msg_write) = create_pipe().map_err(spawn_error)?;

        let cmd_read_fd = cmd_read.as_raw_fd();
        let msg_write_fd = msg_write.as_raw_fd();

        let mut process = command.build();
        // In the child: move both ends above the target range first so that
        // neither dup2 can clobber the other, then place them on fd 3/4.
        unsafe {
            process.pre_exec(move || {
                let cmd = libc::fcntl(cmd_read_fd, libc::F_DUPFD_CLOEXEC, 10);
                let msg = libc::fcntl(msg_write_fd, libc::F_DUPFD_CLOEXEC, 10);
                if cmd < 0 || msg < 0 {
                    return Err(io::Error::last_os_error());
                }
                if libc::dup2(cmd, WORKER_COMMAND_FD) < 0 || libc::dup2(msg, WORKER_MESSAGE_FD) < 0
                {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = process.spawn().map_err(spawn_error)?;
        let pid = child.id();

        // Close the child-side ends in the parent
        drop(cmd_read);
        drop(msg_write);

        let writer = FrameWriter::new(File::from(cmd_write));
        let reader_file = File::from(msg_read);

        let setup = || -> io::Result<_> {
            let (tx, messages) = mpsc::channel();
            thread::Builder::new()
                .name("omniprof-ipc".to_string())
                .spawn(move || {
                    let mut reader = FrameReader::new(reader_file);
                    loop {
                        let result = reader.read::<WorkerMessage>();
                        let stop = result.is_err();
                        if tx.send(result).is_err() || stop {
                            break;
                        }
                    }
                })?;
            let stdout = match child.stdout.take() {
                Some(stream) => Some(StreamCapture::spawn("stdout", stream, max_output_bytes)?),
                None => None,
            };
            let stderr = match child.stderr.take() {
                Some(stream) => Some(StreamCapture::spawn("stderr", stream, max_output_bytes)?),
                None => None,
            };
            Ok((messages, stdout, stderr))
        };
        let (messages, stdout, stderr) = match setup() {
            Ok(parts) => parts,
            Err(e) => {
                kill_process_group(pid);
                let _ = child.wait();
                return Err(spawn_error(e));
            }
        };

        let capabilities = match wait_for_hello(&messages, handshake_timeout) {
            Ok(caps) => caps,
            Err(reason) => {
                kill_process_group(pid);
                let _ = child.wait();
                let stderr_text = stderr
                    .map(|c| c.finish(Duration::from_millis(200)))
                    .unwrap_or_default();
                let detail = stderr_text.trim();
                return Err(match reason {
                    HelloError::Protocol(e) => e,
                    HelloError::Missing(reason) if detail.is_empty() => {
                        SandboxError::Handshake(reason)
                    }
                    HelloError::Missing(reason) => {
                        SandboxError::Handshake(format!("{reason}: {detail}"))
                    }
                });
            }
        };
        tracing::debug!(
            pid,
            version = %capabilities.version,
            implementation = %capabilities.implementation,
            "worker ready"
        );

        Ok(Self {
            child,
            pid,
            writer,
            messages,
            stdout,
            stderr,
            capabilities,
            exit_status: None,
        })
    }

    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    pub(crate) fn capabilities(&self) -> &WorkerCapabilities {
        &self.capabilities
    }

    /// Run one code unit, answering input requests until the driver reports
    /// or the deadline fires.
    pub(crate) fn execute(
        &mut self,
        plan: ExecutePlan,
        inputs: &mut InputSource,
        timeout: Duration,
        grace: Duration,
    ) -> Result<Attempt, SandboxError> {
        let started = Instant::now();
        let deadline = deadline_after(started, timeout);

        if let Err(e) = self.writer.write(&SupervisorCommand::Execute(plan)) {
            tracing::debug!("execute command not delivered: {}", e);
            let status = self.reap(grace)?;
            return Ok(Attempt {
                end: AttemptEnd::Exited(status),
                elapsed: started.elapsed(),
            });
        }

        loop {
            match recv_until(&self.messages, deadline) {
                Ok(Ok(WorkerMessage::InputRequest { prompt })) => {
                    let value = inputs.next();
                    tracing::debug!(prompt = %prompt, value = %value, "answering input request");
                    // A failed write means the worker is gone; the closed pipe shows up next.
                    let _ = self.writer.write(&SupervisorCommand::Input { value });
                }
                Ok(Ok(WorkerMessage::Finished {
                    status,
                    error,
                    telemetry,
                })) => {
                    return Ok(Attempt {
                        end: AttemptEnd::Finished {
                            status,
                            error,
                            telemetry,
                        },
                        elapsed: started.elapsed(),
                    });
                }
                Ok(Ok(WorkerMessage::Failure { message })) => {
                    return Err(SandboxError::Driver(message));
                }
                Ok(Ok(WorkerMessage::Hello(_))) => {
                    return Err(SandboxError::Protocol {
                        expected: "input_request/finished".to_string(),
                        got: "hello".to_string(),
                    });
                }
                Ok(Err(FrameError::EndOfStream | FrameError::InvalidFrame(_)))
                | Err(RecvTimeoutError::Disconnected) => {
                    let elapsed = started.elapsed();
                    let status = self.reap(grace)?;
                    return Ok(Attempt {
                        end: AttemptEnd::Exited(status),
                        elapsed,
                    });
                }
                Ok(Err(e)) if e.is_malformed_payload() => {
                    tracing::debug!(pid = self.pid, "undecodable report from driver: {}", e);
                    return Ok(Attempt {
                        end: AttemptEnd::Malformed {
                            reason: e.to_string(),
                        },
                        elapsed: started.elapsed(),
                    });
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(RecvTimeoutError::Timeout) => return Ok(self.abandon(started, grace)),
            }
        }
    }

    /// Deadline expired: ask the driver to interrupt the unit and give it
    /// `grace` to flush its telemetry.
    fn abandon(&mut self, started: Instant, grace: Duration) -> Attempt {
        let elapsed = started.elapsed();
        tracing::debug!(pid = self.pid, "deadline reached after {:?}, aborting", elapsed);
        let _ = self.writer.write(&SupervisorCommand::Abort);

        let drain_deadline = deadline_after(Instant::now(), grace);
        let mut telemetry = None;
        loop {
            if drain_deadline.is_some_and(|d| d <= Instant::now()) {
                break;
            }
            match recv_until(&self.messages, drain_deadline) {
                Ok(Ok(WorkerMessage::Finished { telemetry: t, .. })) => {
                    telemetry = Some(t);
                    break;
                }
                // Input requests after an abort are answered with EOF by the driver
                Ok(Ok(_)) => continue,
                _ => break,
            }
        }

        Attempt {
            end: AttemptEnd::TimedOut { telemetry },
            elapsed,
        }
    }

    /// Reap the worker if it has exited, sweeping its process group first.
    #[cfg(target_os = "linux")]
    fn poll_exit(&mut self) -> io::Result<Option<ExitStatus>> {
        if !exited_unreaped(self.pid)? {
            return Ok(None);
        }
        // Sweep anything the worker left behind in its group
        kill_process_group(self.pid);
        self.child.wait().map(Some)
    }

    /// Reap the worker if it has exited. Without a non-reaping wait the group
    /// cannot be swept safely, so stragglers are left alone.
    #[cfg(not(target_os = "linux"))]
    fn poll_exit(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    fn wait_for_exit(&mut self, grace: Duration) -> Option<ExitStatus> {
        let deadline = deadline_after(Instant::now(), grace);
        loop {
            match self.poll_exit() {
                Ok(Some(status)) => {
                    self.exit_status = Some(status);
                    return Some(status);
                }
                Ok(None) if deadline.is_none_or(|d| Instant::now() < d) => {
                    thread::sleep(Duration::from_millis(5))
                }
                Ok(None) => return None,
                Err(e) => {
                    tracing::debug!(pid = self.pid, "failed to poll worker: {}", e);
                    return None;
                }
            }
        }
    }

    /// Exit status of a worker whose message pipe closed. A worker that
    /// lingers past `grace` is killed.
    fn reap(&mut self, grace: Duration) -> Result<ExitStatus, SandboxError> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        if let Some(status) = self.wait_for_exit(grace) {
            return Ok(status);
        }
        kill_process_group(self.pid);
        let status = self.child.wait().map_err(SandboxError::Wait)?;
        self.exit_status = Some(status);
        Ok(status)
    }

    /// Kill the process group unless the worker was already reaped.
    fn terminate(&mut self) {
        if self.exit_status.is_some() {
            return;
        }
        kill_process_group(self.pid);
        match self.child.wait() {
            Ok(status) => self.exit_status = Some(status),
            Err(e) => tracing::debug!(pid = self.pid, "failed to reap worker: {}", e),
        }
    }

    /// Stop the worker and collect its captured stdout/stderr.
    ///
    /// With `graceful`, the driver is asked to shut down and gets `grace` to
    /// exit; otherwise (or if it does not) the process group is killed.
    pub(crate) fn finish(
        mut self,
        graceful: bool,
        grace: Duration,
        join_bound: Duration,
    ) -> (String, String) {
        if graceful
            && self.exit_status.is_none()
            && self.writer.write(&SupervisorCommand::Shutdown).is_ok()
        {
            self.wait_for_exit(grace);
        }
        self.terminate();
        let stdout = self
            .stdout
            .take()
            .map(|c| c.finish(join_bound))
            .unwrap_or_default();
        let stderr = self
            .stderr
            .take()
            .map(|c| c.finish(join_bound))
            .unwrap_or_default();
        (stdout, stderr)
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

enum HelloError {
    Missing(String),
    Protocol(SandboxError),
}

/// Wait for the driver's hello and validate the protocol version.
fn wait_for_hello(
    messages: &Receiver<Result<WorkerMessage, FrameError>>,
    timeout: Duration,
) -> Result<WorkerCapabilities, HelloError> {
    match messages.recv_timeout(timeout) {
        Ok(Ok(WorkerMessage::Hello(caps))) => {
            if caps.protocol_version != omniprof_ipc::PROTOCOL_VERSION {
                return Err(HelloError::Protocol(SandboxError::Protocol {
                    expected: format!("protocol version {}", omniprof_ipc::PROTOCOL_VERSION),
                    got: format!("protocol version {}", caps.protocol_version),
                }));
            }
            Ok(caps)
        }
        Ok(Ok(other)) => Err(HelloError::Protocol(SandboxError::Protocol {
            expected: "hello".to_string(),
            got: format!("{:?}", other),
        })),
        Ok(Err(FrameError::EndOfStream)) | Err(RecvTimeoutError::Disconnected) => Err(
            HelloError::Missing("interpreter exited before the handshake".to_string()),
        ),
        Ok(Err(e)) => Err(HelloError::Protocol(e.into())),
        Err(RecvTimeoutError::Timeout) => Err(HelloError::Missing(format!(
            "no handshake within {:?}",
            timeout
        ))),
    }
}
