//! Interpreter Driver
//!
//! The Python half of the worker protocol ships inside the binary and is
//! started with `-c`, so no file has to be installed next to the harness.

use omniprof_ipc::IPC_FD_ENV;
use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Source of the interpreter-side driver
pub const DRIVER_SOURCE: &str = include_str!("../driver/omniprof_driver.py");

/// Interpreter used when nothing else is configured
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Environment variable that overrides the configured interpreter
pub const INTERPRETER_ENV: &str = "OMNIPROF_PYTHON";

/// Command-pipe fd in the worker
pub const WORKER_COMMAND_FD: i32 = 3;

/// Message-pipe fd in the worker
pub const WORKER_MESSAGE_FD: i32 = 4;

/// Pick the interpreter: `OMNIPROF_PYTHON`, then `configured`, then `python3`.
pub fn resolve_interpreter(configured: Option<&str>) -> PathBuf {
    resolve_from(std::env::var_os(INTERPRETER_ENV), configured)
}

fn resolve_from(env_value: Option<OsString>, configured: Option<&str>) -> PathBuf {
    if let Some(value) = env_value.filter(|v| !v.is_empty()) {
        return PathBuf::from(value);
    }
    match configured {
        Some(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_INTERPRETER),
    }
}

/// Builds the `Command` for one worker process.
///
/// The worker gets `/dev/null` as stdin, piped stdout/stderr, and its own
/// process group so the whole tree can be killed at once. The caller is
/// responsible for placing the IPC pipes on [`WORKER_COMMAND_FD`] and
/// [`WORKER_MESSAGE_FD`].
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    interpreter: PathBuf,
    working_directory: Option<PathBuf>,
}

impl WorkerCommand {
    /// Worker command for `interpreter`
    pub fn new(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            working_directory: None,
        }
    }

    /// Run the worker inside `dir`. The interpreter puts its working
    /// directory first on the module search path.
    pub fn working_directory(mut self, dir: Option<&Path>) -> Self {
        self.working_directory = dir.map(Path::to_path_buf);
        self
    }

    /// Interpreter binary
    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    /// Ready-to-spawn command without the IPC pipes
    pub fn build(&self) -> Command {
        let mut command = Command::new(&self.interpreter);
        command
            .arg("-u")
            .arg("-c")
            .arg(DRIVER_SOURCE)
            .env(
                IPC_FD_ENV,
                format!("{WORKER_COMMAND_FD},{WORKER_MESSAGE_FD}"),
            )
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env_remove("PYTHONSAFEPATH")
            .env_remove("PYTHONSTARTUP")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if let Some(dir) = &self.working_directory {
            command.current_dir(dir);
        }
        command
    }
}
