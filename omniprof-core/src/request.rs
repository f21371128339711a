//! Execution Requests
//!
//! Immutable description of one profiling job: what to run, how to feed it
//! input, and how long it may take.

use crate::RequestError;
use crate::input::{DEFAULT_INPUTS, InputSource};
use omniprof_ipc::EntryCall;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default deadline for one execution
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Filename the interpreter sees for code given as text
pub const TEXT_FILENAME: &str = "<profiled>";

/// The code unit: inline text or a script on disk. Exactly one by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceUnit {
    /// Source text
    Text {
        /// Python source
        code: String,
    },
    /// Path to a script executed as `__main__`
    File(PathBuf),
}

/// Source text resolved from a [`SourceUnit`]
#[derive(Debug, Clone)]
pub struct LoadedSource {
    /// Python source
    pub code: String,
    /// Filename used when compiling
    pub filename: String,
    /// Short label for reports and logs
    pub label: String,
}

/// Everything needed to profile one code unit.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    source: SourceUnit,
    entry: Option<EntryCall>,
    working_directory: Option<PathBuf>,
    input_sequence: Vec<String>,
    timeout: Duration,
    warmup_runs: u32,
    line_level: bool,
}

impl ExecutionRequest {
    /// Profile inline source text.
    pub fn from_code(code: impl Into<String>) -> Self {
        Self::new(SourceUnit::Text { code: code.into() })
    }

    /// Profile a script on disk.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(SourceUnit::File(path.into()))
    }

    fn new(source: SourceUnit) -> Self {
        Self {
            source,
            entry: None,
            working_directory: None,
            input_sequence: DEFAULT_INPUTS.iter().map(|s| s.to_string()).collect(),
            timeout: DEFAULT_TIMEOUT,
            warmup_runs: 0,
            line_level: true,
        }
    }

    /// Call `entry` after the module body ran.
    pub fn with_entry(mut self, entry: EntryCall) -> Self {
        self.entry = Some(entry);
        self
    }

    /// Run the worker inside `dir`.
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Scripted responses for interactive input.
    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_sequence = inputs.into_iter().map(Into::into).collect();
        self
    }

    /// Wall-clock deadline per execution.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deadline given in (possibly fractional) seconds.
    pub fn with_timeout_secs(self, seconds: f64) -> Result<Self, RequestError> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(RequestError::InvalidTimeout(format!(
                "{seconds} is not a positive number of seconds"
            )));
        }
        let timeout = Duration::try_from_secs_f64(seconds)
            .map_err(|e| RequestError::InvalidTimeout(e.to_string()))?;
        Ok(self.with_timeout(timeout))
    }

    /// Discarded executions before the measured one.
    pub fn with_warmup_runs(mut self, runs: u32) -> Self {
        self.warmup_runs = runs;
        self
    }

    /// Enable or disable line tracing of the unit's functions.
    pub fn with_line_level(mut self, enabled: bool) -> Self {
        self.line_level = enabled;
        self
    }

    /// The code unit
    pub fn source(&self) -> &SourceUnit {
        &self.source
    }

    /// Function called after the module body, if any
    pub fn entry(&self) -> Option<&EntryCall> {
        self.entry.as_ref()
    }

    /// Directory the worker runs in
    pub fn working_directory(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }

    /// Scripted input responses, cycled
    pub fn input_sequence(&self) -> &[String] {
        &self.input_sequence
    }

    /// Wall-clock deadline per execution
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Discarded executions before the measured one
    pub fn warmup_runs(&self) -> u32 {
        self.warmup_runs
    }

    /// Whether per-line hit counts are collected. With an entry only the
    /// entry function is traced, otherwise every function the unit defines.
    pub fn line_level(&self) -> bool {
        self.line_level
    }

    /// Fresh input cursor for one execution attempt.
    pub fn input_source(&self) -> Result<InputSource, RequestError> {
        InputSource::new(self.input_sequence.clone())
    }

    /// Short label for the code unit.
    pub fn label(&self) -> String {
        match &self.source {
            SourceUnit::Text { .. } => TEXT_FILENAME.to_string(),
            SourceUnit::File(path) => path.display().to_string(),
        }
    }

    /// Check everything that does not require reading the source.
    pub fn validate(&self) -> Result<(), RequestError> {
        match &self.source {
            SourceUnit::Text { code } if code.trim().is_empty() => {
                return Err(RequestError::EmptySource);
            }
            SourceUnit::File(path) if path.as_os_str().is_empty() => {
                return Err(RequestError::EmptySource);
            }
            _ => {}
        }
        if self.timeout.is_zero() {
            return Err(RequestError::InvalidTimeout(
                "timeout must be positive".to_string(),
            ));
        }
        if self.input_sequence.is_empty() {
            return Err(RequestError::EmptyInputSequence);
        }
        if let Some(entry) = &self.entry {
            if entry.function.trim().is_empty() {
                return Err(RequestError::EmptyEntryName);
            }
        }
        if let Some(dir) = &self.working_directory {
            if !dir.is_dir() {
                return Err(RequestError::MissingWorkingDirectory(dir.clone()));
            }
        }
        Ok(())
    }

    /// Validate and resolve the source text.
    pub fn load(&self) -> Result<LoadedSource, RequestError> {
        self.validate()?;
        match &self.source {
            SourceUnit::Text { code } => Ok(LoadedSource {
                code: code.clone(),
                filename: TEXT_FILENAME.to_string(),
                label: self.label(),
            }),
            SourceUnit::File(path) => {
                let code =
                    std::fs::read_to_string(path).map_err(|source| RequestError::SourceRead {
                        path: path.clone(),
                        source,
                    })?;
                if code.trim().is_empty() {
                    return Err(RequestError::EmptySource);
                }
                let filename = std::fs::canonicalize(path)
                    .unwrap_or_else(|_| path.clone())
                    .display()
                    .to_string();
                Ok(LoadedSource {
                    code,
                    filename,
                    label: self.label(),
                })
            }
        }
    }
}

/// Request as received from API or CLI callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestShape {
    /// Inline source (exclusive with `file_path`)
    pub code: Option<String>,
    /// Script path (exclusive with `code`)
    pub file_path: Option<PathBuf>,
    /// Function-level entry point
    pub entry: Option<EntryCall>,
    /// Scripted input responses
    pub mock_inputs: Option<Vec<String>>,
    /// Deadline in seconds
    pub timeout_seconds: Option<f64>,
    /// Warm-up executions
    pub warmup_runs: Option<u32>,
    /// Working directory
    pub cwd: Option<PathBuf>,
}

impl TryFrom<RequestShape> for ExecutionRequest {
    type Error = RequestError;

    fn try_from(shape: RequestShape) -> Result<Self, Self::Error> {
        let mut request = match (shape.code, shape.file_path) {
            (Some(code), None) => ExecutionRequest::from_code(code),
            (None, Some(path)) => ExecutionRequest::from_path(path),
            (Some(_), Some(_)) => {
                return Err(RequestError::InvalidShape(
                    "exactly one of `code` and `filePath` may be set".to_string(),
                ));
            }
            (None, None) => {
                return Err(RequestError::InvalidShape(
                    "one of `code` or `filePath` is required".to_string(),
                ));
            }
        };
        if let Some(entry) = shape.entry {
            request = request.with_entry(entry);
        }
        if let Some(inputs) = shape.mock_inputs {
            request = request.with_inputs(inputs);
        }
        if let Some(seconds) = shape.timeout_seconds {
            request = request.with_timeout_secs(seconds)?;
        }
        if let Some(runs) = shape.warmup_runs {
            request = request.with_warmup_runs(runs);
        }
        if let Some(cwd) = shape.cwd {
            request = request.with_working_directory(cwd);
        }
        request.validate()?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let request = ExecutionRequest::from_code("x = 1");
        assert_eq!(request.timeout(), Duration::from_secs(5));
        assert_eq!(request.warmup_runs(), 0);
        assert!(!request.input_sequence().is_empty());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_blank_source_rejected() {
        let request = ExecutionRequest::from_code("   \n");
        assert!(matches!(request.validate(), Err(RequestError::EmptySource)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let request = ExecutionRequest::from_code("x = 1").with_timeout(Duration::ZERO);
        assert!(matches!(
            request.validate(),
            Err(RequestError::InvalidTimeout(_))
        ));
        assert!(
            ExecutionRequest::from_code("x = 1")
                .with_timeout_secs(-1.0)
                .is_err()
        );
        assert!(
            ExecutionRequest::from_code("x = 1")
                .with_timeout_secs(f64::NAN)
                .is_err()
        );
    }

    #[test]
    fn test_empty_inputs_rejected() {
        let request = ExecutionRequest::from_code("x = 1").with_inputs(Vec::<String>::new());
        assert!(matches!(
            request.validate(),
            Err(RequestError::EmptyInputSequence)
        ));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let request = ExecutionRequest::from_path("/definitely/not/here.py");
        assert!(matches!(
            request.load(),
            Err(RequestError::SourceRead { .. })
        ));
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::Builder::new().suffix(".py").tempfile().unwrap();
        writeln!(file, "print('hi')").unwrap();
        let request = ExecutionRequest::from_path(file.path());
        let loaded = request.load().unwrap();
        assert!(loaded.code.contains("print"));
        assert!(loaded.filename.ends_with(".py"));
    }

    #[test]
    fn test_missing_working_directory_rejected() {
        let request =
            ExecutionRequest::from_code("x = 1").with_working_directory("/no/such/dir/here");
        assert!(matches!(
            request.validate(),
            Err(RequestError::MissingWorkingDirectory(_))
        ));
    }

    #[test]
    fn test_line_level_without_entry() {
        let request = ExecutionRequest::from_code("def f(): pass");
        assert!(request.line_level());
        let request = request.with_entry(EntryCall {
            function: "f".to_string(),
            args: Vec::new(),
        });
        assert!(request.line_level());
        assert!(!request.with_line_level(false).line_level());
    }

    #[test]
    fn test_shape_from_json() {
        let shape: RequestShape = serde_json::from_str(
            r#"{"code":"print(input())","mockInputs":["a","b"],"timeoutSeconds":1.5,"warmupRuns":2}"#,
        )
        .unwrap();
        let request = ExecutionRequest::try_from(shape).unwrap();
        assert_eq!(request.timeout(), Duration::from_millis(1500));
        assert_eq!(request.warmup_runs(), 2);
        assert_eq!(request.input_sequence(), ["a", "b"]);
    }

    #[test]
    fn test_shape_requires_exactly_one_source() {
        let both = RequestShape {
            code: Some("x = 1".to_string()),
            file_path: Some(PathBuf::from("a.py")),
            ..Default::default()
        };
        assert!(matches!(
            ExecutionRequest::try_from(both),
            Err(RequestError::InvalidShape(_))
        ));
        assert!(matches!(
            ExecutionRequest::try_from(RequestShape::default()),
            Err(RequestError::InvalidShape(_))
        ));
    }

    #[test]
    fn test_shape_rejects_empty_inputs() {
        let shape = RequestShape {
            code: Some("x = 1".to_string()),
            mock_inputs: Some(Vec::new()),
            ..Default::default()
        };
        assert!(matches!(
            ExecutionRequest::try_from(shape),
            Err(RequestError::EmptyInputSequence)
        ));
    }
}
