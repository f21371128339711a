//! Execution Outcomes
//!
//! How one execution attempt ended. Failures of the profiled code live here;
//! they are data, never errors of the harness.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Terminal state of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutcomeStatus {
    /// Ran to the end
    Completed,
    /// Abandoned at the deadline
    TimedOut,
    /// An exception escaped
    RaisedException,
    /// Requested interpreter exit
    SystemExited,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutcomeStatus::Completed => "completed",
            OutcomeStatus::TimedOut => "timedOut",
            OutcomeStatus::RaisedException => "raisedException",
            OutcomeStatus::SystemExited => "systemExited",
        };
        f.write_str(name)
    }
}

/// Why an execution did not complete.
///
/// Timeouts carry their own variant so that callers never have to inspect
/// message text to tell an expected deadline from a genuine failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ErrorDetail {
    /// An exception escaped the code unit
    Exception {
        /// Exception class name
        type_name: String,
        /// Rendered exception message
        message: String,
        /// Traceback limited to frames of the code unit
        #[serde(default, skip_serializing_if = "Option::is_none")]
        traceback: Option<String>,
    },
    /// The deadline fired first
    Timeout {
        /// Deadline that expired
        seconds: f64,
    },
    /// The code unit asked the interpreter to exit
    Exit {
        /// Exit code
        code: i64,
        /// Non-integer exit argument, rendered
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDetail::Exception {
                type_name, message, ..
            } if message.is_empty() => write!(f, "{type_name}"),
            ErrorDetail::Exception {
                type_name, message, ..
            } => write!(f, "{type_name}: {message}"),
            ErrorDetail::Timeout { seconds } => write!(f, "timeout after {seconds}s"),
            ErrorDetail::Exit {
                code,
                message: Some(message),
            } => write!(f, "exit code {code} ({message})"),
            ErrorDetail::Exit { code, message: None } => write!(f, "exit code {code}"),
        }
    }
}

/// Result of one execution attempt.
///
/// `error_detail` is present exactly when the status is not `Completed`;
/// the constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    status: OutcomeStatus,
    captured_stdout: String,
    captured_stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_detail: Option<ErrorDetail>,
    #[serde(with = "duration_secs")]
    duration: Duration,
}

impl ExecutionOutcome {
    /// The code unit ran to the end.
    pub fn completed(stdout: String, stderr: String, duration: Duration) -> Self {
        Self {
            status: OutcomeStatus::Completed,
            captured_stdout: stdout,
            captured_stderr: stderr,
            error_detail: None,
            duration,
        }
    }

    /// The code unit was abandoned at the deadline.
    pub fn timed_out(timeout: Duration, stdout: String, stderr: String, duration: Duration) -> Self {
        Self {
            status: OutcomeStatus::TimedOut,
            captured_stdout: stdout,
            captured_stderr: stderr,
            error_detail: Some(ErrorDetail::Timeout {
                seconds: timeout.as_secs_f64(),
            }),
            duration,
        }
    }

    /// The code unit raised.
    pub fn raised(
        type_name: impl Into<String>,
        message: impl Into<String>,
        traceback: Option<String>,
        stdout: String,
        stderr: String,
        duration: Duration,
    ) -> Self {
        Self {
            status: OutcomeStatus::RaisedException,
            captured_stdout: stdout,
            captured_stderr: stderr,
            error_detail: Some(ErrorDetail::Exception {
                type_name: type_name.into(),
                message: message.into(),
                traceback,
            }),
            duration,
        }
    }

    /// The code unit requested exit.
    pub fn exited(
        code: i64,
        message: Option<String>,
        stdout: String,
        stderr: String,
        duration: Duration,
    ) -> Self {
        Self {
            status: OutcomeStatus::SystemExited,
            captured_stdout: stdout,
            captured_stderr: stderr,
            error_detail: Some(ErrorDetail::Exit { code, message }),
            duration,
        }
    }

    /// How the execution ended
    pub fn status(&self) -> OutcomeStatus {
        self.status
    }

    /// Failure detail, absent for completed runs
    pub fn error_detail(&self) -> Option<&ErrorDetail> {
        self.error_detail.as_ref()
    }

    /// Everything the code unit wrote to stdout
    pub fn captured_stdout(&self) -> &str {
        &self.captured_stdout
    }

    /// Everything the code unit wrote to stderr
    pub fn captured_stderr(&self) -> &str {
        &self.captured_stderr
    }

    /// Wall-clock time of the execution
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Shorthand for a `Completed` status
    pub fn is_completed(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_has_no_detail() {
        let outcome = ExecutionOutcome::completed("out".into(), String::new(), Duration::ZERO);
        assert!(outcome.is_completed());
        assert!(outcome.error_detail().is_none());
        assert_eq!(outcome.captured_stdout(), "out");
    }

    #[test]
    fn test_timeout_detail_renders_seconds() {
        let outcome = ExecutionOutcome::timed_out(
            Duration::from_secs(5),
            String::new(),
            String::new(),
            Duration::from_secs(5),
        );
        assert_eq!(outcome.status(), OutcomeStatus::TimedOut);
        assert_eq!(
            outcome.error_detail().unwrap().to_string(),
            "timeout after 5s"
        );
    }

    #[test]
    fn test_exit_detail_carries_code() {
        let outcome = ExecutionOutcome::exited(3, None, String::new(), String::new(), Duration::ZERO);
        assert_eq!(outcome.status(), OutcomeStatus::SystemExited);
        assert!(matches!(
            outcome.error_detail(),
            Some(ErrorDetail::Exit { code: 3, .. })
        ));
        assert_eq!(outcome.error_detail().unwrap().to_string(), "exit code 3");
    }

    #[test]
    fn test_exception_serializes_camel_case() {
        let detail = ErrorDetail::Exception {
            type_name: "ValueError".to_string(),
            message: "boom".to_string(),
            traceback: None,
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["kind"], "exception");
        assert_eq!(json["typeName"], "ValueError");
        assert!(json.get("traceback").is_none());
        assert_eq!(detail.to_string(), "ValueError: boom");
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let json = serde_json::to_string(&OutcomeStatus::RaisedException).unwrap();
        assert_eq!(json, "\"raisedException\"");
        assert_eq!(OutcomeStatus::TimedOut.to_string(), "timedOut");
    }
}
