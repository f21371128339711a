//! Configuration loading from omniprof.toml
//!
//! omniprof configuration can be specified in an `omniprof.toml` file in the project root.
//! The configuration is automatically discovered by walking up from the current directory.

use omniprof_core::DEFAULT_INPUTS;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// omniprof configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OmniConfig {
    /// Runner configuration
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Scripted input configuration
    #[serde(default)]
    pub inputs: InputsConfig,
    /// Instrumentation channel configuration
    #[serde(default)]
    pub channels: ChannelsConfig,
    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
}

/// Runner configuration for code execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Deadline for a single execution (e.g., "5s", "1500ms")
    #[serde(default = "default_timeout")]
    pub timeout: String,
    /// Discarded executions before the measured one
    #[serde(default)]
    pub warmup_runs: u32,
    /// Interpreter executable (overridden by `OMNIPROF_PYTHON`)
    #[serde(default)]
    pub interpreter: Option<String>,
    /// How long an aborted execution may take to flush its telemetry
    #[serde(default = "default_abort_grace")]
    pub abort_grace: String,
    /// Per-stream capture limit in bytes
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Number of files profiled in parallel
    #[serde(default)]
    pub jobs: Option<usize>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            warmup_runs: 0,
            interpreter: None,
            abort_grace: default_abort_grace(),
            max_output_bytes: default_max_output_bytes(),
            jobs: None,
        }
    }
}

fn default_timeout() -> String {
    "5s".to_string()
}
fn default_abort_grace() -> String {
    "500ms".to_string()
}
fn default_max_output_bytes() -> usize {
    8 * 1024 * 1024
}

/// Scripted input configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputsConfig {
    /// Responses handed to interactive input, last one repeating
    #[serde(default = "default_sequence")]
    pub sequence: Vec<String>,
}

impl Default for InputsConfig {
    fn default() -> Self {
        Self {
            sequence: default_sequence(),
        }
    }
}

fn default_sequence() -> Vec<String> {
    DEFAULT_INPUTS.iter().map(|s| s.to_string()).collect()
}

/// Instrumentation channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Wall/CPU time and hotspots
    #[serde(default = "default_true")]
    pub timing: bool,
    /// Traced allocations
    #[serde(default = "default_true")]
    pub memory: bool,
    /// Process I/O counters
    #[serde(default = "default_true")]
    pub io: bool,
    /// Garbage collector counters
    #[serde(default = "default_true")]
    pub gc: bool,
    /// Line-level timing of the entry function
    #[serde(default = "default_true")]
    pub line_level: bool,
    /// Call tree built from caller edges
    #[serde(default = "default_true")]
    pub call_tree: bool,
    /// Number of ranked hotspots kept
    #[serde(default = "default_hotspot_limit")]
    pub hotspot_limit: usize,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            timing: true,
            memory: true,
            io: true,
            gc: true,
            line_level: true,
            call_tree: true,
            hotspot_limit: default_hotspot_limit(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_hotspot_limit() -> usize {
    10
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Default output format: "human" or "json"
    #[serde(default = "default_format")]
    pub format: String,
    /// Output directory for saved reports
    #[serde(default = "default_output_dir")]
    pub directory: String,
    /// Save a JSON report per run into `directory`
    #[serde(default)]
    pub save_report: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            directory: default_output_dir(),
            save_report: false,
        }
    }
}

fn default_format() -> String {
    "human".to_string()
}
fn default_output_dir() -> String {
    "target/omniprof".to_string()
}

impl OmniConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Try to discover and load configuration by walking up from current directory
    pub fn discover() -> Option<Self> {
        let mut dir = std::env::current_dir().ok()?;
        loop {
            let config_path = dir.join("omniprof.toml");
            if config_path.exists() {
                return match Self::load(&config_path) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        tracing::warn!("ignoring {}: {}", config_path.display(), e);
                        None
                    }
                };
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        r#"# omniprof Configuration

[runner]
# Deadline for a single execution
timeout = "5s"
# Executions before the measured one (side effects repeat!)
warmup_runs = 0
# Interpreter executable; OMNIPROF_PYTHON takes precedence (uncomment to enable)
# interpreter = "python3"
# Time an aborted execution gets to report before it is killed
abort_grace = "500ms"
# Per-stream capture limit in bytes
max_output_bytes = 8388608
# Number of files profiled in parallel (uncomment to enable)
# jobs = 4

[inputs]
# Answers for input(); the last one repeats once exhausted
sequence = ["1", "10", "2", "5", "3", "100", "exit", "quit", "4"]

[channels]
timing = true
memory = true
io = true
gc = true
# Line-level timing of the entry function
line_level = true
# Call tree reconstructed from profiler caller edges
call_tree = true
# Number of ranked hotspots
hotspot_limit = 10

[output]
# Default output format: human, json
format = "human"
# Output directory for saved reports
directory = "target/omniprof"
# Save a JSON report after each run
save_report = false
"#
        .to_string()
    }

    /// Parse duration string (e.g., "3s", "500ms", "2m")
    pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Empty duration string"));
        }

        // Find where the number ends and unit begins
        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
        if !value.is_finite() || value < 0.0 {
            return Err(anyhow::anyhow!("Invalid duration: {}", s));
        }

        let multiplier: f64 = match unit_part.to_lowercase().as_str() {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" | "" => 1e9,
            "m" | "min" => 60e9,
            _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
        };

        Ok(Duration::from_nanos((value * multiplier) as u64))
    }

    /// Execution deadline
    pub fn timeout(&self) -> anyhow::Result<Duration> {
        Self::parse_duration(&self.runner.timeout)
    }

    /// Grace period after an abort
    pub fn abort_grace(&self) -> anyhow::Result<Duration> {
        Self::parse_duration(&self.runner.abort_grace)
    }
}
