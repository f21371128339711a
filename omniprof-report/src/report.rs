//! Report Data Structures

use chrono::{DateTime, Utc};
use omniprof_core::{ErrorDetail, OutcomeStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Complete profile of one code unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileReport {
    /// Host description from the hardware collaborator
    pub hardware: Option<Value>,
    /// Output of the static-analysis collaborator
    pub static_analysis: Option<Value>,
    /// Measurements of the execution itself
    pub dynamic_analysis: DynamicAnalysis,
}

impl ProfileReport {
    /// Run metadata
    pub fn meta(&self) -> &RunMeta {
        &self.dynamic_analysis.meta
    }

    /// How the profiled execution ended
    pub fn status(&self) -> OutcomeStatus {
        self.dynamic_analysis.meta.status
    }

    /// Shorthand for a completed execution
    pub fn is_completed(&self) -> bool {
        self.status() == OutcomeStatus::Completed
    }
}

/// Per-channel sections plus run metadata. A section is either complete or
/// absent; absent sections are listed in `meta.channels_omitted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicAnalysis {
    /// Timing channel section
    pub time: Option<TimeSnapshot>,
    /// Memory channel section
    pub memory: Option<MemorySnapshot>,
    /// I/O channel section
    pub io: Option<IoSnapshot>,
    /// GC channel section
    pub gc: Option<GcSnapshot>,
    /// Run metadata
    pub meta: RunMeta,
}

/// What ran, how it ended, and what it printed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMeta {
    /// How the measured execution ended
    pub status: OutcomeStatus,
    /// Failure detail, absent for completed runs
    pub error_detail: Option<ErrorDetail>,
    /// Standard output of the measured execution
    pub captured_stdout: String,
    /// Standard error of the measured execution
    pub captured_stderr: String,
    /// Deadline applied to each execution
    pub timeout_seconds: f64,
    /// Discarded executions before the measured one
    pub warmup_runs: u32,
    /// Label of the code unit (file path or `<profiled>`)
    pub source: String,
    /// Interpreter version reported by the worker
    pub interpreter: Option<String>,
    /// When the measured execution began
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration of the measured execution
    pub duration_ms: f64,
    /// Channels that were enabled but produced no section
    #[serde(default)]
    pub channels_omitted: Vec<String>,
}

/// Timing channel output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSnapshot {
    /// Seconds between channel start and stop
    pub wall_time: f64,
    /// `user_time + system_time`
    pub cpu_time: f64,
    /// CPU seconds in user mode
    pub user_time: f64,
    /// CPU seconds in kernel mode
    pub system_time: f64,
    /// `cpu_time` as a percentage of `wall_time`, 0 when no time elapsed
    #[serde(default)]
    pub cpu_percent: f64,
    /// Scheduler context switches during the window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_switches: Option<ContextSwitchCounts>,
    /// Ranked by cumulative time, then self time, then calls
    pub hotspots: Vec<Hotspot>,
    /// Per-line timings of the traced functions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_profiles: Option<Vec<LineProfileSection>>,
    /// Call tree rebuilt from caller edges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_tree: Option<Vec<CallTreeNode>>,
}

impl TimeSnapshot {
    /// CPU utilisation in percent of `wall` seconds.
    pub fn utilisation(cpu: f64, wall: f64) -> f64 {
        if wall > 0.0 { cpu / wall * 100.0 } else { 0.0 }
    }
}

/// Context switches of the worker during the window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSwitchCounts {
    /// The worker gave up the CPU (blocking, sleeping)
    pub voluntary: u64,
    /// The scheduler preempted the worker
    pub involuntary: u64,
}

/// One function in the hotspot ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hotspot {
    /// Function name
    pub function: String,
    /// Defining file
    pub file: String,
    /// First line of the definition
    pub line: u32,
    /// Total calls, recursive ones included
    pub calls: u64,
    /// Calls not induced by recursion
    pub primitive_calls: u64,
    /// Seconds spent in the function body itself
    pub self_time: f64,
    /// Seconds including callees
    pub cumulative_time: f64,
}

impl Hotspot {
    /// Cumulative seconds per call; zero when never called.
    pub fn per_call(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.cumulative_time / self.calls as f64
        }
    }
}

/// Node of the call tree reconstructed from caller edges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallTreeNode {
    /// Function name
    pub function: String,
    /// Defining file
    pub file: String,
    /// First line of the definition
    pub line: u32,
    /// Calls along the edge from the parent (total calls for roots)
    pub calls: u64,
    /// Seconds spent in the function body itself
    pub self_time: f64,
    /// Seconds including callees
    pub cumulative_time: f64,
    /// Recursion into a function already on the path is cut here
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recursive: bool,
    /// Callees, most expensive first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CallTreeNode>,
}

/// Line-level timings for one function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineProfileSection {
    /// Function name, `Class.method` for methods
    pub function: String,
    /// Defining file
    pub file: String,
    /// Line of the `def`
    pub first_line: u32,
    /// Sum of the line times
    pub total_time: f64,
    /// Executed lines in source order
    pub lines: Vec<LineTiming>,
}

/// Hits and time of one source line
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineTiming {
    /// Line number
    pub line: u32,
    /// Times the line started executing
    pub hits: u64,
    /// Seconds attributed to the line
    pub time: f64,
    /// `time / hits`
    pub time_per_hit: f64,
}

/// Memory channel output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    /// Highest traced bytes during the window
    pub peak: u64,
    /// Traced bytes at the end of the window
    pub current: u64,
    /// Live traced blocks at the end of the window
    pub allocation_count: u64,
    /// `allocation_count` per wall-clock second, 0 when no time elapsed
    pub allocation_rate: f64,
    /// Source lines holding the most traced memory at the end of the window
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_allocators: Vec<TopAllocator>,
}

/// Source line that allocated traced memory still alive at the end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopAllocator {
    /// File of the allocating line
    pub file: String,
    /// Allocating line
    pub line: u32,
    /// Live bytes allocated there
    pub size: u64,
    /// Live blocks allocated there
    pub count: u64,
}

/// I/O channel output. Differences of process counters over the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IoSnapshot {
    /// Read-family syscalls
    pub read_count: u64,
    /// Write-family syscalls
    pub write_count: u64,
    /// Bytes fetched from the storage layer
    pub read_bytes: u64,
    /// Bytes sent to the storage layer
    pub write_bytes: u64,
    /// Bytes passed to read-family syscalls
    pub read_chars: u64,
    /// Bytes passed to write-family syscalls
    pub write_chars: u64,
}

/// GC channel output. Cumulative process-scope values, not deltas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcSnapshot {
    /// Automatic collection was enabled
    pub enabled: bool,
    /// Objects tracked by the collector across all generations
    #[serde(default)]
    pub total_objects: u64,
    /// Per-generation statistics, youngest first
    pub generations: Vec<GenerationStats>,
}

/// Collector statistics of one generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStats {
    /// Generation index
    pub generation: u32,
    /// Collections run so far
    pub collections: u64,
    /// Objects currently tracked
    pub objects: u64,
    /// Allocation threshold that triggers a collection
    pub threshold: u64,
}

/// Tally over a batch of reports
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    /// Reports counted
    pub total: usize,
    /// Completed executions
    pub completed: usize,
    /// Executions stopped at the deadline
    pub timed_out: usize,
    /// Executions that raised
    pub raised_exception: usize,
    /// Executions that requested exit
    pub system_exited: usize,
    /// Sum of the measured durations
    pub total_duration_ms: f64,
}

impl BatchSummary {
    /// Tally `reports` by status.
    pub fn from_reports<'a>(reports: impl IntoIterator<Item = &'a ProfileReport>) -> Self {
        let mut summary = Self::default();
        for report in reports {
            summary.total += 1;
            summary.total_duration_ms += report.meta().duration_ms;
            match report.status() {
                OutcomeStatus::Completed => summary.completed += 1,
                OutcomeStatus::TimedOut => summary.timed_out += 1,
                OutcomeStatus::RaisedException => summary.raised_exception += 1,
                OutcomeStatus::SystemExited => summary.system_exited += 1,
            }
        }
        summary
    }

    /// Executions that did not complete
    pub fn failures(&self) -> usize {
        self.total - self.completed
    }
}
