//! IPC Message Types
//!
//! All messages are JSON objects discriminated by a `type` field. Field names
//! are snake_case on the wire because the driver builds them as plain dicts.

use serde::{Deserialize, Serialize};

/// Worker capabilities advertised during handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCapabilities {
    /// Protocol version for compatibility
    pub protocol_version: u32,
    /// Interpreter implementation name (e.g. `cpython`)
    pub implementation: String,
    /// Interpreter version string (e.g. `3.12.1`)
    pub version: String,
    /// Process id of the interpreter
    pub pid: u32,
    /// Whether allocation tracing is available
    pub has_tracemalloc: bool,
    /// Whether the deterministic call profiler is available
    pub has_profiler: bool,
    /// Whether the garbage collector exposes statistics
    pub has_gc: bool,
    /// Whether line tracing hooks are available
    pub has_line_trace: bool,
}

/// Messages sent from the driver to the supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Initial handshake with worker capabilities
    Hello(WorkerCapabilities),

    /// The profiled code asked for interactive input
    InputRequest {
        /// Prompt passed to the input primitive (already echoed to stdout)
        #[serde(default)]
        prompt: String,
    },

    /// The execution ended and instruments were read
    Finished {
        /// How the code unit ended
        status: WireStatus,
        /// Failure detail, present unless `status` is `completed`
        #[serde(default)]
        error: Option<WireError>,
        /// Interpreter-side measurements for the armed instruments
        #[serde(default)]
        telemetry: RuntimeTelemetry,
    },

    /// The driver itself failed (never the profiled code)
    Failure {
        /// Human-readable error message
        message: String,
    },
}

/// Execution status as reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireStatus {
    /// Code ran to the end
    Completed,
    /// Code raised an exception
    RaisedException,
    /// Code requested interpreter exit
    SystemExited,
    /// Execution was interrupted after an `abort` command
    Interrupted,
}

/// Failure detail as reported by the driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireError {
    /// An exception escaped the code unit
    Exception {
        /// Exception class name
        type_name: String,
        /// `str()` of the exception
        message: String,
        /// Formatted traceback, driver frames removed
        #[serde(default)]
        traceback: Option<String>,
    },
    /// The code unit requested exit
    Exit {
        /// Numeric exit code
        code: i64,
        /// Non-numeric exit argument, if one was given
        #[serde(default)]
        message: Option<String>,
    },
}

/// Interpreter-side measurements. Every field is absent when the matching
/// instrument was not armed or failed to initialise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeTelemetry {
    /// Wall time measured by the driver around the code unit, in seconds
    pub wall_time: Option<f64>,
    /// Process CPU time consumed during the code unit
    pub cpu: Option<CpuTimes>,
    /// Context switches during the code unit (`getrusage`)
    pub context_switches: Option<ContextSwitches>,
    /// Deterministic profiler statistics, one entry per function
    pub profile: Option<Vec<FunctionStat>>,
    /// Line-level statistics for the entry function, or for every function
    /// the unit defined when there is no entry
    pub lines: Option<Vec<LineProfile>>,
    /// Traced memory at the end of the code unit
    pub memory: Option<TracedMemory>,
    /// Garbage collector state after the code unit
    pub gc: Option<GcStats>,
    /// Instruments that were requested but could not be armed
    pub instrument_errors: Vec<InstrumentError>,
}

/// CPU seconds split into user and system time
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuTimes {
    /// User-mode seconds
    pub user: f64,
    /// Kernel-mode seconds
    pub system: f64,
}

/// Context switch counts over a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSwitches {
    /// The process gave up the CPU (blocking calls, sleeps)
    pub voluntary: u64,
    /// The scheduler preempted the process
    pub involuntary: u64,
}

/// Identifies a function the way the profiler does
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionKey {
    /// Source file (or `~` for built-ins)
    pub file: String,
    /// First line of the function
    pub line: u32,
    /// Function name
    pub function: String,
}

/// Aggregated profiler statistics for one function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionStat {
    /// Function identity
    #[serde(flatten)]
    pub key: FunctionKey,
    /// Calls that were not recursive
    pub primitive_calls: u64,
    /// All calls, recursive ones included
    pub calls: u64,
    /// Time spent in the function body itself, in seconds
    pub self_time: f64,
    /// Time including callees, in seconds
    pub cumulative_time: f64,
    /// Per-caller breakdown of the above
    #[serde(default)]
    pub callers: Vec<CallerStat>,
}

/// Statistics for calls made from one specific caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallerStat {
    /// Calling function
    #[serde(flatten)]
    pub key: FunctionKey,
    /// Non-recursive calls along this edge
    pub primitive_calls: u64,
    /// All calls along this edge
    pub calls: u64,
    /// Callee self time attributed to this edge
    pub self_time: f64,
    /// Callee cumulative time attributed to this edge
    pub cumulative_time: f64,
}

/// Line-level statistics for one traced function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineProfile {
    /// Function name
    pub function: String,
    /// Source file
    pub file: String,
    /// Line of the `def`
    pub first_line: u32,
    /// Lines that were hit at least once
    pub lines: Vec<LineStat>,
}

/// Hits and time for a single source line
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineStat {
    /// Line number
    pub line: u32,
    /// Number of times the line started executing
    pub hits: u64,
    /// Seconds attributed to the line
    pub time: f64,
}

/// Allocation tracer readings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracedMemory {
    /// Bytes traced at the end of the window
    pub current: u64,
    /// Highest traced bytes during the window
    pub peak: u64,
    /// Live traced memory blocks at the end of the window
    pub blocks: u64,
    /// Source lines holding the most live memory, largest first
    #[serde(default)]
    pub top_allocators: Vec<AllocationSite>,
}

/// Live memory attributed to one source line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSite {
    /// File of the allocating frame
    pub file: String,
    /// Line of the allocating frame
    pub line: u32,
    /// Live bytes allocated there
    pub size: u64,
    /// Live blocks allocated there
    pub count: u64,
}

/// Garbage collector state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcStats {
    /// Whether automatic collection is enabled
    pub enabled: bool,
    /// One entry per generation, youngest first
    pub generations: Vec<GcGeneration>,
    /// Objects tracked by the collector across all generations
    #[serde(default)]
    pub total_objects: u64,
}

/// Counters for one collector generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcGeneration {
    /// Collections of this generation since interpreter start
    pub collections: u64,
    /// Objects currently tracked in this generation
    pub objects: u64,
    /// Collection threshold
    pub threshold: u64,
}

/// An instrument the driver could not arm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentError {
    /// Instrument name (`memory`, `profiler`, ...)
    pub instrument: String,
    /// Reason reported by the interpreter
    pub message: String,
}

/// Commands sent from the supervisor to the driver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorCommand {
    /// Execute a code unit
    Execute(ExecutePlan),

    /// Reply to an `input_request`
    Input {
        /// Value returned from the input primitive
        value: String,
    },

    /// Interrupt the running code unit
    Abort,

    /// Request graceful shutdown
    Shutdown,
}

/// Everything the driver needs for one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutePlan {
    /// Source text of the code unit
    pub source: String,
    /// Filename used for compilation and tracebacks
    pub filename: String,
    /// Function to call after the module body ran
    #[serde(default)]
    pub entry: Option<EntryCall>,
    /// Instruments to arm around the code unit
    #[serde(default)]
    pub instruments: Instruments,
    /// `false` for warm-up runs whose output is discarded
    pub measured: bool,
}

/// Function-level entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryCall {
    /// Name looked up in the module namespace
    pub function: String,
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

/// Interpreter-side instruments requested by the supervisor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Instruments {
    /// CPU time split (`os.times`)
    pub cpu: bool,
    /// Deterministic call profiler
    pub profiler: bool,
    /// Allocation tracer
    pub memory: bool,
    /// Garbage collector statistics
    pub gc: bool,
    /// Line tracing of the entry function, or of the unit's own functions
    pub line_trace: bool,
}

impl Instruments {
    /// No instruments (warm-up runs)
    pub fn none() -> Self {
        Self::default()
    }

    /// Instruments requested by either side
    pub fn union(self, other: Self) -> Self {
        Self {
            cpu: self.cpu || other.cpu,
            profiler: self.profiler || other.profiler,
            memory: self.memory || other.memory,
            gc: self.gc || other.gc,
            line_trace: self.line_trace || other.line_trace,
        }
    }

    /// Whether anything is armed
    pub fn any(&self) -> bool {
        self.cpu || self.profiler || self.memory || self.gc || self.line_trace
    }
}
