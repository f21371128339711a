#![warn(missing_docs)]
//! # omniprof
//!
//! Sandboxed dynamic profiling of Python code with a unified report.
//!
//! omniprof runs untrusted code units and measures them:
//! - **Process Isolation**: every request runs in its own interpreter worker with a fresh namespace
//! - **Hard Deadlines**: cooperative abort first, then the worker's process group is killed
//! - **Scripted Input**: `input()` is answered from a deterministic sequence
//! - **Independent Channels**: timing, memory, I/O and GC measurements fail separately
//! - **Structured Outcomes**: timeouts, exceptions and exits are typed, never matched on text
//!
//! ## Quick Start
//!
//! ```ignore
//! use omniprof::prelude::*;
//!
//! let request = ExecutionRequest::from_code("def fib(n):\n    return n if n < 2 else fib(n-1) + fib(n-2)\nprint(fib(20))")
//!     .with_timeout(std::time::Duration::from_secs(2));
//! let report = Orchestrator::default().profile(&request)?;
//! println!("{}", generate_json_report(&report)?);
//! ```
//!
//! ## Function-Level Profiling
//!
//! ```ignore
//! let request = ExecutionRequest::from_path("solver.py")
//!     .with_entry(EntryCall { function: "solve".into(), args: vec![serde_json::json!(30)] });
//! ```

// Re-export the execution model
pub use omniprof_core::{
    EntryCall, ErrorDetail, ExecutionOutcome, ExecutionRequest, InputSource, OutcomeStatus,
    RequestError, RequestShape, SourceUnit,
};

// Re-export the report model
pub use omniprof_report::{
    BatchSummary, CallTreeNode, ContextSwitchCounts, DynamicAnalysis, GcSnapshot, Hotspot,
    IoSnapshot, LineProfileSection, MemorySnapshot, OutputFormat, ProfileReport, RunMeta,
    TimeSnapshot, TopAllocator, generate_json_report, generate_json_reports,
};

// Re-export the harness
pub use omniprof_cli::{
    ChannelSettings, ExecutionSandbox, HardwareSource, HostHardware, InstrumentationChannel,
    NoStaticAnalysis, OmniConfig, Orchestrator, ProfileError, ReportMerger, SandboxError,
    StaticAnalysisSource, format_human_output,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        EntryCall, ExecutionRequest, Orchestrator, OutcomeStatus, ProfileReport,
        generate_json_report,
    };
}

/// Run the omniprof command line.
///
/// ```ignore
/// fn main() {
///     omniprof::run().unwrap();
/// }
/// ```
pub use omniprof_cli::run;
