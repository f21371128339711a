#![warn(missing_docs)]
//! omniprof IPC Protocol
//!
//! Wire protocol between the supervisor and the interpreter-side driver.
//! Frames are length-prefixed JSON so the driver needs nothing beyond its
//! standard library. Covers the handshake, execution commands, scripted
//! input round-trips, and the telemetry flushed after each execution.

mod framing;
mod messages;

pub use framing::{FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE, read_frame, write_frame};
pub use messages::{
    AllocationSite, CallerStat, ContextSwitches, CpuTimes, EntryCall, ExecutePlan, FunctionKey,
    FunctionStat, GcGeneration, GcStats, InstrumentError, Instruments, LineProfile, LineStat, RuntimeTelemetry,
    SupervisorCommand, TracedMemory, WireError, WireStatus, WorkerCapabilities, WorkerMessage,
};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the `<read_fd>,<write_fd>` pair for the driver
pub const IPC_FD_ENV: &str = "OMNIPROF_IPC_FD";
