//! Profiling Orchestrator
//!
//! Composes the execution sandbox with the instrumentation channels for one
//! request and merges everything into a [`ProfileReport`](omniprof_report::ProfileReport).
//!
//! ## Pipeline Overview
//!
//! ```text
//! ExecutionRequest
//!       │
//!       ▼
//! ┌─────────────┐
//! │  validate   │  Source, timeout, inputs, working directory
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │   sandbox   │  Spawn worker → warm-ups → start channels
//! │             │  → measured run → stop channels → kill
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │    merge    │  Hardware + static analysis + dynamic section
//! └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`profile`] - The orchestrator and its error type
//! - [`merge`] - Report assembly
//! - [`hardware`] - Hardware and static analysis collaborators

mod hardware;
mod merge;
mod profile;

pub use hardware::{HardwareSource, HostHardware, NoStaticAnalysis, StaticAnalysisSource};
pub use merge::ReportMerger;
pub use profile::{Orchestrator, ProfileError};
