#![warn(missing_docs)]
//! omniprof Core - Execution Model
//!
//! This crate describes one profiling job and how it ended:
//! - `ExecutionRequest` with its code unit, entry point, inputs and deadline
//! - `InputSource` answering interactive input from a scripted sequence
//! - `ExecutionOutcome` with status, captured streams and structured failure detail
//! - The embedded interpreter driver and the command that starts a worker

mod driver;
mod error;
mod input;
mod outcome;
mod request;

pub use driver::{
    DEFAULT_INTERPRETER, DRIVER_SOURCE, INTERPRETER_ENV, WORKER_COMMAND_FD, WORKER_MESSAGE_FD,
    WorkerCommand, resolve_interpreter,
};
pub use error::RequestError;
pub use input::{DEFAULT_INPUTS, InputSource};
pub use outcome::{ErrorDetail, ExecutionOutcome, OutcomeStatus};
pub use request::{
    DEFAULT_TIMEOUT, ExecutionRequest, LoadedSource, RequestShape, SourceUnit, TEXT_FILENAME,
};

pub use omniprof_ipc::EntryCall;
