//! Instrumentation Channels
//!
//! Independent measurement backends run around the measured execution. Each
//! channel either produces a complete snapshot or nothing; one channel
//! failing (or panicking) never affects the others or the execution.

mod gc;
mod io;
mod memory;
pub(crate) mod procfs;
mod timing;

pub use gc::GcChannel;
pub use io::IoChannel;
pub use memory::MemoryChannel;
pub use procfs::{ProcFs, RealProcFs};
pub use timing::{TimingChannel, build_call_tree, rank_hotspots};

use crate::config::ChannelsConfig;
use crate::sandbox::{ExecutionHooks, WorkerProbe};
use omniprof_ipc::{Instruments, RuntimeTelemetry};
use omniprof_report::{GcSnapshot, IoSnapshot, MemorySnapshot, TimeSnapshot};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The four channel variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Wall and CPU time, hotspots, line timings
    Timing,
    /// Traced allocations
    Memory,
    /// Process I/O counters
    Io,
    /// Collector statistics
    Gc,
}

impl ChannelKind {
    /// Name of the report section the channel fills
    pub fn section(self) -> &'static str {
        match self {
            ChannelKind::Timing => "time",
            ChannelKind::Memory => "memory",
            ChannelKind::Io => "io",
            ChannelKind::Gc => "gc",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.section())
    }
}

/// Snapshot produced by a channel's `stop`
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSnapshot {
    /// From the timing channel
    Time(TimeSnapshot),
    /// From the memory channel
    Memory(MemorySnapshot),
    /// From the I/O channel
    Io(IoSnapshot),
    /// From the GC channel
    Gc(GcSnapshot),
}

/// Why a channel produced no section
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The interpreter lacks the instrument
    #[error("{0} is not available in this interpreter")]
    Unavailable(&'static str),

    /// `stop` without a successful `start`
    #[error("channel was not started")]
    NotStarted,

    /// The driver sent nothing for the instrument
    #[error("worker reported no {0} telemetry")]
    MissingTelemetry(&'static str),

    /// The driver could not arm the instrument
    #[error("{instrument} could not be armed: {message}")]
    Instrument {
        /// Instrument name
        instrument: String,
        /// Driver-side error
        message: String,
    },

    /// A kernel counter file could not be read
    #[error("failed to read {}: {source}", .path.display())]
    Counters {
        /// Counter file
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// A kernel counter file had an unexpected shape
    #[error("malformed counters in {}: {reason}", .path.display())]
    Parse {
        /// Counter file
        path: PathBuf,
        /// What did not parse
        reason: String,
    },
}

/// Everything a channel may consult when it stops
#[derive(Debug, Clone, Copy)]
pub struct StopContext<'a> {
    /// The worker that ran the measured execution
    pub probe: &'a WorkerProbe,
    /// Driver telemetry, absent when the unit was abandoned before flushing
    pub telemetry: Option<&'a RuntimeTelemetry>,
    /// Wall time of the measured attempt as seen by the supervisor
    pub elapsed: Duration,
}

impl StopContext<'_> {
    /// The telemetry, or the reason a channel depending on `instrument` has none.
    pub(crate) fn require(&self, instrument: &'static str) -> Result<&RuntimeTelemetry, ChannelError> {
        let telemetry = self
            .telemetry
            .ok_or(ChannelError::MissingTelemetry(instrument))?;
        if let Some(failure) = telemetry
            .instrument_errors
            .iter()
            .find(|e| e.instrument == instrument)
        {
            return Err(ChannelError::Instrument {
                instrument: failure.instrument.clone(),
                message: failure.message.clone(),
            });
        }
        Ok(telemetry)
    }
}

/// Uniform contract for measurement backends.
///
/// `start` runs before the measured execution is sent to the worker, `stop`
/// after it finished or was abandoned. Interpreter-side data arrives through
/// the [`StopContext`]; `instruments` says which of it the channel needs.
pub trait InstrumentationChannel: Send {
    /// Which section the channel fills
    fn kind(&self) -> ChannelKind;

    /// Interpreter-side instruments this channel depends on.
    fn instruments(&self) -> Instruments {
        Instruments::none()
    }

    /// Arm the channel against a ready worker.
    fn start(&mut self, probe: &WorkerProbe) -> Result<(), ChannelError>;

    /// Produce the channel's section.
    fn stop(&mut self, ctx: &StopContext<'_>) -> Result<ChannelSnapshot, ChannelError>;
}

/// Which channels to run and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Run the timing channel
    pub timing: bool,
    /// Run the memory channel
    pub memory: bool,
    /// Run the I/O channel
    pub io: bool,
    /// Run the GC channel
    pub gc: bool,
    /// Allow per-line timings
    pub line_level: bool,
    /// Rebuild the call tree
    pub call_tree: bool,
    /// Hotspots kept in the timing section
    pub hotspot_limit: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self::from(&ChannelsConfig::default())
    }
}

impl From<&ChannelsConfig> for ChannelSettings {
    fn from(config: &ChannelsConfig) -> Self {
        Self {
            timing: config.timing,
            memory: config.memory,
            io: config.io,
            gc: config.gc,
            line_level: config.line_level,
            call_tree: config.call_tree,
            hotspot_limit: config.hotspot_limit,
        }
    }
}

/// Sections assembled from the channels that succeeded
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSections {
    /// Timing section
    pub time: Option<TimeSnapshot>,
    /// Memory section
    pub memory: Option<MemorySnapshot>,
    /// I/O section
    pub io: Option<IoSnapshot>,
    /// GC section
    pub gc: Option<GcSnapshot>,
    /// Sections of enabled channels that produced nothing
    pub omitted: Vec<String>,
}

#[derive(Debug)]
enum SlotState {
    Idle,
    Started,
    Failed,
    Done(ChannelSnapshot),
}

struct Slot {
    channel: Box<dyn InstrumentationChannel>,
    state: SlotState,
}

/// The channels of one request, isolated from each other.
pub struct ChannelSet {
    slots: Vec<Slot>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run a channel call, turning errors and panics into a logged failure.
fn isolated<T>(
    kind: ChannelKind,
    phase: &str,
    call: impl FnOnce() -> Result<T, ChannelError>,
) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::warn!(channel = %kind, "{} failed: {}", phase, e);
            None
        }
        Err(payload) => {
            tracing::warn!(
                channel = %kind,
                "{} panicked: {}",
                phase,
                panic_message(payload.as_ref())
            );
            None
        }
    }
}

impl ChannelSet {
    /// Set over arbitrary channels
    pub fn new(channels: Vec<Box<dyn InstrumentationChannel>>) -> Self {
        Self {
            slots: channels
                .into_iter()
                .map(|channel| Slot {
                    channel,
                    state: SlotState::Idle,
                })
                .collect(),
        }
    }

    /// The enabled built-in channels. `line_level` is the request's own flag.
    pub fn from_settings(settings: &ChannelSettings, line_level: bool) -> Self {
        Self::with_procfs(settings, line_level, Arc::new(RealProcFs))
    }

    /// Like [`from_settings`](Self::from_settings) with a custom `/proc`.
    pub fn with_procfs(
        settings: &ChannelSettings,
        line_level: bool,
        procfs: Arc<dyn ProcFs>,
    ) -> Self {
        let mut channels: Vec<Box<dyn InstrumentationChannel>> = Vec::new();
        if settings.timing {
            channels.push(Box::new(
                TimingChannel::new(Arc::clone(&procfs))
                    .hotspot_limit(settings.hotspot_limit)
                    .line_level(settings.line_level && line_level)
                    .call_tree(settings.call_tree),
            ));
        }
        if settings.memory {
            channels.push(Box::new(MemoryChannel::new()));
        }
        if settings.io {
            channels.push(Box::new(IoChannel::new(Arc::clone(&procfs))));
        }
        if settings.gc {
            channels.push(Box::new(GcChannel::new()));
        }
        Self::new(channels)
    }

    /// Number of channels
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// No channel enabled
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Start every channel; returns the instruments the started ones need.
    pub fn start_all(&mut self, probe: &WorkerProbe) -> Instruments {
        let mut instruments = Instruments::none();
        for slot in &mut self.slots {
            let kind = slot.channel.kind();
            let channel = &mut slot.channel;
            let started = isolated(kind, "start", || {
                channel.start(probe)?;
                Ok(channel.instruments())
            });
            match started {
                Some(wanted) => {
                    instruments = instruments.union(wanted);
                    slot.state = SlotState::Started;
                }
                None => slot.state = SlotState::Failed,
            }
        }
        instruments
    }

    /// Stop every started channel.
    pub fn stop_all(&mut self, ctx: &StopContext<'_>) {
        for slot in &mut self.slots {
            if !matches!(slot.state, SlotState::Started) {
                continue;
            }
            let kind = slot.channel.kind();
            let channel = &mut slot.channel;
            slot.state = match isolated(kind, "stop", || channel.stop(ctx)) {
                Some(snapshot) => SlotState::Done(snapshot),
                None => SlotState::Failed,
            };
        }
    }

    /// Collect snapshots into report sections.
    pub fn into_sections(self) -> ChannelSections {
        let mut sections = ChannelSections::default();
        for slot in self.slots {
            let kind = slot.channel.kind();
            match slot.state {
                SlotState::Done(ChannelSnapshot::Time(s)) => sections.time = Some(s),
                SlotState::Done(ChannelSnapshot::Memory(s)) => sections.memory = Some(s),
                SlotState::Done(ChannelSnapshot::Io(s)) => sections.io = Some(s),
                SlotState::Done(ChannelSnapshot::Gc(s)) => sections.gc = Some(s),
                SlotState::Idle | SlotState::Started | SlotState::Failed => {
                    sections.omitted.push(kind.section().to_string())
                }
            }
        }
        sections
    }
}

impl ExecutionHooks for ChannelSet {
    fn before_measured(&mut self, probe: &WorkerProbe) -> Instruments {
        self.start_all(probe)
    }

    fn after_measured(
        &mut self,
        probe: &WorkerProbe,
        telemetry: Option<&RuntimeTelemetry>,
        elapsed: Duration,
    ) {
        self.stop_all(&StopContext {
            probe,
            telemetry,
            elapsed,
        });
    }
}
