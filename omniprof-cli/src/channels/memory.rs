use super::{ChannelError, ChannelKind, ChannelSnapshot, InstrumentationChannel, StopContext};
use crate::sandbox::WorkerProbe;
use omniprof_ipc::Instruments;
use omniprof_report::{MemorySnapshot, TopAllocator};

/// Traced allocations over the measured window.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    started: bool,
}

impl MemoryChannel {
    /// Channel in its idle state
    pub fn new() -> Self {
        Self::default()
    }
}

impl InstrumentationChannel for MemoryChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Memory
    }

    fn instruments(&self) -> Instruments {
        Instruments {
            memory: true,
            ..Instruments::none()
        }
    }

    fn start(&mut self, probe: &WorkerProbe) -> Result<(), ChannelError> {
        if !probe.capabilities.has_tracemalloc {
            return Err(ChannelError::Unavailable("tracemalloc"));
        }
        self.started = true;
        Ok(())
    }

    fn stop(&mut self, ctx: &StopContext<'_>) -> Result<ChannelSnapshot, ChannelError> {
        if !std::mem::take(&mut self.started) {
            return Err(ChannelError::NotStarted);
        }
        let telemetry = ctx.require("memory")?;
        let traced = telemetry
            .memory
            .as_ref()
            .ok_or(ChannelError::MissingTelemetry("memory"))?;
        let wall = telemetry
            .wall_time
            .unwrap_or_else(|| ctx.elapsed.as_secs_f64());
        let allocation_rate = if wall > 0.0 {
            traced.blocks as f64 / wall
        } else {
            0.0
        };
        Ok(ChannelSnapshot::Memory(MemorySnapshot {
            peak: traced.peak,
            current: traced.current,
            allocation_count: traced.blocks,
            allocation_rate,
            top_allocators: traced
                .top_allocators
                .iter()
                .map(|site| TopAllocator {
                    file: site.file.clone(),
                    line: site.line,
                    size: site.size,
                    count: site.count,
                })
                .collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::probe;
    use super::*;
    use omniprof_ipc::{AllocationSite, RuntimeTelemetry, TracedMemory};
    use std::time::Duration;

    fn stop_with(telemetry: &RuntimeTelemetry) -> Result<ChannelSnapshot, ChannelError> {
        let probe = probe();
        let mut channel = MemoryChannel::new();
        channel.start(&probe)?;
        channel.stop(&StopContext {
            probe: &probe,
            telemetry: Some(telemetry),
            elapsed: Duration::from_secs(2),
        })
    }

    #[test]
    fn test_allocation_rate() {
        let telemetry = RuntimeTelemetry {
            wall_time: Some(0.5),
            memory: Some(TracedMemory {
                current: 1024,
                peak: 4096,
                blocks: 100,
                top_allocators: Vec::new(),
            }),
            ..RuntimeTelemetry::default()
        };
        let ChannelSnapshot::Memory(memory) = stop_with(&telemetry).unwrap() else {
            panic!("expected a memory snapshot");
        };
        assert_eq!(memory.peak, 4096);
        assert_eq!(memory.allocation_count, 100);
        assert!((memory.allocation_rate - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_wall_time_gives_zero_rate() {
        let telemetry = RuntimeTelemetry {
            wall_time: Some(0.0),
            memory: Some(TracedMemory {
                current: 1,
                peak: 1,
                blocks: 5,
                top_allocators: Vec::new(),
            }),
            ..RuntimeTelemetry::default()
        };
        let ChannelSnapshot::Memory(memory) = stop_with(&telemetry).unwrap() else {
            panic!("expected a memory snapshot");
        };
        assert_eq!(memory.allocation_rate, 0.0);
    }

    #[test]
    fn test_top_allocators_carried_over() {
        let telemetry = RuntimeTelemetry {
            wall_time: Some(1.0),
            memory: Some(TracedMemory {
                current: 9000,
                peak: 12000,
                blocks: 40,
                top_allocators: vec![
                    AllocationSite {
                        file: "unit.py".to_string(),
                        line: 3,
                        size: 8000,
                        count: 30,
                    },
                    AllocationSite {
                        file: "unit.py".to_string(),
                        line: 7,
                        size: 1000,
                        count: 10,
                    },
                ],
            }),
            ..RuntimeTelemetry::default()
        };
        let ChannelSnapshot::Memory(memory) = stop_with(&telemetry).unwrap() else {
            panic!("expected a memory snapshot");
        };
        assert_eq!(memory.top_allocators.len(), 2);
        assert_eq!(memory.top_allocators[0].line, 3);
        assert_eq!(memory.top_allocators[0].size, 8000);
        assert_eq!(memory.top_allocators[1].count, 10);
    }

    #[test]
    fn test_missing_tracer() {
        assert!(matches!(
            stop_with(&RuntimeTelemetry::default()),
            Err(ChannelError::MissingTelemetry("memory"))
        ));

        let mut probe = probe();
        probe.capabilities.has_tracemalloc = false;
        assert!(matches!(
            MemoryChannel::new().start(&probe),
            Err(ChannelError::Unavailable(_))
        ));
    }
}
