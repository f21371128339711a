use super::{ChannelError, ChannelKind, ChannelSnapshot, InstrumentationChannel, StopContext};
use crate::sandbox::WorkerProbe;
use omniprof_ipc::Instruments;
use omniprof_report::{GcSnapshot, GenerationStats};

/// Collector state after the measured window. Values are process-scope and
/// cumulative, not deltas.
#[derive(Debug, Default)]
pub struct GcChannel {
    started: bool,
}

impl GcChannel {
    /// Channel in its idle state
    pub fn new() -> Self {
        Self::default()
    }
}

impl InstrumentationChannel for GcChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Gc
    }

    fn instruments(&self) -> Instruments {
        Instruments {
            gc: true,
            ..Instruments::none()
        }
    }

    fn start(&mut self, probe: &WorkerProbe) -> Result<(), ChannelError> {
        if !probe.capabilities.has_gc {
            return Err(ChannelError::Unavailable("gc"));
        }
        self.started = true;
        Ok(())
    }

    fn stop(&mut self, ctx: &StopContext<'_>) -> Result<ChannelSnapshot, ChannelError> {
        if !std::mem::take(&mut self.started) {
            return Err(ChannelError::NotStarted);
        }
        let stats = ctx
            .require("gc")?
            .gc
            .as_ref()
            .ok_or(ChannelError::MissingTelemetry("gc"))?;
        Ok(ChannelSnapshot::Gc(GcSnapshot {
            enabled: stats.enabled,
            total_objects: stats.total_objects,
            generations: stats
                .generations
                .iter()
                .zip(0u32..)
                .map(|(generation, index)| GenerationStats {
                    generation: index,
                    collections: generation.collections,
                    objects: generation.objects,
                    threshold: generation.threshold,
                })
                .collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::probe;
    use super::*;
    use omniprof_ipc::{GcGeneration, GcStats, RuntimeTelemetry};
    use std::time::Duration;

    #[test]
    fn test_generations_are_numbered() {
        let probe = probe();
        let telemetry = RuntimeTelemetry {
            gc: Some(GcStats {
                enabled: true,
                total_objects: 5321,
                generations: vec![
                    GcGeneration {
                        collections: 40,
                        objects: 12,
                        threshold: 700,
                    },
                    GcGeneration {
                        collections: 3,
                        objects: 0,
                        threshold: 10,
                    },
                ],
            }),
            ..RuntimeTelemetry::default()
        };
        let mut channel = GcChannel::new();
        channel.start(&probe).unwrap();
        let ChannelSnapshot::Gc(gc) = channel
            .stop(&StopContext {
                probe: &probe,
                telemetry: Some(&telemetry),
                elapsed: Duration::ZERO,
            })
            .unwrap()
        else {
            panic!("expected a gc snapshot");
        };
        assert!(gc.enabled);
        assert_eq!(gc.total_objects, 5321);
        assert_eq!(gc.generations[1].generation, 1);
        assert_eq!(gc.generations[1].threshold, 10);
        assert_eq!(gc.generations[0].collections, 40);
    }

    #[test]
    fn test_stop_without_start() {
        let probe = probe();
        let result = GcChannel::new().stop(&StopContext {
            probe: &probe,
            telemetry: None,
            elapsed: Duration::ZERO,
        });
        assert!(matches!(result, Err(ChannelError::NotStarted)));
    }
}
