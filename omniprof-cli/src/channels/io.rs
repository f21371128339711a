use super::procfs::{self, IoCounters, ProcFs};
use super::{ChannelError, ChannelKind, ChannelSnapshot, InstrumentationChannel, StopContext};
use crate::sandbox::WorkerProbe;
use omniprof_report::IoSnapshot;
use std::sync::Arc;

/// Worker I/O counter deltas over the measured window.
///
/// Counters are process-wide, so supervisor traffic on the message pipes is
/// included.
pub struct IoChannel {
    procfs: Arc<dyn ProcFs>,
    baseline: Option<IoCounters>,
}

impl IoChannel {
    /// Channel reading counters through `procfs`
    pub fn new(procfs: Arc<dyn ProcFs>) -> Self {
        Self {
            procfs,
            baseline: None,
        }
    }
}

impl InstrumentationChannel for IoChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Io
    }

    fn start(&mut self, probe: &WorkerProbe) -> Result<(), ChannelError> {
        self.baseline = Some(procfs::read_io(self.procfs.as_ref(), probe.pid)?);
        Ok(())
    }

    fn stop(&mut self, ctx: &StopContext<'_>) -> Result<ChannelSnapshot, ChannelError> {
        let baseline = self.baseline.take().ok_or(ChannelError::NotStarted)?;
        let now = procfs::read_io(self.procfs.as_ref(), ctx.probe.pid)?;
        let delta = now.since(&baseline);
        Ok(ChannelSnapshot::Io(IoSnapshot {
            read_count: delta.syscr,
            write_count: delta.syscw,
            read_bytes: delta.read_bytes,
            write_bytes: delta.write_bytes,
            read_chars: delta.rchar,
            write_chars: delta.wchar,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::procfs::mock::{MockProcFs, io_file};
    use super::super::tests::probe;
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_counter_deltas() {
        let probe = probe();
        let fs = Arc::new(MockProcFs::default());
        fs.set("/proc/4242/io", &io_file(10, 20, 0, 4096));
        let mut channel = IoChannel::new(fs.clone());
        channel.start(&probe).unwrap();

        fs.set("/proc/4242/io", &io_file(13, 25, 512, 8192));
        let snapshot = channel
            .stop(&StopContext {
                probe: &probe,
                telemetry: None,
                elapsed: Duration::from_millis(5),
            })
            .unwrap();
        assert_eq!(
            snapshot,
            ChannelSnapshot::Io(IoSnapshot {
                read_count: 3,
                write_count: 5,
                read_bytes: 512,
                write_bytes: 4096,
                read_chars: 1024,
                write_chars: 8192,
            })
        );
    }

    #[test]
    fn test_worker_gone_before_stop() {
        let probe = probe();
        let fs = Arc::new(MockProcFs::default());
        fs.set("/proc/4242/io", &io_file(1, 1, 1, 1));
        let mut channel = IoChannel::new(fs.clone());
        channel.start(&probe).unwrap();

        fs.set("/proc/4242/io", "");
        let result = channel.stop(&StopContext {
            probe: &probe,
            telemetry: None,
            elapsed: Duration::ZERO,
        });
        assert!(matches!(result, Err(ChannelError::Parse { .. })));
    }

    #[test]
    fn test_unreadable_counters_fail_start() {
        let mut channel = IoChannel::new(Arc::new(MockProcFs::default()));
        assert!(matches!(
            channel.start(&probe()),
            Err(ChannelError::Counters { .. })
        ));
    }
}
