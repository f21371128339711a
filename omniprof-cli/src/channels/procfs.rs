//! Process counters read from `/proc`.

use super::ChannelError;
use std::io;
use std::path::{Path, PathBuf};

/// Filesystem access for `/proc` reads, swappable in tests.
pub trait ProcFs: Send + Sync {
    /// Whole content of a `/proc` file
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
}

/// The host's `/proc`
#[derive(Debug, Clone, Copy, Default)]
pub struct RealProcFs;

impl ProcFs for RealProcFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// Cumulative I/O counters of a process (`/proc/<pid>/io`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoCounters {
    /// Read-family syscalls
    pub syscr: u64,
    /// Write-family syscalls
    pub syscw: u64,
    /// Bytes fetched from storage
    pub read_bytes: u64,
    /// Bytes sent to storage
    pub write_bytes: u64,
    /// Bytes passed to read-family syscalls
    pub rchar: u64,
    /// Bytes passed to write-family syscalls
    pub wchar: u64,
}

impl IoCounters {
    /// Field-wise difference; counters never go backwards, clamp if they do.
    pub fn since(&self, earlier: &IoCounters) -> IoCounters {
        IoCounters {
            syscr: self.syscr.saturating_sub(earlier.syscr),
            syscw: self.syscw.saturating_sub(earlier.syscw),
            read_bytes: self.read_bytes.saturating_sub(earlier.read_bytes),
            write_bytes: self.write_bytes.saturating_sub(earlier.write_bytes),
            rchar: self.rchar.saturating_sub(earlier.rchar),
            wchar: self.wchar.saturating_sub(earlier.wchar),
        }
    }
}

/// Cumulative CPU ticks of a process (`/proc/<pid>/stat`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTicks {
    /// Ticks in user mode
    pub utime: u64,
    /// Ticks in kernel mode
    pub stime: u64,
}

impl CpuTicks {
    /// (user, system) seconds elapsed since `earlier`
    pub fn seconds_since(&self, earlier: &CpuTicks) -> (f64, f64) {
        let hz = clock_ticks_per_second();
        (
            self.utime.saturating_sub(earlier.utime) as f64 / hz,
            self.stime.saturating_sub(earlier.stime) as f64 / hz,
        )
    }
}

/// Cumulative context switches of a process (`/proc/<pid>/status`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchCounts {
    /// `voluntary_ctxt_switches`
    pub voluntary: u64,
    /// `nonvoluntary_ctxt_switches`
    pub involuntary: u64,
}

impl SwitchCounts {
    /// Field-wise difference, clamped at zero
    pub fn since(&self, earlier: &SwitchCounts) -> SwitchCounts {
        SwitchCounts {
            voluntary: self.voluntary.saturating_sub(earlier.voluntary),
            involuntary: self.involuntary.saturating_sub(earlier.involuntary),
        }
    }
}

fn clock_ticks_per_second() -> f64 {
    // SAFETY: sysconf has no preconditions.
    let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if hz > 0 { hz as f64 } else { 100.0 }
}

fn proc_path(pid: u32, file: &str) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/{file}"))
}

fn read(fs: &dyn ProcFs, path: PathBuf) -> Result<(String, PathBuf), ChannelError> {
    match fs.read_to_string(&path) {
        Ok(content) => Ok((content, path)),
        Err(source) => Err(ChannelError::Counters { path, source }),
    }
}

/// I/O counters of `pid`
pub fn read_io(fs: &dyn ProcFs, pid: u32) -> Result<IoCounters, ChannelError> {
    let (content, path) = read(fs, proc_path(pid, "io"))?;
    parse_io(&content).map_err(|reason| ChannelError::Parse { path, reason })
}

/// CPU ticks of `pid`
pub fn read_cpu_ticks(fs: &dyn ProcFs, pid: u32) -> Result<CpuTicks, ChannelError> {
    let (content, path) = read(fs, proc_path(pid, "stat"))?;
    parse_stat(&content).map_err(|reason| ChannelError::Parse { path, reason })
}

/// Context switches of `pid`
pub fn read_switches(fs: &dyn ProcFs, pid: u32) -> Result<SwitchCounts, ChannelError> {
    let (content, path) = read(fs, proc_path(pid, "status"))?;
    parse_status(&content).map_err(|reason| ChannelError::Parse { path, reason })
}

fn parse_io(content: &str) -> Result<IoCounters, String> {
    let mut counters = IoCounters::default();
    let mut seen = 0usize;
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let slot = match key.trim() {
            "syscr" => &mut counters.syscr,
            "syscw" => &mut counters.syscw,
            "read_bytes" => &mut counters.read_bytes,
            "write_bytes" => &mut counters.write_bytes,
            "rchar" => &mut counters.rchar,
            "wchar" => &mut counters.wchar,
            _ => continue,
        };
        *slot = value
            .trim()
            .parse()
            .map_err(|_| format!("bad value for {}: {:?}", key.trim(), value.trim()))?;
        seen += 1;
    }
    if seen < 6 {
        return Err(format!("expected 6 counters, found {seen}"));
    }
    Ok(counters)
}

fn parse_status(content: &str) -> Result<SwitchCounts, String> {
    let mut voluntary = None;
    let mut involuntary = None;
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let slot = match key.trim() {
            "voluntary_ctxt_switches" => &mut voluntary,
            "nonvoluntary_ctxt_switches" => &mut involuntary,
            _ => continue,
        };
        *slot = Some(
            value
                .trim()
                .parse::<u64>()
                .map_err(|_| format!("bad value for {}: {:?}", key.trim(), value.trim()))?,
        );
    }
    match (voluntary, involuntary) {
        (Some(voluntary), Some(involuntary)) => Ok(SwitchCounts {
            voluntary,
            involuntary,
        }),
        _ => Err("missing context switch counters".to_string()),
    }
}

fn parse_stat(content: &str) -> Result<CpuTicks, String> {
    // comm may contain spaces and parentheses; fields resume after the last ')'
    let rest = content
        .rfind(')')
        .map(|i| &content[i + 1..])
        .ok_or_else(|| "missing command field".to_string())?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // fields[0] is state (field 3); utime and stime are fields 14 and 15
    let field = |index: usize, name: &str| -> Result<u64, String> {
        fields
            .get(index)
            .ok_or_else(|| format!("missing {name}"))?
            .parse()
            .map_err(|_| format!("bad {name}"))
    };
    Ok(CpuTicks {
        utime: field(11, "utime")?,
        stime: field(12, "stime")?,
    })
}
