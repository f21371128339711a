//! Hardware and Static Analysis Collaborators
//!
//! Both sections are opaque to the merger. Host hardware is detected once per
//! process and cached.
//!
//! Linux-specific data (CPU model, memory) degrades on other platforms to
//! `"Unknown"` or `0`.

use serde_json::{Value, json};
use std::sync::OnceLock;

/// Supplies the `hardware` section of a report
pub trait HardwareSource: Send + Sync {
    fn snapshot(&self) -> Option<Value>;
}

/// Supplies the `staticAnalysis` section of a report
pub trait StaticAnalysisSource: Send + Sync {
    fn analyze(&self, source: &str) -> Option<Value>;
}

/// No static analysis; the section is absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStaticAnalysis;

impl StaticAnalysisSource for NoStaticAnalysis {
    fn analyze(&self, _source: &str) -> Option<Value> {
        None
    }
}

/// The machine running the harness
#[derive(Debug, Clone, Copy, Default)]
pub struct HostHardware;

impl HardwareSource for HostHardware {
    fn snapshot(&self) -> Option<Value> {
        static SNAPSHOT: OnceLock<Value> = OnceLock::new();
        Some(SNAPSHOT.get_or_init(detect_host).clone())
    }
}

fn detect_host() -> Value {
    json!({
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "cpu": cpu_model().unwrap_or_else(|| "Unknown".to_string()),
        "cpuCores": cpu_cores(),
        "memoryGb": memory_gb().unwrap_or(0.0),
    })
}

/// CPU model name from /proc/cpuinfo (Linux only)
fn cpu_model() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|content| parse_cpu_model(&content))
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

fn parse_cpu_model(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .find(|l| l.starts_with("model name"))
        .and_then(|l| l.split(':').nth(1))
        .map(|s| s.trim().to_string())
}

fn cpu_cores() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

/// Total memory in GB from /proc/meminfo (Linux only)
fn memory_gb() -> Option<f64> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|content| parse_mem_total_gb(&content))
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

fn parse_mem_total_gb(meminfo: &str) -> Option<f64> {
    meminfo
        .lines()
        .find(|l| l.starts_with("MemTotal"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb as f64 / 1024.0 / 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_snapshot_is_cached() {
        let first = HostHardware.snapshot().unwrap();
        let second = HostHardware.snapshot().unwrap();
        assert_eq!(first, second);
        assert_eq!(first["os"], std::env::consts::OS);
        assert!(first["cpuCores"].as_u64().unwrap() >= 1);
    }

    #[test]
    fn test_proc_parsing() {
        let cpuinfo = "processor\t: 0\nvendor_id\t: GenuineIntel\nmodel name\t: Intel(R) Xeon(R) CPU @ 2.20GHz\n";
        assert_eq!(
            parse_cpu_model(cpuinfo).as_deref(),
            Some("Intel(R) Xeon(R) CPU @ 2.20GHz")
        );
        assert_eq!(parse_mem_total_gb("MemTotal:       16777216 kB\n"), Some(16.0));
        assert_eq!(parse_mem_total_gb("MemFree: 1 kB\n"), None);
    }

    #[test]
    fn test_no_static_analysis() {
        assert!(NoStaticAnalysis.analyze("print(1)").is_none());
    }
}
