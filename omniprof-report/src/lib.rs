#![warn(missing_docs)]
//! omniprof Report - Report Model and Output
//!
//! The merged profile of one code unit and its renderings:
//! - `ProfileReport` combining hardware, static and dynamic sections
//! - Per-channel snapshots (timing, memory, I/O, GC)
//! - JSON (machine-readable)

mod json;
mod report;

pub use json::{generate_json_report, generate_json_reports};
pub use report::{
    BatchSummary, CallTreeNode, ContextSwitchCounts, DynamicAnalysis, GcSnapshot,
    GenerationStats, Hotspot, IoSnapshot, LineProfileSection, LineTiming, MemorySnapshot,
    ProfileReport, RunMeta, TimeSnapshot, TopAllocator,
};

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// Human-readable terminal output
    #[default]
    Human,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" | "text" => Ok(OutputFormat::Human),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("text".parse::<OutputFormat>(), Ok(OutputFormat::Human));
        assert!("html".parse::<OutputFormat>().is_err());
    }
}
