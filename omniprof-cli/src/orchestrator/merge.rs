use crate::channels::ChannelSections;
use omniprof_report::{DynamicAnalysis, ProfileReport, RunMeta};
use serde_json::Value;

/// Combines collaborator output with the dynamic section into the final
/// report. Never fails: absent inputs stay absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportMerger;

impl ReportMerger {
    /// Assemble the final report from its three parts.
    pub fn merge(
        hardware: Option<Value>,
        static_analysis: Option<Value>,
        dynamic: DynamicAnalysis,
    ) -> ProfileReport {
        ProfileReport {
            hardware,
            static_analysis,
            dynamic_analysis: dynamic,
        }
    }

    /// Dynamic section from channel output and run metadata.
    pub fn dynamic(sections: ChannelSections, mut meta: RunMeta) -> DynamicAnalysis {
        meta.channels_omitted = sections.omitted;
        DynamicAnalysis {
            time: sections.time,
            memory: sections.memory,
            io: sections.io,
            gc: sections.gc,
            meta,
        }
    }
}
