use super::hardware::{HardwareSource, HostHardware, NoStaticAnalysis, StaticAnalysisSource};
use super::merge::ReportMerger;
use crate::channels::{ChannelSet, ChannelSettings, ProcFs, RealProcFs};
use crate::sandbox::{ExecutionSandbox, SandboxError};
use chrono::{DateTime, Utc};
use omniprof_core::{ExecutionOutcome, ExecutionRequest, RequestError};
use omniprof_ipc::WorkerCapabilities;
use omniprof_report::{ProfileReport, RunMeta};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Harness failure. Failures of the profiled code are reported, not raised.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The request was rejected before anything ran
    #[error("invalid request: {0}")]
    Request(#[from] RequestError),

    /// The worker could not be run or talked to
    #[error(transparent)]
    Sandbox(SandboxError),
}

impl From<SandboxError> for ProfileError {
    fn from(error: SandboxError) -> Self {
        match error {
            SandboxError::Request(e) => ProfileError::Request(e),
            other => ProfileError::Sandbox(other),
        }
    }
}

/// Runs one code unit with every enabled channel and merges the results.
#[derive(Clone)]
pub struct Orchestrator {
    sandbox: ExecutionSandbox,
    channels: ChannelSettings,
    hardware: Arc<dyn HardwareSource>,
    static_analysis: Arc<dyn StaticAnalysisSource>,
    procfs: Arc<dyn ProcFs>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(ExecutionSandbox::default())
    }
}

impl Orchestrator {
    /// Orchestrator over `sandbox` with the default channels
    pub fn new(sandbox: ExecutionSandbox) -> Self {
        Self {
            sandbox,
            channels: ChannelSettings::default(),
            hardware: Arc::new(HostHardware),
            static_analysis: Arc::new(NoStaticAnalysis),
            procfs: Arc::new(RealProcFs),
        }
    }

    /// Channels to run
    pub fn with_channels(mut self, channels: ChannelSettings) -> Self {
        self.channels = channels;
        self
    }

    /// Source of the `hardware` section
    pub fn with_hardware(mut self, hardware: impl HardwareSource + 'static) -> Self {
        self.hardware = Arc::new(hardware);
        self
    }

    /// Source of the `staticAnalysis` section
    pub fn with_static_analysis(mut self, source: impl StaticAnalysisSource + 'static) -> Self {
        self.static_analysis = Arc::new(source);
        self
    }

    /// `/proc` used by the kernel-counter channels
    pub fn with_procfs(mut self, procfs: Arc<dyn ProcFs>) -> Self {
        self.procfs = procfs;
        self
    }

    /// The sandbox running the workers
    pub fn sandbox(&self) -> &ExecutionSandbox {
        &self.sandbox
    }

    /// The channels run per request
    pub fn channels(&self) -> &ChannelSettings {
        &self.channels
    }

    /// Profile inline source with default request settings.
    pub fn profile_code(&self, code: impl Into<String>) -> Result<ProfileReport, ProfileError> {
        self.profile(&ExecutionRequest::from_code(code))
    }

    /// Profile a script with default request settings.
    pub fn profile_file(&self, path: impl Into<PathBuf>) -> Result<ProfileReport, ProfileError> {
        self.profile(&ExecutionRequest::from_path(path))
    }

    /// Execute the request once under every enabled channel.
    ///
    /// Validation and source loading happen before any worker or channel
    /// exists. A channel that fails is left out of the report and named in
    /// `meta.channelsOmitted`.
    pub fn profile(&self, request: &ExecutionRequest) -> Result<ProfileReport, ProfileError> {
        let source = request.load()?;
        let started_at = Utc::now();

        let mut channels =
            ChannelSet::with_procfs(&self.channels, request.line_level(), Arc::clone(&self.procfs));
        let run = self.sandbox.run_loaded(request, &source, &mut channels)?;
        let sections = channels.into_sections();
        if !sections.omitted.is_empty() {
            tracing::debug!(
                "{}: channels omitted: {}",
                source.label,
                sections.omitted.join(", ")
            );
        }

        let meta = run_meta(
            request,
            &source.label,
            &run.outcome,
            &run.capabilities,
            started_at,
        );
        let dynamic = ReportMerger::dynamic(sections, meta);
        Ok(ReportMerger::merge(
            self.hardware.snapshot(),
            self.static_analysis.analyze(&source.code),
            dynamic,
        ))
    }
}

fn run_meta(
    request: &ExecutionRequest,
    label: &str,
    outcome: &ExecutionOutcome,
    capabilities: &WorkerCapabilities,
    started_at: DateTime<Utc>,
) -> RunMeta {
    RunMeta {
        status: outcome.status(),
        error_detail: outcome.error_detail().cloned(),
        captured_stdout: outcome.captured_stdout().to_string(),
        captured_stderr: outcome.captured_stderr().to_string(),
        timeout_seconds: request.timeout().as_secs_f64(),
        warmup_runs: request.warmup_runs(),
        source: label.to_string(),
        interpreter: Some(format!(
            "{} {}",
            capabilities.implementation, capabilities.version
        )),
        started_at,
        duration_ms: outcome.duration().as_secs_f64() * 1000.0,
        channels_omitted: Vec::new(),
    }
}
