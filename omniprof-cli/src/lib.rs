#![warn(missing_docs)]
//! omniprof CLI Library
//!
//! Sandboxed profiling of Python code units: the worker supervisor, the
//! instrumentation channels, the orchestrator that runs them around one
//! execution, and the `omniprof` command line.
//!
//! # Example
//!
//! ```ignore
//! use omniprof_cli::Orchestrator;
//!
//! let report = Orchestrator::default().profile_code("print(sum(range(10)))")?;
//! assert!(report.is_completed());
//! ```

mod channels;
mod config;
mod formatting;
mod orchestrator;
mod planner;
mod sandbox;

pub use channels::{
    ChannelError, ChannelKind, ChannelSections, ChannelSet, ChannelSettings, ChannelSnapshot,
    GcChannel, InstrumentationChannel, IoChannel, MemoryChannel, ProcFs, RealProcFs, StopContext,
    TimingChannel, build_call_tree, rank_hotspots,
};
pub use config::*;
pub use formatting::format_human_output;
pub use orchestrator::{
    HardwareSource, HostHardware, NoStaticAnalysis, Orchestrator, ProfileError, ReportMerger,
    StaticAnalysisSource,
};
pub use planner::{ProfilePlan, build_plan};
pub use sandbox::{
    ExecutionHooks, ExecutionSandbox, MALFORMED_REPORT, NoHooks, SandboxError, SandboxRun,
    WORKER_TERMINATED, WorkerProbe,
};

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use omniprof_core::{EntryCall, ExecutionRequest, RequestShape, resolve_interpreter};
use omniprof_report::{
    BatchSummary, OutputFormat, ProfileReport, generate_json_report, generate_json_reports,
};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use regex::Regex;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

/// omniprof CLI arguments
#[derive(Parser, Debug)]
#[command(name = "omniprof")]
#[command(author, version, about = "omniprof - sandboxed profiling for Python code")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Optional subcommand (Run, List, Init, Doctor); defaults to Run
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Arguments of the default `run` command
    #[command(flatten)]
    pub run: RunArgs,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// What to profile and how
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Python files or directories to profile
    pub paths: Vec<PathBuf>,

    /// Profile this source text instead of files
    #[arg(long, conflicts_with_all = ["paths", "request"])]
    pub code: Option<String>,

    /// Read a JSON request (`code`/`filePath`, `entry`, `mockInputs`, ...)
    #[arg(long, conflicts_with = "paths")]
    pub request: Option<PathBuf>,

    /// Function called after the module body ran
    #[arg(long)]
    pub entry: Option<String>,

    /// JSON argument for the entry function (repeatable)
    #[arg(long = "arg", requires = "entry")]
    pub args: Vec<String>,

    /// Scripted answer for input() (repeatable; the last one repeats)
    #[arg(long = "input")]
    pub inputs: Vec<String>,

    /// Deadline per execution in seconds
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Discarded executions before the measured one
    #[arg(long)]
    pub warmup: Option<u32>,

    /// Working directory of the profiled code
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Only profile files whose path matches this regex
    #[arg(long)]
    pub filter: Option<String>,

    /// Output format: human, json
    #[arg(long)]
    pub format: Option<String>,

    /// Write the JSON report(s) to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of files profiled in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Disable the timing channel
    #[arg(long)]
    pub no_timing: bool,

    /// Disable the memory channel
    #[arg(long)]
    pub no_memory: bool,

    /// Disable the I/O channel
    #[arg(long)]
    pub no_io: bool,

    /// Disable the GC channel
    #[arg(long)]
    pub no_gc: bool,

    /// Exit non-zero when any code unit does not complete
    #[arg(long)]
    pub fail_on_error: bool,
}

/// Arguments of `list`
#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Python files or directories
    pub paths: Vec<PathBuf>,

    /// Only list files whose path matches this regex
    #[arg(long)]
    pub filter: Option<String>,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Profile code units (default)
    Run(RunArgs),
    /// List the files that would be profiled
    List(ListArgs),
    /// Print a default omniprof.toml
    Init,
    /// Start a worker and report what the interpreter supports
    Doctor,
}

/// Run the omniprof CLI with the process arguments.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_with_cli(cli)
}

/// Run the omniprof CLI with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let filter = if cli.verbose {
        "omniprof=debug"
    } else {
        "omniprof=info"
    };
    // A second initialisation (embedding, tests) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    // Discover omniprof.toml configuration (CLI flags override)
    let config = OmniConfig::discover().unwrap_or_default();

    match cli.command {
        Some(Commands::Run(ref args)) => run_profiles(args, &config),
        Some(Commands::List(ref args)) => list_files(args),
        Some(Commands::Init) => {
            print!("{}", OmniConfig::default_toml());
            Ok(())
        }
        Some(Commands::Doctor) => doctor(&config),
        None => run_profiles(&cli.run, &config),
    }
}

fn compile_filter(filter: Option<&str>) -> anyhow::Result<Option<Regex>> {
    filter
        .map(|pattern| {
            Regex::new(pattern)
                .map_err(|e| anyhow::anyhow!("Invalid filter regex '{}': {}", pattern, e))
        })
        .transpose()
}

fn list_files(args: &ListArgs) -> anyhow::Result<()> {
    let filter = compile_filter(args.filter.as_deref())?;
    let paths = if args.paths.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        args.paths.clone()
    };
    let plan = build_plan(&paths, filter.as_ref())?;

    println!("omniprof Plan:");
    for file in &plan.files {
        println!("├── {}", file.display());
    }
    println!("{} files found.", plan.files.len());
    Ok(())
}

fn doctor(config: &OmniConfig) -> anyhow::Result<()> {
    let sandbox = build_sandbox(config)?;
    println!("interpreter: {}", sandbox.interpreter().display());
    let capabilities = sandbox.probe()?;
    println!(
        "implementation: {} {}",
        capabilities.implementation, capabilities.version
    );
    println!("protocol: v{}", capabilities.protocol_version);
    let yes_no = |flag: bool| if flag { "yes" } else { "no" };
    println!("profiler: {}", yes_no(capabilities.has_profiler));
    println!("line tracing: {}", yes_no(capabilities.has_line_trace));
    println!("tracemalloc: {}", yes_no(capabilities.has_tracemalloc));
    println!("gc statistics: {}", yes_no(capabilities.has_gc));
    let io_counters = std::path::Path::new("/proc/self/io").is_file();
    println!("io counters: {}", yes_no(io_counters));
    Ok(())
}

fn build_sandbox(config: &OmniConfig) -> anyhow::Result<ExecutionSandbox> {
    Ok(ExecutionSandbox::new()
        .with_interpreter(resolve_interpreter(config.runner.interpreter.as_deref()))
        .with_abort_grace(config.abort_grace()?)
        .with_max_output_bytes(config.runner.max_output_bytes))
}

fn channel_settings(args: &RunArgs, config: &OmniConfig) -> ChannelSettings {
    let mut settings = ChannelSettings::from(&config.channels);
    settings.timing &= !args.no_timing;
    settings.memory &= !args.no_memory;
    settings.io &= !args.no_io;
    settings.gc &= !args.no_gc;
    settings
}

fn entry_call(args: &RunArgs) -> anyhow::Result<Option<EntryCall>> {
    let Some(function) = &args.entry else {
        return Ok(None);
    };
    let args = args
        .args
        .iter()
        .map(|raw| {
            serde_json::from_str(raw)
                .map_err(|e| anyhow::anyhow!("--arg '{}' is not valid JSON: {}", raw, e))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Some(EntryCall {
        function: function.clone(),
        args,
    }))
}

/// Layer CLI flags over `base` (a request file or a bare source), then fill
/// what is still unset from omniprof.toml.
fn layered_shape(
    mut base: RequestShape,
    args: &RunArgs,
    config: &OmniConfig,
) -> anyhow::Result<RequestShape> {
    if let Some(entry) = entry_call(args)? {
        base.entry = Some(entry);
    }
    if !args.inputs.is_empty() {
        base.mock_inputs = Some(args.inputs.clone());
    }
    if let Some(seconds) = args.timeout {
        base.timeout_seconds = Some(seconds);
    }
    if let Some(runs) = args.warmup {
        base.warmup_runs = Some(runs);
    }
    if let Some(cwd) = &args.cwd {
        base.cwd = Some(cwd.clone());
    }

    if base.timeout_seconds.is_none() {
        base.timeout_seconds = Some(config.timeout()?.as_secs_f64());
    }
    if base.mock_inputs.is_none() {
        base.mock_inputs = Some(config.inputs.sequence.clone());
    }
    if base.warmup_runs.is_none() {
        base.warmup_runs = Some(config.runner.warmup_runs);
    }
    Ok(base)
}

/// Requests for `--code`, `--request` or the planned files
fn build_requests(args: &RunArgs, config: &OmniConfig) -> anyhow::Result<Vec<ExecutionRequest>> {
    let bases: Vec<RequestShape> = if let Some(code) = &args.code {
        vec![RequestShape {
            code: Some(code.clone()),
            ..RequestShape::default()
        }]
    } else if let Some(path) = &args.request {
        let json = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read request {}: {}", path.display(), e))?;
        let shape: RequestShape = serde_json::from_str(&json)
            .map_err(|e| anyhow::anyhow!("Malformed request {}: {}", path.display(), e))?;
        vec![shape]
    } else if !args.paths.is_empty() {
        let filter = compile_filter(args.filter.as_deref())?;
        build_plan(&args.paths, filter.as_ref())?
            .files
            .into_iter()
            .map(|file| RequestShape {
                file_path: Some(file),
                ..RequestShape::default()
            })
            .collect()
    } else {
        return Err(anyhow::anyhow!(
            "Nothing to profile: pass PATHS, --code or --request"
        ));
    };

    bases
        .into_iter()
        .map(|base| {
            let shape = layered_shape(base, args, config)?;
            let request = ExecutionRequest::try_from(shape)?
                .with_line_level(config.channels.line_level);
            Ok(request)
        })
        .collect()
}

fn progress_bar(len: usize) -> ProgressBar {
    if len < 2 {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

fn render(reports: &[ProfileReport], format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Human => format_human_output(reports),
        OutputFormat::Json => match reports {
            [single] => generate_json_report(single)?,
            many => generate_json_reports(many)?,
        },
    })
}

fn json_of(reports: &[ProfileReport]) -> anyhow::Result<String> {
    render(reports, OutputFormat::Json)
}

fn save_report_if_needed(config: &OmniConfig, reports: &[ProfileReport]) -> anyhow::Result<()> {
    if !config.output.save_report || reports.is_empty() {
        return Ok(());
    }
    let directory = PathBuf::from(&config.output.directory);
    std::fs::create_dir_all(&directory)?;
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let path = directory.join(format!("omniprof-{}.json", stamp));
    std::fs::write(&path, json_of(reports)?)?;
    eprintln!("Report saved to: {}", path.display());
    Ok(())
}

fn run_profiles(args: &RunArgs, config: &OmniConfig) -> anyhow::Result<()> {
    let requests = build_requests(args, config)?;
    if requests.is_empty() {
        println!("No Python files found.");
        return Ok(());
    }

    let format: OutputFormat = args
        .format
        .as_deref()
        .unwrap_or(&config.output.format)
        .parse()
        .unwrap_or(OutputFormat::Human);
    let jobs = args.jobs.or(config.runner.jobs).unwrap_or(1).max(1);
    let orchestrator =
        Orchestrator::new(build_sandbox(config)?).with_channels(channel_settings(args, config));

    tracing::info!(
        "profiling {} code unit(s) with {} job(s)",
        requests.len(),
        jobs
    );
    let start_time = Instant::now();
    let pb = progress_bar(requests.len());

    let pool = ThreadPoolBuilder::new()
        .num_threads(jobs)
        .thread_name(|i| format!("omniprof-job-{i}"))
        .build()?;
    let results: Vec<(String, Result<ProfileReport, ProfileError>)> = pool.install(|| {
        requests
            .par_iter()
            .map(|request| {
                let label = request.label();
                pb.set_message(label.clone());
                let result = orchestrator.profile(request);
                pb.inc(1);
                (label, result)
            })
            .collect()
    });
    pb.finish_and_clear();

    let mut reports = Vec::with_capacity(results.len());
    let mut harness_failures = 0usize;
    for (label, result) in results {
        match result {
            Ok(report) => reports.push(report),
            Err(e) => {
                tracing::error!("{}: {}", label, e);
                harness_failures += 1;
            }
        }
    }
    tracing::debug!("profiling finished in {:?}", start_time.elapsed());

    if !reports.is_empty() {
        print!("{}", render(&reports, format)?);
        if let Some(ref path) = args.output {
            let mut file = std::fs::File::create(path)?;
            file.write_all(json_of(&reports)?.as_bytes())?;
            eprintln!("Report written to: {}", path.display());
        }
        save_report_if_needed(config, &reports)?;
    }

    if harness_failures > 0 {
        return Err(anyhow::anyhow!(
            "{} of {} code unit(s) could not be profiled",
            harness_failures,
            harness_failures + reports.len()
        ));
    }

    let summary = BatchSummary::from_reports(&reports);
    if args.fail_on_error && summary.failures() > 0 {
        eprintln!("\n{} code unit(s) did not complete", summary.failures());
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("omniprof").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_default_command_is_run() {
        let cli = parse(&["script.py", "--timeout", "2", "--no-io", "-v"]);
        assert!(cli.command.is_none());
        assert!(cli.verbose);
        assert_eq!(cli.run.paths, [PathBuf::from("script.py")]);
        assert_eq!(cli.run.timeout, Some(2.0));
        assert!(cli.run.no_io);
    }

    #[test]
    fn test_subcommands() {
        let cli = parse(&["run", "--code", "print(1)", "--input", "a", "--input", "b"]);
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.code.as_deref(), Some("print(1)"));
        assert_eq!(args.inputs, ["a", "b"]);

        assert!(matches!(parse(&["init"]).command, Some(Commands::Init)));
        assert!(matches!(parse(&["doctor"]).command, Some(Commands::Doctor)));
        let cli = parse(&["list", "src", "--filter", "test_"]);
        assert!(matches!(cli.command, Some(Commands::List(ref l)) if l.paths.len() == 1));
    }

    #[test]
    fn test_conflicting_sources_rejected() {
        assert!(Cli::try_parse_from(["omniprof", "a.py", "--code", "print(1)"]).is_err());
        assert!(Cli::try_parse_from(["omniprof", "--arg", "1"]).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = OmniConfig::default();
        config.runner.timeout = "3s".to_string();
        config.runner.warmup_runs = 2;
        config.inputs.sequence = vec!["cfg".to_string()];

        let args = RunArgs {
            code: Some("def f(n): return n".to_string()),
            entry: Some("f".to_string()),
            args: vec!["5".to_string(), "\"x\"".to_string()],
            warmup: Some(0),
            ..RunArgs::default()
        };
        let requests = build_requests(&args, &config).unwrap();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.timeout(), Duration::from_secs(3));
        assert_eq!(request.warmup_runs(), 0);
        assert_eq!(request.input_sequence(), ["cfg"]);
        let entry = request.entry().unwrap();
        assert_eq!(entry.function, "f");
        assert_eq!(entry.args, [serde_json::json!(5), serde_json::json!("x")]);
    }

    #[test]
    fn test_request_file_layering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.json");
        std::fs::write(
            &path,
            r#"{"code": "input()", "mockInputs": ["from-file"], "timeoutSeconds": 0.5}"#,
        )
        .unwrap();

        let args = RunArgs {
            request: Some(path),
            timeout: Some(1.5),
            ..RunArgs::default()
        };
        let requests = build_requests(&args, &OmniConfig::default()).unwrap();
        assert_eq!(requests[0].timeout(), Duration::from_millis(1500));
        assert_eq!(requests[0].input_sequence(), ["from-file"]);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let config = OmniConfig::default();
        assert!(build_requests(&RunArgs::default(), &config).is_err());

        let bad_json = RunArgs {
            code: Some("pass".to_string()),
            entry: Some("f".to_string()),
            args: vec!["{not json".to_string()],
            ..RunArgs::default()
        };
        assert!(build_requests(&bad_json, &config).is_err());

        let bad_timeout = RunArgs {
            code: Some("pass".to_string()),
            timeout: Some(0.0),
            ..RunArgs::default()
        };
        assert!(build_requests(&bad_timeout, &config).is_err());
    }

    #[test]
    fn test_channel_flags() {
        let args = RunArgs {
            no_memory: true,
            no_gc: true,
            ..RunArgs::default()
        };
        let settings = channel_settings(&args, &OmniConfig::default());
        assert!(settings.timing);
        assert!(!settings.memory);
        assert!(settings.io);
        assert!(!settings.gc);
    }
}
