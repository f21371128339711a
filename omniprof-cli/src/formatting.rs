//! Output Formatting
//!
//! Human-readable output for profile reports.
//!
//! Generates terminal-friendly output with:
//! - One block per code unit with a status icon (✓/⏱/✗/⏻)
//! - Wall and CPU time with ranked hotspots
//! - Line timings and the top of the call tree when present
//! - Memory, I/O and GC sections
//! - Excerpts of captured output

use omniprof_core::OutcomeStatus;
use omniprof_report::{BatchSummary, CallTreeNode, ProfileReport};

const EXCERPT_LINES: usize = 10;
const TREE_DEPTH: usize = 4;

fn status_icon(status: OutcomeStatus) -> &'static str {
    match status {
        OutcomeStatus::Completed => "✓",
        OutcomeStatus::TimedOut => "⏱",
        OutcomeStatus::RaisedException => "✗",
        OutcomeStatus::SystemExited => "⏻",
    }
}

/// Seconds with a unit suited to the magnitude
fn seconds(value: f64) -> String {
    if value >= 1.0 {
        format!("{:.3} s", value)
    } else if value >= 1e-3 {
        format!("{:.3} ms", value * 1e3)
    } else {
        format!("{:.1} µs", value * 1e6)
    }
}

fn bytes(value: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut scaled = value as f64;
    let mut unit = 0;
    while scaled >= 1024.0 && unit < UNITS.len() - 1 {
        scaled /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", value)
    } else {
        format!("{:.2} {}", scaled, UNITS[unit])
    }
}

/// Last lines of a captured stream, indented
fn excerpt(label: &str, text: &str, output: &mut String) {
    if text.trim().is_empty() {
        return;
    }
    let lines: Vec<&str> = text.lines().collect();
    let skipped = lines.len().saturating_sub(EXCERPT_LINES);
    output.push_str(&format!("  {}:\n", label));
    if skipped > 0 {
        output.push_str(&format!("      ... {} earlier line(s)\n", skipped));
    }
    for line in &lines[skipped..] {
        output.push_str(&format!("      | {}\n", line));
    }
}

fn call_tree(node: &CallTreeNode, depth: usize, output: &mut String) {
    let marker = if node.recursive { " (recursive)" } else { "" };
    output.push_str(&format!(
        "      {}{} [{}:{}] {} calls, {}{}\n",
        "  ".repeat(depth),
        node.function,
        node.file,
        node.line,
        node.calls,
        seconds(node.cumulative_time),
        marker
    ));
    if depth + 1 >= TREE_DEPTH {
        if !node.children.is_empty() {
            output.push_str(&format!("      {}...\n", "  ".repeat(depth + 1)));
        }
        return;
    }
    for child in &node.children {
        call_tree(child, depth + 1, output);
    }
}

fn format_report(report: &ProfileReport, output: &mut String) {
    let meta = report.meta();
    let dynamic = &report.dynamic_analysis;

    output.push_str(&format!(
        "{} {}  [{}]  {:.2} ms\n",
        status_icon(meta.status),
        meta.source,
        meta.status,
        meta.duration_ms
    ));
    output.push_str(&"-".repeat(60));
    output.push('\n');
    if let Some(interpreter) = &meta.interpreter {
        output.push_str(&format!("  interpreter: {}\n", interpreter));
    }
    if let Some(error) = &meta.error_detail {
        output.push_str(&format!("  error: {}\n", error));
    }

    if let Some(time) = &dynamic.time {
        output.push_str(&format!(
            "  time: wall {}  cpu {} (user {}, system {})  {:.1}% cpu\n",
            seconds(time.wall_time),
            seconds(time.cpu_time),
            seconds(time.user_time),
            seconds(time.system_time),
            time.cpu_percent
        ));
        if let Some(switches) = &time.context_switches {
            output.push_str(&format!(
                "  context switches: {} voluntary, {} involuntary\n",
                switches.voluntary, switches.involuntary
            ));
        }
        if !time.hotspots.is_empty() {
            output.push_str("  hotspots:\n");
            output.push_str(&format!(
                "      {:>8}  {:>12}  {:>12}  {:>12}  function\n",
                "calls", "cumulative", "self", "per call"
            ));
            for hotspot in &time.hotspots {
                let calls = if hotspot.calls == hotspot.primitive_calls {
                    hotspot.calls.to_string()
                } else {
                    format!("{}/{}", hotspot.calls, hotspot.primitive_calls)
                };
                output.push_str(&format!(
                    "      {:>8}  {:>12}  {:>12}  {:>12}  {} ({}:{})\n",
                    calls,
                    seconds(hotspot.cumulative_time),
                    seconds(hotspot.self_time),
                    seconds(hotspot.per_call()),
                    hotspot.function,
                    hotspot.file,
                    hotspot.line
                ));
            }
        }
        for section in time.line_profiles.iter().flatten() {
            output.push_str(&format!(
                "  lines of {} ({}:{}), total {}:\n",
                section.function,
                section.file,
                section.first_line,
                seconds(section.total_time)
            ));
            for line in &section.lines {
                output.push_str(&format!(
                    "      {:>6}  {:>8} hits  {:>12}  {:>12}/hit\n",
                    line.line,
                    line.hits,
                    seconds(line.time),
                    seconds(line.time_per_hit)
                ));
            }
        }
        if let Some(roots) = &time.call_tree {
            output.push_str("  call tree:\n");
            for root in roots {
                call_tree(root, 0, output);
            }
        }
    }

    if let Some(memory) = &dynamic.memory {
        output.push_str(&format!(
            "  memory: peak {}  current {}  {} live blocks ({:.0}/s)\n",
            bytes(memory.peak),
            bytes(memory.current),
            memory.allocation_count,
            memory.allocation_rate
        ));
        for site in &memory.top_allocators {
            output.push_str(&format!(
                "      {:>12}  {:>6} blocks  {}:{}\n",
                bytes(site.size),
                site.count,
                site.file,
                site.line
            ));
        }
    }
    if let Some(io) = &dynamic.io {
        output.push_str(&format!(
            "  io: {} reads ({}, {} storage)  {} writes ({}, {} storage)\n",
            io.read_count,
            bytes(io.read_chars),
            bytes(io.read_bytes),
            io.write_count,
            bytes(io.write_chars),
            bytes(io.write_bytes)
        ));
    }
    if let Some(gc) = &dynamic.gc {
        let generations: Vec<String> = gc
            .generations
            .iter()
            .map(|g| {
                format!(
                    "gen{} {} collections, {} objects, threshold {}",
                    g.generation, g.collections, g.objects, g.threshold
                )
            })
            .collect();
        output.push_str(&format!(
            "  gc ({}, {} objects): {}\n",
            if gc.enabled { "enabled" } else { "disabled" },
            gc.total_objects,
            generations.join("; ")
        ));
    }
    if !meta.channels_omitted.is_empty() {
        output.push_str(&format!(
            "  omitted: {}\n",
            meta.channels_omitted.join(", ")
        ));
    }

    excerpt("stdout", &meta.captured_stdout, output);
    excerpt("stderr", &meta.captured_stderr, output);
    output.push('\n');
}

/// Format reports for human-readable terminal display
pub fn format_human_output(reports: &[ProfileReport]) -> String {
    let mut output = String::new();

    output.push('\n');
    output.push_str("omniprof Results\n");
    output.push_str(&"=".repeat(60));
    output.push_str("\n\n");

    for report in reports {
        format_report(report, &mut output);
    }

    let summary = BatchSummary::from_reports(reports);
    output.push_str("Summary\n");
    output.push_str(&"-".repeat(60));
    output.push('\n');
    output.push_str(&format!(
        "  Total: {}  Completed: {}  Timed out: {}  Raised: {}  Exited: {}\n",
        summary.total,
        summary.completed,
        summary.timed_out,
        summary.raised_exception,
        summary.system_exited
    ));
    output.push_str(&format!(
        "  Duration: {:.2} ms\n",
        summary.total_duration_ms
    ));

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use omniprof_core::ErrorDetail;
    use omniprof_report::{
        ContextSwitchCounts, DynamicAnalysis, GcSnapshot, GenerationStats, Hotspot,
        MemorySnapshot, RunMeta, TimeSnapshot, TopAllocator,
    };

    fn report(status: OutcomeStatus, stdout: &str) -> ProfileReport {
        ProfileReport {
            hardware: None,
            static_analysis: None,
            dynamic_analysis: DynamicAnalysis {
                time: Some(TimeSnapshot {
                    wall_time: 0.25,
                    cpu_time: 0.2,
                    user_time: 0.15,
                    system_time: 0.05,
                    cpu_percent: 80.0,
                    context_switches: Some(ContextSwitchCounts {
                        voluntary: 6,
                        involuntary: 2,
                    }),
                    hotspots: vec![Hotspot {
                        function: "fib".to_string(),
                        file: "<profiled>".to_string(),
                        line: 1,
                        calls: 177,
                        primitive_calls: 1,
                        self_time: 0.1,
                        cumulative_time: 0.2,
                    }],
                    line_profiles: None,
                    call_tree: Some(vec![CallTreeNode {
                        function: "fib".to_string(),
                        file: "<profiled>".to_string(),
                        line: 1,
                        calls: 1,
                        self_time: 0.1,
                        cumulative_time: 0.2,
                        recursive: false,
                        children: vec![CallTreeNode {
                            function: "fib".to_string(),
                            file: "<profiled>".to_string(),
                            line: 1,
                            calls: 176,
                            self_time: 0.1,
                            cumulative_time: 0.2,
                            recursive: true,
                            children: Vec::new(),
                        }],
                    }]),
                }),
                memory: Some(MemorySnapshot {
                    peak: 2048,
                    current: 512,
                    allocation_count: 3,
                    allocation_rate: 12.0,
                    top_allocators: vec![TopAllocator {
                        file: "<profiled>".to_string(),
                        line: 4,
                        size: 1536,
                        count: 3,
                    }],
                }),
                io: None,
                gc: Some(GcSnapshot {
                    enabled: true,
                    total_objects: 4321,
                    generations: vec![GenerationStats {
                        generation: 0,
                        collections: 12,
                        objects: 30,
                        threshold: 700,
                    }],
                }),
                meta: RunMeta {
                    status,
                    error_detail: (status == OutcomeStatus::TimedOut)
                        .then_some(ErrorDetail::Timeout { seconds: 1.0 }),
                    captured_stdout: stdout.to_string(),
                    captured_stderr: String::new(),
                    timeout_seconds: 1.0,
                    warmup_runs: 0,
                    source: "<profiled>".to_string(),
                    interpreter: Some("cpython 3.12.1".to_string()),
                    started_at: Utc::now(),
                    duration_ms: 250.0,
                    channels_omitted: vec!["io".to_string()],
                },
            },
        }
    }

    #[test]
    fn test_sections_rendered() {
        let output = format_human_output(&[report(OutcomeStatus::Completed, "55\n")]);
        assert!(output.contains("✓ <profiled>  [completed]"));
        assert!(output.contains("177/1"));
        assert!(output.contains("(recursive)"));
        assert!(output.contains("peak 2.00 KiB"));
        assert!(output.contains("omitted: io"));
        assert!(output.contains("| 55"));
        assert!(output.contains("Total: 1  Completed: 1"));
    }

    #[test]
    fn test_extended_measurements_rendered() {
        let output = format_human_output(&[report(OutcomeStatus::Completed, "")]);
        assert!(output.contains("80.0% cpu"));
        assert!(output.contains("context switches: 6 voluntary, 2 involuntary"));
        assert!(output.contains("1.50 KiB"));
        assert!(output.contains("<profiled>:4"));
        assert!(output.contains("gc (enabled, 4321 objects)"));
    }

    #[test]
    fn test_timeout_shows_error() {
        let output = format_human_output(&[report(OutcomeStatus::TimedOut, "")]);
        assert!(output.contains("error: timeout after 1s"));
        assert!(!output.contains("stdout:"));
        assert!(output.contains("Timed out: 1"));
    }

    #[test]
    fn test_long_output_is_excerpted() {
        let stdout: String = (0..25).map(|i| format!("line {i}\n")).collect();
        let output = format_human_output(&[report(OutcomeStatus::Completed, &stdout)]);
        assert!(output.contains("... 15 earlier line(s)"));
        assert!(output.contains("| line 24"));
        assert!(!output.contains("| line 14\n"));
    }

    #[test]
    fn test_units() {
        assert_eq!(seconds(2.0), "2.000 s");
        assert_eq!(seconds(0.0025), "2.500 ms");
        assert_eq!(seconds(0.0000025), "2.5 µs");
        assert_eq!(bytes(512), "512 B");
        assert_eq!(bytes(3 * 1024 * 1024), "3.00 MiB");
    }
}
