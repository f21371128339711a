//! Integration tests for omniprof
//!
//! These tests profile real code units end to end and need a Python 3
//! interpreter (`OMNIPROF_PYTHON` or `python3`). Without one they return early.

use omniprof::{
    ErrorDetail, ExecutionRequest, Orchestrator, OutcomeStatus, ProfileReport, generate_json_report,
};
use omniprof_cli::{ExecutionSandbox, NoHooks, ProcFs};
use std::io;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn python_available() -> bool {
    let interpreter = omniprof_core::resolve_interpreter(None);
    let available = Command::new(&interpreter)
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success());
    if !available {
        eprintln!(
            "skipping: no Python interpreter at {}",
            interpreter.display()
        );
    }
    available
}

fn profile(request: &ExecutionRequest) -> ProfileReport {
    Orchestrator::default()
        .profile(request)
        .expect("harness failure")
}

/// Names of the dynamic sections that are present
fn shape(report: &ProfileReport) -> Vec<&'static str> {
    let dynamic = &report.dynamic_analysis;
    let mut present = Vec::new();
    if dynamic.time.is_some() {
        present.push("time");
    }
    if dynamic.memory.is_some() {
        present.push("memory");
    }
    if dynamic.io.is_some() {
        present.push("io");
    }
    if dynamic.gc.is_some() {
        present.push("gc");
    }
    present
}

/// Test the small completed scenario
#[test]
fn test_completed_sum() {
    if !python_available() {
        return;
    }
    let request =
        ExecutionRequest::from_code("result = sum(range(1000))").with_timeout(Duration::from_secs(5));
    let report = profile(&request);

    assert_eq!(report.status(), OutcomeStatus::Completed);
    assert!(report.meta().error_detail.is_none());
    let memory = report.dynamic_analysis.memory.as_ref().expect("memory section");
    assert!(memory.peak > 0);
    let time = report.dynamic_analysis.time.as_ref().expect("time section");
    assert!(time.wall_time < 1.0);
    assert!((time.cpu_time - (time.user_time + time.system_time)).abs() < 1e-9);
    for hotspot in &time.hotspots {
        assert_ne!(hotspot.file, "<string>", "driver frame leaked: {:?}", hotspot);
    }
    assert!(report.meta().interpreter.is_some());
    assert!(report.hardware.is_some());

    let json = generate_json_report(&report).unwrap();
    assert!(json.contains("\"dynamicAnalysis\""));
    assert!(json.contains("\"status\": \"completed\""));
}

/// Test that a busy loop is stopped near the deadline
#[test]
fn test_infinite_loop_times_out() {
    if !python_available() {
        return;
    }
    let request =
        ExecutionRequest::from_code("while True: pass").with_timeout(Duration::from_secs(1));
    let start = Instant::now();
    let report = profile(&request);
    let elapsed = start.elapsed();

    assert_eq!(report.status(), OutcomeStatus::TimedOut);
    assert_eq!(
        report.meta().error_detail,
        Some(ErrorDetail::Timeout { seconds: 1.0 })
    );
    assert!(elapsed < Duration::from_millis(3500), "took {:?}", elapsed);
}

/// Test that blocking sleeps are interrupted too
#[test]
fn test_sleep_times_out() {
    if !python_available() {
        return;
    }
    let request = ExecutionRequest::from_code("import time\nprint('start', flush=True)\ntime.sleep(30)")
        .with_timeout(Duration::from_millis(500));
    let start = Instant::now();
    let report = profile(&request);

    assert_eq!(report.status(), OutcomeStatus::TimedOut);
    assert!(start.elapsed() < Duration::from_secs(3));
    assert!(report.meta().captured_stdout.contains("start"));
}

/// Test exit codes from sys.exit
#[test]
fn test_system_exit_code() {
    if !python_available() {
        return;
    }
    let report = profile(&ExecutionRequest::from_code("import sys; sys.exit(3)"));
    assert_eq!(report.status(), OutcomeStatus::SystemExited);
    assert!(matches!(
        report.meta().error_detail,
        Some(ErrorDetail::Exit { code: 3, .. })
    ));
}

/// Test a hard process exit that bypasses the driver
#[test]
fn test_hard_exit_code() {
    if !python_available() {
        return;
    }
    let report = profile(&ExecutionRequest::from_code("import os\nprint('bye', flush=True)\nos._exit(7)"));
    assert_eq!(report.status(), OutcomeStatus::SystemExited);
    assert!(matches!(
        report.meta().error_detail,
        Some(ErrorDetail::Exit { code: 7, .. })
    ));
    assert!(report.meta().captured_stdout.contains("bye"));
}

/// Test a worker killed by a signal
#[test]
fn test_killed_worker() {
    if !python_available() {
        return;
    }
    let code = "import os, signal\nos.kill(os.getpid(), signal.SIGKILL)";
    let report = profile(&ExecutionRequest::from_code(code));
    assert_eq!(report.status(), OutcomeStatus::RaisedException);
    let Some(ErrorDetail::Exception { type_name, .. }) = &report.meta().error_detail else {
        panic!("expected exception detail");
    };
    assert_eq!(type_name, omniprof_cli::WORKER_TERMINATED);
}

/// Test exception detail with output produced before the raise
#[test]
fn test_exception_keeps_output() {
    if !python_available() {
        return;
    }
    let code = "import sys\nprint('before')\nprint('warn', file=sys.stderr)\nraise ValueError('bad value')";
    let report = profile(&ExecutionRequest::from_code(code));

    assert_eq!(report.status(), OutcomeStatus::RaisedException);
    let Some(ErrorDetail::Exception {
        type_name,
        message,
        traceback,
    }) = &report.meta().error_detail
    else {
        panic!("expected exception detail");
    };
    assert_eq!(type_name, "ValueError");
    assert_eq!(message, "bad value");
    assert!(traceback.as_deref().is_some_and(|t| t.contains("ValueError")));
    assert!(report.meta().captured_stdout.contains("before"));
    assert!(report.meta().captured_stderr.contains("warn"));
}

/// Test that input answers cycle on the last value
#[test]
fn test_input_cycling() {
    if !python_available() {
        return;
    }
    let code = "values = [input() for _ in range(5)]\nprint('|'.join(values))";
    let request = ExecutionRequest::from_code(code).with_inputs(["a", "b"]);
    let report = profile(&request);

    assert_eq!(report.status(), OutcomeStatus::Completed);
    assert!(
        report.meta().captured_stdout.contains("a|b|b|b|b"),
        "stdout: {:?}",
        report.meta().captured_stdout
    );
}

/// Test that direct stdin reads see end of file
#[test]
fn test_stdin_is_empty() {
    if !python_available() {
        return;
    }
    let report = profile(&ExecutionRequest::from_code("import sys\nprint(repr(sys.stdin.read()))"));
    assert_eq!(report.status(), OutcomeStatus::Completed);
    assert!(report.meta().captured_stdout.contains("''"));
}

/// Test that repeated identical requests produce the same report shape
#[test]
fn test_idempotent_shape() {
    if !python_available() {
        return;
    }
    let code = "def fib(n):\n    return n if n < 2 else fib(n - 1) + fib(n - 2)\nprint(fib(15))";
    let request = ExecutionRequest::from_code(code);
    let first = profile(&request);
    let second = profile(&request);

    assert_eq!(first.status(), second.status());
    assert_eq!(shape(&first), shape(&second));
    assert_eq!(first.meta().captured_stdout, "610\n");
    assert_eq!(first.meta().captured_stdout, second.meta().captured_stdout);
    assert_eq!(
        first.meta().channels_omitted,
        second.meta().channels_omitted
    );
}

/// Test that warm-ups neither leak globals nor output into the measured run
#[test]
fn test_warmups_use_fresh_namespace() {
    if !python_available() {
        return;
    }
    let code = "try:\n    counter += 1\nexcept NameError:\n    counter = 0\nprint('counter', counter)";
    let request = ExecutionRequest::from_code(code).with_warmup_runs(2);
    let report = profile(&request);

    assert_eq!(report.status(), OutcomeStatus::Completed);
    assert_eq!(report.meta().captured_stdout, "counter 0\n");
    assert_eq!(report.meta().warmup_runs, 2);
}

/// Test function-level profiling with line timings
#[test]
fn test_entry_function_line_profile() {
    if !python_available() {
        return;
    }
    let code = "def work(n):\n    total = 0\n    for i in range(n):\n        total += i * i\n    return total\n";
    let request = ExecutionRequest::from_code(code).with_entry(omniprof::EntryCall {
        function: "work".to_string(),
        args: vec![serde_json::json!(2000)],
    });
    let report = profile(&request);

    assert_eq!(report.status(), OutcomeStatus::Completed);
    let time = report.dynamic_analysis.time.as_ref().expect("time section");
    assert!(time.hotspots.iter().any(|h| h.function == "work"));
    let sections = time.line_profiles.as_ref().expect("line profiles");
    let work = sections
        .iter()
        .find(|s| s.function == "work")
        .expect("work section");
    let loop_body = work.lines.iter().find(|l| l.line == 4).expect("line 4");
    assert_eq!(loop_body.hits, 2000);
}

/// Test scripts on disk with a working directory
#[test]
fn test_file_in_working_directory() {
    if !python_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("helper.py"), "VALUE = 41\n").unwrap();
    std::fs::write(dir.path().join("data.txt"), "1").unwrap();
    std::fs::write(
        dir.path().join("main.py"),
        "import helper\nwith open('data.txt') as f:\n    print(helper.VALUE + int(f.read()))\n",
    )
    .unwrap();

    let request = ExecutionRequest::from_path(dir.path().join("main.py"))
        .with_working_directory(dir.path());
    let report = profile(&request);

    assert_eq!(report.status(), OutcomeStatus::Completed, "{:?}", report.meta());
    assert_eq!(report.meta().captured_stdout, "42\n");
    assert!(report.meta().source.ends_with("main.py"));
}

struct UnreadableProc;

impl ProcFs for UnreadableProc {
    fn read_to_string(&self, _path: &Path) -> io::Result<String> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
    }
}

/// Test that a broken channel leaves the others intact
#[test]
fn test_channel_isolation() {
    if !python_available() {
        return;
    }
    let request = ExecutionRequest::from_code("data = [i * 2 for i in range(10000)]\nprint(len(data))");
    let report = Orchestrator::default()
        .with_procfs(Arc::new(UnreadableProc))
        .profile(&request)
        .expect("harness failure");

    assert_eq!(report.status(), OutcomeStatus::Completed);
    assert!(report.dynamic_analysis.io.is_none());
    assert_eq!(report.meta().channels_omitted, ["io"]);
    assert!(report.dynamic_analysis.time.is_some());
    assert!(report.dynamic_analysis.memory.is_some());
    assert!(report.dynamic_analysis.gc.is_some());
}

/// Exception detail of a raised outcome
fn exception(report: &ProfileReport) -> (&str, &str) {
    match &report.meta().error_detail {
        Some(ErrorDetail::Exception {
            type_name, message, ..
        }) => (type_name, message),
        other => panic!("expected exception detail, got {:?}", other),
    }
}

/// Test an exception whose message cannot be rendered
#[test]
fn test_unprintable_exception() {
    if !python_available() {
        return;
    }
    let code = "class Opaque(Exception):\n    def __str__(self):\n        raise RuntimeError('no text')\nraise Opaque()";
    let report = profile(&ExecutionRequest::from_code(code));

    assert_eq!(report.status(), OutcomeStatus::RaisedException);
    let (type_name, message) = exception(&report);
    assert_eq!(type_name, "Opaque");
    assert!(!message.is_empty());
    assert_eq!(shape(&report), ["time", "memory", "io", "gc"]);
}

/// Test an exit code beyond the 64-bit range
#[test]
fn test_oversized_exit_code() {
    if !python_available() {
        return;
    }
    let report = profile(&ExecutionRequest::from_code("import sys\nsys.exit(2 ** 70)"));
    assert_eq!(report.status(), OutcomeStatus::SystemExited);
    let Some(ErrorDetail::Exit { code, message }) = &report.meta().error_detail else {
        panic!("expected exit detail");
    };
    assert_eq!(*code, 1);
    assert_eq!(message.as_deref(), Some("1180591620717411303424"));
}

/// Test an exception message holding a lone surrogate
#[test]
fn test_surrogate_in_exception_message() {
    if !python_available() {
        return;
    }
    let report = profile(&ExecutionRequest::from_code("raise ValueError('bad \\udcff byte')"));
    assert_eq!(report.status(), OutcomeStatus::RaisedException);
    let (type_name, message) = exception(&report);
    assert_eq!(type_name, "ValueError");
    assert!(message.starts_with("bad "), "message: {:?}", message);
}

/// Test a deadline too large to add to the clock
#[test]
fn test_huge_timeout() {
    if !python_available() {
        return;
    }
    let request = ExecutionRequest::from_code("print('quick')")
        .with_timeout_secs(1e19)
        .unwrap();
    let report = profile(&request);
    assert_eq!(report.status(), OutcomeStatus::Completed);
    assert_eq!(report.meta().captured_stdout, "quick\n");
}

/// Test line timings for every function of a script without an entry point
#[test]
fn test_file_unit_line_profiles() {
    if !python_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("unit.py");
    std::fs::write(
        &script,
        "def helper(n):\n    return n * 2\n\nclass Acc:\n    def add(self, n):\n        return n + 1\n\ndef main():\n    acc = Acc()\n    total = 0\n    for i in range(50):\n        total += helper(i) + acc.add(i)\n    print(total)\n\nmain()\n",
    )
    .unwrap();
    let report = profile(&ExecutionRequest::from_path(&script));

    assert_eq!(report.status(), OutcomeStatus::Completed, "{:?}", report.meta());
    let time = report.dynamic_analysis.time.as_ref().expect("time section");
    let sections = time.line_profiles.as_ref().expect("line profiles");
    let hits = |function: &str, line: u32| {
        sections
            .iter()
            .find(|s| s.function == function)
            .unwrap_or_else(|| panic!("no section for {function}: {:?}", sections))
            .lines
            .iter()
            .find(|l| l.line == line)
            .map_or(0, |l| l.hits)
    };
    assert_eq!(hits("helper", 2), 50);
    assert_eq!(hits("Acc.add", 6), 50);
    assert_eq!(hits("main", 12), 50);
}

/// Test allocation sites, context switches and collector totals
#[test]
fn test_extended_measurements() {
    if !python_available() {
        return;
    }
    let code = "blocks = [bytearray(1000) for _ in range(2000)]\nimport time\ntime.sleep(0.01)\nprint(len(blocks))";
    let report = profile(&ExecutionRequest::from_code(code));
    assert_eq!(report.status(), OutcomeStatus::Completed);

    let memory = report.dynamic_analysis.memory.as_ref().expect("memory section");
    assert!(
        memory
            .top_allocators
            .iter()
            .any(|site| site.file == "<profiled>" && site.line == 1 && site.size >= 2_000_000),
        "allocators: {:?}",
        memory.top_allocators
    );

    let time = report.dynamic_analysis.time.as_ref().expect("time section");
    let switches = time.context_switches.expect("context switches");
    assert!(switches.voluntary >= 1);
    assert!(time.cpu_percent >= 0.0);

    let gc = report.dynamic_analysis.gc.as_ref().expect("gc section");
    assert!(gc.total_objects > 0);
}

/// Test that a timed-out run still reports every channel
#[test]
fn test_timeout_keeps_all_sections() {
    if !python_available() {
        return;
    }
    let request =
        ExecutionRequest::from_code("while True: pass").with_timeout(Duration::from_millis(500));
    let report = profile(&request);

    assert_eq!(report.status(), OutcomeStatus::TimedOut);
    assert_eq!(shape(&report), ["time", "memory", "io", "gc"]);
    assert!(report.meta().channels_omitted.is_empty());
}

/// Test that a raising run still reports every channel
#[test]
fn test_exception_keeps_all_sections() {
    if !python_available() {
        return;
    }
    let report = profile(&ExecutionRequest::from_code("x = [1] * 100\nraise KeyError('k')"));

    assert_eq!(report.status(), OutcomeStatus::RaisedException);
    assert_eq!(shape(&report), ["time", "memory", "io", "gc"]);
    assert!(report.meta().channels_omitted.is_empty());
}

/// Test that a preloaded source is what runs, whatever the file says later
#[test]
fn test_loaded_source_is_executed() {
    if !python_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("unit.py");
    std::fs::write(&script, "print('first')\n").unwrap();
    let request = ExecutionRequest::from_path(&script);
    let source = request.load().unwrap();
    std::fs::write(&script, "print('second')\n").unwrap();

    let run = ExecutionSandbox::new()
        .run_loaded(&request, &source, &mut NoHooks)
        .expect("harness failure");
    assert_eq!(run.outcome.captured_stdout(), "first\n");
}

/// Test that invalid requests fail before anything runs
#[test]
fn test_invalid_request_is_harness_error() {
    let request = ExecutionRequest::from_code("print(1)").with_inputs(Vec::<String>::new());
    assert!(matches!(
        Orchestrator::default().profile(&request),
        Err(omniprof::ProfileError::Request(
            omniprof::RequestError::EmptyInputSequence
        ))
    ));
}
