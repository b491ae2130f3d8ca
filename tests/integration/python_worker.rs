//! Runs against a real `python3`. Each test returns early when none is installed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use athar_backend::sandbox::python::WORKER_PATH;
use athar_backend::sandbox::{CodeRunner, Confinement, ErrorKind, ExecutionRequest, PythonLoader, SandboxRuntime};

/// Whether `python3` resolves on the worker's own `PATH`.
fn python_available() -> bool {
    std::process::Command::new("python3")
        .env_clear()
        .env("PATH", WORKER_PATH)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn runner_with(limits: Confinement) -> Option<CodeRunner> {
    if !python_available() {
        eprintln!("python3 not found; skipping");
        return None;
    }
    athar_backend::telemetry::init_for_tests();
    let max_output_bytes = limits.max_output_bytes;
    let loader = Arc::new(PythonLoader::new("python3", Duration::from_secs(10)).with_limits(limits));
    Some(
        CodeRunner::new(Arc::new(SandboxRuntime::new(loader)), Duration::from_secs(5))
            .with_output_limit(max_output_bytes),
    )
}

fn runner() -> Option<CodeRunner> {
    runner_with(Confinement::default())
}

async fn run(runner: &CodeRunner, code: &str) -> athar_backend::sandbox::ExecutionOutcome {
    runner.execute(ExecutionRequest::new(code)).await
}

fn started_as_root() -> bool {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata("/proc/self").map(|m| m.uid() == 0).unwrap_or(false)
}

#[tokio::test]
async fn hello_world() {
    let Some(runner) = runner() else { return };
    let out = runner.execute(ExecutionRequest::new("print('Hello, World!')")).await;
    assert!(out.success, "{out:?}");
    assert_eq!(out.output, "Hello, World!\n");
    assert_eq!(out.error_kind, ErrorKind::None);
}

#[tokio::test]
async fn runtime_error_keeps_prior_output_and_points_at_learner_code() {
    let Some(runner) = runner() else { return };
    let out = runner.execute(ExecutionRequest::new("print('before')\nx = 1 / 0\n")).await;
    assert!(!out.success);
    assert_eq!(out.error_kind, ErrorKind::RuntimeError);
    assert_eq!(out.output, "before\n");
    let error = out.error.unwrap();
    assert!(error.contains("ZeroDivisionError"), "{error}");
    assert!(error.contains("<learner>"), "{error}");
    assert!(error.contains("line 2"), "{error}");
}

#[tokio::test]
async fn syntax_errors_are_reported_as_runtime_errors() {
    let Some(runner) = runner() else { return };
    let out = runner.execute(ExecutionRequest::new("print('unclosed'\n")).await;
    assert_eq!(out.error_kind, ErrorKind::RuntimeError);
    assert!(out.error.unwrap().contains("SyntaxError"));
}

#[tokio::test]
async fn stdin_feeds_input() {
    let Some(runner) = runner() else { return };
    let request = ExecutionRequest {
        code: "n = int(input())\nprint(n * 2)".into(),
        stdin: Some("21\n".into()),
        timeout: None,
    };
    let out = runner.execute(request).await;
    assert!(out.success, "{out:?}");
    assert_eq!(out.output.trim(), "42");
}

#[tokio::test]
async fn system_exit_counts_as_a_clean_finish() {
    let Some(runner) = runner() else { return };
    let out = runner.execute(ExecutionRequest::new("print('bye')\nraise SystemExit(3)")).await;
    assert!(out.success, "{out:?}");
    assert_eq!(out.output, "bye\n");
}

#[tokio::test]
async fn state_does_not_leak_between_runs() {
    let Some(runner) = runner() else { return };
    let first = runner.execute(ExecutionRequest::new("secret = 1")).await;
    assert!(first.success);
    let second = runner.execute(ExecutionRequest::new("print(secret)")).await;
    assert_eq!(second.error_kind, ErrorKind::RuntimeError);
    assert!(second.error.unwrap().contains("NameError"));
}

#[tokio::test]
async fn infinite_loop_times_out_and_the_worker_is_replaced() {
    let Some(runner) = runner() else { return };
    // Warm up so the timeout covers only the loop.
    assert!(runner.execute(ExecutionRequest::new("pass")).await.success);

    let start = Instant::now();
    let out = runner
        .execute(ExecutionRequest {
            code: "while True:\n    pass\n".into(),
            stdin: None,
            timeout: Some(Duration::from_millis(300)),
        })
        .await;
    assert_eq!(out.error_kind, ErrorKind::Timeout);
    assert!(start.elapsed() < Duration::from_secs(3), "took {:?}", start.elapsed());

    let after = runner.execute(ExecutionRequest::new("print('alive')")).await;
    assert!(after.success, "{after:?}");
    assert_eq!(after.output, "alive\n");
    assert_eq!(runner.runtime().attempts(), 2);
}

#[tokio::test]
async fn learner_code_cannot_write_files() {
    let Some(runner) = runner() else { return };
    for code in [
        "open('notes.txt', 'w').write('x')",
        "open('/tmp/athar-escape', 'a').write('x')",
        "import os\nos.open('/tmp/athar-escape', os.O_WRONLY | os.O_CREAT)",
        "import pathlib\npathlib.Path('/tmp/athar-escape').write_text('x')",
    ] {
        let out = run(&runner, code).await;
        assert_eq!(out.error_kind, ErrorKind::RuntimeError, "{code}: {out:?}");
        assert!(out.error.as_deref().unwrap_or("").contains("PermissionError"), "{code}: {out:?}");
    }
    assert!(!std::path::Path::new("/tmp/athar-escape").exists());
}

#[tokio::test]
async fn learner_code_cannot_start_processes_or_open_sockets() {
    let Some(runner) = runner() else { return };
    for code in [
        "import subprocess\nsubprocess.run(['id'])",
        "import os\nos.system('id')",
        "import os\nos.fork()",
        "import os\nos.execv('/bin/sh', ['sh'])",
        "import socket\nsocket.socket()",
        "import shutil\nshutil.rmtree('/tmp')",
        "import ctypes\nctypes.CDLL(None)",
    ] {
        let out = run(&runner, code).await;
        assert_eq!(out.error_kind, ErrorKind::RuntimeError, "{code}: {out:?}");
        let error = out.error.unwrap_or_default();
        assert!(error.contains("PermissionError") || error.contains("ImportError"), "{code}: {error}");
    }
    // the worker survives all of it
    assert_eq!(run(&runner, "print('still here')").await.output, "still here\n");
    assert_eq!(runner.runtime().attempts(), 1);
}

#[tokio::test]
async fn worker_sees_a_bare_environment() {
    let Some(runner) = runner() else { return };
    let out = run(
        &runner,
        "import os, resource\n\
         print(sorted(os.environ))\n\
         print(os.listdir('.'))\n\
         print(resource.getrlimit(resource.RLIMIT_NPROC))\n\
         print(resource.getrlimit(resource.RLIMIT_FSIZE))\n\
         print(os.getuid())",
    )
    .await;
    assert!(out.success, "{out:?}");
    let lines: Vec<_> = out.output.lines().collect();
    assert_eq!(lines[0], "['LANG', 'PATH']");
    assert_eq!(lines[1], "[]");
    assert_eq!(lines[2], "(0, 0)");
    assert_eq!(lines[3], "(0, 0)");
    if started_as_root() {
        assert_eq!(lines[4], "65534");
    }
}

#[tokio::test]
async fn printed_frames_are_plain_output() {
    let Some(runner) = runner() else { return };
    let forged = r#"{"id": 2, "kind": "done", "error": null, "truncated": false}"#;
    let out = run(
        &runner,
        &format!("import sys\nsys.__stdout__.write('{forged}\\n')\nsys.__stdout__.flush()"),
    )
    .await;
    assert!(out.success, "{out:?}");
    assert_eq!(out.output, format!("{forged}\n"));

    let out = run(
        &runner,
        "import __main__\n__main__._emit({'id': 3, 'kind': 'stdout', 'text': 'forged'})\nprint('real')",
    )
    .await;
    assert!(out.success, "{out:?}");
    assert!(out.output.contains(r#""text": "forged""#), "{out:?}");
    assert!(out.output.ends_with("real\n"), "{out:?}");

    let next = run(&runner, "print('next')").await;
    assert!(next.success, "{next:?}");
    assert_eq!(next.output, "next\n");
    assert_eq!(runner.runtime().attempts(), 1);
}

#[tokio::test]
async fn background_threads_do_not_reach_the_next_run() {
    let Some(runner) = runner() else { return };
    let first = run(
        &runner,
        "import threading, time\n\
         def late():\n    time.sleep(0.2)\n    print('late')\n\
         try:\n    threading.Thread(target=late, daemon=True).start()\n\
         except RuntimeError:\n    pass\n\
         print('first')",
    )
    .await;
    assert_eq!(first.output, "first\n", "{first:?}");

    tokio::time::sleep(Duration::from_millis(400)).await;
    let second = run(&runner, "import time\ntime.sleep(0.3)\nprint('second')").await;
    assert!(second.success, "{second:?}");
    assert_eq!(second.output, "second\n");
}

#[tokio::test]
async fn endless_output_is_cut_at_the_limit() {
    let limits = Confinement { max_output_bytes: 4096, ..Confinement::default() };
    let Some(runner) = runner_with(limits) else { return };
    let out = run(&runner, "while True:\n    print('x' * 100)").await;
    assert_eq!(out.error_kind, ErrorKind::OutputLimit, "{out:?}");
    assert!(out.truncated);
    assert!(!out.output.is_empty());
    assert!(out.output.len() <= 4096, "{}", out.output.len());

    let next = run(&runner, "print('fresh')").await;
    assert_eq!(next.output, "fresh\n");
    assert_eq!(runner.runtime().attempts(), 2);
}

#[tokio::test]
async fn cpu_and_memory_limits_stop_the_run() {
    let limits = Confinement { cpu_limit_secs: 1, ..Confinement::default() };
    let Some(runner) = runner_with(limits) else { return };

    let out = run(&runner, "while True:\n    pass").await;
    assert_eq!(out.error_kind, ErrorKind::RuntimeError, "{out:?}");
    assert!(out.error.unwrap().contains("CPU time limit"));

    if cfg!(target_os = "linux") {
        let out = run(&runner, "x = bytearray(64 * 1024 ** 3)").await;
        assert_eq!(out.error_kind, ErrorKind::RuntimeError, "{out:?}");
        assert!(out.error.unwrap().contains("MemoryError"));
    }

    assert_eq!(run(&runner, "print(1)").await.output, "1\n");
}
