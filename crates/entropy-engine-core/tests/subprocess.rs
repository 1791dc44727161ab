//! Integration tests for the external-tool subprocess backend, using shell
//! scripts as stand-ins for the numeric tool.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use entropy_engine_core::backend::external::{AsyncInvocation, SubprocessBackend};
use entropy_engine_core::error::EngineError;
use entropy_engine_core::pending::PendingCompute;
use entropy_engine_core::pool::WorkerPool;

fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn write_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn backend(tool: PathBuf, timeout: Duration) -> SubprocessBackend {
    SubprocessBackend::new(tool, timeout, Duration::from_millis(50)).unwrap()
}

/// Count live processes whose command line mentions `marker`.
fn processes_mentioning(marker: &str) -> usize {
    let mut count = 0;
    for entry in std::fs::read_dir("/proc").unwrap().flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if let Ok(cmdline) = std::fs::read(entry.path().join("cmdline")) {
            if String::from_utf8_lossy(&cmdline).contains(marker) {
                count += 1;
            }
        }
    }
    count
}

#[test]
fn parses_single_value_from_stdout() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let tool = write_tool(dir.path(), "tool.sh", "#!/bin/sh\necho 2.25\n");
    let backend = backend(tool, Duration::from_secs(5));

    let value = backend
        .invoke("H_external", &[0.1, 0.5, 100.0], 15, None)
        .unwrap();
    assert_eq!(value, 2.25);
}

#[test]
fn nan_output_is_retryable() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let tool = write_tool(dir.path(), "tool.sh", "#!/bin/sh\necho NaN\n");
    let backend = backend(tool, Duration::from_secs(5));

    let err = backend
        .invoke("H_external", &[0.1, 0.5, 100.0], 15, None)
        .unwrap_err();
    assert!(err.is_retryable());
}

#[test]
fn garbage_output_is_malformed() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let tool = write_tool(dir.path(), "tool.sh", "#!/bin/sh\necho 'Error, oops'\n");
    let backend = backend(tool, Duration::from_secs(5));

    let err = backend
        .invoke("H_external", &[0.1], 15, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::MalformedOutput(_)));
    assert!(!err.is_retryable());
}

#[test]
fn escalation_retries_until_precision_suffices() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    // NaN below precision 45; a value once the argument carries ",45".
    let tool = write_tool(
        dir.path(),
        "tool.sh",
        "#!/bin/sh\ncase \"$1\" in *,45) echo 1.5;; *) echo NaN;; esac\n",
    );
    let backend = backend(tool, Duration::from_secs(5));

    let value = backend
        .invoke_escalating("H_external", &[0.1], 15, None, 15, 75)
        .unwrap();
    assert_eq!(value, 1.5);
}

#[test]
fn escalation_stops_at_the_cap() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("calls");
    let tool = write_tool(
        dir.path(),
        "tool.sh",
        &format!("#!/bin/sh\necho x >> {}\necho NaN\n", counter.display()),
    );
    let backend = backend(tool, Duration::from_secs(5));

    let err = backend
        .invoke_escalating("H_external", &[0.1], 15, None, 15, 75)
        .unwrap_err();
    assert!(err.is_retryable());

    // 15, 30, 45, 60, 75: five launches, none past the cap.
    let calls = std::fs::read_to_string(&counter).unwrap();
    assert_eq!(calls.lines().count(), 5);
}

#[test]
fn timeout_kills_the_whole_process_group() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    // The helper re-execs with the tool argument in its own command line so
    // the survivor scan below can find it if the group kill misses it.
    let tool = write_tool(
        dir.path(),
        "tool.sh",
        "#!/bin/sh\nsh -c 'sleep 30' \"$1\" &\nsleep 30\necho 0\n",
    );
    let backend = backend(tool, Duration::from_millis(200));

    let marker = format!("H_kill_marker_{}", std::process::id());
    let err = backend.invoke(&marker, &[1.0], 15, None).unwrap_err();
    assert!(matches!(err, EngineError::Timeout(_)));

    // The SIGKILL is delivered to the group before invoke returns, but give
    // the scheduler a moment to reap.
    for _ in 0..50 {
        if processes_mentioning(&marker) == 0 {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("subprocess group survived the timeout kill");
}

#[test]
fn helper_holding_stdout_open_does_not_stall_the_read() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    // The helper inherits the stdout pipe and keeps it open well past the
    // budget; the tool itself writes its value and exits at once.
    let tool = write_tool(
        dir.path(),
        "tool.sh",
        "#!/bin/sh\necho 1.5\nsleep 3 &\nexit 0\n",
    );
    let backend = backend(tool, Duration::from_millis(200));

    let started = std::time::Instant::now();
    let value = backend.invoke("H_external", &[1.0], 15, None).unwrap();
    assert_eq!(value, 1.5);
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "read stalled on the helper's open pipe"
    );
}

#[test]
fn silent_helper_holding_stdout_open_times_out() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let tool = write_tool(dir.path(), "tool.sh", "#!/bin/sh\nsleep 3 &\nexit 0\n");
    let backend = backend(tool, Duration::from_millis(200));

    let started = std::time::Instant::now();
    let err = backend.invoke("H_external", &[1.0], 15, None).unwrap_err();
    assert!(matches!(err, EngineError::Timeout(_)));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn async_invocation_resolves_fast_results_immediately() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let tool = write_tool(dir.path(), "tool.sh", "#!/bin/sh\necho 4.5\n");
    let backend = SubprocessBackend::new(
        tool,
        Duration::from_secs(5),
        Duration::from_millis(500),
    )
    .unwrap();
    let pool = WorkerPool::new(2).unwrap();

    match backend.invoke_async(&pool, "H_external", vec![0.1], 15, None, 15, 75) {
        AsyncInvocation::Immediate(value) => assert_eq!(value, 4.5),
        AsyncInvocation::Pending(_) => panic!("fast result should resolve within the short poll"),
        AsyncInvocation::Failed(message) => panic!("unexpected failure: {message}"),
    }
}

#[test]
fn async_invocation_hands_back_a_pending_handle() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let tool = write_tool(dir.path(), "tool.sh", "#!/bin/sh\nsleep 0.4\necho 7.0\n");
    let backend = SubprocessBackend::new(
        tool,
        Duration::from_secs(5),
        Duration::from_millis(50),
    )
    .unwrap();
    let pool = WorkerPool::new(2).unwrap();

    let handle = match backend.invoke_async(&pool, "H_external", vec![0.1], 15, None, 15, 75) {
        AsyncInvocation::Pending(handle) => handle,
        AsyncInvocation::Immediate(_) => panic!("slow tool resolved within the short poll"),
        AsyncInvocation::Failed(message) => panic!("unexpected failure: {message}"),
    };

    assert!(handle.wait(Some(Duration::from_secs(5))));
    assert!(handle.successful());
    assert_eq!(handle.get(None).unwrap(), 7.0);
}
