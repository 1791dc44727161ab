//! External-tool subprocess backend.
//!
//! Launches the numeric tool as a child process in its own process group and
//! parses the single line it writes to stdout. The tool is known to fork
//! helper processes that outlive their parent, so termination always
//! escalates to a SIGKILL of the entire group, via an RAII guard that fires
//! on every exit path. Helpers also inherit the stdout pipe and can hold it
//! open past the parent's exit, so the read is deadline-bound rather than
//! waiting for EOF.
//!
//! Wire contract: one argument string of the form
//! `-cp:=<selector>,<p1>,<p2>,<p3>,<precision>[,<bound>]`.

use std::io::Read;
use std::os::fd::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::pending::{PendingCell, PendingCompute, PendingValue};
use crate::pool::WorkerPool;

/// Poll interval while waiting for the child to exit or write.
const WAIT_POLL: Duration = Duration::from_millis(10);

fn set_nonblocking(fd: RawFd) -> std::io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        return Err(std::io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Owns a spawned child; dropping it kills the whole process group and
/// reaps the child, so no subprocess survives a panic or early return.
struct ChildGuard {
    child: Child,
    pgid: i32,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        // process_group(0) made the child its own group leader.
        let pgid = child.id() as i32;
        Self { child, pgid }
    }

    fn kill_group(&mut self) {
        debug!(pgid = self.pgid, "killing process group");
        let rc = unsafe { libc::killpg(self.pgid, libc::SIGKILL) };
        if rc == -1 {
            let err = std::io::Error::last_os_error();
            // ESRCH means the group is already gone, expected under races.
            if err.raw_os_error() != Some(libc::ESRCH) {
                warn!(pgid = self.pgid, %err, "killpg failed");
            }
        }
        let _ = self.child.wait();
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.kill_group();
    }
}

/// Result of an asynchronous invocation.
pub enum AsyncInvocation {
    /// The short poll caught the result; no bookkeeping needed.
    Immediate(f64),
    /// Still running; the handle resolves later.
    Pending(PendingValue),
    /// Failed within the short poll, even after escalation.
    Failed(String),
}

/// External-tool subprocess evaluator.
#[derive(Clone, Debug)]
pub struct SubprocessBackend {
    tool: PathBuf,
    timeout: Duration,
    poll: Duration,
}

impl SubprocessBackend {
    /// Create a backend for the tool at `tool`. An unreachable binary is a
    /// configuration error, surfaced now rather than at dispatch time.
    pub fn new(tool: PathBuf, timeout: Duration, poll: Duration) -> EngineResult<Self> {
        if !tool.is_file() {
            return Err(EngineError::Config(format!(
                "external tool '{}' is not an executable file",
                tool.display()
            )));
        }
        Ok(Self { tool, timeout, poll })
    }

    /// Build the single `-cp:=` argument string.
    fn build_arg(selector: &str, params: &[f64], precision: u32, bound: Option<u64>) -> String {
        let mut arg = format!("-cp:={selector}");
        for p in params {
            arg.push(',');
            arg.push_str(&p.to_string());
        }
        arg.push(',');
        arg.push_str(&precision.to_string());
        if let Some(k) = bound {
            arg.push(',');
            arg.push_str(&k.to_string());
        }
        arg
    }

    /// Synchronous invocation: block until the child exits or times out.
    pub fn invoke(
        &self,
        selector: &str,
        params: &[f64],
        precision: u32,
        bound: Option<u64>,
    ) -> EngineResult<f64> {
        let arg = Self::build_arg(selector, params, precision, bound);
        debug!(tool = %self.tool.display(), %arg, "invoking external tool");

        let child = {
            use std::os::unix::process::CommandExt;
            Command::new(&self.tool)
                .arg(&arg)
                .stdout(Stdio::piped())
                .process_group(0)
                .spawn()
                .map_err(|e| EngineError::Spawn {
                    tool: self.tool.display().to_string(),
                    message: e.to_string(),
                })?
        };
        let mut guard = ChildGuard::new(child);

        let deadline = Instant::now() + self.timeout;
        loop {
            match guard.child.try_wait() {
                Ok(Some(_status)) => break,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        // The guard's drop force-kills the whole group.
                        return Err(EngineError::Timeout(self.timeout));
                    }
                    std::thread::sleep(WAIT_POLL);
                }
                Err(e) => return Err(EngineError::Io(e)),
            }
        }

        let output = match guard.child.stdout.as_mut() {
            Some(stdout) => self.read_first_line(stdout, deadline)?,
            None => String::new(),
        };
        let line = output.lines().next().unwrap_or("").trim();
        let value: f64 = line
            .parse()
            .map_err(|_| EngineError::MalformedOutput(line.to_string()))?;

        if value.is_nan() {
            return Err(EngineError::Retryable(format!(
                "external tool returned NaN at precision {precision}"
            )));
        }
        Ok(value)
    }

    /// Read stdout up to the first newline or EOF, giving up at `deadline`.
    ///
    /// A forked helper that inherited the pipe's write end keeps it open
    /// after the tool itself has exited, so a plain read-to-EOF can block
    /// for an unbounded time. The fd is switched to non-blocking and polled
    /// against the same deadline as the exit wait; the wire contract is a
    /// single line, so a newline ends the read.
    fn read_first_line(
        &self,
        stdout: &mut ChildStdout,
        deadline: Instant,
    ) -> EngineResult<String> {
        set_nonblocking(stdout.as_raw_fd())?;
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match stdout.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    if buf.contains(&b'\n') {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(EngineError::Timeout(self.timeout));
                    }
                    std::thread::sleep(WAIT_POLL);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(EngineError::Io(e)),
            }
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Invocation with built-in precision escalation: a retryable failure
    /// relaunches the subprocess at `precision + step` until the cap.
    pub fn invoke_escalating(
        &self,
        selector: &str,
        params: &[f64],
        precision: u32,
        bound: Option<u64>,
        step: u32,
        cap: u32,
    ) -> EngineResult<f64> {
        let mut precision = precision;
        loop {
            match self.invoke(selector, params, precision, bound) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    if precision >= cap {
                        return Err(e);
                    }
                    debug!(precision, step, "escalating external tool precision");
                    precision += step;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Asynchronous invocation: the escalating call runs on the worker
    /// pool; a bounded short poll is attempted first so fast results avoid
    /// the pending-result bookkeeping entirely.
    pub fn invoke_async(
        &self,
        pool: &WorkerPool,
        selector: &str,
        params: Vec<f64>,
        precision: u32,
        bound: Option<u64>,
        step: u32,
        cap: u32,
    ) -> AsyncInvocation {
        let cell = PendingCell::new();
        let backend = self.clone();
        let selector = selector.to_string();
        let worker_cell = cell.clone();
        pool.spawn(move || {
            let result =
                backend.invoke_escalating(&selector, &params, precision, bound, step, cap);
            worker_cell.fulfill(result);
        });

        if cell.wait(Some(self.poll)) {
            match cell.get(None) {
                Ok(value) => AsyncInvocation::Immediate(value),
                Err(e) => AsyncInvocation::Failed(e.to_string()),
            }
        } else {
            AsyncInvocation::Pending(cell)
        }
    }
}
