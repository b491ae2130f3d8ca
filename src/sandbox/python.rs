//! Python interpreter backend: a long-lived, confined worker process.
//!
//! The worker runs a small driver that speaks newline-delimited JSON over its
//! own stdin/stdout. Each request is executed in a child forked just for it:
//! the child gets fresh pipes for stdout and stderr, tighter limits and an
//! audit hook, and exits when the code finishes. Only the parent writes to the
//! wire, so nothing the learner code prints can pose as a frame, and nothing
//! it leaves behind (threads, patched modules) survives into the next run.
//!
//! Every frame carries the id of the request it answers. Frames for any other
//! id, or bytes waiting before a request is sent, mean the wire is out of step
//! and the worker is discarded.

use std::os::unix::fs::PermissionsExt;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::sandbox::confine::{self, Confinement};
use crate::sandbox::{Interpreter, InterpreterLoader, OutputChunk, OutputSink, RunJob, Stream};

/// `PATH` inside the worker. Its environment is otherwise empty.
pub const WORKER_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Upper bound on one wire frame. Output frames are at most a few KiB.
const MAX_FRAME_BYTES: u64 = 1 << 20;

const DRIVER: &str = r##"
import codecs, io, json, os, resource, select, signal, sys, traceback

_LIMITS = json.loads(sys.argv[1]) if len(sys.argv) > 1 else {}
_PARENT = os.getpid()
_WRITE_FLAGS = os.O_WRONLY | os.O_RDWR | os.O_CREAT | os.O_APPEND | os.O_TRUNC
_DENIED = (
    "os.system", "os.exec", "os.posix_spawn", "os.spawn", "os.fork", "os.forkpty",
    "os.kill", "os.killpg", "os.remove", "os.rename", "os.rmdir", "os.mkdir",
    "os.chmod", "os.chown", "os.symlink", "os.link", "os.truncate", "os.putenv",
    "os.unsetenv", "os.chdir", "os.setxattr", "os.removexattr", "subprocess.",
    "_posixsubprocess.", "pty.", "socket.", "ctypes.", "shutil.", "resource.",
    "sqlite3.", "urllib.", "http.client.", "ftplib.", "smtplib.", "imaplib.",
    "poplib.", "nntplib.", "telnetlib.", "webbrowser.", "signal.pthread_kill",
)
_CHUNK = 8192
_RESULT_CAP = 1 << 16


def _emit(frame):
    data = (json.dumps(frame) + "\n").encode()
    while data:
        data = data[os.write(1, data):]


def _guard(event, args):
    if event == "open":
        mode, flags = args[1], args[2] or 0
        if flags & _WRITE_FLAGS or (mode and any(c in mode for c in "wax+")):
            raise PermissionError("writing files is not allowed")
    elif event.startswith(_DENIED):
        raise PermissionError("%s is not allowed" % event)


def _confine():
    try:
        import ctypes
        ctypes.CDLL(None).prctl(1, signal.SIGKILL)
        del ctypes
    except Exception:
        pass
    for name in [m for m in sys.modules if m == "ctypes" or m.startswith("ctypes.")]:
        del sys.modules[name]
    if os.getppid() != _PARENT:
        os._exit(70)
    cpu = int(_LIMITS.get("cpu_secs") or 0)
    if cpu > 0:
        resource.setrlimit(resource.RLIMIT_CPU, (cpu, cpu + 1))
    resource.setrlimit(resource.RLIMIT_NPROC, (0, 0))
    resource.setrlimit(resource.RLIMIT_FSIZE, (0, 0))
    sys.addaudithook(_guard)


def _child(req, out_w, err_w, res_w):
    null = os.open(os.devnull, os.O_RDONLY)
    os.dup2(null, 0)
    os.dup2(out_w, 1)
    os.dup2(err_w, 2)
    for fd in (null, out_w, err_w):
        os.close(fd)
    sys.stdin = io.StringIO(req.get("stdin") or "")
    sys.stdout = io.TextIOWrapper(io.FileIO(1, "w", closefd=False), encoding="utf-8", errors="replace", write_through=True)
    sys.stderr = io.TextIOWrapper(io.FileIO(2, "w", closefd=False), encoding="utf-8", errors="replace", write_through=True)
    result = io.FileIO(res_w, "w", closefd=False)
    _confine()
    error = None
    try:
        exec(compile(req["code"], "<learner>", "exec"), {"__name__": "__main__"})
    except SystemExit:
        pass
    except BaseException as exc:
        tb = exc.__traceback__.tb_next if exc.__traceback__ is not None else None
        error = "".join(traceback.format_exception(type(exc), exc, tb))
    try:
        sys.stdout.flush()
        sys.stderr.flush()
    except BaseException:
        pass
    data = json.dumps({"error": error}).encode()[:_RESULT_CAP]
    while data:
        data = data[result.write(data):]


def _exit_reason(status):
    if os.WIFSIGNALED(status):
        sig = os.WTERMSIG(status)
        if sig in (signal.SIGXCPU, signal.SIGKILL):
            return "Program stopped: CPU time limit exceeded"
        return "Program stopped by signal %d" % sig
    code = os.WEXITSTATUS(status)
    return None if code == 0 else "Program exited with status %d" % code


def _serve(req):
    rid = req.get("id")
    out_r, out_w = os.pipe()
    err_r, err_w = os.pipe()
    res_r, res_w = os.pipe()
    pid = os.fork()
    if pid == 0:
        code = 70
        try:
            for fd in (out_r, err_r, res_r):
                os.close(fd)
            _child(req, out_w, err_w, res_w)
            code = 0
        finally:
            os._exit(code)
    for fd in (out_w, err_w, res_w):
        os.close(fd)

    limit = int(_LIMITS.get("max_output_bytes") or 0)
    streams = {
        out_r: ("stdout", codecs.getincrementaldecoder("utf-8")("replace")),
        err_r: ("stderr", codecs.getincrementaldecoder("utf-8")("replace")),
    }
    pending = [out_r, err_r, res_r]
    result = b""
    used = 0
    truncated = False
    while pending and not truncated:
        ready, _, _ = select.select(pending, [], [])
        for fd in ready:
            chunk = os.read(fd, _CHUNK)
            if fd == res_r:
                if chunk:
                    result = (result + chunk)[:_RESULT_CAP]
                    continue
            elif chunk:
                if limit and used + len(chunk) > limit:
                    chunk = chunk[: limit - used]
                    truncated = True
                used += len(chunk)
                kind, decoder = streams[fd]
                text = decoder.decode(chunk, final=truncated)
                if text:
                    _emit({"id": rid, "kind": kind, "text": text})
                if truncated:
                    break
                continue
            else:
                kind, decoder = streams[fd]
                text = decoder.decode(b"", final=True)
                if text:
                    _emit({"id": rid, "kind": kind, "text": text})
            pending.remove(fd)
            os.close(fd)
    if truncated:
        os.kill(pid, signal.SIGKILL)
        for fd in pending:
            os.close(fd)
    _, status = os.waitpid(pid, 0)

    error = None
    if not truncated:
        try:
            error = json.loads(result.decode("utf-8", "replace"))["error"]
        except (ValueError, KeyError, TypeError):
            error = _exit_reason(status)
        if error is not None and not isinstance(error, str):
            error = str(error)
    _emit({"id": rid, "kind": "done", "error": error, "truncated": truncated})


def _net_namespace():
    try:
        return os.readlink("/proc/self/ns/net")
    except OSError:
        return None


_emit({"kind": "ready", "version": sys.version.split()[0], "net_ns": _net_namespace()})

for _line in sys.stdin.buffer:
    try:
        _req = json.loads(_line)
        _req["code"]
    except (ValueError, KeyError, TypeError) as exc:
        _emit({"kind": "done", "id": None, "error": "malformed request: %s" % exc, "truncated": False})
        continue
    _serve(_req)
"##;

#[derive(Serialize)]
struct Request<'a> {
    id: u64,
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdin: Option<&'a str>,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Frame {
    Ready {
        version: String,
        #[serde(default)]
        net_ns: Option<String>,
    },
    Stdout {
        id: Option<u64>,
        text: String,
    },
    Stderr {
        id: Option<u64>,
        text: String,
    },
    Done {
        id: Option<u64>,
        error: Option<String>,
        #[serde(default)]
        truncated: bool,
    },
}

impl Frame {
    fn id(&self) -> Option<u64> {
        match self {
            Frame::Ready { .. } => None,
            Frame::Stdout { id, .. } | Frame::Stderr { id, .. } | Frame::Done { id, .. } => *id,
        }
    }
}

fn parse_frame(line: &str) -> Result<Frame, SandboxError> {
    serde_json::from_str(line)
        .map_err(|e| SandboxError::Protocol(format!("bad frame {:?}: {}", crate::util::trunc_for_log(line, 120), e)))
}

/// Read one newline-terminated frame, refusing anything longer than `MAX_FRAME_BYTES`.
async fn read_frame(reader: &mut BufReader<ChildStdout>) -> Result<String, SandboxError> {
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_FRAME_BYTES)
        .read_until(b'\n', &mut buf)
        .await
        .map_err(|e| SandboxError::Crashed(e.to_string()))?;
    if n == 0 {
        return Err(SandboxError::Crashed("worker closed its output".into()));
    }
    if buf.last() != Some(&b'\n') {
        return Err(if n as u64 >= MAX_FRAME_BYTES {
            SandboxError::Protocol(format!("frame longer than {MAX_FRAME_BYTES} bytes"))
        } else {
            SandboxError::Crashed("worker stopped mid-frame".into())
        });
    }
    String::from_utf8(buf).map_err(|e| SandboxError::Protocol(format!("frame is not UTF-8: {e}")))
}

/// Nothing may be waiting on the wire between requests.
fn ensure_quiet(reader: &mut BufReader<ChildStdout>) -> Result<(), SandboxError> {
    if !reader.buffer().is_empty() {
        return Err(SandboxError::Stale(format!("{} buffered bytes", reader.buffer().len())));
    }
    match reader.fill_buf().now_or_never() {
        None => Ok(()),
        Some(Ok([])) => Err(SandboxError::Crashed("worker closed its output".into())),
        Some(Ok(pending)) => Err(SandboxError::Stale(format!("{} unread bytes", pending.len()))),
        Some(Err(e)) => Err(SandboxError::Crashed(e.to_string())),
    }
}

/// Starts Python workers.
#[derive(Clone, Debug)]
pub struct PythonLoader {
    program: String,
    init_timeout: Duration,
    limits: Confinement,
    driver: &'static str,
}

impl PythonLoader {
    pub fn new(program: impl Into<String>, init_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            init_timeout,
            limits: Confinement::default(),
            driver: DRIVER,
        }
    }

    pub fn from_config(cfg: &SandboxConfig) -> Self {
        Self::new(cfg.python_bin.clone(), Duration::from_millis(cfg.init_timeout_ms))
            .with_limits(Confinement::from_config(cfg))
    }

    pub fn with_limits(mut self, limits: Confinement) -> Self {
        self.limits = limits;
        self
    }

    #[cfg(test)]
    fn with_driver(mut self, driver: &'static str) -> Self {
        self.driver = driver;
        self
    }

    fn command(&self, workdir: &TempDir) -> Command {
        let mut command = Command::new(&self.program);
        command
            // isolated mode, no bytecode writes, unbuffered, UTF-8 regardless of locale
            .args(["-I", "-B", "-u", "-X", "utf8", "-c", self.driver])
            .arg(self.limits.driver_args())
            .env_clear()
            .env("PATH", WORKER_PATH)
            .env("LANG", "C.UTF-8")
            .current_dir(workdir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        self.limits.apply(&mut command);
        command
    }
}

/// An empty directory the worker can read but not write.
fn empty_workdir() -> Result<TempDir, SandboxError> {
    let dir = tempfile::Builder::new()
        .prefix("athar-worker-")
        .tempdir()
        .map_err(|e| SandboxError::Initialization(format!("cannot create worker directory: {e}")))?;
    std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o555))
        .map_err(|e| SandboxError::Initialization(format!("cannot seal worker directory: {e}")))?;
    Ok(dir)
}

#[async_trait]
impl InterpreterLoader for PythonLoader {
    #[instrument(level = "info", skip(self), fields(program = %self.program))]
    async fn load(&self) -> Result<Arc<dyn Interpreter>, SandboxError> {
        let start = std::time::Instant::now();
        let workdir = empty_workdir()?;
        let mut child = self
            .command(&workdir)
            .spawn()
            .map_err(|e| SandboxError::Initialization(format!("cannot start '{}': {}", self.program, e)))?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Initialization("worker stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Initialization("worker stdout unavailable".into()))?;
        let mut reader = BufReader::new(stdout);

        let handshake = tokio::time::timeout(self.init_timeout, read_frame(&mut reader))
            .await
            .map_err(|_| SandboxError::Initialization(format!("no handshake within {:?}", self.init_timeout)))?
            .map_err(|e| SandboxError::Initialization(e.to_string()))?;

        let (version, net_ns) = match parse_frame(handshake.trim_end()) {
            Ok(Frame::Ready { version, net_ns }) => (version, net_ns),
            Ok(other) => {
                return Err(SandboxError::Initialization(format!("unexpected handshake {other:?}")))
            }
            Err(e) => return Err(SandboxError::Initialization(e.to_string())),
        };

        let network_isolated = match (net_ns.as_deref(), confine::own_net_namespace()) {
            (Some(worker), Some(ours)) => worker != ours,
            _ => false,
        };
        if network_isolated {
            info!(target: "sandbox", ?pid, %version, elapsed = ?start.elapsed(), "Python worker started");
        } else {
            warn!(target: "sandbox", ?pid, %version, elapsed = ?start.elapsed(), "Python worker started without a private network namespace");
        }

        Ok(Arc::new(PythonWorker {
            pid,
            version,
            network_isolated,
            max_output_bytes: self.limits.max_output_bytes,
            io: Mutex::new(WorkerIo { stdin, reader, next_id: 0 }),
            child: Mutex::new(child),
            killed: AtomicBool::new(false),
            _workdir: workdir,
        }))
    }
}

struct WorkerIo {
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

/// A running worker process and the process group it leads.
pub struct PythonWorker {
    pid: Option<u32>,
    version: String,
    network_isolated: bool,
    max_output_bytes: usize,
    io: Mutex<WorkerIo>,
    child: Mutex<Child>,
    killed: AtomicBool,
    _workdir: TempDir,
}

impl PythonWorker {
    fn kill_group(&self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(pid) = self.pid {
            confine::kill_group(pid);
        }
    }
}

impl Drop for PythonWorker {
    fn drop(&mut self) {
        self.kill_group();
    }
}

#[async_trait]
impl Interpreter for PythonWorker {
    #[instrument(level = "debug", skip(self, job, sink), fields(pid = ?self.pid, code_len = job.code.len()))]
    async fn run(&self, job: RunJob<'_>, sink: OutputSink) -> Result<Option<String>, SandboxError> {
        let mut io = self.io.lock().await;
        ensure_quiet(&mut io.reader)?;

        io.next_id += 1;
        let id = io.next_id;
        let mut payload = serde_json::to_string(&Request { id, code: job.code, stdin: job.stdin })
            .map_err(|e| SandboxError::Protocol(e.to_string()))?;
        payload.push('\n');
        io.stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| SandboxError::Crashed(e.to_string()))?;
        io.stdin.flush().await.map_err(|e| SandboxError::Crashed(e.to_string()))?;

        loop {
            let line = read_frame(&mut io.reader).await?;
            let frame = parse_frame(line.trim_end())?;
            if frame.id() != Some(id) {
                return Err(SandboxError::Protocol(format!(
                    "frame for request {:?} while running request {id}",
                    frame.id()
                )));
            }

            let chunk = match frame {
                Frame::Stdout { text, .. } => OutputChunk { stream: Stream::Stdout, text },
                Frame::Stderr { text, .. } => OutputChunk { stream: Stream::Stderr, text },
                Frame::Done { truncated: true, .. } => {
                    return Err(SandboxError::OutputLimit(self.max_output_bytes));
                }
                Frame::Done { error, .. } => {
                    debug!(target: "sandbox", id, failed = error.is_some(), "Run finished");
                    return Ok(error);
                }
                Frame::Ready { .. } => {
                    return Err(SandboxError::Protocol("unexpected ready frame mid-run".into()));
                }
            };
            // A closed receiver means the caller stopped listening; keep draining
            // so the wire stays in step.
            let _ = sink.send(chunk).await;
        }
    }

    async fn terminate(&self) {
        self.kill_group();
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            warn!(target: "sandbox", pid = ?self.pid, error = %e, "Failed to kill Python worker");
        }
    }

    fn interruptible(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!(
            "python {} (pid {:?}, network {})",
            self.version,
            self.pid,
            if self.network_isolated { "isolated" } else { "shared" }
        )
    }
}
