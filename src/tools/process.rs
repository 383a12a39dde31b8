//! Process Invoker
//!
//! Spawns the external tool with a validated argument vector and captures
//! its output incrementally.
//!
//! # Lifecycle
//!
//! ```text
//! spawn ──> reader tasks (stdout, stderr) append chunks to their buffers
//!       └─> reaper task owns the child:
//!             natural exit  ─┐
//!             kill requested ┴─> wait() ─> publish Exited ─> drain readers ─> publish Drained
//! ```
//!
//! The exit is published as soon as the child is reaped, so the exit code is
//! never held back by a stream that a grandchild keeps open. Draining is a
//! separate step bounded by `DRAIN_GRACE`.
//!
//! The reaper is the only owner of the OS child and always waits on it, so
//! the process is reaped on every path. `kill_on_drop` is set as well in case
//! the runtime shuts down underneath us.

use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Size of a single read from a child pipe
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// How long to keep draining output after the process has exited
///
/// A grandchild that inherited a pipe can keep it open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Error raised when the OS cannot launch the binary
#[derive(Debug, thiserror::Error)]
#[error("Failed to spawn process '{binary}': {source}")]
pub struct SpawnError {
    /// The binary that could not be launched
    pub binary: String,

    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Default)]
struct BufferState {
    data: Vec<u8>,
    sealed: bool,
}

/// Append-only capture buffer for one output stream
///
/// Chunks are stored in arrival order. The buffer never shrinks; once sealed,
/// further chunks are discarded. Bytes are kept raw and decoded lossily on
/// read, so a UTF-8 sequence split across two chunks decodes correctly.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<Mutex<BufferState>>,
}

impl OutputBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BufferState> {
        // A panic while holding the lock cannot leave the Vec half-written
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a chunk
    ///
    /// Returns `false` if the buffer has been sealed and the chunk was dropped.
    pub fn append(&self, chunk: &[u8]) -> bool {
        let mut state = self.lock();
        if state.sealed {
            return false;
        }
        state.data.extend_from_slice(chunk);
        true
    }

    /// Seal the buffer, appending one final line first
    ///
    /// The line is separated from earlier content by a newline unless the
    /// buffer is empty or already ends in one. Has no effect if the buffer is
    /// already sealed.
    pub fn seal_with_line(&self, line: &str) {
        let mut state = self.lock();
        if state.sealed {
            return;
        }
        if !state.data.is_empty() && !state.data.ends_with(b"\n") {
            state.data.push(b'\n');
        }
        state.data.extend_from_slice(line.as_bytes());
        state.sealed = true;
    }

    /// Seal the buffer without adding anything
    pub fn seal(&self) {
        self.lock().sealed = true;
    }

    #[cfg(test)]
    pub(crate) fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    /// Number of bytes captured so far
    pub fn len(&self) -> usize {
        self.lock().data.len()
    }

    /// Whether nothing has been captured
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current content, decoded as UTF-8 (lossy)
    pub fn snapshot(&self) -> String {
        String::from_utf8_lossy(&self.lock().data).into_owned()
    }
}

/// Terminal state of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitState {
    /// Exit code as reported to callers
    pub code: i32,

    /// Whether the exit followed a termination request
    pub killed: bool,
}

/// Published when the reaper goes away without reporting
const LOST_EXIT: ExitState = ExitState {
    code: -1,
    killed: true,
};

/// Progress of the reaper, as seen through the watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Running,

    /// Reaped; readers may still be draining
    Exited(ExitState),

    /// Reaped and both streams closed or abandoned
    Drained(ExitState),
}

impl Lifecycle {
    fn exit(self) -> Option<ExitState> {
        match self {
            Lifecycle::Running => None,
            Lifecycle::Exited(state) | Lifecycle::Drained(state) => Some(state),
        }
    }
}

/// Handle to one running instance of the external tool
///
/// Exclusively owned by the invocation that spawned it. The handle itself
/// does not own the OS child; the reaper task does. The handle talks to it
/// through a kill notification and an exit-state watch channel.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    stdout: OutputBuffer,
    stderr: OutputBuffer,
    kill: Arc<Notify>,
    kill_requested: AtomicBool,
    lifecycle: watch::Receiver<Lifecycle>,
}

impl ProcessHandle {
    /// Spawn `binary` with `args`
    ///
    /// The binary is resolved through `PATH`. Arguments are passed as a
    /// vector; no shell is involved. stdin is closed.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the binary is missing or not executable.
    pub fn spawn(binary: &str, args: &[String]) -> Result<Self, SpawnError> {
        let mut child = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SpawnError {
                binary: binary.to_string(),
                source,
            })?;

        let pid = child.id();
        debug!(?pid, binary, "Process spawned");

        let stdout = OutputBuffer::new();
        let stderr = OutputBuffer::new();

        let readers = [
            child
                .stdout
                .take()
                .map(|pipe| tokio::spawn(capture(pipe, stdout.clone(), "stdout"))),
            child
                .stderr
                .take()
                .map(|pipe| tokio::spawn(capture(pipe, stderr.clone(), "stderr"))),
        ];

        let kill = Arc::new(Notify::new());
        let (lifecycle_tx, lifecycle_rx) = watch::channel(Lifecycle::Running);

        tokio::spawn(reap(child, kill.clone(), readers, lifecycle_tx));

        Ok(Self {
            pid,
            stdout,
            stderr,
            kill,
            kill_requested: AtomicBool::new(false),
            lifecycle: lifecycle_rx,
        })
    }

    /// OS process id, if the OS reported one
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Captured standard output
    pub fn stdout(&self) -> &OutputBuffer {
        &self.stdout
    }

    /// Captured standard error
    pub fn stderr(&self) -> &OutputBuffer {
        &self.stderr
    }

    /// Ask the process to terminate
    ///
    /// Idempotent and safe after exit: only the first call sends a kill to the
    /// reaper, and a kill delivered after the process has been reaped is
    /// ignored.
    pub fn request_termination(&self) {
        if self.kill_requested.swap(true, Ordering::AcqRel) {
            trace!(pid = ?self.pid, "Termination already requested");
            return;
        }
        if self.has_terminated() {
            trace!(pid = ?self.pid, "Termination requested after exit; nothing to do");
            return;
        }
        debug!(pid = ?self.pid, "Requesting process termination");
        // notify_one stores a permit, so the reaper sees it even if it is not
        // parked on the notification yet
        self.kill.notify_one();
    }

    #[cfg(test)]
    pub(crate) fn termination_requested(&self) -> bool {
        self.kill_requested.load(Ordering::Acquire)
    }

    /// Whether the process has exited and been reaped
    pub fn has_terminated(&self) -> bool {
        self.lifecycle.borrow().exit().is_some()
    }

    /// Wait for the process to exit
    ///
    /// Resolves as soon as the child is reaped. Output may still be arriving;
    /// use `wait_for_output` before reading the buffers.
    pub async fn wait_for_exit(&self) -> ExitState {
        self.wait_until(|state| state.exit().is_some()).await
    }

    /// Wait for the process to exit and its output streams to close
    ///
    /// Streams held open by a grandchild are abandoned after `DRAIN_GRACE`.
    pub async fn wait_for_output(&self) -> ExitState {
        self.wait_until(|state| matches!(state, Lifecycle::Drained(_)))
            .await
    }

    async fn wait_until<F>(&self, done: F) -> ExitState
    where
        F: FnMut(&Lifecycle) -> bool,
    {
        let mut lifecycle = self.lifecycle.clone();
        let reached = lifecycle.wait_for(done).await.map(|state| *state);
        match reached {
            Ok(state) => state.exit().unwrap_or(LOST_EXIT),
            // Reaper gone without publishing; only possible if the runtime is
            // shutting down
            Err(_) => {
                let last = *lifecycle.borrow();
                last.exit().unwrap_or(LOST_EXIT)
            }
        }
    }
}

/// Copy one pipe into a buffer chunk by chunk until EOF
async fn capture<R>(mut pipe: R, buffer: OutputBuffer, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                trace!(stream, bytes = n, "Captured output chunk");
                if !buffer.append(&chunk[..n]) {
                    trace!(stream, "Buffer sealed; discarding chunk");
                }
            }
            Err(e) => {
                warn!(stream, "Failed to read child output: {}", e);
                break;
            }
        }
    }
}

/// Own the child until it has been reaped, publish its exit, then drain
async fn reap(
    mut child: Child,
    kill: Arc<Notify>,
    readers: [Option<JoinHandle<()>>; 2],
    lifecycle: watch::Sender<Lifecycle>,
) {
    let (status, killed) = tokio::select! {
        status = child.wait() => (status, false),
        _ = kill.notified() => {
            if let Err(e) = child.start_kill() {
                // Already exited between the select arms; wait() below reaps it
                debug!("Kill signal not delivered: {}", e);
            }
            (child.wait().await, true)
        }
    };

    let code = match status {
        Ok(status) => exit_code(status),
        Err(e) => {
            warn!("Failed to wait for child process: {}", e);
            -1
        }
    };

    let exit = ExitState { code, killed };
    debug!(code, killed, "Process reaped");
    lifecycle.send_replace(Lifecycle::Exited(exit));

    let drain_deadline = tokio::time::Instant::now() + DRAIN_GRACE;
    for reader in readers.into_iter().flatten() {
        let abort = reader.abort_handle();
        if tokio::time::timeout_at(drain_deadline, reader).await.is_err() {
            debug!("Output stream still open after exit; abandoning reader");
            abort.abort();
        }
    }

    trace!("Output drained");
    lifecycle.send_replace(Lifecycle::Drained(exit));
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}
