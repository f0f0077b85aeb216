//! Helpers for running a child process while teeing its output.
//!
//! stdout and stderr are read on their own threads. Every chunk is forwarded to
//! a live sink (normally the runner's own stdout/stderr) and appended to a
//! shared capture buffer, so the operator watches progress while the runner
//! keeps the full text for classification.

use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::budget::{next_slice, remaining};
use crate::io::cancel::CancelToken;

/// How often the wait loop re-checks cancellation and the deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const READ_CHUNK_BYTES: usize = 8192;
/// How long output readers may keep draining after the child was killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Writer that appends into a shared, clonable byte buffer.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.inner
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("capture buffer poisoned"))?;
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Duplicating writer: every write goes to `live` and `capture`.
///
/// The capture side is authoritative. If the live sink fails (e.g. the
/// operator's terminal went away) it is dropped and capture continues.
pub struct Tee<L: Write, C: Write> {
    live: Option<L>,
    capture: C,
}

impl<L: Write, C: Write> Tee<L, C> {
    pub fn new(live: L, capture: C) -> Self {
        Self {
            live: Some(live),
            capture,
        }
    }
}

impl<L: Write, C: Write> Write for Tee<L, C> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.capture.write_all(data)?;
        if let Some(live) = self.live.as_mut()
            && let Err(err) = live.write_all(data).and_then(|()| live.flush())
        {
            warn!(err = %err, "live output sink failed, continuing capture only");
            self.live = None;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(live) = self.live.as_mut() {
            let _ = live.flush();
        }
        self.capture.flush()
    }
}

/// Destinations for live output.
pub struct Sinks {
    pub stdout: Box<dyn Write + Send>,
    pub stderr: Box<dyn Write + Send>,
}

impl Sinks {
    /// Forward to the runner's own stdout/stderr.
    pub fn inherit() -> Self {
        Self {
            stdout: Box::new(io::stdout()),
            stderr: Box::new(io::stderr()),
        }
    }

    /// Discard live output (capture only).
    pub fn discard() -> Self {
        Self {
            stdout: Box::new(io::sink()),
            stderr: Box::new(io::sink()),
        }
    }
}

/// Options for [`run_streaming`].
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Kill the child once this much time has passed. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Kill the child when cancelled.
    pub cancel: CancelToken,
    /// Spawn the child in a new process group and kill the whole group.
    pub process_group: bool,
}

/// Captured result of a streamed child process.
#[derive(Debug)]
pub struct StreamedOutput {
    pub status: ExitStatus,
    /// stdout and stderr bytes interleaved in arrival order.
    pub captured: Vec<u8>,
    pub timed_out: bool,
    pub interrupted: bool,
}

/// Run `cmd` to completion, teeing stdout/stderr to `sinks` and a capture buffer.
///
/// stdin is inherited so an operator can still answer an interactive prompt.
/// Blocks until the child has exited and both output streams are drained.
#[instrument(skip_all, fields(timeout = ?options.timeout, process_group = options.process_group))]
pub fn run_streaming(
    mut cmd: Command,
    options: &StreamOptions,
    sinks: Sinks,
) -> Result<StreamedOutput> {
    cmd.stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    if options.process_group {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let capture = SharedBuffer::new();
    let stdout_tee = Tee::new(sinks.stdout, capture.clone());
    let stderr_tee = Tee::new(sinks.stderr, capture.clone());
    let stdout_handle = thread::spawn(move || pump(stdout, stdout_tee));
    let stderr_handle = thread::spawn(move || pump(stderr, stderr_tee));

    let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
    let mut timed_out = false;
    let mut interrupted = false;
    let status = loop {
        if let Some(status) = child
            .wait_timeout(next_slice(deadline, POLL_INTERVAL))
            .context("wait for command")?
        {
            break status;
        }
        if options.cancel.is_cancelled() {
            warn!("cancelled, killing child");
            interrupted = true;
            terminate(&mut child, options.process_group);
            break child.wait().context("wait command after kill")?;
        }
        if remaining(deadline) == Some(Duration::ZERO) {
            warn!(timeout = ?options.timeout, "command timed out, killing");
            timed_out = true;
            terminate(&mut child, options.process_group);
            break child.wait().context("wait command after kill")?;
        }
    };

    if timed_out || interrupted {
        // A surviving descendant may still hold the pipes open.
        let drain_deadline = Some(Instant::now() + DRAIN_GRACE);
        join_pump_until(stdout_handle, drain_deadline).context("join stdout")?;
        join_pump_until(stderr_handle, drain_deadline).context("join stderr")?;
    } else {
        join_pump(stdout_handle).context("join stdout")?;
        join_pump(stderr_handle).context("join stderr")?;
    }

    debug!(exit_code = ?status.code(), timed_out, interrupted, "command finished");
    Ok(StreamedOutput {
        status,
        captured: capture.contents(),
        timed_out,
        interrupted,
    })
}

/// Copy `reader` into `writer` chunk by chunk until EOF.
fn pump<R: Read, W: Write>(mut reader: R, mut writer: W) -> Result<()> {
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err).context("read output"),
        };
        writer.write_all(&chunk[..n]).context("tee output")?;
    }
    writer.flush().context("flush output")
}

fn join_pump(handle: thread::JoinHandle<Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Join a reader thread unless it is still running at `deadline`.
///
/// A reader that outlives the deadline is detached. It keeps appending to the
/// capture buffer, but the caller has already taken its snapshot.
fn join_pump_until(
    handle: thread::JoinHandle<Result<()>>,
    deadline: Option<Instant>,
) -> Result<()> {
    while !handle.is_finished() {
        if remaining(deadline) == Some(Duration::ZERO) {
            warn!("output pipe still open after kill, detaching reader");
            return Ok(());
        }
        thread::sleep(next_slice(deadline, Duration::from_millis(20)));
    }
    join_pump(handle)
}

/// Best-effort kill of the child (and its process group when requested).
fn terminate(child: &mut Child, process_group: bool) {
    #[cfg(unix)]
    if process_group {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        match i32::try_from(child.id()) {
            Ok(pid) => match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
                Ok(()) => return,
                Err(err) => warn!(err = %err, "killpg failed, falling back to kill"),
            },
            Err(_) => warn!(pid = child.id(), "pid out of range for killpg"),
        }
    }
    #[cfg(not(unix))]
    let _ = process_group;

    if let Err(err) = child.kill() {
        warn!(err = %err, "kill child failed");
    }
}
