//! Helpers for running child processes with timeouts, bounded output and
//! process-group termination.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::io::sys::{self, Signal};

/// How long pipes may stay open once the child is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Put the child in its own process group so the whole tree can be signalled.
pub fn isolate_process_group(cmd: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(not(unix))]
    {
        let _ = cmd;
    }
}

/// Stop a child and everything in its process group, then reap it.
///
/// Sends SIGTERM to the group, waits up to `grace`, then SIGKILLs the group.
/// A live child that leads no group of its own is signalled directly. The child is
/// always reaped before returning.
#[instrument(skip_all, fields(pid = child.id(), grace_secs = grace.as_secs_f64()))]
pub fn terminate_process_group(child: &mut Child, grace: Duration) -> Result<ExitStatus> {
    if let Some(status) = child.try_wait().context("poll child before terminate")? {
        kill_process_group(child);
        return Ok(status);
    }

    signal_group(child, Signal::Term, true);
    let status = match child.wait_timeout(grace).context("wait after SIGTERM")? {
        Some(status) => {
            debug!("child exited after SIGTERM");
            // Stragglers that ignored SIGTERM still hold the group.
            kill_process_group(child);
            status
        }
        None => {
            warn!("child ignored SIGTERM, sending SIGKILL");
            signal_group(child, Signal::Kill, true);
            if let Err(err) = child.kill() {
                debug!(err = %err, "direct kill failed");
            }
            child.wait().context("wait after SIGKILL")?
        }
    };
    Ok(status)
}

/// SIGKILL whatever is left in the group of a child that has already exited.
///
/// Background processes it started would otherwise keep its pipes open.
pub fn kill_process_group(child: &Child) {
    signal_group(child, Signal::Kill, false);
}

fn signal_group(child: &Child, signal: Signal, child_alive: bool) {
    let Err(err) = sys::kill_group(child.id(), signal) else {
        return;
    };
    if child_alive {
        debug!(?signal, err = %err, "group signal not delivered, signalling pid");
        if let Err(err) = sys::kill_pid(child.id(), signal) {
            debug!(?signal, err = %err, "pid signal not delivered");
        }
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
/// On timeout the child's process group is terminated. On a normal exit whatever it left running
/// in the group is killed, and pipes held open past that are abandoned after a short grace.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    isolate_process_group(&mut cmd);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_rx = spawn_reader(stdout, output_limit_bytes);
    let stderr_rx = spawn_reader(stderr, output_limit_bytes);

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => {
            kill_process_group(&child);
            status
        }
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, terminating process group"
            );
            timed_out = true;
            terminate_process_group(&mut child, Duration::from_secs(1))?
        }
    };

    let drain_deadline = Instant::now() + DRAIN_GRACE;
    let (stdout, stdout_truncated) = collect_output(&stdout_rx, drain_deadline, "stdout")?;
    let (stderr, stderr_truncated) = collect_output(&stderr_rx, drain_deadline, "stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

type ReadResult = Result<(Vec<u8>, usize)>;

fn spawn_reader<R: Read + Send + 'static>(stream: R, limit: usize) -> Receiver<ReadResult> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(read_stream_limited(stream, limit));
    });
    rx
}

/// Wait for a reader until `deadline`. A pipe still held open by a process
/// that left the group yields empty output instead of blocking.
fn collect_output(rx: &Receiver<ReadResult>, deadline: Instant, label: &str) -> ReadResult {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(result) => result.with_context(|| format!("read {label}")),
        Err(RecvTimeoutError::Timeout) => {
            warn!(stream = label, "output pipe still open after exit; dropping output");
            Ok((Vec::new(), 0))
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("{label} reader thread panicked")),
    }
}

/// Drain a stream to EOF, keeping at most `limit` bytes. Returns the kept
/// bytes and the count discarded.
pub(crate) fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_output_and_exit_code() {
        let output = run_command_with_timeout(
            sh("echo out; echo err >&2; exit 3"),
            None,
            Duration::from_secs(5),
            1024,
        )
        .expect("run");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout_lossy(), "out\n");
        assert_eq!(output.stderr_lossy(), "err\n");
        assert!(!output.timed_out);
    }

    #[test]
    fn truncates_beyond_limit() {
        let output =
            run_command_with_timeout(sh("printf 'abcdefgh'"), None, Duration::from_secs(5), 4)
                .expect("run");
        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 4);
    }

    #[test]
    fn timeout_kills_whole_group() {
        let start = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 30 & sleep 30; wait"),
            None,
            Duration::from_millis(200),
            1024,
        )
        .expect("run");
        assert!(output.timed_out);
        // The background sleep holds stdout open; returning at all means it died too.
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn stdin_payload_is_delivered() {
        let output = run_command_with_timeout(
            sh("cat"),
            Some(b"hello"),
            Duration::from_secs(5),
            1024,
        )
        .expect("run");
        assert_eq!(output.stdout_lossy(), "hello");
    }

    #[test]
    fn background_child_does_not_outlive_the_command() {
        let start = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 6 & echo started"),
            None,
            Duration::from_secs(1),
            1024,
        )
        .expect("run");
        assert!(start.elapsed() < Duration::from_secs(3), "{:?}", start.elapsed());
        assert_eq!(output.status.code(), Some(0));
        assert_eq!(output.stdout_lossy(), "started\n");
        assert!(!output.timed_out);
    }

    #[test]
    fn escaped_pipe_holder_is_bounded() {
        let start = Instant::now();
        // setsid moves the sleeper out of the group, so only the drain deadline ends the wait.
        let output = run_command_with_timeout(
            sh("command -v setsid >/dev/null && setsid sleep 6 & echo started"),
            None,
            Duration::from_secs(1),
            1024,
        )
        .expect("run");
        assert!(start.elapsed() < Duration::from_secs(4), "{:?}", start.elapsed());
        assert_eq!(output.status.code(), Some(0));
    }
}
