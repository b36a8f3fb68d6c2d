//! One supervised run of the external agent process.
//!
//! The session spawns the command supplied by a [`CommandProvider`], parses
//! its stdout as the line-delimited event protocol, enforces the idle and
//! ceiling limits, and always reaps the child before returning a
//! [`TurnResult`]. Failures are reported inside the result, never raised.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::events::{AgentEvent, NoiseCounter, ParsedLine, ResultEvent, parse_line};
use crate::core::types::{SessionError, TimeoutKind, ToolUse, TurnResult, TurnStatus};
use crate::io::process::{
    isolate_process_group, kill_process_group, read_stream_limited, terminate_process_group,
};
use crate::io::sys;

pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(300);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Everything needed to launch the agent for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub program: String,
    pub args: Vec<String>,
    /// Variables set on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Variables removed from the inherited environment.
    pub env_remove: Vec<String>,
    /// Written to stdin then closed. Ignored in interactive mode.
    pub stdin: Option<String>,
}

/// Supplies the agent command line. Implemented by callers; the session never
/// builds argv itself.
pub trait CommandProvider: Send + Sync {
    fn command(&self, request: &TurnRequest) -> CommandDescriptor;
}

/// Parameters of one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub prompt: String,
    pub workdir: PathBuf,
    pub system_prompt: Option<String>,
    pub interactive: bool,
    /// Idle timeout: maximum gap between two protocol events.
    pub timeout: Duration,
    /// Agent session id to continue, for follow-up turns.
    pub resume_session: Option<String>,
}

impl TurnRequest {
    pub fn new(prompt: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            workdir: workdir.into(),
            system_prompt: None,
            interactive: false,
            timeout: DEFAULT_TURN_TIMEOUT,
            resume_session: None,
        }
    }
}

/// Limits applied to every run of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Absolute wall-clock ceiling per run.
    pub max_duration: Duration,
    /// Time between SIGTERM and SIGKILL.
    pub kill_grace: Duration,
    /// Consecutive unparseable lines tolerated before aborting.
    pub max_consecutive_noise: usize,
    pub stderr_limit_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(30 * 60),
            kill_grace: Duration::from_secs(5),
            max_consecutive_noise: 5,
            stderr_limit_bytes: 64 * 1024,
        }
    }
}

pub type EventObserver = Box<dyn FnMut(&AgentEvent) + Send>;

/// Requests cancellation of the run in progress from another thread.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct AgentSession {
    provider: Box<dyn CommandProvider>,
    config: SessionConfig,
    observer: Option<EventObserver>,
    cancel: Arc<AtomicBool>,
}

impl AgentSession {
    pub fn new(provider: impl CommandProvider + 'static, config: SessionConfig) -> Self {
        Self {
            provider: Box::new(provider),
            config,
            observer: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Receive every parsed event as it arrives. Panics inside the observer
    /// are caught and logged.
    pub fn with_observer(mut self, observer: impl FnMut(&AgentEvent) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }

    /// Run the agent once. Diffs are left empty; the caller attaches them.
    ///
    /// A cancel requested before the call is honoured without spawning; the
    /// flag is cleared once the run returns.
    #[instrument(skip_all, fields(workdir = %request.workdir.display(), interactive = request.interactive))]
    pub fn run(&mut self, request: &TurnRequest) -> TurnResult {
        let result = if self.cancel.load(Ordering::SeqCst) {
            info!("agent run cancelled before spawn");
            TurnResult {
                status: TurnStatus::AgentError,
                error: Some(SessionError::Cancelled),
                ..TurnResult::spawn_failed(&request.prompt, String::new())
            }
        } else {
            self.supervise(request)
        };
        self.cancel.store(false, Ordering::SeqCst);
        result
    }

    fn supervise(&mut self, request: &TurnRequest) -> TurnResult {
        let descriptor = self.provider.command(request);
        let started = Instant::now();

        let mut cmd = build_command(&descriptor, request);
        debug!(program = %descriptor.program, args = descriptor.args.len(), "spawning agent");
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(program = %descriptor.program, err = %err, "agent spawn failed");
                return TurnResult::spawn_failed(
                    &request.prompt,
                    format!("{}: {err}", descriptor.program),
                );
            }
        };
        // Given back when this guard drops, after the child is reaped.
        let _terminal = if request.interactive {
            sys::hand_terminal_to(child.id())
        } else {
            None
        };

        let discard = Arc::new(AtomicBool::new(false));
        let pipes = match attach_pipes(&mut child, &descriptor, request, &self.config, &discard) {
            Ok(pipes) => pipes,
            Err(message) => {
                let _ = terminate_process_group(&mut child, self.config.kill_grace);
                let mut result = TurnResult::spawn_failed(&request.prompt, message.clone());
                result.status = TurnStatus::AgentError;
                result.error = Some(SessionError::Io { message });
                return result;
            }
        };

        let mut turn = TurnAccumulator::default();
        let end = self.watch(&mut child, &pipes.lines, request, started, &mut turn);
        discard.store(true, Ordering::SeqCst);

        let exit_status = match &end {
            RunEnd::Eof | RunEnd::Completed => wait_after_eof(&mut child, self.config.kill_grace),
            _ => terminate_process_group(&mut child, self.config.kill_grace),
        };
        let exit_code = match exit_status {
            Ok(status) => status.code(),
            Err(err) => {
                warn!(err = %err, "failed to reap agent");
                None
            }
        };

        let stderr = pipes
            .stderr
            .map(|rx| collect_stderr(&rx, self.config.kill_grace))
            .unwrap_or_default();

        let result = turn.finish(request, end, exit_code, started.elapsed(), stderr);
        info!(
            status = ?result.status,
            exit_code = ?result.exit_code,
            tools = result.tool_uses.len(),
            duration_secs = result.duration_secs,
            "agent turn finished"
        );
        result
    }

    /// Consume events until the turn ends: a `result` event, stdout EOF, a
    /// limit, or cancellation. Once the child itself has exited, stdout gets
    /// `kill_grace` to drain before the turn counts as ended.
    fn watch(
        &mut self,
        child: &mut Child,
        lines: &Receiver<ReaderMsg>,
        request: &TurnRequest,
        started: Instant,
        turn: &mut TurnAccumulator,
    ) -> RunEnd {
        let ceiling = started + self.config.max_duration;
        let mut noise = NoiseCounter::new(self.config.max_consecutive_noise);
        let mut last_event = Instant::now();
        let mut drain_deadline: Option<Instant> = None;

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                info!("agent run cancelled");
                return RunEnd::Cancelled;
            }
            let now = Instant::now();
            if drain_deadline.is_none()
                && let Ok(Some(status)) = child.try_wait()
            {
                debug!(exit_code = ?status.code(), "agent exited; draining stdout");
                kill_process_group(child);
                drain_deadline = Some(now + self.config.kill_grace);
            }
            if let Some(deadline) = drain_deadline
                && now >= deadline
            {
                debug!("stdout still open after agent exit");
                return RunEnd::Eof;
            }
            let idle_deadline = last_event + request.timeout;
            if now >= ceiling {
                warn!(limit_secs = self.config.max_duration.as_secs(), "agent hit duration ceiling");
                return RunEnd::Timeout(TimeoutKind::Ceiling);
            }
            if now >= idle_deadline {
                warn!(idle_secs = request.timeout.as_secs(), "agent idle timeout");
                return RunEnd::Timeout(TimeoutKind::Idle);
            }
            let deadline = drain_deadline.map_or(idle_deadline.min(ceiling), |drain| {
                drain.min(idle_deadline).min(ceiling)
            });
            let wait = deadline.saturating_duration_since(now);

            match lines.recv_timeout(wait.min(POLL_INTERVAL)) {
                Ok(ReaderMsg::Line(line)) => match parse_line(&line) {
                    ParsedLine::Blank => {}
                    ParsedLine::Event(event) => {
                        noise.record_event();
                        last_event = Instant::now();
                        self.notify(&event);
                        let terminal = matches!(event, AgentEvent::Result(_));
                        turn.apply(event);
                        if terminal {
                            debug!("result event received; turn complete");
                            return RunEnd::Completed;
                        }
                    }
                    ParsedLine::Noise(kind) => {
                        debug!(?kind, line = %truncate(&line, 200), "protocol noise");
                        turn.last_noise = line;
                        let abort = noise.record_noise();
                        turn.noise_lines = noise.total();
                        if abort {
                            warn!(consecutive = noise.consecutive(), "too much protocol noise, aborting");
                            return RunEnd::Protocol {
                                noise_lines: noise.consecutive(),
                            };
                        }
                    }
                },
                Ok(ReaderMsg::Failed(message)) => return RunEnd::ReadFailed(message),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return RunEnd::Eof,
            }
        }
    }

    fn notify(&mut self, event: &AgentEvent) {
        let Some(observer) = self.observer.as_mut() else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| observer(event))).is_err() {
            warn!("event observer panicked; continuing");
        }
    }
}

fn build_command(descriptor: &CommandDescriptor, request: &TurnRequest) -> Command {
    let mut cmd = Command::new(&descriptor.program);
    cmd.args(&descriptor.args).current_dir(&request.workdir);
    for key in &descriptor.env_remove {
        cmd.env_remove(key);
    }
    cmd.envs(&descriptor.env);
    cmd.stdout(Stdio::piped());
    if request.interactive {
        // The terminal is handed to the child's group after spawn.
        cmd.stdin(Stdio::inherit()).stderr(Stdio::inherit());
    } else {
        if descriptor.stdin.is_some() {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }
        cmd.stderr(Stdio::piped());
    }
    isolate_process_group(&mut cmd);
    cmd
}

enum ReaderMsg {
    Line(String),
    Failed(String),
}

struct Pipes {
    lines: Receiver<ReaderMsg>,
    stderr: Option<Receiver<String>>,
}

fn attach_pipes(
    child: &mut Child,
    descriptor: &CommandDescriptor,
    request: &TurnRequest,
    config: &SessionConfig,
    discard: &Arc<AtomicBool>,
) -> Result<Pipes, String> {
    if !request.interactive
        && let Some(payload) = descriptor.stdin.clone()
        && let Some(mut stdin) = child.stdin.take()
    {
        thread::spawn(move || {
            if let Err(err) = stdin.write_all(payload.as_bytes()) {
                debug!(err = %err, "agent closed stdin early");
            }
        });
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "agent stdout was not piped".to_string())?;
    let (tx, lines) = mpsc::channel();
    let discard = Arc::clone(discard);
    thread::spawn(move || {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    if discard.load(Ordering::SeqCst) {
                        break;
                    }
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    if tx.send(ReaderMsg::Line(line)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx.send(ReaderMsg::Failed(format!("read agent stdout: {err}")));
                    break;
                }
            }
        }
    });

    let stderr = child.stderr.take().map(|stream| {
        let (tx, rx) = mpsc::channel();
        let limit = config.stderr_limit_bytes;
        thread::spawn(move || {
            let text = match read_stream_limited(stream, limit) {
                Ok((bytes, truncated)) => {
                    let mut text = String::from_utf8_lossy(&bytes).into_owned();
                    if truncated > 0 {
                        text.push_str(&format!("\n[stderr truncated {truncated} bytes]\n"));
                    }
                    text
                }
                Err(err) => format!("[stderr unavailable: {err:#}]"),
            };
            let _ = tx.send(text);
        });
        rx
    });

    Ok(Pipes { lines, stderr })
}

fn wait_after_eof(
    child: &mut Child,
    grace: Duration,
) -> anyhow::Result<std::process::ExitStatus> {
    match child.wait_timeout(grace)? {
        Some(status) => {
            kill_process_group(child);
            Ok(status)
        }
        None => {
            debug!("agent closed stdout but kept running");
            terminate_process_group(child, grace)
        }
    }
}

fn collect_stderr(rx: &Receiver<String>, grace: Duration) -> String {
    rx.recv_timeout(grace).unwrap_or_else(|_| {
        debug!("stderr drain did not finish");
        String::new()
    })
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[derive(Debug)]
enum RunEnd {
    Eof,
    /// A `result` event arrived.
    Completed,
    Timeout(TimeoutKind),
    Protocol { noise_lines: usize },
    ReadFailed(String),
    Cancelled,
}

/// Data collected from the event stream so far.
#[derive(Debug, Default)]
struct TurnAccumulator {
    text: Vec<String>,
    tool_uses: Vec<ToolUse>,
    result: Option<ResultEvent>,
    noise_lines: usize,
    last_noise: String,
}

impl TurnAccumulator {
    fn apply(&mut self, event: AgentEvent) {
        self.text
            .extend(event.text_chunks().into_iter().map(str::to_string));
        self.tool_uses.extend(event.tool_uses());
        if let AgentEvent::Result(result) = event {
            self.result = Some(result);
        }
    }

    fn finish(
        self,
        request: &TurnRequest,
        end: RunEnd,
        exit_code: Option<i32>,
        elapsed: Duration,
        stderr: String,
    ) -> TurnResult {
        let (status, error) = match end {
            RunEnd::Timeout(kind) => (
                TurnStatus::TimedOut,
                Some(SessionError::Timeout {
                    kind,
                    after_secs: elapsed.as_secs_f64(),
                }),
            ),
            RunEnd::Protocol { noise_lines } => (
                TurnStatus::AgentError,
                Some(SessionError::Protocol {
                    noise_lines,
                    last_line: truncate(self.last_noise.trim(), 200).to_string(),
                }),
            ),
            RunEnd::ReadFailed(message) => {
                (TurnStatus::AgentError, Some(SessionError::Io { message }))
            }
            RunEnd::Cancelled => (TurnStatus::AgentError, Some(SessionError::Cancelled)),
            RunEnd::Eof | RunEnd::Completed => match (&self.result, exit_code) {
                (Some(result), _) if result.is_error => {
                    (TurnStatus::AgentError, Some(SessionError::AgentReported))
                }
                (Some(_), _) | (None, Some(0)) => (TurnStatus::Ok, None),
                (None, code) => (
                    TurnStatus::AgentError,
                    Some(SessionError::NoResult { exit_code: code }),
                ),
            },
        };

        let result = self.result.unwrap_or_default();
        let response_text = match result.result.as_deref() {
            Some(text) if !text.trim().is_empty() => text.to_string(),
            _ => self.text.concat(),
        };
        let duration_secs = result
            .duration_ms
            .map(|ms| ms as f64 / 1000.0)
            .unwrap_or_else(|| elapsed.as_secs_f64());

        TurnResult {
            prompt: request.prompt.clone(),
            response_text,
            session_id: result.session_id,
            num_turns: result.num_turns.unwrap_or(0),
            diffs: Vec::new(),
            tool_uses: self.tool_uses,
            cost_usd: result.total_cost_usd,
            duration_secs,
            status,
            error,
            exit_code,
            noise_lines: self.noise_lines,
            stderr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accumulate(lines: &[&str]) -> TurnAccumulator {
        let mut turn = TurnAccumulator::default();
        for line in lines {
            if let ParsedLine::Event(event) = parse_line(line) {
                turn.apply(event);
            }
        }
        turn
    }

    #[test]
    fn result_text_wins_over_streamed_text() {
        let turn = accumulate(&[
            r#"{"type":"text","text":"partial "}"#,
            r#"{"type":"result","result":"final answer","total_cost_usd":0.02,"session_id":"s1","num_turns":2}"#,
        ]);
        let result = turn.finish(
            &TurnRequest::new("p", "."),
            RunEnd::Eof,
            Some(0),
            Duration::from_secs(1),
            String::new(),
        );
        assert_eq!(result.status, TurnStatus::Ok);
        assert_eq!(result.response_text, "final answer");
        assert_eq!(result.cost_usd, Some(0.02));
        assert_eq!(result.session_id.as_deref(), Some("s1"));
        assert_eq!(result.num_turns, 2);
    }

    #[test]
    fn clean_exit_without_result_uses_wall_clock() {
        let turn = accumulate(&[r#"{"type":"text","text":"hi"}"#]);
        let result = turn.finish(
            &TurnRequest::new("p", "."),
            RunEnd::Eof,
            Some(0),
            Duration::from_millis(1500),
            String::new(),
        );
        assert_eq!(result.status, TurnStatus::Ok);
        assert_eq!(result.response_text, "hi");
        assert_eq!(result.cost_usd, None);
        assert!((result.duration_secs - 1.5).abs() < 1e-9);
    }

    #[test]
    fn nonzero_exit_without_result_is_agent_error() {
        let result = TurnAccumulator::default().finish(
            &TurnRequest::new("p", "."),
            RunEnd::Eof,
            Some(2),
            Duration::from_secs(1),
            String::new(),
        );
        assert_eq!(result.status, TurnStatus::AgentError);
        assert_eq!(
            result.error,
            Some(SessionError::NoResult { exit_code: Some(2) })
        );
    }

    #[test]
    fn error_result_is_agent_error() {
        let turn = accumulate(&[r#"{"type":"result","is_error":true,"result":"boom"}"#]);
        let result = turn.finish(
            &TurnRequest::new("p", "."),
            RunEnd::Eof,
            Some(1),
            Duration::from_secs(1),
            String::new(),
        );
        assert_eq!(result.status, TurnStatus::AgentError);
        assert_eq!(result.error, Some(SessionError::AgentReported));
    }

    #[test]
    fn timeout_keeps_collected_tools() {
        let turn = accumulate(&[r#"{"type":"tool_use","name":"Edit","input":{"file":"a.txt"}}"#]);
        let result = turn.finish(
            &TurnRequest::new("p", "."),
            RunEnd::Timeout(TimeoutKind::Idle),
            None,
            Duration::from_secs(3),
            String::new(),
        );
        assert_eq!(result.status, TurnStatus::TimedOut);
        assert_eq!(result.tool_uses.len(), 1);
        assert_eq!(result.tool_uses[0].name, "Edit");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ab", 10), "ab");
    }
}
