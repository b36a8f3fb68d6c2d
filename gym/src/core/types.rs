//! Shared deterministic types for the gym core.
//!
//! These types define the contracts between the session, the diff computer and
//! the expectation engine. They carry no I/O handles and serialize stably.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Change classification for a single path between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStatus {
    Added,
    Modified,
    Deleted,
}

impl DiffStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DiffStatus::Added => "added",
            DiffStatus::Modified => "modified",
            DiffStatus::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for DiffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Change record for one path, derived from a (before, after) snapshot pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub status: DiffStatus,
    pub unified_diff: String,
    /// Added lines minus removed lines.
    pub line_delta: i64,
    pub before_hash: Option<String>,
    pub after_hash: Option<String>,
}

/// A tool invocation as emitted by the agent. `input` is never interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

/// Terminal classification of one agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Ok,
    AgentError,
    TimedOut,
    SpawnFailed,
}

impl TurnStatus {
    pub fn is_ok(self) -> bool {
        self == TurnStatus::Ok
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TurnStatus::Ok => "ok",
            TurnStatus::AgentError => "agent_error",
            TurnStatus::TimedOut => "timed_out",
            TurnStatus::SpawnFailed => "spawn_failed",
        }
    }
}

/// Which watchdog limit fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutKind {
    /// No event arrived within the idle window.
    Idle,
    /// The absolute wall-clock ceiling was reached.
    Ceiling,
}

/// Failure carried inside a [`TurnResult`] instead of being raised.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum SessionError {
    #[error("failed to spawn agent: {message}")]
    Spawn { message: String },
    #[error("protocol error: {noise_lines} consecutive unparseable lines (last: {last_line})")]
    Protocol { noise_lines: usize, last_line: String },
    #[error("agent timed out ({kind:?}) after {after_secs:.1}s")]
    Timeout { kind: TimeoutKind, after_secs: f64 },
    #[error("agent exited with status {exit_code:?} without a result event")]
    NoResult { exit_code: Option<i32> },
    #[error("agent reported an error result")]
    AgentReported,
    #[error("run cancelled by caller")]
    Cancelled,
    #[error("agent i/o failure: {message}")]
    Io { message: String },
}

/// Structured summary of one agent turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    pub prompt: String,
    pub response_text: String,
    pub session_id: Option<String>,
    pub num_turns: u32,
    pub diffs: Vec<FileDiff>,
    pub tool_uses: Vec<ToolUse>,
    pub cost_usd: Option<f64>,
    pub duration_secs: f64,
    pub status: TurnStatus,
    pub error: Option<SessionError>,
    pub exit_code: Option<i32>,
    /// Total unparseable stdout lines seen during the run.
    pub noise_lines: usize,
    /// Captured agent stderr (bounded; empty in interactive mode).
    pub stderr: String,
}

impl TurnResult {
    /// Result for a run that never started.
    pub fn spawn_failed(prompt: &str, message: String) -> Self {
        Self {
            prompt: prompt.to_string(),
            response_text: String::new(),
            session_id: None,
            num_turns: 0,
            diffs: Vec::new(),
            tool_uses: Vec::new(),
            cost_usd: None,
            duration_secs: 0.0,
            status: TurnStatus::SpawnFailed,
            error: Some(SessionError::Spawn { message }),
            exit_code: None,
            noise_lines: 0,
            stderr: String::new(),
        }
    }
}

/// Discriminator of an expectation, used in check references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectationKind {
    File,
    Command,
    Diff,
    Syntax,
}

impl ExpectationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExpectationKind::File => "file",
            ExpectationKind::Command => "command",
            ExpectationKind::Diff => "diff",
            ExpectationKind::Syntax => "syntax",
        }
    }
}

/// Identifies the expectation a [`CheckResult`] belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectationRef {
    pub kind: ExpectationKind,
    pub target: String,
}

/// Outcome of evaluating one expectation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub expectation: ExpectationRef,
    pub passed: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}

impl CheckResult {
    pub fn pass(expectation: ExpectationRef, message: impl Into<String>) -> Self {
        Self {
            expectation,
            passed: true,
            message: message.into(),
            details: String::new(),
        }
    }

    pub fn fail(expectation: ExpectationRef, message: impl Into<String>) -> Self {
        Self {
            expectation,
            passed: false,
            message: message.into(),
            details: String::new(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_status_serializes_snake_case() {
        let raw = serde_json::to_string(&TurnStatus::TimedOut).expect("serialize");
        assert_eq!(raw, "\"timed_out\"");
    }

    #[test]
    fn session_error_message_names_threshold() {
        let err = SessionError::Protocol {
            noise_lines: 6,
            last_line: "garbage".to_string(),
        };
        assert!(err.to_string().contains("6 consecutive"));
    }
}
