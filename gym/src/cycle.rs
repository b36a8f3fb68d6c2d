//! One evaluation cycle: snapshot, run the agent, snapshot, diff, evaluate.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::expectation::Expectation;
use crate::core::snapshot::diff;
use crate::core::types::{CheckResult, FileDiff, TurnResult};
use crate::io::command::CommandRunner;
use crate::io::engine::ExpectationEngine;
use crate::io::session::{AgentSession, DEFAULT_TURN_TIMEOUT, TurnRequest};
use crate::io::snapshotter::{default_ignore_patterns, snapshot};

/// Working-tree precondition checked before the agent touches the project.
pub trait WorkTree {
    /// Fail unless the project has no uncommitted changes.
    fn ensure_clean(&self) -> Result<()>;
}

/// A project with no version control; always considered clean.
#[derive(Debug, Clone, Copy, Default)]
pub struct Untracked;

impl WorkTree for Untracked {
    fn ensure_clean(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CycleRequest {
    pub workdir: PathBuf,
    pub prompt: String,
    /// Sent in order after the main prompt, each resuming the agent session.
    pub follow_ups: Vec<String>,
    pub system_prompt: Option<String>,
    pub interactive: bool,
    pub turn_timeout: Duration,
    pub ignore: Vec<String>,
    pub expectations: Vec<Expectation>,
}

impl CycleRequest {
    pub fn new(workdir: impl Into<PathBuf>, prompt: impl Into<String>) -> Self {
        Self {
            workdir: workdir.into(),
            prompt: prompt.into(),
            follow_ups: Vec::new(),
            system_prompt: None,
            interactive: false,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            ignore: default_ignore_patterns(),
            expectations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CycleOutcome {
    /// One entry per prompt actually sent, each with its own diffs.
    pub turns: Vec<TurnResult>,
    /// Changes from before the first turn to after the last one.
    pub diffs: Vec<FileDiff>,
    pub checks: Vec<CheckResult>,
    pub passed: bool,
}

impl CycleOutcome {
    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }

    pub fn total_cost(&self) -> Option<f64> {
        let costs: Vec<f64> = self.turns.iter().filter_map(|t| t.cost_usd).collect();
        if costs.is_empty() {
            None
        } else {
            Some(costs.iter().sum())
        }
    }
}

/// Run the main prompt plus follow-ups and evaluate the expectations.
///
/// Follow-ups stop at the first turn that does not finish `ok`. Expectations
/// are evaluated regardless, against the cumulative diff and final snapshot.
#[instrument(skip_all, fields(workdir = %request.workdir.display(), follow_ups = request.follow_ups.len()))]
pub fn run_cycle(
    session: &mut AgentSession,
    worktree: &dyn WorkTree,
    engine: &ExpectationEngine,
    runner: &dyn CommandRunner,
    request: &CycleRequest,
) -> Result<CycleOutcome> {
    worktree
        .ensure_clean()
        .context("project must be clean before running the agent")?;

    let initial = snapshot(&request.workdir, &request.ignore).context("snapshot before agent")?;
    let mut before = initial.clone();
    let mut turns = Vec::new();
    let mut resume: Option<String> = None;

    let prompts = std::iter::once(&request.prompt).chain(&request.follow_ups);
    for (idx, prompt) in prompts.enumerate() {
        let turn_request = TurnRequest {
            prompt: prompt.clone(),
            workdir: request.workdir.clone(),
            system_prompt: request.system_prompt.clone(),
            interactive: request.interactive,
            timeout: request.turn_timeout,
            resume_session: resume.clone(),
        };
        let mut turn = session.run(&turn_request);
        let after = snapshot(&request.workdir, &request.ignore).context("snapshot after agent")?;
        turn.diffs = diff(&before, &after);
        info!(
            turn = idx + 1,
            status = turn.status.as_str(),
            changed = turn.diffs.len(),
            "turn complete"
        );
        before = after;
        if turn.session_id.is_some() {
            resume = turn.session_id.clone();
        }
        let ok = turn.status.is_ok();
        turns.push(turn);
        if !ok {
            warn!(turn = idx + 1, "turn did not finish ok; skipping remaining prompts");
            break;
        }
    }

    let diffs = diff(&initial, &before);
    let checks = engine.evaluate_all(&request.expectations, &before, &diffs, runner);
    let passed = turns.iter().all(|t| t.status.is_ok()) && checks.iter().all(|c| c.passed);
    info!(
        turns = turns.len(),
        checks = checks.len(),
        failed = checks.iter().filter(|c| !c.passed).count(),
        passed,
        "cycle complete"
    );
    Ok(CycleOutcome {
        turns,
        diffs,
        checks,
        passed,
    })
}
