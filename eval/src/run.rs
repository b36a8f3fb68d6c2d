//! Case execution orchestration.
//!
//! Coordinates workspace creation, the agent cycle, and result capture.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use gym::core::events::AgentEvent;
use gym::cycle::{CycleRequest, run_cycle};
use gym::io::command::ProcessCommandRunner;
use gym::io::config::load_config;
use gym::io::engine::ExpectationEngine;
use gym::io::session::AgentSession;
use tracing::{debug, info, instrument};

use crate::case::CaseFile;
use crate::config::apply_case_config;
use crate::descriptor::AgentCommand;
use crate::outcome::{Outcome, classify_outcome};
use crate::results::{CaptureInput, capture_results};
use crate::workspace::create_workspace;

/// Result of running a single case.
#[derive(Debug)]
pub struct RunOutcome {
    /// Unique identifier for this eval run.
    pub eval_run_id: String,
    /// Path to the results directory.
    pub results_dir: PathBuf,
    /// Classified outcome.
    pub outcome: Outcome,
}

/// Run a case end-to-end: workspace creation, agent turns, checks, result capture.
#[instrument(skip_all, fields(case_id = %case.case.id))]
pub fn run_case(repo_root: &Path, case_path: &Path, case: &CaseFile) -> Result<RunOutcome> {
    info!("case run started");

    let base = load_config(&repo_root.join("eval").join("gym.toml")).context("load gym config")?;
    let cfg = apply_case_config(base, &case.config)?;
    let expectations = case.expectations().context("case expectations")?;

    debug!("creating workspace");
    let workspace_base = repo_root.join("eval").join("workspaces");
    let workspace = create_workspace(&workspace_base, &case.case.id, &case.setup.files)
        .context("create workspace")?;

    let started_at = Utc::now();
    let eval_run_id = format!("eval-{}", started_at.format("%Y%m%d_%H%M%S_%3f"));

    let provider = AgentCommand::new(case.agent.clone(), case.env.clone());
    let mut session = AgentSession::new(provider, cfg.session_config())
        .with_observer(|event: &AgentEvent| debug!(?event, "agent event"));
    let engine = ExpectationEngine::default();
    let runner = ProcessCommandRunner {
        output_limit_bytes: cfg.commands.output_limit_bytes,
    };
    let request = CycleRequest {
        follow_ups: case.case.follow_ups.clone(),
        system_prompt: case.case.system_prompt.clone(),
        interactive: case.case.interactive,
        turn_timeout: cfg.turn_timeout(),
        ignore: cfg.snapshot.ignore.clone(),
        expectations,
        ..CycleRequest::new(&workspace.root, case.case.prompt.clone())
    };

    debug!("running agent cycle");
    let cycle = run_cycle(&mut session, &workspace.git, &engine, &runner, &request)
        .context("run agent cycle")?;
    let finished_at = Utc::now();

    let outcome = classify_outcome(&cycle);
    let duration = finished_at - started_at;
    info!(
        turns = cycle.turns.len(),
        changed = cycle.diffs.len(),
        duration_secs = duration.num_milliseconds() as f64 / 1000.0,
        "agent cycle finished"
    );

    debug!("capturing results");
    let capture_input = CaptureInput {
        case_id: &case.case.id,
        case_path,
        eval_run_id: &eval_run_id,
        agent_program: &case.agent.program,
        outcome,
        cycle: &cycle,
        started_at,
        finished_at,
        workspace_root: &workspace.root,
        repo_root,
    };
    let results_dir = capture_results(&repo_root.join("eval").join("results"), &capture_input)
        .context("capture results")?;

    info!(outcome = ?outcome, results_dir = %results_dir.display(), "case run complete");

    Ok(RunOutcome {
        eval_run_id,
        results_dir,
        outcome,
    })
}
