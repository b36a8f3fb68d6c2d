//! Human-readable transcript of a cycle.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::{CheckResult, TurnResult};

const TRANSCRIPT_TEMPLATE: &str = include_str!("templates/transcript.txt");
const RESPONSE_LIMIT_CHARS: usize = 2_000;

#[derive(Debug, Serialize)]
struct TurnView {
    index: usize,
    prompt: String,
    response: String,
    tools: Vec<String>,
    changes: Vec<String>,
    status: String,
    num_turns: u32,
    duration: String,
    cost: String,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct CheckView {
    passed: bool,
    kind: &'static str,
    target: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct Totals {
    turns: u32,
    duration: String,
    cost: String,
    passed: usize,
}

/// Render turns and check results as plain text.
pub fn render_transcript(turns: &[TurnResult], checks: &[CheckResult]) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("transcript", TRANSCRIPT_TEMPLATE)
        .context("load transcript template")?;
    let template = env.get_template("transcript")?;

    let turn_views: Vec<TurnView> = turns
        .iter()
        .enumerate()
        .map(|(idx, turn)| turn_view(idx + 1, turn))
        .collect();
    let check_views: Vec<CheckView> = checks
        .iter()
        .map(|check| CheckView {
            passed: check.passed,
            kind: check.expectation.kind.as_str(),
            target: check.expectation.target.clone(),
            message: check.message.clone(),
        })
        .collect();
    let totals = Totals {
        turns: turns.iter().map(|t| t.num_turns).sum(),
        duration: format_secs(turns.iter().map(|t| t.duration_secs).sum()),
        cost: format_cost(total_cost(turns)),
        passed: checks.iter().filter(|c| c.passed).count(),
    };

    template
        .render(context! {
            turns => turn_views,
            checks => check_views,
            totals => totals,
        })
        .context("render transcript")
}

fn turn_view(index: usize, turn: &TurnResult) -> TurnView {
    TurnView {
        index,
        prompt: turn.prompt.trim().to_string(),
        response: truncate_response(turn.response_text.trim()),
        tools: turn.tool_uses.iter().map(|t| t.name.clone()).collect(),
        changes: turn
            .diffs
            .iter()
            .map(|d| format!("{:<8} {} ({:+})", d.status.as_str(), d.path, d.line_delta))
            .collect(),
        status: turn.status.as_str().to_string(),
        num_turns: turn.num_turns,
        duration: format_secs(turn.duration_secs),
        cost: format_cost(turn.cost_usd),
        error: turn.error.as_ref().map(ToString::to_string),
    }
}

fn total_cost(turns: &[TurnResult]) -> Option<f64> {
    let costs: Vec<f64> = turns.iter().filter_map(|t| t.cost_usd).collect();
    if costs.is_empty() {
        None
    } else {
        Some(costs.iter().sum())
    }
}

fn truncate_response(text: &str) -> String {
    match text.char_indices().nth(RESPONSE_LIMIT_CHARS) {
        Some((idx, _)) => format!("{}\n... [truncated]", &text[..idx]),
        None => text.to_string(),
    }
}

fn format_secs(secs: f64) -> String {
    format!("{secs:.1}s")
}

fn format_cost(cost: Option<f64>) -> String {
    cost.map(|c| format!("${c:.4}"))
        .unwrap_or_else(|| "n/a".to_string())
}
