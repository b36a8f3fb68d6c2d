//! Expectation evaluation against post-run project state.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path};
use std::time::Duration;

use tracing::{debug, instrument};

use crate::core::diff_check::check_diffs;
use crate::core::expectation::{CommandExpectation, Expectation};
use crate::core::file_check::check_file;
use crate::core::snapshot::{FileEntry, Snapshot};
use crate::core::syntax::{SyntaxRegistry, check_syntax};
use crate::core::types::{CheckResult, FileDiff};
use crate::io::command::{CommandOutcome, CommandRunner};

const OUTPUT_TAIL_CHARS: usize = 2_000;

/// Evaluates expectations. Every call yields a [`CheckResult`]; malformed
/// expectations become failed checks.
#[derive(Default)]
pub struct ExpectationEngine {
    syntax: SyntaxRegistry,
}

impl ExpectationEngine {
    pub fn new(syntax: SyntaxRegistry) -> Self {
        Self { syntax }
    }

    pub fn syntax_registry_mut(&mut self) -> &mut SyntaxRegistry {
        &mut self.syntax
    }

    #[instrument(skip_all, fields(kind = exp.kind().as_str(), target = %exp.target()))]
    pub fn evaluate(
        &self,
        exp: &Expectation,
        snapshot: &Snapshot,
        diffs: &[FileDiff],
        runner: &dyn CommandRunner,
    ) -> CheckResult {
        if let Err(err) = exp.validate() {
            debug!(err = %err, "invalid expectation");
            return CheckResult::fail(exp.reference(), format!("Invalid expectation: {err:#}"));
        }
        let result = match exp {
            Expectation::File(file) => match &file.path {
                Some(path) => check_file(file, &with_literal_path(snapshot, path)),
                None => check_file(file, snapshot),
            },
            Expectation::Diff(diff) => check_diffs(diff, diffs),
            Expectation::Syntax(syntax) => check_syntax(
                syntax,
                &with_literal_path(snapshot, &syntax.path),
                &self.syntax,
            ),
            Expectation::Command(command) => check_command(exp, command, snapshot, runner),
        };
        debug!(passed = result.passed, message = %result.message, "expectation evaluated");
        result
    }

    /// Evaluate in order; results line up with `expectations`.
    pub fn evaluate_all(
        &self,
        expectations: &[Expectation],
        snapshot: &Snapshot,
        diffs: &[FileDiff],
        runner: &dyn CommandRunner,
    ) -> Vec<CheckResult> {
        expectations
            .iter()
            .map(|exp| self.evaluate(exp, snapshot, diffs, runner))
            .collect()
    }
}

/// A literal path the snapshot skipped (an ignored dotfile, say) is read from
/// disk so the check sees the current project state. Pattern matches and
/// diffs keep seeing only the snapshot.
fn with_literal_path<'a>(snapshot: &'a Snapshot, path: &str) -> Cow<'a, Snapshot> {
    if snapshot.contains(path) {
        return Cow::Borrowed(snapshot);
    }
    let Some(entry) = read_project_file(snapshot.root(), path) else {
        return Cow::Borrowed(snapshot);
    };
    debug!(path, "read path outside the snapshot");
    let files = BTreeMap::from([(path.to_string(), entry)]);
    Cow::Owned(Snapshot::new(snapshot.root(), files))
}

fn read_project_file(root: &Path, rel: &str) -> Option<FileEntry> {
    let rel = Path::new(rel);
    if !rel
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
    {
        return None;
    }
    let full = root.join(rel);
    let metadata = fs::symlink_metadata(&full).ok()?;
    if !metadata.is_file() {
        return None;
    }
    fs::read(&full).ok().map(|raw| FileEntry::from_bytes(&raw))
}

fn check_command(
    exp: &Expectation,
    command: &CommandExpectation,
    snapshot: &Snapshot,
    runner: &dyn CommandRunner,
) -> CheckResult {
    let reference = exp.reference();
    let display = command.display_command();
    let outcome = match runner.run(
        &command.command,
        snapshot.root(),
        Duration::from_secs(command.timeout_secs),
    ) {
        Ok(outcome) => outcome,
        Err(err) => {
            return CheckResult::fail(reference, format!("Command failed to start: `{display}`"))
                .with_details(format!("{err:#}"));
        }
    };

    if outcome.timed_out {
        return CheckResult::fail(
            reference,
            format!("Command timed out after {}s", command.timeout_secs),
        )
        .with_details(output_details(&outcome));
    }

    if let Some(message) = first_command_violation(command, &display, &outcome) {
        return CheckResult::fail(reference, message).with_details(output_details(&outcome));
    }
    CheckResult::pass(
        reference,
        format!("`{display}` returned {}", command.returncode),
    )
}

fn first_command_violation(
    command: &CommandExpectation,
    display: &str,
    outcome: &CommandOutcome,
) -> Option<String> {
    match outcome.exit_code {
        Some(code) if code == command.returncode => {}
        Some(code) => {
            return Some(format!(
                "`{display}` returned {code} (expected {})",
                command.returncode
            ));
        }
        None => {
            return Some(format!(
                "`{display}` was terminated by a signal (expected {})",
                command.returncode
            ));
        }
    }

    let streams = [
        (
            "stdout",
            &outcome.stdout,
            outcome.stdout_truncated,
            &command.stdout_contains,
            &command.stdout_not_contains,
        ),
        (
            "stderr",
            &outcome.stderr,
            outcome.stderr_truncated,
            &command.stderr_contains,
            &command.stderr_not_contains,
        ),
    ];
    for (label, text, truncated, wanted, unwanted) in streams {
        if let Some(needle) = wanted.iter().find(|needle| !text.contains(needle.as_str())) {
            let mut message = format!("`{display}` {label} missing: '{needle}'");
            if truncated > 0 {
                message.push_str(&format!(
                    " ({label} truncated after {} bytes, {truncated} dropped)",
                    text.len()
                ));
            }
            return Some(message);
        }
        if let Some(needle) = unwanted.iter().find(|needle| text.contains(needle.as_str())) {
            return Some(format!("`{display}` {label} contains (unexpected): '{needle}'"));
        }
    }
    None
}

fn output_details(outcome: &CommandOutcome) -> String {
    let mut details = String::new();
    for (label, text) in [("stdout", &outcome.stdout), ("stderr", &outcome.stderr)] {
        let text = text.trim_end();
        if text.is_empty() {
            continue;
        }
        details.push_str(&format!("--- {label} ---\n{}\n", tail(text, OUTPUT_TAIL_CHARS)));
    }
    details
}

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    match text.char_indices().nth(count - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}
