//! Diff expectation evaluation. Operates only on the change records.

use crate::core::expectation::DiffExpectation;
use crate::core::path::compile_all;
use crate::core::types::{CheckResult, ExpectationKind, ExpectationRef, FileDiff};

pub fn check_diffs(exp: &DiffExpectation, diffs: &[FileDiff]) -> CheckResult {
    let reference = ExpectationRef {
        kind: ExpectationKind::Diff,
        target: "diff".to_string(),
    };
    match first_violation(exp, diffs) {
        Ok(()) => CheckResult::pass(
            reference,
            format!("{} changed file(s) satisfy diff constraints", diffs.len()),
        ),
        Err(message) => CheckResult::fail(reference, message).with_details(changed_summary(diffs)),
    }
}

fn first_violation(exp: &DiffExpectation, diffs: &[FileDiff]) -> Result<(), String> {
    if let Some(allowed) = &exp.allowed_statuses
        && let Some(bad) = diffs.iter().find(|d| !allowed.contains(&d.status))
    {
        let allowed = allowed
            .iter()
            .map(|status| status.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(format!(
            "{} is {}, allowed statuses: [{allowed}]",
            bad.path, bad.status
        ));
    }

    if let Some(patterns) = &exp.allowed_path_patterns {
        let globs = compile_all(patterns).map_err(|err| format!("{err:#}"))?;
        if let Some(bad) = diffs
            .iter()
            .find(|d| !globs.iter().any(|glob| glob.matches(&d.path)))
        {
            return Err(format!(
                "{} does not match any allowed pattern [{}]",
                bad.path,
                patterns.join(", ")
            ));
        }
    }

    let disallowed = compile_all(&exp.disallowed_path_patterns).map_err(|err| format!("{err:#}"))?;
    for diff in diffs {
        if let Some(glob) = disallowed.iter().find(|glob| glob.matches(&diff.path)) {
            return Err(format!(
                "{} matches disallowed pattern {}",
                diff.path,
                glob.as_str()
            ));
        }
    }

    if let Some(min) = exp.min_files_changed
        && diffs.len() < min
    {
        return Err(format!(
            "{} file(s) changed, expected at least {min}",
            diffs.len()
        ));
    }
    if let Some(max) = exp.max_files_changed
        && diffs.len() > max
    {
        return Err(format!(
            "{} file(s) changed, expected at most {max}",
            diffs.len()
        ));
    }

    for required in &exp.must_include_paths {
        if !diffs.iter().any(|d| &d.path == required) {
            return Err(format!("{required} was expected to change but did not"));
        }
    }
    Ok(())
}

fn changed_summary(diffs: &[FileDiff]) -> String {
    diffs
        .iter()
        .map(|d| format!("{} ({})", d.path, d.status))
        .collect::<Vec<_>>()
        .join("\n")
}
