//! File expectation evaluation against a snapshot.

use regex::Regex;

use crate::core::expectation::FileExpectation;
use crate::core::path::PathGlob;
use crate::core::snapshot::Snapshot;
use crate::core::types::{CheckResult, ExpectationKind, ExpectationRef};

/// Evaluate a file expectation. The first violated predicate decides the
/// failure message; matched files are visited in path order.
pub fn check_file(exp: &FileExpectation, snapshot: &Snapshot) -> CheckResult {
    let reference = ExpectationRef {
        kind: ExpectationKind::File,
        target: exp
            .path
            .clone()
            .or_else(|| exp.path_pattern.clone())
            .unwrap_or_default(),
    };

    let targets = match resolve_targets(exp, snapshot) {
        Ok(targets) => targets,
        Err(message) => return CheckResult::fail(reference, message),
    };

    let regexes = match compile_regexes(&exp.content_matches) {
        Ok(regexes) => regexes,
        Err(message) => return CheckResult::fail(reference, message),
    };

    match targets {
        Targets::Absent { label } => {
            CheckResult::pass(reference, format!("File {label} correctly does not exist"))
        }
        Targets::Files(paths) => {
            for path in &paths {
                if let Err(message) = check_content(exp, &regexes, snapshot, path) {
                    return CheckResult::fail(reference, message);
                }
            }
            let message = if paths.len() == 1 {
                format!("File {} satisfies all predicates", paths[0])
            } else {
                format!("{} files satisfy all predicates", paths.len())
            };
            CheckResult::pass(reference, message)
        }
    }
}

enum Targets {
    /// `should_exist = false` and nothing was found.
    Absent { label: String },
    Files(Vec<String>),
}

fn resolve_targets(exp: &FileExpectation, snapshot: &Snapshot) -> Result<Targets, String> {
    match (&exp.path, &exp.path_pattern) {
        (Some(path), None) => {
            let exists = snapshot.contains(path);
            match (exp.should_exist, exists) {
                (true, true) => Ok(Targets::Files(vec![path.clone()])),
                (true, false) => Err(format!("File {path} should exist but was not found")),
                (false, true) => Err(format!("File {path} should not exist but was found")),
                (false, false) => Ok(Targets::Absent {
                    label: path.clone(),
                }),
            }
        }
        (None, Some(pattern)) => {
            let glob = PathGlob::new(pattern).map_err(|err| format!("{err:#}"))?;
            let matched: Vec<String> = snapshot
                .paths()
                .filter(|path| glob.matches(path))
                .map(str::to_string)
                .collect();
            if !exp.should_exist {
                return match matched.first() {
                    None => Ok(Targets::Absent {
                        label: format!("matching {pattern}"),
                    }),
                    Some(first) => Err(format!(
                        "No file matching {pattern} should exist, but found {} (e.g. {first})",
                        matched.len()
                    )),
                };
            }
            if matched.len() < exp.min_matching_files {
                return Err(format!(
                    "Pattern {pattern} matched {} file(s), expected at least {}",
                    matched.len(),
                    exp.min_matching_files
                ));
            }
            Ok(Targets::Files(matched))
        }
        (Some(_), Some(_)) => Err("invalid expectation: both path and path_pattern set".to_string()),
        (None, None) => Err("invalid expectation: neither path nor path_pattern set".to_string()),
    }
}

fn compile_regexes(patterns: &[String]) -> Result<Vec<(String, Regex)>, String> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern)
                .map(|regex| (pattern.clone(), regex))
                .map_err(|err| format!("invalid regex /{pattern}/: {err}"))
        })
        .collect()
}

fn check_content(
    exp: &FileExpectation,
    regexes: &[(String, Regex)],
    snapshot: &Snapshot,
    path: &str,
) -> Result<(), String> {
    if !exp.has_content_predicates() {
        return Ok(());
    }
    let entry = snapshot
        .get(path)
        .ok_or_else(|| format!("File {path} disappeared from snapshot"))?;
    let content = entry
        .content
        .as_deref()
        .ok_or_else(|| format!("Cannot check content of {path}: not valid UTF-8"))?;

    for needle in &exp.content_contains {
        if !content.contains(needle.as_str()) {
            return Err(format!("Missing: '{needle}' in {path}"));
        }
    }
    for needle in &exp.content_not_contains {
        if content.contains(needle.as_str()) {
            return Err(format!("Found (unexpected): '{needle}' in {path}"));
        }
    }
    for (pattern, regex) in regexes {
        if !regex.is_match(content) {
            return Err(format!("No match: /{pattern}/ in {path}"));
        }
    }
    let line_count = content.lines().count();
    if let Some(min) = exp.min_lines
        && line_count < min
    {
        return Err(format!("{path}: {line_count} lines (min {min})"));
    }
    if let Some(max) = exp.max_lines
        && line_count > max
    {
        return Err(format!("{path}: {line_count} lines (max {max})"));
    }
    Ok(())
}
