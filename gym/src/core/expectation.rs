//! Declarative expectation model.
//!
//! Expectations are produced outside the core (hand-written case files or a
//! feedback deriver) and only consumed here. [`Expectation::validate`] checks
//! their shape; it does not judge whether they are sensible.

use anyhow::{Result, anyhow, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::path::PathGlob;
use crate::core::types::{DiffStatus, ExpectationKind, ExpectationRef};

pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// One declarative check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expectation {
    File(FileExpectation),
    Command(CommandExpectation),
    Diff(DiffExpectation),
    Syntax(SyntaxExpectation),
}

/// Checks on file existence and content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileExpectation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_pattern: Option<String>,
    #[serde(default = "default_min_matching_files")]
    pub min_matching_files: usize,
    #[serde(default = "default_true")]
    pub should_exist: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_contains: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_not_contains: Vec<String>,
    /// Regexes; each must match at least once.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_matches: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_lines: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_lines: Option<usize>,
}

impl Default for FileExpectation {
    fn default() -> Self {
        Self {
            path: None,
            path_pattern: None,
            min_matching_files: default_min_matching_files(),
            should_exist: true,
            content_contains: Vec::new(),
            content_not_contains: Vec::new(),
            content_matches: Vec::new(),
            min_lines: None,
            max_lines: None,
        }
    }
}

impl FileExpectation {
    /// Expectation on a single literal path.
    pub fn at(path: &str) -> Self {
        Self {
            path: Some(path.to_string()),
            ..Self::default()
        }
    }

    /// Expectation on every path matching a glob.
    pub fn matching(pattern: &str) -> Self {
        Self {
            path_pattern: Some(pattern.to_string()),
            ..Self::default()
        }
    }

    pub fn has_content_predicates(&self) -> bool {
        !self.content_contains.is_empty()
            || !self.content_not_contains.is_empty()
            || !self.content_matches.is_empty()
            || self.min_lines.is_some()
            || self.max_lines.is_some()
    }
}

/// Runs a command in the project directory and checks its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandExpectation {
    pub command: Vec<String>,
    #[serde(default)]
    pub returncode: i32,
    #[serde(default = "default_command_timeout", alias = "timeout")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stdout_contains: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stdout_not_contains: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stderr_contains: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stderr_not_contains: Vec<String>,
}

impl CommandExpectation {
    pub fn new<S: Into<String>>(command: impl IntoIterator<Item = S>) -> Self {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            returncode: 0,
            timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            stdout_contains: Vec::new(),
            stdout_not_contains: Vec::new(),
            stderr_contains: Vec::new(),
            stderr_not_contains: Vec::new(),
        }
    }

    pub fn display_command(&self) -> String {
        self.command.join(" ")
    }
}

/// Constraints over the set of file diffs produced by a turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffExpectation {
    /// When set, every diff status must be listed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_statuses: Option<Vec<DiffStatus>>,
    /// When set, every diff path must match at least one pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_path_patterns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disallowed_path_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_files_changed: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_files_changed: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_include_paths: Vec<String>,
}

/// Parses a file with a language-specific validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxExpectation {
    pub path: String,
    /// Validator name; inferred from the file extension when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl SyntaxExpectation {
    /// Explicit language, or the language named by the file extension.
    pub fn resolved_language(&self) -> Option<String> {
        self.language.clone().or_else(|| {
            std::path::Path::new(&self.path)
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| language_for_extension(&ext.to_ascii_lowercase()))
        })
    }
}

/// Language name for a lowercase extension; unknown extensions pass through.
pub fn language_for_extension(ext: &str) -> String {
    let language = match ext {
        "py" | "pyi" => "python",
        "rs" => "rust",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" => "typescript",
        "rb" => "ruby",
        "yml" | "yaml" => "yaml",
        "md" => "markdown",
        other => other,
    };
    language.to_string()
}

impl Expectation {
    pub fn kind(&self) -> ExpectationKind {
        match self {
            Expectation::File(_) => ExpectationKind::File,
            Expectation::Command(_) => ExpectationKind::Command,
            Expectation::Diff(_) => ExpectationKind::Diff,
            Expectation::Syntax(_) => ExpectationKind::Syntax,
        }
    }

    /// Short human-readable target used in reports.
    pub fn target(&self) -> String {
        match self {
            Expectation::File(exp) => exp
                .path
                .clone()
                .or_else(|| exp.path_pattern.clone())
                .unwrap_or_else(|| "<no path>".to_string()),
            Expectation::Command(exp) => exp.display_command(),
            Expectation::Diff(_) => "diff".to_string(),
            Expectation::Syntax(exp) => exp.path.clone(),
        }
    }

    pub fn reference(&self) -> ExpectationRef {
        ExpectationRef {
            kind: self.kind(),
            target: self.target(),
        }
    }

    /// Check structural validity: required fields, consistent bounds,
    /// compilable regexes and globs.
    pub fn validate(&self) -> Result<()> {
        match self {
            Expectation::File(exp) => validate_file(exp),
            Expectation::Command(exp) => {
                if exp.command.is_empty() || exp.command[0].trim().is_empty() {
                    bail!("command.command must be a non-empty array");
                }
                if exp.timeout_secs == 0 {
                    bail!("command.timeout_secs must be > 0");
                }
                Ok(())
            }
            Expectation::Diff(exp) => validate_diff(exp),
            Expectation::Syntax(exp) => {
                if exp.path.trim().is_empty() {
                    bail!("syntax.path must be non-empty");
                }
                if exp.resolved_language().is_none() {
                    bail!("syntax.language missing and not inferable from {}", exp.path);
                }
                Ok(())
            }
        }
    }
}

fn validate_file(exp: &FileExpectation) -> Result<()> {
    match (&exp.path, &exp.path_pattern) {
        (Some(_), Some(_)) => bail!("file expectation must set only one of path or path_pattern"),
        (None, None) => bail!("file expectation must set path or path_pattern"),
        (Some(path), None) if path.trim().is_empty() => bail!("file.path must be non-empty"),
        (None, Some(pattern)) => {
            PathGlob::new(pattern)?;
        }
        (Some(_), None) => {}
    }
    if let (Some(min), Some(max)) = (exp.min_lines, exp.max_lines)
        && min > max
    {
        bail!("file.min_lines ({min}) must be <= max_lines ({max})");
    }
    for pattern in &exp.content_matches {
        Regex::new(pattern).map_err(|err| anyhow!("invalid regex /{pattern}/: {err}"))?;
    }
    Ok(())
}

fn validate_diff(exp: &DiffExpectation) -> Result<()> {
    if let (Some(min), Some(max)) = (exp.min_files_changed, exp.max_files_changed)
        && min > max
    {
        bail!("diff.min_files_changed ({min}) must be <= max_files_changed ({max})");
    }
    for pattern in exp
        .allowed_path_patterns
        .iter()
        .flatten()
        .chain(&exp.disallowed_path_patterns)
    {
        PathGlob::new(pattern)?;
    }
    Ok(())
}

fn default_true() -> bool {
    true
}

fn default_min_matching_files() -> usize {
    1
}

fn default_command_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}
