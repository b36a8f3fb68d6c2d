//! Pluggable syntax validators keyed by language name.

use std::collections::BTreeMap;

use rustpython_parser::Mode;
use thiserror::Error;

use crate::core::expectation::SyntaxExpectation;
use crate::core::snapshot::Snapshot;
use crate::core::types::{CheckResult, ExpectationKind, ExpectationRef};

/// A parse failure with an optional source position (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", describe(.message, .line, .column))]
pub struct SyntaxError {
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

fn describe(message: &str, line: &Option<usize>, column: &Option<usize>) -> String {
    match (line, column) {
        (Some(line), Some(column)) => format!("line {line}, column {column}: {message}"),
        (Some(line), None) => format!("line {line}: {message}"),
        _ => message.to_string(),
    }
}

/// Validates the grammar of one language.
pub trait SyntaxValidator: Send + Sync {
    /// Language names (lowercase) this validator answers to, e.g. `["toml"]`.
    fn languages(&self) -> &[&'static str];
    fn validate(&self, source: &str) -> Result<(), SyntaxError>;
}

pub struct JsonValidator;

impl SyntaxValidator for JsonValidator {
    fn languages(&self) -> &[&'static str] {
        &["json"]
    }

    fn validate(&self, source: &str) -> Result<(), SyntaxError> {
        serde_json::from_str::<serde_json::Value>(source)
            .map(|_| ())
            .map_err(|err| {
                // serde_json appends " at line L column C" to its message.
                let full = err.to_string();
                let message = match full.rfind(" at line ") {
                    Some(idx) => full[..idx].to_string(),
                    None => full,
                };
                SyntaxError {
                    message,
                    line: Some(err.line()),
                    column: Some(err.column()),
                }
            })
    }
}

pub struct TomlValidator;

impl SyntaxValidator for TomlValidator {
    fn languages(&self) -> &[&'static str] {
        &["toml"]
    }

    fn validate(&self, source: &str) -> Result<(), SyntaxError> {
        match toml::from_str::<toml::Table>(source) {
            Ok(_) => Ok(()),
            Err(err) => {
                let position = err.span().map(|span| line_column(source, span.start));
                Err(SyntaxError {
                    message: err.message().trim().to_string(),
                    line: position.map(|(line, _)| line),
                    column: position.map(|(_, column)| column),
                })
            }
        }
    }
}

/// Python via the RustPython parser; errors carry the offending offset.
pub struct PythonValidator;

impl SyntaxValidator for PythonValidator {
    fn languages(&self) -> &[&'static str] {
        &["python", "py"]
    }

    fn validate(&self, source: &str) -> Result<(), SyntaxError> {
        match rustpython_parser::parse(source, Mode::Module, "<source>") {
            Ok(_) => Ok(()),
            Err(err) => {
                let (line, column) = line_column(source, usize::from(err.offset));
                Err(SyntaxError {
                    message: err.error.to_string(),
                    line: Some(line),
                    column: Some(column),
                })
            }
        }
    }
}

/// 1-based line and column for a byte offset.
fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source[..floor_char_boundary(source, offset)];
    let line = before.matches('\n').count() + 1;
    let column = before
        .rsplit('\n')
        .next()
        .map(|tail| tail.chars().count() + 1)
        .unwrap_or(1);
    (line, column)
}

fn floor_char_boundary(source: &str, mut offset: usize) -> usize {
    while offset > 0 && !source.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

/// Registry of validators; later registrations override earlier ones.
pub struct SyntaxRegistry {
    validators: BTreeMap<String, std::sync::Arc<dyn SyntaxValidator>>,
}

impl SyntaxRegistry {
    pub fn empty() -> Self {
        Self {
            validators: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, validator: impl SyntaxValidator + 'static) {
        let validator: std::sync::Arc<dyn SyntaxValidator> = std::sync::Arc::new(validator);
        for language in validator.languages() {
            self.validators
                .insert(language.to_string(), std::sync::Arc::clone(&validator));
        }
    }

    pub fn get(&self, language: &str) -> Option<&dyn SyntaxValidator> {
        self.validators
            .get(&language.to_ascii_lowercase())
            .map(|validator| validator.as_ref())
    }

    pub fn languages(&self) -> Vec<&str> {
        self.validators.keys().map(String::as_str).collect()
    }
}

impl Default for SyntaxRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(JsonValidator);
        registry.register(PythonValidator);
        registry.register(TomlValidator);
        registry
    }
}

/// Parse the snapshot copy of `exp.path` with the validator for its language.
pub fn check_syntax(
    exp: &SyntaxExpectation,
    snapshot: &Snapshot,
    registry: &SyntaxRegistry,
) -> CheckResult {
    let reference = ExpectationRef {
        kind: ExpectationKind::Syntax,
        target: exp.path.clone(),
    };
    let Some(language) = exp.resolved_language() else {
        return CheckResult::fail(
            reference,
            format!("Cannot infer a language for {}", exp.path),
        );
    };
    let Some(validator) = registry.get(&language) else {
        return CheckResult::fail(
            reference,
            format!("No syntax validator for language '{language}'"),
        )
        .with_details(format!("available: {}", registry.languages().join(", ")));
    };
    let Some(entry) = snapshot.get(&exp.path) else {
        return CheckResult::fail(reference, format!("File {} not found", exp.path));
    };
    let Some(source) = entry.content.as_deref() else {
        return CheckResult::fail(reference, format!("File {} is not valid UTF-8", exp.path));
    };
    match validator.validate(source) {
        Ok(()) => CheckResult::pass(reference, format!("{} is valid {language}", exp.path)),
        Err(err) => CheckResult::fail(reference, format!("Syntax error in {}: {err}", exp.path)),
    }
}
