//! Validation of expectation documents: JSON Schema, then semantic checks.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde_json::Value;
use tracing::debug;

use crate::core::expectation::Expectation;

pub const EXPECTATIONS_SCHEMA: &str = include_str!("../../schemas/expectations/v1.schema.json");

/// Read, schema-check and deserialize an expectations JSON file.
pub fn load_expectations(path: &Path) -> Result<Vec<Expectation>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    parse_expectations(&value).with_context(|| format!("validate {}", path.display()))
}

/// Validate an already-parsed expectations array.
pub fn parse_expectations(value: &Value) -> Result<Vec<Expectation>> {
    validate_schema(value)?;
    let expectations: Vec<Expectation> =
        serde_json::from_value(value.clone()).context("deserialize expectations")?;
    let errors: Vec<String> = expectations
        .iter()
        .enumerate()
        .filter_map(|(idx, exp)| {
            exp.validate()
                .err()
                .map(|err| format!("[{idx}] {}: {err:#}", exp.kind().as_str()))
        })
        .collect();
    if !errors.is_empty() {
        bail!("invalid expectations:\n- {}", errors.join("\n- "));
    }
    debug!(count = expectations.len(), "expectations validated");
    Ok(expectations)
}

/// Validate JSON instance against the bundled schema (Draft 2020-12).
fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value =
        serde_json::from_str(EXPECTATIONS_SCHEMA).context("parse expectations schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}
