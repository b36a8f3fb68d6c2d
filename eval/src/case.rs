//! Case file parsing and validation.
//!
//! Cases are TOML files bundling a prompt, seed files, agent settings and
//! expectations. See `eval/cases/` for examples.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path};

use anyhow::{Context, Result, anyhow, bail};
use gym::core::expectation::Expectation;
use gym::validate::parse_expectations;
use serde::Deserialize;

/// A parsed case file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CaseFile {
    pub case: CaseMeta,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub config: CaseConfig,
    #[serde(default)]
    pub setup: Setup,
    /// Extra environment for the agent process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Expectation tables; same shape as the gym expectations JSON.
    #[serde(default, rename = "expectations")]
    raw_expectations: Vec<toml::Value>,
}

/// Case metadata: identifier and prompts.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseMeta {
    /// Unique identifier (slug format: `[a-z0-9_-]+`).
    pub id: String,
    /// Main prompt sent to the agent.
    pub prompt: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Sent after the main prompt, each resuming the agent session.
    #[serde(default)]
    pub follow_ups: Vec<String>,
    #[serde(default)]
    pub interactive: bool,
}

/// How the agent is launched.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentSettings {
    pub program: String,
    pub model: Option<String>,
    pub max_turns: u32,
    pub permission_mode: Option<String>,
    pub allowed_tools: Vec<String>,
    pub max_budget_usd: Option<f64>,
    /// Inserted before the generated flags.
    pub extra_args: Vec<String>,
    /// Replaces the generated argv entirely.
    ///
    /// `{prompt}`, `{resume}` and `{system_prompt}` are substituted per turn.
    pub args: Option<Vec<String>>,
    /// Removed from the inherited environment.
    pub env_remove: Vec<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            model: None,
            max_turns: 10,
            permission_mode: Some("bypassPermissions".to_string()),
            allowed_tools: Vec::new(),
            max_budget_usd: None,
            extra_args: Vec::new(),
            args: None,
            env_remove: vec!["CLAUDECODE".to_string(), "CLAUDE_CODE_ENTRYPOINT".to_string()],
        }
    }
}

/// Gym configuration overrides for the case.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CaseConfig {
    /// Idle timeout between agent events.
    pub turn_timeout_secs: Option<u64>,
    /// Wall-clock ceiling per agent turn.
    pub max_duration_secs: Option<u64>,
    pub kill_grace_secs: Option<u64>,
    pub max_consecutive_noise: Option<usize>,
    /// Replaces the default snapshot ignore patterns.
    pub ignore: Option<Vec<String>>,
}

/// Files written into a fresh workspace before the first commit.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Setup {
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl CaseFile {
    /// Load and validate a case file from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read case {}", path.display()))?;
        let case: CaseFile =
            toml::from_str(&contents).with_context(|| format!("parse case {}", path.display()))?;
        case.validate()
            .with_context(|| format!("validate case {}", path.display()))?;
        Ok(case)
    }

    #[cfg(test)]
    pub fn parse_str(contents: &str) -> Result<Self> {
        let case: CaseFile = toml::from_str(contents).context("parse case")?;
        case.validate()?;
        Ok(case)
    }

    /// Typed expectations, checked against the bundled schema.
    pub fn expectations(&self) -> Result<Vec<Expectation>> {
        let value = serde_json::to_value(&self.raw_expectations)
            .context("convert expectations to json")?;
        parse_expectations(&value)
    }

    fn validate(&self) -> Result<()> {
        validate_case_id(&self.case.id)?;
        if self.case.prompt.trim().is_empty() {
            bail!("case.prompt must be non-empty");
        }
        if self.case.follow_ups.iter().any(|p| p.trim().is_empty()) {
            bail!("case.follow_ups entries must be non-empty");
        }
        if self.agent.program.trim().is_empty() {
            bail!("agent.program must be non-empty");
        }
        if self.agent.max_turns == 0 {
            bail!("agent.max_turns must be > 0");
        }
        if let Some(budget) = self.agent.max_budget_usd
            && (budget.is_nan() || budget <= 0.0)
        {
            bail!("agent.max_budget_usd must be > 0");
        }
        if let Some(timeout) = self.config.turn_timeout_secs
            && timeout == 0
        {
            bail!("config.turn_timeout_secs must be > 0");
        }
        if let Some(ceiling) = self.config.max_duration_secs
            && ceiling == 0
        {
            bail!("config.max_duration_secs must be > 0");
        }
        for path in self.setup.files.keys() {
            validate_setup_path(path).with_context(|| format!("setup.files[{path:?}] invalid"))?;
        }
        for (key, value) in &self.env {
            if key.trim().is_empty() {
                bail!("env key must be non-empty");
            }
            if value.is_empty() {
                bail!("env {} must be non-empty", key);
            }
        }
        if self.raw_expectations.is_empty() {
            bail!("expectations must be a non-empty array");
        }
        self.expectations()?;
        Ok(())
    }
}

/// Discover and load all case files from a directory.
///
/// Returns cases sorted by id. Errors if duplicate ids are found.
pub fn discover_cases(dir: &Path) -> Result<Vec<CaseFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut cases = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read cases dir {}", dir.display()))? {
        let entry = entry.context("read case entry")?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        cases.push(CaseFile::load(&path)?);
    }
    cases.sort_by(|left, right| left.case.id.cmp(&right.case.id));
    for pair in cases.windows(2) {
        if pair[0].case.id == pair[1].case.id {
            return Err(anyhow!("duplicate case.id {}", pair[0].case.id));
        }
    }
    Ok(cases)
}

pub fn validate_case_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("case.id must be non-empty");
    }
    if id.contains('/') || id.contains('\\') {
        bail!("case.id must not contain path separators");
    }
    if id.contains("..") {
        bail!("case.id must not contain '..'");
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        bail!("case.id must use [a-z0-9_-] only");
    }
    Ok(())
}

fn validate_setup_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        bail!("path must be non-empty");
    }
    let escapes = Path::new(path)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        bail!("path must be relative and stay inside the workspace");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r##"
[case]
id = "readme-usage"
prompt = "Add a Usage section to README.md"
follow_ups = ["Also add an example"]

[agent]
model = "sonnet"
max_turns = 4
allowed_tools = ["Read", "Edit"]

[config]
turn_timeout_secs = 60

[setup.files]
"README.md" = "# Demo\n"
"src/app.py" = "print('hi')\n"

[[expectations]]
type = "file"
path = "README.md"
content_contains = ["Usage"]

[[expectations]]
type = "diff"
must_include_paths = ["README.md"]
max_files_changed = 2

[[expectations]]
type = "command"
command = ["python3", "src/app.py"]
returncode = 0
"##;

    #[test]
    fn parses_valid_case() {
        let case = CaseFile::parse_str(VALID).expect("case parses");
        assert_eq!(case.case.id, "readme-usage");
        assert_eq!(case.case.follow_ups, vec!["Also add an example"]);
        assert_eq!(case.agent.program, "claude");
        assert_eq!(case.agent.max_turns, 4);
        assert_eq!(case.config.turn_timeout_secs, Some(60));
        assert_eq!(case.setup.files.len(), 2);

        let expectations = case.expectations().expect("expectations");
        assert_eq!(expectations.len(), 3);
        assert!(matches!(expectations[0], Expectation::File(_)));
        assert!(matches!(expectations[1], Expectation::Diff(_)));
        assert!(matches!(expectations[2], Expectation::Command(_)));
    }

    #[test]
    fn rejects_invalid_id() {
        let input = r#"
[case]
id = "bad/id"
prompt = "do the thing"

[[expectations]]
type = "file"
path = "a.txt"
"#;
        let err = CaseFile::parse_str(input).expect_err("invalid id");
        assert!(err.to_string().contains("case.id"));
    }

    #[test]
    fn rejects_malformed_expectations() {
        let input = r#"
[case]
id = "empty-command"
prompt = "do the thing"

[[expectations]]
type = "command"
command = []
"#;
        let err = CaseFile::parse_str(input).expect_err("invalid expectation");
        assert!(format!("{err:#}").contains("schema validation failed"));
    }

    #[test]
    fn rejects_missing_expectations() {
        let input = r#"
[case]
id = "nothing"
prompt = "do the thing"
"#;
        let err = CaseFile::parse_str(input).expect_err("no expectations");
        assert!(err.to_string().contains("expectations"));
    }

    #[test]
    fn rejects_setup_paths_outside_workspace() {
        let input = r#"
[case]
id = "escape"
prompt = "do the thing"

[setup.files]
"../outside.txt" = "x"

[[expectations]]
type = "file"
path = "a.txt"
"#;
        let err = CaseFile::parse_str(input).expect_err("escaping path");
        assert!(format!("{err:#}").contains("inside the workspace"));
    }

    #[test]
    fn bundled_cases_load() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("cases");
        let cases = discover_cases(&dir).expect("discover");
        let ids: Vec<&str> = cases.iter().map(|c| c.case.id.as_str()).collect();
        assert_eq!(ids, vec!["json-config", "readme-usage"]);
    }
}
