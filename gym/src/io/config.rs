//! Gym configuration stored as TOML (conventionally `gym.toml`).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::session::SessionConfig;
use crate::io::snapshotter::default_ignore_patterns;

/// Gym configuration (TOML).
///
/// Edited by humans; missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct GymConfig {
    pub session: SessionSection,
    pub snapshot: SnapshotSection,
    pub commands: CommandsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionSection {
    /// Idle timeout between agent events, in seconds.
    pub turn_timeout_secs: u64,
    /// Absolute wall-clock ceiling for one agent run, in seconds.
    pub max_duration_secs: u64,
    /// Seconds between SIGTERM and SIGKILL.
    pub kill_grace_secs: u64,
    /// Consecutive unparseable stdout lines tolerated before aborting.
    pub max_consecutive_noise: usize,
    pub stderr_limit_bytes: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            turn_timeout_secs: 300,
            max_duration_secs: session.max_duration.as_secs(),
            kill_grace_secs: session.kill_grace.as_secs(),
            max_consecutive_noise: session.max_consecutive_noise,
            stderr_limit_bytes: session.stderr_limit_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SnapshotSection {
    /// Globs matched against each path component and the whole relative path.
    pub ignore: Vec<String>,
}

impl Default for SnapshotSection {
    fn default() -> Self {
        Self {
            ignore: default_ignore_patterns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandsSection {
    /// Truncate command expectation stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for CommandsSection {
    fn default() -> Self {
        Self {
            output_limit_bytes: 100_000,
        }
    }
}

impl GymConfig {
    pub fn validate(&self) -> Result<()> {
        if self.session.turn_timeout_secs == 0 {
            return Err(anyhow!("session.turn_timeout_secs must be > 0"));
        }
        if self.session.max_duration_secs == 0 {
            return Err(anyhow!("session.max_duration_secs must be > 0"));
        }
        if self.session.stderr_limit_bytes == 0 {
            return Err(anyhow!("session.stderr_limit_bytes must be > 0"));
        }
        if self.commands.output_limit_bytes == 0 {
            return Err(anyhow!("commands.output_limit_bytes must be > 0"));
        }
        for pattern in &self.snapshot.ignore {
            glob::Pattern::new(pattern)
                .with_context(|| format!("snapshot.ignore pattern '{pattern}'"))?;
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_duration: Duration::from_secs(self.session.max_duration_secs),
            kill_grace: Duration::from_secs(self.session.kill_grace_secs),
            max_consecutive_noise: self.session.max_consecutive_noise,
            stderr_limit_bytes: self.session.stderr_limit_bytes,
        }
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.session.turn_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `GymConfig::default()`.
pub fn load_config(path: &Path) -> Result<GymConfig> {
    if !path.exists() {
        let cfg = GymConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GymConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &GymConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, GymConfig::default());
        assert_eq!(cfg.session_config(), SessionConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("gym.toml");
        let mut cfg = GymConfig::default();
        cfg.session.max_consecutive_noise = 2;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("gym.toml");
        fs::write(&path, "[session]\nturn_timeout_secs = 12\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.turn_timeout(), Duration::from_secs(12));
        assert_eq!(cfg.snapshot.ignore, default_ignore_patterns());
    }

    #[test]
    fn rejects_zero_timeout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("gym.toml");
        fs::write(&path, "[session]\nturn_timeout_secs = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("turn_timeout_secs"));
    }
}
