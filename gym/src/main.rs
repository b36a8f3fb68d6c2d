//! `gym` CLI: validate expectation files, evaluate them against a project
//! directory, and inspect snapshots.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use gym::core::types::CheckResult;
use gym::exit_codes;
use gym::io::command::ProcessCommandRunner;
use gym::io::config::load_config;
use gym::io::engine::ExpectationEngine;
use gym::io::snapshotter::snapshot;
use gym::validate::load_expectations;

const DEFAULT_CONFIG: &str = "gym.toml";

#[derive(Parser)]
#[command(
    name = "gym",
    version,
    about = "Evaluate declarative expectations against a project directory"
)]
struct Cli {
    /// Config file (defaults to `gym.toml` in the project directory; missing is fine).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check an expectations JSON file against the schema and semantic rules.
    Validate { file: PathBuf },
    /// Evaluate expectations against the current state of a directory.
    Check {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        #[arg(long)]
        expectations: PathBuf,
        /// Print one JSON object per check instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Print the tracked files of a directory as JSON lines.
    Snapshot {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

fn main() {
    gym::logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Validate { file } => cmd_validate(&file),
        Command::Check {
            dir,
            expectations,
            json,
        } => cmd_check(cli.config.as_deref(), &dir, &expectations, json),
        Command::Snapshot { dir } => cmd_snapshot(cli.config.as_deref(), &dir),
    }
}

fn cmd_validate(file: &Path) -> Result<i32> {
    let expectations = load_expectations(file)?;
    println!("ok: {} expectation(s)", expectations.len());
    Ok(exit_codes::OK)
}

fn cmd_check(config: Option<&Path>, dir: &Path, file: &Path, json: bool) -> Result<i32> {
    let config_path = config_path(config, dir);
    let cfg = load_config(&config_path).with_context(|| "load gym config")?;
    let expectations = load_expectations(file)?;
    let project = snapshot(dir, &cfg.snapshot.ignore)?;
    let runner = ProcessCommandRunner {
        output_limit_bytes: cfg.commands.output_limit_bytes,
    };
    let results = ExpectationEngine::default().evaluate_all(&expectations, &project, &[], &runner);

    for result in &results {
        if json {
            println!("{}", serde_json::to_string(result).context("serialize check")?);
        } else {
            println!("{}", format_check(result));
        }
    }
    let failed = results.iter().filter(|r| !r.passed).count();
    if !json {
        println!("{}/{} passed", results.len() - failed, results.len());
    }
    Ok(if failed == 0 {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

#[derive(Serialize)]
struct SnapshotLine<'a> {
    path: &'a str,
    size: u64,
    fingerprint: &'a str,
}

fn cmd_snapshot(config: Option<&Path>, dir: &Path) -> Result<i32> {
    let cfg = load_config(&config_path(config, dir)).with_context(|| "load gym config")?;
    let project = snapshot(dir, &cfg.snapshot.ignore)?;
    for (path, entry) in project.iter() {
        let line = SnapshotLine {
            path,
            size: entry.size,
            fingerprint: &entry.fingerprint,
        };
        println!("{}", serde_json::to_string(&line).context("serialize snapshot entry")?);
    }
    Ok(exit_codes::OK)
}

fn config_path(explicit: Option<&Path>, dir: &Path) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| dir.join(DEFAULT_CONFIG))
}

fn format_check(result: &CheckResult) -> String {
    let marker = if result.passed { "+" } else { "-" };
    let mut line = format!(
        "[{marker}] {} {}: {}",
        result.expectation.kind.as_str(),
        result.expectation.target,
        result.message
    );
    if !result.passed && !result.details.is_empty() {
        for detail in result.details.lines() {
            line.push_str("\n    ");
            line.push_str(detail);
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use gym::core::types::{ExpectationKind, ExpectationRef};

    #[test]
    fn parse_check_defaults_dir() {
        let cli = Cli::parse_from(["gym", "check", "--expectations", "exp.json"]);
        match cli.command {
            Command::Check { dir, json, .. } => {
                assert_eq!(dir, PathBuf::from("."));
                assert!(!json);
            }
            _ => panic!("expected check"),
        }
    }

    #[test]
    fn parse_global_config_after_subcommand() {
        let cli = Cli::parse_from(["gym", "snapshot", "--config", "custom.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
    }

    #[test]
    fn failed_check_lists_details_indented() {
        let result = CheckResult::fail(
            ExpectationRef {
                kind: ExpectationKind::Diff,
                target: "diff".to_string(),
            },
            "3 file(s) changed, expected at most 2",
        )
        .with_details("a.txt (modified)\nb.txt (added)");
        assert_eq!(
            format_check(&result),
            "[-] diff diff: 3 file(s) changed, expected at most 2\n    a.txt (modified)\n    b.txt (added)"
        );
    }
}
