mod case;
mod cli;
mod config;
mod descriptor;
mod outcome;
mod report;
mod results;
mod run;
mod workspace;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "eval", version, about = "Evaluation harness for agent cases")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List cases under `eval/cases/`.
    List,
    /// Run a case in fresh workspaces and record the results.
    Run {
        case_id: String,
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        runs: u32,
    },
    /// Summarize recorded runs of a case.
    Report { case_id: String },
    /// Remove workspaces and results of a case.
    Clean { case_id: String },
}

fn main() -> Result<()> {
    gym::logging::init();
    let cli = Cli::parse();
    let repo_root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::List => cli::list_cases(&repo_root),
        Command::Run { case_id, runs } => cli::run_case_by_id(&repo_root, &case_id, runs),
        Command::Report { case_id } => cli::report_case(&repo_root, &case_id),
        Command::Clean { case_id } => cli::clean_case(&repo_root, &case_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults_to_one() {
        let cli = Cli::parse_from(["eval", "run", "demo"]);
        match cli.command {
            Command::Run { case_id, runs } => {
                assert_eq!(case_id, "demo");
                assert_eq!(runs, 1);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn zero_runs_is_rejected() {
        assert!(Cli::try_parse_from(["eval", "run", "demo", "--runs", "0"]).is_err());
    }
}
