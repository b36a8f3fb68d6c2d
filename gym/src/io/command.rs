//! Command execution seam used by command expectations.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::instrument;

use crate::io::process::run_command_with_timeout;

/// Observed result of one command run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Bytes dropped past the output limit.
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

/// Runs argv vectors in a working directory. `Err` means the command could
/// not be started at all.
pub trait CommandRunner {
    fn run(&self, argv: &[String], cwd: &Path, timeout: Duration) -> Result<CommandOutcome>;
}

/// Runs real subprocesses with bounded output.
#[derive(Debug, Clone)]
pub struct ProcessCommandRunner {
    pub output_limit_bytes: usize,
}

impl Default for ProcessCommandRunner {
    fn default() -> Self {
        Self {
            output_limit_bytes: 100_000,
        }
    }
}

impl CommandRunner for ProcessCommandRunner {
    #[instrument(skip_all, fields(program = argv.first().map(String::as_str).unwrap_or_default()))]
    fn run(&self, argv: &[String], cwd: &Path, timeout: Duration) -> Result<CommandOutcome> {
        let Some((program, args)) = argv.split_first() else {
            anyhow::bail!("empty command");
        };
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(cwd);
        let output = run_command_with_timeout(cmd, None, timeout, self.output_limit_bytes)?;
        Ok(CommandOutcome {
            exit_code: output.status.code(),
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
            stdout_truncated: output.stdout_truncated,
            stderr_truncated: output.stderr_truncated,
            timed_out: output.timed_out,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn runs_in_working_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("marker.txt"), "here").expect("write");
        let outcome = ProcessCommandRunner::default()
            .run(&argv(&["ls"]), temp.path(), Duration::from_secs(5))
            .expect("run");
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.stdout.contains("marker.txt"));
    }

    #[test]
    fn missing_program_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = ProcessCommandRunner::default().run(
            &argv(&["definitely-not-a-real-program-gym"]),
            temp.path(),
            Duration::from_secs(5),
        );
        assert!(result.is_err());
    }

    #[test]
    fn backgrounded_process_does_not_stretch_the_timeout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let started = std::time::Instant::now();
        let outcome = ProcessCommandRunner::default()
            .run(
                &argv(&["sh", "-c", "sleep 6 & echo started"]),
                temp.path(),
                Duration::from_secs(1),
            )
            .expect("run");
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.stdout, "started\n");
    }

    #[test]
    fn truncation_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = ProcessCommandRunner {
            output_limit_bytes: 3,
        };
        let outcome = runner
            .run(&argv(&["printf", "abcdef"]), temp.path(), Duration::from_secs(5))
            .expect("run");
        assert_eq!(outcome.stdout, "abc");
        assert_eq!(outcome.stdout_truncated, 3);
    }
}
