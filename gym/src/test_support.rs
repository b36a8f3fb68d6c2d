//! Test-only helpers: scratch projects, mock agent scripts, scripted runners.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::cycle::WorkTree;
use crate::io::command::{CommandOutcome, CommandRunner};
use crate::io::session::{CommandDescriptor, CommandProvider, TurnRequest};

/// Temporary project directory seeded with files.
pub struct TestProject {
    dir: TempDir,
}

impl TestProject {
    pub fn new(files: &[(&str, &str)]) -> Result<Self> {
        let dir = tempfile::tempdir().context("create project tempdir")?;
        let project = Self { dir };
        for (rel, content) in files {
            project.write(rel, content)?;
        }
        Ok(project)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, content: &str) -> Result<()> {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("mkdir {}", parent.display()))?;
        }
        fs::write(&path, content).with_context(|| format!("write {}", path.display()))
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        let path = self.dir.path().join(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }
}

/// A mock agent: a POSIX shell script run with `sh`.
///
/// The script sees the prompt in `$GYM_PROMPT`, the resumed session id (if
/// any) in `$GYM_RESUME` and the system prompt in `$GYM_SYSTEM_PROMPT`.
pub struct ScriptAgent {
    _dir: TempDir,
    script: PathBuf,
}

impl ScriptAgent {
    pub fn new(body: &str) -> Result<Self> {
        let dir = tempfile::tempdir().context("create script tempdir")?;
        let script = dir.path().join("agent.sh");
        fs::write(&script, format!("#!/bin/sh\n{body}\n"))
            .with_context(|| format!("write {}", script.display()))?;
        Ok(Self { _dir: dir, script })
    }

    pub fn script_path(&self) -> &Path {
        &self.script
    }

    pub fn provider(&self) -> ScriptProvider {
        ScriptProvider {
            program: "sh".to_string(),
            script: self.script.clone(),
            env: BTreeMap::new(),
        }
    }
}

/// Launches a [`ScriptAgent`].
#[derive(Debug, Clone)]
pub struct ScriptProvider {
    pub program: String,
    pub script: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl ScriptProvider {
    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }
}

impl CommandProvider for ScriptProvider {
    fn command(&self, request: &TurnRequest) -> CommandDescriptor {
        let mut env = self.env.clone();
        env.insert("GYM_PROMPT".to_string(), request.prompt.clone());
        if let Some(resume) = &request.resume_session {
            env.insert("GYM_RESUME".to_string(), resume.clone());
        }
        if let Some(system) = &request.system_prompt {
            env.insert("GYM_SYSTEM_PROMPT".to_string(), system.clone());
        }
        CommandDescriptor {
            program: self.program.clone(),
            args: vec![self.script.display().to_string()],
            env,
            env_remove: Vec::new(),
            stdin: None,
        }
    }
}

/// JSON line for a `result` event.
pub fn result_line(session_id: &str, cost: f64, text: &str) -> String {
    serde_json::json!({
        "type": "result",
        "is_error": false,
        "result": text,
        "session_id": session_id,
        "total_cost_usd": cost,
        "num_turns": 1,
    })
    .to_string()
}

/// Shell `echo` of a JSON line, single-quoted.
pub fn echo_json(line: &str) -> String {
    format!("echo '{}'", line.replace('\'', r"'\''"))
}

/// Whether a process id is still alive. Zombies count as dead.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    if let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) {
        // The state letter follows the parenthesised command name.
        return stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z" && state != "X");
    }
    if Path::new("/proc/self/stat").exists() {
        return false;
    }
    std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Poll until `pid` is gone (or a zombie), up to `timeout`.
#[cfg(unix)]
pub fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while process_alive(pid) {
        if std::time::Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    true
}

/// Wait until a file exists and parse its trimmed content as a pid.
pub fn read_pid_file(path: &Path, timeout: Duration) -> Result<u32> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if let Ok(raw) = fs::read_to_string(path)
            && let Ok(pid) = raw.trim().parse()
        {
            return Ok(pid);
        }
        if std::time::Instant::now() >= deadline {
            return Err(anyhow!("pid file {} never appeared", path.display()));
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Returns queued outcomes in order and records every call.
#[derive(Default)]
pub struct ScriptedCommandRunner {
    outcomes: RefCell<VecDeque<Result<CommandOutcome, String>>>,
    calls: RefCell<Vec<Vec<String>>>,
}

impl ScriptedCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_exit(self, exit_code: i32, stdout: &str) -> Self {
        self.outcomes.borrow_mut().push_back(Ok(CommandOutcome {
            exit_code: Some(exit_code),
            stdout: stdout.to_string(),
            ..CommandOutcome::default()
        }));
        self
    }

    /// Queue a command that cannot be started.
    pub fn push_spawn_error(self, message: &str) -> Self {
        self.outcomes
            .borrow_mut()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().clone()
    }
}

impl CommandRunner for ScriptedCommandRunner {
    fn run(&self, argv: &[String], _cwd: &Path, _timeout: Duration) -> Result<CommandOutcome> {
        self.calls.borrow_mut().push(argv.to_vec());
        match self.outcomes.borrow_mut().pop_front() {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted outcome for {}", argv.join(" "))),
        }
    }
}

/// Worktree whose precondition always fails.
#[derive(Debug, Clone, Default)]
pub struct DirtyWorkTree;

impl WorkTree for DirtyWorkTree {
    fn ensure_clean(&self) -> Result<()> {
        Err(anyhow!("working tree not clean (disallowed changes):\n?? stray.txt"))
    }
}
