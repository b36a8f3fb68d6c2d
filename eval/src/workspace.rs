//! Workspace creation and management.
//!
//! Each eval run gets an isolated git repository seeded with the case's
//! setup files.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use gym::io::git::Git;
use rand::{Rng, distributions::Alphanumeric};
use tracing::{debug, instrument};

/// An isolated workspace for running a case.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Absolute path to the workspace root.
    pub root: PathBuf,
    /// Workspace directory name (includes case id, timestamp, and random suffix).
    pub name: String,
    pub git: Git,
}

/// Create an isolated workspace for running a case.
///
/// The workspace is a fresh git repository whose only commit holds the
/// setup files; it is clean when this returns.
#[instrument(skip(files), fields(files = files.len()))]
pub fn create_workspace(
    base_dir: &Path,
    case_id: &str,
    files: &BTreeMap<String, String>,
) -> Result<Workspace> {
    fs::create_dir_all(base_dir)
        .with_context(|| format!("create workspace dir {}", base_dir.display()))?;

    let name = build_workspace_name(case_id, &generate_timestamp(), &generate_short_id());
    let root = base_dir.join(&name);
    fs::create_dir_all(&root)
        .with_context(|| format!("create workspace root {}", root.display()))?;
    let root = root
        .canonicalize()
        .with_context(|| format!("canonicalize {}", root.display()))?;

    let git = Git::init(&root)?;
    for (rel, contents) in files {
        write_setup_file(&root, rel, contents)?;
    }
    git.add_all()?;
    git.commit_staged("chore(eval): seed workspace")?;
    git.ensure_clean()
        .context("workspace has uncommitted changes after seeding")?;
    debug!(root = %root.display(), "workspace ready");

    Ok(Workspace { root, name, git })
}

pub fn build_workspace_name(case_id: &str, timestamp: &str, short_id: &str) -> String {
    format!("{case_id}_{timestamp}_{short_id}")
}

fn write_setup_file(root: &Path, rel: &str, contents: &str) -> Result<()> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&path, contents).with_context(|| format!("write setup file {}", path.display()))
}

fn generate_timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

fn generate_short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn workspace_name_uses_expected_format() {
        let name = build_workspace_name("case", "20260118_120000", "abc123");
        assert_eq!(name, "case_20260118_120000_abc123");
    }

    #[test]
    fn creates_clean_repo_with_setup_files() {
        let temp = tempdir().expect("tempdir");
        let files = BTreeMap::from([
            ("README.md".to_string(), "# Demo\n".to_string()),
            ("src/app.py".to_string(), "print('hi')\n".to_string()),
        ]);
        let workspace = create_workspace(temp.path(), "case", &files).expect("workspace");

        assert!(workspace.root.join(".git").exists());
        assert!(workspace.name.starts_with("case_"));
        assert_eq!(
            fs::read_to_string(workspace.root.join("src/app.py")).expect("read"),
            "print('hi')\n"
        );
        assert!(workspace.git.status_porcelain().expect("status").is_empty());
    }

    #[test]
    fn empty_setup_still_yields_clean_repo() {
        let temp = tempdir().expect("tempdir");
        let workspace = create_workspace(temp.path(), "empty", &BTreeMap::new()).expect("workspace");
        workspace.git.ensure_clean().expect("clean");
    }
}
