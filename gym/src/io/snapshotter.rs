//! Filesystem capture of a project directory into a [`Snapshot`].

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, instrument};
use walkdir::{DirEntry, WalkDir};

use crate::core::path::{PathGlob, compile_all};
use crate::core::snapshot::{FileEntry, Snapshot};

/// Directory and file names skipped unless the caller overrides the list.
pub const DEFAULT_IGNORE: &[&str] = &[
    ".git",
    ".claude",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    "target",
    "node_modules",
    ".*",
];

pub fn default_ignore_patterns() -> Vec<String> {
    DEFAULT_IGNORE.iter().map(|s| s.to_string()).collect()
}

/// Capture every regular file under `root` not matched by `ignore`.
///
/// Symlinks are not followed. Unreadable files are skipped.
#[instrument(skip(ignore), fields(root = %root.display(), ignore = ignore.len()))]
pub fn snapshot(root: &Path, ignore: &[String]) -> Result<Snapshot> {
    let globs = compile_all(ignore).context("compile ignore patterns")?;
    let root = root
        .canonicalize()
        .with_context(|| format!("resolve snapshot root {}", root.display()))?;

    let mut files = BTreeMap::new();
    let walker = WalkDir::new(&root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_ignored(&root, entry, &globs));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(err = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel) = relative_path(&root, entry.path()) else {
            continue;
        };
        match std::fs::read(entry.path()) {
            Ok(raw) => {
                files.insert(rel, FileEntry::from_bytes(&raw));
            }
            Err(err) => debug!(path = %rel, err = %err, "skipping unreadable file"),
        }
    }

    debug!(files = files.len(), "snapshot taken");
    Ok(Snapshot::new(root, files))
}

fn is_ignored(root: &Path, entry: &DirEntry, globs: &[PathGlob]) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let Some(rel) = relative_path(root, entry.path()) else {
        return true;
    };
    globs.iter().any(|glob| glob.matches_path_or_component(&rel))
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    let parts = parts?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}
