//! Snapshot model and the pure diff computation between two snapshots.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use similar::{ChangeTag, TextDiff};

use crate::core::types::{DiffStatus, FileDiff};

const BINARY_PLACEHOLDER: &str = "<binary>";
const DEV_NULL: &str = "/dev/null";
const CONTEXT_RADIUS: usize = 3;

/// Captured state of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// SHA-256 of the raw bytes, hex encoded.
    pub fingerprint: String,
    /// UTF-8 content, `None` for binary files.
    pub content: Option<String>,
    pub size: u64,
}

impl FileEntry {
    pub fn from_bytes(raw: &[u8]) -> Self {
        Self {
            fingerprint: fingerprint(raw),
            content: String::from_utf8(raw.to_vec()).ok(),
            size: raw.len() as u64,
        }
    }

    fn diff_text(&self) -> &str {
        self.content.as_deref().unwrap_or(BINARY_PLACEHOLDER)
    }
}

/// Point-in-time capture of the tracked files under `root`.
///
/// Keys are relative, `/`-separated paths. The map is ordered so iteration
/// (and therefore diff output) is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot {
    root: PathBuf,
    files: BTreeMap<String, FileEntry>,
}

impl Snapshot {
    pub fn new(root: impl Into<PathBuf>, files: BTreeMap<String, FileEntry>) -> Self {
        Self {
            root: root.into(),
            files,
        }
    }

    /// Build an in-memory snapshot from `(path, content)` pairs.
    pub fn from_contents<'a>(
        root: impl Into<PathBuf>,
        entries: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let files = entries
            .into_iter()
            .map(|(path, content)| (path.to_string(), FileEntry::from_bytes(content.as_bytes())))
            .collect();
        Self::new(root, files)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileEntry)> {
        self.files.iter().map(|(path, entry)| (path.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// SHA-256 fingerprint of raw file bytes.
pub fn fingerprint(raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    hex::encode(hasher.finalize())
}

/// Compare two snapshots of the same root.
///
/// Emits one record per path present on only one side and one `modified`
/// record per shared path whose fingerprint differs, ordered by path.
pub fn diff(before: &Snapshot, after: &Snapshot) -> Vec<FileDiff> {
    let mut paths: Vec<&str> = before.paths().chain(after.paths()).collect();
    paths.sort_unstable();
    paths.dedup();

    let mut diffs = Vec::new();
    for path in paths {
        let record = match (before.get(path), after.get(path)) {
            (None, Some(new)) => Some(render_diff(
                path,
                DiffStatus::Added,
                "",
                new.diff_text(),
                (DEV_NULL, path),
                (None, Some(&new.fingerprint)),
            )),
            (Some(old), None) => Some(render_diff(
                path,
                DiffStatus::Deleted,
                old.diff_text(),
                "",
                (path, DEV_NULL),
                (Some(&old.fingerprint), None),
            )),
            (Some(old), Some(new)) if old.fingerprint != new.fingerprint => {
                let from = format!("a/{path}");
                let to = format!("b/{path}");
                Some(render_diff(
                    path,
                    DiffStatus::Modified,
                    old.diff_text(),
                    new.diff_text(),
                    (from.as_str(), to.as_str()),
                    (Some(&old.fingerprint), Some(&new.fingerprint)),
                ))
            }
            _ => None,
        };
        diffs.extend(record);
    }
    diffs
}

fn render_diff(
    path: &str,
    status: DiffStatus,
    old: &str,
    new: &str,
    header: (&str, &str),
    hashes: (Option<&String>, Option<&String>),
) -> FileDiff {
    let text_diff = TextDiff::from_lines(old, new);
    let mut line_delta = 0i64;
    for change in text_diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => line_delta += 1,
            ChangeTag::Delete => line_delta -= 1,
            ChangeTag::Equal => {}
        }
    }
    let unified_diff = text_diff
        .unified_diff()
        .context_radius(CONTEXT_RADIUS)
        .header(header.0, header.1)
        .to_string();

    FileDiff {
        path: path.to_string(),
        status,
        unified_diff,
        line_delta,
        before_hash: hashes.0.cloned(),
        after_hash: hashes.1.cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(entries: &[(&str, &str)]) -> Snapshot {
        Snapshot::from_contents("/project", entries.iter().copied())
    }

    #[test]
    fn identical_snapshots_have_no_diffs() {
        let before = snap(&[("a.txt", "hello"), ("src/lib.rs", "fn main() {}\n")]);
        assert!(diff(&before, &before).is_empty());
    }

    #[test]
    fn classifies_added_modified_and_deleted() {
        let before = snap(&[("a.txt", "hello"), ("gone.txt", "bye\n")]);
        let after = snap(&[("a.txt", "hello world"), ("b.txt", "new")]);

        let diffs = diff(&before, &after);
        let summary: Vec<(&str, DiffStatus)> = diffs
            .iter()
            .map(|d| (d.path.as_str(), d.status))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a.txt", DiffStatus::Modified),
                ("b.txt", DiffStatus::Added),
                ("gone.txt", DiffStatus::Deleted),
            ]
        );
    }

    #[test]
    fn added_diff_contains_full_content() {
        let before = snap(&[]);
        let after = snap(&[("notes.md", "line one\nline two\n")]);

        let diffs = diff(&before, &after);
        assert_eq!(diffs.len(), 1);
        let added = &diffs[0];
        assert!(added.unified_diff.contains("--- /dev/null"));
        assert!(added.unified_diff.contains("+++ notes.md"));
        assert!(added.unified_diff.contains("+line one"));
        assert!(added.unified_diff.contains("+line two"));
        assert_eq!(added.line_delta, 2);
        assert!(added.before_hash.is_none());
        assert!(added.after_hash.is_some());
    }

    #[test]
    fn deleted_diff_counts_removed_lines() {
        let before = snap(&[("old.py", "a = 1\nb = 2\nc = 3\n")]);
        let after = snap(&[]);

        let diffs = diff(&before, &after);
        assert_eq!(diffs[0].status, DiffStatus::Deleted);
        assert_eq!(diffs[0].line_delta, -3);
        assert!(diffs[0].unified_diff.contains("+++ /dev/null"));
        assert!(diffs[0].unified_diff.contains("-b = 2"));
    }

    #[test]
    fn modified_diff_uses_prefixed_headers() {
        let before = snap(&[("main.rs", "fn a() {}\nfn b() {}\n")]);
        let after = snap(&[("main.rs", "fn a() {}\nfn c() {}\nfn d() {}\n")]);

        let diffs = diff(&before, &after);
        let modified = &diffs[0];
        assert!(modified.unified_diff.contains("--- a/main.rs"));
        assert!(modified.unified_diff.contains("+++ b/main.rs"));
        assert!(modified.unified_diff.contains("-fn b() {}"));
        assert!(modified.unified_diff.contains("+fn d() {}"));
        assert_eq!(modified.line_delta, 1);
    }

    #[test]
    fn binary_content_renders_placeholder() {
        let mut files = BTreeMap::new();
        files.insert("logo.png".to_string(), FileEntry::from_bytes(&[0xff, 0xfe, 0x00]));
        let after = Snapshot::new("/project", files);

        let diffs = diff(&Snapshot::default(), &after);
        assert!(diffs[0].unified_diff.contains("+<binary>"));
    }

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(fingerprint(b"hello"), fingerprint(b"hello"));
        assert_ne!(fingerprint(b"hello"), fingerprint(b"hello world"));
    }
}
