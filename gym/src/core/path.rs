//! Glob matching for relative, `/`-separated project paths.
//!
//! `*` stays within one path component; `**` spans any number of components
//! (including none) when it forms a whole component.

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A compiled path glob.
#[derive(Debug, Clone)]
pub struct PathGlob {
    raw: String,
    pattern: Pattern,
}

impl PathGlob {
    pub fn new(raw: &str) -> Result<Self> {
        let pattern = Pattern::new(raw).with_context(|| format!("invalid glob '{raw}'"))?;
        Ok(Self {
            raw: raw.to_string(),
            pattern,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &str) -> bool {
        self.pattern.matches_with(path, MATCH_OPTIONS)
    }

    /// True if the glob matches the whole path or any single component of it.
    pub fn matches_path_or_component(&self, path: &str) -> bool {
        self.matches(path) || path.split('/').any(|component| self.matches(component))
    }
}

/// Compile a list of globs, failing on the first invalid one.
pub fn compile_all(raw: &[String]) -> Result<Vec<PathGlob>> {
    raw.iter().map(|pattern| PathGlob::new(pattern)).collect()
}
