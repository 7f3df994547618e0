//! Glob-based ignore matching and the `.snowignore` loader.
//!
//! Built-in patterns cover OS cruft, foreign VCS metadata, and editor
//! scratch files; `<workdir>/.snowignore` supplies project patterns. A
//! leading `!` re-includes a path a previous pattern matched — later
//! patterns win. For every pattern `X` a companion `X/**` is registered so
//! that ignoring a directory ignores its descendants.

use std::path::Path;

use glob::{MatchOptions, Pattern};

/// Patterns every repository starts with.
const DEFAULT_PATTERNS: &[&str] = &[
    // OS cruft
    ".DS_Store",
    "thumbs.db",
    "._*",
    // foreign VCS and our own metadata
    ".git",
    ".snow",
    // editor scratch
    ".idea",
    "*.bkp",
    "*.tmp",
    "*~",
    // Blender autosaves
    "*.blend1",
    "*.blend2",
    "quit.blend",
];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

// ---------------------------------------------------------------------------
// IgnoreMatcher
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct IgnoreRule {
    pattern: Pattern,
    /// `!pattern` — a match re-includes the path.
    negated: bool,
}

/// Ordered list of ignore rules; the last matching rule decides.
#[derive(Clone, Debug)]
pub struct IgnoreMatcher {
    rules: Vec<IgnoreRule>,
}

impl IgnoreMatcher {
    /// Matcher with only the built-in patterns.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut matcher = Self { rules: Vec::new() };
        for raw in DEFAULT_PATTERNS {
            matcher.add_pattern(raw, false);
        }
        matcher
    }

    /// Matcher with the built-ins plus `<workdir>/.snowignore` if present.
    #[must_use]
    pub fn for_worktree(workdir: &Path) -> Self {
        let mut matcher = Self::with_defaults();
        let file = workdir.join(".snowignore");
        if let Ok(raw) = std::fs::read_to_string(file) {
            matcher.load_patterns(&raw);
        }
        matcher
    }

    /// Parse `.snowignore` content: `//` and `/* */` comments are stripped,
    /// blank lines skipped, `!` inverts.
    pub fn load_patterns(&mut self, raw: &str) {
        for line in strip_comments(raw).lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix('!') {
                self.add_pattern(rest.trim(), true);
            } else {
                self.add_pattern(line, false);
            }
        }
    }

    /// Register one pattern plus its companions: `X/**` so that ignoring a
    /// directory ignores its descendants, and for basename patterns (no `/`)
    /// the `**/X` variants so they apply at every depth.
    fn add_pattern(&mut self, raw: &str, negated: bool) {
        let mut variants = vec![raw.to_owned()];
        if !raw.ends_with("/**") {
            variants.push(format!("{raw}/**"));
        }
        if !raw.contains('/') {
            variants.push(format!("**/{raw}"));
            variants.push(format!("**/{raw}/**"));
        }
        for variant in variants {
            match Pattern::new(&variant) {
                Ok(pattern) => self.rules.push(IgnoreRule { pattern, negated }),
                Err(_) => {
                    tracing::warn!(pattern = variant, "skipping unparsable ignore pattern");
                }
            }
        }
    }

    /// Whether a repository-relative path is ignored.
    #[must_use]
    pub fn ignored(&self, rel: &str) -> bool {
        let mut ignored = false;
        for rule in &self.rules {
            if rule.pattern.matches_with(rel, MATCH_OPTIONS) {
                ignored = !rule.negated;
            }
        }
        ignored
    }

    /// The subset of `paths` that are ignored.
    #[must_use]
    pub fn ignored_list<'a, I>(&self, paths: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        paths.into_iter().filter(|p| self.ignored(p)).collect()
    }
}

/// Remove `/* ... */` block comments and `//`-to-end-of-line comments.
fn strip_comments(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    // Block comments first; they may span lines.
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start..].find("*/") {
            Some(end) => rest = &rest[start + end + 2..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);

    out.lines()
        .map(|line| line.split_once("//").map_or(line, |(before, _)| before))
        .collect::<Vec<_>>()
        .join("\n")
}
