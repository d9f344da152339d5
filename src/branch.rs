//! Branch and topic naming.
//!
//! An issue description such as `"bugfix: Login crash on Safari"` becomes the topic
//! `bug/login-crash-on-safari`, and each selection of a story gets a branch beneath
//! it, e.g. `bug/login-crash-on-safari/l2-f3-agent`.

use crate::story::Selection;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of an issue by its leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    Bug,
    Hotfix,
    Enhancement,
    #[default]
    Feature,
}

impl IssueKind {
    /// Classify a description by its first word.
    ///
    /// Returns the kind together with the remainder of the description once the
    /// keyword has been stripped. Descriptions without a keyword are features and are
    /// returned unchanged.
    pub fn classify(description: &str) -> (Self, &str) {
        let trimmed = description.trim_start();
        let end = trimmed
            .find(|c: char| !c.is_alphanumeric())
            .unwrap_or(trimmed.len());
        let kind = match trimmed[..end].to_lowercase().as_str() {
            "bug" | "bugfix" => Self::Bug,
            "hotfix" => Self::Hotfix,
            "enhancement" => Self::Enhancement,
            _ => return (Self::Feature, trimmed),
        };
        let rest = trimmed[end..]
            .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '-' | '/' | '_'));
        (kind, rest)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bug => "bug",
            Self::Hotfix => "hotfix",
            Self::Enhancement => "enhancement",
            Self::Feature => "feature",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Lowercase, drop punctuation, and join words with single hyphens.
///
/// Idempotent: `slugify(&slugify(s)) == slugify(s)`.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_sep = false;

    for c in input.chars() {
        if c.is_whitespace() || matches!(c, '-' | '_' | '/' | '.') {
            pending_sep = true;
            continue;
        }
        // Lowercasing can expand to several chars, some of them combining marks.
        for lower in c.to_lowercase().filter(|l| l.is_alphanumeric()) {
            if pending_sep && !slug.is_empty() {
                slug.push('-');
            }
            pending_sep = false;
            slug.push(lower);
        }
    }

    slug
}

/// Topic for an issue description: `"{kind}/{slug}"`.
///
/// Returns `None` when the description has no usable words once the keyword is
/// stripped.
pub fn topic_name(description: &str) -> Option<(IssueKind, String)> {
    let (kind, rest) = IssueKind::classify(description);
    let slug = slugify(rest);
    if slug.is_empty() {
        return None;
    }
    Some((kind, format!("{}/{}", kind, slug)))
}

/// First of `candidate`, `candidate-1`, `candidate-2`, ... that `is_free` accepts.
pub fn unique_name(candidate: &str, mut is_free: impl FnMut(&str) -> bool) -> String {
    if is_free(candidate) {
        return candidate.to_string();
    }
    (1..)
        .map(|n| format!("{}-{}", candidate, n))
        .find(|name| is_free(name.as_str()))
        .unwrap_or_else(|| candidate.to_string())
}

/// Branch for one selection of a story.
pub fn branch_name(topic: &str, selection: &Selection) -> String {
    format!(
        "{}/l{}-f{}-{}",
        topic, selection.level, selection.feature, selection.component
    )
}
