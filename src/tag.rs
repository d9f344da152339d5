//! Stable tag resolution.
//!
//! A "stable" tag is the safest base for a new release branch: the newest major
//! line, and within it the earliest minor/patch release.

use crate::errors::TagError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v(\d+)\.(\d+)\.(\d+)$").expect("tag pattern is a valid static regex")
});

/// A parsed `vMAJOR.MINOR.PATCH` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    /// Parse a tag string. Returns `None` for anything that is not exactly `vX.Y.Z`.
    pub fn parse(tag: &str) -> Option<Self> {
        let caps = TAG_PATTERN.captures(tag.trim())?;
        Some(Self {
            major: caps[1].parse().ok()?,
            minor: caps[2].parse().ok()?,
            patch: caps[3].parse().ok()?,
        })
    }

    /// Stability order: a version is "more stable" (sorts first) when its major is
    /// higher, then when its minor is lower, then when its patch is lower.
    fn stability_cmp(&self, other: &Self) -> Ordering {
        other
            .major
            .cmp(&self.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Validate a user-supplied tag, returning it normalised.
pub fn validate_tag(tag: &str) -> Result<String, TagError> {
    Version::parse(tag)
        .map(|v| v.to_string())
        .ok_or_else(|| TagError::InvalidTag {
            tag: tag.to_string(),
        })
}

/// Pick the most stable tag from a set of candidates.
///
/// Malformed tags are discarded. Returns `None` when nothing parses.
pub fn most_stable_tag<'a, I>(tags: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    tags.into_iter()
        .filter_map(|tag| Version::parse(tag).map(|v| (v, tag)))
        .min_by(|(a, _), (b, _)| a.stability_cmp(b))
        .map(|(_, tag)| tag)
}

/// Known tags per base branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagCatalog {
    branches: BTreeMap<String, Vec<String>>,
}

impl Default for TagCatalog {
    fn default() -> Self {
        let mut branches = BTreeMap::new();
        branches.insert(
            "main".to_string(),
            ["v1.0.0", "v1.0.1", "v2.0.0", "v2.0.1"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        branches.insert(
            "dev".to_string(),
            ["v0.1.0", "v0.2.0"].iter().map(|s| s.to_string()).collect(),
        );
        Self { branches }
    }
}

impl TagCatalog {
    pub fn new(branches: BTreeMap<String, Vec<String>>) -> Self {
        Self { branches }
    }

    /// Candidate tags for a base branch.
    pub fn tags(&self, base: &str) -> Option<&[String]> {
        self.branches.get(base).map(Vec::as_slice)
    }

    /// Base branches known to the catalog.
    pub fn base_branches(&self) -> impl Iterator<Item = &str> {
        self.branches.keys().map(String::as_str)
    }

    /// Resolve the stable tag for a base branch.
    pub fn resolve(&self, base: &str) -> Result<String, TagError> {
        let tags = self.tags(base).ok_or_else(|| TagError::UnknownBaseBranch {
            base: base.to_string(),
        })?;
        most_stable_tag(tags.iter().map(String::as_str))
            .map(str::to_string)
            .ok_or_else(|| TagError::NoStableTag {
                base: base.to_string(),
            })
    }

    /// Tags in the catalog that do not parse, as `(base, tag)` pairs.
    pub fn malformed(&self) -> Vec<(&str, &str)> {
        self.branches
            .iter()
            .flat_map(|(base, tags)| {
                tags.iter()
                    .filter(|t| Version::parse(t).is_none())
                    .map(move |t| (base.as_str(), t.as_str()))
            })
            .collect()
    }
}
