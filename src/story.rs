//! Stories: issues bundled with the (level, feature, component) selections to build.

use crate::branch::{self, IssueKind};
use crate::errors::StoryError;
use crate::queue::BuildTarget;
use crate::tag::{self, TagCatalog};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Buildable component of the product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Server,
    Agent,
    Client,
}

impl Component {
    pub const ALL: [Component; 3] = [Component::Server, Component::Agent, Component::Client];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Server => "server",
            Component::Agent => "agent",
            Component::Client => "client",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Component {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "server" => Ok(Component::Server),
            "agent" => Ok(Component::Agent),
            "client" => Ok(Component::Client),
            _ => anyhow::bail!(
                "Invalid component '{}'. Valid values: server, agent, client",
                s
            ),
        }
    }
}

/// One buildable unit: a component of a feature at a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Selection {
    pub level: u32,
    pub feature: u32,
    pub component: Component,
}

impl Selection {
    pub fn new(level: u32, feature: u32, component: Component) -> Self {
        Self {
            level,
            feature,
            component,
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Level {} / Feature {} / {}",
            self.level, self.feature, self.component
        )
    }
}

/// Parses `LEVEL:FEATURE:COMPONENT`, e.g. `2:3:agent`.
impl FromStr for Selection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [level, feature, component] = parts.as_slice() else {
            anyhow::bail!("Invalid selection '{}'. Expected LEVEL:FEATURE:COMPONENT", s);
        };
        Ok(Self {
            level: level
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid level in selection '{}'", s))?,
            feature: feature
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid feature in selection '{}'", s))?,
            component: component.parse()?,
        })
    }
}

/// Ordered set of selections with checkbox semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    items: Vec<Selection>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the selection, or remove it if already present. Returns whether it is now
    /// selected.
    pub fn toggle(&mut self, selection: Selection) -> bool {
        if let Some(pos) = self.items.iter().position(|s| *s == selection) {
            self.items.remove(pos);
            false
        } else {
            self.items.push(selection);
            true
        }
    }

    pub fn contains(&self, selection: &Selection) -> bool {
        self.items.contains(selection)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn into_vec(self) -> Vec<Selection> {
        self.items
    }
}

impl FromIterator<Selection> for SelectionSet {
    /// Collects with toggle semantics: a selection listed twice cancels out.
    fn from_iter<I: IntoIterator<Item = Selection>>(iter: I) -> Self {
        let mut set = Self::new();
        for selection in iter {
            set.toggle(selection);
        }
        set
    }
}

/// Number of features offered at one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSpec {
    pub level: u32,
    pub features: u32,
}

/// The levels and feature counts a story may select from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCatalog {
    pub levels: Vec<LevelSpec>,
}

impl Default for LevelCatalog {
    fn default() -> Self {
        Self {
            levels: vec![
                LevelSpec {
                    level: 1,
                    features: 1,
                },
                LevelSpec {
                    level: 2,
                    features: 7,
                },
                LevelSpec {
                    level: 3,
                    features: 1,
                },
            ],
        }
    }
}

impl LevelCatalog {
    pub fn contains(&self, selection: &Selection) -> bool {
        self.levels.iter().any(|spec| {
            spec.level == selection.level && (1..=spec.features).contains(&selection.feature)
        })
    }
}

/// An issue reference: what to do and which branch to start from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRef {
    pub description: String,
    pub base_branch: String,
}

impl IssueRef {
    pub fn new(description: impl Into<String>, base_branch: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            base_branch: base_branch.into(),
        }
    }
}

/// Parses the `newbranch_basebranch` form: exactly one underscore, both halves
/// non-empty.
impl FromStr for IssueRef {
    type Err = StoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || StoryError::MalformedIssue {
            input: s.to_string(),
        };
        let (description, base) = s.split_once('_').ok_or_else(malformed)?;
        if description.trim().is_empty() || base.trim().is_empty() || base.contains('_') {
            return Err(malformed());
        }
        Ok(Self::new(description.trim(), base.trim()))
    }
}

/// Per-selection branch bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchStatus {
    pub created: bool,
    pub selected_tag: String,
    pub branch_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub id: Uuid,
    pub topic: String,
    pub issue_name: String,
    pub kind: IssueKind,
    pub base_branch: String,
    pub stable_tag: String,
    pub created_at: DateTime<Utc>,
    pub selections: Vec<Selection>,
    pub branches: Vec<BranchStatus>,
}

impl Story {
    /// Build targets for this story, ordered by level.
    ///
    /// Missing lower levels are filled with placeholder targets (feature 0) so that
    /// every level gate has something that can open it. Soft-deleted branches are
    /// left out.
    pub fn build_plan(&self) -> Vec<BuildTarget> {
        let mut active: Vec<(&Selection, &BranchStatus)> = self
            .selections
            .iter()
            .zip(&self.branches)
            .filter(|(_, status)| status.created)
            .collect();
        active.sort_by_key(|(sel, _)| **sel);

        let present: BTreeSet<u32> = active.iter().map(|(sel, _)| sel.level).collect();
        let mut filled: BTreeSet<u32> = BTreeSet::new();
        let mut plan = Vec::with_capacity(active.len());

        for (sel, status) in active {
            for level in 1..sel.level {
                if !present.contains(&level) && filled.insert(level) {
                    let placeholder = Selection::new(level, 0, sel.component);
                    plan.push(BuildTarget {
                        level,
                        feature: 0,
                        component: sel.component,
                        tag: Some(self.stable_tag.clone()),
                        branch: branch::branch_name(&self.topic, &placeholder),
                        autogenerated: true,
                    });
                }
            }
            plan.push(BuildTarget {
                level: sel.level,
                feature: sel.feature,
                component: sel.component,
                tag: Some(status.selected_tag.clone()),
                branch: status.branch_name.clone(),
                autogenerated: false,
            });
        }

        plan
    }
}

/// In-memory collection of stories.
#[derive(Debug, Clone, Default)]
pub struct StoryStore {
    stories: Vec<Story>,
    tags: TagCatalog,
    levels: LevelCatalog,
}

impl StoryStore {
    pub fn new(tags: TagCatalog, levels: LevelCatalog) -> Self {
        Self {
            stories: Vec::new(),
            tags,
            levels,
        }
    }

    /// Restore a store from previously saved stories.
    pub fn with_stories(mut self, stories: Vec<Story>) -> Self {
        self.stories = stories;
        self
    }

    pub fn stories(&self) -> &[Story] {
        &self.stories
    }

    pub fn get(&self, id: Uuid) -> Option<&Story> {
        self.stories.iter().find(|s| s.id == id)
    }

    /// Look a story up by full id, unambiguous id prefix, or exact topic.
    pub fn find(&self, key: &str) -> Option<&Story> {
        if let Ok(id) = Uuid::parse_str(key) {
            return self.get(id);
        }
        if let Some(story) = self.stories.iter().find(|s| s.topic == key) {
            return Some(story);
        }
        let mut matches = self
            .stories
            .iter()
            .filter(|s| !key.is_empty() && s.id.to_string().starts_with(key));
        match (matches.next(), matches.next()) {
            (Some(story), None) => Some(story),
            _ => None,
        }
    }

    /// Stories whose topic contains `query`, case-insensitively.
    pub fn search(&self, query: &str) -> Vec<&Story> {
        let query = query.to_lowercase();
        self.stories
            .iter()
            .filter(|s| s.topic.to_lowercase().contains(&query))
            .collect()
    }

    /// Create a story. On error the store is left untouched.
    ///
    /// `selections` are collected with toggle semantics, so a selection listed twice
    /// is not selected.
    pub fn add_story(
        &mut self,
        issue: IssueRef,
        selections: Vec<Selection>,
    ) -> Result<&Story, StoryError> {
        let unique = selections.into_iter().collect::<SelectionSet>().into_vec();
        if unique.is_empty() {
            return Err(StoryError::NoSelections);
        }
        if let Some(bad) = unique.iter().find(|s| !self.levels.contains(s)) {
            return Err(StoryError::UnknownSelection {
                level: bad.level,
                feature: bad.feature,
            });
        }

        let (kind, topic) =
            branch::topic_name(&issue.description).ok_or_else(|| StoryError::EmptySlug {
                description: issue.description.clone(),
            })?;
        let stable_tag = self.tags.resolve(&issue.base_branch)?;
        // A renamed branch elsewhere may already hold a name this topic would derive.
        let taken_topics: HashSet<&str> = self.stories.iter().map(|s| s.topic.as_str()).collect();
        let taken_branches: HashSet<&str> = self
            .stories
            .iter()
            .flat_map(|s| &s.branches)
            .map(|b| b.branch_name.as_str())
            .collect();
        let topic = branch::unique_name(&topic, |candidate| {
            !taken_topics.contains(candidate)
                && unique
                    .iter()
                    .all(|sel| !taken_branches.contains(branch::branch_name(candidate, sel).as_str()))
        });

        let branches = unique
            .iter()
            .map(|sel| BranchStatus {
                created: true,
                selected_tag: stable_tag.clone(),
                branch_name: branch::branch_name(&topic, sel),
                base_branch: Some(issue.base_branch.clone()),
            })
            .collect();

        let story = Story {
            id: Uuid::new_v4(),
            topic,
            issue_name: issue.description,
            kind,
            base_branch: issue.base_branch,
            stable_tag,
            created_at: Utc::now(),
            selections: unique,
            branches,
        };
        tracing::info!(story = %story.id, topic = %story.topic, tag = %story.stable_tag, "story created");

        self.stories.push(story);
        Ok(self.stories.last().expect("story was just pushed"))
    }

    pub fn remove_story(&mut self, id: Uuid) -> Option<Story> {
        let pos = self.stories.iter().position(|s| s.id == id)?;
        let story = self.stories.remove(pos);
        tracing::info!(story = %id, topic = %story.topic, "story removed");
        Some(story)
    }

    fn branch_mut(&mut self, id: Uuid, index: usize) -> Result<&mut BranchStatus, StoryError> {
        let story = self
            .stories
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoryError::StoryNotFound { id })?;
        story
            .branches
            .get_mut(index)
            .ok_or(StoryError::BranchIndexOutOfRange { id, index })
    }

    pub fn set_branch_created(
        &mut self,
        id: Uuid,
        index: usize,
        created: bool,
    ) -> Result<(), StoryError> {
        self.branch_mut(id, index)?.created = created;
        Ok(())
    }

    pub fn update_branch_tag(&mut self, id: Uuid, index: usize, tag: &str) -> Result<(), StoryError> {
        let tag = tag::validate_tag(tag)?;
        self.branch_mut(id, index)?.selected_tag = tag;
        Ok(())
    }

    /// Rename a branch. Names stay unique across the whole store.
    pub fn update_branch_name(
        &mut self,
        id: Uuid,
        index: usize,
        name: &str,
    ) -> Result<(), StoryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoryError::EmptyBranchName);
        }
        let current = self.branch_mut(id, index)?.branch_name.clone();
        if current == name {
            return Ok(());
        }
        let taken = self
            .stories
            .iter()
            .flat_map(|s| &s.branches)
            .any(|b| b.branch_name == name);
        if taken {
            return Err(StoryError::BranchNameTaken {
                name: name.to_string(),
            });
        }
        self.branch_mut(id, index)?.branch_name = name.to_string();
        Ok(())
    }

    pub fn update_base_branch(
        &mut self,
        id: Uuid,
        index: usize,
        base: &str,
    ) -> Result<(), StoryError> {
        self.branch_mut(id, index)?.base_branch = Some(base.trim().to_string());
        Ok(())
    }

    /// Soft-delete a branch: it stays listed but is no longer created or built.
    pub fn delete_branch(&mut self, id: Uuid, index: usize) -> Result<(), StoryError> {
        let branch = self.branch_mut(id, index)?;
        branch.created = false;
        branch.base_branch = None;
        Ok(())
    }
}
