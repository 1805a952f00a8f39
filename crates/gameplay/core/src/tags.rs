//! Gameplay tags and tag requirements.
//!
//! Tags are matched exactly. Hierarchical matching (`Status.Debuff` matching
//! `Status`) belongs to the tag service that owns the tag dictionary and is
//! not modelled here; aggregation only needs the boolean answer.

use std::collections::BTreeSet;
use std::fmt;

/// A single gameplay tag, e.g. `Status.Stunned`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct GameplayTag(String);

impl GameplayTag {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameplayTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GameplayTag {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Ordered set of gameplay tags.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct TagContainer {
    tags: BTreeSet<GameplayTag>,
}

impl TagContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: impl Into<GameplayTag>) -> bool {
        self.tags.insert(tag.into())
    }

    pub fn remove(&mut self, tag: &GameplayTag) -> bool {
        self.tags.remove(tag)
    }

    pub fn has_tag(&self, tag: &GameplayTag) -> bool {
        self.tags.contains(tag)
    }

    /// True if every tag in `other` is present. An empty `other` is always satisfied.
    pub fn has_all(&self, other: &TagContainer) -> bool {
        other.tags.is_subset(&self.tags)
    }

    /// True if at least one tag in `other` is present. An empty `other` never matches.
    pub fn has_any(&self, other: &TagContainer) -> bool {
        !self.tags.is_disjoint(&other.tags)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GameplayTag> {
        self.tags.iter()
    }
}

impl<T: Into<GameplayTag>> FromIterator<T> for TagContainer {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            tags: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Required/ignored tag pair evaluated against an actor's tags.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TagRequirements {
    /// All of these must be present.
    pub require_tags: TagContainer,
    /// None of these may be present.
    pub ignore_tags: TagContainer,
}

impl TagRequirements {
    pub fn new(require_tags: TagContainer, ignore_tags: TagContainer) -> Self {
        Self {
            require_tags,
            ignore_tags,
        }
    }

    pub fn requiring<T: Into<GameplayTag>>(tags: impl IntoIterator<Item = T>) -> Self {
        Self::new(tags.into_iter().collect(), TagContainer::new())
    }

    pub fn ignoring<T: Into<GameplayTag>>(tags: impl IntoIterator<Item = T>) -> Self {
        Self::new(TagContainer::new(), tags.into_iter().collect())
    }

    /// True iff `tags` is a superset of the required tags and disjoint from the ignored ones.
    pub fn requirements_met(&self, tags: &TagContainer) -> bool {
        tags.has_all(&self.require_tags) && !tags.has_any(&self.ignore_tags)
    }

    pub fn is_empty(&self) -> bool {
        self.require_tags.is_empty() && self.ignore_tags.is_empty()
    }
}
