//! Catalog records, lifecycle states and the failure manifest.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable numeric key of a catalog entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:04}", self.0)
    }
}

/// Link from one entity's detail page to a related entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub id: EntityId,
    pub display_name: String,
    pub url: String,
}

/// Descriptive record merged in from one dependent page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubResourceRecord {
    pub name: String,
    pub description: Option<String>,
    pub source_url: String,
}

/// Named pointer to a sub-resource page, as found on a detail page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubResourceLink {
    pub name: String,
    pub url: String,
}

/// Per-entity progress through the crawl.
///
/// `Complete` and `Failed` are terminal. `Complete` is only reached once every
/// sub-resource has been merged or recorded as failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "pending", rename_all = "snake_case")]
pub enum LifecycleState {
    Discovered,
    DetailRequested,
    DetailMerged,
    SubResourcesPending(usize),
    Complete,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Complete | LifecycleState::Failed)
    }
}

/// Fields known when an entity is first discovered, from an index row or a reference
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SeedFields {
    pub display_name: String,
    pub canonical_url: String,
    pub category_tags: Vec<String>,
}

/// Fields extracted from an entity's detail page
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetailFields {
    pub display_name: Option<String>,
    pub category_tags: Vec<String>,
    pub raw_attributes: BTreeMap<String, String>,
    pub normalized_attributes: BTreeMap<String, Option<f64>>,
    /// Links to dependent pages, in document order; handed to the fold, not stored
    pub sub_resources: Vec<SubResourceLink>,
}

/// One catalog entity and its merge progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub display_name: String,
    pub canonical_url: String,
    pub category_tags: Vec<String>,
    pub raw_attributes: BTreeMap<String, String>,
    pub normalized_attributes: BTreeMap<String, Option<f64>>,
    pub references: Vec<Reference>,
    pub sub_resources: Vec<SubResourceRecord>,
    pub lifecycle_state: LifecycleState,
}

impl EntityRecord {
    pub fn new(id: EntityId, seed: SeedFields) -> Self {
        Self {
            id,
            display_name: seed.display_name,
            canonical_url: seed.canonical_url,
            category_tags: seed.category_tags,
            raw_attributes: BTreeMap::new(),
            normalized_attributes: BTreeMap::new(),
            references: Vec::new(),
            sub_resources: Vec::new(),
            lifecycle_state: LifecycleState::Discovered,
        }
    }

    /// Apply detail fields. Detail values win over seed values, except that an
    /// absent or empty detail value never erases a seed value.
    pub fn apply_detail(&mut self, detail: DetailFields, references: Vec<Reference>) {
        if let Some(name) = detail.display_name.filter(|n| !n.is_empty()) {
            self.display_name = name;
        }
        if !detail.category_tags.is_empty() {
            self.category_tags = detail.category_tags;
        }
        self.raw_attributes.extend(detail.raw_attributes);
        self.normalized_attributes.extend(detail.normalized_attributes);
        self.references = references;
    }

    /// Append a sub-resource unless one with the same name is already present
    pub fn add_sub_resource(&mut self, record: SubResourceRecord) -> bool {
        if self.sub_resources.iter().any(|r| r.name == record.name) {
            return false;
        }
        self.sub_resources.push(record);
        true
    }
}

/// Entity that reached `Failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityFailure {
    pub id: EntityId,
    pub reason: String,
}

/// Sub-resource that could not be fetched; its entity still completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubResourceFailure {
    pub id: EntityId,
    pub url: String,
    pub reason: String,
}

/// Everything that went wrong during one run, sorted by id
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FailureManifest {
    pub entities: Vec<EntityFailure>,
    pub sub_resources: Vec<SubResourceFailure>,
}

impl FailureManifest {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.sub_resources.is_empty()
    }
}
