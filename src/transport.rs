//! Seam between the crawl engine and whatever turns a URL into extracted fields.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::network::FetchError;

/// Why a URL is being fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPurpose {
    Index,
    Detail,
    SubResource,
}

impl fmt::Display for FetchPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FetchPurpose::Index => "index",
            FetchPurpose::Detail => "detail",
            FetchPurpose::SubResource => "sub_resource",
        };
        f.write_str(label)
    }
}

/// Structured result of extracting one page: named field values plus named
/// groups of repeated sub-structures (index rows, reference links, ability links).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub values: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<Extraction>>,
}

impl Extraction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper for a single-valued field
    pub fn with(mut self, field: &str, value: impl Into<String>) -> Self {
        self.push(field, value);
        self
    }

    pub fn with_group(mut self, group: &str, items: Vec<Extraction>) -> Self {
        self.groups.insert(group.to_string(), items);
        self
    }

    pub fn push(&mut self, field: &str, value: impl Into<String>) {
        self.values.entry(field.to_string()).or_default().push(value.into());
    }

    /// First non-empty value of a field
    pub fn first(&self, field: &str) -> Option<&str> {
        self.values
            .get(field)
            .and_then(|vals| vals.iter().map(|v| v.trim()).find(|v| !v.is_empty()))
    }

    pub fn all(&self, field: &str) -> &[String] {
        self.values.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn group(&self, name: &str) -> &[Extraction] {
        self.groups.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Turns a URL into an `Extraction`. Retries, pooling and parsing all live
/// behind this trait; the engine only sees the final result.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str, purpose: FetchPurpose) -> Result<Extraction, FetchError>;
}
