//! Mapping from page extractions to typed crawl inputs.
//!
//! Field and group names used here form the contract with extraction
//! profiles: index pages provide a `rows` group, detail pages provide `name`,
//! `types`, attribute fields, a `references` group and one group per
//! sub-resource label, sub-resource pages provide `name` and `description`.

use std::collections::BTreeMap;

use crate::config::CrawlConfig;
use crate::model::{DetailFields, EntityId, SeedFields, SubResourceLink, SubResourceRecord};
use crate::normalize::normalize_measurement;
use crate::resolver::{RawReference, parse_entity_id};
use crate::transport::Extraction;

pub const ROWS_GROUP: &str = "rows";
pub const REFERENCES_GROUP: &str = "references";
pub const ID_FIELD: &str = "id";
pub const NAME_FIELD: &str = "name";
pub const URL_FIELD: &str = "url";
pub const TYPES_FIELD: &str = "types";
pub const DESCRIPTION_FIELD: &str = "description";

/// Detail value fields that are not raw attributes
const NON_ATTRIBUTE_FIELDS: &[&str] = &[NAME_FIELD, TYPES_FIELD];

/// Index rows as `(id, seed)` pairs in document order. Rows without a usable
/// id are skipped.
pub fn index_entries(index: &Extraction) -> Vec<(EntityId, SeedFields)> {
    index
        .group(ROWS_GROUP)
        .iter()
        .filter_map(|row| {
            let label = row.first(ID_FIELD).unwrap_or_default();
            let Some(id) = parse_entity_id(label) else {
                tracing::warn!(label, "index row without usable id skipped");
                return None;
            };
            let seed = SeedFields {
                display_name: row.first(NAME_FIELD).unwrap_or_default().to_string(),
                canonical_url: row.first(URL_FIELD).unwrap_or_default().to_string(),
                category_tags: tags(row),
            };
            Some((id, seed))
        })
        .collect()
}

/// Detail fields with measurements normalized. The height attribute is
/// rescaled here by the configured unit scale; the normalizer stays unit-agnostic.
pub fn detail_fields(detail: &Extraction, config: &CrawlConfig) -> DetailFields {
    let mut raw_attributes = BTreeMap::new();
    for (name, values) in &detail.values {
        if NON_ATTRIBUTE_FIELDS.contains(&name.as_str()) {
            continue;
        }
        if let Some(value) = values.iter().map(|v| v.trim()).find(|v| !v.is_empty()) {
            raw_attributes.insert(name.clone(), value.to_string());
        }
    }

    let normalized_attributes = raw_attributes
        .iter()
        .map(|(name, raw)| {
            let mut value = normalize_measurement(raw);
            if *name == config.height_attribute {
                value = value.map(|v| v * config.target_height_unit_scale);
            }
            (name.clone(), value)
        })
        .collect();

    let display_name = detail.first(NAME_FIELD).map(str::to_string);
    if display_name.is_none() {
        tracing::debug!("detail page without name field");
    }

    DetailFields {
        display_name,
        category_tags: tags(detail),
        raw_attributes,
        normalized_attributes,
        sub_resources: sub_resource_links(detail, config),
    }
}

/// Relation links in document order
pub fn raw_references(detail: &Extraction) -> Vec<RawReference> {
    detail
        .group(REFERENCES_GROUP)
        .iter()
        .map(|card| RawReference {
            id_text: card.first(ID_FIELD).unwrap_or_default().to_string(),
            display_name: card.first(NAME_FIELD).unwrap_or_default().to_string(),
            url: card.first(URL_FIELD).unwrap_or_default().to_string(),
        })
        .collect()
}

/// Links from every configured sub-resource group, group by group in label
/// order, document order within a group
pub fn sub_resource_links(detail: &Extraction, config: &CrawlConfig) -> Vec<SubResourceLink> {
    config
        .sub_resource_labels
        .iter()
        .flat_map(|label| detail.group(label).iter())
        .filter_map(|item| {
            let url = item.first(URL_FIELD)?;
            let name = item.first(NAME_FIELD).unwrap_or(url);
            Some(SubResourceLink {
                name: name.to_string(),
                url: url.to_string(),
            })
        })
        .collect()
}

/// Record for a fetched sub-resource page. The link name wins so that names
/// stay consistent with the entity's own dedup.
pub fn sub_resource_record(link: &SubResourceLink, page: &Extraction) -> SubResourceRecord {
    let description = page.first(DESCRIPTION_FIELD).map(str::to_string);
    if description.is_none() {
        tracing::debug!(url = %link.url, "sub-resource page without description");
    }
    let name = if link.name.is_empty() {
        page.first(NAME_FIELD).unwrap_or_default().to_string()
    } else {
        link.name.clone()
    };
    SubResourceRecord {
        name,
        description,
        source_url: link.url.clone(),
    }
}

fn tags(extraction: &Extraction) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in extraction.all(TYPES_FIELD).iter().map(|t| t.trim()) {
        if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}
