//! Selector-driven extraction of HTML pages into `Extraction` trees.
//!
//! What to pull from each page kind lives in `ExtractionProfiles`, which can be
//! loaded from JSON. Selectors are compiled once up front; a profile with a bad
//! selector is rejected before any fetch happens.

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use url::Url;

use crate::transport::{Extraction, FetchPurpose};

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Invalid selector '{selector}' for {name}: {message}")]
    InvalidSelector {
        name: String,
        selector: String,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid profile file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One named value to pull out of a page or a group element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub name: String,
    /// CSS selector; empty means the enclosing group element itself
    #[serde(default)]
    pub selector: String,
    /// Attribute to read instead of the element text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,
    /// Resolve the value against the page URL
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub url: bool,
}

impl FieldRule {
    fn text(name: &str, selector: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            attr: None,
            url: false,
        }
    }

    fn link(name: &str, selector: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            attr: Some("href".to_string()),
            url: true,
        }
    }
}

/// Repeated element on a page; each match becomes one nested `Extraction`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRule {
    pub name: String,
    pub selector: String,
    #[serde(default)]
    pub fields: Vec<FieldRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageProfile {
    #[serde(default)]
    pub fields: Vec<FieldRule>,
    #[serde(default)]
    pub groups: Vec<GroupRule>,
}

/// Selectors for every page kind the crawl visits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionProfiles {
    pub index: PageProfile,
    pub detail: PageProfile,
    pub sub_resource: PageProfile,
}

impl Default for ExtractionProfiles {
    /// Layout of a pokedex-style catalog: a table of entries, a detail page
    /// with a vitals table, an evolution strip and linked abilities.
    fn default() -> Self {
        let entry_fields = vec![
            FieldRule::text("id", "td.cell-num"),
            FieldRule::text("name", "a.ent-name"),
            FieldRule::link("url", "a.ent-name"),
            FieldRule::text("types", "a.type-icon"),
        ];
        let index = PageProfile {
            fields: Vec::new(),
            groups: vec![GroupRule {
                name: "rows".to_string(),
                selector: "table#pokedex tbody tr".to_string(),
                fields: entry_fields,
            }],
        };

        let vitals = ".vitals-table tbody tr";
        let detail = PageProfile {
            fields: vec![
                FieldRule::text("name", "main h1"),
                FieldRule::text("types", &format!("{vitals}:nth-of-type(2) td a.type-icon")),
                FieldRule::text("species", &format!("{vitals}:nth-of-type(3) td")),
                FieldRule::text("height", &format!("{vitals}:nth-of-type(4) td")),
                FieldRule::text("weight", &format!("{vitals}:nth-of-type(5) td")),
            ],
            groups: vec![
                GroupRule {
                    name: "references".to_string(),
                    selector: ".infocard-list-evo .infocard".to_string(),
                    fields: vec![
                        FieldRule::text("id", "small"),
                        FieldRule::text("name", "a.ent-name"),
                        FieldRule::link("url", "a.ent-name"),
                    ],
                },
                GroupRule {
                    name: "abilities".to_string(),
                    selector: format!("{vitals}:nth-of-type(6) td a"),
                    fields: vec![FieldRule::text("name", ""), FieldRule::link("url", "")],
                },
            ],
        };

        let sub_resource = PageProfile {
            fields: vec![
                FieldRule::text("name", "main h1"),
                FieldRule::text("description", "main h2 + p"),
            ],
            groups: Vec::new(),
        };

        Self {
            index,
            detail,
            sub_resource,
        }
    }
}

impl ExtractionProfiles {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ExtractError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn to_json(&self) -> Result<String, ExtractError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

struct CompiledField {
    name: String,
    // None selects the group element itself
    selector: Option<Selector>,
    attr: Option<String>,
    url: bool,
}

struct CompiledGroup {
    name: String,
    selector: Selector,
    fields: Vec<CompiledField>,
}

struct CompiledProfile {
    fields: Vec<CompiledField>,
    groups: Vec<CompiledGroup>,
}

/// Compiled `ExtractionProfiles`, ready to run against page bodies
pub struct Extractor {
    index: CompiledProfile,
    detail: CompiledProfile,
    sub_resource: CompiledProfile,
}

impl Extractor {
    pub fn new(profiles: &ExtractionProfiles) -> Result<Self, ExtractError> {
        Ok(Self {
            index: compile_profile(&profiles.index)?,
            detail: compile_profile(&profiles.detail)?,
            sub_resource: compile_profile(&profiles.sub_resource)?,
        })
    }

    /// Extract `html` as a page of kind `purpose`. Relative links resolve
    /// against `page_url`.
    pub fn extract(&self, purpose: FetchPurpose, html: &str, page_url: &str) -> Extraction {
        let profile = match purpose {
            FetchPurpose::Index => &self.index,
            FetchPurpose::Detail => &self.detail,
            FetchPurpose::SubResource => &self.sub_resource,
        };
        let base = Url::parse(page_url).ok();
        let document = Html::parse_document(html);
        let root = document.root_element();

        let mut extraction = Extraction::new();
        for field in &profile.fields {
            collect_field(&mut extraction, field, root, base.as_ref());
        }
        for group in &profile.groups {
            let items: Vec<Extraction> = root
                .select(&group.selector)
                .map(|element| {
                    let mut item = Extraction::new();
                    for field in &group.fields {
                        collect_field(&mut item, field, element, base.as_ref());
                    }
                    item
                })
                .collect();
            extraction.groups.insert(group.name.clone(), items);
        }
        extraction
    }
}

fn compile_selector(name: &str, selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::InvalidSelector {
        name: name.to_string(),
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

fn compile_field(rule: &FieldRule, in_group: bool) -> Result<CompiledField, ExtractError> {
    let trimmed = rule.selector.trim();
    let selector = if trimmed.is_empty() {
        if !in_group {
            return Err(ExtractError::InvalidSelector {
                name: rule.name.clone(),
                selector: String::new(),
                message: "empty selector outside a group".to_string(),
            });
        }
        None
    } else {
        Some(compile_selector(&rule.name, trimmed)?)
    };
    Ok(CompiledField {
        name: rule.name.clone(),
        selector,
        attr: rule.attr.clone(),
        url: rule.url,
    })
}

fn compile_profile(profile: &PageProfile) -> Result<CompiledProfile, ExtractError> {
    let fields = profile
        .fields
        .iter()
        .map(|f| compile_field(f, false))
        .collect::<Result<Vec<_>, _>>()?;
    let groups = profile
        .groups
        .iter()
        .map(|g| {
            Ok(CompiledGroup {
                name: g.name.clone(),
                selector: compile_selector(&g.name, &g.selector)?,
                fields: g
                    .fields
                    .iter()
                    .map(|f| compile_field(f, true))
                    .collect::<Result<Vec<_>, _>>()?,
            })
        })
        .collect::<Result<Vec<_>, ExtractError>>()?;
    Ok(CompiledProfile { fields, groups })
}

fn collect_field(target: &mut Extraction, field: &CompiledField, scope: ElementRef<'_>, base: Option<&Url>) {
    let mut push = |element: ElementRef<'_>| {
        if let Some(value) = element_value(element, field, base) {
            target.push(&field.name, value);
        }
    };
    match &field.selector {
        Some(selector) => scope.select(selector).for_each(&mut push),
        None => push(scope),
    }
}

fn element_value(element: ElementRef<'_>, field: &CompiledField, base: Option<&Url>) -> Option<String> {
    let raw = match &field.attr {
        Some(attr) => element.value().attr(attr)?.trim().to_string(),
        None => element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" "),
    };
    if raw.is_empty() {
        return None;
    }
    if !field.url {
        return Some(raw);
    }
    match base.map(|b| b.join(&raw)) {
        Some(Ok(resolved)) => Some(resolved.to_string()),
        Some(Err(e)) => {
            tracing::debug!(value = %raw, error = %e, "link not resolvable, keeping raw value");
            Some(raw)
        }
        None => Some(raw),
    }
}
