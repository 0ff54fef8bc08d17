//! Turns relation links found on a detail page into registrations.
//!
//! Ids are always derived from the reference's own label text, with the same
//! rule the index uses, so an entity seen first as a reference and later as an
//! index row unifies into one record.

use crate::ledger::CrawlLedger;
use crate::model::{EntityId, Reference, SeedFields};

/// Reference as extracted, before id derivation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawReference {
    pub id_text: String,
    pub display_name: String,
    pub url: String,
}

/// Entity registered by the resolver that now needs a detail fetch
#[derive(Debug, Clone, PartialEq)]
pub struct Discovered {
    pub id: EntityId,
    pub seed: SeedFields,
}

/// Derive an entity id from label text such as "#0025", "No. 025" or "0025".
/// Leading markers and zero padding are dropped; the first digit run is the id.
pub fn parse_entity_id(text: &str) -> Option<EntityId> {
    let digits: String = text
        .trim()
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<u32>().ok().map(EntityId)
}

pub struct ReferenceResolver;

impl ReferenceResolver {
    /// Build the reference list stored on the source record, in document order.
    /// Unparseable labels, self-references and repeated ids are dropped.
    pub fn references(source: EntityId, raw: &[RawReference]) -> Vec<Reference> {
        let mut references: Vec<Reference> = Vec::with_capacity(raw.len());
        for candidate in raw {
            let Some(id) = parse_entity_id(&candidate.id_text) else {
                tracing::debug!(%source, label = %candidate.id_text, "reference without usable id");
                continue;
            };
            if id == source {
                continue;
            }
            if references.iter().any(|r| r.id == id) {
                tracing::debug!(%source, %id, "duplicate reference");
                continue;
            }
            references.push(Reference {
                id,
                display_name: candidate.display_name.clone(),
                url: candidate.url.clone(),
            });
        }
        references
    }

    /// Register every referenced entity and return those that were new, in
    /// reference order. Only these need a detail fetch.
    pub fn resolve(
        ledger: &CrawlLedger,
        source: EntityId,
        references: &[Reference],
    ) -> Vec<Discovered> {
        let mut discovered = Vec::new();
        for reference in references {
            let seed = SeedFields {
                display_name: reference.display_name.clone(),
                canonical_url: reference.url.clone(),
                category_tags: Vec::new(),
            };
            if ledger.register_if_new(reference.id, seed.clone()).is_new {
                tracing::debug!(%source, id = %reference.id, "new entity discovered via reference");
                discovered.push(Discovered {
                    id: reference.id,
                    seed,
                });
            }
        }
        discovered
    }
}
