//! Sequential accumulation of an entity's sub-resource pages.
//!
//! One fold runs per entity and keeps at most one fetch in flight for it; folds
//! of different entities run concurrently through the shared scheduler.
//! Sub-resource pages are shared between entities, so outcomes are cached per
//! URL for the whole run and concurrent first requests coalesce onto one fetch.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::fields;
use crate::ledger::CrawlLedger;
use crate::metrics::FetchMetrics;
use crate::model::{EntityId, SubResourceLink};
use crate::network::FetchError;
use crate::scheduler::{FetchOutcome, FetchScheduler};
use crate::transport::FetchPurpose;

/// Per-run cache of sub-resource fetch outcomes keyed by URL
#[derive(Default)]
pub struct SubResourceCache {
    entries: DashMap<String, Arc<OnceCell<FetchOutcome>>>,
}

impl SubResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached outcome for `url`, fetching it through the scheduler
    /// on first use. Cancelled fetches are not cached.
    pub async fn fetch(&self, scheduler: &FetchScheduler, metrics: &FetchMetrics, url: &str) -> FetchOutcome {
        let cell = self
            .entries
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        if let Some(outcome) = cell.get() {
            metrics.cache_hits.inc();
            return outcome.clone();
        }

        let outcome = cell
            .get_or_try_init(|| async {
                match scheduler.fetch(url, FetchPurpose::SubResource).await {
                    Err(FetchError::Cancelled) => Err(FetchError::Cancelled),
                    other => Ok(other),
                }
            })
            .await;

        match outcome {
            Ok(cached) => cached.clone(),
            Err(cancelled) => Err(cancelled),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What one fold did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoldReport {
    pub merged: usize,
    pub failed: usize,
    pub cancelled: bool,
}

#[derive(Clone)]
pub struct SubResourceFold {
    ledger: Arc<CrawlLedger>,
    scheduler: Arc<FetchScheduler>,
    cache: Arc<SubResourceCache>,
    metrics: Arc<FetchMetrics>,
}

impl SubResourceFold {
    pub fn new(
        ledger: Arc<CrawlLedger>,
        scheduler: Arc<FetchScheduler>,
        cache: Arc<SubResourceCache>,
        metrics: Arc<FetchMetrics>,
    ) -> Self {
        Self {
            ledger,
            scheduler,
            cache,
            metrics,
        }
    }

    /// Fetch `links` one at a time in order, merging each result before the
    /// next fetch starts. A failed link is counted down and skipped; a
    /// cancelled fetch ends the fold and leaves the entity pending.
    #[tracing::instrument(skip(self, links), fields(count = links.len()))]
    pub async fn run(&self, id: EntityId, links: Vec<SubResourceLink>) -> FoldReport {
        let mut report = FoldReport::default();

        for link in links {
            let outcome = self.cache.fetch(&self.scheduler, &self.metrics, &link.url).await;
            let merged = match outcome {
                Ok(page) => {
                    report.merged += 1;
                    let record = fields::sub_resource_record(&link, &page);
                    self.ledger.merge_sub_resource(id, record)
                }
                Err(FetchError::Cancelled) => {
                    tracing::debug!(url = %link.url, "fold stopped by cancellation");
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    report.failed += 1;
                    self.ledger.record_sub_resource_failure(id, &link.url, e.to_string())
                }
            };
            if let Err(e) = merged {
                tracing::warn!(url = %link.url, error = %e, "fold merge rejected");
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DetailFields, LifecycleState, SeedFields};
    use crate::replay::{ScriptedFailure, ScriptedTransport};
    use crate::transport::Extraction;
    use std::time::Duration;

    fn link(name: &str) -> SubResourceLink {
        SubResourceLink {
            name: name.to_string(),
            url: format!("https://dex.test/ability/{}", name.to_lowercase()),
        }
    }

    fn page(name: &str) -> Extraction {
        Extraction::new()
            .with("name", name)
            .with("description", format!("{} effect", name))
    }

    struct Harness {
        ledger: Arc<CrawlLedger>,
        transport: Arc<ScriptedTransport>,
        fold: SubResourceFold,
        metrics: Arc<FetchMetrics>,
        scheduler: Arc<FetchScheduler>,
    }

    fn harness(transport: ScriptedTransport, cap: usize) -> Harness {
        let transport = Arc::new(transport);
        let ledger = Arc::new(CrawlLedger::new());
        let metrics = Arc::new(FetchMetrics::new());
        let scheduler = Arc::new(FetchScheduler::new(transport.clone(), cap, Arc::clone(&metrics)));
        let fold = SubResourceFold::new(
            Arc::clone(&ledger),
            Arc::clone(&scheduler),
            Arc::new(SubResourceCache::new()),
            Arc::clone(&metrics),
        );
        Harness {
            ledger,
            transport,
            fold,
            metrics,
            scheduler,
        }
    }

    fn prepare(ledger: &CrawlLedger, id: EntityId, links: &[SubResourceLink]) -> Vec<SubResourceLink> {
        ledger.register_if_new(id, SeedFields::default());
        let detail = DetailFields {
            sub_resources: links.to_vec(),
            ..DetailFields::default()
        };
        ledger.merge_detail(id, detail, Vec::new()).unwrap();
        ledger.begin_sub_resources(id, links.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_failed_link_is_skipped_not_fatal() {
        let mut transport = ScriptedTransport::new();
        transport.add_page("https://dex.test/ability/a", page("A"));
        transport.add_failure("https://dex.test/ability/b", ScriptedFailure::HttpStatus { status: 500 });
        transport.add_page("https://dex.test/ability/c", page("C"));
        let h = harness(transport, 4);

        let id = EntityId(1);
        let links = prepare(&h.ledger, id, &[link("A"), link("B"), link("C")]);
        let report = h.fold.run(id, links).await;

        assert_eq!(report, FoldReport { merged: 2, failed: 1, cancelled: false });
        let record = h.ledger.get(id).unwrap();
        assert_eq!(record.lifecycle_state, LifecycleState::Complete);
        let names: Vec<&str> = record.sub_resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["A", "C"]);
        assert_eq!(h.ledger.failure_manifest().sub_resources[0].reason, "HTTP status 500");
    }

    #[tokio::test]
    async fn test_fetches_are_sequential_and_ordered() {
        let mut transport = ScriptedTransport::new().with_latency(Duration::from_millis(5));
        for name in ["A", "B", "C", "D"] {
            transport.add_page(&format!("https://dex.test/ability/{}", name.to_lowercase()), page(name));
        }
        // generous cap: sequencing must come from the fold itself
        let h = harness(transport, 8);

        let id = EntityId(7);
        let links = prepare(&h.ledger, id, &[link("A"), link("B"), link("C"), link("D")]);
        h.fold.run(id, links).await;

        assert_eq!(h.transport.peak_concurrency(), 1);
        let order: Vec<String> = h.transport.fetch_log().into_iter().map(|(url, _)| url).collect();
        assert_eq!(
            order,
            vec![
                "https://dex.test/ability/a",
                "https://dex.test/ability/b",
                "https://dex.test/ability/c",
                "https://dex.test/ability/d",
            ]
        );
    }

    #[tokio::test]
    async fn test_shared_sub_resource_fetched_once() {
        let mut transport = ScriptedTransport::new().with_latency(Duration::from_millis(5));
        transport.add_page("https://dex.test/ability/a", page("A"));
        let h = harness(transport, 4);

        let first = prepare(&h.ledger, EntityId(1), &[link("A")]);
        let second = prepare(&h.ledger, EntityId(2), &[link("A")]);
        let (r1, r2) = tokio::join!(h.fold.run(EntityId(1), first), h.fold.run(EntityId(2), second));

        assert_eq!(r1.merged + r2.merged, 2);
        assert_eq!(h.transport.fetches_of("https://dex.test/ability/a"), 1);
        assert_eq!(h.ledger.state_of(EntityId(2)), Some(LifecycleState::Complete));
    }

    #[tokio::test]
    async fn test_cancellation_leaves_entity_pending() {
        let mut transport = ScriptedTransport::new();
        transport.add_page("https://dex.test/ability/a", page("A"));
        let h = harness(transport, 1);

        let id = EntityId(3);
        let links = prepare(&h.ledger, id, &[link("A")]);
        h.scheduler.close();
        let report = h.fold.run(id, links).await;

        assert!(report.cancelled);
        assert_eq!(h.ledger.state_of(id), Some(LifecycleState::SubResourcesPending(1)));
        assert!(h.ledger.failure_manifest().sub_resources.is_empty());
        assert_eq!(h.metrics.snapshot().sub_resource_fetches, 0);
    }
}
