//! Crawl lifecycle: index fetch, detail fan-out, completion and cancellation.

use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::{CancelMode, CrawlConfig};
use crate::fields;
use crate::fold::{SubResourceCache, SubResourceFold};
use crate::ledger::CrawlLedger;
use crate::metrics::FetchMetrics;
use crate::model::EntityId;
use crate::network::FetchError;
use crate::output::{CrawlOutput, CrawlSummary};
use crate::resolver::ReferenceResolver;
use crate::scheduler::{FetchOutcome, FetchScheduler};
use crate::transport::{FetchPurpose, Transport};

pub const DUPLICATE_URL_REASON: &str = "duplicate detail url";
pub const MISSING_URL_REASON: &str = "no detail url";

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Index fetch failed for {url}: {source}")]
    Index {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Index page {0} listed no entities")]
    EmptyIndex(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Why the wait loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Idle,
    Shutdown,
    Deadline,
}

struct CrawlerInner {
    config: CrawlConfig,
    ledger: Arc<CrawlLedger>,
    scheduler: Arc<FetchScheduler>,
    cache: Arc<SubResourceCache>,
    fold: SubResourceFold,
    metrics: Arc<FetchMetrics>,
}

/// One crawl run. Cheap to clone; clones share the same ledger and scheduler.
#[derive(Clone)]
pub struct CatalogCrawler {
    inner: Arc<CrawlerInner>,
}

impl CatalogCrawler {
    pub fn new(config: CrawlConfig, transport: Arc<dyn Transport>) -> Result<Self, CrawlError> {
        config.validate()?;

        let metrics = Arc::new(FetchMetrics::new());
        let ledger = Arc::new(CrawlLedger::new());
        let scheduler = Arc::new(FetchScheduler::new(
            transport,
            config.concurrency_cap,
            Arc::clone(&metrics),
        ));
        let cache = Arc::new(SubResourceCache::new());
        let fold = SubResourceFold::new(
            Arc::clone(&ledger),
            Arc::clone(&scheduler),
            Arc::clone(&cache),
            Arc::clone(&metrics),
        );

        Ok(Self {
            inner: Arc::new(CrawlerInner {
                config,
                ledger,
                scheduler,
                cache,
                fold,
                metrics,
            }),
        })
    }

    pub fn ledger(&self) -> &CrawlLedger {
        &self.inner.ledger
    }

    pub fn metrics(&self) -> &FetchMetrics {
        &self.inner.metrics
    }

    /// Crawl without an external shutdown signal
    pub async fn run_to_completion(&self, index_url: &str) -> Result<CrawlOutput, CrawlError> {
        let (_keep_open, shutdown) = watch::channel(false);
        self.run(index_url, shutdown).await
    }

    /// Crawl the catalog rooted at `index_url` until every entity is terminal,
    /// `shutdown` flips to true, or the configured max duration passes.
    /// Only an index failure aborts the run; every other failure lands in the
    /// output's failure manifest.
    #[tracing::instrument(skip(self, shutdown))]
    pub async fn run(
        &self,
        index_url: &str,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<CrawlOutput, CrawlError> {
        let started = Instant::now();
        let inner = &self.inner;

        let index = match inner.scheduler.fetch(index_url, FetchPurpose::Index).await {
            Ok(index) => index,
            Err(source) => {
                inner.scheduler.close();
                return Err(CrawlError::Index {
                    url: index_url.to_string(),
                    source,
                });
            }
        };

        let entries = fields::index_entries(&index);
        if entries.is_empty() {
            inner.scheduler.close();
            return Err(CrawlError::EmptyIndex(index_url.to_string()));
        }
        tracing::info!(entries = entries.len(), "index parsed");

        for (id, seed) in entries {
            let url = seed.canonical_url.clone();
            if inner.ledger.register_if_new(id, seed).is_new {
                self.schedule_detail(id, url);
            }
        }

        let completion = self.wait_for_completion(&mut shutdown).await;
        let cancelled = completion != Completion::Idle;

        inner.scheduler.close();
        if cancelled {
            tracing::warn!(?completion, mode = ?inner.config.cancel_mode, "crawl cancelled");
            match inner.config.cancel_mode {
                CancelMode::Drain => {
                    inner.scheduler.drain(inner.config.drain_timeout).await;
                }
                CancelMode::Abandon => inner.scheduler.abandon().await,
            }
            inner.ledger.seal();
        } else {
            inner.ledger.seal();
            inner.scheduler.drain(inner.config.drain_timeout).await;
        }

        let output = self.build_output(index_url, cancelled, started);
        for failure in &output.failures.entities {
            tracing::warn!(id = %failure.id, reason = %failure.reason, "entity not in catalog");
        }
        tracing::info!(summary = %output.summary, "crawl finished");
        Ok(output)
    }

    async fn wait_for_completion(&self, shutdown: &mut watch::Receiver<bool>) -> Completion {
        let inner = &self.inner;
        if *shutdown.borrow() {
            return Completion::Shutdown;
        }

        let deadline = inner.config.max_duration;
        let deadline_sleep = async move {
            match deadline {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline_sleep);

        let mut progress = tokio::time::interval(inner.config.progress_interval);
        progress.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        progress.tick().await;

        let mut signals_open = true;
        loop {
            tokio::select! {
                _ = inner.ledger.wait_idle() => return Completion::Idle,
                changed = shutdown.changed(), if signals_open => match changed {
                    Ok(()) if *shutdown.borrow() => return Completion::Shutdown,
                    Ok(()) => {}
                    Err(_) => signals_open = false,
                },
                _ = &mut deadline_sleep => return Completion::Deadline,
                _ = progress.tick() => self.report_progress(),
            }
        }
    }

    fn report_progress(&self) {
        let counts = self.inner.ledger.counts();
        let fetches = self.inner.metrics.snapshot();
        tracing::info!(
            %counts,
            %fetches,
            outstanding = self.inner.ledger.outstanding(),
            "crawl progress"
        );
    }

    /// Claim the entity's detail URL and submit its fetch. Entities without a
    /// URL, or whose URL another entity already claimed, fail immediately.
    fn schedule_detail(&self, id: EntityId, url: String) {
        let ledger = &self.inner.ledger;
        let failed = if url.is_empty() {
            Some(MISSING_URL_REASON)
        } else if !ledger.claim_url(&url, id) {
            Some(DUPLICATE_URL_REASON)
        } else {
            None
        };
        if let Some(reason) = failed {
            if let Err(e) = ledger.mark_failed(id, reason) {
                tracing::error!(%id, error = %e, "could not fail entity");
            }
            return;
        }

        if let Err(e) = ledger.mark_detail_requested(id) {
            tracing::error!(%id, error = %e, "detail request for unknown entity");
            return;
        }

        let crawler = self.clone();
        let submitted = self
            .inner
            .scheduler
            .submit(url, FetchPurpose::Detail, move |outcome| async move {
                crawler.on_detail(id, outcome).await;
            });
        if !submitted {
            tracing::debug!(%id, "detail fetch not submitted, scheduler closed");
        }
    }

    /// Merge a detail page, fan out to newly referenced entities, then fold
    /// the entity's sub-resources in this same task.
    async fn on_detail(&self, id: EntityId, outcome: FetchOutcome) {
        let inner = &self.inner;
        let page = match outcome {
            Ok(page) => page,
            Err(FetchError::Cancelled) => return,
            Err(e) => {
                if let Err(e) = inner.ledger.mark_failed(id, &format!("detail fetch failed: {}", e)) {
                    tracing::error!(%id, error = %e, "could not fail entity");
                }
                return;
            }
        };

        let detail = fields::detail_fields(&page, &inner.config);
        let links = detail.sub_resources.clone();
        let raw = fields::raw_references(&page);
        let references = ReferenceResolver::references(id, &raw);

        // References register before merge, while this entity is still outstanding
        for discovered in ReferenceResolver::resolve(&inner.ledger, id, &references) {
            self.schedule_detail(discovered.id, discovered.seed.canonical_url);
        }

        if let Err(e) = inner.ledger.merge_detail(id, detail, references) {
            tracing::error!(%id, error = %e, "detail merge failed");
            return;
        }

        let pending = match inner.ledger.begin_sub_resources(id, links) {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!(%id, error = %e, "sub-resources not started");
                return;
            }
        };
        if !pending.is_empty() {
            let report = inner.fold.run(id, pending).await;
            tracing::debug!(%id, merged = report.merged, failed = report.failed, "fold finished");
        }
    }

    fn build_output(&self, index_url: &str, cancelled: bool, started: Instant) -> CrawlOutput {
        let inner = &self.inner;
        let entities = inner.ledger.snapshot_complete();
        let failures = inner.ledger.failure_manifest();
        let summary = CrawlSummary {
            index_url: index_url.to_string(),
            complete: entities.len(),
            failed: failures.entities.len(),
            degraded_sub_resources: failures.sub_resources.len(),
            visited_urls: inner.ledger.visited_count(),
            cached_sub_resources: inner.cache.len(),
            cancelled,
            duration_ms: started.elapsed().as_millis() as u64,
            fetches: inner.metrics.snapshot(),
        };
        CrawlOutput {
            entities,
            failures,
            summary,
        }
    }
}
