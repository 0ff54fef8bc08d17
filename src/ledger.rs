//! Authoritative in-memory store of entity records for one crawl run.
//!
//! The ledger is the only writer of `EntityRecord` state. Every mutation runs
//! synchronously while holding the DashMap entry for that id, so calls for the
//! same id are mutually exclusive while different ids proceed in parallel.
//! A counter of non-terminal entities drives completion detection.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::Notify;

use crate::model::{
    DetailFields, EntityFailure, EntityId, EntityRecord, FailureManifest, LifecycleState,
    Reference, SeedFields, SubResourceFailure, SubResourceLink, SubResourceRecord,
};

pub const CANCELLED_REASON: &str = "crawl cancelled before completion";

#[derive(Error, Debug, PartialEq)]
pub enum LedgerError {
    #[error("Unknown entity {0}")]
    UnknownEntity(EntityId),
}

/// Outcome of `register_if_new`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub is_new: bool,
}

/// Entity counts by lifecycle bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerCounts {
    pub discovered: usize,
    pub in_progress: usize,
    pub complete: usize,
    pub failed: usize,
}

impl std::fmt::Display for LedgerCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Entities: {} discovered, {} in progress, {} complete, {} failed",
            self.discovered, self.in_progress, self.complete, self.failed
        )
    }
}

pub struct CrawlLedger {
    entities: DashMap<EntityId, EntityRecord>,
    // dispatched url -> owning entity
    visited: DashMap<String, EntityId>,
    failure_reasons: DashMap<EntityId, String>,
    sub_resource_failures: Mutex<Vec<SubResourceFailure>>,
    // entities not yet Complete or Failed
    outstanding: AtomicUsize,
    sealed: AtomicBool,
    idle: Notify,
}

impl Default for CrawlLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlLedger {
    pub fn new() -> Self {
        Self {
            entities: DashMap::new(),
            visited: DashMap::new(),
            failure_reasons: DashMap::new(),
            sub_resource_failures: Mutex::new(Vec::new()),
            outstanding: AtomicUsize::new(0),
            sealed: AtomicBool::new(false),
            idle: Notify::new(),
        }
    }

    /// Sole deduplication gate for entity discovery.
    /// Returns `is_new = false` if the id is already known; the caller must not
    /// schedule another detail fetch in that case.
    pub fn register_if_new(&self, id: EntityId, seed: SeedFields) -> Registration {
        if self.is_sealed() {
            tracing::debug!(%id, "ledger sealed, ignoring registration");
            return Registration { is_new: false };
        }

        match self.entities.entry(id) {
            Entry::Occupied(_) => {
                tracing::debug!(%id, "entity already registered");
                Registration { is_new: false }
            }
            Entry::Vacant(slot) => {
                slot.insert(EntityRecord::new(id, seed));
                self.outstanding.fetch_add(1, Ordering::SeqCst);
                Registration { is_new: true }
            }
        }
    }

    /// Record a URL as dispatched on behalf of `id`.
    /// Returns false if some other entity already claimed it.
    pub fn claim_url(&self, url: &str, id: EntityId) -> bool {
        match self.visited.entry(url.to_string()) {
            Entry::Occupied(owner) => *owner.get() == id,
            Entry::Vacant(slot) => {
                slot.insert(id);
                true
            }
        }
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    pub fn mark_detail_requested(&self, id: EntityId) -> Result<LifecycleState, LedgerError> {
        self.mutate(id, |record| {
            if record.lifecycle_state == LifecycleState::Discovered {
                record.lifecycle_state = LifecycleState::DetailRequested;
            }
            false
        })
    }

    /// Store detail fields and the references found on the detail page.
    /// References are only recorded here, never fetched. Moves to `Complete`
    /// straight away when the page lists no sub-resources.
    pub fn merge_detail(
        &self,
        id: EntityId,
        detail: DetailFields,
        references: Vec<Reference>,
    ) -> Result<LifecycleState, LedgerError> {
        self.mutate(id, move |record| match record.lifecycle_state {
            LifecycleState::Discovered | LifecycleState::DetailRequested => {
                let has_sub_resources = !detail.sub_resources.is_empty();
                record.apply_detail(detail, references);
                if has_sub_resources {
                    record.lifecycle_state = LifecycleState::DetailMerged;
                    false
                } else {
                    record.lifecycle_state = LifecycleState::Complete;
                    true
                }
            }
            ref state => {
                tracing::warn!(%id, ?state, "detail merge ignored for entity past detail stage");
                false
            }
        })
    }

    /// Deduplicate `links` by name within this entity and start the pending
    /// counter. Returns the links the fold should fetch, in order. An empty
    /// list completes the entity immediately.
    pub fn begin_sub_resources(
        &self,
        id: EntityId,
        links: Vec<SubResourceLink>,
    ) -> Result<Vec<SubResourceLink>, LedgerError> {
        let mut deduped: Vec<SubResourceLink> = Vec::with_capacity(links.len());
        for link in links {
            if deduped.iter().any(|l| l.name == link.name) {
                tracing::debug!(%id, name = %link.name, "duplicate sub-resource dropped");
                continue;
            }
            deduped.push(link);
        }

        let mut accepted = Vec::new();
        self.mutate(id, |record| match record.lifecycle_state {
            LifecycleState::DetailMerged => {
                if deduped.is_empty() {
                    record.lifecycle_state = LifecycleState::Complete;
                    true
                } else {
                    record.lifecycle_state = LifecycleState::SubResourcesPending(deduped.len());
                    accepted = std::mem::take(&mut deduped);
                    false
                }
            }
            ref state => {
                if !deduped.is_empty() {
                    tracing::debug!(%id, ?state, "sub-resources not started");
                }
                false
            }
        })?;

        Ok(accepted)
    }

    /// Append a fetched sub-resource and count it down.
    /// A no-op with a warning for entities that are already terminal.
    pub fn merge_sub_resource(
        &self,
        id: EntityId,
        record: SubResourceRecord,
    ) -> Result<LifecycleState, LedgerError> {
        self.mutate(id, move |entity| {
            let LifecycleState::SubResourcesPending(pending) = entity.lifecycle_state else {
                tracing::warn!(
                    %id,
                    state = ?entity.lifecycle_state,
                    name = %record.name,
                    "sub-resource merge ignored"
                );
                return false;
            };
            if !entity.add_sub_resource(record) {
                tracing::debug!(%id, "duplicate sub-resource name, keeping first");
            }
            Self::count_down(entity, pending)
        })
    }

    /// Count down a sub-resource that could not be fetched. The entity keeps
    /// going and the failure lands in the manifest.
    pub fn record_sub_resource_failure(
        &self,
        id: EntityId,
        url: &str,
        reason: String,
    ) -> Result<LifecycleState, LedgerError> {
        let mut counted = false;
        let state = self.mutate(id, |entity| {
            let LifecycleState::SubResourcesPending(pending) = entity.lifecycle_state else {
                tracing::warn!(%id, url, state = ?entity.lifecycle_state, "sub-resource failure ignored");
                return false;
            };
            counted = true;
            Self::count_down(entity, pending)
        })?;

        if counted {
            tracing::warn!(%id, url, %reason, "sub-resource unavailable");
            self.sub_resource_failures.lock().push(SubResourceFailure {
                id,
                url: url.to_string(),
                reason,
            });
        }
        Ok(state)
    }

    /// Move a non-terminal entity to `Failed`. Terminal entities are untouched.
    pub fn mark_failed(&self, id: EntityId, reason: &str) -> Result<LifecycleState, LedgerError> {
        self.mutate(id, |entity| {
            if entity.lifecycle_state.is_terminal() {
                tracing::debug!(%id, state = ?entity.lifecycle_state, "already terminal, not failing");
                return false;
            }
            tracing::warn!(%id, %reason, "entity failed");
            entity.lifecycle_state = LifecycleState::Failed;
            self.failure_reasons.insert(id, reason.to_string());
            true
        })
    }

    fn count_down(entity: &mut EntityRecord, pending: usize) -> bool {
        let remaining = pending.saturating_sub(1);
        if remaining == 0 {
            entity.lifecycle_state = LifecycleState::Complete;
            true
        } else {
            entity.lifecycle_state = LifecycleState::SubResourcesPending(remaining);
            false
        }
    }

    /// Run `f` with exclusive access to one record. `f` returns true when it
    /// moved the record into a terminal state.
    fn mutate<F>(&self, id: EntityId, f: F) -> Result<LifecycleState, LedgerError>
    where
        F: FnOnce(&mut EntityRecord) -> bool,
    {
        let mut entry = self
            .entities
            .get_mut(&id)
            .ok_or(LedgerError::UnknownEntity(id))?;

        if self.is_sealed() {
            tracing::debug!(%id, "ledger sealed, ignoring mutation");
            return Ok(entry.lifecycle_state.clone());
        }

        let became_terminal = f(entry.value_mut());
        let state = entry.lifecycle_state.clone();
        drop(entry);

        if became_terminal {
            self.settle_one();
        }
        Ok(state)
    }

    fn settle_one(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Number of entities still outside `{Complete, Failed}`
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Resolve once no entity remains outside `{Complete, Failed}`
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Freeze the ledger; every later mutation is ignored
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    pub fn state_of(&self, id: EntityId) -> Option<LifecycleState> {
        self.entities.get(&id).map(|e| e.lifecycle_state.clone())
    }

    pub fn get(&self, id: EntityId) -> Option<EntityRecord> {
        self.entities.get(&id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn counts(&self) -> LedgerCounts {
        let mut counts = LedgerCounts::default();
        for entry in self.entities.iter() {
            match entry.lifecycle_state {
                LifecycleState::Discovered => counts.discovered += 1,
                LifecycleState::Complete => counts.complete += 1,
                LifecycleState::Failed => counts.failed += 1,
                _ => counts.in_progress += 1,
            }
        }
        counts
    }

    /// Complete entities sorted ascending by id
    pub fn snapshot_complete(&self) -> Vec<EntityRecord> {
        let mut complete: Vec<EntityRecord> = self
            .entities
            .iter()
            .filter(|e| e.lifecycle_state == LifecycleState::Complete)
            .map(|e| e.value().clone())
            .collect();
        complete.sort_by_key(|e| e.id);
        complete
    }

    /// Failed entities plus degraded sub-resources, sorted by id. Entities that
    /// never reached a terminal state are reported as cancelled.
    pub fn failure_manifest(&self) -> FailureManifest {
        let mut entities: Vec<EntityFailure> = self
            .entities
            .iter()
            .filter(|e| e.lifecycle_state != LifecycleState::Complete)
            .map(|e| {
                let reason = self
                    .failure_reasons
                    .get(e.key())
                    .map(|r| r.value().clone())
                    .unwrap_or_else(|| CANCELLED_REASON.to_string());
                EntityFailure { id: *e.key(), reason }
            })
            .collect();
        entities.sort_by_key(|f| f.id);

        let mut sub_resources = self.sub_resource_failures.lock().clone();
        sub_resources.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.url.cmp(&b.url)));

        FailureManifest {
            entities,
            sub_resources,
        }
    }
}
