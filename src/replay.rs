//! Offline transport that serves pre-extracted pages.
//!
//! Used by the test suite and by `crawl --replay <fixture.json>` to run the
//! engine against a recorded site without touching the network.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::metrics::PeakGauge;
use crate::network::FetchError;
use crate::transport::{Extraction, FetchPurpose, Transport};

/// Failure to return for a scripted URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptedFailure {
    Timeout,
    HttpStatus { status: u16 },
    ConnectionFailed { message: String },
}

impl From<&ScriptedFailure> for FetchError {
    fn from(failure: &ScriptedFailure) -> Self {
        match failure {
            ScriptedFailure::Timeout => FetchError::Timeout,
            ScriptedFailure::HttpStatus { status } => FetchError::HttpStatus(*status),
            ScriptedFailure::ConnectionFailed { message } => FetchError::ConnectionFailed(message.clone()),
        }
    }
}

/// Serialized form of a replay fixture
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayFixture {
    #[serde(default)]
    pub pages: BTreeMap<String, Extraction>,
    #[serde(default)]
    pub failures: BTreeMap<String, ScriptedFailure>,
    #[serde(default)]
    pub latency_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid replay fixture: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Transport answering from an in-memory map. Unknown URLs get HTTP 404.
#[derive(Default)]
pub struct ScriptedTransport {
    pages: BTreeMap<String, Extraction>,
    failures: BTreeMap<String, ScriptedFailure>,
    latency: Duration,
    log: Mutex<Vec<(String, FetchPurpose)>>,
    concurrency: PeakGauge,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: ReplayFixture) -> Self {
        Self {
            pages: fixture.pages,
            failures: fixture.failures,
            latency: Duration::from_millis(fixture.latency_ms),
            ..Self::default()
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ReplayError> {
        let raw = std::fs::read_to_string(path)?;
        let fixture: ReplayFixture = serde_json::from_str(&raw)?;
        Ok(Self::from_fixture(fixture))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn add_page(&mut self, url: &str, extraction: Extraction) {
        self.pages.insert(url.to_string(), extraction);
    }

    pub fn add_failure(&mut self, url: &str, failure: ScriptedFailure) {
        self.failures.insert(url.to_string(), failure);
    }

    /// Every fetch served so far, in arrival order
    pub fn fetch_log(&self) -> Vec<(String, FetchPurpose)> {
        self.log.lock().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.log.lock().len()
    }

    /// How often `url` was fetched
    pub fn fetches_of(&self, url: &str) -> usize {
        self.log.lock().iter().filter(|(u, _)| u == url).count()
    }

    /// Highest number of fetches that were being served at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.concurrency.peak()
    }
}

struct Serving<'a>(&'a PeakGauge);

impl Drop for Serving<'_> {
    fn drop(&mut self) {
        self.0.dec();
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, url: &str, purpose: FetchPurpose) -> Result<Extraction, FetchError> {
        self.concurrency.inc();
        let _serving = Serving(&self.concurrency);
        self.log.lock().push((url.to_string(), purpose));

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(failure) = self.failures.get(url) {
            return Err(failure.into());
        }
        self.pages
            .get(url)
            .cloned()
            .ok_or(FetchError::HttpStatus(404))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_serves_pages_failures_and_404() {
        let mut transport = ScriptedTransport::new();
        transport.add_page("https://dex.test/a", Extraction::new().with("name", "A"));
        transport.add_failure("https://dex.test/b", ScriptedFailure::Timeout);

        let page = transport.fetch("https://dex.test/a", FetchPurpose::Detail).await.unwrap();
        assert_eq!(page.first("name"), Some("A"));
        assert_eq!(
            transport.fetch("https://dex.test/b", FetchPurpose::Detail).await,
            Err(FetchError::Timeout)
        );
        assert_eq!(
            transport.fetch("https://dex.test/c", FetchPurpose::Detail).await,
            Err(FetchError::HttpStatus(404))
        );
        assert_eq!(transport.fetch_count(), 3);
        assert_eq!(transport.fetches_of("https://dex.test/a"), 1);
    }

    #[test]
    fn test_load_fixture_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("site.json");
        std::fs::write(
            &path,
            r#"{
                "pages": {"https://dex.test/": {"values": {"title": ["Index"]}}},
                "failures": {"https://dex.test/x": {"kind": "http_status", "status": 503}},
                "latency_ms": 3
            }"#,
        )
        .unwrap();

        let transport = ScriptedTransport::load(&path).unwrap();
        assert_eq!(transport.pages.len(), 1);
        assert_eq!(
            transport.failures["https://dex.test/x"],
            ScriptedFailure::HttpStatus { status: 503 }
        );
        assert_eq!(transport.latency, Duration::from_millis(3));
    }

    #[test]
    fn test_invalid_fixture_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(ScriptedTransport::load(&path), Err(ReplayError::Parse(_))));
    }
}
