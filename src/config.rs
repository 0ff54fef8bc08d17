// Global configuration constants plus the per-run crawl configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::orchestrator::CrawlError;

pub struct Config;

impl Config {
    // Scheduling
    pub const CONCURRENCY_CAP: usize = 16;
    pub const PROGRESS_INTERVAL_SECS: u64 = 10;
    pub const DRAIN_TIMEOUT_SECS: u64 = 10;

    // HTTP/Network config
    pub const TIMEOUT_SECS: u64 = 20;
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;
    pub const MAX_CONTENT_SIZE: usize = 10 * 1024 * 1024; // 10MB
    pub const MAX_RETRIES: u32 = 2;
    pub const RETRY_BACKOFF_MS: u64 = 500;
    pub const POOL_IDLE_PER_HOST: usize = 16;
    pub const POOL_IDLE_TIMEOUT_SECS: u64 = 30;
    pub const USER_AGENT: &'static str = "CatalogCrawler/0.1";

    // Normalization: source heights are meters, catalog heights centimeters
    pub const HEIGHT_UNIT_SCALE: f64 = 100.0;
    pub const HEIGHT_ATTRIBUTE: &'static str = "height";

    // Detail-page link groups folded as sub-resources
    pub const SUB_RESOURCE_LABEL: &'static str = "abilities";
}

/// What happens to in-flight fetches when a crawl is cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CancelMode {
    /// Stop dispatching and wait (up to the drain timeout) for running fetches
    Drain,
    /// Abort running fetches immediately
    Abandon,
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub concurrency_cap: usize,
    /// Detail-page link groups whose targets are fetched as sub-resources
    pub sub_resource_labels: BTreeSet<String>,
    /// Multiplier applied to normalized height values
    pub target_height_unit_scale: f64,
    pub height_attribute: String,
    pub cancel_mode: CancelMode,
    pub drain_timeout: Duration,
    pub max_duration: Option<Duration>,
    pub progress_interval: Duration,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            concurrency_cap: Config::CONCURRENCY_CAP,
            sub_resource_labels: BTreeSet::from([Config::SUB_RESOURCE_LABEL.to_string()]),
            target_height_unit_scale: Config::HEIGHT_UNIT_SCALE,
            height_attribute: Config::HEIGHT_ATTRIBUTE.to_string(),
            cancel_mode: CancelMode::Drain,
            drain_timeout: Duration::from_secs(Config::DRAIN_TIMEOUT_SECS),
            max_duration: None,
            progress_interval: Duration::from_secs(Config::PROGRESS_INTERVAL_SECS),
        }
    }
}

impl CrawlConfig {
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.concurrency_cap == 0 {
            return Err(CrawlError::InvalidConfig("concurrency cap must be greater than zero".to_string()));
        }
        if !self.target_height_unit_scale.is_finite() || self.target_height_unit_scale <= 0.0 {
            return Err(CrawlError::InvalidConfig(format!(
                "height unit scale must be a positive number, got {}",
                self.target_height_unit_scale
            )));
        }
        if self.progress_interval.is_zero() {
            return Err(CrawlError::InvalidConfig("progress interval must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CrawlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.concurrency_cap, 16);
        assert!(config.sub_resource_labels.contains("abilities"));
        assert_eq!(config.cancel_mode, CancelMode::Drain);
    }

    #[test]
    fn test_zero_cap_rejected() {
        let config = CrawlConfig {
            concurrency_cap: 0,
            ..CrawlConfig::default()
        };
        assert!(matches!(config.validate(), Err(CrawlError::InvalidConfig(_))));
    }

    #[test]
    fn test_bad_scale_rejected() {
        for scale in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = CrawlConfig {
                target_height_unit_scale: scale,
                ..CrawlConfig::default()
            };
            assert!(config.validate().is_err());
        }
    }
}
