pub mod cli;
pub mod config;
pub mod extract;
pub mod fields;
pub mod fold;
pub mod http_transport;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod network;
pub mod normalize;
pub mod orchestrator;
pub mod output;
pub mod replay;
pub mod resolver;
pub mod scheduler;
pub mod transport;

// Re-export main types for library usage
pub use config::{CancelMode, CrawlConfig};
pub use ledger::{CrawlLedger, LedgerCounts};
pub use model::{EntityFailure, EntityId, EntityRecord, FailureManifest, LifecycleState, SubResourceRecord};
pub use network::{FetchError, HttpClient};
pub use normalize::normalize_measurement;
pub use orchestrator::{CatalogCrawler, CrawlError};
pub use output::{CrawlOutput, CrawlSummary, OutputFormat};
pub use replay::ScriptedTransport;
pub use transport::{Extraction, FetchPurpose, Transport};
