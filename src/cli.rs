use clap::{Args, Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{CancelMode, Config, CrawlConfig};
use crate::output::OutputFormat;

/// Command line front end for the catalog crawler.
/// Exit codes: 0=success, 2=invalid arguments, 3=I/O or config error, 4=index fetch error
#[derive(Parser, Debug)]
#[command(name = "catalog_crawler")]
#[command(about = "Crawl an entity catalog (index, detail and sub-resource pages) into structured records")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl a catalog starting from its index page and write the records.
    Crawl(CrawlArgs),

    /// Print the built-in extraction profiles as JSON, a starting point for --profiles.
    Profiles,
}

#[derive(Args, Debug, Clone)]
pub struct CrawlArgs {
    #[arg(short, long, help = "URL of the index page listing every entity")]
    pub index_url: String,

    #[arg(short, long, help = "File to write the catalog to")]
    pub output: PathBuf,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json, help = "Output format")]
    pub format: OutputFormat,

    #[arg(
        short,
        long,
        default_value_t = Config::CONCURRENCY_CAP,
        help = "Maximum fetches in flight across index, detail and sub-resource pages"
    )]
    pub concurrency: usize,

    #[arg(short, long, default_value_t = Config::TIMEOUT_SECS, help = "Request timeout in seconds")]
    pub timeout: u64,

    #[arg(
        short,
        long,
        default_value = Config::USER_AGENT,
        help = "User agent string for requests"
    )]
    pub user_agent: String,

    #[arg(
        long,
        default_value_t = Config::HEIGHT_UNIT_SCALE,
        help = "Multiplier applied to normalized heights (100 turns meters into centimeters)"
    )]
    pub height_scale: f64,

    #[arg(
        long = "sub-resource-label",
        help = "Detail-page link group to fetch as sub-resources (repeatable, default: abilities)"
    )]
    pub sub_resource_labels: Vec<String>,

    #[arg(long, help = "JSON file with extraction profiles (see the profiles command)")]
    pub profiles: Option<PathBuf>,

    #[arg(long, help = "Serve pages from a recorded fixture instead of the network")]
    pub replay: Option<PathBuf>,

    #[arg(long, help = "Stop the crawl after this many seconds")]
    pub max_duration: Option<u64>,

    #[arg(long, value_enum, default_value_t = CancelMode::Drain, help = "What happens to running fetches on cancellation")]
    pub cancel_mode: CancelMode,

    #[arg(
        long,
        default_value_t = Config::DRAIN_TIMEOUT_SECS,
        help = "Seconds to wait for running fetches when draining"
    )]
    pub drain_timeout: u64,

    #[arg(long, help = "Directory for rotated text and JSON log files")]
    pub log_dir: Option<PathBuf>,
}

impl CrawlArgs {
    pub fn crawl_config(&self) -> CrawlConfig {
        let defaults = CrawlConfig::default();
        let sub_resource_labels = if self.sub_resource_labels.is_empty() {
            defaults.sub_resource_labels.clone()
        } else {
            self.sub_resource_labels.iter().cloned().collect::<BTreeSet<_>>()
        };
        CrawlConfig {
            concurrency_cap: self.concurrency,
            sub_resource_labels,
            target_height_unit_scale: self.height_scale,
            cancel_mode: self.cancel_mode,
            drain_timeout: Duration::from_secs(self.drain_timeout),
            max_duration: self.max_duration.map(Duration::from_secs),
            ..defaults
        }
    }
}

impl Cli {
    /// On error, clap prints help and exits with code 2 (usage error).
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crawl(args: &[&str]) -> CrawlArgs {
        let mut argv = vec!["catalog_crawler", "crawl"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Crawl(args) => args,
            other => panic!("Expected Crawl command, got {:?}", other),
        }
    }

    #[test]
    fn test_crawl_command_minimal() {
        let args = crawl(&["--index-url", "https://dex.test/pokedex/all", "--output", "out.json"]);
        assert_eq!(args.index_url, "https://dex.test/pokedex/all");
        assert_eq!(args.format, OutputFormat::Json);
        assert_eq!(args.concurrency, 16);
        assert_eq!(args.timeout, 20);
        assert!(args.replay.is_none());

        let config = args.crawl_config();
        assert!(config.validate().is_ok());
        assert!(config.sub_resource_labels.contains("abilities"));
        assert_eq!(config.max_duration, None);
    }

    #[test]
    fn test_crawl_command_with_options() {
        let args = crawl(&[
            "--index-url",
            "https://dex.test/",
            "--output",
            "/tmp/catalog.jsonl",
            "--format",
            "jsonl",
            "--concurrency",
            "4",
            "--height-scale",
            "1",
            "--sub-resource-label",
            "abilities",
            "--sub-resource-label",
            "moves",
            "--max-duration",
            "90",
            "--cancel-mode",
            "abandon",
        ]);
        assert_eq!(args.format, OutputFormat::Jsonl);

        let config = args.crawl_config();
        assert_eq!(config.concurrency_cap, 4);
        assert_eq!(config.target_height_unit_scale, 1.0);
        assert_eq!(config.sub_resource_labels.len(), 2);
        assert_eq!(config.max_duration, Some(Duration::from_secs(90)));
        assert_eq!(config.cancel_mode, CancelMode::Abandon);
    }

    #[test]
    fn test_zero_concurrency_parses_but_fails_validation() {
        let args = crawl(&["--index-url", "https://dex.test/", "--output", "o.json", "--concurrency", "0"]);
        assert!(args.crawl_config().validate().is_err());
    }

    #[test]
    fn test_profiles_command() {
        let cli = Cli::try_parse_from(["catalog_crawler", "profiles"]).unwrap();
        assert!(matches!(cli.command, Commands::Profiles));
    }

    #[test]
    fn test_missing_required_arg() {
        let err = Cli::try_parse_from(["catalog_crawler", "crawl", "--output", "o.json"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_invalid_format_rejected() {
        let err = Cli::try_parse_from([
            "catalog_crawler",
            "crawl",
            "--index-url",
            "https://dex.test/",
            "--output",
            "o.csv",
            "--format",
            "csv",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn test_help_does_not_panic() {
        let err = Cli::try_parse_from(["catalog_crawler", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
