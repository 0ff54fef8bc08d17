use catalog_crawler::cli::{Cli, Commands, CrawlArgs};
use catalog_crawler::extract::{ExtractError, ExtractionProfiles};
use catalog_crawler::http_transport::HttpTransport;
use catalog_crawler::logging::init_logging;
use catalog_crawler::network::{FetchError, HttpClient};
use catalog_crawler::orchestrator::{CatalogCrawler, CrawlError};
use catalog_crawler::output::{OutputError, write_to_path};
use catalog_crawler::replay::{ReplayError, ScriptedTransport};
use catalog_crawler::transport::Transport;
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum MainError {
    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] FetchError),

    #[error("Profile error: {0}")]
    Profiles(#[from] ExtractError),

    #[error("Replay error: {0}")]
    Replay(#[from] ReplayError),

    #[error("Crawl error: {0}")]
    Crawl(#[from] CrawlError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),
}

impl MainError {
    fn exit_code(&self) -> u8 {
        match self {
            MainError::Crawl(CrawlError::Index { .. }) | MainError::Crawl(CrawlError::EmptyIndex(_)) => 4,
            _ => 3,
        }
    }
}

fn build_transport(args: &CrawlArgs) -> Result<Arc<dyn Transport>, MainError> {
    if let Some(fixture) = &args.replay {
        tracing::info!(fixture = %fixture.display(), "replaying recorded pages");
        return Ok(Arc::new(ScriptedTransport::load(fixture)?));
    }

    let profiles = match &args.profiles {
        Some(path) => ExtractionProfiles::load(path)?,
        None => ExtractionProfiles::default(),
    };
    let http = HttpClient::new(args.user_agent.clone(), args.timeout)?;
    Ok(Arc::new(HttpTransport::new(http, &profiles)?))
}

/// First Ctrl+C cancels the crawl (draining or abandoning per config).
/// A second Ctrl+C exits immediately.
fn spawn_shutdown_handler() -> watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Received Ctrl+C, cancelling crawl. Press Ctrl+C again to force quit");
            let _ = shutdown_tx.send(true);

            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nForce quit requested, exiting immediately...");
                std::process::exit(130);
            }
        }
    });

    shutdown_rx
}

async fn run_crawl(args: CrawlArgs) -> Result<(), MainError> {
    init_logging(args.log_dir.as_deref()).map_err(|e| MainError::Logging(e.to_string()))?;

    let config = args.crawl_config();
    let transport = build_transport(&args)?;
    let crawler = CatalogCrawler::new(config, transport)?;

    tracing::info!(
        index_url = %args.index_url,
        concurrency = args.concurrency,
        timeout_secs = args.timeout,
        "starting crawl"
    );

    let shutdown = spawn_shutdown_handler();
    let output = crawler.run(&args.index_url, shutdown).await?;

    let written = write_to_path(&output, &args.output, args.format)?;
    for path in &written {
        tracing::info!(path = %path.display(), "wrote output");
    }
    println!(
        "{} entities, {} failed, {} degraded sub-resources -> {}",
        output.summary.complete,
        output.summary.failed,
        output.summary.degraded_sub_resources,
        args.output.display()
    );
    Ok(())
}

fn print_profiles() -> Result<(), MainError> {
    println!("{}", ExtractionProfiles::default().to_json()?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let result = match cli.command {
        Commands::Crawl(args) => run_crawl(args).await,
        Commands::Profiles => print_profiles(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "crawl failed");
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
