/// Tracing setup for the crawler binary.
///
/// Always logs compact lines to stdout. Given a log directory it also writes
/// daily-rotated `crawl.log` (text) and `crawl.json.log` (JSON) files through
/// non-blocking background writers.
use std::path::Path;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the filter from `RUST_LOG`, falling back to `info`
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Compact console output, typed for whichever stack it ends up on
fn stdout_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .compact()
        .with_filter(env_filter())
}

/// Initialize the global subscriber.
///
/// # Environment Variables
/// * `RUST_LOG` - Controls log level filtering (default: "info")
///   Examples:
///   - `RUST_LOG=catalog_crawler=debug` - debug output for the crawl engine
///   - `RUST_LOG=info,catalog_crawler::scheduler=trace` - trace every fetch
///
/// Fails if a global subscriber is already set or the log directory cannot be created.
pub fn init_logging(log_dir: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(log_path) = log_dir else {
        tracing_subscriber::registry().with(stdout_layer()).try_init()?;
        return Ok(());
    };

    std::fs::create_dir_all(log_path)?;

    let text_file_appender = tracing_appender::rolling::daily(log_path, "crawl.log");
    let (text_writer, text_guard) = tracing_appender::non_blocking(text_file_appender);

    let json_file_appender = tracing_appender::rolling::daily(log_path, "crawl.json.log");
    let (json_writer, json_guard) = tracing_appender::non_blocking(json_file_appender);

    let text_layer = fmt::layer()
        .with_writer(text_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(false)
        .compact()
        .with_filter(env_filter());

    let json_layer = fmt::layer()
        .json()
        .with_writer(json_writer)
        .with_target(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_filter(env_filter());

    tracing_subscriber::registry()
        .with(text_layer)
        .with(json_layer)
        .with(stdout_layer())
        .try_init()?;

    // Writers flush on guard drop; keep them for the life of the process
    Box::leak(Box::new(text_guard));
    Box::leak(Box::new(json_guard));

    tracing::debug!("Logs: {}/crawl.log, {}/crawl.json.log", log_path.display(), log_path.display());
    Ok(())
}
