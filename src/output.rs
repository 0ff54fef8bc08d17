use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::metrics::FetchStats;
use crate::model::{EntityRecord, FailureManifest};

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// On-disk catalog format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// One JSON document holding entities, failures and the run summary
    Json,
    /// One entity per line; failures and summary go to a sibling `failures.json`
    Jsonl,
}

/// Totals for one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrawlSummary {
    pub index_url: String,
    pub complete: usize,
    pub failed: usize,
    pub degraded_sub_resources: usize,
    pub visited_urls: usize,
    pub cached_sub_resources: usize,
    pub cancelled: bool,
    pub duration_ms: u64,
    pub fetches: FetchStats,
}

impl std::fmt::Display for CrawlSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} complete, {} failed, {} degraded sub-resources in {}ms{}",
            self.complete,
            self.failed,
            self.degraded_sub_resources,
            self.duration_ms,
            if self.cancelled { " (cancelled)" } else { "" }
        )
    }
}

/// Result of one run: complete entities sorted by id plus the failure manifest
#[derive(Debug, Clone, Serialize)]
pub struct CrawlOutput {
    pub entities: Vec<EntityRecord>,
    pub failures: FailureManifest,
    pub summary: CrawlSummary,
}

#[derive(Serialize)]
struct ManifestDocument<'a> {
    failures: &'a FailureManifest,
    summary: &'a CrawlSummary,
}

/// Write the whole output as one pretty-printed JSON document
pub fn write_json<W: Write>(output: &CrawlOutput, writer: &mut W) -> Result<(), OutputError> {
    serde_json::to_writer_pretty(&mut *writer, output)?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Write entities as JSONL, one record per line
pub fn write_jsonl<'a, W, I>(entities: I, writer: &mut W) -> Result<(), OutputError>
where
    W: Write,
    I: IntoIterator<Item = &'a EntityRecord>,
{
    for entity in entities {
        serde_json::to_writer(&mut *writer, entity)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Write the failure manifest and summary as pretty JSON
pub fn write_manifest<W: Write>(output: &CrawlOutput, writer: &mut W) -> Result<(), OutputError> {
    let doc = ManifestDocument {
        failures: &output.failures,
        summary: &output.summary,
    };
    serde_json::to_writer_pretty(&mut *writer, &doc)?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Where the manifest goes for JSONL output
pub fn manifest_path(output_path: &Path) -> PathBuf {
    output_path
        .parent()
        .map(|dir| dir.join("failures.json"))
        .unwrap_or_else(|| PathBuf::from("failures.json"))
}

/// Write `output` to `path` in `format`. Returns the files written.
pub fn write_to_path(output: &CrawlOutput, path: &Path, format: OutputFormat) -> Result<Vec<PathBuf>, OutputError> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        std::fs::create_dir_all(dir)?;
    }

    let mut writer = BufWriter::new(File::create(path)?);
    match format {
        OutputFormat::Json => {
            write_json(output, &mut writer)?;
            writer.flush()?;
            Ok(vec![path.to_path_buf()])
        }
        OutputFormat::Jsonl => {
            write_jsonl(&output.entities, &mut writer)?;
            writer.flush()?;

            let manifest = manifest_path(path);
            let mut manifest_writer = BufWriter::new(File::create(&manifest)?);
            write_manifest(output, &mut manifest_writer)?;
            manifest_writer.flush()?;
            Ok(vec![path.to_path_buf(), manifest])
        }
    }
}
