//! Backfill command - ingest a batch of historical invoice PDFs.
//!
//! Besides filling the invoice store, a backfill seeds the learning loops:
//! every extracted document can leave behind a vendor template and SKU
//! categories that later ingests pick up.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::Args;
use console::style;
use futures_util::StreamExt;
use futures_util::stream;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, warn};

use facture_core::{IngestionPipeline, PersistedInvoice};

use crate::store::LocalStore;

/// Hard ceiling on parallel workers, to stay inside external service rate
/// limits.
const MAX_JOBS: usize = 10;

/// Arguments for the backfill command.
#[derive(Args)]
pub struct BackfillArgs {
    /// Input files or glob pattern
    #[arg(required = true)]
    input: String,

    /// Organization the invoices belong to
    #[arg(long, default_value = "default")]
    org: String,

    /// User recorded as the uploader
    #[arg(long, default_value = "backfill")]
    user: String,

    /// Number of parallel workers
    #[arg(short = 'j', long, default_value = "4")]
    jobs: usize,

    /// Also generate a summary CSV
    #[arg(long)]
    summary: bool,

    /// Continue on error
    #[arg(long)]
    continue_on_error: bool,
}

/// Result of ingesting a single file.
struct IngestResult {
    path: PathBuf,
    receipts: Vec<PersistedInvoice>,
    error: Option<String>,
    processing_time_ms: u64,
}

pub async fn run(
    args: BackfillArgs,
    config_path: Option<&str>,
    data_dir: &Path,
) -> anyhow::Result<()> {
    let start = Instant::now();

    let config = super::config::load_config(config_path)?;

    // Expand glob pattern
    let files: Vec<PathBuf> = glob(&args.input)?
        .filter_map(|r| r.ok())
        .filter(|p| {
            let ext = p.extension().and_then(|e| e.to_str()).unwrap_or("");
            ext.eq_ignore_ascii_case("pdf")
        })
        .collect();

    if files.is_empty() {
        anyhow::bail!("No matching PDF files found for pattern: {}", args.input);
    }

    println!(
        "{} Found {} files to ingest",
        style("ℹ").blue(),
        files.len()
    );

    let store = Arc::new(LocalStore::open(data_dir)?);
    let services = super::ingest::build_services(&config, store);
    let pipeline = IngestionPipeline::new(config, services);

    let overall_pb = ProgressBar::new(files.len() as u64);
    overall_pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files")
            .unwrap()
            .progress_chars("=>-"),
    );

    // Ingest with a bounded worker pool. Each file is independent, so
    // completions are collected as they arrive.
    let jobs = args.jobs.clamp(1, MAX_JOBS);
    let mut completions = stream::iter(files)
        .map(|path| {
            let pipeline = &pipeline;
            let args = &args;
            async move {
                let file_start = Instant::now();
                let result = pipeline.ingest_file(&path, &args.org, &args.user).await;
                (path, result, file_start.elapsed().as_millis() as u64)
            }
        })
        .buffer_unordered(jobs);

    let mut results = Vec::new();

    while let Some((path, result, processing_time_ms)) = completions.next().await {
        match result {
            Ok(receipts) => {
                results.push(IngestResult {
                    path,
                    receipts,
                    error: None,
                    processing_time_ms,
                });
            }
            Err(e) => {
                let error_msg = e.to_string();
                if args.continue_on_error {
                    warn!("Failed to ingest {}: {}", path.display(), error_msg);
                    results.push(IngestResult {
                        path,
                        receipts: Vec::new(),
                        error: Some(error_msg),
                        processing_time_ms,
                    });
                } else {
                    error!("Failed to ingest {}: {}", path.display(), error_msg);
                    anyhow::bail!("Backfill failed: {}", error_msg);
                }
            }
        }

        overall_pb.inc(1);
    }

    overall_pb.finish_with_message("Complete");

    results.sort_by(|a, b| a.path.cmp(&b.path));

    // Generate summary if requested
    if args.summary {
        let summary_path = PathBuf::from("summary.csv");
        write_summary(&summary_path, &results)?;
        println!(
            "{} Summary written to {}",
            style("✓").green(),
            summary_path.display()
        );
    }

    // Print summary
    let successful: Vec<_> = results.iter().filter(|r| r.error.is_none()).collect();
    let failed: Vec<_> = results.iter().filter(|r| r.error.is_some()).collect();
    let invoices: usize = results.iter().map(|r| r.receipts.len()).sum();

    println!();
    println!(
        "{} Ingested {} files in {:?}",
        style("✓").green(),
        results.len(),
        start.elapsed()
    );
    println!(
        "   {} successful, {} failed, {} invoices persisted",
        style(successful.len()).green(),
        style(failed.len()).red(),
        style(invoices).cyan()
    );

    if !failed.is_empty() {
        println!();
        println!("{}", style("Failed files:").red());
        for result in &failed {
            println!(
                "  - {}: {}",
                result.path.display(),
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

fn write_summary(path: &Path, results: &[IngestResult]) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "filename",
        "status",
        "invoice_id",
        "invoice_number",
        "vendor_name",
        "total_amount",
        "line_items",
        "processing_time_ms",
        "error",
    ])?;

    for result in results {
        let filename = result
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("");

        if let Some(error) = &result.error {
            wtr.write_record([
                filename,
                "error",
                "",
                "",
                "",
                "",
                "",
                &result.processing_time_ms.to_string(),
                error,
            ])?;
        } else {
            // One row per extracted invoice: a multi-invoice PDF yields
            // several rows with the same filename.
            for receipt in &result.receipts {
                wtr.write_record([
                    filename,
                    "success",
                    &receipt.id,
                    &receipt.invoice_number,
                    &receipt.vendor_name,
                    &receipt.total_amount.to_string(),
                    &receipt.line_item_count.to_string(),
                    &result.processing_time_ms.to_string(),
                    "",
                ])?;
            }
        }
    }

    wtr.flush()?;
    Ok(())
}
