//! Ingest command - run one PDF through the extraction pipeline.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};

use facture_core::{
    Collaborators, ExpenseOcr, HttpExpenseOcr, HttpLanguageModel, IngestionPipeline,
    LanguageModel, PersistedInvoice, PipelineConfig,
};

use crate::store::LocalStore;

/// Arguments for the ingest command.
#[derive(Args)]
pub struct IngestArgs {
    /// Input PDF file
    #[arg(required = true)]
    input: PathBuf,

    /// Organization the invoices belong to
    #[arg(long, default_value = "default")]
    org: String,

    /// User recorded as the uploader
    #[arg(long, default_value = "cli")]
    user: String,

    /// Output file for receipts (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// Plain text summary
    Text,
    /// JSON receipts
    Json,
    /// CSV receipts
    Csv,
}

pub async fn run(
    args: IngestArgs,
    config_path: Option<&str>,
    data_dir: &Path,
) -> anyhow::Result<()> {
    let start = Instant::now();

    let config = super::config::load_config(config_path)?;

    // Check input file exists
    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    let extension = args
        .input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if extension != "pdf" {
        anyhow::bail!("Unsupported file format: {} (expected a PDF)", extension);
    }

    let store = Arc::new(LocalStore::open(data_dir)?);
    let services = build_services(&config, store);
    let pipeline = IngestionPipeline::new(config, services);

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap(),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(format!("Ingesting {}", args.input.display()));

    let receipts = pipeline
        .ingest_file(&args.input, &args.org, &args.user)
        .await;

    pb.finish_and_clear();
    let receipts = receipts?;

    // Format output
    let output = format_receipts(&receipts, args.format)?;

    // Write output
    if let Some(output_path) = &args.output {
        fs::write(output_path, &output)?;
        println!(
            "{} Receipts written to {}",
            style("✓").green(),
            output_path.display()
        );
    } else {
        println!("{}", output);
    }

    println!(
        "{} Ingested {} invoice(s) from {} in {:?}",
        style("✓").green(),
        receipts.len(),
        args.input.display(),
        start.elapsed()
    );

    debug!("Total processing time: {:?}", start.elapsed());

    Ok(())
}

/// Wire the service bundle: local stores plus whichever remote tiers the
/// configuration enables.
pub(crate) fn build_services(config: &PipelineConfig, store: Arc<LocalStore>) -> Collaborators {
    let model: Option<Arc<dyn LanguageModel>> = match HttpLanguageModel::from_config(&config.model)
    {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!("Model extraction tiers disabled: {}", e);
            None
        }
    };

    let ocr: Option<Arc<dyn ExpenseOcr>> = if config.ocr.endpoint.is_empty() {
        debug!("Expense OCR endpoint not configured, tier disabled");
        None
    } else {
        match HttpExpenseOcr::from_config(&config.ocr) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!("Expense OCR tier disabled: {}", e);
                None
            }
        }
    };

    Collaborators {
        model,
        ocr,
        files: store.clone(),
        templates: store.clone(),
        mappings: store.clone(),
        sink: store,
    }
}

fn format_receipts(receipts: &[PersistedInvoice], format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(receipts)?),
        OutputFormat::Csv => format_csv(receipts),
        OutputFormat::Text => Ok(format_text(receipts)),
    }
}

fn format_csv(receipts: &[PersistedInvoice]) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "id",
        "invoice_number",
        "vendor_name",
        "total_amount",
        "line_items",
    ])?;

    for receipt in receipts {
        wtr.write_record([
            &receipt.id,
            &receipt.invoice_number,
            &receipt.vendor_name,
            &receipt.total_amount.to_string(),
            &receipt.line_item_count.to_string(),
        ])?;
    }

    let data = String::from_utf8(wtr.into_inner()?)?;
    Ok(data)
}

fn format_text(receipts: &[PersistedInvoice]) -> String {
    let mut output = String::new();

    for receipt in receipts {
        let number = if receipt.invoice_number.is_empty() {
            "(no number)"
        } else {
            receipt.invoice_number.as_str()
        };
        let vendor = if receipt.vendor_name.is_empty() {
            "(unknown vendor)"
        } else {
            receipt.vendor_name.as_str()
        };

        output.push_str(&format!("Invoice: {}\n", number));
        output.push_str(&format!("  Vendor: {}\n", vendor));
        output.push_str(&format!("  Total:  {}\n", receipt.total_amount));
        output.push_str(&format!("  Lines:  {}\n", receipt.line_item_count));
        output.push_str(&format!("  Stored: {}\n", receipt.id));
    }

    output
}
