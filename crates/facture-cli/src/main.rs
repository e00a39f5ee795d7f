//! CLI application for vendor invoice ingestion and extraction.

mod commands;
mod store;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{backfill, config, ingest, templates};

/// facture - Extract structured data from vendor invoice PDFs
#[derive(Parser)]
#[command(name = "facture")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Directory holding stores and uploads
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a single invoice PDF
    Ingest(ingest::IngestArgs),

    /// Ingest a directory of historical invoice PDFs
    Backfill(backfill::BackfillArgs),

    /// Manage vendor templates
    Templates(templates::TemplatesArgs),

    /// Manage configuration
    Config(config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let data_dir = cli
        .data_dir
        .unwrap_or_else(store::default_data_dir);

    // Execute command
    match cli.command {
        Commands::Ingest(args) => ingest::run(args, cli.config.as_deref(), &data_dir).await,
        Commands::Backfill(args) => backfill::run(args, cli.config.as_deref(), &data_dir).await,
        Commands::Templates(args) => templates::run(args, &data_dir).await,
        Commands::Config(args) => config::run(args).await,
    }
}
