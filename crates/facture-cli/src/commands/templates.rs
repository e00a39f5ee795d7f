//! Templates command - inspect and import vendor templates.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Subcommand};
use console::style;

use facture_core::{TemplateRepository, TemplateStore, VendorTemplate, vendor_key};

use crate::store::LocalStore;

/// Arguments for the templates command.
#[derive(Args)]
pub struct TemplatesArgs {
    #[command(subcommand)]
    command: TemplatesCommand,
}

#[derive(Subcommand)]
enum TemplatesCommand {
    /// List stored templates for an organization
    List {
        /// Organization identifier
        #[arg(long, default_value = "default")]
        org: String,
    },

    /// Show one stored template as JSON
    Show {
        /// Vendor name or key
        vendor: String,

        /// Organization identifier
        #[arg(long, default_value = "default")]
        org: String,
    },

    /// Import a template from a JSON file
    Import {
        /// Template JSON file
        file: PathBuf,

        /// Organization identifier
        #[arg(long, default_value = "default")]
        org: String,
    },

    /// Delete a stored template
    Delete {
        /// Vendor name or key
        vendor: String,

        /// Organization identifier
        #[arg(long, default_value = "default")]
        org: String,
    },
}

pub async fn run(args: TemplatesArgs, data_dir: &Path) -> anyhow::Result<()> {
    let store = Arc::new(LocalStore::open(data_dir)?);

    match args.command {
        TemplatesCommand::List { org } => list_templates(&store, &org).await,
        TemplatesCommand::Show { vendor, org } => show_template(&store, &org, &vendor).await,
        TemplatesCommand::Import { file, org } => import_template(store, &org, &file).await,
        TemplatesCommand::Delete { vendor, org } => delete_template(&store, &org, &vendor),
    }
}

async fn list_templates(store: &LocalStore, org: &str) -> anyhow::Result<()> {
    let templates = store.list_by_organization(org).await?;

    if templates.is_empty() {
        println!(
            "{} No templates stored for organization '{}'.",
            style("ℹ").blue(),
            org
        );
        return Ok(());
    }

    for template in &templates {
        let status = if template.is_usable() {
            style("usable").green()
        } else {
            style("incomplete").yellow()
        };
        println!(
            "{:<32} {:>2} keywords  {:>2} fields  {}",
            template.vendor,
            template.keywords.len(),
            template.fields.len(),
            status
        );
    }

    Ok(())
}

async fn show_template(store: &LocalStore, org: &str, vendor: &str) -> anyhow::Result<()> {
    let key = vendor_key(vendor);
    let templates = store.list_by_organization(org).await?;

    match templates.iter().find(|t| t.vendor == key) {
        Some(template) => {
            println!("{}", serde_json::to_string_pretty(template)?);
            Ok(())
        }
        None => anyhow::bail!(
            "No template stored for vendor '{}' in organization '{}'",
            vendor,
            org
        ),
    }
}

fn delete_template(store: &LocalStore, org: &str, vendor: &str) -> anyhow::Result<()> {
    let key = vendor_key(vendor);
    if store.delete_template(org, &key)? {
        println!(
            "{} Removed template for vendor '{}'",
            style("✓").green(),
            key
        );
        Ok(())
    } else {
        anyhow::bail!(
            "No template stored for vendor '{}' in organization '{}'",
            vendor,
            org
        )
    }
}

async fn import_template(store: Arc<LocalStore>, org: &str, file: &Path) -> anyhow::Result<()> {
    let content = fs::read_to_string(file)?;
    let template: VendorTemplate = serde_json::from_str(&content)?;
    let vendor = template.vendor.clone();

    let templates = TemplateStore::new(store, None);
    if templates.save(org, template, &vendor).await? {
        println!(
            "{} Imported template for vendor '{}'",
            style("✓").green(),
            vendor_key(&vendor)
        );
        Ok(())
    } else {
        anyhow::bail!(
            "Template in {} is not usable: it needs a vendor, at least one keyword and at least one field pattern",
            file.display()
        )
    }
}
