//! Directory-backed stores, one JSON file per record.
//!
//! Gives the pipeline durable templates, mappings, invoices and uploads
//! without any remote infrastructure. Everything lives under one data
//! directory that can be inspected and versioned by hand.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use facture_core::{
    FieldMapping, FileStore, IngestContext, InvoiceRecord, InvoiceSink, MappingRepository,
    PersistedInvoice, ServiceError, StoredDocument, TemplateRepository, VendorTemplate,
};

type Result<T> = std::result::Result<T, ServiceError>;

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("facture")
}

/// All pipeline stores rooted in one directory.
pub struct LocalStore {
    root: PathBuf,
}

/// One persisted invoice on disk: the receipt plus everything behind it.
#[derive(Debug, Serialize, Deserialize)]
struct StoredInvoice {
    id: String,
    context: IngestContext,
    record: InvoiceRecord,
}

/// SKU categories per organization, learned from persisted invoices.
type SkuBook = HashMap<String, HashMap<String, String>>;

fn storage_err(e: impl std::fmt::Display) -> ServiceError {
    ServiceError::Storage(e.to_string())
}

/// Replace path-hostile characters so keys and vendor names become file
/// names.
fn sanitize(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

impl LocalStore {
    pub fn open(root: &Path) -> Result<Self> {
        for dir in ["files", "templates", "mappings", "invoices"] {
            fs::create_dir_all(root.join(dir)).map_err(storage_err)?;
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.join("files");
        for segment in key.split('/') {
            path.push(sanitize(segment));
        }
        path
    }

    fn organization_dir(&self, organization_id: &str) -> PathBuf {
        self.root.join("templates").join(sanitize(organization_id))
    }

    fn template_path(&self, organization_id: &str, vendor: &str) -> PathBuf {
        self.organization_dir(organization_id)
            .join(format!("{}.json", sanitize(vendor)))
    }

    fn mappings_path(&self, organization_id: &str) -> PathBuf {
        self.root
            .join("mappings")
            .join(format!("{}.json", sanitize(organization_id)))
    }

    fn skus_path(&self) -> PathBuf {
        self.root.join("skus.json")
    }

    fn load_mappings(&self, organization_id: &str) -> Result<Vec<FieldMapping>> {
        let path = self.mappings_path(organization_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).map_err(storage_err)?;
        serde_json::from_str(&content).map_err(storage_err)
    }

    fn save_mappings(&self, organization_id: &str, mappings: &[FieldMapping]) -> Result<()> {
        let content = serde_json::to_string_pretty(mappings).map_err(storage_err)?;
        fs::write(self.mappings_path(organization_id), content).map_err(storage_err)
    }

    fn load_skus(&self) -> Result<SkuBook> {
        let path = self.skus_path();
        if !path.exists() {
            return Ok(SkuBook::new());
        }
        let content = fs::read_to_string(&path).map_err(storage_err)?;
        serde_json::from_str(&content).map_err(storage_err)
    }

    fn save_skus(&self, skus: &SkuBook) -> Result<()> {
        let content = serde_json::to_string_pretty(skus).map_err(storage_err)?;
        fs::write(self.skus_path(), content).map_err(storage_err)
    }

    /// Remove one stored template. Returns whether a file was removed.
    pub fn delete_template(&self, organization_id: &str, vendor: &str) -> Result<bool> {
        let path = self.template_path(organization_id, vendor);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(storage_err)?;
        debug!(vendor, "removed template");
        Ok(true)
    }
}

#[async_trait]
impl FileStore for LocalStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<StoredDocument> {
        let path = self.file_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(storage_err)?;
        }
        fs::write(&path, data).map_err(storage_err)?;
        debug!(key, path = %path.display(), "stored file");
        Ok(StoredDocument {
            key: key.to_string(),
            url: format!("file://{}", path.display()),
        })
    }
}

#[async_trait]
impl TemplateRepository for LocalStore {
    async fn list_by_organization(&self, organization_id: &str) -> Result<Vec<VendorTemplate>> {
        let dir = self.organization_dir(organization_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut templates = Vec::new();
        for entry in fs::read_dir(&dir).map_err(storage_err)? {
            let entry = entry.map_err(storage_err)?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(entry.path()).map_err(storage_err)?;
            match serde_json::from_str::<VendorTemplate>(&content) {
                Ok(template) => templates.push(template),
                Err(e) => {
                    debug!(path = %entry.path().display(), "skipping unreadable template: {e}")
                }
            }
        }
        templates.sort_by(|a, b| a.vendor.cmp(&b.vendor));
        Ok(templates)
    }

    async fn upsert(&self, organization_id: &str, template: &VendorTemplate) -> Result<()> {
        let path = self.template_path(organization_id, &template.vendor);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(storage_err)?;
        }
        let content = serde_json::to_string_pretty(template).map_err(storage_err)?;
        fs::write(&path, content).map_err(storage_err)?;
        debug!(vendor = %template.vendor, "stored template");
        Ok(())
    }
}

#[async_trait]
impl MappingRepository for LocalStore {
    async fn list_for_vendor(
        &self,
        organization_id: &str,
        vendor: &str,
    ) -> Result<Vec<FieldMapping>> {
        let mut mappings: Vec<FieldMapping> = self
            .load_mappings(organization_id)?
            .into_iter()
            .filter(|m| m.vendor == vendor)
            .collect();
        mappings.sort_by(|a, b| a.field.cmp(&b.field));
        Ok(mappings)
    }

    async fn record(
        &self,
        organization_id: &str,
        vendor: &str,
        field: &str,
        raw_key: &str,
    ) -> Result<()> {
        let mut mappings = self.load_mappings(organization_id)?;
        match mappings
            .iter_mut()
            .find(|m| m.vendor == vendor && m.field == field)
        {
            Some(existing) => {
                existing.raw_key = raw_key.to_string();
                existing.use_count += 1;
                existing.last_used = Some(Utc::now());
            }
            None => mappings.push(FieldMapping::new(vendor, field, raw_key)),
        }
        self.save_mappings(organization_id, &mappings)
    }
}

#[async_trait]
impl InvoiceSink for LocalStore {
    async fn persist(
        &self,
        context: &IngestContext,
        record: &InvoiceRecord,
    ) -> Result<PersistedInvoice> {
        // Remember SKU categories carried by the record for future lookups.
        let mut skus = self.load_skus()?;
        let mut changed = false;
        for item in &record.line_items {
            if let (Some(sku), Some(category)) = (&item.sku, &item.category_code) {
                skus.entry(context.organization_id.clone())
                    .or_default()
                    .insert(sku.clone(), category.clone());
                changed = true;
            }
        }
        if changed {
            self.save_skus(&skus)?;
        }

        let id = format!("inv-{}", Utc::now().timestamp_micros());
        let stored = StoredInvoice {
            id: id.clone(),
            context: context.clone(),
            record: record.clone(),
        };
        let content = serde_json::to_string_pretty(&stored).map_err(storage_err)?;
        fs::write(self.root.join("invoices").join(format!("{id}.json")), content)
            .map_err(storage_err)?;

        Ok(PersistedInvoice {
            id,
            invoice_number: record.invoice_number.clone(),
            vendor_name: record.vendor_name.clone(),
            total_amount: record.total_amount,
            line_item_count: record.line_items.len(),
        })
    }

    async fn category_for_sku(&self, organization_id: &str, sku: &str) -> Result<Option<String>> {
        let skus = self.load_skus()?;
        Ok(skus
            .get(organization_id)
            .and_then(|book| book.get(sku))
            .cloned())
    }
}
