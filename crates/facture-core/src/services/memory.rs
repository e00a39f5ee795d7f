//! In-memory collaborators.
//!
//! Back the pipeline without any remote infrastructure. Used heavily in
//! tests and useful for embedding the pipeline in a host that brings its
//! own persistence later.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{
    FileStore, InvoiceSink, MappingRepository, Result, StoredDocument, TemplateRepository,
};
use crate::error::ServiceError;
use crate::models::{
    FieldMapping, IngestContext, InvoiceRecord, PersistedInvoice, VendorTemplate,
};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| ServiceError::Storage("poisoned lock".to_string()))
}

/// Blob store keeping everything in a map.
#[derive(Default)]
pub struct MemoryFileStore {
    base_url: String,
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self {
            base_url: "memory://files".to_string(),
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch stored bytes, for assertions.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.files.lock().ok()?.get(key).cloned()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.files.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<StoredDocument> {
        lock(&self.files)?.insert(key.to_string(), data.to_vec());
        Ok(StoredDocument {
            key: key.to_string(),
            url: format!("{}/{}", self.base_url, key),
        })
    }
}

/// Template repository keyed by (organization, vendor).
#[derive(Default)]
pub struct MemoryTemplateRepository {
    templates: Mutex<HashMap<(String, String), VendorTemplate>>,
}

impl MemoryTemplateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored templates across all organizations.
    pub fn len(&self) -> usize {
        self.templates.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TemplateRepository for MemoryTemplateRepository {
    async fn list_by_organization(&self, organization_id: &str) -> Result<Vec<VendorTemplate>> {
        let templates = lock(&self.templates)?;
        let mut found: Vec<VendorTemplate> = templates
            .iter()
            .filter(|((org, _), _)| org == organization_id)
            .map(|(_, template)| template.clone())
            .collect();
        found.sort_by(|a, b| a.vendor.cmp(&b.vendor));
        Ok(found)
    }

    async fn upsert(&self, organization_id: &str, template: &VendorTemplate) -> Result<()> {
        lock(&self.templates)?.insert(
            (organization_id.to_string(), template.vendor.clone()),
            template.clone(),
        );
        Ok(())
    }
}

/// Mapping repository keyed by (organization, vendor, field).
#[derive(Default)]
pub struct MemoryMappingRepository {
    mappings: Mutex<HashMap<(String, String, String), FieldMapping>>,
}

impl MemoryMappingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MappingRepository for MemoryMappingRepository {
    async fn list_for_vendor(
        &self,
        organization_id: &str,
        vendor: &str,
    ) -> Result<Vec<FieldMapping>> {
        let mappings = lock(&self.mappings)?;
        let mut found: Vec<FieldMapping> = mappings
            .iter()
            .filter(|((org, v, _), _)| org == organization_id && v == vendor)
            .map(|(_, mapping)| mapping.clone())
            .collect();
        found.sort_by(|a, b| a.field.cmp(&b.field));
        Ok(found)
    }

    async fn record(
        &self,
        organization_id: &str,
        vendor: &str,
        field: &str,
        raw_key: &str,
    ) -> Result<()> {
        let mut mappings = lock(&self.mappings)?;
        let key = (
            organization_id.to_string(),
            vendor.to_string(),
            field.to_string(),
        );
        match mappings.get_mut(&key) {
            Some(existing) => {
                existing.raw_key = raw_key.to_string();
                existing.use_count += 1;
                existing.last_used = Some(Utc::now());
            }
            None => {
                mappings.insert(key, FieldMapping::new(vendor, field, raw_key));
            }
        }
        Ok(())
    }
}

/// Invoice sink collecting records in order, with a SKU category memory
/// learned from what it persists.
#[derive(Default)]
pub struct MemoryInvoiceSink {
    records: Mutex<Vec<(IngestContext, InvoiceRecord)>>,
    categories: Mutex<HashMap<(String, String), String>>,
}

impl MemoryInvoiceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a SKU category, as if learned from an earlier invoice.
    pub fn seed_category(&self, organization_id: &str, sku: &str, category: &str) {
        if let Ok(mut categories) = self.categories.lock() {
            categories.insert(
                (organization_id.to_string(), sku.to_string()),
                category.to_string(),
            );
        }
    }

    /// Persisted records, for assertions.
    pub fn records(&self) -> Vec<InvoiceRecord> {
        self.records
            .lock()
            .map(|r| r.iter().map(|(_, record)| record.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of persisted records.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl InvoiceSink for MemoryInvoiceSink {
    async fn persist(
        &self,
        context: &IngestContext,
        record: &InvoiceRecord,
    ) -> Result<PersistedInvoice> {
        // Remember SKU categories carried by the record for future lookups.
        {
            let mut categories = lock(&self.categories)?;
            for item in &record.line_items {
                if let (Some(sku), Some(category)) = (&item.sku, &item.category_code) {
                    categories.insert(
                        (context.organization_id.clone(), sku.clone()),
                        category.clone(),
                    );
                }
            }
        }

        let mut records = lock(&self.records)?;
        records.push((context.clone(), record.clone()));
        Ok(PersistedInvoice {
            id: format!("inv-{:04}", records.len()),
            invoice_number: record.invoice_number.clone(),
            vendor_name: record.vendor_name.clone(),
            total_amount: record.total_amount,
            line_item_count: record.line_items.len(),
        })
    }

    async fn category_for_sku(&self, organization_id: &str, sku: &str) -> Result<Option<String>> {
        let categories = lock(&self.categories)?;
        Ok(categories
            .get(&(organization_id.to_string(), sku.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let store = MemoryFileStore::new();
        let stored = store.put("org/upload.pdf", b"%PDF-").await.unwrap();
        assert_eq!(stored.key, "org/upload.pdf");
        assert!(stored.url.ends_with("org/upload.pdf"));
        assert_eq!(store.get("org/upload.pdf").unwrap(), b"%PDF-");
    }

    #[tokio::test]
    async fn test_template_upsert_replaces() {
        let repo = MemoryTemplateRepository::new();
        let mut template = VendorTemplate {
            vendor: "acme foods".to_string(),
            keywords: vec!["Acme".to_string()],
            ..VendorTemplate::default()
        };
        repo.upsert("org-1", &template).await.unwrap();

        template.keywords.push("Foods".to_string());
        repo.upsert("org-1", &template).await.unwrap();

        let listed = repo.list_by_organization("org-1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].keywords.len(), 2);

        assert!(repo.list_by_organization("org-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mapping_record_increments_use_count() {
        let repo = MemoryMappingRepository::new();
        repo.record("org-1", "acme foods", "deposit_amount", "AMOUNT_PAID")
            .await
            .unwrap();
        repo.record("org-1", "acme foods", "deposit_amount", "AMOUNT_PAID")
            .await
            .unwrap();

        let mappings = repo.list_for_vendor("org-1", "acme foods").await.unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].use_count, 2);
        assert!(mappings[0].last_used.is_some());
    }

    #[tokio::test]
    async fn test_sink_learns_categories() {
        let sink = MemoryInvoiceSink::new();
        let context = IngestContext {
            organization_id: "org-1".to_string(),
            user_id: "user-1".to_string(),
            original_filename: "upload.pdf".to_string(),
            source_key: "org-1/upload.pdf".to_string(),
        };
        let mut record = InvoiceRecord::default();
        record.line_items.push(crate::models::LineItem {
            sku: Some("FL-25".to_string()),
            description: "Flour 25lb".to_string(),
            category_code: Some("BAKERY".to_string()),
            ..crate::models::LineItem::default()
        });

        let receipt = sink.persist(&context, &record).await.unwrap();
        assert_eq!(receipt.id, "inv-0001");
        assert_eq!(
            sink.category_for_sku("org-1", "FL-25").await.unwrap(),
            Some("BAKERY".to_string())
        );
        assert_eq!(sink.category_for_sku("org-2", "FL-25").await.unwrap(), None);
    }
}
