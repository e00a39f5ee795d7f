//! External collaborators behind the pipeline.
//!
//! Every remote the pipeline talks to sits behind a trait so extraction
//! logic can be exercised against in-memory fakes. HTTP-backed
//! implementations live in [`llm`] and [`ocr`]; in-memory implementations
//! live in [`memory`].

pub mod llm;
pub mod memory;
pub mod ocr;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::models::{FieldMapping, IngestContext, InvoiceRecord, PersistedInvoice, VendorTemplate};

pub use llm::HttpLanguageModel;
pub use ocr::{ExpenseDocument, ExpenseField, ExpenseLineItem, HttpExpenseOcr};

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Which model tier a completion is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// The everyday model.
    Standard,
    /// The stronger model used for one retry after a low-quality pass.
    Escalated,
}

/// A PNG-encoded page image attached to a prompt.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// Page number (1-indexed).
    pub page: u32,
    /// PNG bytes.
    pub png: Vec<u8>,
}

/// One completion request.
#[derive(Debug, Clone)]
pub struct ModelPrompt {
    /// System instructions.
    pub system: String,
    /// User text.
    pub text: String,
    /// Page images; empty for text-only prompts.
    pub images: Vec<PageImage>,
}

impl ModelPrompt {
    /// Build a text-only prompt.
    pub fn text_only(system: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            text: text.into(),
            images: Vec::new(),
        }
    }

    /// Build a prompt carrying page images.
    pub fn with_images(
        system: impl Into<String>,
        text: impl Into<String>,
        images: Vec<PageImage>,
    ) -> Self {
        Self {
            system: system.into(),
            text: text.into(),
            images,
        }
    }
}

/// Chat-style language model with a standard and an escalation tier.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Identifier of the model serving the given tier.
    fn model_name(&self, tier: ModelTier) -> String;

    /// Run one completion and return the raw response text.
    async fn complete(&self, tier: ModelTier, prompt: &ModelPrompt) -> Result<String>;
}

/// Handle to a document placed in the file store.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    /// Storage key.
    pub key: String,
    /// URL the document can be fetched from.
    pub url: String,
}

/// Durable blob storage for uploaded documents.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store bytes under a key and return a fetchable handle.
    async fn put(&self, key: &str, data: &[u8]) -> Result<StoredDocument>;
}

/// Structured OCR service that analyzes an expense document by reference.
#[async_trait]
pub trait ExpenseOcr: Send + Sync {
    /// Analyze a stored document into summary fields and line item groups.
    async fn analyze(&self, document: &StoredDocument) -> Result<ExpenseDocument>;
}

/// Persistence for vendor templates, scoped per organization.
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// All templates stored for an organization.
    async fn list_by_organization(&self, organization_id: &str) -> Result<Vec<VendorTemplate>>;

    /// Insert or replace the template stored for (organization, vendor).
    async fn upsert(&self, organization_id: &str, template: &VendorTemplate) -> Result<()>;
}

/// Persistence for learned field mappings, scoped per organization.
#[async_trait]
pub trait MappingRepository: Send + Sync {
    /// All mappings stored for a vendor.
    async fn list_for_vendor(
        &self,
        organization_id: &str,
        vendor: &str,
    ) -> Result<Vec<FieldMapping>>;

    /// Record one confirmation of `field <- raw_key` for a vendor: creates
    /// the mapping or bumps its use count and last-used timestamp.
    async fn record(
        &self,
        organization_id: &str,
        vendor: &str,
        field: &str,
        raw_key: &str,
    ) -> Result<()>;
}

/// Downstream store of finished invoice records.
#[async_trait]
pub trait InvoiceSink: Send + Sync {
    /// Persist a validated record and return a receipt.
    async fn persist(
        &self,
        context: &IngestContext,
        record: &InvoiceRecord,
    ) -> Result<PersistedInvoice>;

    /// Expense category previously assigned to a vendor SKU, if any.
    async fn category_for_sku(&self, organization_id: &str, sku: &str) -> Result<Option<String>>;
}

/// Everything the pipeline talks to.
///
/// The model and OCR services are optional: when absent the pipeline keeps
/// running with the corresponding tiers disabled.
#[derive(Clone)]
pub struct Collaborators {
    /// Language model, or `None` to disable model tiers.
    pub model: Option<Arc<dyn LanguageModel>>,
    /// Structured OCR, or `None` to disable the OCR tier.
    pub ocr: Option<Arc<dyn ExpenseOcr>>,
    /// Blob storage for uploads and sub-documents.
    pub files: Arc<dyn FileStore>,
    /// Vendor template persistence.
    pub templates: Arc<dyn TemplateRepository>,
    /// Field mapping persistence.
    pub mappings: Arc<dyn MappingRepository>,
    /// Finished record persistence.
    pub sink: Arc<dyn InvoiceSink>,
}
