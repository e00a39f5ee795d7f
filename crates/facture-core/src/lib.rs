//! Core library for vendor invoice ingestion and extraction.
//!
//! This crate provides:
//! - PDF processing (text and image extraction, multi-invoice splitting)
//! - Invoice boundary detection for bundled uploads
//! - A tiered extraction cascade: vendor templates, structured OCR, model
//! - Per-vendor template and field-mapping learning from user corrections
//! - Line item arithmetic validation

pub mod boundary;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod models;
pub mod pdf;
pub mod services;
pub mod template;

#[cfg(test)]
pub(crate) mod testutil;

pub use boundary::BoundaryRange;
pub use error::{FactureError, PdfError, Result, ServiceError};
pub use extract::{ModelExtraction, ModelExtractor, Outcome};
pub use ingest::IngestionPipeline;
pub use models::{
    BoundaryConfig, ExtractionConfig, ExtractionMeta, ExtractionSource, FieldCorrection,
    FieldMapping, IngestContext, InvoiceRecord, LineItem, ModelConfig, OcrServiceConfig,
    PersistedInvoice, PipelineConfig, TemplateOptions, VendorTemplate, vendor_key,
};
pub use pdf::{PdfDocument, SubDocument};
pub use services::{
    Collaborators, ExpenseDocument, ExpenseField, ExpenseLineItem, ExpenseOcr, FileStore,
    HttpExpenseOcr, HttpLanguageModel, InvoiceSink, LanguageModel, MappingRepository, ModelPrompt,
    ModelTier, PageImage, StoredDocument, TemplateRepository,
};
pub use template::TemplateStore;
