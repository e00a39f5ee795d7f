//! Data models: canonical records, vendor templates, configuration.

pub mod config;
pub mod invoice;
pub mod template;

pub use config::{
    BoundaryConfig, ExtractionConfig, ModelConfig, OcrServiceConfig, PipelineConfig,
};
pub use invoice::{
    ExtractionMeta, ExtractionSource, FieldCorrection, IngestContext, InvoiceRecord, LineItem,
    PersistedInvoice,
};
pub use template::{
    CANONICAL_FIELDS, FieldMapping, LINE_ITEM_FIELD, TemplateOptions, VendorTemplate,
    is_canonical_field, vendor_key,
};
