//! Canonical invoice record produced by every extraction path.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A fully extracted vendor invoice.
///
/// Every extraction path (template match, structured OCR, model) converges on
/// this shape before validation and persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRecord {
    /// Invoice number/identifier as printed on the document.
    pub invoice_number: String,

    /// Vendor (supplier) name.
    pub vendor_name: String,

    /// Vendor address as a single string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_address: Option<String>,

    /// Date the invoice was issued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<NaiveDate>,

    /// Payment due date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,

    /// Currency code (default: USD).
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Sum of line amounts before tax and charges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<Decimal>,

    /// Total tax charged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_amount: Option<Decimal>,

    /// Deposit or amount already paid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_amount: Option<Decimal>,

    /// Shipping and handling charges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_amount: Option<Decimal>,

    /// Discount applied to the document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_amount: Option<Decimal>,

    /// Grand total.
    pub total_amount: Decimal,

    /// Purchase order reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub po_number: Option<String>,

    /// Line items on the invoice.
    #[serde(default)]
    pub line_items: Vec<LineItem>,

    /// Raw payload from the extraction source, kept for field-mapping
    /// learning. Top-level keys are looked up when stored mappings are
    /// applied.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub raw_payload: serde_json::Value,

    /// Extraction metadata.
    #[serde(default)]
    pub meta: ExtractionMeta,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl InvoiceRecord {
    /// Create an empty record in the given currency.
    ///
    /// Used when every extraction path failed: the document is still
    /// persisted so the user can fill it in by hand.
    pub fn empty(currency: &str) -> Self {
        Self {
            currency: currency.to_string(),
            ..Self::default()
        }
    }

    /// Sum of the line item amounts.
    pub fn line_total(&self) -> Decimal {
        self.line_items.iter().map(|item| item.amount).sum()
    }

    /// Mean of the per-line confidence scores, `None` when there are no
    /// line items.
    pub fn mean_line_confidence(&self) -> Option<f32> {
        if self.line_items.is_empty() {
            return None;
        }
        let sum: f32 = self.line_items.iter().map(|item| item.confidence).sum();
        Some(sum / self.line_items.len() as f32)
    }

    /// Whether the record carries any extracted signal at all.
    pub fn has_signal(&self) -> bool {
        self.total_amount > Decimal::ZERO || !self.line_items.is_empty()
    }

    /// Append a warning to the extraction metadata.
    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.meta.warnings.push(warning.into());
    }
}

impl Default for InvoiceRecord {
    fn default() -> Self {
        Self {
            invoice_number: String::new(),
            vendor_name: String::new(),
            vendor_address: None,
            issue_date: None,
            due_date: None,
            currency: default_currency(),
            subtotal: None,
            tax_amount: None,
            deposit_amount: None,
            shipping_amount: None,
            discount_amount: None,
            total_amount: Decimal::ZERO,
            po_number: None,
            line_items: Vec::new(),
            raw_payload: serde_json::Value::Null,
            meta: ExtractionMeta::default(),
        }
    }
}

/// A single line item on the invoice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineItem {
    /// Vendor product code (SKU).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,

    /// Product/service description.
    pub description: String,

    /// Units contained in one case, for case-priced goods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units_per_case: Option<Decimal>,

    /// Number of cases ordered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cases: Option<Decimal>,

    /// Quantity in selling units.
    pub quantity: Decimal,

    /// Price per selling unit.
    pub unit_cost: Decimal,

    /// Price per case, for case-priced goods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_cost: Option<Decimal>,

    /// Extended amount for this line.
    pub amount: Decimal,

    /// Expense category assigned from prior invoices with the same SKU.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_code: Option<String>,

    /// Extraction confidence for this line (0.0 - 1.0).
    #[serde(default)]
    pub confidence: f32,
}

/// Metadata about how a record was extracted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionMeta {
    /// Which extraction path produced the record.
    #[serde(default)]
    pub source: ExtractionSource,

    /// Model identifier, when a model produced the record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Whether the escalation tier was used.
    #[serde(default)]
    pub escalated: bool,

    /// Mean line confidence at extraction time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_confidence: Option<f32>,

    /// Processing time in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,

    /// Warnings or issues encountered during extraction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Which extraction path produced a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    /// Deterministic vendor template match.
    Template,
    /// Structured OCR service.
    Ocr,
    /// Language model extraction.
    Model,
    /// Nothing could be extracted; the record is an empty shell.
    #[default]
    Empty,
}

/// Identity and provenance of one ingestion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestContext {
    /// Organization the invoices belong to.
    pub organization_id: String,

    /// User who submitted the file.
    pub user_id: String,

    /// Filename as uploaded.
    pub original_filename: String,

    /// File store key of the original upload.
    pub source_key: String,
}

/// Receipt returned by the invoice sink for one persisted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedInvoice {
    /// Storage identifier assigned by the sink.
    pub id: String,

    /// Invoice number of the persisted record.
    pub invoice_number: String,

    /// Vendor name of the persisted record.
    pub vendor_name: String,

    /// Grand total of the persisted record.
    pub total_amount: Decimal,

    /// Number of line items persisted.
    pub line_item_count: usize,
}

/// A user correction to one field of a persisted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldCorrection {
    /// Canonical field name the user corrected.
    pub field: String,

    /// The corrected value, as entered.
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    #[test]
    fn test_empty_record_has_no_signal() {
        let record = InvoiceRecord::empty("USD");
        assert!(!record.has_signal());
        assert_eq!(record.meta.source, ExtractionSource::Empty);
        assert_eq!(record.total_amount, Decimal::ZERO);
    }

    #[test]
    fn test_mean_line_confidence() {
        let mut record = InvoiceRecord::default();
        assert_eq!(record.mean_line_confidence(), None);

        record.line_items.push(LineItem {
            description: "Widgets".to_string(),
            confidence: 0.9,
            ..LineItem::default()
        });
        record.line_items.push(LineItem {
            description: "Gadgets".to_string(),
            confidence: 0.7,
            ..LineItem::default()
        });

        let mean = record.mean_line_confidence().unwrap();
        assert!((mean - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_line_total() {
        let mut record = InvoiceRecord::default();
        record.line_items.push(LineItem {
            description: "a".to_string(),
            amount: Decimal::from_str("10.50").unwrap(),
            ..LineItem::default()
        });
        record.line_items.push(LineItem {
            description: "b".to_string(),
            amount: Decimal::from_str("4.25").unwrap(),
            ..LineItem::default()
        });
        assert_eq!(record.line_total(), Decimal::from_str("14.75").unwrap());
    }

    #[test]
    fn test_record_deserializes_amounts_from_numbers_and_strings() {
        let json = r#"{
            "invoice_number": "INV-1001",
            "vendor_name": "Acme Foods",
            "total_amount": "123.45",
            "line_items": [{
                "description": "Flour 25lb",
                "quantity": 2,
                "unit_cost": "10.00",
                "amount": 20.0,
                "confidence": 0.95
            }]
        }"#;

        let record: InvoiceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.total_amount, Decimal::from_str("123.45").unwrap());
        assert_eq!(record.currency, "USD");
        assert_eq!(record.line_items.len(), 1);
        assert_eq!(
            record.line_items[0].amount,
            Decimal::from_str("20.0").unwrap()
        );
    }
}
