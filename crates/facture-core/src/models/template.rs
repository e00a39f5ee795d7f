//! Vendor template and field-mapping models.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical header field names a template pattern or field mapping may
/// target.
pub const CANONICAL_FIELDS: &[&str] = &[
    "invoice_number",
    "vendor_name",
    "vendor_address",
    "issue_date",
    "due_date",
    "currency",
    "subtotal",
    "tax_amount",
    "deposit_amount",
    "shipping_amount",
    "discount_amount",
    "total_amount",
    "po_number",
];

/// Key of the repeating line-item pattern in a template's field map.
pub const LINE_ITEM_FIELD: &str = "line_item";

/// Check whether a name is one of the canonical header fields.
pub fn is_canonical_field(name: &str) -> bool {
    CANONICAL_FIELDS.contains(&name)
}

/// Normalize a vendor name into the key templates and mappings are stored
/// under: trimmed, inner whitespace collapsed, lowercased.
pub fn vendor_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A learned extraction template for one vendor's invoice layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VendorTemplate {
    /// Vendor key the template belongs to (see [`vendor_key`]).
    pub vendor: String,

    /// Keywords that identify this vendor in document text. A template is a
    /// match candidate only when every keyword occurs (case-insensitive).
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Canonical field name -> regex pattern with one capture group. The
    /// `line_item` entry instead uses named capture groups (description,
    /// quantity, unit_cost, amount, and optionally sku, cases,
    /// units_per_case, case_cost).
    #[serde(default)]
    pub fields: BTreeMap<String, String>,

    /// Matching options for this layout.
    #[serde(default)]
    pub options: TemplateOptions,
}

impl VendorTemplate {
    /// Whether the template carries enough to be worth persisting: at least
    /// one keyword and at least one field pattern.
    pub fn is_usable(&self) -> bool {
        !self.keywords.is_empty() && !self.fields.is_empty()
    }

    /// Scrub control characters out of every string the template carries.
    /// Stored templates are later compiled as regexes and matched against
    /// document text, so stray control bytes must never be persisted.
    pub fn sanitize(&mut self) {
        self.vendor = scrub(&self.vendor);
        for keyword in &mut self.keywords {
            *keyword = scrub(keyword);
        }
        self.keywords.retain(|k| !k.is_empty());
        self.fields = self
            .fields
            .iter()
            .map(|(name, pattern)| (scrub(name), scrub(pattern)))
            .filter(|(name, pattern)| !name.is_empty() && !pattern.is_empty())
            .collect();
        if let Some(currency) = &self.options.currency {
            self.options.currency = Some(scrub(currency)).filter(|c| !c.is_empty());
        }
    }
}

/// Replace tab/newline with a space, drop other control characters, trim.
fn scrub(s: &str) -> String {
    s.chars()
        .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Per-vendor matching options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateOptions {
    /// Dates on this layout are day-first (01/02/2024 means February 1st).
    #[serde(default)]
    pub day_first_dates: bool,

    /// Currency to assume when the document does not print one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,

    /// Free-form options preserved round-trip.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A learned association from a raw extraction payload key to a canonical
/// field, scoped to one vendor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Vendor key the mapping is scoped to.
    pub vendor: String,

    /// Canonical field the mapping fills.
    pub field: String,

    /// Top-level raw payload key the value is read from.
    pub raw_key: String,

    /// Times a user correction has confirmed this mapping.
    #[serde(default)]
    pub use_count: u64,

    /// When the mapping was last confirmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

impl FieldMapping {
    /// Create a fresh mapping with a single confirmation.
    pub fn new(vendor: &str, field: &str, raw_key: &str) -> Self {
        Self {
            vendor: vendor.to_string(),
            field: field.to_string(),
            raw_key: raw_key.to_string(),
            use_count: 1,
            last_used: Some(Utc::now()),
        }
    }
}
