//! Model-tier extraction with a single stronger-model escalation.

use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

use super::{Outcome, clip_chars};
use crate::error::ServiceError;
use crate::models::config::ExtractionConfig;
use crate::models::{ExtractionSource, InvoiceRecord, LineItem, VendorTemplate, vendor_key};
use crate::pdf::PdfDocument;
use crate::services::llm::clean_json_reply;
use crate::services::{LanguageModel, ModelPrompt, ModelTier, PageImage};
use crate::template::fields::{parse_currency, parse_date};

/// System instructions for invoice extraction. The reply contract is JSON
/// only: a `data` object in the canonical record shape plus an optional
/// reusable `template`.
const EXTRACTION_SYSTEM_PROMPT: &str = r#"You extract vendor invoice data from documents.
Reply with JSON only, no markdown fences, matching this schema exactly:
{
  "data": {
    "invoice_number": "string or null",
    "vendor_name": "string or null",
    "vendor_address": "string or null",
    "issue_date": "YYYY-MM-DD or null",
    "due_date": "YYYY-MM-DD or null",
    "currency": "ISO 4217 code or null",
    "subtotal": number or null,
    "tax_amount": number or null,
    "deposit_amount": number or null,
    "shipping_amount": number or null,
    "discount_amount": number or null,
    "total_amount": number or null,
    "po_number": "string or null",
    "line_items": [
      {
        "sku": "string or null",
        "description": "string",
        "units_per_case": number or null,
        "cases": number or null,
        "quantity": number,
        "unit_cost": number,
        "case_cost": number or null,
        "amount": number,
        "confidence": number
      }
    ]
  },
  "template": {
    "vendor": "lowercased vendor name",
    "keywords": ["distinctive strings that identify this vendor"],
    "fields": {
      "invoice_number": "regex with one capture group",
      "total_amount": "regex with one capture group",
      "line_item": "regex with named groups (?P<description>...), (?P<quantity>...), (?P<unit_cost>...), (?P<amount>...); optional (?P<sku>...), (?P<cases>...), (?P<units_per_case>...)"
    },
    "options": {"day_first_dates": false}
  } or null
}

Rules:
- "confidence" is mandatory on every line item, between 0.0 and 1.0.
- Amounts are plain numbers without currency symbols or separators.
- Use null for anything you cannot read; never invent values.
- "template" describes how to extract future invoices with this exact layout;
  include it only when the layout is regular enough to template."#;

/// A finished model extraction.
#[derive(Debug)]
pub struct ModelExtraction {
    /// How the extraction ended.
    pub outcome: Outcome,

    /// Vendor template proposed by the model, when the reply carried one.
    pub template: Option<VendorTemplate>,
}

/// Runs the standard tier, gates the result, and escalates at most once.
pub struct ModelExtractor {
    model: Arc<dyn LanguageModel>,
    config: ExtractionConfig,
}

enum Attempt {
    /// Parsed and passed the quality gate.
    Passed(Box<InvoiceRecord>, Option<VendorTemplate>),
    /// Reply unusable, or parsed but below the gate.
    Rejected(Option<(Box<InvoiceRecord>, Option<VendorTemplate>)>),
    /// The service itself failed.
    Errored(ServiceError),
}

impl ModelExtractor {
    pub fn new(model: Arc<dyn LanguageModel>, config: ExtractionConfig) -> Self {
        Self { model, config }
    }

    /// Extract a canonical record from one sub-document.
    ///
    /// Scanned documents (text below the configured floor) are extracted
    /// from a single page image; everything else from the text layer. A
    /// vision result below the quality gate earns exactly one retry on the
    /// escalation tier; text results are never retried.
    pub async fn extract(&self, document: &PdfDocument, text: &str) -> ModelExtraction {
        let started = Instant::now();
        let prompt = self.build_prompt(document, text);
        let vision = !prompt.images.is_empty();

        let (outcome, template, escalated) =
            match self.attempt(ModelTier::Standard, &prompt).await {
                Attempt::Passed(record, template) => (Outcome::Extracted(record), template, false),
                Attempt::Errored(e) => (Outcome::ServiceFailure(e), None, false),
                Attempt::Rejected(first) if !vision => match first {
                    Some((record, template)) => (Outcome::LowQuality(record), template, false),
                    None => (
                        Outcome::ServiceFailure(ServiceError::InvalidResponse(
                            "model reply failed validation".to_string(),
                        )),
                        None,
                        false,
                    ),
                },
                Attempt::Rejected(first) => {
                    debug!("vision extraction below quality gate, escalating once");
                    match self.attempt(ModelTier::Escalated, &prompt).await {
                        Attempt::Passed(record, template) => {
                            (Outcome::Extracted(record), template, true)
                        }
                        Attempt::Rejected(second) => match second.or(first) {
                            Some((record, template)) => {
                                (Outcome::LowQuality(record), template, true)
                            }
                            None => (
                                Outcome::ServiceFailure(ServiceError::InvalidResponse(
                                    "model reply failed validation on both tiers".to_string(),
                                )),
                                None,
                                true,
                            ),
                        },
                        Attempt::Errored(e) => match first {
                            Some((record, template)) => {
                                (Outcome::LowQuality(record), template, true)
                            }
                            None => (Outcome::ServiceFailure(e), None, true),
                        },
                    }
                }
            };

        let elapsed = started.elapsed().as_millis() as u64;
        let outcome = match outcome {
            Outcome::Extracted(mut record) => {
                stamp_meta(&mut record, escalated, elapsed);
                Outcome::Extracted(record)
            }
            Outcome::LowQuality(mut record) => {
                stamp_meta(&mut record, escalated, elapsed);
                record.push_warning("extraction quality below threshold".to_string());
                Outcome::LowQuality(record)
            }
            other => other,
        };

        ModelExtraction { outcome, template }
    }

    async fn attempt(&self, tier: ModelTier, prompt: &ModelPrompt) -> Attempt {
        let raw = match self.model.complete(tier, prompt).await {
            Ok(raw) => raw,
            Err(e) => return Attempt::Errored(e),
        };

        match self.parse_reply(&raw) {
            Some((mut record, template)) => {
                record.meta.model = Some(self.model.model_name(tier));
                if self.passes_gate(&record) {
                    Attempt::Passed(Box::new(record), template)
                } else {
                    Attempt::Rejected(Some((Box::new(record), template)))
                }
            }
            None => Attempt::Rejected(None),
        }
    }

    /// Strictly parse a model reply. Anything that does not validate comes
    /// back as `None`; the caller treats that the same as a low-quality
    /// result.
    fn parse_reply(&self, raw: &str) -> Option<(InvoiceRecord, Option<VendorTemplate>)> {
        let json = clean_json_reply(raw);
        let value: Value = serde_json::from_str(json)
            .map_err(|e| warn!("model reply is not JSON: {e}"))
            .ok()?;
        let reply: ModelReply = serde_json::from_value(value.clone())
            .map_err(|e| warn!("model reply failed validation: {e}"))
            .ok()?;

        let mut record = self.record_from_data(reply.data);
        record.raw_payload = value.get("data").cloned().unwrap_or(Value::Null);
        Some((record, reply.template))
    }

    fn passes_gate(&self, record: &InvoiceRecord) -> bool {
        let vendor_ok = !vendor_key(&record.vendor_name).is_empty();
        let confidence_ok = record
            .mean_line_confidence()
            .is_none_or(|mean| mean >= self.config.min_mean_confidence);
        record.has_signal() && vendor_ok && confidence_ok
    }

    fn record_from_data(&self, data: ModelData) -> InvoiceRecord {
        let mut record = InvoiceRecord::empty(&self.config.default_currency);
        record.meta.source = ExtractionSource::Model;

        record.invoice_number = data.invoice_number.unwrap_or_default();
        record.vendor_name = data.vendor_name.unwrap_or_default();
        record.vendor_address = data.vendor_address.filter(|s| !s.trim().is_empty());
        record.issue_date = data.issue_date.as_deref().and_then(|s| parse_date(s, false));
        record.due_date = data.due_date.as_deref().and_then(|s| parse_date(s, false));
        if let Some(currency) = data.currency.as_deref().and_then(parse_currency) {
            record.currency = currency;
        }
        record.subtotal = data.subtotal;
        record.tax_amount = data.tax_amount;
        record.deposit_amount = data.deposit_amount;
        record.shipping_amount = data.shipping_amount;
        record.discount_amount = data.discount_amount;
        record.total_amount = data.total_amount.unwrap_or(Decimal::ZERO);
        record.po_number = data.po_number.filter(|s| !s.trim().is_empty());

        for line in data.line_items {
            record.line_items.push(LineItem {
                sku: line.sku.filter(|s| !s.trim().is_empty()),
                description: line.description.unwrap_or_default(),
                units_per_case: line.units_per_case,
                cases: line.cases,
                quantity: line.quantity.unwrap_or(Decimal::ZERO),
                unit_cost: line.unit_cost.unwrap_or(Decimal::ZERO),
                case_cost: line.case_cost,
                amount: line.amount.unwrap_or(Decimal::ZERO),
                category_code: None,
                confidence: line.confidence.clamp(0.0, 1.0),
            });
        }

        record
    }

    /// Vision prompts carry only the first page image; further pages are
    /// never attached.
    fn build_prompt(&self, document: &PdfDocument, text: &str) -> ModelPrompt {
        let scanned = text.chars().count() < self.config.min_text_chars;
        if scanned {
            match document.page_png(1, self.config.image_max_edge) {
                Ok(png) => {
                    debug!("building vision extraction prompt");
                    return ModelPrompt::with_images(
                        EXTRACTION_SYSTEM_PROMPT,
                        "Extract the invoice from the attached page image.",
                        vec![PageImage { page: 1, png }],
                    );
                }
                Err(e) => {
                    warn!("document has no text layer and no usable page image: {e}");
                }
            }
        }

        ModelPrompt::text_only(
            EXTRACTION_SYSTEM_PROMPT,
            format!(
                "Extract the invoice from the following document text:\n\n{}",
                clip_chars(text, self.config.prompt_char_budget)
            ),
        )
    }
}

fn stamp_meta(record: &mut InvoiceRecord, escalated: bool, elapsed_ms: u64) {
    record.meta.escalated = escalated;
    record.meta.mean_confidence = record.mean_line_confidence();
    record.meta.processing_time_ms = Some(elapsed_ms);
}

#[derive(Debug, Deserialize)]
struct ModelReply {
    data: ModelData,
    #[serde(default, deserialize_with = "template_from_value")]
    template: Option<VendorTemplate>,
}

/// The proposed template is a bonus: accept it as an object or a JSON
/// string, and drop it silently when it does not validate.
fn template_from_value<'de, D>(deserializer: D) -> Result<Option<VendorTemplate>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => serde_json::from_str(&s).ok(),
        Some(other) => serde_json::from_value(other).ok(),
    })
}

#[derive(Debug, Deserialize)]
struct ModelData {
    #[serde(default)]
    invoice_number: Option<String>,
    #[serde(default)]
    vendor_name: Option<String>,
    #[serde(default)]
    vendor_address: Option<String>,
    #[serde(default)]
    issue_date: Option<String>,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    subtotal: Option<Decimal>,
    #[serde(default)]
    tax_amount: Option<Decimal>,
    #[serde(default)]
    deposit_amount: Option<Decimal>,
    #[serde(default)]
    shipping_amount: Option<Decimal>,
    #[serde(default)]
    discount_amount: Option<Decimal>,
    #[serde(default)]
    total_amount: Option<Decimal>,
    #[serde(default)]
    po_number: Option<String>,
    #[serde(default)]
    line_items: Vec<ModelLineItem>,
}

#[derive(Debug, Deserialize)]
struct ModelLineItem {
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    units_per_case: Option<Decimal>,
    #[serde(default)]
    cases: Option<Decimal>,
    #[serde(default)]
    quantity: Option<Decimal>,
    #[serde(default)]
    unit_cost: Option<Decimal>,
    #[serde(default)]
    case_cost: Option<Decimal>,
    #[serde(default)]
    amount: Option<Decimal>,
    // A line item without a confidence fails the whole reply.
    confidence: f32,
}
