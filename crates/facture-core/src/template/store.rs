//! Template persistence: saving model-proposed templates and refining
//! stored ones from user corrections.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::extract::clip_chars;
use crate::models::{FieldCorrection, VendorTemplate, vendor_key};
use crate::services::llm::clean_json_reply;
use crate::services::{LanguageModel, ModelPrompt, ModelTier, Result, TemplateRepository};

const REFINE_SYSTEM_PROMPT: &str = r#"You maintain regex extraction templates for vendor invoices.
Given the current template, the document text it ran against, and the
user's corrected field values, reply with JSON only: the improved
template in the same shape:
{"vendor": "...", "keywords": ["..."], "fields": {"field_name": "regex"}, "options": {"day_first_dates": false}}

Rules:
- Header field regexes capture the value in group 1.
- The "line_item" regex uses named groups: (?P<description>...), (?P<quantity>...), (?P<unit_cost>...), (?P<amount>...); optional (?P<sku>...), (?P<cases>...), (?P<units_per_case>...), (?P<case_cost>...).
- Keep keywords that reliably identify this vendor's documents.
- Each regex must match the corrected value against the document text.
- Change only what the corrections require."#;

const REFINE_TEXT_BUDGET: usize = 12_000;

/// Persists vendor templates, optionally refining them through a model.
pub struct TemplateStore {
    templates: Arc<dyn TemplateRepository>,
    model: Option<Arc<dyn LanguageModel>>,
}

impl TemplateStore {
    pub fn new(
        templates: Arc<dyn TemplateRepository>,
        model: Option<Arc<dyn LanguageModel>>,
    ) -> Self {
        Self { templates, model }
    }

    /// Sanitize and upsert a template, filling in the vendor key when the
    /// proposal left it blank. Unusable templates are dropped, not stored.
    /// Returns whether anything was written.
    pub async fn save(
        &self,
        organization_id: &str,
        mut template: VendorTemplate,
        fallback_vendor: &str,
    ) -> Result<bool> {
        if template.vendor.trim().is_empty() {
            template.vendor = vendor_key(fallback_vendor);
        } else {
            template.vendor = vendor_key(&template.vendor);
        }
        template.sanitize();

        if template.vendor.is_empty() || !template.is_usable() {
            debug!("discarding unusable template proposal");
            return Ok(false);
        }

        self.templates.upsert(organization_id, &template).await?;
        debug!(vendor = %template.vendor, "stored vendor template");
        Ok(true)
    }

    /// Ask the model to repair a stored template that produced values the
    /// user had to correct. The vendor key never changes; an unusable or
    /// unparseable proposal leaves the stored template alone.
    pub async fn refine(
        &self,
        organization_id: &str,
        existing: &VendorTemplate,
        document_text: &str,
        corrections: &[FieldCorrection],
    ) -> Result<Option<VendorTemplate>> {
        let Some(model) = &self.model else {
            debug!("no model configured, skipping template refinement");
            return Ok(None);
        };
        if corrections.is_empty() {
            return Ok(None);
        }

        let current = serde_json::to_string_pretty(existing)
            .map_err(|e| crate::error::ServiceError::InvalidResponse(e.to_string()))?;
        let corrected: Vec<String> = corrections
            .iter()
            .map(|c| format!("- {} = {}", c.field, c.value))
            .collect();
        let prompt = ModelPrompt::text_only(
            REFINE_SYSTEM_PROMPT,
            format!(
                "Current template:\n{current}\n\nCorrected values:\n{}\n\nDocument text:\n{}",
                corrected.join("\n"),
                clip_chars(document_text, REFINE_TEXT_BUDGET),
            ),
        );

        let raw = model.complete(ModelTier::Standard, &prompt).await?;
        let mut refined: VendorTemplate = match serde_json::from_str(clean_json_reply(&raw)) {
            Ok(template) => template,
            Err(e) => {
                warn!("template refinement reply failed validation: {e}");
                return Ok(None);
            }
        };

        refined.vendor = existing.vendor.clone();
        refined.sanitize();
        if !refined.is_usable() {
            warn!(vendor = %existing.vendor, "refined template is unusable, keeping the old one");
            return Ok(None);
        }

        self.templates.upsert(organization_id, &refined).await?;
        debug!(vendor = %refined.vendor, "refined vendor template");
        Ok(Some(refined))
    }
}
