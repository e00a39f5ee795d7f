//! The ingestion pipeline: split, extract through the tier cascade,
//! validate, persist.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::boundary;
use crate::error::Result;
use crate::extract::ocr_adapter::record_from_expense;
use crate::extract::validate::enforce_line_arithmetic;
use crate::extract::{ModelExtractor, Outcome};
use crate::models::{
    FieldCorrection, IngestContext, InvoiceRecord, PersistedInvoice, PipelineConfig,
    VendorTemplate, vendor_key,
};
use crate::pdf::{self, PdfDocument, SubDocument};
use crate::services::{Collaborators, ExpenseOcr};
use crate::template::{TemplateStore, apply_mappings, learn_mappings, match_template};

/// Runs documents through boundary detection and the extraction cascade.
///
/// Tiers run cheapest first: vendor template, then structured OCR, then
/// the model. A failure in one invoice never sinks a sibling from the same
/// upload; only a file where every invoice fails is an error.
pub struct IngestionPipeline {
    config: PipelineConfig,
    services: Collaborators,
}

impl IngestionPipeline {
    pub fn new(config: PipelineConfig, services: Collaborators) -> Self {
        Self { config, services }
    }

    /// Ingest a PDF from disk.
    pub async fn ingest_file(
        &self,
        path: &Path,
        organization_id: &str,
        user_id: &str,
    ) -> Result<Vec<PersistedInvoice>> {
        let data = std::fs::read(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.pdf".to_string());
        self.ingest_bytes(&data, organization_id, user_id, &filename)
            .await
    }

    /// Ingest a PDF already in memory.
    pub async fn ingest_bytes(
        &self,
        data: &[u8],
        organization_id: &str,
        user_id: &str,
        original_filename: &str,
    ) -> Result<Vec<PersistedInvoice>> {
        let source_key = format!(
            "{organization_id}/{}-{original_filename}",
            Utc::now().timestamp_millis()
        );
        if let Err(e) = self.services.files.put(&source_key, data).await {
            warn!(key = %source_key, "upload archival failed: {e}");
        }

        let document = PdfDocument::load(data)?;
        info!(
            file = %original_filename,
            pages = document.page_count(),
            "ingesting document"
        );

        let ranges = boundary::detect(
            &document,
            self.services.model.as_ref(),
            &self.config.boundary,
        )
        .await;
        let parts = pdf::split(data, &ranges)?;

        let context = IngestContext {
            organization_id: organization_id.to_string(),
            user_id: user_id.to_string(),
            original_filename: original_filename.to_string(),
            source_key,
        };
        let templates = match self
            .services
            .templates
            .list_by_organization(organization_id)
            .await
        {
            Ok(templates) => templates,
            Err(e) => {
                warn!("template listing failed: {e}");
                Vec::new()
            }
        };

        let mut persisted = Vec::new();
        for part in &parts {
            let span = info_span!(
                "invoice_part",
                file = %original_filename,
                start = part.range.start,
                end = part.range.end
            );
            match self
                .process_part(part, &context, &templates)
                .instrument(span)
                .await
            {
                Ok(invoice) => persisted.push(invoice),
                Err(e) => warn!(
                    start = part.range.start,
                    end = part.range.end,
                    "invoice part failed: {e}"
                ),
            }
        }

        if persisted.is_empty() {
            return Err(crate::error::FactureError::NoInvoices {
                file: original_filename.to_string(),
            });
        }
        info!(
            file = %original_filename,
            invoices = persisted.len(),
            "ingestion finished"
        );
        Ok(persisted)
    }

    /// Feed user corrections back into the learning stores: field mappings
    /// for remapped raw keys, and a template refinement when the vendor has
    /// a stored template. Both halves are best-effort.
    pub async fn learn_from_corrections(
        &self,
        organization_id: &str,
        record: &InvoiceRecord,
        document_text: &str,
        corrections: &[FieldCorrection],
    ) -> Result<()> {
        let vendor = vendor_key(&record.vendor_name);
        if vendor.is_empty() || corrections.is_empty() {
            return Ok(());
        }

        match learn_mappings(
            organization_id,
            &vendor,
            record,
            corrections,
            &self.services.mappings,
        )
        .await
        {
            Ok(learned) if learned > 0 => info!(vendor = %vendor, learned, "recorded field mappings"),
            Ok(_) => {}
            Err(e) => warn!("mapping learning failed: {e}"),
        }

        let existing = match self
            .services
            .templates
            .list_by_organization(organization_id)
            .await
        {
            Ok(templates) => templates.into_iter().find(|t| t.vendor == vendor),
            Err(e) => {
                warn!("template listing failed: {e}");
                None
            }
        };
        if let Some(existing) = existing {
            let store = TemplateStore::new(
                self.services.templates.clone(),
                self.services.model.clone(),
            );
            match store
                .refine(organization_id, &existing, document_text, corrections)
                .await
            {
                Ok(Some(_)) => info!(vendor = %vendor, "refined vendor template"),
                Ok(None) => {}
                Err(e) => warn!("template refinement failed: {e}"),
            }
        }
        Ok(())
    }

    async fn process_part(
        &self,
        part: &SubDocument,
        context: &IngestContext,
        templates: &[VendorTemplate],
    ) -> Result<PersistedInvoice> {
        let data = part.bytes()?;
        let document = PdfDocument::load(&data)?;
        let text = document.text().unwrap_or_else(|e| {
            warn!("text extraction failed: {e}");
            String::new()
        });

        let mut outcome = match_template(&text, templates, &self.config.extraction);
        let mut day_first = false;
        if let Outcome::Extracted(record) = &outcome {
            debug!(vendor = %record.vendor_name, "template tier extracted");
            if let Some(matched) = templates.iter().find(|t| t.vendor == record.vendor_name) {
                day_first = matched.options.day_first_dates;
            }
        }

        if !outcome.is_extracted() {
            if let Some(ocr) = &self.services.ocr {
                outcome = self.ocr_tier(ocr, part, &data, context).await;
            }
        }

        let mut proposed_template = None;
        if !outcome.is_extracted() {
            if let Some(model) = &self.services.model {
                let extractor =
                    ModelExtractor::new(model.clone(), self.config.extraction.clone());
                let extraction = extractor.extract(&document, &text).await;
                if extraction.outcome.is_extracted() {
                    proposed_template = extraction.template;
                }
                outcome = extraction.outcome;
            }
        }

        let mut record = match outcome {
            Outcome::Extracted(record) | Outcome::LowQuality(record) => *record,
            Outcome::NoMatch => {
                warn!("no extraction tier produced a result");
                let mut record =
                    InvoiceRecord::empty(&self.config.extraction.default_currency);
                record.push_warning("no extraction tier produced a result".to_string());
                record
            }
            Outcome::ServiceFailure(e) => {
                warn!("extraction failed: {e}");
                let mut record =
                    InvoiceRecord::empty(&self.config.extraction.default_currency);
                record.push_warning(format!("extraction failed: {e}"));
                record
            }
        };

        if let Some(template) = proposed_template {
            let store = TemplateStore::new(
                self.services.templates.clone(),
                self.services.model.clone(),
            );
            match store
                .save(&context.organization_id, template, &record.vendor_name)
                .await
            {
                Ok(true) => debug!("stored model-proposed template"),
                Ok(false) => {}
                Err(e) => warn!("template save failed: {e}"),
            }
        }

        let vendor = vendor_key(&record.vendor_name);
        if !vendor.is_empty() {
            match self
                .services
                .mappings
                .list_for_vendor(&context.organization_id, &vendor)
                .await
            {
                Ok(mappings) if !mappings.is_empty() => {
                    let applied = apply_mappings(&mut record, &mappings, day_first);
                    if applied > 0 {
                        debug!(vendor = %vendor, applied, "applied learned mappings");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("mapping listing failed: {e}"),
            }
        }

        for item in &mut record.line_items {
            if item.category_code.is_some() {
                continue;
            }
            let Some(sku) = item.sku.clone() else {
                continue;
            };
            match self
                .services
                .sink
                .category_for_sku(&context.organization_id, &sku)
                .await
            {
                Ok(Some(category)) => item.category_code = Some(category),
                Ok(None) => {}
                Err(e) => warn!("category lookup failed: {e}"),
            }
        }

        enforce_line_arithmetic(&mut record, self.config.extraction.amount_tolerance);

        let persisted = self.services.sink.persist(context, &record).await?;
        info!(
            id = %persisted.id,
            invoice = %persisted.invoice_number,
            vendor = %persisted.vendor_name,
            source = ?record.meta.source,
            "persisted invoice"
        );
        Ok(persisted)
    }

    async fn ocr_tier(
        &self,
        ocr: &Arc<dyn ExpenseOcr>,
        part: &SubDocument,
        data: &[u8],
        context: &IngestContext,
    ) -> Outcome {
        let part_key = format!(
            "{}-part-{}-{}.pdf",
            context.source_key, part.range.start, part.range.end
        );
        let stored = match self.services.files.put(&part_key, data).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("part upload failed, skipping structured analysis: {e}");
                return Outcome::NoMatch;
            }
        };

        match ocr.analyze(&stored).await {
            Ok(expense) => {
                let outcome = record_from_expense(&expense, &self.config.extraction);
                if outcome.is_extracted() {
                    debug!("structured analysis tier extracted");
                }
                outcome
            }
            Err(e) => {
                warn!("structured analysis failed: {e}");
                Outcome::NoMatch
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FactureError, ServiceError};
    use crate::models::ExtractionSource;
    use crate::services::{
        ExpenseDocument, ExpenseField, ExpenseLineItem, InvoiceSink, MappingRepository,
        TemplateRepository,
    };
    use crate::testutil::{ScriptedModel, ScriptedOcr, TestWorld, pdf_with_pages};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;
    use std::str::FromStr;

    const ACME_PAGE: &str = "\
ACME FOODS INC
Remit to: PO Box 12, Springfield
Invoice # A-1001
Date: 01/15/2024
A123 Flour 25lb 2 @ 12.50 25.00
B456 Sugar 10lb 1 @ 8.00 8.00
Total Due: 33.00";

    fn acme_template() -> VendorTemplate {
        let mut fields = BTreeMap::new();
        fields.insert(
            "invoice_number".to_string(),
            r"Invoice\s+#\s*(\S+)".to_string(),
        );
        fields.insert(
            "total_amount".to_string(),
            r"Total\s+Due:\s*([\d,.]+)".to_string(),
        );
        fields.insert(
            crate::models::LINE_ITEM_FIELD.to_string(),
            r"^(?P<sku>[A-Z]\d{3})\s+(?P<description>.+?)\s+(?P<quantity>\d+)\s+@\s+(?P<unit_cost>[\d.]+)\s+(?P<amount>[\d.]+)\s*$"
                .to_string(),
        );
        VendorTemplate {
            vendor: "acme foods inc".to_string(),
            keywords: vec!["ACME FOODS".to_string(), "Remit to".to_string()],
            fields,
            options: Default::default(),
        }
    }

    fn model_reply() -> String {
        serde_json::json!({
            "data": {
                "invoice_number": "M-77",
                "vendor_name": "Modelled Vendor",
                "total_amount": 40.0,
                "line_items": [{
                    "description": "Widget",
                    "quantity": 4,
                    "unit_cost": 10.0,
                    "amount": 40.0,
                    "confidence": 0.9
                }]
            },
            "template": {
                "vendor": "modelled vendor",
                "keywords": ["Modelled Vendor"],
                "fields": {"invoice_number": "M-(\\d+)"}
            }
        })
        .to_string()
    }

    fn ocr_expense(include_amount_paid: bool) -> ExpenseDocument {
        let mut summary_fields = vec![
            ExpenseField::new("VENDOR_NAME", "Acme Foods", 0.98),
            ExpenseField::new("INVOICE_RECEIPT_ID", "A-1001", 0.97),
            ExpenseField::new("TOTAL", "33.00", 0.96),
        ];
        if include_amount_paid {
            summary_fields.push(ExpenseField::new("AMOUNT_PAID", "12.50", 0.95));
        }
        ExpenseDocument {
            summary_fields,
            line_items: vec![ExpenseLineItem {
                fields: vec![
                    ExpenseField::new("ITEM", "Flour 25lb", 0.95),
                    ExpenseField::new("QUANTITY", "2", 0.95),
                    ExpenseField::new("UNIT_PRICE", "12.50", 0.95),
                    ExpenseField::new("PRICE", "25.00", 0.95),
                ],
            }],
        }
    }

    fn pipeline(services: Collaborators) -> IngestionPipeline {
        IngestionPipeline::new(PipelineConfig::default(), services)
    }

    #[tokio::test]
    async fn test_template_match_makes_no_model_calls() {
        let world = TestWorld::new();
        world.templates.upsert("org-1", &acme_template()).await.unwrap();
        let model = Arc::new(ScriptedModel::new(Vec::new()));
        let p = pipeline(world.collaborators(Some(model.clone()), None));

        let data = pdf_with_pages(&[ACME_PAGE]);
        let persisted = p
            .ingest_bytes(&data, "org-1", "user-1", "acme.pdf")
            .await
            .unwrap();

        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].invoice_number, "A-1001");
        assert_eq!(persisted[0].line_item_count, 2);
        assert_eq!(model.call_count(), 0);

        let records = world.sink.records();
        assert_eq!(records[0].meta.source, ExtractionSource::Template);
        assert_eq!(
            records[0].total_amount,
            Decimal::from_str("33.00").unwrap()
        );
    }

    #[tokio::test]
    async fn test_cover_page_plus_invoice_persists_one_record() {
        let world = TestWorld::new();
        let boundary_reply = serde_json::json!({
            "ranges": [
                {"start": 0, "end": 0, "is_invoice": false, "label": "cover letter"},
                {"start": 1, "end": 2, "is_invoice": true}
            ]
        })
        .to_string();
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(boundary_reply),
            Ok(model_reply()),
        ]));
        let p = pipeline(world.collaborators(Some(model.clone()), None));

        let cover = "Dear customer, please find attached the invoice for your recent order.";
        let invoice_top =
            "Modelled Vendor statement of charges for professional services rendered in January 2024.";
        let invoice_rest =
            "Continued listing of charges with totals carried forward from the previous page of this statement.";
        let data = pdf_with_pages(&[cover, invoice_top, invoice_rest]);

        let persisted = p
            .ingest_bytes(&data, "org-1", "user-1", "bundle.pdf")
            .await
            .unwrap();

        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].invoice_number, "M-77");
        assert_eq!(model.call_count(), 2);

        // The extraction prompt only saw the carved invoice pages.
        let extraction_call = &model.calls()[1];
        assert!(extraction_call.text.contains("Modelled Vendor"));
        assert!(!extraction_call.text.contains("Dear customer"));

        // A model extraction proposes a reusable template.
        let stored = world.templates.list_by_organization("org-1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].vendor, "modelled vendor");
    }

    #[tokio::test]
    async fn test_without_services_record_is_flagged_not_dropped() {
        let world = TestWorld::new();
        let p = pipeline(world.collaborators(None, None));

        let data = pdf_with_pages(&["Some vendor invoice text without any template"]);
        let persisted = p
            .ingest_bytes(&data, "org-1", "user-1", "orphan.pdf")
            .await
            .unwrap();

        assert_eq!(persisted.len(), 1);
        let records = world.sink.records();
        assert_eq!(records[0].meta.source, ExtractionSource::Empty);
        assert!(records[0].total_amount.is_zero());
        assert!(!records[0].meta.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_erroring_model_still_persists_flagged_record() {
        let world = TestWorld::new();
        let model = Arc::new(ScriptedModel::new(vec![Err(ServiceError::Transport(
            "model offline".to_string(),
        ))]));
        let p = pipeline(world.collaborators(Some(model.clone()), None));

        let data = pdf_with_pages(&["Some vendor invoice text without any template"]);
        let persisted = p
            .ingest_bytes(&data, "org-1", "user-1", "degraded.pdf")
            .await
            .unwrap();

        assert_eq!(persisted.len(), 1);
        assert_eq!(model.call_count(), 1);
        let records = world.sink.records();
        assert_eq!(records[0].meta.source, ExtractionSource::Empty);
        assert!(
            records[0]
                .meta
                .warnings
                .iter()
                .any(|w| w.contains("extraction failed"))
        );
    }

    #[tokio::test]
    async fn test_ocr_tier_runs_when_no_template_matches() {
        let world = TestWorld::new();
        let ocr = Arc::new(ScriptedOcr::new(vec![Ok(ocr_expense(false))]));
        let p = pipeline(world.collaborators(None, Some(ocr.clone())));

        let data = pdf_with_pages(&[ACME_PAGE]);
        let persisted = p
            .ingest_bytes(&data, "org-1", "user-1", "acme.pdf")
            .await
            .unwrap();

        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].vendor_name, "Acme Foods");
        assert_eq!(ocr.request_count(), 1);

        let records = world.sink.records();
        assert_eq!(records[0].meta.source, ExtractionSource::Ocr);
        // Original upload plus the analyzed part.
        assert_eq!(world.files.len(), 2);
    }

    #[tokio::test]
    async fn test_ocr_extraction_makes_no_model_calls() {
        let world = TestWorld::new();
        let ocr = Arc::new(ScriptedOcr::new(vec![Ok(ocr_expense(false))]));
        let model = Arc::new(ScriptedModel::new(Vec::new()));
        let p = pipeline(world.collaborators(Some(model.clone()), Some(ocr.clone())));

        let data = pdf_with_pages(&[ACME_PAGE]);
        let persisted = p
            .ingest_bytes(&data, "org-1", "user-1", "acme.pdf")
            .await
            .unwrap();

        assert_eq!(persisted.len(), 1);
        assert_eq!(ocr.request_count(), 1);
        assert_eq!(model.call_count(), 0);

        let records = world.sink.records();
        assert_eq!(records[0].meta.source, ExtractionSource::Ocr);
    }

    #[tokio::test]
    async fn test_correction_teaches_mapping_applied_on_next_ingest() {
        let world = TestWorld::new();
        let data = pdf_with_pages(&[ACME_PAGE]);

        let ocr = Arc::new(ScriptedOcr::new(vec![Ok(ocr_expense(true))]));
        let p = pipeline(world.collaborators(None, Some(ocr)));
        p.ingest_bytes(&data, "org-1", "user-1", "acme.pdf")
            .await
            .unwrap();

        let first = world.sink.records().remove(0);
        assert_eq!(first.deposit_amount, None);
        assert_eq!(first.raw_payload["AMOUNT_PAID"], "12.50");

        p.learn_from_corrections(
            "org-1",
            &first,
            ACME_PAGE,
            &[FieldCorrection {
                field: "deposit_amount".to_string(),
                value: "12.50".to_string(),
            }],
        )
        .await
        .unwrap();

        let mappings = world
            .mappings
            .list_for_vendor("org-1", "acme foods")
            .await
            .unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].raw_key, "AMOUNT_PAID");

        let ocr = Arc::new(ScriptedOcr::new(vec![Ok(ocr_expense(true))]));
        let p = pipeline(world.collaborators(None, Some(ocr)));
        p.ingest_bytes(&data, "org-1", "user-1", "acme-2.pdf")
            .await
            .unwrap();

        let second = world.sink.records().remove(1);
        assert_eq!(
            second.deposit_amount,
            Some(Decimal::from_str("12.50").unwrap())
        );
    }

    #[tokio::test]
    async fn test_category_backfill_from_earlier_invoices() {
        let world = TestWorld::new();
        world.sink.seed_category("org-1", "A123", "BAKERY");
        world.templates.upsert("org-1", &acme_template()).await.unwrap();
        let p = pipeline(world.collaborators(None, None));

        let data = pdf_with_pages(&[ACME_PAGE]);
        p.ingest_bytes(&data, "org-1", "user-1", "acme.pdf")
            .await
            .unwrap();

        let records = world.sink.records();
        assert_eq!(
            records[0].line_items[0].category_code.as_deref(),
            Some("BAKERY")
        );
        assert_eq!(records[0].line_items[1].category_code, None);
    }

    #[tokio::test]
    async fn test_arithmetic_enforced_before_persist() {
        let world = TestWorld::new();
        let mut template = acme_template();
        template.fields.insert(
            crate::models::LINE_ITEM_FIELD.to_string(),
            // Captures a wrong printed amount for the first line.
            r"^(?P<sku>[A-Z]\d{3})\s+(?P<description>.+?)\s+(?P<quantity>\d+)\s+@\s+(?P<unit_cost>[\d.]+)\s+(?P<amount>[\d.]+)\s*$"
                .to_string(),
        );
        world.templates.upsert("org-1", &template).await.unwrap();
        let p = pipeline(world.collaborators(None, None));

        let page = ACME_PAGE.replace("2 @ 12.50 25.00", "2 @ 12.50 99.00");
        let data = pdf_with_pages(&[&page]);
        p.ingest_bytes(&data, "org-1", "user-1", "acme.pdf")
            .await
            .unwrap();

        let records = world.sink.records();
        assert_eq!(
            records[0].line_items[0].amount,
            Decimal::from_str("25.00").unwrap()
        );
        assert!(
            records[0]
                .meta
                .warnings
                .iter()
                .any(|w| w.contains("amount"))
        );
    }

    struct FailingSink;

    #[async_trait]
    impl InvoiceSink for FailingSink {
        async fn persist(
            &self,
            _context: &IngestContext,
            _record: &InvoiceRecord,
        ) -> crate::services::Result<PersistedInvoice> {
            Err(ServiceError::Storage("sink offline".to_string()))
        }

        async fn category_for_sku(
            &self,
            _organization_id: &str,
            _sku: &str,
        ) -> crate::services::Result<Option<String>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_all_parts_failing_is_an_error() {
        let world = TestWorld::new();
        let mut services = world.collaborators(None, None);
        services.sink = Arc::new(FailingSink);
        let p = IngestionPipeline::new(PipelineConfig::default(), services);

        let data = pdf_with_pages(&["Some invoice text"]);
        let err = p
            .ingest_bytes(&data, "org-1", "user-1", "doomed.pdf")
            .await
            .unwrap_err();

        assert!(matches!(err, FactureError::NoInvoices { ref file } if file == "doomed.pdf"));
    }

    #[tokio::test]
    async fn test_unreadable_bytes_are_rejected() {
        let world = TestWorld::new();
        let p = pipeline(world.collaborators(None, None));

        let err = p
            .ingest_bytes(b"not a pdf", "org-1", "user-1", "junk.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, FactureError::Pdf(_)));
    }
}
