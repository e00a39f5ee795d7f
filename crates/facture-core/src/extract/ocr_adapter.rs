//! Adapter from structured OCR output to canonical records.

use rust_decimal::Decimal;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::Outcome;
use crate::models::config::ExtractionConfig;
use crate::models::{ExtractionSource, InvoiceRecord, LineItem, vendor_key};
use crate::services::ExpenseDocument;
use crate::template::fields::{apply_field, parse_money, parse_quantity};

/// Summary field types the adapter understands, paired with the canonical
/// field they fill. Types outside this list still land in the raw payload,
/// where learned field mappings can pick them up later.
const SUMMARY_FIELDS: &[(&str, &str)] = &[
    ("VENDOR_NAME", "vendor_name"),
    ("VENDOR_ADDRESS", "vendor_address"),
    ("INVOICE_RECEIPT_ID", "invoice_number"),
    ("INVOICE_RECEIPT_DATE", "issue_date"),
    ("DUE_DATE", "due_date"),
    ("PO_NUMBER", "po_number"),
    ("SUBTOTAL", "subtotal"),
    ("TAX", "tax_amount"),
    ("SHIPPING_HANDLING_CHARGE", "shipping_amount"),
    ("DISCOUNT", "discount_amount"),
    ("DEPOSIT", "deposit_amount"),
    ("TOTAL", "total_amount"),
];

/// Build a canonical record from an expense analysis.
///
/// A zero total with no line items, or an unresolvable vendor, is reported
/// as [`Outcome::NoMatch`] so the cascade can fall through to the model
/// tier.
pub fn record_from_expense(document: &ExpenseDocument, config: &ExtractionConfig) -> Outcome {
    let mut record = InvoiceRecord::empty(&config.default_currency);
    record.meta.source = ExtractionSource::Ocr;

    for field in &document.summary_fields {
        let Some((_, canonical)) = SUMMARY_FIELDS
            .iter()
            .find(|(service_type, _)| *service_type == field.field_type)
        else {
            continue;
        };
        if !apply_field(&mut record, canonical, &field.value, false) {
            debug!(
                field_type = %field.field_type,
                value = %field.value,
                "unparseable summary field"
            );
        }
    }

    for item in &document.line_items {
        let description = item.field("ITEM").unwrap_or_default().trim().to_string();
        let sku = item
            .field("PRODUCT_CODE")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        let quantity = item
            .field("QUANTITY")
            .and_then(parse_quantity)
            .unwrap_or(Decimal::ONE);
        let unit_cost = item
            .field("UNIT_PRICE")
            .and_then(parse_money)
            .unwrap_or(Decimal::ZERO);
        let amount = item
            .field("PRICE")
            .and_then(parse_money)
            .unwrap_or_else(|| (quantity * unit_cost).round_dp(2));

        if description.is_empty() && sku.is_none() && amount.is_zero() {
            continue;
        }

        let confidences: Vec<f32> = item.fields.iter().map(|f| f.confidence).collect();
        let confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f32>() / confidences.len() as f32
        };

        record.line_items.push(LineItem {
            sku,
            description,
            quantity,
            unit_cost,
            amount,
            confidence,
            ..LineItem::default()
        });
    }

    reconcile_total(&mut record, config.amount_tolerance);
    record.raw_payload = raw_payload(document);
    record.meta.mean_confidence = record.mean_line_confidence();

    let vendor = vendor_key(&record.vendor_name);
    if !record.has_signal() || vendor.is_empty() {
        debug!(
            vendor = %record.vendor_name,
            total = %record.total_amount,
            lines = record.line_items.len(),
            "expense analysis below acceptance gate"
        );
        return Outcome::NoMatch;
    }

    Outcome::Extracted(Box::new(record))
}

/// Recompute the document total from line amounts plus tax and deposit
/// when the printed total is missing. A non-zero printed total always
/// wins: the analysis may have dropped lines, so a disagreeing line sum
/// is flagged rather than trusted.
fn reconcile_total(record: &mut InvoiceRecord, tolerance: Decimal) {
    if record.line_items.is_empty() {
        return;
    }
    let computed = record.line_total()
        + record.tax_amount.unwrap_or(Decimal::ZERO)
        + record.deposit_amount.unwrap_or(Decimal::ZERO);
    if computed <= Decimal::ZERO {
        return;
    }

    if record.total_amount.is_zero() {
        record.total_amount = computed;
    } else if (record.total_amount - computed).abs() > tolerance {
        record.push_warning(format!(
            "printed total {} disagrees with line sum {}",
            record.total_amount, computed
        ));
    }
}

/// Flatten the analysis into the raw payload kept for mapping learning:
/// summary fields as top-level keys, line items under "items".
fn raw_payload(document: &ExpenseDocument) -> Value {
    let mut payload = Map::new();
    for field in &document.summary_fields {
        payload.insert(field.field_type.clone(), Value::String(field.value.clone()));
    }

    let items: Vec<Value> = document
        .line_items
        .iter()
        .map(|item| {
            let mut entry = Map::new();
            for field in &item.fields {
                entry.insert(field.field_type.clone(), Value::String(field.value.clone()));
            }
            Value::Object(entry)
        })
        .collect();
    if !items.is_empty() {
        payload.insert("items".to_string(), json!(items));
    }

    Value::Object(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{ExpenseField, ExpenseLineItem};
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn analysis() -> ExpenseDocument {
        ExpenseDocument {
            summary_fields: vec![
                ExpenseField::new("VENDOR_NAME", "Acme Foods", 0.99),
                ExpenseField::new("INVOICE_RECEIPT_ID", "INV-1001", 0.97),
                ExpenseField::new("INVOICE_RECEIPT_DATE", "01/15/2024", 0.95),
                ExpenseField::new("TAX", "$2.00", 0.96),
                ExpenseField::new("TOTAL", "$27.00", 0.98),
                ExpenseField::new("AMOUNT_PAID", "12.50", 0.94),
            ],
            line_items: vec![ExpenseLineItem {
                fields: vec![
                    ExpenseField::new("ITEM", "Flour 25lb", 0.98),
                    ExpenseField::new("PRODUCT_CODE", "FL-25", 0.96),
                    ExpenseField::new("QUANTITY", "2", 0.94),
                    ExpenseField::new("UNIT_PRICE", "$12.50", 0.95),
                    ExpenseField::new("PRICE", "$25.00", 0.97),
                ],
            }],
        }
    }

    #[test]
    fn test_maps_summary_and_line_fields() {
        let Outcome::Extracted(record) =
            record_from_expense(&analysis(), &ExtractionConfig::default())
        else {
            panic!("expected extraction");
        };

        assert_eq!(record.vendor_name, "Acme Foods");
        assert_eq!(record.invoice_number, "INV-1001");
        assert_eq!(
            record.issue_date,
            chrono::NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(record.total_amount, dec("27.00"));
        assert_eq!(record.meta.source, ExtractionSource::Ocr);

        let item = &record.line_items[0];
        assert_eq!(item.sku.as_deref(), Some("FL-25"));
        assert_eq!(item.quantity, dec("2"));
        assert_eq!(item.amount, dec("25.00"));
        assert!(item.confidence > 0.9);
    }

    #[test]
    fn test_unknown_summary_types_land_in_raw_payload_only() {
        let Outcome::Extracted(record) =
            record_from_expense(&analysis(), &ExtractionConfig::default())
        else {
            panic!("expected extraction");
        };

        // AMOUNT_PAID has no default mapping; it waits in the payload for a
        // learned field mapping.
        assert_eq!(record.deposit_amount, None);
        assert_eq!(record.raw_payload["AMOUNT_PAID"], "12.50");
        assert_eq!(record.raw_payload["items"][0]["ITEM"], "Flour 25lb");
    }

    #[test]
    fn test_missing_total_recomputed_from_lines() {
        let mut doc = analysis();
        doc.summary_fields.retain(|f| f.field_type != "TOTAL");

        let Outcome::Extracted(record) = record_from_expense(&doc, &ExtractionConfig::default())
        else {
            panic!("expected extraction");
        };
        // 25.00 line + 2.00 tax
        assert_eq!(record.total_amount, dec("27.00"));
    }

    #[test]
    fn test_inconsistent_total_kept_but_flagged() {
        let mut doc = analysis();
        for field in &mut doc.summary_fields {
            if field.field_type == "TOTAL" {
                field.value = "$99.00".to_string();
            }
        }

        let Outcome::Extracted(record) = record_from_expense(&doc, &ExtractionConfig::default())
        else {
            panic!("expected extraction");
        };
        assert_eq!(record.total_amount, dec("99.00"));
        assert_eq!(record.meta.warnings.len(), 1);
        assert!(record.meta.warnings[0].contains("disagrees"));
    }

    #[test]
    fn test_unresolved_vendor_fails_gate() {
        let mut doc = analysis();
        doc.summary_fields.retain(|f| f.field_type != "VENDOR_NAME");

        assert!(matches!(
            record_from_expense(&doc, &ExtractionConfig::default()),
            Outcome::NoMatch
        ));
    }

    #[test]
    fn test_empty_analysis_fails_gate() {
        let doc = ExpenseDocument {
            summary_fields: vec![ExpenseField::new("VENDOR_NAME", "Acme Foods", 0.99)],
            line_items: vec![],
        };
        assert!(matches!(
            record_from_expense(&doc, &ExtractionConfig::default()),
            Outcome::NoMatch
        ));
    }
}
