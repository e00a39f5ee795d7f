//! Regex template matching, the cheapest extraction tier.

use std::time::Instant;

use regex::{Captures, Regex, RegexBuilder};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::fields::{apply_field, parse_currency, parse_money, parse_quantity};
use crate::extract::Outcome;
use crate::models::config::ExtractionConfig;
use crate::models::{
    ExtractionSource, InvoiceRecord, LINE_ITEM_FIELD, LineItem, VendorTemplate,
};

/// Try templates in order and extract with the first one that qualifies.
/// A template qualifies when all of its keywords occur in the text,
/// case-insensitively, and its patterns resolve an invoice number, a
/// positive total, and at least one line item. A keyword match whose
/// required fields stay unresolved does not end the search; when no
/// template qualifies the tier reports no match and the cascade moves on.
pub fn match_template(
    text: &str,
    templates: &[VendorTemplate],
    config: &ExtractionConfig,
) -> Outcome {
    let lower = text.to_lowercase();
    for template in templates {
        if !template.is_usable() || !keywords_present(&lower, template) {
            continue;
        }
        debug!(vendor = %template.vendor, "template keywords matched");
        if let Some(record) = extract_with(template, text, config) {
            return Outcome::Extracted(Box::new(record));
        }
        debug!(vendor = %template.vendor, "template matched but required fields unresolved");
    }
    Outcome::NoMatch
}

fn keywords_present(lower_text: &str, template: &VendorTemplate) -> bool {
    template
        .keywords
        .iter()
        .all(|keyword| lower_text.contains(&keyword.to_lowercase()))
}

fn extract_with(
    template: &VendorTemplate,
    text: &str,
    config: &ExtractionConfig,
) -> Option<InvoiceRecord> {
    let started = Instant::now();
    let day_first = template.options.day_first_dates;

    let mut record = InvoiceRecord::empty(&config.default_currency);
    record.meta.source = ExtractionSource::Template;
    record.vendor_name = template.vendor.clone();
    if let Some(currency) = template.options.currency.as_deref().and_then(parse_currency) {
        record.currency = currency;
    }

    for (field, pattern) in &template.fields {
        if field == LINE_ITEM_FIELD {
            continue;
        }
        let regex = match compile(pattern) {
            Some(regex) => regex,
            None => {
                warn!(vendor = %template.vendor, field = %field, "invalid field pattern");
                continue;
            }
        };
        if let Some(caps) = regex.captures(text) {
            if let Some(value) = caps.get(1).or_else(|| caps.get(0)) {
                apply_field(&mut record, field, value.as_str(), day_first);
            }
        }
    }

    if let Some(pattern) = template.fields.get(LINE_ITEM_FIELD) {
        match compile(pattern) {
            Some(regex) => record.line_items = capture_line_items(&regex, text),
            None => warn!(vendor = %template.vendor, "invalid line item pattern"),
        }
    }

    if record.invoice_number.is_empty()
        || record.total_amount <= Decimal::ZERO
        || record.line_items.is_empty()
    {
        return None;
    }

    record.meta.mean_confidence = record.mean_line_confidence();
    record.meta.processing_time_ms = Some(started.elapsed().as_millis() as u64);
    Some(record)
}

fn compile(pattern: &str) -> Option<Regex> {
    RegexBuilder::new(pattern).multi_line(true).build().ok()
}

fn capture_line_items(regex: &Regex, text: &str) -> Vec<LineItem> {
    let mut items = Vec::new();
    for caps in regex.captures_iter(text) {
        let description = group(&caps, "description").unwrap_or_default();
        let quantity = group(&caps, "quantity")
            .and_then(|v| parse_quantity(&v))
            .unwrap_or(Decimal::ONE);
        let unit_cost = group(&caps, "unit_cost")
            .and_then(|v| parse_money(&v))
            .unwrap_or(Decimal::ZERO);
        let amount = group(&caps, "amount")
            .and_then(|v| parse_money(&v))
            .unwrap_or_else(|| quantity * unit_cost);

        if description.is_empty() && amount.is_zero() {
            continue;
        }

        items.push(LineItem {
            sku: group(&caps, "sku"),
            description,
            units_per_case: group(&caps, "units_per_case").and_then(|v| parse_quantity(&v)),
            cases: group(&caps, "cases").and_then(|v| parse_quantity(&v)),
            quantity,
            unit_cost,
            case_cost: group(&caps, "case_cost").and_then(|v| parse_money(&v)),
            amount,
            category_code: None,
            confidence: 1.0,
        });
    }
    items
}

fn group(caps: &Captures<'_>, name: &str) -> Option<String> {
    caps.name(name)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}
