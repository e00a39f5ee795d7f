//! Tolerant parsing of captured field values into canonical types.
//!
//! Template captures, OCR values, and user corrections all arrive as
//! strings in whatever style the vendor prints: currency symbols, thousands
//! separators in either convention, ordinal day suffixes. Everything here
//! normalizes before it parses.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::models::InvoiceRecord;

lazy_static! {
    /// Digit spans, possibly with grouping/decimal separators inside.
    static ref NUMBER_TOKEN: Regex = Regex::new(r"\d[\d\s,.'\u{00a0}]*\d|\d").unwrap();

    /// Ordinal day suffixes ("15th", "1st") inside date strings.
    static ref ORDINAL_SUFFIX: Regex = Regex::new(r"(?i)\b(\d{1,2})(st|nd|rd|th)\b").unwrap();

    /// Numeric date token inside a noisy value.
    static ref DATE_TOKEN: Regex = Regex::new(r"(\d{1,4}[./-]\d{1,2}[./-]\d{2,4})").unwrap();
}

/// Parse a money value. Handles currency symbols, both grouping
/// conventions ("1,234.56" and "1 234,56"), and accounting negatives
/// in parentheses. Picks the last number in a noisy string.
pub fn parse_money(s: &str) -> Option<Decimal> {
    let trimmed = s.trim();
    let negative =
        trimmed.starts_with('-') || (trimmed.starts_with('(') && trimmed.ends_with(')'));

    let token = NUMBER_TOKEN.find_iter(trimmed).last()?.as_str();
    let value = normalize_number(token)?;
    Some(if negative { -value } else { value })
}

/// Parse a quantity. Picks the first number in the string, so values like
/// "3 @ 1.25" resolve to the count.
pub fn parse_quantity(s: &str) -> Option<Decimal> {
    let token = NUMBER_TOKEN.find(s.trim())?.as_str();
    normalize_number(token)
}

/// Normalize a digit span into a decimal, deciding which separator is the
/// decimal point.
fn normalize_number(token: &str) -> Option<Decimal> {
    let cleaned: String = token
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let has_comma = cleaned.contains(',');
    let has_dot = cleaned.contains('.');

    let normalized = match (has_comma, has_dot) {
        (true, true) => {
            // The later separator is the decimal point.
            let comma_pos = cleaned.rfind(',');
            let dot_pos = cleaned.rfind('.');
            if comma_pos > dot_pos {
                cleaned.replace('.', "").replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (true, false) => {
            // "1,234" is a grouped integer, "12,34" a decimal.
            let after = cleaned.len() - cleaned.rfind(',').unwrap_or(0) - 1;
            if after == 3 {
                cleaned.replace(',', "")
            } else {
                // Multiple commas with a non-3 tail make no sense either way;
                // treat the last as the decimal point.
                let (head, tail) = cleaned.split_at(cleaned.rfind(',').unwrap_or(0));
                format!("{}.{}", head.replace(',', ""), &tail[1..])
            }
        }
        _ => cleaned,
    };

    Decimal::from_str(&normalized).ok()
}

/// Parse a date in the formats vendors commonly print. `day_first` flips
/// ambiguous numeric dates to day/month/year order.
pub fn parse_date(s: &str, day_first: bool) -> Option<NaiveDate> {
    let cleaned = ORDINAL_SUFFIX.replace_all(s.trim(), "$1");
    let cleaned = cleaned.trim().trim_end_matches('.').trim();
    if cleaned.is_empty() {
        return None;
    }

    const YMD: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"];
    const MDY: &[&str] = &["%m/%d/%Y", "%m-%d-%Y", "%m.%d.%Y", "%m/%d/%y"];
    const DMY: &[&str] = &["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%d/%m/%y"];
    const TEXTUAL: &[&str] = &[
        "%B %d, %Y",
        "%B %d %Y",
        "%b %d, %Y",
        "%b %d %Y",
        "%d %B %Y",
        "%d %b %Y",
    ];

    let mut formats: Vec<&str> = Vec::with_capacity(16);
    formats.extend_from_slice(YMD);
    if day_first {
        formats.extend_from_slice(DMY);
        formats.extend_from_slice(MDY);
    } else {
        formats.extend_from_slice(MDY);
        formats.extend_from_slice(DMY);
    }
    formats.extend_from_slice(TEXTUAL);

    for format in &formats {
        if let Ok(date) = NaiveDate::parse_from_str(cleaned, format) {
            return Some(date);
        }
    }

    // Pull a numeric token out of labels like "Date: 01/15/2024 (net 30)".
    let token = DATE_TOKEN.captures(cleaned)?.get(1)?.as_str();
    if token == cleaned {
        return None;
    }
    parse_date(token, day_first)
}

/// Resolve a currency value: a 3-letter code, or a symbol.
pub fn parse_currency(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        return Some(trimmed.to_ascii_uppercase());
    }
    match trimmed {
        "$" => Some("USD".to_string()),
        "€" => Some("EUR".to_string()),
        "£" => Some("GBP".to_string()),
        _ => None,
    }
}

/// Set one canonical header field of a record from a raw string value.
/// Returns false when the value does not parse into the field's type or
/// the field name is not canonical.
pub fn apply_field(record: &mut InvoiceRecord, field: &str, value: &str, day_first: bool) -> bool {
    let value = value.trim();
    if value.is_empty() {
        return false;
    }

    match field {
        "invoice_number" => {
            record.invoice_number = value.to_string();
            true
        }
        "vendor_name" => {
            record.vendor_name = value.to_string();
            true
        }
        "vendor_address" => {
            record.vendor_address = Some(value.to_string());
            true
        }
        "po_number" => {
            record.po_number = Some(value.to_string());
            true
        }
        "currency" => match parse_currency(value) {
            Some(currency) => {
                record.currency = currency;
                true
            }
            None => false,
        },
        "issue_date" => match parse_date(value, day_first) {
            Some(date) => {
                record.issue_date = Some(date);
                true
            }
            None => false,
        },
        "due_date" => match parse_date(value, day_first) {
            Some(date) => {
                record.due_date = Some(date);
                true
            }
            None => false,
        },
        "total_amount" => match parse_money(value) {
            Some(amount) => {
                record.total_amount = amount;
                true
            }
            None => false,
        },
        "subtotal" | "tax_amount" | "deposit_amount" | "shipping_amount" | "discount_amount" => {
            let Some(amount) = parse_money(value) else {
                return false;
            };
            let slot = match field {
                "subtotal" => &mut record.subtotal,
                "tax_amount" => &mut record.tax_amount,
                "deposit_amount" => &mut record.deposit_amount,
                "shipping_amount" => &mut record.shipping_amount,
                _ => &mut record.discount_amount,
            };
            *slot = Some(amount);
            true
        }
        _ => false,
    }
}
