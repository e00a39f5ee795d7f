//! Field-mapping learning: remembers which raw vendor keys hold which
//! canonical values, learned from user corrections.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::fields::apply_field;
use crate::models::{FieldCorrection, FieldMapping, InvoiceRecord, is_canonical_field};
use crate::services::{MappingRepository, Result};

/// Apply stored mappings to a freshly extracted record. For each mapping,
/// the raw payload value under `raw_key` is parsed into the mapped
/// canonical field, replacing whatever the extractor put there. Reading
/// never touches the stored mappings.
///
/// Returns how many fields were set.
pub fn apply_mappings(
    record: &mut InvoiceRecord,
    mappings: &[FieldMapping],
    day_first: bool,
) -> usize {
    let Some(payload) = record.raw_payload.as_object().cloned() else {
        return 0;
    };

    let mut applied = 0;
    for mapping in mappings {
        if !is_canonical_field(&mapping.field) {
            continue;
        }
        let Some(value) = payload.get(&mapping.raw_key) else {
            continue;
        };
        let text = value_text(value);
        if text.is_empty() {
            continue;
        }
        if apply_field(record, &mapping.field, &text, day_first) {
            debug!(field = %mapping.field, raw_key = %mapping.raw_key, "applied learned mapping");
            applied += 1;
        }
    }
    applied
}

/// Learn mappings from corrections: when a corrected value already sits in
/// the raw payload under some vendor key, that key maps to the corrected
/// field. Each confirmation bumps the mapping's use count.
///
/// Returns how many mappings were recorded.
pub async fn learn_mappings(
    organization_id: &str,
    vendor: &str,
    record: &InvoiceRecord,
    corrections: &[FieldCorrection],
    mappings: &Arc<dyn MappingRepository>,
) -> Result<usize> {
    let Some(payload) = record.raw_payload.as_object() else {
        return Ok(0);
    };

    let mut learned = 0;
    for correction in corrections {
        if !is_canonical_field(&correction.field) {
            continue;
        }
        let corrected = correction.value.trim();
        if corrected.is_empty() {
            continue;
        }

        let hit = payload.iter().find(|(key, value)| {
            key.as_str() != correction.field
                && value_text(value).trim().eq_ignore_ascii_case(corrected)
        });
        if let Some((raw_key, _)) = hit {
            mappings
                .record(organization_id, vendor, &correction.field, raw_key)
                .await?;
            debug!(
                vendor = %vendor,
                field = %correction.field,
                raw_key = %raw_key,
                "learned field mapping"
            );
            learned += 1;
        }
    }
    Ok(learned)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::MemoryMappingRepository;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn record_with_payload(payload: Value) -> InvoiceRecord {
        let mut record = InvoiceRecord::empty("USD");
        record.raw_payload = payload;
        record
    }

    fn repo() -> Arc<dyn MappingRepository> {
        Arc::new(MemoryMappingRepository::new())
    }

    #[test]
    fn test_apply_mapping_sets_canonical_field() {
        let mut record = record_with_payload(serde_json::json!({
            "AMOUNT_PAID": "12.50",
            "TOTAL": "45.00"
        }));
        let mapping = FieldMapping::new("acme foods", "deposit_amount", "AMOUNT_PAID");

        let applied = apply_mappings(&mut record, &[mapping], false);

        assert_eq!(applied, 1);
        assert_eq!(record.deposit_amount, Some(Decimal::from_str("12.50").unwrap()));
    }

    #[test]
    fn test_apply_skips_missing_and_unparseable_values() {
        let mut record = record_with_payload(serde_json::json!({
            "SHIP_DATE": "not a date"
        }));
        let mappings = vec![
            FieldMapping::new("acme", "issue_date", "SHIP_DATE"),
            FieldMapping::new("acme", "deposit_amount", "NO_SUCH_KEY"),
        ];

        assert_eq!(apply_mappings(&mut record, &mappings, false), 0);
        assert_eq!(record.issue_date, None);
        assert_eq!(record.deposit_amount, None);
    }

    #[test]
    fn test_apply_without_payload_is_a_noop() {
        let mut record = InvoiceRecord::empty("USD");
        let mapping = FieldMapping::new("acme", "deposit_amount", "AMOUNT_PAID");
        assert_eq!(apply_mappings(&mut record, &[mapping], false), 0);
    }

    #[tokio::test]
    async fn test_learn_records_mapping_from_matching_raw_value() {
        let repo = repo();
        let record = record_with_payload(serde_json::json!({
            "AMOUNT_PAID": "12.50",
            "TOTAL": "45.00"
        }));
        let corrections = vec![FieldCorrection {
            field: "deposit_amount".to_string(),
            value: "12.50".to_string(),
        }];

        let learned = learn_mappings("org-1", "acme foods", &record, &corrections, &repo)
            .await
            .unwrap();
        assert_eq!(learned, 1);

        let stored = repo.list_for_vendor("org-1", "acme foods").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].field, "deposit_amount");
        assert_eq!(stored[0].raw_key, "AMOUNT_PAID");
        assert_eq!(stored[0].use_count, 1);
    }

    #[tokio::test]
    async fn test_repeated_confirmation_bumps_use_count() {
        let repo = repo();
        let record = record_with_payload(serde_json::json!({"AMOUNT_PAID": "12.50"}));
        let corrections = vec![FieldCorrection {
            field: "deposit_amount".to_string(),
            value: "12.50".to_string(),
        }];

        for _ in 0..3 {
            learn_mappings("org-1", "acme foods", &record, &corrections, &repo)
                .await
                .unwrap();
        }

        let stored = repo.list_for_vendor("org-1", "acme foods").await.unwrap();
        assert_eq!(stored[0].use_count, 3);
    }

    #[tokio::test]
    async fn test_learn_ignores_unmatched_and_non_canonical_corrections() {
        let repo = repo();
        let record = record_with_payload(serde_json::json!({"AMOUNT_PAID": "12.50"}));
        let corrections = vec![
            FieldCorrection {
                field: "deposit_amount".to_string(),
                value: "99.99".to_string(),
            },
            FieldCorrection {
                field: "favorite_color".to_string(),
                value: "12.50".to_string(),
            },
        ];

        let learned = learn_mappings("org-1", "acme", &record, &corrections, &repo)
            .await
            .unwrap();
        assert_eq!(learned, 0);
        assert!(repo.list_for_vendor("org-1", "acme").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_learn_skips_self_mapping() {
        let repo = repo();
        let record = record_with_payload(serde_json::json!({"deposit_amount": "12.50"}));
        let corrections = vec![FieldCorrection {
            field: "deposit_amount".to_string(),
            value: "12.50".to_string(),
        }];

        let learned = learn_mappings("org-1", "acme", &record, &corrections, &repo)
            .await
            .unwrap();
        assert_eq!(learned, 0);
    }
}
