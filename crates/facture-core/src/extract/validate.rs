//! Arithmetic validation of extracted line items.

use rust_decimal::Decimal;
use tracing::debug;

use crate::models::InvoiceRecord;

/// Lower bound on the configurable tolerance.
const MIN_TOLERANCE: Decimal = Decimal::from_parts(2, 0, 0, false, 2);

/// Upper bound on the configurable tolerance.
const MAX_TOLERANCE: Decimal = Decimal::from_parts(5, 0, 0, false, 2);

/// Enforce `quantity x unit_cost = amount` on every line within an absolute
/// tolerance.
///
/// Quantities and unit costs missing from case-priced lines are first
/// backfilled from `cases x units_per_case` and `case_cost / units_per_case`,
/// with the derivation recorded as a warning.
/// When a line still disagrees and both factors are positive, the printed
/// amount loses: it is replaced by the computed product and the discrepancy
/// recorded as a warning. A line whose factors are unusable is left alone
/// but flagged.
pub fn enforce_line_arithmetic(record: &mut InvoiceRecord, tolerance: Decimal) {
    let tolerance = tolerance.clamp(MIN_TOLERANCE, MAX_TOLERANCE);
    let mut warnings = Vec::new();

    for (index, item) in record.line_items.iter_mut().enumerate() {
        let line = index + 1;

        if item.quantity <= Decimal::ZERO {
            if let (Some(cases), Some(units)) = (item.cases, item.units_per_case) {
                let derived = cases * units;
                if derived > Decimal::ZERO {
                    debug!(line, %derived, "backfilled quantity from cases");
                    warnings.push(format!(
                        "line {line}: quantity {derived} derived from {cases} cases x {units}"
                    ));
                    item.quantity = derived;
                }
            }
        }

        if item.unit_cost <= Decimal::ZERO {
            if let (Some(case_cost), Some(units)) = (item.case_cost, item.units_per_case) {
                if units > Decimal::ZERO {
                    item.unit_cost = (case_cost / units).round_dp(4);
                }
            }
        }

        if item.quantity > Decimal::ZERO && item.unit_cost <= Decimal::ZERO
            && item.amount > Decimal::ZERO
        {
            // Complete the missing factor instead of judging the amount.
            item.unit_cost = (item.amount / item.quantity).round_dp(4);
            continue;
        }

        let expected = (item.quantity * item.unit_cost).round_dp(2);
        let delta = (expected - item.amount).abs();
        if delta <= tolerance {
            continue;
        }

        if item.quantity > Decimal::ZERO && item.unit_cost > Decimal::ZERO {
            warnings.push(format!(
                "line {line}: amount {} replaced with {} ({} x {})",
                item.amount, expected, item.quantity, item.unit_cost
            ));
            item.amount = expected;
        } else {
            warnings.push(format!(
                "line {line}: amount {} could not be verified",
                item.amount
            ));
        }
    }

    record.meta.warnings.extend(warnings);
}
