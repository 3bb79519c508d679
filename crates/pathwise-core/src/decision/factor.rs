//! Factor evaluation: one datum in, one label out.

use serde_json::Value;
use tracing::trace;

use crate::patient::PatientData;
use crate::EngineError;

use super::{Band, EqualsCondition, Factor, FactorOperator};

/// Resolve a factor against patient data to its outcome label.
///
/// The returned label borrows from the factor definition.
///
/// # Errors
///
/// * `MissingFactorData` - the dotted path does not resolve to a value
/// * `NonNumericFactor` - a range/threshold operator met a non-numeric value
/// * `NoMatchingRange` - no band contains the value
/// * `NoMatchingCondition` - no `equals` condition matches the value
/// * `MissingBooleanLabel` - a boolean factor lacks one of its labels
pub fn evaluate_factor<'f>(
    factor: &'f Factor,
    patient: &PatientData,
) -> Result<&'f str, EngineError> {
    let value = patient
        .lookup(&factor.path)
        .ok_or_else(|| EngineError::MissingFactorData {
            factor: factor.path.clone(),
        })?;

    let label = match &factor.operator {
        FactorOperator::InRange { ranges: bands }
        | FactorOperator::Threshold { thresholds: bands } => {
            let number = value.as_f64().ok_or_else(|| EngineError::NonNumericFactor {
                factor: factor.path.clone(),
            })?;
            match_band(bands, number).ok_or_else(|| EngineError::NoMatchingRange {
                factor: factor.path.clone(),
                value: number,
            })?
        }
        FactorOperator::Equals { conditions } => {
            match_condition(conditions, value).ok_or_else(|| EngineError::NoMatchingCondition {
                factor: factor.path.clone(),
                value: value.to_string(),
            })?
        }
        FactorOperator::Boolean {
            true_value,
            false_value,
        } => {
            let missing = |which: &'static str| EngineError::MissingBooleanLabel {
                factor: factor.path.clone(),
                which,
            };
            let true_label = true_value.as_deref().ok_or_else(|| missing("true_value"))?;
            let false_label = false_value.as_deref().ok_or_else(|| missing("false_value"))?;
            if value.as_bool() == Some(true) {
                true_label
            } else {
                false_label
            }
        }
    };

    trace!(
        factor = %factor.path,
        operator = factor.operator.name(),
        label,
        "Factor resolved"
    );

    Ok(label)
}

/// First band containing `value`, scanning in declaration order.
///
/// Bands are half-open `[min, max)`; the last declared band also accepts
/// `value == max` so that a contiguous list covers its closed domain.
pub fn match_band(bands: &[Band], value: f64) -> Option<&str> {
    let last = bands.len().checked_sub(1)?;
    bands
        .iter()
        .enumerate()
        .find(|(i, band)| {
            (band.lower() <= value && value < band.upper())
                || (*i == last && value == band.upper())
        })
        .map(|(_, band)| band.label.as_str())
}

fn match_condition<'c>(conditions: &'c [EqualsCondition], value: &Value) -> Option<&'c str> {
    conditions
        .iter()
        .find(|c| values_equal(&c.value, value))
        .map(|c| c.result.as_str())
}

/// JSON equality, except that numbers compare by value (2 equals 2.0).
fn values_equal(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => expected == actual,
    }
}
