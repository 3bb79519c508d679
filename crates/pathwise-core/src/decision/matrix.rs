//! Decision matrix lookup.

use tracing::{debug, warn};

use crate::EngineError;

use super::DecisionMatrix;

/// Separator placed between factor labels when building a matrix key.
pub const MATRIX_KEY_SEPARATOR: &str = " + ";

/// Build the matrix key for labels in factor declaration order.
pub fn matrix_key<S: AsRef<str>>(labels: &[S]) -> String {
    labels
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(MATRIX_KEY_SEPARATOR)
}

/// Combine factor labels into an outcome through a decision matrix.
///
/// Labels are joined in the order given, which must be the factor
/// declaration order; they are never re-sorted. An exact key wins, then the
/// `default` entry.
///
/// # Errors
///
/// `NoMatrixEntry` when neither the key nor `default` exists. The error lists
/// the available keys for protocol authors.
pub fn combine_factors<'m, S: AsRef<str>>(
    labels: &[S],
    matrix: &'m DecisionMatrix,
) -> Result<&'m str, EngineError> {
    let key = matrix_key(labels);

    if let Some(outcome) = matrix.get(&key) {
        debug!(key = %key, outcome, "Decision matrix hit");
        return Ok(outcome);
    }

    if let Some(outcome) = matrix.default_outcome() {
        warn!(key = %key, outcome, "No decision matrix entry, using default");
        return Ok(outcome);
    }

    Err(EngineError::NoMatrixEntry {
        key,
        available: matrix.keys().map(str::to_string).collect(),
    })
}
