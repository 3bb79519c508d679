//! Decision point evaluation for a protocol step.

use tracing::debug;

use crate::patient::PatientData;
use crate::protocol::ProtocolStep;
use crate::EngineError;

use super::{combine_factors, evaluate_factor, EvaluationRule};

/// Evaluate a decision-point step to an abstract outcome identifier.
///
/// Multi-factor rules evaluate every factor in declared order; the first
/// failing factor aborts the evaluation. The outcome borrows from the step.
pub fn evaluate_decision_point<'s>(
    step: &'s ProtocolStep,
    patient: &PatientData,
) -> Result<&'s str, EngineError> {
    let rules = step
        .evaluation_rules
        .as_ref()
        .ok_or(EngineError::MissingEvaluationRules { step: step.id })?;

    let outcome = evaluate_rule(rules, patient)?;
    debug!(step = %step.id, outcome, "Decision point evaluated");
    Ok(outcome)
}

/// Evaluate bare evaluation rules, independent of any step.
pub fn evaluate_rule<'r>(
    rules: &'r EvaluationRule,
    patient: &PatientData,
) -> Result<&'r str, EngineError> {
    match rules {
        EvaluationRule::SingleFactor { factor } => evaluate_factor(factor, patient),
        EvaluationRule::MultiFactor {
            factors,
            decision_matrix,
        } => {
            let labels = factors
                .iter()
                .map(|factor| evaluate_factor(factor, patient))
                .collect::<Result<Vec<_>, _>>()?;
            combine_factors(&labels, decision_matrix)
        }
    }
}
