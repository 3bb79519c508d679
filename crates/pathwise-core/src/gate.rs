//! Progression gate.
//!
//! Answers whether a patient may enter a protocol step: the step's safety
//! rules decide, the medication interaction table advises.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::evidence::Evidence;
use crate::patient::PatientData;
use crate::protocol::{Protocol, ProtocolStep};
use crate::safety::{check_interactions, Interaction, SafetyEvaluator, TriggeredRule};
use crate::types::TherapyType;
use crate::EngineError;

/// Verdict on entering a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressionCheck {
    /// No blocking safety rule fired
    pub can_progress: bool,

    pub risk_score: u8,

    pub blockers: Vec<TriggeredRule>,

    pub warnings: Vec<TriggeredRule>,

    /// Informational rules that fired
    pub risk_factors: Vec<TriggeredRule>,

    /// Advisory; never changes `can_progress`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interactions: Vec<Interaction>,
}

impl ProgressionCheck {
    /// Anything at all for clinical staff to review.
    pub fn needs_review(&self) -> bool {
        !self.blockers.is_empty()
            || !self.warnings.is_empty()
            || !self.risk_factors.is_empty()
            || !self.interactions.is_empty()
    }
}

/// Gate entry into `step`.
///
/// When `therapy` is given, the patient's medications are also checked
/// against the interaction table.
pub fn can_progress(
    step: &ProtocolStep,
    patient: &PatientData,
    therapy: Option<TherapyType>,
) -> ProgressionCheck {
    let mut report = SafetyEvaluator::new().check_contraindications(patient, &step.safety_rules);
    for triggered in report
        .blockers
        .iter_mut()
        .chain(report.warnings.iter_mut())
        .chain(report.infos.iter_mut())
    {
        triggered.evidence.push(Evidence::from_protocol(
            format!("Safety rule of step '{}'", step.title),
            format!("steps.{}.safety_rules[{}]", step.id, triggered.rule_index),
        ));
    }

    let interactions = therapy
        .map(|therapy| check_interactions(&patient.medications(), therapy))
        .unwrap_or_default();

    if !report.eligible {
        warn!(
            step = %step.id,
            blockers = report.blockers.len(),
            "Progression blocked by safety rules"
        );
    } else {
        debug!(
            step = %step.id,
            risk_score = report.risk_score,
            interactions = interactions.len(),
            "Progression allowed"
        );
    }

    ProgressionCheck {
        can_progress: report.eligible,
        risk_score: report.risk_score,
        blockers: report.blockers,
        warnings: report.warnings,
        risk_factors: report.infos,
        interactions,
    }
}

/// Gate entry into the step at `sequence_order` of `protocol`.
///
/// Interactions are checked against the protocol's therapy type.
pub fn can_progress_to_step(
    protocol: &Protocol,
    sequence_order: u32,
    patient: &PatientData,
) -> Result<ProgressionCheck, EngineError> {
    let step = protocol
        .step_at(sequence_order)
        .ok_or(EngineError::NoStepAtSequence {
            order: sequence_order,
        })?;
    Ok(can_progress(step, patient, Some(protocol.info.therapy_type)))
}
