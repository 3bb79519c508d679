//! # pathwise-core
//!
//! Deterministic decision and safety evaluation for treatment protocols.
//!
//! This crate answers, for one patient on one protocol:
//! - Which step is the patient on?
//! - Where does a decision point send them?
//! - May they enter the next step, and at what risk?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same protocol and patient data always produce the same outcome
//! 2. **Read-only**: Protocols, patient data and completion sets are borrowed, never mutated
//! 3. **Traceable**: Every triggered rule names the datum that triggered it
//! 4. **Parallel-safe**: No shared state; evaluations for different patients never contend
//!
//! ## Example
//!
//! ```rust,ignore
//! use pathwise_core::{evaluate_transition, PatientData, Protocol, TreatmentInstance};
//!
//! let protocol = Protocol::from_yaml_file("psilocybin.yaml")?;
//! let instance = TreatmentInstance::new(protocol.info.id).with_completed(completed);
//! let transition = evaluate_transition(&protocol, &instance, Some(&patient))?;
//!
//! match transition.gate {
//!     Some(check) if !check.can_progress => println!("BLOCKED: {}", check.blockers[0].message),
//!     Some(_) => println!("NEXT: {:?}", transition.next),
//!     None => println!("COMPLETE"),
//! }
//! ```

pub mod decision;
pub mod evidence;
pub mod gate;
pub mod navigator;
pub mod patient;
pub mod protocol;
pub mod safety;
pub mod types;

// Re-export main types at crate root
pub use decision::{evaluate_decision_point, DecisionMatrix, EvaluationRule, Factor, FactorOperator};
pub use evidence::{Evidence, EvidenceSource};
pub use gate::{can_progress, can_progress_to_step, ProgressionCheck};
pub use navigator::{SessionRecord, SessionStatus, StepNavigator, TreatmentInstance};
pub use patient::{Medication, PatientData};
pub use protocol::{BranchOutcome, Protocol, ProtocolError, ProtocolInfo, ProtocolStep};
pub use safety::{
    check_contraindications, check_interactions, Condition, Interaction, SafetyReport,
    SafetyRule, TriggeredRule,
};
pub use types::{CheckType, Comparison, Severity, StepId, StepType, TherapyType};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while evaluating a protocol against patient data.
///
/// None of these are transient. Each is either a defect in the protocol's
/// authoring or a gap in the supplied patient data; see [`ErrorClass`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Step {step} is a decision point without evaluation rules")]
    MissingEvaluationRules { step: StepId },

    #[error("Decision matrix has no entry for '{key}' and no default (available: {})", .available.join(", "))]
    NoMatrixEntry { key: String, available: Vec<String> },

    #[error("Step {step} produced outcome '{outcome}' with no branch")]
    NoBranchForOutcome { step: StepId, outcome: String },

    #[error("No step at sequence order {order}")]
    NoStepAtSequence { order: u32 },

    #[error("Boolean factor '{factor}' is missing its {which}")]
    MissingBooleanLabel { factor: String, which: &'static str },

    #[error("Patient data has no value for factor '{factor}'")]
    MissingFactorData { factor: String },

    #[error("Factor '{factor}' needs a numeric value")]
    NonNumericFactor { factor: String },

    #[error("Decision point {step} needs patient data")]
    MissingPatientData { step: StepId },

    #[error("Value {value} of factor '{factor}' is outside every declared range")]
    NoMatchingRange { factor: String, value: f64 },

    #[error("Value {value} of factor '{factor}' matches no declared condition")]
    NoMatchingCondition { factor: String, value: String },
}

/// Who has to act on an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The protocol definition is malformed; protocol administrators fix it
    Authoring,
    /// The caller supplied too little patient data
    DataCompleteness,
    /// The patient's value falls outside the protocol's declared coverage
    DomainBoundary,
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::MissingEvaluationRules { .. }
            | EngineError::NoMatrixEntry { .. }
            | EngineError::NoBranchForOutcome { .. }
            | EngineError::NoStepAtSequence { .. }
            | EngineError::MissingBooleanLabel { .. } => ErrorClass::Authoring,
            EngineError::MissingFactorData { .. }
            | EngineError::NonNumericFactor { .. }
            | EngineError::MissingPatientData { .. } => ErrorClass::DataCompleteness,
            EngineError::NoMatchingRange { .. } | EngineError::NoMatchingCondition { .. } => {
                ErrorClass::DomainBoundary
            }
        }
    }
}

/// Short reference to a step in results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRef {
    pub id: StepId,
    pub sequence_order: u32,
    pub title: String,
    pub step_type: StepType,
}

impl From<&ProtocolStep> for StepRef {
    fn from(step: &ProtocolStep) -> Self {
        Self {
            id: step.id,
            sequence_order: step.sequence_order,
            title: step.title.clone(),
            step_type: step.step_type,
        }
    }
}

/// Where a patient stands and where they go next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// `None` once the protocol is complete
    pub current: Option<StepRef>,

    /// Outcome of the current step when it is a decision point
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,

    pub next: Option<StepRef>,

    /// Gate on entering `next`; only present when a next step exists and
    /// patient data was supplied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<ProgressionCheck>,

    pub complete: bool,
}

/// Run the full navigation flow for a treatment instance.
///
/// Finds the current step, resolves its successor (evaluating the decision
/// point if needed), and gates entry into the successor with its safety
/// rules and the protocol therapy's interaction table. Nothing is recorded;
/// the caller persists the completion once it accepts the result.
pub fn evaluate_transition(
    protocol: &Protocol,
    instance: &TreatmentInstance,
    patient: Option<&PatientData>,
) -> Result<Transition, EngineError> {
    let navigator = StepNavigator::new(protocol);

    let Some(current) = navigator.current_step(instance) else {
        return Ok(Transition {
            current: None,
            outcome: None,
            next: None,
            gate: None,
            complete: true,
        });
    };

    let (outcome, next) = navigator.resolve_next(current, patient)?;

    let gate = match (next, patient) {
        (Some(step), Some(patient)) => {
            Some(can_progress(step, patient, Some(protocol.info.therapy_type)))
        }
        _ => None,
    };

    Ok(Transition {
        current: Some(current.into()),
        outcome: outcome.map(str::to_string),
        next: next.map(StepRef::from),
        gate,
        complete: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PROTOCOL: &str = r#"
id: 11
name: "MDMA-Assisted Therapy for PTSD"
version: "1.2"
therapy_type: mdma
condition_treated: PTSD
steps:
  - id: 101
    sequence_order: 1
    step_type: screening
    title: "Screening"
  - id: 102
    sequence_order: 2
    step_type: decision_point
    title: "Readiness Review"
    evaluation_rules:
      type: single_factor
      factor:
        factor: assessment.ready
        operator: boolean
        true_value: proceed
        false_value: defer
    branch_outcomes:
      - { outcome_id: proceed, next_step_order: 3 }
      - { outcome_id: defer, next_step_order: 4 }
  - id: 103
    sequence_order: 3
    step_type: dosing
    title: "Dosing Session"
    safety_rules:
      - condition: { type: age, operator: less_than, threshold: 18 }
        severity: blocking
  - id: 104
    sequence_order: 4
    step_type: preparation
    title: "Additional Preparation"
"#;

    #[test]
    fn test_full_transition() {
        let protocol = Protocol::from_yaml(PROTOCOL).unwrap();
        let instance = TreatmentInstance::new(11).with_completed([StepId(101)]);
        let patient = PatientData::new(json!({
            "age": 34,
            "assessment": {"ready": true},
            "medications": [{"name": "Sertraline", "class": "SSRI"}]
        }));

        let transition = evaluate_transition(&protocol, &instance, Some(&patient)).unwrap();
        assert_eq!(transition.current.unwrap().id, StepId(102));
        assert_eq!(transition.outcome.as_deref(), Some("proceed"));
        assert_eq!(transition.next.unwrap().id, StepId(103));

        let gate = transition.gate.unwrap();
        assert!(gate.can_progress);
        assert_eq!(gate.interactions.len(), 1);
        assert!(!transition.complete);
    }

    #[test]
    fn test_blocked_transition() {
        let protocol = Protocol::from_yaml(PROTOCOL).unwrap();
        let instance = TreatmentInstance::new(11).with_completed([StepId(101)]);
        let patient = PatientData::new(json!({"age": 16, "assessment": {"ready": true}}));

        let transition = evaluate_transition(&protocol, &instance, Some(&patient)).unwrap();
        let gate = transition.gate.unwrap();
        assert!(!gate.can_progress);
        assert_eq!(gate.risk_score, 100);
    }

    #[test]
    fn test_decision_without_patient() {
        let protocol = Protocol::from_yaml(PROTOCOL).unwrap();
        let instance = TreatmentInstance::new(11).with_completed([StepId(101)]);
        let err = evaluate_transition(&protocol, &instance, None).unwrap_err();
        assert_eq!(err.class(), ErrorClass::DataCompleteness);
    }

    #[test]
    fn test_linear_without_patient() {
        let protocol = Protocol::from_yaml(PROTOCOL).unwrap();
        let instance = TreatmentInstance::new(11);
        let transition = evaluate_transition(&protocol, &instance, None).unwrap();
        assert_eq!(transition.current.unwrap().id, StepId(101));
        assert_eq!(transition.next.unwrap().id, StepId(102));
        assert!(transition.gate.is_none());
    }

    #[test]
    fn test_complete_instance() {
        let protocol = Protocol::from_yaml(PROTOCOL).unwrap();
        let instance = TreatmentInstance::new(11).with_completed(protocol.step_ids());
        let transition = evaluate_transition(&protocol, &instance, None).unwrap();
        assert!(transition.complete);
        assert!(transition.current.is_none());
    }

    #[test]
    fn test_demo_protocol() {
        let protocol =
            Protocol::from_yaml_strict(include_str!("../../../demos/psilocybin-depression.yaml"))
                .unwrap();
        let patient: PatientData =
            serde_json::from_str(include_str!("../../../demos/patient.json")).unwrap();
        let instance = TreatmentInstance::new(1).with_completed([StepId(1), StepId(2)]);

        let transition = evaluate_transition(&protocol, &instance, Some(&patient)).unwrap();
        assert_eq!(transition.outcome.as_deref(), Some("15mg"));
        assert_eq!(transition.next.unwrap().sequence_order, 4);

        let gate = transition.gate.unwrap();
        assert!(gate.can_progress);
        assert_eq!(gate.interactions.len(), 1);
        assert_eq!(gate.interactions[0].medication_class, "SSRI");
    }

    #[test]
    fn test_error_classes() {
        let authoring = EngineError::NoStepAtSequence { order: 4 };
        let data = EngineError::MissingFactorData {
            factor: "patient.weight_kg".to_string(),
        };
        let boundary = EngineError::NoMatchingRange {
            factor: "gad7_score".to_string(),
            value: 30.0,
        };
        assert_eq!(authoring.class(), ErrorClass::Authoring);
        assert_eq!(data.class(), ErrorClass::DataCompleteness);
        assert_eq!(boundary.class(), ErrorClass::DomainBoundary);
    }

    #[test]
    fn test_error_messages() {
        let err = EngineError::NoMatrixEntry {
            key: "low + high".to_string(),
            available: vec!["low + low".to_string(), "high + high".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Decision matrix has no entry for 'low + high' and no default (available: low + low, high + high)"
        );
    }
}
