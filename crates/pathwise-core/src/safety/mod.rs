//! Tiered safety evaluation.
//!
//! Safety rules are attached to protocol steps and evaluated against patient
//! data before a patient may enter the step:
//!
//! - **blocking** (absolute contraindication): patient is not eligible
//! - **warning** (relative contraindication): eligible, adds to the risk score
//! - **info** (risk factor): tracked, adds a little to the risk score
//!
//! Missing lab values, vital signs or age never trigger a rule. Absence of
//! data is not evidence of risk.
//!
//! The medication interaction table in [`interactions`] layers
//! category-level advice on top of the rule-driven checks.

pub mod conditions;
pub mod evaluator;
pub mod interactions;

pub use conditions::{evaluate_condition, ConditionMatch};
pub use evaluator::{calculate_risk_score, check_contraindications, SafetyEvaluator};
pub use interactions::{check_interactions, Interaction};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::evidence::Evidence;
use crate::types::{CheckType, Comparison, Severity, StepId};

/// How a diagnosis condition matches the diagnosis list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisMatch {
    /// Any diagnosis containing the code (F20 matches F20.0, F20.1)
    #[default]
    Contains,
    /// A diagnosis equal to the code
    Exact,
}

/// How a medication condition matches the medication list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedicationMatch {
    /// Drug class equals the value
    ClassMatch,
    /// Medication name equals the value
    #[default]
    NameMatch,
}

/// The patient condition a safety rule tests for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Diagnosis {
        value: String,
        #[serde(default)]
        operator: DiagnosisMatch,
    },
    Medication {
        value: String,
        #[serde(default)]
        operator: MedicationMatch,
    },
    LabValue {
        name: String,
        operator: Comparison,
        threshold: f64,
    },
    Age {
        operator: Comparison,
        threshold: f64,
    },
    VitalSign {
        name: String,
        operator: Comparison,
        threshold: f64,
    },
}

impl Condition {
    pub fn kind(&self) -> &'static str {
        match self {
            Condition::Diagnosis { .. } => "diagnosis",
            Condition::Medication { .. } => "medication",
            Condition::LabValue { .. } => "lab_value",
            Condition::Age { .. } => "age",
            Condition::VitalSign { .. } => "vital_sign",
        }
    }
}

/// A safety rule attached to a protocol step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    /// Owning step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,

    /// Clinical classification; implied by severity when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_type: Option<CheckType>,

    pub condition: Condition,

    pub severity: Severity,

    /// Whether a clinician may override a triggered rule.
    /// Override is caller policy; the engine only reports it.
    #[serde(default, deserialize_with = "bool_or_string")]
    pub override_allowed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_requirements: Option<Value>,

    /// Citation for the rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_source: Option<String>,
}

impl SafetyRule {
    pub fn new(condition: Condition, severity: Severity) -> Self {
        Self {
            id: None,
            step_id: None,
            check_type: None,
            condition,
            severity,
            override_allowed: false,
            override_requirements: None,
            evidence_source: None,
        }
    }

    pub fn blocking(condition: Condition) -> Self {
        Self::new(condition, Severity::Blocking)
    }

    pub fn warning(condition: Condition) -> Self {
        Self::new(condition, Severity::Warning).overridable()
    }

    pub fn info(condition: Condition) -> Self {
        Self::new(condition, Severity::Info)
    }

    /// Allow clinician override, builder style.
    pub fn overridable(mut self) -> Self {
        self.override_allowed = true;
        self
    }

    pub fn check_type(&self) -> CheckType {
        self.check_type.unwrap_or_else(|| self.severity.into())
    }
}

/// Accept `true`/`false` as booleans or as the strings stored by older
/// protocol exports.
fn bool_or_string<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(flag) => Ok(flag),
        Flag::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected true or false, got '{}'",
                other
            ))),
        },
    }
}

/// A safety rule that fired for this patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredRule {
    /// Position of the rule in the evaluated list
    pub rule_index: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<u64>,

    pub severity: Severity,

    pub check_type: CheckType,

    /// Human-readable explanation naming the offending datum
    pub message: String,

    pub override_allowed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_requirements: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_source: Option<String>,

    pub condition: Condition,

    pub evidence: Vec<Evidence>,
}

/// Outcome of evaluating a set of safety rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyReport {
    /// No blocking rule fired
    pub eligible: bool,

    /// 0-100, see [`calculate_risk_score`]
    pub risk_score: u8,

    pub blockers: Vec<TriggeredRule>,

    pub warnings: Vec<TriggeredRule>,

    pub infos: Vec<TriggeredRule>,
}

impl SafetyReport {
    pub fn triggered_count(&self) -> usize {
        self.blockers.len() + self.warnings.len() + self.infos.len()
    }

    pub fn is_clean(&self) -> bool {
        self.triggered_count() == 0
    }
}
