//! Protocol parsing from YAML/JSON.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::decision::{EvaluationRule, FactorOperator, MATRIX_KEY_SEPARATOR};
use crate::safety::SafetyRule;
use crate::types::{EvidenceLevel, ProtocolStatus, StepId, StepType, TherapyType};

use super::schema::validate_protocol_schema;

lazy_static! {
    /// Dotted factor path: identifiers separated by single dots.
    static ref FACTOR_PATH_PATTERN: Regex =
        Regex::new(r"^[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)*$").unwrap();
}

/// Errors that can occur when loading protocols.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Failed to read protocol file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Protocol does not match schema: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),

    #[error("Protocol validation failed: {0}")]
    ValidationError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Maps a decision outcome onto the sequence order of the next step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchOutcome {
    pub outcome_id: String,

    pub next_step_order: u32,

    /// Why this branch exists, for clinicians reading the protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl BranchOutcome {
    pub fn new(outcome_id: impl Into<String>, next_step_order: u32) -> Self {
        Self {
            outcome_id: outcome_id.into(),
            next_step_order,
            rationale: None,
        }
    }
}

/// One stage of a protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolStep {
    pub id: StepId,

    /// Owning protocol; filled in from the protocol when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_id: Option<u64>,

    /// Position in the linear order, unique within a protocol
    pub sequence_order: u32,

    pub step_type: StepType,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_roles: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clinical_scales: Vec<String>,

    /// Decision logic, decision points only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_rules: Option<EvaluationRule>,

    /// Outcome to next-step mapping, decision points only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branch_outcomes: Vec<BranchOutcome>,

    /// Safety rules gating entry into this step
    #[serde(default, alias = "safety_checks", skip_serializing_if = "Vec::is_empty")]
    pub safety_rules: Vec<SafetyRule>,
}

impl ProtocolStep {
    pub fn new(id: StepId, sequence_order: u32, step_type: StepType, title: impl Into<String>) -> Self {
        Self {
            id,
            protocol_id: None,
            sequence_order,
            step_type,
            title: title.into(),
            description: None,
            duration_minutes: None,
            required_roles: Vec::new(),
            clinical_scales: Vec::new(),
            evaluation_rules: None,
            branch_outcomes: Vec::new(),
            safety_rules: Vec::new(),
        }
    }

    /// Attach decision logic and branch table, builder style.
    pub fn with_decision(mut self, rules: EvaluationRule, branches: Vec<BranchOutcome>) -> Self {
        self.evaluation_rules = Some(rules);
        self.branch_outcomes = branches;
        self
    }

    /// Attach a safety rule, builder style.
    pub fn with_safety_rule(mut self, rule: SafetyRule) -> Self {
        self.safety_rules.push(rule);
        self
    }

    pub fn is_decision_point(&self) -> bool {
        self.step_type.is_decision_point()
    }

    /// Branch for an outcome, first declared match wins.
    pub fn branch_for(&self, outcome_id: &str) -> Option<&BranchOutcome> {
        self.branch_outcomes
            .iter()
            .find(|branch| branch.outcome_id == outcome_id)
    }
}

/// Descriptive protocol metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolInfo {
    pub id: u64,

    pub name: String,

    pub version: String,

    #[serde(default)]
    pub status: ProtocolStatus,

    pub therapy_type: TherapyType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_treated: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_level: Option<EvidenceLevel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_weeks: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_sessions: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_sources: Vec<String>,
}

impl ProtocolInfo {
    pub fn new(id: u64, name: impl Into<String>, therapy_type: TherapyType) -> Self {
        Self {
            id,
            name: name.into(),
            version: "1.0".to_string(),
            status: ProtocolStatus::default(),
            therapy_type,
            condition_treated: None,
            evidence_level: None,
            overview: None,
            duration_weeks: None,
            total_sessions: None,
            evidence_sources: Vec::new(),
        }
    }
}

/// Wire shape of a protocol document.
#[derive(Deserialize)]
struct ProtocolDocument {
    #[serde(flatten)]
    info: ProtocolInfo,

    #[serde(default)]
    steps: Vec<ProtocolStep>,
}

impl From<ProtocolDocument> for Protocol {
    fn from(doc: ProtocolDocument) -> Self {
        Protocol::new(doc.info, doc.steps)
    }
}

/// A treatment protocol: metadata plus its steps.
///
/// Steps are held in an arena sorted by `sequence_order`; steps refer to
/// each other only through sequence orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ProtocolDocument")]
pub struct Protocol {
    #[serde(flatten)]
    pub info: ProtocolInfo,

    steps: Vec<ProtocolStep>,
}

impl Protocol {
    /// Build a protocol, ordering steps by `sequence_order`.
    pub fn new(info: ProtocolInfo, mut steps: Vec<ProtocolStep>) -> Self {
        steps.sort_by_key(|step| step.sequence_order);
        for step in &mut steps {
            step.protocol_id.get_or_insert(info.id);
        }
        Self { info, steps }
    }

    /// Parse a protocol from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ProtocolError> {
        let protocol: Protocol = serde_yaml::from_str(yaml)?;
        protocol.validate()?;
        Ok(protocol)
    }

    /// Parse a protocol from JSON string.
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        let protocol: Protocol = serde_json::from_str(json)?;
        protocol.validate()?;
        Ok(protocol)
    }

    /// Parse from YAML, checking the raw document against the protocol
    /// schema before deserializing it. JSON is a subset of YAML, so this
    /// accepts both.
    pub fn from_yaml_strict(yaml: &str) -> Result<Self, ProtocolError> {
        let document: serde_json::Value = serde_yaml::from_str(yaml)?;
        validate_protocol_schema(&document).map_err(ProtocolError::SchemaViolation)?;
        let protocol: Protocol = serde_json::from_value(document)?;
        protocol.validate()?;
        Ok(protocol)
    }

    /// Parse a protocol from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse a protocol from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parse a protocol file, choosing the format by extension.
    pub fn from_file(path: impl AsRef<Path>, strict: bool) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        match (strict, is_json) {
            (true, _) => Self::from_yaml_strict(&contents),
            (false, true) => Self::from_json(&contents),
            (false, false) => Self::from_yaml(&contents),
        }
    }

    /// Steps in sequence order.
    pub fn steps(&self) -> &[ProtocolStep] {
        &self.steps
    }

    pub fn step(&self, id: StepId) -> Option<&ProtocolStep> {
        self.steps.iter().find(|step| step.id == id)
    }

    /// Step with the given sequence order.
    pub fn step_at(&self, sequence_order: u32) -> Option<&ProtocolStep> {
        self.steps
            .binary_search_by_key(&sequence_order, |step| step.sequence_order)
            .ok()
            .map(|index| &self.steps[index])
    }

    pub fn step_ids(&self) -> impl Iterator<Item = StepId> + '_ {
        self.steps.iter().map(|step| step.id)
    }

    /// Outcomes a decision point can produce that its branch table does not
    /// list, as `(step id, outcome)` pairs.
    ///
    /// These are not load errors: the navigator reports them as
    /// `NoBranchForOutcome` if a patient ever reaches them.
    pub fn unbranched_outcomes(&self) -> Vec<(StepId, String)> {
        let mut missing = Vec::new();
        for step in self.steps.iter().filter(|s| s.is_decision_point()) {
            let Some(rules) = &step.evaluation_rules else {
                continue;
            };
            let outcomes: Vec<&str> = match rules {
                EvaluationRule::SingleFactor { factor } => factor.operator.labels(),
                EvaluationRule::MultiFactor {
                    decision_matrix, ..
                } => decision_matrix.outcomes().collect(),
            };
            for outcome in outcomes {
                let already = missing
                    .iter()
                    .any(|(id, o): &(StepId, String)| *id == step.id && o == outcome);
                if step.branch_for(outcome).is_none() && !already {
                    missing.push((step.id, outcome.to_string()));
                }
            }
        }
        missing
    }

    /// Validate the protocol structure.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.info.name.is_empty() {
            return Err(ProtocolError::MissingField("name".to_string()));
        }

        if self.info.version.is_empty() {
            return Err(ProtocolError::MissingField("version".to_string()));
        }

        self.validate_unique_steps()?;

        for step in &self.steps {
            self.validate_step(step)?;
        }

        for (step, outcome) in self.unbranched_outcomes() {
            warn!(
                protocol = %self.info.name,
                step = %step,
                outcome = %outcome,
                "Decision outcome has no branch"
            );
        }

        debug!(
            protocol = %self.info.name,
            steps = self.steps.len(),
            "Protocol validated"
        );

        Ok(())
    }

    /// Ensure step ids and sequence orders are unique.
    fn validate_unique_steps(&self) -> Result<(), ProtocolError> {
        let mut ids = HashSet::new();
        let mut orders = HashSet::new();

        for step in &self.steps {
            if !ids.insert(step.id) {
                return Err(ProtocolError::ValidationError(format!(
                    "Duplicate step ID: {}",
                    step.id
                )));
            }
            if !orders.insert(step.sequence_order) {
                return Err(ProtocolError::ValidationError(format!(
                    "Duplicate sequence_order: {}",
                    step.sequence_order
                )));
            }
        }

        Ok(())
    }

    fn validate_step(&self, step: &ProtocolStep) -> Result<(), ProtocolError> {
        let invalid = |message: String| {
            ProtocolError::ValidationError(format!("Step {}: {}", step.id, message))
        };

        if step.title.is_empty() {
            return Err(invalid("title is empty".to_string()));
        }

        if let Some(owner) = step.protocol_id {
            if owner != self.info.id {
                return Err(invalid(format!(
                    "belongs to protocol {} not {}",
                    owner, self.info.id
                )));
            }
        }

        if step.is_decision_point() {
            let rules = step
                .evaluation_rules
                .as_ref()
                .ok_or_else(|| invalid("decision point has no evaluation_rules".to_string()))?;
            if step.branch_outcomes.is_empty() {
                return Err(invalid("decision point has no branch_outcomes".to_string()));
            }
            validate_rules(rules).map_err(invalid)?;
            for branch in &step.branch_outcomes {
                if self.step_at(branch.next_step_order).is_none() {
                    return Err(invalid(format!(
                        "branch {} targets missing sequence_order {}",
                        branch.outcome_id, branch.next_step_order
                    )));
                }
            }
        } else if step.evaluation_rules.is_some() || !step.branch_outcomes.is_empty() {
            return Err(invalid(
                "only decision points may carry evaluation_rules or branch_outcomes".to_string(),
            ));
        }

        for rule in &step.safety_rules {
            if let Some(owner) = rule.step_id {
                if owner != step.id {
                    return Err(invalid(format!("safety rule belongs to step {}", owner)));
                }
            }
        }

        Ok(())
    }
}

fn validate_rules(rules: &EvaluationRule) -> Result<(), String> {
    if let EvaluationRule::MultiFactor {
        factors,
        decision_matrix,
    } = rules
    {
        if factors.is_empty() {
            return Err("multi_factor rule has no factors".to_string());
        }
        if decision_matrix.is_empty() {
            return Err("multi_factor rule has an empty decision_matrix".to_string());
        }
    }

    for factor in rules.factors() {
        if !FACTOR_PATH_PATTERN.is_match(&factor.path) {
            return Err(format!("invalid factor path '{}'", factor.path));
        }

        let empty_bands = match &factor.operator {
            FactorOperator::InRange { ranges: bands }
            | FactorOperator::Threshold { thresholds: bands } => bands.is_empty(),
            FactorOperator::Equals { conditions } => conditions.is_empty(),
            FactorOperator::Boolean { .. } => false,
        };
        if empty_bands {
            return Err(format!(
                "factor '{}' declares no {} entries",
                factor.path,
                factor.operator.name()
            ));
        }

        // Only multi-factor labels are joined into matrix keys
        let joined = matches!(rules, EvaluationRule::MultiFactor { .. });
        if let Some(label) = factor
            .operator
            .labels()
            .into_iter()
            .find(|label| joined && label.contains(MATRIX_KEY_SEPARATOR))
        {
            return Err(format!(
                "factor '{}' label '{}' contains the matrix separator",
                factor.path, label
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINEAR_PROTOCOL: &str = r#"
id: 1
name: "Psilocybin for Treatment-Resistant Depression"
version: "1.0"
status: active
therapy_type: psilocybin
condition_treated: "Treatment-resistant depression"
evidence_level: phase_2_trial
steps:
  - id: 12
    sequence_order: 2
    step_type: preparation
    title: "Preparation Session"
  - id: 11
    sequence_order: 1
    step_type: screening
    title: "Initial Screening"
    safety_checks:
      - condition: { type: diagnosis, value: "F20", operator: contains }
        severity: blocking
  - id: 13
    sequence_order: 3
    step_type: dosing
    title: "Dosing Session"
"#;

    #[test]
    fn test_parse_valid_protocol() {
        let protocol = Protocol::from_yaml(LINEAR_PROTOCOL).unwrap();
        assert_eq!(protocol.info.name, "Psilocybin for Treatment-Resistant Depression");
        assert_eq!(protocol.info.therapy_type, TherapyType::Psilocybin);
        assert_eq!(protocol.info.evidence_level, Some(EvidenceLevel::Phase2));
        assert_eq!(protocol.steps().len(), 3);
        assert_eq!(protocol.steps()[0].safety_rules.len(), 1);
    }

    #[test]
    fn test_steps_sorted_by_sequence() {
        let protocol = Protocol::from_yaml(LINEAR_PROTOCOL).unwrap();
        let orders: Vec<u32> = protocol.steps().iter().map(|s| s.sequence_order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        assert_eq!(protocol.step_at(2).unwrap().id, StepId(12));
        assert!(protocol.step_at(4).is_none());
        assert_eq!(protocol.step(StepId(13)).unwrap().sequence_order, 3);
        assert!(protocol.steps().iter().all(|s| s.protocol_id == Some(1)));
    }

    #[test]
    fn test_json_round_trip_keeps_shape() {
        let protocol = Protocol::from_yaml(LINEAR_PROTOCOL).unwrap();
        let json = serde_json::to_string(&protocol).unwrap();
        let reparsed = Protocol::from_json(&json).unwrap();
        assert_eq!(protocol, reparsed);
    }

    #[test]
    fn test_duplicate_sequence_order() {
        let yaml = r#"
id: 1
name: "Test"
version: "1.0"
therapy_type: ketamine
steps:
  - { id: 1, sequence_order: 1, step_type: screening, title: "A" }
  - { id: 2, sequence_order: 1, step_type: dosing, title: "B" }
"#;
        assert!(matches!(
            Protocol::from_yaml(yaml),
            Err(ProtocolError::ValidationError(_))
        ));
    }

    #[test]
    fn test_duplicate_step_id() {
        let yaml = r#"
id: 1
name: "Test"
version: "1.0"
therapy_type: ketamine
steps:
  - { id: 1, sequence_order: 1, step_type: screening, title: "A" }
  - { id: 1, sequence_order: 2, step_type: dosing, title: "B" }
"#;
        let err = Protocol::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Duplicate step ID"));
    }

    #[test]
    fn test_decision_point_without_rules() {
        let yaml = r#"
id: 1
name: "Test"
version: "1.0"
therapy_type: ketamine
steps:
  - { id: 1, sequence_order: 1, step_type: decision_point, title: "Decide" }
"#;
        let err = Protocol::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("no evaluation_rules"));
    }

    #[test]
    fn test_linear_step_with_branches_rejected() {
        let yaml = r#"
id: 1
name: "Test"
version: "1.0"
therapy_type: ketamine
steps:
  - id: 1
    sequence_order: 1
    step_type: dosing
    title: "Dose"
    branch_outcomes:
      - { outcome_id: "a", next_step_order: 1 }
"#;
        assert!(Protocol::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_branch_to_missing_step() {
        let yaml = r#"
id: 1
name: "Test"
version: "1.0"
therapy_type: mdma
steps:
  - id: 1
    sequence_order: 1
    step_type: decision_point
    title: "Decide"
    evaluation_rules:
      type: single_factor
      factor:
        factor: patient.score
        operator: threshold
        thresholds:
          - { max: 10, value: low }
          - { min: 10, value: high }
    branch_outcomes:
      - { outcome_id: low, next_step_order: 2 }
      - { outcome_id: high, next_step_order: 9 }
  - { id: 2, sequence_order: 2, step_type: dosing, title: "Dose" }
"#;
        let err = Protocol::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("missing sequence_order 9"));
    }

    #[test]
    fn test_invalid_factor_path() {
        let yaml = r#"
id: 1
name: "Test"
version: "1.0"
therapy_type: mdma
steps:
  - id: 1
    sequence_order: 1
    step_type: decision_point
    title: "Decide"
    evaluation_rules:
      type: single_factor
      factor:
        factor: "patient..score"
        operator: boolean
        true_value: yes_branch
        false_value: no_branch
    branch_outcomes:
      - { outcome_id: yes_branch, next_step_order: 2 }
  - { id: 2, sequence_order: 2, step_type: dosing, title: "Dose" }
"#;
        let err = Protocol::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("invalid factor path"));
    }

    #[test]
    fn test_unbranched_outcomes_reported() {
        let yaml = r#"
id: 1
name: "Test"
version: "1.0"
therapy_type: mdma
steps:
  - id: 1
    sequence_order: 1
    step_type: decision_point
    title: "Decide"
    evaluation_rules:
      type: single_factor
      factor:
        factor: patient.score
        operator: threshold
        thresholds:
          - { max: 10, value: low }
          - { min: 10, value: high }
    branch_outcomes:
      - { outcome_id: low, next_step_order: 2 }
  - { id: 2, sequence_order: 2, step_type: dosing, title: "Dose" }
"#;
        let protocol = Protocol::from_yaml(yaml).unwrap();
        assert_eq!(
            protocol.unbranched_outcomes(),
            vec![(StepId(1), "high".to_string())]
        );
    }

    #[test]
    fn test_separator_only_restricted_in_matrix_labels() {
        let single = r#"
id: 1
name: "Test"
version: "1.0"
therapy_type: psilocybin
steps:
  - id: 1
    sequence_order: 1
    step_type: decision_point
    title: "Decide"
    evaluation_rules:
      type: single_factor
      factor:
        factor: patient.gad7
        operator: threshold
        thresholds:
          - { max: 15, value: "25mg" }
          - { min: 15, value: "15mg + integration" }
    branch_outcomes:
      - { outcome_id: "25mg", next_step_order: 2 }
      - { outcome_id: "15mg + integration", next_step_order: 2 }
  - { id: 2, sequence_order: 2, step_type: dosing, title: "Dose" }
"#;
        let protocol = Protocol::from_yaml(single).unwrap();
        assert!(protocol.unbranched_outcomes().is_empty());

        let multi = single
            .replace(
                "      type: single_factor\n      factor:\n        factor: patient.gad7",
                "      type: multi_factor\n      decision_matrix: { default: \"25mg\" }\n      factors:\n      - factor: patient.gad7",
            );
        let err = Protocol::from_yaml(&multi).unwrap_err();
        assert!(err.to_string().contains("contains the matrix separator"));
    }

    #[test]
    fn test_foreign_safety_rule_rejected() {
        let yaml = r#"
id: 1
name: "Test"
version: "1.0"
therapy_type: testosterone
steps:
  - id: 1
    sequence_order: 1
    step_type: screening
    title: "Screen"
    safety_rules:
      - step_id: 7
        condition: { type: age, operator: less_than, threshold: 18 }
        severity: blocking
"#;
        let err = Protocol::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("safety rule belongs to step 7"));
    }

    #[test]
    fn test_strict_parse_rejects_schema_violation() {
        let yaml = r#"
id: 1
name: "Test"
version: "1.0"
therapy_type: testosterone
steps:
  - { id: 1, sequence_order: 0, step_type: screening, title: "Screen" }
"#;
        assert!(Protocol::from_yaml(yaml).is_ok());
        assert!(matches!(
            Protocol::from_yaml_strict(yaml),
            Err(ProtocolError::SchemaViolation(_))
        ));
    }

    #[test]
    fn test_strict_parse_accepts_valid_document() {
        let protocol = Protocol::from_yaml_strict(LINEAR_PROTOCOL).unwrap();
        assert_eq!(protocol.steps().len(), 3);
    }
}
