//! Contraindication checks and risk scoring.
//!
//! Scoring applies fixed policy:
//! 1. Any blocking rule fired -> 100, regardless of anything else
//! 2. Otherwise 20 per warning plus 5 per info, capped at 100

use tracing::{debug, trace};

use crate::patient::PatientData;

use super::{evaluate_condition, SafetyReport, SafetyRule, TriggeredRule};
use crate::types::Severity;

/// Score when any blocking rule fired.
pub const BLOCKING_RISK_SCORE: u8 = 100;

/// Points per triggered warning.
pub const WARNING_WEIGHT: usize = 20;

/// Points per triggered informational rule.
pub const INFO_WEIGHT: usize = 5;

/// Upper bound of the risk score.
pub const MAX_RISK_SCORE: u8 = 100;

/// Evaluates safety rules against patient data.
pub struct SafetyEvaluator;

impl SafetyEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate every rule and bucket the triggered ones by severity.
    ///
    /// Rules are independent; their order only affects the order of entries
    /// within each bucket.
    pub fn check_contraindications(&self, patient: &PatientData, rules: &[SafetyRule]) -> SafetyReport {
        let mut blockers = Vec::new();
        let mut warnings = Vec::new();
        let mut infos = Vec::new();

        for (index, rule) in rules.iter().enumerate() {
            let Some(triggered) = self.evaluate_rule(index, rule, patient) else {
                continue;
            };
            match triggered.severity {
                Severity::Blocking => blockers.push(triggered),
                Severity::Warning => warnings.push(triggered),
                Severity::Info => infos.push(triggered),
            }
        }

        let risk_score = calculate_risk_score(blockers.len(), warnings.len(), infos.len());
        let eligible = blockers.is_empty();

        debug!(
            rules = rules.len(),
            blockers = blockers.len(),
            warnings = warnings.len(),
            infos = infos.len(),
            risk_score,
            eligible,
            "Safety rules evaluated"
        );

        SafetyReport {
            eligible,
            risk_score,
            blockers,
            warnings,
            infos,
        }
    }

    /// Evaluate one rule; `None` when it does not fire.
    pub fn evaluate_rule(
        &self,
        index: usize,
        rule: &SafetyRule,
        patient: &PatientData,
    ) -> Option<TriggeredRule> {
        let found = evaluate_condition(&rule.condition, patient)?;

        trace!(
            rule_index = index,
            kind = rule.condition.kind(),
            severity = %rule.severity,
            message = %found.message,
            "Safety rule triggered"
        );

        Some(TriggeredRule {
            rule_index: index,
            rule_id: rule.id,
            severity: rule.severity,
            check_type: rule.check_type(),
            message: found.message,
            override_allowed: rule.override_allowed,
            override_requirements: rule.override_requirements.clone(),
            evidence_source: rule.evidence_source.clone(),
            condition: rule.condition.clone(),
            evidence: vec![found.evidence],
        })
    }
}

impl Default for SafetyEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluate safety rules with the default evaluator.
pub fn check_contraindications(patient: &PatientData, rules: &[SafetyRule]) -> SafetyReport {
    SafetyEvaluator::new().check_contraindications(patient, rules)
}

/// Aggregate risk score from triggered rule counts.
///
/// A single blocker dominates; relative risk accumulates additively and
/// saturates at [`MAX_RISK_SCORE`].
pub fn calculate_risk_score(blockers: usize, warnings: usize, infos: usize) -> u8 {
    if blockers > 0 {
        return BLOCKING_RISK_SCORE;
    }

    let score = warnings
        .saturating_mul(WARNING_WEIGHT)
        .saturating_add(infos.saturating_mul(INFO_WEIGHT));

    score.min(MAX_RISK_SCORE as usize) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::{Condition, DiagnosisMatch, MedicationMatch};
    use crate::types::{CheckType, Comparison};
    use proptest::prelude::*;
    use serde_json::json;

    fn schizophrenia_block() -> SafetyRule {
        SafetyRule::blocking(Condition::Diagnosis {
            value: "F20".to_string(),
            operator: DiagnosisMatch::Contains,
        })
    }

    fn minor_block() -> SafetyRule {
        SafetyRule::blocking(Condition::Age {
            operator: Comparison::LessThan,
            threshold: 18.0,
        })
    }

    fn ssri_warning() -> SafetyRule {
        SafetyRule::warning(Condition::Medication {
            value: "SSRI".to_string(),
            operator: MedicationMatch::ClassMatch,
        })
    }

    fn hypertension_info() -> SafetyRule {
        SafetyRule::info(Condition::VitalSign {
            name: "blood_pressure_systolic".to_string(),
            operator: Comparison::GreaterThan,
            threshold: 140.0,
        })
    }

    #[test]
    fn test_no_issues() {
        let patient = PatientData::new(json!({
            "age": 35,
            "diagnoses": ["F32.1"],
            "medications": [],
            "vital_signs": {"blood_pressure_systolic": 120, "heart_rate": 72}
        }));
        let report = check_contraindications(&patient, &[schizophrenia_block(), minor_block()]);
        assert!(report.eligible);
        assert_eq!(report.risk_score, 0);
        assert!(report.is_clean());
    }

    #[test]
    fn test_blocking_diagnosis() {
        let patient = PatientData::new(json!({"age": 28, "diagnoses": ["F20.0"]}));
        let report = check_contraindications(&patient, &[schizophrenia_block()]);
        assert!(!report.eligible);
        assert_eq!(report.risk_score, 100);
        assert_eq!(report.blockers.len(), 1);
        assert!(report.blockers[0].message.contains("F20"));
        assert_eq!(report.blockers[0].check_type, CheckType::AbsoluteContraindication);
        assert!(!report.blockers[0].override_allowed);
    }

    #[test]
    fn test_warning_keeps_eligibility() {
        let patient = PatientData::new(json!({
            "age": 42,
            "medications": [{"name": "Sertraline", "class": "SSRI"}]
        }));
        let report = check_contraindications(&patient, &[schizophrenia_block(), ssri_warning()]);
        assert!(report.eligible);
        assert_eq!(report.risk_score, 20);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].override_allowed);
    }

    #[test]
    fn test_combined_score() {
        let patient = PatientData::new(json!({
            "age": 50,
            "medications": [{"name": "Sertraline", "class": "SSRI"}],
            "vital_signs": {"blood_pressure_systolic": 150}
        }));
        let report = check_contraindications(&patient, &[ssri_warning(), hypertension_info()]);
        assert_eq!(report.risk_score, 25);
        assert_eq!(report.infos.len(), 1);
        assert_eq!(report.infos[0].rule_index, 1);
    }

    #[test]
    fn test_multiple_blockers_still_100() {
        let patient = PatientData::new(json!({
            "age": 16,
            "diagnoses": ["F20.0"],
            "medications": [{"name": "Sertraline", "class": "SSRI"}]
        }));
        let report = check_contraindications(
            &patient,
            &[schizophrenia_block(), minor_block(), ssri_warning()],
        );
        assert!(!report.eligible);
        assert_eq!(report.risk_score, 100);
        assert_eq!(report.blockers.len(), 2);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_elevated_hematocrit_testosterone() {
        let patient = PatientData::new(json!({
            "age": 45,
            "diagnoses": ["E29.1"],
            "medications": [],
            "lab_values": {"hematocrit": 54.0}
        }));
        let mut rule = SafetyRule::warning(Condition::LabValue {
            name: "hematocrit".to_string(),
            operator: Comparison::GreaterThan,
            threshold: 52.0,
        });
        rule.override_requirements = Some(json!({"required_intervention": "therapeutic_phlebotomy"}));

        let report = check_contraindications(&patient, &[rule]);
        assert!(report.eligible);
        assert_eq!(report.risk_score, 20);
        assert_eq!(
            report.warnings[0].override_requirements,
            Some(json!({"required_intervention": "therapeutic_phlebotomy"}))
        );
    }

    #[test]
    fn test_chemotherapy_eligibility() {
        let patient = PatientData::new(json!({
            "age": 58,
            "diagnoses": ["C50.9"],
            "lab_values": {
                "creatinine_clearance": 45,
                "absolute_neutrophil_count": 1200,
                "platelet_count": 90000
            }
        }));
        let rules = [
            SafetyRule::blocking(Condition::LabValue {
                name: "absolute_neutrophil_count".to_string(),
                operator: Comparison::LessThan,
                threshold: 1000.0,
            }),
            SafetyRule::warning(Condition::LabValue {
                name: "platelet_count".to_string(),
                operator: Comparison::LessThan,
                threshold: 100000.0,
            }),
        ];
        let report = check_contraindications(&patient, &rules);
        assert!(report.eligible);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.risk_score, 20);
    }

    #[test]
    fn test_class_only_medication_blocks() {
        let patient = PatientData::new(json!({"medications": [{"class": "MAOI"}]}));
        let maoi_block = SafetyRule::blocking(Condition::Medication {
            value: "MAOI".to_string(),
            operator: MedicationMatch::ClassMatch,
        });
        let report = check_contraindications(&patient, &[maoi_block]);
        assert!(!report.eligible);
        assert_eq!(report.risk_score, 100);
        assert_eq!(report.blockers[0].evidence[0].pointer, "patient.medications[0]");
    }

    #[test]
    fn test_risk_score_table() {
        assert_eq!(calculate_risk_score(0, 0, 0), 0);
        assert_eq!(calculate_risk_score(1, 0, 0), 100);
        assert_eq!(calculate_risk_score(0, 2, 0), 40);
        assert_eq!(calculate_risk_score(0, 0, 3), 15);
        assert_eq!(calculate_risk_score(0, 2, 1), 45);
        assert_eq!(calculate_risk_score(0, 6, 0), 100);
        assert_eq!(calculate_risk_score(0, usize::MAX, usize::MAX), 100);
    }

    proptest! {
        #[test]
        fn risk_score_is_monotone_and_saturates(
            warnings in 0usize..50,
            infos in 0usize..50,
            extra_warnings in 0usize..5,
            extra_infos in 0usize..5,
        ) {
            let base = calculate_risk_score(0, warnings, infos);
            let more = calculate_risk_score(0, warnings + extra_warnings, infos + extra_infos);
            prop_assert!(more >= base);
            prop_assert!(more <= 100);
        }

        #[test]
        fn any_blocker_forces_100(
            blockers in 1usize..10,
            warnings in 0usize..50,
            infos in 0usize..50,
        ) {
            prop_assert_eq!(calculate_risk_score(blockers, warnings, infos), 100);
        }

        #[test]
        fn rule_order_does_not_change_verdict(age in 0u32..100, on_ssri in any::<bool>()) {
            let medications = if on_ssri {
                json!([{"name": "Sertraline", "class": "SSRI"}])
            } else {
                json!([])
            };
            let patient = PatientData::new(json!({"age": age, "medications": medications}));
            let forward = [minor_block(), ssri_warning(), hypertension_info()];
            let backward = [hypertension_info(), ssri_warning(), minor_block()];

            let a = check_contraindications(&patient, &forward);
            let b = check_contraindications(&patient, &backward);
            prop_assert_eq!(a.eligible, b.eligible);
            prop_assert_eq!(a.risk_score, b.risk_score);
            prop_assert_eq!(a.triggered_count(), b.triggered_count());
        }
    }
}
