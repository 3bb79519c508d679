//! Per-kind condition predicates.

use crate::evidence::Evidence;
use crate::patient::PatientData;
use crate::types::Comparison;

use super::{Condition, DiagnosisMatch, MedicationMatch};

/// Why a condition matched.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionMatch {
    pub message: String,
    pub evidence: Evidence,
}

impl ConditionMatch {
    fn new(message: String, evidence: Evidence) -> Self {
        Self { message, evidence }
    }
}

/// Test a condition against patient data.
///
/// Returns `None` when the condition does not hold, including when the datum
/// it needs is absent.
pub fn evaluate_condition(condition: &Condition, patient: &PatientData) -> Option<ConditionMatch> {
    match condition {
        Condition::Diagnosis { value, operator } => check_diagnosis(value, *operator, patient),
        Condition::Medication { value, operator } => check_medication(value, *operator, patient),
        Condition::LabValue {
            name,
            operator,
            threshold,
        } => check_reading("lab_values", name, *operator, *threshold, patient.lab_value(name)),
        Condition::VitalSign {
            name,
            operator,
            threshold,
        } => check_reading(
            "vital_signs",
            name,
            *operator,
            *threshold,
            patient.vital_sign(name),
        ),
        Condition::Age {
            operator,
            threshold,
        } => check_age(*operator, *threshold, patient),
    }
}

fn check_diagnosis(code: &str, operator: DiagnosisMatch, patient: &PatientData) -> Option<ConditionMatch> {
    let diagnoses = patient.diagnoses();
    let (index, diagnosis) = diagnoses
        .iter()
        .enumerate()
        .find(|(_, diagnosis)| match operator {
            DiagnosisMatch::Contains => diagnosis.contains(code),
            DiagnosisMatch::Exact => **diagnosis == code,
        })?;

    let message = match operator {
        DiagnosisMatch::Contains => {
            format!("Patient has diagnosis containing {}: {}", code, diagnosis)
        }
        DiagnosisMatch::Exact => format!("Patient has diagnosis {}", code),
    };
    let evidence = Evidence::from_patient_entry(format!("Diagnosis {}", diagnosis), "diagnoses", index);
    Some(ConditionMatch::new(message, evidence))
}

fn check_medication(
    value: &str,
    operator: MedicationMatch,
    patient: &PatientData,
) -> Option<ConditionMatch> {
    let medications = patient.medication_entries();
    let (index, medication) = medications.iter().find(|(_, med)| match operator {
        MedicationMatch::ClassMatch => med.has_class(value),
        MedicationMatch::NameMatch => med.has_name(value),
    })?;

    let message = match (operator, medication.name.as_deref()) {
        (MedicationMatch::ClassMatch, Some(name)) => format!("Patient is taking {}: {}", value, name),
        _ => format!("Patient is taking {}", value),
    };
    let evidence = Evidence::from_patient_entry(
        format!("Medication {}", medication.label()),
        "medications",
        *index,
    );
    Some(ConditionMatch::new(message, evidence))
}

fn check_reading(
    section: &str,
    name: &str,
    operator: Comparison,
    threshold: f64,
    reading: Option<f64>,
) -> Option<ConditionMatch> {
    let value = reading?;
    if !operator.holds(value, threshold) {
        return None;
    }

    let message = format!("{} is {}, {} {}", name, value, operator.describe(), threshold);
    let evidence = Evidence::from_patient(format!("{} = {}", name, value), format!("{}.{}", section, name));
    Some(ConditionMatch::new(message, evidence))
}

fn check_age(operator: Comparison, threshold: f64, patient: &PatientData) -> Option<ConditionMatch> {
    let age = patient.age()?;
    if !operator.holds(age, threshold) {
        return None;
    }

    let message = match operator {
        Comparison::LessThan => format!("Patient age {} is below minimum of {}", age, threshold),
        Comparison::GreaterThan => format!("Patient age {} is above maximum of {}", age, threshold),
        Comparison::Equals => format!("Patient age {} equals {}", age, threshold),
    };
    let evidence = Evidence::from_patient(format!("Age {}", age), "age");
    Some(ConditionMatch::new(message, evidence))
}
