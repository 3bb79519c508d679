//! Medication interaction table.
//!
//! Category-level defaults for known dangerous or efficacy-reducing
//! combinations between a therapy and a patient's current medications.
//! Advisory only: protocols encode their hard constraints as safety rules,
//! this table covers protocols that never authored one.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::evidence::Evidence;
use crate::patient::Medication;
use crate::types::{Severity, TherapyType};

/// Therapy groups sharing interaction behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TherapyCategory {
    Psychedelic,
    Hormone,
    InvasiveProcedure,
    Chemotherapy,
}

impl TherapyCategory {
    /// Category of a therapy, if the table covers it.
    pub fn of(therapy: TherapyType) -> Option<Self> {
        match therapy {
            TherapyType::Psilocybin
            | TherapyType::Lsd
            | TherapyType::Mdma
            | TherapyType::Ketamine => Some(TherapyCategory::Psychedelic),
            TherapyType::Testosterone | TherapyType::Estrogen | TherapyType::GrowthHormone => {
                Some(TherapyCategory::Hormone)
            }
            TherapyType::StemCell | TherapyType::PlateletRichPlasma | TherapyType::Surgery => {
                Some(TherapyCategory::InvasiveProcedure)
            }
            TherapyType::Chemotherapy => Some(TherapyCategory::Chemotherapy),
            _ => None,
        }
    }
}

/// One row of the interaction table.
struct InteractionRule {
    category: TherapyCategory,
    /// Drug classes that trigger the row
    classes: &'static [&'static str],
    /// Medication names that trigger the row regardless of class
    names: &'static [&'static str],
    severity: Severity,
    medication_class: &'static str,
    message: &'static str,
    recommendation: &'static str,
}

impl InteractionRule {
    fn matches(&self, medication: &Medication) -> bool {
        self.classes.iter().any(|class| medication.has_class(class))
            || self.names.iter().any(|name| medication.has_name(name))
    }
}

lazy_static! {
    static ref INTERACTION_TABLE: Vec<InteractionRule> = vec![
        InteractionRule {
            category: TherapyCategory::Psychedelic,
            classes: &["MAOI"],
            names: &[],
            severity: Severity::Blocking,
            medication_class: "MAOI",
            message: "MAOIs (Monoamine Oxidase Inhibitors) can cause dangerous interactions with psychedelics, including serotonin syndrome",
            recommendation: "Discontinue MAOI for at least 2 weeks before psychedelic therapy",
        },
        InteractionRule {
            category: TherapyCategory::Psychedelic,
            classes: &["SSRI"],
            names: &[],
            severity: Severity::Warning,
            medication_class: "SSRI",
            message: "SSRIs may reduce the effectiveness of psychedelic therapy",
            recommendation: "Consider tapering SSRI before therapy, consult with prescribing physician",
        },
        InteractionRule {
            category: TherapyCategory::Psychedelic,
            classes: &["SNRI"],
            names: &[],
            severity: Severity::Warning,
            medication_class: "SNRI",
            message: "SNRIs may reduce the effectiveness of psychedelic therapy",
            recommendation: "Consider tapering SNRI before therapy, consult with prescribing physician",
        },
        InteractionRule {
            category: TherapyCategory::Psychedelic,
            classes: &["Mood Stabilizer"],
            names: &["Lithium"],
            severity: Severity::Blocking,
            medication_class: "Mood Stabilizer",
            message: "Lithium and psychedelics can increase seizure risk",
            recommendation: "Do not combine lithium with psychedelic therapy",
        },
        InteractionRule {
            category: TherapyCategory::Hormone,
            classes: &["Anticoagulant"],
            names: &[],
            severity: Severity::Warning,
            medication_class: "Anticoagulant",
            message: "Hormone therapy may affect blood clotting; anticoagulant dosing may need adjustment",
            recommendation: "Monitor INR/PT closely and adjust anticoagulant dose as needed",
        },
        InteractionRule {
            category: TherapyCategory::InvasiveProcedure,
            classes: &["Anticoagulant"],
            names: &[],
            severity: Severity::Warning,
            medication_class: "Anticoagulant",
            message: "Anticoagulants increase bleeding risk during invasive procedures",
            recommendation: "Discontinue or bridge anticoagulation per procedural protocol",
        },
        InteractionRule {
            category: TherapyCategory::InvasiveProcedure,
            classes: &["Antiplatelet"],
            names: &[],
            severity: Severity::Warning,
            medication_class: "Antiplatelet",
            message: "Antiplatelet agents increase bleeding risk during invasive procedures",
            recommendation: "Consider discontinuing 5-7 days before procedure if safe",
        },
        InteractionRule {
            category: TherapyCategory::Chemotherapy,
            classes: &["Anticoagulant"],
            names: &[],
            severity: Severity::Warning,
            medication_class: "Anticoagulant",
            message: "Chemotherapy can affect anticoagulation stability",
            recommendation: "Monitor INR more frequently during chemotherapy",
        },
    ];
}

/// A known interaction between the therapy and a current medication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub severity: Severity,

    pub medication_class: String,

    /// The patient's medication that triggered the row
    pub medication: String,

    pub message: String,

    pub recommendation: String,

    pub evidence: Evidence,
}

/// Look up interactions between current medications and a therapy.
///
/// Each table row fires at most once, naming the first matching medication.
/// Therapies outside the table yield no interactions.
pub fn check_interactions(medications: &[Medication], therapy: TherapyType) -> Vec<Interaction> {
    let Some(category) = TherapyCategory::of(therapy) else {
        return Vec::new();
    };

    let interactions: Vec<Interaction> = INTERACTION_TABLE
        .iter()
        .filter(|row| row.category == category)
        .filter_map(|row| {
            let medication = medications.iter().find(|med| row.matches(med))?;
            Some(Interaction {
                severity: row.severity,
                medication_class: row.medication_class.to_string(),
                medication: medication.label().to_string(),
                message: row.message.to_string(),
                recommendation: row.recommendation.to_string(),
                evidence: Evidence::from_interaction_table(
                    format!("{} with {}", medication.label(), therapy),
                    therapy.as_str(),
                    row.medication_class,
                ),
            })
        })
        .collect();

    debug!(
        therapy = %therapy,
        medications = medications.len(),
        interactions = interactions.len(),
        "Medication interactions checked"
    );

    interactions
}
