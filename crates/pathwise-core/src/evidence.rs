//! Evidence linking for safety findings.
//!
//! Every triggered safety rule and interaction points back at the datum that
//! triggered it, so clinical staff can see exactly why progression stopped.

use serde::{Deserialize, Serialize};

/// Where a piece of evidence was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    /// The patient data snapshot
    PatientData,
    /// The protocol definition
    Protocol,
    /// The built-in medication interaction table
    InteractionTable,
}

/// A piece of evidence supporting a finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// What this evidence supports
    pub claim: String,

    /// Where the evidence comes from
    pub source: EvidenceSource,

    /// Pointer to the location (e.g., "patient.diagnoses[0]")
    pub pointer: String,
}

impl Evidence {
    /// Evidence pointing at a field of the patient document.
    pub fn from_patient(claim: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            source: EvidenceSource::PatientData,
            pointer: format!("patient.{}", path.into()),
        }
    }

    /// Evidence pointing at an entry of a list in the patient document.
    pub fn from_patient_entry(claim: impl Into<String>, list: &str, index: usize) -> Self {
        Self::from_patient(claim, format!("{}[{}]", list, index))
    }

    /// Evidence pointing at a location in the protocol definition.
    pub fn from_protocol(claim: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            source: EvidenceSource::Protocol,
            pointer: path.into(),
        }
    }

    /// Evidence from the interaction table row for a therapy and drug class.
    pub fn from_interaction_table(
        claim: impl Into<String>,
        therapy: impl AsRef<str>,
        class: impl AsRef<str>,
    ) -> Self {
        Self {
            claim: claim.into(),
            source: EvidenceSource::InteractionTable,
            pointer: format!("interactions.{}.{}", therapy.as_ref(), class.as_ref()),
        }
    }
}
