//! Shared vocabulary for protocols, safety rules and interaction checks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a protocol step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub u64);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for StepId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Kind of work a protocol step represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Screening,
    Preparation,
    Dosing,
    Integration,
    DecisionPoint,
    #[serde(alias = "follow_up")]
    Followup,
}

impl StepType {
    pub fn is_decision_point(&self) -> bool {
        matches!(self, StepType::DecisionPoint)
    }
}

/// Severity of a safety rule or medication interaction.
///
/// Only `Blocking` prevents progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Blocking,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Blocking => "blocking",
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Severity::Blocking)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clinical classification of a safety rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    AbsoluteContraindication,
    RelativeContraindication,
    RiskFactor,
}

impl From<Severity> for CheckType {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Blocking => CheckType::AbsoluteContraindication,
            Severity::Warning => CheckType::RelativeContraindication,
            Severity::Info => CheckType::RiskFactor,
        }
    }
}

/// Numeric comparison used by lab value, vital sign and age conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    GreaterThan,
    LessThan,
    Equals,
}

impl Comparison {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThan => value > threshold,
            Comparison::LessThan => value < threshold,
            Comparison::Equals => value == threshold,
        }
    }

    /// Phrase used in triggered-rule messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Comparison::GreaterThan => "above threshold of",
            Comparison::LessThan => "below threshold of",
            Comparison::Equals => "equals threshold of",
        }
    }
}

/// Therapy category a protocol delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TherapyType {
    // Psychedelics
    Psilocybin,
    Mdma,
    Ketamine,
    Lsd,
    Ibogaine,

    // Hormone therapy
    Testosterone,
    Estrogen,
    GrowthHormone,
    Peptides,

    // Cancer treatments
    Chemotherapy,
    Immunotherapy,
    Radiation,

    // Regenerative medicine
    StemCell,
    PlateletRichPlasma,
    Exosome,

    // Emerging treatments
    GeneTherapy,
    Crispr,
    CarT,
    Longevity,

    // Procedures and everything else
    Surgery,
    Other,
}

impl TherapyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TherapyType::Psilocybin => "psilocybin",
            TherapyType::Mdma => "mdma",
            TherapyType::Ketamine => "ketamine",
            TherapyType::Lsd => "lsd",
            TherapyType::Ibogaine => "ibogaine",
            TherapyType::Testosterone => "testosterone",
            TherapyType::Estrogen => "estrogen",
            TherapyType::GrowthHormone => "growth_hormone",
            TherapyType::Peptides => "peptides",
            TherapyType::Chemotherapy => "chemotherapy",
            TherapyType::Immunotherapy => "immunotherapy",
            TherapyType::Radiation => "radiation",
            TherapyType::StemCell => "stem_cell",
            TherapyType::PlateletRichPlasma => "platelet_rich_plasma",
            TherapyType::Exosome => "exosome",
            TherapyType::GeneTherapy => "gene_therapy",
            TherapyType::Crispr => "crispr",
            TherapyType::CarT => "car_t",
            TherapyType::Longevity => "longevity",
            TherapyType::Surgery => "surgery",
            TherapyType::Other => "other",
        }
    }

    /// Parse the snake_case name used in protocol documents.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        serde_json::from_value(serde_json::Value::String(normalized)).ok()
    }
}

impl fmt::Display for TherapyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strength of the evidence behind a protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceLevel {
    FdaApproved,
    #[serde(rename = "phase_3_trial")]
    Phase3,
    #[serde(rename = "phase_2_trial")]
    Phase2,
    #[serde(rename = "phase_1_trial")]
    Phase1,
    Preclinical,
    ClinicalPractice,
}

/// Authoring lifecycle of a protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolStatus {
    #[default]
    Draft,
    Active,
    Archived,
}
