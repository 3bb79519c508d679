//! Decision point evaluation.
//!
//! A decision point reduces patient data to a single outcome identifier:
//!
//! 1. Each [`Factor`] extracts one datum by dotted path and reduces it to a
//!    discrete label ([`factor`]).
//! 2. Multi-factor rules join the labels, in declared order, into a matrix
//!    key and look up the outcome ([`matrix`]).
//! 3. [`point`] ties the two together for a protocol step.
//!
//! Nothing here knows about branch targets; mapping an outcome onto the next
//! step is the navigator's job.

pub mod factor;
pub mod matrix;
pub mod point;

pub use factor::evaluate_factor;
pub use matrix::{combine_factors, MATRIX_KEY_SEPARATOR};
pub use point::evaluate_decision_point;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Evaluation rules attached to a decision-point step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvaluationRule {
    /// One factor whose label is the outcome
    SingleFactor { factor: Factor },

    /// Several factors combined through a decision matrix
    MultiFactor {
        factors: Vec<Factor>,
        decision_matrix: DecisionMatrix,
    },
}

impl EvaluationRule {
    /// Factors in declared order.
    pub fn factors(&self) -> Vec<&Factor> {
        match self {
            EvaluationRule::SingleFactor { factor } => vec![factor],
            EvaluationRule::MultiFactor { factors, .. } => factors.iter().collect(),
        }
    }
}

/// A named datum and the operator that reduces it to a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    /// Dotted path into patient data (e.g. "patient.weight_kg")
    #[serde(rename = "factor")]
    pub path: String,

    #[serde(flatten)]
    pub operator: FactorOperator,
}

impl Factor {
    pub fn new(path: impl Into<String>, operator: FactorOperator) -> Self {
        Self {
            path: path.into(),
            operator,
        }
    }
}

/// Operator semantics, with operator-specific parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operator", rename_all = "snake_case")]
pub enum FactorOperator {
    InRange {
        #[serde(default)]
        ranges: Vec<Band>,
    },
    Threshold {
        #[serde(default)]
        thresholds: Vec<Band>,
    },
    Equals {
        #[serde(default)]
        conditions: Vec<EqualsCondition>,
    },
    Boolean {
        #[serde(default)]
        true_value: Option<String>,
        #[serde(default)]
        false_value: Option<String>,
    },
}

impl FactorOperator {
    pub fn name(&self) -> &'static str {
        match self {
            FactorOperator::InRange { .. } => "in_range",
            FactorOperator::Threshold { .. } => "threshold",
            FactorOperator::Equals { .. } => "equals",
            FactorOperator::Boolean { .. } => "boolean",
        }
    }

    /// Every label this operator can produce.
    pub fn labels(&self) -> Vec<&str> {
        match self {
            FactorOperator::InRange { ranges: bands }
            | FactorOperator::Threshold { thresholds: bands } => {
                bands.iter().map(|b| b.label.as_str()).collect()
            }
            FactorOperator::Equals { conditions } => {
                conditions.iter().map(|c| c.result.as_str()).collect()
            }
            FactorOperator::Boolean {
                true_value,
                false_value,
            } => true_value
                .iter()
                .chain(false_value.iter())
                .map(String::as_str)
                .collect(),
        }
    }
}

/// A numeric band. `min` is inclusive, `max` exclusive, except for the last
/// band of a list whose `max` is inclusive. Omitted bounds are unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    #[serde(rename = "value")]
    pub label: String,
}

impl Band {
    pub fn new(min: Option<f64>, max: Option<f64>, label: impl Into<String>) -> Self {
        Self {
            min,
            max,
            label: label.into(),
        }
    }

    pub fn lower(&self) -> f64 {
        self.min.unwrap_or(f64::NEG_INFINITY)
    }

    pub fn upper(&self) -> f64 {
        self.max.unwrap_or(f64::INFINITY)
    }
}

/// One exact-match condition of an `equals` factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqualsCondition {
    pub value: Value,
    pub result: String,
}

/// Maps joined factor labels to outcome identifiers.
///
/// The key `"default"` is the fallback outcome.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionMatrix {
    entries: BTreeMap<String, String>,
}

impl DecisionMatrix {
    pub const DEFAULT_KEY: &'static str = "default";

    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, builder style.
    pub fn entry(mut self, key: impl Into<String>, outcome: impl Into<String>) -> Self {
        self.entries.insert(key.into(), outcome.into());
        self
    }

    /// Set the fallback outcome, builder style.
    pub fn with_default(self, outcome: impl Into<String>) -> Self {
        self.entry(Self::DEFAULT_KEY, outcome)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn default_outcome(&self) -> Option<&str> {
        self.get(Self::DEFAULT_KEY)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Every outcome the matrix can produce, fallback included.
    pub fn outcomes(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DecisionMatrix {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
