//! Patient data snapshots.
//!
//! Patient data is an arbitrary nested document assembled by the caller from
//! clinical records. The engine only reads it: factors address fields by
//! dotted path, safety rules read the well-known top-level fields
//! (`age`, `diagnoses`, `medications`, `lab_values`, `vital_signs`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Read-only patient document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientData(Value);

/// A medication the patient is currently taking.
///
/// Either field may be absent; a class-only entry still matches class rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medication {
    #[serde(default)]
    pub name: Option<String>,

    /// Drug class (e.g. "SSRI", "MAOI", "Anticoagulant")
    #[serde(default)]
    pub class: Option<String>,
}

impl Medication {
    pub fn new(name: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            class: Some(class.into()),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            class: None,
        }
    }

    pub fn of_class(class: impl Into<String>) -> Self {
        Self {
            name: None,
            class: Some(class.into()),
        }
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.class.as_deref() == Some(class)
    }

    /// Name for messages: the medication name, else its class.
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.class.as_deref())
            .unwrap_or("unnamed medication")
    }

    /// Read one entry of the `medications` list. Name and class are read
    /// independently; non-string values count as absent.
    fn from_entry(entry: &Value) -> Option<Self> {
        let entry = entry.as_object()?;
        let field = |key: &str| entry.get(key).and_then(Value::as_str).map(str::to_string);
        let medication = Self {
            name: field("name"),
            class: field("class"),
        };
        if medication.name.is_none() && medication.class.is_none() {
            None
        } else {
            Some(medication)
        }
    }
}

impl PatientData {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Walk a dotted path (e.g. `patient.weight_kg`) through nested maps.
    ///
    /// Returns `None` when a segment is absent, when an intermediate value is
    /// not a map, or when the final value is `null`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut current = &self.0;
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        if current.is_null() {
            None
        } else {
            Some(current)
        }
    }

    pub fn age(&self) -> Option<f64> {
        self.0.get("age").and_then(Value::as_f64)
    }

    /// Diagnosis codes, skipping entries that are not strings.
    pub fn diagnoses(&self) -> Vec<&str> {
        self.0
            .get("diagnoses")
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Current medications, skipping entries with neither name nor class.
    pub fn medications(&self) -> Vec<Medication> {
        self.medication_entries()
            .into_iter()
            .map(|(_, medication)| medication)
            .collect()
    }

    /// Current medications paired with their index in the `medications` list.
    pub fn medication_entries(&self) -> Vec<(usize, Medication)> {
        self.0
            .get("medications")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .enumerate()
                    .filter_map(|(index, entry)| Some((index, Medication::from_entry(entry)?)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn lab_value(&self, name: &str) -> Option<f64> {
        self.reading("lab_values", name)
    }

    pub fn vital_sign(&self, name: &str) -> Option<f64> {
        self.reading("vital_signs", name)
    }

    fn reading(&self, section: &str, name: &str) -> Option<f64> {
        self.0.get(section)?.get(name)?.as_f64()
    }
}

impl From<Value> for PatientData {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
