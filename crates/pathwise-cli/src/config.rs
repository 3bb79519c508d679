//! CLI settings.
//!
//! Settings are resolved once at startup from an optional YAML file; flags
//! given on the command line win over file values.

use anyhow::{Context, Result};
use clap::ValueEnum;
use pathwise_core::TherapyType;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// How results are printed to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Pretty-printed JSON
    #[default]
    Json,
    Yaml,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Filter used when `RUST_LOG` is unset
    pub log_level: String,

    pub output: OutputFormat,

    /// Check protocol documents against the embedded JSON Schema on load
    pub validate_schema: bool,

    /// Therapy used by `interactions` when `--therapy` is omitted
    pub default_therapy: Option<TherapyType>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            output: OutputFormat::Json,
            validate_schema: false,
            default_therapy: None,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or defaults when no file is configured.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        Self::from_yaml(&contents)
            .with_context(|| format!("invalid settings file {}", path.display()))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty file is a valid, all-default configuration
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Apply command-line overrides.
    pub fn with_overrides(
        mut self,
        log_level: Option<String>,
        output: Option<OutputFormat>,
        strict: bool,
    ) -> Self {
        if let Some(level) = log_level {
            self.log_level = level;
        }
        if let Some(output) = output {
            self.output = output;
        }
        self.validate_schema |= strict;
        self
    }
}
