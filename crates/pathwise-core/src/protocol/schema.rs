//! JSON Schema validation for protocol documents.
//!
//! Raw protocol documents are checked against `schema/protocol.schema.json`
//! before they are deserialized. The schema catches shape problems (unknown
//! operators, negative orders, misspelled keys) with precise locations;
//! structural checks that need the whole protocol live in the parser.

use std::sync::OnceLock;
use thiserror::Error;

/// Embedded protocol schema (loaded at compile time).
const PROTOCOL_SCHEMA_JSON: &str = include_str!("../../schema/protocol.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema validation.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = serde_json::from_str(PROTOCOL_SCHEMA_JSON)
            .map_err(|e| format!("Invalid schema JSON: {}", e))?;

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    result
        .as_ref()
        .map_err(|e| SchemaError::LoadError(e.clone()))
}

/// Validate a protocol document against the schema.
///
/// Returns every violation, each suffixed with its instance location.
pub fn validate_protocol_schema(document: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(document)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check if a protocol document is valid against the schema.
pub fn is_valid_protocol(document: &serde_json::Value) -> bool {
    get_validator()
        .map(|v| v.is_valid(document))
        .unwrap_or(false)
}
