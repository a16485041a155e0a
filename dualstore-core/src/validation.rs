//! Input validation helpers
//!
//! Validation failures are programming errors rather than store problems,
//! so they are raised before any retry or fallback logic runs.

use serde_json::Value;

use crate::document::Fields;
use crate::error::{DataError, DataResult};

/// Ensure every `required` key is present in `data` and not null
///
/// All missing fields are named in one error, in the order given.
pub fn validate_required_fields(data: &Fields, required: &[&str]) -> DataResult<()> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|field| matches!(data.get(*field), None | Some(Value::Null)))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(DataError::validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )))
    }
}

/// Reject blank string arguments, naming every offender
///
/// Arguments carrying NUL bytes are rejected as well: stores build
/// composite keys from them with NUL separators.
pub fn validate_arguments(arguments: &[(&str, &str)]) -> DataResult<()> {
    let malformed: Vec<&str> = arguments
        .iter()
        .filter(|(_, value)| value.contains('\0'))
        .map(|(name, _)| *name)
        .collect();
    if !malformed.is_empty() {
        return Err(DataError::validation(format!(
            "NUL bytes are not allowed in: {}",
            malformed.join(", ")
        )));
    }

    let present: Fields = arguments
        .iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
        .collect();
    let required: Vec<&str> = arguments.iter().map(|(name, _)| *name).collect();

    validate_required_fields(&present, &required)
}
