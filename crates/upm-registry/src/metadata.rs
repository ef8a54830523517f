//! Caller-supplied version metadata (`package.json`-equivalent).
//!
//! The record is opaque to the registry apart from its `name` and `version`
//! strings. All other keys are carried into the published version record
//! untouched and in their original order.

use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{RegistryError, Result};

/// Keys the reconciler derives itself; stripped from caller metadata so a
/// version record never carries two copies.
pub(crate) const DERIVED_KEYS: &[&str] = &[
    "_id",
    "readmeFilename",
    "_nodeVersion",
    "_npmVersion",
    "dist",
    "contributors",
];

/// Validated version metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionMetadata {
    fields: Map<String, Value>,
}

impl VersionMetadata {
    /// Build metadata from a JSON object, validating `name` and `version`.
    pub fn from_map(fields: Map<String, Value>) -> Result<Self> {
        let name = string_field(&fields, "name")?;
        let version = string_field(&fields, "version")?;
        validate_package_name(name)?;

        semver::Version::parse(version).map_err(|e| {
            RegistryError::invalid_metadata(format!("version '{version}' of '{name}': {e}"))
        })?;

        Ok(VersionMetadata { fields })
    }

    /// Parse metadata from a JSON string.
    pub fn parse(input: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(input)? {
            Value::Object(fields) => Self::from_map(fields),
            other => Err(RegistryError::invalid_metadata(format!(
                "expected a JSON object, found {}",
                json_kind(&other)
            ))),
        }
    }

    /// Load metadata from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Package name.
    pub fn name(&self) -> &str {
        self.fields
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Exact version string.
    pub fn version(&self) -> &str {
        self.fields
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// `<name>@<version>`, the id of the version record.
    pub fn id(&self) -> String {
        format!("{}@{}", self.name(), self.version())
    }

    /// All fields as supplied.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Caller fields with the derived keys removed.
    pub(crate) fn opaque_fields(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .filter(|(k, _)| !DERIVED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Check that `name` maps to exactly one directory under a storage root.
///
/// Accepts `pkg` or `@scope/pkg`, where each part is non-empty, does not
/// start with `.` or `_`, and uses only URL-safe characters.
pub fn validate_package_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| -> Result<()> {
        Err(RegistryError::invalid_metadata(format!(
            "package name '{name}' {reason}"
        )))
    };

    let parts: Vec<&str> = match name.strip_prefix('@') {
        Some(scoped) => match scoped.split_once('/') {
            Some((scope, package)) => vec![scope, package],
            None => return invalid("has a scope but no package part"),
        },
        None => vec![name],
    };

    for part in parts {
        if part.is_empty() {
            return invalid("has an empty part");
        }
        if part.starts_with('.') || part.starts_with('_') {
            return invalid("must not start with '.' or '_'");
        }
        if let Some(c) = part.chars().find(|c| !is_name_char(*c)) {
            return invalid(&format!("contains '{c}'"));
        }
    }
    Ok(())
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~' | '!' | '*' | '\'' | '(' | ')')
}

fn string_field<'a>(fields: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    match fields.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        Some(Value::String(_)) => Err(RegistryError::invalid_metadata(format!(
            "'{key}' must not be empty"
        ))),
        Some(other) => Err(RegistryError::invalid_metadata(format!(
            "'{key}' must be a string, found {}",
            json_kind(other)
        ))),
        None => Err(RegistryError::invalid_metadata(format!(
            "'{key}' is required"
        ))),
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
