//! Schema contract consumed by the portal.
//!
//! The portal calls [`Schema::validate`] only as a pass-through gate before a
//! handler runs. What a schema accepts is up to the implementor.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// ValidationResult
// ============================================================================

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// JSON-pointer style location, empty for the root.
    pub path: String,
    /// What is wrong.
    pub message: String,
}

/// Outcome of [`Schema::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Validation issues; empty when the value is valid.
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// A passing result.
    #[inline]
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    /// Records an issue.
    #[must_use]
    pub fn with_issue(mut self, path: impl Into<String>, message: impl Into<String>) -> Self {
        self.issues.push(ValidationIssue {
            path: path.into(),
            message: message.into(),
        });
        self
    }

    /// Returns `true` when there are no issues.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    /// Joins the issues into one line.
    #[must_use]
    pub fn summary(&self) -> String {
        self.issues
            .iter()
            .map(|issue| {
                if issue.path.is_empty() {
                    issue.message.clone()
                } else {
                    format!("{}: {}", issue.path, issue.message)
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

// ============================================================================
// SchemaMetadata
// ============================================================================

/// Descriptive information about a schema.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaMetadata {
    /// Schema name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ============================================================================
// Schema
// ============================================================================

/// Input schema of a registered function.
pub trait Schema: Send + Sync + fmt::Debug {
    /// Checks a value against the schema.
    fn validate(&self, value: &Value) -> ValidationResult;

    /// Describes the schema.
    fn metadata(&self) -> SchemaMetadata;
}

// ============================================================================
// ObjectSchema
// ============================================================================

/// Minimal schema: the value must be an object carrying the required keys.
#[derive(Debug, Clone, Default)]
pub struct ObjectSchema {
    name: String,
    required: Vec<String>,
}

impl ObjectSchema {
    /// Creates a schema that accepts any object.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: Vec::new(),
        }
    }

    /// Adds a required key.
    #[must_use]
    pub fn require(mut self, key: impl Into<String>) -> Self {
        self.required.push(key.into());
        self
    }
}

impl Schema for ObjectSchema {
    fn validate(&self, value: &Value) -> ValidationResult {
        let Some(object) = value.as_object() else {
            return ValidationResult::ok().with_issue("", "expected an object");
        };

        self.required
            .iter()
            .filter(|key| !object.contains_key(key.as_str()))
            .fold(ValidationResult::ok(), |result, key| {
                result.with_issue(format!("/{key}"), "required field is missing")
            })
    }

    fn metadata(&self) -> SchemaMetadata {
        SchemaMetadata {
            name: self.name.clone(),
            description: None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_object_schema_accepts_complete_object() {
        let schema = ObjectSchema::new("add").require("a").require("b");
        assert!(schema.validate(&json!({"a": 1, "b": 2})).is_valid());
    }

    #[test]
    fn test_object_schema_reports_missing_keys() {
        let schema = ObjectSchema::new("add").require("a").require("b");
        let result = schema.validate(&json!({"a": 1}));
        assert!(!result.is_valid());
        assert_eq!(result.summary(), "/b: required field is missing");
    }

    #[test]
    fn test_object_schema_rejects_non_object() {
        let result = ObjectSchema::new("any").validate(&json!([1, 2]));
        assert_eq!(result.summary(), "expected an object");
    }

    #[test]
    fn test_metadata() {
        assert_eq!(ObjectSchema::new("add").metadata().name, "add");
    }
}
