//! Typed input and output wrappers.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

// ============================================================================
// FunctionInput
// ============================================================================

/// Named arguments of a call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FunctionInput(Map<String, Value>);

impl FunctionInput {
    /// Creates empty input.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an argument map.
    #[inline]
    #[must_use]
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Converts any serializable value that encodes as a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the value is not an object.
    pub fn from_any<T: Serialize>(value: T) -> Result<Self> {
        match serde_json::to_value(value)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::validation(format!(
                "function input must be an object, got {other}"
            ))),
        }
    }

    /// Adds an argument.
    #[must_use]
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Returns an argument.
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Returns a numeric argument as `f64`.
    #[inline]
    #[must_use]
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(Value::as_f64)
    }

    /// Returns a string argument.
    #[inline]
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// Returns a copy of the argument map.
    #[inline]
    #[must_use]
    pub fn to_map(&self) -> Map<String, Value> {
        self.0.clone()
    }

    /// Consumes the input into its argument map.
    #[inline]
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Deserializes the arguments into a typed struct.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the arguments do not fit `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| Error::validation(e.to_string()))
    }
}

// ============================================================================
// FunctionOutput
// ============================================================================

/// Result of a call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FunctionOutput(Value);

impl FunctionOutput {
    /// Wraps a raw JSON value.
    #[inline]
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Converts any serializable value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn from_any<T: Serialize>(value: T) -> Result<Self> {
        Ok(Self(serde_json::to_value(value)?))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Consumes the output into its raw value.
    #[inline]
    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Returns a field of an object result.
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Deserializes into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the value does not fit `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.0.clone())?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;
    use serde_json::json;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Pair {
        a: i64,
        b: i64,
    }

    #[test]
    fn test_input_builder_and_getters() {
        let input = FunctionInput::new().arg("a", 2).arg("op", "add");
        assert_eq!(input.get_f64("a"), Some(2.0));
        assert_eq!(input.get_str("op"), Some("add"));
        assert!(input.get("missing").is_none());
    }

    #[test]
    fn test_input_from_struct() {
        let input = FunctionInput::from_any(Pair { a: 1, b: 2 }).expect("object");
        assert_eq!(input.parse::<Pair>().expect("parse"), Pair { a: 1, b: 2 });
    }

    #[test]
    fn test_input_rejects_non_object() {
        assert!(FunctionInput::from_any(5).is_err());
    }

    #[test]
    fn test_output_from_any() {
        let output = FunctionOutput::from_any(json!({"result": 5})).expect("serialize");
        assert_eq!(output.get("result"), Some(&json!(5)));
    }
}
