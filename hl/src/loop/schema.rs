//! Expected output shape: required fields and primitive types

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Primitive JSON type a field must have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Bool,
    Array,
    Object,
    Null,
}

impl FieldType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Null => value.is_null(),
        }
    }

    fn of(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Bool => "bool",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Null => "null",
        };
        write!(f, "{}", s)
    }
}

/// Required fields plus the types some of them must have
///
/// A field may appear in `field_types` without being required; it is then
/// type-checked only when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpectedShape {
    #[serde(rename = "required-fields")]
    pub required_fields: Vec<String>,

    #[serde(rename = "field-types")]
    pub field_types: BTreeMap<String, FieldType>,
}

/// Outcome of a shape check
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapeReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ShapeReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl ExpectedShape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a field with a given type
    pub fn field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        let name = name.into();
        self.field_types.insert(name.clone(), ty);
        self.required_fields.push(name);
        self
    }

    /// Require a field of any type
    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required_fields.push(name.into());
        self
    }

    /// Check an output against this shape
    ///
    /// Missing fields and type mismatches are errors, and a null counts as a
    /// mismatch for any declared type other than `null`. A required field
    /// with no declared type that is present but null is only a warning.
    pub fn check(&self, output: &Value) -> ShapeReport {
        let mut report = ShapeReport::default();

        let Some(object) = output.as_object() else {
            if !self.required_fields.is_empty() || !self.field_types.is_empty() {
                report
                    .errors
                    .push(format!("Expected an object, got {}", FieldType::of(output)));
            }
            return report;
        };

        for name in &self.required_fields {
            match object.get(name) {
                None => report.errors.push(format!("Missing required field: {}", name)),
                Some(Value::Null) if !self.field_types.contains_key(name) => {
                    report.warnings.push(format!("Field is null: {}", name));
                }
                Some(_) => {}
            }
        }

        for (name, ty) in &self.field_types {
            match object.get(name) {
                Some(value) if !ty.matches(value) => {
                    report.errors.push(format!(
                        "Field {} has type {}, expected {}",
                        name,
                        FieldType::of(value),
                        ty
                    ));
                }
                _ => {}
            }
        }

        report
    }
}
