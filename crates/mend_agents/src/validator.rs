//! Contract Validator: checks a raw agent response against its role schema.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::contracts::AgentOutput;
use crate::roles::AgentRole;
use crate::schema::{FieldKind, FieldSpec};

/// A field present with the wrong semantic type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMismatch {
    pub field: String,
    pub expected: String,
    pub found: String,
}

/// An enumerated field holding a value outside its closed set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidValue {
    pub field: String,
    pub value: String,
    pub allowed: Vec<String>,
}

/// Rejection of a malformed agent response.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{role} response failed schema validation: {}", self.summary())]
pub struct SchemaError {
    pub role: AgentRole,
    /// Set when the response is not a single JSON object.
    pub container: Option<String>,
    pub missing_fields: Vec<String>,
    pub type_mismatches: Vec<TypeMismatch>,
    pub invalid_values: Vec<InvalidValue>,
}

impl SchemaError {
    fn new(role: AgentRole) -> Self {
        Self {
            role,
            container: None,
            missing_fields: Vec::new(),
            type_mismatches: Vec::new(),
            invalid_values: Vec::new(),
        }
    }

    fn container(role: AgentRole, message: impl Into<String>) -> Self {
        let mut err = Self::new(role);
        err.container = Some(message.into());
        err
    }

    fn is_empty(&self) -> bool {
        self.container.is_none()
            && self.missing_fields.is_empty()
            && self.type_mismatches.is_empty()
            && self.invalid_values.is_empty()
    }

    /// One-line description of every violation.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(container) = &self.container {
            parts.push(container.clone());
        }
        if !self.missing_fields.is_empty() {
            parts.push(format!("missing [{}]", self.missing_fields.join(", ")));
        }
        for m in &self.type_mismatches {
            parts.push(format!("{} expected {} found {}", m.field, m.expected, m.found));
        }
        for v in &self.invalid_values {
            parts.push(format!(
                "{} = '{}' not in [{}]",
                v.field,
                v.value,
                v.allowed.join(", ")
            ));
        }
        parts.join("; ")
    }
}

/// A response that passed validation.
pub type ValidResult = AgentOutput;

/// Stateless validator for role outputs.
pub struct ContractValidator;

impl ContractValidator {
    /// Validate a raw response string.
    ///
    /// The response must be exactly one JSON object; surrounding prose is rejected
    /// rather than stripped.
    pub fn validate(role: AgentRole, raw_response: &str) -> Result<ValidResult, SchemaError> {
        let value: Value = serde_json::from_str(raw_response.trim())
            .map_err(|e| SchemaError::container(role, format!("response is not JSON: {}", e)))?;
        Self::validate_value(role, value)
    }

    /// Validate an already-parsed response.
    pub fn validate_value(role: AgentRole, value: Value) -> Result<ValidResult, SchemaError> {
        if !value.is_object() {
            return Err(SchemaError::container(
                role,
                format!("expected a JSON object, found {}", json_type(&value)),
            ));
        }

        let mut error = SchemaError::new(role);
        check_fields(&value, role.schema().fields, "", &mut error);
        if !error.is_empty() {
            return Err(error);
        }

        // The walk above covers everything serde needs, except integer ranges.
        AgentOutput::from_value(role, value).map_err(|e| {
            let mut err = SchemaError::new(role);
            err.type_mismatches.push(TypeMismatch {
                field: "<output>".to_string(),
                expected: "values within declared ranges".to_string(),
                found: e.to_string(),
            });
            err
        })
    }
}

fn check_fields(object: &Value, fields: &[FieldSpec], prefix: &str, error: &mut SchemaError) {
    for field in fields {
        let path = if prefix.is_empty() {
            field.name.to_string()
        } else {
            format!("{}.{}", prefix, field.name)
        };

        match object.get(field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    error.missing_fields.push(path);
                }
            }
            Some(value) => check_kind(value, &field.kind, &path, error),
        }
    }
}

fn check_kind(value: &Value, kind: &FieldKind, path: &str, error: &mut SchemaError) {
    let mismatch = |error: &mut SchemaError| {
        error.type_mismatches.push(TypeMismatch {
            field: path.to_string(),
            expected: kind.type_name().to_string(),
            found: json_type(value).to_string(),
        });
    };

    match kind {
        FieldKind::String => {
            if !value.is_string() {
                mismatch(error);
            }
        }
        FieldKind::Boolean => {
            if !value.is_boolean() {
                mismatch(error);
            }
        }
        FieldKind::Integer => {
            if !is_integer(value) {
                mismatch(error);
            }
        }
        FieldKind::Mapping => {
            if !value.is_object() {
                mismatch(error);
            }
        }
        FieldKind::StringList => match value.as_array() {
            Some(items) if items.iter().all(Value::is_string) => {}
            _ => mismatch(error),
        },
        FieldKind::IntegerList => match value.as_array() {
            Some(items) if items.iter().all(is_integer) => {}
            _ => mismatch(error),
        },
        FieldKind::ObjectList(fields) => match value.as_array() {
            Some(items) => {
                for (index, item) in items.iter().enumerate() {
                    let item_path = format!("{}[{}]", path, index);
                    if item.is_object() {
                        check_fields(item, fields, &item_path, error);
                    } else {
                        error.type_mismatches.push(TypeMismatch {
                            field: item_path,
                            expected: "object".to_string(),
                            found: json_type(item).to_string(),
                        });
                    }
                }
            }
            None => mismatch(error),
        },
        FieldKind::Enum(allowed) => match value.as_str() {
            Some(s) if allowed.contains(&s) => {}
            Some(s) => error.invalid_values.push(InvalidValue {
                field: path.to_string(),
                value: s.to_string(),
                allowed: allowed.iter().map(|a| a.to_string()).collect(),
            }),
            None => mismatch(error),
        },
    }
}

fn is_integer(value: &Value) -> bool {
    value.is_i64() || value.is_u64()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl fmt::Display for TypeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: expected {}, found {}", self.field, self.expected, self.found)
    }
}
