//! Argument binding: decode a JSON argument map against a declared schema.
//!
//! Every field is checked so a failure reports the full set of violations,
//! not just the first. Unknown fields are ignored. Numeric JSON values widen
//! to the declared integer or floating type; defaults fill absent optional
//! fields.

use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};

use super::{FieldSpec, InputSchema, SchemaType, StringFormat};

/// One field that failed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

/// Aggregate validation failure listing every offending field.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
#[error("argument validation failed: {}", self.describe())]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    fn describe(&self) -> String {
        self.violations
            .iter()
            .map(|v| format!("{}: {}", v.field, v.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Bind an argument map to a schema, producing the validated (and
/// default-filled, widened) argument object.
pub fn bind_arguments(
    schema: &InputSchema,
    arguments: Option<&Map<String, Value>>,
) -> Result<Map<String, Value>, ValidationError> {
    let empty = Map::new();
    let args = arguments.unwrap_or(&empty);

    let mut bound = Map::new();
    let mut violations = Vec::new();

    for field in schema.fields() {
        match args.get(&field.name) {
            Some(value) => match coerce(field, value) {
                Ok(coerced) => {
                    if let Err(mut errs) = check_constraints(field, &coerced) {
                        violations.append(&mut errs);
                    } else {
                        bound.insert(field.name.clone(), coerced);
                    }
                }
                Err(message) => violations.push(FieldViolation {
                    field: field.name.clone(),
                    message,
                }),
            },
            None if field.required => violations.push(FieldViolation {
                field: field.name.clone(),
                message: "missing required field".to_string(),
            }),
            None => {
                if let Some(default) = &field.default {
                    bound.insert(field.name.clone(), default.clone());
                }
            }
        }
    }

    if violations.is_empty() {
        Ok(bound)
    } else {
        Err(ValidationError { violations })
    }
}

/// Decode a validated argument object into a typed parameter struct.
pub fn decode_arguments<T: DeserializeOwned>(bound: Map<String, Value>) -> Result<T, ValidationError> {
    serde_json::from_value(Value::Object(bound)).map_err(|e| ValidationError {
        violations: vec![FieldViolation {
            field: "<arguments>".to_string(),
            message: e.to_string(),
        }],
    })
}

/// Type-check a value against the declared type, widening numerics.
fn coerce(field: &FieldSpec, value: &Value) -> Result<Value, String> {
    match field.ty {
        SchemaType::String => match value {
            Value::String(_) => Ok(value.clone()),
            other => Err(type_mismatch("string", other)),
        },
        SchemaType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            other => Err(type_mismatch("boolean", other)),
        },
        SchemaType::Integer => match value {
            Value::Number(n) if n.as_i64().is_some() => Ok(value.clone()),
            // An integral float narrows losslessly.
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.is_finite() => {
                    Ok(Value::Number(Number::from(f as i64)))
                }
                _ => Err(type_mismatch("integer", value)),
            },
            other => Err(type_mismatch("integer", other)),
        },
        SchemaType::Number => match value {
            Value::Number(_) => Ok(value.clone()),
            other => Err(type_mismatch("number", other)),
        },
        SchemaType::Array => match value {
            Value::Array(_) => Ok(value.clone()),
            other => Err(type_mismatch("array", other)),
        },
        SchemaType::Object => match value {
            Value::Object(_) => Ok(value.clone()),
            other => Err(type_mismatch("object", other)),
        },
    }
}

fn check_constraints(field: &FieldSpec, value: &Value) -> Result<(), Vec<FieldViolation>> {
    let mut violations = Vec::new();
    let fail = |message: String| FieldViolation {
        field: field.name.clone(),
        message,
    };

    if let Some(allowed) = &field.enum_values {
        if !allowed.contains(value) {
            violations.push(fail(format!(
                "value {value} is not one of the allowed values"
            )));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = field.minimum {
            if n < min {
                violations.push(fail(format!("{n} is below the minimum {min}")));
            }
        }
        if let Some(max) = field.maximum {
            if n > max {
                violations.push(fail(format!("{n} is above the maximum {max}")));
            }
        }
    }

    if let Some(s) = value.as_str() {
        let chars = s.chars().count();
        if let Some(min) = field.min_length {
            if chars < min {
                violations.push(fail(format!("length {chars} is below minLength {min}")));
            }
        }
        if let Some(max) = field.max_length {
            if chars > max {
                violations.push(fail(format!("length {chars} exceeds maxLength {max}")));
            }
        }
        if let Some(pattern) = &field.pattern {
            if !pattern.is_match(s) {
                violations.push(fail(format!("value does not match pattern {}", pattern.as_str())));
            }
        }
        if let Some(format) = field.format {
            if !check_format(format, s) {
                violations.push(fail(format!("value is not a valid {}", format.as_str())));
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn check_format(format: StringFormat, s: &str) -> bool {
    match format {
        StringFormat::Email => {
            let Some((local, domain)) = s.split_once('@') else {
                return false;
            };
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        StringFormat::Uri => {
            let Some((scheme, rest)) = s.split_once(':') else {
                return false;
            };
            !rest.is_empty()
                && !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
    }
}

fn type_mismatch(expected: &str, actual: &Value) -> String {
    let got = match actual {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    format!("expected {expected}, got {got}")
}
