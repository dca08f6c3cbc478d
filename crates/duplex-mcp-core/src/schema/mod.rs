//! Input schemas for tools and prompts.
//!
//! The original runtime discovered handler argument shapes through
//! reflection. Here a handler declares its fields explicitly through
//! [`InputSchema`]; the declaration doubles as the JSON-Schema published in
//! `tools/list` and as the validation program run before every call. The
//! contract stays "given a JSON object and a target parameter shape, produce
//! a typed value or a structured validation error".

mod bind;

pub use bind::{FieldViolation, ValidationError, bind_arguments, decode_arguments};

use regex::Regex;
use serde_json::{Map, Value, json};

use crate::protocol::jsonrpc::{JsonRpcError, mcp_error_codes};

/// JSON-Schema primitive types a field can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl SchemaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::String => "string",
            SchemaType::Integer => "integer",
            SchemaType::Number => "number",
            SchemaType::Boolean => "boolean",
            SchemaType::Array => "array",
            SchemaType::Object => "object",
        }
    }
}

/// String formats enforced on bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringFormat {
    Email,
    Uri,
}

impl StringFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            StringFormat::Email => "email",
            StringFormat::Uri => "uri",
        }
    }
}

/// One declared field of an input schema.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub ty: SchemaType,
    pub description: Option<String>,
    pub required: bool,
    pub enum_values: Option<Vec<Value>>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Regex>,
    pub format: Option<StringFormat>,
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, ty: SchemaType) -> Self {
        Self {
            name: name.into(),
            ty,
            description: None,
            required: false,
            enum_values: None,
            minimum: None,
            maximum: None,
            min_length: None,
            max_length: None,
            pattern: None,
            format: None,
            default: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, SchemaType::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, SchemaType::Integer)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, SchemaType::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, SchemaType::Boolean)
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self::new(name, SchemaType::Array)
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, SchemaType::Object)
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Restrict the field to a closed set of values.
    pub fn enum_values(mut self, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn minimum(mut self, min: f64) -> Self {
        self.minimum = Some(min);
        self
    }

    pub fn maximum(mut self, max: f64) -> Self {
        self.maximum = Some(max);
        self
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    /// Compiles at declaration time so registration rejects bad patterns.
    pub fn pattern(mut self, pattern: &str) -> Result<Self, SchemaError> {
        self.pattern = Some(
            Regex::new(pattern)
                .map_err(|e| SchemaError::InvalidPattern(self.name.clone(), e.to_string()))?,
        );
        Ok(self)
    }

    pub fn format(mut self, format: StringFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    fn to_json(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".to_string(), json!(self.ty.as_str()));
        if let Some(desc) = &self.description {
            schema.insert("description".to_string(), json!(desc));
        }
        if let Some(values) = &self.enum_values {
            schema.insert("enum".to_string(), Value::Array(values.clone()));
        }
        if let Some(min) = self.minimum {
            schema.insert("minimum".to_string(), json!(min));
        }
        if let Some(max) = self.maximum {
            schema.insert("maximum".to_string(), json!(max));
        }
        if let Some(len) = self.min_length {
            schema.insert("minLength".to_string(), json!(len));
        }
        if let Some(len) = self.max_length {
            schema.insert("maxLength".to_string(), json!(len));
        }
        if let Some(pattern) = &self.pattern {
            schema.insert("pattern".to_string(), json!(pattern.as_str()));
        }
        if let Some(format) = self.format {
            schema.insert("format".to_string(), json!(format.as_str()));
        }
        if let Some(default) = &self.default {
            schema.insert("default".to_string(), default.clone());
        }
        Value::Object(schema)
    }
}

/// A declared object schema for tool or prompt input.
#[derive(Debug, Clone, Default)]
pub struct InputSchema {
    fields: Vec<FieldSpec>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field. Duplicate names are a declaration error.
    pub fn field(mut self, spec: FieldSpec) -> Result<Self, SchemaError> {
        if self.fields.iter().any(|f| f.name == spec.name) {
            return Err(SchemaError::DuplicateField(spec.name));
        }
        self.fields.push(spec);
        Ok(self)
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Render the published JSON-Schema object.
    pub fn to_json(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            properties.insert(field.name.clone(), field.to_json());
            if field.required {
                required.push(json!(field.name));
            }
        }
        let mut schema = Map::new();
        schema.insert("type".to_string(), json!("object"));
        schema.insert("properties".to_string(), Value::Object(properties));
        if !required.is_empty() {
            schema.insert("required".to_string(), Value::Array(required));
        }
        Value::Object(schema)
    }
}

/// Declaration- and bind-time schema failures.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("duplicate field: {0}")]
    DuplicateField(String),

    #[error("invalid pattern for field {0}: {1}")]
    InvalidPattern(String, String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl From<&SchemaError> for JsonRpcError {
    fn from(err: &SchemaError) -> Self {
        match err {
            SchemaError::Validation(v) => JsonRpcError::new(
                mcp_error_codes::INVALID_ARGUMENT,
                v.to_string(),
            )
            .with_data(json!({
                "violations": v
                    .violations
                    .iter()
                    .map(|f| json!({"field": f.field, "message": f.message}))
                    .collect::<Vec<_>>()
            })),
            other => JsonRpcError::invalid_params(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_json_shape() {
        let schema = InputSchema::new()
            .field(
                FieldSpec::string("operation")
                    .description("Arithmetic operation")
                    .required()
                    .enum_values(["add", "subtract", "multiply", "divide"]),
            )
            .unwrap()
            .field(FieldSpec::number("operand1").required())
            .unwrap()
            .field(FieldSpec::number("operand2").required())
            .unwrap();

        let json = schema.to_json();
        assert_eq!(json["type"], "object");
        assert_eq!(json["properties"]["operation"]["type"], "string");
        assert_eq!(
            json["properties"]["operation"]["enum"],
            json!(["add", "subtract", "multiply", "divide"])
        );
        assert_eq!(json["required"], json!(["operation", "operand1", "operand2"]));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let result = InputSchema::new()
            .field(FieldSpec::string("x"))
            .unwrap()
            .field(FieldSpec::integer("x"));
        assert!(matches!(result, Err(SchemaError::DuplicateField(_))));
    }

    #[test]
    fn test_bad_pattern_rejected_at_declaration() {
        assert!(FieldSpec::string("code").pattern("[unclosed").is_err());
    }

    #[test]
    fn test_optional_constraints_serialized() {
        let schema = InputSchema::new()
            .field(
                FieldSpec::integer("count")
                    .minimum(1.0)
                    .maximum(100.0)
                    .default_value(10),
            )
            .unwrap();
        let json = schema.to_json();
        assert_eq!(json["properties"]["count"]["minimum"], json!(1.0));
        assert_eq!(json["properties"]["count"]["default"], json!(10));
        assert!(json.get("required").is_none());
    }
}
