//! Typed parameter schemas for tools
//!
//! A [`ToolSchema`] is both the declaration sent to the model (rendered as
//! JSON Schema) and the check applied to the arguments the model sends back,
//! so the two can't drift apart.

use serde_json::{json, Map, Value};
use std::fmt;
use thiserror::Error;

/// Primitive JSON types a parameter may take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64() || is_integral_float(value),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Gemini sends every number as a float (e.g. 3.0)
fn is_integral_float(value: &Value) -> bool {
    value.as_f64().is_some_and(|f| f.fract() == 0.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParamType,
    pub description: String,
    pub required: bool,
}

impl ParameterSpec {
    pub fn required(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// Why a tool call's arguments were rejected
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ArgumentError {
    #[error("arguments must be a JSON object, got {0}")]
    NotAnObject(String),

    #[error("missing required parameter '{0}'")]
    Missing(String),

    #[error("parameter '{name}' must be a {expected}")]
    WrongType { name: String, expected: ParamType },

    #[error("unknown parameter '{0}'")]
    Unknown(String),
}

/// Ordered list of parameters a tool accepts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolSchema {
    params: Vec<ParameterSpec>,
}

impl ToolSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, spec: ParameterSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Render as the JSON Schema object used in function declarations
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    json!({ "type": p.kind.as_str(), "description": p.description }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        let mut schema = json!({ "type": "object", "properties": properties });
        if !required.is_empty() {
            schema["required"] = json!(required);
        }
        schema
    }

    /// Check `args` against the schema
    ///
    /// A JSON `null` is read as "no arguments". Reports the first problem found,
    /// checking unknown names before missing ones so typos are named directly.
    pub fn validate(&self, args: &Value) -> Result<ValidatedArgs, ArgumentError> {
        let empty = Map::new();
        let map = match args {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => return Err(ArgumentError::NotAnObject(json_kind(other).to_string())),
        };

        if let Some(unknown) = map
            .keys()
            .find(|k| !self.params.iter().any(|p| &p.name == *k))
        {
            return Err(ArgumentError::Unknown(unknown.clone()));
        }

        for spec in &self.params {
            match map.get(&spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(ArgumentError::Missing(spec.name.clone()));
                }
                Some(value) if !value.is_null() && !spec.kind.accepts(value) => {
                    return Err(ArgumentError::WrongType {
                        name: spec.name.clone(),
                        expected: spec.kind,
                    });
                }
                _ => {}
            }
        }

        Ok(ValidatedArgs(map.clone()))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Arguments that passed [`ToolSchema::validate`]
///
/// `str` can only return `None` for an optional parameter that was left out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedArgs(Map<String, Value>);

impl ValidatedArgs {
    pub fn str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }
}
