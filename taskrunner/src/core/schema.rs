//! Tool parameter schemas and call-time parameter checks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::ToolParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::Any => "any",
        }
    }

    pub fn matches(self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Any => true,
        }
    }
}

/// Declared shape of one tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParamSpec {
    pub fn required(kind: ParamType) -> Self {
        Self {
            kind,
            required: true,
            allowed: None,
            default: None,
            description: None,
        }
    }

    pub fn optional(kind: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(kind)
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_enum<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }
}

/// Structural problems with a parameter declaration.
pub fn validate_spec(name: &str, spec: &ParamSpec) -> Vec<String> {
    let mut errors = Vec::new();

    if name.trim().is_empty() {
        errors.push("parameter name must not be empty".to_string());
    }

    if let Some(allowed) = &spec.allowed {
        if allowed.is_empty() {
            errors.push(format!("{name}: enum must not be empty"));
        }
        for value in allowed {
            if !spec.kind.matches(value) {
                errors.push(format!(
                    "{name}: enum value {value} is not a {}",
                    spec.kind.as_str()
                ));
            }
        }
    }

    if let Some(default) = &spec.default {
        if spec.required {
            errors.push(format!("{name}: required parameter cannot have a default"));
        }
        if !spec.kind.matches(default) {
            errors.push(format!(
                "{name}: default {default} is not a {}",
                spec.kind.as_str()
            ));
        }
        if let Some(allowed) = &spec.allowed
            && !allowed.contains(default)
        {
            errors.push(format!("{name}: default {default} is not in enum"));
        }
    }

    errors
}

/// Check resolved call parameters against a schema.
///
/// Unknown parameters are tolerated; the caller decides whether to log them.
pub fn check_params(schema: &BTreeMap<String, ParamSpec>, params: &ToolParams) -> Vec<String> {
    let mut errors = Vec::new();
    for (name, spec) in schema {
        let Some(value) = params.get(name) else {
            if spec.required {
                errors.push(format!("missing required parameter '{name}'"));
            }
            continue;
        };
        if !spec.kind.matches(value) {
            errors.push(format!(
                "parameter '{name}' expected {}, got {}",
                spec.kind.as_str(),
                json_kind(value)
            ));
            continue;
        }
        if let Some(allowed) = &spec.allowed
            && !allowed.contains(value)
        {
            errors.push(format!("parameter '{name}' value {value} is not allowed"));
        }
    }
    errors
}

/// Fill absent optional parameters with their declared defaults.
pub fn apply_defaults(schema: &BTreeMap<String, ParamSpec>, params: &mut ToolParams) {
    for (name, spec) in schema {
        if let Some(default) = &spec.default
            && !params.contains_key(name)
        {
            params.insert(name.clone(), default.clone());
        }
    }
}

/// Parameters present in the call but not declared by the schema.
pub fn unknown_params<'a>(
    schema: &BTreeMap<String, ParamSpec>,
    params: &'a ToolParams,
) -> Vec<&'a str> {
    params
        .keys()
        .filter(|name| !schema.contains_key(name.as_str()))
        .map(String::as_str)
        .collect()
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
