//! Declared data shapes for agent inputs/outputs and model responses.
//!
//! A `Schema` is a flat list of named, typed fields. It is deliberately much
//! smaller than JSON Schema: the planner has to emit it, and the core has to
//! check artifacts against it without pulling in a validator.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON type a field must carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    #[default]
    Any,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        }
    }

    /// Whether `value` has this kind.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }
}

/// A single named field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: FieldKind,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_required() -> bool {
    true
}

/// An ordered set of fields, serialized as a JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    pub fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required field.
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: true,
            description: None,
        });
        self
    }

    /// Add an optional field.
    pub fn optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: false,
            description: None,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Check `value` against this schema and return every problem found.
    ///
    /// An empty schema accepts any value. Otherwise the value must be an
    /// object carrying each required field with the declared kind. Optional
    /// fields may be absent or null. Extra fields are allowed.
    pub fn check(&self, value: &Value) -> Result<(), Vec<String>> {
        if self.fields.is_empty() {
            return Ok(());
        }

        let obj = match value.as_object() {
            Some(obj) => obj,
            None => return Err(vec![format!("expected a JSON object, got {}", kind_of(value))]),
        };

        let mut problems = Vec::new();
        for field in &self.fields {
            match obj.get(&field.name) {
                None | Some(Value::Null) if !field.required => {}
                None => problems.push(format!("missing required field '{}'", field.name)),
                Some(v) if !field.kind.matches(v) => problems.push(format!(
                    "field '{}' should be {} but is {}",
                    field.name,
                    field.kind.as_str(),
                    kind_of(v)
                )),
                Some(_) => {}
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    /// Compact JSON shape used inside prompts, e.g. `{"summary": "string"}`.
    pub fn describe(&self) -> Value {
        let mut map = serde_json::Map::new();
        for f in &self.fields {
            let label = if f.required {
                f.kind.as_str().to_string()
            } else {
                format!("{} (optional)", f.kind.as_str())
            };
            map.insert(f.name.clone(), Value::String(label));
        }
        Value::Object(map)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
