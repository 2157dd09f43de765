//! Patch option values
//!
//! Option values come from the catalog as arbitrary JSON. The type family of
//! each option is fixed by its catalog default, and every later edit is
//! coerced back into that family.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// A single option value
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OptionValue {
    #[default]
    Absent,
    Bool(bool),
    Int(i64),
    Str(String),
}

/// Type family of an option, fixed at catalog load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Absent,
    Bool,
    Int,
    Str,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Absent => "any value",
            ValueKind::Bool => "a boolean",
            ValueKind::Int => "an integer",
            ValueKind::Str => "a string",
        };
        f.write_str(name)
    }
}

impl OptionValue {
    /// Convert raw catalog/sidecar JSON into a value.
    ///
    /// Lists collapse to a comma-joined string; floats and objects become
    /// their textual JSON form.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => OptionValue::Absent,
            Value::Bool(b) => OptionValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => OptionValue::Int(i),
                None => OptionValue::Str(n.to_string()),
            },
            Value::String(s) => OptionValue::Str(s),
            Value::Array(items) => OptionValue::Str(
                items
                    .into_iter()
                    .map(scalar_text)
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            object @ Value::Object(_) => OptionValue::Str(object.to_string()),
        }
    }

    /// Best-effort interpretation of free text typed by a user
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return OptionValue::Absent;
        }
        if let Some(b) = parse_bool(trimmed) {
            return OptionValue::Bool(b);
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return OptionValue::Int(i);
        }
        OptionValue::Str(raw.to_string())
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            OptionValue::Absent => ValueKind::Absent,
            OptionValue::Bool(_) => ValueKind::Bool,
            OptionValue::Int(_) => ValueKind::Int,
            OptionValue::Str(_) => ValueKind::Str,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, OptionValue::Absent)
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Absent => f.write_str("<unset>"),
            OptionValue::Bool(b) => write!(f, "{}", b),
            OptionValue::Int(i) => write!(f, "{}", i),
            OptionValue::Str(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl Serialize for OptionValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            OptionValue::Absent => serializer.serialize_none(),
            OptionValue::Bool(b) => serializer.serialize_bool(*b),
            OptionValue::Int(i) => serializer.serialize_i64(*i),
            OptionValue::Str(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for OptionValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(OptionValue::from_json)
    }
}

fn scalar_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" => Some(true),
        "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Option value errors
#[derive(Debug, thiserror::Error)]
pub enum ValueError {
    #[error("option '{key}' expects {expected}, got {got}")]
    TypeMismatch {
        key: String,
        expected: ValueKind,
        got: String,
    },
}

/// A configurable patch parameter
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOption {
    pub key: String,
    pub value: OptionValue,
    pub title: String,
    pub description: String,
    pub required: bool,
    kind: ValueKind,
}

impl PatchOption {
    /// Create an option whose type family is taken from `default`
    pub fn new(
        key: impl Into<String>,
        default: OptionValue,
        title: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        Self {
            key: key.into(),
            kind: default.kind(),
            value: default,
            title: title.into(),
            description: description.into(),
            required,
        }
    }

    /// Type family fixed by the catalog default
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// True when this option is required and has no concrete value
    pub fn is_missing(&self) -> bool {
        self.required && self.value.is_absent()
    }

    /// Coerce a candidate value into this option's type family.
    pub fn coerce(&self, candidate: OptionValue) -> Result<OptionValue, ValueError> {
        let coerced = match (self.kind, candidate) {
            (_, OptionValue::Absent) => Some(OptionValue::Absent),
            (ValueKind::Absent, any) => Some(any),

            (ValueKind::Bool, OptionValue::Bool(b)) => Some(OptionValue::Bool(b)),
            (ValueKind::Bool, OptionValue::Int(i @ (0 | 1))) => Some(OptionValue::Bool(i == 1)),
            (ValueKind::Bool, OptionValue::Str(ref s)) => parse_bool(s.trim()).map(OptionValue::Bool),

            (ValueKind::Int, OptionValue::Int(i)) => Some(OptionValue::Int(i)),
            (ValueKind::Int, OptionValue::Str(ref s)) => {
                s.trim().parse::<i64>().ok().map(OptionValue::Int)
            }

            (ValueKind::Str, OptionValue::Str(s)) => Some(OptionValue::Str(s)),
            (ValueKind::Str, OptionValue::Bool(b)) => Some(OptionValue::Str(b.to_string())),
            (ValueKind::Str, OptionValue::Int(i)) => Some(OptionValue::Str(i.to_string())),

            (_, other) => {
                return Err(self.mismatch(&other));
            }
        };

        coerced.ok_or_else(|| ValueError::TypeMismatch {
            key: self.key.clone(),
            expected: self.kind,
            got: "an unparsable value".to_string(),
        })
    }

    /// Parse user input for this option.
    ///
    /// Empty input or `null` clears the value for every kind. Otherwise
    /// string options take the input verbatim so values like `007` survive.
    pub fn parse_input(&self, raw: &str) -> Result<OptionValue, ValueError> {
        match (self.kind, OptionValue::infer(raw)) {
            (_, OptionValue::Absent) => Ok(OptionValue::Absent),
            (ValueKind::Str, _) => Ok(OptionValue::Str(raw.to_string())),
            (_, inferred) => self.coerce(inferred),
        }
    }

    /// Coerce and store a new value
    pub fn set(&mut self, candidate: OptionValue) -> Result<(), ValueError> {
        self.value = self.coerce(candidate)?;
        Ok(())
    }

    fn mismatch(&self, got: &OptionValue) -> ValueError {
        ValueError::TypeMismatch {
            key: self.key.clone(),
            expected: self.kind,
            got: got.kind().to_string(),
        }
    }
}
