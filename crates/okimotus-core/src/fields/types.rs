//! Field and transformation definitions

use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::transform::script::Script;
use crate::transform::Value;

/// Declared type of a field's raw text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Signed 64-bit integer
    Int,
    /// 64-bit float
    Float,
    /// Trimmed text
    #[default]
    String,
}

impl ValueType {
    /// Parse a config type name. Unknown names fall back to `String`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "int" | "integer" => ValueType::Int,
            "float" | "double" | "number" => ValueType::Float,
            "string" | "str" | "text" => ValueType::String,
            other => {
                warn!("Unknown field type '{}', treating as string", other);
                ValueType::String
            }
        }
    }

    /// Config name for this type
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::String => "string",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arithmetic applied by a transformation step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `value * operand`
    Multiply,
    /// `value / operand`, or `0` when the operand is zero
    Divide,
    /// `value + operand`
    Add,
    /// `value - operand`
    Subtract,
    /// `value ** operand`
    Power,
    /// Kept verbatim so the config round-trips; applying it leaves the value unchanged
    Unknown(String),
}

impl Operation {
    /// Parse a case-insensitive operation name
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "multiply" => Operation::Multiply,
            "divide" => Operation::Divide,
            "add" => Operation::Add,
            "subtract" => Operation::Subtract,
            "power" => Operation::Power,
            _ => Operation::Unknown(name.to_string()),
        }
    }

    /// Config name for this operation
    pub fn as_str(&self) -> &str {
        match self {
            Operation::Multiply => "multiply",
            Operation::Divide => "divide",
            Operation::Add => "add",
            Operation::Subtract => "subtract",
            Operation::Power => "power",
            Operation::Unknown(name) => name,
        }
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One step of a field's transformation chain
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformStep {
    /// Operation to apply
    pub operation: Operation,

    /// Right-hand operand
    pub operand: Value,

    /// Display label for this step's result
    pub label: String,

    /// Format template for this step's result
    pub format_spec: String,

    /// Unit appended after the formatted result
    pub unit: String,
}

impl Default for TransformStep {
    fn default() -> Self {
        Self {
            operation: Operation::Multiply,
            operand: Value::Int(1),
            label: "Transformed".to_string(),
            format_spec: "{:.3f}".to_string(),
            unit: String::new(),
        }
    }
}

impl TransformStep {
    /// A step with default label and format
    pub fn new(operation: Operation, operand: impl Into<Value>) -> Self {
        Self {
            operation,
            operand: operand.into(),
            ..Self::default()
        }
    }
}

/// Display configuration for one position in one port's lines
#[derive(Debug, Clone, Serialize)]
pub struct FieldConfig {
    /// Registry-unique identifier
    pub id: String,

    /// Port whose lines this field reads
    pub port: String,

    /// Zero-based position in the line
    pub source_index: usize,

    /// Human-readable label
    pub label: String,

    /// How the raw text is coerced
    pub value_type: ValueType,

    /// Format template for the value
    pub format_spec: String,

    /// Unit appended after the formatted value
    pub unit: String,

    /// Display color hint
    pub color: String,

    /// Lower bound hint for gauges
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    /// Upper bound hint for gauges
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    /// Derived display values, applied in order
    pub transformations: Vec<TransformStep>,

    /// Optional conversion script source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,

    /// Disabled fields are never rendered
    pub enabled: bool,

    #[serde(skip)]
    compiled: Option<Arc<Script>>,
}

impl PartialEq for FieldConfig {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.port == other.port
            && self.source_index == other.source_index
            && self.label == other.label
            && self.value_type == other.value_type
            && self.format_spec == other.format_spec
            && self.unit == other.unit
            && self.color == other.color
            && self.min == other.min
            && self.max == other.max
            && self.transformations == other.transformations
            && self.script == other.script
            && self.enabled == other.enabled
    }
}

impl FieldConfig {
    /// A field with default label, type and format
    pub fn new(port: impl Into<String>, source_index: usize) -> Self {
        Self {
            id: String::new(),
            port: port.into(),
            source_index,
            label: format!("Field {}", source_index),
            value_type: ValueType::String,
            format_spec: "{}".to_string(),
            unit: String::new(),
            color: "black".to_string(),
            min: None,
            max: None,
            transformations: Vec::new(),
            script: None,
            enabled: true,
            compiled: None,
        }
    }

    /// Set the conversion script and compile it
    pub fn with_script(mut self, source: impl Into<String>) -> Self {
        self.script = Some(source.into());
        self.cache_script();
        self
    }

    /// Compile `script` ahead of time.
    ///
    /// A script that fails to compile is logged here; at runtime the field then
    /// falls back to its coerced value.
    pub fn cache_script(&mut self) {
        self.compiled = match self.script.as_deref() {
            Some(source) => match Script::compile(source) {
                Ok(script) => Some(Arc::new(script)),
                Err(e) => {
                    warn!(
                        "Script for field '{}' on {} does not compile: {}",
                        self.label, self.port, e
                    );
                    None
                }
            },
            None => None,
        };
    }

    /// Compiled script, if one is cached and matches the current source
    pub(crate) fn compiled_script(&self) -> Option<&Arc<Script>> {
        self.compiled
            .as_ref()
            .filter(|script| self.script.as_deref() == Some(script.source()))
    }

    /// Whether this field has a script configured
    pub fn has_script(&self) -> bool {
        self.script.is_some()
    }

    /// Whether this field has transformation steps
    pub fn is_transformed(&self) -> bool {
        !self.transformations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_field_defaults() {
        let field = FieldConfig::new("/dev/ttyUSB0", 3);
        assert_eq!(field.label, "Field 3");
        assert_eq!(field.value_type, ValueType::String);
        assert_eq!(field.format_spec, "{}");
        assert_eq!(field.color, "black");
        assert!(field.enabled);
    }

    #[test]
    fn test_step_defaults() {
        let step = TransformStep::default();
        assert_eq!(step.operation, Operation::Multiply);
        assert_eq!(step.operand, Value::Int(1));
        assert_eq!(step.label, "Transformed");
        assert_eq!(step.format_spec, "{:.3f}");
    }

    #[test]
    fn test_operation_names_are_case_insensitive() {
        assert_eq!(Operation::from_name("DIVIDE"), Operation::Divide);
        assert_eq!(
            Operation::from_name("modulo"),
            Operation::Unknown("modulo".to_string())
        );
    }

    #[test]
    fn test_script_cache_tracks_source() {
        let mut field = FieldConfig::new("p", 0).with_script("value * 2");
        assert!(field.compiled_script().is_some());

        field.script = Some("value * 3".to_string());
        assert!(field.compiled_script().is_none());

        field.cache_script();
        assert_eq!(field.compiled_script().unwrap().source(), "value * 3");
    }

    #[test]
    fn test_bad_script_is_not_cached() {
        let field = FieldConfig::new("p", 0).with_script("value +");
        assert!(field.has_script());
        assert!(field.compiled_script().is_none());
    }

    #[test]
    fn test_serializes_with_config_names() {
        let mut field = FieldConfig::new("p", 1);
        field
            .transformations
            .push(TransformStep::new(Operation::Divide, 4i64));
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(json["value_type"], "string");
        assert_eq!(json["transformations"][0]["operation"], "divide");
        assert_eq!(json["transformations"][0]["operand"], 4);
    }
}
