//! Value Transformation
//!
//! Turns a field's raw text into display text: coerce to the declared type,
//! optionally run the field's script, then format with the field's template
//! and unit. Transformation chains derive extra values from the coerced number.
//!
//! Nothing here returns an error to the display layer. Any failure degrades to
//! [`PLACEHOLDER`] (or, for scripts, to the unscripted value) and is logged.

pub mod format;
pub mod script;
mod value;

use serde::Serialize;
use std::collections::BTreeMap;
use std::num::IntErrorKind;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::fields::{FieldConfig, Operation, TransformStep, ValueType};
use crate::stream::Line;
pub use format::{format_template, FormatError};
pub use script::{Bindings, Script, ScriptError};
pub use value::{arith, parse_float, parse_int, repr_float, ArithOp, Key, Value};

/// Display text for a value that could not be produced
pub const PLACEHOLDER: &str = "---";

/// Transformation errors. Absorbed by [`TransformEngine`], never surfaced to sinks.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    /// Raw text does not parse as the declared type
    #[error("Cannot read '{raw}' as {value_type}")]
    Coercion {
        /// Text as received
        raw: String,
        /// Declared type
        value_type: ValueType,
    },

    /// Format template failed
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Script failed
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    /// Arithmetic step on a non-numeric value
    #[error("Expected a number, got {0}")]
    NotNumeric(&'static str),

    /// Overflow or an undefined result
    #[error("Arithmetic error: {0}")]
    Arithmetic(String),
}

/// One formatted step of a transformation chain
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    /// Step label
    pub label: String,

    /// Formatted value with unit, or the placeholder
    pub value: String,

    /// Numeric result, if the step succeeded
    pub raw_value: Option<Value>,
}

/// Stateless formatter for configured fields. Cheap to copy and share.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformEngine;

impl TransformEngine {
    /// Create an engine
    pub fn new() -> Self {
        Self
    }

    /// Coerce raw text to the field's declared type.
    ///
    /// Empty text and text containing NUL never coerce. Integers outside the
    /// `i64` range become floats.
    pub fn coerce(&self, field: &FieldConfig, raw: &str) -> Result<Value, TransformError> {
        let trimmed = raw.trim();
        let failed = || TransformError::Coercion {
            raw: raw.to_string(),
            value_type: field.value_type,
        };
        if trimmed.is_empty() || trimmed.contains('\0') {
            return Err(failed());
        }
        match field.value_type {
            ValueType::Int => match parse_int(trimmed) {
                Ok(n) => Ok(Value::Int(n)),
                Err(e)
                    if matches!(
                        e.kind(),
                        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow
                    ) =>
                {
                    debug!("'{}' exceeds i64, reading as float", trimmed);
                    parse_float(trimmed).map(Value::Float).map_err(|_| failed())
                }
                Err(_) => Err(failed()),
            },
            ValueType::Float => parse_float(trimmed).map(Value::Float).map_err(|_| failed()),
            ValueType::String => Ok(Value::Str(trimmed.to_string())),
        }
    }

    /// Display text for `raw` under `field`, with the unit appended.
    ///
    /// `line` is the full line the value came from, visible to scripts.
    pub fn format_value(&self, field: &FieldConfig, raw: &str, line: Option<&Line>) -> String {
        let value = match self.coerce(field, raw) {
            Ok(value) => value,
            Err(e) => {
                trace!("{}: {}", field.id, e);
                return PLACEHOLDER.to_string();
            }
        };
        let value = self.convert(field, value, raw, line);
        render(&field.format_spec, &field.unit, &value).unwrap_or_else(|e| {
            debug!("{}: {}", field.id, e);
            PLACEHOLDER.to_string()
        })
    }

    /// Run the field's script on a coerced value.
    ///
    /// Without a script, or when the script fails, the value is returned as is.
    pub fn convert(&self, field: &FieldConfig, value: Value, raw: &str, line: Option<&Line>) -> Value {
        let Some(source) = field.script.as_deref() else {
            return value;
        };
        let compiled = match field.compiled_script() {
            Some(script) => script.clone(),
            None => match Script::compile(source) {
                Ok(script) => std::sync::Arc::new(script),
                Err(e) => {
                    debug!("{}: script does not compile: {}", field.id, e);
                    return value;
                }
            },
        };

        match compiled.run(script_bindings(field, &value, raw, line)) {
            Ok(converted) => converted,
            Err(e) => {
                debug!("{}: script failed: {}", field.id, e);
                value
            }
        }
    }

    /// Apply one step.
    ///
    /// Dividing by zero yields `0` and an unknown operation leaves the value
    /// unchanged, whatever the value is; both are logged. Any other step needs
    /// a numeric value.
    pub fn apply_transformation(
        &self,
        value: &Value,
        step: &TransformStep,
    ) -> Result<Value, TransformError> {
        let op = match &step.operation {
            Operation::Multiply => ArithOp::Mul,
            Operation::Divide => {
                if step.operand.as_f64() == Some(0.0) {
                    warn!("Division by zero in transformation '{}', using 0", step.label);
                    return Ok(Value::Int(0));
                }
                ArithOp::Div
            }
            Operation::Add => ArithOp::Add,
            Operation::Subtract => ArithOp::Sub,
            Operation::Power => ArithOp::Pow,
            Operation::Unknown(name) => {
                warn!("Unknown transformation operation '{}'", name);
                return Ok(value.clone());
            }
        };
        if !value.is_numeric() {
            return Err(TransformError::NotNumeric(value.type_name()));
        }
        arith(op, value, &step.operand).map_err(TransformError::Arithmetic)
    }

    /// Every intermediate result of the field's chain, in config order
    pub fn transform_chain(
        &self,
        field: &FieldConfig,
        value: &Value,
    ) -> Result<Vec<Value>, TransformError> {
        let mut results = Vec::with_capacity(field.transformations.len());
        let mut current = value.clone();
        for step in &field.transformations {
            current = self.apply_transformation(&current, step)?;
            results.push(current.clone());
        }
        Ok(results)
    }

    /// Final numeric result of the chain, if the field is numeric and has steps
    pub fn final_value(&self, field: &FieldConfig, raw: &str) -> Option<Value> {
        let value = self.numeric(field, raw)?;
        self.transform_chain(field, &value).ok()?.pop()
    }

    /// Final chain result formatted with the last step's format and unit
    pub fn apply_all_transformations(&self, field: &FieldConfig, raw: &str) -> Option<String> {
        self.get_transformation_steps(field, raw)
            .pop()
            .map(|step| step.value)
    }

    /// Every step's result formatted with its own format and unit.
    ///
    /// Once a step fails, it and every later step show the placeholder.
    pub fn get_transformation_steps(&self, field: &FieldConfig, raw: &str) -> Vec<StepResult> {
        let Some(mut current) = self.numeric(field, raw) else {
            return Vec::new();
        };

        let mut failed = false;
        field
            .transformations
            .iter()
            .map(|step| {
                let outcome = if failed {
                    None
                } else {
                    match self.apply_transformation(&current, step) {
                        Ok(next) => {
                            current = next;
                            Some(current.clone())
                        }
                        Err(e) => {
                            debug!("{}: step '{}' failed: {}", field.id, step.label, e);
                            failed = true;
                            None
                        }
                    }
                };
                let text = match &outcome {
                    Some(v) => render(&step.format_spec, &step.unit, v).unwrap_or_else(|e| {
                        debug!("{}: step '{}': {}", field.id, step.label, e);
                        PLACEHOLDER.to_string()
                    }),
                    None => PLACEHOLDER.to_string(),
                };
                StepResult {
                    label: step.label.clone(),
                    value: text,
                    raw_value: outcome,
                }
            })
            .collect()
    }

    fn numeric(&self, field: &FieldConfig, raw: &str) -> Option<Value> {
        if field.transformations.is_empty() {
            return None;
        }
        self.coerce(field, raw).ok().filter(Value::is_numeric)
    }
}

/// Format `value` and append the unit
fn render(format_spec: &str, unit: &str, value: &Value) -> Result<String, TransformError> {
    let text = format_template(format_spec, value)?;
    if unit.is_empty() {
        Ok(text)
    } else {
        Ok(format!("{} {}", text, unit))
    }
}

fn script_bindings(field: &FieldConfig, value: &Value, raw: &str, line: Option<&Line>) -> Bindings {
    let mut bindings = Bindings::new();
    bindings.insert("value".to_string(), value.clone());
    bindings.insert("raw_value".to_string(), Value::Str(raw.trim().to_string()));
    bindings.insert("field".to_string(), field_mapping(field));

    let mut texts = BTreeMap::new();
    let mut numbers = BTreeMap::new();
    if let Some(line) = line {
        for (i, text) in line.iter() {
            let key = Key::Int(i as i64);
            texts.insert(key.clone(), Value::Str(text.to_string()));
            numbers.insert(key, Value::parse_numeric(text));
        }
    }
    bindings.insert("line".to_string(), Value::Map(texts));
    bindings.insert("line_values".to_string(), Value::Map(numbers));
    bindings
}

fn field_mapping(field: &FieldConfig) -> Value {
    let bound = |b: Option<f64>| b.map(Value::Float).unwrap_or(Value::None);
    let entries = [
        ("id", Value::Str(field.id.clone())),
        ("port", Value::Str(field.port.clone())),
        ("index", Value::Int(field.source_index as i64)),
        ("label", Value::Str(field.label.clone())),
        ("type", Value::Str(field.value_type.to_string())),
        ("format", Value::Str(field.format_spec.clone())),
        ("unit", Value::Str(field.unit.clone())),
        ("color", Value::Str(field.color.clone())),
        ("min", bound(field.min)),
        ("max", bound(field.max)),
    ];
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Key::Str(k.to_string()), v))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn field(value_type: ValueType, format_spec: &str, unit: &str) -> FieldConfig {
        let mut field = FieldConfig::new("A", 1);
        field.value_type = value_type;
        field.format_spec = format_spec.to_string();
        field.unit = unit.to_string();
        field
    }

    fn step(operation: Operation, operand: impl Into<Value>, format_spec: &str) -> TransformStep {
        let mut step = TransformStep::new(operation, operand);
        step.format_spec = format_spec.to_string();
        step
    }

    #[test]
    fn test_format_with_unit() {
        let engine = TransformEngine::new();
        let volts = field(ValueType::Float, "{:.1f}", "V");
        assert_eq!(engine.format_value(&volts, "56.7", None), "56.7 V");
        assert_eq!(engine.format_value(&volts, " 3 ", None), "3.0 V");
    }

    #[test]
    fn test_coercion_failures_use_placeholder() {
        let engine = TransformEngine::new();
        let counts = field(ValueType::Int, "{}", "");
        assert_eq!(engine.format_value(&counts, "12.5", None), PLACEHOLDER);
        assert_eq!(engine.format_value(&counts, "", None), PLACEHOLDER);
        assert_eq!(engine.format_value(&counts, "1\u{0}2", None), PLACEHOLDER);
        assert_eq!(engine.format_value(&counts, " 42 ", None), "42");
    }

    #[test]
    fn test_int_overflow_reads_as_float() {
        let engine = TransformEngine::new();
        let counts = field(ValueType::Int, "{}", "");
        assert_eq!(
            engine.coerce(&counts, "99999999999999999999").unwrap(),
            Value::Float(1e20)
        );
        assert_eq!(
            engine.coerce(&counts, "-99999999999999999999").unwrap(),
            Value::Float(-1e20)
        );
        assert_eq!(
            engine.coerce(&counts, "9223372036854775807").unwrap(),
            Value::Int(i64::MAX)
        );
        assert_ne!(engine.format_value(&counts, "99999999999999999999", None), PLACEHOLDER);
        assert_eq!(engine.format_value(&counts, "99999999999999999999x", None), PLACEHOLDER);
    }

    #[test]
    fn test_format_failure_uses_placeholder() {
        let engine = TransformEngine::new();
        let text = field(ValueType::String, "{:.2f}", "");
        assert_eq!(engine.format_value(&text, "idle", None), PLACEHOLDER);
    }

    #[test]
    fn test_divide_by_zero_yields_zero() {
        let engine = TransformEngine::new();
        let div0 = step(Operation::Divide, 0i64, "{}");
        for x in [
            Value::Int(7),
            Value::Float(-2.5),
            Value::Int(0),
            Value::Str("abc".into()),
            Value::None,
        ] {
            assert_eq!(engine.apply_transformation(&x, &div0).unwrap(), Value::Int(0));
        }
        let div0f = step(Operation::Divide, 0.0, "{}");
        assert_eq!(
            engine.apply_transformation(&Value::Int(3), &div0f).unwrap(),
            Value::Int(0)
        );
    }

    #[test]
    fn test_unknown_operation_is_identity() {
        let engine = TransformEngine::new();
        let odd = step(Operation::Unknown("modulo".into()), 3i64, "{}");
        assert_eq!(
            engine.apply_transformation(&Value::Float(1.5), &odd).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(
            engine.apply_transformation(&Value::Str("on".into()), &odd).unwrap(),
            Value::Str("on".into())
        );
        let times = step(Operation::Multiply, 2i64, "{}");
        assert!(matches!(
            engine.apply_transformation(&Value::Str("on".into()), &times),
            Err(TransformError::NotNumeric("str"))
        ));
    }

    #[test]
    fn test_chain_is_sequential() {
        let engine = TransformEngine::new();
        let mut encoder = field(ValueType::Int, "{}", "counts");
        encoder
            .transformations
            .push(step(Operation::Divide, 1600i64, "{:.3f}"));
        encoder
            .transformations
            .push(step(Operation::Multiply, 360i64, "{:.1f}"));

        assert_eq!(engine.final_value(&encoder, "1600"), Some(Value::Float(360.0)));

        let steps = engine.get_transformation_steps(&encoder, "1600");
        let texts: Vec<&str> = steps.iter().map(|s| s.value.as_str()).collect();
        assert_eq!(texts, vec!["1.000", "360.0"]);
        assert_eq!(
            engine.apply_all_transformations(&encoder, "1600").as_deref(),
            Some("360.0")
        );
    }

    #[test]
    fn test_failed_step_poisons_rest_of_chain() {
        let engine = TransformEngine::new();
        let mut f = field(ValueType::Int, "{}", "");
        f.transformations.push(step(Operation::Power, -1i64, "{}"));
        f.transformations.push(step(Operation::Add, 1i64, "{}"));

        let steps = engine.get_transformation_steps(&f, "0");
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|s| s.value == PLACEHOLDER && s.raw_value.is_none()));
        assert_eq!(
            engine.apply_all_transformations(&f, "0").as_deref(),
            Some(PLACEHOLDER)
        );
    }

    #[test]
    fn test_non_numeric_fields_have_no_steps() {
        let engine = TransformEngine::new();
        let mut text = field(ValueType::String, "{}", "");
        text.transformations.push(step(Operation::Multiply, 2i64, "{}"));
        assert!(engine.get_transformation_steps(&text, "12").is_empty());
        assert_eq!(engine.apply_all_transformations(&text, "12"), None);
        assert_eq!(engine.final_value(&text, "12"), None);
    }

    #[test]
    fn test_script_conversion() {
        let engine = TransformEngine::new();
        let f = field(ValueType::Int, "{}", "").with_script("value/1000");
        assert_eq!(engine.format_value(&f, "2500", None), "2.5");
    }

    #[test]
    fn test_script_sees_line_and_field() {
        let engine = TransformEngine::new();
        let line = Line::new(
            vec!["10".into(), "4".into(), "on".into()],
            "10,4,on",
            chrono::Utc::now(),
            1,
        );
        let f = field(ValueType::Int, "{}", "")
            .with_script("line_values[0] * value if line[2] == 'on' else field['index']");
        assert_eq!(engine.format_value(&f, "4", Some(&line)), "40");
    }

    #[test]
    fn test_script_failure_falls_back_to_value() {
        let engine = TransformEngine::new();
        let broken = field(ValueType::Int, "{}", "").with_script("value / 0");
        assert_eq!(engine.format_value(&broken, "8", None), "8");

        let syntax = field(ValueType::Int, "{}", "").with_script("value +");
        assert_eq!(engine.format_value(&syntax, "8", None), "8");
    }

    #[test]
    fn test_deeply_nested_script_falls_back_to_value() {
        let engine = TransformEngine::new();
        let source = format!("{}value{}", "(".repeat(10_000), ")".repeat(10_000));
        assert!(Script::compile(&source).is_err());

        let nested = field(ValueType::Int, "{}", "").with_script(source);
        assert_eq!(engine.format_value(&nested, "8", None), "8");

        let negations = field(ValueType::Float, "{}", "")
            .with_script(format!("{}value", "-".repeat(20_000)));
        assert_eq!(engine.format_value(&negations, "1.5", None), "1.5");
    }

    #[test]
    fn test_block_script() {
        let engine = TransformEngine::new();
        let f = field(ValueType::Float, "{:.2f}", "C")
            .with_script("c = (value - 32) * 5 / 9\nresult = round(c, 1)");
        assert_eq!(engine.format_value(&f, "212", None), "100.00 C");
    }
}
