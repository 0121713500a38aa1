//! Field registry
//!
//! Builds [`FieldConfig`]s from a JSON document and answers lookups by port,
//! position and id.

use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, warn};

use super::error::ConfigError;
use super::types::{FieldConfig, Operation, TransformStep, ValueType};
use crate::stream::DEFAULT_BAUD_RATE;
use crate::transform::Value;

/// Global display settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorSettings {
    /// Window or dashboard title
    pub title: String,

    /// Suggested refresh interval in milliseconds
    pub refresh_rate_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            title: "MCU Monitor".to_string(),
            refresh_rate_ms: 100,
        }
    }
}

/// One configured port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortConfig {
    /// Device name
    pub name: String,

    /// Baud rate
    pub baud_rate: u32,
}

/// All configured ports and fields
#[derive(Debug, Clone, Default, Serialize)]
pub struct FieldRegistry {
    settings: MonitorSettings,
    ports: Vec<PortConfig>,
    fields: Vec<FieldConfig>,
    #[serde(skip)]
    next_id: u64,
}

/// Keys of a port object that never describe a field
const PORT_KEYS: &[&str] = &["baudrate", "baud_rate", "values"];

impl FieldRegistry {
    /// Empty registry with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let document: JsonValue = serde_json::from_str(text)?;
        Self::from_value(&document)
    }

    /// Build from an already-loaded JSON document.
    ///
    /// Fails only when the document (or its `ports` member) is not an object.
    /// Individual bad entries are logged and skipped.
    pub fn from_value(document: &JsonValue) -> Result<Self, ConfigError> {
        let root = document.as_object().ok_or_else(|| {
            ConfigError::InvalidShape("top level must be an object".to_string())
        })?;

        let mut registry = Self::new();
        registry.settings = parse_settings(root);

        let ports = match root.get("ports") {
            None | Some(JsonValue::Null) => {
                warn!("Configuration has no ports");
                return Ok(registry);
            }
            Some(JsonValue::Object(ports)) => ports,
            Some(_) => {
                return Err(ConfigError::InvalidShape(
                    "'ports' must be an object keyed by port name".to_string(),
                ))
            }
        };

        for (name, port) in ports {
            match port.as_object() {
                Some(port) => registry.add_port(name, port),
                None => warn!("Skipping port {}: configuration must be an object", name),
            }
        }

        debug!(
            "Loaded {} field(s) across {} port(s)",
            registry.fields.len(),
            registry.ports.len()
        );
        Ok(registry)
    }

    fn add_port(&mut self, name: &str, port: &Map<String, JsonValue>) {
        let baud_rate = match port.get("baudrate").or_else(|| port.get("baud_rate")) {
            None => DEFAULT_BAUD_RATE,
            Some(v) => parse_baud_rate(v).unwrap_or_else(|| {
                warn!(
                    "Invalid baud rate {} for {}, using {}",
                    v, name, DEFAULT_BAUD_RATE
                );
                DEFAULT_BAUD_RATE
            }),
        };
        self.ports.push(PortConfig {
            name: name.to_string(),
            baud_rate,
        });

        match port.get("values") {
            None => {}
            Some(JsonValue::Array(entries)) => {
                for entry in entries {
                    let index = match entry.get("index") {
                        Some(index) => index.clone(),
                        None => {
                            warn!("Skipping field on {} without an 'index'", name);
                            continue;
                        }
                    };
                    self.add_entry(name, &index, entry);
                }
            }
            Some(JsonValue::Object(entries)) => {
                for (index, entry) in entries {
                    self.add_entry(name, &JsonValue::String(index.clone()), entry);
                }
            }
            Some(other) => warn!(
                "Ignoring 'values' on {}: expected a list or an object, got {}",
                name, other
            ),
        }

        // Numeric keys directly in the port object
        for (key, entry) in port {
            if PORT_KEYS.contains(&key.as_str()) {
                continue;
            }
            if parse_index(&JsonValue::String(key.clone())).is_ok() {
                self.add_entry(name, &JsonValue::String(key.clone()), entry);
            } else {
                debug!("Ignoring unknown key '{}' on {}", key, name);
            }
        }
    }

    fn add_entry(&mut self, port: &str, index: &JsonValue, entry: &JsonValue) {
        let parsed = parse_index(index).and_then(|index| parse_field(port, index, entry));
        match parsed {
            Ok(field) => {
                self.push_field(field);
            }
            Err(e) => warn!("Skipping field on {}: {}", port, e),
        }
    }

    /// Add a field built in code, assigning it a fresh id
    pub fn push_field(&mut self, mut field: FieldConfig) -> &FieldConfig {
        if !self.ports.iter().any(|p| p.name == field.port) {
            self.ports.push(PortConfig {
                name: field.port.clone(),
                baud_rate: DEFAULT_BAUD_RATE,
            });
        }
        field.id = format!("{}#{}", field.port, self.next_id);
        self.next_id += 1;
        field.cache_script();
        let position = self.fields.len();
        self.fields.push(field);
        &self.fields[position]
    }

    /// Global settings
    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Configured ports in config order
    pub fn port_configs(&self) -> &[PortConfig] {
        &self.ports
    }

    /// Configured port names in config order
    pub fn get_ports(&self) -> Vec<&str> {
        self.ports.iter().map(|p| p.name.as_str()).collect()
    }

    /// Baud rate for `port`, if configured
    pub fn get_port_baudrate(&self, port: &str) -> Option<u32> {
        self.ports
            .iter()
            .find(|p| p.name == port)
            .map(|p| p.baud_rate)
    }

    /// Every field, enabled or not, in config order
    pub fn fields(&self) -> &[FieldConfig] {
        &self.fields
    }

    /// Enabled fields of `port` in config order
    pub fn get_fields_for_port(&self, port: &str) -> Vec<&FieldConfig> {
        self.fields
            .iter()
            .filter(|f| f.enabled && f.port == port)
            .collect()
    }

    /// Field by id, including disabled fields
    pub fn get_field_by_id(&self, id: &str) -> Option<&FieldConfig> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// First enabled field at `(port, index)`
    pub fn get_field_config(&self, port: &str, index: usize) -> Option<&FieldConfig> {
        self.fields
            .iter()
            .find(|f| f.enabled && f.port == port && f.source_index == index)
    }

    /// All enabled fields sharing `(port, index)`
    pub fn get_fields_for_index(&self, port: &str, index: usize) -> Vec<&FieldConfig> {
        self.fields
            .iter()
            .filter(|f| f.enabled && f.port == port && f.source_index == index)
            .collect()
    }

    /// Sorted, unique positions that have at least one enabled field
    pub fn get_all_positions(&self, port: &str) -> Vec<usize> {
        let mut positions: Vec<usize> = self
            .get_fields_for_port(port)
            .into_iter()
            .map(|f| f.source_index)
            .collect();
        positions.sort_unstable();
        positions.dedup();
        positions
    }

    /// Number of fields, enabled or not
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no fields are configured
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// A ready-made configuration for an encoder rig on one port
    pub fn example_config() -> JsonValue {
        json!({
            "title": "Phase Tracker",
            "refresh_rate": 100,
            "ports": {
                "/dev/ttyUSB0": {
                    "baudrate": 115200,
                    "values": [
                        {
                            "index": 0,
                            "label": "Time",
                            "type": "int",
                            "format": "{:,}",
                            "unit": "ms",
                            "color": "blue",
                            "transformations": [
                                {
                                    "label": "Seconds",
                                    "operation": "divide",
                                    "value": 1000,
                                    "format": "{:.3f}",
                                    "unit": "s"
                                }
                            ]
                        },
                        {
                            "index": 1,
                            "label": "Encoder 1",
                            "type": "int",
                            "format": "{:,}",
                            "unit": "counts",
                            "color": "green",
                            "transformations": [
                                {
                                    "label": "Rotations",
                                    "operation": "divide",
                                    "value": 1600,
                                    "format": "{:.3f}",
                                    "unit": "rev"
                                },
                                {
                                    "label": "Degrees",
                                    "operation": "multiply",
                                    "value": 360,
                                    "format": "{:.1f}",
                                    "unit": "°"
                                }
                            ]
                        },
                        {
                            "index": 2,
                            "label": "Supply",
                            "type": "float",
                            "format": "{:.2f}",
                            "unit": "V",
                            "color": "red",
                            "min": 0,
                            "max": 24
                        },
                        {
                            "index": 2,
                            "label": "Supply (mV)",
                            "type": "float",
                            "format": "{:,.0f}",
                            "unit": "mV",
                            "python": "value * 1000"
                        },
                        {
                            "index": 3,
                            "label": "State",
                            "type": "string",
                            "color": "purple"
                        }
                    ]
                }
            }
        })
    }
}

fn parse_settings(root: &Map<String, JsonValue>) -> MonitorSettings {
    let mut settings = MonitorSettings::default();
    match root.get("title") {
        None => {}
        Some(JsonValue::String(title)) => settings.title = title.clone(),
        Some(other) => settings.title = other.to_string(),
    }
    if let Some(rate) = root.get("refresh_rate") {
        match rate.as_u64().or_else(|| rate.as_f64().map(|f| f as u64)) {
            Some(ms) if ms > 0 => settings.refresh_rate_ms = ms,
            _ => warn!("Invalid refresh_rate {}, using {}ms", rate, settings.refresh_rate_ms),
        }
    }
    settings
}

fn parse_baud_rate(value: &JsonValue) -> Option<u32> {
    let parsed = match value {
        JsonValue::Number(n) => n.as_u64().and_then(|b| u32::try_from(b).ok()),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|&b| b > 0)
}

/// Non-negative integer or numeric string
fn parse_index(value: &JsonValue) -> Result<usize, ConfigError> {
    let parsed = match value {
        JsonValue::Number(n) => n.as_u64().and_then(|i| usize::try_from(i).ok()),
        JsonValue::String(s) => s.trim().parse::<usize>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        ConfigError::InvalidIndex(match value {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        })
    })
}

fn parse_field(port: &str, index: usize, entry: &JsonValue) -> Result<FieldConfig, ConfigError> {
    let mut field = FieldConfig::new(port, index);

    let object = match entry {
        JsonValue::String(label) => {
            field.label = label.clone();
            return Ok(field);
        }
        JsonValue::Object(object) => object,
        other => {
            return Err(ConfigError::InvalidEntry {
                port: port.to_string(),
                index: index.to_string(),
                message: format!("expected a label or an object, got {}", other),
            })
        }
    };

    if let Some(label) = object.get("label") {
        field.label = text(label);
    }
    if let Some(kind) = object.get("type") {
        field.value_type = ValueType::from_name(&text(kind));
    }
    if let Some(format) = object.get("format") {
        field.format_spec = text(format);
    }
    if let Some(unit) = object.get("unit") {
        field.unit = text(unit);
    }
    if let Some(color) = object.get("color") {
        field.color = text(color);
    }
    field.min = object.get("min").and_then(|v| bound(port, index, "min", v));
    field.max = object.get("max").and_then(|v| bound(port, index, "max", v));

    match object.get("transformations") {
        None | Some(JsonValue::Null) => {}
        Some(JsonValue::Array(steps)) => {
            for step in steps {
                match parse_step(step) {
                    Some(step) => field.transformations.push(step),
                    None => warn!(
                        "Skipping transformation on {}[{}]: expected an object, got {}",
                        port, index, step
                    ),
                }
            }
        }
        Some(other) => warn!(
            "Ignoring transformations on {}[{}]: expected a list, got {}",
            port, index, other
        ),
    }

    field.script = object
        .get("python")
        .or_else(|| object.get("script"))
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    field.enabled = resolve_enabled(object);
    Ok(field)
}

fn parse_step(step: &JsonValue) -> Option<TransformStep> {
    let object = step.as_object()?;
    let mut parsed = TransformStep::default();

    if let Some(operation) = object.get("operation") {
        parsed.operation = Operation::from_name(&text(operation));
    }
    if let Some(operand) = object.get("value") {
        parsed.operand = match operand {
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(1.0)),
            },
            JsonValue::String(s) => match Value::parse_numeric(s) {
                numeric @ (Value::Int(_) | Value::Float(_)) => numeric,
                _ => {
                    warn!("Non-numeric transformation value '{}', using 1", s);
                    Value::Int(1)
                }
            },
            other => {
                warn!("Non-numeric transformation value {}, using 1", other);
                Value::Int(1)
            }
        };
    }
    if let Some(label) = object.get("label") {
        parsed.label = text(label);
    }
    if let Some(format) = object.get("format") {
        parsed.format_spec = text(format);
    }
    if let Some(unit) = object.get("unit") {
        parsed.unit = text(unit);
    }
    Some(parsed)
}

/// `enabled` wins over `disabled`; keys match case-insensitively
fn resolve_enabled(object: &Map<String, JsonValue>) -> bool {
    let mut enabled = None;
    let mut disabled = None;
    for (key, value) in object {
        match key.to_lowercase().as_str() {
            "enabled" => enabled = Some(truthy(value)),
            "disabled" => disabled = Some(truthy(value)),
            _ => {}
        }
    }
    match (enabled, disabled) {
        (Some(e), _) => e,
        (None, Some(d)) => !d,
        (None, None) => true,
    }
}

fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !matches!(
            s.trim().to_lowercase().as_str(),
            "" | "false" | "0" | "no" | "off"
        ),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
    }
}

fn bound(port: &str, index: usize, name: &str, value: &JsonValue) -> Option<f64> {
    let parsed = match value {
        JsonValue::Null => return None,
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    if parsed.is_none() {
        warn!("Ignoring non-numeric {} {} on {}[{}]", name, value, port, index);
    }
    parsed
}

/// String content, or the JSON text of anything else
fn text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
