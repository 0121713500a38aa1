//! Output Rows and Sinks
//!
//! Rendering is left to the caller. The core hands a sink a flat list of
//! label/value rows; [`HeadlessSink`] prints them as text.

use serde::Serialize;
use std::io::{self, Write};
use tracing::warn;

use crate::coordinator::{Snapshot, StopSignal};
use crate::fields::FieldRegistry;
use crate::transform::{TransformEngine, PLACEHOLDER};

/// One label/value pair ready for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRow {
    /// Row label
    pub label: String,

    /// Formatted value, including its unit
    pub value: String,

    /// Optional color hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl OutputRow {
    /// Row without a color hint
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            color: None,
        }
    }

    /// Set the color hint
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }
}

/// Destination for rendered rows.
///
/// [`run`](crate::coordinator::run) calls `start` once before polling, `update`
/// after every render and `stop` once on the way out, including on panic.
pub trait OutputSink {
    /// Called before the loop. Triggering `stop` ends the loop (user quit).
    fn start(&mut self, stop: StopSignal) {
        let _ = stop;
    }

    /// Show a new set of rows
    fn update(&mut self, rows: &[OutputRow]);

    /// Called after the loop
    fn stop(&mut self) {}
}

/// Prints every update as `label: value` lines
pub struct HeadlessSink<W: Write> {
    writer: W,
    updates: u64,
}

impl HeadlessSink<io::Stdout> {
    /// Sink writing to standard output
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> HeadlessSink<W> {
    /// Sink writing to `writer`
    pub fn new(writer: W) -> Self {
        Self { writer, updates: 0 }
    }

    /// Number of updates written
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// The underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_rows(&mut self, rows: &[OutputRow]) -> io::Result<()> {
        if rows.is_empty() {
            writeln!(self.writer, "(no data)")?;
        }
        for row in rows {
            writeln!(self.writer, "{}: {}", row.label, row.value)?;
        }
        self.writer.flush()
    }
}

impl<W: Write> OutputSink for HeadlessSink<W> {
    fn update(&mut self, rows: &[OutputRow]) {
        self.updates += 1;
        if let Err(e) = self.write_rows(rows) {
            warn!("Failed to write rows: {}", e);
        }
    }

    fn stop(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!("Failed to flush output: {}", e);
        }
    }
}

/// Rows for every enabled field of every configured port.
///
/// Each field's row is followed by one row per transformation step. A port
/// with no line yet, or a line too short for the field, shows the placeholder.
pub fn render_rows(
    registry: &FieldRegistry,
    engine: &TransformEngine,
    snapshot: &Snapshot,
) -> Vec<OutputRow> {
    let mut rows = Vec::new();
    for port in registry.get_ports() {
        let line = snapshot.get(port);
        for field in registry.get_fields_for_port(port) {
            let raw = line.and_then(|l| l.get(field.source_index));
            let value = match raw {
                Some(raw) => engine.format_value(field, raw, line),
                None => PLACEHOLDER.to_string(),
            };
            rows.push(OutputRow::new(field.label.clone(), value).with_color(field.color.clone()));

            let steps = match raw {
                Some(raw) => engine.get_transformation_steps(field, raw),
                None => Vec::new(),
            };
            if steps.is_empty() {
                for step in &field.transformations {
                    rows.push(OutputRow::new(step.label.clone(), PLACEHOLDER));
                }
            } else {
                for step in steps {
                    rows.push(OutputRow::new(step.label, step.value));
                }
            }
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Line;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn line(text: &str) -> Line {
        Line::new(
            text.split(',').map(str::to_string).collect(),
            text,
            Utc::now(),
            1,
        )
    }

    #[test]
    fn test_headless_output() {
        let mut sink = HeadlessSink::new(Vec::new());
        sink.update(&[OutputRow::new("Volts", "56.7 V"), OutputRow::new("Mode", "run")]);
        sink.update(&[]);
        assert_eq!(sink.updates(), 2);
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text, "Volts: 56.7 V\nMode: run\n(no data)\n");
    }

    #[test]
    fn test_render_rows() {
        let registry = FieldRegistry::from_value(&json!({
            "ports": {
                "A": {"values": [
                    {"index": 1, "label": "Volts", "type": "float", "format": "{:.1f}", "unit": "V"},
                    {"index": 0, "label": "Counts", "type": "int", "transformations": [
                        {"label": "Rev", "operation": "divide", "value": 4, "format": "{:.2f}"}
                    ]},
                    {"index": 5, "label": "Missing"},
                    {"index": 0, "label": "Hidden", "enabled": false}
                ]},
                "B": {"values": [{"index": 0, "label": "Idle"}]}
            }
        }))
        .unwrap();

        let mut snapshot = Snapshot::new();
        snapshot.insert("A".to_string(), line("10,56.7"));

        let rows = render_rows(&registry, &TransformEngine::new(), &snapshot);
        let pairs: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.label.as_str(), r.value.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("Volts", "56.7 V"),
                ("Counts", "10"),
                ("Rev", "2.50"),
                ("Missing", "---"),
                ("Idle", "---"),
            ]
        );
        assert_eq!(rows[0].color.as_deref(), Some("black"));
    }
}
