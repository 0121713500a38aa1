//! Parsed telemetry lines

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::transform::{parse_float, parse_int};

/// One parsed row of telemetry.
///
/// Values are keyed by their 0-based position in the delimited line and are
/// always contiguous. A `Line` is never mutated after it is published; every
/// consumer gets its own copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Line {
    values: Vec<String>,
    raw: String,
    timestamp: DateTime<Utc>,
    sequence: u64,
}

impl Line {
    /// Build a line from already split values
    pub fn new(
        values: Vec<String>,
        raw: impl Into<String>,
        timestamp: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        Self {
            values,
            raw: raw.into(),
            timestamp,
            sequence,
        }
    }

    /// Value at `position`, if the line has that many columns
    pub fn get(&self, position: usize) -> Option<&str> {
        self.values.get(position).map(String::as_str)
    }

    /// Value at `position` as an integer. A blank column reads as 0.
    pub fn get_int(&self, position: usize) -> Option<i64> {
        let value = self.get(position)?;
        if value.trim().is_empty() {
            return Some(0);
        }
        parse_int(value).ok()
    }

    /// Value at `position` as a float. A blank column reads as 0.0.
    pub fn get_float(&self, position: usize) -> Option<f64> {
        let value = self.get(position)?;
        if value.trim().is_empty() {
            return Some(0.0);
        }
        parse_float(value).ok()
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the line has no columns
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All values in positional order
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Iterate `(position, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.values.iter().map(String::as_str).enumerate()
    }

    /// Copy the values into a position -> value map
    pub fn to_map(&self) -> BTreeMap<usize, String> {
        self.values.iter().cloned().enumerate().collect()
    }

    /// The text the line was parsed from, without its terminator
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// When the line was received
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Position of this line in the port's received-line count (1-based)
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}
