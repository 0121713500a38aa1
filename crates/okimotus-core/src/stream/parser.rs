//! Delimited line parsing

use std::collections::BTreeMap;

use super::{Line, ParseError, DEFAULT_DELIMITER};

/// Splits a text line into positional values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineParser {
    delimiter: char,
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new(DEFAULT_DELIMITER)
    }
}

impl LineParser {
    /// Create a parser for `delimiter`
    pub fn new(delimiter: char) -> Self {
        Self { delimiter }
    }

    /// The configured delimiter
    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Split `line` into trimmed values.
    ///
    /// A line that is blank after trimming is a [`ParseError::EmptyLine`].
    /// There is no quoting: every delimiter starts a new column.
    pub fn parse(&self, line: &str) -> Result<Vec<String>, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseError::EmptyLine);
        }
        Ok(line
            .split(self.delimiter)
            .map(|value| value.trim().to_string())
            .collect())
    }
}

/// Last value seen at each column position.
///
/// Owned by whoever needs it; feed it lines (for example from a data callback)
/// to keep values from columns that shorter lines omit.
#[derive(Debug, Clone, Default)]
pub struct LastValues {
    values: BTreeMap<usize, String>,
}

impl LastValues {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge every column of `line`
    pub fn update(&mut self, line: &Line) {
        for (position, value) in line.iter() {
            self.values.insert(position, value.to_string());
        }
    }

    /// Last value at `position`
    pub fn get(&self, position: usize) -> Option<&str> {
        self.values.get(&position).map(String::as_str)
    }

    /// Copy of all cached values
    pub fn snapshot(&self) -> BTreeMap<usize, String> {
        self.values.clone()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_trims_values() {
        let parser = LineParser::default();
        assert_eq!(
            parser.parse(" 1234 , 56.7,active \r").unwrap(),
            vec!["1234", "56.7", "active"]
        );
    }

    #[test]
    fn test_parse_keeps_empty_columns() {
        let parser = LineParser::default();
        assert_eq!(parser.parse("1,,3,").unwrap(), vec!["1", "", "3", ""]);
    }

    #[test]
    fn test_blank_line_is_error() {
        let parser = LineParser::default();
        assert_eq!(parser.parse("   "), Err(ParseError::EmptyLine));
        assert_eq!(parser.parse(""), Err(ParseError::EmptyLine));
    }

    #[test]
    fn test_custom_delimiter() {
        let parser = LineParser::new(';');
        assert_eq!(parser.parse("a;b,c").unwrap(), vec!["a", "b,c"]);
    }

    #[test]
    fn test_last_values_keep_missing_columns() {
        let parser = LineParser::default();
        let mut cache = LastValues::new();

        let first = Line::new(parser.parse("1,2,3").unwrap(), "1,2,3", Utc::now(), 1);
        let second = Line::new(parser.parse("9").unwrap(), "9", Utc::now(), 2);
        cache.update(&first);
        cache.update(&second);

        assert_eq!(cache.get(0), Some("9"));
        assert_eq!(cache.get(2), Some("3"));
        assert_eq!(cache.snapshot().len(), 3);
    }
}
