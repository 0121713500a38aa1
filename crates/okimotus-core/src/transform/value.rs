//! Dynamic values shared by coercion, transformations and scripts

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Map key for [`Value::Map`]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum Key {
    /// Integer key, used for line positions
    Int(i64),
    /// String key, used for field attributes
    Str(String),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Str(s) => write!(f, "'{}'", s),
        }
    }
}

/// A typed value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// No value
    None,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// Text
    Str(String),
    /// Ordered list
    List(Vec<Value>),
    /// Read-only mapping
    Map(BTreeMap<Key, Value>),
}

/// Arithmetic operators shared by transformation steps and scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`, always a float
    Div,
    /// `//`, rounded toward negative infinity
    FloorDiv,
    /// `%`, with the sign of the divisor
    Mod,
    /// `**`
    Pow,
}

impl ArithOp {
    fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::FloorDiv => "//",
            ArithOp::Mod => "%",
            ArithOp::Pow => "**",
        }
    }
}

impl Value {
    /// Short type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "dict",
        }
    }

    /// Whether this is an int, float or bool
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Int(_) | Value::Float(_))
    }

    /// Numeric value as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer value (bools count as 0/1)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Truthiness: zero, empty and None are false
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
        }
    }

    /// Parse as int, then float; anything else stays text
    pub fn parse_numeric(text: &str) -> Value {
        let trimmed = text.trim();
        if let Ok(i) = parse_int(trimmed) {
            Value::Int(i)
        } else if let Ok(f) = parse_float(trimmed) {
            Value::Float(f)
        } else {
            Value::Str(text.to_string())
        }
    }

    fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => f.write_str(&repr_float(*x)),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::repr).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Map(map) => {
                let parts: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.repr()))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

/// Integer parsing that accepts a sign and `_` digit separators
pub fn parse_int(text: &str) -> Result<i64, std::num::ParseIntError> {
    let text = text.trim();
    if text.contains('_') && valid_underscores(text) {
        text.replace('_', "").parse()
    } else {
        text.parse()
    }
}

/// Float parsing that also accepts `_` digit separators and `infinity`/`nan` spellings
pub fn parse_float(text: &str) -> Result<f64, std::num::ParseFloatError> {
    let text = text.trim();
    if text.contains('_') && valid_underscores(text) {
        text.replace('_', "").parse()
    } else {
        text.parse()
    }
}

/// Underscores only between digits
fn valid_underscores(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.iter().enumerate().all(|(i, &b)| {
        b != b'_'
            || (i > 0
                && i + 1 < bytes.len()
                && bytes[i - 1].is_ascii_digit()
                && bytes[i + 1].is_ascii_digit())
    })
}

/// Shortest round-trip float text: `2.0`, `56.7`, `1e+16`, `1e-05`
pub fn repr_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if x == 0.0 {
        return if x.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }

    // `{:e}` yields the shortest digits that round-trip, e.g. "5.67e1"
    let sci = format!("{:e}", x);
    let (mantissa, exponent) = match sci.split_once('e') {
        Some(parts) => parts,
        None => return sci,
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let negative = mantissa.starts_with('-');
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let sign = if negative { "-" } else { "" };

    if (-4..16).contains(&exponent) {
        let point = exponent + 1;
        let body = if point <= 0 {
            format!("0.{}{}", "0".repeat((-point) as usize), digits)
        } else if point as usize >= digits.len() {
            format!("{}{}.0", digits, "0".repeat(point as usize - digits.len()))
        } else {
            let (int_part, frac_part) = digits.split_at(point as usize);
            format!("{}.{}", int_part, frac_part)
        };
        format!("{}{}", sign, body)
    } else {
        let (first, rest) = digits.split_at(1);
        let mantissa = if rest.is_empty() {
            first.to_string()
        } else {
            format!("{}.{}", first, rest)
        };
        let exp_sign = if exponent < 0 { '-' } else { '+' };
        format!("{}{}e{}{:02}", sign, mantissa, exp_sign, exponent.abs())
    }
}

/// Apply an arithmetic operator with int-preserving semantics.
///
/// int op int stays int for `+ - * // % **` (non-negative exponent) unless it
/// overflows, in which case the result is a float. `/` always yields a float.
/// Division or modulo by zero is an error.
pub fn arith(op: ArithOp, left: &Value, right: &Value) -> Result<Value, String> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) if op == ArithOp::Add => {
            return Ok(Value::Str(format!("{}{}", a, b)));
        }
        (Value::List(a), Value::List(b)) if op == ArithOp::Add => {
            let mut joined = a.clone();
            joined.extend(b.iter().cloned());
            return Ok(Value::List(joined));
        }
        _ => {}
    }

    if !left.is_numeric() || !right.is_numeric() {
        return Err(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ));
    }

    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        if let Some(result) = int_arith(op, a, b)? {
            return Ok(result);
        }
    }

    // Both numeric, so as_f64 cannot fail
    let a = left.as_f64().unwrap_or_default();
    let b = right.as_f64().unwrap_or_default();
    float_arith(op, a, b).map(Value::Float)
}

/// Integer fast path. `Ok(None)` means "fall back to float".
fn int_arith(op: ArithOp, a: i64, b: i64) -> Result<Option<Value>, String> {
    let result = match op {
        ArithOp::Add => a.checked_add(b),
        ArithOp::Sub => a.checked_sub(b),
        ArithOp::Mul => a.checked_mul(b),
        ArithOp::Div => {
            if b == 0 {
                return Err("division by zero".to_string());
            }
            return Ok(None);
        }
        ArithOp::FloorDiv => {
            if b == 0 {
                return Err("integer division or modulo by zero".to_string());
            }
            floor_div(a, b)
        }
        ArithOp::Mod => {
            if b == 0 {
                return Err("integer division or modulo by zero".to_string());
            }
            a.checked_rem(b).map(|r| if r != 0 && (r < 0) != (b < 0) { r + b } else { r })
        }
        ArithOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err("0.0 cannot be raised to a negative power".to_string());
                }
                return Ok(None);
            }
            u32::try_from(b).ok().and_then(|e| a.checked_pow(e))
        }
    };
    Ok(result.map(Value::Int))
}

/// Quotient rounded toward negative infinity
fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

fn float_arith(op: ArithOp, a: f64, b: f64) -> Result<f64, String> {
    match op {
        ArithOp::Add => Ok(a + b),
        ArithOp::Sub => Ok(a - b),
        ArithOp::Mul => Ok(a * b),
        ArithOp::Div => {
            if b == 0.0 {
                Err("float division by zero".to_string())
            } else {
                Ok(a / b)
            }
        }
        ArithOp::FloorDiv => {
            if b == 0.0 {
                Err("float floor division by zero".to_string())
            } else {
                Ok((a / b).floor())
            }
        }
        ArithOp::Mod => {
            if b == 0.0 {
                Err("float modulo".to_string())
            } else {
                Ok(a - b * (a / b).floor())
            }
        }
        ArithOp::Pow => {
            if a == 0.0 && b < 0.0 {
                Err("0.0 cannot be raised to a negative power".to_string())
            } else {
                Ok(a.powf(b))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_repr_float() {
        assert_eq!(repr_float(2.0), "2.0");
        assert_eq!(repr_float(56.7), "56.7");
        assert_eq!(repr_float(-0.5), "-0.5");
        assert_eq!(repr_float(0.0001), "0.0001");
        assert_eq!(repr_float(0.00001), "1e-05");
        assert_eq!(repr_float(1e16), "1e+16");
        assert_eq!(repr_float(123456789.0), "123456789.0");
        assert_eq!(repr_float(1.5e300), "1.5e+300");
        assert_eq!(repr_float(f64::INFINITY), "inf");
    }

    #[test]
    fn test_int_arith_stays_int() {
        assert_eq!(
            arith(ArithOp::Mul, &Value::Int(1600), &Value::Int(2)).unwrap(),
            Value::Int(3200)
        );
        assert_eq!(
            arith(ArithOp::Pow, &Value::Int(2), &Value::Int(10)).unwrap(),
            Value::Int(1024)
        );
    }

    #[test]
    fn test_true_division_is_float() {
        assert_eq!(
            arith(ArithOp::Div, &Value::Int(2500), &Value::Int(1000)).unwrap(),
            Value::Float(2.5)
        );
        assert_eq!(
            arith(ArithOp::Div, &Value::Int(4), &Value::Int(2)).unwrap(),
            Value::Float(2.0)
        );
    }

    #[test]
    fn test_floor_div_and_mod_follow_divisor_sign() {
        assert_eq!(
            arith(ArithOp::FloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap(),
            Value::Int(-4)
        );
        assert_eq!(
            arith(ArithOp::FloorDiv, &Value::Int(7), &Value::Int(-2)).unwrap(),
            Value::Int(-4)
        );
        assert_eq!(
            arith(ArithOp::Mod, &Value::Int(-7), &Value::Int(3)).unwrap(),
            Value::Int(2)
        );
        assert_eq!(
            arith(ArithOp::Mod, &Value::Float(-7.5), &Value::Int(2)).unwrap(),
            Value::Float(0.5)
        );
    }

    #[test]
    fn test_overflow_falls_back_to_float() {
        let result = arith(ArithOp::Mul, &Value::Int(i64::MAX), &Value::Int(2)).unwrap();
        assert!(matches!(result, Value::Float(f) if f > 1e18));
    }

    #[test]
    fn test_division_by_zero_is_error() {
        assert!(arith(ArithOp::Div, &Value::Int(1), &Value::Int(0)).is_err());
        assert!(arith(ArithOp::Mod, &Value::Float(1.0), &Value::Float(0.0)).is_err());
    }

    #[test]
    fn test_type_errors() {
        let err = arith(ArithOp::Sub, &Value::from("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(err, "unsupported operand type(s) for -: 'str' and 'int'");
        assert_eq!(
            arith(ArithOp::Add, &Value::from("a"), &Value::from("b")).unwrap(),
            Value::from("ab")
        );
    }

    #[test]
    fn test_parse_numeric() {
        assert_eq!(Value::parse_numeric(" 42 "), Value::Int(42));
        assert_eq!(Value::parse_numeric("1_000"), Value::Int(1000));
        assert_eq!(Value::parse_numeric("56.7"), Value::Float(56.7));
        assert_eq!(Value::parse_numeric("active"), Value::from("active"));
        assert!(parse_int("1__0").is_err());
    }
}
