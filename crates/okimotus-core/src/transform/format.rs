//! Brace-style format templates
//!
//! Templates contain literal text and a single positional replacement field,
//! e.g. `"{:.1f}"`, `"{:>8,}"` or `"{!r}"`. The mini-language inside the field is
//! `[[fill]align][sign][#][0][width][,|_][.precision][type]`.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use super::value::{repr_float, Value};

/// Template or spec errors. Callers treat any of these as a failed format.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Lone `{` or `}`
    #[error("Single '{0}' encountered in format string")]
    UnbalancedBrace(char),

    /// Field refers to something other than the single value
    #[error("No value for replacement field '{0}'")]
    MissingArgument(String),

    /// Spec does not match the grammar
    #[error("Invalid format specifier '{0}'")]
    InvalidSpec(String),

    /// Conversion other than `!s`, `!r` or `!a`
    #[error("Unknown conversion specifier {0}")]
    UnknownConversion(String),

    /// Presentation type not valid for the value
    #[error("Unknown format code '{code}' for object of type '{type_name}'")]
    UnknownCode {
        /// Presentation type letter
        code: char,
        /// Type of the value being formatted
        type_name: &'static str,
    },

    /// Option not valid for the value, such as a sign on text
    #[error("{0}")]
    NotAllowed(String),
}

const SPEC_PATTERN: &str = r"(?s)^(?:(?P<fill>.)?(?P<align>[<>=^]))?(?P<sign>[+\- ])?(?P<alt>#)?(?P<zero>0)?(?P<width>\d+)?(?P<group>[,_])?(?:\.(?P<precision>\d+))?(?P<kind>[bcdeEfFgGnosxX%])?$";

fn spec_regex() -> Result<&'static Regex, FormatError> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(SPEC_PATTERN))
        .as_ref()
        .map_err(|e| FormatError::InvalidSpec(e.to_string()))
}

/// Parsed format specification
#[derive(Debug, Clone, PartialEq, Eq)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    alternate: bool,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

impl Spec {
    fn parse(spec: &str) -> Result<Self, FormatError> {
        let invalid = || FormatError::InvalidSpec(spec.to_string());
        let caps = spec_regex()?.captures(spec).ok_or_else(invalid)?;
        let first_char = |name: &str| caps.name(name).and_then(|m| m.as_str().chars().next());
        let number = |name: &str| -> Result<Option<usize>, FormatError> {
            caps.name(name)
                .map(|m| m.as_str().parse::<usize>().map_err(|_| invalid()))
                .transpose()
        };

        Ok(Self {
            fill: first_char("fill"),
            align: first_char("align"),
            sign: first_char("sign"),
            alternate: caps.name("alt").is_some(),
            zero: caps.name("zero").is_some(),
            width: number("width")?.unwrap_or(0),
            grouping: first_char("group"),
            precision: number("precision")?,
            kind: first_char("kind"),
        })
    }
}

/// Render `template` with `value` as its only positional argument
pub fn format_template(template: &str, value: &Value) -> Result<String, FormatError> {
    let mut out = String::with_capacity(template.len() + 8);
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut field = String::new();
                let mut depth = 1;
                loop {
                    match chars.next() {
                        None => return Err(FormatError::UnbalancedBrace('{')),
                        Some('{') => {
                            depth += 1;
                            field.push('{');
                        }
                        Some('}') => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                            field.push('}');
                        }
                        Some(ch) => field.push(ch),
                    }
                }
                out.push_str(&replace_field(&field, value)?);
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(FormatError::UnbalancedBrace('}')),
            other => out.push(other),
        }
    }

    Ok(out)
}

fn replace_field(field: &str, value: &Value) -> Result<String, FormatError> {
    let name_end = field.find(['!', ':']).unwrap_or(field.len());
    let name = &field[..name_end];
    if !name.is_empty() && name != "0" {
        return Err(FormatError::MissingArgument(name.to_string()));
    }

    let rest = &field[name_end..];
    let (conversion, spec) = match rest.strip_prefix('!') {
        Some(after) => match after.split_once(':') {
            Some((conv, spec)) => (Some(conv), spec),
            None => (Some(after), ""),
        },
        None => (None, rest.strip_prefix(':').unwrap_or("")),
    };

    if spec.contains('{') {
        return Err(FormatError::MissingArgument(spec.to_string()));
    }

    match conversion {
        None => format_spec(spec, value),
        Some("s") => format_spec(spec, &Value::Str(value.to_string())),
        Some("r") | Some("a") => {
            let repr = match value {
                Value::Str(s) => format!("'{}'", s),
                other => other.to_string(),
            };
            format_spec(spec, &Value::Str(repr))
        }
        Some(other) => Err(FormatError::UnknownConversion(other.to_string())),
    }
}

/// Format a single value according to a spec (the part after `:`)
pub fn format_spec(spec: &str, value: &Value) -> Result<String, FormatError> {
    if spec.is_empty() {
        return Ok(value.to_string());
    }
    let parsed = Spec::parse(spec)?;
    match value {
        Value::Str(s) => format_str(s, &parsed),
        Value::Int(i) => format_int(*i, &parsed),
        Value::Bool(b) => format_int(i64::from(*b), &parsed),
        Value::Float(f) => format_float(*f, &parsed),
        other => Err(FormatError::NotAllowed(format!(
            "unsupported format string passed to {}",
            other.type_name()
        ))),
    }
}

fn format_str(s: &str, spec: &Spec) -> Result<String, FormatError> {
    match spec.kind {
        None | Some('s') => {}
        Some(code) => {
            return Err(FormatError::UnknownCode {
                code,
                type_name: "str",
            })
        }
    }
    if spec.sign.is_some() {
        return Err(FormatError::NotAllowed(
            "Sign not allowed in string format specifier".to_string(),
        ));
    }
    if spec.alternate {
        return Err(FormatError::NotAllowed(
            "Alternate form (#) not allowed in string format specifier".to_string(),
        ));
    }
    if let Some(sep) = spec.grouping {
        return Err(FormatError::NotAllowed(format!("Cannot specify '{}' with 's'.", sep)));
    }
    if spec.align == Some('=') {
        return Err(FormatError::NotAllowed(
            "'=' alignment not allowed in string format specifier".to_string(),
        ));
    }

    let body: String = match spec.precision {
        Some(p) => s.chars().take(p).collect(),
        None => s.to_string(),
    };
    Ok(pad("", "", &body, spec, '<'))
}

fn format_int(i: i64, spec: &Spec) -> Result<String, FormatError> {
    let kind = spec.kind;
    if matches!(kind, Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%')) {
        return format_float(i as f64, spec);
    }
    if spec.precision.is_some() {
        return Err(FormatError::NotAllowed(
            "Precision not allowed in integer format specifier".to_string(),
        ));
    }

    let magnitude = i.unsigned_abs();
    let sign = sign_text(i < 0, spec.sign);

    let (prefix, body) = match kind {
        None | Some('d') | Some('n') => {
            let digits = magnitude.to_string();
            let body = match spec.grouping {
                Some(sep) => group_digits(&digits, sep, 3),
                None => digits,
            };
            ("", body)
        }
        Some(code @ ('b' | 'o' | 'x' | 'X')) => {
            if spec.grouping == Some(',') {
                return Err(FormatError::NotAllowed(format!(
                    "Cannot specify ',' with '{}'.",
                    code
                )));
            }
            let (digits, prefix) = match code {
                'b' => (format!("{:b}", magnitude), "0b"),
                'o' => (format!("{:o}", magnitude), "0o"),
                'x' => (format!("{:x}", magnitude), "0x"),
                _ => (format!("{:X}", magnitude), "0X"),
            };
            let body = match spec.grouping {
                Some(sep) => group_digits(&digits, sep, 4),
                None => digits,
            };
            (if spec.alternate { prefix } else { "" }, body)
        }
        Some('c') => {
            if spec.sign.is_some() {
                return Err(FormatError::NotAllowed(
                    "Sign not allowed with integer format specifier 'c'".to_string(),
                ));
            }
            let ch = u32::try_from(i)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| FormatError::NotAllowed("%c arg not in range".to_string()))?;
            return Ok(pad("", "", &ch.to_string(), spec, '<'));
        }
        Some(code) => {
            return Err(FormatError::UnknownCode {
                code,
                type_name: "int",
            })
        }
    };

    Ok(pad(sign, prefix, &body, spec, '>'))
}

fn format_float(x: f64, spec: &Spec) -> Result<String, FormatError> {
    let kind = spec.kind;
    if let Some(code @ ('b' | 'c' | 'd' | 'o' | 's' | 'x' | 'X')) = kind {
        return Err(FormatError::UnknownCode {
            code,
            type_name: "float",
        });
    }

    let negative = x.is_sign_negative() && !x.is_nan();
    let magnitude = x.abs();
    let upper = matches!(kind, Some('E' | 'F' | 'G'));

    let mut body = if !magnitude.is_finite() {
        let text = if magnitude.is_nan() { "nan" } else { "inf" };
        let text = if upper { text.to_uppercase() } else { text.to_string() };
        if kind == Some('%') {
            format!("{}%", text)
        } else {
            text
        }
    } else {
        match kind {
            Some('f' | 'F') => fixed(magnitude, spec.precision.unwrap_or(6), spec.alternate),
            Some('e' | 'E') => exponent(magnitude, spec.precision.unwrap_or(6), upper, spec.alternate),
            Some('%') => format!(
                "{}%",
                fixed(magnitude * 100.0, spec.precision.unwrap_or(6), spec.alternate)
            ),
            Some('g' | 'G' | 'n') => {
                general(magnitude, spec.precision.unwrap_or(6), upper, spec.alternate)
            }
            _ => match spec.precision {
                Some(p) => {
                    let text = general(magnitude, p, false, spec.alternate);
                    if text.contains(['.', 'e']) {
                        text
                    } else {
                        format!("{}.0", text)
                    }
                }
                None => repr_float(magnitude),
            },
        }
    };

    if let Some(sep) = spec.grouping {
        let split = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
        if split > 0 {
            body = format!("{}{}", group_digits(&body[..split], sep, 3), &body[split..]);
        }
    }

    Ok(pad(sign_text(negative, spec.sign), "", &body, spec, '>'))
}

fn fixed(x: f64, precision: usize, alternate: bool) -> String {
    let text = format!("{:.*}", precision, x);
    if alternate && precision == 0 {
        format!("{}.", text)
    } else {
        text
    }
}

/// `d.dddde+XX` with at least two exponent digits
fn exponent(x: f64, precision: usize, upper: bool, alternate: bool) -> String {
    let text = format!("{:.*e}", precision, x);
    let (mantissa, exp) = text.split_once('e').unwrap_or((&text, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let mantissa = if alternate && precision == 0 {
        format!("{}.", mantissa)
    } else {
        mantissa.to_string()
    };
    compose_exponent(&mantissa, exp, upper)
}

fn compose_exponent(mantissa: &str, exp: i32, upper: bool) -> String {
    let e = if upper { 'E' } else { 'e' };
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{}{}{}{:02}", mantissa, e, sign, exp.abs())
}

/// `g` presentation: fixed or scientific by magnitude, trailing zeros removed
fn general(x: f64, precision: usize, upper: bool, alternate: bool) -> String {
    let precision = precision.max(1);
    let sci = format!("{:.*e}", precision - 1, x);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exp: i32 = if x == 0.0 { 0 } else { exp.parse().unwrap_or(0) };

    if exp >= -4 && exp < precision as i32 {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        let text = format!("{:.*}", decimals, x);
        if alternate {
            text
        } else {
            strip_zeros(&text)
        }
    } else {
        let mantissa = if alternate {
            mantissa.to_string()
        } else {
            strip_zeros(mantissa)
        };
        compose_exponent(&mantissa, exp, upper)
    }
}

fn strip_zeros(text: &str) -> String {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text.to_string()
    }
}

fn sign_text(negative: bool, sign: Option<char>) -> &'static str {
    match (negative, sign) {
        (true, _) => "-",
        (false, Some('+')) => "+",
        (false, Some(' ')) => " ",
        _ => "",
    }
}

fn group_digits(digits: &str, sep: char, every: usize) -> String {
    let count = digits.chars().count();
    let mut out = String::with_capacity(digits.len() + count / every);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (count - i) % every == 0 {
            out.push(sep);
        }
        out.push(c);
    }
    out
}

fn pad(sign: &str, prefix: &str, body: &str, spec: &Spec, default_align: char) -> String {
    let fill = match spec.fill {
        Some(f) => f,
        None if spec.zero => '0',
        None => ' ',
    };
    let align = match spec.align {
        Some(a) => a,
        None if spec.zero && default_align == '>' => '=',
        None => default_align,
    };

    let len = sign.chars().count() + prefix.chars().count() + body.chars().count();
    if spec.width <= len {
        return format!("{}{}{}", sign, prefix, body);
    }
    let padding = spec.width - len;
    let fill_run = |n: usize| fill.to_string().repeat(n);

    match align {
        '<' => format!("{}{}{}{}", sign, prefix, body, fill_run(padding)),
        '^' => {
            let left = padding / 2;
            format!(
                "{}{}{}{}{}",
                fill_run(left),
                sign,
                prefix,
                body,
                fill_run(padding - left)
            )
        }
        '=' => format!("{}{}{}{}", sign, prefix, fill_run(padding), body),
        _ => format!("{}{}{}{}", fill_run(padding), sign, prefix, body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fmt(template: &str, value: impl Into<Value>) -> String {
        format_template(template, &value.into()).unwrap()
    }

    #[test]
    fn test_plain_field() {
        assert_eq!(fmt("{}", 42i64), "42");
        assert_eq!(fmt("{}", 2.5), "2.5");
        assert_eq!(fmt("{0}", "abc"), "abc");
        assert_eq!(fmt("{}", 360.0), "360.0");
    }

    #[test]
    fn test_fixed_precision() {
        assert_eq!(fmt("{:.1f}", 56.7), "56.7");
        assert_eq!(fmt("{:.3f}", 0i64), "0.000");
        assert_eq!(fmt("{:.2f}", -1.005), "-1.00");
        assert_eq!(fmt("{:.1f}", 1600i64), "1600.0");
    }

    #[test]
    fn test_width_align_fill() {
        assert_eq!(fmt("{:>6}", 42i64), "    42");
        assert_eq!(fmt("{:<6}|", 42i64), "42    |");
        assert_eq!(fmt("{:*^7}", "ab"), "**ab***");
        assert_eq!(fmt("{:06.2f}", -3.14159), "-03.14");
        assert_eq!(fmt("{:8}|", "x"), "x       |");
    }

    #[test]
    fn test_sign_and_grouping() {
        assert_eq!(fmt("{:+d}", 5i64), "+5");
        assert_eq!(fmt("{: d}", 5i64), " 5");
        assert_eq!(fmt("{:,}", 1234567i64), "1,234,567");
        assert_eq!(fmt("{:_}", 1234567i64), "1_234_567");
        assert_eq!(fmt("{:,.2f}", 1234567.891), "1,234,567.89");
    }

    #[test]
    fn test_radix_types() {
        assert_eq!(fmt("{:x}", 255i64), "ff");
        assert_eq!(fmt("{:#X}", 255i64), "0XFF");
        assert_eq!(fmt("{:#010b}", 5i64), "0b00000101");
        assert_eq!(fmt("{:o}", 8i64), "10");
        assert_eq!(fmt("{:c}", 65i64), "A");
    }

    #[test]
    fn test_exponent_and_general() {
        assert_eq!(fmt("{:e}", 12345.678), "1.234568e+04");
        assert_eq!(fmt("{:.2E}", 0.000123), "1.23E-04");
        assert_eq!(fmt("{:g}", 0.0001), "0.0001");
        assert_eq!(fmt("{:g}", 0.00001), "1e-05");
        assert_eq!(fmt("{:g}", 1234567.0), "1.23457e+06");
        assert_eq!(fmt("{:g}", 2.50), "2.5");
        assert_eq!(fmt("{:.3}", 2.0), "2.0");
    }

    #[test]
    fn test_percent() {
        assert_eq!(fmt("{:.1%}", 0.256), "25.6%");
        assert_eq!(fmt("{:%}", 1i64), "100.000000%");
    }

    #[test]
    fn test_literal_text_and_escapes() {
        assert_eq!(fmt("{{{}}} V", 3i64), "{3} V");
        assert_eq!(fmt("T={:.1f}C", 21.45), "T=21.4C");
    }

    #[test]
    fn test_conversions() {
        assert_eq!(fmt("{!r}", "hi"), "'hi'");
        assert_eq!(fmt("{!s:>4}", 1i64), "   1");
    }

    #[test]
    fn test_type_mismatches_fail() {
        let as_str = Value::from("abc");
        assert!(format_template("{:d}", &as_str).is_err());
        assert!(format_template("{:.2f}", &as_str).is_err());
        assert!(format_template("{:x}", &Value::Float(1.5)).is_err());
        assert!(format_template("{:+}", &as_str).is_err());
    }

    #[test]
    fn test_malformed_templates_fail() {
        let v = Value::Int(1);
        assert_eq!(
            format_template("{", &v),
            Err(FormatError::UnbalancedBrace('{'))
        );
        assert_eq!(
            format_template("}", &v),
            Err(FormatError::UnbalancedBrace('}'))
        );
        assert!(matches!(
            format_template("{1}", &v),
            Err(FormatError::MissingArgument(_))
        ));
        assert!(matches!(
            format_template("{value}", &v),
            Err(FormatError::MissingArgument(_))
        ));
        assert!(matches!(
            format_template("{:qq}", &v),
            Err(FormatError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_string_precision_truncates() {
        assert_eq!(fmt("{:.3}", "abcdef"), "abc");
    }
}
