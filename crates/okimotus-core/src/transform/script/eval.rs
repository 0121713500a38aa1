//! Script evaluation

use std::cmp::Ordering;
use std::collections::HashMap;

use super::parser::{CmpOp, Expr, Stmt, UnaryOp};
use super::ScriptError;
use crate::transform::value::{arith, ArithOp, Key, Value};

/// Variables visible to a running script
pub type Bindings = HashMap<String, Value>;

pub(crate) fn execute(statements: &[Stmt], env: &mut Bindings) -> Result<(), ScriptError> {
    for statement in statements {
        match statement {
            Stmt::Assign(name, expr) => {
                let value = evaluate(expr, env)?;
                env.insert(name.clone(), value);
            }
            Stmt::AugAssign(name, op, expr) => {
                let current = env
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ScriptError::UndefinedName(name.clone()))?;
                let rhs = evaluate(expr, env)?;
                let value = arith(*op, &current, &rhs).map_err(arith_error)?;
                env.insert(name.clone(), value);
            }
            Stmt::Expr(expr) => {
                evaluate(expr, env)?;
            }
        }
    }
    Ok(())
}

pub(crate) fn evaluate(expr: &Expr, env: &Bindings) -> Result<Value, ScriptError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Name(name) => env
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::UndefinedName(name.clone())),
        Expr::Math(member) => math_constant(member),
        Expr::List(items) => items
            .iter()
            .map(|item| evaluate(item, env))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Expr::Index(container, index) => {
            let container = evaluate(container, env)?;
            let index = evaluate(index, env)?;
            subscript(&container, &index)
        }
        Expr::Call(callee, args) => {
            let args = args
                .iter()
                .map(|arg| evaluate(arg, env))
                .collect::<Result<Vec<_>, _>>()?;
            match callee.as_ref() {
                Expr::Name(name) => call_builtin(name, &args),
                Expr::Math(name) => call_math(name, &args),
                _ => Err(ScriptError::Type("object is not callable".to_string())),
            }
        }
        Expr::Unary(op, inner) => {
            let v = evaluate(inner, env)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!v.is_truthy())),
                UnaryOp::Neg => match v {
                    Value::Float(f) => Ok(Value::Float(-f)),
                    Value::Int(_) | Value::Bool(_) => {
                        let i = v.as_i64().unwrap_or_default();
                        Ok(i.checked_neg()
                            .map(Value::Int)
                            .unwrap_or(Value::Float(-(i as f64))))
                    }
                    other => Err(ScriptError::Type(format!(
                        "bad operand type for unary -: '{}'",
                        other.type_name()
                    ))),
                },
                UnaryOp::Pos => match v {
                    Value::Bool(b) => Ok(Value::Int(i64::from(b))),
                    Value::Int(_) | Value::Float(_) => Ok(v),
                    other => Err(ScriptError::Type(format!(
                        "bad operand type for unary +: '{}'",
                        other.type_name()
                    ))),
                },
            }
        }
        Expr::Binary(left, op, right) => {
            let l = evaluate(left, env)?;
            let r = evaluate(right, env)?;
            arith(*op, &l, &r).map_err(arith_error)
        }
        Expr::Compare(first, chain) => {
            let mut left = evaluate(first, env)?;
            for (op, right) in chain {
                let right = evaluate(right, env)?;
                if !compare(*op, &left, &right)? {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
        Expr::And(left, right) => {
            let l = evaluate(left, env)?;
            if l.is_truthy() {
                evaluate(right, env)
            } else {
                Ok(l)
            }
        }
        Expr::Or(left, right) => {
            let l = evaluate(left, env)?;
            if l.is_truthy() {
                Ok(l)
            } else {
                evaluate(right, env)
            }
        }
        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => {
            if evaluate(condition, env)?.is_truthy() {
                evaluate(then, env)
            } else {
                evaluate(otherwise, env)
            }
        }
    }
}

fn arith_error(message: String) -> ScriptError {
    if message.contains("zero") || message.contains("modulo") || message.contains("negative power")
    {
        ScriptError::ZeroDivision(message)
    } else {
        ScriptError::Type(message)
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        _ if a.is_numeric() && b.is_numeric() => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => a.as_f64() == b.as_f64(),
        },
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| values_equal(p, q))
        }
        _ => a == b,
    }
}

fn ordering(a: &Value, b: &Value, symbol: &str) -> Result<Option<Ordering>, ScriptError> {
    match (a, b) {
        _ if a.is_numeric() && b.is_numeric() => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => Ok(Some(x.cmp(&y))),
            _ => Ok(a.as_f64().partial_cmp(&b.as_f64())),
        },
        (Value::Str(x), Value::Str(y)) => Ok(Some(x.cmp(y))),
        _ => Err(ScriptError::Type(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            symbol,
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn compare(op: CmpOp, a: &Value, b: &Value) -> Result<bool, ScriptError> {
    let test = |symbol: &str, accept: fn(Ordering) -> bool| {
        ordering(a, b, symbol).map(|o| o.is_some_and(accept))
    };
    match op {
        CmpOp::Eq => Ok(values_equal(a, b)),
        CmpOp::Ne => Ok(!values_equal(a, b)),
        CmpOp::Lt => test("<", Ordering::is_lt),
        CmpOp::Gt => test(">", Ordering::is_gt),
        CmpOp::Le => test("<=", Ordering::is_le),
        CmpOp::Ge => test(">=", Ordering::is_ge),
    }
}

fn subscript(container: &Value, index: &Value) -> Result<Value, ScriptError> {
    match container {
        Value::List(items) => {
            let i = position(index, items.len(), "list")?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = position(index, chars.len(), "string")?;
            Ok(Value::Str(chars[i].to_string()))
        }
        Value::Map(map) => {
            let key = match index {
                Value::Str(s) => Key::Str(s.clone()),
                Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Key::Int(*f as i64),
                other => match other.as_i64() {
                    Some(i) => Key::Int(i),
                    None => {
                        return Err(ScriptError::Type(format!(
                            "unhashable type: '{}'",
                            other.type_name()
                        )))
                    }
                },
            };
            map.get(&key)
                .cloned()
                .ok_or_else(|| ScriptError::Lookup(format!("key {} not found", key)))
        }
        other => Err(ScriptError::Type(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Resolve a possibly negative index into `0..len`
fn position(index: &Value, len: usize, kind: &str) -> Result<usize, ScriptError> {
    let i = match index {
        Value::Int(_) | Value::Bool(_) => index.as_i64().unwrap_or_default(),
        other => {
            return Err(ScriptError::Type(format!(
                "{} indices must be integers, not {}",
                kind,
                other.type_name()
            )))
        }
    };
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(ScriptError::Lookup(format!("{} index out of range", kind)));
    }
    Ok(resolved as usize)
}

fn expect_args(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), ScriptError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("exactly {}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(ScriptError::Type(format!(
            "{}() takes {} argument(s) ({} given)",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn call_builtin(name: &str, args: &[Value]) -> Result<Value, ScriptError> {
    match name {
        "abs" => {
            expect_args(name, args, 1, 1)?;
            match &args[0] {
                Value::Float(f) => Ok(Value::Float(f.abs())),
                v @ (Value::Int(_) | Value::Bool(_)) => {
                    let i = v.as_i64().unwrap_or_default();
                    Ok(i.checked_abs()
                        .map(Value::Int)
                        .unwrap_or(Value::Float((i as f64).abs())))
                }
                other => Err(ScriptError::Type(format!(
                    "bad operand type for abs(): '{}'",
                    other.type_name()
                ))),
            }
        }
        "min" => extreme(name, args, CmpOp::Lt),
        "max" => extreme(name, args, CmpOp::Gt),
        "pow" => {
            expect_args(name, args, 2, 2)?;
            arith(ArithOp::Pow, &args[0], &args[1]).map_err(arith_error)
        }
        "round" => {
            expect_args(name, args, 1, 2)?;
            round(&args[0], args.get(1))
        }
        "sum" => {
            expect_args(name, args, 1, 2)?;
            let items = match &args[0] {
                Value::List(items) => items,
                other => {
                    return Err(ScriptError::Type(format!(
                        "'{}' object is not iterable",
                        other.type_name()
                    )))
                }
            };
            let start = args.get(1).cloned().unwrap_or(Value::Int(0));
            items.iter().try_fold(start, |acc, item| {
                arith(ArithOp::Add, &acc, item).map_err(arith_error)
            })
        }
        _ => Err(ScriptError::UndefinedName(name.to_string())),
    }
}

/// `min`/`max` over varargs or a single list
fn extreme(name: &str, args: &[Value], op: CmpOp) -> Result<Value, ScriptError> {
    let items: &[Value] = match args {
        [Value::List(items)] => items,
        [single] => {
            return Err(ScriptError::Type(format!(
                "'{}' object is not iterable",
                single.type_name()
            )))
        }
        _ => args,
    };
    let mut iter = items.iter();
    let mut best = iter
        .next()
        .ok_or_else(|| ScriptError::Value(format!("{}() arg is an empty sequence", name)))?;
    for item in iter {
        if compare(op, item, best)? {
            best = item;
        }
    }
    Ok(best.clone())
}

fn round(value: &Value, digits: Option<&Value>) -> Result<Value, ScriptError> {
    let digits = match digits {
        None | Some(Value::None) => None,
        Some(d) => Some(d.as_i64().ok_or_else(|| {
            ScriptError::Type(format!(
                "'{}' object cannot be interpreted as an integer",
                d.type_name()
            ))
        })?),
    };

    match (value, digits) {
        (Value::Float(f), None) => float_to_int(f.round_ties_even()),
        (Value::Float(f), Some(n)) => {
            let scale = 10f64.powi(n.clamp(-308, 308) as i32);
            Ok(Value::Float((f * scale).round_ties_even() / scale))
        }
        (v @ (Value::Int(_) | Value::Bool(_)), n) => {
            let i = v.as_i64().unwrap_or_default();
            match n {
                Some(n) if n < 0 => {
                    let scale = 10f64.powi((-n).min(308) as i32);
                    float_to_int((i as f64 / scale).round_ties_even() * scale)
                }
                _ => Ok(Value::Int(i)),
            }
        }
        (other, _) => Err(ScriptError::Type(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

fn float_to_int(f: f64) -> Result<Value, ScriptError> {
    if f.is_nan() {
        Err(ScriptError::Value("cannot convert float NaN to integer".to_string()))
    } else if f.is_infinite() {
        Err(ScriptError::Value(
            "cannot convert float infinity to integer".to_string(),
        ))
    } else if f.abs() < i64::MAX as f64 {
        Ok(Value::Int(f as i64))
    } else {
        Ok(Value::Float(f))
    }
}

fn math_constant(name: &str) -> Result<Value, ScriptError> {
    let value = match name {
        "pi" => std::f64::consts::PI,
        "e" => std::f64::consts::E,
        "tau" => std::f64::consts::TAU,
        "inf" => f64::INFINITY,
        "nan" => f64::NAN,
        _ => {
            return Err(ScriptError::UndefinedName(format!("math.{}", name)));
        }
    };
    Ok(Value::Float(value))
}

fn number_arg(name: &str, v: &Value) -> Result<f64, ScriptError> {
    v.as_f64().ok_or_else(|| {
        ScriptError::Type(format!(
            "math.{}() must be a real number, not {}",
            name,
            v.type_name()
        ))
    })
}

fn call_math(name: &str, args: &[Value]) -> Result<Value, ScriptError> {
    let unary: Option<fn(f64) -> f64> = match name {
        "sqrt" => Some(f64::sqrt),
        "exp" => Some(f64::exp),
        "log10" => Some(f64::log10),
        "log2" => Some(f64::log2),
        "sin" => Some(f64::sin),
        "cos" => Some(f64::cos),
        "tan" => Some(f64::tan),
        "asin" => Some(f64::asin),
        "acos" => Some(f64::acos),
        "atan" => Some(f64::atan),
        "sinh" => Some(f64::sinh),
        "cosh" => Some(f64::cosh),
        "tanh" => Some(f64::tanh),
        "fabs" => Some(f64::abs),
        "degrees" => Some(f64::to_degrees),
        "radians" => Some(f64::to_radians),
        _ => None,
    };
    if let Some(f) = unary {
        expect_args(&format!("math.{}", name), args, 1, 1)?;
        let x = number_arg(name, &args[0])?;
        if matches!(name, "log10" | "log2") && x <= 0.0 {
            return Err(domain_error());
        }
        return checked(x.is_nan(), f(x));
    }

    let binary: Option<fn(f64, f64) -> f64> = match name {
        "atan2" => Some(f64::atan2),
        "hypot" => Some(f64::hypot),
        "pow" => Some(f64::powf),
        "copysign" => Some(f64::copysign),
        "fmod" => Some(fmod),
        _ => None,
    };
    if let Some(f) = binary {
        expect_args(&format!("math.{}", name), args, 2, 2)?;
        let x = number_arg(name, &args[0])?;
        let y = number_arg(name, &args[1])?;
        return checked(x.is_nan() || y.is_nan(), f(x, y));
    }

    match name {
        "log" => {
            expect_args("math.log", args, 1, 2)?;
            let x = number_arg(name, &args[0])?;
            if x <= 0.0 {
                return Err(domain_error());
            }
            match args.get(1) {
                Some(base) => {
                    let base = number_arg(name, base)?;
                    if base <= 0.0 || base == 1.0 {
                        return Err(domain_error());
                    }
                    checked(x.is_nan(), x.ln() / base.ln())
                }
                None => checked(x.is_nan(), x.ln()),
            }
        }
        "floor" | "ceil" | "trunc" => {
            expect_args(&format!("math.{}", name), args, 1, 1)?;
            if let Value::Int(_) | Value::Bool(_) = args[0] {
                return Ok(Value::Int(args[0].as_i64().unwrap_or_default()));
            }
            let x = number_arg(name, &args[0])?;
            float_to_int(match name {
                "floor" => x.floor(),
                "ceil" => x.ceil(),
                _ => x.trunc(),
            })
        }
        "isnan" | "isinf" | "isfinite" => {
            expect_args(&format!("math.{}", name), args, 1, 1)?;
            let x = number_arg(name, &args[0])?;
            Ok(Value::Bool(match name {
                "isnan" => x.is_nan(),
                "isinf" => x.is_infinite(),
                _ => x.is_finite(),
            }))
        }
        _ => Err(ScriptError::UndefinedName(format!("math.{}", name))),
    }
}

fn fmod(x: f64, y: f64) -> f64 {
    x % y
}

fn domain_error() -> ScriptError {
    ScriptError::Value("math domain error".to_string())
}

/// NaN out of non-NaN input means the argument was outside the domain
fn checked(input_nan: bool, result: f64) -> Result<Value, ScriptError> {
    if result.is_nan() && !input_nan {
        Err(domain_error())
    } else {
        Ok(Value::Float(result))
    }
}
