//! Sandboxed field scripts
//!
//! A script is either a single expression whose value is the result, or a
//! block of assignments separated by newlines or `;` that leaves its answer in
//! `result` (or, failing that, in `value`).
//!
//! Only a whitelisted surface is reachable: literals, arithmetic, comparisons,
//! boolean logic, indexing, `abs`/`min`/`max`/`pow`/`round`/`sum` and the
//! `math` namespace. There are no loops, no attribute access beyond `math.*`
//! and no way to reach the host, so every script terminates.

mod eval;
mod lexer;
mod parser;

use thiserror::Error;

use super::value::Value;
pub use eval::Bindings;
use parser::{Expr, Parser, Stmt};

/// Script compile and runtime errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    /// Script does not parse or nests too deeply
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// Unbound name
    #[error("Name '{0}' is not defined")]
    UndefinedName(String),

    /// Operand of the wrong type
    #[error("Type error: {0}")]
    Type(String),

    /// Argument outside a function's domain
    #[error("Value error: {0}")]
    Value(String),

    /// Division or modulo by zero
    #[error("Division by zero: {0}")]
    ZeroDivision(String),

    /// Missing index or key
    #[error("Lookup error: {0}")]
    Lookup(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Body {
    Expression(Expr),
    Block(Vec<Stmt>),
}

/// A compiled script
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    source: String,
    body: Body,
}

impl Script {
    /// Compile `source`, trying a single expression before a statement block
    pub fn compile(source: &str) -> Result<Self, ScriptError> {
        let tokens = lexer::lex(source)?;
        let body = match Parser::new(tokens.clone()).parse_expression() {
            Ok(expr) => Body::Expression(expr),
            Err(_) => Body::Block(Parser::new(tokens).parse_block()?),
        };
        Ok(Self {
            source: source.to_string(),
            body,
        })
    }

    /// Original script text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the script is a single expression
    pub fn is_expression(&self) -> bool {
        matches!(self.body, Body::Expression(_))
    }

    /// Run against `bindings`.
    ///
    /// Blocks may assign freely; their answer is `result` if bound, else
    /// `value`, else `None`.
    pub fn run(&self, mut bindings: Bindings) -> Result<Value, ScriptError> {
        match &self.body {
            Body::Expression(expr) => eval::evaluate(expr, &bindings),
            Body::Block(statements) => {
                eval::execute(statements, &mut bindings)?;
                Ok(bindings
                    .remove("result")
                    .or_else(|| bindings.remove("value"))
                    .unwrap_or(Value::None))
            }
        }
    }
}
