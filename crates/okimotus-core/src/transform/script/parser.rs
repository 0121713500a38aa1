//! Script grammar
//!
//! Precedence, loosest first: `a if c else b`, `or`, `and`, `not`, comparisons,
//! `+ -`, `* / // %`, unary `- +`, `**`, then calls and indexing.

use super::lexer::Token;
use super::ScriptError;
use crate::transform::value::{ArithOp, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Name(String),
    /// `math.<member>`, the only attribute access allowed
    Math(String),
    List(Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(Box<Expr>, ArithOp, Box<Expr>),
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Stmt {
    Assign(String, Expr),
    AugAssign(String, ArithOp, Expr),
    Expr(Expr),
}

const KEYWORDS: &[&str] = &[
    "and", "or", "not", "if", "else", "elif", "True", "False", "None", "in", "is", "for",
    "while", "def", "class", "return", "import", "from", "lambda", "with", "as", "pass",
    "del", "global", "nonlocal", "yield", "try", "except", "finally", "raise", "assert",
    "break", "continue", "async", "await",
];

/// Deepest nesting of parentheses, brackets, calls and unary chains
pub(crate) const MAX_DEPTH: usize = 100;

pub(crate) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Parse the whole input as one expression
    pub fn parse_expression(&mut self) -> Result<Expr, ScriptError> {
        self.skip_newlines();
        let expr = self.parse_expr()?;
        self.skip_newlines();
        if self.pos < self.tokens.len() {
            return Err(self.unexpected());
        }
        Ok(expr)
    }

    /// Parse the whole input as a block of statements
    pub fn parse_block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        let mut statements = Vec::new();
        loop {
            self.skip_newlines();
            if self.pos >= self.tokens.len() {
                break;
            }
            statements.push(self.parse_statement()?);
            if self.pos < self.tokens.len() && !self.match_token(&Token::Newline) {
                return Err(self.unexpected());
            }
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Stmt, ScriptError> {
        if let (Some(Token::Ident(name)), Some(op)) =
            (self.tokens.get(self.pos), self.tokens.get(self.pos + 1))
        {
            let aug = match op {
                Token::Assign => Some(None),
                Token::PlusAssign => Some(Some(ArithOp::Add)),
                Token::MinusAssign => Some(Some(ArithOp::Sub)),
                Token::StarAssign => Some(Some(ArithOp::Mul)),
                Token::SlashAssign => Some(Some(ArithOp::Div)),
                _ => None,
            };
            if let Some(aug) = aug {
                let name = check_name(name)?.to_string();
                self.pos += 2;
                let value = self.parse_expr()?;
                return Ok(match aug {
                    None => Stmt::Assign(name, value),
                    Some(op) => Stmt::AugAssign(name, op, value),
                });
            }
        }
        Ok(Stmt::Expr(self.parse_expr()?))
    }

    /// Run `parse` one nesting level deeper, failing past [`MAX_DEPTH`]
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ScriptError>,
    ) -> Result<T, ScriptError> {
        self.deeper()?;
        let parsed = parse(self);
        self.depth -= 1;
        parsed
    }

    /// Count one more level of tree height
    fn deeper(&mut self) -> Result<(), ScriptError> {
        if self.depth >= MAX_DEPTH {
            return Err(ScriptError::Syntax(format!(
                "too many nested expressions (limit {})",
                MAX_DEPTH
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn parse_expr(&mut self) -> Result<Expr, ScriptError> {
        self.nested(Self::parse_conditional)
    }

    fn parse_conditional(&mut self) -> Result<Expr, ScriptError> {
        let body = self.parse_or()?;
        if self.match_keyword("if") {
            let condition = self.parse_or()?;
            if !self.match_keyword("else") {
                return Err(ScriptError::Syntax(
                    "expected 'else' in conditional expression".to_string(),
                ));
            }
            let otherwise = self.parse_expr()?;
            return Ok(Expr::Conditional {
                condition: Box::new(condition),
                then: Box::new(body),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(body)
    }

    fn parse_or(&mut self) -> Result<Expr, ScriptError> {
        let start = self.depth;
        let mut node = self.parse_and()?;
        while self.match_keyword("or") {
            self.deeper()?;
            let right = self.parse_and()?;
            node = Expr::Or(Box::new(node), Box::new(right));
        }
        self.depth = start;
        Ok(node)
    }

    fn parse_and(&mut self) -> Result<Expr, ScriptError> {
        let start = self.depth;
        let mut node = self.parse_not()?;
        while self.match_keyword("and") {
            self.deeper()?;
            let right = self.parse_not()?;
            node = Expr::And(Box::new(node), Box::new(right));
        }
        self.depth = start;
        Ok(node)
    }

    fn parse_not(&mut self) -> Result<Expr, ScriptError> {
        if self.match_keyword("not") {
            Ok(Expr::Unary(UnaryOp::Not, Box::new(self.nested(Self::parse_not)?)))
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, ScriptError> {
        let left = self.parse_additive()?;
        let mut chain = Vec::new();
        while let Some(op) = self.match_comparison_op() {
            chain.push((op, self.parse_additive()?));
        }
        if chain.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare(Box::new(left), chain))
        }
    }

    fn match_comparison_op(&mut self) -> Option<CmpOp> {
        let op = match self.tokens.get(self.pos)? {
            Token::EqEq => CmpOp::Eq,
            Token::Ne => CmpOp::Ne,
            Token::Lt => CmpOp::Lt,
            Token::Gt => CmpOp::Gt,
            Token::Le => CmpOp::Le,
            Token::Ge => CmpOp::Ge,
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn parse_additive(&mut self) -> Result<Expr, ScriptError> {
        let start = self.depth;
        let mut node = self.parse_multiplicative()?;
        loop {
            let op = match self.tokens.get(self.pos) {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => break,
            };
            self.pos += 1;
            self.deeper()?;
            let right = self.parse_multiplicative()?;
            node = Expr::Binary(Box::new(node), op, Box::new(right));
        }
        self.depth = start;
        Ok(node)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ScriptError> {
        let start = self.depth;
        let mut node = self.parse_unary()?;
        loop {
            let op = match self.tokens.get(self.pos) {
                Some(Token::Star) => ArithOp::Mul,
                Some(Token::Slash) => ArithOp::Div,
                Some(Token::SlashSlash) => ArithOp::FloorDiv,
                Some(Token::Percent) => ArithOp::Mod,
                _ => break,
            };
            self.pos += 1;
            self.deeper()?;
            let right = self.parse_unary()?;
            node = Expr::Binary(Box::new(node), op, Box::new(right));
        }
        self.depth = start;
        Ok(node)
    }

    fn parse_unary(&mut self) -> Result<Expr, ScriptError> {
        if self.match_token(&Token::Minus) {
            Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.nested(Self::parse_unary)?)))
        } else if self.match_token(&Token::Plus) {
            Ok(Expr::Unary(UnaryOp::Pos, Box::new(self.nested(Self::parse_unary)?)))
        } else {
            self.parse_power()
        }
    }

    fn parse_power(&mut self) -> Result<Expr, ScriptError> {
        let base = self.parse_postfix()?;
        if self.match_token(&Token::StarStar) {
            // Right-associative and binds tighter than a unary minus on its left
            let exponent = self.nested(Self::parse_unary)?;
            return Ok(Expr::Binary(Box::new(base), ArithOp::Pow, Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, ScriptError> {
        let start = self.depth;
        let mut node = self.parse_primary()?;
        loop {
            if self.match_token(&Token::LBracket) {
                self.deeper()?;
                let index = self.parse_expr()?;
                self.expect(&Token::RBracket, "']'")?;
                node = Expr::Index(Box::new(node), Box::new(index));
            } else if self.match_token(&Token::LParen) {
                if !matches!(node, Expr::Name(_) | Expr::Math(_)) {
                    return Err(ScriptError::Syntax(
                        "only named functions can be called".to_string(),
                    ));
                }
                self.deeper()?;
                let args = self.parse_items(&Token::RParen, "')'")?;
                node = Expr::Call(Box::new(node), args);
            } else if self.tokens.get(self.pos) == Some(&Token::Dot) {
                return Err(ScriptError::Syntax(
                    "attribute access is only allowed on 'math'".to_string(),
                ));
            } else {
                self.depth = start;
                return Ok(node);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ScriptError> {
        let token = self.advance().cloned();
        match token {
            Some(Token::Int(i)) => Ok(Expr::Literal(Value::Int(i))),
            Some(Token::Float(f)) => Ok(Expr::Literal(Value::Float(f))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::Ident(name)) => match name.as_str() {
                "True" => Ok(Expr::Literal(Value::Bool(true))),
                "False" => Ok(Expr::Literal(Value::Bool(false))),
                "None" => Ok(Expr::Literal(Value::None)),
                "math" if self.match_token(&Token::Dot) => match self.advance().cloned() {
                    Some(Token::Ident(member)) => Ok(Expr::Math(check_name(&member)?.to_string())),
                    _ => Err(ScriptError::Syntax("expected name after 'math.'".to_string())),
                },
                _ => Ok(Expr::Name(check_name(&name)?.to_string())),
            },
            Some(Token::LParen) => {
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(expr)
            }
            Some(Token::LBracket) => Ok(Expr::List(self.parse_items(&Token::RBracket, "']'")?)),
            Some(other) => Err(ScriptError::Syntax(format!("unexpected {:?}", other))),
            None => Err(ScriptError::Syntax("unexpected end of input".to_string())),
        }
    }

    /// Comma-separated expressions up to `close`, trailing comma allowed
    fn parse_items(&mut self, close: &Token, label: &str) -> Result<Vec<Expr>, ScriptError> {
        let mut items = Vec::new();
        if self.match_token(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr()?);
            if self.match_token(close) {
                break;
            }
            self.expect(&Token::Comma, &format!("',' or {}", label))?;
            if self.match_token(close) {
                break;
            }
        }
        Ok(items)
    }

    fn skip_newlines(&mut self) {
        while self.match_token(&Token::Newline) {}
    }

    fn unexpected(&self) -> ScriptError {
        match self.tokens.get(self.pos) {
            Some(token) => ScriptError::Syntax(format!("unexpected {:?}", token)),
            None => ScriptError::Syntax("unexpected end of input".to_string()),
        }
    }

    fn expect(&mut self, token: &Token, label: &str) -> Result<(), ScriptError> {
        if self.match_token(token) {
            Ok(())
        } else {
            Err(ScriptError::Syntax(format!("expected {}", label)))
        }
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    fn match_token(&mut self, token: &Token) -> bool {
        if self.tokens.get(self.pos) == Some(token) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn match_keyword(&mut self, keyword: &str) -> bool {
        if let Some(Token::Ident(name)) = self.tokens.get(self.pos) {
            if name == keyword {
                self.pos += 1;
                return true;
            }
        }
        false
    }
}

/// Reject keywords and dunder names
fn check_name(name: &str) -> Result<&str, ScriptError> {
    if KEYWORDS.contains(&name) {
        Err(ScriptError::Syntax(format!("unexpected keyword '{}'", name)))
    } else if name.starts_with("__") {
        Err(ScriptError::Syntax(format!("access to '{}' is not allowed", name)))
    } else {
        Ok(name)
    }
}
