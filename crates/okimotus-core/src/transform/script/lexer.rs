//! Script tokenizer

use super::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    EqEq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    /// Statement separator: a newline or `;` outside brackets
    Newline,
}

pub(crate) fn lex(input: &str) -> Result<Vec<Token>, ScriptError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    let mut depth = 0usize;

    while let Some(ch) = chars.next() {
        match ch {
            ' ' | '\t' | '\r' => continue,
            '\\' if chars.peek() == Some(&'\n') => {
                chars.next();
            }
            '\n' | ';' => {
                if depth == 0 && tokens.last() != Some(&Token::Newline) {
                    tokens.push(Token::Newline);
                }
            }
            '#' => {
                while let Some(&next_ch) = chars.peek() {
                    if next_ch == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '(' | '[' => {
                depth += 1;
                tokens.push(if ch == '(' {
                    Token::LParen
                } else {
                    Token::LBracket
                });
            }
            ')' | ']' => {
                depth = depth.saturating_sub(1);
                tokens.push(if ch == ')' {
                    Token::RParen
                } else {
                    Token::RBracket
                });
            }
            ',' => tokens.push(Token::Comma),
            '+' => tokens.push(with_assign(&mut chars, Token::Plus, Token::PlusAssign)),
            '-' => tokens.push(with_assign(&mut chars, Token::Minus, Token::MinusAssign)),
            '%' => tokens.push(Token::Percent),
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    tokens.push(Token::StarStar);
                } else {
                    tokens.push(with_assign(&mut chars, Token::Star, Token::StarAssign));
                }
            }
            '/' => {
                if chars.peek() == Some(&'/') {
                    chars.next();
                    tokens.push(Token::SlashSlash);
                } else {
                    tokens.push(with_assign(&mut chars, Token::Slash, Token::SlashAssign));
                }
            }
            '=' => tokens.push(with_assign(&mut chars, Token::Assign, Token::EqEq)),
            '!' => {
                if chars.next() == Some('=') {
                    tokens.push(Token::Ne);
                } else {
                    return Err(ScriptError::Syntax("unexpected '!'".to_string()));
                }
            }
            '<' => tokens.push(with_assign(&mut chars, Token::Lt, Token::Le)),
            '>' => tokens.push(with_assign(&mut chars, Token::Gt, Token::Ge)),
            '"' | '\'' => tokens.push(Token::Str(lex_string(&mut chars, ch)?)),
            '.' if chars.peek().is_some_and(char::is_ascii_digit) => {
                tokens.push(lex_number(&mut chars, ch)?);
            }
            '.' => tokens.push(Token::Dot),
            ch if ch.is_ascii_digit() => tokens.push(lex_number(&mut chars, ch)?),
            ch if ch.is_alphabetic() || ch == '_' => {
                let mut s = String::new();
                s.push(ch);
                while let Some(&next_ch) = chars.peek() {
                    if next_ch.is_alphanumeric() || next_ch == '_' {
                        s.push(next_ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(s));
            }
            other => {
                return Err(ScriptError::Syntax(format!(
                    "invalid character '{}'",
                    other
                )))
            }
        }
    }

    if depth > 0 {
        return Err(ScriptError::Syntax("unclosed bracket".to_string()));
    }
    Ok(tokens)
}

type Chars<'a> = std::iter::Peekable<std::str::Chars<'a>>;

/// `plain`, or `assigned` when the next char is `=`
fn with_assign(chars: &mut Chars<'_>, plain: Token, assigned: Token) -> Token {
    if chars.peek() == Some(&'=') {
        chars.next();
        assigned
    } else {
        plain
    }
}

fn lex_string(chars: &mut Chars<'_>, quote: char) -> Result<String, ScriptError> {
    let mut s = String::new();
    while let Some(ch) = chars.next() {
        match ch {
            c if c == quote => return Ok(s),
            '\n' => break,
            '\\' => match chars.next() {
                Some('n') => s.push('\n'),
                Some('t') => s.push('\t'),
                Some('r') => s.push('\r'),
                Some('0') => s.push('\0'),
                Some(other) => s.push(other),
                None => break,
            },
            c => s.push(c),
        }
    }
    Err(ScriptError::Syntax("unterminated string literal".to_string()))
}

fn lex_number(chars: &mut Chars<'_>, first: char) -> Result<Token, ScriptError> {
    let mut s = String::new();
    s.push(first);
    let mut is_float = first == '.';

    while let Some(&ch) = chars.peek() {
        if ch.is_ascii_digit() || ch == '_' {
            s.push(ch);
            chars.next();
        } else if ch == '.' && !is_float {
            is_float = true;
            s.push(ch);
            chars.next();
        } else if ch == 'e' || ch == 'E' {
            is_float = true;
            s.push(ch);
            chars.next();
            if let Some(&sign) = chars.peek() {
                if sign == '+' || sign == '-' {
                    s.push(sign);
                    chars.next();
                }
            }
        } else {
            break;
        }
    }

    let invalid = || ScriptError::Syntax(format!("invalid number literal '{}'", s));
    if s.ends_with('_') || s.contains("__") {
        return Err(invalid());
    }
    let digits = s.replace('_', "");
    if is_float {
        digits.parse::<f64>().map(Token::Float).map_err(|_| invalid())
    } else {
        match digits.parse::<i64>() {
            Ok(i) => Ok(Token::Int(i)),
            Err(_) => digits.parse::<f64>().map(Token::Float).map_err(|_| invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_operators() {
        assert_eq!(
            lex("a ** 2 // 3 != b").unwrap(),
            vec![
                Token::Ident("a".into()),
                Token::StarStar,
                Token::Int(2),
                Token::SlashSlash,
                Token::Int(3),
                Token::Ne,
                Token::Ident("b".into()),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            lex("1 2.5 .5 1e3 1_000").unwrap(),
            vec![
                Token::Int(1),
                Token::Float(2.5),
                Token::Float(0.5),
                Token::Float(1000.0),
                Token::Int(1000),
            ]
        );
    }

    #[test]
    fn test_statement_separators() {
        assert_eq!(
            lex("x = 1; y += 2\n\n").unwrap(),
            vec![
                Token::Ident("x".into()),
                Token::Assign,
                Token::Int(1),
                Token::Newline,
                Token::Ident("y".into()),
                Token::PlusAssign,
                Token::Int(2),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn test_newlines_inside_brackets_are_ignored() {
        let tokens = lex("max(1,\n 2)").unwrap();
        assert!(!tokens.contains(&Token::Newline));
    }

    #[test]
    fn test_strings_and_comments() {
        assert_eq!(
            lex("'a\\'b' # note").unwrap(),
            vec![Token::Str("a'b".into())]
        );
        assert!(lex("'open").is_err());
        assert!(lex("a $ b").is_err());
    }
}
