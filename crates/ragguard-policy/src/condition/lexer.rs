//! Tokenizer for condition expressions.

use serde_json::{Number, Value};

use crate::condition::ast::CompareOp;
use crate::error::PolicyValidationError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    /// A bare word: a field path, keyword or unknown identifier.
    Word(String),
    /// A string, number, boolean or null literal.
    Literal(Value),
    Op(CompareOp),
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Word(word) => word.clone(),
            Self::Literal(value) => value.to_string(),
            Self::Op(op) => op.as_str().to_string(),
            Self::LBracket => "[".to_string(),
            Self::RBracket => "]".to_string(),
            Self::LParen => "(".to_string(),
            Self::RParen => ")".to_string(),
            Self::Comma => ",".to_string(),
        }
    }

    pub(crate) fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Self::Word(word) if word.eq_ignore_ascii_case(keyword))
    }
}

/// Split a condition into tokens.
pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, PolicyValidationError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        match c {
            c if c.is_whitespace() => pos += 1,
            '[' => {
                tokens.push(Token::LBracket);
                pos += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                pos += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                pos += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                pos += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                pos += 1;
            }
            '\'' | '"' => {
                let (text, next) = read_string(&chars, pos, source)?;
                tokens.push(Token::Literal(Value::String(text)));
                pos = next;
            }
            '=' | '!' | '<' | '>' => {
                let start = pos;
                while pos < chars.len() && matches!(chars[pos], '=' | '!' | '<' | '>') {
                    pos += 1;
                }
                let raw: String = chars[start..pos].iter().collect();
                tokens.push(Token::Op(operator(&raw, source)?));
            }
            '-' | '0'..='9' => {
                let (number, next) = read_number(&chars, pos, source)?;
                tokens.push(Token::Literal(number));
                pos = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = pos;
                while pos < chars.len()
                    && (chars[pos].is_alphanumeric() || matches!(chars[pos], '_' | '.' | '-'))
                {
                    pos += 1;
                }
                let word: String = chars[start..pos].iter().collect();
                tokens.push(word_token(word));
            }
            other => {
                return Err(PolicyValidationError::syntax(
                    source,
                    format!("unexpected character '{other}'"),
                ));
            }
        }
    }

    Ok(tokens)
}

fn word_token(word: String) -> Token {
    match word.as_str() {
        "true" | "True" => Token::Literal(Value::Bool(true)),
        "false" | "False" => Token::Literal(Value::Bool(false)),
        "null" | "None" => Token::Literal(Value::Null),
        _ => Token::Word(word),
    }
}

fn operator(raw: &str, source: &str) -> Result<CompareOp, PolicyValidationError> {
    let op = match raw {
        "==" => CompareOp::Eq,
        "!=" => CompareOp::Ne,
        ">" => CompareOp::Gt,
        "<" => CompareOp::Lt,
        ">=" => CompareOp::Gte,
        "<=" => CompareOp::Lte,
        _ => {
            let suggestion = match raw {
                "===" | "=" => Some("=="),
                "!==" | "<>" | "=!" => Some("!="),
                "=>" => Some(">="),
                "=<" => Some("<="),
                _ => None,
            };
            return Err(PolicyValidationError::InvalidOperator {
                token: raw.to_string(),
                suggestion: suggestion.map(str::to_string),
                condition: source.to_string(),
            });
        }
    };
    Ok(op)
}

fn read_string(
    chars: &[char],
    start: usize,
    source: &str,
) -> Result<(String, usize), PolicyValidationError> {
    let quote = chars[start];
    let mut text = String::new();
    let mut pos = start + 1;

    while pos < chars.len() {
        match chars[pos] {
            '\\' => {
                let Some(&escaped) = chars.get(pos + 1) else {
                    break;
                };
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                pos += 2;
            }
            c if c == quote => return Ok((text, pos + 1)),
            c => {
                text.push(c);
                pos += 1;
            }
        }
    }

    Err(PolicyValidationError::UnclosedQuote {
        condition: source.to_string(),
    })
}

fn read_number(
    chars: &[char],
    start: usize,
    source: &str,
) -> Result<(Value, usize), PolicyValidationError> {
    let mut pos = start;
    if chars[pos] == '-' {
        pos += 1;
    }
    let digits_start = pos;
    while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
        pos += 1;
    }
    let raw: String = chars[start..pos].iter().collect();

    if pos == digits_start {
        return Err(PolicyValidationError::syntax(
            source,
            format!("invalid number '{raw}'"),
        ));
    }
    if pos < chars.len() && (chars[pos].is_alphabetic() || chars[pos] == '_') {
        return Err(PolicyValidationError::syntax(
            source,
            format!("invalid number '{raw}{}'", chars[pos]),
        ));
    }

    if let Ok(int) = raw.parse::<i64>() {
        return Ok((Value::Number(int.into()), pos));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(|n| (Value::Number(n), pos))
        .ok_or_else(|| PolicyValidationError::syntax(source, format!("invalid number '{raw}'")))
}
