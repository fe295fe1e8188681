//! Recursive-descent parser for condition expressions.
//!
//! Grammar (keywords are case-insensitive):
//!
//! ```text
//! or         := and ( "OR" and )*
//! and        := primary ( "AND" primary )*
//! primary    := "(" or ")" | comparison
//! comparison := operand op operand
//!             | operand "in" operand | operand "not" "in" operand
//!             | operand "exists" | operand "not" "exists"
//! operand    := path | literal | list
//! ```

use serde_json::Value;

use crate::condition::ast::{CompareOp, CompiledCondition, Expr, FieldPath, Operand};
use crate::condition::lexer::{Token, tokenize};
use crate::config::PolicyLimits;
use crate::error::{PolicyResult, PolicyValidationError};

/// Parse and compile a single condition string.
pub fn compile_condition(source: &str, limits: &PolicyLimits) -> PolicyResult<CompiledCondition> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(PolicyValidationError::syntax(source, "condition is empty"));
    }

    let tokens = tokenize(trimmed)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        source: trimmed,
        limits,
    };
    let expr = parser.parse_or(1)?;

    if let Some(token) = parser.peek() {
        let message = match token {
            Token::RParen => "unexpected ')' without matching '('".to_string(),
            other => format!("unexpected token '{}'", other.describe()),
        };
        return Err(PolicyValidationError::syntax(trimmed, message));
    }

    Ok(CompiledCondition::new(trimmed.to_string(), expr))
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    source: &'a str,
    limits: &'a PolicyLimits,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> PolicyValidationError {
        PolicyValidationError::syntax(self.source, message)
    }

    fn check_depth(&self, depth: usize) -> PolicyResult<()> {
        if depth > self.limits.max_nesting_depth {
            return Err(PolicyValidationError::NestingTooDeep {
                condition: self.source.to_string(),
                max: self.limits.max_nesting_depth,
            });
        }
        Ok(())
    }

    fn parse_or(&mut self, depth: usize) -> PolicyResult<Expr> {
        self.check_depth(depth)?;
        let mut items = vec![self.parse_and(depth)?];
        while self.eat_keyword("or") {
            items.push(self.parse_and(depth)?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::Or(items)
        })
    }

    fn parse_and(&mut self, depth: usize) -> PolicyResult<Expr> {
        let mut items = vec![self.parse_primary(depth)?];
        while self.eat_keyword("and") {
            items.push(self.parse_primary(depth)?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::And(items)
        })
    }

    fn parse_primary(&mut self, depth: usize) -> PolicyResult<Expr> {
        if matches!(self.peek(), Some(Token::LParen)) {
            self.pos += 1;
            let inner = self.parse_or(depth + 1)?;
            return match self.next() {
                Some(Token::RParen) => Ok(inner),
                _ => Err(self.error("missing closing parenthesis")),
            };
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> PolicyResult<Expr> {
        let left = self.parse_operand()?;

        let op = match self.peek() {
            Some(Token::Op(op)) => {
                self.pos += 1;
                *op
            }
            Some(t) if t.is_keyword("in") => {
                self.pos += 1;
                CompareOp::In
            }
            Some(t) if t.is_keyword("exists") => {
                self.pos += 1;
                return self.exists(left, false);
            }
            Some(t) if t.is_keyword("not") => {
                self.pos += 1;
                if self.eat_keyword("in") {
                    CompareOp::NotIn
                } else if self.eat_keyword("exists") {
                    return self.exists(left, true);
                } else {
                    return Err(self.error("expected 'in' or 'exists' after 'not'"));
                }
            }
            _ => return Err(self.missing_operator(&left)),
        };

        let right = self.parse_operand()?;
        self.validate_comparison(&left, op, &right)?;
        Ok(Expr::Compare { left, op, right })
    }

    fn missing_operator(&self, left: &Operand) -> PolicyValidationError {
        let has_operator = self.tokens.iter().any(|t| {
            matches!(t, Token::Op(_)) || t.is_keyword("in") || t.is_keyword("exists")
        });
        if has_operator {
            self.error(format!("expected an operator after '{left}'"))
        } else {
            PolicyValidationError::NoOperator {
                condition: self.source.to_string(),
            }
        }
    }

    fn exists(&self, operand: Operand, negated: bool) -> PolicyResult<Expr> {
        match operand {
            Operand::Field(field) => Ok(Expr::Exists { field, negated }),
            other => Err(self.error(format!(
                "'exists' requires a user or document field, found {other}"
            ))),
        }
    }

    fn parse_operand(&mut self) -> PolicyResult<Operand> {
        match self.next() {
            Some(Token::Word(word)) => {
                if word.starts_with("user.") || word.starts_with("document.") {
                    Ok(Operand::Field(FieldPath::parse(word)?))
                } else if is_reserved(word) {
                    Err(self.error(format!("expected a field or value, found '{word}'")))
                } else {
                    Err(self.error(format!(
                        "unknown identifier '{word}': fields must start with 'user.' or \
                         'document.' and strings must be quoted"
                    )))
                }
            }
            Some(Token::Literal(value)) => Ok(Operand::Literal(value.clone())),
            Some(Token::LBracket) => self.parse_list(),
            Some(other) => Err(self.error(format!(
                "expected a field or value, found '{}'",
                other.describe()
            ))),
            None => Err(self.error("unexpected end of condition")),
        }
    }

    fn parse_list(&mut self) -> PolicyResult<Operand> {
        let mut items: Vec<Value> = Vec::new();

        loop {
            match self.next() {
                Some(Token::RBracket) if items.is_empty() => break,
                Some(Token::Literal(value)) => items.push(value.clone()),
                Some(Token::LBracket) => {
                    return Err(PolicyValidationError::NestedList {
                        condition: self.source.to_string(),
                    });
                }
                None => {
                    return Err(PolicyValidationError::MissingClosingBracket {
                        condition: self.source.to_string(),
                    });
                }
                Some(other) => {
                    return Err(self.error(format!(
                        "list elements must be literals, found '{}'",
                        other.describe()
                    )));
                }
            }

            if items.len() > self.limits.max_list_size {
                return Err(PolicyValidationError::ListTooLarge {
                    condition: self.source.to_string(),
                    detail: format!("more than {} elements", self.limits.max_list_size),
                });
            }

            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RBracket) => break,
                Some(Token::LBracket) => {
                    return Err(PolicyValidationError::NestedList {
                        condition: self.source.to_string(),
                    });
                }
                None => {
                    return Err(PolicyValidationError::MissingClosingBracket {
                        condition: self.source.to_string(),
                    });
                }
                Some(other) => {
                    return Err(self.error(format!(
                        "expected ',' or ']' in list, found '{}'",
                        other.describe()
                    )));
                }
            }
        }

        let bytes = serialized_len(&items);
        if bytes > self.limits.max_list_bytes {
            return Err(PolicyValidationError::ListTooLarge {
                condition: self.source.to_string(),
                detail: format!(
                    "{bytes} bytes exceeds the maximum of {} bytes",
                    self.limits.max_list_bytes
                ),
            });
        }

        Ok(Operand::List(items))
    }

    fn validate_comparison(
        &self,
        left: &Operand,
        op: CompareOp,
        right: &Operand,
    ) -> PolicyResult<()> {
        if left.as_field().is_none() && right.as_field().is_none() {
            return Err(self.error("a condition must reference a user or document field"));
        }
        if matches!(left, Operand::List(_)) {
            return Err(self.error("list literals are only allowed on the right-hand side"));
        }

        match op {
            CompareOp::Eq | CompareOp::Ne => {
                if matches!(right, Operand::List(_)) {
                    return Err(self.error(format!(
                        "'{op}' cannot compare against a list literal; use 'in' for list membership"
                    )));
                }
            }
            CompareOp::In | CompareOp::NotIn => {
                if matches!(right, Operand::Literal(_)) {
                    return Err(self.error(format!(
                        "right-hand side of '{op}' must be a list literal or a field"
                    )));
                }
            }
            CompareOp::Gt | CompareOp::Lt | CompareOp::Gte | CompareOp::Lte => {
                for side in [left, right] {
                    match side {
                        Operand::List(_) => {
                            return Err(self.error(format!(
                                "'{op}' cannot compare against a list literal"
                            )));
                        }
                        Operand::Literal(value) if !value.is_number() => {
                            return Err(self.error(format!(
                                "'{op}' requires a numeric value, found {value}"
                            )));
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }
}

fn is_reserved(word: &str) -> bool {
    ["and", "or", "not", "in", "exists"]
        .iter()
        .any(|k| word.eq_ignore_ascii_case(k))
}

fn serialized_len(items: &[Value]) -> usize {
    // Byte length of the JSON rendering, counting multi-byte characters by byte.
    let inner: usize = items.iter().map(|v| v.to_string().len()).sum();
    inner + items.len().saturating_sub(1) + 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(source: &str) -> PolicyResult<CompiledCondition> {
        compile_condition(source, &PolicyLimits::default())
    }

    fn compile_err(source: &str) -> String {
        compile(source).unwrap_err().to_string()
    }

    // -------------------------------------------------------------------------
    // Accepted forms
    // -------------------------------------------------------------------------

    #[test]
    fn test_simple_equality() {
        let cond = compile("user.department == document.department").unwrap();
        match cond.expr() {
            Expr::Compare { left, op, right } => {
                assert_eq!(*op, CompareOp::Eq);
                assert_eq!(left.to_string(), "user.department");
                assert_eq!(right.to_string(), "document.department");
            }
            other => panic!("unexpected expr: {other:?}"),
        }
    }

    #[test]
    fn test_list_membership() {
        let cond = compile("document.category in ['public', 'internal']").unwrap();
        match cond.expr() {
            Expr::Compare { op, right, .. } => {
                assert_eq!(*op, CompareOp::In);
                assert_eq!(*right, Operand::List(vec![json!("public"), json!("internal")]));
            }
            other => panic!("unexpected expr: {other:?}"),
        }
    }

    #[test]
    fn test_not_in_and_exists() {
        assert!(matches!(
            compile("document.status not in ['archived']").unwrap().expr(),
            Expr::Compare { op: CompareOp::NotIn, .. }
        ));
        assert!(matches!(
            compile("document.reviewed_by exists").unwrap().expr(),
            Expr::Exists { negated: false, .. }
        ));
        assert!(matches!(
            compile("document.deleted_at not exists").unwrap().expr(),
            Expr::Exists { negated: true, .. }
        ));
    }

    #[test]
    fn test_boolean_connectives_and_precedence() {
        let cond = compile(
            "user.role == 'admin' OR user.team == document.team AND document.level <= user.clearance",
        )
        .unwrap();
        match cond.expr() {
            Expr::Or(items) => {
                assert_eq!(items.len(), 2);
                assert!(matches!(items[1], Expr::And(_)));
            }
            other => panic!("unexpected expr: {other:?}"),
        }
        assert_eq!(cond.expr().leaf_count(), 3);
    }

    #[test]
    fn test_parentheses_group() {
        let cond = compile("(user.a == document.a or user.b == document.b) and document.c exists")
            .unwrap();
        assert!(matches!(cond.expr(), Expr::And(items) if matches!(items[0], Expr::Or(_))));
    }

    #[test]
    fn test_literal_on_left_side() {
        let cond = compile("'admin' in user.roles").unwrap();
        assert!(matches!(cond.expr(), Expr::Compare { op: CompareOp::In, .. }));
    }

    #[test]
    fn test_empty_list_literal() {
        let cond = compile("document.tag in []").unwrap();
        assert!(matches!(
            cond.expr(),
            Expr::Compare { right: Operand::List(items), .. } if items.is_empty()
        ));
    }

    // -------------------------------------------------------------------------
    // Rejected forms
    // -------------------------------------------------------------------------

    #[test]
    fn test_missing_closing_bracket() {
        assert!(compile_err("document.tag in ['a', 'b'").contains("missing closing bracket"));
    }

    #[test]
    fn test_nested_list_rejected() {
        assert!(compile_err("document.tag in [['a'], 'b']").contains("nested list"));
        assert!(compile_err("document.tag in ['a' ['b']]").contains("nested list"));
    }

    #[test]
    fn test_no_operator() {
        let msg = compile_err("user.department document.department");
        assert!(msg.contains("no valid operator"));
    }

    #[test]
    fn test_unquoted_string_rejected() {
        assert!(compile_err("document.team == engineering").contains("unknown identifier"));
    }

    #[test]
    fn test_list_with_equality_rejected() {
        assert!(compile_err("document.tag == ['a']").contains("use 'in'"));
    }

    #[test]
    fn test_range_requires_number() {
        assert!(compile_err("document.level > 'high'").contains("numeric"));
    }

    #[test]
    fn test_literal_only_comparison_rejected() {
        assert!(compile_err("'a' == 'a'").contains("must reference"));
    }

    #[test]
    fn test_unbalanced_parentheses() {
        assert!(compile_err("(user.a == document.a").contains("missing closing parenthesis"));
        assert!(compile_err("user.a == document.a)").contains("unexpected ')'"));
    }

    #[test]
    fn test_list_element_limit() {
        let limits = PolicyLimits {
            max_list_size: 3,
            ..PolicyLimits::default()
        };
        assert!(compile_condition("document.x in [1, 2, 3]", &limits).is_ok());
        let err = compile_condition("document.x in [1, 2, 3, 4]", &limits).unwrap_err();
        assert!(err.to_string().contains("List literal too large"));
    }

    #[test]
    fn test_list_byte_limit_counts_utf8_bytes() {
        let limits = PolicyLimits {
            max_list_bytes: 20,
            ..PolicyLimits::default()
        };
        // Two-byte characters: 14 bytes accepted, 24 bytes rejected.
        assert!(compile_condition("document.x in ['ééééé']", &limits).is_ok());
        let err = compile_condition("document.x in ['éééééééééé']", &limits).unwrap_err();
        assert!(matches!(err, PolicyValidationError::ListTooLarge { .. }));
    }

    #[test]
    fn test_nesting_depth_limit() {
        let limits = PolicyLimits {
            max_nesting_depth: 3,
            ..PolicyLimits::default()
        };
        assert!(compile_condition("((document.a == 1))", &limits).is_ok());
        let err = compile_condition("(((document.a == 1)))", &limits).unwrap_err();
        assert!(matches!(err, PolicyValidationError::NestingTooDeep { max: 3, .. }));
    }
}
