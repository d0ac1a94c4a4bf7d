//! Recursive descent parser for condition expressions.
//!
//! ```text
//! expr       := or
//! or         := and ( "or" and )*
//! and        := not ( "and" not )*
//! not        := "not" not | comparison
//! comparison := primary ( cmp_op primary )*
//! primary    := literal | identifier | "(" expr ")"
//! ```

use serde_json::Value;

use super::lexer::{Lexer, Token, TokenKind};
use super::EvaluationError;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

impl CmpOp {
    fn from_token(kind: &TokenKind) -> Option<Self> {
        match kind {
            TokenKind::Eq => Some(Self::Eq),
            TokenKind::Ne => Some(Self::Ne),
            TokenKind::Ge => Some(Self::Ge),
            TokenKind::Le => Some(Self::Le),
            TokenKind::Gt => Some(Self::Gt),
            TokenKind::Lt => Some(Self::Lt),
            _ => None,
        }
    }
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Lt => "<",
        };
        f.write_str(s)
    }
}

/// Parsed condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    /// `a < b <= c` is `a < b and b <= c`, each operand evaluated once.
    Compare {
        first: Box<Expr>,
        rest: Vec<(CmpOp, Expr)>,
    },
}

impl Expr {
    /// Every variable name the expression references.
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Var(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Not(inner) => inner.collect_variables(out),
            Expr::And(items) | Expr::Or(items) => {
                items.iter().for_each(|e| e.collect_variables(out))
            }
            Expr::Compare { first, rest } => {
                first.collect_variables(out);
                rest.iter().for_each(|(_, e)| e.collect_variables(out));
            }
        }
    }
}

/// Parser over a token stream
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Parse a condition string into an expression tree.
    pub fn parse(input: &str) -> Result<Expr, EvaluationError> {
        let tokens = Lexer::new(input).tokenize()?;
        let mut parser = Self { tokens, pos: 0 };

        if parser.check(&TokenKind::Eof) {
            return Err(EvaluationError::Syntax {
                pos: 0,
                message: "Empty condition".into(),
            });
        }

        let expr = parser.parse_or()?;
        if !parser.check(&TokenKind::Eof) {
            return Err(parser.unexpected("end of input"));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, EvaluationError> {
        let mut items = vec![self.parse_and()?];
        while self.check(&TokenKind::Or) {
            self.advance();
            items.push(self.parse_and()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::Or(items)
        })
    }

    fn parse_and(&mut self) -> Result<Expr, EvaluationError> {
        let mut items = vec![self.parse_not()?];
        while self.check(&TokenKind::And) {
            self.advance();
            items.push(self.parse_not()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::And(items)
        })
    }

    fn parse_not(&mut self) -> Result<Expr, EvaluationError> {
        if self.check(&TokenKind::Not) {
            self.advance();
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, EvaluationError> {
        let first = self.parse_primary()?;
        let mut rest = Vec::new();

        while let Some(op) = CmpOp::from_token(&self.peek().kind) {
            self.advance();
            rest.push((op, self.parse_primary()?));
        }

        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare {
                first: Box::new(first),
                rest,
            })
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, EvaluationError> {
        let token = self.peek().clone();
        let expr = match &token.kind {
            TokenKind::Number(n) => Expr::Literal(number(*n)),
            TokenKind::Str => Expr::Literal(Value::String(token.text.clone())),
            TokenKind::True => Expr::Literal(Value::Bool(true)),
            TokenKind::False => Expr::Literal(Value::Bool(false)),
            TokenKind::Null => Expr::Literal(Value::Null),
            TokenKind::Unsupported if token.text == "-" => {
                // Negative numeric literal
                self.advance();
                let next = self.peek().kind.clone();
                return match next {
                    TokenKind::Number(n) => {
                        self.advance();
                        Ok(Expr::Literal(number(-n)))
                    }
                    _ => Err(EvaluationError::UnsupportedOperator {
                        operator: "-".into(),
                        pos: token.pos,
                    }),
                };
            }
            TokenKind::Identifier => {
                self.advance();
                self.reject_call_or_attribute()?;
                return Ok(Expr::Var(token.text));
            }
            TokenKind::OpenParen => {
                self.advance();
                let inner = self.parse_or()?;
                if !self.check(&TokenKind::CloseParen) {
                    return Err(self.unexpected("')'"));
                }
                self.advance();
                return Ok(inner);
            }
            TokenKind::Unsupported => {
                return Err(EvaluationError::UnsupportedOperator {
                    operator: token.text,
                    pos: token.pos,
                })
            }
            _ => return Err(self.unexpected("a value")),
        };
        self.advance();
        Ok(expr)
    }

    /// Identifiers may not be called or dereferenced.
    fn reject_call_or_attribute(&self) -> Result<(), EvaluationError> {
        let next = self.peek();
        match &next.kind {
            TokenKind::OpenParen => Err(EvaluationError::UnsupportedOperator {
                operator: "function call".into(),
                pos: next.pos,
            }),
            TokenKind::Unsupported if next.text.starts_with('.') => {
                Err(EvaluationError::UnsupportedOperator {
                    operator: "attribute access".into(),
                    pos: next.pos,
                })
            }
            _ => Ok(()),
        }
    }

    fn peek(&self) -> &Token {
        // The token stream always ends with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn unexpected(&self, expected: &str) -> EvaluationError {
        let token = self.peek();
        match token.kind {
            TokenKind::Unsupported => EvaluationError::UnsupportedOperator {
                operator: token.text.clone(),
                pos: token.pos,
            },
            TokenKind::Eof => EvaluationError::Syntax {
                pos: token.pos,
                message: format!("Unexpected end of input, expected {}", expected),
            },
            _ => EvaluationError::Syntax {
                pos: token.pos,
                message: format!("Expected {}, found '{}'", expected, token.text),
            },
        }
    }
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_precedence() {
        let expr = Parser::parse("a or b and not c").unwrap();
        assert_eq!(
            expr,
            Expr::Or(vec![
                Expr::Var("a".into()),
                Expr::And(vec![
                    Expr::Var("b".into()),
                    Expr::Not(Box::new(Expr::Var("c".into()))),
                ]),
            ])
        );
    }

    #[test]
    fn test_chained_comparison() {
        let expr = Parser::parse("0 < score <= 100").unwrap();
        match expr {
            Expr::Compare { first, rest } => {
                assert_eq!(*first, Expr::Literal(json!(0.0)));
                assert_eq!(rest.len(), 2);
                assert_eq!(rest[0].0, CmpOp::Lt);
                assert_eq!(rest[1].0, CmpOp::Le);
            }
            other => panic!("unexpected expression: {:?}", other),
        }
    }

    #[test]
    fn test_parentheses_and_negative_literal() {
        let expr = Parser::parse("(variance < -0.5 OR variance > 0.5) AND approved").unwrap();
        assert!(matches!(expr, Expr::And(_)));
        assert_eq!(expr.variables(), vec!["variance", "approved"]);
    }

    #[test]
    fn test_function_call_rejected() {
        let err = Parser::parse("__import__('os')").unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::UnsupportedOperator { ref operator, .. } if operator == "function call"
        ));
    }

    #[test]
    fn test_attribute_access_rejected() {
        let err = Parser::parse("invoice.amount > 5").unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::UnsupportedOperator { ref operator, .. } if operator == "attribute access"
        ));
    }

    #[test]
    fn test_arithmetic_rejected() {
        let err = Parser::parse("amount + fee > threshold").unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::UnsupportedOperator { ref operator, .. } if operator == "+"
        ));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(Parser::parse(""), Err(EvaluationError::Syntax { .. })));
        assert!(matches!(Parser::parse("a >"), Err(EvaluationError::Syntax { .. })));
        assert!(matches!(Parser::parse("(a"), Err(EvaluationError::Syntax { .. })));
        assert!(matches!(Parser::parse("a b"), Err(EvaluationError::Syntax { .. })));
    }
}
