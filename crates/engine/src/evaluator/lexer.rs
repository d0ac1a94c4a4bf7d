//! Lexer: tokenizes decision rule conditions.
//!
//! Keywords are case-insensitive, so legacy conditions written with
//! `AND`/`OR`/`NOT` tokenize the same as their lowercase forms.

use super::EvaluationError;

/// A token produced by the lexer
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// The raw text of the token
    pub text: String,
    /// Character offset (0-based)
    pub pos: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, pos: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            pos,
        }
    }
}

/// Token types
#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    // Keywords
    And,
    Or,
    Not,
    True,
    False,
    Null,

    // Identifiers and literals
    Identifier,
    Number(f64),
    Str,

    // Comparison operators
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,

    // Structural
    OpenParen,
    CloseParen,

    /// Anything the language does not allow: `+`, `.`, `,`, `=`, ...
    Unsupported,

    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::And => write!(f, "and"),
            Self::Or => write!(f, "or"),
            Self::Not => write!(f, "not"),
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::Null => write!(f, "null"),
            Self::Identifier => write!(f, "identifier"),
            Self::Number(_) => write!(f, "number"),
            Self::Str => write!(f, "string literal"),
            Self::Eq => write!(f, "=="),
            Self::Ne => write!(f, "!="),
            Self::Ge => write!(f, ">="),
            Self::Le => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::Lt => write!(f, "<"),
            Self::OpenParen => write!(f, "("),
            Self::CloseParen => write!(f, ")"),
            Self::Unsupported => write!(f, "unsupported operator"),
            Self::Eof => write!(f, "end of input"),
        }
    }
}

/// Lexer for condition expressions
pub struct Lexer {
    input: Vec<char>,
    pos: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> Result<Vec<Token>, EvaluationError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();

            if self.pos >= self.input.len() {
                tokens.push(Token::new(TokenKind::Eof, "", self.pos));
                break;
            }

            tokens.push(self.next_token()?);
        }

        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token, EvaluationError> {
        let ch = self.input[self.pos];
        let start = self.pos;

        let two = |kind: TokenKind, text: &str, lexer: &mut Self| {
            lexer.pos += 2;
            Token::new(kind, text, start)
        };

        let token = match ch {
            '(' => {
                self.pos += 1;
                Token::new(TokenKind::OpenParen, "(", start)
            }
            ')' => {
                self.pos += 1;
                Token::new(TokenKind::CloseParen, ")", start)
            }
            '=' if self.peek_at(1) == Some('=') => two(TokenKind::Eq, "==", self),
            '!' if self.peek_at(1) == Some('=') => two(TokenKind::Ne, "!=", self),
            '>' if self.peek_at(1) == Some('=') => two(TokenKind::Ge, ">=", self),
            '<' if self.peek_at(1) == Some('=') => two(TokenKind::Le, "<=", self),
            '&' if self.peek_at(1) == Some('&') => two(TokenKind::And, "&&", self),
            '|' if self.peek_at(1) == Some('|') => two(TokenKind::Or, "||", self),
            '>' => {
                self.pos += 1;
                Token::new(TokenKind::Gt, ">", start)
            }
            '<' => {
                self.pos += 1;
                Token::new(TokenKind::Lt, "<", start)
            }
            '!' => {
                self.pos += 1;
                Token::new(TokenKind::Not, "!", start)
            }
            '"' | '\'' => self.read_string(ch)?,
            c if c.is_ascii_digit() => self.read_number()?,
            '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.read_number()?,
            c if c.is_alphabetic() || c == '_' => self.read_identifier_or_keyword(),
            _ => self.read_unsupported(),
        };

        Ok(token)
    }

    fn read_string(&mut self, quote: char) -> Result<Token, EvaluationError> {
        let start = self.pos;
        self.pos += 1; // opening quote

        let mut text = String::new();
        while self.pos < self.input.len() && self.input[self.pos] != quote {
            if self.input[self.pos] == '\\' && self.peek_at(1).is_some() {
                self.pos += 1;
            }
            text.push(self.input[self.pos]);
            self.pos += 1;
        }

        if self.pos >= self.input.len() {
            return Err(EvaluationError::Syntax {
                pos: start,
                message: "Unterminated string literal".into(),
            });
        }

        self.pos += 1; // closing quote
        Ok(Token::new(TokenKind::Str, text, start))
    }

    fn read_number(&mut self) -> Result<Token, EvaluationError> {
        let start = self.pos;
        let mut text = String::new();

        while self.pos < self.input.len()
            && (self.input[self.pos].is_ascii_digit() || self.input[self.pos] == '.')
        {
            text.push(self.input[self.pos]);
            self.pos += 1;
        }

        // Exponent: 1e6, 2.5E-3
        if matches!(self.peek_at(0), Some('e' | 'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some('+' | '-')));
            if self.peek_at(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                for _ in 0..=sign {
                    text.push(self.input[self.pos]);
                    self.pos += 1;
                }
                while self.pos < self.input.len() && self.input[self.pos].is_ascii_digit() {
                    text.push(self.input[self.pos]);
                    self.pos += 1;
                }
            }
        }

        let value: f64 = text.parse().map_err(|_| EvaluationError::Syntax {
            pos: start,
            message: format!("Invalid number '{}'", text),
        })?;

        Ok(Token::new(TokenKind::Number(value), text, start))
    }

    fn read_identifier_or_keyword(&mut self) -> Token {
        let start = self.pos;
        let mut text = String::new();

        while self.pos < self.input.len()
            && (self.input[self.pos].is_alphanumeric() || self.input[self.pos] == '_')
        {
            text.push(self.input[self.pos]);
            self.pos += 1;
        }

        let kind = match text.to_ascii_lowercase().as_str() {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" | "none" => TokenKind::Null,
            _ => TokenKind::Identifier,
        };

        Token::new(kind, text, start)
    }

    /// Consume a run of operator characters so `**` or `+=` is reported whole.
    /// Always consumes at least one character.
    fn read_unsupported(&mut self) -> Token {
        let start = self.pos;
        let mut text = String::from(self.input[self.pos]);
        self.pos += 1;

        while self.pos < self.input.len() {
            let c = self.input[self.pos];
            if c.is_alphanumeric() || c.is_whitespace() || matches!(c, '_' | '(' | ')' | '"' | '\'')
            {
                break;
            }
            text.push(c);
            self.pos += 1;
        }

        Token::new(TokenKind::Unsupported, text, start)
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }
}
