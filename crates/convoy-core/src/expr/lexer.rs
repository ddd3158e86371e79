//! Tokenizer for the expression language
//!
//! Words are runs of letters, digits, `_`, `.` and `:`. A word that starts
//! with a digit and parses as a float is a number, everything else is an
//! identifier, so `v1.2`, `a.b` and `host:8080` are single tokens.

use super::ExprError;

/// A token produced by the lexer
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw text, quotes already stripped for strings
    pub text: String,
    /// Character offset into the input
    pub pos: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Number,
    Ident,
    Str,
    Dollar,
    OpenParen,
    CloseParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number => write!(f, "number"),
            Self::Ident => write!(f, "identifier"),
            Self::Str => write!(f, "string"),
            Self::Dollar => write!(f, "$"),
            Self::OpenParen => write!(f, "("),
            Self::CloseParen => write!(f, ")"),
            Self::Comma => write!(f, ","),
            Self::Plus => write!(f, "+"),
            Self::Minus => write!(f, "-"),
            Self::Star => write!(f, "*"),
            Self::Slash => write!(f, "/"),
            Self::Eof => write!(f, "end of input"),
        }
    }
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '_' | '.' | ':')
}

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

    /// Tokenize the whole input, always ending with `Eof`
    pub fn tokenize(&mut self) -> Result<Vec<Token>, ExprError> {
        let mut tokens = Vec::new();
        loop {
            while self.pos < self.input.len() && self.input[self.pos].is_whitespace() {
                self.pos += 1;
            }
            if self.pos >= self.input.len() {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    text: String::new(),
                    pos: self.pos,
                });
                return Ok(tokens);
            }
            tokens.push(self.next_token()?);
        }
    }

    fn next_token(&mut self) -> Result<Token, ExprError> {
        let start = self.pos;
        let ch = self.input[start];
        let kind = match ch {
            '$' => TokenKind::Dollar,
            '(' => TokenKind::OpenParen,
            ')' => TokenKind::CloseParen,
            ',' => TokenKind::Comma,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '\'' => return self.quoted(),
            c if is_word_char(c) => return Ok(self.word()),
            other => {
                return Err(ExprError::Parse {
                    pos: start,
                    message: format!("unexpected character '{other}'"),
                });
            }
        };
        self.pos += 1;
        Ok(Token {
            kind,
            text: ch.to_string(),
            pos: start,
        })
    }

    fn word(&mut self) -> Token {
        let start = self.pos;
        while self.pos < self.input.len() && is_word_char(self.input[self.pos]) {
            self.pos += 1;
        }
        let text: String = self.input[start..self.pos].iter().collect();
        let numeric = text.starts_with(|c: char| c.is_ascii_digit()) && text.parse::<f64>().is_ok();
        Token {
            kind: if numeric {
                TokenKind::Number
            } else {
                TokenKind::Ident
            },
            text,
            pos: start,
        }
    }

    fn quoted(&mut self) -> Result<Token, ExprError> {
        let start = self.pos;
        self.pos += 1;
        let body_start = self.pos;
        while self.pos < self.input.len() && self.input[self.pos] != '\'' {
            self.pos += 1;
        }
        if self.pos >= self.input.len() {
            return Err(ExprError::Parse {
                pos: start,
                message: "unterminated string".to_string(),
            });
        }
        let text = self.input[body_start..self.pos].iter().collect();
        self.pos += 1;
        Ok(Token {
            kind: TokenKind::Str,
            text,
            pos: start,
        })
    }
}
