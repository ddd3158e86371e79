//! Recursive descent parser producing an [`Expr`] tree
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := ('+' | '-') unary | primary
//! primary := NUMBER | IDENT | STRING | '(' expr ')' | '$' IDENT '(' args ')'
//! ```

use super::ExprError;
use super::lexer::{Lexer, Token, TokenKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    #[must_use]
    pub fn symbol(self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
        }
    }
}

/// Parsed expression
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f64),
    /// Bare identifier, evaluates to its own text
    Ident(String),
    /// Quoted text
    Str(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `$name(args...)`
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

/// Deepest nesting of operators, parentheses and calls a parse accepts
pub const MAX_DEPTH: usize = 128;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    /// Parse a complete expression, trailing tokens are an error
    pub fn parse(input: &str) -> Result<Expr, ExprError> {
        let tokens = Lexer::new(input).tokenize()?;
        let mut parser = Self {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.expr()?;
        parser.expect(TokenKind::Eof)?;
        Ok(expr)
    }

    fn peek(&self) -> &Token {
        // tokenize always terminates with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ExprError> {
        if self.check(kind) {
            return Ok(self.advance());
        }
        let found = self.peek();
        if found.kind == TokenKind::Eof {
            Err(ExprError::UnexpectedEof(kind.to_string()))
        } else {
            Err(ExprError::UnexpectedToken {
                expected: kind.to_string(),
                found: found.text.clone(),
            })
        }
    }

    fn check_depth(&self, extra: usize) -> Result<(), ExprError> {
        if self.depth + extra > MAX_DEPTH {
            return Err(ExprError::Parse {
                pos: self.peek().pos,
                message: format!("expression nested deeper than {MAX_DEPTH} levels"),
            });
        }
        Ok(())
    }

    /// Run `f` one nesting level down
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ExprError>,
    ) -> Result<T, ExprError> {
        self.check_depth(1)?;
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        let mut node = self.term()?;
        let mut chain = 0;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(node),
            };
            chain += 1;
            self.check_depth(chain)?;
            self.advance();
            let right = self.term()?;
            node = Expr::Binary {
                op,
                left: Box::new(node),
                right: Box::new(right),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut node = self.unary()?;
        let mut chain = 0;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => return Ok(node),
            };
            chain += 1;
            self.check_depth(chain)?;
            self.advance();
            let right = self.unary()?;
            node = Expr::Binary {
                op,
                left: Box::new(node),
                right: Box::new(right),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        let op = match self.peek().kind {
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Minus => UnaryOp::Minus,
            _ => return self.primary(),
        };
        self.advance();
        let expr = self.nested(Self::unary)?;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Number => token
                .text
                .parse::<f64>()
                .map(Expr::Number)
                .map_err(|e| ExprError::Parse {
                    pos: token.pos,
                    message: e.to_string(),
                }),
            TokenKind::Ident => Ok(Expr::Ident(token.text)),
            TokenKind::Str => Ok(Expr::Str(token.text)),
            TokenKind::OpenParen => {
                let inner = self.nested(Self::expr)?;
                self.expect(TokenKind::CloseParen)?;
                Ok(inner)
            }
            TokenKind::Dollar => self.nested(Self::call),
            TokenKind::Eof => Err(ExprError::UnexpectedEof("expression".to_string())),
            _ => Err(ExprError::UnexpectedToken {
                expected: "expression".to_string(),
                found: token.text,
            }),
        }
    }

    fn call(&mut self) -> Result<Expr, ExprError> {
        let name = self.expect(TokenKind::Ident)?.text;
        self.expect(TokenKind::OpenParen)?;
        let mut args = Vec::new();
        if !self.check(TokenKind::CloseParen) {
            loop {
                args.push(self.expr()?);
                if self.check(TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::CloseParen)?;
        Ok(Expr::Call { name, args })
    }
}
