// Expression Engine Parser
// Parses guard and interpolation tokens into a typed expression tree

use crate::expression::lexer::{LexError, Lexer, Token};

use std::fmt;

/// Parsed form of a guard or `${{ }}` body
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    String(String),

    /// `steps.msrv.outputs['content']`
    Reference(Reference),
    /// `contains(matrix.os, 'ubuntu')`, `always()`
    FunctionCall { name: String, args: Vec<Expr> },
    /// Access on a computed value, e.g. `fromJSON(x).key`
    Index { object: Box<Expr>, index: Box<Expr> },
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// Dotted or indexed path into a root context, e.g. `matrix.os`
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub parts: Vec<ReferencePart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReferencePart {
    /// `.name`
    Property(String),
    /// `[expr]`
    Index(Box<Expr>),
}

impl Reference {
    pub fn new(root: String) -> Self {
        Self {
            parts: vec![ReferencePart::Property(root)],
        }
    }

    fn then(mut self, part: ReferencePart) -> Self {
        self.parts.push(part);
        self
    }

    pub fn with_property(self, name: String) -> Self {
        self.then(ReferencePart::Property(name))
    }

    pub fn with_index(self, key: Expr) -> Self {
        self.then(ReferencePart::Index(Box::new(key)))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            match part {
                ReferencePart::Property(name) if i == 0 => write!(f, "{}", name)?,
                ReferencePart::Property(name) => write!(f, ".{}", name)?,
                ReferencePart::Index(expr) => match expr.as_ref() {
                    Expr::String(s) => write!(f, "['{}']", s)?,
                    Expr::Number(n) => write!(f, "[{}]", n)?,
                    _ => write!(f, "[...]")?,
                },
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    /// Whether evaluation may stop after the left operand
    pub fn short_circuits(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// Status-check functions that let a guard run after an earlier failure.
pub const STATUS_FUNCTIONS: [&str; 4] = ["success", "failure", "always", "cancelled"];

impl Expr {
    /// Whether the expression calls `success()`, `failure()`, `always()` or `cancelled()`.
    pub fn uses_status_function(&self) -> bool {
        match self {
            Expr::FunctionCall { name, args } => {
                STATUS_FUNCTIONS
                    .iter()
                    .any(|f| f.eq_ignore_ascii_case(name))
                    || args.iter().any(Expr::uses_status_function)
            }
            Expr::Index { object, index } => {
                object.uses_status_function() || index.uses_status_function()
            }
            Expr::Unary { expr, .. } => expr.uses_status_function(),
            Expr::Binary { left, right, .. } => {
                left.uses_status_function() || right.uses_status_function()
            }
            _ => false,
        }
    }
}

/// Malformed expression, with the token offset where parsing stopped
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("malformed expression at token {position}: {message}")]
pub struct ParseExprError {
    pub message: String,
    pub position: usize,
}

impl From<LexError> for ParseExprError {
    fn from(err: LexError) -> Self {
        Self {
            message: err.message,
            position: err.position,
        }
    }
}

/// Turns a token stream into an [`Expr`] tree
pub struct ExprParser {
    tokens: Vec<Token>,
    cursor: usize,
}

impl ExprParser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, cursor: 0 }
    }

    /// Tokenize and parse in one go
    pub fn parse_str(input: &str) -> Result<Expr, ParseExprError> {
        Self::new(Lexer::new(input).tokenize()?).parse()
    }

    pub fn parse(&mut self) -> Result<Expr, ParseExprError> {
        if self.at(&Token::Eof) {
            return Err(self.error("empty expression"));
        }

        let expr = self.parse_expr()?;
        match self.peek() {
            Token::Eof => Ok(expr),
            extra => Err(self.error(&format!("unexpected token: {}", extra))),
        }
    }

    /// Binding power of an infix operator token; higher binds tighter.
    fn infix(token: &Token) -> Option<(BinaryOp, u8)> {
        let entry = match token {
            Token::Or => (BinaryOp::Or, 1),
            Token::And => (BinaryOp::And, 2),
            Token::Eq => (BinaryOp::Eq, 3),
            Token::Ne => (BinaryOp::Ne, 3),
            Token::Lt => (BinaryOp::Lt, 4),
            Token::Le => (BinaryOp::Le, 4),
            Token::Gt => (BinaryOp::Gt, 4),
            Token::Ge => (BinaryOp::Ge, 4),
            _ => return None,
        };
        Some(entry)
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseExprError> {
        self.parse_binary(1)
    }

    /// Left-associative precedence climbing over `||`, `&&`, equality and
    /// ordering operators. Unary `!` and postfix access bind tighter.
    fn parse_binary(&mut self, min_power: u8) -> Result<Expr, ParseExprError> {
        let mut lhs = self.parse_prefix()?;

        while let Some((op, power)) = Self::infix(self.peek()) {
            if power < min_power {
                break;
            }
            self.bump();
            let rhs = self.parse_binary(power + 1)?;
            lhs = Expr::Binary {
                op,
                left: Box::new(lhs),
                right: Box::new(rhs),
            };
        }

        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> Result<Expr, ParseExprError> {
        if !self.eat(&Token::Not) {
            return self.parse_access();
        }
        let operand = self.parse_prefix()?;
        Ok(Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(operand),
        })
    }

    /// `.name` and `[expr]` chains. On a reference they extend the path;
    /// on anything else they become an [`Expr::Index`].
    fn parse_access(&mut self) -> Result<Expr, ParseExprError> {
        let mut target = self.parse_atom()?;

        loop {
            let (key, dotted) = if self.eat(&Token::Dot) {
                (Expr::String(self.property_name()?), true)
            } else if self.eat(&Token::LBracket) {
                let key = self.parse_expr()?;
                self.expect(&Token::RBracket, "expected ']'")?;
                (key, false)
            } else {
                return Ok(target);
            };

            target = match (target, key) {
                (Expr::Reference(path), Expr::String(name)) if dotted => {
                    Expr::Reference(path.with_property(name))
                }
                (Expr::Reference(path), key) => Expr::Reference(path.with_index(key)),
                (object, key) => Expr::Index {
                    object: Box::new(object),
                    index: Box::new(key),
                },
            };
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, ParseExprError> {
        let token = self.bump().clone();
        let atom = match token {
            Token::Null => Expr::Null,
            Token::True => Expr::Bool(true),
            Token::False => Expr::Bool(false),
            Token::Number(n) => Expr::Number(n),
            Token::String(s) => Expr::String(s),
            Token::Identifier(name) if self.at(&Token::LParen) => Expr::FunctionCall {
                args: self.call_arguments()?,
                name,
            },
            Token::Identifier(name) => Expr::Reference(Reference::new(name)),
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "expected ')'")?;
                inner
            }
            other => return Err(self.error(&format!("unexpected token: {}", other))),
        };
        Ok(atom)
    }

    fn call_arguments(&mut self) -> Result<Vec<Expr>, ParseExprError> {
        self.expect(&Token::LParen, "expected '('")?;
        let mut args = Vec::new();

        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RParen, "expected ')'")?;
        }

        Ok(args)
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.cursor).unwrap_or(&Token::Eof)
    }

    fn bump(&mut self) -> &Token {
        let at = self.cursor;
        self.cursor += 1;
        self.tokens.get(at).unwrap_or(&Token::Eof)
    }

    /// Same token kind, ignoring any payload
    fn at(&self, kind: &Token) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(kind)
    }

    fn eat(&mut self, kind: &Token) -> bool {
        let found = self.at(kind);
        if found {
            self.cursor += 1;
        }
        found
    }

    fn expect(&mut self, kind: &Token, message: &str) -> Result<(), ParseExprError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(message))
        }
    }

    fn property_name(&mut self) -> Result<String, ParseExprError> {
        match self.bump().clone() {
            Token::Identifier(name) => Ok(name),
            // `steps.x.outputs.true` is still a property name
            keyword @ (Token::True | Token::False | Token::Null) => Ok(keyword.to_string()),
            _ => Err(self.error("expected property name after '.'")),
        }
    }

    fn error(&self, message: &str) -> ParseExprError {
        ParseExprError {
            message: message.to_owned(),
            position: self.cursor,
        }
    }
}
