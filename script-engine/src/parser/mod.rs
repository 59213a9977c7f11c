//! Recursive-descent parsers for both dialects.
//!
//! The expression grammar is shared (pine spells the logical operators
//! `and`/`or`/`not`, the host dialect `&&`/`||`/`!`; both are accepted
//! everywhere). Statement syntax lives in [`pine`] and [`host`].

pub mod host;
pub mod pine;

use crate::ast::{Arg, BinaryOp, Expr, Script, UnaryOp};
use crate::error::SyntaxError;
use crate::language::{version_directive, Dialect, SourceSpan, SyntaxErrorKind};
use crate::lexer::{tokenize, Spanned, Token};

/// Parse `source` in the given dialect.
pub fn parse(source: &str, dialect: Dialect) -> Result<Script, SyntaxError> {
    let tokens = tokenize(source, dialect)?;
    let mut cursor = Cursor::new(tokens, dialect);
    let body = match dialect {
        Dialect::Pine => pine::parse_program(&mut cursor)?,
        Dialect::Host => host::parse_program(&mut cursor)?,
    };
    Ok(Script {
        dialect,
        version: version_directive(source),
        body,
    })
}

pub(crate) struct Cursor {
    tokens: Vec<Spanned>,
    pos: usize,
    dialect: Dialect,
}

impl Cursor {
    pub(crate) fn new(tokens: Vec<Spanned>, dialect: Dialect) -> Self {
        Self {
            tokens,
            pos: 0,
            dialect,
        }
    }

    pub(crate) fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    pub(crate) fn peek_at(&self, n: usize) -> &Token {
        self.tokens
            .get(self.pos + n)
            .or_else(|| self.tokens.last())
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    pub(crate) fn span(&self) -> SourceSpan {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.span)
            .unwrap_or_default()
    }

    pub(crate) fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    pub(crate) fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    pub(crate) fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn is_keyword(&self, kw: &str) -> bool {
        self.is_keyword_at(0, kw)
    }

    pub(crate) fn is_keyword_at(&self, n: usize, kw: &str) -> bool {
        matches!(self.peek_at(n), Token::Ident(s) if s == kw)
    }

    pub(crate) fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.is_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn error(&self, kind: SyntaxErrorKind, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(kind, message, self.span())
    }

    pub(crate) fn unexpected(&self, expected: &str) -> SyntaxError {
        let kind = if self.check(&Token::Eof) {
            SyntaxErrorKind::UnexpectedEof
        } else {
            SyntaxErrorKind::UnexpectedToken
        };
        self.error(
            kind,
            format!("expected {expected}, found {}", self.peek().describe()),
        )
    }

    pub(crate) fn expect(&mut self, token: &Token, expected: &str) -> Result<SourceSpan, SyntaxError> {
        let span = self.span();
        if self.eat(token) {
            Ok(span)
        } else {
            Err(self.unexpected(expected))
        }
    }

    pub(crate) fn ident(&mut self) -> Result<(String, SourceSpan), SyntaxError> {
        let span = self.span();
        match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Ok((name, span))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    /// Index of the token closing the bracket opened at `pos + n`.
    pub(crate) fn matching_close(&self, n: usize) -> Option<usize> {
        let mut depth = 0usize;
        let mut i = n;
        loop {
            match self.peek_at(i) {
                Token::LParen | Token::LBracket | Token::LBrace => depth += 1,
                Token::RParen | Token::RBracket | Token::RBrace => {
                    depth = depth.checked_sub(1)?;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                Token::Eof => return None,
                _ => {}
            }
            i += 1;
        }
    }

    // ---------- expressions ----------------------------------------------

    pub(crate) fn expression(&mut self) -> Result<Expr, SyntaxError> {
        self.ternary()
    }

    fn ternary(&mut self) -> Result<Expr, SyntaxError> {
        let cond = self.or()?;
        if self.eat(&Token::Question) {
            let then = self.ternary()?;
            self.expect(&Token::Colon, "`:` in ternary")?;
            let otherwise = self.ternary()?;
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(cond)
    }

    fn or(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.and()?;
        while self.eat(&Token::OrOr) || self.eat_keyword("or") {
            let right = self.and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.equality()?;
        while self.eat(&Token::AndAnd) || self.eat_keyword("and") {
            let right = self.equality()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.comparison()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::Ne,
                _ => break,
            };
            self.advance();
            let right = self.comparison()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.additive()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.multiplicative()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.unary()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat(&Token::Minus) {
            let expr = self.unary()?;
            if let Expr::Number(n) = expr {
                return Ok(Expr::Number(-n));
            }
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(expr),
            });
        }
        if self.eat(&Token::Plus) {
            return self.unary();
        }
        if self.eat(&Token::Bang) || self.eat_keyword("not") {
            let expr = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.primary()?;
        while self.check(&Token::LBracket) {
            let span = self.span();
            self.advance();
            let offset = self.expression()?;
            self.expect(&Token::RBracket, "`]` after lookback offset")?;
            expr = Expr::Index {
                target: Box::new(expr),
                offset: Box::new(offset),
                span,
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        let span = self.span();
        match self.peek().clone() {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            Token::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(&Token::RParen, "`)`")?;
                Ok(inner)
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(&Token::RBracket) {
                    items.push(self.expression()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBracket, "`]`")?;
                Ok(Expr::List(items))
            }
            Token::LBrace if self.dialect == Dialect::Host => self.object(),
            Token::Ident(name) => match name.as_str() {
                "true" => {
                    self.advance();
                    Ok(Expr::Bool(true))
                }
                "false" => {
                    self.advance();
                    Ok(Expr::Bool(false))
                }
                "null" | "undefined" | "NaN" if self.dialect == Dialect::Host => {
                    self.advance();
                    Ok(Expr::Path {
                        parts: vec!["na".to_string()],
                        span,
                    })
                }
                _ => self.path_or_call(),
            },
            _ => Err(self.unexpected("expression")),
        }
    }

    fn path_or_call(&mut self) -> Result<Expr, SyntaxError> {
        let span = self.span();
        let (first, _) = self.ident()?;
        let mut parts = vec![first];
        while self.check(&Token::Dot) {
            self.advance();
            let (next, _) = self.ident()?;
            parts.push(next);
        }
        if self.check(&Token::LParen) {
            self.advance();
            let args = self.call_args()?;
            return Ok(Expr::Call {
                callee: parts,
                args,
                span,
            });
        }
        Ok(Expr::Path { parts, span })
    }

    fn call_args(&mut self) -> Result<Vec<Arg>, SyntaxError> {
        let mut args = Vec::new();
        while !self.check(&Token::RParen) {
            if matches!(self.peek(), Token::Ident(_)) && self.peek_at(1) == &Token::Assign {
                let (name, _) = self.ident()?;
                self.advance();
                let value = self.expression()?;
                args.push(Arg {
                    name: Some(name),
                    value,
                });
            } else {
                let value = self.expression()?;
                match value {
                    // host style trailing options object
                    Expr::Object(fields) if self.dialect == Dialect::Host => {
                        args.extend(fields.into_iter().map(|(name, value)| Arg {
                            name: Some(name),
                            value,
                        }));
                    }
                    value => args.push(Arg { name: None, value }),
                }
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "`)` after arguments")?;
        Ok(args)
    }

    fn object(&mut self) -> Result<Expr, SyntaxError> {
        self.expect(&Token::LBrace, "`{`")?;
        let mut fields = Vec::new();
        while !self.check(&Token::RBrace) {
            let key = match self.advance() {
                Token::Ident(s) | Token::Str(s) => s,
                _ => return Err(self.unexpected("object key")),
            };
            let value = if self.eat(&Token::Colon) {
                self.expression()?
            } else {
                Expr::Path {
                    parts: vec![key.clone()],
                    span: self.span(),
                }
            };
            fields.push((key, value));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBrace, "`}`")?;
        Ok(Expr::Object(fields))
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(src: &str) -> Expr {
        let tokens = tokenize(src, Dialect::Pine).unwrap();
        let mut c = Cursor::new(tokens, Dialect::Pine);
        c.expression().unwrap()
    }

    #[test]
    fn precedence_binds_multiplication_tighter() {
        let e = expr("1 + 2 * 3");
        match e {
            Expr::Binary { op: BinaryOp::Add, right, .. } => {
                assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. }))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn lookback_and_named_args() {
        let e = expr("ta.sma(source = close[1], length = 3)");
        match e {
            Expr::Call { callee, args, .. } => {
                assert_eq!(callee, vec!["ta", "sma"]);
                assert_eq!(args[0].name.as_deref(), Some("source"));
                assert!(matches!(args[0].value, Expr::Index { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ternary_and_logic_words() {
        let e = expr("a > b and not c ? 1 : -2");
        match e {
            Expr::Ternary { cond, otherwise, .. } => {
                assert!(matches!(*cond, Expr::Binary { op: BinaryOp::And, .. }));
                assert_eq!(*otherwise, Expr::Number(-2.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
