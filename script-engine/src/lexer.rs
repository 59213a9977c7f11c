use crate::error::SyntaxError;
use crate::language::{Dialect, SourceSpan, SyntaxErrorKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,
    Semicolon,
    Question,
    Assign,
    ColonEq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    Arrow,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Bang,
    AndAnd,
    OrOr,
    PlusPlus,
    MinusMinus,
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("identifier `{s}`"),
            Token::Number(n) => format!("number {n}"),
            Token::Str(s) => format!("string {s:?}"),
            Token::Newline => "end of line".to_string(),
            Token::Indent => "indent".to_string(),
            Token::Dedent => "dedent".to_string(),
            Token::Eof => "end of input".to_string(),
            other => format!("`{other:?}`"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: SourceSpan,
}

/// Character scanner. In the pine dialect leading whitespace is significant
/// and produces `Indent`/`Dedent`/`Newline` tokens; inside brackets and in
/// the host dialect line breaks are plain whitespace.
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    dialect: Dialect,
    depth: usize,
    indent_stack: Vec<usize>,
}

impl Lexer {
    pub fn new(source: &str, dialect: Dialect) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            dialect,
            depth: 0,
            indent_stack: vec![0],
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn current(&self) -> char {
        self.chars[self.pos]
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.chars.get(self.pos + 2).copied()
    }

    fn advance(&mut self) -> char {
        let ch = self.chars[self.pos];
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        ch
    }

    fn span(&self, line: usize, col: usize) -> SourceSpan {
        SourceSpan::single_line(line, col, self.col)
    }

    fn error(&self, kind: SyntaxErrorKind, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(kind, message, SourceSpan::point(self.line, self.col))
    }

    fn skip_line_comment(&mut self) {
        while !self.at_end() && self.current() != '\n' {
            self.advance();
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), SyntaxError> {
        self.advance();
        self.advance();
        while !self.at_end() {
            if self.current() == '*' && self.peek() == Some('/') {
                self.advance();
                self.advance();
                return Ok(());
            }
            self.advance();
        }
        Err(self.error(SyntaxErrorKind::UnexpectedEof, "unterminated block comment"))
    }

    fn significant_newlines(&self) -> bool {
        self.dialect == Dialect::Pine && self.depth == 0
    }

    pub fn tokenize(mut self) -> Result<Vec<Spanned>, SyntaxError> {
        let mut tokens: Vec<Spanned> = Vec::new();
        let mut at_line_start = true;

        while !self.at_end() {
            if at_line_start && self.significant_newlines() {
                let mut spaces = 0usize;
                while !self.at_end() && (self.current() == ' ' || self.current() == '\t') {
                    spaces += if self.current() == '\t' { 4 } else { 1 };
                    self.advance();
                }
                if self.at_end() {
                    break;
                }
                let ch = self.current();
                if ch == '\n' || ch == '\r' {
                    self.advance();
                    continue;
                }
                if ch == '/' && self.peek() == Some('/') {
                    self.skip_line_comment();
                    continue;
                }
                let current_indent = self.indent_stack.last().copied().unwrap_or(0);
                if spaces > current_indent {
                    self.indent_stack.push(spaces);
                    tokens.push(Spanned {
                        token: Token::Indent,
                        span: SourceSpan::point(self.line, 1),
                    });
                } else {
                    while spaces < self.indent_stack.last().copied().unwrap_or(0) {
                        self.indent_stack.pop();
                        tokens.push(Spanned {
                            token: Token::Dedent,
                            span: SourceSpan::point(self.line, 1),
                        });
                    }
                    if spaces != self.indent_stack.last().copied().unwrap_or(0) {
                        return Err(self.error(
                            SyntaxErrorKind::InvalidIndentation,
                            "indentation does not match any enclosing block",
                        ));
                    }
                }
                at_line_start = false;
            }

            let (line, col) = (self.line, self.col);
            let ch = self.current();

            match ch {
                '\n' => {
                    self.advance();
                    if self.significant_newlines() {
                        if !matches!(tokens.last().map(|t| &t.token), Some(Token::Newline) | None) {
                            tokens.push(Spanned {
                                token: Token::Newline,
                                span: SourceSpan::point(line, col),
                            });
                        }
                        at_line_start = true;
                    }
                }
                ' ' | '\t' | '\r' => {
                    self.advance();
                }
                '/' if self.peek() == Some('/') => self.skip_line_comment(),
                '/' if self.peek() == Some('*') => self.skip_block_comment()?,
                '"' | '\'' => tokens.push(self.read_string(ch)?),
                '#' => tokens.push(self.read_color()),
                '0'..='9' => tokens.push(self.read_number()?),
                '.' if self.peek().is_some_and(|c| c.is_ascii_digit()) => tokens.push(self.read_number()?),
                c if c.is_alphabetic() || c == '_' || c == '$' => tokens.push(self.read_ident()),
                _ => {
                    let token = self.read_symbol()?;
                    match token {
                        Token::LParen | Token::LBracket => self.depth += 1,
                        Token::RParen | Token::RBracket => self.depth = self.depth.saturating_sub(1),
                        _ => {}
                    }
                    tokens.push(Spanned {
                        token,
                        span: self.span(line, col),
                    });
                }
            }
        }

        if self.dialect == Dialect::Pine {
            if !matches!(tokens.last().map(|t| &t.token), Some(Token::Newline) | None) {
                tokens.push(Spanned {
                    token: Token::Newline,
                    span: SourceSpan::point(self.line, self.col),
                });
            }
            while self.indent_stack.len() > 1 {
                self.indent_stack.pop();
                tokens.push(Spanned {
                    token: Token::Dedent,
                    span: SourceSpan::point(self.line, 1),
                });
            }
        }
        tokens.push(Spanned {
            token: Token::Eof,
            span: SourceSpan::point(self.line, self.col),
        });
        Ok(tokens)
    }

    fn read_string(&mut self, quote: char) -> Result<Spanned, SyntaxError> {
        let (line, col) = (self.line, self.col);
        self.advance();
        let mut s = String::new();
        loop {
            if self.at_end() || self.current() == '\n' {
                return Err(SyntaxError::new(
                    SyntaxErrorKind::UnterminatedString,
                    "unterminated string literal",
                    SourceSpan::point(line, col),
                ));
            }
            let ch = self.advance();
            if ch == quote {
                break;
            }
            if ch == '\\' && !self.at_end() {
                match self.advance() {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    other => s.push(other),
                }
            } else {
                s.push(ch);
            }
        }
        Ok(Spanned {
            token: Token::Str(s),
            span: self.span(line, col),
        })
    }

    /// `#RRGGBB` / `#RRGGBBAA` literals become strings.
    fn read_color(&mut self) -> Spanned {
        let (line, col) = (self.line, self.col);
        let mut s = String::from(self.advance());
        while !self.at_end() && self.current().is_ascii_hexdigit() {
            s.push(self.advance());
        }
        Spanned {
            token: Token::Str(s.to_ascii_uppercase()),
            span: self.span(line, col),
        }
    }

    fn read_number(&mut self) -> Result<Spanned, SyntaxError> {
        let (line, col) = (self.line, self.col);
        let mut num = String::new();
        let mut seen_dot = false;
        while !self.at_end() {
            let c = self.current();
            if c.is_ascii_digit() || c == '_' {
                if c != '_' {
                    num.push(c);
                }
                self.advance();
            } else if c == '.' && !seen_dot && self.peek().map_or(true, |n| !n.is_alphabetic() && n != '.') {
                seen_dot = true;
                num.push(c);
                self.advance();
            } else if (c == 'e' || c == 'E')
                && (self.peek().is_some_and(|n| n.is_ascii_digit())
                    || (matches!(self.peek(), Some('+') | Some('-'))
                        && self.peek2().is_some_and(|n| n.is_ascii_digit())))
            {
                num.push(self.advance());
                num.push(self.advance());
            } else {
                break;
            }
        }
        let value: f64 = num.parse().map_err(|_| {
            SyntaxError::new(
                SyntaxErrorKind::InvalidNumber,
                format!("invalid number literal `{num}`"),
                SourceSpan::point(line, col),
            )
        })?;
        Ok(Spanned {
            token: Token::Number(value),
            span: self.span(line, col),
        })
    }

    fn read_ident(&mut self) -> Spanned {
        let (line, col) = (self.line, self.col);
        let mut s = String::new();
        while !self.at_end() {
            let c = self.current();
            if c.is_alphanumeric() || c == '_' || c == '$' {
                s.push(self.advance());
            } else {
                break;
            }
        }
        Spanned {
            token: Token::Ident(s),
            span: self.span(line, col),
        }
    }

    fn read_symbol(&mut self) -> Result<Token, SyntaxError> {
        let ch = self.current();
        let next = self.peek();
        let (token, len) = match (ch, next) {
            ('=', Some('=')) if self.peek2() == Some('=') => (Token::EqEq, 3),
            ('!', Some('=')) if self.peek2() == Some('=') => (Token::NotEq, 3),
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('=', Some('>')) => (Token::Arrow, 2),
            (':', Some('=')) => (Token::ColonEq, 2),
            ('+', Some('=')) => (Token::PlusEq, 2),
            ('-', Some('=')) => (Token::MinusEq, 2),
            ('*', Some('=')) => (Token::StarEq, 2),
            ('/', Some('=')) => (Token::SlashEq, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('&', Some('&')) => (Token::AndAnd, 2),
            ('|', Some('|')) => (Token::OrOr, 2),
            ('+', Some('+')) if self.dialect == Dialect::Host => (Token::PlusPlus, 2),
            ('-', Some('-')) if self.dialect == Dialect::Host => (Token::MinusMinus, 2),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            ('{', _) => (Token::LBrace, 1),
            ('}', _) => (Token::RBrace, 1),
            (',', _) => (Token::Comma, 1),
            ('.', _) => (Token::Dot, 1),
            (':', _) => (Token::Colon, 1),
            (';', _) => (Token::Semicolon, 1),
            ('?', _) => (Token::Question, 1),
            ('=', _) => (Token::Assign, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('!', _) => (Token::Bang, 1),
            (other, _) => {
                return Err(self.error(
                    SyntaxErrorKind::UnexpectedToken,
                    format!("unexpected character `{other}`"),
                ))
            }
        };
        for _ in 0..len {
            self.advance();
        }
        Ok(token)
    }
}

pub fn tokenize(source: &str, dialect: Dialect) -> Result<Vec<Spanned>, SyntaxError> {
    Lexer::new(source, dialect).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str, dialect: Dialect) -> Vec<Token> {
        tokenize(src, dialect)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn pine_blocks_produce_indent_tokens() {
        let toks = kinds("if a\n    b := 1\nc = 2\n", Dialect::Pine);
        assert_eq!(
            toks,
            vec![
                Token::Ident("if".into()),
                Token::Ident("a".into()),
                Token::Newline,
                Token::Indent,
                Token::Ident("b".into()),
                Token::ColonEq,
                Token::Number(1.0),
                Token::Newline,
                Token::Dedent,
                Token::Ident("c".into()),
                Token::Assign,
                Token::Number(2.0),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn newlines_inside_parens_are_whitespace() {
        let toks = kinds("x = f(1,\n   2)\n", Dialect::Pine);
        assert!(!toks.contains(&Token::Indent));
        assert_eq!(toks.iter().filter(|t| **t == Token::Newline).count(), 1);
    }

    #[test]
    fn comments_and_blank_lines_do_not_change_indentation() {
        let toks = kinds("//@version=5\n\nif a\n    // note\n\n    b = 1\n", Dialect::Pine);
        assert_eq!(toks.iter().filter(|t| **t == Token::Indent).count(), 1);
        assert_eq!(toks.iter().filter(|t| **t == Token::Dedent).count(), 1);
    }

    #[test]
    fn mismatched_dedent_is_an_error() {
        let err = tokenize("if a\n    b = 1\n  c = 2\n", Dialect::Pine).unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::InvalidIndentation);
        assert_eq!(err.span.start_line, 3);
    }

    #[test]
    fn host_operators() {
        let toks = kinds("a === b && c !== d; i++", Dialect::Host);
        assert!(toks.contains(&Token::EqEq));
        assert!(toks.contains(&Token::NotEq));
        assert!(toks.contains(&Token::AndAnd));
        assert!(toks.contains(&Token::PlusPlus));
        assert!(!toks.contains(&Token::Newline));
    }

    #[test]
    fn literals() {
        let toks = kinds("x = 1.5e2 + .5\ns = 'hi'\nc = #ff0000", Dialect::Pine);
        assert!(toks.contains(&Token::Number(150.0)));
        assert!(toks.contains(&Token::Number(0.5)));
        assert!(toks.contains(&Token::Str("hi".into())));
        assert!(toks.contains(&Token::Str("#FF0000".into())));
        let err = tokenize("s = \"open", Dialect::Pine).unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::UnterminatedString);
    }
}
