//! Statement grammar of the indentation-based dialect.

use super::Cursor;
use crate::ast::{AssignOp, Stmt};
use crate::error::SyntaxError;
use crate::language::{SourceSpan, SyntaxErrorKind};
use crate::lexer::Token;

const TYPE_KEYWORDS: &[&str] = &[
    "int", "float", "bool", "string", "color", "series", "simple", "const", "line", "label", "box",
    "table", "array", "matrix", "map",
];

const UNSUPPORTED: &[&str] = &["switch", "import", "export", "method", "type", "enum"];

pub(crate) fn parse_program(c: &mut Cursor) -> Result<Vec<Stmt>, SyntaxError> {
    let mut body = Vec::new();
    loop {
        while c.eat(&Token::Newline) {}
        if c.check(&Token::Eof) {
            break;
        }
        if c.check(&Token::Indent) {
            return Err(c.error(SyntaxErrorKind::InvalidIndentation, "unexpected indentation"));
        }
        body.push(statement(c)?);
    }
    Ok(body)
}

fn block(c: &mut Cursor) -> Result<Vec<Stmt>, SyntaxError> {
    c.expect(&Token::Newline, "end of line before block")?;
    if !c.eat(&Token::Indent) {
        return Err(c.error(SyntaxErrorKind::InvalidIndentation, "expected an indented block"));
    }
    let mut body = Vec::new();
    loop {
        while c.eat(&Token::Newline) {}
        if c.eat(&Token::Dedent) || c.check(&Token::Eof) {
            break;
        }
        body.push(statement(c)?);
    }
    Ok(body)
}

fn end_of_statement(c: &mut Cursor) -> Result<(), SyntaxError> {
    if c.eat(&Token::Newline) || c.check(&Token::Eof) || c.check(&Token::Dedent) {
        Ok(())
    } else {
        Err(c.unexpected("end of line"))
    }
}

fn statement(c: &mut Cursor) -> Result<Stmt, SyntaxError> {
    let span = c.span();
    if let Token::Ident(word) = c.peek().clone() {
        match word.as_str() {
            "if" => {
                c.advance();
                return if_statement(c, span);
            }
            "for" => {
                c.advance();
                return for_statement(c, span);
            }
            "while" => {
                c.advance();
                let cond = c.expression()?;
                let body = block(c)?;
                return Ok(Stmt::While { cond, body, span });
            }
            "break" => {
                c.advance();
                end_of_statement(c)?;
                return Ok(Stmt::Break(span));
            }
            "continue" => {
                c.advance();
                end_of_statement(c)?;
                return Ok(Stmt::Continue(span));
            }
            w if UNSUPPORTED.contains(&w) && !matches!(c.peek_at(1), Token::Assign | Token::ColonEq) => {
                return Err(c.error(
                    SyntaxErrorKind::UnsupportedConstruct,
                    format!("`{w}` is not supported"),
                ));
            }
            _ => {}
        }
        if c.peek_at(1) == &Token::LParen && is_function_header(c) {
            return function(c, word, span);
        }
    }
    if c.check(&Token::LBracket) {
        if let Some(close) = c.matching_close(0) {
            if c.peek_at(close + 1) == &Token::Assign {
                return tuple_declaration(c, span);
            }
        }
    }
    declaration_or_expression(c, span)
}

fn is_function_header(c: &Cursor) -> bool {
    c.matching_close(1)
        .is_some_and(|close| c.peek_at(close + 1) == &Token::Arrow)
}

fn if_statement(c: &mut Cursor, span: SourceSpan) -> Result<Stmt, SyntaxError> {
    let cond = c.expression()?;
    let then = block(c)?;
    let mut otherwise = Vec::new();
    if c.is_keyword("else") {
        let else_span = c.span();
        c.advance();
        if c.eat_keyword("if") {
            otherwise.push(if_statement(c, else_span)?);
        } else {
            otherwise = block(c)?;
        }
    }
    Ok(Stmt::If {
        cond,
        then,
        otherwise,
        span,
    })
}

fn for_statement(c: &mut Cursor, span: SourceSpan) -> Result<Stmt, SyntaxError> {
    let (var, _) = c.ident()?;
    if c.is_keyword("in") {
        return Err(c.error(SyntaxErrorKind::UnsupportedConstruct, "`for ... in` is not supported"));
    }
    c.expect(&Token::Assign, "`=` in for header")?;
    let from = c.expression()?;
    if !c.eat_keyword("to") {
        return Err(c.unexpected("`to`"));
    }
    let to = c.expression()?;
    let step = if c.eat_keyword("by") {
        Some(c.expression()?)
    } else {
        None
    };
    let body = block(c)?;
    Ok(Stmt::For {
        var,
        from,
        to,
        step,
        inclusive: true,
        body,
        span,
    })
}

fn function(c: &mut Cursor, name: String, span: SourceSpan) -> Result<Stmt, SyntaxError> {
    c.advance();
    c.expect(&Token::LParen, "`(`")?;
    let mut params = Vec::new();
    while !c.check(&Token::RParen) {
        skip_type(c);
        let (param, _) = c.ident()?;
        if c.eat(&Token::Assign) {
            return Err(c.error(
                SyntaxErrorKind::UnsupportedConstruct,
                "default parameter values are not supported",
            ));
        }
        params.push(param);
        if !c.eat(&Token::Comma) {
            break;
        }
    }
    c.expect(&Token::RParen, "`)`")?;
    c.expect(&Token::Arrow, "`=>`")?;
    let body = if c.check(&Token::Newline) {
        let mut body = block(c)?;
        match body.pop() {
            Some(Stmt::Expr(expr, span)) => body.push(Stmt::Return {
                value: Some(expr),
                span,
            }),
            Some(last) => {
                return Err(SyntaxError::new(
                    SyntaxErrorKind::UnsupportedConstruct,
                    "function body must end with an expression",
                    stmt_span(&last),
                ))
            }
            None => {}
        }
        body
    } else {
        let ret_span = c.span();
        let value = c.expression()?;
        end_of_statement(c)?;
        vec![Stmt::Return {
            value: Some(value),
            span: ret_span,
        }]
    };
    Ok(Stmt::FnDef {
        name,
        params,
        body,
        span,
    })
}

fn stmt_span(stmt: &Stmt) -> SourceSpan {
    match stmt {
        Stmt::Decl { span, .. }
        | Stmt::Assign { span, .. }
        | Stmt::TupleDecl { span, .. }
        | Stmt::Import { span, .. }
        | Stmt::If { span, .. }
        | Stmt::For { span, .. }
        | Stmt::While { span, .. }
        | Stmt::FnDef { span, .. }
        | Stmt::Return { span, .. }
        | Stmt::Expr(_, span)
        | Stmt::Break(span)
        | Stmt::Continue(span) => *span,
    }
}

fn tuple_declaration(c: &mut Cursor, span: SourceSpan) -> Result<Stmt, SyntaxError> {
    c.expect(&Token::LBracket, "`[`")?;
    let mut names = Vec::new();
    while !c.check(&Token::RBracket) {
        let (name, _) = c.ident()?;
        names.push(name);
        if !c.eat(&Token::Comma) {
            break;
        }
    }
    c.expect(&Token::RBracket, "`]`")?;
    c.expect(&Token::Assign, "`=`")?;
    let value = c.expression()?;
    end_of_statement(c)?;
    Ok(Stmt::TupleDecl { names, value, span })
}

/// Skip a type annotation (`float`, `series int`, `array<float>`) when it is
/// followed by the declared name.
fn skip_type(c: &mut Cursor) {
    loop {
        let is_type = matches!(c.peek(), Token::Ident(w) if TYPE_KEYWORDS.contains(&w.as_str()));
        if !is_type {
            return;
        }
        match c.peek_at(1) {
            Token::Ident(_) => {
                c.advance();
            }
            Token::Lt => {
                let mut n = 2;
                while !matches!(c.peek_at(n), Token::Gt | Token::Eof | Token::Newline) {
                    n += 1;
                }
                if !matches!(c.peek_at(n + 1), Token::Ident(_)) {
                    return;
                }
                for _ in 0..=n {
                    c.advance();
                }
            }
            _ => return,
        }
    }
}

fn declaration_or_expression(c: &mut Cursor, span: SourceSpan) -> Result<Stmt, SyntaxError> {
    let persistent = c.eat_keyword("var") || c.eat_keyword("varip");
    skip_type(c);
    if let Token::Ident(name) = c.peek().clone() {
        let op = match c.peek_at(1) {
            Token::Assign => None,
            Token::ColonEq => Some(AssignOp::Set),
            Token::PlusEq => Some(AssignOp::Add),
            Token::MinusEq => Some(AssignOp::Sub),
            Token::StarEq => Some(AssignOp::Mul),
            Token::SlashEq => Some(AssignOp::Div),
            _ => {
                if persistent {
                    return Err(c.unexpected("`=` after persistent declaration"));
                }
                return expression_statement(c, span);
            }
        };
        c.advance();
        c.advance();
        let value = c.expression()?;
        end_of_statement(c)?;
        return Ok(match op {
            None => Stmt::Decl {
                name,
                value,
                persistent,
                span,
            },
            Some(_) if persistent => {
                return Err(SyntaxError::new(
                    SyntaxErrorKind::InvalidAssignment,
                    "`var` declarations use `=`",
                    span,
                ))
            }
            Some(op) => Stmt::Assign {
                name,
                op,
                value,
                span,
            },
        });
    }
    if persistent {
        return Err(c.unexpected("identifier"));
    }
    expression_statement(c, span)
}

fn expression_statement(c: &mut Cursor, span: SourceSpan) -> Result<Stmt, SyntaxError> {
    let expr = c.expression()?;
    if matches!(c.peek(), Token::Assign | Token::ColonEq) {
        return Err(c.error(
            SyntaxErrorKind::InvalidAssignment,
            "left side of an assignment must be a plain identifier",
        ));
    }
    end_of_statement(c)?;
    Ok(Stmt::Expr(expr, span))
}

#[cfg(test)]
mod tests {
    use crate::ast::{AssignOp, Expr, Stmt};
    use crate::language::{Dialect, SyntaxErrorKind};
    use crate::parser::parse;

    fn body(src: &str) -> Vec<Stmt> {
        parse(src, Dialect::Pine).unwrap().body
    }

    #[test]
    fn declarations_and_reassignment() {
        let stmts = body("//@version=5\nvar float total = 0\ntotal += close\nx = 1\nx := 2\n");
        assert!(matches!(&stmts[0], Stmt::Decl { name, persistent: true, .. } if name == "total"));
        assert!(matches!(&stmts[1], Stmt::Assign { op: AssignOp::Add, .. }));
        assert!(matches!(&stmts[2], Stmt::Decl { persistent: false, .. }));
        assert!(matches!(&stmts[3], Stmt::Assign { op: AssignOp::Set, .. }));
    }

    #[test]
    fn version_directive_recorded() {
        let script = parse("//@version=5\nplot(close)\n", Dialect::Pine).unwrap();
        assert_eq!(script.version, Some(5));
    }

    #[test]
    fn if_else_chain() {
        let stmts = body("if a\n    x := 1\nelse if b\n    x := 2\nelse\n    x := 3\n");
        match &stmts[0] {
            Stmt::If { otherwise, .. } => match &otherwise[0] {
                Stmt::If { otherwise, .. } => assert_eq!(otherwise.len(), 1),
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn for_loop_with_step() {
        let stmts = body("for i = 0 to 10 by 2\n    s += i\n");
        match &stmts[0] {
            Stmt::For { var, step, inclusive, body, .. } => {
                assert_eq!(var, "i");
                assert_eq!(step, &Some(Expr::Number(2.0)));
                assert!(*inclusive);
                assert_eq!(body.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn functions_single_line_and_block() {
        let stmts = body("f(a, b) => a + b\ng(x) =>\n    y = x * 2\n    y + 1\n");
        match &stmts[0] {
            Stmt::FnDef { params, body, .. } => {
                assert_eq!(params, &vec!["a".to_string(), "b".to_string()]);
                assert!(matches!(body[0], Stmt::Return { value: Some(_), .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &stmts[1] {
            Stmt::FnDef { body, .. } => {
                assert_eq!(body.len(), 2);
                assert!(matches!(body[1], Stmt::Return { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tuple_destructuring() {
        let stmts = body("[m, s, h] = ta.macd(close, 12, 26, 9)\n");
        assert!(matches!(&stmts[0], Stmt::TupleDecl { names, .. } if names.len() == 3));
    }

    #[test]
    fn unsupported_switch_is_reported() {
        let err = parse("switch x\n    1 => 2\n", Dialect::Pine).unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::UnsupportedConstruct);
        assert_eq!(err.span.start_line, 1);
    }

    #[test]
    fn missing_block_is_an_indentation_error() {
        let err = parse("if a\nb = 1\n", Dialect::Pine).unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::InvalidIndentation);
    }
}
