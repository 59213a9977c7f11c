//! Statement grammar of the brace-and-semicolon dialect.

use super::Cursor;
use crate::ast::{AssignOp, Expr, ImportFrom, Stmt};
use crate::error::SyntaxError;
use crate::language::{SourceSpan, SyntaxErrorKind};
use crate::lexer::Token;

pub(crate) fn parse_program(c: &mut Cursor) -> Result<Vec<Stmt>, SyntaxError> {
    c.eat_keyword("async");
    let wrapped = if c.check(&Token::LParen) {
        c.matching_close(0)
            .is_some_and(|close| c.peek_at(close + 1) == &Token::Arrow)
    } else {
        c.is_keyword("function") && c.peek_at(1) == &Token::LParen
    };
    if !wrapped {
        let mut body = Vec::new();
        while !c.check(&Token::Eof) {
            statement(c, &mut body)?;
        }
        return Ok(body);
    }

    c.eat_keyword("function");
    c.expect(&Token::LParen, "`(`")?;
    if !c.check(&Token::RParen) {
        c.ident()?;
    }
    c.expect(&Token::RParen, "`)`")?;
    c.eat(&Token::Arrow);
    let body = braced(c)?;
    c.eat(&Token::Semicolon);
    if !c.check(&Token::Eof) {
        return Err(c.unexpected("end of input after the script body"));
    }
    Ok(body)
}

fn braced(c: &mut Cursor) -> Result<Vec<Stmt>, SyntaxError> {
    c.expect(&Token::LBrace, "`{`")?;
    let mut body = Vec::new();
    while !c.check(&Token::RBrace) {
        if c.check(&Token::Eof) {
            return Err(c.unexpected("`}`"));
        }
        statement(c, &mut body)?;
    }
    c.advance();
    Ok(body)
}

fn block_or_statement(c: &mut Cursor) -> Result<Vec<Stmt>, SyntaxError> {
    if c.check(&Token::LBrace) {
        braced(c)
    } else {
        let mut body = Vec::new();
        statement(c, &mut body)?;
        Ok(body)
    }
}

fn semicolon(c: &mut Cursor) {
    c.eat(&Token::Semicolon);
}

fn statement(c: &mut Cursor, out: &mut Vec<Stmt>) -> Result<(), SyntaxError> {
    let span = c.span();
    if c.eat(&Token::Semicolon) {
        return Ok(());
    }
    let word = match c.peek() {
        Token::Ident(w) => w.clone(),
        Token::PlusPlus | Token::MinusMinus => {
            let op = if c.advance() == Token::PlusPlus {
                AssignOp::Add
            } else {
                AssignOp::Sub
            };
            let (name, _) = c.ident()?;
            semicolon(c);
            out.push(Stmt::Assign {
                name,
                op,
                value: Expr::Number(1.0),
                span,
            });
            return Ok(());
        }
        _ => return expression_statement(c, out, span),
    };
    match word.as_str() {
        "const" | "let" | "var" => {
            c.advance();
            declaration(c, out, word == "var", span)
        }
        "if" => {
            c.advance();
            out.push(if_statement(c, span)?);
            Ok(())
        }
        "for" => {
            c.advance();
            out.push(for_statement(c, span)?);
            Ok(())
        }
        "while" => {
            c.advance();
            c.expect(&Token::LParen, "`(`")?;
            let cond = c.expression()?;
            c.expect(&Token::RParen, "`)`")?;
            let body = block_or_statement(c)?;
            out.push(Stmt::While { cond, body, span });
            Ok(())
        }
        "break" => {
            c.advance();
            semicolon(c);
            out.push(Stmt::Break(span));
            Ok(())
        }
        "continue" => {
            c.advance();
            semicolon(c);
            out.push(Stmt::Continue(span));
            Ok(())
        }
        "return" => {
            c.advance();
            let value = if matches!(c.peek(), Token::Semicolon | Token::RBrace | Token::Eof) {
                None
            } else {
                Some(c.expression()?)
            };
            semicolon(c);
            out.push(Stmt::Return { value, span });
            Ok(())
        }
        "function" => {
            c.advance();
            let (name, _) = c.ident()?;
            let params = parameters(c)?;
            let body = braced(c)?;
            out.push(Stmt::FnDef {
                name,
                params,
                body,
                span,
            });
            Ok(())
        }
        "switch" | "do" | "try" | "class" | "new" | "throw" => Err(c.error(
            SyntaxErrorKind::UnsupportedConstruct,
            format!("`{word}` is not supported"),
        )),
        _ => {
            if let Some(op) = assign_op(c.peek_at(1)) {
                c.advance();
                c.advance();
                let value = c.expression()?;
                semicolon(c);
                out.push(Stmt::Assign {
                    name: word,
                    op,
                    value,
                    span,
                });
                return Ok(());
            }
            if matches!(c.peek_at(1), Token::PlusPlus | Token::MinusMinus) {
                c.advance();
                let op = if c.advance() == Token::PlusPlus {
                    AssignOp::Add
                } else {
                    AssignOp::Sub
                };
                semicolon(c);
                out.push(Stmt::Assign {
                    name: word,
                    op,
                    value: Expr::Number(1.0),
                    span,
                });
                return Ok(());
            }
            expression_statement(c, out, span)
        }
    }
}

fn assign_op(token: &Token) -> Option<AssignOp> {
    match token {
        Token::Assign => Some(AssignOp::Set),
        Token::PlusEq => Some(AssignOp::Add),
        Token::MinusEq => Some(AssignOp::Sub),
        Token::StarEq => Some(AssignOp::Mul),
        Token::SlashEq => Some(AssignOp::Div),
        _ => None,
    }
}

fn expression_statement(c: &mut Cursor, out: &mut Vec<Stmt>, span: SourceSpan) -> Result<(), SyntaxError> {
    let expr = c.expression()?;
    if assign_op(c.peek()).is_some() {
        return Err(c.error(
            SyntaxErrorKind::InvalidAssignment,
            "left side of an assignment must be a plain identifier",
        ));
    }
    semicolon(c);
    out.push(Stmt::Expr(expr, span));
    Ok(())
}

fn parameters(c: &mut Cursor) -> Result<Vec<String>, SyntaxError> {
    c.expect(&Token::LParen, "`(`")?;
    let mut params = Vec::new();
    while !c.check(&Token::RParen) {
        let (name, _) = c.ident()?;
        params.push(name);
        if !c.eat(&Token::Comma) {
            break;
        }
    }
    c.expect(&Token::RParen, "`)`")?;
    Ok(params)
}

fn name_list(c: &mut Cursor, close: &Token) -> Result<Vec<String>, SyntaxError> {
    let mut names = Vec::new();
    while !c.check(close) {
        let (name, _) = c.ident()?;
        names.push(name);
        if !c.eat(&Token::Comma) {
            break;
        }
    }
    c.expect(close, "end of name list")?;
    Ok(names)
}

fn declaration(c: &mut Cursor, out: &mut Vec<Stmt>, persistent: bool, span: SourceSpan) -> Result<(), SyntaxError> {
    if c.eat(&Token::LBrace) {
        let names = name_list(c, &Token::RBrace)?;
        c.expect(&Token::Assign, "`=`")?;
        let from = import_source(c)?;
        semicolon(c);
        out.push(Stmt::Import { from, names, span });
        return Ok(());
    }
    if c.eat(&Token::LBracket) {
        let names = name_list(c, &Token::RBracket)?;
        c.expect(&Token::Assign, "`=`")?;
        let value = c.expression()?;
        semicolon(c);
        out.push(Stmt::TupleDecl { names, value, span });
        return Ok(());
    }
    loop {
        let (name, name_span) = c.ident()?;
        if !c.eat(&Token::Assign) {
            out.push(Stmt::Decl {
                name,
                value: Expr::Path {
                    parts: vec!["na".to_string()],
                    span: name_span,
                },
                persistent,
                span: name_span,
            });
        } else if is_arrow_function(c) {
            let params = parameters(c)?;
            c.expect(&Token::Arrow, "`=>`")?;
            let body = if c.check(&Token::LBrace) {
                braced(c)?
            } else {
                let ret_span = c.span();
                vec![Stmt::Return {
                    value: Some(c.expression()?),
                    span: ret_span,
                }]
            };
            out.push(Stmt::FnDef {
                name,
                params,
                body,
                span: name_span,
            });
        } else {
            let value = c.expression()?;
            out.push(Stmt::Decl {
                name,
                value,
                persistent,
                span: name_span,
            });
        }
        if !c.eat(&Token::Comma) {
            break;
        }
    }
    semicolon(c);
    Ok(())
}

fn is_arrow_function(c: &Cursor) -> bool {
    c.check(&Token::LParen)
        && c.matching_close(0)
            .is_some_and(|close| c.peek_at(close + 1) == &Token::Arrow)
}

fn import_source(c: &mut Cursor) -> Result<ImportFrom, SyntaxError> {
    let span = c.span();
    let (root, _) = c.ident()?;
    let field = if c.eat(&Token::Dot) {
        Some(c.ident()?.0)
    } else {
        None
    };
    match (root.as_str(), field.as_deref()) {
        ("context", Some("data")) | ("data", None) => Ok(ImportFrom::Data),
        ("context", Some("pine")) | ("pine", None) => Ok(ImportFrom::Pine),
        _ => Err(SyntaxError::new(
            SyntaxErrorKind::UnknownNamespace,
            "destructuring is only supported from `context.data` or `context.pine`",
            span,
        )),
    }
}

fn if_statement(c: &mut Cursor, span: SourceSpan) -> Result<Stmt, SyntaxError> {
    c.expect(&Token::LParen, "`(` after if")?;
    let cond = c.expression()?;
    c.expect(&Token::RParen, "`)`")?;
    let then = block_or_statement(c)?;
    let otherwise = if c.eat_keyword("else") {
        block_or_statement(c)?
    } else {
        Vec::new()
    };
    Ok(Stmt::If {
        cond,
        then,
        otherwise,
        span,
    })
}

/// Only the counting form is accepted:
/// `for (let i = a; i < b; i++)` with `<`, `<=`, `>`, `>=` and
/// `++`, `--`, `+= s`, `-= s` updates.
fn for_statement(c: &mut Cursor, span: SourceSpan) -> Result<Stmt, SyntaxError> {
    c.expect(&Token::LParen, "`(` after for")?;
    let _ = c.eat_keyword("let") || c.eat_keyword("var") || c.eat_keyword("const");
    let (var, _) = c.ident()?;
    if c.is_keyword("of") || c.is_keyword("in") {
        return Err(c.error(
            SyntaxErrorKind::UnsupportedConstruct,
            "only counting for loops are supported",
        ));
    }
    c.expect(&Token::Assign, "`=` in for initializer")?;
    let from = c.expression()?;
    c.expect(&Token::Semicolon, "`;`")?;

    let unsupported = |c: &Cursor| {
        c.error(
            SyntaxErrorKind::UnsupportedConstruct,
            "for loop must test and update its own counter",
        )
    };
    let (cond_var, _) = c.ident()?;
    if cond_var != var {
        return Err(unsupported(c));
    }
    let inclusive = match c.advance() {
        Token::Lt | Token::Gt => false,
        Token::Le | Token::Ge => true,
        _ => return Err(unsupported(c)),
    };
    let to = c.expression()?;
    c.expect(&Token::Semicolon, "`;`")?;

    let step = match c.peek().clone() {
        Token::PlusPlus | Token::MinusMinus => {
            let dec = c.advance() == Token::MinusMinus;
            if c.ident()?.0 != var {
                return Err(unsupported(c));
            }
            Expr::Number(if dec { -1.0 } else { 1.0 })
        }
        Token::Ident(name) if name == var => {
            c.advance();
            match c.advance() {
                Token::PlusPlus => Expr::Number(1.0),
                Token::MinusMinus => Expr::Number(-1.0),
                Token::PlusEq => c.expression()?,
                Token::MinusEq => match c.expression()? {
                    Expr::Number(n) => Expr::Number(-n),
                    other => Expr::Unary {
                        op: crate::ast::UnaryOp::Neg,
                        expr: Box::new(other),
                    },
                },
                _ => return Err(unsupported(c)),
            }
        }
        _ => return Err(unsupported(c)),
    };
    c.expect(&Token::RParen, "`)`")?;
    let body = block_or_statement(c)?;
    Ok(Stmt::For {
        var,
        from,
        to,
        step: Some(step),
        inclusive,
        body,
        span,
    })
}

#[cfg(test)]
mod tests {
    use crate::ast::{AssignOp, Expr, ImportFrom, Stmt};
    use crate::language::{Dialect, SyntaxErrorKind};
    use crate::parser::parse;

    fn body(src: &str) -> Vec<Stmt> {
        parse(src, Dialect::Host).unwrap().body
    }

    #[test]
    fn wrapper_and_imports() {
        let stmts = body(
            "(context) => {\n  const { close, high } = context.data;\n  const { ta } = context.pine;\n  let x = ta.sma(close, 3);\n  return { x: x };\n}",
        );
        assert!(matches!(&stmts[0], Stmt::Import { from: ImportFrom::Data, names, .. } if names.len() == 2));
        assert!(matches!(&stmts[1], Stmt::Import { from: ImportFrom::Pine, .. }));
        assert!(matches!(&stmts[2], Stmt::Decl { persistent: false, .. }));
        assert!(matches!(&stmts[3], Stmt::Return { value: Some(Expr::Object(_)), .. }));
    }

    #[test]
    fn function_keyword_wrapper() {
        let stmts = body("function (context) { var n = 0; n++; }");
        assert!(matches!(&stmts[0], Stmt::Decl { persistent: true, .. }));
        assert!(matches!(&stmts[1], Stmt::Assign { op: AssignOp::Add, .. }));
    }

    #[test]
    fn counting_loops() {
        let stmts = body("for (let i = 0; i < 5; i++) { s += i; }\nfor (let j = 10; j >= 0; j -= 2) s = s - j;");
        match &stmts[0] {
            Stmt::For { inclusive, step, .. } => {
                assert!(!inclusive);
                assert_eq!(step, &Some(Expr::Number(1.0)));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &stmts[1] {
            Stmt::For { inclusive, step, body, .. } => {
                assert!(*inclusive);
                assert_eq!(step, &Some(Expr::Number(-2.0)));
                assert_eq!(body.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn functions_and_tuples() {
        let stmts = body(
            "function f(a, b) { return a + b; }\nconst g = (x) => x * 2;\nconst [m, s, h] = ta.macd(close, 12, 26, 9);",
        );
        assert!(matches!(&stmts[0], Stmt::FnDef { params, .. } if params.len() == 2));
        assert!(matches!(&stmts[1], Stmt::FnDef { name, .. } if name == "g"));
        assert!(matches!(&stmts[2], Stmt::TupleDecl { names, .. } if names.len() == 3));
    }

    #[test]
    fn if_else_without_braces() {
        let stmts = body("if (a > b) x = 1; else if (a < b) x = 2; else { x = 3; }");
        match &stmts[0] {
            Stmt::If { then, otherwise, .. } => {
                assert_eq!(then.len(), 1);
                assert!(matches!(otherwise[0], Stmt::If { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn loops_over_collections_are_rejected() {
        let err = parse("for (let x of xs) { }", Dialect::Host).unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::UnsupportedConstruct);
    }

    #[test]
    fn imports_only_from_context() {
        let err = parse("const { a } = other;", Dialect::Host).unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::UnknownNamespace);
    }
}
