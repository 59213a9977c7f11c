//! Source → [`LoweredProgram`].
//!
//! One traversal resolves every identifier against the lexical scope stack,
//! assigns scope ids, temporaries, parameter ids and call-site keys from
//! monotonically increasing counters, and records where data fields and
//! namespaces are used. A post-pass then places synthesized imports at the
//! top of the narrowest scope covering all uses. The traversal never reads
//! anything but the source, so the output is a pure function of it.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::ast::{self, Arg, ImportFrom, Stmt};
use crate::error::SyntaxError;
use crate::language::{Dialect, SourceSpan, SyntaxErrorKind};
use crate::namespaces::{self, Property};
use crate::parser;
use crate::program::{
    Builtin, DataField, Expr, FunctionDef, ImportKind, LoweredProgram, Namespace, Op, ScopeId, ScopeKind,
    SlotRef, Source,
};
use crate::value::Value;
use ta_engine::{FunctionSpec, OutputShape};

/// Transpile `source`, detecting its dialect.
pub fn transpile(source: &str) -> Result<LoweredProgram, SyntaxError> {
    transpile_with(source, Dialect::detect(source))
}

pub fn transpile_with(source: &str, dialect: Dialect) -> Result<LoweredProgram, SyntaxError> {
    let script = parser::parse(source, dialect)?;
    Transpiler::new(dialect).lower(&script)
}

struct Scope {
    id: ScopeId,
    names: BTreeMap<String, SlotRef>,
}

struct Transpiler {
    dialect: Dialect,
    scopes: Vec<Scope>,
    next_scope: usize,
    next_temp: usize,
    next_series: usize,
    next_param: usize,
    next_key: usize,
    loop_depth: usize,
    in_function: bool,
    arity: BTreeMap<String, usize>,
    functions: Vec<FunctionDef>,
    uses: BTreeMap<(ImportKind, String), Vec<Vec<ScopeId>>>,
    explicit: BTreeSet<(ImportKind, String)>,
}

fn err(kind: SyntaxErrorKind, message: impl Into<String>, span: SourceSpan) -> SyntaxError {
    SyntaxError::new(kind, message, span)
}

/// A destructured `ta.*` call must bind exactly as many names as it returns.
fn check_tuple_width(value: &ast::Expr, names: usize, span: SourceSpan) -> Result<(), SyntaxError> {
    let ast::Expr::Call { callee, .. } = value else {
        return Ok(());
    };
    let [ns, name] = callee.as_slice() else {
        return Ok(());
    };
    let Some(spec) = namespaces::signature(Namespace::Ta, name).filter(|_| ns == "ta") else {
        return Ok(());
    };
    let width = match spec.output {
        OutputShape::Tuple(n) => n,
        OutputShape::Number | OutputShape::Bool => 1,
    };
    if width == names {
        return Ok(());
    }
    Err(err(
        SyntaxErrorKind::ArityMismatch,
        format!("`ta.{name}` returns {width} values, {names} names are bound"),
        span,
    ))
}

fn is_simple(expr: &Expr) -> bool {
    match expr {
        Expr::Const(_) | Expr::Read(_) | Expr::Temp(_) => true,
        Expr::Get { offset, .. } => matches!(**offset, Expr::Const(_)),
        _ => false,
    }
}

impl Transpiler {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            scopes: vec![Scope {
                id: ScopeId::GLOBAL,
                names: BTreeMap::new(),
            }],
            next_scope: 1,
            next_temp: 0,
            next_series: 0,
            next_param: 0,
            next_key: 0,
            loop_depth: 0,
            in_function: false,
            arity: BTreeMap::new(),
            functions: Vec::new(),
            uses: BTreeMap::new(),
            explicit: BTreeSet::new(),
        }
    }

    fn lower(mut self, script: &ast::Script) -> Result<LoweredProgram, SyntaxError> {
        let mut body = Vec::new();
        for stmt in &script.body {
            self.statement(stmt, &mut body)?;
        }
        let mut program = LoweredProgram {
            dialect: script.dialect,
            version: script.version,
            functions: std::mem::take(&mut self.functions),
            body,
        };
        self.place_imports(&mut program);
        debug!(
            dialect = %program.dialect,
            ops = program.body.len(),
            functions = program.functions.len(),
            call_sites = self.next_key,
            scopes = self.next_scope,
            "transpiled script"
        );
        Ok(program)
    }

    // ---------- scopes -----------------------------------------------------

    fn open_scope(&mut self, kind: ScopeKind) -> ScopeId {
        let id = ScopeId {
            kind,
            id: self.next_scope,
        };
        self.next_scope += 1;
        self.scopes.push(Scope {
            id,
            names: BTreeMap::new(),
        });
        id
    }

    fn close_scope(&mut self) {
        self.scopes.pop();
    }

    fn current_scope(&self) -> ScopeId {
        self.scopes.last().map_or(ScopeId::GLOBAL, |s| s.id)
    }

    fn slot(&self, name: &str) -> SlotRef {
        if self.in_function {
            SlotRef::in_frame(self.current_scope(), name)
        } else {
            SlotRef::new(self.current_scope(), name)
        }
    }

    fn declare(&mut self, name: &str, span: SourceSpan) -> Result<SlotRef, SyntaxError> {
        let slot = self.slot(name);
        let scope = self
            .scopes
            .last_mut()
            .ok_or_else(|| err(SyntaxErrorKind::UnexpectedToken, "no open scope", span))?;
        if scope.names.contains_key(name) {
            return Err(err(
                SyntaxErrorKind::DuplicateDefinition,
                format!("`{name}` is already defined in this scope"),
                span,
            ));
        }
        scope.names.insert(name.to_string(), slot.clone());
        Ok(slot)
    }

    fn lookup(&self, name: &str) -> Option<&SlotRef> {
        self.scopes.iter().rev().find_map(|s| s.names.get(name))
    }

    fn use_import(&mut self, kind: ImportKind, name: &str) {
        let path = self.scopes.iter().map(|s| s.id).collect();
        self.uses.entry((kind, name.to_string())).or_default().push(path);
    }

    // ---------- counters ---------------------------------------------------

    fn temp(&mut self, value: Expr, out: &mut Vec<Op>) -> Expr {
        let id = self.next_temp;
        self.next_temp += 1;
        out.push(Op::Temp { id, value });
        Expr::Temp(id)
    }

    fn param(&mut self, arg: Expr) -> Expr {
        let id = format!("p{}", self.next_param);
        self.next_param += 1;
        Expr::Param {
            id,
            arg: Box::new(arg),
        }
    }

    fn key(&mut self, namespace: &str, name: &str) -> String {
        let key = format!("{namespace}.{name}#{}", self.next_key);
        self.next_key += 1;
        key
    }

    /// Hoist `value` into a hidden series slot of the current scope so a
    /// lookback into it reads real history.
    fn hidden_series(&mut self, value: Expr, out: &mut Vec<Op>) -> SlotRef {
        let slot = self.slot(&format!("$s{}", self.next_series));
        self.next_series += 1;
        out.push(Op::Init {
            slot: slot.clone(),
            value,
            persistent: false,
        });
        slot
    }

    // ---------- statements -------------------------------------------------

    fn block(&mut self, stmts: &[Stmt]) -> Result<Vec<Op>, SyntaxError> {
        let mut ops = Vec::new();
        for stmt in stmts {
            self.statement(stmt, &mut ops)?;
        }
        Ok(ops)
    }

    fn statement(&mut self, stmt: &Stmt, out: &mut Vec<Op>) -> Result<(), SyntaxError> {
        match stmt {
            Stmt::Decl {
                name,
                value,
                persistent,
                span,
            } => {
                let value = self.expr(value, out)?;
                let slot = self.declare(name, *span)?;
                out.push(Op::Init {
                    slot,
                    value,
                    persistent: *persistent,
                });
            }
            Stmt::Assign { name, op, value, span } => {
                let slot = self.lookup(name).cloned().ok_or_else(|| {
                    err(
                        SyntaxErrorKind::UndeclaredIdentifier,
                        format!("cannot assign to undeclared variable `{name}`"),
                        *span,
                    )
                })?;
                if self.in_function && !slot.framed {
                    return Err(err(
                        SyntaxErrorKind::InvalidAssignment,
                        format!("cannot modify global variable `{name}` inside a function"),
                        *span,
                    ));
                }
                let value = self.expr(value, out)?;
                let value = match op.binary() {
                    Some(bin) => Expr::Binary {
                        op: bin,
                        left: Box::new(Expr::Read(Source::Slot(slot.clone()))),
                        right: Box::new(value),
                    },
                    None => value,
                };
                out.push(Op::Set { slot, value });
            }
            Stmt::TupleDecl { names, value, span } => {
                check_tuple_width(value, names.len(), *span)?;
                let value = self.expr(value, out)?;
                let tuple = self.temp(value, out);
                for (index, name) in names.iter().enumerate() {
                    let slot = self.declare(name, *span)?;
                    out.push(Op::Init {
                        slot,
                        value: Expr::Element {
                            tuple: Box::new(tuple.clone()),
                            index,
                        },
                        persistent: false,
                    });
                }
            }
            Stmt::Import { from, names, span } => {
                let kind = match from {
                    ImportFrom::Data => ImportKind::Data,
                    ImportFrom::Pine => ImportKind::Pine,
                };
                for name in names {
                    let known = match kind {
                        ImportKind::Data => DataField::from_name(name).is_some(),
                        _ => Namespace::from_name(name).is_some() || namespaces::CORE_FUNCTIONS.contains(&name.as_str()),
                    };
                    if !known {
                        let (code, what) = match kind {
                            ImportKind::Data => (SyntaxErrorKind::UndeclaredIdentifier, "data field"),
                            _ => (SyntaxErrorKind::UnknownNamespace, "namespace"),
                        };
                        return Err(err(code, format!("unknown {what} `{name}`"), *span));
                    }
                    self.explicit.insert((kind, name.clone()));
                }
                out.push(Op::Import {
                    kind,
                    names: names.clone(),
                });
            }
            Stmt::If {
                cond,
                then,
                otherwise,
                ..
            } => {
                let cond = self.expr(cond, out)?;
                let then_scope = self.open_scope(ScopeKind::Conditional);
                let then = self.block(then);
                self.close_scope();
                let then = then?;
                let (else_scope, otherwise) = if otherwise.is_empty() {
                    (None, Vec::new())
                } else {
                    let scope = self.open_scope(ScopeKind::Conditional);
                    let ops = self.block(otherwise);
                    self.close_scope();
                    (Some(scope), ops?)
                };
                out.push(Op::If {
                    cond,
                    then_scope,
                    then,
                    else_scope,
                    otherwise,
                });
            }
            Stmt::For {
                var,
                from,
                to,
                step,
                inclusive,
                body,
                span,
            } => {
                let from = self.expr(from, out)?;
                let to = self.expr(to, out)?;
                let step = step.as_ref().map(|s| self.expr(s, out)).transpose()?;
                let scope = self.open_scope(ScopeKind::Loop);
                let result = self.declare(var, *span).and_then(|counter| {
                    self.loop_depth += 1;
                    let body = self.block(body);
                    self.loop_depth -= 1;
                    Ok((counter, body?))
                });
                self.close_scope();
                let (counter, body) = result?;
                out.push(Op::For {
                    scope,
                    counter,
                    from,
                    to,
                    step,
                    inclusive: *inclusive,
                    body,
                });
            }
            Stmt::While { cond, body, .. } => {
                let cond = self.lazy(cond)?;
                let scope = self.open_scope(ScopeKind::Loop);
                self.loop_depth += 1;
                let body = self.block(body);
                self.loop_depth -= 1;
                self.close_scope();
                out.push(Op::While {
                    scope,
                    cond,
                    body: body?,
                });
            }
            Stmt::Break(span) | Stmt::Continue(span) => {
                let is_break = matches!(stmt, Stmt::Break(_));
                if self.loop_depth == 0 {
                    let word = if is_break { "break" } else { "continue" };
                    return Err(err(
                        SyntaxErrorKind::UnsupportedConstruct,
                        format!("`{word}` outside of a loop"),
                        *span,
                    ));
                }
                out.push(if is_break { Op::Break } else { Op::Continue });
            }
            Stmt::FnDef {
                name,
                params,
                body,
                span,
            } => self.function(name, params, body, *span)?,
            Stmt::Return { value, span } => {
                if !self.in_function && self.dialect == Dialect::Pine {
                    return Err(err(
                        SyntaxErrorKind::UnsupportedConstruct,
                        "`return` outside of a function",
                        *span,
                    ));
                }
                let value = value.as_ref().map(|v| self.expr(v, out)).transpose()?;
                out.push(Op::Return(value));
            }
            Stmt::Expr(expr, _) => {
                let expr = self.expr(expr, out)?;
                out.push(Op::Eval(expr));
            }
        }
        Ok(())
    }

    fn function(&mut self, name: &str, params: &[String], body: &[Stmt], span: SourceSpan) -> Result<(), SyntaxError> {
        if self.in_function || self.scopes.len() != 1 {
            return Err(err(
                SyntaxErrorKind::UnsupportedConstruct,
                "functions must be declared at the top level",
                span,
            ));
        }
        if self.arity.contains_key(name) || self.lookup(name).is_some() {
            return Err(err(
                SyntaxErrorKind::DuplicateDefinition,
                format!("`{name}` is already defined"),
                span,
            ));
        }
        let scope = self.open_scope(ScopeKind::Function);
        self.in_function = true;
        let depth = std::mem::take(&mut self.loop_depth);
        let result = params
            .iter()
            .map(|p| self.declare(p, span))
            .collect::<Result<Vec<_>, _>>()
            .and_then(|slots| Ok((slots, self.block(body)?)));
        self.loop_depth = depth;
        self.in_function = false;
        self.close_scope();
        let (params, body) = result?;
        self.arity.insert(name.to_string(), params.len());
        self.functions.push(FunctionDef {
            name: name.to_string(),
            scope,
            params,
            body,
        });
        Ok(())
    }

    // ---------- expressions ------------------------------------------------

    /// Lower `expr` so that anything it hoists stays inside the returned
    /// expression and only runs when that expression is evaluated.
    fn lazy(&mut self, expr: &ast::Expr) -> Result<Expr, SyntaxError> {
        let mut ops = Vec::new();
        let value = self.expr(expr, &mut ops)?;
        if ops.is_empty() {
            Ok(value)
        } else {
            Ok(Expr::Block {
                ops,
                value: Box::new(value),
            })
        }
    }

    /// Call argument: compound values are hoisted into temporaries.
    fn argument(&mut self, arg: &ast::Expr, out: &mut Vec<Op>) -> Result<Expr, SyntaxError> {
        let lowered = self.expr(arg, out)?;
        if is_simple(&lowered) {
            Ok(lowered)
        } else {
            Ok(self.temp(lowered, out))
        }
    }

    fn expr(&mut self, expr: &ast::Expr, out: &mut Vec<Op>) -> Result<Expr, SyntaxError> {
        match expr {
            ast::Expr::Number(n) => Ok(Expr::Const(Value::num(*n))),
            ast::Expr::Bool(b) => Ok(Expr::Const(Value::Bool(*b))),
            ast::Expr::Str(s) => Ok(Expr::Const(Value::Str(s.clone()))),
            ast::Expr::Path { parts, span } => self.path(parts, *span, out),
            ast::Expr::Index { target, offset, .. } => {
                let source = self.series_source(target)?;
                let source = match source {
                    Some(source) => source,
                    None if self.dialect == Dialect::Host && matches!(**target, ast::Expr::List(_)) => {
                        let array = self.expr(target, out)?;
                        let offset = self.expr(offset, out)?;
                        return Ok(Expr::ArrayGet {
                            array: Box::new(array),
                            offset: Box::new(offset),
                        });
                    }
                    None => {
                        let value = self.expr(target, out)?;
                        Source::Slot(self.hidden_series(value, out))
                    }
                };
                let offset = self.expr(offset, out)?;
                Ok(Expr::Get {
                    source,
                    offset: Box::new(offset),
                })
            }
            ast::Expr::Call { callee, args, span } => self.call(callee, args, *span, out),
            ast::Expr::Unary { op, expr } => Ok(Expr::Unary {
                op: *op,
                expr: Box::new(self.expr(expr, out)?),
            }),
            ast::Expr::Binary { op, left, right } => {
                let left = self.expr(left, out)?;
                let right = match op {
                    ast::BinaryOp::And | ast::BinaryOp::Or => self.lazy(right)?,
                    _ => self.expr(right, out)?,
                };
                Ok(Expr::Binary {
                    op: *op,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            ast::Expr::Ternary { cond, then, otherwise } => Ok(Expr::Ternary {
                cond: Box::new(self.expr(cond, out)?),
                then: Box::new(self.lazy(then)?),
                otherwise: Box::new(self.lazy(otherwise)?),
            }),
            ast::Expr::List(items) => {
                let items = items
                    .iter()
                    .map(|item| self.expr(item, out))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(match self.dialect {
                    Dialect::Pine => Expr::Tuple(items),
                    Dialect::Host => Expr::Call {
                        target: Builtin {
                            namespace: Namespace::Array,
                            name: "from".to_string(),
                        },
                        args: items,
                        named: Vec::new(),
                        key: None,
                    },
                })
            }
            ast::Expr::Object(fields) => {
                let fields = fields
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), self.expr(value, out)?)))
                    .collect::<Result<Vec<_>, SyntaxError>>()?;
                Ok(Expr::Object(fields))
            }
        }
    }

    /// Split an explicit `context.data.` / `context.pine.` prefix off a
    /// host-dialect path.
    fn strip_context<'a>(
        &self,
        parts: &'a [String],
        span: SourceSpan,
    ) -> Result<(Option<ImportKind>, &'a [String]), SyntaxError> {
        if self.dialect != Dialect::Host || parts.first().map(String::as_str) != Some("context") {
            return Ok((None, parts));
        }
        let kind = match parts.get(1).map(String::as_str) {
            Some("data") => ImportKind::Data,
            Some("pine") => ImportKind::Pine,
            _ => {
                return Err(err(
                    SyntaxErrorKind::UnknownNamespace,
                    "only `context.data` and `context.pine` are available",
                    span,
                ))
            }
        };
        if parts.len() < 3 {
            return Err(err(
                SyntaxErrorKind::UnsupportedConstruct,
                "expected a field after the context namespace",
                span,
            ));
        }
        Ok((Some(kind), &parts[2..]))
    }

    /// Series a lookback can thread its offset through directly.
    fn series_source(&mut self, target: &ast::Expr) -> Result<Option<Source>, SyntaxError> {
        let ast::Expr::Path { parts, span } = target else {
            return Ok(None);
        };
        let (forced, parts) = self.strip_context(parts, *span)?;
        let [name] = parts else {
            return Ok(None);
        };
        if forced.is_none() {
            if let Some(slot) = self.lookup(name) {
                return Ok(Some(Source::Slot(slot.clone())));
            }
        }
        if forced != Some(ImportKind::Pine) {
            if let Some(field) = DataField::from_name(name) {
                if forced.is_none() {
                    self.use_import(ImportKind::Data, name);
                }
                return Ok(Some(Source::Data(field)));
            }
        }
        Ok(None)
    }

    fn path(&mut self, parts: &[String], span: SourceSpan, out: &mut Vec<Op>) -> Result<Expr, SyntaxError> {
        let (forced, parts) = self.strip_context(parts, span)?;
        if forced == Some(ImportKind::Data) {
            return match parts {
                [name] => DataField::from_name(name)
                    .map(|f| Expr::Read(Source::Data(f)))
                    .ok_or_else(|| {
                        err(
                            SyntaxErrorKind::UndeclaredIdentifier,
                            format!("unknown data field `{name}`"),
                            span,
                        )
                    }),
                _ => Err(err(SyntaxErrorKind::UnsupportedConstruct, "nested data access", span)),
            };
        }
        match parts {
            [name] => {
                if forced.is_none() {
                    if let Some(slot) = self.lookup(name) {
                        return Ok(Expr::Read(Source::Slot(slot.clone())));
                    }
                    if let Some(field) = DataField::from_name(name) {
                        self.use_import(ImportKind::Data, name);
                        return Ok(Expr::Read(Source::Data(field)));
                    }
                    if name == "na" {
                        self.use_import(ImportKind::Core, name);
                        return Ok(Expr::Const(Value::Na));
                    }
                }
                if Namespace::from_name(name).is_some() || self.arity.contains_key(name.as_str()) {
                    return Err(err(
                        SyntaxErrorKind::UnsupportedConstruct,
                        format!("`{name}` cannot be used as a value"),
                        span,
                    ));
                }
                Err(err(
                    SyntaxErrorKind::UndeclaredIdentifier,
                    format!("`{name}` is not declared"),
                    span,
                ))
            }
            [ns, name] => {
                let namespace = self.namespace(ns, forced, span)?;
                match namespaces::property(namespace, name) {
                    Some(Property::Constant(v)) => Ok(Expr::Const(Value::num(v))),
                    Some(Property::Color(hex)) => Ok(Expr::Const(Value::Str(hex.to_string()))),
                    Some(Property::Call) => self.builtin(namespace, name, &[], span, out),
                    None if namespaces::has_function(namespace, name) => Err(err(
                        SyntaxErrorKind::ArityMismatch,
                        format!("`{ns}.{name}` must be called with arguments"),
                        span,
                    )),
                    None => Err(err(
                        SyntaxErrorKind::UnknownFunction,
                        format!("`{ns}.{name}` does not exist"),
                        span,
                    )),
                }
            }
            _ => Err(err(
                SyntaxErrorKind::UnknownNamespace,
                format!("cannot resolve `{}`", parts.join(".")),
                span,
            )),
        }
    }

    fn namespace(&mut self, name: &str, forced: Option<ImportKind>, span: SourceSpan) -> Result<Namespace, SyntaxError> {
        if forced.is_none() && self.lookup(name).is_some() {
            return Err(err(
                SyntaxErrorKind::UnsupportedConstruct,
                format!("`{name}` has no fields"),
                span,
            ));
        }
        let ns = Namespace::from_name(name).ok_or_else(|| {
            err(
                SyntaxErrorKind::UnknownNamespace,
                format!("unknown namespace `{name}`"),
                span,
            )
        })?;
        if forced.is_none() {
            self.use_import(ImportKind::Pine, name);
        }
        Ok(ns)
    }

    fn call(&mut self, callee: &[String], args: &[Arg], span: SourceSpan, out: &mut Vec<Op>) -> Result<Expr, SyntaxError> {
        let (forced, parts) = self.strip_context(callee, span)?;
        if forced == Some(ImportKind::Data) {
            return Err(err(
                SyntaxErrorKind::UnsupportedConstruct,
                "data fields are not callable",
                span,
            ));
        }
        match parts {
            [name] if forced.is_none() => {
                if let Some(&arity) = self.arity.get(name.as_str()) {
                    return self.user_call(name, arity, args, span, out);
                }
                if namespaces::CORE_FUNCTIONS.contains(&name.as_str()) {
                    self.use_import(ImportKind::Core, name);
                    return self.builtin(Namespace::Core, name, args, span, out);
                }
                Err(err(
                    SyntaxErrorKind::UnknownFunction,
                    format!("function `{name}` is not defined"),
                    span,
                ))
            }
            [ns, name] => {
                let namespace = self.namespace(ns, forced, span)?;
                if !namespaces::has_function(namespace, name) {
                    return Err(err(
                        SyntaxErrorKind::UnknownFunction,
                        format!("`{ns}.{name}` does not exist"),
                        span,
                    ));
                }
                self.builtin(namespace, name, args, span, out)
            }
            _ => Err(err(
                SyntaxErrorKind::UnknownNamespace,
                format!("cannot resolve `{}`", parts.join(".")),
                span,
            )),
        }
    }

    fn user_call(
        &mut self,
        name: &str,
        arity: usize,
        args: &[Arg],
        span: SourceSpan,
        out: &mut Vec<Op>,
    ) -> Result<Expr, SyntaxError> {
        if args.iter().any(|a| a.name.is_some()) {
            return Err(err(
                SyntaxErrorKind::UnsupportedConstruct,
                "user functions take positional arguments only",
                span,
            ));
        }
        if args.len() != arity {
            return Err(err(
                SyntaxErrorKind::ArityMismatch,
                format!("`{name}` expects {arity} arguments, got {}", args.len()),
                span,
            ));
        }
        let key = self.key("user", name);
        let args = args
            .iter()
            .map(|a| self.argument(&a.value, out))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Expr::UserCall {
            name: name.to_string(),
            args,
            key,
        })
    }

    fn builtin(
        &mut self,
        namespace: Namespace,
        name: &str,
        args: &[Arg],
        span: SourceSpan,
        out: &mut Vec<Op>,
    ) -> Result<Expr, SyntaxError> {
        let key = namespaces::is_stateful(namespace, name).then(|| self.key(namespace.name(), name));
        let capture = namespaces::captures_params(namespace, name);

        let (positional, named): (Vec<Option<&ast::Expr>>, Vec<&Arg>) = match namespaces::signature(namespace, name) {
            Some(spec) => (reorder(spec, args, span)?, Vec::new()),
            None => (
                args.iter().filter(|a| a.name.is_none()).map(|a| Some(&a.value)).collect(),
                args.iter().filter(|a| a.name.is_some()).collect(),
            ),
        };

        let mut lowered = Vec::with_capacity(positional.len());
        for arg in positional {
            let value = match arg {
                Some(a) => self.argument(a, out)?,
                None => Expr::Const(Value::Na),
            };
            lowered.push(if capture { self.param(value) } else { value });
        }
        let mut named_lowered = Vec::with_capacity(named.len());
        for arg in named {
            let value = self.argument(&arg.value, out)?;
            named_lowered.push((arg.name.clone().unwrap_or_default(), value));
        }
        Ok(Expr::Call {
            target: Builtin {
                namespace,
                name: name.to_string(),
            },
            args: lowered,
            named: named_lowered,
            key,
        })
    }

    // ---------- import placement -------------------------------------------

    fn place_imports(&self, program: &mut LoweredProgram) {
        let mut by_scope: BTreeMap<ScopeId, BTreeMap<ImportKind, Vec<String>>> = BTreeMap::new();
        for ((kind, name), paths) in &self.uses {
            if self.explicit.contains(&(*kind, name.clone())) {
                continue;
            }
            by_scope
                .entry(common_scope(paths))
                .or_default()
                .entry(*kind)
                .or_default()
                .push(name.clone());
        }
        for (scope, kinds) in by_scope {
            let imports: Vec<Op> = kinds
                .into_iter()
                .map(|(kind, names)| Op::Import { kind, names })
                .collect();
            let function = program.functions.iter().position(|f| f.scope == scope);
            let target = match function {
                _ if scope == ScopeId::GLOBAL => Some(&mut program.body),
                Some(i) => Some(&mut program.functions[i].body),
                None => {
                    let in_functions = program
                        .functions
                        .iter_mut()
                        .find_map(|f| scope_ops(&mut f.body, scope));
                    match in_functions {
                        Some(ops) => Some(ops),
                        None => scope_ops(&mut program.body, scope),
                    }
                }
            };
            if let Some(ops) = target {
                let rest = std::mem::replace(ops, imports);
                ops.extend(rest);
            }
        }
    }
}

/// Positional argument list for a catalog function, with named arguments
/// moved to their parameter position and gaps left as `None`.
fn reorder<'a>(spec: &FunctionSpec, args: &'a [Arg], span: SourceSpan) -> Result<Vec<Option<&'a ast::Expr>>, SyntaxError> {
    let mut slots: Vec<Option<&ast::Expr>> = Vec::new();
    let mut seen_named = false;
    for arg in args {
        match &arg.name {
            None if seen_named => {
                return Err(err(
                    SyntaxErrorKind::ArityMismatch,
                    "positional argument after a named one",
                    span,
                ))
            }
            None => slots.push(Some(&arg.value)),
            Some(name) => {
                seen_named = true;
                let idx = spec.param_index(name).ok_or_else(|| {
                    err(
                        SyntaxErrorKind::ArityMismatch,
                        format!("`{}` has no parameter `{name}`", spec.name),
                        span,
                    )
                })?;
                if slots.len() <= idx {
                    slots.resize(idx + 1, None);
                }
                if slots[idx].is_some() {
                    return Err(err(
                        SyntaxErrorKind::ArityMismatch,
                        format!("parameter `{name}` given twice"),
                        span,
                    ));
                }
                slots[idx] = Some(&arg.value);
            }
        }
    }
    if slots.len() > spec.params.len() {
        return Err(err(
            SyntaxErrorKind::ArityMismatch,
            format!("`{}` takes at most {} arguments", spec.name, spec.params.len()),
            span,
        ));
    }
    let missing = (0..spec.required).any(|i| slots.get(i).map_or(true, Option::is_none));
    if missing {
        return Err(err(
            SyntaxErrorKind::ArityMismatch,
            format!("`{}` requires {} arguments", spec.name, spec.required),
            span,
        ));
    }
    Ok(slots)
}

/// Deepest scope shared by every use path.
fn common_scope(paths: &[Vec<ScopeId>]) -> ScopeId {
    let Some(first) = paths.first() else {
        return ScopeId::GLOBAL;
    };
    let mut len = first.len();
    for path in &paths[1..] {
        len = len.min(first.iter().zip(path).take_while(|(a, b)| a == b).count());
    }
    first[..len].last().copied().unwrap_or(ScopeId::GLOBAL)
}

fn scope_ops(ops: &mut [Op], scope: ScopeId) -> Option<&mut Vec<Op>> {
    for op in ops.iter_mut() {
        let found = match op {
            Op::If {
                then_scope,
                then,
                else_scope,
                otherwise,
                ..
            } => {
                if *then_scope == scope {
                    return Some(then);
                }
                if *else_scope == Some(scope) {
                    return Some(otherwise);
                }
                match scope_ops(then, scope) {
                    Some(ops) => Some(ops),
                    None => scope_ops(otherwise, scope),
                }
            }
            Op::For { scope: s, body, .. } | Op::While { scope: s, body, .. } => {
                if *s == scope {
                    return Some(body);
                }
                scope_ops(body, scope)
            }
            _ => None,
        };
        if found.is_some() {
            return found;
        }
    }
    None
}
