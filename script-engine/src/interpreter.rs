//! Tree-walking evaluator for lowered programs.
//!
//! One call to [`run_pass`] evaluates the whole program over the context's
//! current bar. Calling it again on the same bar is a re-tick: every slot and
//! indicator state it touches starts from the last committed value.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use ta_engine::{Lookback, Output};
use tracing::trace;

use crate::ast::{BinaryOp, UnaryOp};
use crate::builtins;
use crate::context::{CallSite, Context, DataView, SlotView};
use crate::error::RuntimeError;
use crate::language::Dialect;
use crate::namespaces;
use crate::program::{DataField, Expr, LoweredProgram, Namespace, Op, SlotRef, Source};
use crate::value::Value;

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Option<Value>),
}

/// Locals of one activation. `path` is empty at the top level and is the
/// chain of call-site keys inside user functions.
struct Frame {
    path: String,
    temps: HashMap<usize, Value>,
    depth: usize,
}

impl Frame {
    fn top() -> Self {
        Self {
            path: String::new(),
            temps: HashMap::new(),
            depth: 0,
        }
    }

    fn scoped(&self, id: &str) -> String {
        if self.path.is_empty() {
            id.to_string()
        } else {
            format!("{}/{id}", self.path)
        }
    }
}

/// Where an indicator argument's history lives.
enum Handle {
    Scope(String, usize),
    Param(String),
    Data(DataField, usize),
    Scalar(f64),
}

enum ArgView<'a> {
    Slot(SlotView<'a>),
    Data(DataView<'a>),
    Scalar(f64),
}

impl Lookback for ArgView<'_> {
    fn at(&self, offset: usize) -> f64 {
        match self {
            ArgView::Slot(v) => v.at(offset),
            ArgView::Data(v) => v.at(offset),
            ArgView::Scalar(v) => v.at(offset),
        }
    }

    fn depth(&self) -> usize {
        match self {
            ArgView::Slot(v) => v.depth(),
            ArgView::Data(v) => v.depth(),
            ArgView::Scalar(v) => v.depth(),
        }
    }
}

/// Evaluate `program` once over the context's current bar.
pub fn run_pass(program: &LoweredProgram, ctx: &mut Context) -> Result<(), RuntimeError> {
    ctx.begin_pass();
    trace!(bar = ctx.bar_index(), pass = ctx.pass(), "evaluation pass");
    let mut frame = Frame::top();
    let mut exec = Executor { program, ctx };
    match exec.ops(&program.body, &mut frame)? {
        Flow::Normal | Flow::Return(None) => Ok(()),
        Flow::Return(Some(value)) => {
            exec.ctx.record_result("result", value);
            Ok(())
        }
        Flow::Break => Err(RuntimeError::StrayControl("break")),
        Flow::Continue => Err(RuntimeError::StrayControl("continue")),
    }
}

struct Executor<'p, 'c> {
    program: &'p LoweredProgram,
    ctx: &'c mut Context,
}

impl<'p> Executor<'p, '_> {
    fn ops(&mut self, ops: &[Op], frame: &mut Frame) -> Result<Flow, RuntimeError> {
        for op in ops {
            match self.op(op, frame)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn op(&mut self, op: &Op, frame: &mut Frame) -> Result<Flow, RuntimeError> {
        match op {
            Op::Import { .. } => {}
            Op::Init {
                slot,
                value,
                persistent,
            } => {
                let value = self.expr(value, frame)?.scalar();
                let key = slot.key(&frame.path);
                if *persistent {
                    self.ctx.init_var(&key, value);
                } else {
                    self.ctx.init(&key, value);
                }
            }
            Op::Set { slot, value } => {
                let value = self.expr(value, frame)?.scalar();
                self.ctx.set(&slot.key(&frame.path), value);
            }
            Op::Temp { id, value } => {
                let value = self.expr(value, frame)?;
                frame.temps.insert(*id, value);
            }
            Op::If {
                cond,
                then,
                otherwise,
                ..
            } => {
                let branch = if self.expr(cond, frame)?.truthy() { then } else { otherwise };
                return self.ops(branch, frame);
            }
            Op::For {
                counter,
                from,
                to,
                step,
                inclusive,
                body,
                ..
            } => return self.counted(counter, from, to, step.as_ref(), *inclusive, body, frame),
            Op::While { cond, body, .. } => {
                let limit = self.ctx.options().max_loop_iterations;
                let mut iterations = 0;
                while self.expr(cond, frame)?.truthy() {
                    iterations += 1;
                    if iterations > limit {
                        return Err(RuntimeError::LoopLimit { limit });
                    }
                    match self.ops(body, frame)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Op::Break => return Ok(Flow::Break),
            Op::Continue => return Ok(Flow::Continue),
            Op::Eval(expr) => {
                self.expr(expr, frame)?;
            }
            Op::Return(value) => {
                // A top-level object return names one result series per field.
                if let (0, Some(Expr::Object(fields))) = (frame.depth, value) {
                    for (name, expr) in fields {
                        let v = self.expr(expr, frame)?;
                        self.ctx.record_result(name, v);
                    }
                    return Ok(Flow::Return(None));
                }
                let value = match value {
                    Some(expr) => Some(self.expr(expr, frame)?),
                    None => None,
                };
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    #[allow(clippy::too_many_arguments)]
    fn counted(
        &mut self,
        counter: &SlotRef,
        from: &Expr,
        to: &Expr,
        step: Option<&Expr>,
        inclusive: bool,
        body: &[Op],
        frame: &mut Frame,
    ) -> Result<Flow, RuntimeError> {
        let from = self.expr(from, frame)?.as_f64();
        let to = self.expr(to, frame)?.as_f64();
        let step = match step {
            Some(s) => Some(self.expr(s, frame)?.as_f64()),
            None => None,
        };
        if from.is_nan() || to.is_nan() || step.is_some_and(f64::is_nan) {
            return Ok(Flow::Normal);
        }
        // Host loops carry a signed step; pine picks the direction from the bounds.
        let step = match (self.program.dialect, step) {
            (Dialect::Host, Some(s)) => s,
            (_, s) => {
                let magnitude = s.map_or(1.0, f64::abs);
                if to < from {
                    -magnitude
                } else {
                    magnitude
                }
            }
        };
        let key = counter.key(&frame.path);
        let limit = self.ctx.options().max_loop_iterations;
        let mut i = from;
        let mut iterations = 0;
        while in_range(i, to, step, inclusive) {
            iterations += 1;
            if iterations > limit {
                return Err(RuntimeError::LoopLimit { limit });
            }
            self.ctx.init(&key, Value::num(i));
            match self.ops(body, frame)? {
                Flow::Break => break,
                Flow::Return(v) => return Ok(Flow::Return(v)),
                Flow::Normal | Flow::Continue => {}
            }
            i += step;
        }
        Ok(Flow::Normal)
    }

    fn expr(&mut self, expr: &Expr, frame: &mut Frame) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Const(v) => Ok(v.clone()),
            Expr::Read(source) => Ok(self.read(source, 0, frame)),
            Expr::Get { source, offset } => {
                let offset = self.expr(offset, frame)?;
                Ok(match lookback(&offset) {
                    Some(n) => self.read(source, n, frame),
                    None => Value::Na,
                })
            }
            Expr::Temp(id) => frame.temps.get(id).cloned().ok_or(RuntimeError::UnboundTemp(*id)),
            Expr::Param { id, arg } => self.param(id, arg, frame),
            Expr::Call {
                target,
                args,
                named,
                key,
            } => self.call(target.namespace, &target.name, args, named, key.as_deref(), frame),
            Expr::UserCall { name, args, key } => self.user_call(name, args, key, frame),
            Expr::Unary { op, expr } => {
                let v = self.expr(expr, frame)?;
                Ok(match op {
                    UnaryOp::Neg => Value::num(-v.as_f64()),
                    UnaryOp::Not => Value::Bool(!v.truthy()),
                })
            }
            Expr::Binary { op, left, right } => {
                let l = self.expr(left, frame)?;
                match op {
                    BinaryOp::And if !l.truthy() => Ok(Value::Bool(false)),
                    BinaryOp::Or if l.truthy() => Ok(Value::Bool(true)),
                    BinaryOp::And | BinaryOp::Or => Ok(Value::Bool(self.expr(right, frame)?.truthy())),
                    op => {
                        let r = self.expr(right, frame)?;
                        Ok(binary(*op, &l, &r))
                    }
                }
            }
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                if self.expr(cond, frame)?.truthy() {
                    self.expr(then, frame)
                } else {
                    self.expr(otherwise, frame)
                }
            }
            Expr::Tuple(items) => Ok(Value::Tuple(self.values(items, frame)?)),
            Expr::Object(fields) => {
                let mut values = Vec::with_capacity(fields.len());
                for (_, e) in fields {
                    values.push(self.expr(e, frame)?);
                }
                Ok(Value::Tuple(values))
            }
            Expr::Element { tuple, index } => Ok(match self.expr(tuple, frame)? {
                Value::Tuple(items) => items.into_iter().nth(*index).unwrap_or_default(),
                other if *index == 0 => other,
                _ => Value::Na,
            }),
            Expr::ArrayGet { array, offset } => {
                let array = self.expr(array, frame)?;
                let offset = self.expr(offset, frame)?;
                Ok(match (array, lookback(&offset)) {
                    (Value::Array(items) | Value::Tuple(items), Some(n)) => Value::from_end(&items, n),
                    _ => Value::Na,
                })
            }
            Expr::Block { ops, value } => match self.ops(ops, frame)? {
                Flow::Normal => self.expr(value, frame),
                Flow::Break => Err(RuntimeError::StrayControl("break")),
                Flow::Continue => Err(RuntimeError::StrayControl("continue")),
                Flow::Return(_) => Err(RuntimeError::StrayControl("return")),
            },
        }
    }

    fn values(&mut self, exprs: &[Expr], frame: &mut Frame) -> Result<Vec<Value>, RuntimeError> {
        exprs.iter().map(|e| self.expr(e, frame)).collect()
    }

    fn read(&mut self, source: &Source, offset: usize, frame: &Frame) -> Value {
        match source {
            Source::Slot(slot) => self.ctx.get(&slot.key(&frame.path), offset),
            Source::Data(field) => self.ctx.data(*field, offset),
        }
    }

    /// Evaluate and capture a parameter so indicators can read its history.
    /// Arrays are passed through without a history.
    fn param(&mut self, id: &str, arg: &Expr, frame: &mut Frame) -> Result<Value, RuntimeError> {
        let value = self.expr(arg, frame)?;
        if !matches!(value, Value::Array(_)) {
            self.ctx.param(&frame.scoped(id), value.clone());
        }
        Ok(value)
    }

    fn handle(&mut self, arg: &Expr, frame: &mut Frame) -> Result<Handle, RuntimeError> {
        let Expr::Param { id, arg } = arg else {
            return Ok(Handle::Scalar(self.expr(arg, frame)?.as_f64()));
        };
        match arg.as_ref() {
            Expr::Read(source) => return Ok(self.source_handle(source, Some(0), frame)),
            Expr::Get { source, offset } => {
                if let Expr::Const(v) = offset.as_ref() {
                    return Ok(self.source_handle(source, lookback(v), frame));
                }
            }
            _ => {}
        }
        self.param(id, arg, frame)?;
        Ok(Handle::Param(frame.scoped(id)))
    }

    fn source_handle(&mut self, source: &Source, offset: Option<usize>, frame: &Frame) -> Handle {
        let Some(offset) = offset else {
            return Handle::Scalar(f64::NAN);
        };
        match source {
            Source::Slot(slot) => {
                let key = slot.key(&frame.path);
                self.ctx.prepare_slot(&key);
                Handle::Scope(key, offset)
            }
            Source::Data(field) => Handle::Data(*field, offset),
        }
    }

    fn indicator(&mut self, name: &str, args: &[Expr], key: Option<&str>, frame: &mut Frame) -> Result<Value, RuntimeError> {
        let handles = args
            .iter()
            .map(|a| self.handle(a, frame))
            .collect::<Result<Vec<_>, _>>()?;
        let key = frame.scoped(key.unwrap_or(name));
        let CallSite {
            scopes,
            params,
            bar,
            bars,
            index,
            ta,
        } = self.ctx.call_site();
        let Some(bar) = bar else {
            return Ok(Value::Na);
        };
        let views: Vec<ArgView<'_>> = handles
            .iter()
            .map(|h| match h {
                Handle::Scope(k, offset) => ArgView::Slot(SlotView {
                    slot: scopes.get(k),
                    offset: *offset,
                }),
                Handle::Param(k) => ArgView::Slot(SlotView {
                    slot: params.get(k),
                    offset: 0,
                }),
                Handle::Data(field, offset) => ArgView::Data(DataView {
                    bars,
                    index,
                    field: *field,
                    offset: *offset,
                }),
                Handle::Scalar(v) => ArgView::Scalar(*v),
            })
            .collect();
        let refs: Vec<&dyn Lookback> = views.iter().map(|v| v as &dyn Lookback).collect();
        let out = ta.call(name, &key, index, bar, &refs)?;
        Ok(match out {
            Output::Number(v) => Value::num(v),
            Output::Bool(b) => Value::Bool(b),
            Output::Tuple(values) => Value::Tuple(values.into_iter().map(Value::num).collect()),
        })
    }

    fn call(
        &mut self,
        namespace: Namespace,
        name: &str,
        args: &[Expr],
        named: &[(String, Expr)],
        key: Option<&str>,
        frame: &mut Frame,
    ) -> Result<Value, RuntimeError> {
        match namespace {
            Namespace::Ta => self.indicator(name, args, key, frame),
            Namespace::Math if name == "sum" => self.indicator("sum", args, key, frame),
            Namespace::Math => builtins::math(name, &self.values(args, frame)?),
            Namespace::Array => self.array(name, args, frame),
            Namespace::Input => self.input(name, args, named, frame),
            Namespace::Color => builtins::color(name, &self.values(args, frame)?),
            Namespace::Syminfo => Ok(builtins::syminfo(name, self.ctx.symbol_info())),
            Namespace::Core => self.core(name, args, named, frame),
        }
    }

    fn array(&mut self, name: &str, args: &[Expr], frame: &mut Frame) -> Result<Value, RuntimeError> {
        if !namespaces::ARRAY_MUTATORS.contains(&name) {
            let values = self.values(args, frame)?;
            return builtins::array(name, &values);
        }
        let rest = self.values(args.get(1..).unwrap_or_default(), frame)?;
        match args.first().and_then(slot_target) {
            Some(slot) => {
                let key = slot.key(&frame.path);
                builtins::array_mut(name, self.ctx.slot_mut(&key), &rest)
            }
            None => {
                let mut target = match args.first() {
                    Some(e) => self.expr(e, frame)?,
                    None => Value::Na,
                };
                builtins::array_mut(name, &mut target, &rest)
            }
        }
    }

    /// Named argument `name`, else positional `index`.
    fn option(
        &mut self,
        args: &[Expr],
        index: usize,
        named: &[(String, Expr)],
        name: &str,
        frame: &mut Frame,
    ) -> Result<Option<Value>, RuntimeError> {
        let expr = named
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e)
            .or_else(|| args.get(index));
        match expr {
            Some(e) => Ok(Some(self.expr(e, frame)?)),
            None => Ok(None),
        }
    }

    fn input(&mut self, kind: &str, args: &[Expr], named: &[(String, Expr)], frame: &mut Frame) -> Result<Value, RuntimeError> {
        let default = self.option(args, 0, named, "defval", frame)?.unwrap_or_default();
        let title = self.option(args, 1, named, "title", frame)?;
        let overridden = title
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|t| self.ctx.inputs.get(t))
            .cloned();
        if kind == "source" {
            if let Some(field) = overridden.as_ref().and_then(Value::as_str).and_then(DataField::from_name) {
                return Ok(self.ctx.data(field, 0));
            }
        }
        Ok(builtins::input(kind, default, overridden.as_ref()))
    }

    fn core(&mut self, name: &str, args: &[Expr], named: &[(String, Expr)], frame: &mut Frame) -> Result<Value, RuntimeError> {
        match name {
            "plot" => {
                let value = self.option(args, 0, named, "series", frame)?.unwrap_or_default();
                let title = self.option(args, 1, named, "title", frame)?;
                let mut options = BTreeMap::new();
                for (option, expr) in named {
                    if option != "title" && option != "series" {
                        let v = self.expr(expr, frame)?;
                        options.insert(option.clone(), v);
                    }
                }
                if let Some(color) = args.get(2) {
                    let v = self.expr(color, frame)?;
                    options.entry("color".to_string()).or_insert(v);
                }
                let title = match title.as_ref().and_then(Value::as_str) {
                    Some(t) => t.to_string(),
                    None => self.ctx.next_plot_title(),
                };
                self.ctx.record_plot(&title, value, options);
                Ok(Value::Na)
            }
            "indicator" | "study" => {
                let title = self.option(args, 0, named, "title", frame)?;
                let short_title = self.option(args, 1, named, "shorttitle", frame)?;
                let overlay = self.option(args, 2, named, "overlay", frame)?;
                let metadata = &mut self.ctx.metadata;
                metadata.title = title.as_ref().and_then(Value::as_str).map(str::to_string);
                metadata.short_title = short_title.as_ref().and_then(Value::as_str).map(str::to_string);
                metadata.overlay = overlay.is_some_and(|v| v.truthy());
                Ok(Value::Na)
            }
            "nz" => {
                let value = self.option(args, 0, named, "source", frame)?.unwrap_or_default();
                if !value.is_na() {
                    return Ok(value);
                }
                Ok(self
                    .option(args, 1, named, "replacement", frame)?
                    .unwrap_or(Value::Num(0.0)))
            }
            "na" => {
                let value = self.option(args, 0, named, "x", frame)?.unwrap_or_default();
                Ok(Value::Bool(value.is_na()))
            }
            "fixnan" => self.fixnan(args, frame),
            "input" => self.input("input", args, named, frame),
            other => Err(RuntimeError::UnknownBuiltin(other.to_string())),
        }
    }

    /// Last non-`na` value of the argument's captured history.
    fn fixnan(&mut self, args: &[Expr], frame: &mut Frame) -> Result<Value, RuntimeError> {
        let Some(Expr::Param { id, arg }) = args.first() else {
            return match args.first() {
                Some(e) => self.expr(e, frame),
                None => Ok(Value::Na),
            };
        };
        let value = self.param(id, arg, frame)?;
        if !value.is_na() {
            return Ok(value);
        }
        let key = frame.scoped(id);
        let depth = self.ctx.params.get(&key).map_or(0, |s| s.depth());
        Ok((1..depth)
            .map(|n| self.ctx.param_history(&key, n))
            .find(|v| !v.is_na())
            .unwrap_or_default())
    }

    fn user_call(&mut self, name: &str, args: &[Expr], key: &str, frame: &mut Frame) -> Result<Value, RuntimeError> {
        let values = self.values(args, frame)?;
        let limit = self.ctx.options().max_call_depth;
        if frame.depth >= limit {
            return Err(RuntimeError::CallDepth { limit });
        }
        let program = self.program;
        let function = program
            .function(name)
            .ok_or_else(|| RuntimeError::UnknownFunction(name.to_string()))?;
        let mut callee = Frame {
            path: frame.scoped(key),
            temps: HashMap::new(),
            depth: frame.depth + 1,
        };
        for (param, value) in function.params.iter().zip(values) {
            self.ctx.init(&param.key(&callee.path), value);
        }
        match self.ops(&function.body, &mut callee)? {
            Flow::Return(value) => Ok(value.unwrap_or_default()),
            Flow::Normal => Ok(Value::Na),
            Flow::Break => Err(RuntimeError::StrayControl("break")),
            Flow::Continue => Err(RuntimeError::StrayControl("continue")),
        }
    }
}

/// Slot an array mutator writes back to.
fn slot_target(expr: &Expr) -> Option<&SlotRef> {
    match expr {
        Expr::Param { arg, .. } => slot_target(arg),
        Expr::Read(Source::Slot(slot)) => Some(slot),
        _ => None,
    }
}

fn lookback(offset: &Value) -> Option<usize> {
    let n = offset.as_f64();
    (n.is_finite() && n >= 0.0).then_some(n as usize)
}

fn in_range(i: f64, to: f64, step: f64, inclusive: bool) -> bool {
    match (step >= 0.0, inclusive) {
        (true, true) => i <= to,
        (true, false) => i < to,
        (false, true) => i >= to,
        (false, false) => i > to,
    }
}

fn plain(v: &Value) -> String {
    match v {
        Value::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

fn arith(l: &Value, r: &Value, f: impl Fn(f64, f64) -> f64) -> Value {
    Value::num(f(l.as_f64(), r.as_f64()))
}

fn equals(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Na, _) | (_, Value::Na) => false,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => {
            let (a, b) = (l.as_f64(), r.as_f64());
            !a.is_nan() && a == b
        }
    }
}

fn compare(l: &Value, r: &Value, accept: fn(Ordering) -> bool) -> Value {
    let ordering = match (l, r) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => l.as_f64().partial_cmp(&r.as_f64()),
    };
    Value::Bool(ordering.is_some_and(accept))
}

/// Binary operators over evaluated operands. Arithmetic with `na` is `na`;
/// every comparison involving `na` is false.
fn binary(op: BinaryOp, l: &Value, r: &Value) -> Value {
    match op {
        BinaryOp::Add => match (l, r) {
            (Value::Str(a), b) => Value::Str(format!("{a}{}", plain(b))),
            (a, Value::Str(b)) => Value::Str(format!("{}{b}", plain(a))),
            _ => arith(l, r, |a, b| a + b),
        },
        BinaryOp::Sub => arith(l, r, |a, b| a - b),
        BinaryOp::Mul => arith(l, r, |a, b| a * b),
        BinaryOp::Div => arith(l, r, |a, b| if b == 0.0 { f64::NAN } else { a / b }),
        BinaryOp::Mod => arith(l, r, |a, b| if b == 0.0 { f64::NAN } else { a % b }),
        BinaryOp::Eq => Value::Bool(equals(l, r)),
        BinaryOp::Ne => Value::Bool(!l.is_na() && !r.is_na() && !equals(l, r)),
        BinaryOp::Lt => compare(l, r, Ordering::is_lt),
        BinaryOp::Le => compare(l, r, Ordering::is_le),
        BinaryOp::Gt => compare(l, r, Ordering::is_gt),
        BinaryOp::Ge => compare(l, r, Ordering::is_ge),
        BinaryOp::And => Value::Bool(l.truthy() && r.truthy()),
        BinaryOp::Or => Value::Bool(l.truthy() || r.truthy()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextOptions;
    use crate::transpiler::transpile;
    use ts_core::Bar;

    fn bar(i: usize, close: f64) -> Bar {
        let t = i as i64 * 60_000;
        Bar {
            open_time: t,
            close_time: t + 59_999,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    fn run_with(source: &str, closes: &[f64], options: ContextOptions) -> Result<Context, RuntimeError> {
        let program = transpile(source).unwrap();
        let mut ctx = Context::new(options);
        for (i, &close) in closes.iter().enumerate() {
            ctx.push_bar(bar(i, close));
            run_pass(&program, &mut ctx)?;
        }
        Ok(ctx)
    }

    fn run(source: &str, closes: &[f64]) -> Context {
        run_with(source, closes, ContextOptions::default()).unwrap()
    }

    fn plot(ctx: &Context, title: &str) -> Vec<Value> {
        ctx.plots()[title].iter().map(|p| p.value.clone()).collect()
    }

    #[test]
    fn sma_plot() {
        let ctx = run("plot(ta.sma(close, 3))", &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(
            plot(&ctx, "plot1"),
            vec![Value::Na, Value::Na, Value::Num(2.0), Value::Num(3.0), Value::Num(4.0)]
        );
    }

    #[test]
    fn var_survives_bars_and_rolls_back_on_retick() {
        let program = transpile("var count = 0\ncount := count + 1\nplot(count)").unwrap();
        let mut ctx = Context::default();
        ctx.push_bar(bar(0, 1.0));
        run_pass(&program, &mut ctx).unwrap();
        ctx.push_bar(bar(1, 2.0));
        run_pass(&program, &mut ctx).unwrap();
        ctx.replace_last_bar(bar(1, 2.5));
        run_pass(&program, &mut ctx).unwrap();
        run_pass(&program, &mut ctx).unwrap();
        assert_eq!(plot(&ctx, "plot1"), vec![Value::Num(1.0), Value::Num(2.0)]);
    }

    #[test]
    fn retick_leaves_indicator_state_untouched() {
        let program = transpile("plot(ta.ema(close, 2))").unwrap();
        let mut ctx = Context::default();
        for (i, close) in [1.0, 2.0, 3.0].into_iter().enumerate() {
            ctx.push_bar(bar(i, close));
            run_pass(&program, &mut ctx).unwrap();
        }
        let settled = plot(&ctx, "plot1");
        ctx.replace_last_bar(bar(2, 10.0));
        run_pass(&program, &mut ctx).unwrap();
        ctx.replace_last_bar(bar(2, 3.0));
        run_pass(&program, &mut ctx).unwrap();
        assert_eq!(plot(&ctx, "plot1"), settled);
    }

    #[test]
    fn for_loop_accumulates() {
        let ctx = run("total = 0.0\nfor i = 1 to 3\n    total := total + i\nplot(total)", &[1.0]);
        assert_eq!(plot(&ctx, "plot1"), vec![Value::Num(6.0)]);
    }

    #[test]
    fn history_reference_reads_previous_bar() {
        let ctx = run("plot(close[1])", &[1.0, 2.0, 3.0]);
        assert_eq!(plot(&ctx, "plot1"), vec![Value::Na, Value::Num(1.0), Value::Num(2.0)]);
    }

    #[test]
    fn each_function_call_site_keeps_its_own_state() {
        let source = "f(x) =>\n    ta.sma(x, 2)\na = f(close)\nb = f(close * 2)\nplot(a, \"a\")\nplot(b, \"b\")";
        let ctx = run(source, &[1.0, 2.0, 3.0]);
        assert_eq!(plot(&ctx, "a"), vec![Value::Na, Value::Num(1.5), Value::Num(2.5)]);
        assert_eq!(plot(&ctx, "b"), vec![Value::Na, Value::Num(3.0), Value::Num(5.0)]);
    }

    #[test]
    fn runaway_loop_is_stopped() {
        let options = ContextOptions::default().with_max_loop_iterations(100);
        let err = run_with("x = 0\nwhile true\n    x := x + 1", &[1.0], options).unwrap_err();
        assert_eq!(err, RuntimeError::LoopLimit { limit: 100 });
    }

    #[test]
    fn host_object_return_names_results() {
        let source = "(context) => {\n  const { close } = context.data;\n  const { ta } = context.pine;\n  return { fast: ta.sma(close, 2), last: close };\n}";
        let ctx = run(source, &[1.0, 3.0]);
        let results = ctx.results();
        assert_eq!(results["fast"], vec![Value::Na, Value::Num(2.0)]);
        assert_eq!(results["last"], vec![Value::Num(1.0), Value::Num(3.0)]);
    }

    #[test]
    fn na_semantics_in_operators() {
        assert_eq!(binary(BinaryOp::Add, &Value::Na, &Value::Num(1.0)), Value::Na);
        assert_eq!(binary(BinaryOp::Gt, &Value::Na, &Value::Num(1.0)), Value::Bool(false));
        assert_eq!(binary(BinaryOp::Eq, &Value::Na, &Value::Na), Value::Bool(false));
        assert_eq!(binary(BinaryOp::Div, &Value::Num(1.0), &Value::Num(0.0)), Value::Na);
        assert_eq!(
            binary(BinaryOp::Add, &Value::from("n="), &Value::Num(2.0)),
            Value::from("n=2")
        );
    }

    #[test]
    fn fixnan_carries_last_value() {
        let ctx = run("x = close > 1 ? na : close\nplot(fixnan(x))", &[1.0, 2.0, 0.5]);
        assert_eq!(
            plot(&ctx, "plot1"),
            vec![Value::Num(1.0), Value::Num(1.0), Value::Num(0.5)]
        );
    }

    #[test]
    fn inputs_take_overrides_by_title() {
        let program = transpile("len = input.int(2, \"Length\")\nplot(ta.sma(close, len))").unwrap();
        let mut ctx = Context::default();
        ctx.set_inputs(BTreeMap::from([("Length".to_string(), Value::num(3.0))]));
        for (i, close) in [1.0, 2.0, 3.0].into_iter().enumerate() {
            ctx.push_bar(bar(i, close));
            run_pass(&program, &mut ctx).unwrap();
        }
        assert_eq!(plot(&ctx, "plot1"), vec![Value::Na, Value::Na, Value::Num(2.0)]);
    }

    #[test]
    fn var_array_grows_across_bars() {
        let source = "var a = array.new_float(0)\narray.push(a, close)\nplot(array.size(a))";
        let ctx = run(source, &[1.0, 2.0, 3.0]);
        assert_eq!(
            plot(&ctx, "plot1"),
            vec![Value::Num(1.0), Value::Num(2.0), Value::Num(3.0)]
        );
    }
}
