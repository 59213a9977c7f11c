//! Lowered program: the explicit, offset-aware, scope-tracked form a script
//! is transpiled into.
//!
//! Every variable reference names its [`SlotRef`] (scope kind, scope
//! instance id, name), every lookback is an explicit [`Expr::Get`], and every
//! stateful call carries its call-site key. Rendering (`Display`) and
//! serialization are both deterministic so a program can be stored and
//! reloaded without disturbing state continuity.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};

use crate::ast::{BinaryOp, UnaryOp};
use crate::language::Dialect;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScopeKind {
    Global,
    Conditional,
    Loop,
    Function,
}

impl ScopeKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            ScopeKind::Global => "glb",
            ScopeKind::Conditional => "if",
            ScopeKind::Loop => "for",
            ScopeKind::Function => "fn",
        }
    }
}

/// One lexical scope instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId {
    pub kind: ScopeKind,
    pub id: usize,
}

impl ScopeId {
    pub const GLOBAL: ScopeId = ScopeId {
        kind: ScopeKind::Global,
        id: 0,
    };
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.id)
    }
}

/// Address of a persistent variable slot, rendered `glb0_x`, `if2_y`.
///
/// Slots declared inside a function body are `framed`: at runtime their key
/// is prefixed with the call-site path of the invocation, so every lexical
/// call of the function owns separate storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotRef {
    pub scope: ScopeId,
    pub name: String,
    pub framed: bool,
}

impl SlotRef {
    pub fn new(scope: ScopeId, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
            framed: false,
        }
    }

    pub fn in_frame(scope: ScopeId, name: impl Into<String>) -> Self {
        Self {
            framed: true,
            ..Self::new(scope, name)
        }
    }

    /// Runtime storage key under the given frame path.
    pub fn key(&self, frame: &str) -> String {
        if self.framed && !frame.is_empty() {
            format!("{frame}/{self}")
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.scope, self.name)
    }
}

/// Bar-derived series readable without a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataField {
    Open,
    High,
    Low,
    Close,
    Volume,
    Hl2,
    Hlc3,
    Ohlc4,
    Time,
    TimeClose,
    BarIndex,
}

impl DataField {
    pub const ALL: [DataField; 11] = [
        DataField::Open,
        DataField::High,
        DataField::Low,
        DataField::Close,
        DataField::Volume,
        DataField::Hl2,
        DataField::Hlc3,
        DataField::Ohlc4,
        DataField::Time,
        DataField::TimeClose,
        DataField::BarIndex,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DataField::Open => "open",
            DataField::High => "high",
            DataField::Low => "low",
            DataField::Close => "close",
            DataField::Volume => "volume",
            DataField::Hl2 => "hl2",
            DataField::Hlc3 => "hlc3",
            DataField::Ohlc4 => "ohlc4",
            DataField::Time => "time",
            DataField::TimeClose => "time_close",
            DataField::BarIndex => "bar_index",
        }
    }

    pub fn from_name(name: &str) -> Option<DataField> {
        let field = match name {
            "openTime" => DataField::Time,
            "closeTime" => DataField::TimeClose,
            other => *Self::ALL.iter().find(|f| f.name() == other)?,
        };
        Some(field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    Slot(SlotRef),
    Data(DataField),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Slot(slot) => write!(f, "{slot}"),
            Source::Data(field) => write!(f, "data.{}", field.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Namespace {
    Core,
    Ta,
    Math,
    Array,
    Input,
    Color,
    Syminfo,
}

impl Namespace {
    pub const NAMED: [Namespace; 6] = [
        Namespace::Ta,
        Namespace::Math,
        Namespace::Array,
        Namespace::Input,
        Namespace::Color,
        Namespace::Syminfo,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Namespace::Core => "core",
            Namespace::Ta => "ta",
            Namespace::Math => "math",
            Namespace::Array => "array",
            Namespace::Input => "input",
            Namespace::Color => "color",
            Namespace::Syminfo => "syminfo",
        }
    }

    pub fn from_name(name: &str) -> Option<Namespace> {
        Self::NAMED.iter().copied().find(|ns| ns.name() == name)
    }
}

/// Where a synthesized or explicit import pulls names from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ImportKind {
    Data,
    Pine,
    Core,
}

impl ImportKind {
    pub fn name(&self) -> &'static str {
        match self {
            ImportKind::Data => "data",
            ImportKind::Pine => "pine",
            ImportKind::Core => "core",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Builtin {
    pub namespace: Namespace,
    pub name: String,
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace {
            Namespace::Core => f.write_str(&self.name),
            ns => write!(f, "{}.{}", ns.name(), self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Const(Value),
    /// Current value of a series.
    Read(Source),
    /// Lookback `offset` bars into a series.
    Get { source: Source, offset: Box<Expr> },
    Temp(usize),
    /// Argument captured as a series handle under the id `pN`.
    Param { id: String, arg: Box<Expr> },
    Call {
        target: Builtin,
        args: Vec<Expr>,
        named: Vec<(String, Expr)>,
        key: Option<String>,
    },
    UserCall {
        name: String,
        args: Vec<Expr>,
        key: String,
    },
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Tuple(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Element { tuple: Box<Expr>, index: usize },
    /// Plain-array lookback: offset 0 is the last element.
    ArrayGet { array: Box<Expr>, offset: Box<Expr> },
    /// Ops evaluated only when the value is needed.
    Block { ops: Vec<Op>, value: Box<Expr> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    Import {
        kind: ImportKind,
        names: Vec<String>,
    },
    Init {
        slot: SlotRef,
        value: Expr,
        persistent: bool,
    },
    Set {
        slot: SlotRef,
        value: Expr,
    },
    Temp {
        id: usize,
        value: Expr,
    },
    If {
        cond: Expr,
        then_scope: ScopeId,
        then: Vec<Op>,
        else_scope: Option<ScopeId>,
        otherwise: Vec<Op>,
    },
    For {
        scope: ScopeId,
        counter: SlotRef,
        from: Expr,
        to: Expr,
        step: Option<Expr>,
        inclusive: bool,
        body: Vec<Op>,
    },
    While {
        scope: ScopeId,
        cond: Expr,
        body: Vec<Op>,
    },
    Break,
    Continue,
    Eval(Expr),
    Return(Option<Expr>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub scope: ScopeId,
    pub params: Vec<SlotRef>,
    pub body: Vec<Op>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoweredProgram {
    pub dialect: Dialect,
    pub version: Option<u32>,
    pub functions: Vec<FunctionDef>,
    pub body: Vec<Op>,
}

impl LoweredProgram {
    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Every call-site key in traversal order.
    pub fn call_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        for f in &self.functions {
            collect_keys(&f.body, &mut keys);
        }
        collect_keys(&self.body, &mut keys);
        keys
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

fn collect_keys(ops: &[Op], keys: &mut Vec<String>) {
    for op in ops {
        match op {
            Op::Import { .. } | Op::Break | Op::Continue | Op::Return(None) => {}
            Op::Init { value, .. } | Op::Set { value, .. } | Op::Temp { value, .. } | Op::Eval(value) => {
                collect_expr_keys(value, keys)
            }
            Op::Return(Some(value)) => collect_expr_keys(value, keys),
            Op::If {
                cond, then, otherwise, ..
            } => {
                collect_expr_keys(cond, keys);
                collect_keys(then, keys);
                collect_keys(otherwise, keys);
            }
            Op::For {
                from, to, step, body, ..
            } => {
                collect_expr_keys(from, keys);
                collect_expr_keys(to, keys);
                if let Some(step) = step {
                    collect_expr_keys(step, keys);
                }
                collect_keys(body, keys);
            }
            Op::While { cond, body, .. } => {
                collect_expr_keys(cond, keys);
                collect_keys(body, keys);
            }
        }
    }
}

fn collect_expr_keys(expr: &Expr, keys: &mut Vec<String>) {
    match expr {
        Expr::Const(_) | Expr::Read(_) | Expr::Temp(_) => {}
        Expr::Get { offset, .. } => collect_expr_keys(offset, keys),
        Expr::Param { arg, .. } => collect_expr_keys(arg, keys),
        Expr::Call { args, named, key, .. } => {
            for a in args {
                collect_expr_keys(a, keys);
            }
            for (_, a) in named {
                collect_expr_keys(a, keys);
            }
            if let Some(key) = key {
                keys.push(key.clone());
            }
        }
        Expr::UserCall { args, key, .. } => {
            for a in args {
                collect_expr_keys(a, keys);
            }
            keys.push(key.clone());
        }
        Expr::Unary { expr, .. } => collect_expr_keys(expr, keys),
        Expr::Binary { left, right, .. } => {
            collect_expr_keys(left, keys);
            collect_expr_keys(right, keys);
        }
        Expr::Ternary { cond, then, otherwise } => {
            collect_expr_keys(cond, keys);
            collect_expr_keys(then, keys);
            collect_expr_keys(otherwise, keys);
        }
        Expr::Tuple(items) => items.iter().for_each(|e| collect_expr_keys(e, keys)),
        Expr::Object(fields) => fields.iter().for_each(|(_, e)| collect_expr_keys(e, keys)),
        Expr::Element { tuple, .. } => collect_expr_keys(tuple, keys),
        Expr::ArrayGet { array, offset } => {
            collect_expr_keys(array, keys);
            collect_expr_keys(offset, keys);
        }
        Expr::Block { ops, value } => {
            collect_keys(ops, keys);
            collect_expr_keys(value, keys);
        }
    }
}

// ---------- rendering ---------------------------------------------------

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(v) => write!(f, "{v}"),
            Expr::Read(source) => write!(f, "{source}"),
            Expr::Get { source, offset } => write!(f, "get({source}, {offset})"),
            Expr::Temp(id) => write!(f, "$t{id}"),
            Expr::Param { id, arg } => write!(f, "param({arg}, {id:?})"),
            Expr::Call {
                target,
                args,
                named,
                key,
            } => {
                write!(f, "{target}(")?;
                write_list(f, args)?;
                for (i, (name, value)) in named.iter().enumerate() {
                    if i > 0 || !args.is_empty() {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}={value}")?;
                }
                f.write_str(")")?;
                if let Some(key) = key {
                    write!(f, " @{key}")?;
                }
                Ok(())
            }
            Expr::UserCall { name, args, key } => {
                write!(f, "{name}(")?;
                write_list(f, args)?;
                write!(f, ") @{key}")
            }
            Expr::Unary { op, expr } => write!(f, "{}({expr})", op.symbol()),
            Expr::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => write!(f, "({cond} ? {then} : {otherwise})"),
            Expr::Tuple(items) => {
                f.write_str("[")?;
                write_list(f, items)?;
                f.write_str("]")
            }
            Expr::Object(fields) => {
                f.write_str("{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                f.write_str("}")
            }
            Expr::Element { tuple, index } => write!(f, "{tuple}.{index}"),
            Expr::ArrayGet { array, offset } => write!(f, "at({array}, {offset})"),
            Expr::Block { ops, value } => {
                let mut inner = String::new();
                for op in ops {
                    render_op(&mut inner, op, 0)?;
                }
                let inline = inner.lines().map(str::trim).collect::<Vec<_>>().join("; ");
                write!(f, "{{ {inline}; {value} }}")
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn render_block(out: &mut String, ops: &[Op], depth: usize) -> fmt::Result {
    for op in ops {
        render_op(out, op, depth)?;
    }
    Ok(())
}

fn render_op(out: &mut String, op: &Op, depth: usize) -> fmt::Result {
    indent(out, depth);
    match op {
        Op::Import { kind, names } => writeln!(out, "import {{ {} }} from {}", names.join(", "), kind.name()),
        Op::Init {
            slot,
            value,
            persistent,
        } => {
            let verb = if *persistent { "initVar" } else { "init" };
            writeln!(out, "{verb} {slot} = {value}")
        }
        Op::Set { slot, value } => writeln!(out, "set {slot} = {value}"),
        Op::Temp { id, value } => writeln!(out, "$t{id} = {value}"),
        Op::If {
            cond,
            then_scope,
            then,
            else_scope,
            otherwise,
        } => {
            writeln!(out, "if {cond} {{ // {then_scope}")?;
            render_block(out, then, depth + 1)?;
            indent(out, depth);
            match else_scope {
                Some(scope) => {
                    writeln!(out, "}} else {{ // {scope}")?;
                    render_block(out, otherwise, depth + 1)?;
                    indent(out, depth);
                    writeln!(out, "}}")
                }
                None => writeln!(out, "}}"),
            }
        }
        Op::For {
            scope,
            counter,
            from,
            to,
            step,
            inclusive,
            body,
        } => {
            let range = if *inclusive { "..=" } else { ".." };
            write!(out, "for {counter} in {from}{range}{to}")?;
            if let Some(step) = step {
                write!(out, " by {step}")?;
            }
            writeln!(out, " {{ // {scope}")?;
            render_block(out, body, depth + 1)?;
            indent(out, depth);
            writeln!(out, "}}")
        }
        Op::While { scope, cond, body } => {
            writeln!(out, "while {cond} {{ // {scope}")?;
            render_block(out, body, depth + 1)?;
            indent(out, depth);
            writeln!(out, "}}")
        }
        Op::Break => writeln!(out, "break"),
        Op::Continue => writeln!(out, "continue"),
        Op::Eval(expr) => writeln!(out, "{expr}"),
        Op::Return(Some(expr)) => writeln!(out, "return {expr}"),
        Op::Return(None) => writeln!(out, "return"),
    }
}

impl fmt::Display for LoweredProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        match self.version {
            Some(v) => writeln!(out, "// {} v{v}", self.dialect)?,
            None => writeln!(out, "// {}", self.dialect)?,
        }
        for func in &self.functions {
            let params: Vec<String> = func.params.iter().map(ToString::to_string).collect();
            writeln!(out, "fn {}({}) {{ // {}", func.name, params.join(", "), func.scope)?;
            render_block(&mut out, &func.body, 1)?;
            writeln!(out, "}}")?;
        }
        render_block(&mut out, &self.body, 0)?;
        f.write_str(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_and_scope_rendering() {
        let slot = SlotRef::new(
            ScopeId {
                kind: ScopeKind::Conditional,
                id: 2,
            },
            "y",
        );
        assert_eq!(slot.to_string(), "if2_y");
        assert_eq!(SlotRef::new(ScopeId::GLOBAL, "x").to_string(), "glb0_x");
        let local = SlotRef::in_frame(
            ScopeId {
                kind: ScopeKind::Function,
                id: 3,
            },
            "a",
        );
        assert_eq!(local.key("user.f#0"), "user.f#0/fn3_a");
        assert_eq!(slot.key("user.f#0"), "if2_y");
    }

    #[test]
    fn data_field_aliases() {
        assert_eq!(DataField::from_name("close"), Some(DataField::Close));
        assert_eq!(DataField::from_name("openTime"), Some(DataField::Time));
        assert_eq!(DataField::from_name("bar_index"), Some(DataField::BarIndex));
        assert_eq!(DataField::from_name("nope"), None);
    }

    #[test]
    fn program_renders_and_collects_keys() {
        let x = SlotRef::new(ScopeId::GLOBAL, "x");
        let program = LoweredProgram {
            dialect: Dialect::Pine,
            version: Some(5),
            functions: vec![],
            body: vec![
                Op::Import {
                    kind: ImportKind::Data,
                    names: vec!["close".into()],
                },
                Op::Init {
                    slot: x.clone(),
                    value: Expr::Call {
                        target: Builtin {
                            namespace: Namespace::Ta,
                            name: "sma".into(),
                        },
                        args: vec![
                            Expr::Param {
                                id: "p0".into(),
                                arg: Box::new(Expr::Read(Source::Data(DataField::Close))),
                            },
                            Expr::Param {
                                id: "p1".into(),
                                arg: Box::new(Expr::Const(Value::Num(3.0))),
                            },
                        ],
                        named: vec![],
                        key: Some("ta.sma#0".into()),
                    },
                    persistent: false,
                },
            ],
        };
        let text = program.to_string();
        assert!(text.contains("import { close } from data"));
        assert!(text.contains("init glb0_x = ta.sma(param(data.close, \"p0\"), param(3, \"p1\")) @ta.sma#0"));
        assert_eq!(program.call_keys(), vec!["ta.sma#0".to_string()]);
        let back = LoweredProgram::from_json(&program.to_json().unwrap()).unwrap();
        assert_eq!(back, program);
    }
}
