use serde::{Deserialize, Serialize};

use crate::language::{Dialect, SourceSpan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
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
}

impl AssignOp {
    pub fn binary(&self) -> Option<BinaryOp> {
        match self {
            AssignOp::Set => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Bool(bool),
    Str(String),
    /// Dotted name: `x`, `close`, `ta.tr`, `syminfo.ticker`.
    Path { parts: Vec<String>, span: SourceSpan },
    /// Lookback `target[offset]`.
    Index {
        target: Box<Expr>,
        offset: Box<Expr>,
        span: SourceSpan,
    },
    Call {
        callee: Vec<String>,
        args: Vec<Arg>,
        span: SourceSpan,
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
    /// `[a, b]`: tuple in pine, array literal in host.
    List(Vec<Expr>),
    /// `{ name: e }` result object (host).
    Object(Vec<(String, Expr)>),
}

impl Expr {
    pub fn span(&self) -> Option<SourceSpan> {
        match self {
            Expr::Path { span, .. } | Expr::Index { span, .. } | Expr::Call { span, .. } => Some(*span),
            Expr::Unary { expr, .. } => expr.span(),
            Expr::Binary { left, .. } => left.span(),
            Expr::Ternary { cond, .. } => cond.span(),
            _ => None,
        }
    }
}

/// Where an explicit host import pulls names from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFrom {
    /// `context.data`
    Data,
    /// `context.pine`
    Pine,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Decl {
        name: String,
        value: Expr,
        persistent: bool,
        span: SourceSpan,
    },
    Assign {
        name: String,
        op: AssignOp,
        value: Expr,
        span: SourceSpan,
    },
    TupleDecl {
        names: Vec<String>,
        value: Expr,
        span: SourceSpan,
    },
    Import {
        from: ImportFrom,
        names: Vec<String>,
        span: SourceSpan,
    },
    If {
        cond: Expr,
        then: Vec<Stmt>,
        otherwise: Vec<Stmt>,
        span: SourceSpan,
    },
    For {
        var: String,
        from: Expr,
        to: Expr,
        step: Option<Expr>,
        inclusive: bool,
        body: Vec<Stmt>,
        span: SourceSpan,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        span: SourceSpan,
    },
    Break(SourceSpan),
    Continue(SourceSpan),
    FnDef {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
        span: SourceSpan,
    },
    Return {
        value: Option<Expr>,
        span: SourceSpan,
    },
    Expr(Expr, SourceSpan),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub dialect: Dialect,
    pub version: Option<u32>,
    pub body: Vec<Stmt>,
}
