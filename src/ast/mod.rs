use std::fmt;

use serde::Serialize;

use crate::builtin::Builtin;
use crate::scope::{ScopeId, Scopes, SymbolId};

pub mod source_map;
pub use source_map::SourceMap;

// ---- Span infrastructure ----

/// Byte range within source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const UNKNOWN: Span = Span { start: 0, end: 0 };

    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(range: std::ops::Range<usize>) -> Self {
        Span { start: range.start, end: range.end }
    }
}

/// Wraps a node with its source span. Transparent to serde (serializes as inner node only).
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Spanned { node, span }
    }
}

impl<T> std::ops::Deref for Spanned<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.node
    }
}

impl<T: Serialize> Serialize for Spanned<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.node.serialize(serializer)
    }
}

// ---- Types ----

/// Value types. The integer family is `Int8..Int64` plus `Bool`, which is a
/// 64-bit integer at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Type {
    /// Placeholder for a `var` declared without a type; pinned by its first initializer.
    Unknown,
    Int8,
    Int16,
    Int32,
    Int64,
    Bool,
    Str,
    Real,
    Void,
    Func,
}

impl Type {
    pub fn is_integer(self) -> bool {
        matches!(self, Type::Int8 | Type::Int16 | Type::Int32 | Type::Int64 | Type::Bool)
    }

    /// Storage width in bits of an integer-family type; 64 for everything else.
    pub fn width(self) -> u32 {
        match self {
            Type::Int8 => 8,
            Type::Int16 => 16,
            Type::Int32 => 32,
            _ => 64,
        }
    }

    /// Maps a source-level type name (`i8`, `real`, ...) to its type.
    pub fn from_name(name: &str) -> Option<Type> {
        Some(match name {
            "i8" => Type::Int8,
            "i16" => Type::Int16,
            "i32" => Type::Int32,
            "i64" => Type::Int64,
            "bool" => Type::Bool,
            "str" => Type::Str,
            "real" => Type::Real,
            "void" => Type::Void,
            _ => return None,
        })
    }

    /// Narrowest signed integer type holding `value`.
    pub fn narrowest(value: i64) -> Type {
        if i8::try_from(value).is_ok() {
            Type::Int8
        } else if i16::try_from(value).is_ok() {
            Type::Int16
        } else if i32::try_from(value).is_ok() {
            Type::Int32
        } else {
            Type::Int64
        }
    }

    /// One-byte tag carried by `load`/`store` so the machine knows the slot width.
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Type> {
        const ALL: [Type; 10] = [
            Type::Unknown,
            Type::Int8,
            Type::Int16,
            Type::Int32,
            Type::Int64,
            Type::Bool,
            Type::Str,
            Type::Real,
            Type::Void,
            Type::Func,
        ];
        ALL.get(tag as usize).copied()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Type::Unknown => "unknown",
            Type::Int8 => "i8",
            Type::Int16 => "i16",
            Type::Int32 => "i32",
            Type::Int64 => "i64",
            Type::Bool => "bool",
            Type::Str => "str",
            Type::Real => "real",
            Type::Void => "void",
            Type::Func => "func",
        };
        f.write_str(name)
    }
}

// ---- Operators ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Plus => "+",
            UnaryOp::Minus => "-",
            UnaryOp::Not => "not",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

impl BinOp {
    /// Binding power; higher binds tighter. All levels are left-associative.
    pub fn precedence(self) -> u8 {
        match self {
            BinOp::Mul | BinOp::Div | BinOp::Mod => 90,
            BinOp::Add | BinOp::Sub => 80,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 70,
            BinOp::Eq | BinOp::Ne => 60,
            BinOp::BitAnd => 55,
            BinOp::BitXor => 54,
            BinOp::BitOr => 53,
            BinOp::And => 50,
            BinOp::Or => 40,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne
        )
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::BitAnd => "&",
            BinOp::BitXor => "^",
            BinOp::BitOr => "|",
            BinOp::And => "and",
            BinOp::Or => "or",
        })
    }
}

// ---- Nodes ----

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Literal {
    /// Integer literal, already narrowed to the smallest type that holds it.
    Int { value: i64, ty: Type },
    Bool(bool),
    Real(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Callee {
    Builtin(#[serde(serialize_with = "builtin_name")] &'static Builtin),
    Func(SymbolId),
}

fn builtin_name<S: serde::Serializer>(b: &&'static Builtin, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(b.name)
}

pub type Expr = Spanned<ExprKind>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExprKind {
    Const(Literal),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Var(SymbolId),
    Assign {
        target: SymbolId,
        value: Box<Expr>,
    },
    Call {
        callee: Callee,
        args: Vec<Expr>,
    },
}

/// A braced statement list together with the scope it opened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    pub scope: ScopeId,
    pub stmts: Vec<Stmt>,
}

pub type Stmt = Spanned<StmtKind>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StmtKind {
    Expr(Expr),
    Print(Expr),
    Block(Block),
    If {
        cond: Expr,
        then: Block,
        /// Either another `If` or a `Block`.
        otherwise: Option<Box<Stmt>>,
    },
    /// `body` is `None` when the loop was written without a block; such a loop emits nothing.
    For {
        init: Option<Expr>,
        cond: Expr,
        post: Option<Expr>,
        body: Option<Block>,
    },
    Func {
        symbol: SymbolId,
        params: u16,
        body: Block,
    },
    Return {
        value: Option<Expr>,
        func: Option<SymbolId>,
    },
    Break {
        target: Option<ScopeId>,
    },
    Continue {
        target: Option<ScopeId>,
    },
}

/// A parsed program: the top-level block plus the scope arena its handles point into.
#[derive(Debug, Serialize)]
pub struct Module {
    pub body: Block,
    #[serde(skip)]
    pub scopes: Scopes,
}
