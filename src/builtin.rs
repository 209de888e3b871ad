//! Names the compiler lowers straight to machine instructions.
//!
//! Builtin names are reserved: they cannot be declared as variables or functions.

use serde::Serialize;

use crate::ast::Type;
use crate::bytecode::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Arity {
    Fixed(u8),
    Variadic,
}

/// Argument types a builtin admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Accepts {
    /// Integer family, `real` and `str`.
    Printable,
    /// Integer family and `real`.
    Numeric,
    Real,
    Str,
    Nothing,
}

impl Accepts {
    pub fn admits(self, ty: Type) -> bool {
        match self {
            Accepts::Printable => ty.is_integer() || matches!(ty, Type::Real | Type::Str),
            Accepts::Numeric => ty.is_integer() || ty == Type::Real,
            Accepts::Real => ty == Type::Real,
            Accepts::Str => ty == Type::Str,
            Accepts::Nothing => false,
        }
    }
}

/// How a call is turned into instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Lowering {
    /// Each argument gets the print instruction of its own type.
    Print,
    /// Picks the integer or real instruction by the argument's family; the result keeps that family.
    ByFamily { int: u8, real: u8 },
    /// One instruction after all arguments, yielding `ret`.
    Op { op: u8, ret: Type },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Builtin {
    pub name: &'static str,
    pub arity: Arity,
    pub accepts: Accepts,
    pub lowering: Lowering,
}

const fn real1(name: &'static str, op: u8) -> Builtin {
    Builtin {
        name,
        arity: Arity::Fixed(1),
        accepts: Accepts::Real,
        lowering: Lowering::Op { op, ret: Type::Real },
    }
}

const fn real2(name: &'static str, op: u8) -> Builtin {
    Builtin {
        name,
        arity: Arity::Fixed(2),
        accepts: Accepts::Real,
        lowering: Lowering::Op { op, ret: Type::Real },
    }
}

pub static BUILTINS: &[Builtin] = &[
    Builtin {
        name: "print",
        arity: Arity::Variadic,
        accepts: Accepts::Printable,
        lowering: Lowering::Print,
    },
    Builtin {
        name: "abs",
        arity: Arity::Fixed(1),
        accepts: Accepts::Numeric,
        lowering: Lowering::ByFamily { int: OP_IABS, real: OP_RABS },
    },
    real2("mod", OP_RMOD),
    real2("pow", OP_RPOW),
    real1("sqrt", OP_RSQRT),
    real1("exp", OP_REXP),
    real1("sin", OP_RSIN),
    real1("cos", OP_RCOS),
    real1("tan", OP_RTAN),
    real1("acos", OP_RACOS),
    real2("atan2", OP_RATAN2),
    real1("log", OP_RLOG),
    real1("log10", OP_RLOG10),
    real1("log2", OP_RLOG2),
    real1("ceil", OP_RCEIL),
    real1("floor", OP_RFLOOR),
    real1("round", OP_RROUND),
    Builtin {
        name: "pi",
        arity: Arity::Fixed(0),
        accepts: Accepts::Nothing,
        lowering: Lowering::Op { op: OP_RCONST_PI, ret: Type::Real },
    },
    Builtin {
        name: "slen",
        arity: Arity::Fixed(1),
        accepts: Accepts::Str,
        lowering: Lowering::Op { op: OP_SLEN, ret: Type::Int64 },
    },
];

pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

pub fn is_reserved(name: &str) -> bool {
    lookup(name).is_some()
}

impl Builtin {
    /// `Some(n)` when the call must have exactly `n` arguments.
    pub fn fixed_arity(&self) -> Option<usize> {
        match self.arity {
            Arity::Fixed(n) => Some(n as usize),
            Arity::Variadic => None,
        }
    }
}
