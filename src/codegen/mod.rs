//! Single-pass tree walk that emits bytecode and discovers types as it goes.
//!
//! Every expression leaves exactly one slot on the operand stack (or none when
//! its type is `Void`) and reports that type back to its parent. Integer
//! operands are widened to 64 bits before an operator runs; stores, returns and
//! call results are cut back to the declared width.

use tracing::debug;

use crate::ast::*;
use crate::builtin::{Builtin, Lowering};
use crate::bytecode::*;
use crate::jump::{Jump, JumpError};
use crate::scope::{ScopeId, Scopes, SymbolId};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenError {
    #[error("operator '{op}' cannot be applied to {ty}")]
    UnaryType { op: UnaryOp, ty: Type, span: Span },
    #[error("operator '{op}' cannot be applied to {left} and {right}")]
    BinaryType {
        op: BinOp,
        left: Type,
        right: Type,
        span: Span,
    },
    #[error("cannot print a value of type {ty}")]
    PrintType { ty: Type, span: Span },
    #[error("builtin '{name}' does not accept {ty}")]
    BuiltinArgType {
        name: &'static str,
        ty: Type,
        span: Span,
    },
    #[error("'{name}' takes {expected} argument(s) but {found} were given")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
        span: Span,
    },
    #[error("argument {index} of '{name}' must be {expected}, found {found}")]
    ArgumentType {
        name: String,
        index: usize,
        expected: Type,
        found: Type,
        span: Span,
    },
    #[error("cannot assign {found} to '{name}' of type {expected}")]
    AssignType {
        name: String,
        expected: Type,
        found: Type,
        span: Span,
    },
    #[error("function returns {expected} but this returns {found}")]
    ReturnType {
        expected: Type,
        found: Type,
        span: Span,
    },
    #[error("'break' outside of a loop")]
    BreakOutsideLoop { span: Span },
    #[error("'continue' outside of a loop")]
    ContinueOutsideLoop { span: Span },
    #[error("'ret' outside of a function")]
    ReturnOutsideFunction { span: Span },
    #[error("'{name}' is read before it has a type")]
    UntypedVariable { name: String, span: Span },
    #[error("function '{name}' used as a value")]
    FunctionAsValue { name: String, span: Span },
    #[error("condition must be an integer or bool, found {ty}")]
    ConditionType { ty: Type, span: Span },
    #[error("function '{name}' is called before its body is emitted")]
    UnplacedFunction { name: String, span: Span },
    #[error("{source}")]
    Jump {
        #[source]
        source: JumpError,
        span: Span,
    },
    #[error("program needs {size} bytes of {segment}, more than 16-bit addressing allows")]
    TooLarge { segment: &'static str, size: usize },
}

impl GenError {
    pub fn span(&self) -> Span {
        match self {
            GenError::UnaryType { span, .. }
            | GenError::BinaryType { span, .. }
            | GenError::PrintType { span, .. }
            | GenError::BuiltinArgType { span, .. }
            | GenError::Arity { span, .. }
            | GenError::ArgumentType { span, .. }
            | GenError::AssignType { span, .. }
            | GenError::ReturnType { span, .. }
            | GenError::BreakOutsideLoop { span }
            | GenError::ContinueOutsideLoop { span }
            | GenError::ReturnOutsideFunction { span }
            | GenError::UntypedVariable { span, .. }
            | GenError::FunctionAsValue { span, .. }
            | GenError::ConditionType { span, .. }
            | GenError::UnplacedFunction { span, .. }
            | GenError::Jump { span, .. } => *span,
            GenError::TooLarge { .. } => Span::UNKNOWN,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GenError::UnaryType { .. } | GenError::BinaryType { .. } => "MZ-G001",
            GenError::PrintType { .. } => "MZ-G002",
            GenError::BuiltinArgType { .. } => "MZ-G003",
            GenError::Arity { .. } => "MZ-G004",
            GenError::ArgumentType { .. } => "MZ-G005",
            GenError::AssignType { .. } => "MZ-G006",
            GenError::ReturnType { .. } => "MZ-G007",
            GenError::BreakOutsideLoop { .. } | GenError::ContinueOutsideLoop { .. } => "MZ-G008",
            GenError::ReturnOutsideFunction { .. } => "MZ-G009",
            GenError::UntypedVariable { .. } => "MZ-G010",
            GenError::FunctionAsValue { .. } => "MZ-G011",
            GenError::ConditionType { .. } => "MZ-G012",
            GenError::UnplacedFunction { .. } | GenError::Jump { .. } => "MZ-G013",
            GenError::TooLarge { .. } => "MZ-G014",
        }
    }
}

type Result<T> = std::result::Result<T, GenError>;

/// Compiles a parsed module. The tree is consumed: every node is emitted exactly once.
pub fn generate(module: Module) -> Result<Program> {
    let Module { body, scopes } = module;
    let mut generator = Generator { scopes, program: Program::new() };
    generator.module(&body)?;
    let program = generator.program;
    if program.code.len() > ADDRESS_SPACE {
        return Err(GenError::TooLarge { segment: "code", size: program.code.len() });
    }
    debug!(code = program.code.len(), data = program.data.len(), "generated");
    Ok(program)
}

struct Generator {
    scopes: Scopes,
    program: Program,
}

fn at(span: Span) -> impl Fn(JumpError) -> GenError {
    move |source| GenError::Jump { source, span }
}

impl Generator {
    fn emit(&mut self, op: u8) {
        self.program.emit(op);
    }

    fn module(&mut self, body: &Block) -> Result<()> {
        let globals = self.scopes.allocated(body.scope);
        // Data offset 0 is the empty string: a `str` slot never assigned reads as "".
        let _ = self.program.intern("");
        // The global frame: two fake saved words so `proc` has something to relocate.
        self.emit(OP_ICONST_0);
        self.emit(OP_ICONST_0);
        self.emit(OP_PROC);
        self.program.emit_u16(0);
        self.program.emit_u16(globals);
        self.block(body)?;
        self.emit(OP_HALT);
        Ok(())
    }

    fn block(&mut self, block: &Block) -> Result<()> {
        for stmt in &block.stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    // ---- Statements ----

    fn stmt(&mut self, stmt: &Stmt) -> Result<()> {
        let span = stmt.span;
        match &stmt.node {
            StmtKind::Expr(e) => self.expr_stmt(e),
            StmtKind::Print(e) => {
                let ty = self.expr(e)?;
                self.print(ty, e.span)
            }
            StmtKind::Block(b) => self.block(b),
            StmtKind::If { cond, then, otherwise } => self.if_stmt(cond, then, otherwise.as_deref(), span),
            StmtKind::For { init, cond, post, body } => {
                let Some(body) = body else {
                    return Ok(());
                };
                self.for_stmt(init.as_ref(), cond, post.as_ref(), body, span)
            }
            StmtKind::Func { symbol, params, body } => self.func(*symbol, *params, body, span),
            StmtKind::Return { value, func } => self.ret(value.as_ref(), *func, span),
            StmtKind::Break { target } => {
                let scope = target.ok_or(GenError::BreakOutsideLoop { span })?;
                self.jump_to_label(scope, span, |labels| &mut labels.end)
            }
            StmtKind::Continue { target } => {
                let scope = target.ok_or(GenError::ContinueOutsideLoop { span })?;
                self.jump_to_label(scope, span, |labels| &mut labels.post)
            }
        }
    }

    /// Evaluates for effect and discards any result.
    fn expr_stmt(&mut self, e: &Expr) -> Result<()> {
        if self.expr(e)? != Type::Void {
            self.emit(OP_DROP);
        }
        Ok(())
    }

    fn print(&mut self, ty: Type, span: Span) -> Result<()> {
        let op = match ty {
            t if t.is_integer() => OP_IPRINT,
            Type::Real => OP_RPRINT,
            Type::Str => OP_SPRINT,
            _ => return Err(GenError::PrintType { ty, span }),
        };
        self.emit(op);
        Ok(())
    }

    fn condition(&mut self, cond: &Expr) -> Result<()> {
        let ty = self.expr(cond)?;
        if !ty.is_integer() {
            return Err(GenError::ConditionType { ty, span: cond.span });
        }
        Ok(())
    }

    fn if_stmt(&mut self, cond: &Expr, then: &Block, otherwise: Option<&Stmt>, span: Span) -> Result<()> {
        let mut else_label = Jump::new();
        let mut join = Jump::new();

        self.condition(cond)?;
        self.emit(OP_JEZ);
        else_label.reference(&mut self.program);
        self.block(then)?;
        self.emit(OP_JMP);
        join.reference(&mut self.program);

        else_label.resolve(&self.program).map_err(at(span))?;
        if let Some(other) = otherwise {
            self.stmt(other)?;
        }
        join.resolve(&self.program).map_err(at(span))?;

        else_label.patch(&mut self.program).map_err(at(span))?;
        join.patch(&mut self.program).map_err(at(span))
    }

    fn for_stmt(
        &mut self,
        init: Option<&Expr>,
        cond: &Expr,
        post: Option<&Expr>,
        body: &Block,
        span: Span,
    ) -> Result<()> {
        if let Some(init) = init {
            self.expr_stmt(init)?;
        }
        self.resolve_label(body.scope, span, |l| &mut l.begin)?;
        self.condition(cond)?;
        self.emit(OP_JEZ);
        self.reference_label(body.scope, span, |l| &mut l.end)?;

        self.block(body)?;

        self.resolve_label(body.scope, span, |l| &mut l.post)?;
        if let Some(post) = post {
            self.expr_stmt(post)?;
        }
        self.emit(OP_JMP);
        self.reference_label(body.scope, span, |l| &mut l.begin)?;
        self.resolve_label(body.scope, span, |l| &mut l.end)?;

        let labels = self
            .scopes
            .take_labels(body.scope)
            .ok_or(GenError::Jump { source: JumpError::Unresolved, span })?;
        for label in [&labels.begin, &labels.post, &labels.end] {
            label.patch(&mut self.program).map_err(at(span))?;
        }
        Ok(())
    }

    fn loop_label<'a>(
        scopes: &'a mut Scopes,
        scope: ScopeId,
        span: Span,
        pick: impl FnOnce(&mut crate::scope::LoopLabels) -> &mut Jump,
    ) -> Result<&'a mut Jump> {
        scopes
            .labels_mut(scope)
            .map(pick)
            .ok_or(GenError::Jump { source: JumpError::Unresolved, span })
    }

    fn reference_label(
        &mut self,
        scope: ScopeId,
        span: Span,
        pick: impl FnOnce(&mut crate::scope::LoopLabels) -> &mut Jump,
    ) -> Result<()> {
        Self::loop_label(&mut self.scopes, scope, span, pick)?.reference(&mut self.program);
        Ok(())
    }

    fn resolve_label(
        &mut self,
        scope: ScopeId,
        span: Span,
        pick: impl FnOnce(&mut crate::scope::LoopLabels) -> &mut Jump,
    ) -> Result<()> {
        Self::loop_label(&mut self.scopes, scope, span, pick)?
            .resolve(&self.program)
            .map_err(at(span))
    }

    fn jump_to_label(
        &mut self,
        scope: ScopeId,
        span: Span,
        pick: impl FnOnce(&mut crate::scope::LoopLabels) -> &mut Jump,
    ) -> Result<()> {
        self.emit(OP_JMP);
        self.reference_label(scope, span, pick)
    }

    /// `jmp over; proc args locals; body; iconst_0; ret; over:`
    fn func(&mut self, symbol: SymbolId, params: u16, body: &Block, span: Span) -> Result<()> {
        let mut over = Jump::new();
        self.emit(OP_JMP);
        over.reference(&mut self.program);

        let entry = self.program.addr();
        let entry = u16::try_from(entry)
            .map_err(|_| GenError::Jump { source: JumpError::OutOfRange { offset: entry }, span })?;
        let locals = self.scopes.allocated(body.scope).saturating_sub(params);
        let sym = self.scopes.symbol_mut(symbol);
        if let Some(info) = sym.func.as_mut() {
            info.entry = Some(entry);
        }
        debug!(name = %sym.name, entry, params, locals, "function");

        self.emit(OP_PROC);
        self.program.emit_u16(params);
        self.program.emit_u16(locals);
        self.block(body)?;
        self.emit(OP_ICONST_0);
        self.emit(OP_RET);

        over.resolve(&self.program).map_err(at(span))?;
        over.patch(&mut self.program).map_err(at(span))
    }

    fn ret(&mut self, value: Option<&Expr>, func: Option<SymbolId>, span: Span) -> Result<()> {
        let func = func.ok_or(GenError::ReturnOutsideFunction { span })?;
        let expected = self
            .scopes
            .symbol(func)
            .func
            .as_ref()
            .map_or(Type::Void, |info| info.ret);

        match value {
            None => self.emit(OP_ICONST_0),
            Some(value) => {
                let found = self.expr(value)?;
                if expected.is_integer() && found.is_integer() {
                    self.narrow(expected);
                } else if expected == Type::Void || found != expected {
                    return Err(GenError::ReturnType { expected, found, span: value.span });
                }
            }
        }
        self.emit(OP_RET);
        Ok(())
    }

    // ---- Expressions ----

    /// Widens an integer operand of declared width `ty` to the canonical 64 bits.
    fn promote(&mut self, ty: Type) {
        if ty.is_integer() {
            self.narrow(ty);
        }
    }

    /// Truncate-then-sign-extend to `ty`'s width; nothing at 64 bits.
    fn narrow(&mut self, ty: Type) {
        if let Some(op) = cast_for_width(ty.width()) {
            self.emit(op);
        }
    }

    fn expr(&mut self, e: &Expr) -> Result<Type> {
        let span = e.span;
        match &e.node {
            ExprKind::Const(lit) => self.constant(lit),
            ExprKind::Unary { op, operand } => self.unary(*op, operand, span),
            ExprKind::Binary { op, left, right } => self.binary(*op, left, right, span),
            ExprKind::Var(symbol) => self.load(*symbol, span),
            ExprKind::Assign { target, value } => self.assign(*target, value, span),
            ExprKind::Call { callee: Callee::Builtin(b), args } => self.builtin_call(*b, args, span),
            ExprKind::Call { callee: Callee::Func(f), args } => self.call(*f, args, span),
        }
    }

    fn constant(&mut self, lit: &Literal) -> Result<Type> {
        match lit {
            Literal::Int { value: 0, .. } => self.emit(OP_ICONST_0),
            Literal::Int { value: 1, .. } => self.emit(OP_ICONST_1),
            Literal::Int { value, ty } => match ty {
                Type::Int8 => {
                    self.emit(OP_I8CONST);
                    self.program.emit(*value as u8);
                }
                Type::Int16 => {
                    self.emit(OP_I16CONST);
                    self.program.emit_u16(*value as u16);
                }
                Type::Int32 => {
                    self.emit(OP_I32CONST);
                    self.program.emit_u32(*value as u32);
                }
                _ => {
                    self.emit(OP_ICONST);
                    self.program.emit_u64(*value as u64);
                }
            },
            Literal::Bool(b) => {
                self.emit(if *b { OP_ICONST_1 } else { OP_ICONST_0 });
                return Ok(Type::Bool);
            }
            Literal::Real(v) if *v == 0.0 => {
                self.emit(OP_RCONST_0);
                return Ok(Type::Real);
            }
            Literal::Real(v) if *v == 1.0 => {
                self.emit(OP_RCONST_1);
                return Ok(Type::Real);
            }
            Literal::Real(v) => {
                self.emit(OP_RCONST);
                self.program.emit_u64(v.to_bits());
                return Ok(Type::Real);
            }
            Literal::Str(s) => {
                let offset = self.program.intern(s).ok_or(GenError::TooLarge {
                    segment: "data",
                    size: self.program.data.len() + s.len() + 1,
                })?;
                self.emit(OP_SCONST);
                self.program.emit_u16(offset);
                return Ok(Type::Str);
            }
        }
        Ok(Type::Int64)
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr, span: Span) -> Result<Type> {
        let ty = self.expr(operand)?;
        if ty.is_integer() {
            self.promote(ty);
            match op {
                UnaryOp::Plus => {}
                UnaryOp::Minus => self.emit(OP_INEG),
                UnaryOp::Not => self.emit(OP_INOT),
            }
            return Ok(Type::Int64);
        }
        match (op, ty) {
            (UnaryOp::Plus, Type::Real) => Ok(Type::Real),
            (UnaryOp::Minus, Type::Real) => {
                self.emit(OP_RNEG);
                Ok(Type::Real)
            }
            _ => Err(GenError::UnaryType { op, ty, span }),
        }
    }

    fn binary(&mut self, op: BinOp, left: &Expr, right: &Expr, span: Span) -> Result<Type> {
        let lt = self.expr(left)?;
        self.promote(lt);
        let rt = self.expr(right)?;
        self.promote(rt);
        let mismatch = GenError::BinaryType { op, left: lt, right: rt, span };

        if lt.is_integer() && rt.is_integer() {
            self.emit(match op {
                BinOp::Add => OP_IADD,
                BinOp::Sub => OP_ISUB,
                BinOp::Mul => OP_IMUL,
                BinOp::Div => OP_IDIV,
                BinOp::Mod => OP_IMOD,
                BinOp::Lt => OP_ILT,
                BinOp::Le => OP_ILE,
                BinOp::Gt => OP_IGT,
                BinOp::Ge => OP_IGE,
                BinOp::Eq => OP_IEQ,
                BinOp::Ne => OP_INQ,
                BinOp::BitAnd => OP_IBAND,
                BinOp::BitXor => OP_IBXOR,
                BinOp::BitOr => OP_IBOR,
                BinOp::And => OP_IAND,
                BinOp::Or => OP_IOR,
            });
            return Ok(Type::Int64);
        }

        if lt == Type::Real && rt == Type::Real {
            let op_code = match op {
                BinOp::Add => OP_RADD,
                BinOp::Sub => OP_RSUB,
                BinOp::Mul => OP_RMUL,
                BinOp::Div => OP_RDIV,
                BinOp::Mod => OP_RMOD,
                BinOp::Lt => OP_RLT,
                BinOp::Le => OP_RLE,
                BinOp::Gt => OP_RGT,
                BinOp::Ge => OP_RGE,
                BinOp::Eq => OP_REQ,
                BinOp::Ne => OP_RNQ,
                BinOp::BitAnd | BinOp::BitXor | BinOp::BitOr | BinOp::And | BinOp::Or => {
                    return Err(mismatch);
                }
            };
            self.emit(op_code);
            return Ok(if op.is_comparison() { Type::Int64 } else { Type::Real });
        }

        Err(mismatch)
    }

    fn variable(&self, symbol: SymbolId, span: Span) -> Result<(Type, u16, bool)> {
        let sym = self.scopes.symbol(symbol);
        match sym.ty {
            Type::Unknown => Err(GenError::UntypedVariable { name: sym.name.clone(), span }),
            Type::Func => Err(GenError::FunctionAsValue { name: sym.name.clone(), span }),
            ty => Ok((ty, sym.addr, sym.global)),
        }
    }

    fn slot_access(&mut self, op: u8, ty: Type, addr: u16, global: bool) {
        self.emit(op);
        self.program.emit(ty.tag());
        self.program.emit_u16(addr);
        self.program.emit(global as u8);
    }

    fn load(&mut self, symbol: SymbolId, span: Span) -> Result<Type> {
        let (ty, addr, global) = self.variable(symbol, span)?;
        self.slot_access(OP_LOAD, ty, addr, global);
        Ok(ty)
    }

    fn assign(&mut self, target: SymbolId, value: &Expr, span: Span) -> Result<Type> {
        let found = self.expr(value)?;
        let sym = self.scopes.symbol_mut(target);
        if sym.ty == Type::Unknown && !matches!(found, Type::Void | Type::Func | Type::Unknown) {
            sym.ty = found;
        }
        let expected = sym.ty;
        if sym.ty == Type::Func {
            return Err(GenError::FunctionAsValue { name: sym.name.clone(), span });
        }

        if expected.is_integer() && found.is_integer() {
            self.narrow(expected);
        } else if expected != found {
            let name = self.scopes.symbol(target).name.clone();
            return Err(GenError::AssignType { name, expected, found, span: value.span });
        }

        let (ty, addr, global) = self.variable(target, span)?;
        self.slot_access(OP_STORE, ty, addr, global);
        Ok(Type::Void)
    }

    fn builtin_call(&mut self, builtin: &'static Builtin, args: &[Expr], span: Span) -> Result<Type> {
        match builtin.fixed_arity() {
            Some(expected) if expected != args.len() => {
                return Err(GenError::Arity {
                    name: builtin.name.to_string(),
                    expected,
                    found: args.len(),
                    span,
                });
            }
            _ => {}
        }

        let mut types = Vec::with_capacity(args.len());
        for arg in args {
            let ty = self.expr(arg)?;
            if !builtin.accepts.admits(ty) {
                return Err(GenError::BuiltinArgType { name: builtin.name, ty, span: arg.span });
            }
            if let Lowering::Print = builtin.lowering {
                self.print(ty, arg.span)?;
            } else {
                self.promote(ty);
            }
            types.push(ty);
        }

        match builtin.lowering {
            Lowering::Print => Ok(Type::Void),
            Lowering::ByFamily { int, real } => {
                let ty = types.first().copied().unwrap_or(Type::Void);
                if ty.is_integer() {
                    self.emit(int);
                    Ok(Type::Int64)
                } else {
                    self.emit(real);
                    Ok(Type::Real)
                }
            }
            Lowering::Op { op, ret } => {
                self.emit(op);
                Ok(ret)
            }
        }
    }

    fn call(&mut self, func: SymbolId, args: &[Expr], span: Span) -> Result<Type> {
        let sym = self.scopes.symbol(func);
        let name = sym.name.clone();
        let Some(info) = sym.func.clone() else {
            return Err(GenError::FunctionAsValue { name, span });
        };

        if info.params.len() != args.len() {
            return Err(GenError::Arity {
                name,
                expected: info.params.len(),
                found: args.len(),
                span,
            });
        }
        for (index, (arg, &expected)) in args.iter().zip(&info.params).enumerate() {
            let found = self.expr(arg)?;
            let compatible = if expected.is_integer() {
                found.is_integer()
            } else {
                found == expected
            };
            if !compatible {
                return Err(GenError::ArgumentType {
                    name,
                    index: index + 1,
                    expected,
                    found,
                    span: arg.span,
                });
            }
        }

        let entry = info.entry.ok_or(GenError::UnplacedFunction { name, span })?;
        self.emit(OP_CALL);
        self.program.emit_u16(entry);

        match info.ret {
            Type::Void => {
                self.emit(OP_DROP);
                Ok(Type::Void)
            }
            ret => {
                self.narrow(ret);
                Ok(ret)
            }
        }
    }
}
