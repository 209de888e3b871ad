//! Lexical scopes and the symbols declared in them.
//!
//! Scopes and symbols live in one arena owned by a [`Scopes`] value and are
//! addressed by [`ScopeId`] / [`SymbolId`] handles. Every compilation builds
//! its own arena; nothing here is process-wide.

use serde::Serialize;
use tracing::trace;

use crate::ast::Type;
use crate::jump::Jump;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ScopeId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SymbolId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Bare braces, `if` bodies and the header scope of a `for`.
    Normal,
    Loop,
    Function,
    Global,
}

/// Signature of a user function.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncInfo {
    pub ret: Type,
    pub params: Vec<Type>,
    /// Offset of the function's `proc` instruction, known once its body is emitted.
    pub entry: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub ty: Type,
    /// Slot within the owning frame; absolute when `global` is set.
    pub addr: u16,
    pub global: bool,
    pub func: Option<FuncInfo>,
}

/// Targets owned by a loop scope.
#[derive(Debug, Default)]
pub struct LoopLabels {
    pub begin: Jump,
    pub end: Jump,
    pub post: Jump,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("'{name}' is already declared in this scope")]
    Duplicate { name: String },
    #[error("more than {} slots in one frame", u16::MAX)]
    SlotOverflow,
}

#[derive(Debug)]
struct Context {
    parent: Option<ScopeId>,
    kind: BlockKind,
    symbols: Vec<SymbolId>,
    /// Only meaningful on Function and Global scopes.
    allocated: u16,
    labels: Option<LoopLabels>,
    owner: Option<SymbolId>,
}

impl Context {
    fn new(parent: Option<ScopeId>, kind: BlockKind) -> Self {
        Context {
            parent,
            kind,
            symbols: Vec::new(),
            allocated: 0,
            labels: (kind == BlockKind::Loop).then(LoopLabels::default),
            owner: None,
        }
    }
}

#[derive(Debug)]
pub struct Scopes {
    contexts: Vec<Context>,
    symbols: Vec<Symbol>,
}

impl Default for Scopes {
    fn default() -> Self {
        Scopes::new()
    }
}

impl Scopes {
    /// A fresh arena holding only the global scope.
    pub fn new() -> Self {
        Scopes {
            contexts: vec![Context::new(None, BlockKind::Global)],
            symbols: Vec::new(),
        }
    }

    pub fn global(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn push(&mut self, parent: ScopeId, kind: BlockKind) -> ScopeId {
        let id = ScopeId(self.contexts.len() as u32);
        self.contexts.push(Context::new(Some(parent), kind));
        id
    }

    fn ctx(&self, id: ScopeId) -> &Context {
        &self.contexts[id.0 as usize]
    }

    fn ctx_mut(&mut self, id: ScopeId) -> &mut Context {
        &mut self.contexts[id.0 as usize]
    }

    pub fn parent(&self, id: ScopeId) -> Option<ScopeId> {
        self.ctx(id).parent
    }

    pub fn kind(&self, id: ScopeId) -> BlockKind {
        self.ctx(id).kind
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// Binds `name` in `scope` and gives it the next slot of the enclosing frame.
    /// Only the innermost scope is checked for duplicates, so shadowing is allowed.
    pub fn declare(&mut self, scope: ScopeId, name: &str, ty: Type) -> Result<SymbolId, ScopeError> {
        self.check_free(scope, name)?;
        let addr = self.alloc(scope)?;
        let global = self.func_of(scope).is_none();
        trace!(name, %ty, addr, global, "declare");
        Ok(self.bind(scope, Symbol {
            name: name.to_string(),
            ty,
            addr,
            global,
            func: None,
        }))
    }

    /// Binds a function name. Functions take no stack slot.
    pub fn declare_func(
        &mut self,
        scope: ScopeId,
        name: &str,
        ret: Type,
        params: Vec<Type>,
    ) -> Result<SymbolId, ScopeError> {
        self.check_free(scope, name)?;
        trace!(name, %ret, arity = params.len(), "declare func");
        let global = self.func_of(scope).is_none();
        Ok(self.bind(scope, Symbol {
            name: name.to_string(),
            ty: Type::Func,
            addr: 0,
            global,
            func: Some(FuncInfo { ret, params, entry: None }),
        }))
    }

    fn check_free(&self, scope: ScopeId, name: &str) -> Result<(), ScopeError> {
        if self.lookup_in(scope, name).is_some() {
            return Err(ScopeError::Duplicate { name: name.to_string() });
        }
        Ok(())
    }

    fn bind(&mut self, scope: ScopeId, symbol: Symbol) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(symbol);
        self.ctx_mut(scope).symbols.push(id);
        id
    }

    fn lookup_in(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        self.ctx(scope)
            .symbols
            .iter()
            .rev()
            .copied()
            .find(|&id| self.symbol(id).name == name)
    }

    /// Looks `name` up through the parent chain, stopping after the first
    /// Function scope, then falls back to a separate search of the global scope.
    /// With `local_only` only `scope` itself is searched.
    pub fn resolve(&self, scope: ScopeId, name: &str, local_only: bool) -> Option<SymbolId> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            if let Some(found) = self.lookup_in(id, name) {
                return Some(found);
            }
            let ctx = self.ctx(id);
            if local_only || ctx.kind == BlockKind::Function {
                break;
            }
            cur = ctx.parent;
        }
        if local_only {
            return None;
        }
        self.lookup_in(self.global(), name)
    }

    /// Nearest Function scope enclosing (or equal to) `scope`.
    pub fn func_of(&self, scope: ScopeId) -> Option<ScopeId> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            if self.kind(id) == BlockKind::Function {
                return Some(id);
            }
            cur = self.parent(id);
        }
        None
    }

    /// Nearest Loop scope, not looking past any Function or Global boundary.
    pub fn loop_of(&self, scope: ScopeId) -> Option<ScopeId> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            match self.kind(id) {
                BlockKind::Loop => return Some(id),
                BlockKind::Normal => cur = self.parent(id),
                BlockKind::Function | BlockKind::Global => return None,
            }
        }
        None
    }

    /// Takes the next slot from the nearest Function scope, or the global one.
    pub fn alloc(&mut self, scope: ScopeId) -> Result<u16, ScopeError> {
        let frame = self.func_of(scope).unwrap_or(self.global());
        let ctx = self.ctx_mut(frame);
        let addr = ctx.allocated;
        ctx.allocated = addr.checked_add(1).ok_or(ScopeError::SlotOverflow)?;
        Ok(addr)
    }

    /// Slots handed out so far by `scope`'s frame counter.
    pub fn allocated(&self, scope: ScopeId) -> u16 {
        self.ctx(scope).allocated
    }

    /// The function symbol a Function scope belongs to.
    pub fn owner(&self, scope: ScopeId) -> Option<SymbolId> {
        self.ctx(scope).owner
    }

    pub fn set_owner(&mut self, scope: ScopeId, func: SymbolId) {
        self.ctx_mut(scope).owner = Some(func);
    }

    /// Labels of a Loop scope; `None` for every other kind.
    pub fn labels_mut(&mut self, scope: ScopeId) -> Option<&mut LoopLabels> {
        self.ctx_mut(scope).labels.as_mut()
    }

    pub fn take_labels(&mut self, scope: ScopeId) -> Option<LoopLabels> {
        self.ctx_mut(scope).labels.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_slots_are_dense() {
        let mut s = Scopes::new();
        let g = s.global();
        let a = s.declare(g, "a", Type::Int64).unwrap();
        let inner = s.push(g, BlockKind::Normal);
        let b = s.declare(inner, "b", Type::Real).unwrap();
        let c = s.declare(g, "c", Type::Str).unwrap();
        assert_eq!(s.symbol(a).addr, 0);
        assert_eq!(s.symbol(b).addr, 1);
        assert_eq!(s.symbol(c).addr, 2);
        assert!(s.symbol(b).global);
        assert_eq!(s.allocated(g), 3);
    }

    #[test]
    fn function_locals_use_their_own_counter() {
        let mut s = Scopes::new();
        let g = s.global();
        s.declare(g, "x", Type::Int64).unwrap();
        let f = s.push(g, BlockKind::Function);
        let n = s.declare(f, "n", Type::Int32).unwrap();
        let body = s.push(f, BlockKind::Normal);
        let t = s.declare(body, "t", Type::Int64).unwrap();
        assert_eq!(s.symbol(n).addr, 0);
        assert_eq!(s.symbol(t).addr, 1);
        assert!(!s.symbol(t).global);
        assert_eq!(s.allocated(f), 2);
        assert_eq!(s.allocated(g), 1);
    }

    #[test]
    fn duplicates_only_checked_in_innermost_scope() {
        let mut s = Scopes::new();
        let g = s.global();
        s.declare(g, "x", Type::Int64).unwrap();
        assert_eq!(
            s.declare(g, "x", Type::Int8),
            Err(ScopeError::Duplicate { name: "x".into() })
        );
        let inner = s.push(g, BlockKind::Normal);
        let shadow = s.declare(inner, "x", Type::Int8).unwrap();
        assert_eq!(s.resolve(inner, "x", false), Some(shadow));
    }

    #[test]
    fn function_boundary_stops_chain_but_global_fallback_applies() {
        let mut s = Scopes::new();
        let g = s.global();
        let outer_block = s.push(g, BlockKind::Normal);
        let hidden = s.declare(outer_block, "hidden", Type::Int64).unwrap();
        let f = s.push(outer_block, BlockKind::Function);
        let body = s.push(f, BlockKind::Normal);
        assert_eq!(s.resolve(outer_block, "hidden", false), Some(hidden));
        assert_eq!(s.resolve(body, "hidden", false), None);

        let late = s.declare(g, "late", Type::Int64).unwrap();
        assert_eq!(s.resolve(body, "late", false), Some(late));
        assert_eq!(s.resolve(body, "late", true), None);
    }

    #[test]
    fn local_only_searches_one_scope() {
        let mut s = Scopes::new();
        let g = s.global();
        let x = s.declare(g, "x", Type::Int64).unwrap();
        let inner = s.push(g, BlockKind::Normal);
        assert_eq!(s.resolve(inner, "x", true), None);
        assert_eq!(s.resolve(g, "x", true), Some(x));
    }

    #[test]
    fn loop_lookup_stops_at_functions() {
        let mut s = Scopes::new();
        let g = s.global();
        let header = s.push(g, BlockKind::Normal);
        let lp = s.push(header, BlockKind::Loop);
        let inner = s.push(lp, BlockKind::Normal);
        assert_eq!(s.loop_of(inner), Some(lp));
        assert_eq!(s.loop_of(header), None);

        let f = s.push(inner, BlockKind::Function);
        let fbody = s.push(f, BlockKind::Normal);
        assert_eq!(s.loop_of(fbody), None);
        assert_eq!(s.func_of(fbody), Some(f));
        assert_eq!(s.func_of(inner), None);
    }

    #[test]
    fn only_loops_carry_labels() {
        let mut s = Scopes::new();
        let g = s.global();
        let lp = s.push(g, BlockKind::Loop);
        assert!(s.labels_mut(lp).is_some());
        assert!(s.labels_mut(g).is_none());
        assert!(s.take_labels(lp).is_some());
        assert!(s.labels_mut(lp).is_none());
    }

    #[test]
    fn functions_take_no_slot() {
        let mut s = Scopes::new();
        let g = s.global();
        let f = s.declare_func(g, "f", Type::Int32, vec![Type::Int8]).unwrap();
        let x = s.declare(g, "x", Type::Int64).unwrap();
        assert_eq!(s.symbol(f).ty, Type::Func);
        assert_eq!(s.symbol(x).addr, 0);
        let info = s.symbol(f).func.as_ref().unwrap();
        assert_eq!(info.params, vec![Type::Int8]);
        assert_eq!(info.entry, None);
    }
}
