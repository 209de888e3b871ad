use tracing::debug;

use crate::ast::*;
use crate::builtin;
use crate::lexer::Token;
use crate::scope::{BlockKind, ScopeError, ScopeId, Scopes, SymbolId};

/// Builds the syntax tree and declares every name it meets in a fresh [`Scopes`] arena.
///
/// Newlines are dropped from the token stream, but the parser remembers which
/// tokens started a line so that a bare `ret` does not swallow the next statement.
pub struct Parser {
    tokens: Vec<(Token, Span)>,
    line_start: Vec<bool>,
    pos: usize,
    scopes: Scopes,
    scope: ScopeId,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Parse error at byte {start}: {message}", start = .span.start)]
pub struct ParseError {
    pub code: &'static str,
    pub span: Span,
    pub message: String,
    pub suggestion: Option<String>,
}

type Result<T> = std::result::Result<T, ParseError>;

impl Parser {
    pub fn new(tokens: Vec<(Token, Span)>) -> Self {
        let mut kept = Vec::with_capacity(tokens.len());
        let mut line_start = Vec::with_capacity(tokens.len());
        let mut after_newline = true;
        for (tok, span) in tokens {
            if tok == Token::Newline {
                after_newline = true;
                continue;
            }
            kept.push((tok, span));
            line_start.push(after_newline);
            after_newline = false;
        }
        let scopes = Scopes::new();
        let scope = scopes.global();
        Parser { tokens: kept, line_start, pos: 0, scopes, scope }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some((_, s)) => *s,
            None => {
                let end = self.tokens.last().map_or(0, |(_, s)| s.end);
                Span::new(end, end)
            }
        }
    }

    /// Span of the previously consumed token.
    fn prev_span(&self) -> Span {
        if self.pos > 0 {
            self.tokens[self.pos - 1].1
        } else {
            Span::UNKNOWN
        }
    }

    fn at_line_start(&self) -> bool {
        self.line_start.get(self.pos).copied().unwrap_or(true)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<Span> {
        match self.peek() {
            Some(tok) if tok == expected => {
                let span = self.peek_span();
                self.advance();
                Ok(span)
            }
            Some(tok) => {
                let message = format!("expected {}, got {}", expected.describe(), tok.describe());
                Err(self.error("MZ-P001", message))
            }
            None => Err(self.error(
                "MZ-P002",
                format!("expected {}, got end of input", expected.describe()),
            )),
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Span)> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                let span = self.peek_span();
                self.advance();
                Ok((name, span))
            }
            Some(tok) => Err(self.error("MZ-P001", format!("expected identifier, got {}", tok.describe()))),
            None => Err(self.error("MZ-P002", "expected identifier, got end of input".into())),
        }
    }

    fn error(&self, code: &'static str, message: String) -> ParseError {
        ParseError {
            code,
            span: self.peek_span(),
            message,
            suggestion: None,
        }
    }

    fn error_at(&self, code: &'static str, span: Span, message: String) -> ParseError {
        ParseError { code, span, message, suggestion: None }
    }

    fn scope_error(&self, err: ScopeError, span: Span) -> ParseError {
        let code = match err {
            ScopeError::Duplicate { .. } => "MZ-P003",
            ScopeError::SlotOverflow => "MZ-P009",
        };
        self.error_at(code, span, err.to_string())
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn enter(&mut self, kind: BlockKind) -> ScopeId {
        let outer = self.scope;
        self.scope = self.scopes.push(outer, kind);
        outer
    }

    fn leave(&mut self, outer: ScopeId) {
        self.scope = outer;
    }

    // ---- Top level ----

    pub fn parse_module(mut self) -> Result<Module> {
        let mut stmts = Vec::new();
        while !self.at_end() {
            if let Some(stmt) = self.parse_stmt()? {
                stmts.push(stmt);
            }
        }
        debug!(
            statements = stmts.len(),
            symbols = self.scopes.symbol_count(),
            "parsed"
        );
        let scope = self.scopes.global();
        Ok(Module {
            body: Block { scope, stmts },
            scopes: self.scopes,
        })
    }

    // ---- Statements ----

    /// `None` for statements that produce no node: `;` and a `var` without initializer.
    fn parse_stmt(&mut self) -> Result<Option<Stmt>> {
        let start = self.peek_span();
        let kind = match self.peek() {
            Some(Token::Semicolon) => {
                self.advance();
                return Ok(None);
            }
            Some(Token::Var) => {
                return Ok(self
                    .parse_var()?
                    .map(|assign| Stmt::new(StmtKind::Expr(assign), start.merge(self.prev_span()))));
            }
            Some(Token::Print) => self.parse_print()?,
            Some(Token::If) => self.parse_if()?,
            Some(Token::For) => self.parse_for()?,
            Some(Token::Func) => self.parse_func()?,
            Some(Token::Ret) => self.parse_ret()?,
            Some(Token::Break) => {
                self.advance();
                StmtKind::Break { target: self.scopes.loop_of(self.scope) }
            }
            Some(Token::Continue) => {
                self.advance();
                StmtKind::Continue { target: self.scopes.loop_of(self.scope) }
            }
            Some(Token::LBrace) => StmtKind::Block(self.parse_block(BlockKind::Normal)?),
            _ => StmtKind::Expr(self.parse_expr()?),
        };
        Ok(Some(Stmt::new(kind, start.merge(self.prev_span()))))
    }

    fn parse_type_name(&mut self) -> Result<Type> {
        let (name, span) = self.expect_ident()?;
        Type::from_name(&name).ok_or_else(|| ParseError {
            suggestion: Some("Known types are i8 i16 i32 i64 bool str real void.".into()),
            ..self.error_at("MZ-P005", span, format!("unknown type '{name}'"))
        })
    }

    fn check_not_builtin(&self, name: &str, span: Span) -> Result<()> {
        if builtin::is_reserved(name) {
            return Err(ParseError {
                suggestion: Some(format!("Pick another name; '{name}' is a builtin.")),
                ..self.error_at("MZ-P007", span, format!("'{name}' is reserved"))
            });
        }
        Ok(())
    }

    /// `var name [: type] [= expr]`. The initializer is parsed before the name is
    /// bound, so `var x = x + 1` reads an outer `x`.
    fn parse_var(&mut self) -> Result<Option<Expr>> {
        self.expect(&Token::Var)?;
        let (name, name_span) = self.expect_ident()?;
        self.check_not_builtin(&name, name_span)?;

        let ty = if self.eat(&Token::Colon) {
            self.parse_type_name()?
        } else {
            Type::Unknown
        };
        if matches!(ty, Type::Void) {
            return Err(self.error_at("MZ-P006", name_span, format!("variable '{name}' cannot be void")));
        }

        let init = if self.eat(&Token::Assign) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        if ty == Type::Unknown && init.is_none() {
            return Err(ParseError {
                suggestion: Some(format!("Write 'var {name}: i64' or 'var {name} = 0'.")),
                ..self.error_at("MZ-P006", name_span, format!("variable '{name}' needs a type or an initializer"))
            });
        }

        let symbol = self
            .scopes
            .declare(self.scope, &name, ty)
            .map_err(|e| self.scope_error(e, name_span))?;

        Ok(init.map(|value| {
            let span = name_span.merge(value.span);
            Expr::new(ExprKind::Assign { target: symbol, value: Box::new(value) }, span)
        }))
    }

    /// `print expr`, or the call form `print(a, b, ...)`.
    ///
    /// A single parenthesized element is an ordinary grouped operand of the
    /// statement form, so `print (2 + 3) * 4` prints 20.
    fn parse_print(&mut self) -> Result<StmtKind> {
        let print_span = self.expect(&Token::Print)?;
        if self.peek() != Some(&Token::LParen) {
            return Ok(StmtKind::Print(self.parse_expr()?));
        }

        let open = self.expect(&Token::LParen)?;
        let mut items = self.parse_args()?;
        let close = self.prev_span();
        if items.len() == 1 {
            let grouped = items.remove(0);
            let grouped = Expr::new(grouped.node, open.merge(close));
            return Ok(StmtKind::Print(self.parse_binary_rest(grouped, 0)?));
        }

        let callee = builtin::lookup("print").map(Callee::Builtin).ok_or_else(|| {
            self.error_at("MZ-P004", print_span, "builtin 'print' is not registered".into())
        })?;
        let span = print_span.merge(close);
        Ok(StmtKind::Expr(Expr::new(ExprKind::Call { callee, args: items }, span)))
    }

    fn parse_if(&mut self) -> Result<StmtKind> {
        self.expect(&Token::If)?;
        let cond = self.parse_expr()?;
        let then = self.parse_block(BlockKind::Normal)?;
        let otherwise = if self.eat(&Token::Else) {
            let start = self.peek_span();
            let kind = if self.peek() == Some(&Token::If) {
                self.parse_if()?
            } else {
                StmtKind::Block(self.parse_block(BlockKind::Normal)?)
            };
            Some(Box::new(Stmt::new(kind, start.merge(self.prev_span()))))
        } else {
            None
        };
        Ok(StmtKind::If { cond, then, otherwise })
    }

    /// `for [init]; cond; [post] [{ body }]`
    ///
    /// The header gets its own Normal scope so a `var` in `init` is visible to
    /// the whole loop and nowhere after it.
    fn parse_for(&mut self) -> Result<StmtKind> {
        self.expect(&Token::For)?;
        let outer = self.enter(BlockKind::Normal);

        let init = match self.peek() {
            Some(Token::Semicolon) => None,
            Some(Token::Var) => self.parse_var()?,
            _ => Some(self.parse_expr()?),
        };
        self.expect(&Token::Semicolon)?;
        let cond = self.parse_expr()?;
        self.expect(&Token::Semicolon)?;
        let post = match self.peek() {
            Some(Token::LBrace) | None => None,
            _ if self.at_line_start() => None,
            _ => Some(self.parse_expr()?),
        };
        let body = if self.peek() == Some(&Token::LBrace) {
            Some(self.parse_block(BlockKind::Loop)?)
        } else {
            None
        };

        self.leave(outer);
        Ok(StmtKind::For { init, cond, post, body })
    }

    /// `func name(p: type, ...)[: type] { ... }`
    fn parse_func(&mut self) -> Result<StmtKind> {
        self.expect(&Token::Func)?;
        let (name, name_span) = self.expect_ident()?;
        self.check_not_builtin(&name, name_span)?;

        self.expect(&Token::LParen)?;
        let mut params: Vec<(String, Type, Span)> = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                let (pname, pspan) = self.expect_ident()?;
                self.expect(&Token::Colon)?;
                let pty = self.parse_type_name()?;
                if pty == Type::Void {
                    return Err(self.error_at("MZ-P006", pspan, format!("parameter '{pname}' cannot be void")));
                }
                params.push((pname, pty, pspan));
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen)?;
        let ret = if self.eat(&Token::Colon) {
            self.parse_type_name()?
        } else {
            Type::Void
        };

        let param_types = params.iter().map(|(_, ty, _)| *ty).collect();
        let symbol = self
            .scopes
            .declare_func(self.scope, &name, ret, param_types)
            .map_err(|e| self.scope_error(e, name_span))?;

        let outer = self.enter(BlockKind::Function);
        self.scopes.set_owner(self.scope, symbol);
        for (pname, pty, pspan) in &params {
            self.check_not_builtin(pname, *pspan)?;
            self.scopes
                .declare(self.scope, pname, *pty)
                .map_err(|e| self.scope_error(e, *pspan))?;
        }
        let stmts = self.parse_block_body()?;
        let body = Block { scope: self.scope, stmts };
        self.leave(outer);

        Ok(StmtKind::Func {
            symbol,
            params: params.len() as u16,
            body,
        })
    }

    /// `ret [expr]`; the value must start on the same line as `ret`.
    fn parse_ret(&mut self) -> Result<StmtKind> {
        self.expect(&Token::Ret)?;
        let func = self.current_func();
        let value = match self.peek() {
            None | Some(Token::RBrace) | Some(Token::Semicolon) => None,
            Some(_) if self.at_line_start() => None,
            Some(_) => Some(self.parse_expr()?),
        };
        Ok(StmtKind::Return { value, func })
    }

    fn current_func(&self) -> Option<SymbolId> {
        self.scopes
            .func_of(self.scope)
            .and_then(|f| self.scopes.owner(f))
    }

    fn parse_block(&mut self, kind: BlockKind) -> Result<Block> {
        let outer = self.enter(kind);
        let stmts = self.parse_block_body()?;
        let block = Block { scope: self.scope, stmts };
        self.leave(outer);
        Ok(block)
    }

    /// `{ stmt* }` in the current scope.
    fn parse_block_body(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&Token::LBrace)?;
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                Some(Token::RBrace) => {
                    self.advance();
                    return Ok(stmts);
                }
                None => return Err(self.error("MZ-P002", "expected '}', got end of input".into())),
                _ => {
                    if let Some(stmt) = self.parse_stmt()? {
                        stmts.push(stmt);
                    }
                }
            }
        }
    }

    // ---- Expressions ----

    pub fn parse_expr(&mut self) -> Result<Expr> {
        if let (Some(Token::Ident(_)), Some(Token::Assign)) = (self.peek(), self.peek_at(1)) {
            return self.parse_assign();
        }
        let lhs = self.parse_unary()?;
        self.parse_binary_rest(lhs, 0)
    }

    fn parse_assign(&mut self) -> Result<Expr> {
        let (name, span) = self.expect_ident()?;
        self.expect(&Token::Assign)?;
        let target = self.resolve(&name, span)?;
        let value = self.parse_expr()?;
        let span = span.merge(value.span);
        Ok(Expr::new(ExprKind::Assign { target, value: Box::new(value) }, span))
    }

    fn peek_binop(&self) -> Option<BinOp> {
        Some(match self.peek()? {
            Token::Star => BinOp::Mul,
            Token::Slash => BinOp::Div,
            Token::Percent => BinOp::Mod,
            Token::Plus => BinOp::Add,
            Token::Minus => BinOp::Sub,
            Token::Less => BinOp::Lt,
            Token::LessEq => BinOp::Le,
            Token::Greater => BinOp::Gt,
            Token::GreaterEq => BinOp::Ge,
            Token::Eq => BinOp::Eq,
            Token::NotEq => BinOp::Ne,
            Token::Amp => BinOp::BitAnd,
            Token::Caret => BinOp::BitXor,
            Token::Pipe => BinOp::BitOr,
            Token::And => BinOp::And,
            Token::Or => BinOp::Or,
            _ => return None,
        })
    }

    /// Precedence climbing from an already parsed left operand.
    fn parse_binary_rest(&mut self, mut lhs: Expr, min_prec: u8) -> Result<Expr> {
        while let Some(op) = self.peek_binop() {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.advance();
            let first = self.parse_unary()?;
            let rhs = self.parse_binary_rest(first, prec + 1)?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr::new(
                ExprKind::Binary { op, left: Box::new(lhs), right: Box::new(rhs) },
                span,
            );
        }
        Ok(lhs)
    }

    /// Prefix `+ - not` bind tighter than any binary operator.
    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Some(Token::Plus) => UnaryOp::Plus,
            Some(Token::Minus) => UnaryOp::Minus,
            Some(Token::Not) => UnaryOp::Not,
            _ => return self.parse_primary(),
        };
        let start = self.peek_span();
        self.advance();
        let operand = self.parse_unary()?;
        let span = start.merge(operand.span);
        Ok(Expr::new(ExprKind::Unary { op, operand: Box::new(operand) }, span))
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let span = self.peek_span();
        let literal = match self.peek().cloned() {
            Some(Token::Int(lit)) => Literal::Int { value: lit.value, ty: lit.ty },
            Some(Token::Real(v)) => Literal::Real(v),
            Some(Token::Str(s)) => Literal::Str(s),
            Some(Token::True) => Literal::Bool(true),
            Some(Token::False) => Literal::Bool(false),
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_expr()?;
                let close = self.expect(&Token::RParen)?;
                return Ok(Expr::new(inner.node, span.merge(close)));
            }
            Some(Token::Ident(name)) => {
                self.advance();
                return if self.peek() == Some(&Token::LParen) {
                    self.parse_call(name, span)
                } else {
                    let symbol = self.resolve(&name, span)?;
                    Ok(Expr::new(ExprKind::Var(symbol), span))
                };
            }
            Some(tok) => {
                return Err(self.error("MZ-P001", format!("expected expression, got {}", tok.describe())));
            }
            None => return Err(self.error("MZ-P002", "expected expression, got end of input".into())),
        };
        self.advance();
        Ok(Expr::new(ExprKind::Const(literal), span))
    }

    fn parse_call(&mut self, name: String, name_span: Span) -> Result<Expr> {
        let callee = match builtin::lookup(&name) {
            Some(b) => Callee::Builtin(b),
            None => {
                let symbol = self.resolve(&name, name_span)?;
                if self.scopes.symbol(symbol).func.is_none() {
                    return Err(self.error_at("MZ-P008", name_span, format!("'{name}' is not a function")));
                }
                Callee::Func(symbol)
            }
        };
        self.expect(&Token::LParen)?;
        let args = self.parse_args()?;
        let span = name_span.merge(self.prev_span());
        Ok(Expr::new(ExprKind::Call { callee, args }, span))
    }

    /// Comma-separated expressions up to and including `)`; the `(` is already consumed.
    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        Ok(args)
    }

    fn resolve(&self, name: &str, span: Span) -> Result<SymbolId> {
        self.scopes.resolve(self.scope, name, false).ok_or_else(|| ParseError {
            suggestion: Some(format!("Declare it first with 'var {name} = ...'.")),
            ..self.error_at("MZ-P004", span, format!("undeclared identifier '{name}'"))
        })
    }
}

pub fn parse(tokens: Vec<(Token, Span)>) -> Result<Module> {
    Parser::new(tokens).parse_module()
}
