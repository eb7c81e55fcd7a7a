//! Name binding and fluent rewriting.
//!
//! Turns every fluent dotted path into the plain form the rest of the
//! pipeline understands: `indicator.rsi.close(14)` becomes `rsi(close, 14)`,
//! `input.high` becomes `high`, `strategy.long` becomes `"long"` and
//! `market.position` becomes `position_size()`. Along the way every bare name
//! is resolved against block scopes, parameters, columns and the stdlib, so
//! after binding no reference is left unresolved.

use std::collections::HashSet;

use crate::domain::ast::{Block, Expr, ExprKind, Literal, NodeId, ProgramAst, Span, Stmt, StmtKind};
use crate::domain::error::{CompileError, ErrorCode};
use crate::domain::stdlib::namespace::{NamespaceTable, Target};
use crate::domain::stdlib::{Stdlib, is_column};

struct Binder<'a> {
    stdlib: &'a Stdlib,
    namespace: &'a NamespaceTable,
    params: HashSet<String>,
    scopes: Vec<HashSet<String>>,
    next_id: NodeId,
}

/// Rewrite fluent paths and check that every name resolves.
pub fn bind(
    mut ast: ProgramAst,
    stdlib: &Stdlib,
    namespace: &NamespaceTable,
) -> Result<ProgramAst, CompileError> {
    let mut binder = Binder {
        stdlib,
        namespace,
        params: ast.params.iter().map(|p| p.name.clone()).collect(),
        scopes: vec![HashSet::new()],
        next_id: ast.next_id,
    };
    let body = std::mem::replace(
        &mut ast.body,
        Block {
            span: Span::default(),
            stmts: Vec::new(),
        },
    );
    ast.body = binder.bind_stmts(body)?;
    ast.next_id = binder.next_id;
    Ok(ast)
}

impl Binder<'_> {
    fn alloc_id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn is_local(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.contains(name))
    }

    fn declare(&mut self, name: &str) {
        if !self.is_local(name) {
            if let Some(scope) = self.scopes.last_mut() {
                scope.insert(name.to_string());
            }
        }
    }

    fn is_value_name(&self, name: &str) -> bool {
        self.is_local(name) || self.params.contains(name) || is_column(name)
    }

    fn bind_stmts(&mut self, block: Block) -> Result<Block, CompileError> {
        let mut stmts = Vec::with_capacity(block.stmts.len());
        for stmt in block.stmts {
            stmts.push(self.bind_stmt(stmt)?);
        }
        Ok(Block {
            span: block.span,
            stmts,
        })
    }

    fn bind_scoped(&mut self, block: Block, binding: Option<&str>) -> Result<Block, CompileError> {
        let mut scope = HashSet::new();
        if let Some(name) = binding {
            scope.insert(name.to_string());
        }
        self.scopes.push(scope);
        let result = self.bind_stmts(block);
        self.scopes.pop();
        result
    }

    fn bind_stmt(&mut self, stmt: Stmt) -> Result<Stmt, CompileError> {
        let kind = match stmt.kind {
            StmtKind::Assignment { name, value } => {
                let value = self.bind_expr(value)?;
                self.declare(&name);
                StmtKind::Assignment { name, value }
            }
            StmtKind::Return(expr) => StmtKind::Return(self.bind_expr(expr)?),
            StmtKind::Expr(expr) => StmtKind::Expr(self.bind_expr(expr)?),
            StmtKind::If {
                branches,
                else_block,
            } => {
                let mut bound = Vec::with_capacity(branches.len());
                for (condition, body) in branches {
                    let condition = self.bind_expr(condition)?;
                    bound.push((condition, self.bind_scoped(body, None)?));
                }
                let else_block = match else_block {
                    Some(body) => Some(self.bind_scoped(body, None)?),
                    None => None,
                };
                StmtKind::If {
                    branches: bound,
                    else_block,
                }
            }
            StmtKind::For {
                var,
                start,
                end,
                body,
            } => {
                let start = self.bind_expr(start)?;
                let end = self.bind_expr(end)?;
                let body = self.bind_scoped(body, Some(&var))?;
                StmtKind::For {
                    var,
                    start,
                    end,
                    body,
                }
            }
            StmtKind::Import { path } => {
                return Err(CompileError::security(
                    ErrorCode::ImportForbidden,
                    format!("import of '{}' is not allowed", path.join(".")),
                    stmt.span,
                ));
            }
        };
        Ok(Stmt {
            id: stmt.id,
            span: stmt.span,
            kind,
        })
    }

    fn undefined(&self, name: &str, span: Span) -> CompileError {
        let message = match self.stdlib.foreign(name) {
            Some(def) if def.since > self.stdlib.version() => format!(
                "'{}' is not defined in stdlib {} (introduced in {})",
                name,
                self.stdlib.version(),
                def.since
            ),
            Some(def) => format!(
                "'{}' is not defined in stdlib {} (removed in {}; migrate the program)",
                name,
                self.stdlib.version(),
                def.removed_in.unwrap_or(self.stdlib.version())
            ),
            None => format!("undefined name '{}'", name),
        };
        CompileError::syntax(ErrorCode::UndefinedName, message, span)
    }

    fn bind_expr(&mut self, expr: Expr) -> Result<Expr, CompileError> {
        let Expr { id, span, kind } = expr;
        let kind = match kind {
            ExprKind::Literal(lit) => ExprKind::Literal(lit),
            ExprKind::Identifier(name) => {
                if self.is_value_name(&name) {
                    ExprKind::Identifier(name)
                } else if self.stdlib.lookup(&name).is_some() {
                    return Err(CompileError::type_error(
                        ErrorCode::ArgumentMismatch,
                        format!("'{}' is a function and must be called", name),
                        span,
                    ));
                } else {
                    return Err(self.undefined(&name, span));
                }
            }
            ExprKind::DottedAccess { base, field } => {
                let as_expr = Expr {
                    id,
                    span,
                    kind: ExprKind::DottedAccess { base, field },
                };
                return self.bind_access(as_expr);
            }
            ExprKind::Call { callee, args } => {
                let mut bound_args = Vec::with_capacity(args.len());
                for arg in args {
                    bound_args.push(self.bind_expr(arg)?);
                }
                return self.bind_call(id, span, *callee, bound_args);
            }
            ExprKind::BinaryOp { op, left, right } => ExprKind::BinaryOp {
                op,
                left: Box::new(self.bind_expr(*left)?),
                right: Box::new(self.bind_expr(*right)?),
            },
            ExprKind::UnaryOp { op, operand } => ExprKind::UnaryOp {
                op,
                operand: Box::new(self.bind_expr(*operand)?),
            },
            ExprKind::Conditional {
                condition,
                then_branch,
                else_branch,
            } => ExprKind::Conditional {
                condition: Box::new(self.bind_expr(*condition)?),
                then_branch: Box::new(self.bind_expr(*then_branch)?),
                else_branch: Box::new(self.bind_expr(*else_branch)?),
            },
        };
        Ok(Expr { id, span, kind })
    }

    fn column_ident(&mut self, column: &str, span: Span) -> Expr {
        Expr {
            id: self.alloc_id(),
            span,
            kind: ExprKind::Identifier(column.to_string()),
        }
    }

    /// Materialize a resolved namespace target used as a value.
    fn lower_target(&mut self, target: Target, id: NodeId, span: Span) -> Expr {
        let kind = match target {
            Target::Column(column) => ExprKind::Identifier(column.to_string()),
            Target::Constant(text) => ExprKind::Literal(Literal::Str(text.to_string())),
            Target::Call { symbol, implicit } => {
                let callee = Expr {
                    id: self.alloc_id(),
                    span,
                    kind: ExprKind::Identifier(symbol.to_string()),
                };
                let args = implicit
                    .iter()
                    .map(|col| self.column_ident(col, span))
                    .collect();
                ExprKind::Call {
                    callee: Box::new(callee),
                    args,
                }
            }
        };
        Expr { id, span, kind }
    }

    fn bind_access(&mut self, expr: Expr) -> Result<Expr, CompileError> {
        let path: Option<Vec<String>> = expr
            .dotted_path()
            .map(|segments| segments.into_iter().map(str::to_string).collect());

        if let Some(path) = path {
            let segments: Vec<&str> = path.iter().map(String::as_str).collect();
            let root = segments[0];
            if self.namespace.is_root(root) {
                let target = self.namespace.resolve(&segments).cloned().ok_or_else(|| {
                    CompileError::security(
                        ErrorCode::UnknownPath,
                        format!("'{}' is not a known path", path.join(".")),
                        expr.span,
                    )
                })?;
                return Ok(self.lower_target(target, expr.id, expr.span));
            }
            if segments.len() == 2 && !(self.is_local(root) || self.params.contains(root)) {
                return Err(self.undefined(root, expr.span));
            }
        }

        let Expr { id, span, kind } = expr;
        let ExprKind::DottedAccess { base, field } = kind else {
            return self.bind_expr(Expr { id, span, kind });
        };
        Ok(Expr {
            id,
            span,
            kind: ExprKind::DottedAccess {
                base: Box::new(self.bind_expr(*base)?),
                field,
            },
        })
    }

    fn bind_call(
        &mut self,
        id: NodeId,
        span: Span,
        callee: Expr,
        args: Vec<Expr>,
    ) -> Result<Expr, CompileError> {
        match &callee.kind {
            ExprKind::Identifier(name) => {
                if self.stdlib.lookup(name).is_none() {
                    if self.is_value_name(name) {
                        return Err(CompileError::security(
                            ErrorCode::NotCallable,
                            format!("'{}' is not callable", name),
                            callee.span,
                        ));
                    }
                    return Err(self.undefined(name, callee.span));
                }
                Ok(Expr {
                    id,
                    span,
                    kind: ExprKind::Call {
                        callee: Box::new(callee),
                        args,
                    },
                })
            }
            ExprKind::DottedAccess { .. } => {
                let path: Vec<&str> = callee.dotted_path().unwrap_or_default();
                match self.namespace.resolve(&path).cloned() {
                    Some(Target::Call { symbol, implicit }) => {
                        let mut full_args: Vec<Expr> = implicit
                            .iter()
                            .map(|col| self.column_ident(col, callee.span))
                            .collect();
                        full_args.extend(args);
                        let callee = Expr {
                            id: callee.id,
                            span: callee.span,
                            kind: ExprKind::Identifier(symbol.to_string()),
                        };
                        Ok(Expr {
                            id,
                            span,
                            kind: ExprKind::Call {
                                callee: Box::new(callee),
                                args: full_args,
                            },
                        })
                    }
                    _ => Err(CompileError::security(
                        ErrorCode::NotCallable,
                        format!("'{}' is not callable", path.join(".")),
                        callee.span,
                    )),
                }
            }
            _ => Err(CompileError::security(
                ErrorCode::DynamicCallTarget,
                "call target must be a named function, not a computed value",
                callee.span,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::Phase;
    use crate::domain::parser::parse;
    use crate::domain::stdlib::StdlibVersion;

    fn bind_source(source: &str) -> Result<ProgramAst, CompileError> {
        let stdlib = Stdlib::current();
        let namespace = NamespaceTable::build(&stdlib);
        bind(parse(source).unwrap(), &stdlib, &namespace)
    }

    fn returned(ast: &ProgramAst) -> &Expr {
        match &ast.body.stmts.last().unwrap().kind {
            StmtKind::Return(expr) => expr,
            other => panic!("expected return, got {:?}", other),
        }
    }

    fn call_shape(expr: &Expr) -> (String, Vec<String>) {
        match &expr.kind {
            ExprKind::Call { callee, args } => (
                callee.callee_name().unwrap().to_string(),
                args.iter()
                    .map(|a| match &a.kind {
                        ExprKind::Identifier(n) => n.clone(),
                        ExprKind::Literal(Literal::Number(v)) => v.to_string(),
                        other => format!("{:?}", other),
                    })
                    .collect(),
            ),
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn fluent_indicator_becomes_positional_call() {
        let ast = bind_source("@calculate\n  return indicator.rsi.close(14)\n").unwrap();
        assert_eq!(
            call_shape(returned(&ast)),
            ("rsi".to_string(), vec!["close".to_string(), "14".to_string()])
        );
    }

    #[test]
    fn fluent_and_positional_bind_to_same_shape() {
        let fluent = bind_source("@calculate\n  return indicator.sma.high(5)\n").unwrap();
        let positional = bind_source("@calculate\n  return sma(high, 5)\n").unwrap();
        assert_eq!(call_shape(returned(&fluent)), call_shape(returned(&positional)));
    }

    #[test]
    fn fixed_columns_are_prepended() {
        let ast = bind_source("@calculate\n  return indicator.atr(14)\n").unwrap();
        assert_eq!(
            call_shape(returned(&ast)),
            (
                "atr".to_string(),
                vec!["high".into(), "low".into(), "close".into(), "14".into()]
            )
        );
    }

    #[test]
    fn input_and_constants_lower() {
        let ast = bind_source(
            "@strategy\n  if input.close > 1:\n    strategy.entry(\"L\", strategy.short)\n",
        )
        .unwrap();
        let StmtKind::If { branches, .. } = &ast.body.stmts[0].kind else {
            panic!("expected if");
        };
        let ExprKind::BinaryOp { left, .. } = &branches[0].0.kind else {
            panic!("expected comparison");
        };
        assert_eq!(left.kind, ExprKind::Identifier("close".into()));
        let StmtKind::Expr(call) = &branches[0].1.stmts[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Call { callee, args } = &call.kind else {
            panic!("expected call");
        };
        assert_eq!(callee.callee_name(), Some("entry"));
        assert_eq!(args[1].kind, ExprKind::Literal(Literal::Str("short".into())));
    }

    #[test]
    fn market_field_becomes_zero_arg_call() {
        let ast = bind_source("@strategy\n  x = market.position\n").unwrap();
        let StmtKind::Assignment { value, .. } = &ast.body.stmts[0].kind else {
            panic!("expected assignment");
        };
        assert_eq!(call_shape(value), ("position_size".to_string(), vec![]));
    }

    #[test]
    fn new_node_ids_are_fresh() {
        let source = "@calculate\n  return indicator.atr(14)\n";
        let parsed = parse(source).unwrap();
        let first_free = parsed.next_id;
        let ast = bind_source(source).unwrap();
        assert!(ast.next_id > first_free);
        let mut ids = Vec::new();
        crate::domain::ast::walk_block(&ast.body, &mut |e| ids.push(e.id));
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn undefined_call_reports_location() {
        let err = bind_source("@calculate\n  return foo(close)\n").unwrap_err();
        assert_eq!(err.code, ErrorCode::UndefinedName);
        assert_eq!(err.phase, Phase::Parse);
        assert_eq!(err.line(), 2);
        assert_eq!(err.column(), 10);
    }

    #[test]
    fn undefined_identifier() {
        let err = bind_source("@calculate\n  return close + missing\n").unwrap_err();
        assert_eq!(err.code, ErrorCode::UndefinedName);
        assert!(err.message.contains("missing"));
    }

    #[test]
    fn block_scoped_locals_do_not_leak() {
        let err = bind_source("@strategy\n  if close > 1:\n    y = 2\n  z = y\n").unwrap_err();
        assert_eq!(err.code, ErrorCode::UndefinedName);
        assert_eq!(err.line(), 4);
    }

    #[test]
    fn outer_locals_visible_in_blocks() {
        bind_source("@strategy\n  y = 1\n  if close > 1:\n    y = 2\n  z = y\n").unwrap();
        bind_source("@calculate\n  acc = close\n  for i in range(3):\n    acc = acc + i\n  return acc\n")
            .unwrap();
    }

    #[test]
    fn loop_variable_scoped_to_body() {
        let err = bind_source(
            "@calculate\n  acc = close\n  for i in range(3):\n    acc = acc + 1\n  return acc + i\n",
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::UndefinedName);
    }

    #[test]
    fn removed_symbol_mentions_migration() {
        let err = bind_source("@calculate\n  return stdev(close, 5)\n").unwrap_err();
        assert_eq!(err.code, ErrorCode::UndefinedName);
        assert!(err.message.contains("removed in 1.1"));
    }

    #[test]
    fn newer_symbol_under_old_stdlib() {
        let stdlib = Stdlib::for_version(StdlibVersion::V1_0).unwrap();
        let namespace = NamespaceTable::build(&stdlib);
        let ast = parse("@calculate\n  return wma(close, 5)\n").unwrap();
        let err = bind(ast, &stdlib, &namespace).unwrap_err();
        assert!(err.message.contains("introduced in 1.1"));
    }

    #[test]
    fn function_used_as_value() {
        let err = bind_source("@calculate\n  return sma\n").unwrap_err();
        assert_eq!(err.code, ErrorCode::ArgumentMismatch);
    }

    #[test]
    fn record_field_on_local_is_kept() {
        let ast = bind_source("@calculate\n  m = macd(close)\n  return m.signal\n").unwrap();
        assert!(matches!(
            returned(&ast).kind,
            ExprKind::DottedAccess { ref field, .. } if field == "signal"
        ));
    }
}
