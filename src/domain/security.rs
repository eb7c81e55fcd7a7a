//! Static whitelist validation of a parsed program.
//!
//! Runs on the raw AST before any name binding. Every identifier, dotted path
//! and call target is classified against the namespace table, the declared
//! parameters and the names the program assigns; anything that cannot be
//! positively classified is rejected. Bare names that are merely unknown are
//! left for the binder, which reports them as undefined.
//!
//! The pass is pure: the same AST always yields the same verdict.

use std::collections::HashSet;

use crate::domain::ast::{Block, Expr, ExprKind, ProgramAst, Span, StmtKind};
use crate::domain::error::{CompileError, ErrorCode};
use crate::domain::parser::MAX_NESTING;
use crate::domain::stdlib::namespace::{NamespaceTable, Target};
use crate::domain::stdlib::{is_column, is_symbol_name};

/// Names that would give a program reflective or environment access in a
/// general-purpose host language. None of them exist here, and none may be
/// bound or called.
const REFLECTION_NAMES: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "getattr",
    "setattr",
    "delattr",
    "hasattr",
    "globals",
    "locals",
    "vars",
    "dir",
    "type",
    "open",
    "object",
    "super",
    "callable",
    "breakpoint",
];

struct Validator<'a> {
    namespace: &'a NamespaceTable,
    params: HashSet<&'a str>,
    locals: HashSet<&'a str>,
}

/// Accept the AST unchanged or report the first whitelist violation.
pub fn validate(ast: &ProgramAst, namespace: &NamespaceTable) -> Result<(), CompileError> {
    let mut validator = Validator {
        namespace,
        params: HashSet::new(),
        locals: HashSet::new(),
    };

    for decl in &ast.params {
        validator.check_binding_name(&decl.name, decl.span)?;
        validator.params.insert(decl.name.as_str());
    }
    collect_locals(&ast.body, &mut validator.locals);
    validator.validate_block(&ast.body)
}

fn collect_locals<'a>(block: &'a Block, out: &mut HashSet<&'a str>) {
    for stmt in &block.stmts {
        match &stmt.kind {
            StmtKind::Assignment { name, .. } => {
                out.insert(name);
            }
            StmtKind::For { var, body, .. } => {
                out.insert(var);
                collect_locals(body, out);
            }
            StmtKind::If {
                branches,
                else_block,
            } => {
                for (_, body) in branches {
                    collect_locals(body, out);
                }
                if let Some(body) = else_block {
                    collect_locals(body, out);
                }
            }
            StmtKind::Return(_) | StmtKind::Expr(_) | StmtKind::Import { .. } => {}
        }
    }
}

fn check_name(name: &str, span: Span) -> Result<(), CompileError> {
    if name.starts_with('_') {
        return Err(CompileError::security(
            ErrorCode::PrivateAccess,
            format!("access to private name '{}' is not allowed", name),
            span,
        ));
    }
    if REFLECTION_NAMES.contains(&name) {
        return Err(CompileError::security(
            ErrorCode::ReflectionForbidden,
            format!("'{}' is a reflection construct and is not available", name),
            span,
        ));
    }
    Ok(())
}

impl Validator<'_> {
    fn check_binding_name(&self, name: &str, span: Span) -> Result<(), CompileError> {
        check_name(name, span)?;
        let reserved = self.namespace.is_root(name)
            || is_column(name)
            || is_symbol_name(name)
            || name == "range"
            || self.params.contains(name);
        if reserved {
            return Err(CompileError::security(
                ErrorCode::ReservedName,
                format!("'{}' is a reserved name and cannot be rebound", name),
                span,
            ));
        }
        Ok(())
    }

    fn validate_block(&self, block: &Block) -> Result<(), CompileError> {
        for stmt in &block.stmts {
            match &stmt.kind {
                StmtKind::Import { path } => {
                    return Err(CompileError::security(
                        ErrorCode::ImportForbidden,
                        format!("import of '{}' is not allowed", path.join(".")),
                        stmt.span,
                    ));
                }
                StmtKind::Assignment { name, value } => {
                    self.check_binding_name(name, stmt.span)?;
                    self.validate_expr(value, 0)?;
                }
                StmtKind::Return(expr) | StmtKind::Expr(expr) => self.validate_expr(expr, 0)?,
                StmtKind::If {
                    branches,
                    else_block,
                } => {
                    for (condition, body) in branches {
                        self.validate_expr(condition, 0)?;
                        self.validate_block(body)?;
                    }
                    if let Some(body) = else_block {
                        self.validate_block(body)?;
                    }
                }
                StmtKind::For {
                    var,
                    start,
                    end,
                    body,
                } => {
                    self.check_binding_name(var, stmt.span)?;
                    self.validate_expr(start, 0)?;
                    self.validate_expr(end, 0)?;
                    self.validate_block(body)?;
                }
            }
        }
        Ok(())
    }

    fn validate_expr(&self, expr: &Expr, depth: usize) -> Result<(), CompileError> {
        if depth > MAX_NESTING {
            return Err(CompileError::security(
                ErrorCode::NestingTooDeep,
                format!("expression nesting exceeds {} levels", MAX_NESTING),
                expr.span,
            ));
        }
        match &expr.kind {
            ExprKind::Literal(_) => Ok(()),
            ExprKind::Identifier(name) => {
                check_name(name, expr.span)?;
                if self.namespace.is_root(name) {
                    return Err(CompileError::security(
                        ErrorCode::UnknownPath,
                        format!("namespace '{}' cannot be used as a value", name),
                        expr.span,
                    ));
                }
                Ok(())
            }
            ExprKind::DottedAccess { .. } => self.validate_access(expr, depth),
            ExprKind::Call { callee, args } => {
                self.validate_callee(callee, depth)?;
                for arg in args {
                    self.validate_expr(arg, depth + 1)?;
                }
                Ok(())
            }
            ExprKind::BinaryOp { left, right, .. } => {
                self.validate_expr(left, depth + 1)?;
                self.validate_expr(right, depth + 1)
            }
            ExprKind::UnaryOp { operand, .. } => self.validate_expr(operand, depth + 1),
            ExprKind::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                self.validate_expr(condition, depth + 1)?;
                self.validate_expr(then_branch, depth + 1)?;
                self.validate_expr(else_branch, depth + 1)
            }
        }
    }

    /// A dotted path used as a value.
    fn validate_access(&self, expr: &Expr, depth: usize) -> Result<(), CompileError> {
        let ExprKind::DottedAccess { base, field } = &expr.kind else {
            return self.validate_expr(expr, depth);
        };
        check_name(field, expr.span)?;

        let Some(path) = expr.dotted_path() else {
            // field of a computed value, e.g. `macd(close).signal`
            return self.validate_expr(base, depth + 1);
        };
        for segment in &path {
            check_name(segment, expr.span)?;
        }
        let root = path[0];
        if self.namespace.is_root(root) {
            return match self.namespace.resolve(&path) {
                Some(_) => Ok(()),
                None => Err(unknown_path(&path, expr.span)),
            };
        }
        if (self.locals.contains(root) || self.params.contains(root)) && path.len() == 2 {
            return Ok(());
        }
        Err(unknown_path(&path, expr.span))
    }

    fn validate_callee(&self, callee: &Expr, depth: usize) -> Result<(), CompileError> {
        match &callee.kind {
            ExprKind::Identifier(name) => {
                check_name(name, callee.span)?;
                let value_name = self.namespace.is_root(name)
                    || is_column(name)
                    || self.params.contains(name.as_str())
                    || (self.locals.contains(name.as_str()) && !is_symbol_name(name));
                if value_name {
                    return Err(not_callable(name, callee.span));
                }
                Ok(())
            }
            ExprKind::DottedAccess { .. } => {
                let Some(path) = callee.dotted_path() else {
                    return Err(CompileError::security(
                        ErrorCode::DynamicCallTarget,
                        "call target must be a named function, not a computed value",
                        callee.span,
                    ));
                };
                self.validate_access(callee, depth)?;
                match self.namespace.resolve(&path) {
                    Some(Target::Call { .. }) => Ok(()),
                    _ => Err(not_callable(&path.join("."), callee.span)),
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

fn unknown_path(path: &[&str], span: Span) -> CompileError {
    CompileError::security(
        ErrorCode::UnknownPath,
        format!("'{}' is not a known path", path.join(".")),
        span,
    )
}

fn not_callable(name: &str, span: Span) -> CompileError {
    CompileError::security(
        ErrorCode::NotCallable,
        format!("'{}' is not callable", name),
        span,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ast::UnaryOp;
    use crate::domain::error::Phase;
    use crate::domain::parser::parse;
    use crate::domain::stdlib::Stdlib;

    fn check(source: &str) -> Result<(), CompileError> {
        let ast = parse(source).unwrap();
        validate(&ast, &NamespaceTable::build(&Stdlib::current()))
    }

    fn code_of(source: &str) -> ErrorCode {
        let err = check(source).unwrap_err();
        assert_eq!(err.phase, Phase::Security);
        err.code
    }

    #[test]
    fn accepts_fluent_and_positional_calls() {
        check("@calculate\n  return indicator.sma.close(3)\n").unwrap();
        check("@calculate\n  return sma(close, 3)\n").unwrap();
        check("@calculate\n  m = macd(close)\n  return m.histogram\n").unwrap();
        check("@calculate\n  return macd(close).signal\n").unwrap();
        check("@strategy\n  if input.close > 1:\n    strategy.entry(\"L\", strategy.long)\n").unwrap();
    }

    #[test]
    fn unknown_bare_names_are_deferred() {
        check("@calculate\n  return foo(close)\n").unwrap();
    }

    #[test]
    fn rejects_import() {
        assert_eq!(code_of("@calculate\n  import os\n  return close\n"), ErrorCode::ImportForbidden);
        assert_eq!(
            code_of("@calculate\n  from os import system\n  return close\n"),
            ErrorCode::ImportForbidden
        );
    }

    #[test]
    fn rejects_dunder_access() {
        assert_eq!(
            code_of("@calculate\n  return close.__class__\n"),
            ErrorCode::PrivateAccess
        );
        assert_eq!(code_of("@calculate\n  return __import__(close)\n"), ErrorCode::PrivateAccess);
    }

    #[test]
    fn rejects_reflection() {
        assert_eq!(
            code_of("@calculate\n  return eval(\"close\")\n"),
            ErrorCode::ReflectionForbidden
        );
        assert_eq!(
            code_of("@calculate\n  return getattr(indicator, \"sma\")\n"),
            ErrorCode::ReflectionForbidden
        );
    }

    #[test]
    fn rejects_unknown_dotted_paths() {
        assert_eq!(code_of("@calculate\n  return os.system(close)\n"), ErrorCode::UnknownPath);
        assert_eq!(
            code_of("@calculate\n  return indicator.nope.close(3)\n"),
            ErrorCode::UnknownPath
        );
        assert_eq!(code_of("@calculate\n  return input.adj_close\n"), ErrorCode::UnknownPath);
        assert_eq!(code_of("@calculate\n  return close.values\n"), ErrorCode::UnknownPath);
        assert_eq!(code_of("@calculate\n  return indicator\n"), ErrorCode::UnknownPath);
    }

    #[test]
    fn rejects_computed_call_targets() {
        assert_eq!(
            code_of("@calculate\n  return sma(close, 3)(1)\n"),
            ErrorCode::DynamicCallTarget
        );
        assert_eq!(
            code_of("@calculate\n  return (close + 1)(2)\n"),
            ErrorCode::DynamicCallTarget
        );
        assert_eq!(
            code_of("@calculate\n  return macd(close).signal(1)\n"),
            ErrorCode::DynamicCallTarget
        );
    }

    #[test]
    fn rejects_calling_values() {
        assert_eq!(code_of("@calculate\n  return close(1)\n"), ErrorCode::NotCallable);
        assert_eq!(code_of("@calculate\n  return input.close(1)\n"), ErrorCode::NotCallable);
        assert_eq!(
            code_of("@strategy\n  x = strategy.long()\n"),
            ErrorCode::NotCallable
        );
        assert_eq!(
            code_of("@calculate\n  x = close\n  return x(1)\n"),
            ErrorCode::NotCallable
        );
    }

    #[test]
    fn rejects_shadowing_reserved_names() {
        assert_eq!(code_of("@calculate\n  close = 1\n  return sma(close, 3)\n"), ErrorCode::ReservedName);
        assert_eq!(code_of("@calculate\n  sma = 1\n  return close\n"), ErrorCode::ReservedName);
        assert_eq!(code_of("@calculate\n  indicator = 1\n  return close\n"), ErrorCode::ReservedName);
        assert_eq!(
            code_of("@params\n  p: int = 1\n@calculate\n  p = 2\n  return close\n"),
            ErrorCode::ReservedName
        );
        assert_eq!(code_of("@params\n  open: int = 1\n@calculate\n  return close\n"), ErrorCode::ReservedName);
    }

    #[test]
    fn violation_carries_location() {
        let err = check("@calculate\n  x = 1\n  return os.system(close)\n").unwrap_err();
        assert_eq!(err.line(), 3);
        assert_eq!(err.column(), 10);
    }

    #[test]
    fn rejects_trees_deeper_than_the_parser_allows() {
        let mut ast = parse("@calculate\n  return close\n").unwrap();
        let StmtKind::Return(expr) = &mut ast.body.stmts[0].kind else {
            panic!("expected a return statement");
        };
        for _ in 0..70 {
            let inner = expr.clone();
            *expr = Expr {
                id: inner.id,
                span: inner.span,
                kind: ExprKind::UnaryOp {
                    op: UnaryOp::Neg,
                    operand: Box::new(inner),
                },
            };
        }
        let err = validate(&ast, &NamespaceTable::build(&Stdlib::current())).unwrap_err();
        assert_eq!(err.phase, Phase::Security);
        assert_eq!(err.code, ErrorCode::NestingTooDeep);
    }

    #[test]
    fn verdict_is_deterministic() {
        let source = "@calculate\n  return os.path(close)\n";
        let first = check(source).unwrap_err();
        for _ in 0..10 {
            assert_eq!(check(source).unwrap_err(), first);
        }
    }
}
