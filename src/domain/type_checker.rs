//! Bottom-up domain type inference over a bound AST.
//!
//! Every expression node gets exactly one [`DomainType`], recorded in a
//! [`TypeTable`] keyed by node id. Operators are resolved through a fixed
//! compatibility table; anything outside it is a type error naming both
//! operand types.

use std::collections::{BTreeSet, HashMap};

use crate::domain::ast::{BinaryOp, Block, Expr, ExprKind, Literal, NodeId, ProgramAst, Span, StmtKind, UnaryOp};
use crate::domain::error::{CompileError, ErrorCode};
use crate::domain::source::Mode;
use crate::domain::stdlib::{ArgKind, Returns, Stdlib, SymbolDef, is_column};
use crate::domain::types::DomainType;

/// Inferred types for a program.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypeTable {
    types: HashMap<NodeId, DomainType>,
}

impl TypeTable {
    pub fn get(&self, id: NodeId) -> Option<DomainType> {
        self.types.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Result of type checking a program.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedProgram {
    pub types: TypeTable,
    /// Series or ResultRecord for `@calculate`, Void for `@strategy`.
    pub output: DomainType,
    /// Input columns the program reads.
    pub columns: BTreeSet<String>,
}

struct Checker<'a> {
    stdlib: &'a Stdlib,
    mode: Mode,
    params: HashMap<String, DomainType>,
    scopes: Vec<HashMap<String, DomainType>>,
    types: HashMap<NodeId, DomainType>,
    columns: BTreeSet<String>,
}

pub fn check(ast: &ProgramAst, stdlib: &Stdlib) -> Result<TypedProgram, CompileError> {
    let mut checker = Checker {
        stdlib,
        mode: ast.mode,
        params: ast
            .params
            .iter()
            .map(|p| (p.name.clone(), p.ty.domain_type()))
            .collect(),
        scopes: vec![HashMap::new()],
        types: HashMap::new(),
        columns: BTreeSet::new(),
    };

    let output = match ast.mode {
        Mode::Indicator => checker.check_calculate(&ast.body)?,
        Mode::Strategy => {
            checker.check_block(&ast.body)?;
            // fills are priced at the close
            checker.columns.insert("close".to_string());
            DomainType::Void
        }
    };

    Ok(TypedProgram {
        types: TypeTable {
            types: checker.types,
        },
        output,
        columns: checker.columns,
    })
}

fn mismatch(code: ErrorCode, message: String, span: Span) -> CompileError {
    CompileError::type_error(code, message, span)
}

impl Checker<'_> {
    fn lookup(&self, name: &str) -> Option<DomainType> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
            .or_else(|| self.params.get(name).copied())
    }

    fn assign(&mut self, name: &str, ty: DomainType, span: Span) -> Result<(), CompileError> {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(existing) = scope.get(name) {
                if *existing != ty {
                    return Err(mismatch(
                        ErrorCode::BindingTypeChanged,
                        format!(
                            "'{}' was bound as {} and cannot be reassigned a {}",
                            name, existing, ty
                        ),
                        span,
                    ));
                }
                return Ok(());
            }
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), ty);
        }
        Ok(())
    }

    /// `@calculate`: straight-line statements ending in a single return.
    fn check_calculate(&mut self, body: &Block) -> Result<DomainType, CompileError> {
        let Some((last, init)) = body.stmts.split_last() else {
            return Err(mismatch(
                ErrorCode::MissingReturn,
                "@calculate must end with a return statement".to_string(),
                body.span,
            ));
        };
        for stmt in init {
            if let StmtKind::Return(_) = stmt.kind {
                return Err(mismatch(
                    ErrorCode::InvalidReturn,
                    "return must be the last statement of @calculate".to_string(),
                    stmt.span,
                ));
            }
        }
        self.check_statements(init)?;

        let StmtKind::Return(expr) = &last.kind else {
            return Err(mismatch(
                ErrorCode::MissingReturn,
                "@calculate must end with a return statement".to_string(),
                last.span,
            ));
        };
        let ty = self.check_expr(expr)?;
        match ty {
            DomainType::Series | DomainType::ResultRecord(_) => Ok(ty),
            other => Err(mismatch(
                ErrorCode::InvalidReturn,
                format!("@calculate must return a Series or ResultRecord, found {}", other),
                expr.span,
            )),
        }
    }

    fn check_block(&mut self, block: &Block) -> Result<(), CompileError> {
        self.scopes.push(HashMap::new());
        let result = self.check_statements(&block.stmts);
        self.scopes.pop();
        result
    }

    fn check_statements(&mut self, stmts: &[crate::domain::ast::Stmt]) -> Result<(), CompileError> {
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Assignment { name, value } => {
                    let ty = self.check_expr(value)?;
                    if ty == DomainType::Void {
                        return Err(mismatch(
                            ErrorCode::UnusedValue,
                            format!("cannot bind '{}' to an action with no value", name),
                            value.span,
                        ));
                    }
                    self.assign(name, ty, stmt.span)?;
                }
                StmtKind::Return(_) => {
                    let message = match self.mode {
                        Mode::Strategy => "@strategy communicates through actions and cannot return",
                        Mode::Indicator => "return is only allowed as the last top-level statement",
                    };
                    return Err(mismatch(ErrorCode::InvalidReturn, message.to_string(), stmt.span));
                }
                StmtKind::Expr(expr) => {
                    let ty = self.check_expr(expr)?;
                    if ty != DomainType::Void {
                        return Err(mismatch(
                            ErrorCode::UnusedValue,
                            format!("expression value of type {} is unused", ty),
                            expr.span,
                        ));
                    }
                }
                StmtKind::If {
                    branches,
                    else_block,
                } => {
                    if self.mode == Mode::Indicator {
                        return Err(mismatch(
                            ErrorCode::BranchInCalculate,
                            "@calculate is vectorized; use a conditional expression instead of if"
                                .to_string(),
                            stmt.span,
                        ));
                    }
                    for (condition, body) in branches {
                        let ty = self.check_expr(condition)?;
                        if ty != DomainType::BooleanSeries {
                            return Err(mismatch(
                                ErrorCode::InvalidArgument,
                                format!("if condition must be BooleanSeries, found {}", ty),
                                condition.span,
                            ));
                        }
                        self.check_block(body)?;
                    }
                    if let Some(body) = else_block {
                        self.check_block(body)?;
                    }
                }
                StmtKind::For {
                    var,
                    start,
                    end,
                    body,
                } => {
                    for bound in [start, end] {
                        let ty = self.check_expr(bound)?;
                        if ty != DomainType::Scalar {
                            return Err(mismatch(
                                ErrorCode::InvalidArgument,
                                format!("range bounds must be Scalar, found {}", ty),
                                bound.span,
                            ));
                        }
                    }
                    self.scopes
                        .push(HashMap::from([(var.clone(), DomainType::Scalar)]));
                    let result = self.check_statements(&body.stmts);
                    self.scopes.pop();
                    result?;
                }
                StmtKind::Import { .. } => {
                    return Err(CompileError::security(
                        ErrorCode::ImportForbidden,
                        "import is not allowed",
                        stmt.span,
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_expr(&mut self, expr: &Expr) -> Result<DomainType, CompileError> {
        let ty = self.infer(expr)?;
        self.types.insert(expr.id, ty);
        Ok(ty)
    }

    fn infer(&mut self, expr: &Expr) -> Result<DomainType, CompileError> {
        match &expr.kind {
            ExprKind::Literal(Literal::Number(_)) => Ok(DomainType::Scalar),
            ExprKind::Literal(Literal::Str(_)) => Ok(DomainType::String),
            ExprKind::Literal(Literal::Bool(_)) => Ok(DomainType::BooleanSeries),
            ExprKind::Identifier(name) => {
                if let Some(ty) = self.lookup(name) {
                    return Ok(ty);
                }
                if is_column(name) {
                    self.columns.insert(name.clone());
                    return Ok(DomainType::Series);
                }
                Err(CompileError::syntax(
                    ErrorCode::UndefinedName,
                    format!("undefined name '{}'", name),
                    expr.span,
                ))
            }
            ExprKind::BinaryOp { op, left, right } => {
                let l = self.check_expr(left)?;
                let r = self.check_expr(right)?;
                binary_result(*op, l, r)
                    .ok_or_else(|| CompileError::operand_mismatch(op.symbol(), &l, &r, expr.span))
            }
            ExprKind::UnaryOp { op, operand } => {
                let ty = self.check_expr(operand)?;
                match (op, ty) {
                    (UnaryOp::Neg, t) if t.is_numeric() => Ok(t),
                    (UnaryOp::Not, DomainType::BooleanSeries) => Ok(DomainType::BooleanSeries),
                    _ => Err(mismatch(
                        ErrorCode::OperandMismatch,
                        format!("operator '{}' is not defined for {}", op.symbol(), ty),
                        expr.span,
                    )),
                }
            }
            ExprKind::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                let cond = self.check_expr(condition)?;
                if cond != DomainType::BooleanSeries {
                    return Err(mismatch(
                        ErrorCode::InvalidArgument,
                        format!("conditional test must be BooleanSeries, found {}", cond),
                        condition.span,
                    ));
                }
                let a = self.check_expr(then_branch)?;
                let b = self.check_expr(else_branch)?;
                match (a, b) {
                    (a, b) if a.is_numeric() && b.is_numeric() => Ok(DomainType::Series),
                    (DomainType::BooleanSeries, DomainType::BooleanSeries) => {
                        Ok(DomainType::BooleanSeries)
                    }
                    _ => Err(CompileError::operand_mismatch("if-else", &a, &b, expr.span)),
                }
            }
            ExprKind::DottedAccess { base, field } => {
                let base_ty = self.check_expr(base)?;
                let DomainType::ResultRecord(kind) = base_ty else {
                    return Err(mismatch(
                        ErrorCode::UnknownField,
                        format!("{} has no field '{}'", base_ty, field),
                        expr.span,
                    ));
                };
                if kind.field_index(field).is_none() {
                    return Err(mismatch(
                        ErrorCode::UnknownField,
                        format!(
                            "{} has no field '{}' (fields: {})",
                            kind.name(),
                            field,
                            kind.fields().join(", ")
                        ),
                        expr.span,
                    ));
                }
                Ok(DomainType::Series)
            }
            ExprKind::Call { callee, args } => self.infer_call(expr, callee, args),
        }
    }

    fn infer_call(&mut self, expr: &Expr, callee: &Expr, args: &[Expr]) -> Result<DomainType, CompileError> {
        let name = callee.callee_name().unwrap_or_default();
        let Some(def) = self.stdlib.lookup(name) else {
            return Err(CompileError::syntax(
                ErrorCode::UndefinedName,
                format!("undefined name '{}'", name),
                callee.span,
            ));
        };
        if def.category.strategy_only() && self.mode == Mode::Indicator {
            return Err(mismatch(
                ErrorCode::StrategyOnly,
                format!("'{}' is only available in @strategy", def.name),
                callee.span,
            ));
        }
        if args.len() < def.min_args() || args.len() > def.max_args() {
            let expected = if def.min_args() == def.max_args() {
                def.min_args().to_string()
            } else {
                format!("{} to {}", def.min_args(), def.max_args())
            };
            return Err(mismatch(
                ErrorCode::ArityMismatch,
                format!(
                    "{} expects {} arguments, got {} (signature {})",
                    def.name,
                    expected,
                    args.len(),
                    def.signature()
                ),
                expr.span,
            ));
        }

        let mut any_series = false;
        for (arg, spec) in args.iter().zip(def.args) {
            let ty = self.check_expr(arg)?;
            let accepted = match spec.kind {
                ArgKind::Numeric => ty.is_numeric(),
                ArgKind::Scalar | ArgKind::Period => ty == DomainType::Scalar,
                ArgKind::Str => ty == DomainType::String,
            };
            if !accepted {
                return Err(mismatch(
                    ErrorCode::ArgumentMismatch,
                    format!(
                        "argument '{}' of {} expects {}, found {}",
                        spec.name,
                        def.name,
                        kind_name(spec.kind),
                        ty
                    ),
                    arg.span,
                ));
            }
            if spec.kind == ArgKind::Numeric && ty == DomainType::Series {
                any_series = true;
            }
            if spec.kind == ArgKind::Period {
                check_period_literal(def, spec.name, arg)?;
            }
        }
        check_direction_literal(def, args)?;

        Ok(match def.returns {
            Returns::Series => DomainType::Series,
            Returns::BooleanSeries => DomainType::BooleanSeries,
            Returns::Record(kind) => DomainType::ResultRecord(kind),
            Returns::Scalar => DomainType::Scalar,
            Returns::Void => DomainType::Void,
            Returns::SameAsNumeric if any_series => DomainType::Series,
            Returns::SameAsNumeric => DomainType::Scalar,
        })
    }
}

fn kind_name(kind: ArgKind) -> &'static str {
    match kind {
        ArgKind::Numeric => "Scalar or Series",
        ArgKind::Scalar => "Scalar",
        ArgKind::Period => "a positive integer Scalar",
        ArgKind::Str => "String",
    }
}

/// Literal value of a numeric literal, including a negated one.
fn literal_number(expr: &Expr) -> Option<f64> {
    match &expr.kind {
        ExprKind::Literal(Literal::Number(v)) => Some(*v),
        ExprKind::UnaryOp {
            op: UnaryOp::Neg,
            operand,
        } => literal_number(operand).map(|v| -v),
        _ => None,
    }
}

fn check_period_literal(def: &SymbolDef, name: &str, arg: &Expr) -> Result<(), CompileError> {
    if let Some(v) = literal_number(arg) {
        if v < 1.0 || v.fract() != 0.0 {
            return Err(mismatch(
                ErrorCode::InvalidArgument,
                format!(
                    "argument '{}' of {} must be a positive integer, got {}",
                    name, def.name, v
                ),
                arg.span,
            ));
        }
    }
    Ok(())
}

fn check_direction_literal(def: &SymbolDef, args: &[Expr]) -> Result<(), CompileError> {
    if def.name != "entry" {
        return Ok(());
    }
    if let Some(ExprKind::Literal(Literal::Str(direction))) = args.get(1).map(|a| &a.kind) {
        if direction != "long" && direction != "short" {
            return Err(mismatch(
                ErrorCode::InvalidArgument,
                format!("direction must be \"long\" or \"short\", got \"{}\"", direction),
                args[1].span,
            ));
        }
    }
    Ok(())
}

/// The operator compatibility table.
fn binary_result(op: BinaryOp, left: DomainType, right: DomainType) -> Option<DomainType> {
    use DomainType::*;
    if op.is_arithmetic() {
        return match (left, right) {
            (Scalar, Scalar) => Some(Scalar),
            (l, r) if l.is_numeric() && r.is_numeric() => Some(Series),
            _ => None,
        };
    }
    if op.is_comparison() {
        return match (left, right) {
            (l, r) if l.is_numeric() && r.is_numeric() => Some(BooleanSeries),
            (String, String) | (BooleanSeries, BooleanSeries)
                if matches!(op, BinaryOp::Eq | BinaryOp::NotEq) =>
            {
                Some(BooleanSeries)
            }
            _ => None,
        };
    }
    match (left, right) {
        (BooleanSeries, BooleanSeries) => Some(BooleanSeries),
        _ => None,
    }
}
