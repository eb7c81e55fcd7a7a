//! Typed tree-walking evaluator.
//!
//! Expressions evaluate to whole series aligned to the input bars.
//! `@calculate` runs the body once. `@strategy` runs it once per bar with
//! fresh locals, reading boolean conditions at the current bar and threading
//! only the [`Ledger`] forward. Bar-invariant expressions are evaluated on the
//! first bar that reaches them and memoized.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::domain::ast::{BinaryOp, Block, Expr, ExprKind, Literal, NodeId, Span, Stmt, StmtKind, UnaryOp};
use crate::domain::compiler::ValidatedProgram;
use crate::domain::error::ExecutionError;
use crate::domain::series::SeriesTable;
use crate::domain::source::Mode;
use crate::domain::stdlib::{Builtin, Category, SYMBOLS, Stdlib, is_column};

use super::budget::Budget;
use super::builtins;
use super::strategy::Ledger;
use super::value::Value;
use super::{ExecutionResult, IndicatorOutput};

pub(crate) struct Evaluator<'a> {
    program: &'a ValidatedProgram,
    stdlib: Stdlib,
    table: &'a SeriesTable,
    params: HashMap<String, Value>,
    budget: Budget,
    invariant: HashSet<NodeId>,
    memo: HashMap<NodeId, Value>,
    scopes: Vec<HashMap<String, Value>>,
    ledger: Ledger,
    bar: usize,
}

fn fault(reason: impl Into<String>, span: Span) -> ExecutionError {
    ExecutionError::fault(reason, Some(span))
}

impl<'a> Evaluator<'a> {
    pub fn new(
        program: &'a ValidatedProgram,
        table: &'a SeriesTable,
        params: HashMap<String, Value>,
        budget: Budget,
    ) -> Result<Self, ExecutionError> {
        let stdlib = Stdlib::for_version(program.stdlib_version).ok_or_else(|| {
            ExecutionError::fault(
                format!("stdlib {} is not available", program.stdlib_version),
                None,
            )
        })?;
        Ok(Self {
            program,
            stdlib,
            table,
            params,
            budget,
            invariant: HashSet::new(),
            memo: HashMap::new(),
            scopes: vec![HashMap::new()],
            ledger: Ledger::default(),
            bar: 0,
        })
    }

    pub fn run(mut self) -> Result<ExecutionResult, ExecutionError> {
        let program = self.program;
        match program.mode {
            Mode::Indicator => {
                let value = self.exec_stmts(&program.body.stmts)?.ok_or_else(|| {
                    fault("@calculate finished without returning", program.body.span)
                })?;
                let output = indicator_output(value, self.table.len(), program.body.span)?;
                Ok(ExecutionResult::Indicator { output })
            }
            Mode::Strategy => {
                self.invariant = invariant_roots(&program.body, &self.params);
                for bar in 0..self.table.len() {
                    self.budget.tick()?;
                    self.budget.release_transient();
                    self.bar = bar;
                    self.scopes = vec![HashMap::new()];
                    self.exec_stmts(&program.body.stmts)?;
                }
                let (signals, final_state) = self.ledger.finish();
                Ok(ExecutionResult::Strategy {
                    signals,
                    final_state,
                })
            }
        }
    }

    fn len(&self) -> usize {
        self.table.len()
    }

    /// Runs statements in the current scope; yields the value of a `return`.
    fn exec_stmts(&mut self, stmts: &'a [Stmt]) -> Result<Option<Value>, ExecutionError> {
        for stmt in stmts {
            self.budget.tick()?;
            match &stmt.kind {
                StmtKind::Assignment { name, value } => {
                    let value = self.eval(value)?;
                    self.assign(name, value);
                }
                StmtKind::Return(expr) => return self.eval(expr).map(Some),
                StmtKind::Expr(expr) => {
                    self.eval(expr)?;
                }
                StmtKind::If {
                    branches,
                    else_block,
                } => {
                    let mut taken = else_block.as_ref();
                    for (condition, block) in branches {
                        let value = self.eval(condition)?;
                        let truth = value.flag_at(self.bar).ok_or_else(|| {
                            fault("if condition is not a boolean series", condition.span)
                        })?;
                        if truth {
                            taken = Some(block);
                            break;
                        }
                    }
                    if let Some(block) = taken {
                        if let Some(value) = self.exec_scoped(block, HashMap::new())? {
                            return Ok(Some(value));
                        }
                    }
                }
                StmtKind::For {
                    var,
                    start,
                    end,
                    body,
                } => {
                    let start = self.loop_bound(start)?;
                    let end = self.loop_bound(end)?;
                    let mut i = start;
                    while i < end {
                        self.budget.tick()?;
                        let scope = HashMap::from([(var.clone(), Value::Scalar(i as f64))]);
                        if let Some(value) = self.exec_scoped(body, scope)? {
                            return Ok(Some(value));
                        }
                        i += 1;
                    }
                }
                StmtKind::Import { .. } => {
                    return Err(fault("import reached the evaluator", stmt.span));
                }
            }
        }
        Ok(None)
    }

    fn exec_scoped(
        &mut self,
        block: &'a Block,
        scope: HashMap<String, Value>,
    ) -> Result<Option<Value>, ExecutionError> {
        self.scopes.push(scope);
        let result = self.exec_stmts(&block.stmts);
        self.scopes.pop();
        result
    }

    fn loop_bound(&mut self, expr: &'a Expr) -> Result<i64, ExecutionError> {
        let value = self.eval(expr)?;
        let v = value
            .as_scalar()
            .ok_or_else(|| fault("range bound is not a Scalar", expr.span))?;
        if !v.is_finite() || v.fract() != 0.0 {
            return Err(ExecutionError::InvalidInput {
                reason: format!("range bounds must be integers, got {v}"),
            });
        }
        Ok(v as i64)
    }

    fn assign(&mut self, name: &str, value: Value) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(name) {
                *slot = value;
                return;
            }
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    fn lookup(&self, name: &str, span: Span) -> Result<Value, ExecutionError> {
        if let Some(value) = self.scopes.iter().rev().find_map(|s| s.get(name)) {
            return Ok(value.clone());
        }
        if let Some(value) = self.params.get(name) {
            return Ok(value.clone());
        }
        if let Some(column) = self.table.column(name) {
            return Ok(Value::Series(Arc::clone(column)));
        }
        Err(fault(format!("unbound name '{name}'"), span))
    }

    fn eval(&mut self, expr: &'a Expr) -> Result<Value, ExecutionError> {
        self.budget.tick()?;
        let memoize = self.invariant.contains(&expr.id);
        if memoize {
            if let Some(value) = self.memo.get(&expr.id) {
                return Ok(value.clone());
            }
        }

        let value = self.eval_kind(expr)?;

        // identifiers and field reads share storage with existing values
        let materialized = !matches!(
            expr.kind,
            ExprKind::Literal(_) | ExprKind::Identifier(_) | ExprKind::DottedAccess { .. }
        );
        if materialized {
            let bytes = value.heap_bytes();
            if memoize {
                self.budget.retain(bytes)?;
            } else {
                self.budget.charge(bytes)?;
            }
        }
        if memoize {
            self.memo.insert(expr.id, value.clone());
        }
        Ok(value)
    }

    fn eval_kind(&mut self, expr: &'a Expr) -> Result<Value, ExecutionError> {
        let len = self.len();
        match &expr.kind {
            ExprKind::Literal(Literal::Number(v)) => Ok(Value::Scalar(*v)),
            ExprKind::Literal(Literal::Str(s)) => Ok(Value::Str(Arc::from(s.as_str()))),
            ExprKind::Literal(Literal::Bool(b)) => Ok(Value::Flag(*b)),
            ExprKind::Identifier(name) => self.lookup(name, expr.span),
            ExprKind::BinaryOp { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                binary_op(*op, &l, &r, len).ok_or_else(|| {
                    fault(
                        format!(
                            "operator '{}' applied to {} and {}",
                            op.symbol(),
                            l.domain_type(),
                            r.domain_type()
                        ),
                        expr.span,
                    )
                })
            }
            ExprKind::UnaryOp { op, operand } => {
                let v = self.eval(operand)?;
                let result = match (op, &v) {
                    (UnaryOp::Neg, Value::Scalar(x)) => Some(Value::Scalar(-x)),
                    (UnaryOp::Neg, Value::Series(xs)) => {
                        Some(Value::series(xs.iter().map(|x| -x).collect()))
                    }
                    (UnaryOp::Not, Value::Flag(b)) => Some(Value::Flag(!b)),
                    (UnaryOp::Not, Value::Flags(bs)) => {
                        Some(Value::flags(bs.iter().map(|b| !b).collect()))
                    }
                    _ => None,
                };
                result.ok_or_else(|| {
                    fault(
                        format!("operator '{}' applied to {}", op.symbol(), v.domain_type()),
                        expr.span,
                    )
                })
            }
            ExprKind::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                let cond = self.eval(condition)?;
                let a = self.eval(then_branch)?;
                let b = self.eval(else_branch)?;
                select(&cond, &a, &b, len)
                    .ok_or_else(|| fault("conditional operands do not line up", expr.span))
            }
            ExprKind::DottedAccess { base, field } => {
                let record = self.eval(base)?;
                record.field(field).ok_or_else(|| {
                    fault(
                        format!("{} has no field '{}'", record.domain_type(), field),
                        expr.span,
                    )
                })
            }
            ExprKind::Call { callee, args } => self.call(expr, callee, args),
        }
    }

    fn call(
        &mut self,
        expr: &'a Expr,
        callee: &'a Expr,
        args: &'a [Expr],
    ) -> Result<Value, ExecutionError> {
        let def = callee
            .callee_name()
            .and_then(|name| self.stdlib.lookup(name))
            .ok_or_else(|| fault("call target is not a stdlib symbol", callee.span))?;

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }

        let text = |index: usize| {
            values
                .get(index)
                .and_then(Value::as_str)
                .ok_or_else(|| fault(format!("argument {} of {} is not a String", index + 1, def.name), expr.span))
        };

        match def.builtin {
            Builtin::Entry => {
                let quantity = match values.get(2) {
                    Some(v) => v
                        .as_scalar()
                        .ok_or_else(|| fault("entry quantity is not a Scalar", expr.span))?,
                    None => def.args.get(2).and_then(|a| a.default).unwrap_or(1.0),
                };
                let price = self.fill_price(expr.span)?;
                self.ledger
                    .entry(text(0)?, text(1)?, quantity, self.bar, price)?;
                Ok(Value::Void)
            }
            Builtin::Exit => {
                let price = self.fill_price(expr.span)?;
                self.ledger.exit(text(0)?, self.bar, price)?;
                Ok(Value::Void)
            }
            Builtin::CloseAll => {
                let price = self.fill_price(expr.span)?;
                self.ledger.close_all(self.bar, price)?;
                Ok(Value::Void)
            }
            Builtin::PositionSize => Ok(Value::Scalar(self.ledger.position_size())),
            Builtin::BarIndex => Ok(Value::Scalar(self.bar as f64)),
            Builtin::RealizedPnl => Ok(Value::Scalar(self.ledger.realized_pnl())),
            _ => builtins::apply(def, &values, self.len(), expr.span),
        }
    }

    fn fill_price(&self, span: Span) -> Result<f64, ExecutionError> {
        self.table
            .column("close")
            .and_then(|close| close.get(self.bar).copied())
            .ok_or_else(|| fault("no close price for the current bar", span))
    }
}

fn arithmetic(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => f64::NAN,
    }
}

fn compare(op: BinaryOp, a: f64, b: f64) -> bool {
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Le => a <= b,
        BinaryOp::Gt => a > b,
        BinaryOp::Ge => a >= b,
        BinaryOp::Eq => a == b,
        BinaryOp::NotEq => a != b,
        _ => false,
    }
}

/// `==` / `!=` over non-numeric operands.
fn equality(op: BinaryOp, equal: bool) -> Option<bool> {
    match op {
        BinaryOp::Eq => Some(equal),
        BinaryOp::NotEq => Some(!equal),
        _ => None,
    }
}

fn logic(op: BinaryOp, a: bool, b: bool) -> bool {
    match op {
        BinaryOp::And => a && b,
        _ => a || b,
    }
}

fn binary_op(op: BinaryOp, l: &Value, r: &Value, len: usize) -> Option<Value> {
    if op.is_arithmetic() {
        if let (Value::Scalar(a), Value::Scalar(b)) = (l, r) {
            return Some(Value::Scalar(arithmetic(op, *a, *b)));
        }
        let (a, b) = (l.numeric(len)?, r.numeric(len)?);
        let out = a.iter().zip(b.iter()).map(|(x, y)| arithmetic(op, *x, *y));
        return Some(Value::series(out.collect()));
    }
    if op.is_comparison() {
        match (l, r) {
            (Value::Scalar(a), Value::Scalar(b)) => return Some(Value::Flag(compare(op, *a, *b))),
            (Value::Str(a), Value::Str(b)) => return equality(op, a == b).map(Value::Flag),
            (Value::Flag(a), Value::Flag(b)) => return equality(op, a == b).map(Value::Flag),
            _ => {}
        }
        if let (Some(a), Some(b)) = (l.numeric(len), r.numeric(len)) {
            let out = a.iter().zip(b.iter()).map(|(x, y)| compare(op, *x, *y));
            return Some(Value::flags(out.collect()));
        }
        let (a, b) = (l.mask(len)?, r.mask(len)?);
        let out: Option<Vec<bool>> = a.iter().zip(b.iter()).map(|(x, y)| equality(op, x == y)).collect();
        return out.map(Value::flags);
    }
    if let (Value::Flag(a), Value::Flag(b)) = (l, r) {
        return Some(Value::Flag(logic(op, *a, *b)));
    }
    let (a, b) = (l.mask(len)?, r.mask(len)?);
    Some(Value::flags(a.iter().zip(b.iter()).map(|(x, y)| logic(op, *x, *y)).collect()))
}

/// Element-wise `then if cond else other`.
fn select(cond: &Value, then: &Value, other: &Value, len: usize) -> Option<Value> {
    let mask = cond.mask(len)?;
    if let (Some(a), Some(b)) = (then.numeric(len), other.numeric(len)) {
        let out = mask.iter().zip(a.iter().zip(b.iter()));
        return Some(Value::series(out.map(|(m, (x, y))| if *m { *x } else { *y }).collect()));
    }
    let (a, b) = (then.mask(len)?, other.mask(len)?);
    let out = mask.iter().zip(a.iter().zip(b.iter()));
    Some(Value::flags(out.map(|(m, (x, y))| if *m { *x } else { *y }).collect()))
}

fn indicator_output(value: Value, len: usize, span: Span) -> Result<IndicatorOutput, ExecutionError> {
    match value {
        Value::Series(values) => Ok(IndicatorOutput::Series(values.to_vec())),
        Value::Scalar(v) => Ok(IndicatorOutput::Series(vec![v; len])),
        Value::Record(kind, fields) => Ok(IndicatorOutput::Record {
            kind,
            fields: kind
                .fields()
                .iter()
                .zip(fields.iter())
                .map(|(name, values)| (name.to_string(), values.to_vec()))
                .collect(),
        }),
        other => Err(fault(
            format!("@calculate produced a {}", other.domain_type()),
            span,
        )),
    }
}

/// Finds the outermost expressions whose value is the same on every bar.
///
/// Inputs, parameters and literals are invariant; so are pure stdlib calls
/// and operators over invariant operands, and locals assigned exactly once,
/// at the top level of the body, from an invariant expression.
fn invariant_roots(body: &Block, params: &HashMap<String, Value>) -> HashSet<NodeId> {
    let mut bindings = HashMap::new();
    count_bindings(&body.stmts, &mut bindings);
    let mut pass = Invariance {
        params,
        bindings,
        locals: HashSet::new(),
        roots: HashSet::new(),
    };
    for stmt in &body.stmts {
        pass.visit_stmt(stmt, true);
    }
    pass.roots
}

fn count_bindings<'b>(stmts: &'b [Stmt], counts: &mut HashMap<&'b str, usize>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Assignment { name, .. } => *counts.entry(name.as_str()).or_default() += 1,
            StmtKind::If {
                branches,
                else_block,
            } => {
                for (_, block) in branches {
                    count_bindings(&block.stmts, counts);
                }
                if let Some(block) = else_block {
                    count_bindings(&block.stmts, counts);
                }
            }
            StmtKind::For { var, body, .. } => {
                *counts.entry(var.as_str()).or_default() += 2;
                count_bindings(&body.stmts, counts);
            }
            StmtKind::Return(_) | StmtKind::Expr(_) | StmtKind::Import { .. } => {}
        }
    }
}

struct Invariance<'b> {
    params: &'b HashMap<String, Value>,
    bindings: HashMap<&'b str, usize>,
    locals: HashSet<String>,
    roots: HashSet<NodeId>,
}

impl Invariance<'_> {
    fn visit_stmt(&mut self, stmt: &Stmt, top_level: bool) {
        match &stmt.kind {
            StmtKind::Assignment { name, value } => {
                let invariant = self.root(value);
                if top_level && invariant && self.bindings.get(name.as_str()) == Some(&1) {
                    self.locals.insert(name.clone());
                }
            }
            StmtKind::Return(expr) | StmtKind::Expr(expr) => {
                self.root(expr);
            }
            StmtKind::If {
                branches,
                else_block,
            } => {
                for (condition, block) in branches {
                    self.root(condition);
                    for stmt in &block.stmts {
                        self.visit_stmt(stmt, false);
                    }
                }
                for stmt in else_block.iter().flat_map(|b| &b.stmts) {
                    self.visit_stmt(stmt, false);
                }
            }
            StmtKind::For {
                start, end, body, ..
            } => {
                self.root(start);
                self.root(end);
                for stmt in &body.stmts {
                    self.visit_stmt(stmt, false);
                }
            }
            StmtKind::Import { .. } => {}
        }
    }

    fn root(&mut self, expr: &Expr) -> bool {
        let invariant = self.mark(expr);
        if invariant {
            self.roots.insert(expr.id);
        }
        invariant
    }

    /// Invariance of `expr`; records invariant children of variant nodes.
    fn mark(&mut self, expr: &Expr) -> bool {
        let children: Vec<&Expr> = match &expr.kind {
            ExprKind::Literal(_) | ExprKind::Identifier(_) => Vec::new(),
            ExprKind::Call { args, .. } => args.iter().collect(),
            ExprKind::BinaryOp { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            ExprKind::UnaryOp { operand, .. } => vec![operand.as_ref()],
            ExprKind::Conditional {
                condition,
                then_branch,
                else_branch,
            } => vec![condition.as_ref(), then_branch.as_ref(), else_branch.as_ref()],
            ExprKind::DottedAccess { base, .. } => vec![base.as_ref()],
        };
        let flags: Vec<bool> = children.iter().map(|c| self.mark(c)).collect();
        let all_children = flags.iter().all(|f| *f);

        let invariant = match &expr.kind {
            ExprKind::Literal(_) => true,
            ExprKind::Identifier(name) => {
                self.locals.contains(name) || self.params.contains_key(name) || is_column(name)
            }
            ExprKind::Call { callee, .. } => all_children && is_pure(callee),
            _ => all_children,
        };
        if !invariant {
            for (child, flag) in children.iter().zip(&flags) {
                if *flag {
                    self.roots.insert(child.id);
                }
            }
        }
        invariant
    }
}

fn is_pure(callee: &Expr) -> bool {
    callee
        .callee_name()
        .and_then(|name| SYMBOLS.iter().find(|d| d.name == name))
        .is_some_and(|def| {
            matches!(
                def.category,
                Category::Indicator | Category::Pattern | Category::Math
            )
        })
}
