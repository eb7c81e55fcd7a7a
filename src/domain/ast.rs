//! Abstract syntax tree for quantscript programs.
//!
//! Nodes own their children exclusively, so the tree is acyclic by
//! construction. Every expression and statement carries a [`NodeId`] that the
//! type checker keys its annotations on, and a [`Span`] for error reporting.

use serde::Serialize;

use crate::domain::source::{Metadata, Mode, ParamDecl};

pub type NodeId = u32;

/// A source location: byte offset and length plus 1-based line/column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
    pub line: u32,
    pub column: u32,
}

impl Span {
    /// Span covering `self` through the end of `other`.
    pub fn to(self, other: Span) -> Span {
        let end = (other.offset + other.len).max(self.offset + self.len);
        Span {
            offset: self.offset,
            len: end - self.offset,
            line: self.line,
            column: self.column,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Str(String),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    NotEq,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::NotEq
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "not",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Identifier(String),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    DottedAccess {
        base: Box<Expr>,
        field: String,
    },
}

impl Expr {
    /// Flatten an identifier-rooted dotted chain (`a.b.c`) into its segments.
    /// Returns `None` when the chain is rooted in anything but an identifier.
    pub fn dotted_path(&self) -> Option<Vec<&str>> {
        let mut segments = Vec::new();
        let mut node = self;
        loop {
            match &node.kind {
                ExprKind::Identifier(name) => {
                    segments.push(name.as_str());
                    segments.reverse();
                    return Some(segments);
                }
                ExprKind::DottedAccess { base, field } => {
                    segments.push(field.as_str());
                    node = base;
                }
                _ => return None,
            }
        }
    }

    /// Name of the called symbol once binding has rewritten the callee.
    pub fn callee_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Identifier(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub id: NodeId,
    pub span: Span,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Assignment {
        name: String,
        value: Expr,
    },
    Return(Expr),
    If {
        branches: Vec<(Expr, Block)>,
        else_block: Option<Block>,
    },
    For {
        var: String,
        start: Expr,
        end: Expr,
        body: Block,
    },
    Expr(Expr),
    /// Parsed only so the security validator can reject it with a location.
    Import { path: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub span: Span,
    pub stmts: Vec<Stmt>,
}

/// A parsed program: declarations plus the single executable body.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramAst {
    pub metadata: Metadata,
    pub params: Vec<ParamDecl>,
    pub mode: Mode,
    pub body: Block,
    /// First id not used by any node; the binder allocates from here.
    pub next_id: NodeId,
}

/// Pre-order visit of an expression and all of its descendants.
pub fn walk_expr<'a>(expr: &'a Expr, visit: &mut impl FnMut(&'a Expr)) {
    visit(expr);
    match &expr.kind {
        ExprKind::Literal(_) | ExprKind::Identifier(_) => {}
        ExprKind::Call { callee, args } => {
            walk_expr(callee, visit);
            for arg in args {
                walk_expr(arg, visit);
            }
        }
        ExprKind::BinaryOp { left, right, .. } => {
            walk_expr(left, visit);
            walk_expr(right, visit);
        }
        ExprKind::UnaryOp { operand, .. } => walk_expr(operand, visit),
        ExprKind::Conditional {
            condition,
            then_branch,
            else_branch,
        } => {
            walk_expr(condition, visit);
            walk_expr(then_branch, visit);
            walk_expr(else_branch, visit);
        }
        ExprKind::DottedAccess { base, .. } => walk_expr(base, visit),
    }
}

/// Visit every expression in a block, statement by statement.
pub fn walk_block<'a>(block: &'a Block, visit: &mut impl FnMut(&'a Expr)) {
    for stmt in &block.stmts {
        match &stmt.kind {
            StmtKind::Assignment { value, .. } => walk_expr(value, visit),
            StmtKind::Return(expr) | StmtKind::Expr(expr) => walk_expr(expr, visit),
            StmtKind::If {
                branches,
                else_block,
            } => {
                for (cond, body) in branches {
                    walk_expr(cond, visit);
                    walk_block(body, visit);
                }
                if let Some(body) = else_block {
                    walk_block(body, visit);
                }
            }
            StmtKind::For {
                start, end, body, ..
            } => {
                walk_expr(start, visit);
                walk_expr(end, visit);
                walk_block(body, visit);
            }
            StmtKind::Import { .. } => {}
        }
    }
}
