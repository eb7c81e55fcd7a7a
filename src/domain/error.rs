//! Domain error types.
//!
//! Every compile-phase failure is a [`CompileError`] carrying a stable
//! [`ErrorCode`], the [`Phase`] that raised it and the source [`Span`] so an
//! editor can underline the offending text. Execution failures are
//! [`ExecutionError`]s. Both flatten into the caller-facing [`ErrorReport`].

use serde::Serialize;
use std::fmt;

use crate::domain::ast::Span;
use crate::domain::types::DomainType;

/// Pipeline phase that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Lex,
    Parse,
    Security,
    Type,
    Execute,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Lex => "lex",
            Phase::Parse => "parse",
            Phase::Security => "security",
            Phase::Type => "type",
            Phase::Execute => "execute",
        };
        f.write_str(name)
    }
}

/// Stable machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // lex
    UnexpectedCharacter,
    UnterminatedString,
    InvalidNumber,
    TabIndent,
    InconsistentIndent,
    UnbalancedParen,
    // parse
    UnexpectedToken,
    UnknownSection,
    MissingSection,
    DuplicateSection,
    ConflictingSections,
    UnknownMetadataKey,
    InvalidParamDecl,
    DuplicateParam,
    UndefinedName,
    NestingTooDeep,
    UnsupportedVersion,
    // security
    ImportForbidden,
    PrivateAccess,
    ReflectionForbidden,
    UnknownPath,
    DynamicCallTarget,
    NotCallable,
    ReservedName,
    // type
    OperandMismatch,
    ArgumentMismatch,
    ArityMismatch,
    UnknownField,
    InvalidReturn,
    MissingReturn,
    UnusedValue,
    StrategyOnly,
    BranchInCalculate,
    BindingTypeChanged,
    InvalidArgument,
    // execute
    DeadlineExceeded,
    MemoryExceeded,
    InvalidParam,
    MissingColumn,
    InvalidInput,
    RuntimeFault,
    InternalFault,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // serde's snake_case rendering doubles as the display form
        let text = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{:?}", self));
        f.write_str(&text)
    }
}

/// A compile-phase error: syntax, security or type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{phase} error [{code}] at line {line}, column {column}: {message}", line = .span.line, column = .span.column)]
pub struct CompileError {
    pub code: ErrorCode,
    pub message: String,
    pub phase: Phase,
    pub span: Span,
}

impl CompileError {
    pub fn lex(code: ErrorCode, message: impl Into<String>, span: Span) -> Self {
        Self {
            code,
            message: message.into(),
            phase: Phase::Lex,
            span,
        }
    }

    pub fn syntax(code: ErrorCode, message: impl Into<String>, span: Span) -> Self {
        Self {
            code,
            message: message.into(),
            phase: Phase::Parse,
            span,
        }
    }

    pub fn security(code: ErrorCode, message: impl Into<String>, span: Span) -> Self {
        Self {
            code,
            message: message.into(),
            phase: Phase::Security,
            span,
        }
    }

    pub fn type_error(code: ErrorCode, message: impl Into<String>, span: Span) -> Self {
        Self {
            code,
            message: message.into(),
            phase: Phase::Type,
            span,
        }
    }

    /// Operator applied to an unsupported pair of domain types.
    pub fn operand_mismatch(op: &str, left: &DomainType, right: &DomainType, span: Span) -> Self {
        Self::type_error(
            ErrorCode::OperandMismatch,
            format!("operator '{}' is not defined for {} and {}", op, left, right),
            span,
        )
    }

    pub fn line(&self) -> u32 {
        self.span.line
    }

    pub fn column(&self) -> u32 {
        self.span.column
    }

    /// Render the offending source line with a caret under the error column.
    pub fn display_with_context(&self, source: &str) -> String {
        let line_text = source
            .lines()
            .nth(self.span.line.saturating_sub(1) as usize)
            .unwrap_or("");
        let caret = " ".repeat(self.span.column.saturating_sub(1) as usize)
            + &"^".repeat(self.span.len.max(1));
        format!("{line_text}\n{caret}\n{err}", err = self)
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code,
            message: self.message.clone(),
            line: self.span.line,
            column: self.span.column,
            length: self.span.len,
            phase: self.phase,
        }
    }
}

/// Which execution budget was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Deadline,
    Memory,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Deadline => f.write_str("deadline"),
            Resource::Memory => f.write_str("memory"),
        }
    }
}

/// Errors raised while executing a validated program.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    #[error("resource exceeded: {resource} limit of {limit}")]
    ResourceExceeded { resource: Resource, limit: String },

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParam { name: String, reason: String },

    #[error("input column '{column}' is required but missing")]
    MissingColumn { column: String },

    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("runtime fault: {reason}")]
    RuntimeFault { reason: String, span: Option<Span> },
}

impl ExecutionError {
    pub fn fault(reason: impl Into<String>, span: Option<Span>) -> Self {
        ExecutionError::RuntimeFault {
            reason: reason.into(),
            span,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ExecutionError::ResourceExceeded {
                resource: Resource::Deadline,
                ..
            } => ErrorCode::DeadlineExceeded,
            ExecutionError::ResourceExceeded {
                resource: Resource::Memory,
                ..
            } => ErrorCode::MemoryExceeded,
            ExecutionError::InvalidParam { .. } => ErrorCode::InvalidParam,
            ExecutionError::MissingColumn { .. } => ErrorCode::MissingColumn,
            ExecutionError::InvalidInput { .. } => ErrorCode::InvalidInput,
            ExecutionError::RuntimeFault { .. } => ErrorCode::RuntimeFault,
        }
    }

    pub fn report(&self) -> ErrorReport {
        let span = match self {
            ExecutionError::RuntimeFault { span, .. } => *span,
            _ => None,
        };
        ErrorReport {
            code: self.code(),
            message: self.to_string(),
            line: span.map(|s| s.line).unwrap_or(0),
            column: span.map(|s| s.column).unwrap_or(0),
            length: span.map(|s| s.len).unwrap_or(0),
            phase: Phase::Execute,
        }
    }
}

/// Caller-facing error object: `{code, message, line, column, phase}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
    pub line: u32,
    pub column: u32,
    pub length: usize,
    pub phase: Phase,
}

/// Migration between stdlib versions failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MigrationError {
    #[error("no migration path from stdlib {from} to {to}")]
    NoPath { from: String, to: String },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("migration changes the program output type from {before} to {after}")]
    TypeChanged {
        before: DomainType,
        after: DomainType,
    },
}

/// Failure reported by a cache store collaborator. Never surfaced to callers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cache store error: {reason}")]
pub struct CacheStoreError {
    pub reason: String,
}

/// Top-level error type for quantscript.
#[derive(Debug, thiserror::Error)]
pub enum QuantscriptError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&QuantscriptError> for std::process::ExitCode {
    fn from(err: &QuantscriptError) -> Self {
        let code: u8 = match err {
            QuantscriptError::Io(_) | QuantscriptError::Data { .. } => 1,
            QuantscriptError::ConfigParse { .. } | QuantscriptError::ConfigInvalid { .. } => 2,
            QuantscriptError::Compile(_) => 3,
            QuantscriptError::Execution(_) => 4,
            QuantscriptError::Migration(_) => 5,
        };
        std::process::ExitCode::from(code)
    }
}
