//! The compile pipeline: parse, validate, bind, type check.
//!
//! [`compile`] is pure and deterministic. Its output, a [`ValidatedProgram`],
//! is immutable and identified by a [`CacheKey`] derived from the source
//! text, the stdlib version and the grammar version.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::domain::ast::{Block, ProgramAst, Span};
use crate::domain::binder::bind;
use crate::domain::error::{CompileError, ErrorCode};
use crate::domain::parser::parse;
use crate::domain::security::validate;
use crate::domain::source::{Metadata, Mode, ParamDecl};
use crate::domain::stdlib::namespace::NamespaceTable;
use crate::domain::stdlib::{GRAMMAR_VERSION, Stdlib, StdlibVersion};
use crate::domain::type_checker::{TypeTable, check};
use crate::domain::types::DomainType;

/// Content address of a compiled program.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn compute(source: &str, stdlib_version: StdlibVersion) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"quantscript\0grammar=");
        hasher.update(GRAMMAR_VERSION.as_bytes());
        hasher.update(b"\0stdlib=");
        hasher.update(stdlib_version.to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(source.as_bytes());
        CacheKey(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A program that passed every compile phase. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedProgram {
    pub key: CacheKey,
    pub stdlib_version: StdlibVersion,
    pub metadata: Metadata,
    pub params: Vec<ParamDecl>,
    pub mode: Mode,
    pub body: Block,
    pub types: TypeTable,
    pub output: DomainType,
    /// Input columns the program reads, in name order.
    pub columns: BTreeSet<String>,
    pub source_len: usize,
}

impl ValidatedProgram {
    /// Rough in-memory footprint, recorded alongside cache entries.
    pub fn approx_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.source_len + self.types.len() * 64
    }

    pub fn param(&self, name: &str) -> Option<&ParamDecl> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// Parse and check a version string against the versions this build ships.
pub fn resolve_version(text: &str) -> Result<StdlibVersion, CompileError> {
    StdlibVersion::parse(text)
        .filter(|v| v.is_supported())
        .ok_or_else(|| {
            let supported: Vec<String> = StdlibVersion::SUPPORTED
                .iter()
                .map(|v| v.to_string())
                .collect();
            CompileError::syntax(
                ErrorCode::UnsupportedVersion,
                format!(
                    "unsupported stdlib version '{}' (supported: {})",
                    text,
                    supported.join(", ")
                ),
                Span {
                    offset: 0,
                    len: 0,
                    line: 1,
                    column: 1,
                },
            )
        })
}

/// Compile `source` against the named stdlib version.
pub fn compile(source: &str, stdlib_version: &str) -> Result<ValidatedProgram, CompileError> {
    let version = resolve_version(stdlib_version)?;
    compile_with(source, version)
}

pub(crate) fn compile_with(
    source: &str,
    version: StdlibVersion,
) -> Result<ValidatedProgram, CompileError> {
    let stdlib = Stdlib::for_version(version).ok_or_else(|| {
        CompileError::syntax(
            ErrorCode::UnsupportedVersion,
            format!("unsupported stdlib version '{}'", version),
            Span::default(),
        )
    })?;
    let namespace = NamespaceTable::build(&stdlib);

    let ast: ProgramAst = parse(source)?;
    debug!(mode = %ast.mode, params = ast.params.len(), "parsed program");

    validate(&ast, &namespace)?;
    debug!("security validation passed");

    let bound = bind(ast, &stdlib, &namespace)?;
    let typed = check(&bound, &stdlib)?;
    debug!(output = %typed.output, columns = typed.columns.len(), "type check passed");

    Ok(ValidatedProgram {
        key: CacheKey::compute(source, version),
        stdlib_version: version,
        metadata: bound.metadata,
        params: bound.params,
        mode: bound.mode,
        body: bound.body,
        types: typed.types,
        output: typed.output,
        columns: typed.columns,
        source_len: source.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::Phase;

    const SMA: &str = "@calculate\n  return indicator.sma.close(3)\n";

    #[test]
    fn compile_produces_typed_program() {
        let program = compile(SMA, "1.1").unwrap();
        assert_eq!(program.mode, Mode::Indicator);
        assert_eq!(program.output, DomainType::Series);
        assert_eq!(program.stdlib_version, StdlibVersion::V1_1);
        assert!(program.columns.contains("close"));
    }

    #[test]
    fn compile_is_deterministic() {
        assert_eq!(compile(SMA, "1.1").unwrap(), compile(SMA, "1.1").unwrap());
    }

    #[test]
    fn key_depends_on_source_and_version() {
        let a = CacheKey::compute(SMA, StdlibVersion::V1_1);
        let b = CacheKey::compute(SMA, StdlibVersion::V1_0);
        let c = CacheKey::compute("@calculate\n  return close\n", StdlibVersion::V1_1);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, CacheKey::compute(SMA, StdlibVersion::V1_1));
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn version_aliases_share_key() {
        let a = compile(SMA, "1").unwrap();
        let b = compile(SMA, "1.0").unwrap();
        assert_eq!(a.key, b.key);
    }

    #[test]
    fn unsupported_version() {
        let err = compile(SMA, "9.9").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedVersion);
        assert!(err.message.contains("1.0, 1.1"));
    }

    #[test]
    fn phases_in_order() {
        assert_eq!(compile("@calculate\n  return (close\n", "1.1").unwrap_err().phase, Phase::Lex);
        assert_eq!(compile("@calculate\n  return\n", "1.1").unwrap_err().phase, Phase::Parse);
        assert_eq!(
            compile("@calculate\n  return os.path(close)\n", "1.1").unwrap_err().phase,
            Phase::Security
        );
        assert_eq!(
            compile("@calculate\n  return close + \"x\"\n", "1.1").unwrap_err().phase,
            Phase::Type
        );
    }

    #[test]
    fn security_runs_before_binding() {
        // the undefined name would fail binding, but the import is seen first
        let err = compile("@calculate\n  import os\n  return foo(close)\n", "1.1").unwrap_err();
        assert_eq!(err.code, ErrorCode::ImportForbidden);
    }

    #[test]
    fn stdlib_version_changes_symbol_set() {
        let source = "@calculate\n  return stdev(close, 3)\n";
        assert!(compile(source, "1.0").is_ok());
        assert_eq!(compile(source, "1.1").unwrap_err().code, ErrorCode::UndefinedName);
    }
}
