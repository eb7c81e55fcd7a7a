//! Stdlib version registry and source migration.
//!
//! A program records the stdlib it was authored against in its `@metadata`
//! `stdlib` key; programs without one predate the key and target 1.0.
//! [`MigrationRegistry::migrate`] applies the registered rewrites step by step,
//! updates that key and re-runs the full compile pipeline. It fails closed if
//! the migrated program no longer compiles or its output type changed.

use tracing::info;

use crate::domain::compiler::{ValidatedProgram, compile_with, resolve_version};
use crate::domain::error::{CompileError, MigrationError};
use crate::domain::lexer::{SectionKind, Token, TokenKind, tokenize};
use crate::domain::parser::parse;
use crate::domain::stdlib::StdlibVersion;

/// A source-level rewrite applied by a migration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rewrite {
    /// Rename every use of a stdlib symbol, including fluent paths.
    RenameSymbol {
        from: &'static str,
        to: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStep {
    pub from: StdlibVersion,
    pub to: StdlibVersion,
    pub rewrites: Vec<Rewrite>,
}

/// Result of a successful migration.
#[derive(Debug, Clone)]
pub struct Migrated {
    pub source: String,
    pub from: StdlibVersion,
    pub to: StdlibVersion,
    /// Number of identifier occurrences rewritten.
    pub rewritten: usize,
    pub program: ValidatedProgram,
}

/// Stdlib version a program declares, if any.
pub fn declared_stdlib(source: &str) -> Result<Option<StdlibVersion>, CompileError> {
    let ast = parse(source)?;
    ast.metadata
        .stdlib
        .as_deref()
        .map(resolve_version)
        .transpose()
}

#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    steps: Vec<MigrationStep>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry of the migrations this build ships.
    pub fn builtin() -> Self {
        Self::new().with_step(MigrationStep {
            from: StdlibVersion::V1_0,
            to: StdlibVersion::V1_1,
            rewrites: vec![Rewrite::RenameSymbol {
                from: "stdev",
                to: "stddev",
            }],
        })
    }

    pub fn with_step(mut self, step: MigrationStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Stdlib version `source` was authored against.
    pub fn authored_against(&self, source: &str) -> Result<StdlibVersion, CompileError> {
        Ok(declared_stdlib(source)?.unwrap_or(StdlibVersion::V1_0))
    }

    /// Chain of steps leading from `from` to `to`, if one exists.
    pub fn path(&self, from: StdlibVersion, to: StdlibVersion) -> Option<Vec<&MigrationStep>> {
        let mut chain = Vec::new();
        let mut at = from;
        while at != to {
            let step = self.steps.iter().find(|s| s.from == at && s.to > at && s.to <= to)?;
            chain.push(step);
            at = step.to;
        }
        Some(chain)
    }

    pub fn migrate(&self, source: &str, target: &str) -> Result<Migrated, MigrationError> {
        let from = self.authored_against(source)?;
        let to = resolve_version(target)?;
        let before = compile_with(source, from)?;

        let steps = self.path(from, to).ok_or_else(|| MigrationError::NoPath {
            from: from.to_string(),
            to: to.to_string(),
        })?;

        let mut text = source.to_string();
        let mut rewritten = 0;
        for step in &steps {
            for rewrite in &step.rewrites {
                let (next, count) = apply(&text, *rewrite)?;
                text = next;
                rewritten += count;
            }
        }
        if from != to {
            text = set_declared_stdlib(&text, to)?;
        }

        let after = compile_with(&text, to)?;
        if after.output != before.output {
            return Err(MigrationError::TypeChanged {
                before: before.output,
                after: after.output,
            });
        }
        info!(%from, %to, rewritten, "migrated program");
        Ok(Migrated {
            source: text,
            from,
            to,
            rewritten,
            program: after,
        })
    }
}

/// Replace `(offset, len)` byte ranges, which must not overlap.
fn splice(source: &str, mut edits: Vec<(usize, usize, String)>) -> String {
    edits.sort_by_key(|(offset, _, _)| *offset);
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;
    for (offset, len, replacement) in edits {
        out.push_str(&source[cursor..offset]);
        out.push_str(&replacement);
        cursor = offset + len;
    }
    out.push_str(&source[cursor..]);
    out
}

fn apply(source: &str, rewrite: Rewrite) -> Result<(String, usize), CompileError> {
    let Rewrite::RenameSymbol { from, to } = rewrite;
    let edits: Vec<(usize, usize, String)> = tokenize(source)?
        .into_iter()
        .filter(|t| matches!(&t.kind, TokenKind::Ident(name) if name == from))
        .map(|t| (t.span.offset, t.span.len, to.to_string()))
        .collect();
    let count = edits.len();
    Ok((splice(source, edits), count))
}

/// Point the `stdlib` metadata key at `version`, adding the key or the
/// whole `@metadata` block when missing.
fn set_declared_stdlib(source: &str, version: StdlibVersion) -> Result<String, CompileError> {
    let value = format!("\"{}\"", version);
    let tokens = tokenize(source)?;
    let Some(start) = tokens
        .iter()
        .position(|t| t.kind == TokenKind::Section(SectionKind::Metadata))
    else {
        return Ok(format!("@metadata\n  stdlib: {}\n{}", value, source));
    };

    let block = metadata_block(&tokens[start + 1..]);
    let existing = block.windows(3).find_map(|w| match (&w[0].kind, &w[1].kind, &w[2].kind) {
        (TokenKind::Ident(key), TokenKind::Colon, TokenKind::Str(_) | TokenKind::Number(_))
            if key == "stdlib" =>
        {
            Some(&w[2])
        }
        _ => None,
    });
    if let Some(token) = existing {
        return Ok(splice(source, vec![(token.span.offset, token.span.len, value)]));
    }

    // insert as the first entry, matching its indentation
    match block.iter().find(|t| matches!(t.kind, TokenKind::Ident(_))) {
        Some(first) => {
            let line_start = first.span.offset + 1 - first.span.column as usize;
            let indent = &source[line_start..first.span.offset];
            let line = format!("{}stdlib: {}\n", indent, value);
            Ok(splice(source, vec![(line_start, 0, line)]))
        }
        None => Ok(format!("@metadata\n  stdlib: {}\n{}", value, source)),
    }
}

/// Tokens of a metadata block body, up to its closing dedent.
fn metadata_block(tokens: &[Token]) -> &[Token] {
    let end = tokens
        .iter()
        .position(|t| matches!(t.kind, TokenKind::Dedent | TokenKind::Section(_) | TokenKind::Eof))
        .unwrap_or(tokens.len());
    &tokens[..end]
}
