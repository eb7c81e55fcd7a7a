//! quantscript: a sandboxed trading DSL compiler and execution engine.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`], command line in [`cli`].

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod ports;

pub use domain::cache::ArtifactCache;
pub use domain::compiler::{CacheKey, ValidatedProgram, compile};
pub use domain::engine::{ExecutionLimits, ExecutionResult, execute};
pub use domain::error::{CompileError, ErrorReport, ExecutionError, MigrationError, QuantscriptError};
pub use domain::migration::MigrationRegistry;
pub use domain::series::SeriesTable;
