//! Core domain types and logic.
//!
//! Compilation runs `lexer -> parser -> security -> binder -> type_checker`
//! and yields a [`compiler::ValidatedProgram`]; [`engine`] executes it.

pub mod ast;
pub mod binder;
pub mod cache;
pub mod compiler;
pub mod config_validation;
pub mod engine;
pub mod error;
pub mod indicator;
pub mod lexer;
pub mod migration;
pub mod ohlcv;
pub mod parser;
pub mod security;
pub mod series;
pub mod settings;
pub mod source;
pub mod stdlib;
pub mod type_checker;
pub mod types;
