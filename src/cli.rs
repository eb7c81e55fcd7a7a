//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::memory_cache::MemoryCacheStore;
use crate::domain::cache::ArtifactCache;
use crate::domain::compiler::{ValidatedProgram, resolve_version};
use crate::domain::engine::{ExecutionResult, IndicatorOutput, execute};
use crate::domain::error::{ExecutionError, QuantscriptError};
use crate::domain::migration::{MigrationRegistry, declared_stdlib};
use crate::domain::series::SeriesTable;
use crate::domain::settings::EngineSettings;
use crate::domain::source::ParamValue;
use crate::domain::stdlib::{Returns, Stdlib, StdlibVersion};
use crate::ports::data_port::DataPort;

#[derive(Parser, Debug)]
#[command(name = "quantscript", about = "Compile, run and migrate QuantScript trading programs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a program and print its signature
    Check {
        file: PathBuf,
        #[arg(long)]
        stdlib: Option<String>,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print the result (or the error report) as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compile a program and execute it against CSV data
    Run {
        file: PathBuf,
        #[arg(short, long)]
        data: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        stdlib: Option<String>,
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Rewrite a program for a newer stdlib version
    Migrate {
        file: PathBuf,
        /// Target stdlib version (defaults to the current one)
        #[arg(long)]
        to: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the stdlib symbols of a version
    Symbols {
        #[arg(long)]
        stdlib: Option<String>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    init_tracing();
    match cli.command {
        Command::Check {
            file,
            stdlib,
            config,
            json,
        } => run_check(&file, stdlib.as_deref(), config.as_ref(), json),
        Command::Run {
            file,
            data,
            config,
            stdlib,
            params,
            json,
        } => run_program(&file, &data, config.as_ref(), stdlib.as_deref(), &params, json),
        Command::Migrate { file, to, output } => run_migrate(&file, to.as_deref(), output.as_ref()),
        Command::Symbols { stdlib } => run_symbols(stdlib.as_deref()),
    }
}

/// Log to stderr; `RUST_LOG` overrides the default `warn` filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn fail(err: QuantscriptError, source: Option<&str>) -> ExitCode {
    match (&err, source) {
        (QuantscriptError::Compile(e), Some(src)) => {
            eprintln!("error: {}", e.display_with_context(src))
        }
        _ => eprintln!("error: {err}"),
    }
    ExitCode::from(&err)
}

pub fn load_settings(path: Option<&PathBuf>) -> Result<EngineSettings, QuantscriptError> {
    match path {
        Some(path) => EngineSettings::from_config(&FileConfigAdapter::from_file(path)?),
        None => Ok(EngineSettings::default()),
    }
}

fn read_source(path: &Path) -> Result<String, QuantscriptError> {
    fs::read_to_string(path).map_err(QuantscriptError::from)
}

/// Version to compile against: explicit flag, then the program's declared
/// stdlib, then the configured default.
fn select_version(
    flag: Option<&str>,
    source: &str,
    settings: &EngineSettings,
) -> Result<StdlibVersion, QuantscriptError> {
    if let Some(flag) = flag {
        return Ok(resolve_version(flag)?);
    }
    Ok(declared_stdlib(source)?.unwrap_or(settings.stdlib_version))
}

/// Each CLI invocation compiles a single file, so the cache is per process
/// and never serves a hit here. Going through it keeps the key and the
/// compile path identical to what long-lived embedders see.
fn compile_program(
    source: &str,
    flag: Option<&str>,
    settings: &EngineSettings,
) -> Result<Arc<ValidatedProgram>, QuantscriptError> {
    let version = select_version(flag, source, settings)?;
    let cache = ArtifactCache::new(
        Box::new(MemoryCacheStore::new(settings.cache_capacity)),
        settings.cache_ttl,
    );
    Ok(cache.get_or_compile(source, &version.to_string())?)
}

fn run_check(path: &PathBuf, stdlib: Option<&str>, config: Option<&PathBuf>, json: bool) -> ExitCode {
    let source = match read_source(path) {
        Ok(s) => s,
        Err(e) => return fail(e, None),
    };
    let settings = match load_settings(config) {
        Ok(s) => s,
        Err(e) => return fail(e, None),
    };

    let program = match compile_program(&source, stdlib, &settings) {
        Ok(p) => p,
        Err(QuantscriptError::Compile(e)) if json => {
            println!("{}", serde_json::json!({ "ok": false, "error": e.report() }));
            return ExitCode::from(&QuantscriptError::Compile(e));
        }
        Err(e) => return fail(e, Some(&source)),
    };

    if json {
        let params: Vec<_> = program
            .params
            .iter()
            .map(|p| serde_json::json!({ "name": p.name, "type": p.ty.to_string() }))
            .collect();
        println!(
            "{}",
            serde_json::json!({
                "ok": true,
                "name": program.metadata.name,
                "mode": program.mode.to_string(),
                "stdlib": program.stdlib_version.to_string(),
                "output": program.output.to_string(),
                "params": params,
                "columns": program.columns,
                "key": program.key.as_str(),
            })
        );
        return ExitCode::SUCCESS;
    }

    if let Some(name) = &program.metadata.name {
        println!("name:    {}", name);
    }
    println!("mode:    {}", program.mode);
    println!("stdlib:  {}", program.stdlib_version);
    println!("output:  {}", program.output);
    for param in &program.params {
        match &param.default {
            Some(default) => println!("param:   {}: {} = {}", param.name, param.ty, default),
            None => println!("param:   {}: {}", param.name, param.ty),
        }
    }
    let columns: Vec<&str> = program.columns.iter().map(String::as_str).collect();
    println!("columns: {}", columns.join(", "));
    println!("key:     {}", program.key);
    ExitCode::SUCCESS
}

/// Parse `NAME=VALUE` pairs using each parameter's declared type.
fn parse_params(
    program: &ValidatedProgram,
    raw: &[String],
) -> Result<HashMap<String, ParamValue>, QuantscriptError> {
    let mut params = HashMap::new();
    for pair in raw {
        let Some((name, value)) = pair.split_once('=') else {
            return Err(ExecutionError::InvalidParam {
                name: pair.clone(),
                reason: "expected NAME=VALUE".to_string(),
            }
            .into());
        };
        let name = name.trim();
        let parsed = match program.param(name) {
            Some(decl) => ParamValue::parse_as(decl.ty, value).ok_or_else(|| {
                ExecutionError::InvalidParam {
                    name: name.to_string(),
                    reason: format!("'{}' is not a valid {}", value, decl.ty),
                }
            })?,
            // unknown names are rejected by the engine
            None => ParamValue::Str(value.to_string()),
        };
        params.insert(name.to_string(), parsed);
    }
    Ok(params)
}

fn run_program(
    path: &PathBuf,
    data: &Path,
    config: Option<&PathBuf>,
    stdlib: Option<&str>,
    raw_params: &[String],
    json: bool,
) -> ExitCode {
    let source = match read_source(path) {
        Ok(s) => s,
        Err(e) => return fail(e, None),
    };
    let settings = match load_settings(config) {
        Ok(s) => s,
        Err(e) => return fail(e, None),
    };
    let program = match compile_program(&source, stdlib, &settings) {
        Ok(p) => p,
        Err(e) => return fail(e, Some(&source)),
    };
    let params = match parse_params(&program, raw_params) {
        Ok(p) => p,
        Err(e) => return fail(e, None),
    };

    let adapter = CsvAdapter::new(PathBuf::new());
    let table = match adapter.load_series(&data.to_string_lossy()) {
        Ok(t) => Arc::new(t),
        Err(e) => return fail(e, None),
    };
    eprintln!("Loaded {} bars from {}", table.len(), data.display());

    let result = match execute(program, Arc::clone(&table), params, settings.limits) {
        Ok(r) => r,
        Err(e) => return fail(e.into(), None),
    };

    if json {
        match serde_json::to_string_pretty(&result) {
            Ok(text) => println!("{}", text),
            Err(e) => return fail(std::io::Error::from(e).into(), None),
        }
    } else {
        print_result(&result, &table);
    }
    ExitCode::SUCCESS
}

fn bar_label(table: &SeriesTable, bar: usize) -> String {
    match table.dates() {
        Some(dates) => dates[bar].to_string(),
        None => bar.to_string(),
    }
}

fn print_result(result: &ExecutionResult, table: &SeriesTable) {
    match result {
        ExecutionResult::Indicator {
            output: IndicatorOutput::Series(values),
        } => {
            for (bar, value) in values.iter().enumerate() {
                println!("{}\t{}", bar_label(table, bar), value);
            }
        }
        ExecutionResult::Indicator {
            output: IndicatorOutput::Record { fields, .. },
        } => {
            let names: Vec<&str> = fields.iter().map(|(name, _)| name.as_str()).collect();
            println!("bar\t{}", names.join("\t"));
            for bar in 0..table.len() {
                let row: Vec<String> = fields.iter().map(|(_, v)| v[bar].to_string()).collect();
                println!("{}\t{}", bar_label(table, bar), row.join("\t"));
            }
        }
        ExecutionResult::Strategy {
            signals,
            final_state,
        } => {
            for signal in signals {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    bar_label(table, signal.bar_index),
                    signal.action,
                    signal.id,
                    signal.direction,
                    signal.quantity
                );
            }
            eprintln!("\n=== Final State ===");
            eprintln!("Position:      {}", final_state.position);
            eprintln!("Quantity:      {}", final_state.quantity);
            if let Some(id) = &final_state.entry_id {
                eprintln!("Entry Id:      {}", id);
            }
            if let Some(price) = final_state.entry_price {
                eprintln!("Entry Price:   {:.4}", price);
            }
            eprintln!("Realized P&L:  {:.4}", final_state.realized_pnl);
            eprintln!("Trades:        {}", final_state.trades);
        }
    }
}

fn run_migrate(path: &PathBuf, to: Option<&str>, output: Option<&PathBuf>) -> ExitCode {
    let source = match read_source(path) {
        Ok(s) => s,
        Err(e) => return fail(e, None),
    };
    let target = to
        .map(str::to_string)
        .unwrap_or_else(|| StdlibVersion::CURRENT.to_string());

    let migrated = match MigrationRegistry::builtin().migrate(&source, &target) {
        Ok(m) => m,
        Err(e) => {
            let err = QuantscriptError::from(e);
            eprintln!("error: {err}");
            return ExitCode::from(&err);
        }
    };
    eprintln!(
        "Migrated {} from stdlib {} to {} ({} rewrites)",
        path.display(),
        migrated.from,
        migrated.to,
        migrated.rewritten
    );

    match output {
        Some(out) => {
            if let Err(e) = fs::write(out, &migrated.source) {
                return fail(e.into(), None);
            }
            eprintln!("Written to: {}", out.display());
        }
        None => print!("{}", migrated.source),
    }
    ExitCode::SUCCESS
}

fn returns_label(returns: Returns) -> String {
    match returns {
        Returns::Series => "Series".to_string(),
        Returns::BooleanSeries => "BooleanSeries".to_string(),
        Returns::Record(kind) => format!("ResultRecord<{}>", kind.name()),
        Returns::Scalar => "Scalar".to_string(),
        Returns::Void => "Void".to_string(),
        Returns::SameAsNumeric => "Scalar|Series".to_string(),
    }
}

fn run_symbols(stdlib: Option<&str>) -> ExitCode {
    let version = match stdlib.map(resolve_version).transpose() {
        Ok(v) => v.unwrap_or(StdlibVersion::CURRENT),
        Err(e) => return fail(e.into(), None),
    };
    let Some(lib) = Stdlib::for_version(version) else {
        return fail(
            QuantscriptError::ConfigInvalid {
                section: "compiler".to_string(),
                key: "stdlib_version".to_string(),
                reason: format!("unsupported stdlib version '{}'", version),
            },
            None,
        );
    };

    println!("stdlib {}", version);
    for def in lib.symbols() {
        println!(
            "  {:<40} -> {:<24} [{}]",
            def.signature(),
            returns_label(def.returns),
            def.category.name()
        );
    }
    ExitCode::SUCCESS
}
