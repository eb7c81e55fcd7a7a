//! Configuration validation.
//!
//! Checks the `[engine]`, `[compiler]` and `[cache]` sections before any
//! program is compiled or run. Absent keys are fine; present ones must parse
//! and be in range. Unrecognised keys are logged and otherwise ignored.

use crate::domain::error::QuantscriptError;
use crate::domain::stdlib::StdlibVersion;
use crate::ports::config_port::ConfigPort;
use tracing::warn;

const KNOWN_KEYS: [(&str, &[&str]); 3] = [
    ("engine", &["deadline_ms", "memory_ceiling_mb"]),
    ("compiler", &["stdlib_version"]),
    ("cache", &["capacity", "ttl_secs"]),
];

pub fn validate_engine_config(config: &dyn ConfigPort) -> Result<(), QuantscriptError> {
    for key in unknown_keys(config) {
        warn!(%key, "ignoring unknown configuration key");
    }
    validate_deadline(config)?;
    validate_memory_ceiling(config)?;
    validate_stdlib_version(config)?;
    validate_cache(config)?;
    Ok(())
}

/// `section.key` names present in the config that nothing reads.
pub fn unknown_keys(config: &dyn ConfigPort) -> Vec<String> {
    let mut unknown = Vec::new();
    for (section, known) in KNOWN_KEYS {
        let mut keys = config.keys(section);
        keys.sort();
        for key in keys {
            if !known.contains(&key.as_str()) {
                unknown.push(format!("{}.{}", section, key));
            }
        }
    }
    unknown
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> QuantscriptError {
    QuantscriptError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Integer value of `key`, `None` when absent.
pub(crate) fn int_value(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<i64>, QuantscriptError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<i64>()
            .map(Some)
            .map_err(|_| invalid(section, key, format!("'{}' is not an integer", raw))),
    }
}

fn validate_deadline(config: &dyn ConfigPort) -> Result<(), QuantscriptError> {
    if let Some(value) = int_value(config, "engine", "deadline_ms")? {
        if value <= 0 {
            return Err(invalid("engine", "deadline_ms", "deadline_ms must be positive"));
        }
    }
    Ok(())
}

fn validate_memory_ceiling(config: &dyn ConfigPort) -> Result<(), QuantscriptError> {
    if let Some(value) = int_value(config, "engine", "memory_ceiling_mb")? {
        if value <= 0 {
            return Err(invalid(
                "engine",
                "memory_ceiling_mb",
                "memory_ceiling_mb must be positive",
            ));
        }
        if (value as u64).checked_mul(1024 * 1024).is_none_or(|b| b > usize::MAX as u64) {
            return Err(invalid("engine", "memory_ceiling_mb", "memory_ceiling_mb is too large"));
        }
    }
    Ok(())
}

fn validate_stdlib_version(config: &dyn ConfigPort) -> Result<(), QuantscriptError> {
    if let Some(raw) = config.get_string("compiler", "stdlib_version") {
        let supported = StdlibVersion::parse(raw.trim()).is_some_and(|v| v.is_supported());
        if !supported {
            let known: Vec<String> = StdlibVersion::SUPPORTED.iter().map(|v| v.to_string()).collect();
            return Err(invalid(
                "compiler",
                "stdlib_version",
                format!("unsupported stdlib version '{}' (supported: {})", raw.trim(), known.join(", ")),
            ));
        }
    }
    Ok(())
}

fn validate_cache(config: &dyn ConfigPort) -> Result<(), QuantscriptError> {
    if let Some(value) = int_value(config, "cache", "capacity")? {
        if value < 1 {
            return Err(invalid("cache", "capacity", "capacity must be at least 1"));
        }
    }
    if let Some(value) = int_value(config, "cache", "ttl_secs")? {
        if value < 0 {
            return Err(invalid("cache", "ttl_secs", "ttl_secs must be non-negative"));
        }
    }
    Ok(())
}
