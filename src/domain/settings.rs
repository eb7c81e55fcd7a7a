//! Typed engine settings built from configuration.

use std::time::Duration;

use crate::domain::config_validation::{int_value, validate_engine_config};
use crate::domain::engine::ExecutionLimits;
use crate::domain::error::QuantscriptError;
use crate::domain::stdlib::StdlibVersion;
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_DEADLINE_MS: u64 = 2000;
pub const DEFAULT_MEMORY_CEILING_MB: usize = 256;
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub limits: ExecutionLimits,
    pub stdlib_version: StdlibVersion,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            limits: ExecutionLimits {
                deadline: Duration::from_millis(DEFAULT_DEADLINE_MS),
                memory_ceiling: DEFAULT_MEMORY_CEILING_MB * 1024 * 1024,
            },
            stdlib_version: StdlibVersion::CURRENT,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        }
    }
}

impl EngineSettings {
    /// Validate `config` and fill in defaults for absent keys.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, QuantscriptError> {
        validate_engine_config(config)?;
        let defaults = Self::default();

        let deadline = int_value(config, "engine", "deadline_ms")?
            .map(|ms| Duration::from_millis(ms as u64))
            .unwrap_or(defaults.limits.deadline);
        let memory_ceiling = int_value(config, "engine", "memory_ceiling_mb")?
            .map(|mb| mb as usize * 1024 * 1024)
            .unwrap_or(defaults.limits.memory_ceiling);
        let stdlib_version = config
            .get_string("compiler", "stdlib_version")
            .and_then(|raw| StdlibVersion::parse(raw.trim()))
            .unwrap_or(defaults.stdlib_version);
        let cache_capacity = int_value(config, "cache", "capacity")?
            .map(|n| n as usize)
            .unwrap_or(defaults.cache_capacity);
        let cache_ttl = int_value(config, "cache", "ttl_secs")?
            .map(|s| Duration::from_secs(s as u64))
            .unwrap_or(defaults.cache_ttl);

        Ok(Self {
            limits: ExecutionLimits {
                deadline,
                memory_ceiling,
            },
            stdlib_version,
            cache_capacity,
            cache_ttl,
        })
    }
}
