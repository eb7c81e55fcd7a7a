//! Compiled-artifact store port.
//!
//! The core only relies on `get` and `put`. A store may fail; the artifact
//! cache treats every failure as a miss, so a store is never required for
//! correctness.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::compiler::{CacheKey, ValidatedProgram};
use crate::domain::error::CacheStoreError;

pub trait CachePort: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<Arc<ValidatedProgram>>, CacheStoreError>;

    /// Store `value` under `key` for at most `ttl`.
    fn put(
        &self,
        key: CacheKey,
        value: Arc<ValidatedProgram>,
        ttl: Duration,
    ) -> Result<(), CacheStoreError>;
}
