//! Content-addressed memoization of the compile pipeline.
//!
//! [`ArtifactCache::get_or_compile`] serves a stored [`ValidatedProgram`]
//! when one exists and otherwise compiles it. At most one compilation per key
//! is in flight: concurrent callers for the same key wait for the leader's
//! result instead of compiling again. Store failures degrade to misses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::compiler::{CacheKey, ValidatedProgram, compile_with, resolve_version};
use crate::domain::error::CompileError;
use crate::domain::stdlib::StdlibVersion;
use crate::ports::cache_port::CachePort;

type CompileResult = Result<Arc<ValidatedProgram>, CompileError>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub compilations: u64,
    /// Callers that waited on another caller's compilation.
    pub coalesced: u64,
    pub store_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    compilations: AtomicU64,
    coalesced: AtomicU64,
    store_errors: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

enum FlightState {
    Pending,
    Done(CompileResult),
    /// The leader went away without a result; waiters start over.
    Abandoned,
}

struct Flight {
    state: Mutex<FlightState>,
    settled: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            state: Mutex::new(FlightState::Pending),
            settled: Condvar::new(),
        }
    }

    fn settle(&self, state: FlightState) {
        *lock(&self.state) = state;
        self.settled.notify_all();
    }

    /// `None` when the leader abandoned the flight.
    fn wait(&self) -> Option<CompileResult> {
        let mut state = lock(&self.state);
        loop {
            match &*state {
                FlightState::Pending => {
                    state = self
                        .settled
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                FlightState::Done(result) => return Some(result.clone()),
                FlightState::Abandoned => return None,
            }
        }
    }
}

/// Settles a flight and unregisters it, even if the leader unwinds.
struct FlightGuard<'c> {
    cache: &'c ArtifactCache,
    key: &'c CacheKey,
    flight: Arc<Flight>,
    result: Option<CompileResult>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        match self.result.take() {
            Some(result) => self.flight.settle(FlightState::Done(result)),
            None => self.flight.settle(FlightState::Abandoned),
        }
        lock(&self.cache.inflight).remove(self.key);
    }
}

pub struct ArtifactCache {
    store: Box<dyn CachePort>,
    ttl: Duration,
    inflight: Mutex<HashMap<CacheKey, Arc<Flight>>>,
    counters: Counters,
}

impl ArtifactCache {
    pub fn new(store: Box<dyn CachePort>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            inflight: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            compilations: c.compilations.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            store_errors: c.store_errors.load(Ordering::Relaxed),
        }
    }

    /// Return the compiled program for `(source, stdlib_version)`, compiling
    /// only if no stored or in-flight result exists. Compile errors are
    /// returned to every waiting caller but never stored.
    pub fn get_or_compile(
        &self,
        source: &str,
        stdlib_version: &str,
    ) -> Result<Arc<ValidatedProgram>, CompileError> {
        let version = resolve_version(stdlib_version)?;
        let key = CacheKey::compute(source, version);

        let mut counted_miss = false;
        loop {
            if let Some(program) = self.lookup(&key, version) {
                bump(&self.counters.hits);
                debug!(key = %key, "artifact cache hit");
                return Ok(program);
            }
            if !counted_miss {
                bump(&self.counters.misses);
                counted_miss = true;
            }

            let (flight, leader) = {
                let mut inflight = lock(&self.inflight);
                match inflight.get(&key) {
                    Some(flight) => (Arc::clone(flight), false),
                    None => {
                        let flight = Arc::new(Flight::new());
                        inflight.insert(key.clone(), Arc::clone(&flight));
                        (flight, true)
                    }
                }
            };

            if leader {
                return self.lead(&key, version, source, flight);
            }
            bump(&self.counters.coalesced);
            debug!(key = %key, "waiting on in-flight compilation");
            if let Some(result) = flight.wait() {
                return result;
            }
        }
    }

    fn lead(
        &self,
        key: &CacheKey,
        version: StdlibVersion,
        source: &str,
        flight: Arc<Flight>,
    ) -> CompileResult {
        let mut guard = FlightGuard {
            cache: self,
            key,
            flight,
            result: None,
        };

        // a previous leader may have stored the result since our lookup
        let result = match self.lookup(key, version) {
            Some(program) => Ok(program),
            None => {
                bump(&self.counters.compilations);
                debug!(key = %key, "artifact cache miss, compiling");
                let compiled = compile_with(source, version).map(Arc::new);
                if let Ok(program) = &compiled {
                    self.store(key, program);
                }
                compiled
            }
        };
        guard.result = Some(result.clone());
        result
    }

    fn lookup(&self, key: &CacheKey, version: StdlibVersion) -> Option<Arc<ValidatedProgram>> {
        match self.store.get(key) {
            Ok(Some(program)) if program.key == *key && program.stdlib_version == version => {
                Some(program)
            }
            Ok(Some(_)) => {
                warn!(key = %key, "cache store returned a program for another key");
                bump(&self.counters.store_errors);
                None
            }
            Ok(None) => None,
            Err(err) => {
                warn!(key = %key, error = %err, "cache store read failed");
                bump(&self.counters.store_errors);
                None
            }
        }
    }

    fn store(&self, key: &CacheKey, program: &Arc<ValidatedProgram>) {
        if let Err(err) = self.store.put(key.clone(), Arc::clone(program), self.ttl) {
            warn!(key = %key, error = %err, "cache store write failed");
            bump(&self.counters.store_errors);
        }
    }
}
