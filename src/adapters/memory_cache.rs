//! In-process compiled-artifact store.
//!
//! Bounded by entry count with per-entry TTL. When full, the oldest inserted
//! entry is evicted. Values are `Arc`s, so eviction never invalidates a
//! program a caller already holds.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::domain::compiler::{CacheKey, ValidatedProgram};
use crate::domain::error::CacheStoreError;
use crate::ports::cache_port::CachePort;

/// Compilation metadata recorded with each entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    pub compiled_at: DateTime<Utc>,
    pub size: usize,
}

struct Entry {
    value: Arc<ValidatedProgram>,
    seq: u64,
    expires: Option<Instant>,
    info: EntryInfo,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires.is_some_and(|at| now >= at)
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<CacheKey, Entry>,
    /// Insertion sequence to key, oldest first.
    order: BTreeMap<u64, CacheKey>,
    next_seq: u64,
}

impl Inner {
    fn remove(&mut self, key: &CacheKey) {
        if let Some(entry) = self.entries.remove(key) {
            self.order.remove(&entry.seq);
        }
    }
}

pub struct MemoryCacheStore {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl MemoryCacheStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn info(&self, key: &CacheKey) -> Option<EntryInfo> {
        self.inner().entries.get(key).map(|e| e.info)
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner();
        let expired: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }
}

impl CachePort for MemoryCacheStore {
    fn get(&self, key: &CacheKey) -> Result<Option<Arc<ValidatedProgram>>, CacheStoreError> {
        let mut inner = self.inner();
        match inner.entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(Instant::now()) => {
                return Ok(Some(Arc::clone(&entry.value)));
            }
            Some(_) => {}
        }
        inner.remove(key);
        Ok(None)
    }

    fn put(
        &self,
        key: CacheKey,
        value: Arc<ValidatedProgram>,
        ttl: Duration,
    ) -> Result<(), CacheStoreError> {
        if self.capacity == 0 {
            return Ok(());
        }
        let now = Instant::now();
        let mut inner = self.inner();
        inner.remove(&key);

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let info = EntryInfo {
            compiled_at: Utc::now(),
            size: value.approx_size(),
        };
        inner.order.insert(seq, key.clone());
        inner.entries.insert(
            key,
            Entry {
                value,
                seq,
                expires: now.checked_add(ttl),
                info,
            },
        );

        while inner.entries.len() > self.capacity {
            let Some((_, oldest)) = inner.order.pop_first() else {
                break;
            };
            inner.entries.remove(&oldest);
        }
        Ok(())
    }
}
