//! Per-execution resource budget.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::domain::error::{ExecutionError, Resource};

pub(crate) fn deadline_exceeded(deadline: Duration) -> ExecutionError {
    ExecutionError::ResourceExceeded {
        resource: Resource::Deadline,
        limit: format!("{} ms", deadline.as_millis()),
    }
}

/// Deadline, cancellation and memory accounting for one evaluation.
///
/// Memory is the bytes of series data materialized: `retained` values live
/// for the whole execution (memoized results), `transient` ones for the
/// current bar only.
#[derive(Debug)]
pub(crate) struct Budget {
    limit: Duration,
    deadline: Option<Instant>,
    cancel: Arc<AtomicBool>,
    ceiling: usize,
    retained: usize,
    transient: usize,
}

impl Budget {
    pub fn new(limit: Duration, ceiling: usize, cancel: Arc<AtomicBool>) -> Self {
        Self {
            limit,
            // an unrepresentable deadline means no deadline
            deadline: Instant::now().checked_add(limit),
            cancel,
            ceiling,
            retained: 0,
            transient: 0,
        }
    }

    /// Fails once the watchdog has cancelled or the deadline has passed.
    pub fn tick(&self) -> Result<(), ExecutionError> {
        let expired = self.deadline.is_some_and(|d| Instant::now() >= d);
        if expired || self.cancel.load(Ordering::Relaxed) {
            return Err(deadline_exceeded(self.limit));
        }
        Ok(())
    }

    pub fn retain(&mut self, bytes: usize) -> Result<(), ExecutionError> {
        self.retained = self.retained.saturating_add(bytes);
        self.check_memory()
    }

    pub fn charge(&mut self, bytes: usize) -> Result<(), ExecutionError> {
        self.transient = self.transient.saturating_add(bytes);
        self.check_memory()
    }

    pub fn release_transient(&mut self) {
        self.transient = 0;
    }

    pub fn used(&self) -> usize {
        self.retained.saturating_add(self.transient)
    }

    fn check_memory(&self) -> Result<(), ExecutionError> {
        if self.used() > self.ceiling {
            return Err(ExecutionError::ResourceExceeded {
                resource: Resource::Memory,
                limit: format!("{} bytes", self.ceiling),
            });
        }
        Ok(())
    }
}
