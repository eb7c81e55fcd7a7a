//! Wall-clock watchdog around an evaluation.
//!
//! The evaluation runs on its own thread and reports through a channel. The
//! caller waits at most the deadline plus a short grace period; on expiry it
//! raises the shared cancel flag, which the evaluator polls, and returns
//! without joining the worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::warn;

use super::budget::deadline_exceeded;
use crate::domain::error::ExecutionError;

/// Slack for the evaluator to notice its own deadline before the watchdog fires.
const GRACE: Duration = Duration::from_millis(50);

pub(crate) fn run_with_deadline<T, F>(
    deadline: Duration,
    cancel: Arc<AtomicBool>,
    job: F,
) -> Result<T, ExecutionError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ExecutionError> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name("quantscript-exec".to_string())
        .spawn(move || {
            // the receiver is gone once the watchdog has given up
            let _ = tx.send(job());
        })
        .map_err(|e| ExecutionError::fault(format!("failed to start evaluation: {e}"), None))?;

    match rx.recv_timeout(deadline.saturating_add(GRACE)) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            cancel.store(true, Ordering::Relaxed);
            warn!(deadline_ms = deadline.as_millis() as u64, "watchdog cancelled evaluation");
            Err(deadline_exceeded(deadline))
        }
        Err(RecvTimeoutError::Disconnected) => Err(ExecutionError::fault(
            "evaluation worker terminated without a result",
            None,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ErrorCode;
    use std::time::Instant;

    #[test]
    fn returns_job_result() {
        let cancel = Arc::new(AtomicBool::new(false));
        let value = run_with_deadline(Duration::from_secs(5), cancel, || Ok(42)).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn propagates_job_error() {
        let cancel = Arc::new(AtomicBool::new(false));
        let err = run_with_deadline::<(), _>(Duration::from_secs(5), cancel, || {
            Err(ExecutionError::InvalidInput {
                reason: "bad".into(),
            })
        })
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }

    #[test]
    fn times_out_and_cancels_runaway_job() {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let started = Instant::now();
        let err = run_with_deadline::<(), _>(Duration::from_millis(20), cancel.clone(), move || {
            // ignores its own deadline; only the cancel flag stops it
            while !flag.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        })
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DeadlineExceeded);
        assert!(cancel.load(Ordering::Relaxed));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn panicking_job_is_a_fault() {
        let cancel = Arc::new(AtomicBool::new(false));
        let err = run_with_deadline::<(), _>(Duration::from_secs(5), cancel, || panic!("boom"))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::RuntimeFault);
    }
}
