//! Timeout and cancellation around external calls

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How a guarded call ended
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome<T> {
    Done(T),
    TimedOut(Duration),
    /// Cancelled before completion; any late result is discarded
    Cancelled,
}

impl<T> CallOutcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CallOutcome::Cancelled)
    }
}

/// Run `fut` under a timeout, abandoning it if `cancel` fires first
///
/// A result that arrives after cancellation is dropped.
pub async fn guarded<F, T>(cancel: &CancellationToken, limit: Duration, fut: F) -> CallOutcome<T>
where
    F: Future<Output = T>,
{
    if cancel.is_cancelled() {
        debug!("guarded: already cancelled");
        return CallOutcome::Cancelled;
    }

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => CallOutcome::Cancelled,
        res = tokio::time::timeout(limit, fut) => match res {
            Ok(value) => CallOutcome::Done(value),
            Err(_) => {
                debug!(limit_ms = limit.as_millis() as u64, "guarded: timed out");
                CallOutcome::TimedOut(limit)
            }
        },
    };

    if cancel.is_cancelled() {
        return CallOutcome::Cancelled;
    }
    outcome
}

/// Sleep that wakes early on cancellation; returns false if cancelled
pub async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
