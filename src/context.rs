//! Per-run context threaded through every plugin call.

use chrono::{DateTime, Utc};
use std::future::Future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Returned by any plugin call that was interrupted by cancelling the run.
#[derive(Debug, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Built once at startup and passed by reference; never mutated afterwards.
///
/// `now` is fixed for the whole pass so every age computed during one run is
/// measured from the same instant.
#[derive(Debug, Clone)]
pub struct RunContext {
    cancel: CancellationToken,
    now: DateTime<Utc>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::with_clock(CancellationToken::new(), Utc::now())
    }

    pub fn with_clock(cancel: CancellationToken, now: DateTime<Utc>) -> Self {
        Self { cancel, now }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs `fut` to completion unless the run is cancelled first, in which
    /// case `fut` is dropped and [`Cancelled`] is returned.
    pub async fn guard<F, T, E>(&self, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<Cancelled>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Cancelled.into()),
            res = fut => res,
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
