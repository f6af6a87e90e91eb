//! Bounded polling.
//!
//! [`poll_until`] repeatedly invokes a retriever until a predicate holds
//! or an optional deadline expires. Errors from either closure propagate
//! immediately; only a `false` predicate keeps the loop going. The loop
//! sleeps `interval` between attempts and is cancellable only by its own
//! deadline.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::trace;

/// Outcome of a failed [`poll_until`] call.
#[derive(Debug, Error)]
pub enum PollError<E> {
    /// The deadline elapsed before the predicate held.
    #[error("timed out after {elapsed:?} waiting for condition")]
    Timeout { elapsed: Duration },

    /// The retriever or predicate failed.
    #[error("{0}")]
    Failed(E),
}

impl<E> PollError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PollError::Timeout { .. })
    }

    /// Convert the inner error, keeping timeouts as they are.
    pub fn map_failed<F>(self, f: impl FnOnce(E) -> F) -> PollError<F> {
        match self {
            PollError::Timeout { elapsed } => PollError::Timeout { elapsed },
            PollError::Failed(e) => PollError::Failed(f(e)),
        }
    }
}

/// Poll `retriever` until `predicate` accepts its value.
///
/// Returns the first accepted value. With `time_out = None` the loop only
/// ends on success or error. A value that is already acceptable on the
/// first call is returned without sleeping.
pub async fn poll_until<T, E, R, Fut, P>(
    mut retriever: R,
    mut predicate: P,
    interval: Duration,
    time_out: Option<Duration>,
) -> Result<T, PollError<E>>
where
    R: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&T) -> Result<bool, E>,
{
    let started = Instant::now();
    let deadline = time_out.map(|t| started + t);
    let mut attempts: u64 = 0;

    loop {
        attempts += 1;
        let value = retriever().await.map_err(PollError::Failed)?;
        if predicate(&value).map_err(PollError::Failed)? {
            trace!(attempts, "poll condition satisfied");
            return Ok(value);
        }

        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                let elapsed = started.elapsed();
                trace!(attempts, ?elapsed, "poll deadline exceeded");
                return Err(PollError::Timeout { elapsed });
            }
        }

        if interval.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(interval).await;
        }
    }
}
