//! First-success selection over a set of racing futures.
//!
//! The building block for Happy-Eyeballs-style dialing: several connect
//! attempts run concurrently and the first acceptable success wins, while
//! failures are only surfaced once every attempt has been exhausted.

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;

/// Race `attempts`, resolving with the first success accepted by `accept`.
///
/// Successful values rejected by the predicate are dropped. If every attempt
/// fails (or is rejected), the last observed error is returned; `exhausted`
/// supplies the error for an empty or all-rejected set.
pub async fn first_success<T, E, F>(
    attempts: Vec<F>,
    accept: impl Fn(&T) -> bool,
    exhausted: impl FnOnce() -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    let mut pending: FuturesUnordered<F> = attempts.into_iter().collect();
    let mut last_error = None;

    while let Some(outcome) = pending.next().await {
        match outcome {
            Ok(value) if accept(&value) => return Ok(value),
            Ok(_) => {}
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.unwrap_or_else(exhausted))
}
