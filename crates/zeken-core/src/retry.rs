/*
[INPUT]:  A fallible async exchange call and a cancellation token
[OUTPUT]: The call's success value, or a terminal error after the budget
[POS]:    Exchange-call retry discipline (spec §4.6)
[UPDATE]: When the retry cadence or budget changes
*/

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use zeken_exchange::ExchangeError;

/// Fixed retry cadence after the first (immediate) attempt.
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Total budget for non-transient errors across a single retry loop.
/// Transient errors never count against this.
const MAX_NON_TRANSIENT_ERRORS: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("canceled")]
    Canceled,
    #[error(transparent)]
    Exhausted(#[from] ExchangeError),
}

/// Run `call` until it succeeds, the cancellation token fires, or a
/// non-transient error recurs more than `MAX_NON_TRANSIENT_ERRORS` times.
///
/// The first attempt fires with no delay; every attempt after that waits
/// `RETRY_INTERVAL`, with cancellation honored at every wait.
pub async fn retry<F, Fut, T>(cancel: &CancellationToken, mut call: F) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExchangeError>>,
{
    let mut non_transient_errors = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Canceled);
        }

        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_order_canceled() => return Err(RetryError::Exhausted(err)),
            Err(err) if err.is_transient() => {
                tracing::warn!(%err, "transient exchange error, retrying…");
            }
            Err(err) => {
                non_transient_errors += 1;
                if non_transient_errors > MAX_NON_TRANSIENT_ERRORS {
                    return Err(RetryError::Exhausted(err));
                }
                tracing::warn!(%err, attempt = non_transient_errors, "retrying…");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Canceled),
            _ = tokio::time::sleep(RETRY_INTERVAL) => {}
        }
    }
}
