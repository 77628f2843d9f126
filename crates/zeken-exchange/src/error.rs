/*
[INPUT]:  Failures from HTTP transport, venue API responses, and local parsing
[OUTPUT]: A single error type the Trader's retry loop can classify
[POS]:    Error taxonomy for the exchange facade
[UPDATE]: When adding a new failure mode the retry loop needs to distinguish
*/

use thiserror::Error;

/// Errors the `Exchange` facade can return.
///
/// The Trader's retry discipline (see `zeken-core::retry`) only cares about
/// three buckets: transient (retry forever), the `OrderCanceled` sentinel
/// (terminal, handled specially by the supervisor), and everything else
/// (retried up to a budget, then surfaced).
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Network-level failure: timeout, connection reset, DNS hiccup.
    #[error("transient network error: {0}")]
    Transient(String),

    /// The venue responded but rejected the request outright (bad
    /// parameters, insufficient balance, precision violation, price guard).
    #[error("exchange rejected request: {0}")]
    Rejected(String),

    /// `status` observed the order in a `CANCELED` state. Distinct from
    /// `Rejected` because the supervisor reacts to it specially (deletes the
    /// trade from the store instead of retaining it with `end_time` set).
    #[error("order canceled externally")]
    OrderCanceled,

    /// The requested symbol/order/asset doesn't exist on the venue.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("response deserialization failed: {0}")]
    Serialization(String),

    #[error("exchange client misconfigured: {0}")]
    Config(String),
}

impl ExchangeError {
    /// Transient errors are retried indefinitely and never count against
    /// the 100-error budget (spec §4.6).
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Transient(_))
    }

    pub fn is_order_canceled(&self) -> bool {
        matches!(self, ExchangeError::OrderCanceled)
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ExchangeError::Transient(err.to_string())
        } else {
            ExchangeError::Rejected(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExchangeError>;
