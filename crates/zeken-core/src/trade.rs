/*
[INPUT]:  Signal acceptance, Trader mutations
[OUTPUT]: The persisted Trade record and its store key encoding
[POS]:    Data model (spec §3)
[UPDATE]: When a field is added to the persisted Trade shape
*/

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A live or historical position, keyed by `start_time`.
///
/// Exactly one Trader mutates a given Trade at a time (spec invariant); the
/// store only needs to be safe against concurrent callers for *different*
/// Trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub start_time: DateTime<Utc>,
    pub base: String,
    pub quote: String,
    pub start_price: Decimal,
    pub targets: Vec<Decimal>,
    pub stop_price: Decimal,
    pub quote_quantity: Decimal,
    pub quantity: Decimal,
    pub current_target: usize,
    pub order_list_id: String,
    pub order_ids: Vec<String>,
    pub end_quote_quantity: Option<Decimal>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Trade {
    pub fn new(
        base: String,
        quote: String,
        start_price: Decimal,
        targets: Vec<Decimal>,
        stop_price: Decimal,
        quote_quantity: Decimal,
    ) -> Self {
        Self {
            start_time: Utc::now(),
            base,
            quote,
            start_price,
            targets,
            stop_price,
            quote_quantity,
            quantity: Decimal::ZERO,
            current_target: 0,
            order_list_id: String::new(),
            order_ids: Vec::new(),
            end_quote_quantity: None,
            end_time: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    /// Key under which the store persists this Trade: an RFC 3339
    /// nanosecond-precision timestamp, which sorts lexicographically in the
    /// same order as chronologically.
    pub fn key(&self) -> String {
        encode_key(self.start_time)
    }

    /// Last target index a bracket's `upper` leg is allowed to sit at,
    /// given the operator's configured cap.
    pub fn last_allowed(&self, max_target: usize) -> usize {
        self.targets.len().min(max_target).saturating_sub(1)
    }
}

pub fn encode_key(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}
