/*
[INPUT]:  Trader calls (price/buy/sell/bracket/status/balance)
[OUTPUT]: Decimal quantities/prices, order identifiers, completion flags
[POS]:    Capability contract the core depends on (spec §4.1/§6.2)
[UPDATE]: When the venue surface the Trader needs changes
*/

use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

/// Outcome of polling an order: whether it's done, and (if so) the
/// cumulative quote quantity the venue reports as executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderStatus {
    pub completed: bool,
    pub filled_quote_qty: Decimal,
}

/// The narrow capability set a Trader needs from a spot venue.
///
/// Every method is handed a `CancellationToken` so the retry wrapper in
/// `zeken-core` can abort an in-flight call the moment shutdown is
/// requested, rather than waiting for the underlying transport to notice.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Compose the venue's trading-pair string for a base/quote pair.
    /// Pure and infallible: string concatenation, not a network call.
    fn symbol(&self, base: &str, quote: &str) -> String;

    async fn price(&self, symbol: &str, cancel: &CancellationToken) -> Result<Decimal>;

    async fn balance(&self, currency: &str, cancel: &CancellationToken) -> Result<Decimal>;

    /// Attempt a fill-or-kill limit buy at a precision-rounded price derived
    /// from `hint_price`; fall back to a market buy if the limit is
    /// rejected. Returns `(actual_quote_qty_filled, base_qty_filled)`.
    async fn buy(
        &self,
        symbol: &str,
        quote_qty: Decimal,
        hint_price: Decimal,
        cancel: &CancellationToken,
    ) -> Result<(Decimal, Decimal)>;

    /// Market-sell `qty` of the base asset. Returns the quote quantity
    /// received.
    async fn sell(&self, symbol: &str, qty: Decimal, cancel: &CancellationToken) -> Result<Decimal>;

    /// Place a combined take-profit (`upper`) / stop-loss (`lower`) bracket.
    /// Returns `(order_list_id, order_ids)`.
    async fn create_stop_limit(
        &self,
        symbol: &str,
        qty: Decimal,
        upper: Decimal,
        lower: Decimal,
        cancel: &CancellationToken,
    ) -> Result<(String, Vec<String>)>;

    async fn cancel_stop_limit(
        &self,
        symbol: &str,
        order_list_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Poll a single order leg of a bracket (or a standalone order) by id.
    async fn status(
        &self,
        symbol: &str,
        order_id: &str,
        cancel: &CancellationToken,
    ) -> Result<OrderStatus>;
}
