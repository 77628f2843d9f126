/*
[INPUT]:  Wraps a live price feed; simulated balance and fills
[OUTPUT]: Decimal fills identical in shape to the live exchange, but
          instantaneous and funded from a fixed simulated balance
[POS]:    Dry-run exchange for rehearsing the Trader state machine
          without moving real funds (spec §4.1, §6.3)
[UPDATE]: When the simulated fill model needs to account for slippage
*/

use crate::error::Result;
use crate::facade::{Exchange, OrderStatus};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Fixed simulated balance available to every dry-run trade, regardless of
/// how many trades are open concurrently — the dry venue does not model
/// balance contention, only bracket-lifecycle logic.
const DRY_BALANCE: &str = "100";

/// Wraps any `Exchange` (normally a `LiveExchange`) for its `price` method
/// and simulates everything else: buys and sells fill instantly at the
/// live price, and bracket orders are encoded directly into opaque order
/// ids rather than placed on a venue.
///
/// Bracket ids are `greater_<target>_<qty>` and `less_<stop>_<qty>`: the
/// `status` call later decodes these against the live price to decide
/// whether the leg has triggered, without any server-side order state to
/// poll.
pub struct DryExchange {
    price_source: Arc<dyn Exchange>,
}

impl DryExchange {
    pub fn new(price_source: Arc<dyn Exchange>) -> Self {
        Self { price_source }
    }
}

#[async_trait]
impl Exchange for DryExchange {
    fn symbol(&self, base: &str, quote: &str) -> String {
        self.price_source.symbol(base, quote)
    }

    async fn price(&self, symbol: &str, cancel: &CancellationToken) -> Result<Decimal> {
        self.price_source.price(symbol, cancel).await
    }

    async fn balance(&self, _currency: &str, _cancel: &CancellationToken) -> Result<Decimal> {
        Ok(DRY_BALANCE.parse().expect("valid constant"))
    }

    async fn buy(
        &self,
        symbol: &str,
        quote_qty: Decimal,
        _hint_price: Decimal,
        cancel: &CancellationToken,
    ) -> Result<(Decimal, Decimal)> {
        let price = self.price(symbol, cancel).await?;
        let qty = quote_qty / price;
        Ok((quote_qty, qty))
    }

    async fn sell(&self, symbol: &str, qty: Decimal, cancel: &CancellationToken) -> Result<Decimal> {
        let price = self.price(symbol, cancel).await?;
        Ok(qty * price)
    }

    async fn create_stop_limit(
        &self,
        _symbol: &str,
        qty: Decimal,
        upper: Decimal,
        lower: Decimal,
        _cancel: &CancellationToken,
    ) -> Result<(String, Vec<String>)> {
        let order_list_id = format!("dry_{upper}_{lower}_{qty}");
        let order_ids = vec![
            format!("greater_{upper}_{qty}"),
            format!("less_{lower}_{qty}"),
        ];
        Ok((order_list_id, order_ids))
    }

    async fn cancel_stop_limit(
        &self,
        _symbol: &str,
        _order_list_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        Ok(())
    }

    async fn status(
        &self,
        symbol: &str,
        order_id: &str,
        cancel: &CancellationToken,
    ) -> Result<OrderStatus> {
        let price = self.price(symbol, cancel).await?;
        let (threshold, qty) = decode_bracket_leg(order_id)?;
        let triggered = match order_id.split('_').next() {
            Some("greater") => price >= threshold,
            Some("less") => price <= threshold,
            _ => {
                return Err(crate::error::ExchangeError::NotFound(order_id.to_string()));
            }
        };
        if triggered {
            Ok(OrderStatus {
                completed: true,
                filled_quote_qty: qty * price,
            })
        } else {
            Ok(OrderStatus {
                completed: false,
                filled_quote_qty: Decimal::from_i32(0).expect("zero is representable"),
            })
        }
    }
}

fn decode_bracket_leg(order_id: &str) -> Result<(Decimal, Decimal)> {
    let mut parts = order_id.splitn(3, '_');
    let kind = parts.next();
    let threshold = parts.next();
    let qty = parts.next();
    match (kind, threshold, qty) {
        (Some("greater") | Some("less"), Some(threshold), Some(qty)) => {
            let threshold: Decimal = threshold
                .parse()
                .map_err(|_| crate::error::ExchangeError::NotFound(order_id.to_string()))?;
            let qty: Decimal = qty
                .parse()
                .map_err(|_| crate::error::ExchangeError::NotFound(order_id.to_string()))?;
            Ok((threshold, qty))
        }
        _ => Err(crate::error::ExchangeError::NotFound(order_id.to_string())),
    }
}
