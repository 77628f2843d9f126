use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use zeken_exchange::{Exchange, ExchangeError, OrderStatus, Result};

/// Price source that advances by a fixed step on every `price()` call,
/// matching the end-to-end scenario fixtures (spec §8: "mock exchange whose
/// price advances by +1.0 per poll tick").
pub struct WalkingPrice {
    price: Mutex<Decimal>,
    step: Decimal,
}

impl WalkingPrice {
    pub fn new(start: &str, step: &str) -> Self {
        Self {
            price: Mutex::new(start.parse().unwrap()),
            step: step.parse().unwrap(),
        }
    }
}

#[async_trait]
impl Exchange for WalkingPrice {
    fn symbol(&self, base: &str, quote: &str) -> String {
        format!("{base}{quote}")
    }

    async fn price(&self, _symbol: &str, _cancel: &CancellationToken) -> Result<Decimal> {
        let mut p = self.price.lock().unwrap();
        let current = *p;
        *p += self.step;
        Ok(current)
    }

    async fn balance(&self, _currency: &str, _cancel: &CancellationToken) -> Result<Decimal> {
        Ok(Decimal::from(1_000_000))
    }

    async fn buy(
        &self,
        _symbol: &str,
        quote_qty: Decimal,
        hint_price: Decimal,
        _cancel: &CancellationToken,
    ) -> Result<(Decimal, Decimal)> {
        Ok((quote_qty, quote_qty / hint_price))
    }

    async fn sell(&self, _symbol: &str, qty: Decimal, _cancel: &CancellationToken) -> Result<Decimal> {
        let price = *self.price.lock().unwrap();
        Ok(qty * price)
    }

    async fn create_stop_limit(
        &self,
        _symbol: &str,
        _qty: Decimal,
        _upper: Decimal,
        _lower: Decimal,
        _cancel: &CancellationToken,
    ) -> Result<(String, Vec<String>)> {
        unreachable!("wrap in DryExchange for bracket semantics")
    }

    async fn cancel_stop_limit(
        &self,
        _symbol: &str,
        _order_list_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        unreachable!("wrap in DryExchange for bracket semantics")
    }

    async fn status(
        &self,
        _symbol: &str,
        _order_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<OrderStatus> {
        unreachable!("wrap in DryExchange for bracket semantics")
    }
}

/// Exchange that never completes a bracket, for scenarios that only care
/// about signal acceptance and not fill behavior.
pub struct StableExchange {
    price: Mutex<Decimal>,
}

impl StableExchange {
    pub fn new(start: &str) -> Self {
        Self {
            price: Mutex::new(start.parse().unwrap()),
        }
    }
}

#[async_trait]
impl Exchange for StableExchange {
    fn symbol(&self, base: &str, quote: &str) -> String {
        format!("{base}{quote}")
    }

    async fn price(&self, _symbol: &str, _cancel: &CancellationToken) -> Result<Decimal> {
        Ok(*self.price.lock().unwrap())
    }

    async fn balance(&self, _currency: &str, _cancel: &CancellationToken) -> Result<Decimal> {
        Ok(Decimal::from(1_000_000))
    }

    async fn buy(
        &self,
        _symbol: &str,
        quote_qty: Decimal,
        hint_price: Decimal,
        _cancel: &CancellationToken,
    ) -> Result<(Decimal, Decimal)> {
        Ok((quote_qty, quote_qty / hint_price))
    }

    async fn sell(&self, _symbol: &str, qty: Decimal, _cancel: &CancellationToken) -> Result<Decimal> {
        let price = *self.price.lock().unwrap();
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
        Ok((
            format!("list_{upper}_{lower}_{qty}"),
            vec![format!("greater_{upper}_{qty}"), format!("less_{lower}_{qty}")],
        ))
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
        _symbol: &str,
        _order_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<OrderStatus> {
        Ok(OrderStatus {
            completed: false,
            filled_quote_qty: Decimal::ZERO,
        })
    }
}

/// Price source that panics on `buy`, used to prove a resumed Trader skips
/// the initial position buy that a fresh `create_and_run` would issue.
pub struct WalkingPriceNoBuy {
    price: Mutex<Decimal>,
}

impl WalkingPriceNoBuy {
    pub fn new(start: &str) -> Self {
        Self {
            price: Mutex::new(start.parse().unwrap()),
        }
    }
}

#[async_trait]
impl Exchange for WalkingPriceNoBuy {
    fn symbol(&self, base: &str, quote: &str) -> String {
        format!("{base}{quote}")
    }

    async fn price(&self, _symbol: &str, _cancel: &CancellationToken) -> Result<Decimal> {
        Ok(*self.price.lock().unwrap())
    }

    async fn balance(&self, _currency: &str, _cancel: &CancellationToken) -> Result<Decimal> {
        Ok(Decimal::from(1_000_000))
    }

    async fn buy(
        &self,
        _symbol: &str,
        _quote_qty: Decimal,
        _hint_price: Decimal,
        _cancel: &CancellationToken,
    ) -> Result<(Decimal, Decimal)> {
        panic!("resumed trade must not re-issue the initial buy")
    }

    async fn sell(&self, _symbol: &str, qty: Decimal, _cancel: &CancellationToken) -> Result<Decimal> {
        let price = *self.price.lock().unwrap();
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
        Ok((
            format!("list_{upper}_{lower}_{qty}"),
            vec![format!("greater_{upper}_{qty}"), format!("less_{lower}_{qty}")],
        ))
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
        _symbol: &str,
        _order_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<OrderStatus> {
        Ok(OrderStatus {
            completed: false,
            filled_quote_qty: Decimal::ZERO,
        })
    }
}

/// Exchange that behaves like `WalkingPrice` for everything except `status`,
/// which always reports the order externally canceled — scenario 6.
pub struct OrderCanceledExchange {
    inner: WalkingPrice,
}

impl OrderCanceledExchange {
    pub fn new(start: &str, step: &str) -> Self {
        Self {
            inner: WalkingPrice::new(start, step),
        }
    }
}

#[async_trait]
impl Exchange for OrderCanceledExchange {
    fn symbol(&self, base: &str, quote: &str) -> String {
        self.inner.symbol(base, quote)
    }

    async fn price(&self, symbol: &str, cancel: &CancellationToken) -> Result<Decimal> {
        self.inner.price(symbol, cancel).await
    }

    async fn balance(&self, currency: &str, cancel: &CancellationToken) -> Result<Decimal> {
        self.inner.balance(currency, cancel).await
    }

    async fn buy(
        &self,
        symbol: &str,
        quote_qty: Decimal,
        hint_price: Decimal,
        cancel: &CancellationToken,
    ) -> Result<(Decimal, Decimal)> {
        self.inner.buy(symbol, quote_qty, hint_price, cancel).await
    }

    async fn sell(&self, symbol: &str, qty: Decimal, cancel: &CancellationToken) -> Result<Decimal> {
        self.inner.sell(symbol, qty, cancel).await
    }

    async fn create_stop_limit(
        &self,
        _symbol: &str,
        qty: Decimal,
        upper: Decimal,
        lower: Decimal,
        _cancel: &CancellationToken,
    ) -> Result<(String, Vec<String>)> {
        Ok((format!("list_{upper}_{lower}_{qty}"), vec![format!("leg_{upper}_{qty}")]))
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
        _symbol: &str,
        _order_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<OrderStatus> {
        Err(ExchangeError::OrderCanceled)
    }
}
