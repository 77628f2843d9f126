/*
[INPUT]:  A new or resumed Trade, the exchange facade, the trade store
[OUTPUT]: A running position: buy, bracket, ratchet, force-exit, persist
[POS]:    Per-position state machine (spec §4.4)
[UPDATE]: When a lifecycle phase or exit condition changes
*/

use crate::config::Config;
use crate::retry::{RetryError, retry};
use crate::store::TradeStore;
use crate::trade::Trade;
use anyhow::{Context, Result, anyhow};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use zeken_exchange::{Exchange, ExchangeError};

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// The terminal reason a Trader's run loop exited, observed by the
/// supervisor to decide what to do with the Trade record (spec §4.5).
pub enum TraderExit {
    Canceled,
    OrderCanceled,
    Completed,
}

/// Live observation of a running Trader, shared with the supervisor so
/// `/status` and the signal gate can read current state without reaching
/// into the Trader's task.
pub struct TraderHandle {
    pub force_sell: CancellationToken,
    pub snapshot: Arc<StdMutex<Trade>>,
    pub current_price: Arc<StdMutex<Decimal>>,
}

pub struct Trader {
    trade: Trade,
    exchange: Arc<dyn Exchange>,
    store: Arc<dyn TradeStore>,
    config: Config,
    shutdown: CancellationToken,
    force_sell: CancellationToken,
    snapshot: Arc<StdMutex<Trade>>,
    current_price: Arc<StdMutex<Decimal>>,
}

impl Trader {
    /// Build a Trader and the handle the supervisor keeps alongside it.
    pub fn new(
        trade: Trade,
        exchange: Arc<dyn Exchange>,
        store: Arc<dyn TradeStore>,
        config: Config,
        shutdown: CancellationToken,
    ) -> (Self, TraderHandle) {
        let force_sell = CancellationToken::new();
        let snapshot = Arc::new(StdMutex::new(trade.clone()));
        let current_price = Arc::new(StdMutex::new(trade.start_price));
        let handle = TraderHandle {
            force_sell: force_sell.clone(),
            snapshot: snapshot.clone(),
            current_price: current_price.clone(),
        };
        let trader = Self {
            trade,
            exchange,
            store,
            config,
            shutdown,
            force_sell,
            snapshot,
            current_price,
        };
        (trader, handle)
    }

    pub fn base(&self) -> &str {
        &self.trade.base
    }

    fn publish(&self) {
        *self.snapshot.lock().unwrap() = self.trade.clone();
    }

    /// Run `Create` (buy + initial bracket) then `Run`. Used for freshly
    /// accepted signals.
    pub async fn create_and_run(mut self) -> Result<TraderExit> {
        self.create().await?;
        self.run().await
    }

    /// Skip `Create` and start directly in the `Run` loop, using the
    /// persisted Trade's `current_target`/`order_ids` as source of truth.
    /// Used for Traders reconstructed on resume (spec §4.5 resume protocol).
    pub async fn resume_and_run(self) -> Result<TraderExit> {
        self.run().await
    }

    async fn create(&mut self) -> Result<()> {
        let symbol = self.exchange.symbol(&self.trade.base, &self.trade.quote);

        let buy_result = retry(&self.shutdown, || {
            self.exchange
                .buy(&symbol, self.trade.quote_quantity, self.trade.start_price, &self.shutdown)
        })
        .await
        .map_err(retry_error_to_anyhow)
        .context("initial buy failed")?;

        self.trade.quote_quantity = buy_result.0;
        self.trade.quantity = buy_result.1;
        self.publish();
        self.store.update(&self.trade).await.context("persist after buy")?;

        let last_allowed = self.trade.last_allowed(self.config.max_target);
        let upper = self.trade.targets[last_allowed];
        let lower = self.trade.stop_price;

        match self.open_bracket(&symbol, upper, lower).await {
            Ok(()) => {
                self.store.update(&self.trade).await.context("persist after bracket create")?;
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    base = %self.trade.base,
                    %err,
                    "buy succeeded but bracket creation failed — manual liquidation required"
                );
                Err(err)
            }
        }
    }

    async fn open_bracket(&mut self, symbol: &str, upper: Decimal, lower: Decimal) -> Result<()> {
        let (order_list_id, order_ids) = retry(&self.shutdown, || {
            self.exchange
                .create_stop_limit(symbol, self.trade.quantity, upper, lower, &self.shutdown)
        })
        .await
        .map_err(retry_error_to_anyhow)
        .context("create bracket failed")?;

        self.trade.order_list_id = order_list_id;
        self.trade.order_ids = order_ids;
        Ok(())
    }

    async fn cancel_bracket(&mut self, symbol: &str) -> Result<()> {
        if self.trade.order_list_id.is_empty() {
            return Ok(());
        }
        retry(&self.shutdown, || {
            self.exchange
                .cancel_stop_limit(symbol, &self.trade.order_list_id, &self.shutdown)
        })
        .await
        .map_err(retry_error_to_anyhow)
        .context("cancel bracket failed")?;

        self.trade.order_list_id.clear();
        self.trade.order_ids.clear();
        Ok(())
    }

    async fn run(mut self) -> Result<TraderExit> {
        let symbol = self.exchange.symbol(&self.trade.base, &self.trade.quote);
        let last_allowed = self.trade.last_allowed(self.config.max_target);

        let mut lower = self.trade.stop_price;
        let mut previous = self.trade.start_price;
        let upper = self.trade.targets[last_allowed];
        let mut target = self.trade.targets[self.trade.current_target];

        let band = Decimal::from(self.config.stop_band_bps) / Decimal::from(10_000);
        let stop_band_lower = Decimal::ONE - band;
        let stop_band_upper = Decimal::ONE + band;

        let mut first_tick = true;
        loop {
            if !first_tick {
                tokio::select! {
                    _ = self.shutdown.cancelled() => return Ok(TraderExit::Canceled),
                    _ = self.force_sell.cancelled() => {}
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
            }
            first_tick = false;

            if self.shutdown.is_cancelled() {
                return Ok(TraderExit::Canceled);
            }

            match self.poll_brackets(&symbol).await {
                Ok(Some(filled_quote_qty)) => {
                    self.trade.end_quote_quantity = Some(filled_quote_qty);
                    self.trade.end_time = Some(chrono::Utc::now());
                    self.store.update(&self.trade).await.context("persist on bracket fill")?;
                    return Ok(TraderExit::Completed);
                }
                Ok(None) => {}
                Err(err) if is_order_canceled(&err) => return Ok(TraderExit::OrderCanceled),
                Err(err) => return Err(err),
            }

            let price = retry(&self.shutdown, || self.exchange.price(&symbol, &self.shutdown))
                .await
                .map_err(retry_error_to_anyhow)
                .context("poll price failed")?;
            *self.current_price.lock().unwrap() = price;

            let forced_by_operator = self.force_sell.is_cancelled();
            let forced_by_price =
                price < lower * stop_band_lower || price > upper * stop_band_upper;

            if forced_by_operator || forced_by_price {
                self.cancel_bracket(&symbol).await?;
                let filled = retry(&self.shutdown, || {
                    self.exchange.sell(&symbol, self.trade.quantity, &self.shutdown)
                })
                .await
                .map_err(retry_error_to_anyhow)
                .context("force sell failed")?;

                self.trade.end_quote_quantity = Some(filled);
                self.trade.end_time = Some(chrono::Utc::now());
                self.store.update(&self.trade).await.context("persist on force exit")?;
                return Ok(TraderExit::Completed);
            }

            if price >= target && self.trade.current_target < last_allowed {
                self.cancel_bracket(&symbol).await?;
                self.trade.current_target += 1;
                lower = previous;
                previous = target;
                target = self.trade.targets[self.trade.current_target];
                self.open_bracket(&symbol, upper, lower).await?;
                self.publish();
                self.store.update(&self.trade).await.context("persist on ratchet")?;
            }
        }
    }

    /// Poll every leg of the active bracket. Returns `Some(filled_quote_qty)`
    /// if any leg completed.
    async fn poll_brackets(&self, symbol: &str) -> Result<Option<Decimal>> {
        for order_id in &self.trade.order_ids {
            let status = retry(&self.shutdown, || self.exchange.status(symbol, order_id, &self.shutdown))
                .await
                .map_err(retry_error_to_anyhow)?;
            if status.completed {
                return Ok(Some(status.filled_quote_qty));
            }
        }
        Ok(None)
    }
}

fn is_order_canceled(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ExchangeError>()
        .map(|e| e.is_order_canceled())
        .unwrap_or(false)
}

fn retry_error_to_anyhow(err: RetryError) -> anyhow::Error {
    match err {
        RetryError::Canceled => anyhow!("canceled"),
        RetryError::Exhausted(exchange_err) => anyhow::Error::new(exchange_err),
    }
}
