/*
[INPUT]:  Inbound signal/command text, resumed Trades from the store
[OUTPUT]: Spawned Traders, operator status/sell/shutdown responses
[POS]:    Supervisor / Bot (spec §4.5)
[UPDATE]: When a new chat command or reap outcome is added
*/

use crate::chat::ChatSurface;
use crate::config::Config;
use crate::gate;
use crate::signal::SignalParser;
use crate::store::TradeStore;
use crate::trade::Trade;
use crate::trader::{Trader, TraderExit, TraderHandle};
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use zeken_exchange::Exchange;

/// Window the resume protocol scans for unfinished trades: roughly a year
/// back, a day forward, wide enough to never miss a record on clock skew.
const RESUME_WINDOW_BACK_DAYS: i64 = 365;
const RESUME_WINDOW_FORWARD_DAYS: i64 = 1;

pub struct Supervisor {
    trades: Mutex<HashMap<String, TraderHandle>>,
    exchange: Arc<dyn Exchange>,
    store: Arc<dyn TradeStore>,
    parser: Arc<dyn SignalParser>,
    chat: Arc<dyn ChatSurface>,
    config: Config,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        store: Arc<dyn TradeStore>,
        parser: Arc<dyn SignalParser>,
        chat: Arc<dyn ChatSurface>,
        config: Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            trades: Mutex::new(HashMap::new()),
            exchange,
            store,
            parser,
            chat,
            config,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Resume unfinished trades, register chat handlers, then block until
    /// shutdown is requested.
    pub async fn run(self: &Arc<Self>) -> anyhow::Result<()> {
        self.resume().await?;
        self.register_handlers();
        self.chat.run(self.shutdown.clone()).await;
        Ok(())
    }

    async fn resume(self: &Arc<Self>) -> anyhow::Result<()> {
        let now = Utc::now();
        let from = now - ChronoDuration::days(RESUME_WINDOW_BACK_DAYS);
        let to = now + ChronoDuration::days(RESUME_WINDOW_FORWARD_DAYS);
        let unfinished = self.store.list(from, to, false).await?;

        let mut trades = self.trades.lock().await;
        for trade in unfinished {
            tracing::info!(base = %trade.base, current_target = trade.current_target, "resuming trade");
            self.launch(&mut trades, trade, false);
        }
        Ok(())
    }

    fn register_handlers(self: &Arc<Self>) {
        let signal_sup = self.clone();
        self.chat.on_text(Arc::new(move |text| {
            let sup = signal_sup.clone();
            tokio::spawn(async move { sup.handle_signal(&text).await });
        }));

        let status_sup = self.clone();
        self.chat.on_command(
            "status",
            Arc::new(move |_payload| {
                let sup = status_sup.clone();
                tokio::spawn(async move { sup.handle_status().await });
            }),
        );

        let sell_sup = self.clone();
        self.chat.on_command(
            "sell",
            Arc::new(move |payload| {
                let sup = sell_sup.clone();
                tokio::spawn(async move { sup.handle_sell(payload.trim()).await });
            }),
        );

        let shutdown_sup = self.clone();
        self.chat.on_command(
            "shutdown",
            Arc::new(move |_payload| {
                shutdown_sup.shutdown.cancel();
            }),
        );
    }

    async fn handle_signal(self: &Arc<Self>, text: &str) {
        let signal = match self.parser.parse(text) {
            Ok(signal) => signal,
            Err(err) => {
                tracing::warn!(%err, "failed to parse signal");
                return;
            }
        };

        // Held across the balance lookup and gate evaluation so the whole
        // accept-or-reject decision for this signal is serialized against
        // every other signal and every Trader exit (spec §5: "Signal
        // acceptance is serialized by the supervisor lock").
        let mut trades = self.trades.lock().await;
        let live_trades: HashMap<String, Trade> = trades
            .iter()
            .map(|(base, handle)| (base.clone(), handle.snapshot.lock().unwrap().clone()))
            .collect();

        let quote_balance = if self.config.dry {
            Decimal::ZERO
        } else {
            match self.exchange.balance(&self.config.quote_currency, &self.shutdown).await {
                Ok(balance) => balance,
                Err(err) => {
                    tracing::warn!(%err, "failed to read balance for signal sizing");
                    drop(trades);
                    self.chat.send(&format!("signal for {} rejected: balance unavailable", signal.base)).await;
                    return;
                }
            }
        };

        let trade = match gate::evaluate(&self.config, &signal, &live_trades, quote_balance) {
            Ok(trade) => trade,
            Err(rejection) => {
                tracing::info!(base = %signal.base, %rejection, "signal rejected");
                drop(trades);
                self.chat.send(&format!("signal for {} rejected: {rejection}", signal.base)).await;
                return;
            }
        };

        let base = trade.base.clone();
        if let Err(err) = self.store.update(&trade).await {
            tracing::error!(%err, base = %base, "failed to persist new trade");
            return;
        }
        self.launch(&mut trades, trade, true);
    }

    /// Build a Trader for `trade`, register its handle in `trades`, and
    /// spawn it. `is_new` selects `Create + Run` for freshly accepted
    /// signals versus `Run`-only for resumed ones. Caller must already hold
    /// the `trades` lock.
    fn launch(self: &Arc<Self>, trades: &mut HashMap<String, TraderHandle>, trade: Trade, is_new: bool) {
        let base = trade.base.clone();
        let (trader, handle) = Trader::new(
            trade,
            self.exchange.clone(),
            self.store.clone(),
            self.config.clone(),
            self.shutdown.clone(),
        );
        trades.insert(base.clone(), handle);

        let sup = self.clone();
        tokio::spawn(async move {
            let result = if is_new {
                trader.create_and_run().await
            } else {
                trader.resume_and_run().await
            };
            sup.reap(base, result).await;
        });
    }

    async fn reap(self: &Arc<Self>, base: String, result: anyhow::Result<TraderExit>) {
        let handle = self.trades.lock().await.remove(&base);
        let Some(handle) = handle else { return };

        match result {
            Ok(TraderExit::Canceled) => {}
            Ok(TraderExit::OrderCanceled) => {
                let trade = handle.snapshot.lock().unwrap().clone();
                tracing::warn!(base = %base, "bracket order canceled externally, deleting trade");
                self.chat.send(&format!("⚠️ {base}: order canceled externally, trade removed")).await;
                if let Err(err) = self.store.delete(&trade).await {
                    tracing::error!(%err, base = %base, "failed to delete order-canceled trade");
                }
            }
            Ok(TraderExit::Completed) => {
                let trade = handle.snapshot.lock().unwrap().clone();
                let profit = trade.end_quote_quantity.unwrap_or_default() - trade.quote_quantity;
                tracing::info!(base = %base, %profit, "trade completed");
                self.chat
                    .send(&format!("{base} closed, profit {profit} {}", trade.quote))
                    .await;
            }
            Err(err) => {
                tracing::error!(%err, base = %base, "trader exited with an error");
                self.chat.send(&format!("{base} exited with an error: {err}")).await;
            }
        }
    }

    async fn handle_status(self: &Arc<Self>) {
        let trades = self.trades.lock().await;
        let mut entries: Vec<(Trade, Decimal)> = trades
            .values()
            .map(|handle| {
                let trade = handle.snapshot.lock().unwrap().clone();
                let price = *handle.current_price.lock().unwrap();
                (trade, price)
            })
            .collect();
        drop(trades);
        entries.sort_by_key(|(trade, _)| trade.start_time);

        let mut total = Decimal::ZERO;
        for (trade, price) in &entries {
            let current_value = trade.quantity * price;
            let profit = current_value - trade.quote_quantity;
            let percentage = if trade.quote_quantity.is_zero() {
                Decimal::ZERO
            } else {
                profit / trade.quote_quantity * Decimal::from(100)
            };
            let emoji = if profit >= Decimal::ZERO { "📈" } else { "📉" };
            let elapsed = Utc::now().signed_duration_since(trade.start_time);
            total += profit;
            self.chat
                .send(&format!(
                    "{emoji} {} {:.2}% {:.2} {} ({}s)",
                    trade.base,
                    percentage,
                    profit,
                    trade.quote,
                    elapsed.num_seconds()
                ))
                .await;
        }
        self.chat
            .send(&format!("Total: {total} {}", self.config.quote_currency))
            .await;
    }

    async fn handle_sell(self: &Arc<Self>, base: &str) {
        let base = base.to_uppercase();
        let trades = self.trades.lock().await;
        match trades.get(&base) {
            Some(handle) => handle.force_sell.cancel(),
            None => {
                tracing::info!(%base, "trade {base} not found");
                drop(trades);
                self.chat.send(&format!("trade {base} not found")).await;
            }
        }
    }
}
