/*
[INPUT]:  Trade records from accepted signals and Trader mutations
[OUTPUT]: Durable, ordered, crash-safe persistence of Trades
[POS]:    Trade store (spec §4.2, §6.4)
[UPDATE]: When the persisted Trade shape or query surface changes
*/

use crate::trade::Trade;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn list(&self, from: DateTime<Utc>, to: DateTime<Utc>, finished: bool) -> Result<Vec<Trade>>;
    async fn update(&self, trade: &Trade) -> Result<()>;
    async fn delete(&self, trade: &Trade) -> Result<()>;
}

/// JSON-file-backed `TradeStore`.
///
/// An in-memory `BTreeMap` keyed by the encoded `start_time` is the source
/// of truth between mutations; every mutation mirrors the whole map to disk
/// via write-to-temp-then-rename, the same idiom the teacher's `Storage`
/// uses for its accounts/tasks files, so a crash mid-write never corrupts
/// the durable copy.
pub struct JsonTradeStore {
    path: PathBuf,
    trades: Mutex<BTreeMap<String, Trade>>,
}

impl JsonTradeStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create store directory {}", parent.display()))?;
        }
        let trades = Self::load(&path).await?;
        Ok(Self {
            path,
            trades: Mutex::new(trades),
        })
    }

    async fn load(path: &Path) -> Result<BTreeMap<String, Trade>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("read store file {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let trades: Vec<Trade> = serde_json::from_str(&content).context("decode store file")?;
        Ok(trades.into_iter().map(|t| (t.key(), t)).collect())
    }

    async fn persist(&self, trades: &BTreeMap<String, Trade>) -> Result<()> {
        let list: Vec<&Trade> = trades.values().collect();
        let content = serde_json::to_string_pretty(&list).context("encode store file")?;
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, content)
            .await
            .with_context(|| format!("write temp store file {}", temp_path.display()))?;
        fs::rename(&temp_path, &self.path)
            .await
            .with_context(|| format!("rename temp store file to {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl TradeStore for JsonTradeStore {
    async fn list(&self, from: DateTime<Utc>, to: DateTime<Utc>, finished: bool) -> Result<Vec<Trade>> {
        let trades = self.trades.lock().await;
        Ok(trades
            .range(crate::trade::encode_key(from)..crate::trade::encode_key(to))
            .map(|(_, trade)| trade)
            .filter(|trade| trade.is_finished() == finished)
            .cloned()
            .collect())
    }

    async fn update(&self, trade: &Trade) -> Result<()> {
        let mut trades = self.trades.lock().await;
        trades.insert(trade.key(), trade.clone());
        self.persist(&trades).await
    }

    async fn delete(&self, trade: &Trade) -> Result<()> {
        let mut trades = self.trades.lock().await;
        trades.remove(&trade.key());
        self.persist(&trades).await
    }
}
