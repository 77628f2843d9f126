/*
[INPUT]:  CLI flags, ZEKEN_* environment variables, an optional TOML file
[OUTPUT]: A fully resolved Config with CLI > file > built-in defaults
[POS]:    Startup surface (spec §6.5, §9 "Config file")
[UPDATE]: When adding a new startup flag
*/

use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "zeken", version, about = "Crypto trade supervisor")]
pub struct Cli {
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "ZEKEN_STORE_PATH")]
    pub store_path: Option<PathBuf>,

    #[arg(long, env = "ZEKEN_API_KEY")]
    pub api_key: Option<String>,

    #[arg(long, env = "ZEKEN_API_SECRET")]
    pub api_secret: Option<String>,

    #[arg(long, env = "ZEKEN_CHAT_TOKEN")]
    pub chat_token: Option<String>,

    #[arg(long, env = "ZEKEN_CONTROL_CHAT_ID")]
    pub control_chat_id: Option<String>,

    #[arg(long, env = "ZEKEN_SIGNAL_CHAT_ID")]
    pub signal_chat_id: Option<String>,

    #[arg(long, env = "ZEKEN_MAX_TRADES")]
    pub max_trades: Option<usize>,

    #[arg(long = "max-target", env = "ZEKEN_MAX_TARGET")]
    pub max_target: Option<usize>,

    #[arg(long = "balance-ratio", env = "ZEKEN_BALANCE_RATIO")]
    pub balance_ratio: Option<Decimal>,

    #[arg(long = "quote-currency", env = "ZEKEN_QUOTE_CURRENCY")]
    pub quote_currency: Option<String>,

    #[arg(long = "buy-guard-ratio", env = "ZEKEN_BUY_GUARD_RATIO")]
    pub buy_guard_ratio: Option<Decimal>,

    #[arg(long = "stop-band-bps", env = "ZEKEN_STOP_BAND_BPS")]
    pub stop_band_bps: Option<u32>,

    #[arg(long, env = "ZEKEN_PARSER")]
    pub parser: Option<String>,

    #[arg(long, env = "ZEKEN_DRY")]
    pub dry: bool,

    #[arg(long, env = "ZEKEN_DEBUG")]
    pub debug: bool,

    #[arg(long = "log-level", env = "ZEKEN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Overlay file format for `--config <path>`: every field optional, CLI
/// flags always win over what's set here.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    pub store_path: Option<PathBuf>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub chat_token: Option<String>,
    pub control_chat_id: Option<String>,
    pub signal_chat_id: Option<String>,
    pub max_trades: Option<usize>,
    pub max_target: Option<usize>,
    pub balance_ratio: Option<Decimal>,
    pub quote_currency: Option<String>,
    pub buy_guard_ratio: Option<Decimal>,
    pub stop_band_bps: Option<u32>,
    pub parser: Option<String>,
    pub dry: Option<bool>,
    pub debug: Option<bool>,
}

impl ConfigFile {
    pub fn load(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parse config file {}", path.display()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    Json,
    Pattern,
}

/// Fully resolved startup configuration. `dry`'s store-path rewrite (§6.5:
/// "If dry is set, the store path is rewritten to have a `.dry` infix") is
/// applied once, here, so every downstream consumer sees the final path.
#[derive(Debug, Clone)]
pub struct Config {
    pub store_path: PathBuf,
    pub api_key: String,
    pub api_secret: String,
    pub chat_token: String,
    pub control_chat_id: String,
    pub signal_chat_id: String,
    pub max_trades: usize,
    pub max_target: usize,
    pub balance_ratio: Decimal,
    pub quote_currency: String,
    pub buy_guard_ratio: Decimal,
    pub stop_band_bps: u32,
    pub parser: ParserKind,
    pub dry: bool,
    pub debug: bool,
    pub log_level: String,
}

impl Config {
    pub fn resolve(cli: Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };

        let store_path = cli
            .store_path
            .or(file.store_path)
            .context("store_path is required (--store-path / ZEKEN_STORE_PATH / config file)")?;
        let api_key = cli
            .api_key
            .or(file.api_key)
            .context("api_key is required (--api-key / ZEKEN_API_KEY / config file)")?;
        let api_secret = cli
            .api_secret
            .or(file.api_secret)
            .context("api_secret is required (--api-secret / ZEKEN_API_SECRET / config file)")?;
        let chat_token = cli
            .chat_token
            .or(file.chat_token)
            .context("chat_token is required (--chat-token / ZEKEN_CHAT_TOKEN / config file)")?;
        let control_chat_id = cli
            .control_chat_id
            .or(file.control_chat_id)
            .context("control_chat_id is required")?;
        let signal_chat_id = cli
            .signal_chat_id
            .or(file.signal_chat_id)
            .context("signal_chat_id is required")?;

        let max_trades = cli.max_trades.or(file.max_trades).unwrap_or(5);
        let max_target = cli.max_target.or(file.max_target).unwrap_or(usize::MAX);
        let balance_ratio = cli
            .balance_ratio
            .or(file.balance_ratio)
            .unwrap_or_else(|| "0.99".parse().unwrap());
        let quote_currency = cli
            .quote_currency
            .or(file.quote_currency)
            .unwrap_or_else(|| "USDT".to_string());
        let buy_guard_ratio = cli
            .buy_guard_ratio
            .or(file.buy_guard_ratio)
            .unwrap_or_else(|| "0.95".parse().unwrap());
        let stop_band_bps = cli.stop_band_bps.or(file.stop_band_bps).unwrap_or(100);

        let parser_name = cli.parser.or(file.parser).unwrap_or_else(|| "json".to_string());
        let parser = match parser_name.as_str() {
            "json" => ParserKind::Json,
            "pattern" => ParserKind::Pattern,
            other => anyhow::bail!("unknown parser: {other} (expected json or pattern)"),
        };

        let dry = cli.dry || file.dry.unwrap_or(false);
        let debug = cli.debug || file.debug.unwrap_or(false);

        let store_path = if dry {
            add_dry_infix(&store_path)
        } else {
            store_path
        };

        Ok(Self {
            store_path,
            api_key,
            api_secret,
            chat_token,
            control_chat_id,
            signal_chat_id,
            max_trades,
            max_target,
            balance_ratio,
            quote_currency,
            buy_guard_ratio,
            stop_band_bps,
            parser,
            dry,
            debug,
            log_level: cli.log_level,
        })
    }

    #[cfg(test)]
    pub fn for_test() -> Self {
        Self {
            store_path: PathBuf::from("/tmp/zeken-test.json"),
            api_key: "key".into(),
            api_secret: "secret".into(),
            chat_token: "token".into(),
            control_chat_id: "control".into(),
            signal_chat_id: "signal".into(),
            max_trades: 5,
            max_target: usize::MAX,
            balance_ratio: "0.99".parse().unwrap(),
            quote_currency: "USDT".into(),
            buy_guard_ratio: "0.95".parse().unwrap(),
            stop_band_bps: 100,
            parser: ParserKind::Json,
            dry: false,
            debug: false,
            log_level: "info".into(),
        }
    }
}

fn add_dry_infix(path: &std::path::Path) -> PathBuf {
    match (path.parent(), path.file_stem(), path.extension()) {
        (Some(parent), Some(stem), Some(ext)) => {
            parent.join(format!("{}.dry.{}", stem.to_string_lossy(), ext.to_string_lossy()))
        }
        (Some(parent), Some(stem), None) => parent.join(format!("{}.dry", stem.to_string_lossy())),
        _ => {
            let mut renamed = path.to_path_buf();
            renamed.set_file_name(format!("{}.dry", path.display()));
            renamed
        }
    }
}
