mod common;

use common::{OrderCanceledExchange, StableExchange, WalkingPriceNoBuy};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use zeken_core::{ChannelChat, Cli, Config, JsonSignalParser, JsonTradeStore, Supervisor, Trade, TradeStore};
use zeken_exchange::Exchange;

fn dry_config(store_path: PathBuf) -> Config {
    let cli = Cli {
        config: None,
        store_path: Some(store_path),
        api_key: Some("key".into()),
        api_secret: Some("secret".into()),
        chat_token: Some("token".into()),
        control_chat_id: Some("control".into()),
        signal_chat_id: Some("signal".into()),
        max_trades: Some(5),
        max_target: None,
        balance_ratio: None,
        quote_currency: None,
        buy_guard_ratio: None,
        stop_band_bps: None,
        parser: None,
        dry: true,
        debug: false,
        log_level: "info".into(),
    };
    Config::resolve(cli).unwrap()
}

async fn recv_matching(
    output: &mut tokio::sync::mpsc::UnboundedReceiver<String>,
    predicate: impl Fn(&str) -> bool,
    attempts: usize,
) -> bool {
    for _ in 0..attempts {
        match tokio::time::timeout(Duration::from_millis(300), output.recv()).await {
            Ok(Some(line)) if predicate(&line) => return true,
            Ok(Some(_)) => continue,
            _ => return false,
        }
    }
    false
}

/// Scenario 4: two signals for the same base arrive back-to-back; the
/// second is rejected and no second Trader is launched.
#[tokio::test]
async fn duplicate_signal_for_the_same_base_is_rejected() {
    let dir = tempdir().unwrap();
    let store_path = dir.path().join("trades.json");
    let store: Arc<dyn TradeStore> = Arc::new(JsonTradeStore::open(&store_path).await.unwrap());
    let exchange: Arc<dyn Exchange> = Arc::new(StableExchange::new("10.1"));
    let (chat, input, mut output) = ChannelChat::new();
    let parser = Arc::new(JsonSignalParser);

    let supervisor = Supervisor::new(exchange, store, parser, chat, dry_config(store_path));
    let sup = supervisor.clone();
    let run_handle = tokio::spawn(async move { sup.run().await });

    let signal = r#"{"exchanges":["binance"],"base":"igo","quote":"USDT","start":"10.0","targets":["11"],"stop":"9.0"}"#;
    input.send(signal.to_string()).unwrap();
    input.send(signal.to_string()).unwrap();

    let saw_rejection =
        recv_matching(&mut output, |line| line.contains("already a running trade"), 5).await;
    assert!(saw_rejection);

    supervisor.shutdown_token().cancel();
    let _ = run_handle.await;
}

/// Scenario 6: the mock exchange reports the bracket order canceled
/// out-of-band; the Trader exits and the supervisor deletes the trade and
/// warns the operator.
#[tokio::test]
async fn order_canceled_out_of_band_deletes_the_trade() {
    let dir = tempdir().unwrap();
    let store_path = dir.path().join("trades.json");
    let store: Arc<dyn TradeStore> = Arc::new(JsonTradeStore::open(&store_path).await.unwrap());
    let exchange: Arc<dyn Exchange> = Arc::new(OrderCanceledExchange::new("10.1", "0"));
    let (chat, input, mut output) = ChannelChat::new();
    let parser = Arc::new(JsonSignalParser);

    let supervisor = Supervisor::new(exchange, store.clone(), parser, chat, dry_config(store_path));
    let sup = supervisor.clone();
    let run_handle = tokio::spawn(async move { sup.run().await });

    let signal = r#"{"exchanges":["binance"],"base":"igo","quote":"USDT","start":"10.0","targets":["11"],"stop":"9.0"}"#;
    input.send(signal.to_string()).unwrap();

    let saw_warning = recv_matching(&mut output, |line| line.contains("order canceled externally"), 10).await;
    assert!(saw_warning);

    let from = chrono::Utc::now() - chrono::Duration::days(1);
    let to = chrono::Utc::now() + chrono::Duration::days(1);
    let remaining = store.list(from, to, false).await.unwrap();
    assert!(remaining.iter().all(|t: &Trade| t.base != "IGO"));

    supervisor.shutdown_token().cancel();
    let _ = run_handle.await;
}

/// Scenario 5: an unfinished Trade with `current_target = 2` is already in
/// the store at boot. The resumed Trader must skip the initial buy (the
/// mock exchange panics if it's called) and still shut down cleanly.
#[tokio::test]
async fn resume_launches_a_trader_without_recreating_the_position() {
    let dir = tempdir().unwrap();
    let store_path = dir.path().join("trades.json");
    {
        let store = JsonTradeStore::open(&store_path).await.unwrap();
        let mut trade = Trade::new(
            "IGO".into(),
            "USDT".into(),
            "10.0".parse().unwrap(),
            vec!["11", "12", "13", "14", "15"].into_iter().map(|s| s.parse().unwrap()).collect(),
            "9.0".parse().unwrap(),
            "100".parse().unwrap(),
        );
        trade.quantity = "10".parse().unwrap();
        trade.current_target = 2;
        trade.order_list_id = "list_15_11_10".into();
        trade.order_ids = vec!["greater_15_10".into(), "less_11_10".into()];
        store.update(&trade).await.unwrap();
    }

    let store: Arc<dyn TradeStore> = Arc::new(JsonTradeStore::open(&store_path).await.unwrap());
    let exchange: Arc<dyn Exchange> = Arc::new(WalkingPriceNoBuy::new("9.5"));
    let (chat, _input, _output) = ChannelChat::new();
    let parser = Arc::new(JsonSignalParser);

    let supervisor = Supervisor::new(exchange, store, parser, chat, dry_config(store_path));
    let sup = supervisor.clone();
    let run_handle = tokio::spawn(async move { sup.run().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    supervisor.shutdown_token().cancel();

    let result = run_handle.await.expect("supervisor task must not panic");
    assert!(result.is_ok());
}
