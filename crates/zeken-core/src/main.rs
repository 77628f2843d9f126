/*
[INPUT]:  CLI arguments, ZEKEN_* environment variables, OS shutdown signals
[OUTPUT]: A running trade supervisor with graceful shutdown
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
*/

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use zeken_core::{
    Cli, Config, ConsoleChat, JsonSignalParser, JsonTradeStore, ParserKind, PatternSignalParser,
    SignalParser, Supervisor,
};
use zeken_exchange::{DryExchange, Exchange, LiveExchange};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::resolve(cli).context("resolve configuration")?;
    init_tracing(&config.log_level)?;

    info!(dry = config.dry, store_path = %config.store_path.display(), "starting zeken");

    let live = Arc::new(
        LiveExchange::new(config.api_key.clone(), config.api_secret.clone(), config.buy_guard_ratio)
            .context("construct exchange client")?,
    );
    let exchange: Arc<dyn Exchange> = if config.dry {
        Arc::new(DryExchange::new(live.clone()))
    } else {
        live.clone()
    };

    let store = Arc::new(
        JsonTradeStore::open(config.store_path.clone())
            .await
            .context("open trade store")?,
    );

    let parser: Arc<dyn SignalParser> = match config.parser {
        ParserKind::Json => Arc::new(JsonSignalParser),
        ParserKind::Pattern => Arc::new(PatternSignalParser),
    };

    let chat = Arc::new(ConsoleChat::new());

    let supervisor = Supervisor::new(exchange, store, parser, chat, config);
    setup_signal_handlers(supervisor.shutdown_token());

    supervisor.run().await.context("supervisor run loop")?;
    info!("shutdown complete");

    Ok(())
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(())
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        shutdown_clone.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    shutdown_clone.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}
