/*
[INPUT]:  Public API exports for the zeken-core crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod chat;
pub mod config;
pub mod gate;
pub mod retry;
pub mod signal;
pub mod store;
pub mod supervisor;
pub mod trade;
pub mod trader;

pub use chat::{ChannelChat, ChatSurface, ConsoleChat};
pub use config::{Cli, Config, ParserKind};
pub use signal::{JsonSignalParser, PatternSignalParser, Signal, SignalParser};
pub use store::{JsonTradeStore, TradeStore};
pub use supervisor::Supervisor;
pub use trade::Trade;
