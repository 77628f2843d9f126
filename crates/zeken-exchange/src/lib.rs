/*
[INPUT]:  -
[OUTPUT]: Public crate surface: `Exchange` trait plus `LiveExchange` and
          `DryExchange` implementations
[POS]:    Exchange facade crate root (spec §4.1)
[UPDATE]: When adding a new exchange implementation or facade method
*/

pub mod dry;
pub mod error;
pub mod facade;
pub mod live;
pub mod wire;

pub use dry::DryExchange;
pub use error::{ExchangeError, Result};
pub use facade::{Exchange, OrderStatus};
pub use live::{ClientConfig, LiveExchange};
pub use wire::{OrderState, Side};
