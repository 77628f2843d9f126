/*
[INPUT]:  A parsed Signal and the supervisor's current trade set/config
[OUTPUT]: Either a freshly sized Trade ready to launch, or a rejection reason
[POS]:    Signal gate (spec §4.3), invoked under the supervisor lock
[UPDATE]: When an acceptance rule or the sizing formula changes
*/

use crate::config::Config;
use crate::signal::Signal;
use crate::trade::Trade;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::HashMap;

/// Fixed dry-run spend, in units of quote currency, independent of balance.
const DRY_QUOTE_QUANTITY: &str = "10";

pub const VENUE_TAG: &str = "BINANCE";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateRejection {
    #[error("wrong quote currency: expected {expected}, got {actual}")]
    WrongQuote { expected: String, actual: String },
    #[error("no supported venue in signal")]
    UnsupportedVenue,
    #[error("max trades reached ({max})")]
    MaxTradesReached { max: usize },
    #[error("there is already a running trade for {base}")]
    DuplicateBase { base: String },
}

/// Evaluate the gate for `signal` against the current `live_trades` (keyed
/// by base) and `quote_balance`/`live_quote_total`, returning a sized Trade
/// ready to hand to a new Trader, or the rejection reason.
///
/// Must be called with the supervisor lock held so `live_trades` reflects a
/// consistent snapshot across the whole decision.
pub fn evaluate(
    config: &Config,
    signal: &Signal,
    live_trades: &HashMap<String, Trade>,
    quote_balance: Decimal,
) -> Result<Trade, GateRejection> {
    if signal.quote != config.quote_currency {
        return Err(GateRejection::WrongQuote {
            expected: config.quote_currency.clone(),
            actual: signal.quote.clone(),
        });
    }
    if !signal.venues.iter().any(|v| v == VENUE_TAG) {
        return Err(GateRejection::UnsupportedVenue);
    }
    if live_trades.len() >= config.max_trades {
        return Err(GateRejection::MaxTradesReached { max: config.max_trades });
    }
    if live_trades.contains_key(&signal.base) {
        return Err(GateRejection::DuplicateBase {
            base: signal.base.clone(),
        });
    }

    let quote_quantity = if config.dry {
        DRY_QUOTE_QUANTITY.parse().expect("valid constant")
    } else {
        size_live_quote_quantity(config, live_trades, quote_balance)
    };

    Ok(Trade::new(
        signal.base.clone(),
        signal.quote.clone(),
        signal.start,
        signal.targets.clone(),
        signal.stop,
        quote_quantity,
    ))
}

fn size_live_quote_quantity(
    config: &Config,
    live_trades: &HashMap<String, Trade>,
    quote_balance: Decimal,
) -> Decimal {
    let outstanding: Decimal = live_trades.values().map(|t| t.quote_quantity).sum();
    let max_trades = Decimal::from_usize(config.max_trades).unwrap_or(Decimal::ONE);
    let mut quantity = (outstanding + quote_balance) * config.balance_ratio / max_trades;
    if quantity >= quote_balance {
        quantity = quote_balance * "0.99".parse::<Decimal>().expect("valid constant");
    }
    quantity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn base_config() -> Config {
        Config::for_test()
    }

    fn signal(base: &str) -> Signal {
        Signal {
            venues: ["BINANCE".to_string()].into_iter().collect(),
            base: base.to_string(),
            quote: "USDT".to_string(),
            start: "10".parse().unwrap(),
            targets: vec!["11".parse().unwrap()],
            stop: "9".parse().unwrap(),
        }
    }

    #[test]
    fn rejects_wrong_quote_currency() {
        let config = base_config();
        let mut sig = signal("IGO");
        sig.quote = "EUR".to_string();
        let err = evaluate(&config, &sig, &HashMap::new(), Decimal::ZERO).unwrap_err();
        assert!(matches!(err, GateRejection::WrongQuote { .. }));
    }

    #[test]
    fn rejects_unsupported_venue() {
        let config = base_config();
        let mut sig = signal("IGO");
        sig.venues = ["COINBASE".to_string()].into_iter().collect();
        let err = evaluate(&config, &sig, &HashMap::new(), Decimal::ZERO).unwrap_err();
        assert!(matches!(err, GateRejection::UnsupportedVenue));
    }

    #[test]
    fn rejects_duplicate_base() {
        let config = base_config();
        let sig = signal("IGO");
        let mut live = HashMap::new();
        live.insert("IGO".to_string(), Trade::new(
            "IGO".into(), "USDT".into(), Decimal::ZERO, vec![], Decimal::ZERO, Decimal::ZERO,
        ));
        let err = evaluate(&config, &sig, &live, Decimal::ZERO).unwrap_err();
        assert!(matches!(err, GateRejection::DuplicateBase { .. }));
    }

    #[test]
    fn rejects_when_max_trades_reached() {
        let mut config = base_config();
        config.max_trades = 1;
        let sig = signal("IGO");
        let mut live = HashMap::new();
        live.insert("SOL".to_string(), Trade::new(
            "SOL".into(), "USDT".into(), Decimal::ZERO, vec![], Decimal::ZERO, Decimal::ZERO,
        ));
        let err = evaluate(&config, &sig, &live, Decimal::ZERO).unwrap_err();
        assert!(matches!(err, GateRejection::MaxTradesReached { .. }));
    }

    #[test]
    fn dry_mode_uses_the_fixed_spend() {
        let mut config = base_config();
        config.dry = true;
        let sig = signal("IGO");
        let trade = evaluate(&config, &sig, &HashMap::new(), Decimal::ZERO).unwrap();
        assert_eq!(trade.quote_quantity, "10".parse().unwrap());
    }

    #[test]
    fn live_sizing_caps_at_99_percent_of_balance_when_formula_exceeds_it() {
        let mut config = base_config();
        config.max_trades = 1;
        config.balance_ratio = "1".parse().unwrap();
        let sig = signal("IGO");
        let trade = evaluate(&config, &sig, &HashMap::new(), "100".parse().unwrap()).unwrap();
        assert_eq!(trade.quote_quantity, "99".parse().unwrap());
    }
}
