/*
[INPUT]:  Raw text lines from the signal channel of a `ChatSurface`
[OUTPUT]: A parsed `Signal`, or a parse error the caller logs and discards
[POS]:    Signal wire form (spec §6.1)
[UPDATE]: When adding a third signal source format
*/

use anyhow::{Context, Result, anyhow};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeSet;

/// A parsed trade signal, immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub venues: BTreeSet<String>,
    pub base: String,
    pub quote: String,
    pub start: Decimal,
    pub targets: Vec<Decimal>,
    pub stop: Decimal,
}

/// Strategy for turning a raw inbound line into a `Signal`.
///
/// Two strategies are provided because the source bot shipped two slightly
/// divergent variants of signal ingestion; exposing both behind this trait
/// keeps the choice a startup flag (`--parser`) instead of a fork.
pub trait SignalParser: Send + Sync {
    fn parse(&self, text: &str) -> Result<Signal>;
}

/// Decodes a JSON object with string-encoded decimal fields. The default
/// parser, matching the source bot's own signal format.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSignalParser;

#[derive(Deserialize)]
struct JsonSignal {
    exchanges: Vec<String>,
    base: String,
    quote: String,
    start: String,
    targets: Vec<String>,
    stop: String,
}

impl SignalParser for JsonSignalParser {
    fn parse(&self, text: &str) -> Result<Signal> {
        let raw: JsonSignal = serde_json::from_str(text).context("decode signal json")?;
        let targets = raw
            .targets
            .iter()
            .map(|t| t.parse::<Decimal>().with_context(|| format!("parse target {t}")))
            .collect::<Result<Vec<_>>>()?;
        Ok(Signal {
            venues: raw.exchanges.into_iter().map(|v| v.to_uppercase()).collect(),
            base: raw.base.to_uppercase(),
            quote: raw.quote.to_uppercase(),
            start: raw.start.parse().context("parse start price")?,
            targets,
            stop: raw.stop.parse().context("parse stop price")?,
        })
    }
}

/// Line-oriented `key: value` extraction for loosely formatted prose
/// signals — the "secondary parser" referenced in the spec's open question
/// about the source's two Bot/Trader variants.
///
/// Recognized keys (case-insensitive): `exchanges`/`venues` (comma
/// separated), `base`, `quote`, `start`, `targets` (comma separated),
/// `stop`. Lines that don't match `key: value` are ignored, so free-form
/// commentary around the fields is tolerated.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternSignalParser;

impl SignalParser for PatternSignalParser {
    fn parse(&self, text: &str) -> Result<Signal> {
        let mut venues = None;
        let mut base = None;
        let mut quote = None;
        let mut start = None;
        let mut targets = None;
        let mut stop = None;

        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();
            match key.as_str() {
                "exchanges" | "venues" => {
                    venues = Some(
                        value
                            .split(',')
                            .map(|v| v.trim().to_uppercase())
                            .filter(|v| !v.is_empty())
                            .collect::<BTreeSet<_>>(),
                    )
                }
                "base" => base = Some(value.to_uppercase()),
                "quote" => quote = Some(value.to_uppercase()),
                "start" => start = Some(value.parse::<Decimal>().context("parse start price")?),
                "targets" => {
                    targets = Some(
                        value
                            .split(',')
                            .map(|t| t.trim().parse::<Decimal>().with_context(|| format!("parse target {t}")))
                            .collect::<Result<Vec<_>>>()?,
                    )
                }
                "stop" => stop = Some(value.parse::<Decimal>().context("parse stop price")?),
                _ => {}
            }
        }

        Ok(Signal {
            venues: venues.ok_or_else(|| anyhow!("missing exchanges/venues"))?,
            base: base.ok_or_else(|| anyhow!("missing base"))?,
            quote: quote.ok_or_else(|| anyhow!("missing quote"))?,
            start: start.ok_or_else(|| anyhow!("missing start"))?,
            targets: targets.ok_or_else(|| anyhow!("missing targets"))?,
            stop: stop.ok_or_else(|| anyhow!("missing stop"))?,
        })
    }
}
