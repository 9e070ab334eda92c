use chrono::SecondsFormat;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use smol_str::SmolStr;
use tiller_integration::bus::Tick;
use tiller_integration::de;

use super::event::{EVENT_CLOSE, EVENT_OPEN, StrategyEvent};
use super::registry::StrategyFactory;
use super::{Strategy, StrategyState};
use crate::error::TillerError;

fn default_pip_size() -> Decimal {
    Decimal::new(1, 4) // 0.0001
}

fn default_units() -> Decimal {
    Decimal::from(1_000)
}

/// Parameters for [`ThresholdStrategy`].
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct ThresholdParams {
    pub instrument: SmolStr,
    /// Pip distance from the anchor price that triggers an entry.
    pub entry_pips: Decimal,
    /// Pip gain that closes a position in profit; the same distance against closes at a loss.
    pub take_profit_pips: Decimal,
    #[serde(default = "default_pip_size")]
    pub pip_size: Decimal,
    #[serde(default = "default_units")]
    pub units: Decimal,
}

/// Breakout strategy against an anchor price.
///
/// The first mid seen becomes the anchor. A move of `entry_pips` below the anchor opens a
/// long, a move above opens a short; positions close at `take_profit_pips` in either
/// direction, after which the anchor resets to the closing price.
///
/// Deliberately simple: it exists to exercise the full open/close event surface
/// deterministically in tests and examples.
#[derive(Debug, Clone)]
pub struct ThresholdStrategy {
    params: ThresholdParams,
}

impl ThresholdStrategy {
    pub const ID: &'static str = "threshold";

    pub fn new(params: ThresholdParams) -> Self {
        Self { params }
    }

    pub fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["instrument", "entry_pips", "take_profit_pips"],
            "properties": {
                "instrument": { "type": "string" },
                "entry_pips": { "type": "string", "format": "decimal" },
                "take_profit_pips": { "type": "string", "format": "decimal" },
                "pip_size": { "type": "string", "format": "decimal", "default": "0.0001" },
                "units": { "type": "string", "format": "decimal", "default": "1000" },
            },
        })
    }

    pub fn factory() -> StrategyFactory {
        Box::new(|parameters| {
            serde_json::from_value::<ThresholdParams>(parameters.clone())
                .map(|params| Box::new(Self::new(params)) as Box<dyn Strategy>)
                .map_err(|err| {
                    TillerError::validation(format!("threshold strategy parameters: {err}"))
                })
        })
    }

    fn milestone(kind: &str) -> Vec<StrategyEvent> {
        vec![StrategyEvent::new(kind)]
    }
}

impl Strategy for ThresholdStrategy {
    fn on_start(&mut self, state: StrategyState) -> (StrategyState, Vec<StrategyEvent>) {
        (ensure_object(state), Self::milestone("strategy_started"))
    }

    fn on_tick(
        &mut self,
        tick: &Tick,
        state: StrategyState,
    ) -> (StrategyState, Vec<StrategyEvent>) {
        let mut state = match ensure_object(state) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let mut events = Vec::new();

        let ticks_seen = state
            .get("ticks_seen")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        state.insert("ticks_seen".into(), json!(ticks_seen + 1));

        let Some(mid) = tick.mid else {
            return (Value::Object(state), events);
        };

        let anchor = state.get("anchor").and_then(de::lenient_decimal_value);
        let Some(anchor) = anchor else {
            state.insert("anchor".into(), Value::String(mid.to_string()));
            return (Value::Object(state), events);
        };

        let entry_distance = self.params.entry_pips * self.params.pip_size;
        let position = state.get("position").cloned().filter(|p| !p.is_null());

        match position {
            None => {
                let direction = if mid <= anchor - entry_distance {
                    Some("long")
                } else if mid >= anchor + entry_distance {
                    Some("short")
                } else {
                    None
                };

                if let Some(direction) = direction {
                    state.insert(
                        "position".into(),
                        json!({
                            "direction": direction,
                            "entry_price": mid.to_string(),
                            "entry_time": tick
                                .timestamp
                                .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
                        }),
                    );
                    events.push(StrategyEvent::with_details(
                        EVENT_OPEN,
                        json!({
                            "instrument": self.params.instrument.as_str(),
                            "direction": direction,
                            "entry_price": mid.to_string(),
                            "units": self.params.units.to_string(),
                        }),
                    ));
                }
            }
            Some(position) => {
                let entry_price = position
                    .get("entry_price")
                    .and_then(de::lenient_decimal_value);
                let direction = position
                    .get("direction")
                    .and_then(Value::as_str)
                    .unwrap_or("long")
                    .to_string();
                let Some(entry_price) = entry_price else {
                    state.remove("position");
                    return (Value::Object(state), events);
                };

                let pips = match direction.as_str() {
                    "short" => (entry_price - mid) / self.params.pip_size,
                    _ => (mid - entry_price) / self.params.pip_size,
                };

                if pips.abs() >= self.params.take_profit_pips {
                    let pnl = match direction.as_str() {
                        "short" => (entry_price - mid) * self.params.units,
                        _ => (mid - entry_price) * self.params.units,
                    };
                    let reason = if pips >= self.params.take_profit_pips {
                        "take_profit"
                    } else {
                        "stop_loss"
                    };

                    events.push(StrategyEvent::with_details(
                        EVENT_CLOSE,
                        json!({
                            "instrument": self.params.instrument.as_str(),
                            "direction": direction,
                            "units": self.params.units.to_string(),
                            "entry_price": entry_price.to_string(),
                            "exit_price": mid.to_string(),
                            "entry_time": position.get("entry_time").cloned(),
                            "exit_time": tick
                                .timestamp
                                .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
                            "pnl": pnl.to_string(),
                            "pips": pips.round_dp(1).to_string(),
                            "reason": reason,
                        }),
                    ));

                    state.remove("position");
                    state.insert("anchor".into(), Value::String(mid.to_string()));
                }
            }
        }

        (Value::Object(state), events)
    }

    fn on_pause(&mut self, state: StrategyState) -> (StrategyState, Vec<StrategyEvent>) {
        (ensure_object(state), Self::milestone("strategy_paused"))
    }

    fn on_resume(&mut self, state: StrategyState) -> (StrategyState, Vec<StrategyEvent>) {
        (ensure_object(state), Self::milestone("strategy_resumed"))
    }

    fn on_stop(&mut self, state: StrategyState) -> (StrategyState, Vec<StrategyEvent>) {
        (ensure_object(state), Self::milestone("strategy_stopped"))
    }
}

fn ensure_object(state: StrategyState) -> StrategyState {
    match state {
        Value::Null => Value::Object(Map::new()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn strategy() -> ThresholdStrategy {
        ThresholdStrategy::new(ThresholdParams {
            instrument: SmolStr::new("EUR_USD"),
            entry_pips: dec!(5),
            take_profit_pips: dec!(10),
            pip_size: dec!(0.0001),
            units: dec!(1000),
        })
    }

    fn tick(mid: Decimal) -> Tick {
        Tick {
            instrument: SmolStr::new("EUR_USD"),
            timestamp: de::rfc3339_utc("2024-01-01T00:00:00Z"),
            bid: None,
            ask: None,
            mid: Some(mid),
        }
    }

    #[test]
    fn test_opens_long_below_anchor_and_closes_at_take_profit() {
        let mut strategy = strategy();
        let (state, events) = strategy.on_start(Value::Null);
        assert_eq!(events.len(), 1);

        // First tick sets the anchor at 1.1000.
        let (state, events) = strategy.on_tick(&tick(dec!(1.1000)), state);
        assert!(events.is_empty());

        // 5 pips below the anchor opens a long.
        let (state, events) = strategy.on_tick(&tick(dec!(1.0995)), state);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_open());
        assert_eq!(events[0].direction(), Some("long"));

        // 10 pips of profit closes it.
        let (state, events) = strategy.on_tick(&tick(dec!(1.1005)), state);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_close());
        assert_eq!(events[0].reason(), Some("take_profit"));
        assert_eq!(events[0].pnl(), Some(dec!(1.0000)));
        assert_eq!(events[0].pips(), Some(dec!(10.0)));

        // Position cleared, anchor reset to the close price.
        assert!(state.get("position").is_none());
        assert_eq!(
            state.get("anchor").and_then(de::lenient_decimal_value),
            Some(dec!(1.1005))
        );
    }

    #[test]
    fn test_adverse_move_closes_at_stop_loss() {
        let mut strategy = strategy();
        let (state, _) = strategy.on_start(Value::Null);
        let (state, _) = strategy.on_tick(&tick(dec!(1.1000)), state);
        let (state, _) = strategy.on_tick(&tick(dec!(1.0995)), state);

        let (_, events) = strategy.on_tick(&tick(dec!(1.0985)), state);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason(), Some("stop_loss"));
        assert_eq!(events[0].pnl(), Some(dec!(-1.0000)));
    }

    #[test]
    fn test_ticks_without_mid_are_ignored() {
        let mut strategy = strategy();
        let (state, _) = strategy.on_start(Value::Null);

        let no_mid = Tick {
            instrument: SmolStr::new("EUR_USD"),
            timestamp: None,
            bid: None,
            ask: None,
            mid: None,
        };
        let (state, events) = strategy.on_tick(&no_mid, state);
        assert!(events.is_empty());
        assert!(state.get("anchor").is_none());
        assert_eq!(state.get("ticks_seen").and_then(Value::as_u64), Some(1));
    }
}
