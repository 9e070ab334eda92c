use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smol_str::SmolStr;
use tiller_integration::bus::Tick;
use tiller_integration::de;

use crate::lifecycle::execution::TradeLogEntry;

/// Event type that begins a position.
pub const EVENT_OPEN: &str = "open";

/// Event type that ends a position; carries `details.pnl` when it completes a trade.
pub const EVENT_CLOSE: &str = "close";

/// Milestone event types recorded but never counted as trades.
pub const MILESTONE_EVENTS: &[&str] = &[
    "layer_opened",
    "layer_retracement_opened",
    "take_profit_hit",
    "strategy_started",
    "strategy_paused",
    "strategy_resumed",
    "strategy_stopped",
];

/// Details rendered into log summaries are truncated to this length.
const SUMMARY_DETAILS_MAX_LEN: usize = 600;

/// An event emitted by a strategy callback.
///
/// The `details` payload is opaque for forward compatibility; the conventional fields are
/// surfaced through the typed accessors below. Strategies may emit additional keys freely.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StrategyEvent {
    #[serde(rename = "type")]
    pub kind: SmolStr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl StrategyEvent {
    pub fn new(kind: impl Into<SmolStr>) -> Self {
        Self {
            kind: kind.into(),
            timestamp: None,
            details: Value::Null,
        }
    }

    pub fn with_details(kind: impl Into<SmolStr>, details: Value) -> Self {
        Self {
            kind: kind.into(),
            timestamp: None,
            details,
        }
    }

    pub fn is_open(&self) -> bool {
        self.kind == EVENT_OPEN
    }

    pub fn is_close(&self) -> bool {
        self.kind == EVENT_CLOSE
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.as_object().and_then(|details| details.get(key))
    }

    pub fn detail_decimal(&self, key: &str) -> Option<Decimal> {
        self.detail(key).and_then(de::lenient_decimal_value)
    }

    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.detail(key).and_then(Value::as_str)
    }

    pub fn detail_datetime(&self, key: &str) -> Option<DateTime<Utc>> {
        self.detail(key).and_then(de::rfc3339_utc_value)
    }

    pub fn pnl(&self) -> Option<Decimal> {
        self.detail_decimal("pnl")
    }

    pub fn pips(&self) -> Option<Decimal> {
        self.detail_decimal("pips")
    }

    pub fn reason(&self) -> Option<&str> {
        self.detail_str("reason")
    }

    pub fn instrument(&self) -> Option<&str> {
        self.detail_str("instrument")
    }

    pub fn direction(&self) -> Option<&str> {
        self.detail_str("direction")
    }

    pub fn units(&self) -> Option<Decimal> {
        self.detail_decimal("units")
    }

    pub fn entry_price(&self) -> Option<Decimal> {
        self.detail_decimal("entry_price")
    }

    pub fn exit_price(&self) -> Option<Decimal> {
        self.detail_decimal("exit_price")
    }

    pub fn entry_time(&self) -> Option<DateTime<Utc>> {
        self.detail_datetime("entry_time")
    }

    pub fn exit_time(&self) -> Option<DateTime<Utc>> {
        self.detail_datetime("exit_time")
    }

    /// Whether an `open` event scales into an existing layer rather than starting fresh.
    pub fn retracement_open(&self) -> bool {
        self.detail("retracement_open")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Attach tick context so recorded events are plottable: a timestamp for placement and a
    /// price-like detail for the y-axis. `close` events additionally get an explicit
    /// `exit_price`.
    pub fn enriched_from_tick(mut self, tick: &Tick) -> Self {
        if self.timestamp.is_none() {
            self.timestamp = tick.timestamp;
        }

        let Some(mid) = tick.mid else {
            return self;
        };

        let needs_price = !self.has_price_detail();
        let needs_exit_price = self.is_close() && self.exit_price().is_none();
        if !needs_price && !needs_exit_price {
            return self;
        }

        let mut details = match std::mem::take(&mut self.details) {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                // Non-object details are preserved untouched.
                self.details = other;
                return self;
            }
        };
        if needs_price {
            details.insert("current_price".to_string(), Value::String(mid.to_string()));
        }
        if needs_exit_price {
            details.insert("exit_price".to_string(), Value::String(mid.to_string()));
        }
        self.details = Value::Object(details);
        self
    }

    fn has_price_detail(&self) -> bool {
        ["price", "current_price", "entry_price", "exit_price"]
            .iter()
            .any(|key| {
                self.detail(key).is_some_and(|value| match value {
                    Value::Null => false,
                    Value::String(s) => !s.is_empty(),
                    _ => true,
                })
            })
    }

    /// Extract a completed trade record, when this event represents one.
    ///
    /// A trade is either a `close` event with a non-null `details.pnl`, or any event already
    /// shaped like a trade-log entry (a `pnl` plus an exit time or timestamp). Entry and exit
    /// times fall back to the event timestamp.
    pub fn to_trade(&self) -> Option<TradeLogEntry> {
        let pnl = self.pnl()?;
        if !self.is_close() {
            // Milestones are recorded but never counted as trades, even when their details
            // carry an incidental pnl.
            if MILESTONE_EVENTS.contains(&self.kind.as_str()) {
                return None;
            }
            if self.exit_time().is_none() && self.timestamp.is_none() {
                return None;
            }
        }

        Some(TradeLogEntry {
            sequence: crate::Sequence::default(),
            entry_time: self.entry_time().or(self.timestamp),
            exit_time: self.exit_time().or(self.timestamp),
            instrument: self.instrument().map(SmolStr::new),
            direction: self.direction().map(SmolStr::new),
            units: self.units(),
            entry_price: self.entry_price(),
            exit_price: self.exit_price(),
            pnl,
            pips: self.pips(),
            reason: self.reason().map(String::from),
        })
    }

    /// Concise human-readable rendering for execution logs.
    pub fn summary(&self, tick_ts: Option<DateTime<Utc>>) -> String {
        let prefix = tick_ts
            .map(|ts| format!("[{}] ", ts.to_rfc3339()))
            .unwrap_or_default();

        if self.is_open() {
            let retracement = if self.retracement_open() {
                " retracement"
            } else {
                ""
            };
            return format!(
                "{prefix}Trade OPEN: dir={} price={} units={}{retracement}",
                self.direction().unwrap_or("?"),
                self.detail_str("entry_price")
                    .map(String::from)
                    .or_else(|| self.entry_price().map(|d| d.to_string()))
                    .unwrap_or_else(|| "?".to_string()),
                self.units().map(|d| d.to_string()).unwrap_or_else(|| "?".to_string()),
            );
        }

        if self.is_close() {
            return format!(
                "{prefix}Trade CLOSE: reason={} pips={}",
                self.reason().unwrap_or("?"),
                self.pips().map(|d| d.to_string()).unwrap_or_else(|| "?".to_string()),
            );
        }

        if MILESTONE_EVENTS.contains(&self.kind.as_str()) {
            if self.details.is_null() {
                return format!("{prefix}{}", self.kind);
            }
            return format!("{prefix}{}: {}", self.kind, safe_json(&self.details));
        }

        format!(
            "{prefix}strategy_event type={} details={}",
            self.kind,
            safe_json(&self.details)
        )
    }
}

fn safe_json(value: &Value) -> String {
    let mut rendered = value.to_string();
    if rendered.len() > SUMMARY_DETAILS_MAX_LEN {
        rendered.truncate(SUMMARY_DETAILS_MAX_LEN - 3);
        rendered.push_str("...");
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn tick(ts: &str, mid: Decimal) -> Tick {
        Tick {
            instrument: SmolStr::new("EUR_USD"),
            timestamp: de::rfc3339_utc(ts),
            bid: None,
            ask: None,
            mid: Some(mid),
        }
    }

    #[test]
    fn test_enrichment_attaches_timestamp_and_price() {
        let event = StrategyEvent::with_details("take_profit_hit", json!({"layer": 2}));
        let enriched = event.enriched_from_tick(&tick("2024-01-01T00:00:05Z", dec!(1.1001)));

        assert_eq!(enriched.timestamp, de::rfc3339_utc("2024-01-01T00:00:05Z"));
        assert_eq!(enriched.detail_decimal("current_price"), Some(dec!(1.1001)));
    }

    #[test]
    fn test_enrichment_preserves_existing_fields() {
        let mut event =
            StrategyEvent::with_details(EVENT_OPEN, json!({"entry_price": "1.0990"}));
        event.timestamp = de::rfc3339_utc("2024-01-01T00:00:01Z");

        let enriched = event.enriched_from_tick(&tick("2024-01-01T00:00:05Z", dec!(1.1001)));

        assert_eq!(enriched.timestamp, de::rfc3339_utc("2024-01-01T00:00:01Z"));
        assert!(enriched.detail("current_price").is_none());
    }

    #[test]
    fn test_enrichment_fills_exit_price_on_close() {
        let event = StrategyEvent::with_details(EVENT_CLOSE, json!({"pnl": "10"}));
        let enriched = event.enriched_from_tick(&tick("2024-01-01T00:00:05Z", dec!(1.1001)));

        assert_eq!(enriched.exit_price(), Some(dec!(1.1001)));
    }

    #[test]
    fn test_to_trade_extracts_close_events_with_pnl() {
        let mut event = StrategyEvent::with_details(
            EVENT_CLOSE,
            json!({
                "pnl": "50",
                "pips": "5.0",
                "reason": "take_profit",
                "direction": "long",
                "entry_price": "1.0990",
                "exit_price": "1.0995",
            }),
        );
        event.timestamp = de::rfc3339_utc("2024-01-01T00:10:00Z");

        let trade = event.to_trade().unwrap();
        assert_eq!(trade.pnl, dec!(50));
        assert_eq!(trade.pips, Some(dec!(5.0)));
        assert_eq!(trade.exit_time, de::rfc3339_utc("2024-01-01T00:10:00Z"));
        assert_eq!(trade.entry_time, de::rfc3339_utc("2024-01-01T00:10:00Z"));
        assert_eq!(trade.reason.as_deref(), Some("take_profit"));
    }

    #[test]
    fn test_to_trade_ignores_close_without_pnl_and_milestones() {
        let close = StrategyEvent::with_details(EVENT_CLOSE, json!({"reason": "manual"}));
        assert!(close.to_trade().is_none());

        let milestone = StrategyEvent::with_details("take_profit_hit", json!({"pnl": null}));
        assert!(milestone.to_trade().is_none());

        // Milestones never become trades, even with an incidental pnl in their details.
        let mut milestone = StrategyEvent::with_details("take_profit_hit", json!({"pnl": "10"}));
        milestone.timestamp = de::rfc3339_utc("2024-01-01T00:10:00Z");
        assert!(milestone.to_trade().is_none());
    }

    #[test]
    fn test_summary_formats() {
        let mut open = StrategyEvent::with_details(
            EVENT_OPEN,
            json!({"direction": "long", "entry_price": "1.0990", "units": "1000"}),
        );
        open.timestamp = de::rfc3339_utc("2024-01-01T00:00:01Z");
        assert_eq!(
            open.summary(None),
            "Trade OPEN: dir=long price=1.0990 units=1000"
        );

        let close = StrategyEvent::with_details(
            EVENT_CLOSE,
            json!({"reason": "take_profit", "pips": "5.0", "pnl": "50"}),
        );
        assert_eq!(
            close.summary(de::rfc3339_utc("2024-01-01T00:10:00Z")),
            "[2024-01-01T00:10:00+00:00] Trade CLOSE: reason=take_profit pips=5.0"
        );

        let started = StrategyEvent::new("strategy_started");
        assert_eq!(started.summary(None), "strategy_started");
    }
}
