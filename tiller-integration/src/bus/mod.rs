use crate::de;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use smol_str::SmolStr;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod redis;

/// Default channel name live tick producers publish on.
pub const DEFAULT_TICK_CHANNEL: &str = "market:ticks";

/// Default prefix for per-backtest replay channels; the full channel name is the prefix
/// followed by the replay request id.
pub const DEFAULT_BACKTEST_TICK_CHANNEL_PREFIX: &str = "market:backtest:ticks:";

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum BusError {
    #[error("subscribe to {channel} failed: {reason}")]
    Subscribe { channel: String, reason: String },

    #[error("publish on {channel} failed: {reason}")]
    Publish { channel: String, reason: String },

    #[error("bus subscription closed: {0}")]
    Closed(String),

    #[error("bus transport: {0}")]
    Transport(String),
}

/// Price observation carried on the bus.
///
/// Wire values arrive as decimal strings; absent values (`""`, `"none"`, `"null"`, `"nan"`)
/// decode to `None`. Comparisons downstream are decimal, never binary float, so pip-scale
/// prices do not round.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Tick {
    pub instrument: SmolStr,
    pub timestamp: Option<DateTime<Utc>>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub mid: Option<Decimal>,
}

impl Tick {
    /// Fill `mid` from `(bid + ask) / 2` when the producer omitted it.
    pub fn normalize(mut self) -> Self {
        if self.mid.is_none()
            && let (Some(bid), Some(ask)) = (self.bid, self.ask)
        {
            self.mid = Some((bid + ask) / Decimal::TWO);
        }
        self
    }
}

/// A message received from a tick channel.
///
/// Live channels only ever carry [`BusMessage::Tick`]. Backtest replay channels additionally
/// carry the control records that terminate the consumer.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum BusMessage {
    Tick(Tick),
    /// Producer finished a bounded replay; `count` is the number of ticks it published.
    Eof { count: Option<u64> },
    /// Producer abandoned the replay.
    Stopped { message: Option<String> },
    /// Producer failed mid-replay.
    Error { message: Option<String> },
}

impl BusMessage {
    /// Decode a raw wire payload.
    ///
    /// Payloads without a `type` field are ticks (the live producer omits it). Unknown payload
    /// kinds and non-object payloads decode to `None` and are dropped silently by consumers.
    pub fn decode(raw: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(raw).ok()?;
        let payload = value.as_object()?;

        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("tick");

        match kind {
            "tick" | "PRICE" => {
                let tick = Tick {
                    instrument: payload
                        .get("instrument")
                        .and_then(Value::as_str)
                        .map(SmolStr::new)
                        .unwrap_or_default(),
                    timestamp: payload.get("timestamp").and_then(de::rfc3339_utc_value),
                    bid: payload.get("bid").and_then(de::lenient_decimal_value),
                    ask: payload.get("ask").and_then(de::lenient_decimal_value),
                    mid: payload.get("mid").and_then(de::lenient_decimal_value),
                };
                Some(Self::Tick(tick.normalize()))
            }
            "eof" => Some(Self::Eof {
                count: payload.get("count").and_then(Value::as_u64),
            }),
            "stopped" => Some(Self::Stopped {
                message: payload
                    .get("message")
                    .and_then(Value::as_str)
                    .map(String::from),
            }),
            "error" => Some(Self::Error {
                message: payload
                    .get("message")
                    .and_then(Value::as_str)
                    .map(String::from),
            }),
            _ => None,
        }
    }

    /// Encode for publishing, producing the decimal-string wire format consumers expect.
    pub fn encode(&self) -> String {
        let value = match self {
            Self::Tick(tick) => json!({
                "type": "tick",
                "instrument": tick.instrument.as_str(),
                "timestamp": tick
                    .timestamp
                    .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
                "bid": tick.bid.map(|d| d.to_string()),
                "ask": tick.ask.map(|d| d.to_string()),
                "mid": tick.mid.map(|d| d.to_string()),
            }),
            Self::Eof { count } => json!({ "type": "eof", "count": count }),
            Self::Stopped { message } => json!({ "type": "stopped", "message": message }),
            Self::Error { message } => json!({ "type": "error", "message": message }),
        };
        value.to_string()
    }
}

/// Fanout transport carrying tick messages by channel name.
///
/// Delivery is at-most-once and in producer order. There is no replay: messages published
/// before a subscription exists are never delivered to it, and publishing to a channel with
/// no subscribers drops the message.
pub trait TickBus: Send + Sync {
    fn publish(&self, channel: &str, message: &BusMessage) -> Result<(), BusError>;
    fn subscribe(&self, channel: &str) -> Result<Box<dyn BusSubscription>, BusError>;
}

/// Single-channel consumer handle produced by [`TickBus::subscribe`].
pub trait BusSubscription: Send {
    /// Wait up to `timeout` for the next message; `Ok(None)` on timeout.
    fn recv(&mut self, timeout: Duration) -> Result<Option<BusMessage>, BusError>;
}
