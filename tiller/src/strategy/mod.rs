use tiller_integration::bus::Tick;

/// Strategy event model: opaque payloads with typed accessors for the conventional fields.
pub mod event;

/// A small deterministic strategy used by tests and the bundled example.
pub mod example;

/// Strategy registry: id -> factory + parameter schema.
pub mod registry;

use event::StrategyEvent;

/// Opaque, JSON-serialisable strategy state.
///
/// Persisted on trading tasks between executions so `resume` can continue from the last
/// saved checkpoint. `Null` and `{}` both mean "no saved state".
pub type StrategyState = serde_json::Value;

/// The strategy contract.
///
/// A strategy is a pure-ish state machine: every callback consumes the current state and
/// returns the successor state plus any events to record. Strategies are trusted code running
/// in the worker process; callback failures are fatal to the execution.
pub trait Strategy: Send + std::fmt::Debug {
    fn on_start(&mut self, state: StrategyState) -> (StrategyState, Vec<StrategyEvent>);

    fn on_tick(&mut self, tick: &Tick, state: StrategyState)
    -> (StrategyState, Vec<StrategyEvent>);

    fn on_pause(&mut self, state: StrategyState) -> (StrategyState, Vec<StrategyEvent>);

    fn on_resume(&mut self, state: StrategyState) -> (StrategyState, Vec<StrategyEvent>);

    fn on_stop(&mut self, state: StrategyState) -> (StrategyState, Vec<StrategyEvent>);
}
