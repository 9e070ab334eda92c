#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms,
    rust_2024_compatibility
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! # Tiller
//! Tiller is a multi-tenant trading task execution platform: user-defined strategies run
//! against a live market tick stream (live trading) or a bounded historical tick replay
//! (back-testing), under supervised, restartable, cancellable and metrics-producing
//! *executions*.
//!
//! ## Overview
//! The core reconciles three independent actors - the control plane, a background worker, and
//! the strategy itself - against a persistent task record while handling crashes, duplicate
//! starts, slow workers and mid-flight stops.
//!
//! At a high level, it provides a few major components:
//! * A persistent lifecycle model (`Task`, numbered `Execution` attempts, append-only event,
//!   trade and equity sinks) behind the [`LifecycleStore`](lifecycle::store::LifecycleStore)
//!   interface.
//! * A task state machine ([`TaskService`](lifecycle::machine::TaskService)) enforcing
//!   start/stop/pause/resume/restart rules, including the one-running-task-per-account
//!   invariant.
//! * The execution [`Worker`](engine::Worker): the single hot path that claims the task lock,
//!   subscribes to the tick bus, drives the [`Strategy`](strategy::Strategy) callbacks and
//!   persists events, trades, checkpoints and heartbeats.
//! * A read-time reconciler ([`lifecycle::reconcile`]) that finalizes executions whose workers
//!   died or were never picked up.
//! * A pure metrics package ([`statistic`]) computing PnL, drawdown, win rate, Sharpe, profit
//!   factor and the equity curve with decimal arithmetic.
//!
//! Cross-process communication happens exclusively over the tick bus and the task locks of
//! the `tiller-integration` crate; everything else is persistent state.

use derive_more::{Constructor, Display, From};
use serde::{Deserialize, Serialize};

/// Platform configuration knobs and their environment bindings.
pub mod config;

/// Thin enqueue front-end that allocates executions and hands work to the worker pool.
pub mod dispatch;

/// Execution worker: the per-execution run loop and its supporting machinery.
pub mod engine;

/// Defines all possible errors produced by the platform, mapped to the control-plane error
/// taxonomy (validation / state conflict / not found / execution failure).
pub mod error;

/// Brokerage adapter interface used when a stop requests open positions to be closed.
pub mod gateway;

/// Persistent lifecycle model: tasks, executions, the store interface, the task state machine
/// and the stale-execution reconciler.
pub mod lifecycle;

/// Initialise `tracing` logging (plain or JSON).
pub mod logging;

/// Pure metrics computation over accumulated trades.
pub mod statistic;

/// Strategy contract, event model and the strategy registry.
pub mod strategy;

/// `SystemBuilder` for wiring the store, transports and worker pool into a running system.
pub mod system;

/// Monotonically increasing, dense (gap-free) sequence number assigned to the append-only
/// children of an execution.
#[derive(
    Debug,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Default,
    Deserialize,
    Serialize,
    Display,
    From,
    Constructor,
)]
pub struct Sequence(pub u64);

impl Sequence {
    pub fn value(self) -> u64 {
        self.0
    }

    pub fn fetch_add(&mut self) -> Sequence {
        let sequence = *self;
        self.0 += 1;
        sequence
    }
}
