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

//! # Tiller-Integration
//! Cross-process primitives shared by the Tiller control plane and its execution workers.
//!
//! The control plane and workers may live in different processes (or different hosts), so the
//! only things they are allowed to share are the two transports defined here:
//! * **Tick Bus** — at-most-once fanout of tick messages by channel name, with no replay.
//! * **Task Locks** — best-effort exclusivity records per task, with heartbeats and a
//!   cancellation flag.
//!
//! Both ship an in-memory implementation (tests, single-process deployments) and a Redis-backed
//! implementation (production).

/// Tick Bus: `TickBus` / `BusSubscription` traits, wire message model, and the in-memory and
/// Redis pub/sub implementations.
pub mod bus;

/// Defines a trait [`Tx`](channel::Tx) abstraction over different channel kinds, as well as
/// other channel utilities.
pub mod channel;

/// Utilities to assist lenient deserialisation of wire values.
pub mod de;

/// Task locks: `TaskLockManager` trait, the heartbeat/staleness model, and the in-memory and
/// Redis implementations.
pub mod lock;

/// Determines if something is considered "unrecoverable", such as an unrecoverable error.
///
/// Note that the meaning of [`Unrecoverable`] may vary depending on the context.
pub trait Unrecoverable {
    fn is_unrecoverable(&self) -> bool;
}
