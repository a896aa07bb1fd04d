//! # Chronicle Core
//!
//! Local activity history for a social VR client. A stream of
//! locally-observed events — the user's world/instance changes, co-located
//! players joining and leaving, friend presence transitions, relationship
//! changes — becomes durable, queryable history:
//!
//! - **Event bus** — process-wide typed pub/sub; every inter-component
//!   signal flows through it.
//! - **Journals** — append-only line-delimited record files per domain
//!   (instance history, player encounters, social activity), deduplicated
//!   by deterministic identity and crash-safe by construction.
//! - **Friend presence** — an authoritative in-memory map diffed on every
//!   update, emitting semantic change events.
//! - **Heartbeat accrual** — per-pulse time counting that survives crashes
//!   and missed leave events, backed by a per-user SQLite counter store.
//! - **Stat aggregation** — journal history merged with durable counters
//!   into per-player and per-world figures plus a composite friend score.
//!
//! Everything is owned and lifecycle-managed by
//! [`ChronicleService`]: one storage directory per logged-in
//! user, strict isolation across account switches, and nothing fatal to the
//! host — every failure degrades to "best available data".

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod journal;
pub mod lifecycle;
pub mod presence;
pub mod session;
pub mod snapshot;
pub mod stats;
pub mod types;

pub use bus::EventBus;
pub use config::ChronicleConfig;
pub use error::ChronicleError;
pub use events::{Event, EventKind};
pub use heartbeat::{HeartbeatEngine, LiveRoster};
pub use lifecycle::ChronicleService;
pub use presence::FriendPresenceTracker;
pub use types::*;
