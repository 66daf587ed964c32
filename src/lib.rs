// SPDX-License-Identifier: MIT OR Apache-2.0
//! agent-weft
//!
//! An event-sourced, multi-tenant agent runtime. Per-agent engines drive
//! pure decision adapters through a durability protocol (command idempotency
//! against a persistent event store, optimistic concurrency per entity,
//! strict tenant/workspace isolation) and cooperate with a durable
//! work-queue consumer to turn at-least-once delivery into exactly-once
//! effect on state.
//!
//! This facade re-exports the workspace crates:
//!
//! - [`core`]: envelopes, the adapter contract, scopes, subjects, and the
//!   store/bus/router interfaces
//! - [`store`]: in-memory and SQLite event stores
//! - [`engine`]: the runtime engine, in-process router, and memory bus
//! - [`broker`]: the durable work-queue broker, bus, router, and consumer
//! - [`adapters`]: the lock-manager and entity-store system adapters
//! - [`config`]: runtime settings
//! - [`telemetry`]: tracing subscriber setup

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub use weft_adapters as adapters;
pub use weft_broker as broker;
pub use weft_config as config;
pub use weft_core as core;
pub use weft_engine as engine;
pub use weft_store as store;
pub use weft_telemetry as telemetry;
