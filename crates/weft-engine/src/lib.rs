// SPDX-License-Identifier: MIT OR Apache-2.0
//! weft-engine
//!
//! The per-agent processing loop that enforces the durability protocol:
//! scope check → idempotency → optimistic concurrency → pure decision →
//! egress rewrite → persist → apply → dispatch → commit.
//!
//! Alongside the [`RuntimeEngine`] this crate carries the in-process
//! [`InProcessRouter`] (depth-first saga execution inside one process) and
//! the [`MemoryBus`] used by tests and single-process deployments.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// In-process broadcast bus.
pub mod bus;
/// The runtime engine and its processing pipeline.
pub mod engine;
/// Per-engine counters.
pub mod metrics;
/// In-process command router.
pub mod router;

pub use bus::MemoryBus;
pub use engine::{EngineBuilder, RecoveryReport, RuntimeEngine};
pub use metrics::{EngineMetrics, EngineMetricsSnapshot};
pub use router::InProcessRouter;

use weft_core::{CodecError, EnvelopeError, StoreError};

/// Faults surfaced by the engine.
///
/// These are control-flow failures, not recorded outcomes: nothing about
/// them is persisted, and the durable consumer's nak/DLQ protocol is the
/// recovery mechanism. Recorded outcomes (scope violations, version
/// conflicts) are returned as ordinary envelopes instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The incoming envelope failed schema validation.
    #[error("invalid envelope")]
    InvalidEnvelope(#[source] EnvelopeError),

    /// The event store refused an append or a query.
    #[error("event store operation failed")]
    Store(#[from] StoreError),

    /// The bus refused a publish after outputs were persisted.
    #[error("bus publish failed")]
    Publish(#[source] anyhow::Error),

    /// The router refused a command after outputs were persisted.
    #[error("command routing failed")]
    Route(#[source] anyhow::Error),

    /// The adapter failed while deciding; nothing was persisted.
    #[error("adapter failed while processing {context}")]
    Adapter {
        /// Envelope id or `"tick"`.
        context: String,
        /// Adapter-reported cause.
        #[source]
        source: anyhow::Error,
    },

    /// Agent state could not be serialized for hashing.
    #[error("state hashing failed")]
    Hash(#[from] CodecError),
}
