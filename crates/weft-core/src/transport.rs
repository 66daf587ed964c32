// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bus and router interfaces.
//!
//! The engine publishes events and routes commands through these traits and
//! never learns which transport sits behind them: an in-process fan-out for
//! tests and single-process deployments, or the durable broker for
//! distributed ones.

use async_trait::async_trait;

use crate::envelope::EventEnvelope;

/// Durable publish of broadcast events.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish the given envelopes, in order. Publishing is a side effect
    /// that happens only after the envelopes are persisted; an error here is
    /// a processing fault and redelivery is the recovery mechanism.
    async fn publish(&self, events: &[EventEnvelope]) -> anyhow::Result<()>;
}

/// Unicast routing of command envelopes to their target agent.
#[async_trait]
pub trait Router: Send + Sync {
    /// Deliver a command to its target. Implementations reject envelopes
    /// that are not commands.
    async fn route(&self, envelope: EventEnvelope) -> anyhow::Result<()>;
}
