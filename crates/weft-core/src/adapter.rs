// SPDX-License-Identifier: MIT OR Apache-2.0
//! The pure decision contract implemented by every agent.

use crate::envelope::EventEnvelope;
use crate::state::{AgentState, HealthStatus};

/// A pure decision component driven by a runtime engine.
///
/// The receiver types encode the purity rules: [`receive`](Self::receive) and
/// [`tick`](Self::tick) take `&self` and therefore cannot mutate state;
/// they describe the world after an event. All mutation funnels through
/// [`apply`](Self::apply), which the engine calls exactly once per committed
/// event, in store order, both at runtime and during recovery.
///
/// Decisions must not consult wall-clock time, randomness, or the network;
/// the runtime injects time through the envelope `ts` and the `tick` `now`
/// argument.
pub trait AgentAdapter: Send {
    /// Decide on an incoming envelope, returning the envelopes that describe
    /// the outcome. Returning an error is a processing fault: nothing is
    /// persisted and the message is redelivered.
    fn receive(&self, envelope: &EventEnvelope) -> anyhow::Result<Vec<EventEnvelope>>;

    /// Fold an already-committed event into internal state. Must be
    /// deterministic; events the adapter does not recognize are ignored.
    fn apply(&mut self, envelope: &EventEnvelope);

    /// Produce time-triggered outputs (timeouts, lease expirations) for the
    /// injected `now`. State mutation for these outputs happens via
    /// [`apply`](Self::apply) after persistence, never here.
    fn tick(&self, now: i64) -> anyhow::Result<Vec<EventEnvelope>> {
        let _ = now;
        Ok(Vec::new())
    }

    /// Read-only snapshot of the adapter's state, canonical and stable.
    fn state(&self) -> AgentState;

    /// Report adapter health.
    fn health(&self) -> HealthStatus {
        HealthStatus::Ready
    }
}
