// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared fixtures for the scenario tests.

#![allow(dead_code)]

use serde_json::json;
use weft_core::{
    Actor, AgentAdapter, AgentState, EnvelopeBuilder, EventEnvelope, PrincipalType,
    SecurityContext, Source,
};

/// A counter agent in the shape of the classic increment example: outputs
/// carry their own derived idempotency keys, so duplicates are caught by the
/// engine's processed-key set rather than the store index.
pub struct CounterAdapter {
    pub count: u64,
}

impl CounterAdapter {
    pub fn new() -> Self {
        Self { count: 0 }
    }
}

impl AgentAdapter for CounterAdapter {
    fn receive(&self, envelope: &EventEnvelope) -> anyhow::Result<Vec<EventEnvelope>> {
        if envelope.event_type.contains("poison") {
            anyhow::bail!("poison pill");
        }
        if envelope.event_type.ends_with(".increment") {
            let event = envelope
                .child("evt.counter.incremented")
                .id(format!("evt-inc-{}", envelope.id))
                .idempotency_key(format!("idemp-evt-{}", envelope.id))
                .source(Source::new("counter", "test"))
                .payload(json!({"new_count": self.count + 1}))
                .build();
            return Ok(vec![event]);
        }
        Ok(Vec::new())
    }

    fn apply(&mut self, envelope: &EventEnvelope) {
        if envelope.event_type == "evt.counter.incremented" {
            self.count += 1;
        }
    }

    fn state(&self) -> AgentState {
        AgentState {
            version: self.count,
            data: json!({"count": self.count}),
            ..AgentState::default()
        }
    }
}

/// An adapter that fails every delivery: the dead-letter path's best friend.
pub struct PoisonAdapter;

impl AgentAdapter for PoisonAdapter {
    fn receive(&self, _envelope: &EventEnvelope) -> anyhow::Result<Vec<EventEnvelope>> {
        anyhow::bail!("poison pill")
    }

    fn apply(&mut self, _envelope: &EventEnvelope) {}

    fn state(&self) -> AgentState {
        AgentState::default()
    }
}

/// Build a fully-populated command envelope in the given scope.
pub fn command(
    event_type: &str,
    id: &str,
    key: &str,
    tenant: &str,
    workspace: &str,
) -> EventEnvelope {
    EnvelopeBuilder::new(event_type)
        .id(id)
        .ts(1_000)
        .trace(format!("trace-{id}"), format!("span-{id}"))
        .scope_parts(tenant, workspace)
        .actor(Actor::new("user-1", "admin"))
        .source(Source::new("gateway", "test"))
        .security_context(SecurityContext::new("user-1", PrincipalType::User))
        .idempotency_key(key)
        .payload(json!({}))
        .build()
}
