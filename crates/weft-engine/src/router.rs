// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-process command router.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::warn;

use weft_core::{EventEnvelope, Router, subject::command_target};

use crate::engine::RuntimeEngine;

/// Routes commands between engines living in the same process.
///
/// The target engine's `process_event` is awaited inline, which gives
/// depth-first causal ordering within the process: a saga step completes
/// before its caller's `process_event` returns.
///
/// The nested engine runs inside the caller's critical section, so a routing
/// cycle (A routes to B while B routes back to A) deadlocks. Cycles are not
/// detected; callers must avoid them.
#[derive(Default)]
pub struct InProcessRouter {
    routes: RwLock<BTreeMap<String, Arc<RuntimeEngine>>>,
}

impl InProcessRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine to handle `cmd.<agent_name>.*` commands. Agent
    /// names are case-insensitive; a later registration replaces an earlier
    /// one.
    pub fn register(&self, agent_name: &str, engine: Arc<RuntimeEngine>) {
        self.routes
            .write()
            .expect("router lock poisoned")
            .insert(agent_name.to_ascii_lowercase(), engine);
    }

    /// Registered agent names, sorted.
    #[must_use]
    pub fn agents(&self) -> Vec<String> {
        self.routes
            .read()
            .expect("router lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    fn lookup(&self, agent: &str) -> Option<Arc<RuntimeEngine>> {
        self.routes
            .read()
            .expect("router lock poisoned")
            .get(&agent.to_ascii_lowercase())
            .cloned()
    }
}

#[async_trait]
impl Router for InProcessRouter {
    async fn route(&self, envelope: EventEnvelope) -> anyhow::Result<()> {
        if !envelope.is_command() {
            anyhow::bail!("refusing to route non-command type {}", envelope.event_type);
        }
        let Some(target) = command_target(&envelope.event_type) else {
            warn!(
                target: "weft.router",
                event_type = %envelope.event_type,
                "malformed command type, dropping"
            );
            return Ok(());
        };

        match self.lookup(target) {
            Some(engine) => {
                engine.process_event(envelope).await?;
                Ok(())
            }
            None => {
                warn!(target: "weft.router", agent = %target, "no route for agent, dropping");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBus;
    use weft_core::{AgentAdapter, AgentState, EnvelopeBuilder, Scope};

    struct NullAdapter;

    impl AgentAdapter for NullAdapter {
        fn receive(&self, _envelope: &EventEnvelope) -> anyhow::Result<Vec<EventEnvelope>> {
            Ok(Vec::new())
        }

        fn apply(&mut self, _envelope: &EventEnvelope) {}

        fn state(&self) -> AgentState {
            AgentState::default()
        }
    }

    fn engine(bus: Arc<MemoryBus>) -> Arc<RuntimeEngine> {
        Arc::new(
            RuntimeEngine::builder("inventory", Box::new(NullAdapter), bus)
                .scope(Scope::new("t", "w"))
                .build(),
        )
    }

    fn command(event_type: &str) -> EventEnvelope {
        EnvelopeBuilder::new(event_type)
            .id("c1")
            .ts(1)
            .scope_parts("t", "w")
            .idempotency_key("k1")
            .build()
    }

    #[tokio::test]
    async fn routes_to_the_registered_engine() {
        let bus = Arc::new(MemoryBus::new());
        let router = InProcessRouter::new();
        let target = engine(bus);
        router.register("Inventory", Arc::clone(&target));

        router.route(command("cmd.inventory.reserve")).await.unwrap();
        assert_eq!(target.metrics().snapshot().events_received, 1);
    }

    #[tokio::test]
    async fn unknown_target_is_dropped_not_an_error() {
        let router = InProcessRouter::new();
        router.route(command("cmd.nowhere.go")).await.unwrap();
    }

    #[tokio::test]
    async fn non_commands_are_rejected() {
        let router = InProcessRouter::new();
        let result = router.route(command("evt.inventory.reserved")).await;
        assert!(result.is_err());
    }
}
