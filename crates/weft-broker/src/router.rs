// SPDX-License-Identifier: MIT OR Apache-2.0
//! Durable command router over the broker.

use async_trait::async_trait;
use tracing::debug;

use weft_core::{EventEnvelope, Router, subject::command_subject};

use crate::broker::{Broker, BrokerError, StreamConfig};

/// Routes command envelopes to `cmd.<tenant>.<workspace>.<target>.<verb>`
/// subjects on a work-queue stream, where exactly one consumer in the target
/// agent's group picks them up.
pub struct DurableRouter {
    broker: Broker,
    stream: String,
}

impl DurableRouter {
    /// Default stream name for commands.
    pub const DEFAULT_STREAM: &'static str = "WEFT_COMMANDS";

    /// Router over the default commands stream.
    #[must_use]
    pub fn new(broker: Broker) -> Self {
        Self::with_stream(broker, Self::DEFAULT_STREAM)
    }

    /// Router over a custom stream name.
    #[must_use]
    pub fn with_stream(broker: Broker, stream: impl Into<String>) -> Self {
        Self {
            broker,
            stream: stream.into(),
        }
    }

    /// Idempotently create the commands stream (`cmd.>`, work-queue
    /// retention).
    ///
    /// # Errors
    ///
    /// Propagates [`BrokerError`] from stream creation.
    pub async fn ensure_stream(&self) -> Result<(), BrokerError> {
        self.broker
            .ensure_stream(StreamConfig::work_queue(
                &self.stream,
                vec!["cmd.>".to_string()],
            ))
            .await
    }

    /// The stream this router publishes into.
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }
}

#[async_trait]
impl Router for DurableRouter {
    async fn route(&self, envelope: EventEnvelope) -> anyhow::Result<()> {
        if !envelope.is_command() {
            anyhow::bail!(
                "refusing to route non-command type {} (id {})",
                envelope.event_type,
                envelope.id
            );
        }
        let subject = command_subject(&envelope);
        let payload = serde_json::to_vec(&envelope)?;
        let seq = self.broker.publish(&subject, payload).await?;
        debug!(
            target: "weft.router",
            event_id = %envelope.id,
            %subject,
            seq,
            "routed command"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::EnvelopeBuilder;

    fn cmd(event_type: &str) -> EventEnvelope {
        EnvelopeBuilder::new(event_type)
            .id("c1")
            .scope_parts("acme", "main")
            .idempotency_key("k1")
            .build()
    }

    #[tokio::test]
    async fn routes_commands_onto_the_work_queue() {
        let broker = Broker::new();
        let router = DurableRouter::new(broker.clone());
        router.ensure_stream().await.unwrap();

        router.route(cmd("cmd.inventory.reserve")).await.unwrap();

        let messages = broker
            .stream_messages(DurableRouter::DEFAULT_STREAM)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].subject, "cmd.acme.main.inventory.reserve");
    }

    #[tokio::test]
    async fn rejects_non_commands() {
        let router = DurableRouter::new(Broker::new());
        router.ensure_stream().await.unwrap();
        assert!(router.route(cmd("evt.order.created")).await.is_err());
    }
}
