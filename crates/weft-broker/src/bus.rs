// SPDX-License-Identifier: MIT OR Apache-2.0
//! Durable event bus over the broker.

use async_trait::async_trait;
use tracing::debug;

use weft_core::{EventBus, EventEnvelope, subject::event_subject};

use crate::broker::{Broker, BrokerError, StreamConfig};

/// Publishes event envelopes to `evt.<tenant>.<workspace>.<suffix>` subjects
/// on a limits-retention stream.
pub struct DurableBus {
    broker: Broker,
    stream: String,
}

impl DurableBus {
    /// Default stream name for broadcast events.
    pub const DEFAULT_STREAM: &'static str = "WEFT_EVENTS";

    /// Bus over the default events stream.
    #[must_use]
    pub fn new(broker: Broker) -> Self {
        Self::with_stream(broker, Self::DEFAULT_STREAM)
    }

    /// Bus over a custom stream name.
    #[must_use]
    pub fn with_stream(broker: Broker, stream: impl Into<String>) -> Self {
        Self {
            broker,
            stream: stream.into(),
        }
    }

    /// Idempotently create the events stream (`evt.>`, limits retention).
    ///
    /// # Errors
    ///
    /// Propagates [`BrokerError`] from stream creation.
    pub async fn ensure_stream(&self) -> Result<(), BrokerError> {
        self.broker
            .ensure_stream(StreamConfig::limits(&self.stream, vec!["evt.>".to_string()]))
            .await
    }

    /// The stream this bus publishes into.
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }
}

#[async_trait]
impl EventBus for DurableBus {
    async fn publish(&self, events: &[EventEnvelope]) -> anyhow::Result<()> {
        for event in events {
            let subject = event_subject(event);
            let payload = serde_json::to_vec(event)?;
            let seq = self.broker.publish(&subject, payload).await?;
            debug!(
                target: "weft.bus",
                event_id = %event.id,
                %subject,
                seq,
                "published event"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_core::EnvelopeBuilder;

    #[tokio::test]
    async fn publishes_on_scoped_subjects() {
        let broker = Broker::new();
        let bus = DurableBus::new(broker.clone());
        bus.ensure_stream().await.unwrap();

        let event = EnvelopeBuilder::new("evt.order.created")
            .id("e1")
            .scope_parts("acme", "main")
            .idempotency_key("k1")
            .payload(json!({"id": "o-1"}))
            .build();
        bus.publish(std::slice::from_ref(&event)).await.unwrap();

        let messages = broker.stream_messages(DurableBus::DEFAULT_STREAM).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].subject, "evt.acme.main.order.created");

        let back: EventEnvelope = serde_json::from_slice(&messages[0].payload).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn ensure_stream_is_idempotent() {
        let bus = DurableBus::new(Broker::new());
        bus.ensure_stream().await.unwrap();
        bus.ensure_stream().await.unwrap();
    }
}
