// SPDX-License-Identifier: MIT OR Apache-2.0
//! Durable pull consumer feeding an engine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use weft_core::{EventEnvelope, subject::dlq_subject};
use weft_engine::RuntimeEngine;

use crate::broker::{Broker, BrokerError, ConsumerSpec, PendingMessage, StreamConfig};

/// Delivery parameters for a [`DurableConsumer`].
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Work-queue stream to consume.
    pub stream: String,
    /// Durable consumer name; delivery counts survive restarts.
    pub durable_name: String,
    /// Subject filter, typically `cmd.<tenant>.<workspace>.<agent>.>`.
    pub filter_subject: String,
    /// Deliveries after which the message is dead-lettered.
    pub max_deliver: u32,
    /// How long a delivery may stay unacknowledged.
    pub ack_wait: Duration,
    /// Progressive redelivery backoff; the last entry repeats.
    pub backoff: Vec<Duration>,
    /// Stream that captures `failed.>` dead letters.
    pub dlq_stream: String,
}

impl ConsumerConfig {
    /// Default DLQ stream name.
    pub const DEFAULT_DLQ_STREAM: &'static str = "WEFT_DLQ";

    /// Consumer defaults: explicit ack, 5 deliveries, 30 s ack wait,
    /// `[1s, 5s, 10s, 30s]` backoff.
    #[must_use]
    pub fn new(
        stream: impl Into<String>,
        durable_name: impl Into<String>,
        filter_subject: impl Into<String>,
    ) -> Self {
        Self {
            stream: stream.into(),
            durable_name: durable_name.into(),
            filter_subject: filter_subject.into(),
            max_deliver: 5,
            ack_wait: Duration::from_secs(30),
            backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(30),
            ],
            dlq_stream: Self::DEFAULT_DLQ_STREAM.to_string(),
        }
    }

    /// Override the redelivery backoff sequence.
    #[must_use]
    pub fn backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Override the ack wait.
    #[must_use]
    pub fn ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    /// Override the delivery cap.
    #[must_use]
    pub fn max_deliver(mut self, max_deliver: u32) -> Self {
        self.max_deliver = max_deliver;
        self
    }

    /// The broker-side consumer definition these settings describe.
    #[must_use]
    pub fn spec(&self) -> ConsumerSpec {
        ConsumerSpec {
            stream: self.stream.clone(),
            durable_name: self.durable_name.clone(),
            filter_subject: self.filter_subject.clone(),
            ack_wait: self.ack_wait,
            backoff: self.backoff.clone(),
        }
    }
}

/// A durable consumer that pulls commands off a work-queue stream, drives an
/// engine, and acknowledges only after the engine has completed all side
/// effects: the at-least-once half of the exactly-once-effect protocol.
///
/// Per-message outcome:
///
/// ```text
/// FETCHED → PARSED → PROCESSED → ACKED            (success)
///                  \→ NAKED                       (fault; broker backoff)
///                  \→ DLQ_PUBLISHED → ACKED       (deliveries ≥ max)
/// ```
pub struct DurableConsumer {
    broker: Broker,
    engine: Arc<RuntimeEngine>,
    config: ConsumerConfig,
    task: Option<JoinHandle<()>>,
    shutdown: Option<watch::Sender<bool>>,
}

impl DurableConsumer {
    /// Build a consumer; call [`start`](Self::start) to begin pulling.
    #[must_use]
    pub fn new(broker: Broker, engine: Arc<RuntimeEngine>, config: ConsumerConfig) -> Self {
        Self {
            broker,
            engine,
            config,
            task: None,
            shutdown: None,
        }
    }

    /// Register the durable consumer and the DLQ stream, then start the pull
    /// loop on a background task. Starting twice is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates [`BrokerError`] from consumer/stream registration.
    pub async fn start(&mut self) -> Result<(), BrokerError> {
        if self.task.is_some() {
            return Ok(());
        }
        self.broker.ensure_consumer(self.config.spec()).await?;
        self.broker
            .ensure_stream(StreamConfig::limits(
                &self.config.dlq_stream,
                vec!["failed.>".to_string()],
            ))
            .await?;

        info!(
            target: "weft.consumer",
            stream = %self.config.stream,
            durable = %self.config.durable_name,
            filter = %self.config.filter_subject,
            "consumer started"
        );

        let (tx, rx) = watch::channel(false);
        let broker = self.broker.clone();
        let engine = Arc::clone(&self.engine);
        let config = self.config.clone();
        self.task = Some(tokio::spawn(run_loop(broker, engine, config, rx)));
        self.shutdown = Some(tx);
        Ok(())
    }

    /// Signal the pull loop to stop and wait for it to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!(
            target: "weft.consumer",
            durable = %self.config.durable_name,
            "consumer stopped"
        );
    }
}

async fn run_loop(
    broker: Broker,
    engine: Arc<RuntimeEngine>,
    config: ConsumerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            fetched = broker.fetch(
                &config.stream,
                &config.durable_name,
                1,
                Duration::from_millis(250),
            ) => {
                match fetched {
                    Ok(batch) => {
                        for message in batch {
                            process_message(&broker, &engine, &config, message).await;
                        }
                    }
                    Err(err) => {
                        error!(
                            target: "weft.consumer",
                            durable = %config.durable_name,
                            error = %err,
                            "fetch failed, backing off"
                        );
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

async fn process_message(
    broker: &Broker,
    engine: &Arc<RuntimeEngine>,
    config: &ConsumerConfig,
    message: PendingMessage,
) {
    let outcome: anyhow::Result<()> = async {
        let envelope: EventEnvelope = serde_json::from_slice(&message.payload)?;
        engine.process_event(envelope).await?;
        Ok(())
    }
    .await;

    match outcome {
        Ok(()) => {
            message.ack().await;
            debug!(
                target: "weft.consumer",
                durable = %config.durable_name,
                subject = %message.subject,
                "processed and acked"
            );
        }
        Err(err) => {
            warn!(
                target: "weft.consumer",
                durable = %config.durable_name,
                subject = %message.subject,
                num_delivered = message.info.num_delivered,
                error = %err,
                "processing failed"
            );
            if message.info.num_delivered >= config.max_deliver {
                let subject = dlq_subject(&message.subject);
                match broker.publish(&subject, message.payload.clone()).await {
                    Ok(_) => {
                        // Remove the poison message from the work queue; the
                        // dead letter is the durable record of the failure.
                        message.ack().await;
                        warn!(
                            target: "weft.consumer",
                            durable = %config.durable_name,
                            %subject,
                            "exceeded max deliveries, dead-lettered"
                        );
                        return;
                    }
                    Err(dlq_err) => {
                        error!(
                            target: "weft.consumer",
                            durable = %config.durable_name,
                            %subject,
                            error = %dlq_err,
                            "dead-letter publish failed"
                        );
                    }
                }
            }
            message.nak().await;
        }
    }
}
