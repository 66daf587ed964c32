// SPDX-License-Identifier: MIT OR Apache-2.0
//! Settings-driven wiring: TOML configuration parameterizes the engine scope
//! and the durable consumer, end to end through the facade crate.

mod common;

use std::sync::Arc;
use std::time::Duration;

use agent_weft::broker::{Broker, ConsumerConfig, DurableBus, DurableConsumer, DurableRouter};
use agent_weft::config::WeftSettings;
use agent_weft::core::Router;
use agent_weft::engine::RuntimeEngine;

use common::{CounterAdapter, command};

#[tokio::test]
async fn settings_parameterize_engine_and_consumer() {
    let settings = WeftSettings::from_toml(
        r#"
        [engine]
        tenant = "acme"
        workspace = "main"
        deterministic = true

        [consumer]
        max_deliver = 2
        ack_wait_secs = 1
        backoff_secs = [1]
        "#,
    )
    .unwrap();

    let broker = Broker::new();
    let bus = DurableBus::new(broker.clone());
    bus.ensure_stream().await.unwrap();
    let router = DurableRouter::new(broker.clone());
    router.ensure_stream().await.unwrap();

    let engine = Arc::new(
        RuntimeEngine::builder("counter", Box::new(CounterAdapter::new()), Arc::new(bus))
            .scope(settings.engine.scope())
            .deterministic(settings.engine.deterministic)
            .build(),
    );

    let filter = format!(
        "cmd.{}.{}.counter.>",
        settings.engine.tenant, settings.engine.workspace
    );
    let config = ConsumerConfig::new(DurableRouter::DEFAULT_STREAM, "counter-worker", filter)
        .max_deliver(settings.consumer.max_deliver)
        .ack_wait(settings.consumer.ack_wait())
        .backoff(settings.consumer.backoff());
    let mut consumer = DurableConsumer::new(broker.clone(), Arc::clone(&engine), config);
    consumer.start().await.unwrap();

    router
        .route(command("cmd.counter.increment", "c1", "k1", "acme", "main"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    consumer.stop().await;

    assert_eq!(engine.state().await.data["count"], 1);
    assert_eq!(
        broker.stream_len(DurableRouter::DEFAULT_STREAM).await.unwrap(),
        0
    );
    assert_eq!(
        broker.stream_len(DurableBus::DEFAULT_STREAM).await.unwrap(),
        1
    );
}
