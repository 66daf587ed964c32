// SPDX-License-Identifier: MIT OR Apache-2.0
//! weft-broker
//!
//! A durable, in-process work-queue broker and the transport adapters built
//! on it: a broadcast [`DurableBus`], a unicast [`DurableRouter`], and the
//! [`DurableConsumer`] pull loop that feeds a runtime engine under the
//! at-least-once delivery protocol (explicit ack, ack-wait redelivery,
//! progressive backoff, dead-letter routing).
//!
//! The wire transport behind a multi-process deployment is an external
//! collaborator; what this crate owns is the delivery protocol the runtime
//! depends on, with broker state observable enough to test crash windows.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Streams, durable consumers, and delivery state.
pub mod broker;
/// Durable event bus over the broker.
pub mod bus;
/// Durable pull consumer feeding an engine.
pub mod consumer;
/// Durable command router over the broker.
pub mod router;

pub use broker::{
    Broker, BrokerError, ConsumerSpec, DeliveryInfo, PendingMessage, Retention, StreamConfig,
    StreamMessage,
};
pub use bus::DurableBus;
pub use consumer::{ConsumerConfig, DurableConsumer};
pub use router::DurableRouter;
