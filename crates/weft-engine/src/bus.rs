// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-process broadcast bus.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;

use weft_core::{EventBus, EventEnvelope};

const DEFAULT_CAPACITY: usize = 256;

/// An in-process [`EventBus`] that keeps a full publish log and fans events
/// out to broadcast subscribers.
///
/// The log makes at-least-once behavior observable in tests: a re-published
/// event shows up twice, exactly as a durable subscriber would see it.
pub struct MemoryBus {
    published: Mutex<Vec<EventEnvelope>>,
    tx: broadcast::Sender<EventEnvelope>,
    total_published: AtomicU64,
}

impl MemoryBus {
    /// Create a bus with the default subscriber capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with the given broadcast channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            published: Mutex::new(Vec::new()),
            tx,
            total_published: AtomicU64::new(0),
        }
    }

    /// Everything published so far, in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<EventEnvelope> {
        self.published.lock().expect("bus lock poisoned").clone()
    }

    /// Total number of envelopes published.
    #[must_use]
    pub fn total_published(&self) -> u64 {
        self.total_published.load(Ordering::Relaxed)
    }

    /// Subscribe to future publishes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Drop the publish log (subscribers are unaffected).
    pub fn clear(&self) {
        self.published.lock().expect("bus lock poisoned").clear();
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, events: &[EventEnvelope]) -> anyhow::Result<()> {
        for event in events {
            self.published
                .lock()
                .expect("bus lock poisoned")
                .push(event.clone());
            self.total_published.fetch_add(1, Ordering::Relaxed);
            // No subscribers is fine; the log is the durable record here.
            let _ = self.tx.send(event.clone());
        }
        Ok(())
    }
}
