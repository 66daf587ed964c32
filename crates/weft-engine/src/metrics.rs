// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-engine counters.

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering::Relaxed};

/// Atomic engine-level counters, shareable across tasks.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    events_received: AtomicU64,
    events_published: AtomicU64,
    commands_routed: AtomicU64,
    idempotency_hits: AtomicU64,
    security_violations: AtomicU64,
    conflicts: AtomicU64,
    processing_ms: AtomicI64,
}

impl EngineMetrics {
    /// Create a zeroed collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self) {
        self.events_received.fetch_add(1, Relaxed);
    }

    pub(crate) fn record_event_published(&self) {
        self.events_published.fetch_add(1, Relaxed);
    }

    pub(crate) fn record_command_routed(&self) {
        self.commands_routed.fetch_add(1, Relaxed);
    }

    pub(crate) fn record_idempotency_hit(&self) {
        self.idempotency_hits.fetch_add(1, Relaxed);
    }

    pub(crate) fn record_security_violation(&self) {
        self.security_violations.fetch_add(1, Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Relaxed);
    }

    pub(crate) fn record_duration(&self, ms: i64) {
        self.processing_ms.fetch_add(ms.max(0), Relaxed);
    }

    /// Take a point-in-time snapshot of the current values.
    #[must_use]
    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            events_received: self.events_received.load(Relaxed),
            events_published: self.events_published.load(Relaxed),
            commands_routed: self.commands_routed.load(Relaxed),
            idempotency_hits: self.idempotency_hits.load(Relaxed),
            security_violations: self.security_violations.load(Relaxed),
            conflicts: self.conflicts.load(Relaxed),
            processing_ms: self.processing_ms.load(Relaxed),
        }
    }
}

/// Non-atomic, serialisable snapshot of [`EngineMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineMetricsSnapshot {
    /// Envelopes accepted into the pipeline (duplicates excluded).
    pub events_received: u64,
    /// Event envelopes published on the bus.
    pub events_published: u64,
    /// Command envelopes handed to the router.
    pub commands_routed: u64,
    /// Duplicate deliveries short-circuited by the idempotency check.
    pub idempotency_hits: u64,
    /// Foreign-scope envelopes turned into violation outcomes.
    pub security_violations: u64,
    /// Optimistic-concurrency mismatches turned into conflict outcomes.
    pub conflicts: u64,
    /// Cumulative logical processing time in milliseconds.
    pub processing_ms: i64,
}
