// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tenant/workspace isolation: foreign-scope envelopes become audited
//! violation outcomes, and adapters cannot speak for other scopes.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use weft_core::{
    AgentAdapter, AgentState, EventBus, EventEnvelope, EventStore, ReplayFilter, Scope, Source,
};
use weft_engine::{MemoryBus, RuntimeEngine};
use weft_store::MemoryEventStore;

use common::command;

/// Records whether `receive` was ever invoked.
struct ProbeAdapter {
    receives: Arc<AtomicUsize>,
}

impl AgentAdapter for ProbeAdapter {
    fn receive(&self, envelope: &EventEnvelope) -> anyhow::Result<Vec<EventEnvelope>> {
        self.receives.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            envelope
                .child("evt.probe.seen")
                .id(format!("evt-{}", envelope.id))
                .source(Source::new("probe", "test"))
                .build(),
        ])
    }

    fn apply(&mut self, _envelope: &EventEnvelope) {}

    fn state(&self) -> AgentState {
        AgentState::default()
    }
}

/// Emits outputs that claim a foreign scope.
struct SpoofAdapter;

impl AgentAdapter for SpoofAdapter {
    fn receive(&self, envelope: &EventEnvelope) -> anyhow::Result<Vec<EventEnvelope>> {
        let mut out = envelope
            .child("evt.spoof.attempted")
            .id(format!("evt-{}", envelope.id))
            .source(Source::new("spoof", "test"))
            .build();
        out.tenant = "victim-tenant".to_string();
        out.workspace = "victim-workspace".to_string();
        Ok(vec![out])
    }

    fn apply(&mut self, _envelope: &EventEnvelope) {}

    fn state(&self) -> AgentState {
        AgentState::default()
    }
}

#[tokio::test]
async fn foreign_scope_yields_one_audited_violation() {
    let bus = Arc::new(MemoryBus::new());
    let store = Arc::new(MemoryEventStore::new());
    let receives = Arc::new(AtomicUsize::new(0));
    let engine = RuntimeEngine::builder(
        "probe",
        Box::new(ProbeAdapter {
            receives: Arc::clone(&receives),
        }),
        Arc::clone(&bus) as Arc<dyn EventBus>,
    )
    .scope(Scope::new("tenant-a", "workspace-a"))
    .store(Arc::clone(&store) as Arc<dyn EventStore>)
    .build();

    let foreign = command("cmd.probe.touch", "x1", "kx", "tenant-b", "workspace-a");
    let outputs = engine.process_event(foreign).await.unwrap();

    assert_eq!(outputs.len(), 1);
    let violation = &outputs[0];
    assert_eq!(violation.event_type, "evt.security.violation");
    assert_eq!(violation.payload["attempted_tenant"], "tenant-b");
    assert_eq!(violation.payload["attempted_workspace"], "workspace-a");
    assert_eq!(violation.payload["engine_tenant"], "tenant-a");
    // The violation itself carries the engine's scope.
    assert_eq!(violation.tenant, "tenant-a");
    assert_eq!(violation.workspace, "workspace-a");

    assert_eq!(receives.load(Ordering::SeqCst), 0, "adapter never saw the input");

    // Audit: the violation is persisted and published.
    let audited = store.replay(0, &ReplayFilter::default()).unwrap();
    assert_eq!(audited.len(), 1);
    assert_eq!(audited[0].event_type, "evt.security.violation");
    assert_eq!(bus.published().len(), 1);
    assert_eq!(engine.metrics().snapshot().security_violations, 1);
}

#[tokio::test]
async fn repeated_foreign_envelope_is_deduplicated() {
    let bus = Arc::new(MemoryBus::new());
    let store = Arc::new(MemoryEventStore::new());
    let receives = Arc::new(AtomicUsize::new(0));
    let engine = RuntimeEngine::builder(
        "probe",
        Box::new(ProbeAdapter {
            receives: Arc::clone(&receives),
        }),
        Arc::clone(&bus) as Arc<dyn EventBus>,
    )
    .scope(Scope::new("tenant-a", "workspace-a"))
    .store(Arc::clone(&store) as Arc<dyn EventStore>)
    .build();

    let foreign = command("cmd.probe.touch", "x1", "kx", "tenant-b", "workspace-a");
    engine.process_event(foreign.clone()).await.unwrap();
    engine.process_event(foreign).await.unwrap();

    // The attempted scope's key was marked processed: one violation total.
    assert_eq!(store.len(), 1);
    assert_eq!(engine.metrics().snapshot().security_violations, 1);
    assert_eq!(receives.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn egress_rewrite_defeats_scope_spoofing() {
    let bus = Arc::new(MemoryBus::new());
    let store = Arc::new(MemoryEventStore::new());
    let engine = RuntimeEngine::builder("spoof", Box::new(SpoofAdapter), Arc::clone(&bus) as Arc<dyn EventBus>)
        .scope(Scope::new("tenant-a", "workspace-a"))
        .store(Arc::clone(&store) as Arc<dyn EventStore>)
        .build();

    let cmd = command("cmd.spoof.try", "s1", "ks", "tenant-a", "workspace-a");
    let outputs = engine.process_event(cmd).await.unwrap();

    for out in &outputs {
        assert_eq!(out.tenant, "tenant-a");
        assert_eq!(out.workspace, "workspace-a");
    }
    for stored in store.replay(0, &ReplayFilter::default()).unwrap() {
        assert_eq!(stored.tenant, "tenant-a");
        assert_eq!(stored.workspace, "workspace-a");
    }
    for published in bus.published() {
        assert_eq!(published.tenant, "tenant-a");
        assert_eq!(published.workspace, "workspace-a");
    }
}

#[tokio::test]
async fn same_key_in_two_scopes_names_two_requests() {
    let bus = Arc::new(MemoryBus::new());
    // Two engines, one per tenant, sharing a store the way a multi-tenant
    // deployment shares its database.
    let store = Arc::new(MemoryEventStore::new());

    let mut counts = Vec::new();
    for tenant in ["tenant-a", "tenant-b"] {
        let engine = RuntimeEngine::builder(
            "counter",
            Box::new(common::CounterAdapter::new()),
            Arc::clone(&bus) as Arc<dyn EventBus>,
        )
        .scope(Scope::new(tenant, "w"))
        .store(Arc::clone(&store) as Arc<dyn EventStore>)
        .build();

        let cmd = command(
            "cmd.counter.increment",
            &format!("c-{tenant}"),
            "shared-key",
            tenant,
            "w",
        );
        let outputs = engine.process_event(cmd).await.unwrap();
        counts.push(outputs.len());
    }

    // The second tenant's identical key is not a duplicate: both processed.
    assert_eq!(counts, vec![1, 1]);
    assert_eq!(store.len(), 2);
}
