// SPDX-License-Identifier: MIT OR Apache-2.0
//! The runtime engine and its processing pipeline.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use weft_core::{
    AgentAdapter, AgentState, EventBus, EventEnvelope, EventStore, HealthStatus, ReplayFilter,
    Router, SCHEMA_VERSION, Scope, Source, StoreError, state_hash,
};

use crate::EngineError;
use crate::metrics::EngineMetrics;

/// Fixed logical timestamp used in deterministic mode.
pub(crate) const DETERMINISTIC_TS_MS: i64 = 1_234_567_890_000;

struct EngineInner {
    adapter: Box<dyn AgentAdapter>,
    /// Scoped idempotency keys already processed by this engine.
    ///
    /// Unbounded by design: the store's idempotency index is the durable
    /// source of truth, this set only short-circuits the lookup.
    processed: HashSet<String>,
}

/// Summary of a [`RuntimeEngine::recover`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Events replayed through `apply`.
    pub applied: usize,
    /// Idempotency keys restored into the processed set.
    pub keys_restored: usize,
    /// Stored records skipped because their scope did not match the engine.
    pub skipped: usize,
}

/// Per-agent processing loop enforcing the durability protocol.
///
/// One engine wraps one adapter and owns one [`Scope`]. `process_event` and
/// `tick` serialize on an internal critical section, so the adapter is never
/// accessed concurrently. Engines are cheap to share behind an [`Arc`]; the
/// in-process router holds them that way.
pub struct RuntimeEngine {
    agent_id: String,
    scope: Scope,
    deterministic: bool,
    bus: Arc<dyn EventBus>,
    store: Option<Arc<dyn EventStore>>,
    router: OnceLock<Arc<dyn Router>>,
    metrics: Arc<EngineMetrics>,
    inner: Mutex<EngineInner>,
}

/// Builder for [`RuntimeEngine`].
pub struct EngineBuilder {
    agent_id: String,
    adapter: Box<dyn AgentAdapter>,
    bus: Arc<dyn EventBus>,
    scope: Scope,
    store: Option<Arc<dyn EventStore>>,
    router: Option<Arc<dyn Router>>,
    deterministic: bool,
}

impl EngineBuilder {
    /// Set the engine's scope (defaults to `default/default`).
    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Attach an event store. Without one the engine still processes, but
    /// durability degrades to the in-memory idempotency set.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach a command router.
    #[must_use]
    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    /// Freeze the engine clock for reproducible runs.
    #[must_use]
    pub fn deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    /// Finish building the engine.
    #[must_use]
    pub fn build(self) -> RuntimeEngine {
        let router = OnceLock::new();
        if let Some(r) = self.router {
            let _ = router.set(r);
        }
        RuntimeEngine {
            agent_id: self.agent_id,
            scope: self.scope,
            deterministic: self.deterministic,
            bus: self.bus,
            store: self.store,
            router,
            metrics: Arc::new(EngineMetrics::new()),
            inner: Mutex::new(EngineInner {
                adapter: self.adapter,
                processed: HashSet::new(),
            }),
        }
    }
}

impl RuntimeEngine {
    /// Start building an engine for the given agent.
    pub fn builder(
        agent_id: impl Into<String>,
        adapter: Box<dyn AgentAdapter>,
        bus: Arc<dyn EventBus>,
    ) -> EngineBuilder {
        EngineBuilder {
            agent_id: agent_id.into(),
            adapter,
            bus,
            scope: Scope::new("default", "default"),
            store: None,
            router: None,
            deterministic: false,
        }
    }

    /// The agent this engine drives.
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// The engine's isolation scope.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Shared counters for this engine.
    #[must_use]
    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Install the command router after construction.
    ///
    /// Engines and the in-process router reference each other; the router is
    /// built over engine handles first and then handed back here. Returns
    /// `false` when a router was already installed.
    pub fn set_router(&self, router: Arc<dyn Router>) -> bool {
        self.router.set(router).is_ok()
    }

    /// Process one incoming envelope through the durability pipeline and
    /// return the envelopes emitted. All side effects (persist, apply,
    /// publish, route) have completed when this returns.
    ///
    /// # Errors
    ///
    /// Faults only; see [`EngineError`]. Scope violations and concurrency
    /// conflicts are recorded outcomes, returned as envelopes in `Ok`.
    pub async fn process_event(
        &self,
        envelope: EventEnvelope,
    ) -> Result<Vec<EventEnvelope>, EngineError> {
        envelope.validate().map_err(EngineError::InvalidEnvelope)?;

        let mut inner = self.inner.lock().await;

        // 1. Scope check: never hand foreign-scope input to the adapter.
        if !self.scope.matches(&envelope) {
            return self.record_scope_violation(&mut inner, &envelope).await;
        }

        // 2. Idempotency: memory set first, then the store index.
        let scoped_key = self.scope.scoped_key(&envelope.idempotency_key);
        let mut duplicate = inner.processed.contains(&scoped_key);
        if !duplicate
            && let Some(store) = &self.store
        {
            let stored = store.get_by_idempotency_key(
                &envelope.idempotency_key,
                Some(&envelope.tenant),
                Some(&envelope.workspace),
            )?;
            if !stored.is_empty() {
                duplicate = true;
                inner.processed.insert(scoped_key.clone());
            }
        }
        if duplicate {
            return self.replay_duplicate(&envelope).await;
        }

        let started = self.now_ms();
        self.metrics.record_received();
        debug!(
            target: "weft.engine",
            agent = %self.agent_id,
            event_id = %envelope.id,
            event_type = %envelope.event_type,
            "processing envelope"
        );

        // 3. Optimistic concurrency: a stated expectation must match the
        // aggregate's current version before the adapter ever runs.
        if let Some(expected) = envelope.expected_version {
            let state = inner.adapter.state();
            let current = envelope
                .entity_id
                .as_deref()
                .map(|id| state.entity_version(id))
                .unwrap_or(0);
            if current != expected {
                return self
                    .record_conflict(&mut inner, &envelope, current, expected, scoped_key)
                    .await;
            }
        }

        // 4. Decide. Pure: the adapter sees the envelope and its own state,
        // nothing else.
        let mut outputs =
            inner
                .adapter
                .receive(&envelope)
                .map_err(|source| EngineError::Adapter {
                    context: envelope.id.clone(),
                    source,
                })?;

        // 5. Egress rewrite: adapters cannot speak for other scopes.
        for out in &mut outputs {
            out.tenant = self.scope.tenant.clone();
            out.workspace = self.scope.workspace.clone();
        }
        for out in &outputs {
            out.validate().map_err(|e| EngineError::Adapter {
                context: envelope.id.clone(),
                source: anyhow::Error::new(e).context(format!("invalid output envelope {}", out.id)),
            })?;
        }

        if !outputs.is_empty() {
            // 6. Persist. The durability boundary: after this append the
            // outcome exists, whatever happens to the process.
            if let Some(store) = &self.store {
                store.append_batch(&outputs)?;
                debug!(
                    target: "weft.engine",
                    agent = %self.agent_id,
                    count = outputs.len(),
                    "persisted output batch"
                );
            }

            // 7. Apply. The only place state moves.
            for out in &outputs {
                inner.adapter.apply(out);
            }

            // 8. Dispatch in output order.
            self.dispatch(&outputs).await?;
        }

        // 9. Commit.
        inner.processed.insert(scoped_key);
        self.metrics.record_duration(self.now_ms() - started);

        Ok(outputs)
    }

    /// Run the adapter's time-based logic under the same persist → apply →
    /// dispatch rules as [`process_event`](Self::process_event).
    ///
    /// # Errors
    ///
    /// Faults only; see [`EngineError`].
    pub async fn tick(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        let now = self.now_ms();

        let mut outputs = inner
            .adapter
            .tick(now)
            .map_err(|source| EngineError::Adapter {
                context: "tick".to_string(),
                source,
            })?;
        if outputs.is_empty() {
            return Ok(());
        }

        for out in &mut outputs {
            out.tenant = self.scope.tenant.clone();
            out.workspace = self.scope.workspace.clone();
        }

        if let Some(store) = &self.store {
            store.append_batch(&outputs)?;
        }
        for out in &outputs {
            inner.adapter.apply(out);
        }
        self.dispatch(&outputs).await?;

        debug!(
            target: "weft.engine",
            agent = %self.agent_id,
            count = outputs.len(),
            "tick emitted envelopes"
        );
        Ok(())
    }

    /// Rebuild adapter state by replaying the store within this engine's
    /// scope. Recovery only applies: nothing is published, routed, or handed
    /// to `receive`. The processed-key set is repopulated from the stored
    /// envelopes so old commands stay de-duplicated.
    ///
    /// # Errors
    ///
    /// [`EngineError::Store`] when the replay query fails.
    pub async fn recover(&self) -> Result<RecoveryReport, EngineError> {
        let Some(store) = &self.store else {
            return Ok(RecoveryReport::default());
        };

        let mut inner = self.inner.lock().await;
        let events = store.replay(0, &ReplayFilter::scoped(&self.scope))?;
        let mut report = RecoveryReport::default();

        for event in &events {
            // Defense in depth: the filter already scoped the query, but a
            // corrupt store must not leak foreign state into this engine.
            if !self.scope.matches(event) {
                warn!(
                    target: "weft.engine",
                    agent = %self.agent_id,
                    event_id = %event.id,
                    event_scope = %Scope::of(event),
                    engine_scope = %self.scope,
                    "recovered event has invalid scope, skipping"
                );
                report.skipped += 1;
                continue;
            }
            inner.adapter.apply(event);
            report.applied += 1;
            if !event.idempotency_key.is_empty()
                && inner
                    .processed
                    .insert(self.scope.scoped_key(&event.idempotency_key))
            {
                report.keys_restored += 1;
            }
        }

        info!(
            target: "weft.engine",
            agent = %self.agent_id,
            applied = report.applied,
            keys = report.keys_restored,
            skipped = report.skipped,
            "recovery complete"
        );
        Ok(report)
    }

    /// SHA-256 over the canonical JSON of the adapter's state. A pure
    /// function of the ordered sequence of applied events.
    ///
    /// # Errors
    ///
    /// [`EngineError::Hash`] when the state cannot be serialized.
    pub async fn state_hash(&self) -> Result<String, EngineError> {
        let inner = self.inner.lock().await;
        Ok(state_hash(&inner.adapter.state())?)
    }

    /// Snapshot of the adapter's current state.
    pub async fn state(&self) -> AgentState {
        self.inner.lock().await.adapter.state()
    }

    /// Adapter-reported health.
    pub async fn health(&self) -> HealthStatus {
        self.inner.lock().await.adapter.health()
    }

    // -- pipeline pieces --

    async fn record_scope_violation(
        &self,
        inner: &mut EngineInner,
        envelope: &EventEnvelope,
    ) -> Result<Vec<EventEnvelope>, EngineError> {
        let attempted_key = Scope::of(envelope).scoped_key(&envelope.idempotency_key);
        if inner.processed.contains(&attempted_key) {
            // Redelivery of an already-audited violation.
            self.metrics.record_idempotency_hit();
            if let Some(store) = &self.store {
                let originals = store.get_by_idempotency_key(
                    &envelope.idempotency_key,
                    Some(&self.scope.tenant),
                    Some(&self.scope.workspace),
                )?;
                if !originals.is_empty() {
                    self.dispatch(&originals).await?;
                    return Ok(originals);
                }
            }
            return Ok(Vec::new());
        }

        let reason = format!(
            "event scope {} does not match engine scope {}",
            Scope::of(envelope),
            self.scope
        );
        warn!(
            target: "weft.engine",
            agent = %self.agent_id,
            event_id = %envelope.id,
            %reason,
            "security violation"
        );

        let violation = self.violation_envelope(envelope, &reason);

        // Audit trail first: the violation is a recorded outcome. An append
        // that collides means a prior delivery already audited it.
        if let Some(store) = &self.store {
            match store.append(&violation) {
                Ok(()) | Err(StoreError::Duplicate { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }

        // Mark the attempted scope's key so redeliveries short-circuit.
        inner.processed.insert(attempted_key);

        self.bus
            .publish(std::slice::from_ref(&violation))
            .await
            .map_err(EngineError::Publish)?;

        self.metrics.record_security_violation();
        Ok(vec![violation])
    }

    async fn record_conflict(
        &self,
        inner: &mut EngineInner,
        envelope: &EventEnvelope,
        current: u64,
        expected: u64,
        scoped_key: String,
    ) -> Result<Vec<EventEnvelope>, EngineError> {
        let reason = format!(
            "version mismatch for entity {}: expected {expected}, got {current}",
            envelope.entity_id.as_deref().unwrap_or("<none>")
        );
        debug!(
            target: "weft.engine",
            agent = %self.agent_id,
            event_id = %envelope.id,
            %reason,
            "concurrency conflict"
        );

        let conflict = self.conflict_envelope(envelope, current, &reason);

        // The conflict decision must survive a crash so retries replay the
        // identical outcome.
        if let Some(store) = &self.store {
            store.append(&conflict)?;
        }
        self.bus
            .publish(std::slice::from_ref(&conflict))
            .await
            .map_err(EngineError::Publish)?;

        inner.processed.insert(scoped_key);
        self.metrics.record_conflict();
        Ok(vec![conflict])
    }

    /// Duplicate delivery: return the originally persisted outputs and
    /// re-dispatch them. A crash between persist and publish leaves
    /// downstream unaware; redelivery is the moment to close that gap, and
    /// downstream handles its own duplicates.
    async fn replay_duplicate(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<Vec<EventEnvelope>, EngineError> {
        self.metrics.record_idempotency_hit();
        debug!(
            target: "weft.engine",
            agent = %self.agent_id,
            key = %envelope.idempotency_key,
            "duplicate idempotency key"
        );

        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };
        let originals = store.get_by_idempotency_key(
            &envelope.idempotency_key,
            Some(&envelope.tenant),
            Some(&envelope.workspace),
        )?;
        if !originals.is_empty() {
            debug!(
                target: "weft.engine",
                agent = %self.agent_id,
                count = originals.len(),
                "re-dispatching persisted outputs for duplicate"
            );
            self.dispatch(&originals).await?;
        }
        Ok(originals)
    }

    async fn dispatch(&self, outputs: &[EventEnvelope]) -> Result<(), EngineError> {
        let router = self.router.get();
        for out in outputs {
            if out.is_command() {
                match router {
                    Some(router) => {
                        router
                            .route(out.clone())
                            .await
                            .map_err(EngineError::Route)?;
                        self.metrics.record_command_routed();
                    }
                    None => {
                        warn!(
                            target: "weft.engine",
                            agent = %self.agent_id,
                            event_id = %out.id,
                            event_type = %out.event_type,
                            "no router installed, dropping command"
                        );
                    }
                }
            } else {
                self.bus
                    .publish(std::slice::from_ref(out))
                    .await
                    .map_err(EngineError::Publish)?;
                self.metrics.record_event_published();
            }
        }
        Ok(())
    }

    fn violation_envelope(&self, cmd: &EventEnvelope, reason: &str) -> EventEnvelope {
        EventEnvelope {
            id: format!("evt-{}-violation", cmd.id),
            ts: self.now_ms(),
            event_type: "evt.security.violation".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            trace_id: cmd.trace_id.clone(),
            span_id: cmd.span_id.clone(),
            tenant: self.scope.tenant.clone(),
            workspace: self.scope.workspace.clone(),
            actor: cmd.actor.clone(),
            source: Source::new(self.agent_id.clone(), "runtime"),
            security_context: cmd.security_context.clone(),
            idempotency_key: cmd.idempotency_key.clone(),
            payload: json!({
                "attempted_tenant": cmd.tenant,
                "attempted_workspace": cmd.workspace,
                "engine_tenant": self.scope.tenant,
                "engine_workspace": self.scope.workspace,
                "reason": reason,
            }),
            causation_id: Some(cmd.id.clone()),
            correlation_id: cmd.correlation_id.clone(),
            reply_to: None,
            entity_id: None,
            expected_version: None,
        }
    }

    fn conflict_envelope(
        &self,
        cmd: &EventEnvelope,
        current_version: u64,
        reason: &str,
    ) -> EventEnvelope {
        EventEnvelope {
            id: format!("evt-{}-conflict", cmd.id),
            ts: self.now_ms(),
            event_type: format!("evt.{}.conflict", self.agent_id),
            schema_version: SCHEMA_VERSION.to_string(),
            trace_id: cmd.trace_id.clone(),
            span_id: cmd.span_id.clone(),
            tenant: self.scope.tenant.clone(),
            workspace: self.scope.workspace.clone(),
            actor: cmd.actor.clone(),
            source: Source::new(self.agent_id.clone(), "runtime"),
            security_context: cmd.security_context.clone(),
            // The command's own key: a retried command deterministically
            // finds this conflict instead of succeeding on the second try.
            idempotency_key: cmd.idempotency_key.clone(),
            payload: json!({
                "entity_id": cmd.entity_id,
                "expected_version": cmd.expected_version,
                "current_version": current_version,
                "reason": reason,
            }),
            causation_id: Some(cmd.id.clone()),
            correlation_id: cmd.correlation_id.clone(),
            reply_to: None,
            entity_id: cmd.entity_id.clone(),
            expected_version: None,
        }
    }

    fn now_ms(&self) -> i64 {
        if self.deterministic {
            DETERMINISTIC_TS_MS
        } else {
            chrono::Utc::now().timestamp_millis()
        }
    }
}
