// SPDX-License-Identifier: MIT OR Apache-2.0
//! Entity-versioned key/value store adapter.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use weft_core::{AgentAdapter, AgentState, EventEnvelope, Source};

#[derive(Debug, Clone, PartialEq)]
struct Entity {
    version: u64,
    data: Value,
}

/// A generic entity store managed through commands.
///
/// - `cmd.<agent>.put {id?, data}` (or `entity_id` on the envelope) →
///   `evt.<agent>.put` carrying the next entity version
/// - `cmd.<agent>.delete {id?}` → `evt.<agent>.deleted` (idempotent)
/// - anything else → `evt.error {code, message, context}`
///
/// The adapter maintains `entity_versions`, so commands carrying
/// `expected_version` get real optimistic-concurrency checks from the
/// engine before `receive` ever runs.
#[derive(Debug)]
pub struct KvAdapter {
    agent_id: String,
    entities: BTreeMap<String, Entity>,
    version: u64,
    last_event_id: Option<String>,
    updated_at: i64,
}

impl KvAdapter {
    /// Create a store adapter mounted under the given agent name.
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            entities: BTreeMap::new(),
            version: 0,
            last_event_id: None,
            updated_at: 0,
        }
    }

    /// Current data for an entity.
    #[must_use]
    pub fn get(&self, entity_id: &str) -> Option<&Value> {
        self.entities.get(entity_id).map(|e| &e.data)
    }

    /// Number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// `true` when no entities exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn entity_id_of(cmd: &EventEnvelope) -> Option<String> {
        cmd.entity_id.clone().or_else(|| {
            cmd.payload
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
    }

    fn event(&self, cmd: &EventEnvelope, verb: &str, payload: Value) -> EventEnvelope {
        cmd.child(format!("evt.{}.{verb}", self.agent_id))
            .id(format!("{}-{verb}", cmd.id))
            .source(Source::new(self.agent_id.clone(), "kv"))
            .payload(payload)
            .build()
    }

    fn error(&self, cmd: &EventEnvelope, code: &str, message: &str) -> EventEnvelope {
        cmd.child("evt.error")
            .id(format!("{}-error", cmd.id))
            .source(Source::new(self.agent_id.clone(), "kv"))
            .payload(json!({
                "code": code,
                "message": message,
                "context": {"command": cmd.event_type},
            }))
            .build()
    }
}

impl AgentAdapter for KvAdapter {
    fn receive(&self, envelope: &EventEnvelope) -> anyhow::Result<Vec<EventEnvelope>> {
        if !envelope.is_command() {
            return Ok(Vec::new());
        }

        if envelope.event_type.ends_with(".put") {
            let Some(id) = Self::entity_id_of(envelope) else {
                return Ok(vec![self.error(
                    envelope,
                    "validation_error",
                    "missing entity id",
                )]);
            };
            let next_version = self.entities.get(&id).map(|e| e.version).unwrap_or(0) + 1;
            let data = envelope
                .payload
                .get("data")
                .cloned()
                .unwrap_or_else(|| json!({}));
            let mut out = self.event(
                envelope,
                "put",
                json!({"id": id, "entity_version": next_version, "data": data}),
            );
            out.entity_id = Some(id);
            return Ok(vec![out]);
        }

        if envelope.event_type.ends_with(".delete") {
            let Some(id) = Self::entity_id_of(envelope) else {
                return Ok(vec![self.error(
                    envelope,
                    "validation_error",
                    "missing entity id",
                )]);
            };
            // Deleting a missing entity still confirms: delete is idempotent.
            let mut out = self.event(envelope, "deleted", json!({"id": id}));
            out.entity_id = Some(id);
            return Ok(vec![out]);
        }

        Ok(vec![self.error(
            envelope,
            "unsupported_command",
            "command not supported by this store",
        )])
    }

    fn apply(&mut self, envelope: &EventEnvelope) {
        let put_type = format!("evt.{}.put", self.agent_id);
        let deleted_type = format!("evt.{}.deleted", self.agent_id);
        if envelope.event_type != put_type && envelope.event_type != deleted_type {
            return;
        }
        let Some(id) = envelope.payload.get("id").and_then(Value::as_str) else {
            return;
        };

        self.version += 1;
        self.last_event_id = Some(envelope.id.clone());
        self.updated_at = envelope.ts;

        if envelope.event_type == put_type {
            let entity_version = envelope
                .payload
                .get("entity_version")
                .and_then(Value::as_u64)
                .unwrap_or(1);
            let data = envelope
                .payload
                .get("data")
                .cloned()
                .unwrap_or_else(|| json!({}));
            self.entities.insert(
                id.to_string(),
                Entity {
                    version: entity_version,
                    data,
                },
            );
        } else {
            self.entities.remove(id);
        }
    }

    fn state(&self) -> AgentState {
        let entity_versions: BTreeMap<String, u64> = self
            .entities
            .iter()
            .map(|(id, e)| (id.clone(), e.version))
            .collect();
        let entities: serde_json::Map<String, Value> = self
            .entities
            .iter()
            .map(|(id, e)| (id.clone(), json!({"version": e.version, "data": e.data})))
            .collect();
        AgentState {
            version: self.version,
            entity_versions,
            data: json!({"entities": entities, "count": self.entities.len()}),
            last_processed_event_id: self.last_event_id.clone(),
            updated_at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::EnvelopeBuilder;

    fn put(id: &str, entity: &str, data: Value) -> EventEnvelope {
        EnvelopeBuilder::new("cmd.registry.put")
            .id(id)
            .ts(100)
            .scope_parts("t", "w")
            .idempotency_key(format!("key-{id}"))
            .entity_id(entity)
            .payload(json!({"data": data}))
            .build()
    }

    fn apply_all(adapter: &mut KvAdapter, events: &[EventEnvelope]) {
        for event in events {
            adapter.apply(event);
        }
    }

    #[test]
    fn put_creates_with_version_one() {
        let adapter = KvAdapter::new("registry");
        let out = adapter.receive(&put("c1", "user-1", json!({"name": "ada"}))).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].event_type, "evt.registry.put");
        assert_eq!(out[0].payload["entity_version"], 1);
        assert_eq!(out[0].entity_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn put_increments_the_entity_version() {
        let mut adapter = KvAdapter::new("registry");
        let first = adapter.receive(&put("c1", "user-1", json!({"n": 1}))).unwrap();
        apply_all(&mut adapter, &first);

        let second = adapter.receive(&put("c2", "user-1", json!({"n": 2}))).unwrap();
        assert_eq!(second[0].payload["entity_version"], 2);

        apply_all(&mut adapter, &second);
        assert_eq!(adapter.state().entity_version("user-1"), 2);
        assert_eq!(adapter.get("user-1").unwrap()["n"], 2);
    }

    #[test]
    fn delete_is_idempotent_and_clears_versions() {
        let mut adapter = KvAdapter::new("registry");
        let created = adapter.receive(&put("c1", "user-1", json!({}))).unwrap();
        apply_all(&mut adapter, &created);

        let deleted = adapter
            .receive(
                &EnvelopeBuilder::new("cmd.registry.delete")
                    .id("c2")
                    .ts(101)
                    .scope_parts("t", "w")
                    .idempotency_key("key-c2")
                    .entity_id("user-1")
                    .build(),
            )
            .unwrap();
        assert_eq!(deleted[0].event_type, "evt.registry.deleted");
        apply_all(&mut adapter, &deleted);
        assert!(adapter.is_empty());
        assert_eq!(adapter.state().entity_version("user-1"), 0);

        // Deleting again still confirms.
        let again = adapter
            .receive(
                &EnvelopeBuilder::new("cmd.registry.delete")
                    .id("c3")
                    .ts(102)
                    .scope_parts("t", "w")
                    .idempotency_key("key-c3")
                    .entity_id("user-1")
                    .build(),
            )
            .unwrap();
        assert_eq!(again[0].event_type, "evt.registry.deleted");
    }

    #[test]
    fn missing_entity_id_yields_a_domain_error_event() {
        let adapter = KvAdapter::new("registry");
        let cmd = EnvelopeBuilder::new("cmd.registry.put")
            .id("c1")
            .ts(100)
            .scope_parts("t", "w")
            .idempotency_key("key-c1")
            .build();
        let out = adapter.receive(&cmd).unwrap();
        assert_eq!(out[0].event_type, "evt.error");
        assert_eq!(out[0].payload["code"], "validation_error");
    }

    #[test]
    fn unknown_verbs_yield_a_domain_error_event() {
        let adapter = KvAdapter::new("registry");
        let cmd = EnvelopeBuilder::new("cmd.registry.frobnicate")
            .id("c1")
            .ts(100)
            .scope_parts("t", "w")
            .idempotency_key("key-c1")
            .build();
        let out = adapter.receive(&cmd).unwrap();
        assert_eq!(out[0].event_type, "evt.error");
        assert_eq!(out[0].payload["code"], "unsupported_command");
    }

    #[test]
    fn foreign_events_do_not_touch_state() {
        let mut adapter = KvAdapter::new("registry");
        adapter.apply(
            &EnvelopeBuilder::new("evt.other.put")
                .id("x")
                .ts(1)
                .payload(json!({"id": "user-1", "entity_version": 9}))
                .build(),
        );
        assert!(adapter.is_empty());
        assert_eq!(adapter.state().version, 0);
    }

    #[test]
    fn receive_is_pure() {
        let adapter = KvAdapter::new("registry");
        let cmd = put("c1", "user-1", json!({"n": 1}));
        assert_eq!(adapter.receive(&cmd).unwrap(), adapter.receive(&cmd).unwrap());
        assert_eq!(adapter.state(), KvAdapter::new("registry").state());
    }
}
