// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lease-based lock manager adapter.

use std::collections::BTreeMap;

use serde_json::{Value, json};
use tracing::debug;

use weft_core::{AgentAdapter, AgentState, EventEnvelope, Source};

const DEFAULT_TTL_MS: i64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Lease {
    owner_id: String,
    expires_at: i64,
    acquired_at: i64,
}

/// A system agent providing cooperative locking via leases.
///
/// Commands (matched on the verb suffix, so the agent can be mounted under
/// any name):
///
/// - `*.acquire {resource_id, owner_id, ttl_ms?}` → `evt.lock.acquired` or
///   `evt.lock.denied`
/// - `*.release {resource_id, owner_id}` → `evt.lock.released` or
///   `evt.lock.denied`
/// - `*.refresh {resource_id, owner_id, ttl_ms?}` → `evt.lock.acquired` or
///   `evt.lock.denied`
///
/// Expired leases are reaped by `tick`, which emits `evt.lock.expired`; the
/// lease itself is only dropped when that event is applied.
#[derive(Debug, Default)]
pub struct LockAdapter {
    locks: BTreeMap<String, Lease>,
    version: u64,
    last_event_id: Option<String>,
    updated_at: i64,
}

impl LockAdapter {
    /// Create an adapter with no leases held.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current owner of a resource, expiry ignored.
    #[must_use]
    pub fn owner_of(&self, resource_id: &str) -> Option<&str> {
        self.locks.get(resource_id).map(|l| l.owner_id.as_str())
    }

    fn handle_acquire(&self, cmd: &EventEnvelope) -> Vec<EventEnvelope> {
        let Some((resource_id, owner_id)) = lock_fields(&cmd.payload) else {
            debug!(target: "weft.adapters", event_id = %cmd.id, "acquire missing fields, ignoring");
            return Vec::new();
        };
        let ttl_ms = ttl_of(&cmd.payload);
        let now = cmd.ts;

        if let Some(lease) = self.locks.get(resource_id)
            && lease.expires_at > now
            && lease.owner_id != owner_id
        {
            return vec![self.denied(
                cmd,
                resource_id,
                owner_id,
                Some(&lease.owner_id),
                "already locked by another owner",
            )];
        }

        // Free, expired, or an idempotent re-acquire by the current owner.
        vec![self.event(
            cmd,
            "evt.lock.acquired",
            "acquired",
            json!({
                "resource_id": resource_id,
                "owner_id": owner_id,
                "expires_at": now + ttl_ms,
            }),
            resource_id,
        )]
    }

    fn handle_release(&self, cmd: &EventEnvelope) -> Vec<EventEnvelope> {
        let Some((resource_id, owner_id)) = lock_fields(&cmd.payload) else {
            return Vec::new();
        };

        match self.locks.get(resource_id) {
            Some(lease) if lease.owner_id != owner_id => vec![self.denied(
                cmd,
                resource_id,
                owner_id,
                Some(&lease.owner_id),
                "cannot release a lock owned by another",
            )],
            // Releasing a free lock succeeds: release is idempotent.
            _ => vec![self.event(
                cmd,
                "evt.lock.released",
                "released",
                json!({"resource_id": resource_id, "owner_id": owner_id}),
                resource_id,
            )],
        }
    }

    fn handle_refresh(&self, cmd: &EventEnvelope) -> Vec<EventEnvelope> {
        let Some((resource_id, owner_id)) = lock_fields(&cmd.payload) else {
            return Vec::new();
        };
        let ttl_ms = ttl_of(&cmd.payload);
        let now = cmd.ts;

        match self.locks.get(resource_id) {
            None => vec![self.denied(
                cmd,
                resource_id,
                owner_id,
                None,
                "lock not held or expired",
            )],
            Some(lease) if lease.expires_at <= now => vec![self.denied(
                cmd,
                resource_id,
                owner_id,
                None,
                "lock not held or expired",
            )],
            Some(lease) if lease.owner_id != owner_id => vec![self.denied(
                cmd,
                resource_id,
                owner_id,
                Some(&lease.owner_id),
                "lock held by another",
            )],
            Some(_) => vec![self.event(
                cmd,
                "evt.lock.acquired",
                "refreshed",
                json!({
                    "resource_id": resource_id,
                    "owner_id": owner_id,
                    "expires_at": now + ttl_ms,
                }),
                resource_id,
            )],
        }
    }

    fn event(
        &self,
        cmd: &EventEnvelope,
        event_type: &str,
        verb: &str,
        payload: Value,
        resource_id: &str,
    ) -> EventEnvelope {
        cmd.child(event_type)
            .id(format!("evt-{}-{verb}", cmd.id))
            .source(Source::new("lock-manager", "weft"))
            .payload(payload)
            .entity_id(resource_id)
            .build()
    }

    fn denied(
        &self,
        cmd: &EventEnvelope,
        resource_id: &str,
        requested_by: &str,
        current_owner: Option<&str>,
        reason: &str,
    ) -> EventEnvelope {
        self.event(
            cmd,
            "evt.lock.denied",
            "denied",
            json!({
                "resource_id": resource_id,
                "requested_by": requested_by,
                "current_owner": current_owner,
                "reason": reason,
            }),
            resource_id,
        )
    }
}

impl AgentAdapter for LockAdapter {
    fn receive(&self, envelope: &EventEnvelope) -> anyhow::Result<Vec<EventEnvelope>> {
        if !envelope.is_command() {
            return Ok(Vec::new());
        }
        let outputs = if envelope.event_type.ends_with(".acquire") {
            self.handle_acquire(envelope)
        } else if envelope.event_type.ends_with(".release") {
            self.handle_release(envelope)
        } else if envelope.event_type.ends_with(".refresh") {
            self.handle_refresh(envelope)
        } else {
            debug!(
                target: "weft.adapters",
                event_type = %envelope.event_type,
                "lock manager ignoring unknown command"
            );
            Vec::new()
        };
        Ok(outputs)
    }

    fn apply(&mut self, envelope: &EventEnvelope) {
        if !envelope.event_type.starts_with("evt.lock.") {
            return;
        }
        self.version += 1;
        self.last_event_id = Some(envelope.id.clone());
        self.updated_at = envelope.ts;

        let Some(resource_id) = envelope.payload.get("resource_id").and_then(Value::as_str)
        else {
            return;
        };
        match envelope.event_type.as_str() {
            "evt.lock.acquired" => {
                let owner_id = envelope
                    .payload
                    .get("owner_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let expires_at = envelope
                    .payload
                    .get("expires_at")
                    .and_then(Value::as_i64)
                    .unwrap_or(envelope.ts);
                self.locks.insert(
                    resource_id.to_string(),
                    Lease {
                        owner_id,
                        expires_at,
                        acquired_at: envelope.ts,
                    },
                );
            }
            "evt.lock.released" | "evt.lock.expired" => {
                self.locks.remove(resource_id);
            }
            _ => {}
        }
    }

    fn tick(&self, now: i64) -> anyhow::Result<Vec<EventEnvelope>> {
        let mut expired = Vec::new();
        for (resource_id, lease) in &self.locks {
            if lease.expires_at <= now {
                expired.push(
                    weft_core::EnvelopeBuilder::new("evt.lock.expired")
                        .id(format!("evt-expired-{resource_id}-{now}"))
                        .ts(now)
                        .actor(weft_core::Actor::new("system", "lock-manager"))
                        .source(Source::new("lock-manager", "weft"))
                        .idempotency_key(format!("lock-expired-{resource_id}-{now}"))
                        .payload(json!({"resource_id": resource_id, "owner_id": lease.owner_id}))
                        .entity_id(resource_id.clone())
                        .build(),
                );
            }
        }
        Ok(expired)
    }

    fn state(&self) -> AgentState {
        let locks: serde_json::Map<String, Value> = self
            .locks
            .iter()
            .map(|(resource, lease)| {
                (
                    resource.clone(),
                    json!({
                        "owner_id": lease.owner_id,
                        "expires_at": lease.expires_at,
                        "acquired_at": lease.acquired_at,
                    }),
                )
            })
            .collect();
        AgentState {
            version: self.version,
            entity_versions: BTreeMap::new(),
            data: json!({"locks": locks}),
            last_processed_event_id: self.last_event_id.clone(),
            updated_at: self.updated_at,
        }
    }
}

fn lock_fields(payload: &Value) -> Option<(&str, &str)> {
    let resource_id = payload.get("resource_id")?.as_str()?;
    let owner_id = payload.get("owner_id")?.as_str()?;
    Some((resource_id, owner_id))
}

fn ttl_of(payload: &Value) -> i64 {
    payload
        .get("ttl_ms")
        .and_then(Value::as_i64)
        .unwrap_or(DEFAULT_TTL_MS)
}
