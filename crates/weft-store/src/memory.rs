// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory append-only log.

use std::collections::HashSet;
use std::sync::Mutex;

use weft_core::{EventEnvelope, EventStore, ReplayFilter, StoreError};

#[derive(Default)]
struct Inner {
    records: Vec<EventEnvelope>,
    ids: HashSet<String>,
}

/// An in-memory [`EventStore`] with the same ordering and uniqueness
/// semantics as the SQLite implementation.
///
/// Sequence numbers are 1-based insertion positions.
#[derive(Default)]
pub struct MemoryEventStore {
    inner: Mutex<Inner>,
}

impl MemoryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored envelopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("store lock poisoned").records.len()
    }

    /// `true` when nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventStore for MemoryEventStore {
    fn append(&self, envelope: &EventEnvelope) -> Result<(), StoreError> {
        self.append_batch(std::slice::from_ref(envelope))
    }

    fn append_batch(&self, envelopes: &[EventEnvelope]) -> Result<(), StoreError> {
        if envelopes.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock().expect("store lock poisoned");
        // All-or-nothing: refuse the whole batch before touching the log.
        let mut incoming = HashSet::new();
        for envelope in envelopes {
            if inner.ids.contains(&envelope.id) || !incoming.insert(envelope.id.as_str()) {
                return Err(StoreError::Duplicate {
                    id: envelope.id.clone(),
                });
            }
        }
        for envelope in envelopes {
            inner.ids.insert(envelope.id.clone());
            inner.records.push(envelope.clone());
        }
        Ok(())
    }

    fn replay(
        &self,
        from_seq: u64,
        filter: &ReplayFilter,
    ) -> Result<Vec<EventEnvelope>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner
            .records
            .iter()
            .skip(from_seq as usize)
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    fn get_by_idempotency_key(
        &self,
        key: &str,
        tenant: Option<&str>,
        workspace: Option<&str>,
    ) -> Result<Vec<EventEnvelope>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner
            .records
            .iter()
            .filter(|e| e.idempotency_key == key)
            .filter(|e| tenant.is_none_or(|t| t == e.tenant))
            .filter(|e| workspace.is_none_or(|w| w == e.workspace))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_core::{EnvelopeBuilder, Scope};

    fn env(id: &str, key: &str, tenant: &str) -> EventEnvelope {
        EnvelopeBuilder::new("evt.sample.stored")
            .id(id)
            .ts(1)
            .scope_parts(tenant, "main")
            .idempotency_key(key)
            .payload(json!({"n": id}))
            .build()
    }

    #[test]
    fn replay_preserves_insertion_order() {
        let store = MemoryEventStore::new();
        store.append(&env("a", "k1", "t")).unwrap();
        store.append(&env("b", "k2", "t")).unwrap();
        store.append(&env("c", "k3", "t")).unwrap();

        let all = store.replay(0, &ReplayFilter::default()).unwrap();
        let ids: Vec<_> = all.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn replay_honors_cursor_and_scope() {
        let store = MemoryEventStore::new();
        store.append(&env("a", "k1", "t1")).unwrap();
        store.append(&env("b", "k2", "t2")).unwrap();
        store.append(&env("c", "k3", "t1")).unwrap();

        let t1 = store
            .replay(0, &ReplayFilter::scoped(&Scope::new("t1", "main")))
            .unwrap();
        assert_eq!(t1.len(), 2);

        let after_first = store.replay(1, &ReplayFilter::default()).unwrap();
        let ids: Vec<_> = after_first.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["b", "c"]);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let store = MemoryEventStore::new();
        store.append(&env("a", "k1", "t")).unwrap();
        let err = store.append(&env("a", "k2", "t")).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { id } if id == "a"));
    }

    #[test]
    fn batch_with_colliding_id_stores_nothing() {
        let store = MemoryEventStore::new();
        store.append(&env("a", "k1", "t")).unwrap();

        let batch = [env("b", "k2", "t"), env("a", "k3", "t")];
        assert!(store.append_batch(&batch).is_err());
        assert_eq!(store.len(), 1, "batch must be all-or-nothing");
    }

    #[test]
    fn batch_with_internal_duplicate_stores_nothing() {
        let store = MemoryEventStore::new();
        let batch = [env("x", "k1", "t"), env("x", "k2", "t")];
        assert!(store.append_batch(&batch).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn idempotency_lookup_is_scope_aware() {
        let store = MemoryEventStore::new();
        store.append(&env("a", "shared", "t1")).unwrap();
        store.append(&env("b", "shared", "t2")).unwrap();

        let unscoped = store.get_by_idempotency_key("shared", None, None).unwrap();
        assert_eq!(unscoped.len(), 2);

        let scoped = store
            .get_by_idempotency_key("shared", Some("t1"), Some("main"))
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, "a");

        let missing = store
            .get_by_idempotency_key("shared", Some("t3"), None)
            .unwrap();
        assert!(missing.is_empty());
    }
}
