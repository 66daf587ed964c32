// SPDX-License-Identifier: MIT OR Apache-2.0
//! SQLite-backed append-only log.
//!
//! One row per envelope. Structured sub-records (actor, source, security
//! context, payload) are stored as canonical JSON blobs; the implicit rowid
//! is the replay sequence.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, params};
use tracing::debug;
use weft_core::{
    Actor, EventEnvelope, EventStore, PrincipalType, ReplayFilter, SecurityContext, Source,
    StoreError,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    ts INTEGER NOT NULL,
    type TEXT NOT NULL,
    schema_version TEXT NOT NULL,
    trace_id TEXT NOT NULL,
    span_id TEXT NOT NULL,
    tenant TEXT NOT NULL,
    workspace TEXT NOT NULL,
    actor_json TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    idempotency_key TEXT NOT NULL,
    source_json TEXT NOT NULL,
    causation_id TEXT,
    correlation_id TEXT,
    reply_to TEXT,
    entity_id TEXT,
    expected_version INTEGER,
    security_context_json TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (cast(strftime('%s', 'now') as integer))
);
CREATE INDEX IF NOT EXISTS idx_events_ts ON events(ts);
CREATE INDEX IF NOT EXISTS idx_events_type ON events(type);
CREATE INDEX IF NOT EXISTS idx_events_idempotency ON events(idempotency_key);
CREATE INDEX IF NOT EXISTS idx_events_scope ON events(tenant, workspace);
";

const INSERT: &str = "
INSERT INTO events (
    id, ts, type, schema_version, trace_id, span_id, tenant, workspace,
    actor_json, payload_json, idempotency_key, source_json,
    causation_id, correlation_id, reply_to, entity_id, expected_version,
    security_context_json
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
";

const COLUMNS: &str = "
    id, ts, type, schema_version, trace_id, span_id, tenant, workspace,
    actor_json, payload_json, idempotency_key, source_json,
    causation_id, correlation_id, reply_to, entity_id, expected_version,
    security_context_json
";

/// A durable [`EventStore`] over a single SQLite database.
///
/// The connection is single-writer from the engine's view; a `Mutex`
/// serializes access within the process.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    /// Open (or create) a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when the database cannot be opened or
    /// the schema cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).map_err(backend)?;
        debug!(target: "weft.store", path = %path.as_ref().display(), "opened event store");
        Self::initialize(conn)
    }

    /// Open a private in-memory store, useful for tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5)).map_err(backend)?;
        conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
            .map_err(backend)?;
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert_one(tx: &rusqlite::Transaction<'_>, e: &EventEnvelope) -> Result<(), StoreError> {
        let actor_json = serde_json::to_string(&e.actor).map_err(encode)?;
        let payload_json = serde_json::to_string(&e.payload).map_err(encode)?;
        let source_json = serde_json::to_string(&e.source).map_err(encode)?;
        let security_json = serde_json::to_string(&e.security_context).map_err(encode)?;

        tx.execute(
            INSERT,
            params![
                e.id,
                e.ts,
                e.event_type,
                e.schema_version,
                e.trace_id,
                e.span_id,
                e.tenant,
                e.workspace,
                actor_json,
                payload_json,
                e.idempotency_key,
                source_json,
                e.causation_id,
                e.correlation_id,
                e.reply_to,
                e.entity_id,
                e.expected_version.map(|v| v as i64),
                security_json,
            ],
        )
        .map_err(|err| classify_insert_error(err, &e.id))?;
        Ok(())
    }
}

impl EventStore for SqliteEventStore {
    fn append(&self, envelope: &EventEnvelope) -> Result<(), StoreError> {
        self.append_batch(std::slice::from_ref(envelope))
    }

    fn append_batch(&self, envelopes: &[EventEnvelope]) -> Result<(), StoreError> {
        if envelopes.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().expect("store lock poisoned");
        let tx = conn.transaction().map_err(backend)?;
        for envelope in envelopes {
            Self::insert_one(&tx, envelope)?;
        }
        tx.commit().map_err(backend)?;
        Ok(())
    }

    fn replay(
        &self,
        from_seq: u64,
        filter: &ReplayFilter,
    ) -> Result<Vec<EventEnvelope>, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");

        let mut sql = format!("SELECT {COLUMNS} FROM events WHERE rowid > ?1");
        let mut values: Vec<rusqlite::types::Value> = vec![(from_seq as i64).into()];
        if let Some(tenant) = &filter.tenant {
            sql.push_str(&format!(" AND tenant = ?{}", values.len() + 1));
            values.push(tenant.clone().into());
        }
        if let Some(workspace) = &filter.workspace {
            sql.push_str(&format!(" AND workspace = ?{}", values.len() + 1));
            values.push(workspace.clone().into());
        }
        sql.push_str(" ORDER BY rowid ASC");

        query_envelopes(&conn, &sql, values)
    }

    fn get_by_idempotency_key(
        &self,
        key: &str,
        tenant: Option<&str>,
        workspace: Option<&str>,
    ) -> Result<Vec<EventEnvelope>, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");

        let mut sql = format!("SELECT {COLUMNS} FROM events WHERE idempotency_key = ?1");
        let mut values: Vec<rusqlite::types::Value> = vec![key.to_string().into()];
        if let Some(tenant) = tenant {
            sql.push_str(&format!(" AND tenant = ?{}", values.len() + 1));
            values.push(tenant.to_string().into());
        }
        if let Some(workspace) = workspace {
            sql.push_str(&format!(" AND workspace = ?{}", values.len() + 1));
            values.push(workspace.to_string().into());
        }
        sql.push_str(" ORDER BY rowid ASC");

        query_envelopes(&conn, &sql, values)
    }
}

fn query_envelopes(
    conn: &Connection,
    sql: &str,
    values: Vec<rusqlite::types::Value>,
) -> Result<Vec<EventEnvelope>, StoreError> {
    let mut stmt = conn.prepare(sql).map_err(backend)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(values), row_to_envelope)
        .map_err(backend)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(backend)?);
    }
    Ok(out)
}

fn row_to_envelope(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventEnvelope> {
    let actor_json: String = row.get(8)?;
    let payload_json: String = row.get(9)?;
    let source_json: String = row.get(11)?;
    let security_json: String = row.get(17)?;

    let actor: Actor = serde_json::from_str(&actor_json).unwrap_or_else(|_| Actor {
        id: "unknown".into(),
        role: "unknown".into(),
    });
    let source: Source = serde_json::from_str(&source_json).unwrap_or_else(|_| Source {
        agent: "unknown".into(),
        adapter: "unknown".into(),
    });
    let security_context: SecurityContext = serde_json::from_str(&security_json)
        .unwrap_or_else(|_| SecurityContext::new("unknown", PrincipalType::System));
    let payload: serde_json::Value =
        serde_json::from_str(&payload_json).unwrap_or(serde_json::Value::Null);

    Ok(EventEnvelope {
        id: row.get(0)?,
        ts: row.get(1)?,
        event_type: row.get(2)?,
        schema_version: row.get(3)?,
        trace_id: row.get(4)?,
        span_id: row.get(5)?,
        tenant: row.get(6)?,
        workspace: row.get(7)?,
        actor,
        payload,
        idempotency_key: row.get(10)?,
        source,
        causation_id: row.get(12)?,
        correlation_id: row.get(13)?,
        reply_to: row.get(14)?,
        entity_id: row.get(15)?,
        expected_version: row.get::<_, Option<i64>>(16)?.map(|v| v as u64),
        security_context,
    })
}

fn backend(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(anyhow::Error::new(err))
}

fn encode(err: serde_json::Error) -> StoreError {
    StoreError::Backend(anyhow::Error::new(err))
}

fn classify_insert_error(err: rusqlite::Error, id: &str) -> StoreError {
    if let rusqlite::Error::SqliteFailure(e, _) = &err
        && e.code == ErrorCode::ConstraintViolation
    {
        return StoreError::Duplicate { id: id.to_string() };
    }
    backend(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_core::{EnvelopeBuilder, Scope, StoreError};

    fn env(id: &str, key: &str, tenant: &str) -> EventEnvelope {
        EnvelopeBuilder::new("evt.sample.stored")
            .id(id)
            .ts(42)
            .trace("tr", "sp")
            .scope_parts(tenant, "main")
            .idempotency_key(key)
            .payload(json!({"n": id}))
            .entity_id("agg-1")
            .expected_version(3)
            .build()
    }

    #[test]
    fn roundtrips_all_columns() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        let original = env("a", "k1", "t");
        store.append(&original).unwrap();

        let back = store.replay(0, &ReplayFilter::default()).unwrap();
        assert_eq!(back, vec![original]);
    }

    #[test]
    fn duplicate_primary_key_is_reported() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        store.append(&env("a", "k1", "t")).unwrap();
        let err = store.append(&env("a", "k2", "t")).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { id } if id == "a"));
    }

    #[test]
    fn batch_rolls_back_on_collision() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        store.append(&env("a", "k1", "t")).unwrap();

        let batch = [env("b", "k2", "t"), env("a", "k3", "t")];
        assert!(store.append_batch(&batch).is_err());

        let all = store.replay(0, &ReplayFilter::default()).unwrap();
        assert_eq!(all.len(), 1, "failed batch must not be partially visible");
    }

    #[test]
    fn replay_filters_by_scope_and_cursor() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        store.append(&env("a", "k1", "t1")).unwrap();
        store.append(&env("b", "k2", "t2")).unwrap();
        store.append(&env("c", "k3", "t1")).unwrap();

        let t1 = store
            .replay(0, &ReplayFilter::scoped(&Scope::new("t1", "main")))
            .unwrap();
        let ids: Vec<_> = t1.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);

        let tail = store.replay(2, &ReplayFilter::default()).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].id, "c");
    }

    #[test]
    fn idempotency_lookup_is_scope_aware() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        store.append(&env("a", "shared", "t1")).unwrap();
        store.append(&env("b", "shared", "t2")).unwrap();

        let scoped = store
            .get_by_idempotency_key("shared", Some("t1"), Some("main"))
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, "a");

        let all = store.get_by_idempotency_key("shared", None, None).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");

        {
            let store = SqliteEventStore::open(&path).unwrap();
            store.append(&env("a", "k1", "t")).unwrap();
        }

        let store = SqliteEventStore::open(&path).unwrap();
        let all = store.replay(0, &ReplayFilter::default()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "a");
    }
}
