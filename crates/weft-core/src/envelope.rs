// SPDX-License-Identifier: MIT OR Apache-2.0
//! The canonical event envelope.
//!
//! Every message on the bus (commands, events, outcomes) is an
//! [`EventEnvelope`]. Envelopes are immutable once created; replay uses the
//! stored bytes. Consumption is lenient (unknown fields are tolerated) but
//! the mandatory field set and the [`PrincipalType`] enum are enforced at
//! deserialization time.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::SCHEMA_VERSION;

/// The acting principal recorded on an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Actor {
    /// Stable actor identifier.
    pub id: String,
    /// Role the actor held when producing the envelope.
    pub role: String,
}

impl Actor {
    /// Build an actor record.
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
        }
    }
}

/// Which agent and adapter produced an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Source {
    /// Producing agent name.
    pub agent: String,
    /// Adapter implementation inside that agent.
    pub adapter: String,
}

impl Source {
    /// Build a source record.
    pub fn new(agent: impl Into<String>, adapter: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            adapter: adapter.into(),
        }
    }
}

/// Closed set of principal kinds accepted at ingest.
///
/// Any other value on the wire fails deserialization, which is the ingest
/// validation the runtime relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalType {
    /// A backing service.
    Service,
    /// Another agent.
    Agent,
    /// A human user.
    User,
    /// The runtime itself.
    System,
}

/// Security context propagated with every envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SecurityContext {
    /// Principal identifier.
    pub principal_id: String,
    /// Principal kind.
    pub principal_type: PrincipalType,
}

impl SecurityContext {
    /// Build a security context.
    pub fn new(principal_id: impl Into<String>, principal_type: PrincipalType) -> Self {
        Self {
            principal_id: principal_id.into(),
            principal_type,
        }
    }
}

/// The canonical self-describing message record.
///
/// `type` doubles as the routing key: `cmd.<agent>.<verb>` for commands,
/// `evt.<domain>.<name>` for events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EventEnvelope {
    /// Globally unique envelope identifier (stable under deterministic mode).
    pub id: String,

    /// Logical timestamp, milliseconds since epoch. Injected by the runtime.
    pub ts: i64,

    /// Dotted message type and routing key.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Envelope schema version.
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    /// Distributed trace correlation.
    pub trace_id: String,
    /// Span within the trace.
    pub span_id: String,

    /// Tenant isolation key. Must match the receiving engine.
    pub tenant: String,
    /// Workspace isolation key. Must match the receiving engine.
    pub workspace: String,

    /// Who produced the envelope.
    pub actor: Actor,
    /// Which agent/adapter produced the envelope.
    pub source: Source,
    /// Security principal propagated through the saga.
    pub security_context: SecurityContext,

    /// De-duplication key; names one request within a scope.
    pub idempotency_key: String,

    /// Free-form business payload.
    pub payload: serde_json::Value,

    /// Id of the envelope that produced this one.
    #[serde(default)]
    pub causation_id: Option<String>,
    /// Saga / conversation identifier.
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Optional response subject.
    #[serde(default)]
    pub reply_to: Option<String>,

    /// Target aggregate for optimistic concurrency control.
    #[serde(default)]
    pub entity_id: Option<String>,
    /// Expected aggregate version; mismatch yields a conflict outcome.
    #[serde(default)]
    pub expected_version: Option<u64>,
}

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

/// Validation failure for an in-process constructed envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// One or more mandatory fields are missing or empty.
    #[error("envelope validation failed: {reasons:?}")]
    Invalid {
        /// Every problem found (accumulated, not short-circuited).
        reasons: Vec<String>,
    },
}

impl EventEnvelope {
    /// `true` when the envelope is a command (`cmd.` routing prefix).
    #[must_use]
    pub fn is_command(&self) -> bool {
        self.event_type.starts_with("cmd.")
    }

    /// Check the mandatory field set.
    ///
    /// Deserialization already rejects missing fields and unknown principal
    /// types; this catches empty strings in envelopes built in-process.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Invalid`] listing every empty mandatory field.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        let mut reasons = Vec::new();
        let mandatory = [
            ("id", &self.id),
            ("type", &self.event_type),
            ("tenant", &self.tenant),
            ("workspace", &self.workspace),
            ("idempotency_key", &self.idempotency_key),
            ("actor.id", &self.actor.id),
            ("actor.role", &self.actor.role),
            ("source.agent", &self.source.agent),
            ("source.adapter", &self.source.adapter),
            (
                "security_context.principal_id",
                &self.security_context.principal_id,
            ),
        ];
        for (field, value) in mandatory {
            if value.is_empty() {
                reasons.push(format!("{field} must not be empty"));
            }
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(EnvelopeError::Invalid { reasons })
        }
    }

    /// Start a builder for an envelope derived from this one.
    ///
    /// The child inherits the parent's timestamp, trace context, scope,
    /// actor, security context and idempotency key, and points its
    /// `causation_id` at the parent. Adapters use this to answer commands.
    #[must_use]
    pub fn child(&self, event_type: impl Into<String>) -> EnvelopeBuilder {
        EnvelopeBuilder::new(event_type)
            .ts(self.ts)
            .trace(self.trace_id.clone(), self.span_id.clone())
            .scope_parts(self.tenant.clone(), self.workspace.clone())
            .actor(self.actor.clone())
            .security_context(self.security_context.clone())
            .idempotency_key(self.idempotency_key.clone())
            .causation_id(self.id.clone())
            .maybe_correlation_id(self.correlation_id.clone())
    }
}

/// Ergonomic constructor for [`EventEnvelope`]s.
///
/// A fresh builder carries a random v4 id; producers that need stable,
/// derivable ids (deterministic runs, envelopes derived from a parent) set
/// one explicitly. Other unset fields fall back to neutral defaults; `build`
/// never fails, so call [`EventEnvelope::validate`] when the envelope comes
/// from untrusted code.
#[derive(Debug)]
pub struct EnvelopeBuilder {
    id: String,
    ts: i64,
    event_type: String,
    trace_id: String,
    span_id: String,
    tenant: String,
    workspace: String,
    actor: Actor,
    source: Source,
    security_context: SecurityContext,
    idempotency_key: String,
    payload: serde_json::Value,
    causation_id: Option<String>,
    correlation_id: Option<String>,
    reply_to: Option<String>,
    entity_id: Option<String>,
    expected_version: Option<u64>,
}

impl EnvelopeBuilder {
    /// Start a builder for the given message type.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ts: 0,
            event_type: event_type.into(),
            trace_id: String::new(),
            span_id: String::new(),
            tenant: "default".to_string(),
            workspace: "default".to_string(),
            actor: Actor::new("system", "runtime"),
            source: Source::new("unknown", "unknown"),
            security_context: SecurityContext::new("system", PrincipalType::System),
            idempotency_key: String::new(),
            payload: serde_json::Value::Object(serde_json::Map::new()),
            causation_id: None,
            correlation_id: None,
            reply_to: None,
            entity_id: None,
            expected_version: None,
        }
    }

    /// Set the envelope id.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the logical timestamp in milliseconds.
    #[must_use]
    pub fn ts(mut self, ts: i64) -> Self {
        self.ts = ts;
        self
    }

    /// Set the trace/span correlation ids.
    #[must_use]
    pub fn trace(mut self, trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self.span_id = span_id.into();
        self
    }

    /// Set tenant and workspace from a [`Scope`](crate::Scope).
    #[must_use]
    pub fn scope(self, scope: &crate::Scope) -> Self {
        self.scope_parts(scope.tenant.clone(), scope.workspace.clone())
    }

    /// Set tenant and workspace explicitly.
    #[must_use]
    pub fn scope_parts(mut self, tenant: impl Into<String>, workspace: impl Into<String>) -> Self {
        self.tenant = tenant.into();
        self.workspace = workspace.into();
        self
    }

    /// Set the actor record.
    #[must_use]
    pub fn actor(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }

    /// Set the source record.
    #[must_use]
    pub fn source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    /// Set the security context.
    #[must_use]
    pub fn security_context(mut self, ctx: SecurityContext) -> Self {
        self.security_context = ctx;
        self
    }

    /// Set the idempotency key.
    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = key.into();
        self
    }

    /// Set the business payload.
    #[must_use]
    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set the causing envelope id.
    #[must_use]
    pub fn causation_id(mut self, id: impl Into<String>) -> Self {
        self.causation_id = Some(id.into());
        self
    }

    /// Set the saga correlation id.
    #[must_use]
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set the saga correlation id from an optional value.
    #[must_use]
    pub fn maybe_correlation_id(mut self, id: Option<String>) -> Self {
        self.correlation_id = id;
        self
    }

    /// Set the reply subject.
    #[must_use]
    pub fn reply_to(mut self, subject: impl Into<String>) -> Self {
        self.reply_to = Some(subject.into());
        self
    }

    /// Set the target aggregate id for concurrency control.
    #[must_use]
    pub fn entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    /// Set the expected aggregate version.
    #[must_use]
    pub fn expected_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    /// Finish building the envelope.
    #[must_use]
    pub fn build(self) -> EventEnvelope {
        EventEnvelope {
            id: self.id,
            ts: self.ts,
            event_type: self.event_type,
            schema_version: SCHEMA_VERSION.to_string(),
            trace_id: self.trace_id,
            span_id: self.span_id,
            tenant: self.tenant,
            workspace: self.workspace,
            actor: self.actor,
            source: self.source,
            security_context: self.security_context,
            idempotency_key: self.idempotency_key,
            payload: self.payload,
            causation_id: self.causation_id,
            correlation_id: self.correlation_id,
            reply_to: self.reply_to,
            entity_id: self.entity_id,
            expected_version: self.expected_version,
        }
    }
}
