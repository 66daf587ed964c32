// SPDX-License-Identifier: MIT OR Apache-2.0
//! weft-core
//!
//! The stable contract for agent-weft.
//!
//! Everything that crosses a process or crate boundary lives here: the
//! [`EventEnvelope`] wire type, the [`AgentAdapter`] decision contract, the
//! [`EventStore`]/[`EventBus`]/[`Router`] interfaces the engine depends on,
//! the [`Scope`] isolation unit, and the subject scheme used on the bus.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Pure decision contract implemented by every agent.
pub mod adapter;
/// The canonical wire envelope and its validation rules.
pub mod envelope;
/// Tenant/workspace isolation unit.
pub mod scope;
/// Agent state snapshot and health reporting.
pub mod state;
/// Append-only event store interface.
pub mod store;
/// Bus subject construction and filter matching.
pub mod subject;
/// Bus and router interfaces.
pub mod transport;

pub use adapter::AgentAdapter;
pub use envelope::{
    Actor, EnvelopeBuilder, EnvelopeError, EventEnvelope, PrincipalType, SecurityContext, Source,
};
pub use scope::Scope;
pub use state::{AgentState, HealthStatus};
pub use store::{EventStore, ReplayFilter, StoreError};
pub use transport::{EventBus, Router};

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Envelope schema version stamped on every message.
pub const SCHEMA_VERSION: &str = "1.0";

/// Errors from contract-level operations (serialization, hashing).
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON serialization or deserialization failed.
    #[error("failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Produce a deterministic JSON string for hashing.
///
/// Not a full JCS implementation, but stable for our types: object keys sort
/// because `serde_json::Map` is a `BTreeMap`, and numbers serialize
/// consistently.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if the value cannot be serialized.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, CodecError> {
    let v = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&v)?)
}

/// Compute the hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Compute the deterministic hash of an [`AgentState`] snapshot.
///
/// The hash is a pure function of the state contents: two states that
/// serialize to the same canonical JSON produce the same hash, regardless of
/// how they were reached.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if the state cannot be serialized.
pub fn state_hash(state: &AgentState) -> Result<String, CodecError> {
    let json = canonical_json(state)?;
    Ok(sha256_hex(json.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_object_keys() {
        let value = json!({"zeta": 1, "alpha": {"beta": 2, "aa": 3}});
        let canon = canonical_json(&value).unwrap();
        assert_eq!(canon, r#"{"alpha":{"aa":3,"beta":2},"zeta":1}"#);
    }

    #[test]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn state_hash_is_stable_across_identical_states() {
        let mut a = AgentState::default();
        a.version = 3;
        a.entity_versions.insert("order-1".into(), 2);
        a.data = json!({"count": 3});

        let mut b = AgentState::default();
        b.data = json!({"count": 3});
        b.entity_versions.insert("order-1".into(), 2);
        b.version = 3;

        assert_eq!(state_hash(&a).unwrap(), state_hash(&b).unwrap());
    }

    #[test]
    fn state_hash_changes_when_state_changes() {
        let a = AgentState::default();
        let mut b = AgentState::default();
        b.version = 1;
        assert_ne!(state_hash(&a).unwrap(), state_hash(&b).unwrap());
    }
}
