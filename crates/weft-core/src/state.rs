// SPDX-License-Identifier: MIT OR Apache-2.0
//! Agent state snapshot and health reporting.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Point-in-time snapshot of an adapter's internal state.
///
/// The snapshot must be stable-serializable: hashing its canonical JSON must
/// yield the same digest for identical logical states. Maps are `BTreeMap`s
/// so key order never depends on insertion history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgentState {
    /// Monotonic counter incremented on every applied event.
    pub version: u64,
    /// Per-aggregate versions for optimistic concurrency. An absent id is
    /// version 0.
    #[serde(default)]
    pub entity_versions: BTreeMap<String, u64>,
    /// Adapter-defined state payload.
    pub data: serde_json::Value,
    /// Id of the last event applied, if any.
    #[serde(default)]
    pub last_processed_event_id: Option<String>,
    /// Logical timestamp of the last mutation, milliseconds since epoch.
    pub updated_at: i64,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            version: 0,
            entity_versions: BTreeMap::new(),
            data: serde_json::Value::Object(serde_json::Map::new()),
            last_processed_event_id: None,
            updated_at: 0,
        }
    }
}

impl AgentState {
    /// Current version of the given aggregate; 0 when unknown.
    #[must_use]
    pub fn entity_version(&self, entity_id: &str) -> u64 {
        self.entity_versions.get(entity_id).copied().unwrap_or(0)
    }
}

/// Adapter health as reported through the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Fully operational.
    Ready,
    /// Operational with reduced capacity.
    Degraded,
    /// Not operational.
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_version_defaults_to_zero() {
        let mut state = AgentState::default();
        assert_eq!(state.entity_version("missing"), 0);
        state.entity_versions.insert("a".into(), 4);
        assert_eq!(state.entity_version("a"), 4);
    }

    #[test]
    fn health_status_uses_screaming_names_on_the_wire() {
        assert_eq!(
            serde_json::to_value(HealthStatus::Ready).unwrap(),
            json!("READY")
        );
        assert_eq!(
            serde_json::from_value::<HealthStatus>(json!("DEGRADED")).unwrap(),
            HealthStatus::Degraded
        );
    }
}
