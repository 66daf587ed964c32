// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tenant/workspace isolation.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::envelope::EventEnvelope;

/// The `(tenant, workspace)` pair bounding an engine's visible world.
///
/// Every engine owns exactly one scope; envelopes outside it are never handed
/// to the adapter, and every emitted envelope is rewritten to carry it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Scope {
    /// Tenant isolation key.
    pub tenant: String,
    /// Workspace isolation key.
    pub workspace: String,
}

impl Scope {
    /// Build a scope.
    pub fn new(tenant: impl Into<String>, workspace: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            workspace: workspace.into(),
        }
    }

    /// The scope an envelope claims to belong to.
    #[must_use]
    pub fn of(envelope: &EventEnvelope) -> Self {
        Self::new(envelope.tenant.clone(), envelope.workspace.clone())
    }

    /// `true` when the envelope carries exactly this scope.
    #[must_use]
    pub fn matches(&self, envelope: &EventEnvelope) -> bool {
        envelope.tenant == self.tenant && envelope.workspace == self.workspace
    }

    /// Qualify an idempotency key with this scope.
    ///
    /// The scoped key is the unit of de-duplication: the same producer key in
    /// two different scopes names two different requests.
    #[must_use]
    pub fn scoped_key(&self, idempotency_key: &str) -> String {
        format!("{}:{}:{}", self.tenant, self.workspace, idempotency_key)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.workspace)
    }
}
