// SPDX-License-Identifier: MIT OR Apache-2.0
//! Append-only event store interface.

use crate::envelope::EventEnvelope;
use crate::scope::Scope;

/// Filter applied when replaying the log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayFilter {
    /// Restrict to this tenant.
    pub tenant: Option<String>,
    /// Restrict to this workspace.
    pub workspace: Option<String>,
}

impl ReplayFilter {
    /// Filter restricted to a full scope.
    #[must_use]
    pub fn scoped(scope: &Scope) -> Self {
        Self {
            tenant: Some(scope.tenant.clone()),
            workspace: Some(scope.workspace.clone()),
        }
    }

    /// `true` when the envelope passes the filter.
    #[must_use]
    pub fn matches(&self, envelope: &EventEnvelope) -> bool {
        self.tenant.as_deref().is_none_or(|t| t == envelope.tenant)
            && self
                .workspace
                .as_deref()
                .is_none_or(|w| w == envelope.workspace)
    }
}

/// Errors from event-store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An envelope with this id is already stored. Batch appends roll back
    /// entirely when any member collides.
    #[error("duplicate envelope id: {id}")]
    Duplicate {
        /// The colliding envelope id.
        id: String,
    },

    /// The storage backend failed.
    #[error("event store backend failure")]
    Backend(#[source] anyhow::Error),
}

/// A durable append-only log of envelopes, keyed by envelope id.
///
/// Insertion order is captured by a monotonically assigned sequence number;
/// [`replay`](Self::replay) returns records in that order.
pub trait EventStore: Send + Sync {
    /// Append a single envelope.
    ///
    /// # Errors
    ///
    /// [`StoreError::Duplicate`] when the id is already stored.
    fn append(&self, envelope: &EventEnvelope) -> Result<(), StoreError>;

    /// Append a batch atomically: either every envelope is stored, in order,
    /// or none is.
    ///
    /// # Errors
    ///
    /// [`StoreError::Duplicate`] when any id is already stored; the batch is
    /// rolled back.
    fn append_batch(&self, envelopes: &[EventEnvelope]) -> Result<(), StoreError>;

    /// Read stored envelopes with sequence greater than `from_seq`, in
    /// insertion order, restricted by `filter`.
    fn replay(&self, from_seq: u64, filter: &ReplayFilter)
    -> Result<Vec<EventEnvelope>, StoreError>;

    /// Look up stored envelopes by idempotency key, optionally restricted to
    /// a tenant and workspace.
    fn get_by_idempotency_key(
        &self,
        key: &str,
        tenant: Option<&str>,
        workspace: Option<&str>,
    ) -> Result<Vec<EventEnvelope>, StoreError>;
}
