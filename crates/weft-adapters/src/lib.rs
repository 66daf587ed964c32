// SPDX-License-Identifier: MIT OR Apache-2.0
//! weft-adapters
//!
//! System adapters shipped with the runtime:
//!
//! - [`LockAdapter`]: cooperative lease-based locking with expiry driven by
//!   the engine's `tick`.
//! - [`KvAdapter`]: an entity-versioned key/value store that exercises the
//!   optimistic-concurrency machinery end to end.
//!
//! Both follow the adapter purity rules: decisions in `receive`/`tick` never
//! touch state, and every mutation flows through `apply` after the engine
//! has persisted the outcome.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Entity-versioned key/value store adapter.
pub mod kv;
/// Lease-based lock manager adapter.
pub mod lock;

pub use kv::KvAdapter;
pub use lock::LockAdapter;
