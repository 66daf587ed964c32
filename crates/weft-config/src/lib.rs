// SPDX-License-Identifier: MIT OR Apache-2.0
//! weft-config
//!
//! Runtime settings for agent-weft deployments: engine scope, consumer
//! delivery parameters, and store location, loadable from TOML with
//! accumulated semantic validation.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use weft_core::subject::is_valid_token;

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found or unreadable.
    #[error("config file unreadable: {path}")]
    Unreadable {
        /// Path that was requested.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    Parse {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    Validation {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Engine-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Tenant the engine is scoped to.
    pub tenant: String,
    /// Workspace the engine is scoped to.
    pub workspace: String,
    /// Freeze the clock and derive ids for reproducible runs.
    pub deterministic: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tenant: "default".to_string(),
            workspace: "default".to_string(),
            deterministic: false,
        }
    }
}

impl EngineSettings {
    /// The engine scope these settings describe.
    #[must_use]
    pub fn scope(&self) -> weft_core::Scope {
        weft_core::Scope::new(self.tenant.clone(), self.workspace.clone())
    }
}

/// Durable-consumer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    /// Deliveries after which a message is dead-lettered.
    pub max_deliver: u32,
    /// Seconds a delivery may stay unacknowledged.
    pub ack_wait_secs: u64,
    /// Progressive redelivery backoff in seconds; the last entry repeats.
    pub backoff_secs: Vec<u64>,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            max_deliver: 5,
            ack_wait_secs: 30,
            backoff_secs: vec![1, 5, 10, 30],
        }
    }
}

impl ConsumerSettings {
    /// Ack wait as a [`Duration`].
    #[must_use]
    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_secs)
    }

    /// Backoff sequence as [`Duration`]s.
    #[must_use]
    pub fn backoff(&self) -> Vec<Duration> {
        self.backoff_secs
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect()
    }
}

/// Event-store settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// SQLite database path. `None` selects the in-memory store.
    pub path: Option<PathBuf>,
}

/// Top-level runtime settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeftSettings {
    /// Engine scope and determinism.
    pub engine: EngineSettings,
    /// Durable consumer delivery parameters.
    pub consumer: ConsumerSettings,
    /// Event store location.
    pub store: StoreSettings,
}

impl WeftSettings {
    /// Load and validate settings from a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Unreadable`], [`ConfigError::Parse`], or
    /// [`ConfigError::Validation`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    /// Parse and validate settings from a TOML string.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] or [`ConfigError::Validation`].
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check semantic constraints, accumulating every problem found.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Validation`] listing all failures.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut reasons = Vec::new();
        if !is_valid_token(&self.engine.tenant) {
            reasons.push(format!(
                "engine.tenant {:?} is not a valid subject token",
                self.engine.tenant
            ));
        }
        if !is_valid_token(&self.engine.workspace) {
            reasons.push(format!(
                "engine.workspace {:?} is not a valid subject token",
                self.engine.workspace
            ));
        }
        if self.consumer.max_deliver == 0 {
            reasons.push("consumer.max_deliver must be at least 1".to_string());
        }
        if self.consumer.ack_wait_secs == 0 {
            reasons.push("consumer.ack_wait_secs must be positive".to_string());
        }
        if self.consumer.backoff_secs.is_empty() {
            reasons.push("consumer.backoff_secs must not be empty".to_string());
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation { reasons })
        }
    }
}
