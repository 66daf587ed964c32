// SPDX-License-Identifier: MIT OR Apache-2.0
//! weft-telemetry
//!
//! `tracing` subscriber setup for binaries and tests. The runtime itself
//! never touches process-global state; whoever owns `main` calls [`init`]
//! once and everything under the `weft.*` targets flows to it.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use tracing_subscriber::EnvFilter;

/// Telemetry output options.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub default_filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_filter: "info,weft=debug".to_string(),
            json: false,
        }
    }
}

/// Install the global tracing subscriber with default options.
///
/// Safe to call more than once: later calls are no-ops, which keeps test
/// binaries that race on initialization honest.
pub fn init() {
    init_with(TelemetryConfig::default());
}

/// Install the global tracing subscriber with explicit options.
pub fn init_with(config: TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_filter.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        tracing::debug!(target: "weft.telemetry", "subscriber already installed");
    }
}
