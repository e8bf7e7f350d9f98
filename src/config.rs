// bleu Source Code File
//
// Copyright 2026 Bleu Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project
// root for full license information.
//
// Configuration recognized at runtime construction. Nothing here reads a
// file or environment variable; construction is purely in-process, the
// host application wires values in explicitly.

use std::time::Duration;

use log::LevelFilter;

use crate::connection::ReconnectionPolicy;

/// Configuration for one [`crate::runtime::ActorSystem`] instance.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Pass scan-stream duplicates through instead of de-duplicating by
    /// peripheral id.
    pub allow_duplicates_in_scan: bool,
    /// Default deadline for `remoteCall`, overridable per call.
    pub default_rpc_timeout: Duration,
    /// Reconnection policy applied to peers without a per-peer override.
    pub default_reconnection_policy: ReconnectionPolicy,
    /// How long reassembly state for one `(peer, message-id)` is kept before
    /// being dropped silently.
    pub reassembly_timeout: Duration,
    /// Upper bound on concurrently pending calls for one runtime instance.
    pub max_pending_calls_per_runtime: usize,
    /// Advisory severity threshold for the host application's logger; this
    /// crate never installs a logger itself.
    pub logging_minimum_level: LevelFilter,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            allow_duplicates_in_scan: false,
            default_rpc_timeout: Duration::from_secs(30),
            default_reconnection_policy: ReconnectionPolicy::default(),
            reassembly_timeout: Duration::from_secs(30),
            max_pending_calls_per_runtime: 256,
            logging_minimum_level: LevelFilter::Info,
        }
    }
}

impl RuntimeConfig {
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }
}

/// Builder for [`RuntimeConfig`], following the same fluent pattern the rest
/// of the pack uses for reconnection policies and transport configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    inner: OptionalConfig,
}

#[derive(Debug, Clone, Default)]
struct OptionalConfig {
    allow_duplicates_in_scan: Option<bool>,
    default_rpc_timeout: Option<Duration>,
    default_reconnection_policy: Option<ReconnectionPolicy>,
    reassembly_timeout: Option<Duration>,
    max_pending_calls_per_runtime: Option<usize>,
    logging_minimum_level: Option<LevelFilter>,
}

impl RuntimeConfigBuilder {
    pub fn allow_duplicates_in_scan(mut self, value: bool) -> Self {
        self.inner.allow_duplicates_in_scan = Some(value);
        self
    }

    pub fn default_rpc_timeout(mut self, value: Duration) -> Self {
        self.inner.default_rpc_timeout = Some(value);
        self
    }

    pub fn default_reconnection_policy(mut self, value: ReconnectionPolicy) -> Self {
        self.inner.default_reconnection_policy = Some(value);
        self
    }

    pub fn reassembly_timeout(mut self, value: Duration) -> Self {
        self.inner.reassembly_timeout = Some(value);
        self
    }

    pub fn max_pending_calls_per_runtime(mut self, value: usize) -> Self {
        self.inner.max_pending_calls_per_runtime = Some(value);
        self
    }

    pub fn logging_minimum_level(mut self, value: LevelFilter) -> Self {
        self.inner.logging_minimum_level = Some(value);
        self
    }

    pub fn build(self) -> RuntimeConfig {
        let defaults = RuntimeConfig::default();
        RuntimeConfig {
            allow_duplicates_in_scan: self
                .inner
                .allow_duplicates_in_scan
                .unwrap_or(defaults.allow_duplicates_in_scan),
            default_rpc_timeout: self
                .inner
                .default_rpc_timeout
                .unwrap_or(defaults.default_rpc_timeout),
            default_reconnection_policy: self
                .inner
                .default_reconnection_policy
                .unwrap_or(defaults.default_reconnection_policy),
            reassembly_timeout: self
                .inner
                .reassembly_timeout
                .unwrap_or(defaults.reassembly_timeout),
            max_pending_calls_per_runtime: self
                .inner
                .max_pending_calls_per_runtime
                .unwrap_or(defaults.max_pending_calls_per_runtime),
            logging_minimum_level: self
                .inner
                .logging_minimum_level
                .unwrap_or(defaults.logging_minimum_level),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.default_rpc_timeout, Duration::from_secs(30));
        assert_eq!(cfg.reassembly_timeout, Duration::from_secs(30));
    }

    #[test]
    fn builder_overrides_only_what_is_set() {
        let cfg = RuntimeConfig::builder()
            .default_rpc_timeout(Duration::from_millis(500))
            .build();
        assert_eq!(cfg.default_rpc_timeout, Duration::from_millis(500));
        assert_eq!(cfg.reassembly_timeout, Duration::from_secs(30));
    }
}
