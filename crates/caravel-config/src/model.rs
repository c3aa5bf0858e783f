// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Caravel migration toolkit.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level Caravel configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable
/// overrides. Instance credentials have no defaults and must be supplied.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CaravelConfig {
    /// The instance records are migrated from.
    #[serde(default)]
    pub source: InstanceConfig,

    /// The instance records are migrated to.
    #[serde(default)]
    pub target: InstanceConfig,

    /// Pipeline tunables.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Static resolver overrides applied before any cache or search logic.
    #[serde(default)]
    pub overrides: OverridesConfig,
}

/// Location and credentials of one instance.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceConfig {
    /// Base URL of the instance, e.g. `https://acme.example-support.com`.
    #[serde(default)]
    pub base_url: String,

    /// Account email for HTTP basic authentication.
    #[serde(default)]
    pub email: String,

    /// Account password for HTTP basic authentication.
    #[serde(default)]
    pub password: String,
}

impl InstanceConfig {
    /// Hostname portion of `base_url`, used to recognize instance-hosted
    /// attachment URLs embedded in comment bodies.
    pub fn host(&self) -> &str {
        let trimmed = self.base_url.trim_end_matches('/');
        let without_scheme = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .unwrap_or(trimmed);
        without_scheme.split('/').next().unwrap_or(without_scheme)
    }
}

/// Tunables for the ticket migration pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationConfig {
    /// Display title of the target-side custom field that stamps migrated
    /// tickets with their source id. Exactly one field with this title must
    /// exist on the target schema.
    #[serde(default = "default_marker_title")]
    pub original_id_field_title: String,

    /// Unix timestamp the incremental ticket feed starts from.
    #[serde(default = "default_start_time")]
    pub start_time: i64,

    /// Path of the append-only per-batch error log.
    #[serde(default = "default_error_log")]
    pub error_log: String,

    /// Emit a progress line every this many processed tickets.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Seconds to wait before the single retry of a transient import failure.
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,

    /// Seconds to wait after creating a missing problem parent, so the
    /// target's search index catches up before the child commits.
    #[serde(default = "default_problem_link_pause_secs")]
    pub problem_link_pause_secs: u64,

    /// Former hostname of the source instance. Attachment URLs on this host
    /// are rewritten to the current source host before download.
    #[serde(default)]
    pub alt_source_host: Option<String>,

    /// Help-center hostname whose attachment URLs are also re-hosted.
    #[serde(default)]
    pub helpcenter_host: Option<String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            original_id_field_title: default_marker_title(),
            start_time: default_start_time(),
            error_log: default_error_log(),
            progress_interval: default_progress_interval(),
            retry_backoff_secs: default_retry_backoff_secs(),
            problem_link_pause_secs: default_problem_link_pause_secs(),
            alt_source_host: None,
            helpcenter_host: None,
        }
    }
}

fn default_marker_title() -> String {
    "Original Id".to_string()
}

fn default_start_time() -> i64 {
    // 2010-01-01T00:00:00Z
    1_262_304_000
}

fn default_error_log() -> String {
    "ticket_errors.log".to_string()
}

fn default_progress_interval() -> u64 {
    100
}

fn default_retry_backoff_secs() -> u64 {
    60
}

fn default_problem_link_pause_secs() -> u64 {
    60
}

/// Fixed source-id to target-id mappings, keyed by the string form of the
/// source id. Seeded into the resolver cache at startup so they win over
/// any search.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OverridesConfig {
    /// Legacy brand ids with no name-matchable counterpart on the target.
    #[serde(default)]
    pub brands: HashMap<String, u64>,

    /// Legacy ticket-form ids with no name-matchable counterpart.
    #[serde(default)]
    pub ticket_forms: HashMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = CaravelConfig::default();
        assert_eq!(config.migration.original_id_field_title, "Original Id");
        assert_eq!(config.migration.start_time, 1_262_304_000);
        assert_eq!(config.migration.progress_interval, 100);
        assert!(config.overrides.brands.is_empty());
    }

    #[test]
    fn host_strips_scheme_and_trailing_slash() {
        let instance = InstanceConfig {
            base_url: "https://acme.example-support.com/".into(),
            ..InstanceConfig::default()
        };
        assert_eq!(instance.host(), "acme.example-support.com");

        let bare = InstanceConfig {
            base_url: "http://localhost:9090".into(),
            ..InstanceConfig::default()
        };
        assert_eq!(bare.host(), "localhost:9090");
    }
}
