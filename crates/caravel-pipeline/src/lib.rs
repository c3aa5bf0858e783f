// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Migration pipelines for the Caravel toolkit.
//!
//! A [`Session`] owns the two instance clients, the shared resolver with
//! its caches, the original-id marker, and the pipeline settings. Every
//! batch driver hangs off it:
//! - tickets: the idempotent, retrying ticket pipeline and its update
//!   actions ([`tickets`])
//! - organizations: merge-or-create organization migration ([`orgs`])
//! - automation rules: macros, triggers and views ([`rules`])
//!
//! Processing is strictly sequential: one record is fully migrated before
//! the next begins, so the per-record at-most-once guarantee only depends
//! on the remote dedup search, never on local state.

pub mod error_log;
pub mod orgs;
pub mod rules;
pub mod tickets;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use caravel_config::{CaravelConfig, OverridesConfig};
use caravel_core::{EntityKind, Result};
use caravel_gateway::InstanceClient;
use caravel_resolver::{OriginalIdMarker, Resolver, ResolverCache};

pub use error_log::ErrorLog;
pub use tickets::{BatchSummary, TicketOutcome, UpdateField};

/// Pipeline tunables, resolved from configuration once per run.
#[derive(Debug, Clone)]
pub struct MigrationSettings {
    /// Hostname of the source instance; inline attachment URLs on this host
    /// are re-hosted.
    pub source_host: String,
    /// Former source hostname, rewritten to `source_host` before download.
    pub alt_source_host: Option<String>,
    /// Help-center hostname whose attachment URLs are also re-hosted.
    pub helpcenter_host: Option<String>,
    pub error_log: PathBuf,
    pub progress_interval: u64,
    pub retry_backoff: Duration,
    pub problem_link_pause: Duration,
    pub incremental_start_time: i64,
}

impl MigrationSettings {
    pub fn from_config(config: &CaravelConfig) -> Self {
        Self {
            source_host: config.source.host().to_string(),
            alt_source_host: config.migration.alt_source_host.clone(),
            helpcenter_host: config.migration.helpcenter_host.clone(),
            error_log: PathBuf::from(&config.migration.error_log),
            progress_interval: config.migration.progress_interval.max(1),
            retry_backoff: Duration::from_secs(config.migration.retry_backoff_secs),
            problem_link_pause: Duration::from_secs(config.migration.problem_link_pause_secs),
            incremental_start_time: config.migration.start_time,
        }
    }
}

/// One migration run's worth of shared state.
///
/// The resolver caches live here, dependency-injected into every component,
/// so tests can substitute empty or pre-seeded caches.
#[derive(Debug)]
pub struct Session {
    pub source: Arc<InstanceClient>,
    pub target: Arc<InstanceClient>,
    pub resolver: Resolver,
    pub marker: OriginalIdMarker,
    pub settings: MigrationSettings,
}

impl Session {
    /// Build both instance clients, seed the resolver cache from configured
    /// overrides, and discover the marker field on the target schema.
    ///
    /// Any failure here is fatal: a run must not process a single record
    /// without working credentials and a discoverable marker.
    pub async fn connect(config: &CaravelConfig) -> Result<Self> {
        let source = Arc::new(InstanceClient::new(
            "source",
            config.source.base_url.clone(),
            config.source.email.clone(),
            SecretString::from(config.source.password.clone()),
        )?);
        let target = Arc::new(InstanceClient::new(
            "target",
            config.target.base_url.clone(),
            config.target.email.clone(),
            SecretString::from(config.target.password.clone()),
        )?);

        let marker =
            OriginalIdMarker::discover(&target, &config.migration.original_id_field_title).await?;
        let resolver = Resolver::new(
            Arc::clone(&source),
            Arc::clone(&target),
            ResolverCache::seeded(override_entries(&config.overrides)),
        );

        Ok(Self {
            source,
            target,
            resolver,
            marker,
            settings: MigrationSettings::from_config(config),
        })
    }

    /// Assemble a session from already-built parts. Tests use this to
    /// inject mock instances and pre-seeded caches.
    pub fn from_parts(
        source: Arc<InstanceClient>,
        target: Arc<InstanceClient>,
        resolver: Resolver,
        marker: OriginalIdMarker,
        settings: MigrationSettings,
    ) -> Self {
        Self {
            source,
            target,
            resolver,
            marker,
            settings,
        }
    }
}

fn override_entries(overrides: &OverridesConfig) -> Vec<(EntityKind, String, u64)> {
    let brands = overrides
        .brands
        .iter()
        .map(|(source_id, target_id)| (EntityKind::Brand, source_id.clone(), *target_id));
    let forms = overrides
        .ticket_forms
        .iter()
        .map(|(source_id, target_id)| (EntityKind::TicketForm, source_id.clone(), *target_id));
    brands.chain(forms).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_entries_span_both_kinds() {
        let config = caravel_config::load_config_from_str(
            r#"
            [overrides.brands]
            "2379186" = 360000762552

            [overrides.ticket_forms]
            "35363" = 360000341912
            "#,
        )
        .unwrap();

        let entries = override_entries(&config.overrides);
        assert_eq!(entries.len(), 2);
        assert!(entries.contains(&(
            EntityKind::Brand,
            "2379186".to_string(),
            360000762552
        )));
        assert!(entries.contains(&(
            EntityKind::TicketForm,
            "35363".to_string(),
            360000341912
        )));
    }

    #[test]
    fn settings_resolve_hosts_and_durations() {
        let config = caravel_config::load_config_from_str(
            r#"
            [source]
            base_url = "https://old.example-support.com"

            [migration]
            retry_backoff_secs = 5
            problem_link_pause_secs = 0
            "#,
        )
        .unwrap();

        let settings = MigrationSettings::from_config(&config);
        assert_eq!(settings.source_host, "old.example-support.com");
        assert_eq!(settings.retry_backoff, Duration::from_secs(5));
        assert!(settings.problem_link_pause.is_zero());
        assert_eq!(settings.incremental_start_time, 1_262_304_000);
    }
}
