// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Organization migration.
//!
//! Organizations correlate by exact name. An existing target organization
//! is merged into (domains, tags, details, notes) rather than duplicated,
//! and flagged with a `migrated` organization field so re-runs skip it.

use std::time::Instant;

use serde_json::{json, Value};
use tracing::{error, info, warn};

use caravel_core::records::Organization;
use caravel_core::{CaravelError, EntityKind, Result};

use crate::Session;

/// Join two optional text blocks with a newline, keeping whichever side
/// exists when the other is absent.
fn merge_text(existing: Option<String>, incoming: Option<String>) -> Option<String> {
    match (existing, incoming) {
        (Some(a), Some(b)) => Some(format!("{a}\n{b}")),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

impl Session {
    /// Migrate every source organization. Per-record failures are logged
    /// and the batch continues.
    pub async fn migrate_organizations(&self, update_existing: bool) -> Result<()> {
        let started = Instant::now();
        let orgs: Vec<Organization> = self
            .source
            .list("/api/v2/organizations.json", "organizations")
            .await?;

        let mut failed = 0u64;
        for org in &orgs {
            if let Err(err) = self.migrate_organization(org, update_existing).await {
                error!(organization = ?org.id, name = %org.name, error = %err, "organization migration failed");
                failed += 1;
            }
        }

        info!(
            processed = orgs.len(),
            failed,
            elapsed_secs = started.elapsed().as_secs(),
            "organization migration complete"
        );
        Ok(())
    }

    /// Migrate a single source organization by id.
    pub async fn migrate_organization_by_id(
        &self,
        org_id: u64,
        update_existing: bool,
    ) -> Result<()> {
        let Some(org) = self
            .source
            .fetch::<Organization>(&format!("/api/v2/organizations/{org_id}.json"), "organization")
            .await?
        else {
            return Err(CaravelError::Internal(format!(
                "source organization {org_id} does not exist"
            )));
        };
        self.migrate_organization(&org, update_existing).await
    }

    async fn migrate_organization(
        &self,
        source: &Organization,
        update_existing: bool,
    ) -> Result<()> {
        info!(organization = ?source.id, name = %source.name, "migrating organization");

        let Some(mut existing) = self.resolver.find_target_organization(&source.name).await?
        else {
            return self.create_organization(source).await;
        };

        let already_migrated = existing
            .organization_fields
            .get("migrated")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if already_migrated {
            info!(name = %source.name, "skipping, organization already migrated");
            return Ok(());
        }
        if !update_existing {
            info!(name = %source.name, "skipping, organization exists and update is disabled");
            return Ok(());
        }

        existing
            .domain_names
            .extend(source.domain_names.iter().cloned());
        existing.tags.extend(source.tags.iter().cloned());
        existing.details = merge_text(existing.details.take(), source.details.clone());
        existing.notes = merge_text(existing.notes.take(), source.notes.clone());
        existing
            .organization_fields
            .insert("migrated".to_string(), json!(true));

        let target_id = existing
            .id
            .ok_or_else(|| CaravelError::Internal("target organization carries no id".into()))?;
        self.target
            .update::<_, Organization>(
                &format!("/api/v2/organizations/{target_id}.json"),
                "organization",
                &existing,
            )
            .await?;
        info!(name = %source.name, target = target_id, "organization merged");
        Ok(())
    }

    async fn create_organization(&self, source: &Organization) -> Result<()> {
        let mut organization_fields = serde_json::Map::new();
        organization_fields.insert("migrated".to_string(), json!(true));

        let group_id = match source.group_id {
            Some(source_group) => {
                let resolved = self.resolver.resolve(EntityKind::Group, source_group).await?;
                if resolved.is_none() {
                    warn!(name = %source.name, group = source_group, "unresolved organization group");
                }
                resolved
            }
            None => None,
        };

        let org = Organization {
            id: None,
            name: source.name.clone(),
            shared_tickets: source.shared_tickets,
            shared_comments: source.shared_comments,
            external_id: source.external_id.clone(),
            domain_names: source.domain_names.clone(),
            details: source.details.clone(),
            notes: source.notes.clone(),
            group_id,
            tags: source.tags.clone(),
            organization_fields,
        };

        let created: Organization = self
            .target
            .create("/api/v2/organizations.json", "organization", &org)
            .await?;
        info!(name = %source.name, target = ?created.id, "organization created");
        Ok(())
    }
}
