// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Automation-rule migration: macros, triggers and views.
//!
//! Only active source rules migrate. Each arrives on the target inactive,
//! under a `MIGRATED `-prefixed title (which doubles as the dedup key for
//! re-runs), with every condition, action, restriction and view column
//! rewritten to target-instance ids. A creation failure is logged and the
//! batch continues.

use std::collections::HashSet;

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use caravel_core::records::{
    ConditionSet, Macro, Restriction, Trigger, View, ViewExecution,
};
use caravel_core::{CaravelError, EntityKind, Result};

use crate::Session;

/// Title prefix marking a rule as carried over from the source instance.
const MIGRATED_PREFIX: &str = "MIGRATED ";

impl Session {
    /// Migrate all active macros, or a single one by id.
    pub async fn migrate_macros(&self, macro_id: Option<u64>) -> Result<()> {
        let existing: Vec<Macro> = self.target.list("/api/v2/macros.json", "macros").await?;
        let existing_titles: HashSet<String> =
            existing.into_iter().map(|record| record.title).collect();

        let sources: Vec<Macro> = match macro_id {
            Some(id) => self
                .source
                .fetch(&format!("/api/v2/macros/{id}.json"), "macro")
                .await?
                .map(|record| vec![record])
                .ok_or_else(|| {
                    CaravelError::Internal(format!("source macro {id} does not exist"))
                })?,
            None => self.source.list("/api/v2/macros.json", "macros").await?,
        };

        for source in &sources {
            self.migrate_macro(source, &existing_titles).await;
        }
        Ok(())
    }

    /// Migrate all active triggers, or a single one by id.
    pub async fn migrate_triggers(&self, trigger_id: Option<u64>) -> Result<()> {
        let existing: Vec<Trigger> = self.target.list("/api/v2/triggers.json", "triggers").await?;
        let existing_titles: HashSet<String> =
            existing.into_iter().map(|record| record.title).collect();

        let sources: Vec<Trigger> = match trigger_id {
            Some(id) => self
                .source
                .fetch(&format!("/api/v2/triggers/{id}.json"), "trigger")
                .await?
                .map(|record| vec![record])
                .ok_or_else(|| {
                    CaravelError::Internal(format!("source trigger {id} does not exist"))
                })?,
            None => self.source.list("/api/v2/triggers.json", "triggers").await?,
        };

        for source in &sources {
            self.migrate_trigger(source, &existing_titles).await;
        }
        Ok(())
    }

    /// Migrate all active views, or a single one by id.
    pub async fn migrate_views(&self, view_id: Option<u64>) -> Result<()> {
        let existing: Vec<View> = self.target.list("/api/v2/views.json", "views").await?;
        let existing_titles: HashSet<String> =
            existing.into_iter().map(|record| record.title).collect();

        let sources: Vec<View> = match view_id {
            Some(id) => self
                .source
                .fetch(&format!("/api/v2/views/{id}.json"), "view")
                .await?
                .map(|record| vec![record])
                .ok_or_else(|| CaravelError::Internal(format!("source view {id} does not exist")))?,
            None => self.source.list("/api/v2/views.json", "views").await?,
        };

        for source in &sources {
            self.migrate_view(source, &existing_titles).await;
        }
        Ok(())
    }

    async fn migrate_macro(&self, source: &Macro, existing_titles: &HashSet<String>) {
        if !source.active {
            debug!(title = %source.title, "skipping inactive macro");
            return;
        }
        let title = format!("{MIGRATED_PREFIX}{}", source.title);
        if existing_titles.contains(&title) {
            info!(title = %source.title, "existing macro found");
            return;
        }

        info!(title = %source.title, "migrating macro");
        let outcome = self.build_and_create_macro(source, title).await;
        if let Err(error) = outcome {
            error!(title = %source.title, error = %error, "failed to migrate macro");
        }
    }

    async fn build_and_create_macro(&self, source: &Macro, title: String) -> Result<()> {
        let mut actions = Vec::with_capacity(source.actions.len());
        for action in &source.actions {
            actions.push(self.resolver.rewrite_action(action).await?);
        }

        let restriction = match &source.restriction {
            Some(restriction) => Some(self.remap_restriction(restriction).await?),
            None => None,
        };

        let outbound = Macro {
            id: None,
            title,
            active: false,
            position: source.position,
            description: source.description.clone(),
            actions,
            restriction,
        };
        let created: Macro = self
            .target
            .create("/api/v2/macros.json", "macro", &outbound)
            .await?;
        info!(title = %created.title, target = ?created.id, "macro created");
        Ok(())
    }

    async fn migrate_trigger(&self, source: &Trigger, existing_titles: &HashSet<String>) {
        if !source.active {
            debug!(title = %source.title, "skipping inactive trigger");
            return;
        }
        let title = format!("{MIGRATED_PREFIX}{}", source.title);
        if existing_titles.contains(&title) {
            info!(title = %source.title, "existing trigger found");
            return;
        }

        info!(title = %source.title, "migrating trigger");
        let outcome = self.build_and_create_trigger(source, title).await;
        if let Err(error) = outcome {
            error!(title = %source.title, error = %error, "failed to migrate trigger");
        }
    }

    async fn build_and_create_trigger(&self, source: &Trigger, title: String) -> Result<()> {
        let mut actions = Vec::with_capacity(source.actions.len());
        for action in &source.actions {
            actions.push(self.resolver.rewrite_action(action).await?);
        }
        let conditions = self.rewrite_condition_set(&source.conditions).await?;

        let outbound = Trigger {
            id: None,
            title,
            active: false,
            position: source.position,
            description: source.description.clone(),
            conditions,
            actions,
        };
        let created: Trigger = self
            .target
            .create("/api/v2/triggers.json", "trigger", &outbound)
            .await?;
        info!(title = %created.title, target = ?created.id, "trigger created");
        Ok(())
    }

    async fn migrate_view(&self, source: &View, existing_titles: &HashSet<String>) {
        if !source.active {
            debug!(title = %source.title, "skipping inactive view");
            return;
        }
        let title = format!("{MIGRATED_PREFIX}{}", source.title);
        if existing_titles.contains(&title) {
            info!(title = %source.title, "existing view found");
            return;
        }

        info!(title = %source.title, "migrating view");
        let outcome = self.build_and_create_view(source, title).await;
        if let Err(error) = outcome {
            error!(title = %source.title, error = %error, "failed to migrate view");
        }
    }

    async fn build_and_create_view(&self, source: &View, title: String) -> Result<()> {
        let conditions = self.rewrite_condition_set(&source.conditions).await?;
        let execution = source.execution.clone().unwrap_or_default();
        let output = self.rewrite_view_output(&execution).await?;

        let restriction = match &source.restriction {
            Some(restriction) => Some(self.remap_restriction(restriction).await?),
            None => None,
        };

        let outbound = View {
            id: None,
            title,
            active: false,
            position: source.position,
            description: source.description.clone(),
            conditions,
            restriction,
            execution: None,
            output: Some(output),
        };
        let created: View = self
            .target
            .create("/api/v2/views.json", "view", &outbound)
            .await?;
        info!(title = %created.title, target = ?created.id, "view created");
        Ok(())
    }

    async fn rewrite_condition_set(&self, source: &ConditionSet) -> Result<ConditionSet> {
        let mut all = Vec::with_capacity(source.all.len());
        for condition in &source.all {
            all.push(self.resolver.rewrite_condition(condition).await?);
        }
        let mut any = Vec::with_capacity(source.any.len());
        for condition in &source.any {
            any.push(self.resolver.rewrite_condition(condition).await?);
        }
        Ok(ConditionSet { all, any })
    }

    /// Columns arrive as `{id, title}` objects (or bare ids). The synthetic
    /// `ticket_id` column is spelled `nice_id` on the writable side; numeric
    /// columns are custom ticket fields and remap through the resolver.
    async fn rewrite_view_output(&self, execution: &ViewExecution) -> Result<ViewExecution> {
        let mut columns = Vec::with_capacity(execution.columns.len());
        for column in &execution.columns {
            let column_id = column.get("id").cloned().unwrap_or_else(|| column.clone());
            let mapped = match &column_id {
                Value::String(name) if name == "ticket_id" => json!("nice_id"),
                Value::Number(number) => match number.as_u64() {
                    Some(field_id) => {
                        match self.resolver.resolve(EntityKind::TicketField, field_id).await? {
                            Some(target_id) => json!(target_id),
                            None => {
                                warn!(field = field_id, "unresolved view column, keeping original");
                                column_id.clone()
                            }
                        }
                    }
                    None => column_id.clone(),
                },
                _ => column_id.clone(),
            };
            columns.push(mapped);
        }

        Ok(ViewExecution {
            group_by: execution.group_by.clone(),
            group_order: execution.group_order.clone(),
            sort_by: execution.sort_by.clone(),
            sort_order: execution.sort_order.clone(),
            columns,
        })
    }

    /// Only `Group`-typed restrictions carry instance-local ids; everything
    /// else passes through. Unresolved groups are dropped from the id list.
    async fn remap_restriction(&self, source: &Restriction) -> Result<Restriction> {
        if source.restriction_type != "Group" {
            return Ok(source.clone());
        }

        let id = match source.id {
            Some(group_id) => self.resolver.resolve(EntityKind::Group, group_id).await?,
            None => None,
        };

        let ids = match &source.ids {
            Some(group_ids) => {
                let mut resolved = Vec::with_capacity(group_ids.len());
                for group_id in group_ids {
                    match self.resolver.resolve(EntityKind::Group, *group_id).await? {
                        Some(target_id) => resolved.push(target_id),
                        None => warn!(group = group_id, "unresolved restriction group dropped"),
                    }
                }
                (!resolved.is_empty()).then_some(resolved)
            }
            None => None,
        };

        Ok(Restriction {
            restriction_type: source.restriction_type.clone(),
            id,
            ids,
        })
    }
}
