// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The ticket migration pipeline.
//!
//! Per ticket: filter on status, consult the idempotency guard, remap every
//! foreign-keyed field through the resolver, re-host attachments, migrate a
//! missing problem parent first, then commit through the import endpoint
//! (which accepts historical timestamps and bypasses business rules).
//!
//! Failure handling is per record: a transient import failure is retried
//! exactly once after a fixed backoff, anything else lands in the error log
//! and the batch moves on. A single ticket never aborts the batch.

use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Instant;

use regex::Regex;
use tracing::{debug, error, info, warn};

use caravel_core::records::{Attachment, Comment, CustomField, Ticket};
use caravel_core::{CaravelError, EntityKind, Result, StatusFilter, TicketStatus};

use crate::error_log::ErrorLog;
use crate::Session;

/// Terminal outcome of one ticket's trip through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketOutcome {
    /// Committed to the target; carries the new target id.
    Migrated(u64),
    /// Dropped by the status filter (or hard-deleted).
    SkippedStatus,
    /// Already migrated in an earlier run; carries the existing target id
    /// so problem-link resolution can still proceed.
    SkippedDuplicate(u64),
}

impl TicketOutcome {
    /// The target-side id, when one exists.
    pub fn target_id(self) -> Option<u64> {
        match self {
            Self::Migrated(id) | Self::SkippedDuplicate(id) => Some(id),
            Self::SkippedStatus => None,
        }
    }
}

/// Which field the `update` action refreshes on already-migrated tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateField {
    /// Re-resolve and append the source ticket's collaborators.
    Cc,
    /// Re-host inline attachments into one new internal comment.
    CommentAttach,
}

/// Counters for one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: u64,
    pub migrated: u64,
    pub skipped_status: u64,
    pub skipped_duplicate: u64,
    pub failed: u64,
}

struct BatchState {
    log: ErrorLog,
    summary: BatchSummary,
    started: Instant,
}

fn img_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"<img [^>]*src="([^"]+)"[^>]*>"#).unwrap())
}

/// Every `(full tag, src url)` pair of inline images in an HTML body.
fn inline_image_refs(body: &str) -> Vec<(String, String)> {
    img_tag_pattern()
        .captures_iter(body)
        .map(|captures| (captures[0].to_string(), captures[1].to_string()))
        .collect()
}

fn internal_note(body: String) -> Comment {
    Comment {
        body: Some(body),
        public: false,
        ..Comment::default()
    }
}

impl Session {
    /// Migrate one ticket by source id, ignoring the status filter.
    pub async fn migrate_ticket_by_id(&self, ticket_id: u64) -> Result<TicketOutcome> {
        let Some(source) = self
            .source
            .fetch::<Ticket>(&format!("/api/v2/tickets/{ticket_id}.json"), "ticket")
            .await?
        else {
            return Err(CaravelError::Internal(format!(
                "source ticket {ticket_id} does not exist"
            )));
        };
        let mut visited = HashSet::new();
        self.migrate_ticket(&source, StatusFilter::All, &mut visited)
            .await
    }

    /// Migrate every source ticket matching the filter.
    ///
    /// Uses the incremental (changed-since) feed by default. Under
    /// `not_closed` the plain listing is enumerated instead: the
    /// incremental feed under-represents open tickets.
    pub async fn migrate_all(&self, filter: StatusFilter) -> Result<BatchSummary> {
        let mut state = self.start_batch()?;

        if filter == StatusFilter::NotClosed {
            let tickets: Vec<Ticket> = self.source.list("/api/v2/tickets.json", "tickets").await?;
            for ticket in &tickets {
                self.process_record(ticket, filter, &mut state).await;
            }
        } else {
            let mut next = Some(
                self.source
                    .incremental_export_url(self.settings.incremental_start_time),
            );
            while let Some(url) = next {
                let page = self.source.ticket_export_page(&url).await?;
                for ticket in &page.tickets {
                    self.process_record(ticket, filter, &mut state).await;
                }
                next = page.next_page;
            }
        }

        Ok(self.finish_batch(state))
    }

    /// Migrate the tickets named in an id file, one id per line. The error
    /// log of a previous run is the intended input.
    pub async fn migrate_from_file(&self, path: &Path, filter: StatusFilter) -> Result<BatchSummary> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CaravelError::Config(format!("cannot read id file {}: {e}", path.display()))
        })?;
        let mut state = self.start_batch()?;

        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Ok(ticket_id) = line.parse::<u64>() else {
                warn!(line, "skipping unparseable ticket id");
                continue;
            };

            match self
                .source
                .fetch::<Ticket>(&format!("/api/v2/tickets/{ticket_id}.json"), "ticket")
                .await
            {
                Ok(Some(ticket)) => self.process_record(&ticket, filter, &mut state).await,
                Ok(None) => {
                    warn!(ticket = ticket_id, "source ticket not found");
                    state.log.append(ticket_id, "source ticket not found");
                    state.summary.failed += 1;
                    state.summary.processed += 1;
                }
                Err(error) => {
                    error!(ticket = ticket_id, error = %error, "failed to fetch source ticket");
                    state.log.append(ticket_id, &error.to_string());
                    state.summary.failed += 1;
                    state.summary.processed += 1;
                }
            }
        }

        Ok(self.finish_batch(state))
    }

    fn start_batch(&self) -> Result<BatchState> {
        Ok(BatchState {
            log: ErrorLog::start(&self.settings.error_log)?,
            summary: BatchSummary::default(),
            started: Instant::now(),
        })
    }

    fn finish_batch(&self, state: BatchState) -> BatchSummary {
        let summary = state.summary;
        info!(
            processed = summary.processed,
            migrated = summary.migrated,
            skipped_status = summary.skipped_status,
            skipped_duplicate = summary.skipped_duplicate,
            failed = summary.failed,
            elapsed_secs = state.started.elapsed().as_secs(),
            "batch complete"
        );
        summary
    }

    /// One record through the state machine; failures land in the error
    /// log, never abort the batch.
    async fn process_record(&self, source: &Ticket, filter: StatusFilter, state: &mut BatchState) {
        let mut visited = HashSet::new();
        match self.migrate_ticket(source, filter, &mut visited).await {
            Ok(TicketOutcome::Migrated(_)) => state.summary.migrated += 1,
            Ok(TicketOutcome::SkippedStatus) => state.summary.skipped_status += 1,
            Ok(TicketOutcome::SkippedDuplicate(_)) => state.summary.skipped_duplicate += 1,
            Err(error) => {
                let ticket_id = source.id.unwrap_or_default();
                error!(
                    ticket = ticket_id,
                    timestamp = ?source.generated_timestamp,
                    error = %error,
                    "ticket migration failed"
                );
                state.log.append(ticket_id, &error.to_string());
                state.summary.failed += 1;
            }
        }

        state.summary.processed += 1;
        if state.summary.processed % self.settings.progress_interval == 0 {
            info!(
                processed = state.summary.processed,
                elapsed_secs = state.started.elapsed().as_secs(),
                "progress"
            );
        }
    }

    /// The per-ticket state machine. `visited` carries every source id
    /// already in flight down the problem-link recursion; a revisit is a
    /// cycle, failed permanently instead of recursing forever.
    async fn migrate_ticket(
        &self,
        source: &Ticket,
        filter: StatusFilter,
        visited: &mut HashSet<u64>,
    ) -> Result<TicketOutcome> {
        let source_id = source
            .id
            .ok_or_else(|| CaravelError::Internal("source ticket carries no id".into()))?;
        let status = source.status_or_default();

        // 1. Filter.
        if status == TicketStatus::Deleted {
            info!(ticket = source_id, "skipping deleted ticket");
            return Ok(TicketOutcome::SkippedStatus);
        }
        if !filter.allows(status) {
            info!(ticket = source_id, status = %status, "skipping, status filtered");
            return Ok(TicketOutcome::SkippedStatus);
        }

        if !visited.insert(source_id) {
            return Err(CaravelError::Cycle(source_id));
        }

        // 2. Dedup. Must stay immediately before any mutating call.
        if let Some(existing) = self.marker.find_migrated(&self.target, source_id).await? {
            let existing_id = existing
                .id
                .ok_or_else(|| CaravelError::Internal("migrated ticket carries no id".into()))?;
            info!(ticket = source_id, target = existing_id, "existing ticket found");
            return Ok(TicketOutcome::SkippedDuplicate(existing_id));
        }

        info!(ticket = source_id, subject = ?source.subject, "migrating ticket");

        // 3. Transform.
        let mut ticket = Ticket {
            created_at: source.created_at.clone(),
            updated_at: source.updated_at.clone(),
            subject: source.subject.clone(),
            priority: source.priority.clone(),
            ticket_type: source.ticket_type.clone(),
            status: Some(status),
            tags: source.tags.clone(),
            recipient: source.recipient.clone(),
            ..Ticket::default()
        };

        if let Some(brand_id) = source.brand_id {
            ticket.brand_id = self.resolver.resolve(EntityKind::Brand, brand_id).await?;
        }
        if let Some(form_id) = source.ticket_form_id {
            ticket.ticket_form_id = self
                .resolver
                .resolve(EntityKind::TicketForm, form_id)
                .await?;
        }

        // Absence is tolerated: the ticket proceeds without an organization.
        if let Some(org_id) = source.organization_id {
            match self
                .resolver
                .resolve(EntityKind::Organization, org_id)
                .await?
            {
                Some(target_org) => ticket.organization_id = Some(target_org),
                None => warn!(
                    ticket = source_id,
                    organization = org_id,
                    "unresolved organization, migrating without one"
                ),
            }
        }

        for collaborator_id in &source.collaborator_ids {
            match self.resolver.resolve(EntityKind::User, *collaborator_id).await? {
                Some(target_user) => ticket.collaborator_ids.push(target_user),
                None => warn!(
                    ticket = source_id,
                    user = collaborator_id,
                    "unresolved collaborator dropped"
                ),
            }
        }

        for field in &source.custom_fields {
            match self
                .resolver
                .resolve(EntityKind::TicketField, field.id)
                .await?
            {
                Some(target_field) => ticket.custom_fields.push(CustomField {
                    id: target_field,
                    value: field.value.clone(),
                }),
                None => warn!(
                    ticket = source_id,
                    field = field.id,
                    "unresolved custom field dropped"
                ),
            }
        }
        ticket.custom_fields.push(self.marker.stamp(source_id));

        // 4. Comments, including attachment re-hosting.
        let comments: Vec<Comment> = self
            .source
            .list(
                &format!("/api/v2/tickets/{source_id}/comments.json"),
                "comments",
            )
            .await?;
        for comment in &comments {
            let transformed = self.transform_comment(source_id, comment).await?;
            ticket.comments.push(transformed);
        }

        if let Some(submitter_id) = source.submitter_id {
            match self.resolver.resolve(EntityKind::User, submitter_id).await? {
                Some(target_user) => ticket.submitter_id = Some(target_user),
                None => warn!(ticket = source_id, user = submitter_id, "unresolved submitter"),
            }
        }

        // A suspended requester cannot hold tickets on the target; keep the
        // fact as an internal note instead.
        if let Some(requester_id) = source.requester_id {
            match self.resolver.resolve_user(requester_id, false).await? {
                Some(requester) if requester.suspended => {
                    let name = requester.name.unwrap_or_else(|| requester_id.to_string());
                    info!(ticket = source_id, "requester suspended, noting in comment");
                    ticket
                        .comments
                        .push(internal_note(format!("Requester was {name} (suspended)")));
                }
                Some(requester) => ticket.requester_id = requester.id,
                None => warn!(ticket = source_id, user = requester_id, "unresolved requester"),
            }
        }

        // End-users cannot be assigned tickets; fall back to the group when
        // no individual assignee survives.
        if let Some(assignee_id) = source.assignee_id {
            match self.resolver.resolve_user(assignee_id, false).await? {
                Some(assignee) if assignee.role.as_deref() == Some("end-user") => {
                    let name = assignee.name.unwrap_or_else(|| assignee_id.to_string());
                    ticket
                        .comments
                        .push(internal_note(format!("Assignee was {name} (end-user)")));
                }
                Some(assignee) => ticket.assignee_id = assignee.id,
                None => warn!(ticket = source_id, user = assignee_id, "unresolved assignee"),
            }
        } else if let Some(group_id) = source.group_id {
            ticket.group_id = self.resolver.resolve(EntityKind::Group, group_id).await?;
        }

        // 5. Problem linkage, migrating the parent first when needed.
        if let Some(problem_id) = source.problem_id {
            self.link_problem(&mut ticket, source_id, problem_id, visited)
                .await?;
        }

        // 6. Commit.
        self.commit(source_id, &ticket).await
    }

    async fn link_problem(
        &self,
        ticket: &mut Ticket,
        source_id: u64,
        problem_id: u64,
        visited: &mut HashSet<u64>,
    ) -> Result<()> {
        if let Some(parent) = self.marker.find_migrated(&self.target, problem_id).await? {
            if parent.ticket_type.as_deref() == Some("problem") {
                info!(ticket = source_id, problem = problem_id, "linking existing problem ticket");
                ticket.problem_id = parent.id;
            } else {
                let parent_id = parent.id.unwrap_or_default();
                ticket.comments.push(internal_note(format!(
                    "Linked ticket {parent_id} is not a problem, could not link"
                )));
            }
            return Ok(());
        }

        info!(
            ticket = source_id,
            problem = problem_id,
            "problem ticket not yet migrated, creating it first"
        );
        let Some(parent) = self
            .source
            .fetch::<Ticket>(&format!("/api/v2/tickets/{problem_id}.json"), "ticket")
            .await?
        else {
            warn!(ticket = source_id, problem = problem_id, "source problem ticket not found");
            return Ok(());
        };

        let outcome = Box::pin(self.migrate_ticket(&parent, StatusFilter::All, visited)).await?;
        ticket.problem_id = outcome.target_id();

        // Read-after-write: give the target's search index time to absorb
        // the new parent before anything re-finds it.
        if !self.settings.problem_link_pause.is_zero() {
            tokio::time::sleep(self.settings.problem_link_pause).await;
        }
        Ok(())
    }

    /// Commit through the import endpoint, retrying exactly once after a
    /// fixed backoff when the failure class is transient.
    async fn commit(&self, source_id: u64, ticket: &Ticket) -> Result<TicketOutcome> {
        let mut last_error = None;

        for attempt in 0..=1u32 {
            if attempt > 0 {
                warn!(ticket = source_id, "transient import failure, retrying after backoff");
                tokio::time::sleep(self.settings.retry_backoff).await;
            }

            match self
                .target
                .create::<_, Ticket>("/api/v2/imports/tickets.json", "ticket", ticket)
                .await
            {
                Ok(created) => {
                    let target_id = created.id.ok_or_else(|| {
                        CaravelError::Internal("import response carried no ticket id".into())
                    })?;
                    info!(ticket = source_id, target = target_id, "ticket migrated");
                    return Ok(TicketOutcome::Migrated(target_id));
                }
                Err(error) if error.is_transient() && attempt == 0 => last_error = Some(error),
                Err(error) => return Err(error),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            CaravelError::Internal("import failed after retry with no recorded error".into())
        }))
    }

    async fn transform_comment(&self, source_id: u64, comment: &Comment) -> Result<Comment> {
        let author_id = match comment.author_id {
            Some(author) => {
                let resolved = self.resolver.resolve(EntityKind::User, author).await?;
                if resolved.is_none() {
                    warn!(ticket = source_id, user = author, "unresolved comment author");
                }
                resolved
            }
            None => None,
        };

        let mut uploads = Vec::new();
        let html_body = match &comment.html_body {
            Some(body) => Some(self.rehost_inline(source_id, body, &mut uploads).await),
            None => None,
        };

        for attachment in &comment.attachments {
            match self.rehost_discrete(attachment).await {
                Ok(token) => {
                    info!(
                        ticket = source_id,
                        file = %attachment.file_name,
                        "attachment re-hosted"
                    );
                    uploads.push(token);
                }
                Err(error) => warn!(
                    ticket = source_id,
                    file = %attachment.file_name,
                    error = %error,
                    "failed to re-host attachment, dropping it"
                ),
            }
        }

        Ok(Comment {
            id: None,
            created_at: comment.created_at.clone(),
            body: if html_body.is_none() {
                comment.body.clone()
            } else {
                None
            },
            html_body,
            public: comment.public,
            author_id,
            metadata: comment.metadata.clone(),
            uploads,
            attachments: Vec::new(),
        })
    }

    /// Re-host every instance-hosted inline image in an HTML body,
    /// replacing the tag with a placeholder and collecting upload tokens.
    /// A failed attachment leaves its reference untouched.
    async fn rehost_inline(
        &self,
        source_id: u64,
        body: &str,
        uploads: &mut Vec<String>,
    ) -> String {
        let mut result = body.to_string();

        for (tag, url) in inline_image_refs(body) {
            let Some(download_url) = self.instance_hosted_url(&url) else {
                debug!(ticket = source_id, url, "inline image not instance-hosted, left as is");
                continue;
            };

            debug!(ticket = source_id, url, "found inline image in comment");
            match self.rehost(&download_url).await {
                Ok(token) => {
                    result = result.replace(&tag, "[See Attachment]");
                    uploads.push(token);
                }
                Err(error) => warn!(
                    ticket = source_id,
                    url,
                    error = %error,
                    "failed to re-host inline attachment, reference left untouched"
                ),
            }
        }

        result
    }

    /// Whether the URL points at an instance we own, and if so, the URL to
    /// actually download from (alternate hosts are rewritten to the current
    /// source host).
    fn instance_hosted_url(&self, url: &str) -> Option<String> {
        if url.contains(&self.settings.source_host) {
            return Some(url.to_string());
        }
        if let Some(alt) = &self.settings.alt_source_host {
            if url.contains(alt.as_str()) {
                return Some(url.replace(alt.as_str(), &self.settings.source_host));
            }
        }
        if let Some(helpcenter) = &self.settings.helpcenter_host {
            if url.contains(helpcenter.as_str()) {
                return Some(url.to_string());
            }
        }
        None
    }

    async fn rehost(&self, url: &str) -> Result<String> {
        let payload = self.source.download_attachment(url).await?;
        self.target.upload_attachment(payload).await
    }

    async fn rehost_discrete(&self, attachment: &Attachment) -> Result<String> {
        let mut payload = self.source.download_attachment(&attachment.content_url).await?;
        // The source record already knows the filename and content type;
        // prefer it over header sniffing.
        payload.file_name = attachment.file_name.clone();
        if attachment.content_type.is_some() {
            payload.content_type = attachment.content_type.clone();
        }
        self.target.upload_attachment(payload).await
    }

    /// Refresh one field of an already-migrated ticket from its source.
    pub async fn update_ticket(&self, ticket_id: u64, field: UpdateField) -> Result<()> {
        let Some(source) = self
            .source
            .fetch::<Ticket>(&format!("/api/v2/tickets/{ticket_id}.json"), "ticket")
            .await?
        else {
            return Err(CaravelError::Internal(format!(
                "source ticket {ticket_id} does not exist"
            )));
        };

        let Some(existing) = self.marker.find_migrated(&self.target, ticket_id).await? else {
            info!(ticket = ticket_id, "target ticket not found, nothing to update");
            return Ok(());
        };
        let status = existing.status_or_default();
        if status == TicketStatus::Closed || status == TicketStatus::Deleted {
            info!(ticket = ticket_id, status = %status, "skipping immutable ticket");
            return Ok(());
        }
        let target_id = existing
            .id
            .ok_or_else(|| CaravelError::Internal("migrated ticket carries no id".into()))?;

        match field {
            UpdateField::Cc => self.update_collaborators(&source, &existing, target_id).await,
            UpdateField::CommentAttach => {
                self.update_comment_attachments(&source, target_id).await
            }
        }
    }

    async fn update_collaborators(
        &self,
        source: &Ticket,
        existing: &Ticket,
        target_id: u64,
    ) -> Result<()> {
        if source.collaborator_ids.is_empty() {
            info!(ticket = target_id, "no collaborators to update");
            return Ok(());
        }

        let mut collaborator_ids = existing.collaborator_ids.clone();
        for collaborator_id in &source.collaborator_ids {
            match self.resolver.resolve(EntityKind::User, *collaborator_id).await? {
                Some(target_user) => collaborator_ids.push(target_user),
                None => warn!(user = collaborator_id, "unresolved collaborator dropped"),
            }
        }

        let update = Ticket {
            collaborator_ids,
            ..Ticket::default()
        };
        self.target
            .update::<_, Ticket>(&format!("/api/v2/tickets/{target_id}.json"), "ticket", &update)
            .await?;
        info!(ticket = target_id, "collaborators updated");
        Ok(())
    }

    async fn update_comment_attachments(&self, source: &Ticket, target_id: u64) -> Result<()> {
        let target_comments: Vec<Comment> = self
            .target
            .list(
                &format!("/api/v2/tickets/{target_id}/comments.json"),
                "comments",
            )
            .await?;
        let already_done = target_comments.iter().any(|comment| {
            comment.body.as_deref() == Some("Inline attachments")
                || comment.html_body.as_deref() == Some("Inline attachments")
        });
        if already_done {
            info!(ticket = target_id, "skipping, ticket already updated");
            return Ok(());
        }

        let source_id = source.id.unwrap_or_default();
        let source_comments: Vec<Comment> = self
            .source
            .list(
                &format!("/api/v2/tickets/{source_id}/comments.json"),
                "comments",
            )
            .await?;

        let mut uploads = Vec::new();
        for comment in &source_comments {
            let Some(body) = &comment.html_body else {
                continue;
            };
            for (_tag, url) in inline_image_refs(body) {
                let Some(download_url) = self.instance_hosted_url(&url) else {
                    continue;
                };
                match self.rehost(&download_url).await {
                    Ok(token) => uploads.push(token),
                    Err(error) => warn!(url, error = %error, "failed to re-host attachment"),
                }
            }
        }

        if uploads.is_empty() {
            info!(ticket = target_id, "no inline attachments to carry over");
            return Ok(());
        }

        let update = Ticket {
            comment: Some(Comment {
                html_body: Some("Inline attachments".to_string()),
                public: false,
                uploads,
                ..Comment::default()
            }),
            ..Ticket::default()
        };
        self.target
            .update::<_, Ticket>(&format!("/api/v2/tickets/{target_id}.json"), "ticket", &update)
            .await?;
        info!(ticket = target_id, "attachment comment added");
        Ok(())
    }
}
