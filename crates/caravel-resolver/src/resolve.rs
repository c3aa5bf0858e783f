// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cross-instance entity resolution.
//!
//! [`Resolver::resolve`] maps a source-instance id of a given kind to the
//! corresponding target-instance id. The correlation rule is exact equality
//! on a kind-specific label: name for organizations, groups, brands and
//! ticket forms, title for ticket fields, email for users. Results are
//! memoized in a [`ResolverCache`] for the process lifetime.
//!
//! Resolution misses never raise: they return `Ok(None)` with a diagnostic
//! log line, and the caller decides the fallback.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use caravel_core::records::{Identity, Organization, User};
use caravel_core::{CaravelError, EntityKind, Result};
use caravel_gateway::InstanceClient;

use crate::cache::ResolverCache;

/// Which field of a candidate record the correlation rule compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparator {
    Name,
    Title,
    Email,
}

struct KindSpec {
    /// Collection path without the `.json` suffix.
    path: &'static str,
    collection_key: &'static str,
    record_key: &'static str,
    comparator: Comparator,
}

fn kind_spec(kind: EntityKind) -> KindSpec {
    match kind {
        EntityKind::Organization => KindSpec {
            path: "/api/v2/organizations",
            collection_key: "organizations",
            record_key: "organization",
            comparator: Comparator::Name,
        },
        EntityKind::User => KindSpec {
            path: "/api/v2/users",
            collection_key: "users",
            record_key: "user",
            comparator: Comparator::Email,
        },
        EntityKind::Group => KindSpec {
            path: "/api/v2/groups",
            collection_key: "groups",
            record_key: "group",
            comparator: Comparator::Name,
        },
        EntityKind::TicketField => KindSpec {
            path: "/api/v2/ticket_fields",
            collection_key: "ticket_fields",
            record_key: "ticket_field",
            comparator: Comparator::Title,
        },
        EntityKind::TicketForm => KindSpec {
            path: "/api/v2/ticket_forms",
            collection_key: "ticket_forms",
            record_key: "ticket_form",
            comparator: Comparator::Name,
        },
        EntityKind::Brand => KindSpec {
            path: "/api/v2/brands",
            collection_key: "brands",
            record_key: "brand",
            comparator: Comparator::Name,
        },
        EntityKind::UserSegment => KindSpec {
            path: "/api/v2/help_center/user_segments",
            collection_key: "user_segments",
            record_key: "user_segment",
            comparator: Comparator::Name,
        },
    }
}

/// Typed view of just the fields the correlation rule reads.
#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

impl Candidate {
    fn label(&self, comparator: Comparator) -> Option<&str> {
        match comparator {
            Comparator::Name => self.name.as_deref(),
            Comparator::Title => self.title.as_deref(),
            // Users are resolved through search, never through listing.
            Comparator::Email => None,
        }
    }
}

/// Translates source-instance ids to target-instance ids, memoizing per
/// kind. One resolver is shared by every component of a migration session;
/// construct it with a [`ResolverCache`] seeded from configured overrides.
#[derive(Debug)]
pub struct Resolver {
    source: Arc<InstanceClient>,
    target: Arc<InstanceClient>,
    cache: ResolverCache,
}

impl Resolver {
    pub fn new(source: Arc<InstanceClient>, target: Arc<InstanceClient>, cache: ResolverCache) -> Self {
        Self {
            source,
            target,
            cache,
        }
    }

    pub fn cache(&self) -> &ResolverCache {
        &self.cache
    }

    /// Map a source id to its target counterpart, without creating anything.
    pub async fn resolve(&self, kind: EntityKind, source_id: u64) -> Result<Option<u64>> {
        self.resolve_with(kind, source_id, false).await
    }

    /// Like [`Resolver::resolve`], but synthesizes a missing target entity
    /// for kinds that support creation (users and organizations).
    pub async fn resolve_or_create(&self, kind: EntityKind, source_id: u64) -> Result<Option<u64>> {
        self.resolve_with(kind, source_id, true).await
    }

    async fn resolve_with(
        &self,
        kind: EntityKind,
        source_id: u64,
        create: bool,
    ) -> Result<Option<u64>> {
        let key = source_id.to_string();
        if let Some(target_id) = self.cache.get(kind, &key) {
            debug!(kind = %kind, source_id, target_id, "cache hit");
            return Ok(Some(target_id));
        }

        let resolved = match kind {
            EntityKind::User => self
                .locate_user(source_id, create)
                .await?
                .and_then(|user| user.id),
            EntityKind::Organization => self.locate_organization(source_id, create).await?,
            _ => {
                if create {
                    debug!(kind = %kind, "creation not supported for this kind, resolving only");
                }
                self.locate_by_listing(kind, source_id).await?
            }
        };

        if let Some(target_id) = resolved {
            self.cache.insert(kind, key, target_id);
        }
        Ok(resolved)
    }

    /// Resolve a user and return the full target record (needed for the
    /// suspended/role checks on requesters and assignees). Shares the id
    /// cache with [`Resolver::resolve`].
    pub async fn resolve_user(&self, source_id: u64, create: bool) -> Result<Option<User>> {
        let key = source_id.to_string();
        if let Some(target_id) = self.cache.get(EntityKind::User, &key) {
            return self
                .target
                .fetch(&format!("/api/v2/users/{target_id}.json"), "user")
                .await;
        }

        let located = self.locate_user(source_id, create).await?;
        if let Some(target_id) = located.as_ref().and_then(|user| user.id) {
            self.cache.insert(EntityKind::User, key, target_id);
        }
        Ok(located)
    }

    /// Exact-name lookup of a target organization. The fuzzy search drops
    /// `&` from the query (it breaks keyword matching); the exact comparison
    /// still uses the original name.
    pub async fn find_target_organization(&self, name: &str) -> Result<Option<Organization>> {
        let query_name = name.replace('&', "");
        let results = self
            .target
            .search(&format!("type:organization name:{query_name}"))
            .await?;
        for candidate in results {
            if candidate.get("name").and_then(Value::as_str) == Some(name) {
                return Ok(Some(decode_record(candidate, "organization")?));
            }
        }
        Ok(None)
    }

    async fn locate_user(&self, source_id: u64, create: bool) -> Result<Option<User>> {
        let Some(source_user) = self
            .source
            .fetch::<User>(&format!("/api/v2/users/{source_id}.json"), "user")
            .await?
        else {
            warn!(source_id, "source user not found");
            return Ok(None);
        };

        let Some(email) = source_user.email.clone().filter(|email| !email.is_empty()) else {
            warn!(source_id, "source user has no email, cannot correlate");
            return Ok(None);
        };

        let results = self.target.search(&format!("type:user email:{email}")).await?;
        for candidate in results {
            if candidate.get("email").and_then(Value::as_str) == Some(email.as_str()) {
                debug!(email, "user found on target");
                return Ok(Some(decode_record(candidate, "user")?));
            }
        }

        if !create {
            info!(source_id, email, "no matching target user");
            return Ok(None);
        }

        // Synthesize from the fixed allow-list of source fields.
        let mut new_user = User {
            id: None,
            name: source_user.name.clone(),
            email: Some(email.clone()),
            locale_id: source_user.locale_id,
            phone: source_user.phone.clone(),
            role: source_user.role.clone(),
            time_zone: source_user.time_zone.clone(),
            verified: source_user.verified,
            suspended: source_user.suspended,
            tags: source_user.tags.clone(),
            organization_id: None,
        };
        if let Some(org_id) = source_user.organization_id {
            // One-level recursive resolution of the new user's organization.
            new_user.organization_id =
                Box::pin(self.resolve(EntityKind::Organization, org_id)).await?;
        }

        info!(email, "creating target user");
        let created: User = self
            .target
            .create("/api/v2/users.json", "user", &new_user)
            .await?;

        if let Some(created_id) = created.id {
            self.copy_identities(source_id, created_id).await?;
        }
        Ok(Some(created))
    }

    /// Copy every non-primary identity of a freshly created user. A single
    /// identity failure is logged, not raised: the user itself exists.
    async fn copy_identities(&self, source_id: u64, target_id: u64) -> Result<()> {
        let identities: Vec<Identity> = self
            .source
            .list(
                &format!("/api/v2/users/{source_id}/identities.json"),
                "identities",
            )
            .await?;

        for identity in identities.into_iter().filter(|identity| !identity.primary) {
            let payload = Identity {
                id: None,
                user_id: Some(target_id),
                identity_type: identity.identity_type,
                value: identity.value,
                primary: false,
            };
            if let Err(error) = self
                .target
                .create::<_, Identity>(
                    &format!("/api/v2/users/{target_id}/identities.json"),
                    "identity",
                    &payload,
                )
                .await
            {
                warn!(user_id = target_id, error = %error, "failed to copy identity");
            }
        }
        Ok(())
    }

    async fn locate_organization(&self, source_id: u64, create: bool) -> Result<Option<u64>> {
        let Some(source_org) = self
            .source
            .fetch::<Organization>(
                &format!("/api/v2/organizations/{source_id}.json"),
                "organization",
            )
            .await?
        else {
            warn!(source_id, "source organization not found");
            return Ok(None);
        };

        if let Some(existing) = self.find_target_organization(&source_org.name).await? {
            debug!(name = %source_org.name, "organization found on target");
            return Ok(existing.id);
        }

        if !create {
            info!(source_id, name = %source_org.name, "no matching target organization");
            return Ok(None);
        }

        let new_org = Organization {
            id: None,
            name: source_org.name.clone(),
            shared_tickets: source_org.shared_tickets,
            shared_comments: source_org.shared_comments,
            external_id: source_org.external_id.clone(),
            domain_names: source_org.domain_names.clone(),
            details: source_org.details.clone(),
            notes: source_org.notes.clone(),
            group_id: None,
            tags: source_org.tags.clone(),
            organization_fields: serde_json::Map::new(),
        };

        info!(name = %new_org.name, "creating target organization");
        let created: Organization = self
            .target
            .create("/api/v2/organizations.json", "organization", &new_org)
            .await?;
        Ok(created.id)
    }

    /// Generic path for kinds correlated by listing the whole target
    /// collection and comparing labels. First matching candidate in result
    /// order wins; further duplicates are not inspected.
    async fn locate_by_listing(&self, kind: EntityKind, source_id: u64) -> Result<Option<u64>> {
        let spec = kind_spec(kind);

        let Some(source_entity) = self
            .source
            .fetch::<Candidate>(
                &format!("{}/{source_id}.json", spec.path),
                spec.record_key,
            )
            .await?
        else {
            warn!(kind = %kind, source_id, "source entity not found");
            return Ok(None);
        };

        let Some(label) = source_entity.label(spec.comparator).map(str::to_owned) else {
            warn!(kind = %kind, source_id, "source entity has no comparable label");
            return Ok(None);
        };

        debug!(kind = %kind, label, "not in cache, listing target candidates");
        let candidates: Vec<Candidate> = self
            .target
            .list(&format!("{}.json", spec.path), spec.collection_key)
            .await?;

        for candidate in candidates {
            if candidate.label(spec.comparator) == Some(label.as_str()) {
                if let Some(target_id) = candidate.id {
                    debug!(kind = %kind, label, target_id, "match found on target");
                    return Ok(Some(target_id));
                }
            }
        }

        warn!(kind = %kind, label, "no matching target entity");
        Ok(None)
    }
}

fn decode_record<T: serde::de::DeserializeOwned>(value: Value, kind: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        CaravelError::Internal(format!("failed to decode {kind} search result: {e}"))
    })
}
