// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The original-id marker field and the idempotency guard built on it.
//!
//! Every migrated ticket is stamped with its source id in a designated
//! custom field on the target schema. Re-finding a ticket through that
//! stamp is the sole de-duplication mechanism across interrupted re-runs:
//! there is no local migration ledger. The guard must therefore be
//! consulted immediately before any mutating call.

use serde_json::json;
use tracing::debug;

use caravel_core::records::{CustomField, Ticket};
use caravel_core::{CaravelError, Result};
use caravel_gateway::InstanceClient;

use crate::rewrite::scalar_string;

/// The target-side custom field that carries source ticket ids.
#[derive(Debug, Clone, Copy)]
pub struct OriginalIdMarker {
    field_id: u64,
}

impl OriginalIdMarker {
    /// Discover the marker field by its display title. Exactly one field
    /// with this title should exist; the first match wins if duplicates do.
    /// Absence is fatal for the whole run: without the marker, every dedup
    /// lookup would silently find nothing.
    pub async fn discover(target: &InstanceClient, title: &str) -> Result<Self> {
        let fields: Vec<caravel_core::records::TicketField> = target
            .list("/api/v2/ticket_fields.json", "ticket_fields")
            .await?;

        fields
            .iter()
            .find(|field| field.title == title)
            .and_then(|field| field.id)
            .map(|field_id| {
                debug!(field_id, title, "original-id marker field discovered");
                Self { field_id }
            })
            .ok_or_else(|| {
                CaravelError::Config(format!(
                    "no ticket field titled {title:?} exists on the target instance"
                ))
            })
    }

    /// Build a marker around an already-known field id, skipping discovery.
    pub fn with_field_id(field_id: u64) -> Self {
        Self { field_id }
    }

    pub fn field_id(&self) -> u64 {
        self.field_id
    }

    /// The custom-field entry that stamps a migrated ticket with its source
    /// id.
    pub fn stamp(&self, source_ticket_id: u64) -> CustomField {
        CustomField {
            id: self.field_id,
            value: json!(source_ticket_id),
        }
    }

    /// Find the target ticket migrated from the given source id, if any.
    ///
    /// The keyword search is fuzzy, so candidates are post-filtered on the
    /// marker field id with the value compared in string form (the API
    /// echoes custom values back as strings or numbers depending on the
    /// field type). First match wins.
    pub async fn find_migrated(
        &self,
        target: &InstanceClient,
        source_ticket_id: u64,
    ) -> Result<Option<Ticket>> {
        let results = target
            .search(&format!("type:ticket fieldvalue:{source_ticket_id}"))
            .await?;
        let wanted = source_ticket_id.to_string();

        for candidate in results {
            let Ok(ticket) = serde_json::from_value::<Ticket>(candidate.clone()) else {
                continue;
            };
            let stamped = ticket.custom_fields.iter().any(|field| {
                field.id == self.field_id
                    && scalar_string(&field.value).as_deref() == Some(wanted.as_str())
            });
            if stamped {
                debug!(source_ticket_id, target_id = ?ticket.id, "existing migrated ticket found");
                return Ok(Some(ticket));
            }
            // Keep scanning: the fuzzy search also surfaces tickets that
            // merely mention the id in some other field.
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caravel_test_utils::MockInstance;
    use serde_json::json;

    #[tokio::test]
    async fn discover_takes_first_title_match() {
        let target = MockInstance::start().await;
        target
            .mount_collection(
                "/api/v2/ticket_fields.json",
                "ticket_fields",
                vec![
                    json!({"id": 100, "title": "Priority"}),
                    json!({"id": 200, "title": "Original Id"}),
                    json!({"id": 300, "title": "Original Id"}),
                ],
            )
            .await;

        let marker = OriginalIdMarker::discover(&target.client("target"), "Original Id")
            .await
            .unwrap();
        assert_eq!(marker.field_id(), 200);
    }

    #[tokio::test]
    async fn discover_fails_without_the_field() {
        let target = MockInstance::start().await;
        target
            .mount_collection(
                "/api/v2/ticket_fields.json",
                "ticket_fields",
                vec![json!({"id": 100, "title": "Priority"})],
            )
            .await;

        let result = OriginalIdMarker::discover(&target.client("target"), "Original Id").await;
        match result {
            Err(CaravelError::Config(message)) => {
                assert!(message.contains("Original Id"), "got: {message}");
            }
            other => panic!("expected fatal config error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn find_migrated_post_filters_on_the_marker_field() {
        let target = MockInstance::start().await;
        target
            .mount_search(
                "type:ticket fieldvalue:4711",
                vec![
                    // Fuzzy hit: mentions the id in an unrelated field.
                    json!({
                        "id": 1,
                        "status": "open",
                        "custom_fields": [{"id": 999, "value": "4711"}]
                    }),
                    // Real hit: stamped in the marker field, as a string.
                    json!({
                        "id": 2,
                        "status": "closed",
                        "custom_fields": [{"id": 200, "value": "4711"}]
                    }),
                ],
            )
            .await;

        let marker = OriginalIdMarker::with_field_id(200);
        let found = marker
            .find_migrated(&target.client("target"), 4711)
            .await
            .unwrap()
            .expect("stamped ticket should be found");
        assert_eq!(found.id, Some(2));
    }

    #[tokio::test]
    async fn find_migrated_matches_numeric_stamps_too() {
        let target = MockInstance::start().await;
        target
            .mount_search(
                "type:ticket fieldvalue:4711",
                vec![json!({
                    "id": 3,
                    "status": "open",
                    "custom_fields": [{"id": 200, "value": 4711}]
                })],
            )
            .await;

        let marker = OriginalIdMarker::with_field_id(200);
        let found = marker
            .find_migrated(&target.client("target"), 4711)
            .await
            .unwrap();
        assert_eq!(found.and_then(|t| t.id), Some(3));
    }

    #[tokio::test]
    async fn find_migrated_returns_none_when_nothing_is_stamped() {
        let target = MockInstance::start().await;
        target.mount_search("type:ticket fieldvalue:4711", vec![]).await;

        let marker = OriginalIdMarker::with_field_id(200);
        let found = marker
            .find_migrated(&target.client("target"), 4711)
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn stamp_carries_the_numeric_source_id() {
        let marker = OriginalIdMarker::with_field_id(200);
        let stamp = marker.stamp(4711);
        assert_eq!(stamp.id, 200);
        assert_eq!(stamp.value, json!(4711));
    }
}
