// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Caravel migration toolkit.
//!
//! This crate provides the error taxonomy, the closed entity-kind and
//! status sets, and the wire records shared by every other crate in the
//! workspace.

pub mod error;
pub mod records;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::{CaravelError, Result};
pub use types::{EntityKind, StatusFilter, TicketStatus};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_variants_construct() {
        let _config = CaravelError::Config("test".into());
        let _gateway = CaravelError::Gateway {
            status: 500,
            path: "/api/v2/tickets.json".into(),
            body: "oops".into(),
        };
        let _transport = CaravelError::Transport {
            message: "test".into(),
            source: Some(Box::new(std::io::Error::other("test"))),
        };
        let _attachment = CaravelError::Attachment {
            url: "https://example.test/x.png".into(),
            message: "status 500".into(),
        };
        let _cycle = CaravelError::Cycle(7);
        let _internal = CaravelError::Internal("test".into());
    }

    #[test]
    fn entity_kind_has_seven_variants() {
        let variants = [
            EntityKind::Organization,
            EntityKind::User,
            EntityKind::Group,
            EntityKind::TicketField,
            EntityKind::TicketForm,
            EntityKind::Brand,
            EntityKind::UserSegment,
        ];
        assert_eq!(variants.len(), 7, "EntityKind must have exactly 7 variants");
    }
}
