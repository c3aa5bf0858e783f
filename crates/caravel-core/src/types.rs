// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Closed string sets shared across the Caravel workspace.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::CaravelError;

/// The entity kinds the resolver can translate between instances.
///
/// Each kind has its own cache namespace: source ids from different
/// kinds must never collide in a shared map.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Organization,
    User,
    Group,
    TicketField,
    TicketForm,
    Brand,
    UserSegment,
}

/// Ticket lifecycle status as the remote API spells it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    New,
    Open,
    Pending,
    Hold,
    Solved,
    Closed,
    Deleted,
}

/// Which source tickets a migration batch should take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    /// Every ticket (hard-deleted ones are still dropped).
    All,
    /// Every ticket whose status is not `closed`.
    NotClosed,
    /// Only tickets with exactly this status.
    Only(TicketStatus),
}

impl StatusFilter {
    /// Whether a ticket with the given status passes this filter.
    pub fn allows(self, status: TicketStatus) -> bool {
        match self {
            Self::All => true,
            Self::NotClosed => status != TicketStatus::Closed,
            Self::Only(wanted) => status == wanted,
        }
    }
}

impl FromStr for StatusFilter {
    type Err = CaravelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "not_closed" => Ok(Self::NotClosed),
            other => other
                .parse::<TicketStatus>()
                .map(Self::Only)
                .map_err(|_| {
                    CaravelError::Config(format!(
                        "invalid status filter {other:?}: expected all, not_closed, or a ticket status"
                    ))
                }),
        }
    }
}
