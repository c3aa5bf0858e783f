// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Remote entity gateway for the Caravel migration toolkit.
//!
//! This crate provides [`InstanceClient`]: uniform read/search/create/
//! update/delete access to one instance of the remote record-management
//! API, with transparent cursor pagination and the incremental
//! (changed-since) ticket feed. The gateway surfaces non-2xx answers as
//! [`caravel_core::CaravelError::Gateway`] and leaves retry policy to its
//! callers.

pub mod attachments;
pub mod client;

pub use attachments::AttachmentPayload;
pub use client::{InstanceClient, TicketPage};
