// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cross-instance entity resolution for the Caravel migration toolkit.
//!
//! Three tightly related concerns live here:
//! - [`Resolver`] and its [`ResolverCache`]: translating source-instance
//!   ids to target-instance ids with per-kind memoization.
//! - Rule rewriting ([`Resolver::rewrite_condition`] /
//!   [`Resolver::rewrite_action`]): pointing automation-rule references at
//!   the target instance.
//! - [`OriginalIdMarker`]: stamping migrated tickets with their source id
//!   and re-finding them later, which is the whole idempotency story.

pub mod cache;
pub mod marker;
pub mod resolve;
pub mod rewrite;

pub use cache::ResolverCache;
pub use marker::OriginalIdMarker;
pub use resolve::Resolver;
