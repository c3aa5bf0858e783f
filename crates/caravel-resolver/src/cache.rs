// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-kind id mappings, memoized for the process lifetime.
//!
//! One map per [`EntityKind`], keyed by the *string form* of the source id
//! so ids from different kinds can never collide in a shared structure.
//! Entries are monotonic: once cached, never invalidated within a run.
//! Nothing is persisted; a restart re-resolves from scratch against the
//! authoritative remote search.
//!
//! The maps sit behind a mutex so resolve-then-insert stays safe if callers
//! ever run concurrently. The lock is never held across an await.

use std::collections::HashMap;
use std::sync::Mutex;

use caravel_core::EntityKind;

/// Lazily populated source-id → target-id mappings, one namespace per kind.
#[derive(Debug, Default)]
pub struct ResolverCache {
    maps: Mutex<HashMap<EntityKind, HashMap<String, u64>>>,
}

impl ResolverCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache pre-seeded with fixed mappings (configured overrides for
    /// legacy ids). Seeded entries win over any later search.
    pub fn seeded<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (EntityKind, String, u64)>,
    {
        let cache = Self::new();
        for (kind, source_id, target_id) in entries {
            cache.insert(kind, source_id, target_id);
        }
        cache
    }

    pub fn get(&self, kind: EntityKind, source_id: &str) -> Option<u64> {
        self.maps
            .lock()
            .expect("resolver cache lock poisoned")
            .get(&kind)
            .and_then(|map| map.get(source_id))
            .copied()
    }

    pub fn insert(&self, kind: EntityKind, source_id: String, target_id: u64) {
        self.maps
            .lock()
            .expect("resolver cache lock poisoned")
            .entry(kind)
            .or_default()
            .insert(source_id, target_id);
    }

    /// Number of cached entries for one kind.
    pub fn len(&self, kind: EntityKind) -> usize {
        self.maps
            .lock()
            .expect("resolver cache lock poisoned")
            .get(&kind)
            .map_or(0, HashMap::len)
    }

    pub fn is_empty(&self, kind: EntityKind) -> bool {
        self.len(kind) == 0
    }
}
