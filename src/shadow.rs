// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shadow index of accepted-but-unflushed people.
//!
//! Between `create` and the next flush, a person exists only in the cache and
//! the dispatcher queue, neither of which can be searched. The shadow index
//! holds those people so search stays read-your-writes.
//!
//! # Retention
//!
//! ```text
//! create ──► insert ──► [ shadow ] ──► FlushEvent::Persisted ──► confirm / discard (removed)
//!                           │
//!                           └─► over capacity ──► oldest evicted (warn + metric)
//! ```
//!
//! Entries whose flush was lost stay until capacity pushes them out.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::metrics;
use crate::person::Person;

struct ShadowEntry {
    person: Person,
    blob: String,
    seq: u64,
}

#[derive(Default)]
struct ShadowInner {
    entries: HashMap<Uuid, ShadowEntry>,
    /// Insertion order. May hold ids that were already confirmed; those are
    /// skipped on read and dropped lazily.
    order: VecDeque<(u64, Uuid)>,
    nicknames: HashMap<String, Uuid>,
    next_seq: u64,
    evicted: u64,
}

impl ShadowInner {
    fn is_live(&self, seq: u64, id: &Uuid) -> bool {
        self.entries.get(id).is_some_and(|e| e.seq == seq)
    }

    fn remove(&mut self, id: &Uuid) -> Option<ShadowEntry> {
        let entry = self.entries.remove(id)?;
        if self.nicknames.get(&entry.person.nickname) == Some(id) {
            self.nicknames.remove(&entry.person.nickname);
        }
        Some(entry)
    }

    fn compact(&mut self) {
        if self.order.len() > 2 * self.entries.len() + 64 {
            let entries = &self.entries;
            self.order
                .retain(|(seq, id)| entries.get(id).is_some_and(|e| e.seq == *seq));
        }
    }
}

/// Bounded, insertion-ordered, substring-searchable set of people.
pub struct ShadowIndex {
    inner: RwLock<ShadowInner>,
    capacity: usize,
}

impl ShadowIndex {
    /// Create an index holding at most `capacity` people (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(ShadowInner::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&self, person: Person) {
        let mut inner = self.inner.write();

        inner.remove(&person.id);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.push_back((seq, person.id));
        inner.nicknames.insert(person.nickname.clone(), person.id);
        let blob = person.search_blob();
        inner.entries.insert(person.id, ShadowEntry { person, blob, seq });

        let mut evicted = 0usize;
        while inner.entries.len() > self.capacity {
            let Some((seq, id)) = inner.order.pop_front() else {
                break;
            };
            if inner.is_live(seq, &id) {
                inner.remove(&id);
                evicted += 1;
            }
        }

        if evicted > 0 {
            inner.evicted += evicted as u64;
            warn!(
                evicted,
                capacity = self.capacity,
                "Shadow index over capacity, evicted unconfirmed entries"
            );
            metrics::record_shadow_evictions(evicted);
        }
        metrics::set_shadow_entries(inner.entries.len());
    }

    /// Case-insensitive substring match over the search blob, in insertion
    /// order, at most `limit` results.
    #[must_use]
    pub fn search(&self, term: &str, limit: usize) -> Vec<Person> {
        let needle = term.to_lowercase();
        let inner = self.inner.read();

        inner
            .order
            .iter()
            .filter_map(|(seq, id)| inner.entries.get(id).filter(|e| e.seq == *seq))
            .filter(|e| e.blob.contains(&needle))
            .take(limit)
            .map(|e| e.person.clone())
            .collect()
    }

    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<Person> {
        self.inner.read().entries.get(&id).map(|e| e.person.clone())
    }

    #[must_use]
    pub fn contains_nickname(&self, nickname: &str) -> bool {
        self.inner.read().nicknames.contains_key(nickname)
    }

    /// Drop entries whose rows are now durable. Returns how many were removed.
    pub fn confirm(&self, ids: &[Uuid]) -> usize {
        self.remove_all(ids)
    }

    /// Drop entries that will never become durable: rows the store refused
    /// and creations that were never queued.
    pub fn discard(&self, ids: &[Uuid]) -> usize {
        self.remove_all(ids)
    }

    fn remove_all(&self, ids: &[Uuid]) -> usize {
        let mut inner = self.inner.write();
        let removed = ids.iter().filter(|id| inner.remove(id).is_some()).count();
        inner.compact();
        metrics::set_shadow_entries(inner.entries.len());
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total entries evicted for capacity since creation.
    #[must_use]
    pub fn evicted(&self) -> u64 {
        self.inner.read().evicted
    }
}
