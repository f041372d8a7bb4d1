// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process backends.
//!
//! [`InMemoryCache`] stands in for Redis and [`InMemoryStore`] for Postgres
//! when no URL is configured. The store mirrors the durable search tiers:
//! full-text matches whole words (like `plainto_tsquery('simple', ..)`), and
//! fuzzy matching ranks by trigram word similarity (like pg_trgm's `<%`).

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use super::traits::{BatchWriteResult, PersonCache, PersonStore, StorageError};
use crate::person::{Person, PersonRow};

/// pg_trgm's default `word_similarity_threshold`.
const WORD_SIMILARITY_THRESHOLD: f64 = 0.6;

pub struct InMemoryCache {
    people: DashMap<Uuid, Person>,
    nicknames: DashMap<String, ()>,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            people: DashMap::new(),
            nicknames: DashMap::new(),
        }
    }

    /// Number of cached people
    #[must_use]
    pub fn len(&self) -> usize {
        self.people.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    pub fn clear(&self) {
        self.people.clear();
        self.nicknames.clear();
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersonCache for InMemoryCache {
    async fn get(&self, id: Uuid) -> Result<Option<Person>, StorageError> {
        Ok(self.people.get(&id).map(|r| r.value().clone()))
    }

    async fn set(&self, person: &Person) -> Result<(), StorageError> {
        self.people.insert(person.id, person.clone());
        Ok(())
    }

    async fn nickname_exists(&self, nickname: &str) -> Result<bool, StorageError> {
        Ok(self.nicknames.contains_key(nickname))
    }

    async fn mark_nickname(&self, nickname: &str) -> Result<(), StorageError> {
        self.nicknames.insert(nickname.to_string(), ());
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<(), StorageError> {
        self.people.remove(&id);
        Ok(())
    }

    async fn release_nickname(&self, nickname: &str) -> Result<(), StorageError> {
        self.nicknames.remove(nickname);
        Ok(())
    }

    async fn claim_nickname(&self, nickname: &str) -> Result<bool, StorageError> {
        // The entry guard holds the shard lock, so check and insert are one step.
        match self.nicknames.entry(nickname.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(true)
            }
        }
    }
}

#[derive(Default)]
struct StoreInner {
    rows: Vec<PersonRow>,
    ids: HashSet<Uuid>,
    nicknames: HashSet<String>,
    /// Row count of every `insert_batch` call, in call order
    insert_calls: Vec<usize>,
}

/// Durable-store stand-in. Rows are kept in insertion order.
pub struct InMemoryStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// Insert rows directly, bypassing call accounting (for seeding).
    pub fn seed(&self, people: &[Person]) {
        let mut inner = self.inner.write();
        for person in people {
            Self::insert_row(&mut inner, person.to_row());
        }
    }

    /// Sizes of every bulk insert received so far.
    #[must_use]
    pub fn insert_calls(&self) -> Vec<usize> {
        self.inner.read().insert_calls.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().rows.is_empty()
    }

    fn insert_row(inner: &mut StoreInner, row: PersonRow) -> bool {
        if inner.ids.contains(&row.id) || inner.nicknames.contains(&row.nickname) {
            return false;
        }
        inner.ids.insert(row.id);
        inner.nicknames.insert(row.nickname.clone());
        inner.rows.push(row);
        true
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersonStore for InMemoryStore {
    async fn insert_batch(&self, rows: &[PersonRow]) -> Result<BatchWriteResult, StorageError> {
        let mut inner = self.inner.write();
        inner.insert_calls.push(rows.len());

        let mut result = BatchWriteResult::default();
        for row in rows {
            if Self::insert_row(&mut inner, row.clone()) {
                result.written.push(row.id);
            } else {
                result.rejected.push(row.id);
            }
        }
        Ok(result)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Person>, StorageError> {
        let inner = self.inner.read();
        Ok(inner.rows.iter().find(|r| r.id == id).map(PersonRow::to_person))
    }

    async fn nickname_exists(&self, nickname: &str) -> Result<bool, StorageError> {
        Ok(self.inner.read().nicknames.contains(nickname))
    }

    async fn search_full_text(&self, term: &str, limit: usize) -> Result<Vec<Person>, StorageError> {
        let wanted: Vec<String> = words(&term.to_lowercase()).map(str::to_string).collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let inner = self.inner.read();
        Ok(inner
            .rows
            .iter()
            .filter(|row| {
                let have: HashSet<&str> = words(&row.search).collect();
                wanted.iter().all(|w| have.contains(w.as_str()))
            })
            .take(limit)
            .map(PersonRow::to_person)
            .collect())
    }

    async fn search_fuzzy(&self, term: &str, limit: usize) -> Result<Vec<Person>, StorageError> {
        let term = term.to_lowercase();
        let inner = self.inner.read();

        let mut scored: Vec<(f64, &PersonRow)> = inner
            .rows
            .iter()
            .map(|row| (word_similarity(&term, &row.search), row))
            .filter(|(score, _)| *score >= WORD_SIMILARITY_THRESHOLD)
            .collect();
        // Stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, row)| row.to_person())
            .collect())
    }

    async fn count_all(&self) -> Result<u64, StorageError> {
        Ok(self.inner.read().rows.len() as u64)
    }
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric() && c != '#' && c != '+')
        .filter(|w| !w.is_empty())
}

/// pg_trgm-style trigrams: each word padded with two leading and one trailing space.
fn trigrams(text: &str) -> HashSet<[char; 3]> {
    let mut set = HashSet::new();
    for word in words(text) {
        let padded: Vec<char> = "  ".chars().chain(word.chars()).chain(" ".chars()).collect();
        for window in padded.windows(3) {
            set.insert([window[0], window[1], window[2]]);
        }
    }
    set
}

/// Best trigram similarity between the term and any single word of the blob.
fn word_similarity(term: &str, blob: &str) -> f64 {
    let wanted = trigrams(term);
    if wanted.is_empty() {
        return 0.0;
    }
    words(blob)
        .map(|word| {
            let have = trigrams(word);
            let shared = wanted.intersection(&have).count();
            shared as f64 / wanted.len() as f64
        })
        .fold(0.0, f64::max)
}
