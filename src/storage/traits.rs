// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::person::{Person, PersonRow};

#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Operation '{operation}' timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result of a bulk insert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchWriteResult {
    /// Ids of the rows actually inserted
    pub written: Vec<Uuid>,
    /// Ids of the rows dropped by the uniqueness constraint (id or nickname)
    pub rejected: Vec<Uuid>,
}

impl BatchWriteResult {
    /// Split `rows` into written and rejected given the ids the store
    /// reported as inserted. Input order is kept.
    pub fn from_inserted(rows: &[PersonRow], inserted: &HashSet<Uuid>) -> Self {
        let (written, rejected) = rows.iter().map(|row| row.id).partition(|id| inserted.contains(id));
        Self { written, rejected }
    }
}

/// Fast-path cache over people by id plus a nickname presence set.
///
/// Every method may fail with a connectivity error, which callers treat as
/// "cache unavailable", never as "absent".
#[async_trait]
pub trait PersonCache: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Person>, StorageError>;
    async fn set(&self, person: &Person) -> Result<(), StorageError>;
    async fn nickname_exists(&self, nickname: &str) -> Result<bool, StorageError>;
    async fn mark_nickname(&self, nickname: &str) -> Result<(), StorageError>;

    /// Forget the cached person. The nickname marker is left alone.
    async fn remove(&self, id: Uuid) -> Result<(), StorageError>;

    /// Drop the nickname marker of a creation that was never queued.
    async fn release_nickname(&self, nickname: &str) -> Result<(), StorageError>;

    /// Mark the nickname if it is free. Returns `true` if this caller claimed it.
    ///
    /// The default implementation is check-then-set and is NOT atomic;
    /// backends override it with a single atomic operation.
    async fn claim_nickname(&self, nickname: &str) -> Result<bool, StorageError> {
        if self.nickname_exists(nickname).await? {
            return Ok(false);
        }
        self.mark_nickname(nickname).await?;
        Ok(true)
    }
}

/// Durable relational store for people.
#[async_trait]
pub trait PersonStore: Send + Sync {
    /// Insert all rows in one round trip per chunk. Rows that collide with an
    /// existing id or nickname are skipped and reported as rejected.
    async fn insert_batch(&self, rows: &[PersonRow]) -> Result<BatchWriteResult, StorageError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Person>, StorageError>;

    async fn nickname_exists(&self, nickname: &str) -> Result<bool, StorageError>;

    /// Primary full-text query over the search blob.
    async fn search_full_text(&self, term: &str, limit: usize) -> Result<Vec<Person>, StorageError>;

    /// Trigram-similarity query over the search blob.
    async fn search_fuzzy(&self, term: &str, limit: usize) -> Result<Vec<Person>, StorageError>;

    async fn count_all(&self) -> Result<u64, StorageError>;
}
