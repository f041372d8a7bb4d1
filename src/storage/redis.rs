// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis cache backend.
//!
//! Two key families share one keyspace:
//! - `{prefix}person:{id}` holds the person as a JSON string
//! - `{prefix}nickname:{nickname}` is a presence marker (value `1`)
//!
//! Cache calls are single attempts. The cache is a fast path and a failed
//! call is reported to the caller, which falls back to slower tiers.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, AsyncCommands, Client};
use uuid::Uuid;

use super::traits::{PersonCache, StorageError};
use crate::metrics;
use crate::person::Person;
use crate::resilience::retry::{retry, RetryConfig};

pub struct RedisCache {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "people:" → "people:person:{id}")
    prefix: String,
}

impl RedisCache {
    /// Connect without a key prefix.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, None).await
    }

    /// Connect with an optional key prefix.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use people_store::storage::redis::RedisCache;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// // Keys will be "people:person:{id}" and "people:nickname:{nickname}"
    /// let cache = RedisCache::with_prefix("redis://localhost", Some("people:")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(connection_string: &str, prefix: Option<&str>) -> Result<Self, StorageError> {
        let client = Client::open(connection_string)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| {
            metrics::record_connection_error("redis");
            StorageError::Connection(e.to_string())
        })?;

        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[inline]
    fn person_key(&self, id: Uuid) -> String {
        format!("{}person:{}", self.prefix, id)
    }

    #[inline]
    fn nickname_key(&self, nickname: &str) -> String {
        format!("{}nickname:{}", self.prefix, nickname)
    }
}

fn connection_error(e: redis::RedisError) -> StorageError {
    metrics::record_connection_error("redis");
    StorageError::Connection(e.to_string())
}

#[async_trait]
impl PersonCache for RedisCache {
    async fn get(&self, id: Uuid) -> Result<Option<Person>, StorageError> {
        let mut conn = self.connection.clone();
        let data: Option<String> = conn.get(self.person_key(id)).await.map_err(connection_error)?;

        data.map(|json| {
            serde_json::from_str(&json).map_err(|e| StorageError::Serialization(e.to_string()))
        })
        .transpose()
    }

    async fn set(&self, person: &Person) -> Result<(), StorageError> {
        let json = serde_json::to_string(person)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let mut conn = self.connection.clone();
        let _: () = conn.set(self.person_key(person.id), json).await.map_err(connection_error)?;
        Ok(())
    }

    async fn nickname_exists(&self, nickname: &str) -> Result<bool, StorageError> {
        let mut conn = self.connection.clone();
        let exists: bool = conn.exists(self.nickname_key(nickname)).await.map_err(connection_error)?;
        Ok(exists)
    }

    async fn mark_nickname(&self, nickname: &str) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: () = conn.set(self.nickname_key(nickname), 1).await.map_err(connection_error)?;
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: () = conn.del(self.person_key(id)).await.map_err(connection_error)?;
        Ok(())
    }

    async fn release_nickname(&self, nickname: &str) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: () = conn.del(self.nickname_key(nickname)).await.map_err(connection_error)?;
        Ok(())
    }

    async fn claim_nickname(&self, nickname: &str) -> Result<bool, StorageError> {
        let mut conn = self.connection.clone();
        // SET NX replies OK when the key was written and nil when it already existed.
        let reply: Option<String> = cmd("SET")
            .arg(self.nickname_key(nickname))
            .arg(1)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(connection_error)?;
        Ok(reply.is_some())
    }
}
