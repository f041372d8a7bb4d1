// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Postgres durable store.
//!
//! Schema (see [`PG_SCHEMA`]):
//! ```sql
//! CREATE TABLE people (
//!   id UUID PRIMARY KEY,
//!   nickname VARCHAR(32) NOT NULL UNIQUE,
//!   name VARCHAR(100) NOT NULL,
//!   birthdate DATE NOT NULL,
//!   stack TEXT NOT NULL DEFAULT '',   -- comma-delimited tags
//!   search TEXT NOT NULL,             -- lowercased nickname, name and tags
//!   search_tsv TSVECTOR GENERATED ALWAYS AS (to_tsvector('simple', search)) STORED
//! )
//! ```
//!
//! Search runs in two tiers:
//! - full-text: `search_tsv @@ plainto_tsquery('simple', $1)` (GIN on `search_tsv`)
//! - fuzzy: `$1 <% search` ranked by `word_similarity` (GIN trigram on `search`)

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use super::traits::{BatchWriteResult, PersonStore, StorageError};
use crate::metrics;
use crate::person::{Person, PersonRow};
use crate::resilience::retry::{retry, RetryConfig};

/// DDL for the `people` table and its search indexes.
pub const PG_SCHEMA: &str = r#"
CREATE EXTENSION IF NOT EXISTS pg_trgm;
CREATE TABLE IF NOT EXISTS people (
    id UUID PRIMARY KEY,
    nickname VARCHAR(32) NOT NULL UNIQUE,
    name VARCHAR(100) NOT NULL,
    birthdate DATE NOT NULL,
    stack TEXT NOT NULL DEFAULT '',
    search TEXT NOT NULL,
    search_tsv TSVECTOR GENERATED ALWAYS AS (to_tsvector('simple', search)) STORED
);
CREATE INDEX IF NOT EXISTS idx_people_search_tsv ON people USING GIN (search_tsv);
CREATE INDEX IF NOT EXISTS idx_people_search_trgm ON people USING GIN (search gin_trgm_ops);
"#;

/// Rows per INSERT statement. Six binds per row keeps us under the
/// 65535 bind-parameter limit.
const INSERT_CHUNK_ROWS: usize = 5_000;

#[derive(sqlx::FromRow)]
struct PersonRecord {
    id: Uuid,
    nickname: String,
    name: String,
    birthdate: NaiveDate,
    stack: String,
}

impl PersonRecord {
    fn into_person(self) -> Person {
        Person::from_stored(self.id, self.nickname, self.name, self.birthdate, &self.stack)
    }
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect with startup-mode retry (fails fast if the URL is wrong).
    ///
    /// The schema is expected to exist; call [`PgStore::init_schema`] to create it.
    pub async fn connect(connection_string: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            PgPoolOptions::new()
                .max_connections(max_connections.max(1))
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(|e| StorageError::Connection(e.to_string()))
        })
        .await
        .inspect_err(|_| metrics::record_connection_error("postgres"))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    /// Create the table, extension and indexes if missing.
    pub async fn init_schema(&self) -> Result<(), StorageError> {
        retry("sql_init_schema", &RetryConfig::startup(), || async {
            sqlx::raw_sql(PG_SCHEMA)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;
        Ok(())
    }

    async fn fetch_people(&self, name: &str, sql: &'static str, term: &str, limit: usize) -> Result<Vec<Person>, StorageError> {
        let records: Vec<PersonRecord> = retry(name, &RetryConfig::query(), || async {
            sqlx::query_as::<_, PersonRecord>(sql)
                .bind(term)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(backend_error)
        })
        .await?;

        Ok(records.into_iter().map(PersonRecord::into_person).collect())
    }
}

fn backend_error(e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StorageError::Connection(e.to_string())
        }
        other => StorageError::Backend(other.to_string()),
    }
}

#[async_trait]
impl PersonStore for PgStore {
    /// One transaction per batch, so a retried batch never half-applies.
    async fn insert_batch(&self, rows: &[PersonRow]) -> Result<BatchWriteResult, StorageError> {
        if rows.is_empty() {
            return Ok(BatchWriteResult::default());
        }

        let mut tx = self.pool.begin().await.map_err(backend_error)?;
        let mut inserted: HashSet<Uuid> = HashSet::with_capacity(rows.len());

        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO people (id, nickname, name, birthdate, stack, search) ");
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.id)
                    .push_bind(&row.nickname)
                    .push_bind(&row.name)
                    .push_bind(row.birthdate)
                    .push_bind(&row.stack)
                    .push_bind(&row.search);
            });
            builder.push(" ON CONFLICT DO NOTHING RETURNING id");

            let ids: Vec<Uuid> = builder
                .build_query_scalar()
                .fetch_all(&mut *tx)
                .await
                .map_err(backend_error)?;
            inserted.extend(ids);
        }

        tx.commit().await.map_err(backend_error)?;
        debug!(rows = rows.len(), written = inserted.len(), "Inserted people batch");

        Ok(BatchWriteResult::from_inserted(rows, &inserted))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Person>, StorageError> {
        let record: Option<PersonRecord> = retry("sql_find_by_id", &RetryConfig::query(), || async {
            sqlx::query_as::<_, PersonRecord>(
                "SELECT id, nickname, name, birthdate, stack FROM people WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_error)
        })
        .await?;

        Ok(record.map(PersonRecord::into_person))
    }

    async fn nickname_exists(&self, nickname: &str) -> Result<bool, StorageError> {
        retry("sql_nickname_exists", &RetryConfig::query(), || async {
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM people WHERE nickname = $1)")
                .bind(nickname)
                .fetch_one(&self.pool)
                .await
                .map_err(backend_error)
        })
        .await
    }

    async fn search_full_text(&self, term: &str, limit: usize) -> Result<Vec<Person>, StorageError> {
        self.fetch_people(
            "sql_search_full_text",
            r#"
            SELECT id, nickname, name, birthdate, stack
            FROM people
            WHERE search_tsv @@ plainto_tsquery('simple', $1)
            LIMIT $2
            "#,
            &term.to_lowercase(),
            limit,
        )
        .await
    }

    async fn search_fuzzy(&self, term: &str, limit: usize) -> Result<Vec<Person>, StorageError> {
        self.fetch_people(
            "sql_search_fuzzy",
            r#"
            SELECT id, nickname, name, birthdate, stack
            FROM people
            WHERE $1 <% search
            ORDER BY word_similarity($1, search) DESC
            LIMIT $2
            "#,
            &term.to_lowercase(),
            limit,
        )
        .await
    }

    async fn count_all(&self) -> Result<u64, StorageError> {
        let count: i64 = retry("sql_count_all", &RetryConfig::query(), || async {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM people")
                .fetch_one(&self.pool)
                .await
                .map_err(backend_error)
        })
        .await?;

        Ok(count as u64)
    }
}
