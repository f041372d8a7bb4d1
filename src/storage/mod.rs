// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache and durable-store backends.

pub mod memory;
pub mod redis;
pub mod sql;
pub mod traits;

pub use self::memory::{InMemoryCache, InMemoryStore};
pub use self::redis::RedisCache;
pub use self::sql::{PgStore, PG_SCHEMA};
pub use self::traits::{BatchWriteResult, PersonCache, PersonStore, StorageError};
