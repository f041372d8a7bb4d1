// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Person repository.
//!
//! The [`PersonRepository`] is the facade the HTTP layer talks to. It ties
//! together the cache, the shadow index, the dispatcher and the durable store:
//!
//! ```text
//! create ──► claim nickname (cache) ──► shadow insert ─┬─► cache set
//!                                                      └─► dispatcher submit ──► batched insert
//!
//! find_by_id ──► cache ──► shadow ──► store (deadline) ──► cache populate
//!
//! search ──► shadow substring ──► store full-text ──► store fuzzy
//! ```
//!
//! # Example
//!
//! ```
//! use people_store::{PeopleStoreConfig, Person, PersonRepository, SearchSource};
//! use chrono::NaiveDate;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // No URLs configured: in-process cache and store
//! let repo = PersonRepository::connect(&PeopleStoreConfig::default()).await?;
//!
//! let ada = Person::new("ada", "Ada Lovelace", NaiveDate::from_ymd_opt(1815, 12, 10).unwrap(), vec!["Math".into()]);
//! let created = repo.create(ada).await?;
//!
//! // Visible before the first flush
//! assert_eq!(repo.find_by_id(&created.id.to_string()).await?, created);
//! let found = repo.search("lovelace").await;
//! assert_eq!(found.source, SearchSource::Shadow);
//!
//! repo.shutdown().await;
//! assert_eq!(repo.count_all().await?, 1);
//! # Ok(())
//! # }
//! ```

mod api;
mod lifecycle;
mod search_api;
mod types;

pub use types::{RepositoryError, SearchResult, SearchSource};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::config::PeopleStoreConfig;
use crate::dispatcher::DispatcherHandle;
use crate::shadow::ShadowIndex;
use crate::storage::traits::{PersonCache, PersonStore};

/// Facade over cache, shadow index, dispatcher and durable store.
///
/// `Send + Sync`; share it behind an `Arc`.
pub struct PersonRepository {
    cache: Arc<dyn PersonCache>,
    store: Arc<dyn PersonStore>,
    shadow: Arc<ShadowIndex>,
    dispatcher: DispatcherHandle,
    /// Deadline for every durable read and cache call
    io_timeout: Duration,
    search_limit: usize,
    /// Applies flush confirmations to the shadow index
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl PersonRepository {
    /// Build a repository over already-configured backends and a running
    /// dispatcher. Must be called inside a Tokio runtime.
    pub fn new(
        config: &PeopleStoreConfig,
        cache: Arc<dyn PersonCache>,
        store: Arc<dyn PersonStore>,
        dispatcher: DispatcherHandle,
    ) -> Self {
        let shadow = Arc::new(ShadowIndex::new(config.shadow_capacity));
        let listener = lifecycle::spawn_confirmation_listener(
            shadow.clone(),
            cache.clone(),
            config.io_timeout(),
            dispatcher.subscribe(),
        );

        Self {
            cache,
            store,
            shadow,
            dispatcher,
            io_timeout: config.io_timeout(),
            search_limit: config.search_limit.max(1),
            listener: Mutex::new(Some(listener)),
        }
    }

    pub fn shadow(&self) -> &ShadowIndex {
        &self.shadow
    }

    pub fn dispatcher(&self) -> &DispatcherHandle {
        &self.dispatcher
    }
}
