// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Repository lifecycle: connect, flush-confirmation listener, shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{PersonRepository, RepositoryError};
use crate::config::PeopleStoreConfig;
use crate::dispatcher::{Dispatcher, FlushEvent};
use crate::metrics;
use crate::resilience::deadline::with_deadline;
use crate::shadow::ShadowIndex;
use crate::storage::memory::{InMemoryCache, InMemoryStore};
use crate::storage::redis::RedisCache;
use crate::storage::sql::PgStore;
use crate::storage::traits::{PersonCache, PersonStore};

impl PersonRepository {
    /// Build backends from the config, start the dispatcher and return a
    /// ready repository.
    ///
    /// Without `redis_url` (or if Redis cannot be reached) the cache runs
    /// in-process. Without `sql_url` the store runs in-process.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Unavailable`] if `sql_url` is set and Postgres
    /// cannot be reached.
    #[tracing::instrument(skip(config), fields(has_redis = config.redis_url.is_some(), has_sql = config.sql_url.is_some()))]
    pub async fn connect(config: &PeopleStoreConfig) -> Result<Self, RepositoryError> {
        let cache: Arc<dyn PersonCache> = match config.redis_url {
            Some(ref url) => match RedisCache::with_prefix(url, config.redis_prefix.as_deref()).await {
                Ok(redis) => {
                    info!("Connected to Redis cache");
                    Arc::new(redis)
                }
                Err(e) => {
                    warn!(error = %e, "Redis unreachable, using in-process cache");
                    Arc::new(InMemoryCache::new())
                }
            },
            None => {
                debug!("No redis_url configured, using in-process cache");
                Arc::new(InMemoryCache::new())
            }
        };

        let store: Arc<dyn PersonStore> = match config.sql_url {
            Some(ref url) => {
                let pg = PgStore::connect(url, config.sql_max_connections).await?;
                info!("Connected to Postgres store");
                Arc::new(pg)
            }
            None => {
                warn!("No sql_url configured, people will not outlive the process");
                Arc::new(InMemoryStore::new())
            }
        };

        let dispatcher = Dispatcher::new(config.dispatcher(), store.clone()).run();
        Ok(Self::new(config, cache, store, dispatcher))
    }

    /// Drain and flush pending jobs, then stop the confirmation listener.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("Shutting down person repository");
        self.dispatcher.stop().await;

        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        info!("Person repository shut down");
    }
}

/// Apply flush outcomes to the shadow index and the cache until the event
/// channel closes.
///
/// Rows the store refused are evicted from both, so `find_by_id` stops
/// serving a person who lost the nickname race to an already durable row.
pub(super) fn spawn_confirmation_listener(
    shadow: Arc<ShadowIndex>,
    cache: Arc<dyn PersonCache>,
    io_timeout: Duration,
    mut events: broadcast::Receiver<FlushEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(FlushEvent::Persisted { batch_id, ids, rejected, .. }) => {
                    let removed = shadow.confirm(&ids);
                    debug!(%batch_id, removed, "Shadow entries confirmed durable");

                    if !rejected.is_empty() {
                        shadow.discard(&rejected);
                        evict_rejected(cache.as_ref(), io_timeout, &rejected).await;
                        warn!(%batch_id, rejected = rejected.len(), "Refused rows evicted from shadow index and cache");
                    }
                }
                Ok(FlushEvent::PersistenceLoss { batch_id, ids, .. }) => {
                    warn!(
                        %batch_id,
                        lost = ids.len(),
                        "Batch lost; entries stay in shadow index until evicted"
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed flush confirmations; affected entries age out by capacity");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn evict_rejected(cache: &dyn PersonCache, io_timeout: Duration, ids: &[Uuid]) {
    for &id in ids {
        if let Err(e) = with_deadline("cache_remove", io_timeout, cache.remove(id)).await {
            warn!(%id, error = %e, "Could not evict refused person from cache");
            metrics::record_operation("cache", "remove", "error");
        }
    }
}

impl Drop for PersonRepository {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}
