// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Create, lookup and count.

use tracing::{debug, warn};
use uuid::Uuid;

use super::{PersonRepository, RepositoryError};
use crate::dispatcher::Job;
use crate::metrics::{self, LatencyTimer};
use crate::person::Person;
use crate::resilience::deadline::with_deadline;

impl PersonRepository {
    /// Accept a new person.
    ///
    /// Returns as soon as the nickname is claimed and the person is queued.
    /// The durable insert happens on the next flush.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::NicknameTaken`] if the nickname is already in use
    /// - [`RepositoryError::Unavailable`] if the dispatcher is stopped, or the
    ///   cache is down and the store cannot confirm the nickname is free.
    ///   A person that could not be queued is rolled back from the shadow
    ///   index and the cache, and the nickname is released.
    #[tracing::instrument(skip(self, person), fields(id = %person.id, nickname = %person.nickname))]
    pub async fn create(&self, person: Person) -> Result<Person, RepositoryError> {
        let _timer = LatencyTimer::new("repository", "create");
        let person = person.with_stored_stack();

        if !self.claim_nickname(&person.nickname).await? {
            debug!("Nickname already taken");
            metrics::record_operation("repository", "create", "conflict");
            return Err(RepositoryError::NicknameTaken(person.nickname));
        }

        self.shadow.insert(person.clone());

        let (cached, submitted) = tokio::join!(
            with_deadline("cache_set", self.io_timeout, self.cache.set(&person)),
            self.dispatcher.submit(Job::new(person.clone())),
        );
        if let Err(e) = cached {
            warn!(error = %e, "Cache write failed, reads will fall back to the store");
            metrics::record_operation("cache", "set", "error");
        }
        if let Err(e) = submitted {
            warn!(error = %e, "Person could not be queued, rolling back");
            self.roll_back_create(&person).await;
            metrics::record_operation("repository", "create", "error");
            return Err(e.into());
        }

        metrics::record_operation("repository", "create", "success");
        Ok(person)
    }

    /// Undo the side effects of a creation that never reached the queue.
    async fn roll_back_create(&self, person: &Person) {
        self.shadow.discard(&[person.id]);

        let (removed, released) = tokio::join!(
            with_deadline("cache_remove", self.io_timeout, self.cache.remove(person.id)),
            with_deadline(
                "release_nickname",
                self.io_timeout,
                self.cache.release_nickname(&person.nickname),
            ),
        );
        if let Err(e) = removed.and(released) {
            warn!(error = %e, "Cache rollback incomplete");
            metrics::record_operation("cache", "rollback", "error");
        }
    }

    /// Claim the nickname in the cache. If the cache is down, fall back to
    /// the shadow index and the durable store.
    async fn claim_nickname(&self, nickname: &str) -> Result<bool, RepositoryError> {
        match with_deadline("claim_nickname", self.io_timeout, self.cache.claim_nickname(nickname)).await {
            Ok(claimed) => return Ok(claimed),
            Err(e) => {
                warn!(error = %e, "Cache unavailable for nickname guard, checking store");
                metrics::record_operation("cache", "claim_nickname", "error");
            }
        }

        if self.shadow.contains_nickname(nickname) {
            return Ok(false);
        }
        let exists =
            with_deadline("nickname_exists", self.io_timeout, self.store.nickname_exists(nickname)).await?;
        Ok(!exists)
    }

    /// Look a person up by id: cache, then shadow, then the durable store.
    ///
    /// An id that is not a valid UUID is reported as [`RepositoryError::NotFound`].
    #[tracing::instrument(skip(self))]
    pub async fn find_by_id(&self, id: &str) -> Result<Person, RepositoryError> {
        let _timer = LatencyTimer::new("repository", "find_by_id");

        let Ok(id) = Uuid::parse_str(id) else {
            metrics::record_operation("repository", "find_by_id", "not_found");
            return Err(RepositoryError::NotFound);
        };

        match with_deadline("cache_get", self.io_timeout, self.cache.get(id)).await {
            Ok(Some(person)) => {
                metrics::record_operation("cache", "find_by_id", "hit");
                return Ok(person);
            }
            Ok(None) => metrics::record_operation("cache", "find_by_id", "miss"),
            Err(e) => {
                warn!(error = %e, "Cache read failed, falling back");
                metrics::record_operation("cache", "find_by_id", "error");
            }
        }

        if let Some(person) = self.shadow.get(id) {
            metrics::record_operation("shadow", "find_by_id", "hit");
            return Ok(person);
        }

        let found = with_deadline("find_by_id", self.io_timeout, self.store.find_by_id(id))
            .await
            .inspect_err(|_| metrics::record_operation("store", "find_by_id", "error"))?;

        let Some(person) = found else {
            metrics::record_operation("store", "find_by_id", "not_found");
            return Err(RepositoryError::NotFound);
        };
        metrics::record_operation("store", "find_by_id", "hit");

        if let Err(e) = with_deadline("cache_set", self.io_timeout, self.cache.set(&person)).await {
            debug!(error = %e, "Cache populate failed");
        }
        Ok(person)
    }

    /// Total number of durable rows. Not cached.
    #[tracing::instrument(skip(self))]
    pub async fn count_all(&self) -> Result<u64, RepositoryError> {
        let _timer = LatencyTimer::new("repository", "count_all");

        let count = with_deadline("count_all", self.io_timeout, self.store.count_all())
            .await
            .inspect_err(|_| metrics::record_operation("store", "count_all", "error"))?;
        Ok(count)
    }
}
