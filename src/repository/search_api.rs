// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tiered search.
//!
//! ```text
//! search(term)
//!       │
//!       ├─→ Shadow index (substring, unflushed people)
//!       │        └─→ Results? Return
//!       │
//!       ├─→ Store full-text
//!       │        └─→ Results? Return
//!       │
//!       └─→ Store fuzzy (trigram)
//!                └─→ Return whatever it yields
//! ```
//!
//! The first tier with results wins; tiers are never merged. Store errors are
//! logged and treated as an empty tier.

use std::time::Instant;

use tracing::{debug, warn};

use super::{PersonRepository, SearchResult, SearchSource};
use crate::metrics;
use crate::resilience::deadline::with_deadline;

impl PersonRepository {
    /// Search people by term. Never fails; an unreachable store yields an
    /// empty result.
    #[tracing::instrument(skip(self))]
    pub async fn search(&self, term: &str) -> SearchResult {
        let start = Instant::now();
        let result = self.search_tiers(term).await;

        debug!(source = %result.source, count = result.len(), "Search finished");
        metrics::record_search(result.source.as_str(), result.len());
        metrics::record_latency("repository", "search", start.elapsed());
        result
    }

    async fn search_tiers(&self, term: &str) -> SearchResult {
        let people = self.shadow.search(term, self.search_limit);
        if !people.is_empty() {
            return SearchResult {
                people,
                source: SearchSource::Shadow,
            };
        }

        match with_deadline(
            "search_full_text",
            self.io_timeout,
            self.store.search_full_text(term, self.search_limit),
        )
        .await
        {
            Ok(people) if !people.is_empty() => {
                return SearchResult {
                    people,
                    source: SearchSource::FullText,
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Full-text search failed, trying fuzzy");
                metrics::record_operation("store", "search_full_text", "error");
            }
        }

        match with_deadline(
            "search_fuzzy",
            self.io_timeout,
            self.store.search_fuzzy(term, self.search_limit),
        )
        .await
        {
            Ok(people) if !people.is_empty() => SearchResult {
                people,
                source: SearchSource::Fuzzy,
            },
            Ok(_) => SearchResult::empty(),
            Err(e) => {
                warn!(error = %e, "Fuzzy search failed");
                metrics::record_operation("store", "search_fuzzy", "error");
                SearchResult::empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeopleStoreConfig;
    use crate::dispatcher::Dispatcher;
    use crate::person::Person;
    use crate::storage::memory::{InMemoryCache, InMemoryStore};
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn person(nickname: &str, name: &str, stack: &[&str]) -> Person {
        Person::new(
            nickname,
            name,
            NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            stack.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn repository(store: Arc<InMemoryStore>) -> PersonRepository {
        let config = PeopleStoreConfig::default();
        let dispatcher = Dispatcher::new(config.dispatcher(), store.clone()).run();
        PersonRepository::new(&config, Arc::new(InMemoryCache::new()), store, dispatcher)
    }

    #[tokio::test(start_paused = true)]
    async fn test_shadow_tier_wins() {
        let store = Arc::new(InMemoryStore::new());
        store.seed(&[person("durable", "Rust Durable", &[])]);
        let repo = repository(store);

        let fresh = repo.create(person("fresh", "Rust Fresh", &[])).await.unwrap();

        let result = repo.search("rust").await;
        assert_eq!(result.source, SearchSource::Shadow);
        assert_eq!(result.people, vec![fresh]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_text_beats_fuzzy() {
        let store = Arc::new(InMemoryStore::new());
        let exact = person("exact", "Grace Hopper", &["Cobol"]);
        store.seed(&[exact.clone(), person("near", "Cobal Fan", &[])]);
        let repo = repository(store);

        let result = repo.search("cobol").await;
        assert_eq!(result.source, SearchSource::FullText);
        assert_eq!(result.people, vec![exact]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fuzzy_when_full_text_is_empty() {
        let store = Arc::new(InMemoryStore::new());
        let grace = person("grace", "Grace Hopper", &["Cobol"]);
        store.seed(&[grace.clone()]);
        let repo = repository(store);

        let result = repo.search("hoppr").await;
        assert_eq!(result.source, SearchSource::Fuzzy);
        assert_eq!(result.people, vec![grace]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_match_is_empty() {
        let repo = repository(Arc::new(InMemoryStore::new()));

        let result = repo.search("nobody").await;
        assert_eq!(result.source, SearchSource::Empty);
        assert!(result.is_empty());
    }
}
