// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the person repository.

use thiserror::Error;

use crate::dispatcher::DispatchError;
use crate::person::Person;
use crate::storage::traits::StorageError;

/// Errors surfaced to callers of the repository.
///
/// Cache failures are never surfaced. Batch write failures are reported
/// through [`crate::FlushEvent::PersistenceLoss`], not here.
#[derive(Error, Debug, Clone)]
pub enum RepositoryError {
    #[error("Person not found")]
    NotFound,
    #[error("Nickname '{0}' is already taken")]
    NicknameTaken(String),
    #[error("Store unavailable: {0}")]
    Unavailable(#[from] StorageError),
}

impl From<DispatchError> for RepositoryError {
    fn from(e: DispatchError) -> Self {
        RepositoryError::Unavailable(StorageError::Backend(e.to_string()))
    }
}

/// Where search results came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSource {
    /// Accepted people not yet flushed
    Shadow,
    /// Durable full-text index
    FullText,
    /// Durable trigram similarity
    Fuzzy,
    /// No tier matched
    Empty,
}

impl SearchSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchSource::Shadow => "shadow",
            SearchSource::FullText => "full_text",
            SearchSource::Fuzzy => "fuzzy",
            SearchSource::Empty => "empty",
        }
    }
}

impl std::fmt::Display for SearchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Search result with the tier that produced it
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub people: Vec<Person>,
    pub source: SearchSource,
}

impl SearchResult {
    pub(super) fn empty() -> Self {
        Self {
            people: Vec::new(),
            source: SearchSource::Empty,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.people.len()
    }
}
