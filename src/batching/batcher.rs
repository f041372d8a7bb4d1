// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Swap-and-clear batching.
//!
//! The [`Batcher`] owns a single batch slot. Taking a batch swaps in a fresh
//! pre-allocated vector before the caller does any I/O, so the slot is never
//! observed half-flushed.
//!
//! # Example
//!
//! ```
//! use people_store::batching::{BatchConfig, Batcher, FlushReason};
//!
//! let mut batcher: Batcher<u32> = Batcher::new(BatchConfig {
//!     initial_capacity: 16,
//!     max_rows: 3,
//! });
//!
//! assert_eq!(batcher.push(1), None);
//! assert_eq!(batcher.push(2), None);
//! assert_eq!(batcher.push(3), Some(FlushReason::Count));
//!
//! let batch = batcher.take(FlushReason::Count).unwrap();
//! assert_eq!(batch.items, vec![1, 2, 3]);
//! assert!(batcher.is_empty());
//! assert!(batcher.take(FlushReason::Time).is_none());
//! ```

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Batch flush trigger reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushReason {
    /// Flush interval elapsed
    Time,
    /// Row count threshold reached
    Count,
    /// Manual flush requested
    Manual,
    /// Final flush during shutdown
    Shutdown,
}

impl FlushReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Time => "time",
            FlushReason::Count => "count",
            FlushReason::Manual => "manual",
            FlushReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Capacity reserved for each fresh batch
    pub initial_capacity: usize,
    /// Take the batch early once it holds this many rows
    pub max_rows: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 10_000,
            max_rows: 10_000,
        }
    }
}

/// A batch taken out of the slot, ready for flush
#[derive(Debug)]
pub struct FlushBatch<T> {
    pub batch_id: Uuid,
    pub items: Vec<T>,
    pub reason: FlushReason,
    /// Time since the first item entered the batch
    pub age: Duration,
}

pub struct Batcher<T> {
    config: BatchConfig,
    items: Vec<T>,
    first_at: Option<Instant>,
}

impl<T> Batcher<T> {
    pub fn new(config: BatchConfig) -> Self {
        let items = Vec::with_capacity(config.initial_capacity);
        Self {
            config,
            items,
            first_at: None,
        }
    }

    /// Add an item. Returns [`FlushReason::Count`] once the row threshold is hit.
    pub fn push(&mut self, item: T) -> Option<FlushReason> {
        if self.items.is_empty() {
            self.first_at = Some(Instant::now());
        }
        self.items.push(item);

        (self.items.len() >= self.config.max_rows).then_some(FlushReason::Count)
    }

    /// Swap the current batch for a fresh one. `None` if nothing is pending.
    pub fn take(&mut self, reason: FlushReason) -> Option<FlushBatch<T>> {
        if self.items.is_empty() {
            return None;
        }

        let items = std::mem::replace(&mut self.items, Vec::with_capacity(self.config.initial_capacity));
        let age = self.first_at.take().map(|t| t.elapsed()).unwrap_or_default();
        let batch_id = Uuid::new_v4();
        debug!(%batch_id, count = items.len(), %reason, "Batch taken for flush");

        Some(FlushBatch {
            batch_id,
            items,
            reason,
            age,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Age of the oldest pending item
    #[must_use]
    pub fn age(&self) -> Duration {
        self.first_at.map(|t| t.elapsed()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batcher(max_rows: usize) -> Batcher<usize> {
        Batcher::new(BatchConfig {
            initial_capacity: 8,
            max_rows,
        })
    }

    #[test]
    fn test_take_empty_returns_none() {
        let mut b = batcher(10);
        assert!(b.take(FlushReason::Time).is_none());
    }

    #[test]
    fn test_take_swaps_in_fresh_preallocated_batch() {
        let mut b = batcher(10);
        for i in 0..5 {
            b.push(i);
        }

        let batch = b.take(FlushReason::Manual).unwrap();
        assert_eq!(batch.items, vec![0, 1, 2, 3, 4]);
        assert_eq!(batch.reason, FlushReason::Manual);

        assert!(b.is_empty());
        assert!(b.items.capacity() >= 8);
    }

    #[test]
    fn test_each_batch_gets_its_own_id() {
        let mut b = batcher(10);
        b.push(1);
        let first = b.take(FlushReason::Time).unwrap();
        b.push(2);
        let second = b.take(FlushReason::Time).unwrap();

        assert_ne!(first.batch_id, second.batch_id);
    }

    #[test]
    fn test_count_threshold() {
        let mut b = batcher(2);
        assert_eq!(b.push(1), None);
        assert_eq!(b.push(2), Some(FlushReason::Count));
    }

    #[tokio::test(start_paused = true)]
    async fn test_age_tracks_first_item() {
        let mut b = batcher(10);
        assert_eq!(b.age(), Duration::ZERO);

        b.push(1);
        tokio::time::advance(Duration::from_secs(2)).await;
        b.push(2);
        tokio::time::advance(Duration::from_secs(1)).await;

        assert_eq!(b.age(), Duration::from_secs(3));
        let batch = b.take(FlushReason::Time).unwrap();
        assert_eq!(batch.age, Duration::from_secs(3));
        assert_eq!(b.age(), Duration::ZERO);
    }

    #[test]
    fn test_reason_labels() {
        assert_eq!(FlushReason::Shutdown.to_string(), "shutdown");
        assert_eq!(FlushReason::Count.as_str(), "count");
    }
}
