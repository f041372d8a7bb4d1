// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write-behind dispatcher.
//!
//! Accepted people are persisted in time-windowed bulk inserts instead of one
//! INSERT per request.
//!
//! # Pipeline
//!
//! ```text
//! submit(job)
//!     │  bounded queue (queue_depth), full queue blocks the caller
//!     ▼
//! ┌──────────┐ ┌──────────┐      ┌──────────┐
//! │ worker 1 │ │ worker 2 │ ...  │ worker N │   job → PersonRow
//! └────┬─────┘ └────┬─────┘      └────┬─────┘
//!      └────────────┼─────────────────┘
//!                   ▼
//!            ┌─────────────┐   tick (flush_interval) / max_batch_rows /
//!            │ accumulator │   flush_now / shutdown
//!            │ (batch slot)│──────────────┐
//!            └─────────────┘              ▼
//!                                   ┌───────────┐  retry + deadline
//!                                   │  flusher  │──────────────► PersonStore::insert_batch
//!                                   └─────┬─────┘
//!                                         ▼
//!                        FlushEvent::{Persisted, PersistenceLoss} (broadcast)
//! ```
//!
//! # Example
//!
//! ```
//! # use std::sync::Arc;
//! # use chrono::NaiveDate;
//! use people_store::{Dispatcher, DispatcherConfig, InMemoryStore, Job, Person, PersonStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Arc::new(InMemoryStore::new());
//! let handle = Dispatcher::new(DispatcherConfig::default(), store.clone()).run();
//!
//! let person = Person::new("ada", "Ada", NaiveDate::from_ymd_opt(1815, 12, 10).unwrap(), vec![]);
//! handle.submit(Job::new(person)).await.unwrap();
//!
//! // Drains the queue and performs a final flush
//! handle.stop().await;
//! assert_eq!(store.count_all().await.unwrap(), 1);
//! # }
//! ```

mod accumulator;
mod flush;
mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::batching::{BatchConfig, FlushReason};
use crate::metrics;
use crate::person::{Person, PersonRow};
use crate::resilience::retry::RetryConfig;
use crate::storage::traits::PersonStore;

use accumulator::{Accumulator, Control};
use flush::Flusher;

/// Broadcast buffer for flush events. Slow subscribers observe `Lagged`.
const EVENT_BUFFER: usize = 64;

/// Pending manual flush requests.
const CONTROL_BUFFER: usize = 16;

/// Batches waiting for the flusher. A full slot blocks the accumulator,
/// which in turn backs up the workers and the job queue.
const FLUSH_BUFFER: usize = 2;

/// Dispatcher settings. Fixed at construction.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of worker tasks consuming the job queue
    pub worker_count: usize,
    /// Bound of the job queue
    pub queue_depth: usize,
    /// Time between periodic flushes
    pub flush_interval: Duration,
    /// Capacity reserved for each fresh batch
    pub batch_initial_capacity: usize,
    /// Flush early once a batch holds this many rows
    pub max_batch_rows: usize,
    /// Backoff and attempt budget for one batch insert
    pub flush_retry: RetryConfig,
    /// Deadline for one insert attempt
    pub flush_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_depth: 1_000,
            flush_interval: Duration::from_secs(5),
            batch_initial_capacity: 10_000,
            max_batch_rows: 10_000,
            flush_retry: RetryConfig::flush(3),
            flush_timeout: Duration::from_secs(30),
        }
    }
}

impl DispatcherConfig {
    fn batch(&self) -> BatchConfig {
        BatchConfig {
            initial_capacity: self.batch_initial_capacity,
            max_rows: self.max_batch_rows.max(1),
        }
    }
}

/// Intent to persist one person.
#[derive(Debug, Clone)]
pub struct Job {
    pub person: Person,
}

impl Job {
    pub fn new(person: Person) -> Self {
        Self { person }
    }

    pub fn into_row(self) -> PersonRow {
        self.person.to_row()
    }
}

/// Outcome of one batch flush.
#[derive(Debug, Clone)]
pub enum FlushEvent {
    /// The insert committed. `ids` are the rows now durable; `rejected`
    /// collided with an existing id or nickname and were never stored.
    Persisted {
        batch_id: Uuid,
        reason: FlushReason,
        ids: Vec<Uuid>,
        rejected: Vec<Uuid>,
    },
    /// Every attempt failed. The rows are gone.
    PersistenceLoss {
        batch_id: Uuid,
        reason: FlushReason,
        ids: Vec<Uuid>,
        error: String,
    },
}

impl FlushEvent {
    pub fn batch_id(&self) -> Uuid {
        match self {
            FlushEvent::Persisted { batch_id, .. } | FlushEvent::PersistenceLoss { batch_id, .. } => *batch_id,
        }
    }

    /// Durable ids for `Persisted`, lost ids for `PersistenceLoss`.
    pub fn ids(&self) -> &[Uuid] {
        match self {
            FlushEvent::Persisted { ids, .. } | FlushEvent::PersistenceLoss { ids, .. } => ids,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Dispatcher is stopped")]
    Stopped,
}

/// Unstarted dispatcher. Call [`Dispatcher::run`] to spawn its tasks.
pub struct Dispatcher {
    config: DispatcherConfig,
    store: Arc<dyn PersonStore>,
    events: broadcast::Sender<FlushEvent>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, store: Arc<dyn PersonStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self { config, store, events }
    }

    /// Subscribe before `run` to observe every flush.
    pub fn subscribe(&self) -> broadcast::Receiver<FlushEvent> {
        self.events.subscribe()
    }

    /// Spawn workers, accumulator and flusher. Must be called inside a Tokio runtime.
    pub fn run(self) -> DispatcherHandle {
        let worker_count = self.config.worker_count.max(1);
        let queue_depth = self.config.queue_depth.max(1);

        let (job_tx, job_rx) = mpsc::channel::<Job>(queue_depth);
        let (row_tx, row_rx) = mpsc::channel::<PersonRow>(queue_depth);
        let (control_tx, control_rx) = mpsc::channel::<Control>(CONTROL_BUFFER);
        let (flush_tx, flush_rx) = mpsc::channel(FLUSH_BUFFER);

        let job_rx = Arc::new(Mutex::new(job_rx));
        let mut tasks = Vec::with_capacity(worker_count + 2);

        for worker_id in 0..worker_count {
            tasks.push(tokio::spawn(worker::run(worker_id, job_rx.clone(), row_tx.clone())));
        }
        // Workers hold the only row senders, so the accumulator sees the
        // channel close once every worker has drained the queue.
        drop(row_tx);

        let accumulator = Accumulator::new(&self.config, row_rx, control_rx, flush_tx);
        tasks.push(tokio::spawn(accumulator.run()));

        let flusher = Flusher::new(&self.config, self.store, self.events.clone());
        tasks.push(tokio::spawn(flusher.run(flush_rx)));

        info!(
            worker_count,
            queue_depth,
            flush_interval_ms = self.config.flush_interval.as_millis() as u64,
            "Dispatcher started"
        );

        DispatcherHandle {
            inner: Arc::new(HandleInner {
                queue: RwLock::new(Some(job_tx)),
                control: control_tx,
                events: self.events,
                tasks: Mutex::new(Some(tasks)),
                submitted: AtomicU64::new(0),
            }),
        }
    }
}

struct HandleInner {
    queue: RwLock<Option<mpsc::Sender<Job>>>,
    control: mpsc::Sender<Control>,
    events: broadcast::Sender<FlushEvent>,
    tasks: Mutex<Option<Vec<JoinHandle<()>>>>,
    submitted: AtomicU64,
}

/// Cloneable handle to a running dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    inner: Arc<HandleInner>,
}

impl DispatcherHandle {
    /// Enqueue a job. Waits only while the queue is full.
    pub async fn submit(&self, job: Job) -> Result<(), DispatchError> {
        let queue = self.inner.queue.read().clone().ok_or(DispatchError::Stopped)?;

        queue.send(job).await.map_err(|_| DispatchError::Stopped)?;
        self.inner.submitted.fetch_add(1, Ordering::AcqRel);
        metrics::set_queue_depth(queue.max_capacity() - queue.capacity());
        Ok(())
    }

    /// Flush every job submitted so far and wait for the insert to finish.
    pub async fn flush_now(&self) -> Result<(), DispatchError> {
        let target = self.inner.submitted.load(Ordering::Acquire);
        let (ack_tx, ack_rx) = oneshot::channel();

        self.inner
            .control
            .send(Control::Flush { target, ack: ack_tx })
            .await
            .map_err(|_| DispatchError::Stopped)?;
        ack_rx.await.map_err(|_| DispatchError::Stopped)
    }

    /// Close the queue, drain it, flush what is left and wait for the
    /// pipeline to exit. Concurrent and later calls return once that is done.
    pub async fn stop(&self) {
        drop(self.inner.queue.write().take());

        // Held until every task has exited, so other callers wait here
        let mut tasks = self.inner.tasks.lock().await;
        let Some(handles) = tasks.take() else {
            return;
        };
        info!("Dispatcher stopping, draining queue");

        for task in handles {
            if let Err(e) = task.await {
                error!(error = %e, "Dispatcher task failed during shutdown");
            }
        }
        metrics::set_queue_depth(0);
        info!("Dispatcher stopped");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlushEvent> {
        self.inner.events.subscribe()
    }

    /// Jobs accepted since start
    pub fn submitted(&self) -> u64 {
        self.inner.submitted.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.queue.read().is_none()
    }
}
