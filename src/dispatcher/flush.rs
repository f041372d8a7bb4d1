// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{DispatcherConfig, FlushEvent};
use crate::batching::FlushBatch;
use crate::metrics;
use crate::person::PersonRow;
use crate::resilience::deadline::with_deadline;
use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::traits::PersonStore;

pub(super) struct FlushRequest {
    pub(super) batch: Option<FlushBatch<PersonRow>>,
    /// Fired once this request (and every earlier one) is done
    pub(super) acks: Vec<oneshot::Sender<()>>,
}

pub(super) struct Flusher {
    store: Arc<dyn PersonStore>,
    retry: RetryConfig,
    timeout: Duration,
    events: broadcast::Sender<FlushEvent>,
}

impl Flusher {
    pub(super) fn new(
        config: &DispatcherConfig,
        store: Arc<dyn PersonStore>,
        events: broadcast::Sender<FlushEvent>,
    ) -> Self {
        Self {
            store,
            retry: config.flush_retry.clone(),
            timeout: config.flush_timeout,
            events,
        }
    }

    /// Process requests in arrival order until the accumulator hangs up.
    pub(super) async fn run(self, mut requests: mpsc::Receiver<FlushRequest>) {
        while let Some(FlushRequest { batch, acks }) = requests.recv().await {
            if let Some(batch) = batch {
                let event = self.flush(batch).await;
                // No subscribers is fine
                let _ = self.events.send(event);
            }
            for ack in acks {
                let _ = ack.send(());
            }
        }
    }

    #[tracing::instrument(skip(self, batch), fields(batch_id = %batch.batch_id, rows = batch.items.len(), reason = %batch.reason))]
    async fn flush(&self, batch: FlushBatch<PersonRow>) -> FlushEvent {
        let FlushBatch { batch_id, items, reason, age } = batch;
        let ids: Vec<Uuid> = items.iter().map(|row| row.id).collect();
        let start = Instant::now();
        metrics::record_batch_size(items.len());

        let mut attempts = 0usize;
        let result = retry("flush_batch", &self.retry, || {
            attempts += 1;
            if attempts > 1 {
                metrics::record_flush_retry();
            }
            with_deadline("insert_batch", self.timeout, self.store.insert_batch(&items))
        })
        .await;

        metrics::record_flush_duration(start.elapsed());
        metrics::record_flush(reason.as_str(), result.is_ok());

        match result {
            Ok(outcome) => {
                if !outcome.rejected.is_empty() {
                    warn!(
                        rejected = outcome.rejected.len(),
                        "Rows skipped by uniqueness constraint"
                    );
                    metrics::record_rows_rejected(outcome.rejected.len());
                }
                info!(
                    written = outcome.written.len(),
                    attempts,
                    age_ms = age.as_millis() as u64,
                    "Batch persisted"
                );
                FlushEvent::Persisted {
                    batch_id,
                    reason,
                    ids: outcome.written,
                    rejected: outcome.rejected,
                }
            }
            Err(e) => {
                error!(
                    error = %e,
                    attempts,
                    lost = ids.len(),
                    "Batch lost after exhausting flush retries"
                );
                metrics::record_persistence_loss(ids.len());
                FlushEvent::PersistenceLoss {
                    batch_id,
                    reason,
                    ids,
                    error: e.to_string(),
                }
            }
        }
    }
}
