// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::Job;
use crate::metrics;
use crate::person::PersonRow;

/// Consume jobs from the shared queue until it is closed and empty.
pub(super) async fn run(
    worker_id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    rows: mpsc::Sender<PersonRow>,
) {
    debug!(worker_id, "Worker started");

    loop {
        let job = {
            let mut jobs = jobs.lock().await;
            let job = jobs.recv().await;
            metrics::set_queue_depth(jobs.len());
            job
        };

        let Some(job) = job else {
            break;
        };

        if rows.send(job.into_row()).await.is_err() {
            warn!(worker_id, "Accumulator is gone, worker exiting");
            break;
        }
    }

    debug!(worker_id, "Worker stopped");
}
