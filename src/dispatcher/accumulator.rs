// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use super::flush::FlushRequest;
use super::DispatcherConfig;
use crate::batching::{Batcher, FlushReason};
use crate::metrics;
use crate::person::PersonRow;

pub(super) enum Control {
    /// Flush once `target` rows have arrived, then ack after the insert.
    Flush { target: u64, ack: oneshot::Sender<()> },
}

/// Sole owner of the batch slot.
pub(super) struct Accumulator {
    batcher: Batcher<PersonRow>,
    ticker: Interval,
    flush_interval: Duration,
    rows: mpsc::Receiver<PersonRow>,
    control: mpsc::Receiver<Control>,
    flusher: mpsc::Sender<FlushRequest>,
    received: u64,
    waiting: Vec<(u64, oneshot::Sender<()>)>,
}

impl Accumulator {
    pub(super) fn new(
        config: &DispatcherConfig,
        rows: mpsc::Receiver<PersonRow>,
        control: mpsc::Receiver<Control>,
        flusher: mpsc::Sender<FlushRequest>,
    ) -> Self {
        // First tick one full interval after start
        let mut ticker = interval_at(Instant::now() + config.flush_interval, config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            batcher: Batcher::new(config.batch()),
            ticker,
            flush_interval: config.flush_interval,
            rows,
            control,
            flusher,
            received: 0,
            waiting: Vec::new(),
        }
    }

    pub(super) async fn run(mut self) {
        loop {
            tokio::select! {
                // Rows first, so a tick never splits rows that already arrived
                biased;

                row = self.rows.recv() => match row {
                    Some(row) => {
                        self.received += 1;
                        if let Some(reason) = self.batcher.push(row) {
                            self.flush(reason, Vec::new()).await;
                        } else if self.batcher.age() >= self.flush_interval {
                            // A queue that never empties keeps the ticker branch from running
                            self.flush(FlushReason::Time, Vec::new()).await;
                        }
                        self.release_waiting().await;
                    }
                    None => break,
                },

                Some(Control::Flush { target, ack }) = self.control.recv() => {
                    self.waiting.push((target, ack));
                    self.release_waiting().await;
                }

                _ = self.ticker.tick() => {
                    self.flush(FlushReason::Time, Vec::new()).await;
                }
            }
        }

        // Workers are gone and the queue is drained.
        let acks = self.waiting.drain(..).map(|(_, ack)| ack).collect();
        info!(pending = self.batcher.len(), "Final flush on shutdown");
        self.flush(FlushReason::Shutdown, acks).await;
    }

    /// Flush for every manual request whose rows have all arrived.
    async fn release_waiting(&mut self) {
        if !self.waiting.iter().any(|(target, _)| *target <= self.received) {
            return;
        }

        let received = self.received;
        let (ready, pending): (Vec<_>, Vec<_>) =
            self.waiting.drain(..).partition(|(target, _)| *target <= received);
        self.waiting = pending;

        let acks = ready.into_iter().map(|(_, ack)| ack).collect();
        self.flush(FlushReason::Manual, acks).await;
    }

    /// Hand the current batch (if any) to the flusher. Acks ride along even
    /// when the batch is empty, so they fire after every earlier flush.
    async fn flush(&mut self, reason: FlushReason, acks: Vec<oneshot::Sender<()>>) {
        let batch = self.batcher.take(reason);
        if batch.is_none() && acks.is_empty() {
            return;
        }
        if let Some(ref batch) = batch {
            debug!(batch_id = %batch.batch_id, rows = batch.items.len(), %reason, "Handing batch to flusher");
        }

        if let Err(mpsc::error::SendError(request)) = self.flusher.send(FlushRequest { batch, acks }).await {
            let rows = request.batch.map(|b| b.items.len()).unwrap_or(0);
            error!(%reason, rows, "Flusher is gone, batch dropped");
            metrics::record_persistence_loss(rows);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::person::Person;
    use chrono::NaiveDate;

    fn row(n: usize) -> PersonRow {
        Person::new(format!("p{}", n), "P", NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(), vec![]).to_row()
    }

    #[tokio::test(start_paused = true)]
    async fn test_backlog_does_not_hold_rows_past_interval() {
        let config = DispatcherConfig::default();
        let (row_tx, row_rx) = mpsc::channel(1_000);
        let (_control_tx, control_rx) = mpsc::channel(1);
        let (flush_tx, mut flush_rx) = mpsc::channel(16);
        tokio::spawn(Accumulator::new(&config, row_rx, control_rx, flush_tx).run());

        row_tx.send(row(0)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        // Backlog is already queued when the interval elapses
        for n in 1..=100 {
            row_tx.try_send(row(n)).unwrap();
        }
        tokio::time::advance(Duration::from_secs(5)).await;

        let first = flush_rx.recv().await.unwrap().batch.unwrap();
        assert_eq!(first.reason, FlushReason::Time);
        assert_eq!(first.items.len(), 2);

        let second = flush_rx.recv().await.unwrap().batch.unwrap();
        assert_eq!(second.items.len(), 99);
    }
}
