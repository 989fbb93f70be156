//! Background write-back of card mutations.
//!
//! Cards are sharded over a fixed set of workers by id, so every write for
//! one card goes through the same FIFO queue and lands in mutation order.
//! Queues are bounded; a full queue drops the task and counts it rather
//! than blocking the caller.

use crate::domain::{Card, CardId};
use crate::store::{encode_card, PersistenceBackend, CARD_RECORD_KIND};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

const RESULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
enum WriteTask {
    Put(Box<Card>),
    Delete(CardId),
    Barrier(oneshot::Sender<()>),
}

/// Result of one background task, published on the result channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(CardId),
    Deleted { id: CardId, existed: bool },
    Failed { id: CardId, error: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriterStats {
    pub queued: u64,
    pub written: u64,
    pub deleted: u64,
    pub failed: u64,
    pub dropped: u64,
    /// Accepted tasks not yet picked up by a worker.
    pub backlog: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Drained,
    TimedOut,
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    written: AtomicU64,
    deleted: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    backlog: AtomicU64,
}

/// Sharded, bounded worker pool mirroring cards into a backend.
#[derive(Debug)]
pub struct PersistenceWriter {
    shards: Vec<mpsc::Sender<WriteTask>>,
    counters: Arc<Counters>,
    results: broadcast::Sender<WriteOutcome>,
}

impl PersistenceWriter {
    /// Spawn `workers` tasks on the current tokio runtime.
    pub fn spawn(
        backend: Arc<dyn PersistenceBackend>,
        workers: usize,
        queue_capacity: usize,
    ) -> Self {
        let counters = Arc::new(Counters::default());
        let (results, _) = broadcast::channel(RESULT_CHANNEL_CAPACITY);

        let shards = (0..workers.max(1))
            .map(|shard| {
                let (tx, rx) = mpsc::channel(queue_capacity.max(1));
                tokio::spawn(run_worker(
                    shard,
                    rx,
                    Arc::clone(&backend),
                    Arc::clone(&counters),
                    results.clone(),
                ));
                tx
            })
            .collect();

        Self {
            shards,
            counters,
            results,
        }
    }

    /// Queue a full-card write. Returns false if the task was dropped.
    pub fn submit_put(&self, card: &Card) -> bool {
        self.submit(card.id, WriteTask::Put(Box::new(card.clone())))
    }

    /// Queue deletion of the persisted record for `id`.
    pub fn submit_delete(&self, id: CardId) -> bool {
        self.submit(id, WriteTask::Delete(id))
    }

    fn submit(&self, id: CardId, task: WriteTask) -> bool {
        let shard = self.shard_for(id);
        match self.shards[shard].try_send(task) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                self.counters.backlog.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(card_id = %id, shard, "write queue full, dropping task");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(card_id = %id, shard, "writer stopped, dropping task");
                false
            }
        }
    }

    fn shard_for(&self, id: CardId) -> usize {
        (id.as_uuid().as_u128() % self.shards.len() as u128) as usize
    }

    pub fn stats(&self) -> WriterStats {
        let c = &self.counters;
        WriterStats {
            queued: c.queued.load(Ordering::Relaxed),
            written: c.written.load(Ordering::Relaxed),
            deleted: c.deleted.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            backlog: c.backlog.load(Ordering::Relaxed),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WriteOutcome> {
        self.results.subscribe()
    }

    /// Wait until every task queued before this call has been attempted,
    /// or until `timeout` elapses.
    pub async fn flush(&self, timeout: Duration) -> FlushOutcome {
        let wait_all = async {
            let mut pending = Vec::with_capacity(self.shards.len());
            for shard in &self.shards {
                let (tx, rx) = oneshot::channel();
                if shard.send(WriteTask::Barrier(tx)).await.is_ok() {
                    pending.push(rx);
                }
            }
            for rx in pending {
                let _ = rx.await;
            }
        };

        match tokio::time::timeout(timeout, wait_all).await {
            Ok(()) => FlushOutcome::Drained,
            Err(_) => {
                warn!(backlog = self.stats().backlog, "flush timed out");
                FlushOutcome::TimedOut
            }
        }
    }
}

async fn run_worker(
    shard: usize,
    mut rx: mpsc::Receiver<WriteTask>,
    backend: Arc<dyn PersistenceBackend>,
    counters: Arc<Counters>,
    results: broadcast::Sender<WriteOutcome>,
) {
    while let Some(task) = rx.recv().await {
        let outcome = match task {
            WriteTask::Barrier(done) => {
                let _ = done.send(());
                continue;
            }
            WriteTask::Put(card) => {
                counters.backlog.fetch_sub(1, Ordering::Relaxed);
                put(backend.as_ref(), &card).await
            }
            WriteTask::Delete(id) => {
                counters.backlog.fetch_sub(1, Ordering::Relaxed);
                let path = backend.key_path(CARD_RECORD_KIND, &id.to_string());
                match backend.delete(&path).await {
                    Ok(existed) => WriteOutcome::Deleted { id, existed },
                    Err(e) => WriteOutcome::Failed {
                        id,
                        error: e.to_string(),
                    },
                }
            }
        };

        match &outcome {
            WriteOutcome::Written(id) => {
                counters.written.fetch_add(1, Ordering::Relaxed);
                debug!(card_id = %id, shard, "card mirrored");
            }
            WriteOutcome::Deleted { id, existed } => {
                counters.deleted.fetch_add(1, Ordering::Relaxed);
                debug!(card_id = %id, shard, existed, "card record deleted");
            }
            WriteOutcome::Failed { id, error } => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(card_id = %id, shard, error = %error, "persistence write failed");
            }
        }
        let _ = results.send(outcome);
    }
    debug!(shard, "writer worker stopped");
}

async fn put(backend: &dyn PersistenceBackend, card: &Card) -> WriteOutcome {
    let (payload, metadata) = match encode_card(CARD_RECORD_KIND, card, None) {
        Ok(encoded) => encoded,
        Err(e) => {
            return WriteOutcome::Failed {
                id: card.id,
                error: e.to_string(),
            }
        }
    };
    let path = backend.key_path(CARD_RECORD_KIND, &card.id.to_string());
    match backend.write(&path, payload, &metadata).await {
        Ok(()) => WriteOutcome::Written(card.id),
        Err(e) => WriteOutcome::Failed {
            id: card.id,
            error: e.to_string(),
        },
    }
}
