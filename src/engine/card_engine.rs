//! The card engine: one explicitly constructed instance owning the pool,
//! its index snapshot, the write-back workers and the archive hand-off.

use super::capacity::select_evictions;
use super::dedup::{self, Action};
use super::discard::{DiscardPolicy, DiscardReason};
use super::index::DualIndex;
use super::keys::KeyDeriver;
use super::score;
use super::EngineError;
use crate::archive::Archive;
use crate::config::EngineConfig;
use crate::domain::{
    Card, CardId, CardKey, CardPatch, CardState, CloseEvent, HistoryEntry, KeyInputs, OpenContext,
    OpenEvent, Rank, TimeMs,
};
use crate::store::PersistenceBackend;
use crate::sync::{
    merge_into, reduce_newest, CardLoader, FlushOutcome, LoadReport, PersistenceWriter,
    SingleFlight, WriteOutcome, WriterStats,
};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// How `open` satisfied a creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Brand-new card, no prior record under the key.
    Created,
    /// Existing live card reactivated (OVERLAP_ACTIVE, generation bumped).
    Reactivated,
    /// Brand-new card after purging a REMOVED predecessor.
    Recreated,
}

#[derive(Debug, Clone)]
pub struct OpenOutcome {
    pub card: Card,
    pub disposition: Disposition,
    /// Active cards removed by the capacity manager to make room.
    pub evicted: Vec<CardId>,
    /// GRAY cards flipped to REMOVED by this cycle's sweep.
    pub swept: Vec<CardId>,
}

#[derive(Debug, Clone)]
pub struct CloseOutcome {
    pub card: Card,
    pub entry: HistoryEntry,
    pub score: Decimal,
    pub rank: Rank,
    /// Set when the auto-discard policy removed the card.
    pub discarded: Option<DiscardReason>,
    /// Whether the archive accepted the discarded card.
    pub archived: bool,
}

#[derive(Debug, Clone)]
pub struct DiscardOutcome {
    pub card: Card,
    pub archived: bool,
}

/// Owns the authoritative card collection.
///
/// Every logical operation (lookup, decide, mutate, schedule write) runs
/// under one mutex so the per-key active singleton and the capacity ceiling
/// hold under concurrent callers. Reads go through an immutable
/// [`DualIndex`] snapshot that is rebuilt lazily after mutations.
pub struct CardEngine {
    config: EngineConfig,
    keys: KeyDeriver,
    policy: DiscardPolicy,
    pool: Mutex<Vec<Card>>,
    index: RwLock<Arc<DualIndex>>,
    index_stale: AtomicBool,
    writer: PersistenceWriter,
    backend: Arc<dyn PersistenceBackend>,
    archive: Arc<dyn Archive>,
    loads: SingleFlight<LoadReport>,
}

impl std::fmt::Debug for CardEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardEngine")
            .field("config", &self.config)
            .field("cards", &self.pool.lock().len())
            .field("writer", &self.writer.stats())
            .finish()
    }
}

impl CardEngine {
    /// Build an engine and spawn its write-back workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn PersistenceBackend>,
        archive: Arc<dyn Archive>,
    ) -> Arc<Self> {
        let writer = PersistenceWriter::spawn(
            Arc::clone(&backend),
            config.writer_workers,
            config.writer_queue_capacity,
        );
        Arc::new(Self {
            keys: KeyDeriver::new(config.key_cache_capacity),
            policy: DiscardPolicy::new(config.loss_threshold_percent, config.discard_window),
            pool: Mutex::new(Vec::new()),
            index: RwLock::new(Arc::new(DualIndex::default())),
            index_stale: AtomicBool::new(false),
            writer,
            backend,
            archive,
            loads: SingleFlight::new(),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn derive_key(&self, inputs: &KeyInputs) -> CardKey {
        self.keys.derive(inputs, self.config.value_precision)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Current index snapshot, rebuilt first if a mutation made it stale.
    pub fn snapshot(&self) -> Arc<DualIndex> {
        if self.index_stale.load(Ordering::Acquire) {
            let pool = self.pool.lock();
            if self.index_stale.swap(false, Ordering::AcqRel) {
                *self.index.write() = Arc::new(DualIndex::build(&pool));
            }
        }
        Arc::clone(&self.index.read())
    }

    pub fn get_by_id(&self, id: &CardId) -> Option<Card> {
        self.snapshot().get(id).map(|c| Card::clone(c))
    }

    /// Newest card under `key`, preferring a non-removed one.
    pub fn get_by_key(&self, key: &CardKey) -> Option<Card> {
        self.snapshot().newest_for_key(key).map(|c| Card::clone(c))
    }

    pub fn get_active_by_key(&self, key: &CardKey) -> Vec<Card> {
        self.snapshot()
            .active_for_key(key)
            .iter()
            .map(|c| Card::clone(c))
            .collect()
    }

    /// Active cards, newest per key, oldest first.
    pub fn list_active(&self) -> Vec<Card> {
        self.snapshot()
            .list_active()
            .iter()
            .map(|c| Card::clone(c))
            .collect()
    }

    pub fn list_all_non_removed(&self) -> Vec<Card> {
        self.snapshot()
            .list_non_removed()
            .iter()
            .map(|c| Card::clone(c))
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.snapshot().active_count()
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Open a card for `inputs`: sweep, resolve, make room, then create or
    /// reactivate. All of it commits under one lock. Duplicate live records
    /// under the key are removed rather than reported.
    pub fn open(&self, inputs: &KeyInputs, ctx: OpenContext) -> Result<OpenOutcome, EngineError> {
        let key = self.derive_key(inputs);
        let at = ctx.at.unwrap_or_else(TimeMs::now);
        let max_history = self.config.max_history;

        let mut pool = self.pool.lock();

        let swept = sweep_gray(&mut pool, at);
        let resolution = dedup::resolve(&pool, &key);

        // A reactivated ACTIVE card does not add to the active count.
        let incoming = match &resolution.action {
            Action::Reactivate(id) if pool.iter().any(|c| c.id == *id && c.is_active()) => 0,
            _ => 1,
        };

        let mut purged = Vec::new();
        for id in &resolution.duplicates {
            if let Some(card) = pool.iter_mut().find(|c| c.id == *id) {
                let _ = card.remove(at);
                warn!(card_id = %id, key = %key, "removing duplicate live card");
            }
            purged.push(*id);
        }
        purged.extend(resolution.purge.iter().copied());
        pool.retain(|c| !purged.contains(&c.id));

        let exclude = match &resolution.action {
            Action::Reactivate(id) => Some(*id),
            Action::Fresh => None,
        };
        let evicted = select_evictions(&pool, self.config.max_active_cards, incoming, exclude);
        for id in &evicted {
            if let Some(card) = pool.iter_mut().find(|c| c.id == *id) {
                let _ = card.remove(at);
                info!(card_id = %id, key = %card.key, "evicted oldest active card");
            }
        }

        let (card, disposition) = match resolution.action {
            Action::Fresh => {
                let card = Card::open(key.clone(), inputs, &ctx, at);
                let disposition = if resolution.purge.is_empty() {
                    Disposition::Created
                } else {
                    Disposition::Recreated
                };
                pool.push(card.clone());
                (card, disposition)
            }
            Action::Reactivate(id) => {
                let card = find_mut(&mut pool, &id)?;
                card.reactivate(&ctx, at, max_history)?;
                (card.clone(), Disposition::Reactivated)
            }
        };

        for id in &swept {
            if let Some(card) = pool.iter().find(|c| c.id == *id) {
                self.writer.submit_put(card);
            }
        }
        for id in purged.iter().chain(evicted.iter()) {
            self.writer.submit_delete(*id);
        }
        self.writer.submit_put(&card);
        self.mark_stale();
        drop(pool);

        info!(
            card_id = %card.id,
            key = %card.key,
            generation = card.generation,
            ?disposition,
            evicted = evicted.len(),
            swept = swept.len(),
            "card opened"
        );

        Ok(OpenOutcome {
            card,
            disposition,
            evicted,
            swept,
        })
    }

    /// Append an entry to a live card. A GRAY card keeps its pending
    /// removal, see [`Card::record_open`].
    ///
    /// # Errors
    /// `CardNotFound` for an unknown id, `Removed` for a REMOVED card.
    pub fn record_open_event(
        &self,
        id: &CardId,
        event: OpenEvent,
    ) -> Result<HistoryEntry, EngineError> {
        let at = event.at.unwrap_or_else(TimeMs::now);
        let mut pool = self.pool.lock();
        let card = find_mut(&mut pool, id)?;
        let entry = card.record_open(&event, at, self.config.max_history)?;
        self.writer.submit_put(card);
        self.mark_stale();
        debug!(card_id = %id, kind = ?entry.kind, "open event recorded");
        Ok(entry)
    }

    /// Realize a close: GRAY with `removal_pending`, score and rank
    /// recomputed, then the auto-discard policy. A discarded card goes
    /// straight to REMOVED and is handed to the archive.
    ///
    /// # Errors
    /// `CardNotFound` for an unknown id, `InvalidTransition` unless the card
    /// is ACTIVE or OVERLAP_ACTIVE.
    pub async fn record_close_event(
        &self,
        id: &CardId,
        event: CloseEvent,
    ) -> Result<CloseOutcome, EngineError> {
        let at = event.at.unwrap_or_else(TimeMs::now);

        let (card, entry, discarded) = {
            let mut pool = self.pool.lock();
            let card = find_mut(&mut pool, id)?;

            // Staged on a copy; the pooled card changes only on success.
            let mut closed = card.clone();
            let entry = closed.close(&event, at, self.config.max_history)?;
            score::apply(&mut closed, event.pnl_percent);
            let discarded = self.policy.evaluate(&closed, event.pnl_percent);
            if discarded.is_some() {
                closed.remove(at)?;
            }

            *card = closed.clone();
            self.writer.submit_put(&closed);
            self.mark_stale();
            (closed, entry, discarded)
        };

        let score = card.score.unwrap_or_default();
        let rank = card.rank.unwrap_or(Rank::F);
        info!(
            card_id = %id,
            key = %card.key,
            pnl_percent = %event.pnl_percent,
            %score,
            %rank,
            "card closed"
        );

        let archived = match &discarded {
            Some(reason) => {
                info!(card_id = %id, reason = %reason, "auto-discarding card");
                self.hand_to_archive(&card, reason).await
            }
            None => false,
        };

        Ok(CloseOutcome {
            card,
            entry,
            score,
            rank,
            discarded,
            archived,
        })
    }

    /// Caller-invoked removal. The record stays mirrored as REMOVED.
    ///
    /// # Errors
    /// `CardNotFound` for an unknown id.
    pub fn remove(&self, id: &CardId) -> Result<bool, EngineError> {
        let mut pool = self.pool.lock();
        let card = find_mut(&mut pool, id)?;
        if card.is_removed() {
            return Ok(false);
        }
        card.remove(TimeMs::now())?;
        self.writer.submit_put(card);
        self.mark_stale();
        info!(card_id = %id, key = %card.key, "card removed");
        Ok(true)
    }

    /// Manual discard: archive and remove immediately.
    ///
    /// # Errors
    /// `CardNotFound` for an unknown id, `InvalidTransition` if already REMOVED.
    pub async fn discard(&self, id: &CardId, detail: &str) -> Result<DiscardOutcome, EngineError> {
        let card = {
            let mut pool = self.pool.lock();
            let card = find_mut(&mut pool, id)?;
            card.remove(TimeMs::now())?;
            self.writer.submit_put(card);
            self.mark_stale();
            card.clone()
        };

        let reason = DiscardReason::Manual {
            detail: detail.to_string(),
        };
        let archived = self.hand_to_archive(&card, &reason).await;
        Ok(DiscardOutcome { card, archived })
    }

    /// Patch caller-editable fields. Returns whether anything changed.
    ///
    /// # Errors
    /// `CardNotFound` for an unknown id, `Removed` for a REMOVED card.
    pub fn update_fields(&self, id: &CardId, patch: &CardPatch) -> Result<bool, EngineError> {
        let mut pool = self.pool.lock();
        let card = find_mut(&mut pool, id)?;
        if card.is_removed() {
            return Err(EngineError::Removed(*id));
        }
        if !patch.apply_to(card) {
            return Ok(false);
        }
        card.updated_at = TimeMs::now().max(card.updated_at);
        self.writer.submit_put(card);
        self.mark_stale();
        debug!(card_id = %id, "card fields updated");
        Ok(true)
    }

    /// Cards currently held by the archive.
    ///
    /// # Errors
    /// `Archive` if the archive backend fails.
    pub async fn list_archived(&self) -> Result<Vec<Card>, EngineError> {
        self.archive
            .list_archived()
            .await
            .map_err(|e| EngineError::Archive(e.to_string()))
    }

    /// Pull a card out of the archive and re-enter it through `open`.
    ///
    /// # Errors
    /// `CardNotFound` if the archive does not hold `id`, `Archive` on
    /// archive failure, or whatever `open` returns.
    pub async fn restore_archived(&self, id: &CardId) -> Result<OpenOutcome, EngineError> {
        let archived = self
            .archive
            .restore(*id)
            .await
            .map_err(|e| EngineError::Archive(e.to_string()))?
            .ok_or(EngineError::CardNotFound(*id))?;

        let ctx = OpenContext {
            note: archived.note.clone(),
            ..OpenContext::default()
        };
        let outcome = self.open(&archived.key_inputs(), ctx)?;
        info!(
            archived_id = %id,
            card_id = %outcome.card.id,
            key = %outcome.card.key,
            "archived card restored"
        );
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Load the persisted set and merge it into memory. Concurrent callers
    /// share a single in-flight load.
    pub async fn load(self: &Arc<Self>) -> LoadReport {
        let engine = Arc::clone(self);
        self.loads
            .run(move || async move { engine.load_once().await })
            .await
    }

    async fn load_once(&self) -> LoadReport {
        let loader = CardLoader::new(
            Arc::clone(&self.backend),
            self.config.max_history,
            self.config.load_concurrency,
        );
        let fetched = match loader.fetch().await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(error = %e, "card load failed");
                return LoadReport {
                    failed: Some(e.to_string()),
                    ..LoadReport::default()
                };
            }
        };

        let mut report = LoadReport {
            discovered: fetched.discovered,
            corrupt: fetched.corrupt,
            ..LoadReport::default()
        };
        let (winners, losers) = reduce_newest(fetched.cards);
        let mut superseded: Vec<CardId> = losers.iter().map(|c| c.id).collect();

        {
            let mut pool = self.pool.lock();
            let merge = merge_into(&mut pool, winners);
            superseded.extend(merge.superseded);
            report.loaded = merge.loaded;
            report.kept = merge.kept;

            let now = TimeMs::now();
            let evicted = select_evictions(&pool, self.config.max_active_cards, 0, None);
            for id in &evicted {
                if let Some(card) = pool.iter_mut().find(|c| c.id == *id) {
                    let _ = card.remove(now);
                }
            }
            for id in superseded.iter().chain(evicted.iter()) {
                self.writer.submit_delete(*id);
            }
            report.superseded = superseded.len();
            report.evicted = evicted.len();
            self.mark_stale();
        }

        info!(
            discovered = report.discovered,
            loaded = report.loaded,
            kept = report.kept,
            corrupt = report.corrupt,
            superseded = report.superseded,
            evicted = report.evicted,
            "card pool loaded"
        );
        report
    }

    /// Wait (bounded by the configured timeout) for queued writes.
    pub async fn flush(&self) -> FlushOutcome {
        self.writer.flush(self.config.flush_timeout).await
    }

    pub fn writer_stats(&self) -> WriterStats {
        self.writer.stats()
    }

    pub fn subscribe_writes(&self) -> broadcast::Receiver<WriteOutcome> {
        self.writer.subscribe()
    }

    /// (hits, misses) of the key memo table.
    pub fn key_cache_stats(&self) -> (u64, u64) {
        self.keys.stats()
    }

    fn mark_stale(&self) {
        self.index_stale.store(true, Ordering::Release);
    }

    /// Returns true when the archive took custody and the persisted
    /// record was scheduled for deletion.
    async fn hand_to_archive(&self, card: &Card, reason: &DiscardReason) -> bool {
        match self
            .archive
            .archive(card, reason.code(), &reason.detail())
            .await
        {
            Ok(true) => {
                self.writer.submit_delete(card.id);
                true
            }
            Ok(false) => {
                warn!(card_id = %card.id, "archive declined card, keeping REMOVED mirror");
                false
            }
            Err(e) => {
                warn!(card_id = %card.id, error = %e, "archive failed, keeping REMOVED mirror");
                false
            }
        }
    }
}

/// Flip every GRAY card with `removal_pending` to REMOVED.
fn sweep_gray(pool: &mut [Card], at: TimeMs) -> Vec<CardId> {
    pool.iter_mut()
        .filter(|c| c.state() == CardState::Gray && c.removal_pending)
        .filter_map(|c| c.sweep(at).then_some(c.id))
        .collect()
}

fn find_mut<'a>(pool: &'a mut [Card], id: &CardId) -> Result<&'a mut Card, EngineError> {
    pool.iter_mut()
        .find(|c| c.id == *id)
        .ok_or(EngineError::CardNotFound(*id))
}
