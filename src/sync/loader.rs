//! Loading the persisted card set and merging it into memory.

use crate::domain::{Card, CardId, CardKey};
use crate::store::{decode_card, PersistenceBackend, StoreError, CARD_RECORD_KIND};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Summary of one load pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    /// Records enumerated from the backend.
    pub discovered: usize,
    /// Cards inserted or refreshed in memory.
    pub loaded: usize,
    /// Loaded cards whose in-memory copy was kept as is.
    pub kept: usize,
    pub corrupt: usize,
    /// Duplicates under a key that lost the newest-wins merge.
    pub superseded: usize,
    /// Active cards evicted to get back under capacity.
    pub evicted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<String>,
}

/// Decoded cards from one enumeration.
#[derive(Debug, Default)]
pub struct Fetched {
    pub cards: Vec<Card>,
    pub discovered: usize,
    pub corrupt: usize,
}

/// Reads every card record and decodes them in parallel.
#[derive(Debug, Clone)]
pub struct CardLoader {
    backend: Arc<dyn PersistenceBackend>,
    max_history: usize,
    concurrency: usize,
}

impl CardLoader {
    pub fn new(backend: Arc<dyn PersistenceBackend>, max_history: usize, concurrency: usize) -> Self {
        Self {
            backend,
            max_history,
            concurrency: concurrency.max(1),
        }
    }

    /// Enumerate and decode. Corrupt records are logged and skipped.
    ///
    /// # Errors
    /// Returns an error only if enumeration itself fails.
    pub async fn fetch(&self) -> Result<Fetched, StoreError> {
        let records = self.backend.enumerate(CARD_RECORD_KIND).await?;
        let discovered = records.len();
        let max_history = self.max_history;

        let decoded: Vec<_> = stream::iter(records)
            .map(|record| {
                tokio::task::spawn_blocking(move || {
                    let result = decode_card(&record, CARD_RECORD_KIND, max_history);
                    (record.key_path, result)
                })
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut fetched = Fetched {
            discovered,
            ..Fetched::default()
        };
        for joined in decoded {
            match joined {
                Ok((_, Ok(card))) => fetched.cards.push(card),
                Ok((key_path, Err(e))) => {
                    fetched.corrupt += 1;
                    warn!(key_path = %key_path, error = %e, "skipping corrupt card record");
                }
                Err(e) => {
                    fetched.corrupt += 1;
                    warn!(error = %e, "card decode task failed");
                }
            }
        }
        debug!(
            discovered,
            decoded = fetched.cards.len(),
            corrupt = fetched.corrupt,
            "card records fetched"
        );
        Ok(fetched)
    }
}

/// Newest-wins ordering: `(opened_at, updated_at)`, then id for determinism.
pub fn newer(a: &Card, b: &Card) -> Ordering {
    a.recency().cmp(&b.recency()).then(a.id.cmp(&b.id))
}

/// Keep one card per key. Returns (winners, losers).
pub fn reduce_newest(cards: Vec<Card>) -> (Vec<Card>, Vec<Card>) {
    let mut by_key: HashMap<CardKey, Card> = HashMap::new();
    let mut losers = Vec::new();

    for card in cards {
        match by_key.get_mut(&card.key) {
            Some(current) if newer(&card, current) == Ordering::Greater => {
                losers.push(std::mem::replace(current, card));
            }
            Some(_) => losers.push(card),
            None => {
                by_key.insert(card.key.clone(), card);
            }
        }
    }

    let mut winners: Vec<Card> = by_key.into_values().collect();
    winners.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then(a.id.cmp(&b.id)));
    (winners, losers)
}

/// Outcome of merging loaded cards into the in-memory pool.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub loaded: usize,
    pub kept: usize,
    /// Cards (from either side) that lost to a newer card under their key.
    /// Their persisted records should be deleted.
    pub superseded: Vec<CardId>,
}

/// Merge `incoming` (one card per key) into `pool`.
///
/// Same id: the persisted copy only replaces memory when strictly newer.
/// Same key, different id: newest wins and the losers leave the pool.
pub fn merge_into(pool: &mut Vec<Card>, incoming: Vec<Card>) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    for card in incoming {
        if let Some(existing) = pool.iter_mut().find(|c| c.id == card.id) {
            if card.recency() > existing.recency() {
                *existing = card;
                outcome.loaded += 1;
            } else {
                outcome.kept += 1;
            }
            continue;
        }

        let newest_in_memory = pool
            .iter()
            .filter(|c| c.key == card.key)
            .max_by(|a, b| newer(a, b));

        match newest_in_memory {
            Some(current) if newer(&card, current) != Ordering::Greater => {
                outcome.superseded.push(card.id);
            }
            _ => {
                let key = card.key.clone();
                pool.retain(|c| {
                    if c.key == key {
                        outcome.superseded.push(c.id);
                        false
                    } else {
                        true
                    }
                });
                pool.push(card);
                outcome.loaded += 1;
            }
        }
    }

    outcome
}
