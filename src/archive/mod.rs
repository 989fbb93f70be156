//! Archive collaborator for discarded cards.
//!
//! This module provides:
//! - The `Archive` trait (archive / list_archived / restore)
//! - `StoreArchive`, an archive kept in a persistence backend under its own record kind

use crate::domain::{Card, CardId, TimeMs};
use crate::store::{
    decode_archived, encode_card, ArchiveNote, PersistenceBackend, StoreError,
    ARCHIVE_RECORD_KIND,
};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Receives cards discarded by policy or by hand.
#[async_trait]
pub trait Archive: Send + Sync + fmt::Debug {
    /// Take custody of `card`. Returns false if the archive declined it.
    async fn archive(&self, card: &Card, reason: &str, detail: &str) -> Result<bool, StoreError>;

    async fn list_archived(&self) -> Result<Vec<Card>, StoreError>;

    /// Hand back and forget the archived card with `id`.
    async fn restore(&self, id: CardId) -> Result<Option<Card>, StoreError>;
}

/// Archive stored in the same backend as the live mirror.
#[derive(Debug, Clone)]
pub struct StoreArchive {
    backend: Arc<dyn PersistenceBackend>,
    max_history: usize,
}

impl StoreArchive {
    pub fn new(backend: Arc<dyn PersistenceBackend>, max_history: usize) -> Self {
        Self {
            backend,
            max_history,
        }
    }

    fn path(&self, id: CardId) -> String {
        self.backend.key_path(ARCHIVE_RECORD_KIND, &id.to_string())
    }
}

#[async_trait]
impl Archive for StoreArchive {
    async fn archive(&self, card: &Card, reason: &str, detail: &str) -> Result<bool, StoreError> {
        let note = ArchiveNote {
            reason: reason.to_string(),
            detail: detail.to_string(),
            archived_at: TimeMs::now(),
        };
        let (payload, metadata) = match encode_card(ARCHIVE_RECORD_KIND, card, Some(&note)) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(card_id = %card.id, error = %e, "archive encode failed");
                return Ok(false);
            }
        };

        self.backend
            .write(&self.path(card.id), payload, &metadata)
            .await?;
        info!(card_id = %card.id, key = %card.key, reason, "card archived");
        Ok(true)
    }

    async fn list_archived(&self) -> Result<Vec<Card>, StoreError> {
        let records = self.backend.enumerate(ARCHIVE_RECORD_KIND).await?;
        let mut cards: Vec<Card> = records
            .iter()
            .filter_map(|record| match decode_archived(record, self.max_history) {
                Ok((card, _)) => Some(card),
                Err(e) => {
                    warn!(key_path = %record.key_path, error = %e, "skipping corrupt archive record");
                    None
                }
            })
            .collect();
        cards.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then(a.id.cmp(&b.id)));
        Ok(cards)
    }

    async fn restore(&self, id: CardId) -> Result<Option<Card>, StoreError> {
        let path = self.path(id);
        let Some(record) = self.backend.read(&path).await? else {
            return Ok(None);
        };
        let card = match decode_archived(&record, self.max_history) {
            Ok((card, _)) => card,
            Err(e) => {
                warn!(card_id = %id, error = %e, "archived record is corrupt");
                return Ok(None);
            }
        };
        self.backend.delete(&path).await?;
        info!(card_id = %id, key = %card.key, "card restored from archive");
        Ok(Some(card))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CardKey, KeyInputs, OpenContext};
    use crate::store::MemoryStore;
    use rust_decimal::Decimal;

    fn card(at: i64) -> Card {
        let inputs = KeyInputs::new("5m", Decimal::ONE);
        Card::open(
            CardKey::new("5m:1.00"),
            &inputs,
            &OpenContext::default(),
            TimeMs::new(at),
        )
    }

    #[tokio::test]
    async fn test_archive_list_restore() {
        let store = Arc::new(MemoryStore::new());
        let archive = StoreArchive::new(store.clone(), 50);
        let a = card(2);
        let b = card(1);

        assert!(archive.archive(&a, "manual", "test").await.unwrap());
        assert!(archive.archive(&b, "losing_streak", "test").await.unwrap());

        let listed: Vec<CardId> = archive
            .list_archived()
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(listed, vec![b.id, a.id]);

        let restored = archive.restore(a.id).await.unwrap().unwrap();
        assert_eq!(restored, a);
        assert!(archive.restore(a.id).await.unwrap().is_none());
        assert_eq!(archive.list_archived().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_archive_propagates_backend_failure() {
        let store = Arc::new(MemoryStore::new());
        store.set_fail_writes(true);
        let archive = StoreArchive::new(store, 50);
        assert!(archive.archive(&card(1), "manual", "x").await.is_err());
    }
}
