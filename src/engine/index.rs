//! Dual index over the card collection: id → card and key → cards.
//!
//! An index is an immutable snapshot built from the authoritative
//! collection. Readers share it through an `Arc`; writers never patch it in
//! place, they mark it stale and the next reader rebuilds it.

use crate::domain::{Card, CardId, CardKey};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct DualIndex {
    by_id: HashMap<CardId, Arc<Card>>,
    /// Newest first by `(opened_at, updated_at)`.
    by_key: HashMap<CardKey, Vec<Arc<Card>>>,
}

impl DualIndex {
    pub fn build(cards: &[Card]) -> Self {
        let mut by_id = HashMap::with_capacity(cards.len());
        let mut by_key: HashMap<CardKey, Vec<Arc<Card>>> = HashMap::new();

        for card in cards {
            let shared = Arc::new(card.clone());
            by_id.insert(card.id, Arc::clone(&shared));
            by_key.entry(card.key.clone()).or_default().push(shared);
        }
        for bucket in by_key.values_mut() {
            bucket.sort_by(|a, b| b.recency().cmp(&a.recency()).then(b.id.cmp(&a.id)));
        }

        Self { by_id, by_key }
    }

    pub fn get(&self, id: &CardId) -> Option<&Arc<Card>> {
        self.by_id.get(id)
    }

    /// Every card under `key`, newest first, any state.
    pub fn for_key(&self, key: &CardKey) -> &[Arc<Card>] {
        self.by_key.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Newest non-removed card under `key`, falling back to the newest removed one.
    pub fn newest_for_key(&self, key: &CardKey) -> Option<&Arc<Card>> {
        let bucket = self.for_key(key);
        bucket
            .iter()
            .find(|c| !c.is_removed())
            .or_else(|| bucket.first())
    }

    pub fn active_for_key(&self, key: &CardKey) -> Vec<Arc<Card>> {
        self.for_key(key)
            .iter()
            .filter(|c| c.is_active())
            .cloned()
            .collect()
    }

    /// Active cards, one per key (the newest), oldest key first.
    pub fn list_active(&self) -> Vec<Arc<Card>> {
        let mut out: Vec<Arc<Card>> = self
            .by_key
            .values()
            .filter_map(|bucket| bucket.iter().find(|c| c.is_active()).cloned())
            .collect();
        sort_by_opened(&mut out);
        out
    }

    pub fn list_non_removed(&self) -> Vec<Arc<Card>> {
        let mut out: Vec<Arc<Card>> = self
            .by_id
            .values()
            .filter(|c| !c.is_removed())
            .cloned()
            .collect();
        sort_by_opened(&mut out);
        out
    }

    pub fn active_count(&self) -> usize {
        self.by_id.values().filter(|c| c.is_active()).count()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

fn sort_by_opened(cards: &mut [Arc<Card>]) {
    cards.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then(a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CloseEvent, KeyInputs, OpenContext, TimeMs};
    use rust_decimal::Decimal;

    fn card(key: &str, at: i64) -> Card {
        let inputs = KeyInputs::new("5m", Decimal::ONE);
        Card::open(
            CardKey::new(key),
            &inputs,
            &OpenContext::default(),
            TimeMs::new(at),
        )
    }

    #[test]
    fn test_lookups_by_id_and_key() {
        let a = card("5m:1.00", 1);
        let b = card("5m:2.00", 2);
        let index = DualIndex::build(&[a.clone(), b.clone()]);

        assert_eq!(index.len(), 2);
        assert_eq!(index.get(&a.id).unwrap().key, a.key);
        assert_eq!(index.for_key(&b.key).len(), 1);
        assert!(index.for_key(&CardKey::new("nope")).is_empty());
    }

    #[test]
    fn test_key_bucket_is_newest_first() {
        let older = card("5m:1.00", 1);
        let newer = card("5m:1.00", 5);
        let index = DualIndex::build(&[older.clone(), newer.clone()]);
        let ids: Vec<CardId> = index.for_key(&older.key).iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }

    #[test]
    fn test_list_active_dedups_by_key_and_skips_inactive() {
        let older = card("5m:1.00", 1);
        let newer = card("5m:1.00", 5);
        let mut gray = card("5m:3.00", 3);
        gray.close(&CloseEvent::default(), TimeMs::new(4), 10).unwrap();
        let other = card("5m:2.00", 2);

        let index = DualIndex::build(&[older, newer.clone(), gray.clone(), other.clone()]);
        let active: Vec<CardId> = index.list_active().iter().map(|c| c.id).collect();
        assert_eq!(active, vec![other.id, newer.id]);

        let non_removed = index.list_non_removed();
        assert_eq!(non_removed.len(), 4);
        assert_eq!(index.active_count(), 3);
    }

    #[test]
    fn test_newest_for_key_prefers_live_card() {
        let mut removed = card("5m:1.00", 9);
        removed.remove(TimeMs::new(10)).unwrap();
        let live = card("5m:1.00", 2);
        let index = DualIndex::build(&[removed.clone(), live.clone()]);
        assert_eq!(index.newest_for_key(&live.key).unwrap().id, live.id);

        let index = DualIndex::build(&[removed.clone()]);
        assert_eq!(index.newest_for_key(&removed.key).unwrap().id, removed.id);
    }
}
