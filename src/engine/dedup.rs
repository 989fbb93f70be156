//! Dedup and overlap resolution for creation requests.

use crate::domain::{Card, CardId, CardKey};

/// What a creation request for a key should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// No usable record: construct a brand-new card.
    Fresh,
    /// Reactivate this live record instead of creating a new identity.
    Reactivate(CardId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub action: Action,
    /// REMOVED records under the key; purged before a fresh card is inserted.
    pub purge: Vec<CardId>,
    /// Extra live records under the key (left by crashed writes or a
    /// merge). Removed and purged so the key keeps a single live card.
    pub duplicates: Vec<CardId>,
}

/// Decide how to honour a creation request for `key`.
///
/// Runs inside the engine's critical section after the GRAY sweep, so the
/// answer holds until the caller commits.
pub fn resolve(cards: &[Card], key: &CardKey) -> Resolution {
    let mut live: Vec<&Card> = Vec::new();
    let mut purge = Vec::new();

    for card in cards.iter().filter(|c| &c.key == key) {
        if card.is_removed() {
            purge.push(card.id);
        } else {
            live.push(card);
        }
    }

    // Prefer an active record, then the newest.
    live.sort_by(|a, b| {
        b.is_active()
            .cmp(&a.is_active())
            .then(b.recency().cmp(&a.recency()))
            .then(b.id.cmp(&a.id))
    });

    let mut live = live.into_iter();
    match live.next() {
        Some(target) => Resolution {
            action: Action::Reactivate(target.id),
            purge,
            duplicates: live.map(|c| c.id).collect(),
        },
        None => Resolution {
            action: Action::Fresh,
            purge,
            duplicates: Vec::new(),
        },
    }
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
    fn test_unknown_key_is_fresh() {
        let cards = vec![card("5m:1.00", 1)];
        let resolution = resolve(&cards, &CardKey::new("5m:2.00"));
        assert_eq!(resolution.action, Action::Fresh);
        assert!(resolution.purge.is_empty());
    }

    #[test]
    fn test_live_record_is_reactivated() {
        let cards = vec![card("5m:1.00", 1)];
        let resolution = resolve(&cards, &cards[0].key);
        assert_eq!(resolution.action, Action::Reactivate(cards[0].id));
    }

    #[test]
    fn test_removed_record_is_purged_then_fresh() {
        let mut removed = card("5m:1.00", 1);
        removed.remove(TimeMs::new(2)).unwrap();
        let cards = vec![removed.clone()];
        let resolution = resolve(&cards, &removed.key);
        assert_eq!(resolution.action, Action::Fresh);
        assert_eq!(resolution.purge, vec![removed.id]);
    }

    #[test]
    fn test_gray_record_is_reactivation_target() {
        let mut gray = card("5m:1.00", 1);
        gray.close(&CloseEvent::default(), TimeMs::new(2), 10)
            .expect("close");
        gray.removal_pending = false;
        let cards = vec![gray.clone()];
        assert_eq!(
            resolve(&cards, &gray.key).action,
            Action::Reactivate(gray.id)
        );
    }

    #[test]
    fn test_duplicate_live_records_collapse_to_newest_active() {
        let older = card("5m:1.00", 1);
        let newer = card("5m:1.00", 5);
        let mut gray = card("5m:1.00", 9);
        gray.close(&CloseEvent::default(), TimeMs::new(10), 10)
            .expect("close");
        let cards = vec![older.clone(), gray.clone(), newer.clone()];

        let resolution = resolve(&cards, &older.key);
        assert_eq!(resolution.action, Action::Reactivate(newer.id));
        assert_eq!(resolution.duplicates, vec![older.id, gray.id]);
    }
}
