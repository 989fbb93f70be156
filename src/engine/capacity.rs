//! FIFO capacity management over the active set.

use crate::domain::{Card, CardId};

/// Pick the active cards to evict so that `incoming` more active cards fit
/// under `max_active`. Oldest `opened_at` goes first; ties keep collection
/// order. `max_active == 0` means unlimited. `exclude` is never chosen.
pub fn select_evictions(
    cards: &[Card],
    max_active: usize,
    incoming: usize,
    exclude: Option<CardId>,
) -> Vec<CardId> {
    if max_active == 0 {
        return Vec::new();
    }

    let mut candidates: Vec<&Card> = cards
        .iter()
        .filter(|c| c.is_active() && Some(c.id) != exclude)
        .collect();
    let kept_excluded = cards
        .iter()
        .any(|c| c.is_active() && Some(c.id) == exclude);

    let active = candidates.len() + usize::from(kept_excluded);
    let overflow = (active + incoming).saturating_sub(max_active);
    if overflow == 0 {
        return Vec::new();
    }

    // Stable sort: equal timestamps evict in insertion order.
    candidates.sort_by_key(|c| c.opened_at);
    candidates
        .into_iter()
        .take(overflow)
        .map(|c| c.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CardKey, CloseEvent, KeyInputs, OpenContext, TimeMs};
    use rust_decimal::Decimal;

    fn card(n: i64) -> Card {
        let inputs = KeyInputs::new("5m", Decimal::from(n));
        Card::open(
            CardKey::new(format!("5m:{}", n)),
            &inputs,
            &OpenContext::default(),
            TimeMs::new(n),
        )
    }

    #[test]
    fn test_unlimited_never_evicts() {
        let cards: Vec<Card> = (1..=50).map(card).collect();
        assert!(select_evictions(&cards, 0, 1, None).is_empty());
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let cards = vec![card(2), card(1), card(3)];
        let evicted = select_evictions(&cards, 3, 1, None);
        assert_eq!(evicted, vec![cards[1].id]);
    }

    #[test]
    fn test_room_left_means_no_eviction() {
        let cards = vec![card(1), card(2)];
        assert!(select_evictions(&cards, 3, 1, None).is_empty());
    }

    #[test]
    fn test_inactive_cards_do_not_count() {
        let mut gray = card(1);
        gray.close(&CloseEvent::default(), TimeMs::new(5), 10)
            .expect("close");
        let cards = vec![gray, card(2)];
        assert!(select_evictions(&cards, 2, 1, None).is_empty());
    }

    #[test]
    fn test_overfull_set_is_trimmed_back() {
        let cards: Vec<Card> = (1..=5).map(card).collect();
        let evicted = select_evictions(&cards, 2, 0, None);
        assert_eq!(evicted, vec![cards[0].id, cards[1].id, cards[2].id]);
    }

    #[test]
    fn test_excluded_card_is_counted_but_never_chosen() {
        let cards = vec![card(1), card(2)];
        let evicted = select_evictions(&cards, 2, 1, Some(cards[0].id));
        assert_eq!(evicted, vec![cards[1].id]);
    }
}
