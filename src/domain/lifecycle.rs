//! Card lifecycle state machine.
//!
//! ```text
//! (start) ──open──▶ ACTIVE ──reactivate──▶ OVERLAP_ACTIVE ◀─┐
//!                     │  ╲                    │   reactivate │
//!                     │   close ───▶ GRAY ◀── close          │
//!                     │              │  └──reactivate────────┘
//!                   remove         sweep / remove
//!                     ▼              ▼
//!                  REMOVED  (terminal for the instance)
//! ```
//!
//! Every state change goes through [`Transition::apply`]; nothing else
//! writes `Card::state`.

use super::card::{Card, CardState, HistoryEntry, HistoryKind, KeyInputs};
use super::history::HistoryLedger;
use super::primitives::{CardId, CardKey, TimeMs};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Edges of the lifecycle graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// Creation request for a key that already has a live record.
    Reactivate,
    /// Realized close event.
    Close,
    /// Deferred removal of a GRAY card flagged `removal_pending`.
    Sweep,
    /// Direct caller-invoked removal (manual, policy, eviction).
    Remove,
}

impl Transition {
    /// Target state for this edge from `from`, or `None` if the edge does not exist.
    pub fn target(self, from: CardState, removal_pending: bool) -> Option<CardState> {
        use CardState::*;
        match (self, from) {
            (Transition::Reactivate, Active | OverlapActive | Gray) => Some(OverlapActive),
            (Transition::Close, Active | OverlapActive) => Some(Gray),
            (Transition::Sweep, Gray) if removal_pending => Some(Removed),
            (Transition::Remove, Active | OverlapActive | Gray) => Some(Removed),
            _ => None,
        }
    }

    /// Move `card` along this edge.
    pub fn apply(self, card: &mut Card, at: TimeMs) -> Result<CardState, LifecycleError> {
        let from = card.state;
        let to = self
            .target(from, card.removal_pending)
            .ok_or(LifecycleError::IllegalTransition {
                id: card.id,
                from,
                transition: self,
            })?;
        card.state = to;
        card.updated_at = at.max(card.updated_at);
        Ok(to)
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transition::Reactivate => "reactivate",
            Transition::Close => "close",
            Transition::Sweep => "sweep",
            Transition::Remove => "remove",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("card {id}: {transition} is not allowed from {from}")]
    IllegalTransition {
        id: CardId,
        from: CardState,
        transition: Transition,
    },
    #[error("card {0} is removed")]
    Terminal(CardId),
}

/// Context for opening (or reactivating) a card.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenContext {
    #[serde(default)]
    pub quantity: Decimal,
    #[serde(default)]
    pub entry_price: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub is_simulation: bool,
    /// Event time; defaults to now.
    #[serde(default)]
    pub at: Option<TimeMs>,
}

impl OpenContext {
    pub fn at(at: TimeMs) -> Self {
        Self {
            at: Some(at),
            ..Self::default()
        }
    }
}

/// Additional entry into an open card.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenEvent {
    pub quantity: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub at: Option<TimeMs>,
}

/// Realized close of a card.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseEvent {
    pub exit_price: Decimal,
    pub pnl_percent: Decimal,
    #[serde(default)]
    pub pnl_amount: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub is_simulation: bool,
    #[serde(default)]
    pub at: Option<TimeMs>,
}

impl CloseEvent {
    pub fn with_pnl(pnl_percent: Decimal) -> Self {
        Self {
            pnl_percent,
            ..Self::default()
        }
    }
}

impl Card {
    /// (start) → ACTIVE.
    pub fn open(key: CardKey, inputs: &KeyInputs, ctx: &OpenContext, at: TimeMs) -> Self {
        let mut history = HistoryLedger::new();
        history.append(opened_entry(&key, 1, ctx, at), usize::MAX);
        Card {
            id: CardId::new(),
            key,
            time_bucket: inputs.time_bucket.clone(),
            value: inputs.value,
            state: CardState::Active,
            history,
            generation: 1,
            score: None,
            rank: None,
            opened_at: at,
            updated_at: at,
            removal_pending: false,
            note: ctx.note.clone(),
            tags: Vec::new(),
        }
    }

    /// ACTIVE / OVERLAP_ACTIVE / GRAY → OVERLAP_ACTIVE, bumping the generation
    /// and prefixing an OPENED entry.
    pub fn reactivate(
        &mut self,
        ctx: &OpenContext,
        at: TimeMs,
        max_history: usize,
    ) -> Result<HistoryEntry, LifecycleError> {
        Transition::Reactivate.apply(self, at)?;
        self.generation += 1;
        self.removal_pending = false;
        let entry = opened_entry(&self.key, self.generation, ctx, at);
        self.history.append(entry.clone(), max_history);
        Ok(entry)
    }

    /// Record an additional entry. REOPENED when the newest entry is a close.
    ///
    /// State and `removal_pending` are untouched: a GRAY card that is
    /// re-entered here is still swept by the next creation cycle unless the
    /// flag is cleared through a patch.
    pub fn record_open(
        &mut self,
        event: &OpenEvent,
        at: TimeMs,
        max_history: usize,
    ) -> Result<HistoryEntry, LifecycleError> {
        if self.state.is_removed() {
            return Err(LifecycleError::Terminal(self.id));
        }
        let kind = match self.history.latest() {
            Some(latest) if latest.kind == HistoryKind::Closed => HistoryKind::Reopened,
            _ => HistoryKind::Opened,
        };
        let entry = HistoryEntry {
            kind,
            key: self.key.clone(),
            generation: self.generation,
            at,
            quantity: event.quantity,
            entry_price: event.price,
            exit_price: None,
            pnl_percent: None,
            pnl_amount: None,
            fee: event.fee,
            note: event.note.clone(),
            is_simulation: false,
        };
        self.history.append(entry.clone(), max_history);
        self.updated_at = at.max(self.updated_at);
        Ok(entry)
    }

    /// ACTIVE / OVERLAP_ACTIVE → GRAY with `removal_pending` set.
    pub fn close(
        &mut self,
        event: &CloseEvent,
        at: TimeMs,
        max_history: usize,
    ) -> Result<HistoryEntry, LifecycleError> {
        Transition::Close.apply(self, at)?;
        self.removal_pending = true;

        let (quantity, entry_price) = self
            .history
            .iter()
            .find(|e| e.kind != HistoryKind::Closed)
            .map(|e| (e.quantity, e.entry_price))
            .unwrap_or_default();

        let entry = HistoryEntry {
            kind: HistoryKind::Closed,
            key: self.key.clone(),
            generation: self.generation,
            at,
            quantity,
            entry_price,
            exit_price: Some(event.exit_price),
            pnl_percent: Some(event.pnl_percent),
            pnl_amount: Some(event.pnl_amount),
            fee: event.fee,
            note: event.note.clone(),
            is_simulation: event.is_simulation,
        };
        self.history.append(entry.clone(), max_history);
        Ok(entry)
    }

    /// GRAY (pending) → REMOVED. Returns false when the card is not sweepable.
    pub fn sweep(&mut self, at: TimeMs) -> bool {
        Transition::Sweep.apply(self, at).is_ok()
    }

    /// Any non-removed state → REMOVED.
    pub fn remove(&mut self, at: TimeMs) -> Result<(), LifecycleError> {
        Transition::Remove.apply(self, at).map(|_| ())
    }
}

fn opened_entry(key: &CardKey, generation: u32, ctx: &OpenContext, at: TimeMs) -> HistoryEntry {
    HistoryEntry {
        kind: HistoryKind::Opened,
        key: key.clone(),
        generation,
        at,
        quantity: ctx.quantity,
        entry_price: ctx.entry_price,
        exit_price: None,
        pnl_percent: None,
        pnl_amount: None,
        fee: ctx.fee,
        note: ctx.note.clone(),
        is_simulation: ctx.is_simulation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Card {
        let inputs = KeyInputs::new("5m", Decimal::new(42, 2));
        Card::open(
            CardKey::new("5m:0.42"),
            &inputs,
            &OpenContext::at(TimeMs::new(100)),
            TimeMs::new(100),
        )
    }

    #[test]
    fn test_open_starts_active_with_single_opened_entry() {
        let card = fresh();
        assert_eq!(card.state(), CardState::Active);
        assert_eq!(card.generation, 1);
        assert_eq!(card.history.len(), 1);
        assert_eq!(card.history.latest().unwrap().kind, HistoryKind::Opened);
        assert_eq!(card.opened_at, TimeMs::new(100));
    }

    #[test]
    fn test_reactivate_prefixes_entry_and_bumps_generation() {
        let mut card = fresh();
        let entry = card
            .reactivate(&OpenContext::default(), TimeMs::new(200), 10)
            .unwrap();
        assert_eq!(entry.generation, 2);
        assert_eq!(card.state(), CardState::OverlapActive);
        assert_eq!(card.generation, 2);
        let kinds: Vec<_> = card.history.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![HistoryKind::Opened, HistoryKind::Opened]);
        assert_eq!(card.history.latest().unwrap().generation, 2);
    }

    #[test]
    fn test_close_moves_to_gray_pending() {
        let mut card = fresh();
        let entry = card
            .close(&CloseEvent::with_pnl(Decimal::from(5)), TimeMs::new(300), 10)
            .unwrap();
        assert_eq!(entry.kind, HistoryKind::Closed);
        assert_eq!(card.state(), CardState::Gray);
        assert!(card.removal_pending);
    }

    #[test]
    fn test_close_twice_is_rejected_and_leaves_card_untouched() {
        let mut card = fresh();
        card.close(&CloseEvent::default(), TimeMs::new(300), 10).unwrap();
        let before = card.clone();
        let err = card
            .close(&CloseEvent::default(), TimeMs::new(400), 10)
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::IllegalTransition {
                from: CardState::Gray,
                transition: Transition::Close,
                ..
            }
        ));
        assert_eq!(card, before);
    }

    #[test]
    fn test_sweep_requires_pending_gray() {
        let mut card = fresh();
        assert!(!card.sweep(TimeMs::new(1)));
        card.close(&CloseEvent::default(), TimeMs::new(2), 10).unwrap();
        card.removal_pending = false;
        assert!(!card.sweep(TimeMs::new(3)));
        card.removal_pending = true;
        assert!(card.sweep(TimeMs::new(4)));
        assert_eq!(card.state(), CardState::Removed);
    }

    #[test]
    fn test_removed_is_terminal() {
        let mut card = fresh();
        card.remove(TimeMs::new(5)).unwrap();
        assert!(card.remove(TimeMs::new(6)).is_err());
        assert!(card
            .reactivate(&OpenContext::default(), TimeMs::new(7), 10)
            .is_err());
        assert!(card
            .close(&CloseEvent::default(), TimeMs::new(8), 10)
            .is_err());
        assert_eq!(
            card.record_open(&OpenEvent::default(), TimeMs::new(9), 10),
            Err(LifecycleError::Terminal(card.id))
        );
    }

    #[test]
    fn test_record_open_after_close_is_reopened() {
        let mut card = fresh();
        card.close(&CloseEvent::default(), TimeMs::new(2), 10).unwrap();
        let entry = card
            .record_open(&OpenEvent::default(), TimeMs::new(3), 10)
            .unwrap();
        assert_eq!(entry.kind, HistoryKind::Reopened);
        let entry = card
            .record_open(&OpenEvent::default(), TimeMs::new(4), 10)
            .unwrap();
        assert_eq!(entry.kind, HistoryKind::Opened);
    }

    #[test]
    fn test_close_copies_latest_entry_terms() {
        let inputs = KeyInputs::new("1h", Decimal::ONE);
        let ctx = OpenContext {
            quantity: Decimal::from(3),
            entry_price: Decimal::from(100),
            ..OpenContext::default()
        };
        let mut card = Card::open(CardKey::new("1h:1.00"), &inputs, &ctx, TimeMs::new(1));
        let entry = card
            .close(
                &CloseEvent {
                    exit_price: Decimal::from(110),
                    pnl_percent: Decimal::from(10),
                    ..CloseEvent::default()
                },
                TimeMs::new(2),
                10,
            )
            .unwrap();
        assert_eq!(entry.quantity, Decimal::from(3));
        assert_eq!(entry.entry_price, Decimal::from(100));
        assert_eq!(entry.exit_price, Some(Decimal::from(110)));
    }
}
