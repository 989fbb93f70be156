//! Card and history entry types.

use super::history::HistoryLedger;
use super::primitives::{CardId, CardKey, TimeMs};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardState {
    /// First open under a key with no prior record.
    Active,
    /// Reactivated under a key that already had a live record.
    OverlapActive,
    /// Closed, waiting for the next creation sweep.
    Gray,
    /// Terminal for this card instance.
    Removed,
}

impl CardState {
    /// ACTIVE or OVERLAP_ACTIVE: visible to normal queries and counted by capacity.
    pub fn is_active(&self) -> bool {
        matches!(self, CardState::Active | CardState::OverlapActive)
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, CardState::Removed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CardState::Active => "ACTIVE",
            CardState::OverlapActive => "OVERLAP_ACTIVE",
            CardState::Gray => "GRAY",
            CardState::Removed => "REMOVED",
        }
    }
}

impl fmt::Display for CardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of lifecycle event recorded in a card's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryKind {
    Opened,
    Reopened,
    Closed,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::Opened => "OPENED",
            HistoryKind::Reopened => "REOPENED",
            HistoryKind::Closed => "CLOSED",
        }
    }
}

/// Immutable lifecycle event. Late corrections are new entries, never edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub kind: HistoryKind,
    pub key: CardKey,
    pub generation: u32,
    pub at: TimeMs,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    #[serde(default)]
    pub exit_price: Option<Decimal>,
    #[serde(default)]
    pub pnl_percent: Option<Decimal>,
    #[serde(default)]
    pub pnl_amount: Option<Decimal>,
    pub fee: Decimal,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub is_simulation: bool,
}

impl HistoryEntry {
    /// Realized loss: a CLOSED entry with a negative P&L percent.
    pub fn is_loss(&self) -> bool {
        self.kind == HistoryKind::Closed
            && self.pnl_percent.map(|p| p.is_sign_negative() && !p.is_zero()) == Some(true)
    }
}

/// Letter rank derived from a card's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rank {
    F,
    E,
    D,
    #[serde(rename = "C-")]
    CMinus,
    C,
    #[serde(rename = "C+")]
    CPlus,
    B,
    #[serde(rename = "B+")]
    BPlus,
    A,
    S,
}

impl Rank {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rank::F => "F",
            Rank::E => "E",
            Rank::D => "D",
            Rank::CMinus => "C-",
            Rank::C => "C",
            Rank::CPlus => "C+",
            Rank::B => "B",
            Rank::BPlus => "B+",
            Rank::A => "A",
            Rank::S => "S",
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs the key deriver turns into a [`CardKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInputs {
    pub time_bucket: String,
    pub value: Decimal,
}

impl KeyInputs {
    pub fn new(time_bucket: impl Into<String>, value: Decimal) -> Self {
        Self {
            time_bucket: time_bucket.into(),
            value,
        }
    }
}

/// Position-like record identified by a derived content key.
///
/// `state` is private: it only moves along the lifecycle edges in
/// [`super::lifecycle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub key: CardKey,
    pub time_bucket: String,
    pub value: Decimal,
    pub(super) state: CardState,
    pub history: HistoryLedger,
    pub generation: u32,
    #[serde(default)]
    pub score: Option<Decimal>,
    #[serde(default)]
    pub rank: Option<Rank>,
    pub opened_at: TimeMs,
    pub updated_at: TimeMs,
    #[serde(default)]
    pub removal_pending: bool,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Card {
    pub fn state(&self) -> CardState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn is_removed(&self) -> bool {
        self.state.is_removed()
    }

    /// Key inputs that reproduce this card's key.
    pub fn key_inputs(&self) -> KeyInputs {
        KeyInputs::new(self.time_bucket.clone(), self.value)
    }

    /// Merge precedence: later `opened_at` wins, then later `updated_at`.
    pub fn recency(&self) -> (TimeMs, TimeMs) {
        (self.opened_at, self.updated_at)
    }
}

/// Caller-editable fields. Identity, state, generation and history are not here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPatch {
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub removal_pending: Option<bool>,
}

impl CardPatch {
    /// Apply to `card`; returns true if any field actually changed.
    pub fn apply_to(&self, card: &mut Card) -> bool {
        let mut changed = false;
        if let Some(note) = &self.note {
            if card.note.as_ref() != Some(note) {
                card.note = Some(note.clone());
                changed = true;
            }
        }
        if let Some(tags) = &self.tags {
            if &card.tags != tags {
                card.tags = tags.clone();
                changed = true;
            }
        }
        if let Some(pending) = self.removal_pending {
            if card.removal_pending != pending {
                card.removal_pending = pending;
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn closed(pnl: &str) -> HistoryEntry {
        HistoryEntry {
            kind: HistoryKind::Closed,
            key: CardKey::new("5m:0.42"),
            generation: 1,
            at: TimeMs::new(1),
            quantity: Decimal::ONE,
            entry_price: Decimal::ONE,
            exit_price: Some(Decimal::ONE),
            pnl_percent: Some(Decimal::from_str(pnl).unwrap()),
            pnl_amount: None,
            fee: Decimal::ZERO,
            note: None,
            is_simulation: false,
        }
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&CardState::OverlapActive).unwrap();
        assert_eq!(json, "\"OVERLAP_ACTIVE\"");
        assert!(CardState::Active.is_active());
        assert!(CardState::OverlapActive.is_active());
        assert!(!CardState::Gray.is_active());
        assert!(CardState::Removed.is_removed());
    }

    #[test]
    fn test_loss_detection() {
        assert!(closed("-0.5").is_loss());
        assert!(!closed("0").is_loss());
        assert!(!closed("3").is_loss());
        let mut opened = closed("-2");
        opened.kind = HistoryKind::Opened;
        assert!(!opened.is_loss());
    }

    #[test]
    fn test_rank_serializes_as_letter() {
        assert_eq!(serde_json::to_string(&Rank::BPlus).unwrap(), "\"B+\"");
        assert_eq!(Rank::CMinus.to_string(), "C-");
        assert!(Rank::F < Rank::S);
    }
}
