//! Bounded, newest-first history ledger.

use super::card::{HistoryEntry, HistoryKind};
use serde::{Deserialize, Serialize};

/// Newest-first append log. Entries are never edited after append; the tail
/// beyond the cap is dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryLedger(Vec<HistoryEntry>);

impl HistoryLedger {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert at the head, then drop anything past `max_history` (at least 1 is kept).
    pub fn append(&mut self, entry: HistoryEntry, max_history: usize) {
        self.0.insert(0, entry);
        self.truncate(max_history);
    }

    /// Trim the tail to `max_history` entries.
    pub fn truncate(&mut self, max_history: usize) {
        self.0.truncate(max_history.max(1));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Most recent entry.
    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.0.first()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.0.iter()
    }

    /// Closed entries, newest first.
    pub fn closes(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.0.iter().filter(|e| e.kind == HistoryKind::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CardKey, TimeMs};
    use rust_decimal::Decimal;

    fn entry(at: i64) -> HistoryEntry {
        HistoryEntry {
            kind: HistoryKind::Opened,
            key: CardKey::new("1m:1.00"),
            generation: 1,
            at: TimeMs::new(at),
            quantity: Decimal::ONE,
            entry_price: Decimal::ONE,
            exit_price: None,
            pnl_percent: None,
            pnl_amount: None,
            fee: Decimal::ZERO,
            note: None,
            is_simulation: false,
        }
    }

    #[test]
    fn test_append_is_newest_first() {
        let mut ledger = HistoryLedger::new();
        ledger.append(entry(1), 10);
        ledger.append(entry(2), 10);
        assert_eq!(ledger.latest().unwrap().at, TimeMs::new(2));
        assert_eq!(ledger.entries()[1].at, TimeMs::new(1));
    }

    #[test]
    fn test_tail_is_dropped_past_cap() {
        let mut ledger = HistoryLedger::new();
        for at in 0..8 {
            ledger.append(entry(at), 3);
            assert!(ledger.len() <= 3);
        }
        let ats: Vec<i64> = ledger.iter().map(|e| e.at.as_ms()).collect();
        assert_eq!(ats, vec![7, 6, 5]);
    }

    #[test]
    fn test_zero_cap_keeps_newest() {
        let mut ledger = HistoryLedger::new();
        ledger.append(entry(1), 0);
        ledger.append(entry(2), 0);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.latest().unwrap().at, TimeMs::new(2));
    }

    #[test]
    fn test_serializes_as_array() {
        let mut ledger = HistoryLedger::new();
        ledger.append(entry(5), 4);
        let value = serde_json::to_value(&ledger).unwrap();
        assert!(value.is_array());
        let back: HistoryLedger = serde_json::from_value(value).unwrap();
        assert_eq!(back, ledger);
    }
}
