//! Domain types for the card pool.
//!
//! This module provides:
//! - Domain primitives: TimeMs, CardId, CardKey
//! - The Card record, its lifecycle states and history entries
//! - The bounded newest-first history ledger
//! - The lifecycle state machine and the events that drive it

pub mod card;
pub mod history;
pub mod lifecycle;
pub mod primitives;

pub use card::{Card, CardPatch, CardState, HistoryEntry, HistoryKind, KeyInputs, Rank};
pub use history::HistoryLedger;
pub use lifecycle::{CloseEvent, LifecycleError, OpenContext, OpenEvent, Transition};
pub use primitives::{CardId, CardKey, TimeMs};
