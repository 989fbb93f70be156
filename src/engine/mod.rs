//! Card lifecycle and indexing engine.
//!
//! This module provides:
//! - Content key derivation with a bounded memo table
//! - The dual id/key index snapshot
//! - FIFO capacity selection and dedup/overlap resolution
//! - Score/rank derivation and the auto-discard policy
//! - `CardEngine`, which ties them together under one lock

use crate::domain::{CardId, CardKey, CardState, LifecycleError, Transition};
use thiserror::Error;

pub mod capacity;
pub mod card_engine;
pub mod dedup;
pub mod discard;
pub mod index;
pub mod keys;
pub mod score;

pub use card_engine::{CardEngine, CloseOutcome, DiscardOutcome, Disposition, OpenOutcome};
pub use discard::{DiscardPolicy, DiscardReason};
pub use index::DualIndex;
pub use keys::KeyDeriver;

/// Failures surfaced to engine callers. None of them leave the pool half-mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("card not found: {0}")]
    CardNotFound(CardId),
    #[error("no card for key {0}")]
    KeyNotFound(CardKey),
    #[error("card {id}: {transition} is not allowed from {from}")]
    InvalidTransition {
        id: CardId,
        from: CardState,
        transition: Transition,
    },
    #[error("card {0} is removed")]
    Removed(CardId),
    #[error("archive error: {0}")]
    Archive(String),
}

impl From<LifecycleError> for EngineError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::IllegalTransition {
                id,
                from,
                transition,
            } => EngineError::InvalidTransition {
                id,
                from,
                transition,
            },
            LifecycleError::Terminal(id) => EngineError::Removed(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_errors_map_to_engine_errors() {
        let id = CardId::new();
        let err: EngineError = LifecycleError::Terminal(id).into();
        assert_eq!(err, EngineError::Removed(id));

        let err: EngineError = LifecycleError::IllegalTransition {
            id,
            from: CardState::Gray,
            transition: Transition::Close,
        }
        .into();
        assert_eq!(
            err.to_string(),
            format!("card {}: close is not allowed from GRAY", id)
        );
    }
}
