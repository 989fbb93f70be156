//! Synchronisation between the in-memory pool and the persistence backend.
//!
//! This module provides:
//! - `PersistenceWriter`: sharded, bounded write-back workers with flush and stats
//! - `CardLoader` and the newest-wins merge used on load
//! - `SingleFlight`, which lets concurrent load requests share one run

pub mod loader;
pub mod single_flight;
pub mod writer;

pub use loader::{merge_into, reduce_newest, CardLoader, Fetched, LoadReport, MergeOutcome};
pub use single_flight::SingleFlight;
pub use writer::{FlushOutcome, PersistenceWriter, WriteOutcome, WriterStats};
