pub mod api;
pub mod archive;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod store;
pub mod sync;

pub use archive::{Archive, StoreArchive};
pub use config::{Config, EngineConfig};
pub use db::init_db;
pub use domain::{
    Card, CardId, CardKey, CardPatch, CardState, CloseEvent, HistoryEntry, HistoryKind, KeyInputs,
    OpenContext, OpenEvent, Rank, TimeMs,
};
pub use engine::{CardEngine, Disposition, EngineError};
pub use error::AppError;
pub use store::{MemoryStore, PersistenceBackend, SqliteStore};
