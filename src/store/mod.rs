//! Persistence backend abstraction for mirroring cards.
//!
//! This module provides:
//! - The `PersistenceBackend` trait (enumerate / read / write / delete)
//! - `RawRecord` and its metadata as handed back by a backend
//! - The record codec that validates persisted cards at the boundary
//! - `MemoryStore` (in-process, with failure injection) and `SqliteStore`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod codec;
pub mod memory;
pub mod sqlite;

pub use codec::{
    decode_archived, decode_card, encode_card, ArchiveNote, RecordError, ARCHIVE_RECORD_KIND,
    CARD_RECORD_KIND,
};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Searchable metadata stored next to an opaque payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub kind: String,
    pub record_id: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub opened_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

/// A persisted record exactly as the backend returns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub key_path: String,
    pub payload: Vec<u8>,
    pub metadata: RecordMetadata,
}

/// Error type for backend operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Content-addressable key/value store with metadata.
///
/// The engine never builds key paths itself; it asks the backend through
/// [`PersistenceBackend::key_path`] and treats the result as opaque.
#[async_trait]
pub trait PersistenceBackend: Send + Sync + fmt::Debug {
    /// Derive the storage path for a record of `kind` with id `record_id`.
    fn key_path(&self, kind: &str, record_id: &str) -> String {
        content_path(kind, record_id)
    }

    /// Every record of `kind`. Records may be partial or corrupt.
    async fn enumerate(&self, kind: &str) -> Result<Vec<RawRecord>, StoreError>;

    async fn read(&self, key_path: &str) -> Result<Option<RawRecord>, StoreError>;

    /// Insert or replace the record at `key_path`.
    async fn write(
        &self,
        key_path: &str,
        payload: Vec<u8>,
        metadata: &RecordMetadata,
    ) -> Result<(), StoreError>;

    /// Returns true if a record was deleted.
    async fn delete(&self, key_path: &str) -> Result<bool, StoreError>;
}

/// `sha256("{kind}/{record_id}")` as lowercase hex.
pub fn content_path(kind: &str, record_id: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(b"/");
    hasher.update(record_id.as_bytes());
    hex::encode(hasher.finalize())
}
