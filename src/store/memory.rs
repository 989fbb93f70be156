//! In-process backend for tests and embedding.

use super::{PersistenceBackend, RawRecord, RecordMetadata, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Backend holding records in a map, with knobs to inject latency and failures.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, RawRecord>>,
    enumerate_calls: AtomicUsize,
    write_calls: AtomicUsize,
    enumerate_delay: Option<Duration>,
    write_delay: Option<Duration>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every `enumerate`.
    pub fn with_enumerate_delay(mut self, delay: Duration) -> Self {
        self.enumerate_delay = Some(delay);
        self
    }

    /// Sleep this long inside every `write`.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Make every subsequent write and delete fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Store a record verbatim, bypassing the codec.
    pub fn insert_raw(&self, record: RawRecord) {
        self.records.lock().insert(record.key_path.clone(), record);
    }

    pub fn records(&self, kind: &str) -> Vec<RawRecord> {
        self.records
            .lock()
            .values()
            .filter(|r| r.metadata.kind == kind)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn enumerate_calls(&self) -> usize {
        self.enumerate_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceBackend for MemoryStore {
    async fn enumerate(&self, kind: &str) -> Result<Vec<RawRecord>, StoreError> {
        self.enumerate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.enumerate_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.records(kind))
    }

    async fn read(&self, key_path: &str) -> Result<Option<RawRecord>, StoreError> {
        Ok(self.records.lock().get(key_path).cloned())
    }

    async fn write(
        &self,
        key_path: &str,
        payload: Vec<u8>,
        metadata: &RecordMetadata,
    ) -> Result<(), StoreError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        self.check_writable()?;
        self.records.lock().insert(
            key_path.to_string(),
            RawRecord {
                key_path: key_path.to_string(),
                payload,
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key_path: &str) -> Result<bool, StoreError> {
        self.check_writable()?;
        Ok(self.records.lock().remove(key_path).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(kind: &str, id: &str) -> RecordMetadata {
        RecordMetadata {
            kind: kind.to_string(),
            record_id: id.to_string(),
            ..RecordMetadata::default()
        }
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let store = MemoryStore::new();
        let path = store.key_path("card", "a");
        store.write(&path, vec![1, 2], &meta("card", "a")).await.unwrap();

        let rec = store.read(&path).await.unwrap().unwrap();
        assert_eq!(rec.payload, vec![1, 2]);
        assert!(store.delete(&path).await.unwrap());
        assert!(!store.delete(&path).await.unwrap());
        assert!(store.read(&path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enumerate_filters_by_kind() {
        let store = MemoryStore::new();
        store.write("a", vec![], &meta("card", "a")).await.unwrap();
        store.write("b", vec![], &meta("card_archive", "b")).await.unwrap();

        let cards = store.enumerate("card").await.unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].metadata.record_id, "a");
        assert_eq!(store.enumerate_calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(store.write("a", vec![], &meta("card", "a")).await.is_err());
        assert!(store.is_empty());
        store.set_fail_writes(false);
        store.write("a", vec![], &meta("card", "a")).await.unwrap();
        assert_eq!(store.len(), 1);
    }
}
