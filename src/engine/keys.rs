//! Content key derivation with a bounded memo table.

use crate::domain::{CardKey, KeyInputs};
use lru::LruCache;
use parking_lot::Mutex;
use rust_decimal::{Decimal, RoundingStrategy};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Precision is clamped to this many decimal places.
pub const MAX_PRECISION: u32 = 8;

type MemoKey = (String, Decimal, u32);

/// Maps (time bucket, normalized value) to a stable [`CardKey`].
///
/// Lookups go through an LRU memo table so repeated derivations hand back
/// the same shared key instance instead of re-formatting.
#[derive(Debug)]
pub struct KeyDeriver {
    memo: Mutex<LruCache<MemoKey, CardKey>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl KeyDeriver {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            memo: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Derive the key for `inputs`, clamping `precision` to [`MAX_PRECISION`].
    pub fn derive_key(&self, time_bucket: &str, value: Decimal, precision: u32) -> CardKey {
        let precision = precision.min(MAX_PRECISION);
        let memo_key = (time_bucket.to_string(), value, precision);

        let mut memo = self.memo.lock();
        if let Some(key) = memo.get(&memo_key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return key.clone();
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let key = CardKey::new(format_key(time_bucket, value, precision));
        memo.put(memo_key, key.clone());
        key
    }

    pub fn derive(&self, inputs: &KeyInputs, precision: u32) -> CardKey {
        self.derive_key(&inputs.time_bucket, inputs.value, precision)
    }

    /// (hits, misses) since construction.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    pub fn len(&self) -> usize {
        self.memo.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.lock().is_empty()
    }
}

/// `"{bucket}:{value}"` with the value rounded half away from zero and
/// printed with exactly `precision` decimals.
pub fn format_key(time_bucket: &str, value: Decimal, precision: u32) -> String {
    let precision = precision.min(MAX_PRECISION);
    let mut rounded =
        value.round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero);
    if rounded.is_zero() {
        // Avoid "-0.00".
        rounded = Decimal::ZERO;
    }
    rounded.rescale(precision);
    format!("{}:{}", time_bucket.trim(), rounded)
}
