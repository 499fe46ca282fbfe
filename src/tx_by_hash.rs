//! Concurrent hash-indexed transaction map.
//!
//! The map is split into a configurable number of chunks, each guarding its
//! own `HashMap` with an `RwLock`; an operation touches exactly one chunk's
//! lock. The byte and item counters are atomics maintained alongside the
//! chunk mutations, readable lock-free and therefore only approximate while
//! mutations are in flight.

use crate::tx::{TxHash, WrappedTransaction};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

pub struct TxByHashMap {
    chunks: Vec<RwLock<HashMap<TxHash, Arc<WrappedTransaction>>>>,
    counter: AtomicU64,
    num_bytes: AtomicI64,
}

impl TxByHashMap {
    pub fn new(num_chunks: u32) -> Self {
        let num_chunks = num_chunks.max(1) as usize;
        let chunks = (0..num_chunks)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();

        Self {
            chunks,
            counter: AtomicU64::new(0),
            num_bytes: AtomicI64::new(0),
        }
    }

    fn chunk_for(&self, hash: &[u8]) -> &RwLock<HashMap<TxHash, Arc<WrappedTransaction>>> {
        let mut hasher = DefaultHasher::new();
        hash.hash(&mut hasher);
        let index = hasher.finish() as usize % self.chunks.len();
        &self.chunks[index]
    }

    /// Returns true iff the hash was absent (and the transaction was added).
    pub fn add(&self, tx: Arc<WrappedTransaction>) -> bool {
        let chunk = self.chunk_for(&tx.tx_hash);
        let mut guard = chunk.write().unwrap();
        if guard.contains_key(&tx.tx_hash) {
            return false;
        }

        let size = tx.size_in_bytes;
        guard.insert(tx.tx_hash.clone(), tx);
        drop(guard);

        self.counter.fetch_add(1, Ordering::Relaxed);
        self.num_bytes.fetch_add(size, Ordering::Relaxed);
        true
    }

    pub fn get(&self, hash: &[u8]) -> Option<Arc<WrappedTransaction>> {
        let chunk = self.chunk_for(hash);
        let guard = chunk.read().unwrap();
        guard.get(hash).cloned()
    }

    pub fn contains(&self, hash: &[u8]) -> bool {
        let chunk = self.chunk_for(hash);
        let guard = chunk.read().unwrap();
        guard.contains_key(hash)
    }

    /// Returns whether the hash was present.
    pub fn remove(&self, hash: &[u8]) -> bool {
        let chunk = self.chunk_for(hash);
        let mut guard = chunk.write().unwrap();
        let removed = guard.remove(hash);
        drop(guard);

        match removed {
            Some(tx) => {
                self.counter.fetch_sub(1, Ordering::Relaxed);
                self.num_bytes.fetch_sub(tx.size_in_bytes, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Removes a batch of transactions; used by the evictor. Returns how many
    /// were actually present.
    pub fn remove_bulk(&self, hashes: &[TxHash]) -> u32 {
        let mut num_removed = 0;
        for hash in hashes {
            if self.remove(hash) {
                num_removed += 1;
            }
        }
        num_removed
    }

    /// Approximate while mutations are in flight.
    pub fn count(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Approximate while mutations are in flight.
    pub fn num_bytes(&self) -> i64 {
        self.num_bytes.load(Ordering::Relaxed)
    }

    /// Exact count, obtained by visiting every chunk (diagnostics only).
    pub fn count_in_chunks(&self) -> u64 {
        self.chunks
            .iter()
            .map(|chunk| chunk.read().unwrap().len() as u64)
            .sum()
    }

    pub fn keys(&self) -> Vec<TxHash> {
        let mut keys = Vec::with_capacity(self.count() as usize);
        for chunk in &self.chunks {
            let guard = chunk.read().unwrap();
            keys.extend(guard.keys().cloned());
        }
        keys
    }

    /// Snapshot iteration: each chunk is visited under its read lock, one at
    /// a time; the global order is unspecified.
    pub fn for_each(&self, mut function: impl FnMut(&TxHash, &Arc<WrappedTransaction>)) {
        for chunk in &self.chunks {
            let guard = chunk.read().unwrap();
            for (hash, tx) in guard.iter() {
                function(hash, tx);
            }
        }
    }

    pub fn values(&self) -> Vec<Arc<WrappedTransaction>> {
        let mut values = Vec::with_capacity(self.count() as usize);
        for chunk in &self.chunks {
            let guard = chunk.read().unwrap();
            values.extend(guard.values().cloned());
        }
        values
    }

    pub fn clear(&self) {
        for chunk in &self.chunks {
            chunk.write().unwrap().clear();
        }
        self.counter.store(0, Ordering::Relaxed);
        self.num_bytes.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MempoolHostMock;
    use crate::tx::Transaction;

    fn wrapped(hash: &[u8], size: i64) -> Arc<WrappedTransaction> {
        let tx = Transaction {
            sender: b"alice".to_vec(),
            receiver: b"bob".to_vec(),
            nonce: 1,
            gas_limit: 50_000,
            gas_price: 1_000_000_000,
            data: Vec::new(),
            value: 0,
            guardian: None,
        };
        Arc::new(WrappedTransaction::new(
            tx,
            hash.to_vec(),
            size,
            &MempoolHostMock::new(),
        ))
    }

    #[test]
    fn add_get_remove_roundtrip() {
        let map = TxByHashMap::new(16);

        assert!(map.add(wrapped(b"hash-1", 100)));
        assert!(map.add(wrapped(b"hash-2", 200)));
        assert_eq!(map.count(), 2);
        assert_eq!(map.num_bytes(), 300);

        assert!(map.get(b"hash-1").is_some());
        assert!(map.get(b"hash-3").is_none());

        assert!(map.remove(b"hash-1"));
        assert!(!map.remove(b"hash-1"));
        assert_eq!(map.count(), 1);
        assert_eq!(map.num_bytes(), 200);
    }

    #[test]
    fn duplicate_add_is_rejected_without_counter_drift() {
        let map = TxByHashMap::new(4);

        assert!(map.add(wrapped(b"hash-1", 100)));
        assert!(!map.add(wrapped(b"hash-1", 100)));
        assert_eq!(map.count(), 1);
        assert_eq!(map.num_bytes(), 100);
    }

    #[test]
    fn remove_bulk_reports_only_present_hashes() {
        let map = TxByHashMap::new(4);
        map.add(wrapped(b"hash-1", 100));
        map.add(wrapped(b"hash-2", 100));

        let removed = map.remove_bulk(&[
            b"hash-1".to_vec(),
            b"hash-2".to_vec(),
            b"hash-3".to_vec(),
        ]);
        assert_eq!(removed, 2);
        assert_eq!(map.count(), 0);
        assert_eq!(map.num_bytes(), 0);
    }

    #[test]
    fn for_each_visits_every_transaction_once() {
        let map = TxByHashMap::new(8);
        for i in 0u8..50 {
            map.add(wrapped(&[i], 10));
        }

        let mut seen = std::collections::HashSet::new();
        map.for_each(|hash, _| {
            assert!(seen.insert(hash.clone()));
        });
        assert_eq!(seen.len(), 50);
        assert_eq!(map.count_in_chunks(), 50);
    }

    #[test]
    fn clear_resets_counters() {
        let map = TxByHashMap::new(4);
        map.add(wrapped(b"hash-1", 100));
        map.clear();
        assert_eq!(map.count(), 0);
        assert_eq!(map.num_bytes(), 0);
        assert!(map.get(b"hash-1").is_none());
    }

    #[test]
    fn concurrent_adds_keep_counters_consistent() {
        let map = Arc::new(TxByHashMap::new(16));
        let mut handles = Vec::new();

        for thread_index in 0u8..4 {
            let map = Arc::clone(&map);
            handles.push(std::thread::spawn(move || {
                for i in 0u8..100 {
                    map.add(wrapped(&[thread_index, i], 10));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(map.count(), 400);
        assert_eq!(map.num_bytes(), 4000);
        assert_eq!(map.count_in_chunks(), 400);
    }
}
