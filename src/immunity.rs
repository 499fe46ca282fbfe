//! Chunked FIFO cache with immunity marks.
//!
//! Entries are evicted in insertion order under size pressure, except those
//! marked immune, which are skipped until their mark is lifted (by explicit
//! removal). Keys can also be immunized before they arrive: such "future
//! immune" keys are remembered per chunk and applied on insertion, and are
//! themselves displaced by size pressure.

use crate::tx::{TxHash, WrappedTransaction};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use tracing::trace;

struct CacheItem {
    payload: Arc<WrappedTransaction>,
    size: i64,
    is_immune: bool,
}

struct ImmunityChunk {
    items: HashMap<TxHash, CacheItem>,
    keys_in_order: VecDeque<TxHash>,
    keys_to_immunize_future: HashSet<TxHash>,
    future_keys_in_order: VecDeque<TxHash>,
    num_bytes: i64,

    max_num_items: u32,
    max_num_bytes: u32,
    num_items_to_preemptively_evict: u32,
}

impl ImmunityChunk {
    fn new(max_num_items: u32, max_num_bytes: u32, num_items_to_preemptively_evict: u32) -> Self {
        Self {
            items: HashMap::new(),
            keys_in_order: VecDeque::new(),
            keys_to_immunize_future: HashSet::new(),
            future_keys_in_order: VecDeque::new(),
            num_bytes: 0,
            max_num_items,
            max_num_bytes,
            num_items_to_preemptively_evict,
        }
    }

    fn immunize_keys(&mut self, keys: &[TxHash]) -> (u32, u32) {
        let mut num_now = 0;
        let mut num_future = 0;

        for key in keys {
            if let Some(item) = self.items.get_mut(key) {
                item.is_immune = true;
                num_now += 1;
            } else {
                self.remember_future_immune_key(key.clone());
                num_future += 1;
            }
        }

        (num_now, num_future)
    }

    fn remember_future_immune_key(&mut self, key: TxHash) {
        if self.keys_to_immunize_future.contains(&key) {
            return;
        }

        // The future set itself yields to size pressure, oldest first.
        while self.keys_to_immunize_future.len() >= self.max_num_items as usize {
            let Some(displaced) = self.future_keys_in_order.pop_front() else {
                break;
            };
            self.keys_to_immunize_future.remove(&displaced);
        }

        self.keys_to_immunize_future.insert(key.clone());
        self.future_keys_in_order.push_back(key);
    }

    /// Returns `(has, added, evicted_hashes)`.
    fn add(&mut self, tx: Arc<WrappedTransaction>) -> (bool, bool, Vec<TxHash>) {
        let key = tx.tx_hash.clone();
        if self.items.contains_key(&key) {
            return (true, false, Vec::new());
        }

        let size = tx.size_in_bytes;
        let evicted = self.evict_items_as_necessary(size);

        if self.is_capacity_exceeded_with(size) {
            // Everything left is immune; refuse rather than grow unbounded.
            return (false, false, evicted);
        }

        let is_immune = self.keys_to_immunize_future.remove(&key);
        if is_immune {
            self.future_keys_in_order.retain(|k| k != &key);
        }

        self.items.insert(
            key.clone(),
            CacheItem {
                payload: tx,
                size,
                is_immune,
            },
        );
        self.keys_in_order.push_back(key);
        self.num_bytes += size;
        (false, true, evicted)
    }

    fn evict_items_as_necessary(&mut self, incoming_size: i64) -> Vec<TxHash> {
        let mut evicted = Vec::new();

        while self.is_capacity_exceeded_with(incoming_size) {
            let batch = self.evict_oldest_non_immune_batch();
            if batch.is_empty() {
                break;
            }
            evicted.extend(batch);
        }

        evicted
    }

    fn is_capacity_exceeded_with(&self, incoming_size: i64) -> bool {
        let too_many_items = self.items.len() as u32 + 1 > self.max_num_items;
        let too_many_bytes = self.num_bytes + incoming_size > self.max_num_bytes as i64;
        too_many_items || too_many_bytes
    }

    fn evict_oldest_non_immune_batch(&mut self) -> Vec<TxHash> {
        let mut evicted = Vec::new();
        let mut inspected = 0usize;

        while evicted.len() < self.num_items_to_preemptively_evict as usize
            && inspected < self.keys_in_order.len()
        {
            let Some(key) = self.keys_in_order.get(inspected).cloned() else {
                break;
            };

            let is_immune = self
                .items
                .get(&key)
                .map(|item| item.is_immune)
                .unwrap_or(false);
            if is_immune {
                inspected += 1;
                continue;
            }

            self.keys_in_order.remove(inspected);
            if let Some(item) = self.items.remove(&key) {
                self.num_bytes -= item.size;
                evicted.push(key);
            }
        }

        evicted
    }

    fn get(&self, key: &[u8]) -> Option<Arc<WrappedTransaction>> {
        self.items.get(key).map(|item| Arc::clone(&item.payload))
    }

    fn remove(&mut self, key: &[u8]) -> bool {
        match self.items.remove(key) {
            Some(item) => {
                self.num_bytes -= item.size;
                self.keys_in_order.retain(|k| k != key);
                true
            }
            None => false,
        }
    }

    fn count(&self) -> u64 {
        self.items.len() as u64
    }
}

pub struct ImmunityCache {
    chunks: Vec<Mutex<ImmunityChunk>>,
}

impl ImmunityCache {
    pub fn new(
        num_chunks: u32,
        max_num_items: u32,
        max_num_bytes: u32,
        num_items_to_preemptively_evict: u32,
    ) -> Self {
        let num_chunks = num_chunks.max(1);
        let max_num_items_per_chunk = max_num_items.div_ceil(num_chunks);
        let max_num_bytes_per_chunk = max_num_bytes.div_ceil(num_chunks);

        let chunks = (0..num_chunks)
            .map(|_| {
                Mutex::new(ImmunityChunk::new(
                    max_num_items_per_chunk,
                    max_num_bytes_per_chunk,
                    num_items_to_preemptively_evict,
                ))
            })
            .collect();

        Self { chunks }
    }

    fn chunk_for(&self, key: &[u8]) -> &Mutex<ImmunityChunk> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = hasher.finish() as usize % self.chunks.len();
        &self.chunks[index]
    }

    /// Marks present keys immune and remembers absent ones as future-immune.
    /// Returns `(num_now_marked, num_future_marked)`.
    pub fn immunize_keys(&self, keys: &[TxHash]) -> (u32, u32) {
        let mut num_now_total = 0;
        let mut num_future_total = 0;

        for key in keys {
            let mut chunk = self.chunk_for(key).lock().unwrap();
            let (num_now, num_future) = chunk.immunize_keys(std::slice::from_ref(key));
            num_now_total += num_now;
            num_future_total += num_future;
        }

        trace!(
            num_keys = keys.len(),
            num_now = num_now_total,
            num_future = num_future_total,
            "immunized keys"
        );
        (num_now_total, num_future_total)
    }

    /// Returns `(has, added, evicted_hashes)`.
    pub fn has_or_add(&self, tx: Arc<WrappedTransaction>) -> (bool, bool, Vec<TxHash>) {
        let mut chunk = self.chunk_for(&tx.tx_hash).lock().unwrap();
        chunk.add(tx)
    }

    pub fn get(&self, key: &[u8]) -> Option<Arc<WrappedTransaction>> {
        let chunk = self.chunk_for(key).lock().unwrap();
        chunk.get(key)
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&self, key: &[u8]) -> bool {
        let mut chunk = self.chunk_for(key).lock().unwrap();
        chunk.remove(key)
    }

    pub fn count(&self) -> u64 {
        self.chunks
            .iter()
            .map(|chunk| chunk.lock().unwrap().count())
            .sum()
    }

    pub fn num_bytes(&self) -> i64 {
        self.chunks
            .iter()
            .map(|chunk| chunk.lock().unwrap().num_bytes)
            .sum()
    }

    pub fn for_each(&self, mut function: impl FnMut(&TxHash, &Arc<WrappedTransaction>)) {
        for chunk in &self.chunks {
            let guard = chunk.lock().unwrap();
            for (key, item) in guard.items.iter() {
                function(key, &item.payload);
            }
        }
    }

    pub fn keys(&self) -> Vec<TxHash> {
        let mut keys = Vec::new();
        self.for_each(|key, _| keys.push(key.clone()));
        keys
    }

    pub fn clear(&self) {
        for chunk in &self.chunks {
            let mut guard = chunk.lock().unwrap();
            guard.items.clear();
            guard.keys_in_order.clear();
            guard.keys_to_immunize_future.clear();
            guard.future_keys_in_order.clear();
            guard.num_bytes = 0;
        }
    }
}
