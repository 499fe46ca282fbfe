//! Destination-side transaction cache.
//!
//! Holds cross-shard transactions addressed to the local shard. There is no
//! sender bookkeeping and no selection here (such transactions are already
//! half-executed); retention is FIFO with immunity marks protecting recent
//! arrivals, and evictions fan out to registered handlers like in the main
//! cache.

use crate::config::{ConfigError, CrossCacheConfig};
use crate::immunity::ImmunityCache;
use crate::notifier::{EvictionHandler, EvictionNotifier};
use crate::tx::{TxHash, WrappedTransaction};
use std::sync::Arc;
use tracing::{debug, trace};

pub struct CrossTxCache {
    config: CrossCacheConfig,
    immunity_cache: ImmunityCache,
    notifier: EvictionNotifier,
}

impl CrossTxCache {
    pub fn new(config: CrossCacheConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        debug!(name = %config.name, "creating cross-shard transaction cache");

        let immunity_cache = ImmunityCache::new(
            config.num_chunks,
            config.max_num_items,
            config.max_num_bytes,
            config.num_items_to_preemptively_evict,
        );

        Ok(Self {
            config,
            immunity_cache,
            notifier: EvictionNotifier::new(),
        })
    }

    /// Marks transactions as non-evictable; absent hashes become immune on
    /// arrival. Returns `(num_now_marked, num_future_marked)`.
    pub fn immunize_txs_against_eviction(&self, keys: &[TxHash]) -> (u32, u32) {
        let (num_now, num_future) = self.immunity_cache.immunize_keys(keys);
        trace!(
            name = %self.config.name,
            num_keys = keys.len(),
            num_now,
            num_future,
            "immunized transactions against eviction"
        );
        (num_now, num_future)
    }

    /// Returns `(has, added)`.
    pub fn add_tx(&self, tx: Arc<WrappedTransaction>) -> (bool, bool) {
        let (has, added, evicted) = self.immunity_cache.has_or_add(tx);
        if !evicted.is_empty() {
            self.notifier.add_evicted_hashes(evicted);
        }
        (has, added)
    }

    pub fn get_by_tx_hash(&self, hash: &[u8]) -> Option<Arc<WrappedTransaction>> {
        self.immunity_cache.get(hash)
    }

    pub fn has(&self, hash: &[u8]) -> bool {
        self.immunity_cache.has(hash)
    }

    /// Removes a transaction; registered handlers are notified asynchronously.
    pub fn remove_tx_by_hash(&self, hash: &[u8]) -> bool {
        let removed = self.immunity_cache.remove(hash);
        if removed {
            self.notifier.add_evicted_hashes(vec![hash.to_vec()]);
        }
        removed
    }

    pub fn register_eviction_handler(&self, handler: EvictionHandler) {
        self.notifier.register_handler(handler);
    }

    pub fn for_each_transaction(&self, function: impl FnMut(&TxHash, &Arc<WrappedTransaction>)) {
        self.immunity_cache.for_each(function);
    }

    pub fn keys(&self) -> Vec<TxHash> {
        self.immunity_cache.keys()
    }

    pub fn len(&self) -> u64 {
        self.immunity_cache.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_bytes(&self) -> i64 {
        self.immunity_cache.num_bytes()
    }

    pub fn clear(&self) {
        self.immunity_cache.clear();
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}
