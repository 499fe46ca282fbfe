//! The mempool engine.
//!
//! `TxCache` keeps pending transactions in two synchronized indexes: a
//! chunked hash map (identity lookups) and a per-sender map of sorted lists
//! (nonce ordering, aggregates, scores). Ingestion may trigger eviction;
//! explicit removals and evictions fan out to registered handlers through a
//! worker pool. Selection builds block proposals from a snapshot of the
//! sender lists.

use crate::config::{CacheConfig, ConfigError};
use crate::host::MempoolHost;
use crate::metrics;
use crate::notifier::{EvictionHandler, EvictionNotifier};
use crate::score::ScoreComputer;
use crate::sender_list::SenderTxList;
use crate::sender_map::TxBySenderMap;
use crate::tx::{Address, TxHash, WrappedTransaction};
use crate::tx_by_hash::TxByHashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// What happened to one `add_tx` call.
#[derive(Debug, Default)]
pub struct AddOutcome {
    /// False iff the hash was already present (no state change).
    pub added: bool,
    /// Hashes evicted as a consequence of this insertion (per-sender
    /// capacity or global thresholds).
    pub evicted_hashes: Vec<TxHash>,
}

pub struct TxCache {
    pub(crate) name: String,
    pub(crate) config: CacheConfig,
    pub(crate) tx_by_hash: TxByHashMap,
    pub(crate) tx_by_sender: TxBySenderMap,
    /// Concurrent evictions must not overlap.
    pub(crate) eviction_mutex: Mutex<()>,
    pub(crate) notifier: EvictionNotifier,
    host: Arc<dyn MempoolHost>,
}

impl TxCache {
    pub fn new(config: CacheConfig, host: Arc<dyn MempoolHost>) -> Result<Self, ConfigError> {
        config.validate()?;
        debug!(name = %config.name, "creating transaction cache");

        let score_computer = Arc::new(ScoreComputer::new(host.as_ref()));
        let tx_by_hash = TxByHashMap::new(config.num_chunks);
        let tx_by_sender = TxBySenderMap::new(config.sender_constraints(), score_computer);

        Ok(Self {
            name: config.name.clone(),
            config,
            tx_by_hash,
            tx_by_sender,
            eviction_mutex: Mutex::new(()),
            notifier: EvictionNotifier::new(),
            host,
        })
    }

    /// Ingests one transaction. Duplicates are signaled, not errors; the
    /// returned outcome carries any hashes evicted to make room.
    pub fn add_tx(&self, tx: Arc<WrappedTransaction>) -> AddOutcome {
        let added_in_by_hash = self.tx_by_hash.add(Arc::clone(&tx));
        if !added_in_by_hash {
            return AddOutcome::default();
        }

        let (added_in_by_sender, evicted_by_sender_constraints) =
            self.tx_by_sender.add_tx(Arc::clone(&tx));
        if !added_in_by_sender {
            // Same hash arrived concurrently through another thread.
            warn!(
                name = %self.name,
                hash = %hex::encode(&tx.tx_hash),
                "transaction already in sender list; removing from hash index"
            );
            self.tx_by_hash.remove(&tx.tx_hash);
            return AddOutcome::default();
        }

        let mut evicted_hashes = evicted_by_sender_constraints;
        if !evicted_hashes.is_empty() {
            self.tx_by_hash.remove_bulk(&evicted_hashes);
        }

        if self.config.eviction_enabled && self.is_capacity_exceeded() {
            let journal = self.do_eviction();
            evicted_hashes.extend(journal.evicted_hashes);
        }

        if !evicted_hashes.is_empty() {
            metrics::TXCACHE_TRANSACTIONS_EVICTED.inc_by(evicted_hashes.len() as u64);
            self.notifier.add_evicted_hashes(evicted_hashes.clone());
        }

        metrics::TXCACHE_TRANSACTIONS_ADDED.inc();
        self.refresh_gauges();

        AddOutcome {
            added: true,
            evicted_hashes,
        }
    }

    pub fn get_by_hash(&self, hash: &[u8]) -> Option<Arc<WrappedTransaction>> {
        self.tx_by_hash.get(hash)
    }

    /// Removes a transaction from both indexes; registered eviction handlers
    /// are notified asynchronously. Returns whether the hash was present.
    pub fn remove_by_hash(&self, hash: &[u8]) -> bool {
        let Some(tx) = self.tx_by_hash.get(hash) else {
            return false;
        };

        let removed_from_by_hash = self.tx_by_hash.remove(hash);
        let removed_from_by_sender = self.tx_by_sender.remove_tx(&tx);
        if removed_from_by_hash != removed_from_by_sender {
            warn!(
                name = %self.name,
                hash = %hex::encode(hash),
                "indexes disagreed on removal; counters may drift temporarily"
            );
        }

        if removed_from_by_hash {
            metrics::TXCACHE_TRANSACTIONS_REMOVED.inc();
            self.refresh_gauges();
            self.notifier.add_evicted_hashes(vec![hash.to_vec()]);
        }
        removed_from_by_hash
    }

    /// Records the on-chain nonce of a sender; transactions with lower
    /// nonces are evicted and reported to the eviction handlers.
    pub fn notify_account_nonce(&self, sender: &Address, nonce: u64) {
        let evicted = self.tx_by_sender.notify_account_nonce(sender, nonce);
        if evicted.is_empty() {
            return;
        }

        debug!(
            name = %self.name,
            sender = %hex::encode(sender),
            nonce,
            num_evicted = evicted.len(),
            "account nonce notification evicted transactions"
        );

        self.tx_by_hash.remove_bulk(&evicted);
        metrics::TXCACHE_TRANSACTIONS_EVICTED.inc_by(evicted.len() as u64);
        self.refresh_gauges();
        self.notifier.add_evicted_hashes(evicted);
    }

    /// Pending transactions of one sender, in list order.
    pub fn get_transactions_for_sender(&self, sender: &Address) -> Vec<Arc<WrappedTransaction>> {
        self.tx_by_sender
            .get_list_for_sender(sender)
            .map(|list| list.get_txs())
            .unwrap_or_default()
    }

    pub fn register_eviction_handler(&self, handler: EvictionHandler) {
        self.notifier.register_handler(handler);
    }

    /// Approximate while mutations are in flight.
    pub fn len(&self) -> u64 {
        self.tx_by_hash.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate while mutations are in flight.
    pub fn num_bytes(&self) -> i64 {
        self.tx_by_hash.num_bytes()
    }

    /// Approximate while mutations are in flight.
    pub fn count_senders(&self) -> u64 {
        self.tx_by_sender.count_senders().max(0) as u64
    }

    /// Visits each sender's transactions under that sender's lock; the
    /// order across senders is unspecified.
    pub fn for_each_transaction(&self, mut function: impl FnMut(&TxHash, &Arc<WrappedTransaction>)) {
        self.tx_by_sender.for_each_sender(|_, list| {
            for tx in list.get_txs() {
                function(&tx.tx_hash, &tx);
            }
        });
    }

    pub fn clear(&self) {
        let _eviction_guard = self.eviction_mutex.lock().unwrap();
        self.tx_by_sender.clear();
        self.tx_by_hash.clear();
        self.refresh_gauges();
    }

    pub(crate) fn get_senders(&self) -> Vec<Arc<SenderTxList>> {
        self.tx_by_sender.get_snapshot_descending()
    }

    pub(crate) fn host(&self) -> &dyn MempoolHost {
        self.host.as_ref()
    }

    pub(crate) fn is_capacity_exceeded(&self) -> bool {
        let too_many_txs = self.tx_by_hash.count() > self.config.count_threshold as u64;
        let too_many_bytes = self.tx_by_hash.num_bytes() > self.config.num_bytes_threshold as i64;
        too_many_txs || too_many_bytes
    }

    pub(crate) fn refresh_gauges(&self) {
        metrics::TXCACHE_SIZE_BYTES.set(self.num_bytes() as f64);
        metrics::TXCACHE_TRANSACTIONS.set(self.len() as f64);
        metrics::TXCACHE_SENDERS.set(self.count_senders() as f64);
    }
}
