//! Per-sender transaction list.
//!
//! Transactions of one sender are kept in a sorted vector, ordered by nonce
//! ascending, then gas price descending, then hash. The list carries the
//! sender's aggregates (total bytes, fee numerator, gas denominator), a
//! nonce tracker able to answer "is this one contiguous run" in O(1), and a
//! cached score.
//!
//! A list is a critical section: all mutating operations take its lock.
//! The score, total bytes and account nonce are additionally mirrored in
//! atomics so outside observers can read them without locking.

use crate::config::SenderConstraints;
use crate::errors::CacheError;
use crate::score::{ScoreComputer, SenderScoreParams};
use crate::tx::{Address, TxHash, WrappedTransaction};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};

/// Outcome of one `select_batch` call.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchSelectionJournal {
    pub selected_num: usize,
    pub selected_gas: u64,
    pub has_initial_gap: bool,
    pub has_middle_gap: bool,
}

pub struct SenderTxList {
    sender: Address,
    /// Monotonic number assigned at creation; older senders have lower ones.
    order_number: u64,
    constraints: SenderConstraints,
    score_computer: Arc<ScoreComputer>,

    inner: RwLock<ListInner>,

    total_bytes: AtomicI64,
    score: AtomicU32,
    account_nonce: AtomicU64,
    account_nonce_known: AtomicBool,
}

struct ListInner {
    items: Vec<Arc<WrappedTransaction>>,
    avg_ppu_numerator: f64,
    avg_ppu_denominator: u64,
    nonces: NoncesTracker,

    // Resumable batch-selection state.
    selection_index: usize,
    selection_previous_nonce: u64,
    selection_detected_gap: bool,
}

impl SenderTxList {
    pub fn new(
        sender: Address,
        order_number: u64,
        constraints: SenderConstraints,
        score_computer: Arc<ScoreComputer>,
    ) -> Self {
        Self {
            sender,
            order_number,
            constraints,
            score_computer,
            inner: RwLock::new(ListInner {
                items: Vec::new(),
                avg_ppu_numerator: 0.0,
                avg_ppu_denominator: 0,
                nonces: NoncesTracker::new(),
                selection_index: 0,
                selection_previous_nonce: 0,
                selection_detected_gap: false,
            }),
            total_bytes: AtomicI64::new(0),
            score: AtomicU32::new(0),
            account_nonce: AtomicU64::new(0),
            account_nonce_known: AtomicBool::new(false),
        }
    }

    pub fn sender(&self) -> &Address {
        &self.sender
    }

    pub fn order_number(&self) -> u64 {
        self.order_number
    }

    /// Sorted insert. Returns `(added, evicted_hashes)`; `added` is false for
    /// a hash already present. Eviction happens when the insert pushes the
    /// list over its per-sender capacity: highest nonces go first.
    pub fn add_tx(&self, tx: Arc<WrappedTransaction>) -> (bool, Vec<TxHash>) {
        let mut inner = self.inner.write().unwrap();

        let Ok(position) = find_insertion_place(&inner.items, &tx) else {
            return (false, Vec::new());
        };

        inner.items.insert(position, Arc::clone(&tx));
        self.on_added_transaction(&mut inner, &tx);

        let evicted = self.apply_size_constraints(&mut inner);
        self.recompute_score(&inner);
        (true, evicted)
    }

    /// Removes the first entry matching the transaction's hash.
    pub fn remove_tx(&self, tx: &WrappedTransaction) -> bool {
        let mut inner = self.inner.write().unwrap();

        let position = inner
            .items
            .binary_search_by(|probe| insertion_ordering(probe, tx));
        match position {
            Ok(position) => {
                let removed = inner.items.remove(position);
                self.on_removed_transaction(&mut inner, &removed);
                self.recompute_score(&inner);
                true
            }
            Err(_) => false,
        }
    }

    /// Trims up to `count` entries from the high-nonce end.
    pub fn remove_high_nonce_txs(&self, count: u32) -> Vec<TxHash> {
        let mut inner = self.inner.write().unwrap();
        let mut evicted = Vec::new();

        for _ in 0..count {
            let Some(removed) = inner.items.pop() else {
                break;
            };
            self.on_removed_transaction(&mut inner, &removed);
            evicted.push(removed.tx_hash.clone());
        }

        self.recompute_score(&inner);
        evicted
    }

    /// Records the on-chain account nonce and evicts entries below it.
    pub fn notify_account_nonce(&self, nonce: u64) -> Vec<TxHash> {
        // If the nonce did not move, there is nothing to evict.
        if self.account_nonce_known.load(AtomicOrdering::Relaxed)
            && self.account_nonce.load(AtomicOrdering::Relaxed) == nonce
        {
            return Vec::new();
        }

        let mut inner = self.inner.write().unwrap();
        self.account_nonce.store(nonce, AtomicOrdering::Relaxed);
        self.account_nonce_known.store(true, AtomicOrdering::Relaxed);

        let evicted = self.evict_transactions_with_lower_nonces(&mut inner, nonce);
        self.recompute_score(&inner);
        evicted
    }

    fn evict_transactions_with_lower_nonces(
        &self,
        inner: &mut ListInner,
        account_nonce: u64,
    ) -> Vec<TxHash> {
        let mut num_to_evict = 0;
        for item in inner.items.iter() {
            if item.tx.nonce >= account_nonce {
                break;
            }
            num_to_evict += 1;
        }

        let removed_items: Vec<_> = inner.items.drain(..num_to_evict).collect();
        let mut evicted = Vec::with_capacity(removed_items.len());
        for removed in removed_items {
            evicted.push(removed.tx_hash.clone());
            self.on_removed_transaction(inner, &removed);
        }
        evicted
    }

    /// Copies the next batch of nonce-contiguous transactions into
    /// `destination`. State (position, previous nonce, detected gap) is kept
    /// across calls and reset when `is_first_batch` is set.
    pub fn select_batch(
        &self,
        is_first_batch: bool,
        destination: &mut Vec<Arc<WrappedTransaction>>,
        num_per_batch: usize,
        gas_per_batch: u64,
    ) -> BatchSelectionJournal {
        let mut inner = self.inner.write().unwrap();
        let mut journal = BatchSelectionJournal::default();

        if is_first_batch {
            let has_initial_gap = self.has_initial_gap_locked(&inner);
            inner.selection_previous_nonce = 0;
            inner.selection_index = 0;
            inner.selection_detected_gap = has_initial_gap;
            journal.has_initial_gap = has_initial_gap;
        }

        // Once a gap was detected, this sender yields nothing for the round.
        if inner.selection_detected_gap {
            return journal;
        }

        let mut selected_gas = 0u64;
        let mut selected_num = 0usize;

        while inner.selection_index < inner.items.len() {
            if selected_num == num_per_batch {
                break;
            }
            if selected_gas >= gas_per_batch {
                break;
            }

            let tx = Arc::clone(&inner.items[inner.selection_index]);
            let nonce = tx.tx.nonce;

            let is_middle_gap =
                inner.selection_previous_nonce > 0 && nonce > inner.selection_previous_nonce + 1;
            if is_middle_gap {
                inner.selection_detected_gap = true;
                journal.has_middle_gap = true;
                break;
            }

            selected_gas += tx.tx.gas_limit;
            selected_num += 1;
            inner.selection_previous_nonce = nonce;
            inner.selection_index += 1;
            destination.push(tx);
        }

        journal.selected_num = selected_num;
        journal.selected_gas = selected_gas;
        journal
    }

    /// Read-only, nonce-ordered view of the pending transactions.
    pub fn get_txs(&self) -> Vec<Arc<WrappedTransaction>> {
        let inner = self.inner.read().unwrap();
        inner.items.clone()
    }

    pub fn get_tx_hashes(&self) -> Vec<TxHash> {
        let inner = self.inner.read().unwrap();
        inner.items.iter().map(|tx| tx.tx_hash.clone()).collect()
    }

    pub fn get_lowest_nonce_tx(&self) -> Option<Arc<WrappedTransaction>> {
        let inner = self.inner.read().unwrap();
        inner.items.first().cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.count_with_lock() == 0
    }

    pub fn has_more_than(&self, count: u64) -> bool {
        self.count_with_lock() > count
    }

    pub fn count_with_lock(&self) -> u64 {
        let inner = self.inner.read().unwrap();
        inner.items.len() as u64
    }

    pub fn total_bytes(&self) -> i64 {
        self.total_bytes.load(AtomicOrdering::Relaxed)
    }

    pub fn get_score(&self) -> u32 {
        self.score.load(AtomicOrdering::Relaxed)
    }

    pub fn account_nonce(&self) -> Option<u64> {
        if self.account_nonce_known.load(AtomicOrdering::Relaxed) {
            Some(self.account_nonce.load(AtomicOrdering::Relaxed))
        } else {
            None
        }
    }

    /// True iff the account nonce is known and the first pending transaction
    /// sits above it.
    pub fn has_initial_gap(&self) -> bool {
        let inner = self.inner.read().unwrap();
        self.has_initial_gap_locked(&inner)
    }

    fn has_initial_gap_locked(&self, inner: &ListInner) -> bool {
        if !self.account_nonce_known.load(AtomicOrdering::Relaxed) {
            return false;
        }
        let Some(first) = inner.items.first() else {
            return false;
        };
        first.tx.nonce > self.account_nonce.load(AtomicOrdering::Relaxed)
    }

    fn apply_size_constraints(&self, inner: &mut ListInner) -> Vec<TxHash> {
        let mut evicted = Vec::new();

        // Evict from the tail (highest nonces) until within bounds.
        while self.is_capacity_exceeded(inner) {
            let Some(removed) = inner.items.pop() else {
                break;
            };
            self.on_removed_transaction(inner, &removed);
            evicted.push(removed.tx_hash.clone());
        }

        evicted
    }

    fn is_capacity_exceeded(&self, inner: &ListInner) -> bool {
        let too_many_bytes =
            self.total_bytes.load(AtomicOrdering::Relaxed) > self.constraints.max_num_bytes as i64;
        let too_many_txs = inner.items.len() as u64 > self.constraints.max_num_txs as u64;
        too_many_bytes || too_many_txs
    }

    fn on_added_transaction(&self, inner: &mut ListInner, tx: &WrappedTransaction) {
        self.total_bytes
            .fetch_add(tx.size_in_bytes, AtomicOrdering::Relaxed);
        inner.avg_ppu_numerator += tx.fee as f64;
        inner.avg_ppu_denominator += tx.tx.gas_limit;
        inner.nonces.add_nonce(tx.tx.nonce);
    }

    fn on_removed_transaction(&self, inner: &mut ListInner, tx: &WrappedTransaction) {
        self.total_bytes
            .fetch_sub(tx.size_in_bytes, AtomicOrdering::Relaxed);
        inner.avg_ppu_numerator -= tx.fee as f64;
        inner.avg_ppu_denominator = inner.avg_ppu_denominator.saturating_sub(tx.tx.gas_limit);
        inner.nonces.remove_nonce(tx.tx.nonce);
    }

    fn recompute_score(&self, inner: &ListInner) {
        let params = self.get_score_params(inner);
        let score = self.score_computer.compute_score(&params);
        self.score.store(score, AtomicOrdering::Relaxed);
    }

    fn get_score_params(&self, inner: &ListInner) -> SenderScoreParams {
        let count = inner.items.len() as u64;
        let min_transaction_nonce = inner.items.first().map(|tx| tx.tx.nonce).unwrap_or(0);

        let mut spotless = inner.nonces.is_spotless_sequence(min_transaction_nonce, count);
        if spotless && self.account_nonce_known.load(AtomicOrdering::Relaxed) && count > 0 {
            spotless = min_transaction_nonce == self.account_nonce.load(AtomicOrdering::Relaxed);
        }

        SenderScoreParams {
            avg_ppu_numerator: inner.avg_ppu_numerator,
            avg_ppu_denominator: inner.avg_ppu_denominator,
            count,
            total_bytes: self.total_bytes.load(AtomicOrdering::Relaxed).max(0) as u64,
            has_spotless_sequence_of_nonces: spotless,
        }
    }
}

/// Position for a sorted insert; an exact key match means the very same
/// transaction (hashes are unique) and is rejected.
fn find_insertion_place(
    items: &[Arc<WrappedTransaction>],
    incoming: &WrappedTransaction,
) -> Result<usize, CacheError> {
    match items.binary_search_by(|probe| insertion_ordering(probe, incoming)) {
        Ok(_) => Err(CacheError::AlreadyInCache),
        Err(position) => Ok(position),
    }
}

fn insertion_ordering(probe: &WrappedTransaction, incoming: &WrappedTransaction) -> Ordering {
    probe
        .tx
        .nonce
        .cmp(&incoming.tx.nonce)
        .then_with(|| incoming.tx.gas_price.cmp(&probe.tx.gas_price))
        .then_with(|| probe.tx_hash.cmp(&incoming.tx_hash))
}

/// Tracks the multiset of contained nonces through one wrapping running sum.
/// A set of `count` nonces starting at `first` is one contiguous run iff its
/// sum equals the arithmetic series; accidental collisions are possible but
/// vanishingly rare in practice.
struct NoncesTracker {
    sum_of_nonces: u64,
}

impl NoncesTracker {
    fn new() -> Self {
        Self { sum_of_nonces: 0 }
    }

    fn add_nonce(&mut self, nonce: u64) {
        self.sum_of_nonces = self.sum_of_nonces.wrapping_add(nonce);
    }

    fn remove_nonce(&mut self, nonce: u64) {
        self.sum_of_nonces = self.sum_of_nonces.wrapping_sub(nonce);
    }

    fn is_spotless_sequence(&self, first_nonce: u64, count: u64) -> bool {
        if count == 0 {
            return true;
        }

        let series_sum = first_nonce
            .wrapping_mul(count)
            .wrapping_add(count.wrapping_mul(count - 1) / 2);
        self.sum_of_nonces == series_sum
    }
}
