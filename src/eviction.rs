//! Multi-pass eviction.
//!
//! Triggered by ingestion when the cache exceeds its global count or byte
//! thresholds. All passes run under one eviction mutex, so evictions never
//! overlap; each pass re-checks the thresholds and short-circuits once the
//! cache is back within bounds.
//!
//! Pass 1 drops the oldest senders outright (only when there are more
//! senders than the count threshold). Pass 2 trims the high-nonce tail of
//! senders holding a lot of transactions. Pass 3 repeatedly drops batches of
//! the oldest remaining senders until the cache fits, a fixed point is
//! reached, or too few senders remain.

use crate::sender_list::SenderTxList;
use crate::tx::{Address, TxHash};
use crate::tx_cache::TxCache;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct EvictionJournal {
    pub pass_one_num_txs: u32,
    pub pass_one_num_senders: u32,
    pub pass_two_num_txs: u32,
    pub pass_two_num_senders: u32,
    pub pass_three_num_txs: u32,
    pub pass_three_num_senders: u32,
    pub pass_three_num_steps: u32,
    /// Every hash removed during the run, for handler notification.
    pub evicted_hashes: Vec<TxHash>,
}

impl EvictionJournal {
    fn display(&self, cache_name: &str) {
        debug!(
            name = %cache_name,
            pass_one_num_txs = self.pass_one_num_txs,
            pass_one_num_senders = self.pass_one_num_senders,
            pass_two_num_txs = self.pass_two_num_txs,
            pass_two_num_senders = self.pass_two_num_senders,
            pass_three_num_txs = self.pass_three_num_txs,
            pass_three_num_senders = self.pass_three_num_senders,
            pass_three_num_steps = self.pass_three_num_steps,
            "eviction finished"
        );
    }
}

impl TxCache {
    /// Runs the eviction passes. Returns an empty journal when another
    /// eviction brought the cache within bounds in the meantime.
    pub(crate) fn do_eviction(&self) -> EvictionJournal {
        let _guard = self.eviction_mutex.lock().unwrap();

        let mut journal = EvictionJournal::default();
        if !self.is_capacity_exceeded() {
            return journal;
        }

        debug!(
            name = %self.name,
            num_txs = self.len(),
            num_bytes = self.num_bytes(),
            num_senders = self.count_senders(),
            "eviction started"
        );

        if self.are_there_too_many_senders() {
            let (num_txs, num_senders) = self.evict_oldest_senders(&mut journal.evicted_hashes);
            journal.pass_one_num_txs = num_txs;
            journal.pass_one_num_senders = num_senders;
        }

        if self.is_capacity_exceeded() {
            let (num_txs, num_senders) =
                self.evict_high_nonce_transactions(&mut journal.evicted_hashes);
            journal.pass_two_num_txs = num_txs;
            journal.pass_two_num_senders = num_senders;
        }

        if self.is_capacity_exceeded() && !self.are_there_just_a_few_senders() {
            let (num_steps, num_txs, num_senders) =
                self.evict_senders_while_capacity_exceeded(&mut journal.evicted_hashes);
            journal.pass_three_num_steps = num_steps;
            journal.pass_three_num_txs = num_txs;
            journal.pass_three_num_senders = num_senders;
        }

        journal.display(&self.name);
        journal
    }

    fn are_there_too_many_senders(&self) -> bool {
        self.count_senders() > self.config.count_threshold as u64
    }

    fn are_there_just_a_few_senders(&self) -> bool {
        self.count_senders() < self.config.eviction_passes.few_senders_threshold as u64
    }

    /// Pass 1: drop the first batch of oldest senders with everything they hold.
    fn evict_oldest_senders(&self, evicted_hashes: &mut Vec<TxHash>) -> (u32, u32) {
        let lists_ordered = self.tx_by_sender.get_snapshot_by_order_number();
        let slice_end =
            (self.config.eviction_passes.num_oldest_senders_to_evict as usize).min(lists_ordered.len());

        self.evict_senders_and_their_txs(&lists_ordered[..slice_end], evicted_hashes)
    }

    fn evict_senders_and_their_txs(
        &self,
        lists_to_evict: &[Arc<SenderTxList>],
        evicted_hashes: &mut Vec<TxHash>,
    ) -> (u32, u32) {
        let mut senders_to_evict: Vec<Address> = Vec::with_capacity(lists_to_evict.len());
        let mut txs_to_evict: Vec<TxHash> = Vec::new();

        for list in lists_to_evict {
            senders_to_evict.push(list.sender().clone());
            txs_to_evict.extend(list.get_tx_hashes());
        }

        self.do_evict_items(txs_to_evict, &senders_to_evict, evicted_hashes)
    }

    fn do_evict_items(
        &self,
        txs_to_evict: Vec<TxHash>,
        senders_to_evict: &[Address],
        evicted_hashes: &mut Vec<TxHash>,
    ) -> (u32, u32) {
        let num_txs = self.tx_by_hash.remove_bulk(&txs_to_evict);
        let num_senders = self.tx_by_sender.remove_senders_bulk(senders_to_evict);
        evicted_hashes.extend(txs_to_evict);
        (num_txs, num_senders)
    }

    /// Pass 2: trim the high-nonce tail of heavy senders; senders left empty
    /// are removed as well.
    fn evict_high_nonce_transactions(&self, evicted_hashes: &mut Vec<TxHash>) -> (u32, u32) {
        let a_lot = self.config.eviction_passes.a_lot_of_transactions_for_a_sender as u64;
        let num_txs_to_evict = self
            .config
            .eviction_passes
            .num_txs_to_evict_for_a_sender_with_a_lot;

        let mut txs_to_evict: Vec<TxHash> = Vec::new();
        let mut senders_to_evict: Vec<Address> = Vec::new();

        self.tx_by_sender.for_each_sender(|sender, list| {
            if list.has_more_than(a_lot) {
                txs_to_evict.extend(list.remove_high_nonce_txs(num_txs_to_evict));
            }
            if list.is_empty() {
                senders_to_evict.push(sender.clone());
            }
        });

        self.do_evict_items(txs_to_evict, &senders_to_evict, evicted_hashes)
    }

    /// Pass 3: batched eviction of the oldest senders; one batch per step,
    /// until the cache fits or a fixed point is reached.
    fn evict_senders_while_capacity_exceeded(
        &self,
        evicted_hashes: &mut Vec<TxHash>,
    ) -> (u32, u32, u32) {
        let batches_source = self.tx_by_sender.get_snapshot_by_order_number();
        let batch_size = self.config.eviction_passes.num_oldest_senders_to_evict as usize;
        let mut batch_start = 0usize;

        let mut num_steps = 0u32;
        let mut num_txs = 0u32;
        let mut num_senders = 0u32;

        while self.is_capacity_exceeded() {
            num_steps += 1;

            let batch_end = (batch_start + batch_size).min(batches_source.len());
            let batch = &batches_source[batch_start..batch_end];

            let (num_txs_in_step, num_senders_in_step) =
                self.evict_senders_and_their_txs(batch, evicted_hashes);

            num_txs += num_txs_in_step;
            num_senders += num_senders_in_step;
            batch_start += batch_size;

            let should_break = num_txs_in_step == 0 || (num_senders_in_step as usize) < batch_size;
            if should_break {
                break;
            }
        }

        (num_steps, num_txs, num_senders)
    }
}
