//! Cache self-inspection.
//!
//! Counter estimates (atomics) can drift from the chunk-level truth while
//! mutations are in flight; the consistency journal compares the two and
//! logs the verdict instead of panicking. The heavier dumps (senders
//! summary, transaction listing) only run when trace logging is enabled.

use crate::tx::WrappedTransaction;
use crate::tx_cache::TxCache;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, enabled, trace, Level};

const MAX_TRANSACTIONS_TO_DISPLAY: usize = 1000;

#[derive(Debug, Serialize)]
struct PrintedTransaction {
    hash: String,
    ppu: u64,
    nonce: u64,
    sender: String,
    receiver: String,
    gas_price: u64,
    gas_limit: u64,
    data_length: usize,
}

impl PrintedTransaction {
    fn from_wrapped(wrapped: &WrappedTransaction) -> Self {
        Self {
            hash: hex::encode(&wrapped.tx_hash),
            ppu: wrapped.ppu_quotient,
            nonce: wrapped.tx.nonce,
            sender: hex::encode(&wrapped.tx.sender),
            receiver: hex::encode(&wrapped.tx.receiver),
            gas_price: wrapped.tx.gas_price,
            gas_limit: wrapped.tx.gas_limit,
            data_length: wrapped.tx.data.len(),
        }
    }
}

/// Estimated counters compared against the chunk-level truth.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsistencyJournal {
    pub num_txs_estimate: u64,
    pub num_txs_in_chunks: u64,
    pub num_senders_estimate: u64,
    pub num_senders_in_map: u64,
}

impl ConsistencyJournal {
    pub fn is_fine(&self) -> bool {
        self.num_txs_estimate == self.num_txs_in_chunks
            && self.num_senders_estimate == self.num_senders_in_map
    }
}

impl TxCache {
    /// Checks the cache state for inconsistencies and logs a summary; with
    /// trace logging enabled, also dumps senders and transactions.
    pub fn diagnose(&self) -> ConsistencyJournal {
        let journal = self.diagnose_counters();
        self.display_senders_summary();
        self.diagnose_transactions();
        journal
    }

    fn diagnose_counters(&self) -> ConsistencyJournal {
        let journal = ConsistencyJournal {
            num_txs_estimate: self.len(),
            num_txs_in_chunks: self.tx_by_hash.count_in_chunks(),
            num_senders_estimate: self.count_senders(),
            num_senders_in_map: self.tx_by_sender.count_senders_in_map(),
        };

        debug!(
            name = %self.name,
            fine = journal.is_fine(),
            num_txs_estimate = journal.num_txs_estimate,
            num_txs_in_chunks = journal.num_txs_in_chunks,
            num_senders_estimate = journal.num_senders_estimate,
            num_senders_in_map = journal.num_senders_in_map,
            num_bytes = self.num_bytes(),
            num_bytes_threshold = self.config.num_bytes_threshold,
            "diagnose counters"
        );
        journal
    }

    fn display_senders_summary(&self) {
        if !enabled!(Level::TRACE) {
            return;
        }

        let senders = self.tx_by_sender.get_snapshot_descending();
        for (index, sender) in senders.iter().enumerate() {
            let lowest_nonce = sender
                .get_lowest_nonce_tx()
                .map(|tx| tx.tx.nonce as i64)
                .unwrap_or(-1);

            trace!(
                index,
                score = sender.get_score(),
                address = %hex::encode(sender.sender()),
                account_nonce = ?sender.account_nonce(),
                lowest_tx_nonce = lowest_nonce,
                num_txs = sender.count_with_lock(),
                total_bytes = sender.total_bytes(),
                "sender summary"
            );
        }
    }

    fn diagnose_transactions(&self) {
        if !enabled!(Level::TRACE) {
            return;
        }

        let transactions = self.tx_by_hash.values();
        if transactions.is_empty() {
            return;
        }

        let num_to_display = transactions.len().min(MAX_TRANSACTIONS_TO_DISPLAY);
        trace!(
            num_transactions = transactions.len(),
            num_to_display,
            "diagnose transactions"
        );
        trace!(
            "{}",
            marshal_transactions_to_newline_delimited_json(&transactions[..num_to_display])
        );
    }
}

/// Newline-delimited JSON, one indexed line per transaction.
fn marshal_transactions_to_newline_delimited_json(transactions: &[Arc<WrappedTransaction>]) -> String {
    let mut builder = String::from("\n");

    for (index, wrapped) in transactions.iter().enumerate() {
        let printed = PrintedTransaction::from_wrapped(wrapped);
        let line = serde_json::to_string(&printed).unwrap_or_default();
        builder.push_str(&format!("#{index}: {line}\n"));
    }

    builder
}
