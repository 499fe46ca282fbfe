//! Block-proposal selection.
//!
//! Selection takes a snapshot of the sender lists, turns each into a "bunch"
//! (a read-only, nonce-ordered view), and merges the bunches through a
//! max-heap keyed by the current transaction's price per gas unit. Account
//! state is fetched lazily, once per sender and round. The loop stops when
//! the gas budget is reached, the output hits the requested count, or the
//! heap drains.
//!
//! With identical inputs the output is identical: every comparison ends in a
//! strict tie-break (see `WrappedTransaction::priority_ordering`).

use crate::errors::CacheError;
use crate::host::{AccountState, MempoolHost, SelectionSession};
use crate::metrics;
use crate::tx::{Address, WrappedTransaction};
use crate::tx_cache::TxCache;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tracing::{debug, trace};

/// A per-sender, nonce-ordered view of pending transactions.
pub type BunchOfTransactions = Vec<Arc<WrappedTransaction>>;

const INITIAL_CAPACITY_OF_SELECTION_SLICE: usize = 1024;

impl TxCache {
    /// Selects an ordered batch totaling at most `gas_requested` gas and at
    /// most `max_num` transactions, honoring per-sender nonce sequencing and
    /// balances.
    pub fn select_transactions(
        &self,
        session: &dyn SelectionSession,
        gas_requested: u64,
        max_num: usize,
    ) -> Vec<Arc<WrappedTransaction>> {
        debug!(
            name = %self.name,
            num_bytes = self.num_bytes(),
            num_txs = self.len(),
            num_senders = self.count_senders(),
            "selection started"
        );

        let senders = self.get_senders();
        let bunches: Vec<BunchOfTransactions> =
            senders.iter().map(|sender| sender.get_txs()).collect();

        let (selected, accumulated_gas) = select_transactions_from_bunches(
            session,
            self.host(),
            bunches,
            gas_requested,
            max_num,
        );

        metrics::TXCACHE_SELECTIONS.inc();
        debug!(
            name = %self.name,
            num_selected = selected.len(),
            accumulated_gas,
            "selection ended"
        );
        selected
    }
}

/// The heap-driven merge, detached from the cache so it can be exercised on
/// raw bunches.
pub fn select_transactions_from_bunches(
    session: &dyn SelectionSession,
    host: &dyn MempoolHost,
    bunches: Vec<BunchOfTransactions>,
    gas_requested: u64,
    max_num: usize,
) -> (BunchOfTransactions, u64) {
    let mut selected: BunchOfTransactions =
        Vec::with_capacity(INITIAL_CAPACITY_OF_SELECTION_SLICE.min(max_num));

    let mut heap: BinaryHeap<TransactionsHeapItem> = BinaryHeap::with_capacity(bunches.len());
    for bunch in bunches {
        if let Ok(item) = TransactionsHeapItem::new(bunch) {
            heap.push(item);
        }
    }

    let mut accumulated_gas = 0u64;

    while let Some(mut item) = heap.pop() {
        let gas_limit = item.current_transaction().tx.gas_limit;
        if accumulated_gas.saturating_add(gas_limit) > gas_requested {
            break;
        }
        if selected.len() >= max_num {
            break;
        }

        if !item.request_account_state_if_necessary(session) {
            // Session failure: this sender sits out the round.
            continue;
        }

        let is_initial_gap = item.detect_initial_gap();
        let is_middle_gap = item.detect_middle_gap();
        let will_exceed_balance = item.detect_will_exceed_balance(host);
        let is_lower_nonce = item.detect_lower_nonce();
        let is_badly_guarded = item.detect_badly_guarded(session);
        let is_nonce_duplicate = item.detect_nonce_duplicate();

        let should_skip_sender = is_initial_gap || is_middle_gap || will_exceed_balance;
        if should_skip_sender {
            continue;
        }

        let should_skip_transaction = is_lower_nonce || is_badly_guarded || is_nonce_duplicate;
        if !should_skip_transaction {
            accumulated_gas += gas_limit;
            selected.push(item.select_current_transaction());
        }

        if item.goto_next_transaction() {
            heap.push(item);
        }
    }

    (selected, accumulated_gas)
}

/// One sender's cursor over its bunch, plus the lazily-fetched account state
/// and the running fee total of its already-selected transactions.
struct TransactionsHeapItem {
    sender: Address,
    bunch: BunchOfTransactions,

    sender_state_requested: bool,
    sender_state: Option<AccountState>,

    current_transaction_index: usize,
    latest_selected_nonce: Option<u64>,

    accumulated_fee: u128,
}

impl TransactionsHeapItem {
    fn new(bunch: BunchOfTransactions) -> Result<Self, CacheError> {
        let first = bunch.first().ok_or(CacheError::EmptyBunchOfTransactions)?;
        let sender = first.tx.sender.clone();

        Ok(Self {
            sender,
            bunch,
            sender_state_requested: false,
            sender_state: None,
            current_transaction_index: 0,
            latest_selected_nonce: None,
            accumulated_fee: 0,
        })
    }

    fn current_transaction(&self) -> &Arc<WrappedTransaction> {
        &self.bunch[self.current_transaction_index]
    }

    fn select_current_transaction(&mut self) -> Arc<WrappedTransaction> {
        let current = Arc::clone(self.current_transaction());
        self.accumulated_fee += current.fee;
        self.latest_selected_nonce = Some(current.tx.nonce);
        current
    }

    fn goto_next_transaction(&mut self) -> bool {
        if self.current_transaction_index + 1 >= self.bunch.len() {
            return false;
        }
        self.current_transaction_index += 1;
        true
    }

    /// Returns whether account state is available for the detectors.
    fn request_account_state_if_necessary(&mut self, session: &dyn SelectionSession) -> bool {
        if !self.sender_state_requested {
            self.sender_state_requested = true;
            match session.get_account_state(&self.sender) {
                Ok(state) => self.sender_state = Some(state),
                Err(err) => {
                    debug!(
                        sender = %hex::encode(&self.sender),
                        %err,
                        "account state unavailable; sender skipped"
                    );
                }
            }
        }
        self.sender_state.is_some()
    }

    fn detect_initial_gap(&self) -> bool {
        if self.latest_selected_nonce.is_some() {
            return false;
        }
        let Some(state) = &self.sender_state else {
            return false;
        };

        let has_initial_gap = self.current_transaction().tx.nonce > state.nonce;
        if has_initial_gap {
            trace!(
                tx = %hex::encode(&self.current_transaction().tx_hash),
                nonce = self.current_transaction().tx.nonce,
                sender = %hex::encode(&self.sender),
                account_nonce = state.nonce,
                "initial nonce gap"
            );
        }
        has_initial_gap
    }

    fn detect_middle_gap(&self) -> bool {
        let Some(latest_nonce) = self.latest_selected_nonce else {
            return false;
        };

        let has_middle_gap = self.current_transaction().tx.nonce > latest_nonce + 1;
        if has_middle_gap {
            trace!(
                tx = %hex::encode(&self.current_transaction().tx_hash),
                nonce = self.current_transaction().tx.nonce,
                sender = %hex::encode(&self.sender),
                previous_selected_nonce = latest_nonce,
                "middle nonce gap"
            );
        }
        has_middle_gap
    }

    fn detect_lower_nonce(&self) -> bool {
        let Some(state) = &self.sender_state else {
            return false;
        };

        let is_lower = self.current_transaction().tx.nonce < state.nonce;
        if is_lower {
            trace!(
                tx = %hex::encode(&self.current_transaction().tx_hash),
                nonce = self.current_transaction().tx.nonce,
                account_nonce = state.nonce,
                "nonce already consumed on chain"
            );
        }
        is_lower
    }

    fn detect_nonce_duplicate(&self) -> bool {
        let Some(latest_nonce) = self.latest_selected_nonce else {
            return false;
        };
        self.current_transaction().tx.nonce == latest_nonce
    }

    fn detect_badly_guarded(&self, session: &dyn SelectionSession) -> bool {
        let Some(state) = &self.sender_state else {
            return false;
        };

        let current = self.current_transaction();
        let guardian_mismatch = current.tx.guardian != state.guardian;
        let is_badly_guarded = guardian_mismatch || session.is_incorrectly_guarded(&current.tx);
        if is_badly_guarded {
            trace!(
                tx = %hex::encode(&current.tx_hash),
                sender = %hex::encode(&self.sender),
                "badly guarded transaction"
            );
        }
        is_badly_guarded
    }

    fn detect_will_exceed_balance(&self, host: &dyn MempoolHost) -> bool {
        let Some(state) = &self.sender_state else {
            return false;
        };

        let current = self.current_transaction();
        let transferred_value = host.get_transferred_value(&current.tx);
        let future_spent = self
            .accumulated_fee
            .saturating_add(current.fee)
            .saturating_add(transferred_value);

        let will_exceed = future_spent > state.balance;
        if will_exceed {
            trace!(
                tx = %hex::encode(&current.tx_hash),
                sender = %hex::encode(&self.sender),
                balance = state.balance,
                accumulated_fee = self.accumulated_fee,
                "balance exhausted"
            );
        }
        will_exceed
    }
}

impl PartialEq for TransactionsHeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TransactionsHeapItem {}

impl PartialOrd for TransactionsHeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TransactionsHeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.current_transaction()
            .priority_ordering(other.current_transaction())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MempoolHostMock, SelectionSessionMock};
    use crate::tx::Transaction;

    fn wrapped(sender: &[u8], hash: &[u8], nonce: u64, gas_price: u64) -> Arc<WrappedTransaction> {
        wrapped_with_value(sender, hash, nonce, gas_price, 0)
    }

    fn wrapped_with_value(
        sender: &[u8],
        hash: &[u8],
        nonce: u64,
        gas_price: u64,
        value: u128,
    ) -> Arc<WrappedTransaction> {
        let tx = Transaction {
            sender: sender.to_vec(),
            receiver: b"receiver".to_vec(),
            nonce,
            gas_limit: 50_000,
            gas_price,
            data: Vec::new(),
            value,
            guardian: None,
        };
        Arc::new(WrappedTransaction::new(
            tx,
            hash.to_vec(),
            128,
            &MempoolHostMock::new(),
        ))
    }

    fn select(
        session: &SelectionSessionMock,
        bunches: Vec<BunchOfTransactions>,
    ) -> BunchOfTransactions {
        let host = MempoolHostMock::new();
        let (selected, _) =
            select_transactions_from_bunches(session, &host, bunches, 10_000_000_000, 10_000);
        selected
    }

    #[test]
    fn empty_bunch_is_rejected() {
        assert!(matches!(
            TransactionsHeapItem::new(Vec::new()),
            Err(CacheError::EmptyBunchOfTransactions)
        ));
    }

    #[test]
    fn higher_paying_sender_goes_first() {
        let session = SelectionSessionMock::new();
        session.set_nonce(b"alice", 1);
        session.set_nonce(b"bob", 1);

        let bunches = vec![
            vec![wrapped(b"alice", b"hash-alice-1", 1, 1_000_000_000)],
            vec![wrapped(b"bob", b"hash-bob-1", 1, 2_000_000_000)],
        ];

        let selected = select(&session, bunches);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].tx_hash, b"hash-bob-1".to_vec());
        assert_eq!(selected[1].tx_hash, b"hash-alice-1".to_vec());
    }

    #[test]
    fn middle_gap_stops_the_sender() {
        let session = SelectionSessionMock::new();
        session.set_nonce(b"alice", 7);

        let bunches = vec![vec![
            wrapped(b"alice", b"hash-7", 7, 1_000_000_000),
            wrapped(b"alice", b"hash-9", 9, 1_000_000_000),
        ]];

        let selected = select(&session, bunches);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].tx.nonce, 7);
    }

    #[test]
    fn initial_gap_skips_the_sender_entirely() {
        let session = SelectionSessionMock::new();
        session.set_nonce(b"alice", 5);

        let bunches = vec![vec![wrapped(b"alice", b"hash-7", 7, 1_000_000_000)]];
        let selected = select(&session, bunches);
        assert!(selected.is_empty());
    }

    #[test]
    fn lower_nonces_are_skipped_not_fatal() {
        let session = SelectionSessionMock::new();
        session.set_nonce(b"alice", 3);

        let bunches = vec![vec![
            wrapped(b"alice", b"hash-1", 1, 1_000_000_000),
            wrapped(b"alice", b"hash-2", 2, 1_000_000_000),
            wrapped(b"alice", b"hash-3", 3, 1_000_000_000),
            wrapped(b"alice", b"hash-4", 4, 1_000_000_000),
        ]];

        let selected = select(&session, bunches);
        let nonces: Vec<u64> = selected.iter().map(|tx| tx.tx.nonce).collect();
        assert_eq!(nonces, vec![3, 4]);
    }

    #[test]
    fn nonce_duplicates_yield_a_single_winner() {
        let session = SelectionSessionMock::new();
        session.set_nonce(b"alice", 1);

        // Same nonce twice; the higher gas price sits first in the bunch.
        let bunches = vec![vec![
            wrapped(b"alice", b"hash-generous", 1, 2_000_000_000),
            wrapped(b"alice", b"hash-cheap", 1, 1_000_000_000),
            wrapped(b"alice", b"hash-2", 2, 1_000_000_000),
        ]];

        let selected = select(&session, bunches);
        let hashes: Vec<Vec<u8>> = selected.iter().map(|tx| tx.tx_hash.clone()).collect();
        assert_eq!(
            hashes,
            vec![b"hash-generous".to_vec(), b"hash-2".to_vec()]
        );
    }

    #[test]
    fn balance_clamps_the_sender() {
        let session = SelectionSessionMock::new();
        session.set_nonce(b"alice", 1);

        let tx1 = wrapped(b"alice", b"hash-1", 1, 1_000_000_000);
        let tx2 = wrapped(b"alice", b"hash-2", 2, 1_000_000_000);
        session.set_balance(b"alice", tx1.fee + tx2.fee - 1);

        let bunches = vec![vec![tx1, tx2]];
        let selected = select(&session, bunches);
        let nonces: Vec<u64> = selected.iter().map(|tx| tx.tx.nonce).collect();
        assert_eq!(nonces, vec![1]);
    }

    #[test]
    fn transferred_value_counts_against_the_balance() {
        let session = SelectionSessionMock::new();
        session.set_nonce(b"alice", 1);

        let tx = wrapped_with_value(b"alice", b"hash-1", 1, 1_000_000_000, 1_000);
        session.set_balance(b"alice", tx.fee + 999);

        let bunches = vec![vec![tx]];
        let selected = select(&session, bunches);
        assert!(selected.is_empty());
    }

    #[test]
    fn guardian_mismatch_skips_the_transaction() {
        let session = SelectionSessionMock::new();
        session.set_nonce(b"alice", 1);
        session.set_guardian(b"alice", Some(b"guardian-good".to_vec()));

        let mut guarded = Transaction {
            sender: b"alice".to_vec(),
            receiver: b"receiver".to_vec(),
            nonce: 1,
            gas_limit: 50_000,
            gas_price: 1_000_000_000,
            data: Vec::new(),
            value: 0,
            guardian: Some(b"guardian-rogue".to_vec()),
        };
        let badly_guarded = Arc::new(WrappedTransaction::new(
            guarded.clone(),
            b"hash-bad".to_vec(),
            128,
            &MempoolHostMock::new(),
        ));
        guarded.guardian = Some(b"guardian-good".to_vec());
        let well_guarded = Arc::new(WrappedTransaction::new(
            guarded,
            b"hash-good".to_vec(),
            128,
            &MempoolHostMock::new(),
        ));

        let bunches = vec![vec![badly_guarded, well_guarded]];
        let selected = select(&session, bunches);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].tx_hash, b"hash-good".to_vec());
    }

    #[test]
    fn session_failure_skips_only_the_affected_sender() {
        let mut session = SelectionSessionMock::new();
        session.get_account_state_called = Some(Box::new(|address| {
            if address == &b"alice".to_vec() {
                Err(crate::host::SessionError::AccountStateUnavailable)
            } else {
                Ok(crate::host::AccountState {
                    nonce: 1,
                    balance: 1_000_000_000_000_000_000,
                    guardian: None,
                })
            }
        }));

        let bunches = vec![
            vec![wrapped(b"alice", b"hash-alice", 1, 2_000_000_000)],
            vec![wrapped(b"bob", b"hash-bob", 1, 1_000_000_000)],
        ];

        let selected = select(&session, bunches);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].tx_hash, b"hash-bob".to_vec());
    }

    #[test]
    fn gas_budget_bounds_the_output() {
        let session = SelectionSessionMock::new();
        session.set_nonce(b"alice", 1);

        let bunch: BunchOfTransactions = (1..=10u64)
            .map(|nonce| {
                wrapped(
                    b"alice",
                    format!("hash-{nonce}").as_bytes(),
                    nonce,
                    1_000_000_000,
                )
            })
            .collect();

        let host = MempoolHostMock::new();
        // Each transaction asks for 50_000 gas: a budget of 175_000 fits 3.
        let (selected, accumulated_gas) =
            select_transactions_from_bunches(&session, &host, vec![bunch], 175_000, 10_000);
        assert_eq!(selected.len(), 3);
        assert_eq!(accumulated_gas, 150_000);
    }

    #[test]
    fn max_num_bounds_the_output() {
        let session = SelectionSessionMock::new();
        session.set_nonce(b"alice", 1);

        let bunch: BunchOfTransactions = (1..=10u64)
            .map(|nonce| {
                wrapped(
                    b"alice",
                    format!("hash-{nonce}").as_bytes(),
                    nonce,
                    1_000_000_000,
                )
            })
            .collect();

        let host = MempoolHostMock::new();
        let (selected, _) =
            select_transactions_from_bunches(&session, &host, vec![bunch], u64::MAX, 4);
        assert_eq!(selected.len(), 4);
    }

    #[test]
    fn selection_is_deterministic() {
        let build_bunches = || {
            vec![
                vec![
                    wrapped(b"alice", b"hash-a1", 1, 1_000_000_000),
                    wrapped(b"alice", b"hash-a2", 2, 1_000_000_000),
                ],
                vec![
                    wrapped(b"bob", b"hash-b1", 1, 1_000_000_000),
                    wrapped(b"bob", b"hash-b2", 2, 3_000_000_000),
                ],
                vec![wrapped(b"carol", b"hash-c1", 1, 2_000_000_000)],
            ]
        };

        let session = SelectionSessionMock::new();
        for sender in [b"alice".as_slice(), b"bob", b"carol"] {
            session.set_nonce(sender, 1);
        }

        let first = select(&session, build_bunches());
        let second = select(&session, build_bunches());

        let first_hashes: Vec<Vec<u8>> = first.iter().map(|tx| tx.tx_hash.clone()).collect();
        let second_hashes: Vec<Vec<u8>> = second.iter().map(|tx| tx.tx_hash.clone()).collect();
        assert_eq!(first_hashes, second_hashes);
        assert_eq!(first.len(), 5);
    }
}
