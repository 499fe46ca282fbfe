//! Concurrent sender → transaction-list map.
//!
//! Lists are created on first use and garbage-collected when a mutation
//! leaves them empty. Each list receives a monotonic order number at
//! creation; eviction uses it to find the oldest senders.

use crate::config::SenderConstraints;
use crate::score::ScoreComputer;
use crate::sender_list::SenderTxList;
use crate::tx::{Address, TxHash, WrappedTransaction};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

pub struct TxBySenderMap {
    backing_map: DashMap<Address, Arc<SenderTxList>>,
    counter: AtomicI64,
    next_order_number: AtomicU64,
    constraints: SenderConstraints,
    score_computer: Arc<ScoreComputer>,
}

impl TxBySenderMap {
    pub fn new(constraints: SenderConstraints, score_computer: Arc<ScoreComputer>) -> Self {
        Self {
            backing_map: DashMap::new(),
            counter: AtomicI64::new(0),
            next_order_number: AtomicU64::new(0),
            constraints,
            score_computer,
        }
    }

    /// Adds the transaction to its sender's list, creating the list when
    /// needed. Returns `(added, evicted_hashes)`, see `SenderTxList::add_tx`.
    pub fn add_tx(&self, tx: Arc<WrappedTransaction>) -> (bool, Vec<TxHash>) {
        let list = self.get_or_add_list_for_sender(&tx.tx.sender);
        list.add_tx(tx)
    }

    fn get_or_add_list_for_sender(&self, sender: &Address) -> Arc<SenderTxList> {
        if let Some(list) = self.backing_map.get(sender) {
            return Arc::clone(&list);
        }

        let entry = self.backing_map.entry(sender.clone()).or_insert_with(|| {
            let order_number = self.next_order_number.fetch_add(1, Ordering::Relaxed);
            self.counter.fetch_add(1, Ordering::Relaxed);
            Arc::new(SenderTxList::new(
                sender.clone(),
                order_number,
                self.constraints,
                Arc::clone(&self.score_computer),
            ))
        });
        Arc::clone(&entry)
    }

    /// Removes the transaction from its sender's list; garbage-collects the
    /// list if it became empty. Returns whether the transaction was found.
    pub fn remove_tx(&self, tx: &WrappedTransaction) -> bool {
        let Some(list) = self.get_list_for_sender(&tx.tx.sender) else {
            return false;
        };

        let removed = list.remove_tx(tx);
        if removed {
            self.remove_sender_if_empty(&tx.tx.sender);
        }
        removed
    }

    pub fn get_list_for_sender(&self, sender: &Address) -> Option<Arc<SenderTxList>> {
        self.backing_map.get(sender).map(|list| Arc::clone(&list))
    }

    /// Records the account nonce for the sender and evicts transactions with
    /// strictly lower nonces. Returns the evicted hashes.
    pub fn notify_account_nonce(&self, sender: &Address, nonce: u64) -> Vec<TxHash> {
        let Some(list) = self.get_list_for_sender(sender) else {
            return Vec::new();
        };

        let evicted = list.notify_account_nonce(nonce);
        if !evicted.is_empty() {
            self.remove_sender_if_empty(sender);
        }
        evicted
    }

    fn remove_sender_if_empty(&self, sender: &Address) {
        // The check and the removal race benignly with a concurrent add: the
        // removal only proceeds while the list is still empty.
        let removed = self
            .backing_map
            .remove_if(sender, |_, list| list.is_empty());
        if removed.is_some() {
            self.counter.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Removes the given senders with all their transactions; used by the
    /// evictor. Returns how many senders were present.
    pub fn remove_senders_bulk(&self, senders: &[Address]) -> u32 {
        let mut num_removed = 0;
        for sender in senders {
            if self.backing_map.remove(sender).is_some() {
                self.counter.fetch_sub(1, Ordering::Relaxed);
                num_removed += 1;
            }
        }
        num_removed
    }

    /// Sender handles ordered by score ascending; ties broken by sender bytes.
    pub fn get_snapshot_ascending(&self) -> Vec<Arc<SenderTxList>> {
        let mut snapshot = self.collect_lists();
        snapshot.sort_by(|a, b| {
            a.get_score()
                .cmp(&b.get_score())
                .then_with(|| a.sender().cmp(b.sender()))
        });
        snapshot
    }

    /// Sender handles ordered by score descending; ties broken by sender bytes.
    pub fn get_snapshot_descending(&self) -> Vec<Arc<SenderTxList>> {
        let mut snapshot = self.collect_lists();
        snapshot.sort_by(|a, b| {
            b.get_score()
                .cmp(&a.get_score())
                .then_with(|| a.sender().cmp(b.sender()))
        });
        snapshot
    }

    /// Sender handles ordered by age (creation order number), oldest first.
    pub fn get_snapshot_by_order_number(&self) -> Vec<Arc<SenderTxList>> {
        let mut snapshot = self.collect_lists();
        snapshot.sort_by_key(|list| list.order_number());
        snapshot
    }

    fn collect_lists(&self) -> Vec<Arc<SenderTxList>> {
        self.backing_map
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn for_each_sender(&self, mut function: impl FnMut(&Address, &Arc<SenderTxList>)) {
        for entry in self.backing_map.iter() {
            function(entry.key(), entry.value());
        }
    }

    /// Approximate while mutations are in flight.
    pub fn count_senders(&self) -> i64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Exact count, obtained from the backing map (diagnostics only).
    pub fn count_senders_in_map(&self) -> u64 {
        self.backing_map.len() as u64
    }

    pub fn clear(&self) {
        self.backing_map.clear();
        self.counter.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MempoolHostMock;
    use crate::tx::Transaction;

    fn new_map() -> TxBySenderMap {
        let host = MempoolHostMock::new();
        TxBySenderMap::new(
            SenderConstraints {
                max_num_txs: 100,
                max_num_bytes: 1_000_000,
            },
            Arc::new(ScoreComputer::new(&host)),
        )
    }

    fn tx_from(sender: &[u8], hash: &[u8], nonce: u64, gas_price: u64) -> Arc<WrappedTransaction> {
        let tx = Transaction {
            sender: sender.to_vec(),
            receiver: b"receiver".to_vec(),
            nonce,
            gas_limit: 50_000,
            gas_price,
            data: Vec::new(),
            value: 0,
            guardian: None,
        };
        Arc::new(WrappedTransaction::new(
            tx,
            hash.to_vec(),
            128,
            &MempoolHostMock::new(),
        ))
    }

    #[test]
    fn add_tx_increments_sender_counter_once_per_sender() {
        let map = new_map();

        map.add_tx(tx_from(b"alice", b"a", 1, 1_000_000_000));
        map.add_tx(tx_from(b"alice", b"aa", 2, 1_000_000_000));
        map.add_tx(tx_from(b"bob", b"b", 1, 1_000_000_000));

        assert_eq!(map.count_senders(), 2);
    }

    #[test]
    fn remove_tx_garbage_collects_empty_senders() {
        let map = new_map();

        let tx_alice_1 = tx_from(b"alice", b"a", 1, 1_000_000_000);
        let tx_alice_2 = tx_from(b"alice", b"aa", 2, 1_000_000_000);
        let tx_bob = tx_from(b"bob", b"b", 1, 1_000_000_000);

        map.add_tx(Arc::clone(&tx_alice_1));
        map.add_tx(Arc::clone(&tx_alice_2));
        map.add_tx(Arc::clone(&tx_bob));
        assert_eq!(map.count_senders(), 2);

        map.remove_tx(&tx_alice_1);
        assert_eq!(map.count_senders(), 2);

        map.remove_tx(&tx_alice_2);
        assert_eq!(map.count_senders(), 1);

        map.remove_tx(&tx_bob);
        assert_eq!(map.count_senders(), 0);
    }

    #[test]
    fn snapshot_by_order_number_yields_senders_oldest_first() {
        let map = new_map();

        map.add_tx(tx_from(b"alice", b"a", 1, 1_000_000_000));
        map.add_tx(tx_from(b"alice", b"aa", 2, 1_000_000_000));
        map.add_tx(tx_from(b"bob", b"b", 1, 1_000_000_000));
        map.add_tx(tx_from(b"carol", b"c", 2, 1_000_000_000));

        let lists = map.get_snapshot_by_order_number();
        let senders: Vec<&[u8]> = lists.iter().map(|l| l.sender().as_slice()).collect();
        assert_eq!(senders, vec![b"alice".as_slice(), b"bob", b"carol"]);
    }

    #[test]
    fn score_snapshots_are_ordered_and_deterministic() {
        let map = new_map();

        // Bob pays double the base price, and so outranks both alice and
        // carol, who are tied (tie broken by sender bytes).
        map.add_tx(tx_from(b"alice", b"a", 1, 1_000_000_000));
        map.add_tx(tx_from(b"bob", b"b", 1, 2_000_000_000));
        map.add_tx(tx_from(b"carol", b"c", 1, 1_000_000_000));

        let descending = map.get_snapshot_descending();
        let senders: Vec<&[u8]> = descending.iter().map(|l| l.sender().as_slice()).collect();
        assert_eq!(senders, vec![b"bob".as_slice(), b"alice", b"carol"]);

        let ascending = map.get_snapshot_ascending();
        let senders: Vec<&[u8]> = ascending.iter().map(|l| l.sender().as_slice()).collect();
        assert_eq!(senders, vec![b"alice".as_slice(), b"carol", b"bob"]);
    }

    #[test]
    fn notify_account_nonce_can_empty_a_sender() {
        let map = new_map();
        map.add_tx(tx_from(b"alice", b"a", 1, 1_000_000_000));
        map.add_tx(tx_from(b"alice", b"aa", 2, 1_000_000_000));

        let evicted = map.notify_account_nonce(&b"alice".to_vec(), 10);
        assert_eq!(evicted.len(), 2);
        assert_eq!(map.count_senders(), 0);
    }

    #[test]
    fn remove_senders_bulk_reports_present_senders() {
        let map = new_map();
        map.add_tx(tx_from(b"alice", b"a", 1, 1_000_000_000));
        map.add_tx(tx_from(b"bob", b"b", 1, 1_000_000_000));

        let removed =
            map.remove_senders_bulk(&[b"alice".to_vec(), b"bob".to_vec(), b"ghost".to_vec()]);
        assert_eq!(removed, 2);
        assert_eq!(map.count_senders(), 0);
    }
}
