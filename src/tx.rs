//! Transaction wrapper held by the cache.
//!
//! The cache never validates transactions; callers hand in already-verified
//! ones, together with their hash and marshaled size. Economic fields (fee,
//! price per gas unit) are derived exactly once, before the wrapper becomes
//! visible in any index, and are read-only afterwards.

use crate::host::MempoolHost;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

pub type TxHash = Vec<u8>;
pub type Address = Vec<u8>;

/// The transaction fields the cache reads. Anything else the caller keeps to
/// itself (the cache treats the payload as opaque).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub sender: Address,
    pub receiver: Address,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: u64,
    #[serde(default)]
    pub data: Vec<u8>,
    pub value: u128,
    #[serde(default)]
    pub guardian: Option<Vec<u8>>,
}

/// A transaction plus its identity and cached economics.
#[derive(Clone, Debug)]
pub struct WrappedTransaction {
    pub tx: Arc<Transaction>,
    pub tx_hash: TxHash,
    /// Marshaled length, provided by the caller.
    pub size_in_bytes: i64,
    /// Derived: full fee of the transaction, per the host's fee model.
    pub fee: u128,
    /// Derived: fee / gas_limit, split so comparisons need no floating point.
    pub ppu_quotient: u64,
    pub ppu_remainder: u64,
}

impl WrappedTransaction {
    /// Wraps a transaction and derives its economic fields through the host.
    pub fn new(tx: Transaction, tx_hash: TxHash, size_in_bytes: i64, host: &dyn MempoolHost) -> Self {
        let tx = Arc::new(tx);
        let fee = host.compute_tx_fee(&tx);
        let (ppu_quotient, ppu_remainder) = divide_fee_by_gas(fee, tx.gas_limit);

        Self {
            tx,
            tx_hash,
            size_in_bytes,
            fee,
            ppu_quotient,
            ppu_remainder,
        }
    }

    pub fn same_as(&self, other: &WrappedTransaction) -> bool {
        self.tx_hash == other.tx_hash
    }

    /// Selection priority. The first differing criterion wins:
    /// price per gas unit (quotient, then remainder), then gas price (promote
    /// higher prices), then gas limit (promote lower limits), then hash.
    pub fn is_higher_priority(&self, other: &WrappedTransaction) -> bool {
        self.priority_ordering(other) == Ordering::Greater
    }

    pub fn priority_ordering(&self, other: &WrappedTransaction) -> Ordering {
        self.ppu_quotient
            .cmp(&other.ppu_quotient)
            .then_with(|| self.ppu_remainder.cmp(&other.ppu_remainder))
            .then_with(|| self.tx.gas_price.cmp(&other.tx.gas_price))
            .then_with(|| other.tx.gas_limit.cmp(&self.tx.gas_limit))
            .then_with(|| self.tx_hash.cmp(&other.tx_hash))
    }
}

fn divide_fee_by_gas(fee: u128, gas_limit: u64) -> (u64, u64) {
    if gas_limit == 0 {
        return (0, 0);
    }
    let gas = gas_limit as u128;
    let quotient = (fee / gas).min(u64::MAX as u128) as u64;
    let remainder = (fee % gas) as u64;
    (quotient, remainder)
}
