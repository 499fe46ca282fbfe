//! Capabilities injected by the embedding node.
//!
//! The cache computes no economics of its own: fees and transferred values
//! come from the [`MempoolHost`], account state comes from the
//! [`SelectionSession`] handed to each selection round.

use crate::tx::{Address, Transaction};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("account state unavailable for sender")]
    AccountStateUnavailable,
}

/// State of an account, as seen by the mempool at selection time.
#[derive(Clone, Debug)]
pub struct AccountState {
    pub nonce: u64,
    pub balance: u128,
    pub guardian: Option<Vec<u8>>,
}

/// Fee model of the embedding node.
pub trait MempoolHost: Send + Sync {
    /// Full fee of the transaction.
    fn compute_tx_fee(&self, tx: &Transaction) -> u128;

    /// Value leaving the sender's account (beyond the fee) if the
    /// transaction executes.
    fn get_transferred_value(&self, tx: &Transaction) -> u128;

    /// Minimum accepted gas price; the score floor derives from it.
    fn min_gas_price(&self) -> u64;
}

/// Account-state oracle for one selection round.
pub trait SelectionSession: Send + Sync {
    fn get_account_state(&self, address: &Address) -> Result<AccountState, SessionError>;

    /// Whether the transaction's guardian setup contradicts the account's.
    fn is_incorrectly_guarded(&self, tx: &Transaction) -> bool;
}
