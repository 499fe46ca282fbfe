//! Mock implementations of the injected capabilities, for tests.

use crate::host::{AccountState, MempoolHost, SelectionSession, SessionError};
use crate::tx::{Address, Transaction};
use std::collections::HashMap;
use std::sync::Mutex;

type AccountStateFn = dyn Fn(&Address) -> Result<AccountState, SessionError> + Send + Sync;
type GuardedCheckFn = dyn Fn(&Transaction) -> bool + Send + Sync;

/// Fee model mock: a fixed "movement" gas budget priced at the full gas
/// price, the remainder priced at a fraction of it.
pub struct MempoolHostMock {
    pub min_gas_limit: u64,
    pub min_gas_price: u64,
    pub gas_per_data_byte: u64,
    pub gas_price_modifier: f64,
}

impl MempoolHostMock {
    pub fn new() -> Self {
        Self {
            min_gas_limit: 50_000,
            min_gas_price: 1_000_000_000,
            gas_per_data_byte: 1_500,
            gas_price_modifier: 0.01,
        }
    }

    pub fn with_gas_price_modifier(mut self, gas_price_modifier: f64) -> Self {
        self.gas_price_modifier = gas_price_modifier;
        self
    }
}

impl Default for MempoolHostMock {
    fn default() -> Self {
        Self::new()
    }
}

impl MempoolHost for MempoolHostMock {
    fn compute_tx_fee(&self, tx: &Transaction) -> u128 {
        let gas_price_for_movement = tx.gas_price;
        let gas_price_for_processing =
            (gas_price_for_movement as f64 * self.gas_price_modifier) as u64;

        let gas_limit_for_movement =
            self.min_gas_limit + tx.data.len() as u64 * self.gas_per_data_byte;
        let gas_limit_for_processing = tx.gas_limit.saturating_sub(gas_limit_for_movement);

        let fee_for_movement = gas_price_for_movement as u128 * gas_limit_for_movement as u128;
        let fee_for_processing =
            gas_price_for_processing as u128 * gas_limit_for_processing as u128;
        fee_for_movement + fee_for_processing
    }

    fn get_transferred_value(&self, tx: &Transaction) -> u128 {
        tx.value
    }

    fn min_gas_price(&self) -> u64 {
        self.min_gas_price
    }
}

/// Account-state oracle mock backed by an in-memory table. Accounts not
/// explicitly configured default to nonce 0 with a large balance.
pub struct SelectionSessionMock {
    account_state_by_address: Mutex<HashMap<Address, AccountState>>,
    pub get_account_state_called: Option<Box<AccountStateFn>>,
    pub is_incorrectly_guarded_called: Option<Box<GuardedCheckFn>>,
}

impl SelectionSessionMock {
    pub fn new() -> Self {
        Self {
            account_state_by_address: Mutex::new(HashMap::new()),
            get_account_state_called: None,
            is_incorrectly_guarded_called: None,
        }
    }

    pub fn set_nonce(&self, address: &[u8], nonce: u64) {
        let mut states = self.account_state_by_address.lock().unwrap();
        states
            .entry(address.to_vec())
            .or_insert_with(default_account_state)
            .nonce = nonce;
    }

    pub fn set_balance(&self, address: &[u8], balance: u128) {
        let mut states = self.account_state_by_address.lock().unwrap();
        states
            .entry(address.to_vec())
            .or_insert_with(default_account_state)
            .balance = balance;
    }

    pub fn set_guardian(&self, address: &[u8], guardian: Option<Vec<u8>>) {
        let mut states = self.account_state_by_address.lock().unwrap();
        states
            .entry(address.to_vec())
            .or_insert_with(default_account_state)
            .guardian = guardian;
    }
}

impl Default for SelectionSessionMock {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionSession for SelectionSessionMock {
    fn get_account_state(&self, address: &Address) -> Result<AccountState, SessionError> {
        if let Some(hook) = &self.get_account_state_called {
            return hook(address);
        }

        let states = self.account_state_by_address.lock().unwrap();
        Ok(states
            .get(address)
            .cloned()
            .unwrap_or_else(default_account_state))
    }

    fn is_incorrectly_guarded(&self, tx: &Transaction) -> bool {
        if let Some(hook) = &self.is_incorrectly_guarded_called {
            return hook(tx);
        }
        false
    }
}

fn default_account_state() -> AccountState {
    AccountState {
        nonce: 0,
        balance: 1_000_000_000_000_000_000,
        guardian: None,
    }
}
