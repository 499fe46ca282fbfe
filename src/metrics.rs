//! Prometheus instruments for the cache.

use lazy_static::lazy_static;
use prometheus::{register_gauge, register_int_counter, Gauge, IntCounter};

lazy_static! {
    pub static ref TXCACHE_SIZE_BYTES: Gauge = register_gauge!(
        "txcache_size_bytes",
        "Current size of the transaction cache in bytes"
    )
    .unwrap();
    pub static ref TXCACHE_TRANSACTIONS: Gauge = register_gauge!(
        "txcache_transactions_total",
        "Current number of transactions in the cache"
    )
    .unwrap();
    pub static ref TXCACHE_SENDERS: Gauge = register_gauge!(
        "txcache_senders_total",
        "Current number of senders with pending transactions"
    )
    .unwrap();
    pub static ref TXCACHE_TRANSACTIONS_ADDED: IntCounter = register_int_counter!(
        "txcache_transactions_added_total",
        "Total transactions added to the cache"
    )
    .unwrap();
    pub static ref TXCACHE_TRANSACTIONS_REMOVED: IntCounter = register_int_counter!(
        "txcache_transactions_removed_total",
        "Total transactions explicitly removed from the cache"
    )
    .unwrap();
    pub static ref TXCACHE_TRANSACTIONS_EVICTED: IntCounter = register_int_counter!(
        "txcache_transactions_evicted_total",
        "Total transactions evicted from the cache"
    )
    .unwrap();
    pub static ref TXCACHE_SELECTIONS: IntCounter = register_int_counter!(
        "txcache_selections_total",
        "Total selection rounds performed"
    )
    .unwrap();
}
