// Bounded, score-driven transaction mempool: a chunked hash index plus
// per-sender sorted lists, with multi-pass eviction, heap-merged selection
// for block proposals, and a destination-side cache with immunity marks.
pub mod config;
pub mod cross_cache;
pub mod diagnostics;
pub mod errors;
pub mod eviction;
pub mod host;
pub mod immunity;
pub mod metrics;
pub mod mocks;
pub mod notifier;
pub mod score;
pub mod selection;
pub mod sender_list;
pub mod sender_map;
pub mod tx;
pub mod tx_by_hash;
pub mod tx_cache;

pub use config::{CacheConfig, ConfigError, CrossCacheConfig, EvictionPasses};
pub use cross_cache::CrossTxCache;
pub use errors::CacheError;
pub use host::{AccountState, MempoolHost, SelectionSession, SessionError};
pub use tx::{Address, Transaction, TxHash, WrappedTransaction};
pub use tx_cache::{AddOutcome, TxCache};
