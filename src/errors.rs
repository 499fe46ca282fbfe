use thiserror::Error;

/// Errors surfaced by the cache beyond configuration validation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// The exact transaction (by hash) is already held.
    #[error("item already in cache")]
    AlreadyInCache,
    /// A handler registration was refused. Unrepresentable through the safe
    /// API (handlers are always concrete); kept so embedders can map their
    /// storage errors onto a stable set.
    #[error("nil eviction handler")]
    NilEvictionHandler,
    /// A selection heap item cannot be built over an empty bunch.
    #[error("empty bunch of transactions")]
    EmptyBunchOfTransactions,
}
