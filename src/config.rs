use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use thiserror::Error;

const NUM_CHUNKS_LOWER_BOUND: u32 = 1;
const NUM_CHUNKS_UPPER_BOUND: u32 = 128;
const MAX_NUM_ITEMS_LOWER_BOUND: u32 = 4;
const MAX_NUM_BYTES_LOWER_BOUND: u32 = MAX_NUM_ITEMS_LOWER_BOUND;
/// One GB.
const MAX_NUM_BYTES_UPPER_BOUND: u32 = 1_073_741_824;
const MAX_NUM_ITEMS_PER_SENDER_LOWER_BOUND: u32 = 1;
const MAX_NUM_BYTES_PER_SENDER_LOWER_BOUND: u32 = MAX_NUM_ITEMS_PER_SENDER_LOWER_BOUND;
/// 32 MB.
const MAX_NUM_BYTES_PER_SENDER_UPPER_BOUND: u32 = 33_554_432;
const NUM_ITEMS_TO_PREEMPTIVELY_EVICT_LOWER_BOUND: u32 = 1;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("invalid config: {0} is invalid")]
    InvalidConfig(&'static str),
}

/// Configuration of the sender-side mempool (transactions originating in the
/// local shard). Every field is required; bounds are enforced by `validate`.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CacheConfig {
    pub name: String,
    pub num_chunks: u32,
    pub eviction_enabled: bool,
    pub num_bytes_threshold: u32,
    pub num_bytes_per_sender_threshold: u32,
    pub count_threshold: u32,
    pub count_per_sender_threshold: u32,
    pub num_items_to_preemptively_evict: u32,
    #[serde(default)]
    pub eviction_passes: EvictionPasses,
}

/// Knobs of the multi-pass evictor. Defaults are tuned for a cache holding
/// a few hundred thousand transactions.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EvictionPasses {
    /// How many of the oldest senders are dropped per eviction step.
    pub num_oldest_senders_to_evict: u32,
    /// A sender holding more than this many transactions gets its tail trimmed.
    pub a_lot_of_transactions_for_a_sender: u32,
    /// How many high-nonce transactions to trim from such a sender.
    pub num_txs_to_evict_for_a_sender_with_a_lot: u32,
    /// Below this number of senders, the batched sender eviction pass is skipped.
    pub few_senders_threshold: u32,
}

impl Default for EvictionPasses {
    fn default() -> Self {
        Self {
            num_oldest_senders_to_evict: 100,
            a_lot_of_transactions_for_a_sender: 500,
            num_txs_to_evict_for_a_sender_with_a_lot: 100,
            few_senders_threshold: 200,
        }
    }
}

/// Per-sender capacity, derived from the cache-wide configuration.
#[derive(Debug, Clone, Copy)]
pub struct SenderConstraints {
    pub max_num_txs: u32,
    pub max_num_bytes: u32,
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::InvalidConfig("name"));
        }
        if !(NUM_CHUNKS_LOWER_BOUND..=NUM_CHUNKS_UPPER_BOUND).contains(&self.num_chunks) {
            return Err(ConfigError::InvalidConfig("num_chunks"));
        }
        if self.num_bytes_per_sender_threshold < MAX_NUM_BYTES_PER_SENDER_LOWER_BOUND
            || self.num_bytes_per_sender_threshold > MAX_NUM_BYTES_PER_SENDER_UPPER_BOUND
        {
            return Err(ConfigError::InvalidConfig("num_bytes_per_sender_threshold"));
        }
        if self.count_per_sender_threshold < MAX_NUM_ITEMS_PER_SENDER_LOWER_BOUND {
            return Err(ConfigError::InvalidConfig("count_per_sender_threshold"));
        }
        if self.num_bytes_threshold < MAX_NUM_BYTES_LOWER_BOUND
            || self.num_bytes_threshold > MAX_NUM_BYTES_UPPER_BOUND
        {
            return Err(ConfigError::InvalidConfig("num_bytes_threshold"));
        }
        if self.count_threshold < MAX_NUM_ITEMS_LOWER_BOUND {
            return Err(ConfigError::InvalidConfig("count_threshold"));
        }
        if self.num_items_to_preemptively_evict < NUM_ITEMS_TO_PREEMPTIVELY_EVICT_LOWER_BOUND {
            return Err(ConfigError::InvalidConfig("num_items_to_preemptively_evict"));
        }
        if self.eviction_passes.num_oldest_senders_to_evict == 0 {
            return Err(ConfigError::InvalidConfig("num_oldest_senders_to_evict"));
        }
        if self.eviction_passes.num_txs_to_evict_for_a_sender_with_a_lot == 0 {
            return Err(ConfigError::InvalidConfig(
                "num_txs_to_evict_for_a_sender_with_a_lot",
            ));
        }
        Ok(())
    }

    pub fn sender_constraints(&self) -> SenderConstraints {
        SenderConstraints {
            max_num_txs: self.count_per_sender_threshold,
            max_num_bytes: self.num_bytes_per_sender_threshold,
        }
    }

    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: CacheConfig = toml::from_str(&contents).map_err(ConfigError::TomlDe)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::TomlSer)?;
        let mut file = File::create(path)?;
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }
}

/// Configuration of the destination-side (cross-shard) cache.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CrossCacheConfig {
    pub name: String,
    pub num_chunks: u32,
    pub max_num_items: u32,
    pub max_num_bytes: u32,
    pub num_items_to_preemptively_evict: u32,
}

impl CrossCacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::InvalidConfig("name"));
        }
        if !(NUM_CHUNKS_LOWER_BOUND..=NUM_CHUNKS_UPPER_BOUND).contains(&self.num_chunks) {
            return Err(ConfigError::InvalidConfig("num_chunks"));
        }
        if self.max_num_items < MAX_NUM_ITEMS_LOWER_BOUND {
            return Err(ConfigError::InvalidConfig("max_num_items"));
        }
        if self.max_num_bytes < MAX_NUM_BYTES_LOWER_BOUND
            || self.max_num_bytes > MAX_NUM_BYTES_UPPER_BOUND
        {
            return Err(ConfigError::InvalidConfig("max_num_bytes"));
        }
        if self.num_items_to_preemptively_evict < NUM_ITEMS_TO_PREEMPTIVELY_EVICT_LOWER_BOUND {
            return Err(ConfigError::InvalidConfig("num_items_to_preemptively_evict"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> CacheConfig {
        CacheConfig {
            name: "untitled".to_string(),
            num_chunks: 16,
            eviction_enabled: true,
            num_bytes_threshold: 1_000_000,
            num_bytes_per_sender_threshold: 100_000,
            count_threshold: 1000,
            count_per_sender_threshold: 100,
            num_items_to_preemptively_evict: 50,
            eviction_passes: EvictionPasses::default(),
        }
    }

    #[test]
    fn validate_accepts_sane_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validate_names_the_offending_field() {
        let mut config = valid_config();
        config.name = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig("name"))
        ));

        let mut config = valid_config();
        config.num_chunks = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig("num_chunks"))
        ));

        let mut config = valid_config();
        config.num_chunks = 129;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig("num_chunks"))
        ));

        let mut config = valid_config();
        config.num_bytes_threshold = 3;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig("num_bytes_threshold"))
        ));

        let mut config = valid_config();
        config.num_bytes_per_sender_threshold = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig("num_bytes_per_sender_threshold"))
        ));

        let mut config = valid_config();
        config.count_threshold = 3;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig("count_threshold"))
        ));

        let mut config = valid_config();
        config.count_per_sender_threshold = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig("count_per_sender_threshold"))
        ));

        let mut config = valid_config();
        config.num_items_to_preemptively_evict = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig("num_items_to_preemptively_evict"))
        ));
    }

    #[test]
    fn cross_cache_config_bounds() {
        let config = CrossCacheConfig {
            name: "cross".to_string(),
            num_chunks: 16,
            max_num_items: 1000,
            max_num_bytes: 1_000_000,
            num_items_to_preemptively_evict: 10,
        };
        assert!(config.validate().is_ok());

        let mut bad = config.clone();
        bad.max_num_items = 3;
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::InvalidConfig("max_num_items"))
        ));

        let mut bad = config;
        bad.max_num_bytes = 2_000_000_000;
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::InvalidConfig("max_num_bytes"))
        ));
    }

    #[test]
    fn sender_constraints_are_derived_from_config() {
        let config = valid_config();
        let constraints = config.sender_constraints();
        assert_eq!(constraints.max_num_txs, 100);
        assert_eq!(constraints.max_num_bytes, 100_000);
    }
}
