// Configuration file round-trips and validation at the crate boundary.

use txcache::{CacheConfig, ConfigError, EvictionPasses};

fn sample_config() -> CacheConfig {
    CacheConfig {
        name: "erd-txpool".to_string(),
        num_chunks: 16,
        eviction_enabled: true,
        num_bytes_threshold: 300_000_000,
        num_bytes_per_sender_threshold: 10_000_000,
        count_threshold: 600_000,
        count_per_sender_threshold: 5_000,
        num_items_to_preemptively_evict: 1_000,
        eviction_passes: EvictionPasses::default(),
    }
}

#[test]
fn save_and_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("txcache.toml");
    let path = path.to_str().unwrap();

    let config = sample_config();
    config.save(path).unwrap();

    let loaded = CacheConfig::load(path).unwrap();
    assert_eq!(loaded.name, config.name);
    assert_eq!(loaded.num_chunks, config.num_chunks);
    assert_eq!(loaded.eviction_enabled, config.eviction_enabled);
    assert_eq!(loaded.num_bytes_threshold, config.num_bytes_threshold);
    assert_eq!(loaded.count_threshold, config.count_threshold);
    assert_eq!(
        loaded.count_per_sender_threshold,
        config.count_per_sender_threshold
    );
}

#[test]
fn load_rejects_out_of_bounds_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("txcache.toml");
    let path = path.to_str().unwrap();

    let mut config = sample_config();
    config.num_chunks = 200;
    config.save(path).unwrap();

    match CacheConfig::load(path) {
        Err(ConfigError::InvalidConfig(field)) => assert_eq!(field, "num_chunks"),
        other => panic!("expected invalid-config error, got {other:?}"),
    }
}

#[test]
fn load_rejects_missing_required_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("txcache.toml");
    std::fs::write(&path, "name = \"half-a-config\"\nnum_chunks = 16\n").unwrap();

    assert!(matches!(
        CacheConfig::load(path.to_str().unwrap()),
        Err(ConfigError::TomlDe(_))
    ));
}
