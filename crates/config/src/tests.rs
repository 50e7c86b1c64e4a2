use super::*;

#[test]
fn default_config_is_valid() {
    let c = SSTableConfig::default();
    assert_eq!(c.chunk_length, 65536);
    assert_eq!(c.min_index_interval, 128);
    assert!(c.validate().is_ok());
}

#[test]
fn rejects_non_power_of_two_chunk() {
    let c = SSTableConfig::default().with_chunk_length(1000);
    assert_eq!(c.validate(), Err(ConfigError::InvalidChunkLength(1000)));
}

#[test]
fn rejects_zero_chunk() {
    let c = SSTableConfig::default().with_chunk_length(0);
    assert_eq!(c.validate(), Err(ConfigError::InvalidChunkLength(0)));
}

#[test]
fn rejects_zero_interval() {
    let c = SSTableConfig::default().with_min_index_interval(0);
    assert_eq!(c.validate(), Err(ConfigError::ZeroIndexInterval));
}

#[test]
fn rejects_out_of_range_crc_chance() {
    let c = SSTableConfig {
        crc_check_chance: 1.5,
        ..SSTableConfig::default()
    };
    assert!(matches!(c.validate(), Err(ConfigError::InvalidCrcCheckChance(_))));
}

#[test]
fn builder_methods_override_fields() {
    let c = SSTableConfig::default()
        .with_chunk_length(4096)
        .with_min_index_interval(4);
    assert_eq!(c.chunk_length, 4096);
    assert_eq!(c.min_index_interval, 4);
    assert!(c.validate().is_ok());
}
