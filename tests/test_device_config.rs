//! Device configuration validation and serialization.

use forge_gpu::DeviceConfig;

#[test]
fn test_config_json_round_trip() {
    let config = DeviceConfig::default()
        .with_triple_buffering()
        .with_max_command_streams(24)
        .with_descriptor_arena_capacity(128)
        .with_memory_budget(512 << 20);

    let json = serde_json::to_string(&config).unwrap();
    let parsed: DeviceConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, config);
    assert!(parsed.validate().is_ok());
}

#[test]
fn test_config_from_partial_json_uses_no_defaults() {
    // Settings files must spell out every knob; a missing field is a
    // parse error rather than a silent default.
    let err = serde_json::from_str::<DeviceConfig>("{\"buffering_depth\": 2}");
    assert!(err.is_err());
}

#[test]
fn test_invalid_depth_fails_validation_not_parsing() {
    let json = "{\"buffering_depth\": 7, \"max_command_streams\": 16, \
                 \"descriptor_arena_capacity\": 64, \"memory_budget_bytes\": 0}";
    let parsed: DeviceConfig = serde_json::from_str(json).unwrap();
    assert!(parsed.validate().is_err());
}
