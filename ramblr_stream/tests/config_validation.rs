mod common;

use common::test_config;
use ramblr_stream::process::{process_url, CatalogFetchGuard};
use ramblr_stream::{ConfigError, StreamConfig, Timings};
use std::time::Duration;

#[test]
fn validation_names_every_missing_input() {
    let err = StreamConfig::default().validate().unwrap_err();
    match err {
        ConfigError::Missing(fields) => assert_eq!(
            fields,
            vec![
                "client_id",
                "client_secret",
                "authority",
                "scope",
                "workspace_id",
                "websocket_url"
            ]
        ),
        other => panic!("expected missing inputs, got {other:?}"),
    }
}

#[test]
fn validation_normalizes_optional_inputs() {
    let mut cfg = test_config("wss://stream.example.com");
    cfg.skill_id = Some("  ".to_string());
    cfg.jpeg_quality = 1.5;
    cfg.max_concurrent_encodes = 0;
    let cfg = cfg.validate().unwrap();

    assert_eq!(cfg.skill_id, None);
    assert_eq!(cfg.api_base_url(), common::AUTHORITY);
    assert!((cfg.jpeg_quality - 0.82).abs() < f32::EPSILON);
    assert_eq!(cfg.max_concurrent_encodes, 1);
    assert_eq!(cfg.timings, Timings::default());
    assert_eq!(cfg.timings.send_pacing, Duration::from_millis(50));

    let mut zero_attempts = test_config("wss://stream.example.com");
    zero_attempts.max_auth_attempts = 0;
    assert!(matches!(
        zero_attempts.validate(),
        Err(ConfigError::Invalid { field: "max_auth_attempts", .. })
    ));
}

#[test]
fn frame_interval_from_target_rate() {
    let mut cfg = test_config("wss://stream.example.com");
    assert_eq!(cfg.frame_interval(), Duration::from_millis(333));
    cfg.target_frame_rate = 0;
    assert_eq!(cfg.frame_interval(), Duration::from_millis(1000));
    cfg.target_frame_rate = 5000;
    assert_eq!(cfg.frame_interval(), Duration::from_millis(1));
}

#[test]
fn debug_output_hides_the_secret() {
    let cfg = test_config("wss://stream.example.com");
    let printed = format!("{cfg:?}");
    assert!(!printed.contains("s3cret"));
    assert!(printed.contains("client-1"));
}

#[test]
fn environment_overrides() {
    std::env::set_var("RAMBLR_CLIENT_ID", "env-client");
    std::env::set_var("RAMBLR_TARGET_FRAME_RATE", "6");
    std::env::set_var("RAMBLR_USE_PNG", "true");
    let cfg = StreamConfig::from_env().unwrap();
    assert_eq!(cfg.client_id, "env-client");
    assert_eq!(cfg.target_frame_rate, 6);
    assert!(cfg.use_png);

    std::env::set_var("RAMBLR_TARGET_FRAME_RATE", "fast");
    assert!(matches!(
        StreamConfig::from_env(),
        Err(ConfigError::Invalid { field: "RAMBLR_TARGET_FRAME_RATE", .. })
    ));

    std::env::remove_var("RAMBLR_CLIENT_ID");
    std::env::remove_var("RAMBLR_TARGET_FRAME_RATE");
    std::env::remove_var("RAMBLR_USE_PNG");
}

#[test]
fn process_url_escapes_the_id() {
    assert_eq!(
        process_url("https://api.example.com/v1/", "p 1/2").unwrap().as_str(),
        "https://api.example.com/v1/processes/p%201%2F2"
    );
    assert_eq!(
        process_url("https://api.example.com", "p-1").unwrap().as_str(),
        "https://api.example.com/processes/p-1"
    );
    assert!(process_url("relative/path", "p-1").is_err());
}

#[test]
fn catalog_fetch_guard_deduplicates() {
    let mut guard = CatalogFetchGuard::default();
    assert!(guard.try_begin("p-1"));
    assert!(!guard.try_begin("p-1"));
    assert!(guard.is_in_flight("p-1"));

    guard.finish("p-1", false);
    assert!(!guard.is_in_flight("p-1"));
    assert!(guard.try_begin("p-1"));
    guard.finish("p-1", true);
    assert!(!guard.try_begin("p-1"));
    assert!(!guard.try_begin(""));
}
