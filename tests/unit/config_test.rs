//! Tests for configuration validation

use std::io::Write;

use prometheus_orchestrator::config::{parse_resources, OrchestratorConfig};

fn valid() -> OrchestratorConfig {
    OrchestratorConfig::new()
        .with_resources([("compute", 4), ("memory", 1024)])
        .with_worker_count(2)
}

#[test]
fn test_config_validation() {
    assert!(valid().validate().is_ok());
}

#[test]
fn test_config_invalid_zero_capacity() {
    assert!(valid().with_resource("accelerator", 0).validate().is_err());
}

#[test]
fn test_config_invalid_no_resources() {
    let cfg = valid().with_resources(Vec::<(String, u32)>::new());
    assert!(cfg.validate().is_err());
}

#[test]
fn test_config_invalid_workers() {
    assert!(valid().with_worker_count(0).validate().is_err());
}

#[test]
fn test_config_invalid_backoff_bounds() {
    assert!(valid().with_retry(3, 500, 100).validate().is_err());
}

#[test]
fn test_config_from_json() {
    let json = r#"{
        "resources": { "compute": 8, "memory": 2048 },
        "worker_count": 4,
        "retry": { "max_attempts": 5 },
        "cancel_grace_ms": 200
    }"#;

    let config = OrchestratorConfig::from_json_str(json).unwrap();
    assert_eq!(config.resources["compute"], 8);
    assert_eq!(config.worker_count, 4);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.initial_backoff_ms, 100);
    assert_eq!(config.cancel_grace_ms, 200);
    assert_eq!(config.expiry_sweep_ms, 250);
}

#[test]
fn test_config_from_json_rejects_invalid() {
    let json = r#"{ "resources": { "compute": 0 }, "worker_count": 1 }"#;
    assert!(OrchestratorConfig::from_json_str(json).is_err());
}

#[test]
fn test_config_from_path() {
    let path = std::env::temp_dir().join(format!("orchestrator-{}.json", std::process::id()));
    let mut file = std::fs::File::create(&path).unwrap();
    write!(file, r#"{{ "resources": {{ "compute": 3 }}, "worker_count": 1 }}"#).unwrap();

    let config = OrchestratorConfig::from_path(&path).unwrap();
    assert_eq!(config.resources["compute"], 3);
    std::fs::remove_file(&path).unwrap();

    let err = OrchestratorConfig::from_path(&path).unwrap_err();
    assert!(err.to_string().contains("reading orchestrator config"));
}

#[test]
fn test_parse_resources_rejects_malformed() {
    assert!(parse_resources("compute").is_err());
    assert!(parse_resources("compute=lots").is_err());
}
