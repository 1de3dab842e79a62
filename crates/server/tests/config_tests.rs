//! Integration tests for configuration loading
//!
//! Tests server configuration parsing, including:
//! - Minimal and full TOML files
//! - Save / load through the filesystem
//! - Invalid configuration handling

use server::config::ServerConfig;
use std::time::Duration;
use tempfile::tempdir;

const MINIMAL_SERVER_CONFIG: &str = r#"
[server]
bind_addr = "0.0.0.0:3240"
log_level = "info"
"#;

const FULL_SERVER_CONFIG: &str = r#"
[server]
bind_addr = "127.0.0.1:13240"
log_level = "debug"
tcp_nodelay = false

[device]
busid = "2-4"
path = "/sys/devices/platform/usbip/2-4"
busnum = 2
devnum = 4
speed = 3
vendor_id = 0x0D28
product_id = 0x0204
bcd_device = 0x1000
manufacturer = "ARM"
product = "DAPLink CMSIS-DAP"
serial = "0240000034544e45"

[pipeline]
queue_depth = 8
fast_path_timeout_ms = 25

[trace]
enabled = true
"#;

#[test]
fn test_minimal_config_defaults() {
    let config: ServerConfig = toml::from_str(MINIMAL_SERVER_CONFIG).unwrap();

    assert!(config.server.tcp_nodelay);
    assert_eq!(config.device.busid, "1-1");
    assert_eq!(config.device.vendor_id, 0xC251);
    assert_eq!(config.device.product_id, 0xF002);
    assert_eq!(config.pipeline.queue_depth, 20);
    assert!(!config.trace.enabled);
    assert!(config.validate().is_ok());
}

#[test]
fn test_full_config() {
    let config: ServerConfig = toml::from_str(FULL_SERVER_CONFIG).unwrap();

    assert_eq!(config.server.bind_addr, "127.0.0.1:13240");
    assert!(!config.server.tcp_nodelay);
    assert_eq!(config.device.busid, "2-4");
    assert_eq!(config.device.devnum, 4);
    assert_eq!(config.device.vendor_id, 0x0D28);
    assert_eq!(config.device.product, "DAPLink CMSIS-DAP");
    assert_eq!(config.pipeline.queue_depth, 8);
    assert_eq!(config.pipeline.fast_path_timeout(), Duration::from_millis(25));
    assert!(config.trace.enabled);
    assert!(config.validate().is_ok());
}

#[test]
fn test_save_and_load_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("server.toml");

    let mut config = ServerConfig::default();
    config.device.serial = "ABCD".to_string();
    config.pipeline.queue_depth = 4;
    config.save(&path).unwrap();
    assert!(path.exists());

    let loaded = ServerConfig::load(Some(path)).unwrap();
    assert_eq!(loaded.device.serial, "ABCD");
    assert_eq!(loaded.pipeline.queue_depth, 4);
}

#[test]
fn test_load_rejects_invalid_values() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("server.toml");
    std::fs::write(
        &path,
        r#"
[server]
bind_addr = "0.0.0.0:3240"
log_level = "info"

[pipeline]
queue_depth = 0
"#,
    )
    .unwrap();

    assert!(ServerConfig::load(Some(path)).is_err());
}

#[test]
fn test_load_rejects_malformed_toml() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("server.toml");
    std::fs::write(&path, "[server\nbind_addr = ").unwrap();

    assert!(ServerConfig::load(Some(path)).is_err());
}

#[test]
fn test_load_missing_file() {
    let dir = tempdir().unwrap();
    assert!(ServerConfig::load(Some(dir.path().join("absent.toml"))).is_err());
}

#[test]
fn test_path_too_long_rejected() {
    let mut config = ServerConfig::default();
    config.device.path = "/".repeat(256);
    assert!(config.validate().is_err());
}
