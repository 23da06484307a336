//! Configuration loading tests

use pretty_assertions::assert_eq;
use serial_test::serial;
use std::io::Write;

use engine_gateway::{GatewayConfig, config::DEFAULT_API_KEY};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_missing_file_falls_back_to_defaults() {
    let config = GatewayConfig::from_file("/nonexistent/gateway.toml").unwrap();

    assert_eq!(config.server.listen_addr, "0.0.0.0:4466");
    assert_eq!(config.auth.api_key, DEFAULT_API_KEY);
    assert_eq!(config.engine.port, 4467);
    assert!(!config.sleep_mode.enabled);
    assert!(!config.redis.enabled);
}

#[test]
#[serial]
fn test_file_values_override_defaults() {
    let file = write_config(
        r#"
[server]
listen_addr = "127.0.0.1:5000"
production = true

[engine]
port = 5001
schema_path = "/srv/schema.prisma"

[sleep_mode]
enabled = true
after_seconds = 30

[rate_limiting]
read_per_second = 50
write_per_second = 5
"#,
    );

    let config = GatewayConfig::from_file(file.path().to_str().unwrap()).unwrap();

    assert_eq!(config.server.listen_addr, "127.0.0.1:5000");
    assert!(config.server.production);
    assert_eq!(config.engine_url(), "http://localhost:5001/");
    assert_eq!(config.engine.schema_path, "/srv/schema.prisma");
    assert_eq!(config.idle_timeout().as_secs(), 30);
    assert_eq!(config.rate_limiting.read_per_second, 50);
    assert_eq!(config.rate_limiting.write_per_second, 5);
    // Untouched sections keep their defaults
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.server.health_path, "/health");
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config(
        r#"
[auth]
api_key = "from-file"
"#,
    );

    // SAFETY: tests touching the environment are serialized.
    unsafe { std::env::set_var("GATEWAY_AUTH__API_KEY", "from-env") };
    let loaded = GatewayConfig::from_file(file.path().to_str().unwrap());
    unsafe { std::env::remove_var("GATEWAY_AUTH__API_KEY") };

    assert_eq!(loaded.unwrap().auth.api_key, "from-env");
}

#[test]
#[serial]
fn test_invalid_values_are_rejected() {
    let file = write_config(
        r#"
[retry]
max_attempts = 0
"#,
    );

    assert!(GatewayConfig::from_file(file.path().to_str().unwrap()).is_err());
}
