//! Unit tests for configuration management
//!
//! These tests verify configuration parsing, defaults and validation
//! without touching the file system.

use letro_core::{AckPolicy, Config};

/// 1. Test: Default Config Creation
/// Verifies that the default configuration is valid and uses the documented defaults.
/// Why: The daemon's --dev mode runs on it unchanged.
#[test]
fn test_default_config_creation() {
    let config = Config::default();

    assert!(config.validate().is_ok());
    assert_eq!(config.gateway.fatal_error_delay_ms, 1000);
    assert!(config.gateway.connection_params_path.is_none());
    assert!(config.store.path.is_none());
    assert_eq!(config.router.ack_policy, AckPolicy::AfterProcessing);
}

/// 2. Test: Minimal TOML
/// Verifies that an empty [gateway] table fills every default.
/// Why: Most settings are optional.
#[test]
fn test_minimal_toml() {
    let config: Config = toml::from_str("[gateway]\n").unwrap();

    assert!(config.validate().is_ok());
    assert_eq!(config.gateway.server_internet_address, "letro.localhost");
    assert_eq!(config.gateway.fatal_error_delay().as_millis(), 1000);
    assert_eq!(config.router.ack_policy, AckPolicy::AfterProcessing);
}

/// 3. Test: Full TOML
/// Verifies that every setting parses, including the snake_case ack policy.
/// Why: The template documents these exact spellings.
#[test]
fn test_full_toml() {
    let toml_str = r#"
[gateway]
connection_params_path = "config/server.der"
server_internet_address = "letro.example"
fatal_error_delay_ms = 250

[store]
path = "data/endpoints.json"

[router]
ack_policy = "before_processing"
"#;

    let config: Config = toml::from_str(toml_str).unwrap();

    assert!(config.validate().is_ok());
    assert_eq!(
        config.gateway.connection_params_path.as_deref(),
        Some("config/server.der")
    );
    assert_eq!(config.gateway.fatal_error_delay_ms, 250);
    assert_eq!(config.store.path.as_deref(), Some("data/endpoints.json"));
    assert_eq!(config.router.ack_policy, AckPolicy::BeforeProcessing);
}

/// 4. Test: Two Connection Params Sources Rejected
/// Verifies that setting both a path and inline parameters fails validation.
/// Why: It would be ambiguous which server the app bootstraps against.
#[test]
fn test_two_connection_params_sources_rejected() {
    let mut config = Config::default();
    config.gateway.connection_params_path = Some("server.der".to_string());
    config.gateway.connection_params_base64 = Some("MAA=".to_string());

    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("not both"));
}

/// 5. Test: Invalid Inline Params Rejected
/// Verifies that non-base64 inline connection parameters fail validation.
/// Why: Failing at start-up beats failing on the first send.
#[test]
fn test_invalid_inline_params_rejected() {
    let mut config = Config::default();
    config.gateway.connection_params_base64 = Some("%%%".to_string());

    assert!(config.validate().is_err());

    config.gateway.connection_params_base64 = Some("MAA=".to_string());
    assert!(config.validate().is_ok());
}

/// 6. Test: Unprintable Server Address Rejected
/// Verifies that an empty or non-ASCII server address fails validation.
/// Why: The address is encoded as a VisibleString.
#[test]
fn test_unprintable_server_address_rejected() {
    let mut config = Config::default();

    config.gateway.server_internet_address = String::new();
    assert!(config.validate().is_err());

    config.gateway.server_internet_address = "lettro.exämple".to_string();
    assert!(config.validate().is_err());
}

/// 7. Test: Unknown Ack Policy Rejected
/// Verifies that an unknown ack policy name fails to parse.
/// Why: A typo must not silently fall back to the default.
#[test]
fn test_unknown_ack_policy_rejected() {
    let result: Result<Config, _> =
        toml::from_str("[gateway]\n[router]\nack_policy = \"twice\"\n");
    assert!(result.is_err());
}
