use assert_matches::assert_matches;
use xmpp_simple::{ClientConfig, ConfigError, DEFAULT_PORT, DEFAULT_READ_BUFFER_SIZE};
use xmpp_simple_test_support::{ALICE, DOMAIN, fixtures};

#[test]
fn minimal_config_fixture_yields_credentials_and_defaults() {
    let config = ClientConfig::from_toml_str(&fixtures::config("minimal-config.toml"))
        .expect("fixture should parse");

    let credentials = config.credentials().expect("fixture has every account field");
    assert_eq!(credentials.username(), ALICE.username);
    assert_eq!(credentials.password(), ALICE.password);
    assert_eq!(credentials.host(), DOMAIN);
    assert_eq!(credentials.port(), DEFAULT_PORT);
    assert_eq!(credentials.jid().to_string(), ALICE.jid);

    assert_eq!(config.connection.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
    assert_eq!(config.connection.reconnect_delay_ms, 0);
    assert!(config.connection.tls);
}

#[test]
fn fixture_without_password_is_rejected() {
    let raw = fixtures::config("minimal-config.toml").replace("password = \"alice_pass\"\n", "");
    let config = ClientConfig::from_toml_str(&raw).expect("still valid toml");

    assert_matches!(
        config.credentials(),
        Err(ConfigError::MissingField { field: "password" })
    );
}
