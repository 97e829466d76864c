use std::{fmt, time::Duration};

use serde::Deserialize;

use crate::{error::ConfigError, jid::Jid};

/// Legacy direct-TLS client port.
pub const DEFAULT_PORT: u16 = 5223;
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Validated account credentials. Every field is required.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    jid: Jid,
    password: String,
    host: String,
    port: u16,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Result<Self, ConfigError> {
        let username = username.into();
        let password = password.into();
        let host = host.into();

        if username.is_empty() {
            return Err(ConfigError::MissingField { field: "username" });
        }
        if password.is_empty() {
            return Err(ConfigError::MissingField { field: "password" });
        }
        if host.is_empty() {
            return Err(ConfigError::MissingField { field: "host" });
        }
        if port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        Ok(Self {
            jid: Jid::new(&username, &host)?,
            password,
            host,
            port,
        })
    }

    pub fn with_default_port(
        username: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Self::new(username, password, host, DEFAULT_PORT)
    }

    pub fn jid(&self) -> &Jid {
        &self.jid
    }

    pub fn username(&self) -> &str {
        self.jid.local()
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("jid", &self.jid)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

/// On-disk client configuration.
///
/// ```toml
/// [account]
/// username = "alice"
/// password = "secret"
/// host = "example.com"
/// # port = 5223
///
/// [connection]
/// read_buffer_size = 4096
/// reconnect_delay_ms = 0
/// tls = true
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub connection: ConnectionSettings,
}

#[derive(Clone, Default, Deserialize)]
pub struct AccountConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionSettings {
    /// Upper bound of a single partial read from the transport.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Pause before each reconnect attempt. Zero reconnects immediately.
    #[serde(default)]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_true")]
    pub tls: bool,
}

impl ConnectionSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            reconnect_delay_ms: 0,
            tls: true,
        }
    }
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

fn default_true() -> bool {
    true
}

impl ClientConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|error| ConfigError::InvalidToml {
            message: error.to_string(),
        })
    }

    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let account = &self.account;
        let username = account
            .username
            .clone()
            .ok_or(ConfigError::MissingField { field: "username" })?;
        let password = account
            .password
            .clone()
            .ok_or(ConfigError::MissingField { field: "password" })?;
        let host = account
            .host
            .clone()
            .ok_or(ConfigError::MissingField { field: "host" })?;

        Credentials::new(username, password, host, account.port.unwrap_or(DEFAULT_PORT))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn credentials_accept_complete_input() {
        let credentials =
            Credentials::new("alice", "secret", "example.com", 5223).expect("valid credentials");
        assert_eq!(credentials.jid().to_string(), "alice@example.com");
        assert_eq!(credentials.username(), "alice");
        assert_eq!(credentials.password(), "secret");
        assert_eq!(credentials.host(), "example.com");
        assert_eq!(credentials.port(), 5223);
    }

    #[test]
    fn credentials_reject_each_missing_field() {
        assert_matches!(
            Credentials::new("", "secret", "example.com", 5223),
            Err(ConfigError::MissingField { field: "username" })
        );
        assert_matches!(
            Credentials::new("alice", "", "example.com", 5223),
            Err(ConfigError::MissingField { field: "password" })
        );
        assert_matches!(
            Credentials::new("alice", "secret", "", 5223),
            Err(ConfigError::MissingField { field: "host" })
        );
        assert_matches!(
            Credentials::new("alice", "secret", "example.com", 0),
            Err(ConfigError::InvalidPort)
        );
    }

    #[test]
    fn default_port_is_direct_tls() {
        let credentials = Credentials::with_default_port("alice", "secret", "example.com")
            .expect("valid credentials");
        assert_eq!(credentials.port(), DEFAULT_PORT);
        assert_eq!(DEFAULT_PORT, 5223);
    }

    #[test]
    fn debug_output_redacts_password() {
        let credentials =
            Credentials::new("alice", "hunter2", "example.com", 5223).expect("valid credentials");
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn parses_full_toml_config() {
        let config = ClientConfig::from_toml_str(
            r#"
[account]
username = "alice"
password = "secret"
host = "example.com"
port = 5222

[connection]
read_buffer_size = 1024
reconnect_delay_ms = 250
tls = false
"#,
        )
        .expect("config should parse");

        let credentials = config.credentials().expect("credentials should validate");
        assert_eq!(credentials.port(), 5222);
        assert_eq!(config.connection.read_buffer_size, 1024);
        assert_eq!(
            config.connection.reconnect_delay(),
            Duration::from_millis(250)
        );
        assert!(!config.connection.tls);
    }

    #[test]
    fn toml_defaults_apply() {
        let config = ClientConfig::from_toml_str(
            r#"
[account]
username = "alice"
password = "secret"
host = "example.com"
"#,
        )
        .expect("config should parse");

        assert_eq!(config.credentials().expect("valid").port(), DEFAULT_PORT);
        assert_eq!(config.connection, ConnectionSettings::default());
        assert_eq!(config.connection.reconnect_delay(), Duration::ZERO);
    }

    #[test]
    fn toml_missing_field_fails_credentials() {
        let config = ClientConfig::from_toml_str(
            r#"
[account]
username = "alice"
host = "example.com"
"#,
        )
        .expect("config should parse");

        assert_matches!(
            config.credentials(),
            Err(ConfigError::MissingField { field: "password" })
        );
    }

    #[test]
    fn malformed_toml_is_reported() {
        assert_matches!(
            ClientConfig::from_toml_str("[account"),
            Err(ConfigError::InvalidToml { .. })
        );
    }
}
