use thiserror::Error;

/// Raised while building credentials or loading configuration, before any I/O happens.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("port must be non-zero")]
    InvalidPort,

    #[error("invalid JID '{jid}': {message}")]
    InvalidJid { jid: String, message: String },

    #[error("invalid TOML: {message}")]
    InvalidToml { message: String },
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The peer closed the stream cleanly.
    #[error("stream closed by peer")]
    EndOfStream,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),

    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("failed to serialize stanza: {0}")]
    Serialize(String),

    #[error("not connected")]
    NotConnected,
}

impl ConnectionError {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, ConnectionError::EndOfStream)
    }
}
