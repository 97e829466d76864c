use std::fmt;

use tokio_xmpp::parsers::jid::BareJid;

use crate::error::ConfigError;

/// Bare `user@domain` address of the connecting account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Jid {
    local: String,
    domain: String,
}

impl Jid {
    pub fn new(local: &str, domain: &str) -> Result<Self, ConfigError> {
        if local.is_empty() {
            return Err(ConfigError::MissingField { field: "username" });
        }
        if domain.is_empty() {
            return Err(ConfigError::MissingField { field: "host" });
        }

        let bare = format!("{local}@{domain}");
        bare.parse::<BareJid>()
            .map_err(|error| ConfigError::InvalidJid {
                jid: bare.clone(),
                message: error.to_string(),
            })?;

        Ok(Self {
            local: local.to_owned(),
            domain: domain.to_owned(),
        })
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}
