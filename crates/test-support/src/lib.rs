mod loopback;
mod server;

use std::time::Duration;

use tokio::sync::mpsc;
use xmpp_simple::ClientEvent;

pub use loopback::{Accepted, Acceptor, FaultHandle, LoopbackConnector};
pub use server::{ALICE, CLIENT_HEADER_END, CLOSE_STREAM, DOMAIN, FakeServer, Negotiated, TestUser};

/// Upper bound for any single wait in a test before it is declared hung.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("loopback transport failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {timeout_ms}ms waiting for {expected:?}; received so far: {received:?}")]
    Timeout {
        expected: String,
        timeout_ms: u128,
        received: String,
    },

    #[error("client closed the stream while waiting for {expected:?}; received: {received:?}")]
    ClientClosed { expected: String, received: String },

    #[error("no connection attempt within {timeout_ms}ms")]
    NoConnection { timeout_ms: u128 },

    #[error("no client event within {timeout_ms}ms")]
    NoEvent { timeout_ms: u128 },

    #[error("event channel closed")]
    EventsClosed,
}

/// Waits for the next callback delivered through a channel handler.
pub async fn next_event(
    events: &mut mpsc::UnboundedReceiver<ClientEvent>,
) -> Result<ClientEvent, HarnessError> {
    match tokio::time::timeout(DEFAULT_TIMEOUT, events.recv()).await {
        Ok(Some(event)) => Ok(event),
        Ok(None) => Err(HarnessError::EventsClosed),
        Err(_) => Err(HarnessError::NoEvent {
            timeout_ms: DEFAULT_TIMEOUT.as_millis(),
        }),
    }
}

/// Collects whatever events arrive within `window`.
pub async fn drain_events(
    events: &mut mpsc::UnboundedReceiver<ClientEvent>,
    window: Duration,
) -> Vec<ClientEvent> {
    let mut received = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
        received.push(event);
    }
    received
}

pub mod fixtures {
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};

    pub fn root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("tests")
            .join("fixtures")
    }

    pub fn path(relative: impl AsRef<Path>) -> PathBuf {
        root().join(relative.as_ref())
    }

    pub fn read(relative: impl AsRef<Path>) -> io::Result<String> {
        fs::read_to_string(path(relative))
    }

    /// A stanza fixture with surrounding whitespace removed.
    pub fn stanza(name: &str) -> String {
        read_or_panic(Path::new("stanzas").join(name))
            .trim()
            .to_owned()
    }

    pub fn config(name: &str) -> String {
        read_or_panic(Path::new("config").join(name))
    }

    fn read_or_panic(relative: impl AsRef<Path>) -> String {
        let relative = relative.as_ref();
        read(relative).unwrap_or_else(|error| {
            panic!(
                "failed to read fixture {}: {error}",
                relative.to_string_lossy()
            )
        })
    }
}
