//! Scripted server end of a loopback connection.

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::{DEFAULT_TIMEOUT, HarnessError, fixtures};

pub const DOMAIN: &str = "localhost";

/// Tail of the header the client writes on every (re)start.
pub const CLIENT_HEADER_END: &str = "version='1.0'>";
pub const CLOSE_STREAM: &str = "</stream:stream>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestUser {
    pub username: &'static str,
    pub jid: &'static str,
    pub password: &'static str,
}

pub const ALICE: TestUser = TestUser {
    username: "alice",
    jid: "alice@localhost",
    password: "alice_pass",
};

/// What the client sent during [`FakeServer::negotiate`].
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub header: String,
    pub auth: String,
    pub restart_header: String,
    pub bind: String,
}

impl Negotiated {
    /// The base64 payload of the `<auth/>` element.
    pub fn auth_payload(&self) -> &str {
        element_text(&self.auth)
    }
}

pub struct FakeServer {
    stream: DuplexStream,
    pending: Vec<u8>,
}

impl FakeServer {
    pub(crate) fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            pending: Vec::new(),
        }
    }

    pub async fn send(&mut self, xml: &str) -> Result<(), HarnessError> {
        self.stream.write_all(xml.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn send_fixture(&mut self, name: &str) -> Result<(), HarnessError> {
        self.send(&fixtures::stanza(name)).await
    }

    /// Sends the server stream header immediately followed by `features`.
    pub async fn open_stream(&mut self, features: &str) -> Result<(), HarnessError> {
        let header = fixtures::stanza("stream-header.xml");
        let features = fixtures::stanza(features);
        self.send(&format!("{header}{features}")).await
    }

    /// Returns everything the client wrote up to and including `needle`.
    pub async fn read_until(&mut self, needle: &str) -> Result<String, HarnessError> {
        let deadline = tokio::time::Instant::now() + DEFAULT_TIMEOUT;
        loop {
            if let Some(index) = find(&self.pending, needle.as_bytes()) {
                let consumed: Vec<u8> = self.pending.drain(..index + needle.len()).collect();
                return Ok(String::from_utf8_lossy(&consumed).into_owned());
            }

            let mut chunk = [0_u8; 4096];
            let read = match tokio::time::timeout_at(deadline, self.stream.read(&mut chunk)).await {
                Ok(read) => read?,
                Err(_) => {
                    return Err(HarnessError::Timeout {
                        expected: needle.to_owned(),
                        timeout_ms: DEFAULT_TIMEOUT.as_millis(),
                        received: self.received(),
                    });
                }
            };
            if read == 0 {
                return Err(HarnessError::ClientClosed {
                    expected: needle.to_owned(),
                    received: self.received(),
                });
            }
            self.pending.extend_from_slice(&chunk[..read]);
        }
    }

    /// Returns everything the client writes until it shuts its side down.
    pub async fn read_to_end(&mut self) -> Result<String, HarnessError> {
        let read = tokio::time::timeout(DEFAULT_TIMEOUT, self.stream.read_to_end(&mut self.pending))
            .await
            .map_err(|_| HarnessError::Timeout {
                expected: "end of stream".to_owned(),
                timeout_ms: DEFAULT_TIMEOUT.as_millis(),
                received: String::new(),
            })?;
        read?;
        let consumed = std::mem::take(&mut self.pending);
        Ok(String::from_utf8_lossy(&consumed).into_owned())
    }

    pub async fn expect_stream_header(&mut self) -> Result<String, HarnessError> {
        self.read_until(CLIENT_HEADER_END).await
    }

    /// Drives the client through SASL PLAIN, the stream restart and resource
    /// binding, and returns what it sent along the way.
    pub async fn negotiate(&mut self) -> Result<Negotiated, HarnessError> {
        let header = self.expect_stream_header().await?;
        self.open_stream("features-sasl-plain.xml").await?;

        let auth = self.read_until("</auth>").await?;
        self.send_fixture("sasl-success.xml").await?;

        let restart_header = self.expect_stream_header().await?;
        self.open_stream("features-bind.xml").await?;

        let bind = self.read_until("</iq>").await?;
        self.send_fixture("bind-result.xml").await?;

        Ok(Negotiated {
            header,
            auth,
            restart_header,
            bind,
        })
    }

    /// Shuts down the server's write side; the client sees end of file.
    pub async fn close(&mut self) -> Result<(), HarnessError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    fn received(&self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn element_text(xml: &str) -> &str {
    let start = xml.find('>').map_or(0, |index| index + 1);
    let end = xml.rfind("</").unwrap_or(xml.len());
    if start <= end { &xml[start..end] } else { "" }
}
