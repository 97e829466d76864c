use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tokio_xmpp::{Packet, XmppCodec};
use tracing::debug;

use crate::error::ConnectionError;

pub use tokio_xmpp::parsers::minidom::Element;

/// One top-level element of the stream.
pub type Stanza = Element;

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Stanza(Stanza),
    /// The peer sent `</stream:stream>`.
    StreamEnd,
}

/// Incremental stream parser. One instance per stream; a stream restart needs a fresh one.
pub struct StanzaCodec {
    inner: XmppCodec,
    buffer: BytesMut,
}

impl StanzaCodec {
    pub fn new() -> Self {
        Self {
            inner: XmppCodec::new(),
            buffer: BytesMut::new(),
        }
    }

    /// Appends `data` and returns every frame completed by it, in stream order.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Frame>, ConnectionError> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(packet) = self
            .inner
            .decode(&mut self.buffer)
            .map_err(|error| ConnectionError::Codec(error.to_string()))?
        {
            match packet {
                Packet::Stanza(element) => frames.push(Frame::Stanza(element)),
                Packet::StreamStart(attributes) => {
                    debug!(?attributes, "peer opened stream");
                }
                Packet::Text(_) => {}
                Packet::StreamEnd => {
                    frames.push(Frame::StreamEnd);
                    break;
                }
            }
        }
        Ok(frames)
    }
}

impl Default for StanzaCodec {
    fn default() -> Self {
        Self::new()
    }
}

pub fn serialize(stanza: &Stanza) -> Result<String, ConnectionError> {
    let mut payload = Vec::new();
    stanza
        .write_to(&mut payload)
        .map_err(|error| ConnectionError::Serialize(error.to_string()))?;
    String::from_utf8(payload).map_err(|error| ConnectionError::Serialize(error.to_string()))
}
