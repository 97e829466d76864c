use std::{
    convert::Infallible,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::{sync::Mutex as AsyncMutex, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    codec::{self, Element, Frame, StanzaCodec},
    config::{ConnectionSettings, Credentials},
    dispatcher::{Dispatch, Dispatcher},
    error::ConnectionError,
    handler::Handler,
    jid::Jid,
    negotiator::{close_stream_xml, open_stream_xml},
    transport::{self, Connector, NativeConnector, TransportReader, TransportWriter},
};

/// Data accepted by [`Client::write_data`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Raw(String),
    Stanza(Element),
}

impl Outgoing {
    fn into_wire(self) -> Result<String, ConnectionError> {
        match self {
            Outgoing::Raw(xml) => Ok(xml),
            Outgoing::Stanza(stanza) => codec::serialize(&stanza),
        }
    }
}

impl From<String> for Outgoing {
    fn from(value: String) -> Self {
        Outgoing::Raw(value)
    }
}

impl From<&str> for Outgoing {
    fn from(value: &str) -> Self {
        Outgoing::Raw(value.to_owned())
    }
}

impl From<Element> for Outgoing {
    fn from(value: Element) -> Self {
        Outgoing::Stanza(value)
    }
}

/// One XMPP connection, kept alive by a background read loop.
///
/// `connect` returns once the stream header is written; negotiation, message
/// delivery and reconnects then happen on the spawned loop and are reported
/// through the [`Handler`]. The owner must call [`Client::close`] on every exit
/// path: dropping the client does not stop the loop.
pub struct Client<H: Handler, C: Connector = NativeConnector> {
    inner: Arc<Inner<H, C>>,
}

impl<H: Handler, C: Connector> Clone for Client<H, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<H, C> {
    handler: Arc<H>,
    credentials: Credentials,
    settings: ConnectionSettings,
    connector: C,
    writer: AsyncMutex<Option<TransportWriter>>,
    read_loop: Mutex<Option<JoinHandle<()>>>,
}

/// Per-stream parser and routing state, rebuilt on every connect.
struct Session<H> {
    codec: StanzaCodec,
    dispatcher: Dispatcher<H>,
    closing: bool,
}

impl<H: Handler> Client<H> {
    pub fn new(handler: H, credentials: Credentials) -> Self {
        Self::with_settings(handler, credentials, ConnectionSettings::default())
    }

    pub fn with_settings(handler: H, credentials: Credentials, settings: ConnectionSettings) -> Self {
        let connector = if settings.tls {
            NativeConnector::tls()
        } else {
            NativeConnector::plain_tcp()
        };
        Self::with_connector(handler, credentials, settings, connector)
    }
}

impl<H: Handler, C: Connector> Client<H, C> {
    pub fn with_connector(
        handler: H,
        credentials: Credentials,
        settings: ConnectionSettings,
        connector: C,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                handler: Arc::new(handler),
                credentials,
                settings,
                connector,
                writer: AsyncMutex::new(None),
                read_loop: Mutex::new(None),
            }),
        }
    }

    pub fn jid(&self) -> &Jid {
        self.inner.credentials.jid()
    }

    /// Opens the transport, writes the stream header and spawns the read loop.
    ///
    /// An existing connection is torn down first.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.inner.stop_read_loop().await;
        self.inner.teardown().await;

        let reader = self.inner.open().await?;
        let inner = Arc::clone(&self.inner);
        let read_loop = tokio::spawn(inner.run(reader));
        self.inner.set_read_loop(read_loop).await;
        Ok(())
    }

    /// Sends the closing stream tag. The socket stays open until the peer answers.
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.inner.disconnect().await
    }

    pub async fn write_data(&self, data: impl Into<Outgoing>) -> Result<(), ConnectionError> {
        self.inner.write_data(data.into()).await
    }

    /// Stops the read loop, sends the closing stream tag and closes the socket.
    /// Calling it again, or before `connect`, does nothing.
    pub async fn close(&self) {
        self.inner.stop_read_loop().await;
        self.inner.teardown().await;
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.writer.lock().await.is_some()
    }
}

impl<H: Handler, C: Connector> Inner<H, C> {
    async fn open(&self) -> Result<TransportReader, ConnectionError> {
        let host = self.credentials.host();
        let port = self.credentials.port();
        info!(host, port, "Connecting");

        let stream = self.connector.connect(host, port).await?;
        let (reader, writer) = transport::split(stream, self.settings.read_buffer_size);
        *self.writer.lock().await = Some(writer);

        self.start().await?;
        Ok(reader)
    }

    async fn start(&self) -> Result<(), ConnectionError> {
        self.write_raw(open_stream_xml(self.credentials.host()).as_bytes())
            .await
    }

    fn new_session(&self) -> Session<H> {
        Session {
            codec: StanzaCodec::new(),
            dispatcher: Dispatcher::new(Arc::clone(&self.handler), self.credentials.clone()),
            closing: false,
        }
    }

    async fn run(self: Arc<Self>, mut reader: TransportReader) {
        loop {
            let mut session = self.new_session();
            let error = match self.pump(&mut reader, &mut session).await {
                Ok(never) => match never {},
                Err(error) => error,
            };

            if error.is_end_of_stream() || session.closing {
                debug!(%error, "Socket disconnected");
                self.release_writer().await;
                self.handler.on_disconnected();
                return;
            }

            warn!(%error, "connection failed, reconnecting");
            self.handler.on_reconnecting();
            reader = self.reconnect().await;
        }
    }

    /// Reads and dispatches until the transport or the codec fails.
    async fn pump(
        &self,
        reader: &mut TransportReader,
        session: &mut Session<H>,
    ) -> Result<Infallible, ConnectionError> {
        loop {
            let data = reader.read_partial().await?;
            let frames = session.codec.feed(data)?;

            for frame in frames {
                match frame {
                    Frame::Stanza(stanza) => self.apply(session, &stanza).await?,
                    Frame::StreamEnd => return Err(ConnectionError::EndOfStream),
                }
            }
        }
    }

    async fn apply(
        &self,
        session: &mut Session<H>,
        stanza: &Element,
    ) -> Result<(), ConnectionError> {
        match session.dispatcher.dispatch(stanza) {
            Dispatch::Send(reply) => self.write_data(Outgoing::Stanza(reply)).await,
            Dispatch::RestartStream => {
                session.codec = StanzaCodec::new();
                self.start().await
            }
            Dispatch::Disconnect => {
                session.closing = true;
                self.disconnect().await?;
                // Keep reading until the peer closes; nothing more may be written.
                self.release_writer().await;
                Ok(())
            }
            Dispatch::None => Ok(()),
        }
    }

    /// Replaces the failed transport with a fresh one, retrying until it opens.
    async fn reconnect(&self) -> TransportReader {
        let delay = self.settings.reconnect_delay();
        loop {
            self.teardown().await;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match self.open().await {
                Ok(reader) => return reader,
                Err(error) => {
                    warn!(%error, "reconnect attempt failed");
                    self.handler.on_reconnecting();
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.write_raw(close_stream_xml().as_bytes()).await
    }

    async fn write_data(&self, data: Outgoing) -> Result<(), ConnectionError> {
        let xml = data.into_wire()?;
        self.write_raw(xml.as_bytes()).await
    }

    async fn write_raw(&self, data: &[u8]) -> Result<(), ConnectionError> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(ConnectionError::NotConnected)?;
        debug!(bytes = data.len(), "Sending");
        writer.write(data).await
    }

    /// Best-effort closing tag plus socket shutdown. Idempotent.
    async fn teardown(&self) {
        let Some(mut writer) = self.writer.lock().await.take() else {
            return;
        };

        debug!("tearing down transport");
        if let Err(error) = writer.write(close_stream_xml().as_bytes()).await {
            debug!(%error, "failed to send closing stream tag");
        }
        if let Err(error) = writer.close().await {
            debug!(%error, "failed to close transport");
        }
    }

    /// Half-closes and drops the writer without sending anything more. The read
    /// half stays open until the peer finishes.
    async fn release_writer(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(error) = writer.close().await {
                debug!(%error, "failed to shut down transport writer");
            }
        }
    }

    async fn set_read_loop(&self, read_loop: JoinHandle<()>) {
        let previous = self
            .read_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(read_loop);
        if let Some(previous) = previous {
            cancel(previous).await;
        }
    }

    /// Returns once the loop has stopped, so it can no longer install a writer.
    async fn stop_read_loop(&self) {
        let previous = self
            .read_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(read_loop) = previous {
            cancel(read_loop).await;
        }
    }
}

async fn cancel(read_loop: JoinHandle<()>) {
    read_loop.abort();
    if let Err(error) = read_loop.await {
        if !error.is_cancelled() {
            warn!(%error, "read loop ended abnormally");
        }
    }
}
