use std::{future::Future, sync::Arc};

use rustls::{ClientConfig, RootCertStore, pki_types::ServerName};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    net::TcpStream,
};
use tracing::debug;

use crate::error::ConnectionError;

pub trait AsyncReadAndWrite: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadAndWrite for T {}

pub type BoxedStream = Box<dyn AsyncReadAndWrite>;

/// Opens the byte stream a session runs over.
///
/// - `NativeConnector`: TCP, then a direct TLS upgrade via tokio-rustls
/// - anything else (in-memory pipes in tests, proxies) can implement this too
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = Result<BoxedStream, ConnectionError>> + Send;
}

#[derive(Clone)]
pub struct NativeConnector {
    tls: bool,
    client_config: Option<Arc<ClientConfig>>,
}

impl NativeConnector {
    pub fn tls() -> Self {
        Self {
            tls: true,
            client_config: None,
        }
    }

    pub fn plain_tcp() -> Self {
        Self {
            tls: false,
            client_config: None,
        }
    }

    pub fn with_client_config(client_config: Arc<ClientConfig>) -> Self {
        Self {
            tls: true,
            client_config: Some(client_config),
        }
    }

    pub fn uses_tls(&self) -> bool {
        self.tls
    }

    fn client_config(&self) -> Result<Arc<ClientConfig>, ConnectionError> {
        if let Some(config) = &self.client_config {
            return Ok(Arc::clone(config));
        }

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config =
            ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()
                .map_err(|error| ConnectionError::TlsHandshakeFailed(error.to_string()))?
                .with_root_certificates(roots)
                .with_no_client_auth();
        Ok(Arc::new(config))
    }
}

impl Default for NativeConnector {
    fn default() -> Self {
        Self::tls()
    }
}

async fn open_tcp(host: &str, port: u16) -> Result<TcpStream, ConnectionError> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

async fn upgrade_tls(
    stream: TcpStream,
    host: &str,
    config: Arc<ClientConfig>,
) -> Result<BoxedStream, ConnectionError> {
    let server_name = ServerName::try_from(host.to_owned())
        .map_err(|error| ConnectionError::InvalidServerName(format!("{host}: {error}")))?;
    let connector = tokio_rustls::TlsConnector::from(config);
    let stream = connector
        .connect(server_name, stream)
        .await
        .map_err(|error| ConnectionError::TlsHandshakeFailed(error.to_string()))?;
    Ok(Box::new(stream))
}

impl Connector for NativeConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<BoxedStream, ConnectionError> {
        let stream = open_tcp(host, port).await?;
        if !self.tls {
            debug!(host, port, "TCP connection established without TLS");
            return Ok(Box::new(stream));
        }

        let stream = upgrade_tls(stream, host, self.client_config()?).await?;
        debug!(host, port, "TLS handshake completed");
        Ok(stream)
    }
}

/// Splits a connected stream into the loop-owned reader and the shared writer.
pub fn split(stream: BoxedStream, read_buffer_size: usize) -> (TransportReader, TransportWriter) {
    let (reader, writer) = tokio::io::split(stream);
    (
        TransportReader {
            inner: reader,
            buffer: vec![0_u8; read_buffer_size.max(1)],
        },
        TransportWriter { inner: writer },
    )
}

pub struct TransportReader {
    inner: ReadHalf<BoxedStream>,
    buffer: Vec<u8>,
}

impl TransportReader {
    /// Waits for at least one byte. A zero-length read is a clean close.
    pub async fn read_partial(&mut self) -> Result<&[u8], ConnectionError> {
        let bytes_read = self.inner.read(&mut self.buffer).await?;
        if bytes_read == 0 {
            return Err(ConnectionError::EndOfStream);
        }
        Ok(&self.buffer[..bytes_read])
    }
}

pub struct TransportWriter {
    inner: WriteHalf<BoxedStream>,
}

impl TransportWriter {
    pub async fn write(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        if data.is_empty() {
            return Ok(());
        }

        self.inner.write_all(data).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), ConnectionError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
