//! In-memory [`Connector`] whose "server" side is handed to the test.

use std::{
    io,
    pin::Pin,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll, Waker},
};

use tokio::{
    io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf},
    sync::mpsc,
};
use xmpp_simple::{BoxedStream, ConnectionError, Connector};

use crate::{DEFAULT_TIMEOUT, HarnessError, server::FakeServer};

const PIPE_CAPACITY: usize = 64 * 1024;

/// One accepted connection: the server end plus a handle to break the client end.
pub struct Accepted {
    pub server: FakeServer,
    pub fault: FaultHandle,
    pub host: String,
    pub port: u16,
}

#[derive(Clone)]
pub struct LoopbackConnector {
    state: Arc<ConnectorState>,
}

struct ConnectorState {
    accepted: mpsc::UnboundedSender<Accepted>,
    attempts: AtomicUsize,
    refusals: AtomicUsize,
}

/// Receives the server side of every connection the client opens.
pub struct Acceptor {
    accepted: mpsc::UnboundedReceiver<Accepted>,
}

impl LoopbackConnector {
    pub fn new() -> (Self, Acceptor) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let connector = Self {
            state: Arc::new(ConnectorState {
                accepted: sender,
                attempts: AtomicUsize::new(0),
                refusals: AtomicUsize::new(0),
            }),
        };
        (connector, Acceptor { accepted: receiver })
    }

    /// Connection attempts so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Makes the next `count` attempts fail with `ConnectionRefused`.
    pub fn refuse_next(&self, count: usize) {
        self.state.refusals.store(count, Ordering::SeqCst);
    }
}

impl Connector for LoopbackConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<BoxedStream, ConnectionError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .state
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ConnectionError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "loopback connection refused",
            )));
        }

        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        let fault = FaultHandle::default();
        let accepted = Accepted {
            server: FakeServer::new(server),
            fault: fault.clone(),
            host: host.to_owned(),
            port,
        };
        if self.state.accepted.send(accepted).is_err() {
            return Err(ConnectionError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "loopback acceptor dropped",
            )));
        }

        Ok(Box::new(FaultyStream {
            inner: client,
            fault,
        }))
    }
}

impl Acceptor {
    pub async fn accept(&mut self) -> Result<Accepted, HarnessError> {
        match tokio::time::timeout(DEFAULT_TIMEOUT, self.accepted.recv()).await {
            Ok(Some(accepted)) => Ok(accepted),
            Ok(None) | Err(_) => Err(HarnessError::NoConnection {
                timeout_ms: DEFAULT_TIMEOUT.as_millis(),
            }),
        }
    }

    /// A connection that was already opened, if any.
    pub fn try_accept(&mut self) -> Option<Accepted> {
        self.accepted.try_recv().ok()
    }
}

/// Breaks the client side of one loopback connection.
#[derive(Clone, Default)]
pub struct FaultHandle {
    state: Arc<Mutex<FaultState>>,
}

#[derive(Default)]
struct FaultState {
    pending: Option<io::ErrorKind>,
    reader: Option<Waker>,
}

impl FaultHandle {
    /// Fails the client's next read, including one already waiting for data.
    pub fn inject_read_error(&self, kind: io::ErrorKind) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.pending = Some(kind);
        if let Some(reader) = state.reader.take() {
            reader.wake();
        }
    }
}

struct FaultyStream {
    inner: DuplexStream,
    fault: FaultHandle,
}

impl AsyncRead for FaultyStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        {
            let mut state = self
                .fault
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(kind) = state.pending.take() {
                return Poll::Ready(Err(io::Error::new(kind, "injected transport fault")));
            }
            state.reader = Some(cx.waker().clone());
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for FaultyStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
