// ABOUTME: TimeoutTransport - a byte-stream connection (plain TCP or TLS) with
// ABOUTME: a per-read/per-write deadline enforced on every I/O operation

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::connection::error::Error;

/// Default per-read/per-write deadline before the handshake negotiates a
/// heartbeat interval (§4.1).
pub const DEFAULT_READ_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Either a plain TCP socket or a TLS session over one. The rest of the
/// crate only ever sees the [`AsyncRead`]/[`AsyncWrite`] surface, so adding
/// another transport kind later does not touch the reader/writer/heartbeat
/// code paths.
pub enum RawStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for RawStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            RawStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            RawStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for RawStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            RawStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            RawStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            RawStream::Plain(s) => Pin::new(s).poll_flush(cx),
            RawStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            RawStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            RawStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Caller-supplied TLS configuration. Mirrors a `rustls::ClientConfig` plus
/// an optional server name override; when absent the core fills it in from
/// the connection URI's host, never mutating the caller's value (§4.1).
#[derive(Clone)]
pub struct TlsConfig {
    pub client_config: Arc<rustls::ClientConfig>,
    pub server_name: Option<String>,
}

impl TlsConfig {
    /// Returns a clone of `self` with `server_name` filled in from `host` if
    /// it was not already set.
    pub fn with_fallback_server_name(&self, host: &str) -> Self {
        if self.server_name.is_some() {
            self.clone()
        } else {
            TlsConfig {
                client_config: self.client_config.clone(),
                server_name: Some(host.to_string()),
            }
        }
    }
}

/// A shared, mutable read deadline. The Heartbeater extends this to
/// `3 * interval` after every successfully read frame (§4.7); until the
/// first `tune` it stays at whatever `connect_timeout` was passed to
/// [`connect`].
#[derive(Debug)]
pub struct ReadDeadline(AtomicU64);

impl ReadDeadline {
    pub fn new(initial: Duration) -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(initial.as_millis() as u64)))
    }

    pub fn get(&self) -> Duration {
        Duration::from_millis(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, d: Duration) {
        self.0.store(d.as_millis() as u64, Ordering::Relaxed);
    }
}

/// Owns the inbound half of a byte stream. Exclusively used by the reader
/// task (§5); every read is bounded by the shared [`ReadDeadline`]. Generic
/// over the half type so tests can drive it with an in-memory duplex stream
/// instead of a real socket.
pub struct TimeoutReader<R> {
    inner: R,
    deadline: Arc<ReadDeadline>,
}

impl<R: AsyncRead + Unpin> TimeoutReader<R> {
    pub fn new(inner: R, deadline: Arc<ReadDeadline>) -> Self {
        Self { inner, deadline }
    }

    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        tokio::time::timeout(self.deadline.get(), self.inner.read_exact(buf)).await??;
        Ok(())
    }

    /// Reads whatever is available into `buf`, returning the byte count (0
    /// on EOF), bounded by the current read deadline.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let n = tokio::time::timeout(self.deadline.get(), self.inner.read(buf)).await??;
        Ok(n)
    }
}

/// Owns the outbound half of a byte stream, meant to be driven only from
/// behind the exclusive write lock described in §4.2. The write deadline is
/// fixed at 30 s: only the read side is extended by the negotiated
/// heartbeat interval.
pub struct TimeoutWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> TimeoutWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), Error> {
        tokio::time::timeout(DEFAULT_READ_WRITE_TIMEOUT, self.inner.write_all(buf)).await??;
        tokio::time::timeout(DEFAULT_READ_WRITE_TIMEOUT, self.inner.flush()).await??;
        Ok(())
    }

    /// Shuts down the write half, used once during connection teardown
    /// (§4.10 step 4).
    pub async fn close(&mut self) -> Result<(), Error> {
        tokio::time::timeout(DEFAULT_READ_WRITE_TIMEOUT, self.inner.shutdown()).await??;
        Ok(())
    }
}

pub type TransportReader = TimeoutReader<ReadHalf<RawStream>>;
pub type TransportWriter = TimeoutWriter<WriteHalf<RawStream>>;

/// Dials a plain TCP connection and, optionally, negotiates TLS over it.
/// Returns the split read/write halves plus the shared read deadline so the
/// caller (the Connection Supervisor) can construct the reader/writer tasks.
pub async fn connect(
    addr: impl tokio::net::ToSocketAddrs,
    host_for_tls: &str,
    tls: Option<&TlsConfig>,
    connect_timeout: Duration,
) -> Result<(TransportReader, TransportWriter, Arc<ReadDeadline>), Error> {
    let tcp = tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await??;
    tcp.set_nodelay(true).ok();

    let raw = match tls {
        Some(cfg) => {
            let resolved = cfg.with_fallback_server_name(host_for_tls);
            let connector = TlsConnector::from(resolved.client_config.clone());
            let server_name: ServerName<'static> =
                ServerName::try_from(resolved.server_name.clone().unwrap_or_default())
                    .map_err(|_| Error::protocol("invalid TLS server name"))?;
            let tls_stream =
                tokio::time::timeout(connect_timeout, connector.connect(server_name, tcp)).await??;
            RawStream::Tls(Box::new(tls_stream))
        }
        None => RawStream::Plain(tcp),
    };

    let deadline = ReadDeadline::new(connect_timeout);
    let (read_half, write_half) = tokio::io::split(raw);
    Ok((
        TimeoutReader::new(read_half, deadline.clone()),
        TimeoutWriter::new(write_half),
        deadline,
    ))
}

/// Opens a loopback TCP pair for tests that need a genuine `RawStream`
/// (rather than an in-memory duplex) because they exercise the concrete
/// `TransportReader`/`TransportWriter` aliases end to end.
#[cfg(test)]
pub(crate) async fn test_loopback_pair() -> (TcpStream, TcpStream) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (accepted, connected) = tokio::join!(listener.accept(), TcpStream::connect(addr));
    let (server, _) = accepted.unwrap();
    let client = connected.unwrap();
    (server, client)
}
