//! Modbus/TCP transport for gateway communication.
//!
//! This module provides a TCP transport that implements the `Transport` trait,
//! using `tokio-modbus` for the underlying Modbus/TCP framing.

use crate::error::{Error, Result};
use crate::transport::{Connector, Transport};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Poll, ready};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_modbus::client::{Context, Reader, Writer, tcp};
use tokio_modbus::slave::{Slave, SlaveContext};

/// Default Modbus/TCP port
pub const DEFAULT_PORT: u16 = 502;

/// Upper bound for silently re-opening a stream after an abandoned request.
/// Kept below the per-operation timeout so the re-dial itself cannot be abandoned.
const REDIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// One open stream: the Modbus client on top of it, and a second handle to
/// the socket for watching it while no request is outstanding.
struct Link {
    ctx: Context,
    stream: Arc<TcpStream>,
}

impl Link {
    async fn open(addr: SocketAddr) -> std::io::Result<Self> {
        let stream = Arc::new(TcpStream::connect(addr).await?);
        let ctx = tcp::attach(SharedStream(Arc::clone(&stream)));
        Ok(Self { ctx, stream })
    }
}

/// Lets `tokio-modbus` drive a socket that is also held elsewhere.
#[derive(Debug)]
struct SharedStream(Arc<TcpStream>);

impl AsyncRead for SharedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        loop {
            ready!(self.0.poll_read_ready(cx))?;
            match self.0.try_read(buf.initialize_unfilled()) {
                Ok(n) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
    }
}

impl AsyncWrite for SharedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        loop {
            ready!(self.0.poll_write_ready(cx))?;
            match self.0.try_write(buf) {
                Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                result => return Poll::Ready(result),
            }
        }
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    // The socket closes when the last handle is dropped.
    fn poll_shutdown(
        self: Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// TCP transport for Modbus/TCP gateways.
///
/// Wraps `tokio-modbus` to implement our `Transport` trait. The unit id of
/// each request is applied right before it is sent.
///
/// If a request future is dropped before its reply arrives (an operation or
/// probe timeout), the reply may still show up on the stream later. The
/// stream is therefore discarded and re-opened before the next request.
pub struct TcpTransport {
    addr: SocketAddr,
    link: Option<Link>,
    in_flight: bool,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("addr", &self.addr)
            .field("open", &self.link.is_some())
            .finish_non_exhaustive()
    }
}

impl TcpTransport {
    /// Connect to a gateway.
    ///
    /// # Arguments
    /// * `host` - Gateway host name or IP address
    /// * `port` - Modbus/TCP port (typically 502)
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let addr = resolve(host, port).await?;
        let link = Link::open(addr).await.map_err(|e| Error::ConnectError {
            addr: addr.to_string(),
            source: Arc::new(e),
        })?;
        tracing::debug!("Opened Modbus/TCP stream to {}", addr);

        Ok(Self {
            addr,
            link: Some(link),
            in_flight: false,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn context(&mut self, unit_id: u8) -> Result<&mut Context> {
        if self.in_flight {
            tracing::debug!(
                "Discarding stream to {} after an abandoned request",
                self.addr
            );
            self.link = None;
            self.in_flight = false;
        }

        let link = match self.link.take() {
            Some(link) => link,
            None => match timeout(REDIAL_TIMEOUT, Link::open(self.addr)).await {
                Ok(Ok(link)) => link,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(Error::ConnectionClosed),
            },
        };

        self.in_flight = true;
        let ctx = &mut self.link.insert(link).ctx;
        ctx.set_slave(Slave(unit_id));
        Ok(ctx)
    }

    fn finish<R>(&mut self, result: std::io::Result<R>) -> Result<R> {
        self.in_flight = false;
        result.map_err(|e| {
            let err = match Error::from(e) {
                err if err.is_connection_lost() => err,
                // tokio-modbus reports a stream that ended mid-request as the
                // last OS error, which is usually `WouldBlock`.
                Error::Io(e) if e.raw_os_error().is_some() || e.kind() == ErrorKind::WouldBlock => {
                    Error::ConnectionClosed
                }
                err => err,
            };
            if err.is_connection_lost() {
                self.link = None;
            }
            err
        })
    }
}

impl Transport for TcpTransport {
    async fn read_holding_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>> {
        let ctx = self.context(unit_id).await?;
        let result = ctx.read_holding_registers(address, quantity).await;
        self.finish(result)
    }

    async fn write_single_register(&mut self, unit_id: u8, address: u16, value: u16) -> Result<()> {
        let ctx = self.context(unit_id).await?;
        let result = ctx.write_single_register(address, value).await;
        self.finish(result)
    }

    async fn closed(&mut self) -> Error {
        let mut buf = [0u8; 64];
        loop {
            let Some(link) = &self.link else {
                return Error::ConnectionClosed;
            };
            let stream = Arc::clone(&link.stream);
            let cause = match stream.peek(&mut buf).await {
                Ok(0) => Error::ConnectionClosed,
                Ok(_) => {
                    // Unsolicited bytes, typically the late reply to an
                    // abandoned request. The stream is replaced before reuse.
                    let _ = stream.try_read(&mut buf);
                    self.in_flight = true;
                    continue;
                }
                Err(e) => e.into(),
            };
            tracing::debug!("Stream to {} closed by peer: {}", self.addr, cause);
            self.link = None;
            self.in_flight = false;
            return cause;
        }
    }
}

/// Opens a [`TcpTransport`] per connect call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(&self, host: &str, port: u16) -> Result<TcpTransport> {
        TcpTransport::connect(host, port).await
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::ConnectError {
            addr: format!("{host}:{port}"),
            source: Arc::new(e),
        })?;
    addrs.next().ok_or_else(|| Error::ConnectError {
        addr: format!("{host}:{port}"),
        source: Arc::new(std::io::Error::new(
            ErrorKind::NotFound,
            "host resolved to no addresses",
        )),
    })
}
