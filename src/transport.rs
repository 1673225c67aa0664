//! TCP transport to the control board.
//!
//! Opens the socket, turns on TCP keep-alive so a board that silently drops
//! off the network is noticed, and hands back a buffered byte channel. The
//! frame layer only needs `AsyncBufRead + AsyncWrite`, so tests substitute an
//! in-memory stream for the socket.

use crate::error::{MuxError, MuxResult};
use socket2::{SockRef, Socket, TcpKeepalive};
use std::net::Shutdown;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Default time allowed for the TCP connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Byte channel the board is reached through.
///
/// Implemented for `TcpStream` and for in-memory streams such as
/// `tokio::io::DuplexStream`.
pub trait BoardIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> BoardIo for T {}

/// Type-erased board channel.
pub type DynBoardIo = Box<dyn BoardIo>;

/// TCP keep-alive probing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    /// Idle time before the first probe.
    pub idle: Duration,
    /// Time between unanswered probes.
    pub interval: Duration,
    /// Unanswered probes before the connection is dropped.
    pub retries: u32,
}

impl Default for Keepalive {
    /// 1 s idle, 3 s interval, 5 probes: a dead board is noticed after ~15 s.
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(1),
            interval: Duration::from_secs(3),
            retries: 5,
        }
    }
}

/// Options used when opening the transport.
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    /// Time allowed for the TCP connect.
    pub connect_timeout: Duration,
    /// Keep-alive probing once connected.
    pub keepalive: Keepalive,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keepalive: Keepalive::default(),
        }
    }
}

/// Split an `address:port` string.
pub fn parse_address(address: &str) -> MuxResult<(String, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| MuxError::InvalidAddress(address.to_string()))?;
    if host.is_empty() {
        return Err(MuxError::InvalidAddress(address.to_string()));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| MuxError::InvalidAddress(address.to_string()))?;
    Ok((host.to_string(), port))
}

/// Buffered connection to the board.
///
/// Owned by one session. [`Connection::close`] may be called any number of
/// times; after the first call the channel is gone and reads and writes fail.
pub struct Connection {
    channel: Option<BufReader<DynBoardIo>>,
    // Second handle on the TCP socket; `None` for in-memory channels.
    socket: Option<Socket>,
    peer: String,
}

impl Connection {
    /// Connect to `address` (`host:port`) and configure keep-alive.
    pub async fn connect(address: &str, options: &TransportOptions) -> MuxResult<Self> {
        let (host, port) = parse_address(address)?;

        let stream = timeout(options.connect_timeout, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| MuxError::ConnectTimeout(address.to_string()))?
            .map_err(|source| MuxError::Connect {
                address: address.to_string(),
                source,
            })?;

        stream.set_nodelay(true)?;
        if let Err(e) = configure_keepalive(&stream, &options.keepalive) {
            tracing::warn!(error = %e, "Failed to enable TCP keep-alive on board connection");
        }

        let socket = match SockRef::from(&stream).try_clone() {
            Ok(socket) => Some(socket),
            Err(e) => {
                tracing::debug!(error = %e, "Could not duplicate board socket handle");
                None
            }
        };

        tracing::info!(address = %address, "Connected to control board");
        let mut connection = Self::from_io(Box::new(stream), address);
        connection.socket = socket;
        Ok(connection)
    }

    /// Wrap an already-open byte channel.
    pub fn from_io(io: DynBoardIo, peer: impl Into<String>) -> Self {
        Self {
            channel: Some(BufReader::new(io)),
            socket: None,
            peer: peer.into(),
        }
    }

    /// Address the connection was opened to.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Whether [`Connection::close`] has not run yet.
    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Buffered channel, or `None` once closed.
    pub fn channel(&mut self) -> Option<&mut BufReader<DynBoardIo>> {
        self.channel.as_mut()
    }

    /// Shut both directions down and release the channel. Errors are ignored.
    pub async fn close(&mut self) {
        let Some(mut channel) = self.channel.take() else {
            return;
        };
        let result = match self.socket.take() {
            Some(socket) => socket.shutdown(Shutdown::Both),
            None => channel.get_mut().shutdown().await,
        };
        if let Err(e) = result {
            tracing::debug!(peer = %self.peer, error = %e, "Shutdown of board connection failed");
        }
        drop(channel);
        tracing::info!(peer = %self.peer, "Closed board connection");
    }
}

fn configure_keepalive(stream: &TcpStream, keepalive: &Keepalive) -> std::io::Result<()> {
    // macOS only exposes a single keep-alive timer; use the probe interval.
    #[cfg(target_os = "macos")]
    let params = TcpKeepalive::new().with_time(keepalive.interval);
    #[cfg(not(target_os = "macos"))]
    let params = TcpKeepalive::new().with_time(keepalive.idle);

    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    let params = params
        .with_interval(keepalive.interval)
        .with_retries(keepalive.retries);

    SockRef::from(stream).set_tcp_keepalive(&params)
}
