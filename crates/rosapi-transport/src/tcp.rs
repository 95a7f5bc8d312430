use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// TCP transport to an API service.
///
/// The configured timeout applies both to connection establishment and to
/// every blocking receive. `None` blocks indefinitely.
pub struct TcpTransport {
    stream: TcpStream,
    peer: SocketAddr,
    timeout: Option<Duration>,
    closed: bool,
}

impl TcpTransport {
    /// Default port of the plain-text API service.
    pub const DEFAULT_PORT: u16 = 8728;
    /// Default port of the TLS API service.
    pub const DEFAULT_TLS_PORT: u16 = 8729;

    /// Resolve `host` and connect to the first address that accepts.
    pub fn connect(host: &str, port: u16, timeout: Option<Duration>) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let candidates: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Resolve {
                addr: addr.clone(),
                source,
            })?
            .collect();

        let mut last_err = std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "host resolved to no addresses",
        );
        for candidate in candidates {
            let attempt = match timeout {
                Some(timeout) => TcpStream::connect_timeout(&candidate, timeout),
                None => TcpStream::connect(candidate),
            };
            match attempt {
                Ok(stream) => return Self::from_stream(stream, timeout),
                Err(err) => {
                    debug!(%candidate, error = %err, "connect attempt failed");
                    last_err = err;
                }
            }
        }

        Err(TransportError::Connect {
            addr,
            source: last_err,
        })
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: TcpStream, timeout: Option<Duration>) -> Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;
        let peer = stream.peer_addr()?;
        debug!(%peer, ?timeout, "connected to api service");
        Ok(Self {
            stream,
            peer,
            timeout,
            closed: false,
        })
    }

    /// Address of the connected service.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Receive timeout applied to blocking reads.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Change the receive timeout.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout)?;
        self.stream.set_write_timeout(timeout)?;
        self.timeout = timeout;
        Ok(())
    }

    fn ensure_open(&self) -> std::io::Result<()> {
        if self.closed {
            return Err(TransportError::Closed.into());
        }
        Ok(())
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.ensure_open()?;
        self.stream.read(buf)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.ensure_open()?;
        self.stream.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.ensure_open()?;
        self.stream.flush()
    }
}

impl Transport for TcpTransport {
    fn is_data_awaiting(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        poll_readable(&self.stream, timeout).map_err(Into::into)
    }

    fn is_accepting_data(&self) -> bool {
        !self.closed
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!(peer = %self.peer, "closing api connection");
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("peer", &self.peer)
            .field("timeout", &self.timeout)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(unix)]
fn poll_readable(stream: &TcpStream, timeout: Option<Duration>) -> std::io::Result<bool> {
    use std::os::fd::AsRawFd;

    let timeout_ms: libc::c_int = match timeout {
        None => -1,
        Some(timeout) => timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
    };
    let mut fds = libc::pollfd {
        fd: stream.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };

    loop {
        // SAFETY: `fds` is a single valid, writable pollfd and `nfds` is 1.
        // The descriptor stays open for the duration of the call because
        // `stream` is borrowed.
        let rc = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(rc > 0);
    }
}

#[cfg(not(unix))]
fn poll_readable(stream: &TcpStream, timeout: Option<Duration>) -> std::io::Result<bool> {
    let previous = stream.read_timeout()?;
    let mut probe = [0u8; 1];
    let outcome = match timeout {
        Some(timeout) if timeout.is_zero() => {
            stream.set_nonblocking(true)?;
            let peeked = stream.peek(&mut probe);
            stream.set_nonblocking(false)?;
            peeked
        }
        other => {
            stream.set_read_timeout(other)?;
            let peeked = stream.peek(&mut probe);
            stream.set_read_timeout(previous)?;
            peeked
        }
    };
    match outcome {
        Ok(_) => Ok(true),
        Err(err)
            if err.kind() == std::io::ErrorKind::WouldBlock
                || err.kind() == std::io::ErrorKind::TimedOut =>
        {
            Ok(false)
        }
        Err(err) => Err(err),
    }
}
