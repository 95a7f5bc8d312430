use std::io::{Read, Write};
use std::time::Duration;

use bytes::{Buf, BytesMut};

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// In-memory transport with a scripted peer.
///
/// Bytes queued with [`MemoryTransport::push_incoming`] are handed out by
/// `read`; everything written is captured for inspection. An empty incoming
/// queue reads as end-of-stream and reports no data awaiting, so a session
/// driven past its script fails fast instead of hanging.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    incoming: BytesMut,
    written: Vec<u8>,
    closed: bool,
}

impl MemoryTransport {
    /// Create a transport whose peer will send `incoming`.
    pub fn new(incoming: impl AsRef<[u8]>) -> Self {
        Self {
            incoming: BytesMut::from(incoming.as_ref()),
            written: Vec::new(),
            closed: false,
        }
    }

    /// Queue more bytes from the peer.
    pub fn push_incoming(&mut self, bytes: impl AsRef<[u8]>) {
        self.incoming.extend_from_slice(bytes.as_ref());
    }

    /// Bytes not yet read.
    pub fn remaining_incoming(&self) -> usize {
        self.incoming.len()
    }

    /// Everything written so far.
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Take and clear the captured output.
    pub fn take_written(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.written)
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Read for MemoryTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(TransportError::Closed.into());
        }
        let n = buf.len().min(self.incoming.len());
        buf[..n].copy_from_slice(&self.incoming[..n]);
        self.incoming.advance(n);
        Ok(n)
    }
}

impl Write for MemoryTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(TransportError::Closed.into());
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn is_data_awaiting(&mut self, _timeout: Option<Duration>) -> Result<bool> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        Ok(!self.incoming.is_empty())
    }

    fn is_accepting_data(&self) -> bool {
        !self.closed
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "memory"
    }
}
