use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// A connected byte stream the word layer can talk through.
///
/// Implementors provide blocking `Read`/`Write` plus the readiness queries
/// the session layer needs to avoid blocking on an idle connection.
pub trait Transport: Read + Write + Send {
    /// Wait until at least one byte can be read without blocking.
    ///
    /// `None` waits indefinitely. Returns `Ok(false)` when the timeout
    /// elapsed with nothing to read.
    fn is_data_awaiting(&mut self, timeout: Option<Duration>) -> Result<bool>;

    /// Whether the transport is still open for writing.
    fn is_accepting_data(&self) -> bool;

    /// Close the transport. Closing twice is not an error.
    fn close(&mut self) -> Result<()>;

    /// Human-readable transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn is_data_awaiting(&mut self, timeout: Option<Duration>) -> Result<bool> {
        (**self).is_data_awaiting(timeout)
    }

    fn is_accepting_data(&self) -> bool {
        (**self).is_accepting_data()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn transport_name(&self) -> &'static str {
        (**self).transport_name()
    }
}
