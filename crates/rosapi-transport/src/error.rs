/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The host name could not be resolved to any socket address.
    #[error("failed to resolve {addr}: {source}")]
    Resolve {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been closed locally.
    #[error("transport closed")]
    Closed,
}

impl From<TransportError> for std::io::Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Io(io) => io,
            TransportError::Resolve { source, .. } | TransportError::Connect { source, .. } => {
                source
            }
            TransportError::Closed => {
                std::io::Error::new(std::io::ErrorKind::NotConnected, "transport closed")
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
