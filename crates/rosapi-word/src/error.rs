use bytes::Bytes;

/// Errors that can occur while encoding, sending or receiving words.
#[derive(Debug, thiserror::Error)]
pub enum WordError {
    /// A negative length was passed to the length encoder.
    #[error("invalid word length {0} (must not be negative)")]
    InvalidLength(i64),

    /// The length does not fit the 35-bit encoding scheme.
    #[error("word length {0:#x} is beyond the encoding scheme (max 0x7FFFFFFFF)")]
    LengthBeyondScheme(i64),

    /// The length fits the scheme but exceeds the configured word ceiling.
    #[error("word length {length:#x} is not supported (max {max:#x})")]
    UnsupportedLength { length: u64, max: u64 },

    /// The first byte of a length prefix uses the reserved `11111xxx` pattern.
    #[error("unknown control byte {0:#04x} in length prefix")]
    UnsupportedControlByte(u8),

    /// Nothing was received within the time limit.
    #[error("no data within the time limit")]
    NoData,

    /// The transport signalled end-of-stream before a word started.
    #[error("connection closed")]
    ConnectionClosed,

    /// The transport signalled end-of-stream in the middle of a word.
    #[error("connection closed after {} of {expected} bytes", fragment.len())]
    Incomplete { expected: u64, fragment: Bytes },

    /// The receive timeout elapsed in the middle of a word.
    #[error("timed out after {} of {expected} bytes", fragment.len())]
    TimedOut { expected: u64, fragment: Bytes },

    /// The send timeout elapsed before the word was fully written.
    #[error("send timed out after {sent} bytes")]
    SendTimedOut { sent: usize },

    /// The transport no longer accepts writes.
    #[error("transport is not accepting data")]
    NotAcceptingData,

    /// A stream argument could not be measured or rewound.
    #[error("stream must be seekable: {0}")]
    UnseekableStream(std::io::Error),

    /// An I/O error occurred while reading or writing words.
    #[error("word I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport reported an error outside of plain I/O.
    #[error("transport error: {0}")]
    Transport(#[from] rosapi_transport::TransportError),
}

pub type Result<T> = std::result::Result<T, WordError>;
