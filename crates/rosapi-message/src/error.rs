use rosapi_word::WordError;

/// Errors raised while building, sending or receiving API sentences.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// Argument names must be non-empty and contain neither `=` nor whitespace.
    #[error("invalid argument name {0:?}")]
    InvalidArgumentName(String),

    /// Commands must be absolute paths.
    #[error("command {0:?} must be absolute (start with '/')")]
    AbsoluteCommandRequired(String),

    /// A `..` segment had nothing left to navigate out of.
    #[error("command {0:?} navigates above the root menu")]
    UnresolvableCommand(String),

    /// The normalized command is not a single whitespace-free path.
    #[error("invalid command {0:?}")]
    InvalidCommand(String),

    /// A query operator code outside the known set.
    #[error("unknown query action {0:?}")]
    UnknownQueryAction(String),

    /// The first word of a response is not a known response type.
    #[error("unknown response type {0:?}")]
    UnknownResponseType(String),

    /// Word-level failure while sending or receiving.
    #[error(transparent)]
    Word(#[from] WordError),
}

impl MessageError {
    /// Whether this error came from a receive that found nothing to read.
    pub fn is_no_data(&self) -> bool {
        matches!(self, MessageError::Word(WordError::NoData))
    }
}

pub type Result<T> = std::result::Result<T, MessageError>;
