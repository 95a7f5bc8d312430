use rosapi_message::MessageError;
use rosapi_transport::TransportError;
use rosapi_word::WordError;

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Word-level error.
    #[error("word error: {0}")]
    Word(#[from] WordError),

    /// Sentence-level error.
    #[error("message error: {0}")]
    Message(#[from] MessageError),

    /// Asynchronous requests must carry a tag.
    #[error("asynchronous requests must be tagged")]
    TagRequired,

    /// Another active request already uses this tag.
    #[error("tag {0:?} is already in use by an active request")]
    TagNotUnique(String),

    /// The tag is neither buffered nor tracked by a callback.
    #[error("no such request {0:?}, or it already finished")]
    UnknownRequest(String),

    /// Cancellation targeted a tag that is not active.
    #[error("cancel failed: no active request {0:?}")]
    CancelFailed(String),

    /// The device rejected the username or password.
    #[error("invalid credentials for user {0:?}")]
    InvalidCredentials(String),

    /// The login challenge was not valid hex.
    #[error("malformed login challenge: {0}")]
    MalformedChallenge(#[from] hex::FromHexError),

    /// The endpoint does not speak the API protocol.
    #[error("service incompatible: {0}")]
    ServiceIncompatible(#[source] Box<SessionError>),
}

impl SessionError {
    /// Whether a receive found nothing to read within its timeout.
    pub fn is_no_data(&self) -> bool {
        match self {
            SessionError::Word(WordError::NoData) => true,
            SessionError::Message(err) => err.is_no_data(),
            _ => false,
        }
    }

    /// Whether this is a local bookkeeping error rather than an I/O failure.
    pub fn is_flow_error(&self) -> bool {
        matches!(
            self,
            SessionError::TagRequired
                | SessionError::TagNotUnique(_)
                | SessionError::UnknownRequest(_)
                | SessionError::CancelFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
