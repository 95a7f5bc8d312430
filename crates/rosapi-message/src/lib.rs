//! Sentence model for the RouterOS API protocol.
//!
//! A [`Request`] is a command path with optional tag, arguments and
//! [`Query`]. A [`Response`] is a typed sentence read back from the
//! device. Synchronous calls return a [`ResponseCollection`].

pub mod collection;
pub mod error;
pub mod message;
pub mod query;
pub mod request;
pub mod response;

pub use collection::{ResponseCollection, ResponseCursor};
pub use error::{MessageError, Result};
pub use message::{sanitize_argument_name, ArgumentValue, Message, RequestValue, SeekableStream};
pub use query::{Query, QueryOp};
pub use request::{normalize_command, Request};
pub use response::{Response, ResponseType};
