//! Word framing for the RouterOS API protocol.
//!
//! Every API sentence is a sequence of words, each preceded by a
//! variable-width length prefix (1 to 5 bytes). A zero-length word ends
//! a sentence.
//!
//! - [`codec`] encodes and decodes the length prefix.
//! - [`reader`] and [`writer`] move whole words over blocking streams.
//! - [`Communicator`] ties both to a [`rosapi_transport::Transport`] and
//!   applies charset transcoding at the word boundary.

pub mod charset;
pub mod codec;
pub mod communicator;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

#[cfg(feature = "async")]
pub use async_codec::WordCodec;
pub use charset::{transcode, transcoded_len, Charset, UnknownCharset};
pub use codec::{
    decode_length, encode_length, peek_length, verify_length_support, WordConfig,
    DEFAULT_MAX_WORD_LENGTH, MAX_PREFIX_SIZE, MAX_SCHEME_LENGTH,
};
pub use communicator::Communicator;
pub use error::{Result, WordError};
pub use reader::{read_word, read_word_as_stream, WordStream};
pub use writer::{seekable_stream_length, write_word, write_word_from_stream};
