use std::borrow::Cow;
use std::fmt;
use std::io::{Read, Seek};

use bytes::{BufMut, Bytes, BytesMut};
use rosapi_transport::Transport;
use rosapi_word::{verify_length_support, Communicator, WordStream};

use crate::error::{MessageError, Result};

/// Check that `name` can be used as an argument name.
///
/// Names travel inside `=name=value` words, so they must be non-empty and
/// may contain neither `=` nor whitespace.
pub fn sanitize_argument_name(name: &str) -> Result<&str> {
    if name.is_empty() || name.chars().any(|c| c == '=' || c.is_whitespace()) {
        return Err(MessageError::InvalidArgumentName(name.to_string()));
    }
    Ok(name)
}

/// Arguments and tag shared by requests and responses.
///
/// Arguments keep insertion order; setting an existing name replaces its
/// value in place.
#[derive(Debug, Clone)]
pub struct Message<V> {
    tag: Option<String>,
    arguments: Vec<(String, V)>,
}

impl<V> Message<V> {
    /// Empty message without tag.
    pub fn new() -> Self {
        Self {
            tag: None,
            arguments: Vec::new(),
        }
    }

    /// Correlation tag, if any.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Replace the correlation tag.
    pub fn set_tag(&mut self, tag: Option<String>) {
        self.tag = tag;
    }

    /// Value of the argument `name`.
    pub fn argument(&self, name: &str) -> Option<&V> {
        self.arguments
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    /// Set an argument after validating its name.
    pub fn set_argument(&mut self, name: &str, value: V) -> Result<()> {
        sanitize_argument_name(name)?;
        self.insert(name.to_string(), value);
        Ok(())
    }

    /// Remove an argument, returning its value.
    pub fn remove_argument(&mut self, name: &str) -> Option<V> {
        let index = self.arguments.iter().position(|(existing, _)| existing == name)?;
        Some(self.arguments.remove(index).1)
    }

    /// Arguments in insertion order.
    pub fn arguments(&self) -> impl Iterator<Item = (&str, &V)> {
        self.arguments.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub(crate) fn arguments_mut(&mut self) -> impl Iterator<Item = (&str, &mut V)> {
        self.arguments
            .iter_mut()
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.arguments.len()
    }

    /// Whether there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    /// Insert without name validation. Used for names received from the wire.
    pub(crate) fn insert(&mut self, name: String, value: V) {
        match self.arguments.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.arguments.push((name, value)),
        }
    }
}

impl<V> Default for Message<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Value of a received argument.
#[derive(Debug, Clone)]
pub enum ArgumentValue {
    /// Value held in memory.
    Inline(Bytes),
    /// Value exposed as an independent stream positioned at its start.
    Stream(WordStream),
}

impl ArgumentValue {
    /// Raw bytes of the value, regardless of representation.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ArgumentValue::Inline(bytes) => bytes,
            ArgumentValue::Stream(stream) => stream.get_ref(),
        }
    }

    /// Value as text, replacing invalid UTF-8.
    pub fn to_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    /// Whether the value is stream-backed.
    pub fn is_stream(&self) -> bool {
        matches!(self, ArgumentValue::Stream(_))
    }
}

/// A readable, seekable source for stream-valued request arguments.
pub trait SeekableStream: Read + Seek + Send {}

impl<S: Read + Seek + Send> SeekableStream for S {}

/// Value of an argument or query predicate about to be sent.
pub enum RequestValue {
    /// Value held in memory.
    Inline(Bytes),
    /// Value copied from a stream, starting at its current position.
    Stream(Box<dyn SeekableStream>),
}

impl RequestValue {
    /// Wrap a seekable stream.
    pub fn stream(stream: impl SeekableStream + 'static) -> Self {
        RequestValue::Stream(Box::new(stream))
    }

    /// Inline bytes, or `None` for stream values.
    pub fn as_inline(&self) -> Option<&[u8]> {
        match self {
            RequestValue::Inline(bytes) => Some(bytes),
            RequestValue::Stream(_) => None,
        }
    }
}

impl fmt::Debug for RequestValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestValue::Inline(bytes) => f.debug_tuple("Inline").field(bytes).finish(),
            RequestValue::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<&str> for RequestValue {
    fn from(value: &str) -> Self {
        RequestValue::Inline(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for RequestValue {
    fn from(value: String) -> Self {
        RequestValue::Inline(Bytes::from(value))
    }
}

impl From<&[u8]> for RequestValue {
    fn from(value: &[u8]) -> Self {
        RequestValue::Inline(Bytes::copy_from_slice(value))
    }
}

impl From<Vec<u8>> for RequestValue {
    fn from(value: Vec<u8>) -> Self {
        RequestValue::Inline(Bytes::from(value))
    }
}

impl From<Bytes> for RequestValue {
    fn from(value: Bytes) -> Self {
        RequestValue::Inline(value)
    }
}

/// Send `prefix` followed by `value` as one word.
pub(crate) fn send_value<T: Transport>(
    com: &mut Communicator<T>,
    prefix: &str,
    value: &mut RequestValue,
) -> Result<usize> {
    let sent = match value {
        RequestValue::Inline(bytes) => {
            let mut word = BytesMut::with_capacity(prefix.len() + bytes.len());
            word.put_slice(prefix.as_bytes());
            word.put_slice(bytes);
            com.send_word(&word)?
        }
        RequestValue::Stream(stream) => com.send_word_from_stream(prefix, stream.as_mut())?,
    };
    Ok(sent)
}

/// Check that `prefix` followed by `value` fits the word ceiling.
///
/// Stream values are measured as they will be sent, after transcoding,
/// and left at their current position.
pub(crate) fn verify_value<T: Transport>(
    com: &Communicator<T>,
    prefix: &str,
    value: &mut RequestValue,
) -> Result<()> {
    let max = com.config().max_word_length;
    let length = match value {
        RequestValue::Inline(bytes) => {
            com.encode_outgoing(prefix.as_bytes()).len() as u64
                + com.encode_outgoing(bytes).len() as u64
        }
        RequestValue::Stream(stream) => com.stream_word_length(prefix.as_bytes(), stream.as_mut())?,
    };
    verify_length_support(length, max)?;
    Ok(())
}

/// Check that a plain word fits the word ceiling.
pub(crate) fn verify_word<T: Transport>(com: &Communicator<T>, word: &str) -> Result<()> {
    let length = com.encode_outgoing(word.as_bytes()).len() as u64;
    verify_length_support(length, com.config().max_word_length)?;
    Ok(())
}
