use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use rosapi_transport::Transport;
use rosapi_word::{Communicator, WordError, WordStream};
use tracing::trace;

use crate::error::{MessageError, Result};
use crate::message::{ArgumentValue, Message};

/// Kind of a response sentence, taken from its first word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseType {
    /// `!re`: one item of a result.
    Data,
    /// `!done`: the request is complete.
    Final,
    /// `!trap`: the request failed.
    Error,
    /// `!fatal`: the connection is being closed.
    Fatal,
}

impl ResponseType {
    /// Type word as sent on the wire.
    pub fn as_word(self) -> &'static str {
        match self {
            ResponseType::Data => "!re",
            ResponseType::Final => "!done",
            ResponseType::Error => "!trap",
            ResponseType::Fatal => "!fatal",
        }
    }

    /// Parse a type word.
    pub fn from_word(word: &[u8]) -> Result<Self> {
        match word {
            b"!re" => Ok(ResponseType::Data),
            b"!done" => Ok(ResponseType::Final),
            b"!trap" => Ok(ResponseType::Error),
            b"!fatal" => Ok(ResponseType::Fatal),
            other => Err(MessageError::UnknownResponseType(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_word())
    }
}

/// A response sentence received from the device.
#[derive(Debug, Clone)]
pub struct Response {
    response_type: ResponseType,
    message: Message<ArgumentValue>,
    unrecognized: Vec<Bytes>,
}

impl Response {
    /// Build a response locally.
    pub fn new(response_type: ResponseType) -> Self {
        Self {
            response_type,
            message: Message::new(),
            unrecognized: Vec::new(),
        }
    }

    /// Receive the next response sentence.
    ///
    /// Fails with [`WordError::NoData`] when nothing arrives within `timeout`
    /// (`None` waits indefinitely). Once the sentence has started, a stall is
    /// [`WordError::TimedOut`] and the connection is out of sync. With
    /// `as_stream`, every argument value is an independent [`WordStream`].
    pub fn receive<T: Transport>(
        com: &mut Communicator<T>,
        as_stream: bool,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        if !com.is_data_awaiting(timeout)? {
            return Err(WordError::NoData.into());
        }

        let mut type_word = com.get_next_word()?;
        while type_word.is_empty() {
            type_word = com.get_next_word()?;
        }
        let mut response = Self::new(ResponseType::from_word(&type_word)?);

        loop {
            let word = com.get_next_word()?;
            if word.is_empty() {
                break;
            }
            response.absorb_word(word, as_stream);
        }

        trace!(
            response_type = %response.response_type,
            tag = ?response.tag(),
            arguments = response.len(),
            "received response"
        );
        Ok(response)
    }

    fn absorb_word(&mut self, word: Bytes, as_stream: bool) {
        if let Some(rest) = word.strip_prefix(b".tag=") {
            self.message
                .set_tag(Some(String::from_utf8_lossy(rest).into_owned()));
            return;
        }

        if let Some((name_len, value_start)) = split_argument_word(&word) {
            let name = String::from_utf8_lossy(&word[1..1 + name_len]).into_owned();
            let value = word.slice(value_start..);
            let value = if as_stream {
                ArgumentValue::Stream(WordStream::new(value))
            } else {
                ArgumentValue::Inline(value)
            };
            self.message.insert(name, value);
            return;
        }

        self.unrecognized.push(word);
    }

    /// Add an argument. Intended for building responses locally.
    pub fn with_argument(mut self, name: &str, value: impl Into<Bytes>) -> Self {
        self.message
            .insert(name.to_string(), ArgumentValue::Inline(value.into()));
        self
    }

    /// Attach a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.message.set_tag(Some(tag.into()));
        self
    }

    /// Kind of response.
    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    /// Whether this response is of the given type.
    pub fn is(&self, response_type: ResponseType) -> bool {
        self.response_type == response_type
    }

    /// Correlation tag, if any.
    pub fn tag(&self) -> Option<&str> {
        self.message.tag()
    }

    /// Replace the correlation tag.
    pub fn set_tag(&mut self, tag: Option<String>) {
        self.message.set_tag(tag);
    }

    /// Value of the argument `name`.
    pub fn argument(&self, name: &str) -> Option<&ArgumentValue> {
        self.message.argument(name)
    }

    /// Value of the argument `name` as text.
    pub fn argument_str(&self, name: &str) -> Option<Cow<'_, str>> {
        self.argument(name).map(ArgumentValue::to_str_lossy)
    }

    /// Arguments in wire order.
    pub fn arguments(&self) -> impl Iterator<Item = (&str, &ArgumentValue)> {
        self.message.arguments()
    }

    /// Non-empty words that were neither arguments nor the tag, verbatim.
    pub fn unrecognized_words(&self) -> &[Bytes] {
        &self.unrecognized
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.message.len()
    }

    /// Whether the response carries no arguments.
    pub fn is_empty(&self) -> bool {
        self.message.is_empty()
    }
}

/// Split `=name=value`, returning the name length and value offset.
fn split_argument_word(word: &[u8]) -> Option<(usize, usize)> {
    let rest = word.strip_prefix(b"=")?;
    let name_len = rest.iter().position(|&b| b == b'=')?;
    if name_len == 0 {
        return None;
    }
    Some((name_len, name_len + 2))
}
