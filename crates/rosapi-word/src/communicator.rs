use std::borrow::Cow;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::time::Duration;

use bytes::Bytes;
use rosapi_transport::Transport;
use tracing::trace;

use crate::charset::{transcode, transcoded_len, Charset};
use crate::codec::{verify_length_support, WordConfig};
use crate::error::{Result, WordError};
use crate::reader::{read_word, WordStream};
use crate::writer::{seekable_stream_length, write_word, write_word_from_stream};

/// Word-level I/O over a [`Transport`].
///
/// Applies the configured charset conversion at the word boundary and
/// enforces the configured word ceiling in both directions.
pub struct Communicator<T> {
    transport: T,
    config: WordConfig,
}

impl<T: Transport> Communicator<T> {
    /// Create a communicator with default configuration (no transcoding).
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, WordConfig::default())
    }

    /// Create a communicator with explicit configuration.
    pub fn with_config(transport: T, config: WordConfig) -> Self {
        Self { transport, config }
    }

    /// Send one word. Returns bytes written, prefix included.
    pub fn send_word(&mut self, word: impl AsRef<[u8]>) -> Result<usize> {
        self.ensure_accepting()?;
        let word = self.encode_outgoing(word.as_ref());
        let written = write_word(&mut self.transport, &word, self.config.max_word_length)?;
        trace!(len = word.len(), "sent word");
        Ok(written)
    }

    /// Send one word made of `prefix` followed by the rest of `stream`.
    ///
    /// When both charsets are set the stream is transcoded before it is
    /// sent, and the announced length is that of the transcoded bytes.
    /// Nothing is written and the stream is left where it was if the word
    /// would exceed the ceiling.
    pub fn send_word_from_stream<S>(&mut self, prefix: impl AsRef<[u8]>, stream: &mut S) -> Result<usize>
    where
        S: Read + Seek + ?Sized,
    {
        self.ensure_accepting()?;
        let max = self.config.max_word_length;

        let written = match self.config.outgoing_charsets() {
            Some((from, to)) => {
                verify_length_support(self.stream_word_length(prefix.as_ref(), stream)?, max)?;
                let prefix = self.encode_outgoing(prefix.as_ref()).into_owned();
                let start = stream.stream_position().map_err(WordError::UnseekableStream)?;
                let mut raw = Vec::new();
                if let Err(err) = stream.read_to_end(&mut raw) {
                    stream
                        .seek(SeekFrom::Start(start))
                        .map_err(WordError::UnseekableStream)?;
                    return Err(err.into());
                }
                let mut converted = Cursor::new(transcode(from, to, &raw));
                write_word_from_stream(&mut self.transport, &prefix, &mut converted, max)?
            }
            None => write_word_from_stream(&mut self.transport, prefix.as_ref(), stream, max)?,
        };
        trace!(written, "sent stream word");
        Ok(written)
    }

    /// Length of the word `send_word_from_stream` would send, prefix included.
    ///
    /// The stream is left at its current position. With transcoding the
    /// stream is read through once in chunks, stopping early once the word
    /// is known to exceed the ceiling.
    pub fn stream_word_length<S>(&self, prefix: &[u8], stream: &mut S) -> Result<u64>
    where
        S: Read + Seek + ?Sized,
    {
        let prefix_len = self.encode_outgoing(prefix).len() as u64;
        let Some((from, to)) = self.config.outgoing_charsets() else {
            return Ok(prefix_len + seekable_stream_length(stream)?);
        };

        let start = stream.stream_position().map_err(WordError::UnseekableStream)?;
        let limit = self.config.max_word_length.saturating_sub(prefix_len);
        let counted = transcoded_len(from, to, stream, limit);
        stream
            .seek(SeekFrom::Start(start))
            .map_err(WordError::UnseekableStream)?;
        Ok(prefix_len + counted?)
    }

    /// Receive the next word, transcoded to the local charset.
    pub fn get_next_word(&mut self) -> Result<Bytes> {
        let word = read_word(&mut self.transport, self.config.max_word_length)?;
        trace!(len = word.len(), "received word");
        Ok(match self.config.incoming_charsets() {
            Some((from, to)) => Bytes::from(transcode(from, to, &word)),
            None => word,
        })
    }

    /// Receive the next word as a seekable stream positioned at its start.
    pub fn get_next_word_as_stream(&mut self) -> Result<WordStream> {
        self.get_next_word().map(Cursor::new)
    }

    /// Whether data can be read within `timeout` (`None` waits indefinitely).
    pub fn is_data_awaiting(&mut self, timeout: Option<Duration>) -> Result<bool> {
        Ok(self.transport.is_data_awaiting(timeout)?)
    }

    /// Whether the transport still accepts writes.
    pub fn is_accepting_data(&self) -> bool {
        self.transport.is_accepting_data()
    }

    /// Close the underlying transport.
    pub fn close(&mut self) -> Result<()> {
        Ok(self.transport.close()?)
    }

    /// Convert text from the local to the remote charset, when both are set.
    pub fn encode_outgoing<'a>(&self, bytes: &'a [u8]) -> Cow<'a, [u8]> {
        match self.config.outgoing_charsets() {
            Some((from, to)) => Cow::Owned(transcode(from, to, bytes)),
            None => Cow::Borrowed(bytes),
        }
    }

    /// Charset the device uses.
    pub fn remote_charset(&self) -> Option<Charset> {
        self.config.remote_charset
    }

    /// Charset the application uses.
    pub fn local_charset(&self) -> Option<Charset> {
        self.config.local_charset
    }

    /// Change the device charset. `None` disables transcoding.
    pub fn set_remote_charset(&mut self, charset: Option<Charset>) {
        self.config.remote_charset = charset;
    }

    /// Change the application charset. `None` disables transcoding.
    pub fn set_local_charset(&mut self, charset: Option<Charset>) {
        self.config.local_charset = charset;
    }

    /// Current word configuration.
    pub fn config(&self) -> &WordConfig {
        &self.config
    }

    /// Borrow the underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the underlying transport.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the communicator and return the transport.
    pub fn into_inner(self) -> T {
        self.transport
    }

    fn ensure_accepting(&self) -> Result<()> {
        if !self.transport.is_accepting_data() {
            return Err(WordError::NotAcceptingData);
        }
        Ok(())
    }
}

impl<T> std::fmt::Debug for Communicator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Communicator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
