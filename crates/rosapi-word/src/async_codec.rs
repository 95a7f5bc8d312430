use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{encode_length, peek_length, verify_length_support, DEFAULT_MAX_WORD_LENGTH};
use crate::error::WordError;

/// Word framing for `tokio_util::codec::Framed`.
///
/// Charset transcoding is left to the caller; this codec only frames.
#[derive(Debug, Clone, Copy)]
pub struct WordCodec {
    max_word_length: u64,
}

impl WordCodec {
    /// Codec with the default word ceiling.
    pub fn new() -> Self {
        Self::with_max_word_length(DEFAULT_MAX_WORD_LENGTH)
    }

    /// Codec with an explicit word ceiling.
    pub fn with_max_word_length(max_word_length: u64) -> Self {
        Self { max_word_length }
    }
}

impl Default for WordCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for WordCodec {
    type Item = Bytes;
    type Error = WordError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, WordError> {
        let Some((length, prefix)) = peek_length(src)? else {
            return Ok(None);
        };
        verify_length_support(length, self.max_word_length)?;

        let total = prefix + length as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(prefix);
        Ok(Some(src.split_to(length as usize).freeze()))
    }
}

impl Encoder<Bytes> for WordCodec {
    type Error = WordError;

    fn encode(&mut self, word: Bytes, dst: &mut BytesMut) -> Result<(), WordError> {
        let length = verify_length_support(word.len() as u64, self.max_word_length)?;
        encode_length(length as i64, dst)?;
        dst.put_slice(&word);
        Ok(())
    }
}
