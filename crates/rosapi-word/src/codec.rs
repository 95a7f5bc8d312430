use std::io::{ErrorKind, Read};

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::charset::Charset;
use crate::error::{Result, WordError};
use crate::reader::read_payload;

/// Largest length the prefix scheme can express (35 bits).
pub const MAX_SCHEME_LENGTH: u64 = 0x7_FFFF_FFFF;

/// Default ceiling for words sent or received: the four-byte prefix range.
pub const DEFAULT_MAX_WORD_LENGTH: u64 = 0x0FFF_FFFF;

/// Longest possible length prefix in bytes.
pub const MAX_PREFIX_SIZE: usize = 5;

/// Encode a word length into its variable-width prefix.
///
/// ```text
/// 0x00000000 - 0x0000007F  0xxxxxxx
/// 0x00000080 - 0x00003FFF  10xxxxxx xxxxxxxx
/// 0x00004000 - 0x001FFFFF  110xxxxx xxxxxxxx xxxxxxxx
/// 0x00200000 - 0x0FFFFFFF  1110xxxx xxxxxxxx xxxxxxxx xxxxxxxx
/// 0x10000000 - 0x7FFFFFFFF 11110xxx xxxxxxxx xxxxxxxx xxxxxxxx xxxxxxxx
/// ```
pub fn encode_length(length: i64, dst: &mut BytesMut) -> Result<()> {
    if length < 0 {
        return Err(WordError::InvalidLength(length));
    }
    if length as u64 > MAX_SCHEME_LENGTH {
        return Err(WordError::LengthBeyondScheme(length));
    }

    let n = length as u64;
    dst.reserve(MAX_PREFIX_SIZE);
    if n < 0x80 {
        dst.put_u8(n as u8);
    } else if n < 0x4000 {
        dst.put_u16(n as u16 | 0x8000);
    } else if n < 0x20_0000 {
        let v = n as u32 | 0x00C0_0000;
        dst.put_u8((v >> 16) as u8);
        dst.put_u16(v as u16);
    } else if n < 0x1000_0000 {
        dst.put_u32(n as u32 | 0xE000_0000);
    } else {
        dst.put_u8(0xF0 | (n >> 32) as u8);
        dst.put_u32(n as u32);
    }
    Ok(())
}

/// Number of prefix bytes announced by the first prefix byte.
pub fn prefix_size(first: u8) -> Result<usize> {
    if first & 0x80 == 0 {
        Ok(1)
    } else if first & 0xC0 == 0x80 {
        Ok(2)
    } else if first & 0xE0 == 0xC0 {
        Ok(3)
    } else if first & 0xF0 == 0xE0 {
        Ok(4)
    } else if first & 0xF8 == 0xF0 {
        Ok(5)
    } else {
        Err(WordError::UnsupportedControlByte(first))
    }
}

fn assemble(first: u8, rest: &[u8]) -> u64 {
    let mask = match rest.len() {
        0 => 0x7F,
        1 => 0x3F,
        2 => 0x1F,
        3 => 0x0F,
        _ => 0x07,
    };
    rest.iter()
        .fold(u64::from(first & mask), |acc, byte| (acc << 8) | u64::from(*byte))
}

/// Read and decode one length prefix from a blocking stream.
///
/// End-of-stream before the first byte is [`WordError::ConnectionClosed`].
/// Callers check readiness first, so any timeout here is [`WordError::TimedOut`].
pub fn decode_length<R: Read + ?Sized>(src: &mut R) -> Result<u64> {
    let mut first = [0u8; 1];
    loop {
        match src.read(&mut first) {
            Ok(0) => return Err(WordError::ConnectionClosed),
            Ok(_) => break,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {
                return Err(WordError::TimedOut {
                    expected: 1,
                    fragment: Bytes::new(),
                })
            }
            Err(err) => return Err(WordError::Io(err)),
        }
    }

    let size = prefix_size(first[0])?;
    let rest = read_payload(src, (size - 1) as u64)?;
    Ok(assemble(first[0], &rest))
}

/// Decode a length prefix from the front of a buffer without consuming it.
///
/// Returns `Ok(None)` if the buffer does not hold a complete prefix yet,
/// otherwise the length and the prefix size in bytes.
pub fn peek_length(src: &[u8]) -> Result<Option<(u64, usize)>> {
    let Some(&first) = src.first() else {
        return Ok(None);
    };
    let size = prefix_size(first)?;
    if src.len() < size {
        return Ok(None);
    }
    Ok(Some((assemble(first, &src[1..size]), size)))
}

/// Reject lengths above the configured word ceiling.
pub fn verify_length_support(length: u64, max: u64) -> Result<u64> {
    if length > max.min(MAX_SCHEME_LENGTH) {
        return Err(WordError::UnsupportedLength {
            length,
            max: max.min(MAX_SCHEME_LENGTH),
        });
    }
    Ok(length)
}

/// Configuration for the word layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WordConfig {
    /// Charset the device uses. `None` disables transcoding.
    pub remote_charset: Option<Charset>,
    /// Charset the application uses. `None` disables transcoding.
    pub local_charset: Option<Charset>,
    /// Longest word accepted on either direction. Default: 0xFFFFFFF.
    pub max_word_length: u64,
}

impl WordConfig {
    /// `(from, to)` for words leaving this side, when both charsets are set.
    pub fn outgoing_charsets(&self) -> Option<(Charset, Charset)> {
        Some((self.local_charset?, self.remote_charset?))
    }

    /// `(from, to)` for words arriving from the device, when both are set.
    pub fn incoming_charsets(&self) -> Option<(Charset, Charset)> {
        Some((self.remote_charset?, self.local_charset?))
    }
}

impl Default for WordConfig {
    fn default() -> Self {
        Self {
            remote_charset: None,
            local_charset: None,
            max_word_length: DEFAULT_MAX_WORD_LENGTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const BOUNDARIES: [u64; 24] = [
        0x0,
        0x1,
        0x7E,
        0x7F,
        0x80,
        0x81,
        0x3FFE,
        0x3FFF,
        0x4000,
        0x4001,
        0x1F_FFFE,
        0x1F_FFFF,
        0x20_0000,
        0x20_0001,
        0xFFF_FFFE,
        0xFFF_FFFF,
        0x1000_0000,
        0x1000_0001,
        0xFFFF_FFFE,
        0xFFFF_FFFF,
        0x1_0000_0000,
        0x1_0000_0001,
        0x7_FFFF_FFFE,
        0x7_FFFF_FFFF,
    ];

    fn encoded(length: i64) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_length(length, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn boundary_lengths_survive_decode() {
        for length in BOUNDARIES {
            let bytes = encoded(length as i64);
            let decoded = decode_length(&mut Cursor::new(bytes.clone())).unwrap();
            assert_eq!(decoded, length, "length {length:#x}");
            assert_eq!(
                peek_length(&bytes).unwrap(),
                Some((length, bytes.len())),
                "length {length:#x}"
            );
        }
    }

    #[test]
    fn exact_byte_patterns() {
        assert_eq!(encoded(0x00), [0x00]);
        assert_eq!(encoded(0x7F), [0x7F]);
        assert_eq!(encoded(0x80), [0x80, 0x80]);
        assert_eq!(encoded(0x3FFF), [0xBF, 0xFF]);
        assert_eq!(encoded(0x4000), [0xC0, 0x40, 0x00]);
        assert_eq!(encoded(0x1F_FFFF), [0xDF, 0xFF, 0xFF]);
        assert_eq!(encoded(0x20_0000), [0xE0, 0x20, 0x00, 0x00]);
        assert_eq!(encoded(0xFFF_FFFF), [0xEF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(encoded(0x1000_0000), [0xF0, 0x10, 0x00, 0x00, 0x00]);
        assert_eq!(encoded(0xFFFF_FFFF), [0xF0, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(encoded(0x1_0000_0000), [0xF1, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(encoded(0x7_FFFF_FFFF), [0xF7, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn control_bytes_are_rejected() {
        for byte in 0xF8..=0xFFu8 {
            let err = decode_length(&mut Cursor::new(vec![byte, 0, 0, 0, 0])).unwrap_err();
            assert!(
                matches!(err, WordError::UnsupportedControlByte(b) if b == byte),
                "byte {byte:#x}: {err:?}"
            );
            assert!(matches!(
                peek_length(&[byte]),
                Err(WordError::UnsupportedControlByte(b)) if b == byte
            ));
        }
    }

    #[test]
    fn negative_length_is_invalid() {
        let mut buf = BytesMut::new();
        let err = encode_length(-1, &mut buf).unwrap_err();
        assert!(matches!(err, WordError::InvalidLength(-1)));
        assert!(buf.is_empty());
    }

    #[test]
    fn length_beyond_scheme() {
        let mut buf = BytesMut::new();
        let err = encode_length(0x8_0000_0000, &mut buf).unwrap_err();
        assert!(matches!(err, WordError::LengthBeyondScheme(0x8_0000_0000)));
    }

    #[test]
    fn peek_incomplete_prefix() {
        assert_eq!(peek_length(&[]).unwrap(), None);
        assert_eq!(peek_length(&[0xC0, 0x40]).unwrap(), None);
        assert_eq!(peek_length(&[0xC0, 0x40, 0x00, 0xAA]).unwrap(), Some((0x4000, 3)));
    }

    #[test]
    fn decode_reports_closed_and_truncated_prefix() {
        let err = decode_length(&mut Cursor::new(Vec::<u8>::new())).unwrap_err();
        assert!(matches!(err, WordError::ConnectionClosed));

        let err = decode_length(&mut Cursor::new(vec![0xE0, 0x20])).unwrap_err();
        assert!(matches!(err, WordError::Incomplete { expected: 3, .. }));
    }

    #[test]
    fn verify_length_support_uses_ceiling() {
        assert_eq!(
            verify_length_support(0xFFF_FFFF, DEFAULT_MAX_WORD_LENGTH).unwrap(),
            0xFFF_FFFF
        );
        assert!(matches!(
            verify_length_support(0x1000_0000, DEFAULT_MAX_WORD_LENGTH),
            Err(WordError::UnsupportedLength {
                length: 0x1000_0000,
                max: DEFAULT_MAX_WORD_LENGTH
            })
        ));
        assert!(matches!(
            verify_length_support(0x8_0000_0000, u64::MAX),
            Err(WordError::UnsupportedLength {
                max: MAX_SCHEME_LENGTH,
                ..
            })
        ));
    }

    #[test]
    fn config_charset_directions() {
        let config = WordConfig {
            remote_charset: Some(Charset::Latin1),
            local_charset: Some(Charset::Utf8),
            ..WordConfig::default()
        };
        assert_eq!(
            config.outgoing_charsets(),
            Some((Charset::Utf8, Charset::Latin1))
        );
        assert_eq!(
            config.incoming_charsets(),
            Some((Charset::Latin1, Charset::Utf8))
        );

        let half = WordConfig {
            remote_charset: Some(Charset::Latin1),
            ..WordConfig::default()
        };
        assert_eq!(half.outgoing_charsets(), None);
        assert_eq!(half.incoming_charsets(), None);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: WordConfig =
            serde_json::from_str(r#"{"remote_charset":"latin1"}"#).unwrap();
        assert_eq!(config.remote_charset, Some(Charset::Latin1));
        assert_eq!(config.local_charset, None);
        assert_eq!(config.max_word_length, DEFAULT_MAX_WORD_LENGTH);
    }
}
