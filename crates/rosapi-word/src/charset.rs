//! Best-effort charset transcoding applied at the word boundary.
//!
//! Only the charsets the API service is commonly configured with are
//! supported. Unencodable characters become `?` and invalid input is
//! decoded lossily, so transcoding never fails.

use std::fmt;
use std::io::{self, ErrorKind, Read};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A charset words can be transcoded between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Charset {
    /// UTF-8.
    Utf8,
    /// ISO-8859-1.
    Latin1,
}

impl Charset {
    /// Canonical label.
    pub fn label(self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Latin1 => "ISO-8859-1",
        }
    }

    /// Decode bytes in this charset.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Charset::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        }
    }

    /// Encode text into this charset.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Charset::Utf8 => text.as_bytes().to_vec(),
            Charset::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }
}

/// Transcode `input` from one charset to another.
pub fn transcode(from: Charset, to: Charset, input: &[u8]) -> Vec<u8> {
    if from == to {
        return input.to_vec();
    }
    to.encode(&from.decode(input))
}

const COUNT_CHUNK_SIZE: usize = 8 * 1024;

/// Length `transcode` would produce for the rest of `src`, read in chunks.
///
/// Stops reading as soon as the count exceeds `limit`, so the result is
/// exact only when it is at most `limit`.
pub fn transcoded_len<R: Read + ?Sized>(from: Charset, to: Charset, src: &mut R, limit: u64) -> io::Result<u64> {
    let mut chunk = [0u8; COUNT_CHUNK_SIZE];
    let mut pending = Vec::new();
    let mut total = 0u64;

    loop {
        let read = match src.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        if from == to {
            total += read as u64;
        } else {
            pending.extend_from_slice(&chunk[..read]);
            let used = decode_chars(from, &pending, false, |c| total += to.encoded_len(c));
            pending.drain(..used);
        }
        if total > limit {
            return Ok(total);
        }
    }

    decode_chars(from, &pending, true, |c| total += to.encoded_len(c));
    Ok(total)
}

impl Charset {
    fn encoded_len(self, c: char) -> u64 {
        match self {
            Charset::Utf8 => c.len_utf8() as u64,
            Charset::Latin1 => 1,
        }
    }
}

/// Feed the characters `decode` would yield for `bytes` to `each`.
///
/// Returns how many bytes were consumed. Unless `at_end`, a truncated
/// UTF-8 sequence at the tail is left for the next call.
fn decode_chars(charset: Charset, bytes: &[u8], at_end: bool, mut each: impl FnMut(char)) -> usize {
    if charset == Charset::Latin1 {
        bytes.iter().for_each(|&b| each(char::from(b)));
        return bytes.len();
    }

    let mut rest = bytes;
    loop {
        let err = match std::str::from_utf8(rest) {
            Ok(valid) => {
                valid.chars().for_each(&mut each);
                return bytes.len();
            }
            Err(err) => err,
        };
        let (valid, invalid) = rest.split_at(err.valid_up_to());
        String::from_utf8_lossy(valid).chars().for_each(&mut each);
        match err.error_len() {
            Some(len) => {
                each(char::REPLACEMENT_CHARACTER);
                rest = &invalid[len..];
            }
            None if at_end => {
                each(char::REPLACEMENT_CHARACTER);
                return bytes.len();
            }
            None => return bytes.len() - invalid.len(),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned when parsing an unknown charset label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown charset '{0}'")]
pub struct UnknownCharset(pub String);

impl FromStr for Charset {
    type Err = UnknownCharset;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        match label.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Charset::Utf8),
            "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" => Ok(Charset::Latin1),
            _ => Err(UnknownCharset(label.to_string())),
        }
    }
}
