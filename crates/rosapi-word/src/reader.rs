use std::io::{Cursor, ErrorKind, Read};

use bytes::{Bytes, BytesMut};

use crate::codec::{decode_length, verify_length_support};
use crate::error::{Result, WordError};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// A received word exposed as a seekable reader positioned at its start.
pub type WordStream = Cursor<Bytes>;

/// Read exactly `length` bytes.
///
/// The buffer grows as bytes arrive, so a bogus length cannot force a large
/// allocation up front. Failures carry the fragment received so far.
pub(crate) fn read_payload<R: Read + ?Sized>(src: &mut R, length: u64) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(length.min(INITIAL_BUFFER_CAPACITY as u64) as usize);
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    while (buf.len() as u64) < length {
        let want = (length - buf.len() as u64).min(READ_CHUNK_SIZE as u64) as usize;
        let read = match src.read(&mut chunk[..want]) {
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {
                return Err(WordError::TimedOut {
                    expected: length,
                    fragment: buf.freeze(),
                });
            }
            Err(err) => return Err(WordError::Io(err)),
        };

        if read == 0 {
            return Err(WordError::Incomplete {
                expected: length,
                fragment: buf.freeze(),
            });
        }

        buf.extend_from_slice(&chunk[..read]);
    }

    Ok(buf.freeze())
}

/// Read the next complete word (blocking), refusing lengths above `max`.
pub fn read_word<R: Read + ?Sized>(src: &mut R, max: u64) -> Result<Bytes> {
    let length = decode_length(src)?;
    verify_length_support(length, max)?;
    read_payload(src, length)
}

/// Read the next complete word as a [`WordStream`].
pub fn read_word_as_stream<R: Read + ?Sized>(src: &mut R, max: u64) -> Result<WordStream> {
    read_word(src, max).map(Cursor::new)
}
