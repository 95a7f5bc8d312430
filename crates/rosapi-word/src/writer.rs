use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use bytes::{BufMut, BytesMut};

use crate::codec::{encode_length, verify_length_support, MAX_PREFIX_SIZE};
use crate::error::{Result, WordError};

/// Write one word (prefix + payload) as a single buffered write.
///
/// Returns the number of bytes written, prefix included.
pub fn write_word<W: Write + ?Sized>(dst: &mut W, word: &[u8], max: u64) -> Result<usize> {
    let length = verify_length_support(word.len() as u64, max)?;

    let mut buf = BytesMut::with_capacity(MAX_PREFIX_SIZE + word.len());
    encode_length(length as i64, &mut buf)?;
    buf.put_slice(word);

    write_all(dst, &buf)?;
    flush(dst, buf.len())?;
    Ok(buf.len())
}

/// Write one word made of `prefix` followed by the rest of `stream`.
///
/// The stream is measured from its current position to its end; the
/// position is restored before copying. Nothing is written if the total
/// length exceeds `max`.
pub fn write_word_from_stream<W, S>(dst: &mut W, prefix: &[u8], stream: &mut S, max: u64) -> Result<usize>
where
    W: Write + ?Sized,
    S: Read + Seek + ?Sized,
{
    let remaining = seekable_stream_length(stream)?;
    let total = verify_length_support(prefix.len() as u64 + remaining, max)?;

    let mut head = BytesMut::with_capacity(MAX_PREFIX_SIZE + prefix.len());
    encode_length(total as i64, &mut head)?;
    head.put_slice(prefix);
    write_all(dst, &head)?;

    let copied = std::io::copy(&mut stream.take(remaining), dst).map_err(|err| match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => WordError::SendTimedOut { sent: head.len() },
        _ => WordError::Io(err),
    })?;
    if copied != remaining {
        return Err(WordError::Io(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("stream ended after {copied} of {remaining} bytes"),
        )));
    }

    let sent = head.len() + copied as usize;
    flush(dst, sent)?;
    Ok(sent)
}

/// Bytes between the current position of `stream` and its end.
pub fn seekable_stream_length<S: Seek + ?Sized>(stream: &mut S) -> Result<u64> {
    let position = stream
        .stream_position()
        .map_err(WordError::UnseekableStream)?;
    let end = stream
        .seek(SeekFrom::End(0))
        .map_err(WordError::UnseekableStream)?;
    stream
        .seek(SeekFrom::Start(position))
        .map_err(WordError::UnseekableStream)?;
    Ok(end.saturating_sub(position))
}

// A socket send timeout surfaces as `WouldBlock` on unix and `TimedOut`
// elsewhere; both end the write.
fn write_all<W: Write + ?Sized>(dst: &mut W, buf: &[u8]) -> Result<()> {
    let mut offset = 0usize;
    while offset < buf.len() {
        match dst.write(&buf[offset..]) {
            Ok(0) => return Err(WordError::ConnectionClosed),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {
                return Err(WordError::SendTimedOut { sent: offset })
            }
            Err(err) => return Err(WordError::Io(err)),
        }
    }
    Ok(())
}

fn flush<W: Write + ?Sized>(dst: &mut W, sent: usize) -> Result<()> {
    loop {
        match dst.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {
                return Err(WordError::SendTimedOut { sent })
            }
            Err(err) => return Err(WordError::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::DEFAULT_MAX_WORD_LENGTH;
    use crate::reader::read_word;

    #[test]
    fn write_single_word() {
        let mut out = Vec::new();
        let written = write_word(&mut out, b"/ip/arp/print", DEFAULT_MAX_WORD_LENGTH).unwrap();

        assert_eq!(written, 14);
        assert_eq!(out[0], 13);
        assert_eq!(&out[1..], b"/ip/arp/print");
    }

    #[test]
    fn empty_word_is_single_zero_byte() {
        let mut out = Vec::new();
        assert_eq!(write_word(&mut out, b"", DEFAULT_MAX_WORD_LENGTH).unwrap(), 1);
        assert_eq!(out, [0x00]);
    }

    #[test]
    fn oversized_word_writes_nothing() {
        let mut out = Vec::new();
        let err = write_word(&mut out, b"too long", 4).unwrap_err();
        assert!(matches!(err, WordError::UnsupportedLength { length: 8, max: 4 }));
        assert!(out.is_empty());
    }

    #[test]
    fn stream_word_measures_from_current_position() {
        let mut stream = Cursor::new(b"skip:payload".to_vec());
        stream.set_position(5);

        let mut out = Vec::new();
        let written =
            write_word_from_stream(&mut out, b"=comment=", &mut stream, DEFAULT_MAX_WORD_LENGTH)
                .unwrap();

        assert_eq!(written, 1 + 9 + 7);
        let word = read_word(&mut Cursor::new(out), DEFAULT_MAX_WORD_LENGTH).unwrap();
        assert_eq!(word, "=comment=payload");
    }

    #[test]
    fn stream_word_over_ceiling_writes_nothing() {
        let mut stream = Cursor::new(vec![0u8; 32]);
        let mut out = Vec::new();
        let err = write_word_from_stream(&mut out, b"=x=", &mut stream, 16).unwrap_err();
        assert!(matches!(err, WordError::UnsupportedLength { length: 35, .. }));
        assert!(out.is_empty());
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn stream_length_restores_position() {
        let mut stream = Cursor::new(vec![1u8; 10]);
        stream.set_position(3);
        assert_eq!(seekable_stream_length(&mut stream).unwrap(), 7);
        assert_eq!(stream.position(), 3);
    }

    #[test]
    fn unseekable_stream_is_reported() {
        let mut stream = Unseekable;
        let mut out = Vec::new();
        let err =
            write_word_from_stream(&mut out, b"=x=", &mut stream, DEFAULT_MAX_WORD_LENGTH)
                .unwrap_err();
        assert!(matches!(err, WordError::UnseekableStream(_)));
        assert!(out.is_empty());
    }

    #[test]
    fn handles_interrupted_write() {
        let mut out = InterruptedOnce {
            interrupted: false,
            data: Vec::new(),
        };
        write_word(&mut out, b"!re", DEFAULT_MAX_WORD_LENGTH).unwrap();
        assert_eq!(out.data, b"\x03!re");
    }

    #[test]
    fn zero_write_is_connection_closed() {
        let err = write_word(&mut ZeroWriter, b"x", DEFAULT_MAX_WORD_LENGTH).unwrap_err();
        assert!(matches!(err, WordError::ConnectionClosed));
    }

    #[test]
    fn blocked_write_times_out_instead_of_spinning() {
        let mut out = AlwaysBlocked { calls: 0 };
        let err = write_word(&mut out, b"/system/resource/print", DEFAULT_MAX_WORD_LENGTH)
            .unwrap_err();
        assert!(matches!(err, WordError::SendTimedOut { sent: 0 }));
        assert_eq!(out.calls, 1);
    }

    #[test]
    fn blocked_flush_reports_bytes_sent() {
        let mut out = BlockedFlush { data: Vec::new() };
        let err = write_word(&mut out, b"!re", DEFAULT_MAX_WORD_LENGTH).unwrap_err();
        assert!(matches!(err, WordError::SendTimedOut { sent: 4 }));
        assert_eq!(out.data, b"\x03!re");
    }

    struct AlwaysBlocked {
        calls: usize,
    }

    impl Write for AlwaysBlocked {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            self.calls += 1;
            Err(std::io::Error::from(ErrorKind::WouldBlock))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct BlockedFlush {
        data: Vec<u8>,
    }

    impl Write for BlockedFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::from(ErrorKind::TimedOut))
        }
    }

    struct Unseekable;

    impl Read for Unseekable {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
    }

    impl Seek for Unseekable {
        fn seek(&mut self, _pos: SeekFrom) -> std::io::Result<u64> {
            Err(std::io::Error::new(ErrorKind::Unsupported, "pipe"))
        }
    }

    struct InterruptedOnce {
        interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedOnce {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
