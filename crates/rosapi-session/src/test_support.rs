use std::io::Cursor;

use bytes::BytesMut;
use rosapi_transport::MemoryTransport;
use rosapi_word::{encode_length, read_word, Communicator, DEFAULT_MAX_WORD_LENGTH};

/// Encode sentences as the device would send them, each ending in an empty word.
pub(crate) fn wire(sentences: &[&[&[u8]]]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    for sentence in sentences {
        for word in sentence.iter().copied().chain(std::iter::once(&b""[..])) {
            encode_length(word.len() as i64, &mut buf).unwrap();
            buf.extend_from_slice(word);
        }
    }
    buf.to_vec()
}

/// Decode everything written to a memory transport, word by word.
pub(crate) fn written_words(com: &Communicator<MemoryTransport>) -> Vec<Vec<u8>> {
    let mut src = Cursor::new(com.get_ref().written().to_vec());
    let mut words = Vec::new();
    while (src.position() as usize) < src.get_ref().len() {
        words.push(read_word(&mut src, DEFAULT_MAX_WORD_LENGTH).unwrap().to_vec());
    }
    words
}
