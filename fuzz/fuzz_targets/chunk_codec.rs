#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use timeshift_core::chunk::HEADER_LEN;
use timeshift_core::{ChunkCodec, Error, Frame};
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as a chunk stream. Must never panic:
    // - Truncated headers and payloads
    // - Length prefixes past the size limit
    // - Bad CRC32 checksums
    // - Abandon markers with no frame before them
    let mut codec = ChunkCodec::with_max_chunk_size(1024 * 1024);
    let mut buf = BytesMut::from(data);

    loop {
        match codec.decode(&mut buf) {
            Ok(Some(Frame::Chunk(chunk))) => {
                assert_eq!(chunk.encoded_len(), chunk.payload.len() + HEADER_LEN);
            }
            Ok(Some(Frame::Abandon)) => {}
            Ok(None) => break,
            // The bad frame was consumed; the next one may still be good
            Err(Error::ChecksumMismatch { .. }) => continue,
            Err(_) => {
                assert!(buf.is_empty());
                break;
            }
        }
    }
});
