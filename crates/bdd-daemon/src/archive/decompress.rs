use std::io::{self, Write};

use bdd_core::IngestError;
use zstd::stream::raw::Decoder;
use zstd::stream::zio::Writer;

/// Incremental zstd decompressor fed with arbitrarily split chunks.
///
/// A chunk may yield no output at all (e.g. it only completed a frame
/// header); whatever the decoder retains comes out of [`finish`], which also
/// rejects a stream ending inside a frame.
///
/// [`finish`]: StreamDecompressor::finish
pub struct StreamDecompressor {
    writer: Writer<Vec<u8>, Decoder<'static>>,
    fed: bool,
}

impl StreamDecompressor {
    pub fn new() -> Result<Self, IngestError> {
        let decoder = Decoder::new().map_err(|e| {
            IngestError::Io(format!("Failed to create zstd decoder: {}", e))
        })?;
        Ok(Self {
            writer: Writer::new(Vec::new(), decoder),
            fed: false,
        })
    }

    /// Feed one compressed chunk and take the bytes decoded so far.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<u8>, IngestError> {
        self.fed |= !chunk.is_empty();
        self.writer
            .write_all(chunk)
            .and_then(|()| self.writer.flush())
            .map_err(|e| IngestError::Protocol(format!("Invalid zstd stream: {}", e)))?;
        Ok(std::mem::take(self.writer.writer_mut()))
    }

    /// Flush everything still held by the decoder.
    ///
    /// An empty stream is accepted; otherwise the last frame must be complete.
    pub fn finish(mut self) -> Result<Vec<u8>, IngestError> {
        if self.fed {
            self.writer.finish().map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => {
                    IngestError::Protocol("zstd stream ends inside a frame".to_string())
                }
                _ => IngestError::Protocol(format!("Invalid zstd stream: {}", e)),
            })?;
        }
        let (output, _) = self.writer.into_inner();
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8 ^ (i / 1024) as u8).collect()
    }

    fn decode_in_chunks(compressed: &[u8], chunk_sizes: &[usize]) -> Vec<u8> {
        let mut decompressor = StreamDecompressor::new().unwrap();
        let mut out = Vec::new();
        let mut rest = compressed;
        let mut sizes = chunk_sizes.iter().cycle();
        while !rest.is_empty() {
            let n = (*sizes.next().unwrap()).clamp(1, rest.len());
            let (chunk, tail) = rest.split_at(n);
            out.extend(decompressor.feed(chunk).unwrap());
            rest = tail;
        }
        out.extend(decompressor.finish().unwrap());
        out
    }

    #[test]
    fn test_header_only_chunk_yields_nothing() {
        let compressed = zstd::encode_all(&sample(4096)[..], 3).unwrap();
        let mut decompressor = StreamDecompressor::new().unwrap();

        // The zstd magic number alone cannot produce output
        assert!(decompressor.feed(&compressed[..4]).unwrap().is_empty());

        let mut out = decompressor.feed(&compressed[4..]).unwrap();
        out.extend(decompressor.finish().unwrap());
        assert_eq!(out, sample(4096));
    }

    #[test]
    fn test_concatenated_frames() {
        let mut compressed = zstd::encode_all(&b"first frame "[..], 1).unwrap();
        compressed.extend(zstd::encode_all(&b"second frame"[..], 19).unwrap());

        assert_eq!(decode_in_chunks(&compressed, &[5]), b"first frame second frame");
    }

    #[test]
    fn test_garbage_is_rejected() {
        let mut decompressor = StreamDecompressor::new().unwrap();
        let err = decompressor.feed(b"this is not zstd at all").unwrap_err();
        assert!(matches!(err, IngestError::Protocol(_)), "{err}");
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        let compressed = zstd::encode_all(&sample(100_000)[..], 3).unwrap();
        let mut decompressor = StreamDecompressor::new().unwrap();
        decompressor.feed(&compressed[..compressed.len() - 3]).unwrap();

        let err = decompressor.finish().unwrap_err();
        assert!(matches!(err, IngestError::Protocol(_)), "{err}");
    }

    #[test]
    fn test_empty_stream_finishes_empty() {
        let decompressor = StreamDecompressor::new().unwrap();
        assert!(decompressor.finish().unwrap().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_output_independent_of_chunking(
            len in 0usize..200_000,
            chunk_sizes in prop::collection::vec(1usize..70_000, 1..8),
        ) {
            let data = sample(len);
            let compressed = zstd::encode_all(&data[..], 3).unwrap();
            prop_assert_eq!(decode_in_chunks(&compressed, &chunk_sizes), data);
        }
    }
}
