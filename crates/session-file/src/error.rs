//! Error taxonomy for chunk container encoding and decoding.

use crate::Tag;

/// Failure while reading, writing, or interpreting a chunk container.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    /// Underlying reader or writer failed.
    #[error("chunk container I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// Stream ended before a chunk header or body was complete.
    #[error("chunk `{tag}` truncated: expected {expected} bytes, found {actual}")]
    Truncated {
        /// Chunk being decoded, or the placeholder tag for a partial header.
        tag: Tag,
        /// Byte count the header announced.
        expected: usize,
        /// Byte count actually available.
        actual: usize,
    },
    /// A required chunk is not present.
    #[error("chunk `{0}` is missing")]
    MissingChunk(Tag),
    /// Chunk payload was expected to be UTF-8 text.
    #[error("chunk `{0}` does not hold valid UTF-8")]
    InvalidUtf8(Tag),
    /// Chunk payload has the wrong length for a fixed-width value.
    #[error("chunk `{tag}` has length {actual}, expected {expected}")]
    BadLength {
        /// Chunk being decoded.
        tag: Tag,
        /// Required payload length.
        expected: usize,
        /// Payload length found.
        actual: usize,
    },
    /// Chunk payload exceeds the 32-bit length field.
    #[error("chunk `{tag}` is {len} bytes, larger than the container allows")]
    ChunkTooLarge {
        /// Chunk being encoded.
        tag: Tag,
        /// Payload length in bytes.
        len: usize,
    },
    /// A compressed chunk could not be packed or unpacked.
    #[error("chunk `{tag}` compression failed: {message}")]
    Compression {
        /// Chunk being packed or unpacked.
        tag: Tag,
        /// Codec diagnostic.
        message: String,
    },
    /// Structured state could not be serialized.
    #[error("failed to encode state chunk `{tag}`: {message}")]
    Encode {
        /// Chunk being encoded.
        tag: Tag,
        /// Encoder diagnostic.
        message: String,
    },
    /// Structured state could not be deserialized.
    #[error("failed to decode state chunk `{tag}`: {message}")]
    Decode {
        /// Chunk being decoded.
        tag: Tag,
        /// Decoder diagnostic.
        message: String,
    },
}

impl ChunkError {
    /// Returns `true` when the error means data is absent rather than corrupt.
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::MissingChunk(_))
    }
}
