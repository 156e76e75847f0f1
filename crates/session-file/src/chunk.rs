//! Ordered named-chunk container.
//!
//! On disk a container is a plain sequence of chunks, each encoded as a
//! four-byte tag, a big-endian `u32` payload length, and the payload bytes.
//! There is no global header; an empty file is an empty container.

use std::io::{Read, Write};

use crate::{ChunkError, Tag};

/// Byte width of a chunk header (tag plus length).
pub const CHUNK_HEADER_BYTES: usize = Tag::WIDTH + 4;

const PARTIAL_HEADER: Tag = Tag::new(*b"????");

/// Ordered, random-access set of tagged byte chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkFile {
    chunks: Vec<(Tag, Vec<u8>)>,
}

impl ChunkFile {
    /// Creates an empty container.
    #[must_use]
    pub const fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    /// Decodes a container from an in-memory image.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Truncated`] when a header or payload runs past the
    /// end of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChunkError> {
        let mut chunks = Vec::new();
        let mut rest = bytes;

        while !rest.is_empty() {
            if rest.len() < CHUNK_HEADER_BYTES {
                return Err(ChunkError::Truncated {
                    tag: PARTIAL_HEADER,
                    expected: CHUNK_HEADER_BYTES,
                    actual: rest.len(),
                });
            }

            let tag = Tag::new([rest[0], rest[1], rest[2], rest[3]]);
            let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
            let body = &rest[CHUNK_HEADER_BYTES..];
            if body.len() < len {
                return Err(ChunkError::Truncated {
                    tag,
                    expected: len,
                    actual: body.len(),
                });
            }

            chunks.push((tag, body[..len].to_vec()));
            rest = &body[len..];
        }

        Ok(Self { chunks })
    }

    /// Reads and decodes a whole container from `reader`.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Io`] on read failure, or any decode error from
    /// [`ChunkFile::from_bytes`].
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, ChunkError> {
        let mut image = Vec::new();
        reader.read_to_end(&mut image)?;
        Self::from_bytes(&image)
    }

    /// Encodes the container to `writer`.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::ChunkTooLarge`] when a payload does not fit the
    /// 32-bit length field, or [`ChunkError::Io`] on write failure.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), ChunkError> {
        for (tag, data) in &self.chunks {
            let len = u32::try_from(data.len()).map_err(|_| ChunkError::ChunkTooLarge {
                tag: *tag,
                len: data.len(),
            })?;
            writer.write_all(&tag.bytes())?;
            writer.write_all(&len.to_be_bytes())?;
            writer.write_all(data)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Encodes the container into a fresh byte vector.
    ///
    /// # Errors
    ///
    /// Same as [`ChunkFile::write_to`].
    pub fn to_bytes(&self) -> Result<Vec<u8>, ChunkError> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.write_to(&mut out)?;
        Ok(out)
    }

    /// Number of bytes [`ChunkFile::write_to`] will produce.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.chunks
            .iter()
            .map(|(_, data)| CHUNK_HEADER_BYTES + data.len())
            .sum()
    }

    /// Returns the payload for `tag`, if present.
    #[must_use]
    pub fn read_chunk(&self, tag: Tag) -> Option<&[u8]> {
        self.chunks
            .iter()
            .find(|(candidate, _)| *candidate == tag)
            .map(|(_, data)| data.as_slice())
    }

    /// Stores `data` under `tag`, replacing an existing chunk in place so the
    /// original visiting order is kept.
    pub fn write_chunk(&mut self, tag: Tag, data: impl Into<Vec<u8>>) {
        let data = data.into();
        if let Some(slot) = self.chunks.iter_mut().find(|(candidate, _)| *candidate == tag) {
            slot.1 = data;
        } else {
            self.chunks.push((tag, data));
        }
    }

    /// Removes and returns the payload for `tag`.
    pub fn remove_chunk(&mut self, tag: Tag) -> Option<Vec<u8>> {
        let index = self.chunks.iter().position(|(candidate, _)| *candidate == tag)?;
        Some(self.chunks.remove(index).1)
    }

    /// Returns `true` when a chunk named `tag` exists.
    #[must_use]
    pub fn contains(&self, tag: Tag) -> bool {
        self.read_chunk(tag).is_some()
    }

    /// Iterates chunk tags in storage order.
    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.chunks.iter().map(|(tag, _)| *tag)
    }

    /// Number of chunks held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns `true` when the container holds no chunks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Reads a big-endian `u32` chunk.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::BadLength`] when the chunk is not exactly four bytes.
    pub fn read_u32(&self, tag: Tag) -> Result<Option<u32>, ChunkError> {
        let Some(data) = self.read_chunk(tag) else {
            return Ok(None);
        };
        let bytes: [u8; 4] = data.try_into().map_err(|_| ChunkError::BadLength {
            tag,
            expected: 4,
            actual: data.len(),
        })?;
        Ok(Some(u32::from_be_bytes(bytes)))
    }

    /// Stores a big-endian `u32` chunk.
    pub fn write_u32(&mut self, tag: Tag, value: u32) {
        self.write_chunk(tag, value.to_be_bytes().to_vec());
    }

    /// Reads a UTF-8 string chunk.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::InvalidUtf8`] when the payload is not UTF-8.
    pub fn read_string(&self, tag: Tag) -> Result<Option<String>, ChunkError> {
        self.read_chunk(tag)
            .map(|data| {
                std::str::from_utf8(data)
                    .map(str::to_owned)
                    .map_err(|_| ChunkError::InvalidUtf8(tag))
            })
            .transpose()
    }

    /// Stores a UTF-8 string chunk.
    pub fn write_string(&mut self, tag: Tag, value: &str) {
        self.write_chunk(tag, value.as_bytes().to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Tag = Tag::new(*b"AAAA");
    const B: Tag = Tag::new(*b"BBBB");

    #[test]
    fn empty_image_is_empty_container() {
        let file = ChunkFile::from_bytes(&[]).unwrap();
        assert!(file.is_empty());
        assert_eq!(file.to_bytes().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn encoding_matches_documented_layout() {
        let mut file = ChunkFile::new();
        file.write_chunk(A, vec![1, 2, 3]);
        assert_eq!(
            file.to_bytes().unwrap(),
            vec![b'A', b'A', b'A', b'A', 0, 0, 0, 3, 1, 2, 3]
        );
    }

    #[test]
    fn rewrite_keeps_original_position() {
        let mut file = ChunkFile::new();
        file.write_chunk(A, vec![1]);
        file.write_chunk(B, vec![2]);
        file.write_chunk(A, vec![9, 9]);
        assert_eq!(file.tags().collect::<Vec<_>>(), vec![A, B]);
        assert_eq!(file.read_chunk(A), Some(&[9, 9][..]));
    }

    #[test]
    fn truncated_header_is_rejected() {
        let err = ChunkFile::from_bytes(&[b'A', b'A', b'A']).unwrap_err();
        assert!(matches!(
            err,
            ChunkError::Truncated {
                expected: CHUNK_HEADER_BYTES,
                actual: 3,
                ..
            }
        ));
    }

    #[test]
    fn truncated_payload_names_the_chunk() {
        let err = ChunkFile::from_bytes(&[b'B', b'B', b'B', b'B', 0, 0, 0, 4, 1]).unwrap_err();
        assert!(matches!(
            err,
            ChunkError::Truncated {
                tag: B,
                expected: 4,
                actual: 1
            }
        ));
    }

    #[test]
    fn fixed_width_reads_check_length() {
        let mut file = ChunkFile::new();
        file.write_chunk(A, vec![0, 1]);
        assert!(matches!(
            file.read_u32(A),
            Err(ChunkError::BadLength { actual: 2, .. })
        ));
        file.write_u32(B, 0xDEAD_BEEF);
        assert_eq!(file.read_u32(B).unwrap(), Some(0xDEAD_BEEF));
        assert_eq!(file.read_u32(Tag::new(*b"none")).unwrap(), None);
    }

    #[test]
    fn string_reads_reject_invalid_utf8() {
        let mut file = ChunkFile::new();
        file.write_chunk(A, vec![0xFF, 0xFE]);
        assert!(matches!(file.read_string(A), Err(ChunkError::InvalidUtf8(A))));
        file.write_string(B, "m515");
        assert_eq!(file.read_string(B).unwrap().as_deref(), Some("m515"));
    }

    #[test]
    fn remove_chunk_returns_payload() {
        let mut file = ChunkFile::new();
        file.write_chunk(A, vec![7]);
        assert_eq!(file.remove_chunk(A), Some(vec![7]));
        assert!(!file.contains(A));
        assert_eq!(file.remove_chunk(A), None);
    }
}
