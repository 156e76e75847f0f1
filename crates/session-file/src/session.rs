//! Typed view over a chunk container holding one saved emulator session.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{ChunkError, ChunkFile, Tag};

/// Well-known chunk tags used by the session file.
pub mod tags {
    use crate::Tag;

    /// Device identifier string.
    pub const DEVICE: Tag = Tag::new(*b"DTyp");
    /// ROM reference (path or embedded image name).
    pub const ROM_REFERENCE: Tag = Tag::new(*b"ROMn");
    /// Installed RAM size in KiB.
    pub const RAM_SIZE: Tag = Tag::new(*b"RAMs");
    /// Gzip-compressed RAM image, prefixed by its unpacked length.
    pub const RAM_IMAGE: Tag = Tag::new(*b"zram");
    /// Uncompressed RAM image written by older sessions. Read only.
    pub const RAM_IMAGE_UNCOMPRESSED: Tag = Tag::new(*b"ram ");
}

/// Configuration header stored at the front of every session file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationHeader {
    /// Device identifier.
    pub device: String,
    /// ROM reference as recorded at save time.
    pub rom: String,
    /// RAM size in KiB.
    pub ram_size_kib: u32,
}

/// Session file: a chunk container plus the reload bookkeeping used by `load`.
#[derive(Debug, Clone)]
pub struct SessionFile {
    chunks: ChunkFile,
    can_reload: bool,
}

impl Default for SessionFile {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFile {
    /// Creates an empty session file.
    #[must_use]
    pub const fn new() -> Self {
        Self::from_chunk_file(ChunkFile::new())
    }

    /// Wraps an already decoded container.
    #[must_use]
    pub const fn from_chunk_file(chunks: ChunkFile) -> Self {
        Self {
            chunks,
            can_reload: true,
        }
    }

    /// Decodes a session file from an in-memory image.
    ///
    /// # Errors
    ///
    /// Propagates container decode failures.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChunkError> {
        ChunkFile::from_bytes(bytes).map(Self::from_chunk_file)
    }

    /// Encodes the session file to bytes.
    ///
    /// # Errors
    ///
    /// Propagates container encode failures.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ChunkError> {
        self.chunks.to_bytes()
    }

    /// Reads a session file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Io`] when the file cannot be opened or read, or a
    /// decode error for malformed content.
    pub fn read_from_path(path: impl AsRef<Path>) -> Result<Self, ChunkError> {
        let mut reader = BufReader::new(File::open(path)?);
        ChunkFile::read_from(&mut reader).map(Self::from_chunk_file)
    }

    /// Writes the session file to disk, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Io`] when the file cannot be created or written.
    pub fn write_to_path(&self, path: impl AsRef<Path>) -> Result<(), ChunkError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.chunks.write_to(&mut writer)
    }

    /// Borrows the underlying container.
    #[must_use]
    pub const fn chunks(&self) -> &ChunkFile {
        &self.chunks
    }

    /// Mutably borrows the underlying container.
    pub const fn chunks_mut(&mut self) -> &mut ChunkFile {
        &mut self.chunks
    }

    /// Unwraps the underlying container.
    #[must_use]
    pub fn into_chunk_file(self) -> ChunkFile {
        self.chunks
    }

    /// Returns whether every subsystem so far found usable state.
    #[must_use]
    pub const fn can_reload(&self) -> bool {
        self.can_reload
    }

    /// Sets the reload flag. Loaders clear it when their data is missing or bad.
    pub const fn set_can_reload(&mut self, can_reload: bool) {
        self.can_reload = can_reload;
    }

    /// Reads the device identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::InvalidUtf8`] for a corrupt identifier.
    pub fn read_device(&self) -> Result<Option<String>, ChunkError> {
        self.chunks.read_string(tags::DEVICE)
    }

    /// Writes the device identifier.
    pub fn write_device(&mut self, device: &str) {
        self.chunks.write_string(tags::DEVICE, device);
    }

    /// Reads the ROM reference.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::InvalidUtf8`] for a corrupt reference.
    pub fn read_rom_reference(&self) -> Result<Option<String>, ChunkError> {
        self.chunks.read_string(tags::ROM_REFERENCE)
    }

    /// Writes the ROM reference.
    pub fn write_rom_reference(&mut self, rom: &str) {
        self.chunks.write_string(tags::ROM_REFERENCE, rom);
    }

    /// Reads the RAM size in KiB.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::BadLength`] for a malformed size chunk.
    pub fn read_ram_size(&self) -> Result<Option<u32>, ChunkError> {
        self.chunks.read_u32(tags::RAM_SIZE)
    }

    /// Writes the RAM size in KiB.
    pub fn write_ram_size(&mut self, ram_size_kib: u32) {
        self.chunks.write_u32(tags::RAM_SIZE, ram_size_kib);
    }

    /// Reads the configuration header.
    ///
    /// Returns `Ok(None)` unless device, ROM reference, and RAM size are all
    /// present.
    ///
    /// # Errors
    ///
    /// Propagates decode failures of the individual header chunks.
    pub fn read_configuration(&self) -> Result<Option<ConfigurationHeader>, ChunkError> {
        let (Some(device), Some(rom), Some(ram_size_kib)) = (
            self.read_device()?,
            self.read_rom_reference()?,
            self.read_ram_size()?,
        ) else {
            return Ok(None);
        };
        Ok(Some(ConfigurationHeader {
            device,
            rom,
            ram_size_kib,
        }))
    }

    /// Writes the configuration header.
    pub fn write_configuration(&mut self, header: &ConfigurationHeader) {
        self.write_device(&header.device);
        self.write_rom_reference(&header.rom);
        self.write_ram_size(header.ram_size_kib);
    }

    /// Reads the RAM image, falling back to the uncompressed chunk older
    /// sessions wrote.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Compression`] when the gzip stream is corrupt and
    /// [`ChunkError::Truncated`] when the unpacked image disagrees with its
    /// length prefix.
    pub fn read_ram_image(&self) -> Result<Option<Vec<u8>>, ChunkError> {
        if let Some(data) = self.chunks.read_chunk(tags::RAM_IMAGE) {
            return unpack_gzip(tags::RAM_IMAGE, data).map(Some);
        }
        Ok(self
            .chunks
            .read_chunk(tags::RAM_IMAGE_UNCOMPRESSED)
            .map(<[u8]>::to_vec))
    }

    /// Writes the RAM image gzip-compressed behind its unpacked length.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::ChunkTooLarge`] for images of 4 GiB or more and
    /// [`ChunkError::Compression`] if the encoder fails.
    pub fn write_ram_image(&mut self, image: &[u8]) -> Result<(), ChunkError> {
        let data = pack_gzip(tags::RAM_IMAGE, image)?;
        self.chunks.write_chunk(tags::RAM_IMAGE, data);
        Ok(())
    }

    /// Serializes `state` as a JSON payload under `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Encode`] when serialization fails.
    pub fn write_state<T: Serialize>(&mut self, tag: Tag, state: &T) -> Result<(), ChunkError> {
        let data = serde_json::to_vec(state).map_err(|err| ChunkError::Encode {
            tag,
            message: err.to_string(),
        })?;
        self.chunks.write_chunk(tag, data);
        Ok(())
    }

    /// Deserializes the JSON payload under `tag`, if present.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Decode`] when the payload does not match `T`.
    pub fn read_state<T: DeserializeOwned>(&self, tag: Tag) -> Result<Option<T>, ChunkError> {
        self.chunks
            .read_chunk(tag)
            .map(|data| {
                serde_json::from_slice(data).map_err(|err| ChunkError::Decode {
                    tag,
                    message: err.to_string(),
                })
            })
            .transpose()
    }

    /// Like [`SessionFile::read_state`], but a missing chunk is an error.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::MissingChunk`] when `tag` is absent, otherwise as
    /// [`SessionFile::read_state`].
    pub fn require_state<T: DeserializeOwned>(&self, tag: Tag) -> Result<T, ChunkError> {
        self.read_state(tag)?.ok_or(ChunkError::MissingChunk(tag))
    }
}

fn compression_error(tag: Tag, err: &std::io::Error) -> ChunkError {
    ChunkError::Compression {
        tag,
        message: err.to_string(),
    }
}

// Layout: big-endian unpacked length, then one gzip member.
fn pack_gzip(tag: Tag, image: &[u8]) -> Result<Vec<u8>, ChunkError> {
    let len = u32::try_from(image.len()).map_err(|_| ChunkError::ChunkTooLarge {
        tag,
        len: image.len(),
    })?;
    let mut encoder = GzEncoder::new(len.to_be_bytes().to_vec(), Compression::default());
    encoder
        .write_all(image)
        .map_err(|err| compression_error(tag, &err))?;
    encoder.finish().map_err(|err| compression_error(tag, &err))
}

fn unpack_gzip(tag: Tag, data: &[u8]) -> Result<Vec<u8>, ChunkError> {
    let Some((prefix, packed)) = data.split_first_chunk::<4>() else {
        return Err(ChunkError::Truncated {
            tag,
            expected: 4,
            actual: data.len(),
        });
    };
    let expected = u32::from_be_bytes(*prefix) as usize;
    let mut image = Vec::new();
    GzDecoder::new(packed)
        .read_to_end(&mut image)
        .map_err(|err| compression_error(tag, &err))?;
    if image.len() != expected {
        return Err(ChunkError::Truncated {
            tag,
            expected,
            actual: image.len(),
        });
    }
    Ok(image)
}
