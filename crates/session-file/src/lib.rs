//! Named-chunk session file container for the PDA emulator session core.

/// Chunk container error taxonomy.
pub mod error;
pub use error::ChunkError;

/// Four-character chunk identifiers.
pub mod tag;
pub use tag::Tag;

/// Ordered named-chunk container and its on-disk encoding.
pub mod chunk;
pub use chunk::{ChunkFile, CHUNK_HEADER_BYTES};

/// Typed session-file accessors layered over the container.
pub mod session;
pub use session::{tags, ConfigurationHeader, SessionFile};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
#[cfg(test)]
use tempfile as _;
