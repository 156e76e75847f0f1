//! Error taxonomy for session operations and engine execution.
//!
//! Reset and abort requests are not errors and never travel through these
//! types; see [`crate::control`].

use session_file::ChunkError;

/// Failure raised by an execution engine while running or persisting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Emulated access the engine could not complete.
    #[error("engine fault at {address:#010x}: {message}")]
    Fault {
        /// Emulated address involved in the fault.
        address: u32,
        /// Engine diagnostic.
        message: String,
    },
    /// The engine panicked; the payload message is preserved when printable.
    #[error("engine panicked: {0}")]
    Panicked(String),
    /// Any other engine-internal failure.
    #[error("engine failure: {0}")]
    Internal(String),
}

/// Failure raised by a session operation.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Session file lacks a usable configuration header.
    #[error("invalid session file: {reason}")]
    InvalidSessionFile {
        /// What was wrong with the file.
        reason: String,
    },
    /// Filesystem failure outside the chunk container.
    #[error("session I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// Chunk container failure.
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    /// A hardware or OS subsystem failed.
    #[error("subsystem `{name}` failed: {message}")]
    Subsystem {
        /// Subsystem name.
        name: &'static str,
        /// Subsystem diagnostic.
        message: String,
    },
    /// The execution engine failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// A deferred action failed; the rest of its queue was discarded.
    #[error("deferred action `{description}` failed: {source}")]
    ActionFailed {
        /// Description the action was posted with.
        description: String,
        /// Failure the action returned.
        source: Box<SessionError>,
    },
    /// Operation is not permitted inside a nested engine call.
    #[error("`{operation}` is not permitted while nested")]
    Nested {
        /// Operation that was refused.
        operation: &'static str,
    },
    /// Operation requires an initialized session.
    #[error("session is not initialized")]
    NotInitialized,
    /// The execution thread already exists.
    #[error("execution thread is already running")]
    ThreadRunning,
    /// The execution thread could not be spawned.
    #[error("failed to spawn execution thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
    /// Session options could not be parsed.
    #[error("invalid session options: {0}")]
    Options(#[from] serde_json::Error),
}

impl SessionError {
    /// Builds a [`SessionError::Subsystem`] from any displayable diagnostic.
    #[must_use]
    pub fn subsystem(name: &'static str, message: impl std::fmt::Display) -> Self {
        Self::Subsystem {
            name,
            message: message.to_string(),
        }
    }

    /// Returns `true` for failures caused by an unusable session file.
    #[must_use]
    pub const fn is_session_file_error(&self) -> bool {
        matches!(self, Self::InvalidSessionFile { .. } | Self::Chunk(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_file::Tag;

    #[test]
    fn action_failure_names_description_and_cause() {
        let err = SessionError::ActionFailed {
            description: "bus error".to_owned(),
            source: Box::new(SessionError::Engine(EngineError::Fault {
                address: 0x10C0_0000,
                message: "unmapped".to_owned(),
            })),
        };
        assert_eq!(
            err.to_string(),
            "deferred action `bus error` failed: engine fault at 0x10c00000: unmapped"
        );
    }

    #[test]
    fn chunk_errors_are_session_file_errors() {
        let err = SessionError::from(ChunkError::MissingChunk(Tag::new(*b"DTyp")));
        assert!(err.is_session_file_error());
        assert!(!SessionError::NotInitialized.is_session_file_error());
    }

    #[test]
    fn subsystem_helper_formats_message() {
        let err = SessionError::subsystem("screen", 42);
        assert_eq!(err.to_string(), "subsystem `screen` failed: 42");
    }
}
