//! User-facing error reports with an operation and recovery pairing.

use tracing::error;

use crate::SessionError;

/// Report describing what failed and what happens next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Operation that was being performed.
    pub operation: String,
    /// What the session did, or what the user should do, as a result.
    pub recovery: String,
    /// Underlying error text.
    pub message: String,
}

impl ErrorReport {
    /// Builds a report for `err` raised while performing `operation`.
    #[must_use]
    pub fn from_error(operation: impl Into<String>, err: &SessionError) -> Self {
        let recovery = match err {
            SessionError::InvalidSessionFile { .. } | SessionError::Chunk(_) => {
                "start a new session"
            }
            SessionError::ActionFailed { .. } => "the remaining deferred actions were discarded",
            _ => "the session was suspended",
        };
        Self {
            operation: operation.into(),
            recovery: recovery.to_owned(),
            message: err.to_string(),
        }
    }
}

/// Sink for error reports, usually a host dialog or log.
pub trait ErrorReporter: Send + Sync {
    /// Delivers one report.
    fn report(&self, report: &ErrorReport);
}

/// [`ErrorReporter`] that logs through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, report: &ErrorReport) {
        error!(
            operation = %report.operation,
            recovery = %report.recovery,
            "{}",
            report.message
        );
    }
}
