//! Control actions: structured unwinds requested by the execution context.
//!
//! A control action is not an error. The engine requests one, returns at its
//! next break check, and the top-level run loop performs it before running
//! the engine again.

use std::fmt;

use crate::{ResetType, Session};

/// Boxed body of a top-level control action.
pub type TopLevelFn = Box<dyn FnOnce(&Session) + Send>;

/// Work to perform once the engine has unwound to the top-level loop.
pub enum ControlAction {
    /// Jump to the reset vector.
    Reset(ResetType),
    /// Abandon the current top-level step and run `action` instead.
    TopLevel {
        /// Description used in logs.
        description: String,
        /// Work to perform at the top level.
        action: TopLevelFn,
    },
}

impl ControlAction {
    /// Creates a [`ControlAction::TopLevel`].
    pub fn top_level<F>(description: impl Into<String>, action: F) -> Self
    where
        F: FnOnce(&Session) + Send + 'static,
    {
        Self::TopLevel {
            description: description.into(),
            action: Box::new(action),
        }
    }

    /// Short description for logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Reset(reset) => format!("reset {:?}", reset.kind),
            Self::TopLevel { description, .. } => description.clone(),
        }
    }
}

impl fmt::Debug for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reset(reset) => f.debug_tuple("Reset").field(reset).finish(),
            Self::TopLevel { description, .. } => f
                .debug_struct("TopLevel")
                .field("description", description)
                .finish_non_exhaustive(),
        }
    }
}
