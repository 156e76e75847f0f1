//! Session lifecycle states and suspend request modes.
//!
//! | from | to | trigger |
//! |---|---|---|
//! | `Stopped` | `Running` / `Suspended` | `create_thread` |
//! | `Running` | `Suspended` | engine returned with a suspend reason active |
//! | `Suspended` | `Running` | `resume_thread` cleared the last reason, not nested |
//! | `Running` | `BlockedOnUi` | `block_on_dialog` from the execution context |
//! | `BlockedOnUi` | `Running` | dialog answered or stop requested |
//! | any | `Stopped` | `destroy_thread`, observed at the top of the run loop |

use std::fmt;

/// Run state of the session's execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// The execution thread has exited or was never started.
    #[default]
    Stopped,
    /// The execution thread, or a nested caller, is inside the engine.
    Running,
    /// The execution thread is parked and no nested call is in progress.
    Suspended,
    /// The execution thread is parked waiting for a host dialog answer. May
    /// occur while nested.
    BlockedOnUi,
}

impl SessionState {
    /// Returns `true` when the engine is guaranteed not to be running on the
    /// execution thread.
    #[must_use]
    pub const fn is_parked(self) -> bool {
        matches!(self, Self::Suspended | Self::BlockedOnUi)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::BlockedOnUi => "blocked-on-ui",
        })
    }
}

/// How a controller asks the execution context to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StopMethod {
    /// Do not stop.
    #[default]
    None,
    /// Stop at the next opportunity; a dialog-blocked session counts.
    Now,
    /// Stop between instructions; the session must end up suspended.
    OnCycle,
    /// Stop at the next system-call boundary so OS calls can be made.
    OnSysCall,
}
