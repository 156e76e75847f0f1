//! Instruction interpreter seam.

use session_file::SessionFile;

use crate::{Session, SessionError};

/// CPU instruction interpreter driven by a [`Session`].
///
/// Methods take `&self` because calls nest: a nested subroutine or a reset
/// requested from inside `execute` re-enters the engine while an outer
/// `execute` is still on the stack. Implementations keep their own locking
/// short enough to allow that.
pub trait ExecutionEngine: Send + Sync {
    /// Runs instructions until [`Session::check_for_break`] reports `true`.
    ///
    /// While running, the engine calls back into the session:
    /// [`Session::execute_special`] when its check-after-cycle flag is set,
    /// [`Session::schedule_suspend_sys_call`] at a system-call boundary while
    /// [`Session::break_on_sys_call`] holds, and
    /// [`Session::schedule_suspend_subroutine_return`] when a nested
    /// subroutine returns.
    ///
    /// # Errors
    ///
    /// Returns an error for failures the engine cannot recover from itself.
    fn execute(&self, session: &Session) -> Result<(), SessionError>;

    /// Resets processor state. `hardware` is `true` for every reset except a
    /// system reset.
    fn reset(&self, hardware: bool);

    /// Writes processor state.
    ///
    /// # Errors
    ///
    /// Returns an error when the state cannot be encoded.
    fn save(&self, file: &mut SessionFile) -> Result<(), SessionError>;

    /// Restores processor state. Clears the file's reload flag when its data
    /// is missing.
    ///
    /// # Errors
    ///
    /// Returns an error when present state cannot be decoded.
    fn load(&self, file: &mut SessionFile) -> Result<(), SessionError>;

    /// Hint that suspend or schedule flags changed and should be looked at
    /// before the next instruction.
    ///
    /// Called with the session's shared lock held, so it must not block or
    /// call back into the session.
    fn check_after_cycle(&self);
}
