//! Nested engine invocations for calling emulated subroutines.

use tracing::{debug, trace};

use super::{CallFrame, Session};
use crate::{SessionError, SuspendState};

/// Why a nested call returned to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubroutineExit {
    /// The subroutine returned normally.
    Returned,
    /// A debugger suspend was requested; the caller should unwind to it.
    Debugger,
    /// The session is being stopped.
    Stopped,
    /// A control action is pending; the caller should unwind to the top
    /// level.
    ControlPending,
}

impl Session {
    /// Runs the engine on the calling thread until the current emulated
    /// subroutine returns.
    ///
    /// The caller's suspend counters are saved and zeroed for the duration.
    /// UI-thread, host-control, timer and system-call requests that arrive
    /// meanwhile are absorbed into the saved copy and the call keeps running;
    /// a debugger request, a stop or a pending control action ends it early.
    /// On exit the saved counters are restored with a negative host-control
    /// count clamped to zero, and the session state is put back to what it
    /// was on entry. A debugger request raised inside the call stays visible
    /// to the caller; the call's own subroutine-return flag does not.
    ///
    /// # Errors
    ///
    /// Returns the engine's error after the caller's counters are restored.
    pub fn execute_subroutine(&self) -> Result<SubroutineExit, SessionError> {
        let mut shared = self.lock_shared();
        let prior_state = shared.state;
        let saved = shared.suspend;
        shared.suspend = SuspendState::CLEAR;
        shared.frames.push(CallFrame { saved });
        debug!(depth = shared.nest_level(), "entering nested call");
        self.broadcast();

        let outcome = loop {
            if shared.stop {
                break Ok(SubroutineExit::Stopped);
            }
            if shared.control.is_some() {
                break Ok(SubroutineExit::ControlPending);
            }

            let (guard, result) = self.call_cpu(shared, prior_state);
            shared = guard;

            let super::Shared { suspend, frames, .. } = &mut *shared;
            if let Some(frame) = frames.last_mut() {
                suspend.absorb_transient(&mut frame.saved);
            }
            trace!(suspend = %shared.suspend, "nested slice finished");

            if let Err(err) = result {
                break Err(err);
            }
            if shared.suspend.subroutine_return() {
                break Ok(SubroutineExit::Returned);
            }
            if shared.suspend.debugger() > 0 {
                break Ok(SubroutineExit::Debugger);
            }
        };

        // The snapshot already carries this call's absorbed requests.
        let mut restored = shared
            .frames
            .pop()
            .map_or(SuspendState::CLEAR, |frame| frame.saved);
        restored.clamp_external();
        shared.suspend = restored;
        shared.settle(prior_state);
        debug!(depth = shared.nest_level(), exit = ?outcome, "left nested call");
        self.broadcast();
        outcome
    }
}
