//! Hooks for the automated event fuzzer ("Gremlin hordes").
//!
//! The fuzzer drives the session through random event sequences and asks for
//! state snapshots at safe points. Every hook defaults to doing nothing, which
//! is what a session without a fuzzer wants.

use crate::{Session, SessionError};

/// Fuzzer callbacks invoked from [`Session::execute_special`] and friends.
pub trait HordeHooks: Send + Sync {
    /// Returns `true` while a horde run is active.
    fn is_on(&self) -> bool {
        false
    }

    /// Returns `false` while recorded events are replaying or a minimization
    /// pass is running, so user input must not reach the device.
    fn accepts_user_input(&self) -> bool {
        true
    }

    /// Flushes recorded events before a reset discards them.
    fn save_events(&self) {}

    /// Periodic checkpoint of the running session.
    ///
    /// # Errors
    ///
    /// Returns an error when the checkpoint cannot be written.
    fn auto_save_state(&self, _session: &Session) -> Result<(), SessionError> {
        Ok(())
    }

    /// Saves the state every gremlin starts from.
    ///
    /// # Errors
    ///
    /// Returns an error when the state cannot be written.
    fn save_root_state(&self, _session: &Session) -> Result<(), SessionError> {
        Ok(())
    }

    /// Saves the state of a gremlin interrupted mid-run.
    ///
    /// # Errors
    ///
    /// Returns an error when the state cannot be written.
    fn save_suspended_state(&self, _session: &Session) -> Result<(), SessionError> {
        Ok(())
    }

    /// Loads the root state. Returns `false` when there is none.
    ///
    /// # Errors
    ///
    /// Returns an error when an existing state cannot be read.
    fn load_root_state(&self, _session: &Session) -> Result<bool, SessionError> {
        Ok(false)
    }

    /// Loads the suspended state. Returns `false` when there is none.
    ///
    /// # Errors
    ///
    /// Returns an error when an existing state cannot be read.
    fn load_suspended_state(&self, _session: &Session) -> Result<bool, SessionError> {
        Ok(false)
    }

    /// Starts the next gremlin from a freshly loaded root state.
    ///
    /// # Errors
    ///
    /// Returns an error when the gremlin cannot start.
    fn start_from_loaded_root_state(&self, _session: &Session) -> Result<(), SessionError> {
        Ok(())
    }

    /// Resumes a gremlin from a freshly loaded suspended state.
    ///
    /// # Errors
    ///
    /// Returns an error when the gremlin cannot resume.
    fn start_from_loaded_suspended_state(&self, _session: &Session) -> Result<(), SessionError> {
        Ok(())
    }

    /// Switches the horde on or off.
    fn turn_on(&self, _on: bool) {}

    /// Loads the starting state of an event-log minimization pass.
    ///
    /// # Errors
    ///
    /// Returns an error when the state cannot be read.
    fn minimize_load_initial_state(&self, _session: &Session) -> Result<(), SessionError> {
        Ok(())
    }
}

/// [`HordeHooks`] for sessions without a fuzzer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHorde;

impl HordeHooks for NoHorde {}

/// One of the mutually exclusive fuzzer state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HordeTransition {
    /// Save the root state.
    SaveRoot,
    /// Save the suspended state.
    SaveSuspended,
    /// Load the root state.
    LoadRoot,
    /// Load the root state and start the next gremlin from it.
    NextGremlinFromRoot,
    /// Load the suspended state and resume the gremlin from it.
    NextGremlinFromSuspended,
}

impl HordeTransition {
    /// Runs the transition against `hooks`.
    ///
    /// A "next gremlin" transition whose state cannot be loaded switches the
    /// horde off instead of starting anything.
    ///
    /// # Errors
    ///
    /// Propagates hook failures.
    pub fn apply(self, hooks: &dyn HordeHooks, session: &Session) -> Result<(), SessionError> {
        match self {
            Self::SaveRoot => hooks.save_root_state(session),
            Self::SaveSuspended => hooks.save_suspended_state(session),
            Self::LoadRoot => hooks.load_root_state(session).map(drop),
            Self::NextGremlinFromRoot => {
                if hooks.load_root_state(session)? {
                    hooks.start_from_loaded_root_state(session)
                } else {
                    hooks.turn_on(false);
                    Ok(())
                }
            }
            Self::NextGremlinFromSuspended => {
                if hooks.load_suspended_state(session)? {
                    hooks.start_from_loaded_suspended_state(session)
                } else {
                    hooks.turn_on(false);
                    Ok(())
                }
            }
        }
    }
}
