//! Scoped suspend guard.

use crate::{Session, StopMethod};

/// Holds a session stopped for as long as it lives.
///
/// Construction calls [`Session::suspend_thread`]; drop calls
/// [`Session::resume_thread`] if, and only if, the suspend succeeded. Drop
/// runs on early returns and unwinding too, so helpers that need the engine
/// still cannot leak a suspended session.
#[must_use = "the session resumes as soon as the stopper is dropped"]
#[derive(Debug)]
pub struct SessionStopper<'a> {
    session: Option<&'a Session>,
    how: StopMethod,
    stopped: bool,
}

impl<'a> SessionStopper<'a> {
    /// Stops `session` using `how`. With no session nothing happens and the
    /// stopper reports not stopped.
    pub fn new(session: Option<&'a Session>, how: StopMethod) -> Self {
        let stopped = session.is_some_and(|session| session.suspend_thread(how));
        Self {
            session,
            how,
            stopped,
        }
    }

    /// Returns `true` when the session was stopped.
    #[must_use]
    pub const fn stopped(&self) -> bool {
        self.stopped
    }

    /// Returns `true` when the session is parked at a system-call boundary,
    /// so emulated OS calls can be made.
    #[must_use]
    pub fn can_call(&self) -> bool {
        self.stopped && self.how == StopMethod::OnSysCall
    }

    /// The stopped session, if any.
    #[must_use]
    pub const fn session(&self) -> Option<&'a Session> {
        self.session
    }
}

impl Drop for SessionStopper<'_> {
    fn drop(&mut self) {
        if self.stopped {
            if let Some(session) = self.session {
                session.resume_thread();
            }
        }
    }
}
