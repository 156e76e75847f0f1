//! Execution thread lifecycle and the top-level run loop.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, MutexGuard};
use std::thread;

use tracing::{debug, error, info, warn};

use super::{Session, Shared};
use crate::control::ControlAction;
use crate::{EngineError, SessionError, SessionState, SuspendReason, SuspendState};

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "engine panicked".to_owned())
}

impl Session {
    /// Prepares the session to run and, in dedicated mode, starts the
    /// execution thread.
    ///
    /// With `suspended` the thread starts parked on one UI-thread suspend,
    /// which the caller releases with [`Session::resume_thread`]. In
    /// cooperative mode no thread is started and the session waits in
    /// `Suspended` for [`Session::execute_incremental`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ThreadRunning`] when a thread already exists and
    /// [`SessionError::ThreadSpawn`] when the OS refuses a new one.
    pub fn create_thread(self: &Arc<Self>, suspended: bool) -> Result<(), SessionError> {
        let mut slot = self.lock_thread();
        if slot.handle.is_some() {
            return Err(SessionError::ThreadRunning);
        }

        {
            let mut shared = self.lock_shared();
            shared.stop = false;
            shared.frames.clear();
            shared.break_on_sys_call = false;
            shared.suspend = SuspendState::CLEAR;
            if suspended {
                shared.suspend.raise(SuspendReason::UiThread);
            }
            shared.state = if suspended || self.is_cooperative() {
                SessionState::Suspended
            } else {
                SessionState::Running
            };
            self.broadcast();
        }

        if self.is_cooperative() {
            debug!("cooperative session ready");
            return Ok(());
        }

        let session = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(self.options.thread_name.clone())
            .spawn(move || session.run());
        match spawned {
            Ok(handle) => {
                slot.id = Some(handle.thread().id());
                slot.handle = Some(handle);
                info!(suspended, thread = %self.options.thread_name, "execution thread started");
                Ok(())
            }
            Err(err) => {
                let mut shared = self.lock_shared();
                shared.state = SessionState::Stopped;
                self.broadcast();
                Err(SessionError::ThreadSpawn(err))
            }
        }
    }

    /// Stops the execution thread and waits for it to exit.
    ///
    /// Safe to call in any state and more than once. Calling it from the
    /// execution thread itself does nothing.
    pub fn destroy_thread(&self) {
        if self.in_cpu_thread() {
            warn!("destroy_thread called on the execution thread; ignored");
            return;
        }

        let handle = self.lock_thread().handle.take();
        let Some(handle) = handle else {
            let mut shared = self.lock_shared();
            shared.stop = true;
            shared.state = SessionState::Stopped;
            self.broadcast();
            return;
        };

        {
            let mut shared = self.lock_shared();
            shared.stop = true;
            shared.suspend.raise(SuspendReason::UiThread);
            self.broadcast();
        }
        self.wake_sleeper();

        {
            let mut shared = self.lock_shared();
            while shared.state != SessionState::Stopped {
                shared = self.wait_shared(shared);
            }
        }

        if handle.join().is_err() {
            error!("execution thread panicked while stopping");
        }
        self.lock_thread().id = None;
        info!("execution thread stopped");
    }

    /// Returns `true` while a dedicated execution thread exists.
    #[must_use]
    pub fn has_thread(&self) -> bool {
        self.lock_thread().handle.is_some()
    }

    fn run(&self) {
        debug!("execution thread running");
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.run_loop())) {
            error!(message = %panic_message(payload.as_ref()), "execution thread panicked");
        }
        let mut shared = self.lock_shared();
        shared.state = SessionState::Stopped;
        self.broadcast();
    }

    fn run_loop(&self) {
        let mut shared = self.lock_shared();
        while !shared.stop {
            if shared.is_nested() || shared.suspend.is_active() {
                while !shared.stop && (shared.is_nested() || shared.suspend.is_active()) {
                    if !shared.is_nested() && shared.state != SessionState::Suspended {
                        shared.state = SessionState::Suspended;
                        self.broadcast();
                    }
                    shared = self.wait_shared(shared);
                }
                continue;
            }

            if let Some(action) = shared.control.take() {
                drop(shared);
                self.perform_control(action);
                shared = self.lock_shared();
                continue;
            }

            let (guard, result) = self.call_cpu(shared, SessionState::Running);
            shared = guard;
            if let Err(err) = result {
                drop(shared);
                self.engine_failed("execute", &err);
                shared = self.lock_shared();
            }
        }
    }

    /// Runs the engine with the shared lock released.
    ///
    /// The state reads `Running` for the duration and `after` once the engine
    /// returns, unless the thread was destroyed meanwhile. A panic inside the engine comes back as
    /// [`EngineError::Panicked`].
    pub(super) fn call_cpu<'a>(
        &'a self,
        mut shared: MutexGuard<'a, Shared>,
        after: SessionState,
    ) -> (MutexGuard<'a, Shared>, Result<(), SessionError>) {
        shared.state = SessionState::Running;
        self.broadcast();
        drop(shared);

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.engine.execute(self)))
            .unwrap_or_else(|payload| {
                Err(EngineError::Panicked(panic_message(payload.as_ref())).into())
            });

        let mut shared = self.lock_shared();
        shared.settle(after);
        self.broadcast();
        (shared, result)
    }

    /// Reports an engine failure and parks the session on the debugger.
    pub(super) fn engine_failed(&self, operation: &str, err: &SessionError) {
        error!(%err, operation, "engine failed");
        self.report(operation, err);
        let mut shared = self.lock_shared();
        shared.suspend.raise(SuspendReason::Debugger);
        self.broadcast();
    }

    pub(super) fn perform_control(&self, action: ControlAction) {
        match action {
            ControlAction::Reset(reset) => {
                if let Err(err) = self.reset(reset) {
                    error!(%err, "deferred reset failed");
                    self.report("reset", &err);
                }
            }
            ControlAction::TopLevel {
                description,
                action,
            } => {
                debug!(%description, "running top-level action");
                action(self);
            }
        }
    }

    /// Runs one engine slice on the calling thread. Used in cooperative mode,
    /// where the host calls this from its own event loop.
    ///
    /// Does nothing while the session is stopped or blocked on a dialog, or
    /// while any suspend reason is active. A pending control action is
    /// performed after the slice.
    pub fn execute_incremental(&self) {
        let mut shared = self.lock_shared();
        shared.suspend.clear(SuspendReason::Timeout);
        if matches!(
            shared.state,
            SessionState::BlockedOnUi | SessionState::Stopped
        ) {
            return;
        }
        debug_assert!(
            !shared.is_nested(),
            "execute_incremental called inside a nested call"
        );

        if !shared.suspend.is_active() && shared.control.is_none() {
            let prior = shared.state;
            let (guard, result) = self.call_cpu(shared, prior);
            shared = guard;
            if let Err(err) = result {
                drop(shared);
                self.engine_failed("execute", &err);
                shared = self.lock_shared();
            }
        }

        let control = shared.control.take();
        drop(shared);
        if let Some(action) = control {
            self.perform_control(action);
        }
    }

    /// Queues a control action for the top-level loop. A pending action is
    /// replaced.
    pub fn request_control(&self, action: ControlAction) {
        let mut shared = self.lock_shared();
        debug!(action = %action.describe(), "control action requested");
        if let Some(previous) = shared.control.replace(action) {
            warn!(previous = %previous.describe(), "pending control action replaced");
        }
        self.broadcast();
        self.engine.check_after_cycle();
    }

    /// Returns `true` while a control action waits for the top-level loop.
    #[must_use]
    pub fn has_pending_control(&self) -> bool {
        self.lock_shared().control.is_some()
    }

    /// Polled by the engine between instructions. Returns `true` when it
    /// should return to its caller.
    ///
    /// Inside a nested call a host-control request alone does not break;
    /// it is absorbed into the caller's counters instead.
    #[must_use]
    pub fn check_for_break(&self) -> bool {
        let shared = self.lock_shared();
        if shared.stop || shared.control.is_some() {
            return true;
        }
        if shared.is_nested() {
            shared.suspend.is_active_ignoring_external()
        } else {
            shared.suspend.is_active()
        }
    }
}
