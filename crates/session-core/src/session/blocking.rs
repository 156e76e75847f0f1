//! Suspend/resume protocol, dialog blocking and the execution thread's nap.

use std::sync::{MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{DialogSlot, Session, Shared};
use crate::dialog::{DialogItemId, DialogRequest, HostDialog};
use crate::stopper::SessionStopper;
use crate::{SessionState, StopMethod, SuspendReason, SuspendState};

impl Session {
    /// Asks the execution context to stop and waits until it has.
    ///
    /// Returns `true` when the session reached the state `how` asks for.
    /// Every successful call must be paired with one
    /// [`Session::resume_thread`]; a failed call leaves nothing behind.
    ///
    /// `Now` succeeds once the engine is not running, including while the
    /// session is blocked on a dialog. `OnCycle` additionally needs the
    /// session suspended or stopped. `OnSysCall` succeeds only when the
    /// engine parked at a system-call boundary.
    ///
    /// Calling this from the execution thread would wait forever, so it logs
    /// and returns `false` instead.
    pub fn suspend_thread(&self, how: StopMethod) -> bool {
        if how == StopMethod::None {
            return false;
        }
        if self.in_cpu_thread() {
            warn!(?how, "suspend_thread called on the execution thread");
            return false;
        }

        let raises_ui = matches!(how, StopMethod::Now | StopMethod::OnCycle);
        let wants_sys_call = how == StopMethod::OnSysCall;
        {
            let mut shared = self.lock_shared();
            if raises_ui {
                shared.suspend.raise(SuspendReason::UiThread);
            }
            shared.break_on_sys_call = wants_sys_call;
            self.broadcast();
            self.engine.check_after_cycle();
        }

        let mut shared = if self.is_cooperative() {
            self.drive_until_parked(wants_sys_call)
        } else {
            self.wake_sleeper();
            self.wait_until_parked(wants_sys_call)
        };

        let stopped = match how {
            StopMethod::None => false,
            StopMethod::Now => shared.state != SessionState::Running,
            StopMethod::OnCycle => {
                matches!(
                    shared.state,
                    SessionState::Suspended | SessionState::Stopped
                ) && shared.suspend.ui_thread() > 0
            }
            StopMethod::OnSysCall => {
                shared.state == SessionState::Suspended && shared.suspend.sys_call()
            }
        };
        if stopped && wants_sys_call {
            shared.suspend.raise(SuspendReason::UiThread);
        }
        shared.break_on_sys_call = false;
        if !stopped && raises_ui {
            self.release_ui(&mut shared);
        }
        self.broadcast();
        debug!(?how, stopped, state = %shared.state, suspend = %shared.suspend, "suspend_thread finished");
        stopped
    }

    fn wait_until_parked(&self, wants_sys_call: bool) -> MutexGuard<'_, Shared> {
        let mut shared = self.lock_shared();
        while shared.engine_busy() {
            // A reset on the execution thread clears the flag; put it back.
            shared.break_on_sys_call = wants_sys_call;
            self.broadcast();
            shared = self.wait_shared(shared);
        }
        shared
    }

    fn drive_until_parked(&self, wants_sys_call: bool) -> MutexGuard<'_, Shared> {
        let mut shared = self.lock_shared();
        shared.suspend.clear(SuspendReason::Timeout);
        while shared.state == SessionState::Suspended
            && !shared.suspend.is_active()
            && !shared.stop
        {
            drop(shared);
            self.execute_incremental();
            shared = self.lock_shared();
            shared.suspend.clear(SuspendReason::Timeout);
            shared.break_on_sys_call = wants_sys_call;
        }
        shared
    }

    /// Releases one successful [`Session::suspend_thread`].
    pub fn resume_thread(&self) {
        let mut shared = self.lock_shared();
        self.release_ui(&mut shared);
        self.broadcast();
    }

    fn release_ui(&self, shared: &mut Shared) {
        if shared.suspend.ui_thread() == 0 {
            debug!("resume_thread without a matching suspend; ignored");
            return;
        }
        shared.suspend.lower(SuspendReason::UiThread);
        if shared.suspend.ui_thread() == 0 && shared.suspend.external() == 0 {
            shared.suspend.clear(SuspendReason::SysCall);
        }
        self.resume_if_idle(shared);
    }

    // Never transitions while nested: the nested caller's frame owns the
    // counters until it pops.
    fn resume_if_idle(&self, shared: &mut Shared) {
        if !shared.suspend.is_active()
            && shared.state == SessionState::Suspended
            && !shared.is_nested()
            && !self.is_cooperative()
        {
            shared.state = SessionState::Running;
        }
    }

    fn raise_suspend(&self, apply: impl FnOnce(&mut SuspendState)) {
        let mut shared = self.lock_shared();
        apply(&mut shared.suspend);
        self.broadcast();
        self.engine.check_after_cycle();
    }

    /// Parks the session on the debugger after a processor exception.
    pub fn schedule_suspend_exception(&self) {
        self.raise_suspend(|suspend| suspend.raise(SuspendReason::Debugger));
    }

    /// Parks the session on the debugger after an emulator error.
    pub fn schedule_suspend_error(&self) {
        self.raise_suspend(|suspend| suspend.raise(SuspendReason::Debugger));
    }

    /// Releases one debugger suspend.
    pub fn resume_debugger(&self) {
        let mut shared = self.lock_shared();
        shared.suspend.lower(SuspendReason::Debugger);
        self.resume_if_idle(&mut shared);
        self.broadcast();
    }

    /// Host-control stop request. Also marks a system-call boundary so OS
    /// calls can be made while stopped.
    pub fn schedule_suspend_external(&self) {
        self.raise_suspend(|suspend| {
            suspend.raise(SuspendReason::External);
            suspend.raise(SuspendReason::SysCall);
        });
    }

    /// Releases one host-control request. Inside a nested call the counter
    /// may go negative until the frame pops; outside one it is clamped and
    /// the session resumes once nothing else holds it.
    pub fn schedule_resume_external(&self) {
        let mut shared = self.lock_shared();
        shared.suspend.lower(SuspendReason::External);
        if !shared.is_nested() {
            shared.suspend.clamp_external();
            self.resume_if_idle(&mut shared);
        }
        self.broadcast();
        self.engine.check_after_cycle();
    }

    /// Timer expiry.
    pub fn schedule_suspend_timeout(&self) {
        self.raise_suspend(|suspend| suspend.raise(SuspendReason::Timeout));
    }

    /// Called by the engine at a system-call boundary while
    /// [`Session::break_on_sys_call`] holds.
    pub fn schedule_suspend_sys_call(&self) {
        self.raise_suspend(|suspend| suspend.raise(SuspendReason::SysCall));
    }

    /// Called by the engine when a nested subroutine returns.
    pub fn schedule_suspend_subroutine_return(&self) {
        self.raise_suspend(|suspend| suspend.raise(SuspendReason::SubroutineReturn));
    }

    /// Shows a dialog on behalf of the execution context and returns the
    /// chosen item, or `None` when nobody answered.
    ///
    /// On the dedicated execution thread the request is parked for a
    /// controller ([`Session::pending_dialog`], [`Session::service_dialog`])
    /// and the thread waits in `BlockedOnUi` until it is answered or the
    /// session stops. Anywhere else the installed [`HostDialog`] runs inline.
    pub fn block_on_dialog(&self, request: DialogRequest) -> Option<DialogItemId> {
        if self.is_cooperative() || !self.in_cpu_thread() {
            return self.run_dialog_inline(&request);
        }

        let mut shared = self.lock_shared();
        let prior = shared.state;
        info!(title = %request.title, "execution blocked on dialog");
        shared.dialog = DialogSlot {
            waiting: true,
            request: Some(request),
            result: None,
        };
        shared.state = SessionState::BlockedOnUi;
        self.broadcast();

        while shared.dialog.result.is_none() && !shared.stop {
            shared = self.wait_shared(shared);
        }

        let result = shared.dialog.result.take();
        shared.dialog = DialogSlot::default();
        shared.state = prior;
        self.broadcast();
        debug!(?result, "dialog finished");
        result
    }

    fn run_dialog_inline(&self, request: &DialogRequest) -> Option<DialogItemId> {
        let Some(host) = self.host_dialog() else {
            warn!(title = %request.title, "no dialog layer installed; dialog dismissed");
            return None;
        };

        let parks_thread = !self.is_cooperative() && !self.is_nested();
        let _stopper = SessionStopper::new(parks_thread.then_some(self), StopMethod::Now);

        let prior = {
            let mut shared = self.lock_shared();
            let prior = shared.state;
            shared.settle(SessionState::BlockedOnUi);
            self.broadcast();
            prior
        };
        let result = host.run_dialog(request);
        let mut shared = self.lock_shared();
        shared.settle(prior);
        self.broadcast();
        Some(result)
    }

    /// Dialog the execution thread is waiting on, if any.
    #[must_use]
    pub fn pending_dialog(&self) -> Option<DialogRequest> {
        let shared = self.lock_shared();
        if shared.dialog.waiting {
            shared.dialog.request.clone()
        } else {
            None
        }
    }

    /// Runs the pending dialog through `host` and posts its answer. Returns
    /// `false` when no dialog was pending.
    pub fn service_dialog(&self, host: &dyn HostDialog) -> bool {
        let request = {
            let mut shared = self.lock_shared();
            if !shared.dialog.waiting || shared.dialog.result.is_some() {
                return false;
            }
            shared.dialog.request.take()
        };
        let Some(request) = request else {
            return false;
        };
        let item = host.run_dialog(&request);
        self.unblock_dialog(item)
    }

    /// Posts `item` as the answer to the pending dialog. Returns `false`
    /// when nothing is waiting.
    pub fn unblock_dialog(&self, item: DialogItemId) -> bool {
        let mut shared = self.lock_shared();
        if !shared.dialog.waiting {
            debug!(?item, "dialog answer with no dialog pending; ignored");
            return false;
        }
        shared.dialog.result = Some(item);
        self.broadcast();
        true
    }

    /// Naps the calling thread for up to `duration`, returning early when
    /// input arrives or a controller asks the session to stop.
    pub fn sleep(&self, duration: Duration) {
        let pending = self
            .wake_pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (mut pending, _) = self
            .sleep_cond
            .wait_timeout_while(pending, duration, |pending| !*pending)
            .unwrap_or_else(PoisonError::into_inner);
        *pending = false;
    }

    /// Ends a current or the next [`Session::sleep`] early.
    pub fn wake_sleeper(&self) {
        *self
            .wake_pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = true;
        self.sleep_cond.notify_all();
    }
}
