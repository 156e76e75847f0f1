//! The session: one emulated machine and its run/suspend lifecycle.
//!
//! All run-state bookkeeping lives in one [`Shared`] record behind one mutex
//! and one condition variable. Every mutation is followed by a broadcast and
//! every wait re-checks its own predicate, because the execution thread and
//! any number of controller threads wait on the same condition with
//! different predicates.
//!
//! A second mutex/condvar pair exists only so the execution thread can nap
//! (`sleep`) and be woken early by input without touching the shared lock.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use crate::action::ActionQueue;
use crate::breaks::BreakRegistry;
use crate::control::ControlAction;
use crate::dialog::{DialogItemId, DialogRequest, HostDialog};
use crate::engine::ExecutionEngine;
use crate::events::{Button, Clock, InputQueues, SystemClock};
use crate::horde::{HordeHooks, HordeTransition, NoHorde};
use crate::report::{ErrorReport, ErrorReporter, TracingReporter};
use crate::subsystem::{Hal, NullHal, Subsystems};
use crate::{
    Configuration, ResetType, SessionError, SessionOptions, SessionState, SuspendState,
    ThreadMode,
};

mod blocking;
mod execution;
mod input;
mod lifecycle;
mod nested;
mod persist;
mod special;

pub use lifecycle::BoundImage;
pub use nested::SubroutineExit;
pub use persist::SESSION_TAG;

/// Everything a session drives or reports to.
pub struct Collaborators {
    /// Instruction interpreter.
    pub engine: Arc<dyn ExecutionEngine>,
    /// Hardware and OS subsystems.
    pub subsystems: Subsystems,
    /// Hardware lines used for boot keys.
    pub hal: Arc<dyn Hal>,
    /// Fuzzer hooks.
    pub horde: Arc<dyn HordeHooks>,
    /// Sink for user-facing error reports.
    pub reporter: Arc<dyn ErrorReporter>,
    /// Dialog layer used when a dialog must run inline.
    pub host_dialog: Option<Arc<dyn HostDialog>>,
    /// Time source for input pacing.
    pub clock: Arc<dyn Clock>,
    /// Runtime options.
    pub options: SessionOptions,
}

impl Collaborators {
    /// Collaborators with `engine` and defaults for everything else.
    #[must_use]
    pub fn new(engine: Arc<dyn ExecutionEngine>) -> Self {
        Self {
            engine,
            subsystems: Subsystems::default(),
            hal: Arc::new(NullHal),
            horde: Arc::new(NoHorde),
            reporter: Arc::new(TracingReporter),
            host_dialog: None,
            clock: Arc::new(SystemClock::default()),
            options: SessionOptions::default(),
        }
    }

    /// Replaces the subsystems.
    #[must_use]
    pub fn with_subsystems(mut self, subsystems: Subsystems) -> Self {
        self.subsystems = subsystems;
        self
    }

    /// Replaces the HAL.
    #[must_use]
    pub fn with_hal(mut self, hal: Arc<dyn Hal>) -> Self {
        self.hal = hal;
        self
    }

    /// Replaces the fuzzer hooks.
    #[must_use]
    pub fn with_horde(mut self, horde: Arc<dyn HordeHooks>) -> Self {
        self.horde = horde;
        self
    }

    /// Replaces the error reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Installs an inline dialog layer.
    #[must_use]
    pub fn with_host_dialog(mut self, host_dialog: Arc<dyn HostDialog>) -> Self {
        self.host_dialog = Some(host_dialog);
        self
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the options.
    #[must_use]
    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }
}

/// Saved suspend counters of one nested engine invocation.
#[derive(Debug, Clone, Copy)]
struct CallFrame {
    saved: SuspendState,
}

/// Dialog hand-off between the execution thread and a controller.
#[derive(Debug, Default)]
struct DialogSlot {
    waiting: bool,
    request: Option<DialogRequest>,
    result: Option<DialogItemId>,
}

/// State guarded by the shared lock.
#[derive(Debug, Default)]
struct Shared {
    state: SessionState,
    suspend: SuspendState,
    frames: Vec<CallFrame>,
    break_on_sys_call: bool,
    stop: bool,
    dialog: DialogSlot,
    control: Option<ControlAction>,
}

impl Shared {
    fn nest_level(&self) -> usize {
        self.frames.len()
    }

    fn is_nested(&self) -> bool {
        !self.frames.is_empty()
    }

    // `Stopped` is terminal until the next `create_thread`. A nested call
    // made from a controller can outlive the execution thread.
    fn settle(&mut self, state: SessionState) {
        if self.state != SessionState::Stopped {
            self.state = state;
        }
    }

    // A controller waiting for the engine to stop keeps waiting while this
    // holds. A dialog-blocked session is parked even when nested.
    fn engine_busy(&self) -> bool {
        self.state == SessionState::Running
            || (self.is_nested() && self.state != SessionState::BlockedOnUi)
    }
}

/// Requests consumed by `execute_special`.
#[derive(Debug, Default)]
struct Schedule {
    reset: Option<ResetType>,
    reset_banks: bool,
    auto_save: bool,
    transition: Option<HordeTransition>,
    minimize_load: bool,
}

/// Session identity and open/close bookkeeping.
#[derive(Debug, Default)]
struct Identity {
    configuration: Option<Configuration>,
    file: Option<PathBuf>,
    initialized: bool,
    need_post_load: bool,
    boot_keys: Vec<Button>,
}

#[derive(Debug, Default)]
struct ThreadSlot {
    handle: Option<JoinHandle<()>>,
    id: Option<ThreadId>,
}

/// One emulated machine instance, shared as `Arc<Session>` between the
/// execution thread and its controllers.
pub struct Session {
    options: SessionOptions,
    engine: Arc<dyn ExecutionEngine>,
    subsystems: Subsystems,
    hal: Arc<dyn Hal>,
    horde: Arc<dyn HordeHooks>,
    reporter: Arc<dyn ErrorReporter>,
    host_dialog: Mutex<Option<Arc<dyn HostDialog>>>,

    shared: Mutex<Shared>,
    shared_cond: Condvar,
    wake_pending: Mutex<bool>,
    sleep_cond: Condvar,

    schedule: Mutex<Schedule>,
    deferred: ActionQueue<Session>,
    input: InputQueues,
    breaks: BreakRegistry,
    identity: Mutex<Identity>,
    thread: Mutex<ThreadSlot>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.lock_shared();
        f.debug_struct("Session")
            .field("state", &shared.state)
            .field("suspend", &shared.suspend)
            .field("nest_level", &shared.nest_level())
            .field("subsystems", &self.subsystems)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates an uninitialized, stopped session.
    #[must_use]
    pub fn new(collaborators: Collaborators) -> Arc<Self> {
        let Collaborators {
            engine,
            subsystems,
            hal,
            horde,
            reporter,
            host_dialog,
            clock,
            options,
        } = collaborators;
        let input = InputQueues::new(
            options.event_queue_capacity,
            options.button_event_threshold(),
            clock,
        );
        Arc::new(Self {
            options,
            engine,
            subsystems,
            hal,
            horde,
            reporter,
            host_dialog: Mutex::new(host_dialog),
            shared: Mutex::new(Shared::default()),
            shared_cond: Condvar::new(),
            wake_pending: Mutex::new(false),
            sleep_cond: Condvar::new(),
            schedule: Mutex::new(Schedule::default()),
            deferred: ActionQueue::new(),
            input,
            breaks: BreakRegistry::default(),
            identity: Mutex::new(Identity::default()),
            thread: Mutex::new(ThreadSlot::default()),
        })
    }

    fn lock_shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_shared<'a>(&self, guard: MutexGuard<'a, Shared>) -> MutexGuard<'a, Shared> {
        self.shared_cond
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn broadcast(&self) {
        self.shared_cond.notify_all();
    }

    fn lock_schedule(&self) -> MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_identity(&self) -> MutexGuard<'_, Identity> {
        self.identity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_thread(&self) -> MutexGuard<'_, ThreadSlot> {
        self.thread.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_cooperative(&self) -> bool {
        self.options.thread_mode == ThreadMode::Cooperative
    }

    fn report(&self, operation: &str, err: &SessionError) {
        self.reporter.report(&ErrorReport::from_error(operation, err));
    }

    /// Runtime options.
    #[must_use]
    pub const fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Configuration of the open session, if initialized.
    #[must_use]
    pub fn configuration(&self) -> Option<Configuration> {
        self.lock_identity().configuration.clone()
    }

    /// Backing file the session was opened from or last saved to.
    #[must_use]
    pub fn file(&self) -> Option<PathBuf> {
        self.lock_identity().file.clone()
    }

    /// Returns `true` between `initialize` and `dispose`.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.lock_identity().initialized
    }

    /// Current run state.
    #[must_use]
    pub fn get_session_state(&self) -> SessionState {
        self.lock_shared().state
    }

    /// Current suspend counters.
    #[must_use]
    pub fn get_suspend_state(&self) -> SuspendState {
        self.lock_shared().suspend
    }

    /// Replaces the suspend counters. Callers must hold the session stopped.
    pub fn set_suspend_state(&self, suspend: SuspendState) {
        let mut shared = self.lock_shared();
        shared.suspend = suspend;
        self.broadcast();
    }

    /// Returns `true` while a nested engine call is in progress.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.lock_shared().is_nested()
    }

    /// Depth of nested engine calls.
    #[must_use]
    pub fn nest_level(&self) -> usize {
        self.lock_shared().nest_level()
    }

    /// Returns `true` while a controller waits for a system-call boundary.
    /// Engines poll this at each system call.
    #[must_use]
    pub fn break_on_sys_call(&self) -> bool {
        self.lock_shared().break_on_sys_call
    }

    /// Returns `true` when called on the dedicated execution thread.
    #[must_use]
    pub fn in_cpu_thread(&self) -> bool {
        self.lock_thread().id == Some(thread::current().id())
    }

    /// Returns `true` when loaded state still needs its post-load work.
    #[must_use]
    pub fn need_post_load(&self) -> bool {
        self.lock_identity().need_post_load
    }

    /// Sets or clears the post-load flag.
    pub fn set_need_post_load(&self, need_post_load: bool) {
        self.lock_identity().need_post_load = need_post_load;
    }

    fn take_need_post_load(&self) -> bool {
        std::mem::take(&mut self.lock_identity().need_post_load)
    }

    /// Installs or removes the dialog layer used for inline dialogs.
    pub fn set_host_dialog(&self, host_dialog: Option<Arc<dyn HostDialog>>) {
        *self
            .host_dialog
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = host_dialog;
    }

    fn host_dialog(&self) -> Option<Arc<dyn HostDialog>> {
        self.host_dialog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
