//! Deterministic collaborators for driving a [`Session`] in tests.
//!
//! [`ScriptedEngine`] stands in for the instruction interpreter: every step
//! bumps a small register file, offers a system-call boundary every few
//! steps, returns from nested subroutines after a fixed number of steps and
//! runs an optional per-step hook. The recording subsystems, HAL, fuzzer
//! hooks and reporter keep a log of what the session asked of them.
//!
//! ```text
//! use session_core::testing::Fixture;
//! use session_core::{SessionOptions, SessionState, StopMethod};
//!
//! let fixture = Fixture::new(SessionOptions::default()).unwrap();
//! fixture.session.create_thread(false).unwrap();
//! assert!(fixture.session.suspend_thread(StopMethod::Now));
//! assert_eq!(fixture.session.get_session_state(), SessionState::Suspended);
//! fixture.session.resume_thread();
//! fixture.session.destroy_thread();
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use session_file::{SessionFile, Tag};

use crate::dialog::{DialogItemId, DialogRequest, HostDialog};
use crate::engine::ExecutionEngine;
use crate::events::ManualClock;
use crate::horde::HordeHooks;
use crate::report::{ErrorReport, ErrorReporter};
use crate::subsystem::{Hal, Subsystem, Subsystems};
use crate::{
    ButtonEvent, Collaborators, Configuration, Device, EngineError, ResetType, RomSource, Session,
    SessionError, SessionOptions, ThreadMode,
};

/// Chunk holding [`CpuState`].
pub const CPU_STATE_TAG: Tag = Tag::new(*b"Creg");
/// Program counter after every reset.
pub const RESET_VECTOR: u32 = 0x1000_0000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Polls `condition` until it holds or `timeout` passes. Returns the last
/// result.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return condition();
        }
        thread::sleep(Duration::from_millis(1));
    }
}

/// Small configuration used by fixtures.
#[must_use]
pub fn sample_configuration() -> Configuration {
    Configuration::new(
        Device::new("PalmIIIc"),
        64,
        RomSource::Embedded {
            name: "test-rom".to_owned(),
        },
    )
}

/// Register file of [`ScriptedEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuState {
    /// Program counter.
    pub pc: u32,
    /// Steps executed since the last reset.
    pub steps: u64,
    /// General registers.
    pub registers: [u32; 8],
}

impl Default for CpuState {
    fn default() -> Self {
        Self {
            pc: RESET_VECTOR,
            steps: 0,
            registers: [0; 8],
        }
    }
}

impl CpuState {
    fn step(&mut self) -> u64 {
        self.steps += 1;
        self.pc = self.pc.wrapping_add(2);
        let slot = usize::try_from(self.steps % 8).unwrap_or_default();
        if let Some(register) = self.registers.get_mut(slot) {
            *register = register.wrapping_mul(31).wrapping_add(self.pc);
        }
        self.steps
    }
}

/// Per-step callback: receives the session and the step number.
pub type StepHook = Arc<dyn Fn(&Session, u64) + Send + Sync>;

/// Deterministic [`ExecutionEngine`].
pub struct ScriptedEngine {
    cpu: Mutex<CpuState>,
    check_after_cycle: AtomicBool,
    sys_call_interval: u64,
    subroutine_length: u64,
    slice_steps: u64,
    nested_progress: Mutex<Vec<u64>>,
    hook: Mutex<Option<StepHook>>,
    resets: Mutex<Vec<bool>>,
    executes: AtomicU64,
    failure: Mutex<Option<EngineError>>,
}

impl std::fmt::Debug for ScriptedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedEngine")
            .field("cpu", &*lock(&self.cpu))
            .field("executes", &self.executes.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEngine {
    /// Engine with a system-call boundary every 4 steps, 16-step
    /// subroutines and 64-step slices.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cpu: Mutex::new(CpuState::default()),
            check_after_cycle: AtomicBool::new(false),
            sys_call_interval: 4,
            subroutine_length: 16,
            slice_steps: 64,
            nested_progress: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
            resets: Mutex::new(Vec::new()),
            executes: AtomicU64::new(0),
            failure: Mutex::new(None),
        }
    }

    /// Steps a nested subroutine runs before it returns.
    #[must_use]
    pub fn with_subroutine_length(mut self, steps: u64) -> Self {
        self.subroutine_length = steps.max(1);
        self
    }

    /// Steps per `execute` call. Cooperative sessions see a timer expiry at
    /// the end of each slice.
    #[must_use]
    pub fn with_slice_steps(mut self, steps: u64) -> Self {
        self.slice_steps = steps.max(1);
        self
    }

    /// Steps between system-call boundaries.
    #[must_use]
    pub fn with_sys_call_interval(mut self, steps: u64) -> Self {
        self.sys_call_interval = steps.max(1);
        self
    }

    /// Installs a per-step hook, replacing any previous one.
    pub fn on_step(&self, hook: impl Fn(&Session, u64) + Send + Sync + 'static) {
        *lock(&self.hook) = Some(Arc::new(hook));
    }

    /// Removes the per-step hook.
    pub fn clear_hook(&self) {
        *lock(&self.hook) = None;
    }

    /// Makes the next `execute` call fail with `error`.
    pub fn fail_next_execute(&self, error: EngineError) {
        *lock(&self.failure) = Some(error);
    }

    /// Snapshot of the register file.
    #[must_use]
    pub fn cpu_state(&self) -> CpuState {
        lock(&self.cpu).clone()
    }

    /// Steps executed since the last reset.
    #[must_use]
    pub fn steps(&self) -> u64 {
        lock(&self.cpu).steps
    }

    /// `hardware` argument of every reset so far.
    #[must_use]
    pub fn resets(&self) -> Vec<bool> {
        lock(&self.resets).clone()
    }

    /// Number of `execute` calls so far.
    #[must_use]
    pub fn execute_count(&self) -> u64 {
        self.executes.load(Ordering::SeqCst)
    }

    fn advance_subroutine(&self, depth: usize) -> bool {
        let mut progress = lock(&self.nested_progress);
        progress.resize(depth, 0);
        let Some(counter) = progress.last_mut() else {
            return false;
        };
        *counter += 1;
        if *counter >= self.subroutine_length {
            *counter = 0;
            true
        } else {
            false
        }
    }
}

impl ExecutionEngine for ScriptedEngine {
    fn execute(&self, session: &Session) -> Result<(), SessionError> {
        self.executes.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.failure).take() {
            return Err(error.into());
        }
        let depth = session.nest_level();
        let cooperative = session.options().thread_mode == ThreadMode::Cooperative;

        let mut slice = 0;
        loop {
            if self.check_after_cycle.swap(false, Ordering::SeqCst) {
                session.execute_special(false)?;
            }
            if session.check_for_break() {
                return Ok(());
            }

            let step = lock(&self.cpu).step();
            let hook = lock(&self.hook).clone();
            if let Some(hook) = hook {
                hook(session, step);
            }
            if step % self.sys_call_interval == 0 && session.break_on_sys_call() {
                session.schedule_suspend_sys_call();
            }
            if depth > 0 && self.advance_subroutine(depth) {
                session.schedule_suspend_subroutine_return();
            }

            slice += 1;
            if slice >= self.slice_steps {
                if !cooperative {
                    return Ok(());
                }
                session.schedule_suspend_timeout();
                slice = 0;
            }
            thread::yield_now();
        }
    }

    fn reset(&self, hardware: bool) {
        *lock(&self.cpu) = CpuState::default();
        lock(&self.nested_progress).clear();
        lock(&self.resets).push(hardware);
    }

    fn save(&self, file: &mut SessionFile) -> Result<(), SessionError> {
        file.write_state(CPU_STATE_TAG, &*lock(&self.cpu))?;
        Ok(())
    }

    fn load(&self, file: &mut SessionFile) -> Result<(), SessionError> {
        match file.read_state::<CpuState>(CPU_STATE_TAG)? {
            Some(cpu) => *lock(&self.cpu) = cpu,
            None => file.set_can_reload(false),
        }
        Ok(())
    }

    fn check_after_cycle(&self) {
        self.check_after_cycle.store(true, Ordering::SeqCst);
    }
}

/// Shared, ordered log of calls made to the recording collaborators.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    /// Appends `entry`.
    pub fn record(&self, entry: impl Into<String>) {
        lock(&self.entries).push(entry.into());
    }

    /// Every entry so far.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        lock(&self.entries).clone()
    }

    /// Entries starting with `prefix`.
    #[must_use]
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        lock(&self.entries)
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}

fn tag_for(name: &str) -> Tag {
    let mut bytes = *b"____";
    for (slot, byte) in bytes.iter_mut().zip(name.bytes()) {
        *slot = byte;
    }
    Tag::new(bytes)
}

/// Memory subsystem backed by a plain byte vector.
#[derive(Debug)]
pub struct TestMemory {
    ram: Mutex<Vec<u8>>,
    journal: Arc<Journal>,
}

impl TestMemory {
    /// Creates an empty memory logging to `journal`.
    #[must_use]
    pub const fn new(journal: Arc<Journal>) -> Self {
        Self {
            ram: Mutex::new(Vec::new()),
            journal,
        }
    }

    /// Writes one byte. Out-of-range writes are ignored.
    pub fn poke(&self, address: usize, value: u8) {
        if let Some(byte) = lock(&self.ram).get_mut(address) {
            *byte = value;
        }
    }

    /// Reads one byte.
    #[must_use]
    pub fn peek(&self, address: usize) -> Option<u8> {
        lock(&self.ram).get(address).copied()
    }

    /// Copy of the whole RAM.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        lock(&self.ram).clone()
    }
}

impl Subsystem for TestMemory {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn initialize(&self, configuration: &Configuration) -> Result<(), SessionError> {
        *lock(&self.ram) = vec![0; configuration.ram_size_bytes()];
        self.journal.record("memory.initialize");
        Ok(())
    }

    fn dispose(&self) {
        lock(&self.ram).clear();
        self.journal.record("memory.dispose");
    }

    fn reset(&self, reset: ResetType) -> Result<(), SessionError> {
        self.journal.record(format!("memory.reset {:?}", reset.kind));
        Ok(())
    }

    fn save(&self, file: &mut SessionFile) -> Result<(), SessionError> {
        file.write_ram_image(&lock(&self.ram))?;
        self.journal.record("memory.save");
        Ok(())
    }

    fn load(&self, file: &mut SessionFile) -> Result<(), SessionError> {
        let image = file.read_ram_image()?;
        let mut ram = lock(&self.ram);
        match image {
            Some(image) if image.len() == ram.len() => *ram = image,
            _ => file.set_can_reload(false),
        }
        self.journal.record("memory.load");
        Ok(())
    }

    fn post_load(&self) -> Result<(), SessionError> {
        self.journal.record("memory.post_load");
        Ok(())
    }

    fn reset_bank_handlers(&self) -> Result<(), SessionError> {
        self.journal.record("memory.reset_bank_handlers");
        Ok(())
    }
}

/// Subsystem with one counter of state, saved under a tag derived from its
/// name.
#[derive(Debug)]
pub struct RecordingSubsystem {
    name: &'static str,
    tag: Tag,
    value: AtomicU64,
    fail_initialize: bool,
    journal: Arc<Journal>,
}

impl RecordingSubsystem {
    /// Creates a subsystem called `name` logging to `journal`.
    #[must_use]
    pub fn new(name: &'static str, journal: Arc<Journal>) -> Self {
        Self {
            name,
            tag: tag_for(name),
            value: AtomicU64::new(0),
            fail_initialize: false,
            journal,
        }
    }

    /// Same subsystem, but `initialize` fails.
    #[must_use]
    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    /// Chunk tag the state is saved under.
    #[must_use]
    pub const fn tag(&self) -> Tag {
        self.tag
    }

    /// Current counter.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Replaces the counter.
    pub fn set_value(&self, value: u64) {
        self.value.store(value, Ordering::SeqCst);
    }
}

impl Subsystem for RecordingSubsystem {
    fn name(&self) -> &'static str {
        self.name
    }

    fn initialize(&self, _configuration: &Configuration) -> Result<(), SessionError> {
        self.journal.record(format!("{}.initialize", self.name));
        if self.fail_initialize {
            return Err(SessionError::subsystem(self.name, "initialize refused"));
        }
        Ok(())
    }

    fn dispose(&self) {
        self.journal.record(format!("{}.dispose", self.name));
    }

    fn reset(&self, reset: ResetType) -> Result<(), SessionError> {
        self.value.store(0, Ordering::SeqCst);
        self.journal
            .record(format!("{}.reset {:?}", self.name, reset.kind));
        Ok(())
    }

    fn save(&self, file: &mut SessionFile) -> Result<(), SessionError> {
        file.write_state(self.tag, &self.value())?;
        self.journal.record(format!("{}.save", self.name));
        Ok(())
    }

    fn load(&self, file: &mut SessionFile) -> Result<(), SessionError> {
        match file.read_state::<u64>(self.tag)? {
            Some(value) => self.set_value(value),
            None => file.set_can_reload(false),
        }
        self.journal.record(format!("{}.load", self.name));
        Ok(())
    }

    fn post_load(&self) -> Result<(), SessionError> {
        self.journal.record(format!("{}.post_load", self.name));
        Ok(())
    }
}

/// [`Hal`] that keeps every button event.
#[derive(Debug, Default)]
pub struct RecordingHal {
    events: Mutex<Vec<ButtonEvent>>,
}

impl RecordingHal {
    /// Every event so far.
    #[must_use]
    pub fn events(&self) -> Vec<ButtonEvent> {
        lock(&self.events).clone()
    }
}

impl Hal for RecordingHal {
    fn button_event(&self, event: ButtonEvent) {
        lock(&self.events).push(event);
    }
}

/// [`HostDialog`] that always answers with the same item.
#[derive(Debug)]
pub struct ScriptedDialog {
    answer: DialogItemId,
    requests: Mutex<Vec<DialogRequest>>,
}

impl ScriptedDialog {
    /// Dialog layer answering `answer`.
    #[must_use]
    pub const fn answering(answer: DialogItemId) -> Self {
        Self {
            answer,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request shown so far.
    #[must_use]
    pub fn requests(&self) -> Vec<DialogRequest> {
        lock(&self.requests).clone()
    }
}

impl HostDialog for ScriptedDialog {
    fn run_dialog(&self, request: &DialogRequest) -> DialogItemId {
        lock(&self.requests).push(request.clone());
        self.answer
    }
}

/// [`HordeHooks`] that counts calls and can be switched on.
#[derive(Debug)]
pub struct CountingHorde {
    on: AtomicBool,
    accepts_input: AtomicBool,
    root_available: AtomicBool,
    journal: Arc<Journal>,
}

impl CountingHorde {
    /// Hooks logging to `journal`, switched off, accepting input, with no
    /// root state.
    #[must_use]
    pub const fn new(journal: Arc<Journal>) -> Self {
        Self {
            on: AtomicBool::new(false),
            accepts_input: AtomicBool::new(true),
            root_available: AtomicBool::new(false),
            journal,
        }
    }

    /// Switches the horde on or off.
    pub fn set_on(&self, on: bool) {
        self.on.store(on, Ordering::SeqCst);
    }

    /// Sets whether user input is accepted.
    pub fn set_accepts_input(&self, accepts: bool) {
        self.accepts_input.store(accepts, Ordering::SeqCst);
    }

    /// Sets whether a root state can be loaded.
    pub fn set_root_available(&self, available: bool) {
        self.root_available.store(available, Ordering::SeqCst);
    }
}

impl HordeHooks for CountingHorde {
    fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    fn accepts_user_input(&self) -> bool {
        self.accepts_input.load(Ordering::SeqCst)
    }

    fn save_events(&self) {
        self.journal.record("horde.save_events");
    }

    fn auto_save_state(&self, _session: &Session) -> Result<(), SessionError> {
        self.journal.record("horde.auto_save_state");
        Ok(())
    }

    fn save_root_state(&self, _session: &Session) -> Result<(), SessionError> {
        self.journal.record("horde.save_root_state");
        Ok(())
    }

    fn save_suspended_state(&self, _session: &Session) -> Result<(), SessionError> {
        self.journal.record("horde.save_suspended_state");
        Ok(())
    }

    fn load_root_state(&self, _session: &Session) -> Result<bool, SessionError> {
        self.journal.record("horde.load_root_state");
        Ok(self.root_available.load(Ordering::SeqCst))
    }

    fn load_suspended_state(&self, _session: &Session) -> Result<bool, SessionError> {
        self.journal.record("horde.load_suspended_state");
        Ok(false)
    }

    fn start_from_loaded_root_state(&self, _session: &Session) -> Result<(), SessionError> {
        self.journal.record("horde.start_from_loaded_root_state");
        Ok(())
    }

    fn start_from_loaded_suspended_state(&self, _session: &Session) -> Result<(), SessionError> {
        self.journal
            .record("horde.start_from_loaded_suspended_state");
        Ok(())
    }

    fn turn_on(&self, on: bool) {
        self.journal.record(format!("horde.turn_on {on}"));
        self.set_on(on);
    }

    fn minimize_load_initial_state(&self, _session: &Session) -> Result<(), SessionError> {
        self.journal.record("horde.minimize_load_initial_state");
        Ok(())
    }
}

/// [`ErrorReporter`] that keeps every report.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<ErrorReport>>,
}

impl CollectingReporter {
    /// Every report so far.
    #[must_use]
    pub fn reports(&self) -> Vec<ErrorReport> {
        lock(&self.reports).clone()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, report: &ErrorReport) {
        lock(&self.reports).push(report.clone());
    }
}

/// A session wired to recording collaborators. Dropping the fixture stops
/// the execution thread.
#[derive(Debug)]
pub struct Fixture {
    /// Session under test.
    pub session: Arc<Session>,
    /// Its engine.
    pub engine: Arc<ScriptedEngine>,
    /// Its memory subsystem.
    pub memory: Arc<TestMemory>,
    /// Its platform subsystem.
    pub platform: Arc<RecordingSubsystem>,
    /// Log shared by subsystems and fuzzer hooks.
    pub journal: Arc<Journal>,
    /// Its HAL.
    pub hal: Arc<RecordingHal>,
    /// Its fuzzer hooks.
    pub horde: Arc<CountingHorde>,
    /// Its error reporter.
    pub reporter: Arc<CollectingReporter>,
    /// Its input clock.
    pub clock: Arc<ManualClock>,
}

impl Fixture {
    /// Fresh session from [`sample_configuration`], soft-reset.
    ///
    /// # Errors
    ///
    /// Propagates [`Session::create_new`] failures.
    pub fn new(options: SessionOptions) -> Result<Self, SessionError> {
        Self::build(options, ScriptedEngine::new(), |collaborators| {
            Session::create_new(sample_configuration(), collaborators)
        })
    }

    /// Wires `engine` and recording collaborators together and hands them to
    /// `open`.
    ///
    /// # Errors
    ///
    /// Propagates `open` failures.
    pub fn build<F>(
        options: SessionOptions,
        engine: ScriptedEngine,
        open: F,
    ) -> Result<Self, SessionError>
    where
        F: FnOnce(Collaborators) -> Result<Arc<Session>, SessionError>,
    {
        let journal = Arc::new(Journal::default());
        let engine = Arc::new(engine);
        let memory = Arc::new(TestMemory::new(Arc::clone(&journal)));
        let platform = Arc::new(RecordingSubsystem::new("platform", Arc::clone(&journal)));
        let hal = Arc::new(RecordingHal::default());
        let horde = Arc::new(CountingHorde::new(Arc::clone(&journal)));
        let reporter = Arc::new(CollectingReporter::default());
        let clock = Arc::new(ManualClock::starting_at(Duration::from_secs(1)));

        let subsystems = Subsystems {
            memory: Box::new(Arc::clone(&memory)),
            platform: Box::new(Arc::clone(&platform)),
            debug: Box::new(RecordingSubsystem::new("debug", Arc::clone(&journal))),
            host: Box::new(RecordingSubsystem::new("host", Arc::clone(&journal))),
            screen: Box::new(RecordingSubsystem::new("screen", Arc::clone(&journal))),
            errors: Box::new(RecordingSubsystem::new("errors", Arc::clone(&journal))),
            os: Box::new(RecordingSubsystem::new("os", Arc::clone(&journal))),
        };
        let collaborators = Collaborators::new(Arc::clone(&engine) as Arc<dyn ExecutionEngine>)
            .with_subsystems(subsystems)
            .with_hal(Arc::clone(&hal) as Arc<dyn Hal>)
            .with_horde(Arc::clone(&horde) as Arc<dyn HordeHooks>)
            .with_reporter(Arc::clone(&reporter) as Arc<dyn ErrorReporter>)
            .with_clock(Arc::clone(&clock) as Arc<dyn crate::Clock>)
            .with_options(options);

        let session = open(collaborators)?;
        Ok(Self {
            session,
            engine,
            memory,
            platform,
            journal,
            hal,
            horde,
            reporter,
            clock,
        })
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.session.destroy_thread();
    }
}
