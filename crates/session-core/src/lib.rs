//! Session execution core for the PDA emulator.
//!
//! A [`Session`] owns one emulated machine: its execution thread, the
//! suspend/resume protocol controllers use to stop it, nested re-entry into
//! the engine, deferred work run at safe points, and saving and restoring
//! the whole machine through [`session_file`].

/// Error taxonomy for sessions and engines.
pub mod error;
pub use error::{EngineError, SessionError};

/// Independent suspend-reason counters.
pub mod suspend;
pub use suspend::{SuspendReason, SuspendState};

/// Run states and stop modes.
pub mod state;
pub use state::{SessionState, StopMethod};

/// Machine configuration, reset kinds and runtime options.
pub mod config;
pub use config::{
    Configuration, Device, ResetKind, ResetType, RomSource, SessionOptions, ThreadMode,
    DEFAULT_BUTTON_EVENT_THRESHOLD_MS, DEFAULT_EVENT_QUEUE_CAPACITY, DEFAULT_THREAD_NAME,
};

/// Deferred actions drained at safe points.
pub mod action;
pub use action::{Action, ActionFn, ActionQueue};

/// Input events, bounded queues and input pacing clocks.
pub mod events;
pub use events::{
    Button, ButtonEvent, Clock, EventQueue, EventQueueFull, InputQueues, KeyEvent, ManualClock,
    PenEvent, Point, SystemClock,
};

/// Instruction interpreter seam.
pub mod engine;
pub use engine::ExecutionEngine;

/// Hardware and OS subsystem seams.
pub mod subsystem;
pub use subsystem::{Hal, NullHal, NullSubsystem, Subsystem, Subsystems};

/// Instruction and data break handler registry.
pub mod breaks;
pub use breaks::{BreakRegistry, DataBreakHandler, InstructionBreakHandler};

/// Modal dialogs answered by the host.
pub mod dialog;
pub use dialog::{DialogItemId, DialogRequest, HostDialog};

/// Automated event fuzzer hooks.
pub mod horde;
pub use horde::{HordeHooks, HordeTransition, NoHorde};

/// User-facing error reports.
pub mod report;
pub use report::{ErrorReport, ErrorReporter, TracingReporter};

/// Control actions performed by the top-level loop.
pub mod control;
pub use control::{ControlAction, TopLevelFn};

/// The session and its execution protocol.
pub mod session;
pub use session::{BoundImage, Collaborators, Session, SubroutineExit, SESSION_TAG};

/// Scoped suspend guard.
pub mod stopper;
pub use stopper::SessionStopper;

/// Process-wide current-session slot.
pub mod registry;

/// Deterministic collaborators for tests.
pub mod testing;

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
#[cfg(test)]
use tempfile as _;
