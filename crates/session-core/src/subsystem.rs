//! Hardware and OS subsystem seams and their fixed visiting order.

use session_file::SessionFile;

use crate::{ButtonEvent, Configuration, ResetType, SessionError};

/// One emulated hardware or OS component with its own persistent state.
pub trait Subsystem: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Prepares the subsystem for `configuration`.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration cannot be honoured.
    fn initialize(&self, configuration: &Configuration) -> Result<(), SessionError>;

    /// Releases everything acquired by `initialize`.
    fn dispose(&self);

    /// Resets to power-on state for `reset`.
    ///
    /// # Errors
    ///
    /// Returns an error when the reset cannot complete.
    fn reset(&self, reset: ResetType) -> Result<(), SessionError>;

    /// Writes subsystem state.
    ///
    /// # Errors
    ///
    /// Returns an error when state cannot be encoded.
    fn save(&self, file: &mut SessionFile) -> Result<(), SessionError>;

    /// Restores subsystem state, clearing the file's reload flag when the
    /// saved data is missing or unusable.
    ///
    /// # Errors
    ///
    /// Returns an error for failures that make the whole load meaningless.
    fn load(&self, file: &mut SessionFile) -> Result<(), SessionError>;

    /// One-time work after a successful load, run at the next safe point.
    ///
    /// # Errors
    ///
    /// Returns an error when the post-load step fails.
    fn post_load(&self) -> Result<(), SessionError> {
        Ok(())
    }

    /// Reinstalls memory bank handlers. Only the memory subsystem acts on it.
    ///
    /// # Errors
    ///
    /// Returns an error when the bank map cannot be rebuilt.
    fn reset_bank_handlers(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

impl<T: Subsystem + ?Sized> Subsystem for std::sync::Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn initialize(&self, configuration: &Configuration) -> Result<(), SessionError> {
        (**self).initialize(configuration)
    }

    fn dispose(&self) {
        (**self).dispose();
    }

    fn reset(&self, reset: ResetType) -> Result<(), SessionError> {
        (**self).reset(reset)
    }

    fn save(&self, file: &mut SessionFile) -> Result<(), SessionError> {
        (**self).save(file)
    }

    fn load(&self, file: &mut SessionFile) -> Result<(), SessionError> {
        (**self).load(file)
    }

    fn post_load(&self) -> Result<(), SessionError> {
        (**self).post_load()
    }

    fn reset_bank_handlers(&self) -> Result<(), SessionError> {
        (**self).reset_bank_handlers()
    }
}

/// [`Subsystem`] with no state.
#[derive(Debug, Clone, Copy)]
pub struct NullSubsystem {
    name: &'static str,
}

impl NullSubsystem {
    /// Creates a stateless subsystem called `name`.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl Subsystem for NullSubsystem {
    fn name(&self) -> &'static str {
        self.name
    }

    fn initialize(&self, _configuration: &Configuration) -> Result<(), SessionError> {
        Ok(())
    }

    fn dispose(&self) {}

    fn reset(&self, _reset: ResetType) -> Result<(), SessionError> {
        Ok(())
    }

    fn save(&self, _file: &mut SessionFile) -> Result<(), SessionError> {
        Ok(())
    }

    fn load(&self, _file: &mut SessionFile) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Every subsystem a session drives, in visiting order.
///
/// Memory always comes first so later subsystems see addressable memory when
/// they reset or load. The engine slots in right after memory; the rest
/// follow in field order.
pub struct Subsystems {
    /// Memory banks.
    pub memory: Box<dyn Subsystem>,
    /// Platform (hardware register) emulation.
    pub platform: Box<dyn Subsystem>,
    /// Debugger support.
    pub debug: Box<dyn Subsystem>,
    /// Host-control support.
    pub host: Box<dyn Subsystem>,
    /// Screen.
    pub screen: Box<dyn Subsystem>,
    /// Error and alert handling.
    pub errors: Box<dyn Subsystem>,
    /// OS-emulation layer.
    pub os: Box<dyn Subsystem>,
}

impl Default for Subsystems {
    fn default() -> Self {
        Self {
            memory: Box::new(NullSubsystem::new("memory")),
            platform: Box::new(NullSubsystem::new("platform")),
            debug: Box::new(NullSubsystem::new("debug")),
            host: Box::new(NullSubsystem::new("host")),
            screen: Box::new(NullSubsystem::new("screen")),
            errors: Box::new(NullSubsystem::new("errors")),
            os: Box::new(NullSubsystem::new("os")),
        }
    }
}

impl std::fmt::Debug for Subsystems {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.in_order().iter().map(|subsystem| subsystem.name()))
            .finish()
    }
}

impl Subsystems {
    /// All subsystems, memory first.
    #[must_use]
    pub fn in_order(&self) -> [&dyn Subsystem; 7] {
        [
            self.memory.as_ref(),
            self.platform.as_ref(),
            self.debug.as_ref(),
            self.host.as_ref(),
            self.screen.as_ref(),
            self.errors.as_ref(),
            self.os.as_ref(),
        ]
    }

    /// Subsystems visited after memory and the engine.
    #[must_use]
    pub fn after_engine(&self) -> [&dyn Subsystem; 6] {
        [
            self.platform.as_ref(),
            self.debug.as_ref(),
            self.host.as_ref(),
            self.screen.as_ref(),
            self.errors.as_ref(),
            self.os.as_ref(),
        ]
    }
}

/// Hardware abstraction used to hold boot keys during reset.
pub trait Hal: Send + Sync {
    /// Drives the hardware line for one button.
    fn button_event(&self, event: ButtonEvent);
}

/// [`Hal`] that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHal;

impl Hal for NullHal {
    fn button_event(&self, _event: ButtonEvent) {}
}
