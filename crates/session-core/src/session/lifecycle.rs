//! Creating, resetting and disposing a session.

use std::path::Path;
use std::sync::Arc;

use session_file::SessionFile;
use tracing::{debug, error, info};

use super::{Collaborators, Schedule, Session};
use crate::breaks::{DataBreakHandler, InstructionBreakHandler};
use crate::{
    Button, ButtonEvent, Configuration, ResetKind, ResetType, SessionError, SuspendReason,
};

/// Inputs of a bound emulator: a fixed configuration and, optionally, a
/// session image shipped with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundImage {
    /// Machine the image was built for.
    pub configuration: Configuration,
    /// Encoded session file to start from, if any.
    pub session_image: Option<Vec<u8>>,
}

impl Session {
    /// Creates a fresh session for `configuration` and soft-resets it.
    ///
    /// # Errors
    ///
    /// Returns the first subsystem's initialize or reset error.
    pub fn create_new(
        configuration: Configuration,
        collaborators: Collaborators,
    ) -> Result<Arc<Self>, SessionError> {
        let session = Self::new(collaborators);
        session.initialize(configuration)?;
        session.reset(ResetType::SOFT)?;
        Ok(session)
    }

    /// Reopens a session saved at `path`.
    ///
    /// Failures are reported once through the session's reporter, so the
    /// caller can simply fall back to a new session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidSessionFile`] when the file has no
    /// usable configuration header, or any read, initialize or load error.
    pub fn create_old(
        path: impl AsRef<Path>,
        collaborators: Collaborators,
    ) -> Result<Arc<Self>, SessionError> {
        let path = path.as_ref();
        let session = Self::new(collaborators);
        if let Err(err) = session.open_file(path) {
            error!(%err, path = %path.display(), "cannot open session");
            session.report("open session", &err);
            return Err(err);
        }
        Ok(session)
    }

    fn open_file(&self, path: &Path) -> Result<(), SessionError> {
        let mut file = SessionFile::read_from_path(path)?;
        let header = file
            .read_configuration()?
            .ok_or_else(|| SessionError::InvalidSessionFile {
                reason: "missing configuration header".to_owned(),
            })?;
        let configuration = Configuration::from_header(&header)?;
        self.initialize(configuration)?;
        self.load(&mut file)?;
        self.lock_identity().file = Some(path.to_path_buf());
        info!(path = %path.display(), "session opened");
        Ok(())
    }

    /// Creates the session of a bound emulator, starting from its embedded
    /// image when there is one.
    ///
    /// # Errors
    ///
    /// Returns initialize errors, or decode and load errors for the image.
    pub fn create_bound(
        image: BoundImage,
        collaborators: Collaborators,
    ) -> Result<Arc<Self>, SessionError> {
        let BoundImage {
            configuration,
            session_image,
        } = image;
        let session = Self::new(collaborators);
        session.initialize(configuration)?;
        match session_image {
            Some(bytes) => {
                let mut file = SessionFile::from_bytes(&bytes)?;
                session.load(&mut file)?;
            }
            None => session.reset(ResetType::SOFT)?,
        }
        Ok(session)
    }

    /// Initializes every subsystem, memory first.
    ///
    /// A subsystem that fails leaves the ones before it disposed again.
    ///
    /// # Errors
    ///
    /// Returns the failing subsystem's error.
    pub fn initialize(&self, configuration: Configuration) -> Result<(), SessionError> {
        info!(
            device = %configuration.device,
            ram_kib = configuration.ram_size_kib,
            "initializing session"
        );
        let subsystems = self.subsystems.in_order();
        for (index, subsystem) in subsystems.iter().enumerate() {
            if let Err(err) = subsystem.initialize(&configuration) {
                error!(%err, subsystem = subsystem.name(), "initialize failed");
                subsystems[..index]
                    .iter()
                    .rev()
                    .for_each(|initialized| initialized.dispose());
                return Err(err);
            }
        }
        let mut identity = self.lock_identity();
        identity.configuration = Some(configuration);
        identity.initialized = true;
        Ok(())
    }

    /// Disposes every subsystem in reverse order and drops break handlers
    /// and deferred actions. Does nothing before `initialize`.
    pub fn dispose(&self) {
        {
            let mut identity = self.lock_identity();
            if !identity.initialized {
                return;
            }
            identity.initialized = false;
        }
        self.subsystems
            .in_order()
            .iter()
            .rev()
            .for_each(|subsystem| subsystem.dispose());
        self.breaks.clear();
        let dropped = self.deferred.clear();
        debug!(dropped, "session disposed");
    }

    /// Resets the machine.
    ///
    /// Components reset memory first, then the engine, then the rest. Debug
    /// and host-control suspends, pending system-call and subroutine state,
    /// the pending control action, schedule flags and deferred actions are
    /// all dropped. UI-thread and timer suspends survive. Hardware resets
    /// also flush queued input. Boot keys for the reset kind are pressed last.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Nested`] inside a nested call, or the first
    /// subsystem's reset error.
    pub fn reset(&self, reset: ResetType) -> Result<(), SessionError> {
        if self.is_nested() {
            return Err(SessionError::Nested { operation: "reset" });
        }
        if !self.is_initialized() {
            return Err(SessionError::NotInitialized);
        }
        info!(?reset, "resetting session");

        if self.horde.is_on() {
            self.horde.save_events();
        }

        let hardware = reset.is_hardware();
        self.subsystems.memory.reset(reset)?;
        self.engine.reset(hardware);
        for subsystem in self.subsystems.after_engine() {
            subsystem.reset(reset)?;
        }

        {
            let mut shared = self.lock_shared();
            for reason in [
                SuspendReason::Debugger,
                SuspendReason::External,
                SuspendReason::SysCall,
                SuspendReason::SubroutineReturn,
            ] {
                shared.suspend.clear(reason);
            }
            shared.break_on_sys_call = false;
            shared.control = None;
            self.broadcast();
        }

        *self.lock_schedule() = Schedule::default();
        self.deferred.clear();
        if hardware {
            self.input.clear();
        }
        self.input.forget_last_pen();

        self.breaks.install_instruction_breaks();
        self.breaks.install_data_breaks();

        self.press_boot_keys(reset);
        Ok(())
    }

    fn press_boot_keys(&self, reset: ResetType) {
        let mut keys = Vec::new();
        match reset.kind {
            ResetKind::Hard => keys.push(Button::Power),
            ResetKind::Debug => keys.push(Button::Down),
            ResetKind::Sys | ResetKind::Soft => {}
        }
        if reset.no_extensions {
            keys.push(Button::Up);
        }
        for button in &keys {
            self.hal.button_event(ButtonEvent::new(*button, true));
        }
        if !keys.is_empty() {
            debug!(?keys, "boot keys held");
        }
        self.lock_identity().boot_keys = keys;
    }

    /// Releases the keys the last reset held down.
    pub fn release_boot_keys(&self) {
        let keys = std::mem::take(&mut self.lock_identity().boot_keys);
        for button in keys {
            self.hal.button_event(ButtonEvent::new(button, false));
        }
    }

    /// Keys the last reset is holding down.
    #[must_use]
    pub fn boot_keys(&self) -> Vec<Button> {
        self.lock_identity().boot_keys.clone()
    }

    /// Registers an instruction break handler. It is installed now and after
    /// every reset.
    pub fn add_instruction_break_handler(&self, handler: Arc<dyn InstructionBreakHandler>) {
        handler.install();
        self.breaks.add_instruction_handler(handler);
    }

    /// Registers a data break handler. It is installed now and after every
    /// reset.
    pub fn add_data_break_handler(&self, handler: Arc<dyn DataBreakHandler>) {
        handler.install();
        self.breaks.add_data_handler(handler);
    }

    /// Removes every instruction break.
    pub fn remove_instruction_breaks(&self) {
        self.breaks.remove_instruction_breaks();
    }

    /// Removes every data break.
    pub fn remove_data_breaks(&self) {
        self.breaks.remove_data_breaks();
    }

    /// Called by the engine when an instruction break fires. Returns `true`
    /// when a handler claimed it.
    #[must_use]
    pub fn handle_instruction_break(&self) -> bool {
        self.breaks.handle_instruction_break()
    }

    /// Called by the engine when a watched access happens. Returns `true`
    /// when a handler claimed it.
    #[must_use]
    pub fn handle_data_break(&self, address: u32, size: u32, for_read: bool) -> bool {
        self.breaks.handle_data_break(address, size, for_read)
    }
}
