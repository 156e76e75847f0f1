//! Saving and restoring the whole machine to a session file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use session_file::{SessionFile, Tag};
use tracing::{info, warn};

use super::Session;
use crate::{Configuration, ResetType, SessionError, SuspendReason, SuspendState};

/// Chunk holding the session's own run state.
pub const SESSION_TAG: Tag = Tag::new(*b"sess");

#[derive(Debug, Serialize, Deserialize)]
struct SessionChunk {
    suspend: SuspendState,
}

impl Session {
    /// Writes the configuration header, the session's suspend counters and
    /// every component's state to `file`.
    ///
    /// The UI-thread count is not saved: it belongs to whoever is holding the
    /// session stopped right now, not to the machine.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotInitialized`] before `initialize`, or the
    /// first component's save error.
    pub fn save(&self, file: &mut SessionFile) -> Result<(), SessionError> {
        let configuration = self.configuration().ok_or(SessionError::NotInitialized)?;
        info!(device = %configuration.device.id(), "saving session");
        file.write_configuration(&configuration.to_header());

        let mut suspend = self.get_suspend_state();
        suspend.clear(SuspendReason::UiThread);
        file.write_state(SESSION_TAG, &SessionChunk { suspend })?;

        self.engine.save(file)?;
        for subsystem in self.subsystems.in_order() {
            subsystem.save(file)?;
        }
        Ok(())
    }

    /// Restores every component from `file`.
    ///
    /// When any component reports its saved data unusable the machine is
    /// soft-reset instead, so the result is always a consistent machine.
    /// Otherwise post-load work is queued for the next safe point.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Nested`] inside a nested call,
    /// [`SessionError::NotInitialized`] before `initialize`, or the first
    /// component's load error.
    pub fn load(&self, file: &mut SessionFile) -> Result<(), SessionError> {
        if self.is_nested() {
            return Err(SessionError::Nested { operation: "load" });
        }
        if !self.is_initialized() {
            return Err(SessionError::NotInitialized);
        }

        if let Some(header) = file.read_configuration()? {
            let configuration = Configuration::from_header(&header)?;
            self.lock_identity().configuration = Some(configuration);
        }

        file.set_can_reload(true);
        self.subsystems.memory.load(file)?;
        self.engine.load(file)?;

        if let Some(chunk) = file.read_state::<SessionChunk>(SESSION_TAG)? {
            let mut shared = self.lock_shared();
            let live_ui = shared.suspend.ui_thread();
            let mut restored = chunk.suspend;
            restored.set(SuspendReason::UiThread, live_ui);
            shared.suspend = restored;
            self.broadcast();
        }

        for subsystem in self.subsystems.after_engine() {
            subsystem.load(file)?;
        }

        if file.can_reload() {
            info!("session loaded");
            self.set_need_post_load(true);
            self.engine.check_after_cycle();
        } else {
            warn!("saved state incomplete; soft-resetting instead");
            self.reset(ResetType::SOFT)?;
            self.set_need_post_load(false);
        }
        Ok(())
    }

    /// Saves to `path` and makes it the session's backing file.
    ///
    /// # Errors
    ///
    /// Same as [`Session::save`], plus I/O errors.
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let path = path.as_ref();
        let mut file = SessionFile::new();
        self.save(&mut file)?;
        file.write_to_path(path)?;
        self.lock_identity().file = Some(path.to_path_buf());
        Ok(())
    }

    /// Loads from `path` and makes it the session's backing file.
    ///
    /// # Errors
    ///
    /// Same as [`Session::load`], plus I/O and container errors.
    pub fn load_from_path(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let path = path.as_ref();
        let mut file = SessionFile::read_from_path(path)?;
        self.load(&mut file)?;
        self.lock_identity().file = Some(path.to_path_buf());
        Ok(())
    }
}
