//! Requests deferred to the engine's next safe point.

use tracing::{debug, info, warn};

use super::Session;
use crate::control::ControlAction;
use crate::horde::HordeTransition;
use crate::{ResetType, SessionError};

impl Session {
    /// Asks for a reset at the next safe point.
    pub fn schedule_reset(&self, reset: ResetType) {
        info!(?reset, "reset scheduled");
        self.lock_schedule().reset = Some(reset);
        self.engine.check_after_cycle();
    }

    /// Asks for the memory bank handlers to be rebuilt.
    pub fn schedule_reset_banks(&self) {
        self.lock_schedule().reset_banks = true;
        self.engine.check_after_cycle();
    }

    /// Asks the fuzzer for a checkpoint.
    pub fn schedule_auto_save_state(&self) {
        self.lock_schedule().auto_save = true;
        self.engine.check_after_cycle();
    }

    /// Asks the fuzzer to save its root state.
    pub fn schedule_save_root_state(&self) {
        self.schedule_transition(HordeTransition::SaveRoot);
    }

    /// Asks the fuzzer to save the interrupted gremlin's state.
    pub fn schedule_save_suspended_state(&self) {
        self.schedule_transition(HordeTransition::SaveSuspended);
    }

    /// Asks the fuzzer to load its root state.
    pub fn schedule_load_root_state(&self) {
        self.schedule_transition(HordeTransition::LoadRoot);
    }

    /// Asks the fuzzer to start the next gremlin from the root state.
    pub fn schedule_next_gremlin_from_root_state(&self) {
        self.schedule_transition(HordeTransition::NextGremlinFromRoot);
    }

    /// Asks the fuzzer to resume the next gremlin from a suspended state.
    pub fn schedule_next_gremlin_from_suspended_state(&self) {
        self.schedule_transition(HordeTransition::NextGremlinFromSuspended);
    }

    fn schedule_transition(&self, transition: HordeTransition) {
        let previous = self.lock_schedule().transition.replace(transition);
        if let Some(previous) = previous {
            warn!(?previous, replacement = ?transition, "pending fuzzer transition replaced");
        }
        self.engine.check_after_cycle();
    }

    /// Asks the fuzzer to load the start state of a minimization pass.
    pub fn schedule_minimize_load_state(&self) {
        self.lock_schedule().minimize_load = true;
        self.engine.check_after_cycle();
    }

    /// Queues `action` to run at the next safe point. Its failure is
    /// reported under `description`.
    pub fn schedule_deferred_error<F>(&self, description: impl Into<String>, action: F)
    where
        F: FnOnce(&Self) -> Result<(), SessionError> + Send + 'static,
    {
        self.deferred.post(description, action);
        self.engine.check_after_cycle();
    }

    /// Number of deferred actions still queued.
    #[must_use]
    pub fn pending_deferred(&self) -> usize {
        self.deferred.len()
    }

    /// Performs every scheduled request. Called by the engine when its
    /// check-after-cycle flag is set.
    ///
    /// Order: reset, bank rebuild, deferred actions, then (unless
    /// `check_for_reset_only`) fuzzer checkpoint, fuzzer transition,
    /// minimization load and finally post-load work. Each request is taken
    /// before it runs, so a failing one is not retried.
    ///
    /// A reset requested inside a nested call is handed to the top-level loop
    /// as a [`ControlAction::Reset`].
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error. Deferred-action failures come
    /// back as [`SessionError::ActionFailed`] with the queue discarded.
    pub fn execute_special(&self, check_for_reset_only: bool) -> Result<(), SessionError> {
        let (reset, reset_banks) = {
            let mut schedule = self.lock_schedule();
            (
                schedule.reset.take(),
                std::mem::take(&mut schedule.reset_banks),
            )
        };

        if let Some(reset) = reset {
            if self.is_nested() {
                debug!(?reset, "reset requested while nested; handing to the top level");
                self.request_control(ControlAction::Reset(reset));
            } else {
                self.reset(reset)?;
            }
        }

        if reset_banks {
            self.subsystems.memory.reset_bank_handlers()?;
        }

        self.deferred
            .drain_while(self, |session| !session.has_pending_control())?;

        if check_for_reset_only {
            return Ok(());
        }

        let (auto_save, transition, minimize_load) = {
            let mut schedule = self.lock_schedule();
            (
                std::mem::take(&mut schedule.auto_save),
                schedule.transition.take(),
                std::mem::take(&mut schedule.minimize_load),
            )
        };

        if auto_save {
            self.horde.auto_save_state(self)?;
        }
        if let Some(transition) = transition {
            debug!(?transition, "running fuzzer transition");
            transition.apply(self.horde.as_ref(), self)?;
        }
        if minimize_load {
            self.horde.minimize_load_initial_state(self)?;
        }

        if self.take_need_post_load() {
            debug!("running post-load work");
            for subsystem in self.subsystems.in_order() {
                subsystem.post_load()?;
            }
        }
        Ok(())
    }
}
