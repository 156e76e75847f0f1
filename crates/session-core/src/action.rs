//! Deferred actions executed at the next safe point.
//!
//! Actions are drained one at a time with the queue unlocked, so an action may
//! post further actions. The first failure discards everything still queued.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::SessionError;

/// Boxed body of a deferred action.
pub type ActionFn<C> = Box<dyn FnOnce(&C) -> Result<(), SessionError> + Send>;

/// One deferred unit of work and the description used when reporting it.
pub struct Action<C: ?Sized> {
    description: String,
    run: ActionFn<C>,
}

impl<C: ?Sized> Action<C> {
    /// Creates an action.
    pub fn new<F>(description: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(&C) -> Result<(), SessionError> + Send + 'static,
    {
        Self {
            description: description.into(),
            run: Box::new(run),
        }
    }

    /// Creates one action that runs `parts` in order and stops at the first
    /// failure.
    #[must_use]
    pub fn composite(description: impl Into<String>, parts: Vec<ActionFn<C>>) -> Self
    where
        C: 'static,
    {
        Self {
            description: description.into(),
            run: Box::new(move |ctx: &C| parts.into_iter().try_for_each(|part| part(ctx))),
        }
    }

    /// Description the action was created with.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Runs the action.
    ///
    /// # Errors
    ///
    /// Returns whatever the action body returns.
    pub fn run(self, ctx: &C) -> Result<(), SessionError> {
        (self.run)(ctx)
    }
}

impl<C: ?Sized> fmt::Debug for Action<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Thread-safe FIFO of deferred actions over context `C`.
pub struct ActionQueue<C: ?Sized> {
    actions: Mutex<VecDeque<Action<C>>>,
}

impl<C: ?Sized> Default for ActionQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ?Sized> fmt::Debug for ActionQueue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionQueue")
            .field("pending", &self.descriptions())
            .finish()
    }
}

impl<C: ?Sized> ActionQueue<C> {
    /// Creates an empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            actions: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Action<C>>> {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an action built from `run`.
    pub fn post<F>(&self, description: impl Into<String>, run: F)
    where
        F: FnOnce(&C) -> Result<(), SessionError> + Send + 'static,
    {
        self.post_action(Action::new(description, run));
    }

    /// Appends a prepared action.
    pub fn post_action(&self, action: Action<C>) {
        debug!(description = %action.description, "deferred action posted");
        self.lock().push_back(action);
    }

    /// Appends a composite action running `parts` in order.
    pub fn post_composite(&self, description: impl Into<String>, parts: Vec<ActionFn<C>>)
    where
        C: 'static,
    {
        self.post_action(Action::composite(description, parts));
    }

    /// Pops the oldest action without running it.
    pub fn next_action(&self) -> Option<Action<C>> {
        self.lock().pop_front()
    }

    /// Number of queued actions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Discards every queued action and returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut actions = self.lock();
        let dropped = actions.len();
        actions.clear();
        dropped
    }

    /// Descriptions of queued actions in order.
    pub fn descriptions(&self) -> Vec<String> {
        self.lock()
            .iter()
            .map(|action| action.description.clone())
            .collect()
    }

    /// Runs every queued action in order, including ones posted while
    /// draining, and returns how many ran.
    ///
    /// # Errors
    ///
    /// On the first failure the remaining queue is discarded and
    /// [`SessionError::ActionFailed`] is returned, tagged with the failing
    /// action's description.
    pub fn drain_all(&self, ctx: &C) -> Result<usize, SessionError> {
        self.drain_while(ctx, |_| true)
    }

    /// Like [`ActionQueue::drain_all`], but checks `keep_going` after each
    /// action; when it returns `false` the remainder is discarded.
    ///
    /// # Errors
    ///
    /// Same as [`ActionQueue::drain_all`].
    pub fn drain_while<P>(&self, ctx: &C, mut keep_going: P) -> Result<usize, SessionError>
    where
        P: FnMut(&C) -> bool,
    {
        let mut ran = 0;
        while let Some(action) = self.next_action() {
            let description = action.description.clone();
            if let Err(source) = action.run(ctx) {
                let dropped = self.clear();
                warn!(%description, dropped, "deferred action failed, queue discarded");
                return Err(SessionError::ActionFailed {
                    description,
                    source: Box::new(source),
                });
            }
            ran += 1;
            if !keep_going(ctx) {
                let dropped = self.clear();
                if dropped > 0 {
                    warn!(%description, dropped, "deferred actions discarded");
                }
                break;
            }
        }
        Ok(ran)
    }
}
