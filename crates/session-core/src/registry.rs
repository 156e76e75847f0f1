//! Process-wide "current session" slot for call sites that cannot be handed
//! an `Arc<Session>` yet.
//!
//! The slot holds a weak reference only, so it never keeps a session alive.
//! New code should take the session as a parameter instead.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::debug;

use crate::Session;

static CURRENT: Mutex<Option<Weak<Session>>> = Mutex::new(None);

/// Makes `session` the current session, replacing any previous one.
pub fn register(session: &Arc<Session>) {
    debug!("session registered as current");
    *CURRENT.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(session));
}

/// The current session, if one is registered and still alive.
#[must_use]
pub fn current() -> Option<Arc<Session>> {
    CURRENT
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .and_then(Weak::upgrade)
}

/// Forgets the current session.
pub fn clear() {
    *CURRENT.lock().unwrap_or_else(PoisonError::into_inner) = None;
}
