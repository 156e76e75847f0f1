//! Host input delivered to the emulated device.

use tracing::{debug, warn};

use super::Session;
use crate::{ButtonEvent, KeyEvent, PenEvent};

impl Session {
    // Recorded fuzzer events and minimization passes own the input stream.
    fn accepts_user_input(&self) -> bool {
        !self.horde.is_on() && self.horde.accepts_user_input()
    }

    /// Queues a hardware button event. Returns `false` when it was refused
    /// or the queue is full.
    pub fn post_button_event(&self, event: ButtonEvent, post_now: bool) -> bool {
        if !self.accepts_user_input() {
            debug!(?event, "button event ignored while the fuzzer drives input");
            return false;
        }
        match self.input.post_button(event, post_now) {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, ?event, "button event dropped");
                false
            }
        }
    }

    /// Returns `true` when a button event is deliverable now.
    #[must_use]
    pub fn has_button_event(&self) -> bool {
        self.input.has_button()
    }

    /// Next button event without removing it.
    #[must_use]
    pub fn peek_button_event(&self) -> Option<ButtonEvent> {
        self.input.peek_button()
    }

    /// Removes the next button event.
    pub fn get_button_event(&self) -> Option<ButtonEvent> {
        self.input.get_button()
    }

    /// Queues a key event and wakes a napping execution thread. Returns
    /// `false` when it was refused or the queue is full.
    pub fn post_key_event(&self, event: KeyEvent) -> bool {
        if !self.accepts_user_input() {
            debug!(?event, "key event ignored while the fuzzer drives input");
            return false;
        }
        match self.input.post_key(event) {
            Ok(()) => {
                self.wake_sleeper();
                true
            }
            Err(err) => {
                warn!(%err, ?event, "key event dropped");
                false
            }
        }
    }

    /// Returns `true` when a key event is queued.
    #[must_use]
    pub fn has_key_event(&self) -> bool {
        self.input.has_key()
    }

    /// Next key event without removing it.
    #[must_use]
    pub fn peek_key_event(&self) -> Option<KeyEvent> {
        self.input.peek_key()
    }

    /// Removes the next key event.
    pub fn get_key_event(&self) -> Option<KeyEvent> {
        self.input.get_key()
    }

    /// Queues a pen event and wakes a napping execution thread. A repeated
    /// identical pen-down is dropped. Returns `true` only when the event was
    /// queued.
    pub fn post_pen_event(&self, event: PenEvent) -> bool {
        if !self.accepts_user_input() {
            debug!(?event, "pen event ignored while the fuzzer drives input");
            return false;
        }
        match self.input.post_pen(event) {
            Ok(queued) => {
                if queued {
                    self.wake_sleeper();
                }
                queued
            }
            Err(err) => {
                warn!(%err, ?event, "pen event dropped");
                false
            }
        }
    }

    /// Returns `true` when a pen event is queued.
    #[must_use]
    pub fn has_pen_event(&self) -> bool {
        self.input.has_pen()
    }

    /// Next pen event without removing it.
    #[must_use]
    pub fn peek_pen_event(&self) -> Option<PenEvent> {
        self.input.peek_pen()
    }

    /// Removes the next pen event.
    pub fn get_pen_event(&self) -> Option<PenEvent> {
        self.input.get_pen()
    }
}
