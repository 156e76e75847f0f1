//! Bounded input event queues and the hardware button throttle.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

/// Monotonic time source used for input throttling.
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// Wall-clock [`Clock`] measuring from its creation.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven [`Clock`] for deterministic tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a clock reading `start`.
    #[must_use]
    pub const fn starting_at(start: Duration) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = now.saturating_add(by);
    }

    /// Sets the clock to `to`.
    pub fn set(&self, to: Duration) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Rejection returned when a bounded queue has no free slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event queue is full ({capacity} entries)")]
pub struct EventQueueFull {
    /// Capacity of the queue that rejected the event.
    pub capacity: usize,
}

/// Bounded thread-safe FIFO with a blocking wait for data.
#[derive(Debug)]
pub struct EventQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
    capacity: usize,
}

impl<T> EventQueue<T> {
    /// Creates a queue holding at most `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an event and wakes waiters.
    ///
    /// # Errors
    ///
    /// Returns [`EventQueueFull`] when the queue is at capacity.
    pub fn put(&self, item: T) -> Result<(), EventQueueFull> {
        let mut items = self.lock();
        if items.len() >= self.capacity {
            return Err(EventQueueFull {
                capacity: self.capacity,
            });
        }
        items.push_back(item);
        self.available.notify_all();
        Ok(())
    }

    /// Removes the oldest event.
    pub fn get(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Copies the oldest event without removing it.
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        self.lock().front().cloned()
    }

    /// Number of queued events.
    pub fn used(&self) -> usize {
        self.lock().len()
    }

    /// Number of free slots.
    pub fn free(&self) -> usize {
        self.capacity.saturating_sub(self.used())
    }

    /// Maximum number of queued events.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops every queued event.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Waits up to `timeout` for at least one event. Returns whether one is
    /// available.
    pub fn wait_for_data(&self, timeout: Duration) -> bool {
        let items = self.lock();
        let (items, _) = self
            .available
            .wait_timeout_while(items, timeout, |items| items.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        !items.is_empty()
    }
}

/// Physical buttons on the emulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Button {
    Power,
    Up,
    Down,
    App1,
    App2,
    App3,
    App4,
    Cradle,
    Contrast,
    Antenna,
}

/// Button press or release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ButtonEvent {
    /// Button affected.
    pub button: Button,
    /// `true` for a press, `false` for a release.
    pub down: bool,
}

impl ButtonEvent {
    /// Creates a button event.
    #[must_use]
    pub const fn new(button: Button, down: bool) -> Self {
        Self { button, down }
    }
}

/// Character key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyEvent {
    /// Character code.
    pub key: u16,
    /// Modifier bits.
    pub modifiers: u16,
}

impl KeyEvent {
    /// Creates a key event without modifiers.
    #[must_use]
    pub const fn new(key: u16) -> Self {
        Self { key, modifiers: 0 }
    }
}

/// Digitizer coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    /// Horizontal coordinate.
    pub x: i32,
    /// Vertical coordinate.
    pub y: i32,
}

/// Pen contact or lift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PenEvent {
    /// Contact position; lift events report the off-screen point.
    pub point: Point,
    /// `true` while the pen touches the digitizer.
    pub down: bool,
}

impl PenEvent {
    /// Position reported for a lifted pen.
    pub const OFF_SCREEN: Point = Point { x: -1, y: -1 };

    /// Pen touching at `(x, y)`.
    #[must_use]
    pub const fn down(x: i32, y: i32) -> Self {
        Self {
            point: Point { x, y },
            down: true,
        }
    }

    /// Pen lifted.
    #[must_use]
    pub const fn up() -> Self {
        Self {
            point: Self::OFF_SCREEN,
            down: false,
        }
    }
}

/// The three input queues plus delivery pacing and pen deduplication.
pub struct InputQueues {
    buttons: EventQueue<ButtonEvent>,
    keys: EventQueue<KeyEvent>,
    pens: EventQueue<PenEvent>,
    clock: Arc<dyn Clock>,
    button_threshold: Duration,
    last_button_delivery: Mutex<Option<Duration>>,
    last_pen: Mutex<Option<PenEvent>>,
}

impl std::fmt::Debug for InputQueues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputQueues")
            .field("buttons", &self.buttons.used())
            .field("keys", &self.keys.used())
            .field("pens", &self.pens.used())
            .field("button_threshold", &self.button_threshold)
            .finish_non_exhaustive()
    }
}

impl InputQueues {
    /// Creates empty queues of `capacity` entries each.
    #[must_use]
    pub fn new(capacity: usize, button_threshold: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            buttons: EventQueue::with_capacity(capacity),
            keys: EventQueue::with_capacity(capacity),
            pens: EventQueue::with_capacity(capacity),
            clock,
            button_threshold,
            last_button_delivery: Mutex::new(None),
            last_pen: Mutex::new(None),
        }
    }

    /// Queues a button event. With `post_now` the throttle is lifted so the
    /// event is deliverable at once.
    ///
    /// # Errors
    ///
    /// Returns [`EventQueueFull`] when the button queue is full.
    pub fn post_button(&self, event: ButtonEvent, post_now: bool) -> Result<(), EventQueueFull> {
        self.buttons.put(event)?;
        if post_now {
            *self
                .last_button_delivery
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = None;
        }
        debug!(?event, post_now, "button event queued");
        Ok(())
    }

    /// Returns `true` when a button event is queued and the throttle
    /// threshold has elapsed since the previous delivery.
    pub fn has_button(&self) -> bool {
        let last = *self
            .last_button_delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(last) = last {
            if self.clock.now().saturating_sub(last) < self.button_threshold {
                return false;
            }
        }
        self.buttons.used() > 0
    }

    /// Next button event without removing it.
    pub fn peek_button(&self) -> Option<ButtonEvent> {
        self.buttons.peek()
    }

    /// Removes the next button event and restarts the throttle.
    pub fn get_button(&self) -> Option<ButtonEvent> {
        let event = self.buttons.get()?;
        *self
            .last_button_delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(self.clock.now());
        Some(event)
    }

    /// Queues a key event.
    ///
    /// # Errors
    ///
    /// Returns [`EventQueueFull`] when the key queue is full.
    pub fn post_key(&self, event: KeyEvent) -> Result<(), EventQueueFull> {
        self.keys.put(event)
    }

    /// Returns `true` when a key event is queued.
    pub fn has_key(&self) -> bool {
        self.keys.used() > 0
    }

    /// Next key event without removing it.
    pub fn peek_key(&self) -> Option<KeyEvent> {
        self.keys.peek()
    }

    /// Removes the next key event.
    pub fn get_key(&self) -> Option<KeyEvent> {
        self.keys.get()
    }

    /// Queues a pen event. A pen-down identical to the last posted pen event
    /// is dropped and `Ok(false)` returned.
    ///
    /// # Errors
    ///
    /// Returns [`EventQueueFull`] when the pen queue is full.
    pub fn post_pen(&self, event: PenEvent) -> Result<bool, EventQueueFull> {
        let mut last = self.last_pen.lock().unwrap_or_else(PoisonError::into_inner);
        if event.down && *last == Some(event) {
            return Ok(false);
        }
        self.pens.put(event)?;
        *last = Some(event);
        Ok(true)
    }

    /// Returns `true` when a pen event is queued.
    pub fn has_pen(&self) -> bool {
        self.pens.used() > 0
    }

    /// Next pen event without removing it.
    pub fn peek_pen(&self) -> Option<PenEvent> {
        self.pens.peek()
    }

    /// Removes the next pen event.
    pub fn get_pen(&self) -> Option<PenEvent> {
        self.pens.get()
    }

    /// Drops every queued event.
    pub fn clear(&self) {
        self.buttons.clear();
        self.keys.clear();
        self.pens.clear();
    }

    /// Forgets the last pen event so an identical pen-down is accepted again.
    pub fn forget_last_pen(&self) {
        *self.last_pen.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
