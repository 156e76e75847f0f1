//! Independent suspend-reason counters.
//!
//! Several parties can hold the execution thread paused at once. Each one owns
//! a named counter or flag and releases only its own request, so a debugger
//! resuming never clobbers a UI-thread suspend and vice versa.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One independent cause that can hold the execution thread paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuspendReason {
    /// Controller-thread request (nests).
    UiThread,
    /// Debugger request (nests).
    Debugger,
    /// Host-control request. May go negative while a nested call resumes.
    External,
    /// Periodic timer expiry. Cleared each time it is observed.
    Timeout,
    /// A system-call boundary was reached while a break on it was requested.
    SysCall,
    /// A nested subroutine returned to its caller.
    SubroutineReturn,
}

impl SuspendReason {
    /// All reasons in field order.
    pub const ALL: [Self; 6] = [
        Self::UiThread,
        Self::Debugger,
        Self::External,
        Self::Timeout,
        Self::SysCall,
        Self::SubroutineReturn,
    ];

    /// Returns `true` for reasons a nested call absorbs and keeps running
    /// through, rather than returning to its caller.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::UiThread | Self::External | Self::Timeout | Self::SysCall
        )
    }
}

/// Snapshot of every suspend reason. Copied freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SuspendState {
    ui_thread: i32,
    debugger: i32,
    external: i32,
    timeout: bool,
    sys_call: bool,
    subroutine_return: bool,
}

impl SuspendState {
    /// State with every reason clear.
    pub const CLEAR: Self = Self {
        ui_thread: 0,
        debugger: 0,
        external: 0,
        timeout: false,
        sys_call: false,
        subroutine_return: false,
    };

    /// Adds one request for `reason`. Flags are simply set.
    pub const fn raise(&mut self, reason: SuspendReason) {
        match reason {
            SuspendReason::UiThread => self.ui_thread = self.ui_thread.saturating_add(1),
            SuspendReason::Debugger => self.debugger = self.debugger.saturating_add(1),
            SuspendReason::External => self.external = self.external.saturating_add(1),
            SuspendReason::Timeout => self.timeout = true,
            SuspendReason::SysCall => self.sys_call = true,
            SuspendReason::SubroutineReturn => self.subroutine_return = true,
        }
    }

    /// Releases one request for `reason`. Flags are simply cleared.
    ///
    /// The UI-thread and debugger counters stop at zero. The external counter
    /// is signed and may go below zero: a nested host-control resume starts
    /// from a zeroed counter and its decrement must survive until it is merged
    /// back into the caller's snapshot.
    pub const fn lower(&mut self, reason: SuspendReason) {
        match reason {
            SuspendReason::UiThread => {
                if self.ui_thread > 0 {
                    self.ui_thread -= 1;
                }
            }
            SuspendReason::Debugger => {
                if self.debugger > 0 {
                    self.debugger -= 1;
                }
            }
            SuspendReason::External => self.external = self.external.saturating_sub(1),
            SuspendReason::Timeout => self.timeout = false,
            SuspendReason::SysCall => self.sys_call = false,
            SuspendReason::SubroutineReturn => self.subroutine_return = false,
        }
    }

    /// Clears `reason` entirely, whatever its count.
    pub const fn clear(&mut self, reason: SuspendReason) {
        match reason {
            SuspendReason::UiThread => self.ui_thread = 0,
            SuspendReason::Debugger => self.debugger = 0,
            SuspendReason::External => self.external = 0,
            SuspendReason::Timeout => self.timeout = false,
            SuspendReason::SysCall => self.sys_call = false,
            SuspendReason::SubroutineReturn => self.subroutine_return = false,
        }
    }

    /// Sets `reason` to `count`. Flags are set for any nonzero count.
    pub const fn set(&mut self, reason: SuspendReason, count: i32) {
        match reason {
            SuspendReason::UiThread => self.ui_thread = count,
            SuspendReason::Debugger => self.debugger = count,
            SuspendReason::External => self.external = count,
            SuspendReason::Timeout => self.timeout = count != 0,
            SuspendReason::SysCall => self.sys_call = count != 0,
            SuspendReason::SubroutineReturn => self.subroutine_return = count != 0,
        }
    }

    /// Raw count for `reason`; flags report `0` or `1`.
    #[must_use]
    pub const fn count(&self, reason: SuspendReason) -> i32 {
        match reason {
            SuspendReason::UiThread => self.ui_thread,
            SuspendReason::Debugger => self.debugger,
            SuspendReason::External => self.external,
            SuspendReason::Timeout => self.timeout as i32,
            SuspendReason::SysCall => self.sys_call as i32,
            SuspendReason::SubroutineReturn => self.subroutine_return as i32,
        }
    }

    /// Returns `true` when `reason` is nonzero.
    #[must_use]
    pub const fn has(&self, reason: SuspendReason) -> bool {
        self.count(reason) != 0
    }

    /// Returns `true` when any reason is nonzero.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.external != 0 || self.is_active_ignoring_external()
    }

    /// Returns `true` when any reason other than `external` is nonzero.
    #[must_use]
    pub const fn is_active_ignoring_external(&self) -> bool {
        self.ui_thread != 0
            || self.debugger != 0
            || self.timeout
            || self.sys_call
            || self.subroutine_return
    }

    /// UI-thread request count.
    #[must_use]
    pub const fn ui_thread(&self) -> i32 {
        self.ui_thread
    }

    /// Debugger request count.
    #[must_use]
    pub const fn debugger(&self) -> i32 {
        self.debugger
    }

    /// Host-control request count, possibly negative.
    #[must_use]
    pub const fn external(&self) -> i32 {
        self.external
    }

    /// Host-control request count as observed from outside a nested call.
    #[must_use]
    pub const fn external_clamped(&self) -> i32 {
        if self.external < 0 {
            0
        } else {
            self.external
        }
    }

    /// Timer flag.
    #[must_use]
    pub const fn timeout(&self) -> bool {
        self.timeout
    }

    /// System-call boundary flag.
    #[must_use]
    pub const fn sys_call(&self) -> bool {
        self.sys_call
    }

    /// Subroutine-return flag.
    #[must_use]
    pub const fn subroutine_return(&self) -> bool {
        self.subroutine_return
    }

    /// Clamps a negative host-control count to zero.
    pub const fn clamp_external(&mut self) {
        self.external = self.external_clamped();
    }

    /// Moves the reasons a nested call keeps running through into `saved`.
    ///
    /// UI-thread and external counts are added to `saved` and cleared here.
    /// The timer flag is OR-ed into `saved` and cleared here. The system-call
    /// flag is cleared without being kept. The debugger count is added to
    /// `saved` but left set here, and the subroutine-return flag is left set,
    /// so that either one still ends the nested loop.
    pub const fn absorb_transient(&mut self, saved: &mut Self) {
        saved.ui_thread = saved.ui_thread.saturating_add(self.ui_thread);
        self.ui_thread = 0;

        saved.debugger = saved.debugger.saturating_add(self.debugger);

        saved.external = saved.external.saturating_add(self.external);
        self.external = 0;

        self.sys_call = false;

        saved.timeout |= self.timeout;
        self.timeout = false;
    }
}

impl fmt::Display for SuspendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ui={} dbg={} ext={} timeout={} syscall={} subret={}",
            self.ui_thread,
            self.debugger,
            self.external,
            u8::from(self.timeout),
            u8::from(self.sys_call),
            u8::from(self.subroutine_return),
        )
    }
}
