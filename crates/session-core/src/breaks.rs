//! Registry of instruction and data break handlers.
//!
//! Debug features register handlers once; the session reinstalls them after
//! every reset, because a reset wipes the engine's break tables.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Handler for instruction (execution) breaks.
pub trait InstructionBreakHandler: Send + Sync {
    /// Installs the handler's breakpoints.
    fn install(&self);
    /// Removes the handler's breakpoints.
    fn remove(&self);
    /// Called when an instruction break is reached. Returns `true` if this
    /// handler claimed it.
    fn reached(&self) -> bool;
}

/// Handler for data (memory access) breaks.
pub trait DataBreakHandler: Send + Sync {
    /// Installs the handler's watchpoints.
    fn install(&self);
    /// Removes the handler's watchpoints.
    fn remove(&self);
    /// Called for an access of `size` bytes at `address`. Returns `true` if
    /// this handler claimed it.
    fn reached(&self, address: u32, size: u32, for_read: bool) -> bool;
}

/// Ordered collection of break handlers.
#[derive(Default)]
pub struct BreakRegistry {
    instruction: Mutex<Vec<Arc<dyn InstructionBreakHandler>>>,
    data: Mutex<Vec<Arc<dyn DataBreakHandler>>>,
}

impl std::fmt::Debug for BreakRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakRegistry")
            .field("instruction", &lock(&self.instruction).len())
            .field("data", &lock(&self.data).len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BreakRegistry {
    /// Registers an instruction break handler.
    pub fn add_instruction_handler(&self, handler: Arc<dyn InstructionBreakHandler>) {
        lock(&self.instruction).push(handler);
    }

    /// Registers a data break handler.
    pub fn add_data_handler(&self, handler: Arc<dyn DataBreakHandler>) {
        lock(&self.data).push(handler);
    }

    // Handlers are cloned out so callbacks can re-enter the registry.
    fn instruction_handlers(&self) -> Vec<Arc<dyn InstructionBreakHandler>> {
        lock(&self.instruction).clone()
    }

    fn data_handlers(&self) -> Vec<Arc<dyn DataBreakHandler>> {
        lock(&self.data).clone()
    }

    /// Installs every instruction break.
    pub fn install_instruction_breaks(&self) {
        self.instruction_handlers()
            .iter()
            .for_each(|handler| handler.install());
    }

    /// Removes every instruction break.
    pub fn remove_instruction_breaks(&self) {
        self.instruction_handlers()
            .iter()
            .for_each(|handler| handler.remove());
    }

    /// Offers an instruction break to every handler. Returns `true` if any
    /// claimed it.
    pub fn handle_instruction_break(&self) -> bool {
        self.instruction_handlers()
            .iter()
            .fold(false, |claimed, handler| handler.reached() || claimed)
    }

    /// Installs every data break.
    pub fn install_data_breaks(&self) {
        self.data_handlers()
            .iter()
            .for_each(|handler| handler.install());
    }

    /// Removes every data break.
    pub fn remove_data_breaks(&self) {
        self.data_handlers()
            .iter()
            .for_each(|handler| handler.remove());
    }

    /// Offers a data access to every handler. Returns `true` if any claimed it.
    pub fn handle_data_break(&self, address: u32, size: u32, for_read: bool) -> bool {
        self.data_handlers()
            .iter()
            .fold(false, |claimed, handler| {
                handler.reached(address, size, for_read) || claimed
            })
    }

    /// Drops every registered handler.
    pub fn clear(&self) {
        lock(&self.instruction).clear();
        lock(&self.data).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        installed: AtomicUsize,
        removed: AtomicUsize,
        claim: bool,
    }

    impl InstructionBreakHandler for Counting {
        fn install(&self) {
            self.installed.fetch_add(1, Ordering::SeqCst);
        }
        fn remove(&self) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
        fn reached(&self) -> bool {
            self.claim
        }
    }

    impl DataBreakHandler for Counting {
        fn install(&self) {
            self.installed.fetch_add(1, Ordering::SeqCst);
        }
        fn remove(&self) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
        fn reached(&self, address: u32, _size: u32, for_read: bool) -> bool {
            self.claim && for_read && address == 0x1000
        }
    }

    #[test]
    fn every_handler_is_offered_the_break() {
        let registry = BreakRegistry::default();
        let claiming = Arc::new(Counting {
            claim: true,
            ..Counting::default()
        });
        let passive = Arc::new(Counting::default());
        registry.add_instruction_handler(claiming.clone());
        registry.add_instruction_handler(passive.clone());

        registry.install_instruction_breaks();
        assert!(registry.handle_instruction_break());
        registry.remove_instruction_breaks();

        assert_eq!(claiming.installed.load(Ordering::SeqCst), 1);
        assert_eq!(passive.installed.load(Ordering::SeqCst), 1);
        assert_eq!(passive.removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn data_breaks_see_access_details() {
        let registry = BreakRegistry::default();
        registry.add_data_handler(Arc::new(Counting {
            claim: true,
            ..Counting::default()
        }));
        assert!(registry.handle_data_break(0x1000, 2, true));
        assert!(!registry.handle_data_break(0x1000, 2, false));
        registry.clear();
        assert!(!registry.handle_data_break(0x1000, 2, true));
    }
}
