use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::error::ConfigError;

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const READY: u8 = 2;

/// Storage that both domains can see, placed by the firmware in a linker section.
///
/// Lives for the whole program and is written exactly once, before the handoff. After that
/// the secure side only hands out its address; mutation belongs to whoever owns the
/// structure's access discipline (the IPC semaphore driver for the semaphore arrays).
pub struct SharedMemory<T> {
    value: UnsafeCell<T>,
    state: AtomicU8,
}

// SAFETY: the value is only written once, guarded by `state`, and afterwards only read
// through shared references or handed out as an address.
unsafe impl<T> Sync for SharedMemory<T> {}

impl<T> SharedMemory<T> {
    pub const fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
            state: AtomicU8::new(EMPTY),
        }
    }

    pub fn initialize(&'static self, value: T) -> Result<&'static T, ConfigError> {
        self.state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| ConfigError::AlreadyInitialized)?;

        // SAFETY: the state transition above gives this call exclusive access.
        unsafe { *self.value.get() = value };
        self.state.store(READY, Ordering::Release);

        // SAFETY: READY values are never written again from this side.
        Ok(unsafe { &*self.value.get() })
    }

    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == READY {
            // SAFETY: see `initialize`.
            Some(unsafe { &*self.value.get() })
        } else {
            None
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    /// Address of the storage, for structures handed to the other domain.
    pub const fn as_mut_ptr(&self) -> *mut T {
        self.value.get()
    }
}
