use log::info;

use crate::error::ConfigError;
use crate::hal::{IpcChannel, SemaphoreInit};
use crate::shared::SharedMemory;

pub const SEMA_PER_WORD: u32 = 32;

/// Layout the IPC semaphore driver on both sides expects to find on the channel.
#[derive(Debug)]
#[repr(C)]
pub struct SemaphoreDescriptor {
    pub max_sema: u32,
    /// Bit array in shared memory visible to both domains.
    pub array_ptr: *mut u32,
    /// Bit array in shared memory visible to the secure domain only.
    pub array_ptr_sec: *mut u32,
}

impl SemaphoreDescriptor {
    pub const fn empty() -> Self {
        Self {
            max_sema: 0,
            array_ptr: core::ptr::null_mut(),
            array_ptr_sec: core::ptr::null_mut(),
        }
    }
}

/// The three pieces of shared memory behind the cross-domain semaphore.
pub struct SemaphoreStorage<const WORDS: usize> {
    pub secure: SharedMemory<[u32; WORDS]>,
    pub shared: SharedMemory<[u32; WORDS]>,
    pub descriptor: SharedMemory<SemaphoreDescriptor>,
}

impl<const WORDS: usize> SemaphoreStorage<WORDS> {
    pub const fn new() -> Self {
        Self {
            secure: SharedMemory::new([0; WORDS]),
            shared: SharedMemory::new([0; WORDS]),
            descriptor: SharedMemory::new(SemaphoreDescriptor::empty()),
        }
    }
}

impl<const WORDS: usize> Default for SemaphoreStorage<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears both bit arrays, publishes the descriptor and registers it on `channel`.
///
/// Acquire and release are the IPC driver's business; this only guarantees the structure
/// exists, is sized for `max_count` and is reachable from both domains.
pub fn init_semaphore<S: SemaphoreInit, const WORDS: usize>(
    hw: &mut S,
    channel: IpcChannel,
    max_count: u32,
    storage: &'static SemaphoreStorage<WORDS>,
) -> Result<&'static SemaphoreDescriptor, ConfigError> {
    if max_count == 0 || max_count > WORDS as u32 * SEMA_PER_WORD {
        return Err(ConfigError::SemaphoreCapacity {
            count: max_count,
            words: WORDS,
        });
    }

    storage.secure.initialize([0; WORDS])?;
    storage.shared.initialize([0; WORDS])?;

    let descriptor = storage.descriptor.initialize(SemaphoreDescriptor {
        max_sema: max_count,
        array_ptr: storage.shared.as_mut_ptr().cast(),
        array_ptr_sec: storage.secure.as_mut_ptr().cast(),
    })?;

    hw.sema_init(channel, descriptor)
        .map_err(ConfigError::rejected("sema_init"))?;

    info!(
        "Semaphores: {} on IPC channel {} @ {:#010X}",
        max_count, channel.0, descriptor as *const _ as usize
    );
    Ok(descriptor)
}
