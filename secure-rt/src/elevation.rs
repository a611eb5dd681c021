//! Context elevation: the secure-service interrupt raised by the non-secure domain.
//!
//! When the non-secure side raises a request on the pipe endpoint, the hardware switches
//! the CPU master into the secure-service context and runs the handler installed for it.
//! The handler dispatches the request and always moves the CPU back to the non-secure
//! context before returning, whatever the callback did.

use core::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};

use crate::error::{ElevationError, HwError};
use crate::fatal;
use crate::hal::{EndpointAddr, IpcDispatch, MasterControl, SecureCpu};
use crate::region::{MasterId, ProtectionContext};
use crate::table::PlatformConfig;

pub struct ElevationHandler {
    cpu: MasterId,
    nonsecure: ProtectionContext,
    endpoint: EndpointAddr,
    delay_ms: u32,
    busy: AtomicBool,
}

impl ElevationHandler {
    pub const fn new(config: &PlatformConfig) -> Self {
        Self {
            cpu: config.cpu_master,
            nonsecure: config.nonsecure_pc,
            endpoint: config.elevation_endpoint,
            delay_ms: config.elevation_delay_ms,
            busy: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Services one request. Called from the secure-service interrupt.
    ///
    /// A request arriving while another is still being dispatched is refused without
    /// touching the CPU's context; the running dispatch restores it.
    pub fn on_request<H>(&self, hw: &mut H) -> Result<(), ElevationError>
    where
        H: MasterControl + IpcDispatch + SecureCpu,
    {
        let _busy = BusyFlag::acquire(&self.busy).ok_or_else(|| {
            warn!("Elevation request while busy");
            ElevationError::Busy
        })?;

        let mut elevated = ElevatedContext::enter(hw, self.cpu, self.nonsecure);

        // Give the requester time to finish publishing its request.
        elevated.hw().delay_ms(self.delay_ms);

        debug!("Dispatching endpoint {}", self.endpoint.0);
        let result = elevated.hw().execute_callback(self.endpoint);

        elevated.restore().unwrap_or_else(|e| fatal::halt(&e));
        result.map_err(ElevationError::from)
    }
}

struct BusyFlag<'a>(&'a AtomicBool);

impl<'a> BusyFlag<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Scope in which the CPU master runs in the elevated context. Leaving the scope on any
/// path puts the master back in `restore_to`.
pub struct ElevatedContext<'h, H: MasterControl> {
    hw: &'h mut H,
    master: MasterId,
    restore_to: ProtectionContext,
    restored: bool,
}

impl<'h, H: MasterControl> ElevatedContext<'h, H> {
    pub fn enter(hw: &'h mut H, master: MasterId, restore_to: ProtectionContext) -> Self {
        Self {
            hw,
            master,
            restore_to,
            restored: false,
        }
    }

    pub fn hw(&mut self) -> &mut H {
        &mut *self.hw
    }

    pub fn restore(mut self) -> Result<(), HwError> {
        self.restored = true;
        self.hw.set_active_pc(self.master, self.restore_to)
    }
}

impl<H: MasterControl> Drop for ElevatedContext<'_, H> {
    fn drop(&mut self) {
        if !self.restored {
            if let Err(e) = self.hw.set_active_pc(self.master, self.restore_to) {
                fatal::halt(&e);
            }
        }
    }
}
