//! Core operations of the secure Cortex-M33.

use cortex_m::peripheral::sau::{SauError, SauRegion, SauRegionAttribute};
use cortex_m::peripheral::SAU;
use log::debug;

use crate::error::HwError;
use crate::hal::{SecureCpu, SecurityAttribution};
use crate::region::{SauAttribute, SauWindow};

/// The secure core together with its attribution unit.
pub struct CortexM33 {
    core_clock_hz: u32,
    sau: SAU,
}

impl CortexM33 {
    pub fn new(core_clock_hz: u32, sau: SAU) -> Self {
        Self { core_clock_hz, sau }
    }
}

impl SecurityAttribution for CortexM33 {
    fn sau_region_count(&mut self) -> u8 {
        self.sau.region_numbers()
    }

    fn sau_disable(&mut self) {
        // SAFETY: only the enable bit changes. Until it is set again every address is secure.
        unsafe {
            self.sau.ctrl.modify(|mut ctrl| {
                ctrl.set_enable(false);
                ctrl
            });
        }
    }

    fn sau_set_region(&mut self, number: u8, window: &SauWindow) -> Result<(), HwError> {
        let region = SauRegion {
            base_address: window.start,
            limit_address: window.limit,
            attribute: match window.attribute {
                SauAttribute::NonSecure => SauRegionAttribute::NonSecure,
                SauAttribute::NonSecureCallable => SauRegionAttribute::NonSecureCallable,
            },
        };

        self.sau.set_region(number, region).map_err(|e| match e {
            SauError::RegionNumberTooBig => HwError::InvalidRegion,
            _ => HwError::BadParam,
        })
    }

    fn sau_enable(&mut self) {
        self.sau.enable();
    }
}

impl SecureCpu for CortexM33 {
    fn read_boot_words(&mut self, base: u32) -> [u32; 2] {
        // SAFETY: `base` is the start of the non-secure boot image in always-readable NVM.
        unsafe { core::ptr::read_volatile(base as *const [u32; 2]) }
    }

    fn write_msp_ns(&mut self, stack_pointer: u32) {
        cortex_m::register::msp::write_ns(stack_pointer);
    }

    fn delay_ms(&mut self, ms: u32) {
        cortex_m::asm::delay((self.core_clock_hz / 1000).saturating_mul(ms));
    }

    fn call_nonsecure(&mut self, entry: u32) {
        debug!(
            "Entry {:#010X} attributed {:?}",
            entry,
            read_address_permissions(entry)
        );

        // Every protection write has to land before the first non-secure fetch.
        cortex_m::asm::dsb();
        cortex_m::asm::isb();

        // SAFETY: the entry was read from the non-secure image's vector table and checked
        // to be programmed. The call clears secure state from the registers.
        let entry = unsafe {
            core::mem::transmute::<*const u32, extern "cmse-nonsecure-call" fn()>(
                entry as *const u32,
            )
        };
        entry();
    }
}

/// Security attribution of `address` as seen by the secure state.
pub fn read_address_permissions(address: u32) -> SauRegionAttribute {
    let value = cortex_m::asm::tt(address as *mut u32);

    let s = value & (1 << 22) > 0;
    let nsrw = value & (1 << 21) > 0;

    match (s, nsrw) {
        (_, true) => SauRegionAttribute::NonSecureCallable,
        (true, false) => SauRegionAttribute::Secure,
        (false, false) => SauRegionAttribute::NonSecure,
    }
}
