//! Board descriptions: the region table and the fixed numbers both domains agree on.

use crate::error::ConfigError;
use crate::hal::{EndpointAddr, IpcChannel};
use crate::region::{MasterId, ProtectionContext};

#[cfg(feature = "psoc-edge")]
pub mod psoc_edge;

/// Constants shared with the non-secure image and its build.
#[derive(Debug, Clone, Copy)]
pub struct PlatformConfig {
    /// Where the non-secure image publishes its initial stack pointer and reset vector.
    pub boot_image_base: u32,
    /// The secure CPU's own bus master.
    pub cpu_master: MasterId,
    /// Context the hardware enters when the non-secure side requests a secure service.
    pub service_pc: ProtectionContext,
    pub nonsecure_pc: ProtectionContext,
    /// Context of the companion core.
    pub companion_pc: ProtectionContext,
    pub semaphore_channel: IpcChannel,
    pub semaphore_count: u32,
    pub elevation_endpoint: EndpointAddr,
    /// Wait before dispatching an elevation request.
    pub elevation_delay_ms: u32,
    pub core_clock_hz: u32,
}

impl PlatformConfig {
    /// Rejects numbers that cannot describe a working handoff. Usable in `const` items so a
    /// board table fails to build instead of failing at boot.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.service_pc.value() == self.nonsecure_pc.value() {
            return Err(ConfigError::InvalidConfig(
                "the service context must differ from the non-secure context",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CONFIG: PlatformConfig = PlatformConfig {
        boot_image_base: 0x2204_0000,
        cpu_master: MasterId(0),
        service_pc: ProtectionContext::new(2),
        nonsecure_pc: ProtectionContext::new(5),
        companion_pc: ProtectionContext::new(6),
        semaphore_channel: IpcChannel(4),
        semaphore_count: 32,
        elevation_endpoint: EndpointAddr(1),
        elevation_delay_ms: 10,
        core_clock_hz: 200_000_000,
    };

    #[test]
    fn distinct_contexts_are_accepted() {
        assert_eq!(CONFIG.validate(), Ok(()));
    }

    #[test]
    fn service_context_must_not_be_the_nonsecure_one() {
        let config = PlatformConfig {
            service_pc: ProtectionContext::new(5),
            ..CONFIG
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidConfig(
                "the service context must differ from the non-secure context"
            ))
        );
    }
}
