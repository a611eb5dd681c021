//! Seams between the configuration engine and the device.
//!
//! Every call takes a fully populated record built for that call alone; nothing is
//! carried over between calls.

use crate::error::{HwError, ServiceError};
use crate::region::{
    Access, BlockGate, Granularity, MasterId, MemoryRegion, MpcId, PcMask, PeriRegionId,
    PeripheralAttributes, PpcId, ProtectionContext, SauWindow, Security,
};
use crate::sema::SemaphoreDescriptor;

/// What a controller does with an access its rules reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultResponse {
    /// Answer the offending master with a bus error.
    BusError,
    /// Complete the access with zero data and drop writes.
    ReadZeroWriteIgnore,
}

/// IPC channel carrying the cross-domain semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcChannel(pub u32);

/// IPC pipe endpoint the non-secure domain raises elevation requests on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointAddr(pub u32);

/// One memory controller rule: rights of a single protection context over a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct RotConfig {
    pub addr_offset: u32,
    pub size: u32,
    pub region_size: Granularity,
    pub pc: ProtectionContext,
    pub secure: Security,
    pub access: Access,
}

impl RotConfig {
    pub fn for_context(region: &MemoryRegion, pc: ProtectionContext) -> Self {
        Self {
            addr_offset: region.offset,
            size: region.size,
            region_size: region.granularity,
            pc,
            secure: region.security,
            access: region.access,
        }
    }

    /// The record as the enclave lays it out in memory.
    pub fn to_words(&self) -> [u32; 6] {
        [
            self.addr_offset,
            self.size,
            self.region_size.code(),
            self.pc.value() as u32,
            self.secure as u32,
            self.access as u32,
        ]
    }
}

/// A rule plus the CRC-32 of its record, so the enclave can detect a corrupted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealedRotConfig {
    pub config: RotConfig,
    pub crc: u32,
}

impl SealedRotConfig {
    pub fn seal(config: RotConfig) -> Self {
        let bytes: [u8; 24] = trustzone_pc_utils::words_to_bytes(config.to_words());
        Self {
            config,
            crc: trustzone_pc_utils::config_checksum(&bytes),
        }
    }

    pub fn verify(&self) -> bool {
        Self::seal(self.config).crc == self.crc
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpcInit {
    pub response: FaultResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpcAttribute {
    pub start: PeriRegionId,
    pub end: PeriRegionId,
    pub attributes: PeripheralAttributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcMaskConfig {
    pub start: PeriRegionId,
    pub end: PeriRegionId,
    pub mask: PcMask,
}

/// The secure core's security attribution unit.
pub trait SecurityAttribution {
    /// Number of windows the unit implements.
    fn sau_region_count(&mut self) -> u8;
    /// Turns the unit off so windows can be rewritten without a half-programmed map in force.
    fn sau_disable(&mut self);
    fn sau_set_region(&mut self, number: u8, window: &SauWindow) -> Result<(), HwError>;
    fn sau_enable(&mut self);
}

/// Memory protection controllers, plus the enclave path for sealed rules.
pub trait MemoryProtection {
    /// Puts a controller back in its reset state, dropping every rule.
    fn mpc_reset(&mut self, mpc: MpcId) -> Result<(), HwError>;
    fn mpc_set_violation_response(
        &mut self,
        mpc: MpcId,
        response: FaultResponse,
    ) -> Result<(), HwError>;
    fn mpc_configure_rot(&mut self, mpc: MpcId, config: &RotConfig) -> Result<(), HwError>;
    fn mpc_configure_rot_sealed(&mut self, config: &SealedRotConfig) -> Result<(), HwError>;
    fn set_block_enabled(&mut self, block: BlockGate, enabled: bool) -> Result<(), HwError>;
}

/// Peripheral protection controllers.
pub trait PeripheralProtection {
    fn ppc_reset(&mut self, ppc: PpcId) -> Result<(), HwError>;
    fn ppc_init(&mut self, ppc: PpcId, init: &PpcInit) -> Result<(), HwError>;
    fn ppc_configure_attribute(&mut self, ppc: PpcId, attribute: &PpcAttribute)
        -> Result<(), HwError>;
    fn ppc_set_pc_mask(&mut self, ppc: PpcId, mask: &PcMaskConfig) -> Result<(), HwError>;
}

/// Master security controller holding each bus master's active and saved context.
pub trait MasterControl {
    fn set_active_pc(&mut self, master: MasterId, pc: ProtectionContext) -> Result<(), HwError>;
    fn set_saved_pc(&mut self, master: MasterId, pc: ProtectionContext) -> Result<(), HwError>;
    /// Binds the interrupt handler the hardware runs when `pc` is entered from a request.
    fn set_pc_handler(&mut self, pc: ProtectionContext, handler: fn()) -> Result<(), HwError>;
}

pub trait SemaphoreInit {
    fn sema_init(
        &mut self,
        channel: IpcChannel,
        descriptor: &'static SemaphoreDescriptor,
    ) -> Result<(), HwError>;
}

/// IPC pipe callbacks registered by the messaging layer.
pub trait IpcDispatch {
    fn execute_callback(&mut self, endpoint: EndpointAddr) -> Result<(), ServiceError>;
}

/// Core level operations of the secure CPU.
pub trait SecureCpu {
    /// Reads the stack pointer and reset vector words at `base`.
    fn read_boot_words(&mut self, base: u32) -> [u32; 2];
    fn write_msp_ns(&mut self, stack_pointer: u32);
    fn delay_ms(&mut self, ms: u32);
    /// Branches to non-secure code. Only returns if the non-secure image returns.
    fn call_nonsecure(&mut self, entry: u32);
}

/// Everything the handoff sequence drives.
pub trait Platform:
    SecurityAttribution
    + MemoryProtection
    + PeripheralProtection
    + MasterControl
    + SemaphoreInit
    + SecureCpu
{
}

impl<T> Platform for T where
    T: SecurityAttribution
        + MemoryProtection
        + PeripheralProtection
        + MasterControl
        + SemaphoreInit
        + SecureCpu
{
}
