//! Descriptor types for memory and peripheral regions and the table that groups them.
//!
//! A [`RegionTable`] is the only place address ranges, grants and bus master bindings are
//! written down. The programmers in [`crate::mpc`], [`crate::ppc`] and [`crate::ms_ctl`]
//! only ever walk a table, so every grant the secure image hands out can be audited here.

use crate::error::ConfigError;

/// Security/privilege domain identifier that access rules are written against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtectionContext(u8);

impl ProtectionContext {
    pub const COUNT: u8 = 8;

    pub const fn new(value: u8) -> Self {
        assert!(value < Self::COUNT, "protection context out of range");
        Self(value)
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    pub const fn mask_bit(self) -> u8 {
        1 << self.0
    }
}

/// Set of protection contexts allowed to reach a peripheral run at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcMask(u8);

impl PcMask {
    pub const fn from_contexts(contexts: &[ProtectionContext]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < contexts.len() {
            bits |= contexts[i].mask_bit();
            i += 1;
        }
        Self(bits)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, context: ProtectionContext) -> bool {
        self.0 & context.mask_bit() != 0
    }
}

/// Block size a memory protection controller tracks attributes at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Granularity {
    B32 = 0,
    B64,
    B128,
    B256,
    B512,
    K1,
    K2,
    K4,
    K8,
    K16,
    K32,
    K64,
    K128,
    K256,
    K512,
    M1,
    M2,
    M4,
}

impl Granularity {
    pub const fn bytes(self) -> u32 {
        32 << (self as u32)
    }

    /// Encoding used in controller configuration records.
    pub const fn code(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Security {
    Secure = 0,
    NonSecure = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Access {
    Disabled = 0,
    Read = 1,
    Write = 2,
    ReadWrite = 3,
}

impl Access {
    pub const fn allows_write(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

/// Which privilege levels may issue an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    PrivilegedOnly,
    Any,
}

/// Memory protection controller instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MpcId(pub u8);

/// Peripheral protection controller instance, one per peripheral bus segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PpcId(pub u8);

/// Named hardware block in a peripheral controller's region map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeriRegionId(pub u16);

/// Fixed bus master identifier (CPU core or DMA capable IP).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MasterId(pub u8);

/// IP block that has to be running while its memory controller is programmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockGate(pub u8);

/// How rules for a region reach the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgrammingPath {
    /// Written straight into the controller's rule registers.
    Direct,
    /// Submitted to the secure enclave as a checksummed record.
    EnclaveSealed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub name: &'static str,
    pub controller: MpcId,
    /// Start of the memory the controller guards, used to compare regions across controllers.
    pub base: u32,
    pub offset: u32,
    pub size: u32,
    pub granularity: Granularity,
    pub security: Security,
    pub access: Access,
    pub contexts: &'static [ProtectionContext],
    pub path: ProgrammingPath,
    pub gate: Option<BlockGate>,
}

impl MemoryRegion {
    pub const fn start(&self) -> u64 {
        self.base as u64 + self.offset as u64
    }

    pub const fn end(&self) -> u64 {
        self.start() + self.size as u64
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let granularity = self.granularity.bytes();

        if self.size == 0 {
            return Err(ConfigError::EmptyRegion { region: self.name });
        }
        if self.offset % granularity != 0 || self.size % granularity != 0 {
            return Err(ConfigError::Misaligned {
                region: self.name,
                granularity,
            });
        }
        if self.contexts.is_empty() {
            return Err(ConfigError::NoContexts { region: self.name });
        }

        Ok(())
    }

    pub fn overlaps(&self, other: &MemoryRegion) -> bool {
        self.start() < other.end() && other.start() < self.end()
    }

    pub fn grants_nonsecure_write(&self) -> bool {
        self.security == Security::NonSecure && self.access.allows_write()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeripheralAttributes {
    pub security: Security,
    pub secure_privilege: Privilege,
    pub nonsecure_privilege: Privilege,
}

/// Attribute triple applied to an inclusive run of peripheral regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeripheralRun {
    pub ppc: PpcId,
    pub start: PeriRegionId,
    pub end: PeriRegionId,
    pub attributes: PeripheralAttributes,
}

/// Context mask locked onto an inclusive run of peripheral regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskRun {
    pub ppc: PpcId,
    pub start: PeriRegionId,
    pub end: PeriRegionId,
    pub mask: PcMask,
}

impl MaskRun {
    pub fn covers(&self, ppc: PpcId, start: PeriRegionId, end: PeriRegionId) -> bool {
        self.ppc == ppc && self.start <= start && end <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterBinding {
    pub name: &'static str,
    pub master: MasterId,
    pub context: ProtectionContext,
}

/// How the core's security attribution unit classifies an address window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SauAttribute {
    NonSecure,
    NonSecureCallable,
}

/// Address window the CPU treats as non-secure, independent of the bus side controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SauWindow {
    pub name: &'static str,
    pub start: u32,
    /// Last byte of the window.
    pub limit: u32,
    pub attribute: SauAttribute,
}

impl SauWindow {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start & 0x1F != 0 || self.limit & 0x1F != 0x1F || self.start > self.limit {
            return Err(ConfigError::SauMisaligned { region: self.name });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RegionTable {
    pub memory: &'static [MemoryRegion],
    pub peripherals: &'static [PeripheralRun],
    pub masks: &'static [MaskRun],
    pub masters: &'static [MasterBinding],
    /// Windows programmed into the security attribution unit, in region number order.
    pub attribution: &'static [SauWindow],
}

impl RegionTable {
    /// Checks everything that can be checked before touching hardware.
    pub fn audit(&self) -> Result<(), ConfigError> {
        for region in self.memory {
            region.validate()?;
        }

        for window in self.attribution {
            window.validate()?;
        }

        for controller in self.memory_controllers() {
            let gate = self.controller_gate(controller);
            if self.direct_regions(controller).any(|region| region.gate != gate) {
                return Err(ConfigError::MixedGate {
                    controller: controller.0,
                });
            }
        }

        for (i, region) in self.memory.iter().enumerate() {
            for other in &self.memory[i + 1..] {
                if !region.overlaps(other) {
                    continue;
                }
                if region.security == Security::Secure && other.grants_nonsecure_write() {
                    return Err(ConfigError::BoundaryViolation {
                        region: other.name,
                        secure: region.name,
                    });
                }
                if other.security == Security::Secure && region.grants_nonsecure_write() {
                    return Err(ConfigError::BoundaryViolation {
                        region: region.name,
                        secure: other.name,
                    });
                }
            }
        }

        for mask in self.masks {
            if mask.start > mask.end {
                return Err(ConfigError::ReversedRun {
                    ppc: mask.ppc.0,
                    start: mask.start.0,
                    end: mask.end.0,
                });
            }
            if !self.peripherals.iter().any(|run| run.ppc == mask.ppc) {
                return Err(ConfigError::OutOfOrder {
                    ppc: mask.ppc.0,
                    operation: "set_context_mask",
                });
            }
        }

        for run in self.peripherals {
            if run.start > run.end {
                return Err(ConfigError::ReversedRun {
                    ppc: run.ppc.0,
                    start: run.start.0,
                    end: run.end.0,
                });
            }
            if !self
                .masks
                .iter()
                .any(|mask| mask.covers(run.ppc, run.start, run.end))
            {
                return Err(ConfigError::UnmaskedRun {
                    ppc: run.ppc.0,
                    start: run.start.0,
                    end: run.end.0,
                });
            }
        }

        Ok(())
    }

    /// Memory controllers programmed directly, in table order, each listed once.
    pub fn memory_controllers(&self) -> impl Iterator<Item = MpcId> + '_ {
        self.memory
            .iter()
            .enumerate()
            .filter(|(_, region)| region.path == ProgrammingPath::Direct)
            .filter(move |(i, region)| {
                !self.memory[..*i].iter().any(|earlier| {
                    earlier.path == ProgrammingPath::Direct && earlier.controller == region.controller
                })
            })
            .map(|(_, region)| region.controller)
    }

    /// Block that has to be running while `controller` is touched. Taken from its first
    /// region; the audit rejects controllers whose regions disagree.
    pub fn controller_gate(&self, controller: MpcId) -> Option<BlockGate> {
        self.direct_regions(controller)
            .next()
            .and_then(|region| region.gate)
    }

    /// Distinct block gates, in table order.
    pub fn gates(&self) -> impl Iterator<Item = BlockGate> + '_ {
        self.memory
            .iter()
            .enumerate()
            .filter_map(move |(i, region)| {
                let gate = region.gate?;
                let seen = self.memory[..i].iter().any(|earlier| earlier.gate == Some(gate));
                (!seen).then_some(gate)
            })
    }

    fn direct_regions(&self, controller: MpcId) -> impl Iterator<Item = &MemoryRegion> + '_ {
        self.memory.iter().filter(move |region| {
            region.path == ProgrammingPath::Direct && region.controller == controller
        })
    }

    /// Peripheral controllers in table order, each listed once.
    pub fn peripheral_controllers(&self) -> impl Iterator<Item = PpcId> + '_ {
        self.peripherals
            .iter()
            .enumerate()
            .filter(move |(i, run)| !self.peripherals[..*i].iter().any(|earlier| earlier.ppc == run.ppc))
            .map(|(_, run)| run.ppc)
    }
}
