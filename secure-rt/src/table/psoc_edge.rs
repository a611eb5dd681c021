//! PSoC Edge (CM33 secure, CM33 non-secure, CM55 companion) board table.
//!
//! Protection contexts: 2 is the secure CM33 and the secure-service context, 5 the
//! non-secure CM33 and the DMA masters that work for it, 6 the CM55.

use crate::hal::{EndpointAddr, IpcChannel};
use crate::region::{
    Access, BlockGate, Granularity, MaskRun, MasterBinding, MasterId, MemoryRegion, MpcId, PcMask,
    PeriRegionId, PeripheralAttributes, PeripheralRun, PpcId, Privilege, ProgrammingPath,
    ProtectionContext, RegionTable, SauAttribute, SauWindow, Security,
};
use crate::sema::{SemaphoreStorage, SEMA_PER_WORD};

use super::PlatformConfig;

pub const PC_SECURE: ProtectionContext = ProtectionContext::new(2);
pub const PC_NONSECURE: ProtectionContext = ProtectionContext::new(5);
pub const PC_CM55: ProtectionContext = ProtectionContext::new(6);

pub const RAMC0_MPC: MpcId = MpcId(0);
pub const RAMC1_MPC: MpcId = MpcId(1);
/// Programmed by the secure enclave, never directly.
pub const RRAM_MPC: MpcId = MpcId(2);
pub const SOCMEM_MPC: MpcId = MpcId(3);
pub const SMIF0_CORE0_AHB_MPC: MpcId = MpcId(4);
pub const SMIF0_CORE0_AXI_MPC: MpcId = MpcId(5);
pub const SMIF0_CORE1_AHB_MPC: MpcId = MpcId(6);
pub const SMIF0_CORE1_AXI_MPC: MpcId = MpcId(7);

/// The second serial memory core is off after reset; its controllers only take rules while
/// it runs.
pub const SMIF0_CORE1: BlockGate = BlockGate(1);

pub const PPC0: PpcId = PpcId(0);
pub const PPC1: PpcId = PpcId(1);

pub const CM33_0: MasterId = MasterId(0);
pub const CODE_MS_0: MasterId = MasterId(1);
/// Neural network accelerator.
pub const EXP_MS_0: MasterId = MasterId(12);
/// Ethernet MAC.
pub const EXP_MS_2: MasterId = MasterId(14);

pub const SEMA_COUNT: u32 = 128;
pub const SEMA_WORDS: usize = (SEMA_COUNT / SEMA_PER_WORD) as usize;

pub const CONFIG: PlatformConfig = PlatformConfig {
    boot_image_base: 0x2204_0000,
    cpu_master: CM33_0,
    service_pc: PC_SECURE,
    nonsecure_pc: PC_NONSECURE,
    companion_pc: PC_CM55,
    semaphore_channel: IpcChannel(4),
    semaphore_count: SEMA_COUNT,
    elevation_endpoint: EndpointAddr(1),
    elevation_delay_ms: 10,
    core_clock_hz: 200_000_000,
};

const _: () = assert!(CONFIG.validate().is_ok());

pub type Semaphores = SemaphoreStorage<SEMA_WORDS>;

const ALL_DOMAINS: &[ProtectionContext] = &[PC_SECURE, PC_NONSECURE, PC_CM55];
const SHARED_DOMAINS: &[ProtectionContext] = &[PC_NONSECURE, PC_CM55];
const CM55_ONLY: &[ProtectionContext] = &[PC_CM55];

const fn nonsecure(
    name: &'static str,
    controller: MpcId,
    base: u32,
    offset: u32,
    size: u32,
    granularity: Granularity,
    contexts: &'static [ProtectionContext],
) -> MemoryRegion {
    MemoryRegion {
        name,
        controller,
        base,
        offset,
        size,
        granularity,
        security: Security::NonSecure,
        access: Access::ReadWrite,
        contexts,
        path: ProgrammingPath::Direct,
        gate: None,
    }
}

pub const SRAM0_BASE: u32 = 0x2400_0000;
pub const SRAM1_BASE: u32 = 0x2408_0000;
pub const RRAM_BASE: u32 = 0x2200_0000;
pub const SOCMEM_BASE: u32 = 0x2600_0000;
pub const SMIF0_XIP_BASE: u32 = 0x6000_0000;
pub const SMIF1_XIP_BASE: u32 = 0x6400_0000;

pub static MEMORY: [MemoryRegion; 9] = [
    nonsecure("sram0", RAMC0_MPC, SRAM0_BASE, 0x0003_0000, 0x0005_0000, Granularity::K4, ALL_DOMAINS),
    nonsecure("sram1", RAMC1_MPC, SRAM1_BASE, 0x0000_0000, 0x0007_0000, Granularity::K4, ALL_DOMAINS),
    nonsecure("sram1-shm", RAMC1_MPC, SRAM1_BASE, 0x0007_C000, 0x0000_4000, Granularity::K4, SHARED_DOMAINS),
    MemoryRegion {
        path: ProgrammingPath::EnclaveSealed,
        ..nonsecure("rram-nvm", RRAM_MPC, RRAM_BASE, 0x0004_0000, 0x0004_0000, Granularity::K4, ALL_DOMAINS)
    },
    nonsecure("socmem", SOCMEM_MPC, SOCMEM_BASE, 0x0004_0000, 0x004C_0000, Granularity::K8, ALL_DOMAINS),
    nonsecure("smif0-xip", SMIF0_CORE0_AHB_MPC, SMIF0_XIP_BASE, 0x0010_0000, 0x00F0_0000, Granularity::K128, ALL_DOMAINS),
    nonsecure("smif0-xip-axi", SMIF0_CORE0_AXI_MPC, SMIF0_XIP_BASE, 0x0010_0000, 0x00F0_0000, Granularity::K128, CM55_ONLY),
    MemoryRegion {
        gate: Some(SMIF0_CORE1),
        ..nonsecure("smif1-xip", SMIF0_CORE1_AHB_MPC, SMIF1_XIP_BASE, 0x0000_0000, 0x0100_0000, Granularity::K128, ALL_DOMAINS)
    },
    MemoryRegion {
        gate: Some(SMIF0_CORE1),
        ..nonsecure("smif1-xip-axi", SMIF0_CORE1_AXI_MPC, SMIF1_XIP_BASE, 0x0000_0000, 0x0100_0000, Granularity::K128, CM55_ONLY)
    },
];

/// Region indices of the PERI0 protection map.
pub mod peri0 {
    use crate::region::PeriRegionId;

    pub const MAIN: PeriRegionId = PeriRegionId(0);
    pub const GR1_GROUP: PeriRegionId = PeriRegionId(2);
    pub const GR5_GROUP: PeriRegionId = PeriRegionId(6);
    pub const TR: PeriRegionId = PeriRegionId(9);
    pub const PERI_PCLK0_MAIN: PeriRegionId = PeriRegionId(10);
    pub const RRAMC0_EXTRA_AREA_GENERAL: PeriRegionId = PeriRegionId(13);
    pub const RRAMC0_USER: PeriRegionId = PeriRegionId(14);
    pub const RRAMC0_ALLUSER: PeriRegionId = PeriRegionId(16);
    pub const RRAMC0_SFR_USER: PeriRegionId = PeriRegionId(18);
    pub const M33SYSCPUSS: PeriRegionId = PeriRegionId(20);
    pub const RAMC1_CM33: PeriRegionId = PeriRegionId(24);
    pub const RAMC0_RAM_PWR: PeriRegionId = PeriRegionId(25);
    pub const RAMC1_RAM_PWR: PeriRegionId = PeriRegionId(26);
    pub const MXCM33_CM33: PeriRegionId = PeriRegionId(27);
    pub const MXCM33_CM33_NS: PeriRegionId = PeriRegionId(29);
    pub const MXCM33_CM33_INT: PeriRegionId = PeriRegionId(30);
    pub const CPUSS_ALL_PC: PeriRegionId = PeriRegionId(36);
    pub const CPUSS_CM33_NS: PeriRegionId = PeriRegionId(38);
    pub const CPUSS_MSC_INT: PeriRegionId = PeriRegionId(43);
    pub const MS_PC0_PRIV_MIR: PeriRegionId = PeriRegionId(45);
    pub const MSC_ACG: PeriRegionId = PeriRegionId(62);
    pub const IPC0_STRUCT2_IPC: PeriRegionId = PeriRegionId(66);
    pub const IPC0_STRUCT15_IPC: PeriRegionId = PeriRegionId(79);
    pub const IPC0_INTR_STRUCT2_INTR: PeriRegionId = PeriRegionId(82);
    pub const SRSS_HIB_DATA: PeriRegionId = PeriRegionId(100);
    pub const SRSS_MAIN: PeriRegionId = PeriRegionId(101);
    pub const RAM_TRIM_SRSS_SRAM: PeriRegionId = PeriRegionId(104);
    pub const DEBUG600: PeriRegionId = PeriRegionId(110);
    pub const CRYPTO_MAIN: PeriRegionId = PeriRegionId(111);
    pub const I3C: PeriRegionId = PeriRegionId(150);
    pub const ETH0: PeriRegionId = PeriRegionId(155);
    pub const MXNNLITE_1_0: PeriRegionId = PeriRegionId(165);
}

/// Region indices of the PERI1 protection map.
pub mod peri1 {
    use crate::region::PeriRegionId;

    pub const MAIN: PeriRegionId = PeriRegionId(0);
    pub const GR4_GROUP: PeriRegionId = PeriRegionId(5);
    pub const TR: PeriRegionId = PeriRegionId(8);
    pub const PERI_PCLK1_MAIN: PeriRegionId = PeriRegionId(9);
    pub const MXCM55_CM55_NS: PeriRegionId = PeriRegionId(40);
    pub const MXCM55_CM55_INT: PeriRegionId = PeriRegionId(41);
    pub const APPCPUSS_AP: PeriRegionId = PeriRegionId(52);
    pub const MS_CTL_MS_PC13_PRIV_MIR: PeriRegionId = PeriRegionId(55);
    pub const SMIF0_CORE1_DEVICE: PeriRegionId = PeriRegionId(90);
    pub const SMIF0_CORE0_HSIOM_PRT0: PeriRegionId = PeriRegionId(91);
    pub const SOCMEM_MAIN: PeriRegionId = PeriRegionId(110);
    pub const SOCMEM_PWR: PeriRegionId = PeriRegionId(112);
    pub const SOCMEM_MAIN_PORT: PeriRegionId = PeriRegionId(113);
    pub const DTCM: PeriRegionId = PeriRegionId(130);
}

const OPEN: PeripheralAttributes = PeripheralAttributes {
    security: Security::NonSecure,
    secure_privilege: Privilege::Any,
    nonsecure_privilege: Privilege::Any,
};

const fn open(ppc: PpcId, start: PeriRegionId, end: PeriRegionId) -> PeripheralRun {
    PeripheralRun {
        ppc,
        start,
        end,
        attributes: OPEN,
    }
}

pub static PERIPHERALS: [PeripheralRun; 28] = [
    open(PPC0, peri0::MAIN, peri0::MAIN),
    open(PPC0, peri0::GR1_GROUP, peri0::GR5_GROUP),
    open(PPC0, peri0::TR, peri0::TR),
    open(PPC0, peri0::PERI_PCLK0_MAIN, peri0::PERI_PCLK0_MAIN),
    open(PPC0, peri0::RRAMC0_EXTRA_AREA_GENERAL, peri0::RRAMC0_EXTRA_AREA_GENERAL),
    open(PPC0, peri0::RRAMC0_USER, peri0::RRAMC0_ALLUSER),
    open(PPC0, peri0::RRAMC0_SFR_USER, peri0::RRAMC0_SFR_USER),
    open(PPC0, peri0::M33SYSCPUSS, peri0::RAMC1_CM33),
    open(PPC0, peri0::RAMC0_RAM_PWR, peri0::RAMC1_RAM_PWR),
    open(PPC0, peri0::MXCM33_CM33, peri0::MXCM33_CM33),
    open(PPC0, peri0::MXCM33_CM33_NS, peri0::MXCM33_CM33_NS),
    open(PPC0, peri0::MXCM33_CM33_INT, peri0::CPUSS_ALL_PC),
    open(PPC0, peri0::CPUSS_CM33_NS, peri0::CPUSS_MSC_INT),
    open(PPC0, peri0::MS_PC0_PRIV_MIR, peri0::MSC_ACG),
    open(PPC0, peri0::IPC0_STRUCT2_IPC, peri0::IPC0_STRUCT15_IPC),
    open(PPC0, peri0::IPC0_INTR_STRUCT2_INTR, peri0::SRSS_HIB_DATA),
    open(PPC0, peri0::SRSS_MAIN, peri0::SRSS_MAIN),
    open(PPC0, peri0::RAM_TRIM_SRSS_SRAM, peri0::DEBUG600),
    open(PPC0, peri0::CRYPTO_MAIN, peri0::I3C),
    open(PPC0, peri0::ETH0, peri0::MXNNLITE_1_0),
    open(PPC1, peri1::MAIN, peri1::GR4_GROUP),
    open(PPC1, peri1::TR, peri1::TR),
    open(PPC1, peri1::PERI_PCLK1_MAIN, peri1::MXCM55_CM55_NS),
    open(PPC1, peri1::MXCM55_CM55_INT, peri1::APPCPUSS_AP),
    open(PPC1, peri1::MS_CTL_MS_PC13_PRIV_MIR, peri1::SMIF0_CORE1_DEVICE),
    open(PPC1, peri1::SMIF0_CORE0_HSIOM_PRT0, peri1::SOCMEM_MAIN),
    open(PPC1, peri1::SOCMEM_PWR, peri1::SOCMEM_PWR),
    open(PPC1, peri1::SOCMEM_MAIN_PORT, peri1::DTCM),
];

const DOMAIN_MASK: PcMask = PcMask::from_contexts(ALL_DOMAINS);

pub static MASKS: [MaskRun; 2] = [
    MaskRun {
        ppc: PPC0,
        start: peri0::MAIN,
        end: peri0::MXNNLITE_1_0,
        mask: DOMAIN_MASK,
    },
    MaskRun {
        ppc: PPC1,
        start: peri1::MAIN,
        end: peri1::DTCM,
        mask: DOMAIN_MASK,
    },
];

pub static MASTERS: [MasterBinding; 3] = [
    MasterBinding {
        name: "nnlite",
        master: EXP_MS_0,
        context: PC_NONSECURE,
    },
    MasterBinding {
        name: "nnlite-code",
        master: CODE_MS_0,
        context: PC_NONSECURE,
    },
    MasterBinding {
        name: "ethernet",
        master: EXP_MS_2,
        context: PC_NONSECURE,
    },
];

const fn ns_window(name: &'static str, start: u32, limit: u32) -> SauWindow {
    SauWindow {
        name,
        start,
        limit,
        attribute: SauAttribute::NonSecure,
    }
}

/// Address ranges the CM33 attributes to its non-secure state. They cover the non-secure
/// memory regions above; everything else stays secure.
pub static ATTRIBUTION: [SauWindow; 7] = [
    ns_window("rram-nvm", 0x2204_0000, 0x2207_FFFF),
    ns_window("sram0", 0x2403_0000, 0x2407_FFFF),
    ns_window("sram1", 0x2408_0000, 0x240E_FFFF),
    ns_window("sram1-shm", 0x240F_C000, 0x240F_FFFF),
    ns_window("socmem", 0x2604_0000, 0x264F_FFFF),
    ns_window("smif0-xip", 0x6010_0000, 0x60FF_FFFF),
    ns_window("smif1-xip", 0x6400_0000, 0x64FF_FFFF),
];

pub static TABLE: RegionTable = RegionTable {
    memory: &MEMORY,
    peripherals: &PERIPHERALS,
    masks: &MASKS,
    masters: &MASTERS,
    attribution: &ATTRIBUTION,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::Sequencer;
    use crate::mock::{Call, MockPlatform};
    use crate::mpc;
    use pretty_assertions::assert_eq;

    fn isr() {}

    fn position(calls: &[Call], call: Call) -> usize {
        calls.iter().position(|c| *c == call).unwrap()
    }

    #[test]
    fn table_passes_audit() {
        assert_eq!(TABLE.audit(), Ok(()));
    }

    #[test]
    fn peripherals_are_limited_to_the_three_domains() {
        assert_eq!(DOMAIN_MASK.bits(), 0x64);
    }

    #[test]
    fn boot_image_sits_in_nonsecure_rram() {
        let rram = MEMORY.iter().find(|r| r.name == "rram-nvm").unwrap();
        let boot = CONFIG.boot_image_base as u64;
        assert!(rram.start() <= boot && boot + 8 <= rram.end());
        assert_eq!(rram.path, ProgrammingPath::EnclaveSealed);
    }

    #[test]
    fn semaphore_arrays_hold_every_semaphore() {
        assert_eq!(SEMA_WORDS, 4);
        assert!(SEMA_WORDS as u32 * SEMA_PER_WORD >= CONFIG.semaphore_count);
    }

    #[test]
    fn shared_window_excludes_the_secure_context() {
        let shm = MEMORY.iter().find(|r| r.name == "sram1-shm").unwrap();
        assert!(!shm.contexts.contains(&PC_SECURE));
    }

    #[test]
    fn attribution_covers_every_nonsecure_region_start() {
        for region in MEMORY.iter() {
            let start = region.start();
            assert!(
                ATTRIBUTION
                    .iter()
                    .any(|w| w.start as u64 <= start && start <= w.limit as u64),
                "{} is not attributed non-secure",
                region.name
            );
        }
    }

    #[test]
    fn second_smif_core_is_prepared_while_it_runs() {
        let mut hw = MockPlatform::new();
        hw.gate_controllers(&TABLE);

        assert!(mpc::configure_memory(&mut hw, &TABLE).is_ok());

        assert!(hw.ordering_violations.is_empty());
        assert!(!hw.is_powered(SMIF0_CORE1));

        let on = position(&hw.calls, Call::SetBlockEnabled(SMIF0_CORE1, true));
        let off = position(&hw.calls, Call::SetBlockEnabled(SMIF0_CORE1, false));
        for mpc in [SMIF0_CORE1_AHB_MPC, SMIF0_CORE1_AXI_MPC] {
            let reset = position(&hw.calls, Call::MpcReset(mpc));
            let response = hw
                .calls
                .iter()
                .position(|c| matches!(c, Call::MpcSetViolationResponse(m, _) if *m == mpc))
                .unwrap();
            assert!(on < reset && reset < response && response < off);
        }
    }

    #[test]
    fn board_handoff_runs_to_the_jump() {
        static STORAGE: Semaphores = Semaphores::new();
        let mut hw = MockPlatform::new();
        hw.gate_controllers(&TABLE);
        hw.boot_words = [0x2408_0000, 0x2204_0401];

        let handed_off = Sequencer::new(&TABLE, &CONFIG)
            .run(&mut hw, &STORAGE, isr)
            .unwrap();

        assert_eq!(handed_off.image.reset_vector, 0x2204_0401);
        assert!(hw.ordering_violations.is_empty());
        assert!(hw.sau_enabled);
        assert_eq!(hw.sau_windows.len(), ATTRIBUTION.len());
        assert!(!hw.is_powered(SMIF0_CORE1));

        let sau_on = position(&hw.calls, Call::SauEnable);
        let first_reset = hw
            .calls
            .iter()
            .position(|c| matches!(c, Call::MpcReset(_)))
            .unwrap();
        assert!(sau_on < first_reset);
        assert_eq!(hw.calls.last(), Some(&Call::CallNonSecure(0x2204_0401)));
    }
}
