use log::{debug, info};

use crate::error::ConfigError;
use crate::hal::{FaultResponse, MemoryProtection, RotConfig, SealedRotConfig};
use crate::region::{
    BlockGate, MemoryRegion, MpcId, ProgrammingPath, ProtectionContext, RegionTable,
};

/// Programs the rule giving `pc` the region's rights. Calls for other contexts of the same
/// region add rules next to this one, they never replace it.
pub fn configure_region<M: MemoryProtection>(
    mpc: &mut M,
    region: &MemoryRegion,
    pc: ProtectionContext,
) -> Result<(), ConfigError> {
    let config = RotConfig::for_context(region, pc);

    debug!(
        "MPC {} rule {} @ {:#010X}..{:#010X} pc {} {:?} {:?}",
        region.controller.0,
        region.name,
        region.start(),
        region.end(),
        pc.value(),
        region.security,
        region.access
    );

    match region.path {
        ProgrammingPath::Direct => mpc
            .mpc_configure_rot(region.controller, &config)
            .map_err(ConfigError::rejected("mpc_configure_rot")),
        ProgrammingPath::EnclaveSealed => mpc
            .mpc_configure_rot_sealed(&SealedRotConfig::seal(config))
            .map_err(ConfigError::rejected("mpc_configure_rot_sealed")),
    }
}

/// Programs every context listed for `region`, powering its gated block around the rules.
pub fn configure_region_all_contexts<M: MemoryProtection>(
    mpc: &mut M,
    region: &MemoryRegion,
) -> Result<usize, ConfigError> {
    region.validate()?;

    match region.gate {
        Some(gate) => with_block_enabled(mpc, gate, |mpc| program_region(mpc, region)),
        None => program_region(mpc, region),
    }
}

/// Applies the memory half of a table and returns the rule count.
///
/// Each directly programmed controller is reset and set to raise bus errors before its
/// rules are issued. Controllers inside a gated block get all of that within a single
/// window in which the block runs.
pub fn configure_memory<M: MemoryProtection>(
    mpc: &mut M,
    table: &RegionTable,
) -> Result<usize, ConfigError> {
    for region in table.memory {
        region.validate()?;
    }

    for controller in table
        .memory_controllers()
        .filter(|controller| table.controller_gate(*controller).is_none())
    {
        prepare_controller(mpc, controller)?;
    }

    let mut rules = 0;
    for region in table.memory.iter().filter(|region| region.gate.is_none()) {
        rules += program_region(mpc, region)?;
    }

    for gate in table.gates() {
        rules += with_block_enabled(mpc, gate, |mpc| {
            for controller in table
                .memory_controllers()
                .filter(|controller| table.controller_gate(*controller) == Some(gate))
            {
                prepare_controller(mpc, controller)?;
            }

            let mut rules = 0;
            for region in table.memory.iter().filter(|region| region.gate == Some(gate)) {
                rules += program_region(mpc, region)?;
            }
            Ok(rules)
        })?;
    }

    Ok(rules)
}

fn prepare_controller<M: MemoryProtection>(
    mpc: &mut M,
    controller: MpcId,
) -> Result<(), ConfigError> {
    mpc.mpc_reset(controller)
        .map_err(ConfigError::rejected("mpc_reset"))?;
    mpc.mpc_set_violation_response(controller, FaultResponse::BusError)
        .map_err(ConfigError::rejected("mpc_set_violation_response"))
}

fn program_region<M: MemoryProtection>(
    mpc: &mut M,
    region: &MemoryRegion,
) -> Result<usize, ConfigError> {
    region
        .contexts
        .iter()
        .try_for_each(|pc| configure_region(mpc, region, *pc))?;

    info!(
        "Memory {} @ {:#010X}..{:#010X} = {:?}",
        region.name,
        region.start(),
        region.end(),
        region.security
    );
    Ok(region.contexts.len())
}

/// Runs `f` with `gate` enabled and disables it again whatever `f` returns.
fn with_block_enabled<M: MemoryProtection, T>(
    mpc: &mut M,
    gate: BlockGate,
    f: impl FnOnce(&mut M) -> Result<T, ConfigError>,
) -> Result<T, ConfigError> {
    mpc.set_block_enabled(gate, true)
        .map_err(ConfigError::rejected("set_block_enabled"))?;

    let result = f(mpc);
    let disabled = mpc
        .set_block_enabled(gate, false)
        .map_err(ConfigError::rejected("set_block_enabled"));

    let value = result?;
    disabled?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HwError;
    use crate::mock::{Call, MockPlatform, OrderingViolation};
    use crate::region::{Access, Granularity, Security};
    use pretty_assertions::assert_eq;
    use std::vec;
    use std::vec::Vec;

    const PC2: ProtectionContext = ProtectionContext::new(2);
    const PC5: ProtectionContext = ProtectionContext::new(5);
    const PC6: ProtectionContext = ProtectionContext::new(6);

    const SRAM: MemoryRegion = MemoryRegion {
        name: "sram",
        controller: MpcId(0),
        base: 0x2400_0000,
        offset: 0x1000,
        size: 0x1000,
        granularity: Granularity::K4,
        security: Security::NonSecure,
        access: Access::ReadWrite,
        contexts: &[PC2, PC5, PC6],
        path: ProgrammingPath::Direct,
        gate: None,
    };

    #[test]
    fn one_rule_per_context() {
        let mut hw = MockPlatform::new();

        assert_eq!(configure_region_all_contexts(&mut hw, &SRAM), Ok(3));

        let expected: Vec<Call> = [PC2, PC5, PC6]
            .into_iter()
            .map(|pc| {
                Call::MpcConfigureRot(
                    MpcId(0),
                    RotConfig {
                        addr_offset: 0x1000,
                        size: 0x1000,
                        region_size: Granularity::K4,
                        pc,
                        secure: Security::NonSecure,
                        access: Access::ReadWrite,
                    },
                )
            })
            .collect();
        assert_eq!(hw.calls, expected);
    }

    #[test]
    fn sealed_regions_go_through_the_enclave() {
        let mut hw = MockPlatform::new();
        let region = MemoryRegion {
            path: ProgrammingPath::EnclaveSealed,
            contexts: &[PC5],
            ..SRAM
        };

        configure_region(&mut hw, &region, PC5).unwrap();

        let [Call::MpcConfigureRotSealed(sealed)] = hw.calls.as_slice() else {
            panic!("unexpected calls: {:?}", hw.calls);
        };
        assert!(sealed.verify());
        assert_eq!(sealed.config.pc, PC5);
    }

    #[test]
    fn gated_block_is_disabled_even_when_a_rule_fails() {
        let mut hw = MockPlatform::new();
        hw.fail_when(|call| matches!(call, Call::MpcConfigureRot(_, config) if config.pc == PC5));
        let region = MemoryRegion {
            gate: Some(BlockGate(1)),
            ..SRAM
        };

        let result = configure_region_all_contexts(&mut hw, &region);

        assert_eq!(
            result,
            Err(ConfigError::Rejected {
                operation: "mpc_configure_rot",
                source: HwError::BadParam
            })
        );
        assert_eq!(hw.calls.first(), Some(&Call::SetBlockEnabled(BlockGate(1), true)));
        assert_eq!(hw.calls.last(), Some(&Call::SetBlockEnabled(BlockGate(1), false)));
    }

    #[test]
    fn misaligned_region_never_reaches_the_controller() {
        let mut hw = MockPlatform::new();
        let region = MemoryRegion {
            offset: 0x800,
            ..SRAM
        };

        assert!(matches!(
            configure_region_all_contexts(&mut hw, &region),
            Err(ConfigError::Misaligned { .. })
        ));
        assert!(hw.calls.is_empty());
    }

    #[test]
    fn controllers_answer_violations_with_bus_errors() {
        static MEMORY: [MemoryRegion; 2] = [
            SRAM,
            MemoryRegion {
                name: "socmem",
                controller: MpcId(3),
                base: 0x2600_0000,
                offset: 0,
                size: 0x4000,
                granularity: Granularity::K8,
                ..SRAM
            },
        ];
        let table = RegionTable {
            memory: &MEMORY,
            peripherals: &[],
            masks: &[],
            masters: &[],
            attribution: &[],
        };
        let mut hw = MockPlatform::new();

        assert_eq!(configure_memory(&mut hw, &table), Ok(6));
        assert_eq!(
            &hw.calls[..4],
            &[
                Call::MpcReset(MpcId(0)),
                Call::MpcSetViolationResponse(MpcId(0), FaultResponse::BusError),
                Call::MpcReset(MpcId(3)),
                Call::MpcSetViolationResponse(MpcId(3), FaultResponse::BusError),
            ]
        );
    }

    #[test]
    fn applying_a_table_twice_leaves_the_same_rules() {
        static MEMORY: [MemoryRegion; 1] = [SRAM];
        let table = RegionTable {
            memory: &MEMORY,
            peripherals: &[],
            masks: &[],
            masters: &[],
            attribution: &[],
        };
        let mut hw = MockPlatform::new();

        configure_memory(&mut hw, &table).unwrap();
        let first = hw.mpc_rules.clone();
        configure_memory(&mut hw, &table).unwrap();

        assert_eq!(hw.mpc_rules, first);
        assert_eq!(hw.mpc_rules.len(), 3);
    }

    #[test]
    fn stale_rules_disappear_when_a_grant_is_removed() {
        static BEFORE: [MemoryRegion; 1] = [SRAM];
        static AFTER: [MemoryRegion; 1] = [MemoryRegion {
            contexts: &[PC5],
            ..SRAM
        }];
        let mut hw = MockPlatform::new();

        configure_memory(
            &mut hw,
            &RegionTable {
                memory: &BEFORE,
                peripherals: &[],
                masks: &[],
                masters: &[],
                attribution: &[],
            },
        )
        .unwrap();
        configure_memory(
            &mut hw,
            &RegionTable {
                memory: &AFTER,
                peripherals: &[],
                masks: &[],
                masters: &[],
                attribution: &[],
            },
        )
        .unwrap();

        let contexts: Vec<u8> = hw.mpc_rules.values().map(|rule| rule.pc.value()).collect();
        assert_eq!(contexts, vec![5]);
    }

    #[test]
    fn gated_controller_is_reset_while_its_block_runs() {
        static MEMORY: [MemoryRegion; 3] = [
            MemoryRegion {
                name: "xip",
                controller: MpcId(6),
                base: 0x6400_0000,
                offset: 0,
                size: 0x2_0000,
                granularity: Granularity::K128,
                gate: Some(BlockGate(1)),
                ..SRAM
            },
            SRAM,
            MemoryRegion {
                name: "xip-axi",
                controller: MpcId(7),
                base: 0x6400_0000,
                offset: 0,
                size: 0x2_0000,
                granularity: Granularity::K128,
                contexts: &[PC6],
                gate: Some(BlockGate(1)),
                ..SRAM
            },
        ];
        let table = RegionTable {
            memory: &MEMORY,
            peripherals: &[],
            masks: &[],
            masters: &[],
            attribution: &[],
        };
        let mut hw = MockPlatform::new();
        hw.gate_controllers(&table);

        assert_eq!(configure_memory(&mut hw, &table), Ok(7));

        assert!(hw.ordering_violations.is_empty());
        assert!(!hw.is_powered(BlockGate(1)));
        assert_eq!(
            &hw.calls[..2],
            &[
                Call::MpcReset(MpcId(0)),
                Call::MpcSetViolationResponse(MpcId(0), FaultResponse::BusError),
            ]
        );
        let enabled = hw
            .calls
            .iter()
            .filter(|call| matches!(call, Call::SetBlockEnabled(..)))
            .count();
        assert_eq!(enabled, 2);
    }

    #[test]
    fn mock_flags_a_gated_controller_touched_while_off() {
        static MEMORY: [MemoryRegion; 1] = [MemoryRegion {
            controller: MpcId(6),
            gate: Some(BlockGate(1)),
            ..SRAM
        }];
        let table = RegionTable {
            memory: &MEMORY,
            peripherals: &[],
            masks: &[],
            masters: &[],
            attribution: &[],
        };
        let mut hw = MockPlatform::new();
        hw.gate_controllers(&table);

        hw.mpc_reset(MpcId(6)).unwrap();

        assert_eq!(
            hw.ordering_violations,
            [OrderingViolation::UnpoweredController(MpcId(6))]
        );
    }
}
