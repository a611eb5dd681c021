use heapless::Vec;
use log::{debug, info};

use crate::error::ConfigError;
use crate::hal::{FaultResponse, PcMaskConfig, PeripheralProtection, PpcAttribute, PpcInit};
use crate::region::{PcMask, PeriRegionId, PeripheralAttributes, PpcId, RegionTable};

/// Context mask runs tracked per controller.
pub const MAX_MASK_RUNS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Initialized,
}

/// Programming session for one peripheral protection controller.
///
/// Enforces the order the hardware silently relies on: `init_controller` first, and no
/// attribute change on a run whose context mask is already locked in.
pub struct PeripheralController<'h, P: PeripheralProtection> {
    hw: &'h mut P,
    ppc: PpcId,
    phase: Phase,
    attributes_applied: bool,
    masked: Vec<(PeriRegionId, PeriRegionId), MAX_MASK_RUNS>,
}

impl<'h, P: PeripheralProtection> PeripheralController<'h, P> {
    pub fn new(hw: &'h mut P, ppc: PpcId) -> Self {
        Self {
            hw,
            ppc,
            phase: Phase::Uninitialized,
            attributes_applied: false,
            masked: Vec::new(),
        }
    }

    /// Resets the controller and sets how it answers violating accesses.
    pub fn init_controller(&mut self, response: FaultResponse) -> Result<(), ConfigError> {
        if self.attributes_applied || !self.masked.is_empty() {
            return Err(self.out_of_order("init_controller"));
        }

        self.hw
            .ppc_reset(self.ppc)
            .map_err(ConfigError::rejected("ppc_reset"))?;
        self.hw
            .ppc_init(self.ppc, &PpcInit { response })
            .map_err(ConfigError::rejected("ppc_init"))?;

        self.phase = Phase::Initialized;
        Ok(())
    }

    /// Applies one attribute triple to the inclusive run `start..=end`.
    pub fn configure_attribute(
        &mut self,
        start: PeriRegionId,
        end: PeriRegionId,
        attributes: PeripheralAttributes,
    ) -> Result<(), ConfigError> {
        self.check_run(start, end)?;
        if self.phase != Phase::Initialized || self.is_masked(start, end) {
            return Err(self.out_of_order("configure_attribute"));
        }

        debug!(
            "PPC {} regions {}..={} = {:?}",
            self.ppc.0, start.0, end.0, attributes
        );
        self.hw
            .ppc_configure_attribute(
                self.ppc,
                &PpcAttribute {
                    start,
                    end,
                    attributes,
                },
            )
            .map_err(ConfigError::rejected("ppc_configure_attribute"))?;

        self.attributes_applied = true;
        Ok(())
    }

    /// Locks which protection contexts may reach the inclusive run `start..=end`.
    pub fn set_context_mask(
        &mut self,
        start: PeriRegionId,
        end: PeriRegionId,
        mask: PcMask,
    ) -> Result<(), ConfigError> {
        self.check_run(start, end)?;
        if self.phase != Phase::Initialized {
            return Err(self.out_of_order("set_context_mask"));
        }

        self.hw
            .ppc_set_pc_mask(self.ppc, &PcMaskConfig { start, end, mask })
            .map_err(ConfigError::rejected("ppc_set_pc_mask"))?;

        self.masked
            .push((start, end))
            .map_err(|_| ConfigError::TooManyMaskRuns { ppc: self.ppc.0 })?;

        info!(
            "PPC {} regions {}..={} mask {:#04X}",
            self.ppc.0,
            start.0,
            end.0,
            mask.bits()
        );
        Ok(())
    }

    fn is_masked(&self, start: PeriRegionId, end: PeriRegionId) -> bool {
        self.masked
            .iter()
            .any(|(masked_start, masked_end)| start <= *masked_end && *masked_start <= end)
    }

    fn check_run(&self, start: PeriRegionId, end: PeriRegionId) -> Result<(), ConfigError> {
        if start > end {
            return Err(ConfigError::ReversedRun {
                ppc: self.ppc.0,
                start: start.0,
                end: end.0,
            });
        }
        Ok(())
    }

    fn out_of_order(&self, operation: &'static str) -> ConfigError {
        ConfigError::OutOfOrder {
            ppc: self.ppc.0,
            operation,
        }
    }
}

/// Applies the peripheral half of a table, one controller at a time: init, every
/// attribute run, then the context masks.
pub fn configure_peripherals<P: PeripheralProtection>(
    hw: &mut P,
    table: &RegionTable,
) -> Result<(), ConfigError> {
    for ppc in table.peripheral_controllers() {
        let mut controller = PeripheralController::new(hw, ppc);

        controller.init_controller(FaultResponse::BusError)?;

        for run in table.peripherals.iter().filter(|run| run.ppc == ppc) {
            controller.configure_attribute(run.start, run.end, run.attributes)?;
        }

        for mask in table.masks.iter().filter(|mask| mask.ppc == ppc) {
            controller.set_context_mask(mask.start, mask.end, mask.mask)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockPlatform, OrderingViolation};
    use crate::region::{MaskRun, PeripheralRun, Privilege, Security};
    use pretty_assertions::assert_eq;

    const NS: PeripheralAttributes = PeripheralAttributes {
        security: Security::NonSecure,
        secure_privilege: Privilege::Any,
        nonsecure_privilege: Privilege::Any,
    };

    const MASK: PcMask = PcMask::from_bits(0x64);

    #[test]
    fn init_comes_before_attributes_and_masks() {
        let mut hw = MockPlatform::new();
        let mut ppc = PeripheralController::new(&mut hw, PpcId(0));

        assert_eq!(
            ppc.configure_attribute(PeriRegionId(0), PeriRegionId(3), NS),
            Err(ConfigError::OutOfOrder {
                ppc: 0,
                operation: "configure_attribute"
            })
        );
        assert_eq!(
            ppc.set_context_mask(PeriRegionId(0), PeriRegionId(3), MASK),
            Err(ConfigError::OutOfOrder {
                ppc: 0,
                operation: "set_context_mask"
            })
        );
        assert!(hw.calls.is_empty());
    }

    #[test]
    fn init_after_attribute_is_an_ordering_violation() {
        let mut hw = MockPlatform::new();
        let mut ppc = PeripheralController::new(&mut hw, PpcId(1));

        ppc.init_controller(FaultResponse::BusError).unwrap();
        ppc.configure_attribute(PeriRegionId(0), PeriRegionId(3), NS)
            .unwrap();

        assert_eq!(
            ppc.init_controller(FaultResponse::BusError),
            Err(ConfigError::OutOfOrder {
                ppc: 1,
                operation: "init_controller"
            })
        );
    }

    #[test]
    fn mock_flags_init_after_attribute_issued_directly() {
        let mut hw = MockPlatform::new();

        hw.ppc_init(PpcId(0), &PpcInit { response: FaultResponse::BusError })
            .unwrap();
        hw.ppc_configure_attribute(
            PpcId(0),
            &PpcAttribute {
                start: PeriRegionId(0),
                end: PeriRegionId(0),
                attributes: NS,
            },
        )
        .unwrap();
        hw.ppc_init(PpcId(0), &PpcInit { response: FaultResponse::BusError })
            .unwrap();

        assert_eq!(
            hw.ordering_violations,
            [OrderingViolation::InitAfterAttribute(PpcId(0))]
        );
    }

    #[test]
    fn attribute_on_a_masked_run_is_rejected() {
        let mut hw = MockPlatform::new();
        let mut ppc = PeripheralController::new(&mut hw, PpcId(0));

        ppc.init_controller(FaultResponse::BusError).unwrap();
        ppc.configure_attribute(PeriRegionId(0), PeriRegionId(9), NS)
            .unwrap();
        ppc.set_context_mask(PeriRegionId(0), PeriRegionId(9), MASK)
            .unwrap();

        assert_eq!(
            ppc.configure_attribute(PeriRegionId(4), PeriRegionId(12), NS),
            Err(ConfigError::OutOfOrder {
                ppc: 0,
                operation: "configure_attribute"
            })
        );
        ppc.configure_attribute(PeriRegionId(10), PeriRegionId(12), NS)
            .unwrap();
    }

    #[test]
    fn reversed_run_is_rejected() {
        let mut hw = MockPlatform::new();
        let mut ppc = PeripheralController::new(&mut hw, PpcId(0));
        ppc.init_controller(FaultResponse::BusError).unwrap();

        assert_eq!(
            ppc.configure_attribute(PeriRegionId(5), PeriRegionId(2), NS),
            Err(ConfigError::ReversedRun {
                ppc: 0,
                start: 5,
                end: 2
            })
        );
    }

    #[test]
    fn rejected_attribute_stops_the_controller() {
        let mut hw = MockPlatform::new();
        hw.fail_when(|call| matches!(call, Call::PpcConfigureAttribute(_, a) if a.start == PeriRegionId(6)));

        static RUNS: [PeripheralRun; 2] = [
            PeripheralRun {
                ppc: PpcId(0),
                start: PeriRegionId(0),
                end: PeriRegionId(2),
                attributes: NS,
            },
            PeripheralRun {
                ppc: PpcId(0),
                start: PeriRegionId(6),
                end: PeriRegionId(8),
                attributes: NS,
            },
        ];
        static MASKS: [MaskRun; 1] = [MaskRun {
            ppc: PpcId(0),
            start: PeriRegionId(0),
            end: PeriRegionId(8),
            mask: MASK,
        }];
        let table = RegionTable {
            memory: &[],
            peripherals: &RUNS,
            masks: &MASKS,
            masters: &[],
            attribution: &[],
        };

        assert!(matches!(
            configure_peripherals(&mut hw, &table),
            Err(ConfigError::Rejected {
                operation: "ppc_configure_attribute",
                ..
            })
        ));
        assert!(!hw
            .calls
            .iter()
            .any(|call| matches!(call, Call::PpcSetPcMask(..))));
    }

    #[test]
    fn both_controllers_are_programmed_in_order() {
        static RUNS: [PeripheralRun; 3] = [
            PeripheralRun {
                ppc: PpcId(0),
                start: PeriRegionId(0),
                end: PeriRegionId(0),
                attributes: NS,
            },
            PeripheralRun {
                ppc: PpcId(1),
                start: PeriRegionId(0),
                end: PeriRegionId(4),
                attributes: NS,
            },
            PeripheralRun {
                ppc: PpcId(0),
                start: PeriRegionId(2),
                end: PeriRegionId(6),
                attributes: NS,
            },
        ];
        static MASKS: [MaskRun; 2] = [
            MaskRun {
                ppc: PpcId(0),
                start: PeriRegionId(0),
                end: PeriRegionId(6),
                mask: MASK,
            },
            MaskRun {
                ppc: PpcId(1),
                start: PeriRegionId(0),
                end: PeriRegionId(4),
                mask: MASK,
            },
        ];
        let table = RegionTable {
            memory: &[],
            peripherals: &RUNS,
            masks: &MASKS,
            masters: &[],
            attribution: &[],
        };
        let mut hw = MockPlatform::new();

        configure_peripherals(&mut hw, &table).unwrap();

        let init = PpcInit {
            response: FaultResponse::BusError,
        };
        let attribute = |ppc, start, end| {
            Call::PpcConfigureAttribute(
                PpcId(ppc),
                PpcAttribute {
                    start: PeriRegionId(start),
                    end: PeriRegionId(end),
                    attributes: NS,
                },
            )
        };
        let mask = |ppc, start, end| {
            Call::PpcSetPcMask(
                PpcId(ppc),
                PcMaskConfig {
                    start: PeriRegionId(start),
                    end: PeriRegionId(end),
                    mask: MASK,
                },
            )
        };
        assert_eq!(
            hw.calls,
            [
                Call::PpcReset(PpcId(0)),
                Call::PpcInit(PpcId(0), init),
                attribute(0, 0, 0),
                attribute(0, 2, 6),
                mask(0, 0, 6),
                Call::PpcReset(PpcId(1)),
                Call::PpcInit(PpcId(1), init),
                attribute(1, 0, 4),
                mask(1, 0, 4),
            ]
        );
        assert!(hw.ordering_violations.is_empty());
    }
}
