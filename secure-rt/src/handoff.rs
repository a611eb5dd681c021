//! Boot handoff: one forward-only pass from an unconfigured device to a running
//! non-secure image.

use core::fmt::Debug;

use log::info;

use crate::error::ConfigError;
use crate::hal::Platform;
use crate::region::RegionTable;
use crate::sema::SemaphoreStorage;
use crate::table::PlatformConfig;
use crate::{fatal, mpc, ms_ctl, ppc, sau, sema};

const ERASED: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HandoffState {
    Unconfigured,
    RegionsConfigured,
    PeripheralsConfigured,
    NonSecureContextBound,
    HandedOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ReadBootImage,
    ConfigureSau,
    ConfigureMemory,
    InitSemaphore,
    BindMasters,
    InstallNonSecureStack,
    ConfigurePeripherals,
    BindNonSecureContext,
    Jump,
}

pub const STEP_COUNT: usize = 9;

/// Entry state the non-secure image publishes at the start of its boot region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootImage {
    pub stack_pointer: u32,
    pub reset_vector: u32,
}

impl BootImage {
    pub fn from_words(
        base: u32,
        [stack_pointer, reset_vector]: [u32; 2],
    ) -> Result<Self, ConfigError> {
        let blank = |word: u32| word == 0 || word == ERASED;
        if blank(stack_pointer) || blank(reset_vector) {
            return Err(ConfigError::BootImageMissing { base });
        }

        Ok(Self {
            stack_pointer,
            reset_vector,
        })
    }
}

/// Ordered list of handoff steps, validated on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandoffPlan {
    steps: [Step; STEP_COUNT],
}

impl HandoffPlan {
    /// CPU side attribution, memory regions, then semaphore and master bindings, the non-secure stack,
    /// peripherals, and the CPU's non-secure context right before the jump so the CPU
    /// never runs in that context with incomplete grants.
    pub const DEFAULT: HandoffPlan = HandoffPlan {
        steps: [
            Step::ReadBootImage,
            Step::ConfigureSau,
            Step::ConfigureMemory,
            Step::InitSemaphore,
            Step::BindMasters,
            Step::InstallNonSecureStack,
            Step::ConfigurePeripherals,
            Step::BindNonSecureContext,
            Step::Jump,
        ],
    };

    pub fn new(steps: [Step; STEP_COUNT]) -> Result<Self, ConfigError> {
        let position = |step: Step| steps.iter().position(|s| *s == step);

        for step in HandoffPlan::DEFAULT.steps {
            if steps.iter().filter(|s| **s == step).count() != 1 {
                return Err(ConfigError::InvalidPlan("every step must appear exactly once"));
            }
        }

        let at = |step: Step| position(step).unwrap_or(STEP_COUNT);

        if at(Step::ReadBootImage) != 0 {
            return Err(ConfigError::InvalidPlan("the boot image must be read first"));
        }
        if at(Step::ConfigureSau) > at(Step::ConfigureMemory) {
            return Err(ConfigError::InvalidPlan(
                "attribution windows must precede memory regions",
            ));
        }
        if at(Step::ConfigureMemory) > at(Step::InstallNonSecureStack) {
            return Err(ConfigError::InvalidPlan(
                "memory regions must precede the non-secure stack",
            ));
        }
        if at(Step::ConfigureMemory) > at(Step::ConfigurePeripherals) {
            return Err(ConfigError::InvalidPlan("memory regions must precede peripherals"));
        }
        if at(Step::ConfigurePeripherals) > at(Step::BindNonSecureContext) {
            return Err(ConfigError::InvalidPlan(
                "peripherals must precede the non-secure context",
            ));
        }
        if at(Step::BindNonSecureContext) != STEP_COUNT - 2 || at(Step::Jump) != STEP_COUNT - 1 {
            return Err(ConfigError::InvalidPlan(
                "the non-secure context must be bound right before the jump",
            ));
        }

        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

impl Default for HandoffPlan {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Proof that control went to the non-secure image (and, on a host, came back).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandedOff {
    pub image: BootImage,
}

pub struct Sequencer {
    table: &'static RegionTable,
    config: &'static PlatformConfig,
    plan: HandoffPlan,
    state: HandoffState,
}

impl Sequencer {
    pub const fn new(table: &'static RegionTable, config: &'static PlatformConfig) -> Self {
        Self::with_plan(table, config, HandoffPlan::DEFAULT)
    }

    pub const fn with_plan(
        table: &'static RegionTable,
        config: &'static PlatformConfig,
        plan: HandoffPlan,
    ) -> Self {
        Self {
            table,
            config,
            plan,
            state: HandoffState::Unconfigured,
        }
    }

    pub fn state(&self) -> HandoffState {
        self.state
    }

    /// Runs every step of the plan. Any error leaves the device partially configured and
    /// must be treated as fatal by the caller; see [`Sequencer::run_or_halt`].
    pub fn run<H: Platform, const WORDS: usize>(
        &mut self,
        hw: &mut H,
        semaphores: &'static SemaphoreStorage<WORDS>,
        elevation_isr: fn(),
    ) -> Result<HandedOff, ConfigError> {
        if self.state != HandoffState::Unconfigured {
            return Err(ConfigError::InvalidState {
                step: self.plan.steps[0],
                state: self.state,
            });
        }

        self.table.audit()?;
        self.config.validate()?;

        let config = self.config;
        let mut image = None;

        for step in self.plan.steps {
            info!("Handoff step {:?}", step);

            match step {
                Step::ReadBootImage => {
                    let words = hw.read_boot_words(config.boot_image_base);
                    let boot = BootImage::from_words(config.boot_image_base, words)?;
                    info!(
                        "Non-secure image. SP: {:#010X}, RV: {:#010X}",
                        boot.stack_pointer, boot.reset_vector
                    );
                    image = Some(boot);
                }
                Step::ConfigureSau => {
                    self.expect(step, HandoffState::Unconfigured)?;
                    sau::configure_sau(hw, self.table)?;
                }
                Step::ConfigureMemory => {
                    self.expect(step, HandoffState::Unconfigured)?;
                    let rules = mpc::configure_memory(hw, self.table)?;
                    info!("{} memory rules programmed", rules);
                    self.state = HandoffState::RegionsConfigured;
                }
                Step::InitSemaphore => {
                    sema::init_semaphore(
                        hw,
                        config.semaphore_channel,
                        config.semaphore_count,
                        semaphores,
                    )?;
                }
                Step::BindMasters => {
                    ms_ctl::bind_masters(hw, self.table)?;
                }
                Step::InstallNonSecureStack => {
                    let boot = self.image(step, image)?;
                    hw.write_msp_ns(boot.stack_pointer);
                }
                Step::ConfigurePeripherals => {
                    self.expect(step, HandoffState::RegionsConfigured)?;
                    ppc::configure_peripherals(hw, self.table)?;
                    self.state = HandoffState::PeripheralsConfigured;
                }
                Step::BindNonSecureContext => {
                    self.expect(step, HandoffState::PeripheralsConfigured)?;
                    ms_ctl::bind_nonsecure_context(
                        hw,
                        config.cpu_master,
                        config.service_pc,
                        config.nonsecure_pc,
                        elevation_isr,
                    )?;
                    self.state = HandoffState::NonSecureContextBound;
                }
                Step::Jump => {
                    self.expect(step, HandoffState::NonSecureContextBound)?;
                    let boot = self.image(step, image)?;
                    self.state = HandoffState::HandedOff;

                    info!("Jumping to {:#010X}", boot.reset_vector);
                    hw.call_nonsecure(boot.reset_vector);

                    return Ok(HandedOff { image: boot });
                }
            }
        }

        Err(ConfigError::InvalidPlan("the plan has no jump"))
    }

    /// Entry point for firmware: refuses to touch any security state when board bring-up
    /// failed, and halts on any configuration error.
    pub fn run_or_halt<H: Platform, E: Debug, const WORDS: usize>(
        &mut self,
        board_init: Result<(), E>,
        hw: &mut H,
        semaphores: &'static SemaphoreStorage<WORDS>,
        elevation_isr: fn(),
    ) -> HandedOff {
        if let Err(e) = board_init {
            log::error!("Board init: {:?}", e);
            fatal::halt(&ConfigError::BoardInit);
        }

        fatal::check(self.run(hw, semaphores, elevation_isr))
    }

    fn expect(&self, step: Step, state: HandoffState) -> Result<(), ConfigError> {
        if self.state != state {
            return Err(ConfigError::InvalidState {
                step,
                state: self.state,
            });
        }
        Ok(())
    }

    fn image(&self, step: Step, image: Option<BootImage>) -> Result<BootImage, ConfigError> {
        image.ok_or(ConfigError::InvalidState {
            step,
            state: self.state,
        })
    }
}
