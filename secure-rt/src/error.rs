use crate::handoff::{HandoffState, Step};

/// Failure reported by a controller backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HwError {
    #[error("invalid parameter")]
    BadParam,
    #[error("address range does not fit the controller")]
    InvalidRegion,
    #[error("invalid protection context")]
    InvalidContext,
    #[error("controller configuration is locked")]
    Locked,
    #[error("controller returned status {0:#010X}")]
    Status(u32),
}

/// Reasons the secure configuration cannot be applied. All of them are fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("region `{region}` is not a multiple of its {granularity:#X} byte granularity")]
    Misaligned { region: &'static str, granularity: u32 },
    #[error("region `{region}` is empty")]
    EmptyRegion { region: &'static str },
    #[error("region `{region}` grants access to no protection context")]
    NoContexts { region: &'static str },
    #[error("region `{region}` gives non-secure write access to secure region `{secure}`")]
    BoundaryViolation {
        region: &'static str,
        secure: &'static str,
    },
    #[error("peripheral run {start}..={end} on controller {ppc} is reversed")]
    ReversedRun { ppc: u8, start: u16, end: u16 },
    #[error("peripheral run {start}..={end} on controller {ppc} is not covered by a context mask")]
    UnmaskedRun { ppc: u8, start: u16, end: u16 },
    #[error("`{operation}` issued out of order on peripheral controller {ppc}")]
    OutOfOrder { ppc: u8, operation: &'static str },
    #[error("memory controller {controller} has regions behind different block gates")]
    MixedGate { controller: u8 },
    #[error("attribution window `{region}` is not aligned to 32 bytes")]
    SauMisaligned { region: &'static str },
    #[error("{count} attribution windows exceed the {available} the core implements")]
    TooManySauRegions { count: usize, available: u8 },
    #[error("platform configuration is invalid: {0}")]
    InvalidConfig(&'static str),
    #[error("too many context mask runs on peripheral controller {ppc}")]
    TooManyMaskRuns { ppc: u8 },
    #[error("`{operation}` rejected by the controller: {source}")]
    Rejected {
        operation: &'static str,
        source: HwError,
    },
    #[error("handoff plan is invalid: {0}")]
    InvalidPlan(&'static str),
    #[error("step {step:?} cannot run in state {state:?}")]
    InvalidState { step: Step, state: HandoffState },
    #[error("no valid boot image at {base:#010X}")]
    BootImageMissing { base: u32 },
    #[error("shared memory was already initialized")]
    AlreadyInitialized,
    #[error("{count} semaphores do not fit in {words} words")]
    SemaphoreCapacity { count: u32, words: usize },
    #[error("board initialization failed before the secure configuration")]
    BoardInit,
}

impl ConfigError {
    pub(crate) fn rejected(operation: &'static str) -> impl FnOnce(HwError) -> Self {
        move |source| ConfigError::Rejected { operation, source }
    }
}

/// Status a secure service callback hands back to the elevation handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("service callback failed with status {0:#010X}")]
pub struct ServiceError(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ElevationError {
    #[error("an elevation request is already being dispatched")]
    Busy,
    #[error(transparent)]
    Dispatch(#[from] ServiceError),
}
