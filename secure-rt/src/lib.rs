#![no_std]
#![cfg_attr(
    all(target_arch = "arm", target_os = "none"),
    feature(abi_cmse_nonsecure_call)
)]

//! Secure-side runtime that partitions memory and peripherals into protection contexts,
//! hands control to the non-secure image and afterwards services context elevation requests.

#[cfg(any(test, feature = "mock"))]
extern crate std;

pub mod elevation;
pub mod error;
pub mod fatal;
pub mod hal;
pub mod handoff;
pub mod mpc;
pub mod ms_ctl;
pub mod ppc;
pub mod region;
pub mod sau;
pub mod sema;
pub mod shared;
pub mod table;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m33;

#[cfg(feature = "rtt")]
mod logger;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(feature = "rtt")]
pub use logger::init_logger;

pub use elevation::ElevationHandler;
pub use error::{ConfigError, ElevationError, HwError, ServiceError};
pub use handoff::{HandedOff, HandoffPlan, HandoffState, Sequencer, Step};
pub use region::{MemoryRegion, ProtectionContext, RegionTable};

#[cfg(not(any(feature = "psoc-edge", not(target_arch = "arm"))))]
compile_error!("Select a board table with the feature flags. Pick the feature of your device.");
