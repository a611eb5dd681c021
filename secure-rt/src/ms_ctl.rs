use log::info;

use crate::error::ConfigError;
use crate::hal::MasterControl;
use crate::region::{MasterId, ProtectionContext, RegionTable};

/// Makes `context` the active protection context of `master`. The hardware keeps the
/// binding; nothing is tracked here.
pub fn bind_master_to_context<C: MasterControl>(
    hw: &mut C,
    master: MasterId,
    context: ProtectionContext,
) -> Result<(), ConfigError> {
    hw.set_active_pc(master, context)
        .map_err(ConfigError::rejected("set_active_pc"))
}

/// Moves the DMA capable masters listed in the table out of the default context, so their
/// traffic is checked against the same rules as the non-secure CPU.
pub fn bind_masters<C: MasterControl>(hw: &mut C, table: &RegionTable) -> Result<(), ConfigError> {
    for binding in table.masters {
        bind_master_to_context(hw, binding.master, binding.context)?;
        info!(
            "Master {} ({}) = pc {}",
            binding.name,
            binding.master.0,
            binding.context.value()
        );
    }
    Ok(())
}

/// Final binding before the jump: requests entering `service` run `handler`, and the CPU
/// master is moved to the non-secure context, both saved and active.
pub fn bind_nonsecure_context<C: MasterControl>(
    hw: &mut C,
    cpu: MasterId,
    service: ProtectionContext,
    nonsecure: ProtectionContext,
    handler: fn(),
) -> Result<(), ConfigError> {
    hw.set_pc_handler(service, handler)
        .map_err(ConfigError::rejected("set_pc_handler"))?;
    hw.set_saved_pc(cpu, nonsecure)
        .map_err(ConfigError::rejected("set_saved_pc"))?;
    bind_master_to_context(hw, cpu, nonsecure)
}
