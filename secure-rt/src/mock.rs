//! Recording platform for host tests.
//!
//! Every trait call is appended to [`MockPlatform::calls`] before anything else happens, so
//! tests can assert on the global order of operations across all controllers. The mock
//! also keeps enough device state to check what the rules add up to.

use std::boxed::Box;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::vec::Vec;

use crate::error::{HwError, ServiceError};
use crate::hal::{
    EndpointAddr, FaultResponse, IpcChannel, IpcDispatch, MasterControl, MemoryProtection,
    PcMaskConfig, PeripheralProtection, PpcAttribute, PpcInit, RotConfig, SealedRotConfig,
    SecureCpu, SecurityAttribution, SemaphoreInit,
};
use crate::region::{
    BlockGate, MasterId, MpcId, PpcId, ProtectionContext, RegionTable, SauWindow,
};
use crate::sema::SemaphoreDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    SauDisable,
    SauSetRegion(u8, SauWindow),
    SauEnable,
    MpcReset(MpcId),
    MpcSetViolationResponse(MpcId, FaultResponse),
    MpcConfigureRot(MpcId, RotConfig),
    MpcConfigureRotSealed(SealedRotConfig),
    SetBlockEnabled(BlockGate, bool),
    PpcReset(PpcId),
    PpcInit(PpcId, PpcInit),
    PpcConfigureAttribute(PpcId, PpcAttribute),
    PpcSetPcMask(PpcId, PcMaskConfig),
    SetActivePc(MasterId, ProtectionContext),
    SetSavedPc(MasterId, ProtectionContext),
    SetPcHandler(ProtectionContext),
    SemaInit(IpcChannel, u32),
    ExecuteCallback(EndpointAddr),
    ReadBootWords(u32),
    WriteMspNs(u32),
    DelayMs(u32),
    CallNonSecure(u32),
}

/// Sequences the real controllers accept silently but that leave them misconfigured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingViolation {
    /// Init after an attribute wipes the attribute.
    InitAfterAttribute(PpcId),
    AttributeBeforeInit(PpcId),
    MaskBeforeInit(PpcId),
    /// Attribute write after a context mask was locked on the controller.
    AttributeAfterMask(PpcId),
    /// Memory controller written while the block it sits in is switched off.
    UnpoweredController(MpcId),
}

#[derive(Debug, Default, Clone, Copy)]
struct PpcState {
    initialized: bool,
    attributes: bool,
    masked: bool,
}

pub struct MockPlatform {
    pub calls: Vec<Call>,
    /// Direct rules, keyed by controller, offset and context.
    pub mpc_rules: BTreeMap<(MpcId, u32, u8), RotConfig>,
    /// Rules accepted by the enclave, keyed by offset and context.
    pub sealed_rules: BTreeMap<(u32, u8), RotConfig>,
    pub ordering_violations: Vec<OrderingViolation>,
    /// Every change of a master's active context, in order.
    pub active_history: Vec<(MasterId, ProtectionContext)>,
    pub boot_words: [u32; 2],
    pub msp_ns: Option<u32>,
    /// Results handed out by `execute_callback`, `Ok` once empty.
    pub dispatch_results: VecDeque<Result<(), ServiceError>>,
    /// Context switch performed by the dispatched callback.
    pub dispatch_sets_pc: Option<(MasterId, ProtectionContext)>,
    pub cpu: MasterId,
    /// Regions the attribution unit implements.
    pub sau_regions: u8,
    pub sau_enabled: bool,
    pub sau_windows: BTreeMap<u8, SauWindow>,
    fail: Option<Box<dyn Fn(&Call) -> bool>>,
    active: BTreeMap<MasterId, ProtectionContext>,
    saved: BTreeMap<MasterId, ProtectionContext>,
    handlers: BTreeMap<ProtectionContext, fn()>,
    ppcs: BTreeMap<PpcId, PpcState>,
    gated: BTreeMap<MpcId, BlockGate>,
    powered: BTreeSet<BlockGate>,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            mpc_rules: BTreeMap::new(),
            sealed_rules: BTreeMap::new(),
            ordering_violations: Vec::new(),
            active_history: Vec::new(),
            boot_words: [0; 2],
            msp_ns: None,
            dispatch_results: VecDeque::new(),
            dispatch_sets_pc: None,
            cpu: MasterId(0),
            sau_regions: 8,
            sau_enabled: false,
            sau_windows: BTreeMap::new(),
            fail: None,
            active: BTreeMap::new(),
            saved: BTreeMap::new(),
            handlers: BTreeMap::new(),
            ppcs: BTreeMap::new(),
            gated: BTreeMap::new(),
            powered: BTreeSet::new(),
        }
    }

    /// Places every memory controller behind the block gate the table gives it. Writes to
    /// such a controller while its block is off are reported as
    /// [`OrderingViolation::UnpoweredController`].
    pub fn gate_controllers(&mut self, table: &RegionTable) {
        for controller in table.memory_controllers() {
            if let Some(gate) = table.controller_gate(controller) {
                self.gated.insert(controller, gate);
            }
        }
    }

    pub fn is_powered(&self, block: BlockGate) -> bool {
        self.powered.contains(&block)
    }

    /// Makes every later call matching `predicate` fail with [`HwError::BadParam`]. A failed
    /// call is still recorded but changes no state.
    pub fn fail_when(&mut self, predicate: impl Fn(&Call) -> bool + 'static) {
        self.fail = Some(Box::new(predicate));
    }

    pub fn active_pc(&self, master: MasterId) -> Option<ProtectionContext> {
        self.active.get(&master).copied()
    }

    pub fn saved_pc(&self, master: MasterId) -> Option<ProtectionContext> {
        self.saved.get(&master).copied()
    }

    pub fn handler(&self, pc: ProtectionContext) -> Option<fn()> {
        self.handlers.get(&pc).copied()
    }

    /// Does what the hardware does when a request enters `pc`: switches the CPU master
    /// without any software call, then runs the handler.
    pub fn raise_request<R>(
        &mut self,
        pc: ProtectionContext,
        handler: impl FnOnce(&mut Self) -> R,
    ) -> R {
        self.switch(self.cpu, pc);
        handler(self)
    }

    fn record(&mut self, call: Call) -> Result<(), HwError> {
        self.calls.push(call);
        match &self.fail {
            Some(predicate) if predicate(&call) => Err(HwError::BadParam),
            _ => Ok(()),
        }
    }

    fn switch(&mut self, master: MasterId, pc: ProtectionContext) {
        self.active.insert(master, pc);
        self.active_history.push((master, pc));
    }

    fn check_powered(&mut self, mpc: MpcId) {
        if let Some(gate) = self.gated.get(&mpc) {
            if !self.powered.contains(gate) {
                self.ordering_violations
                    .push(OrderingViolation::UnpoweredController(mpc));
            }
        }
    }

    fn ppc(&mut self, ppc: PpcId) -> &mut PpcState {
        self.ppcs.entry(ppc).or_default()
    }
}

impl MemoryProtection for MockPlatform {
    fn mpc_reset(&mut self, mpc: MpcId) -> Result<(), HwError> {
        self.record(Call::MpcReset(mpc))?;
        self.check_powered(mpc);
        self.mpc_rules.retain(|(id, _, _), _| *id != mpc);
        Ok(())
    }

    fn mpc_set_violation_response(
        &mut self,
        mpc: MpcId,
        response: FaultResponse,
    ) -> Result<(), HwError> {
        self.record(Call::MpcSetViolationResponse(mpc, response))?;
        self.check_powered(mpc);
        Ok(())
    }

    fn mpc_configure_rot(&mut self, mpc: MpcId, config: &RotConfig) -> Result<(), HwError> {
        self.record(Call::MpcConfigureRot(mpc, *config))?;
        self.check_powered(mpc);
        self.mpc_rules
            .insert((mpc, config.addr_offset, config.pc.value()), *config);
        Ok(())
    }

    fn mpc_configure_rot_sealed(&mut self, config: &SealedRotConfig) -> Result<(), HwError> {
        self.record(Call::MpcConfigureRotSealed(*config))?;
        if !config.verify() {
            return Err(HwError::Status(0xBAD_C0DE));
        }
        self.sealed_rules.insert(
            (config.config.addr_offset, config.config.pc.value()),
            config.config,
        );
        Ok(())
    }

    fn set_block_enabled(&mut self, block: BlockGate, enabled: bool) -> Result<(), HwError> {
        self.record(Call::SetBlockEnabled(block, enabled))?;
        if enabled {
            self.powered.insert(block);
        } else {
            self.powered.remove(&block);
        }
        Ok(())
    }
}

impl SecurityAttribution for MockPlatform {
    fn sau_region_count(&mut self) -> u8 {
        self.sau_regions
    }

    fn sau_disable(&mut self) {
        self.calls.push(Call::SauDisable);
        self.sau_enabled = false;
    }

    fn sau_set_region(&mut self, number: u8, window: &SauWindow) -> Result<(), HwError> {
        self.record(Call::SauSetRegion(number, *window))?;
        if number >= self.sau_regions {
            return Err(HwError::InvalidRegion);
        }
        self.sau_windows.insert(number, *window);
        Ok(())
    }

    fn sau_enable(&mut self) {
        self.calls.push(Call::SauEnable);
        self.sau_enabled = true;
    }
}

impl PeripheralProtection for MockPlatform {
    fn ppc_reset(&mut self, ppc: PpcId) -> Result<(), HwError> {
        self.record(Call::PpcReset(ppc))?;
        *self.ppc(ppc) = PpcState::default();
        Ok(())
    }

    fn ppc_init(&mut self, ppc: PpcId, init: &PpcInit) -> Result<(), HwError> {
        self.record(Call::PpcInit(ppc, *init))?;
        let state = self.ppc(ppc);
        let violation = state.attributes;
        state.initialized = true;
        state.attributes = false;
        state.masked = false;
        if violation {
            self.ordering_violations
                .push(OrderingViolation::InitAfterAttribute(ppc));
        }
        Ok(())
    }

    fn ppc_configure_attribute(
        &mut self,
        ppc: PpcId,
        attribute: &PpcAttribute,
    ) -> Result<(), HwError> {
        self.record(Call::PpcConfigureAttribute(ppc, *attribute))?;
        let state = *self.ppc(ppc);
        if !state.initialized {
            self.ordering_violations
                .push(OrderingViolation::AttributeBeforeInit(ppc));
        }
        if state.masked {
            self.ordering_violations
                .push(OrderingViolation::AttributeAfterMask(ppc));
        }
        self.ppc(ppc).attributes = true;
        Ok(())
    }

    fn ppc_set_pc_mask(&mut self, ppc: PpcId, mask: &PcMaskConfig) -> Result<(), HwError> {
        self.record(Call::PpcSetPcMask(ppc, *mask))?;
        if !self.ppc(ppc).initialized {
            self.ordering_violations
                .push(OrderingViolation::MaskBeforeInit(ppc));
        }
        self.ppc(ppc).masked = true;
        Ok(())
    }
}

impl MasterControl for MockPlatform {
    fn set_active_pc(&mut self, master: MasterId, pc: ProtectionContext) -> Result<(), HwError> {
        self.record(Call::SetActivePc(master, pc))?;
        self.switch(master, pc);
        Ok(())
    }

    fn set_saved_pc(&mut self, master: MasterId, pc: ProtectionContext) -> Result<(), HwError> {
        self.record(Call::SetSavedPc(master, pc))?;
        self.saved.insert(master, pc);
        Ok(())
    }

    fn set_pc_handler(&mut self, pc: ProtectionContext, handler: fn()) -> Result<(), HwError> {
        self.record(Call::SetPcHandler(pc))?;
        self.handlers.insert(pc, handler);
        Ok(())
    }
}

impl SemaphoreInit for MockPlatform {
    fn sema_init(
        &mut self,
        channel: IpcChannel,
        descriptor: &'static SemaphoreDescriptor,
    ) -> Result<(), HwError> {
        self.record(Call::SemaInit(channel, descriptor.max_sema))
    }
}

impl IpcDispatch for MockPlatform {
    fn execute_callback(&mut self, endpoint: EndpointAddr) -> Result<(), ServiceError> {
        self.calls.push(Call::ExecuteCallback(endpoint));
        if let Some((master, pc)) = self.dispatch_sets_pc {
            self.switch(master, pc);
        }
        self.dispatch_results.pop_front().unwrap_or(Ok(()))
    }
}

impl SecureCpu for MockPlatform {
    fn read_boot_words(&mut self, base: u32) -> [u32; 2] {
        self.calls.push(Call::ReadBootWords(base));
        self.boot_words
    }

    fn write_msp_ns(&mut self, stack_pointer: u32) {
        self.calls.push(Call::WriteMspNs(stack_pointer));
        self.msp_ns = Some(stack_pointer);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.calls.push(Call::DelayMs(ms));
    }

    fn call_nonsecure(&mut self, entry: u32) {
        self.calls.push(Call::CallNonSecure(entry));
    }
}
