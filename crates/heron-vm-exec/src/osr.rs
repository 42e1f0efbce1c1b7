//! OSR bridge
//!
//! Each loop entry bumps the warm-up counter of its IC entry. Once the
//! count reaches the threshold the unit is compiled, once. A frame sitting
//! at the compiled entry's loop is then snapshotted into the temp region
//! and handed to the optimizing tier:
//!
//! ```text
//! Interpreting ──threshold──> CompileRequested ─┬─> CompileFailed (sticky)
//!                                               └─> CompileSucceeded
//!     CompileSucceeded ──frame at osr pc──> TransferPrepared ──> Transferred
//!     Transferred ──return / bailout──> CompileSucceeded
//! ```
//!
//! The bridge lock is never held while the tier compiles or runs code,
//! so compiled code may call back into interpreted frames that reach the
//! bridge again.

use crate::config::OsrConfig;
use crate::error::{OsrError, Result};
use crate::frame::{FrameHeader, FrameState, InterpreterFrame, restore_frame};
use crate::region::{OsrTempRegion, RegionLease};
use crate::stats::OsrStats;
use crate::tier::{BailoutReason, CodeEntry, OptimizingTier, OsrCode, TierExit, TierState};
use heron_vm_bytecode::{PcOffset, Script, ScriptId};
use heron_vm_core::{Value, VmResult};
use heron_vm_gc::Zone;
use heron_vm_ic::IcScript;
use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Number of bailouts before a unit's compiled code is dropped for good.
pub const DEOPT_THRESHOLD: u32 = 10;

/// Debugger-like collaborator watching interpreter frames
pub trait FrameObserver: Send + Sync {
    /// Move bookkeeping for `frame` to the compiled frame built from
    /// `snapshot`. Called before control enters compiled code.
    fn relocate(&self, frame: &InterpreterFrame, snapshot: &OsrSnapshot);
}

/// Live interpreter state copied for one transfer.
///
/// Holds a lease on the temp region that is released when the snapshot
/// is dropped.
#[derive(Debug)]
pub struct OsrSnapshot {
    entry: CodeEntry,
    header: FrameHeader,
    state: FrameState,
    byte_size: usize,
    lease: RegionLease,
}

impl OsrSnapshot {
    /// Entry point the snapshot is bound for
    pub fn entry(&self) -> CodeEntry {
        self.entry
    }

    /// Fixed frame part
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Offset to resume at
    pub fn pc(&self) -> PcOffset {
        self.state.pc
    }

    /// Copied slot values
    pub fn slots(&self) -> &[Value] {
        &self.state.slots
    }

    /// Pc and slots in frame-state layout
    pub fn state(&self) -> &FrameState {
        &self.state
    }

    /// Bytes leased for the snapshot
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Offset of the snapshot in the temp region
    pub fn region_offset(&self) -> usize {
        self.lease.start()
    }
}

/// What the interpreter does after a loop entry
#[derive(Debug, Clone)]
pub enum OsrOutcome {
    /// Stay in the interpreter
    ContinueInterpreting,
    /// Compiled code ran the unit to completion
    Returned(Value),
    /// Compiled code bailed out and the frame was restored
    BailedOut(BailoutReason),
}

#[derive(Debug)]
struct UnitTier {
    state: TierState,
    code: Option<Arc<OsrCode>>,
    bailouts: u32,
    /// Frames of the unit currently running compiled code
    active: u32,
}

impl UnitTier {
    /// State once no frame of the unit runs compiled code
    fn resting_state(&self) -> TierState {
        if self.code.is_some() {
            TierState::CompileSucceeded
        } else {
            TierState::CompileFailed
        }
    }
}

impl Default for UnitTier {
    fn default() -> Self {
        Self {
            state: TierState::Interpreting,
            code: None,
            bailouts: 0,
            active: 0,
        }
    }
}

#[derive(Debug, Default)]
struct BridgeState {
    units: FxHashMap<ScriptId, UnitTier>,
    stats: OsrStats,
}

/// Hands hot loops over to an optimizing tier
pub struct OsrBridge {
    config: OsrConfig,
    tier: Arc<dyn OptimizingTier>,
    region: Arc<OsrTempRegion>,
    zone: Arc<Zone>,
    observer: Option<Arc<dyn FrameObserver>>,
    state: Mutex<BridgeState>,
}

impl OsrBridge {
    /// Start building a bridge to `tier`
    pub fn builder(tier: Arc<dyn OptimizingTier>) -> OsrBridgeBuilder {
        OsrBridgeBuilder {
            tier,
            config: None,
            zone: None,
            observer: None,
        }
    }

    /// Configuration
    pub fn config(&self) -> &OsrConfig {
        &self.config
    }

    /// Region snapshots are leased from
    pub fn region(&self) -> &Arc<OsrTempRegion> {
        &self.region
    }

    /// Counter snapshot
    pub fn stats(&self) -> OsrStats {
        self.lock().stats
    }

    /// Tier-up progress of unit `id`.
    ///
    /// The state is per unit, not per frame: while any frame of the unit
    /// runs compiled code it reads `Transferred`, even when a nested
    /// activation of the same unit has already returned or bailed out.
    pub fn tier_state(&self, id: ScriptId) -> TierState {
        self.lock()
            .units
            .get(&id)
            .map_or(TierState::Interpreting, |unit| unit.state)
    }

    /// Compiled code of unit `id`, if any
    pub fn compiled_code(&self, id: ScriptId) -> Option<Arc<OsrCode>> {
        self.lock().units.get(&id).and_then(|unit| unit.code.clone())
    }

    /// Forget everything about unit `id`. The next hot loop entry compiles
    /// it again.
    pub fn invalidate(&self, id: ScriptId) {
        if self.lock().units.remove(&id).is_some() {
            tracing::debug!(target: "heron::osr", script = id.0, "compiled code invalidated");
        }
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock()
    }

    /// Count a loop entry of `frame` and transfer it when its unit is hot.
    ///
    /// Only operation errors raised by compiled code are returned; every
    /// reason not to transfer leaves the frame in the interpreter.
    pub fn on_loop_entry(&self, ic: &IcScript, frame: &mut InterpreterFrame) -> VmResult<OsrOutcome> {
        debug_assert_eq!(ic.script().id(), frame.script().id());
        let count = ic.loop_entry(frame.pc())?;
        if !self.config.enabled || count < u64::from(self.config.warmup_threshold) {
            return Ok(OsrOutcome::ContinueInterpreting);
        }

        let Some(code) = self.request_code(frame.script(), frame.pc()) else {
            return Ok(OsrOutcome::ContinueInterpreting);
        };
        match self.transfer_with(&code, frame) {
            Ok(outcome) => Ok(outcome),
            Err(
                OsrError::PcMismatch { .. }
                | OsrError::BailoutExpected
                | OsrError::OutOfMemory { .. },
            ) => Ok(OsrOutcome::ContinueInterpreting),
            Err(err) => Err(err.into()),
        }
    }

    /// Transfer `frame` into the compiled code of its unit
    pub fn transfer(&self, frame: &mut InterpreterFrame) -> Result<OsrOutcome> {
        let id = frame.script().id();
        let code = self.compiled_code(id).ok_or(OsrError::NoCompiledCode(id))?;
        self.transfer_with(&code, frame)
    }

    /// Copy the slots of `frame` into a snapshot bound for `entry`.
    /// Arguments and the receiver stay in the frame.
    pub fn prepare_transfer(&self, frame: &InterpreterFrame, entry: CodeEntry) -> Result<OsrSnapshot> {
        let byte_size = frame.byte_size();
        let lease = self.region.allocate(byte_size)?;
        Ok(OsrSnapshot {
            entry,
            header: frame.header(),
            state: FrameState::capture(frame),
            byte_size,
            lease,
        })
    }

    /// Code for `script`, compiling it on the first hot entry. `None`
    /// while compiling or after a failed compile.
    fn request_code(&self, script: &Arc<Script>, pc: PcOffset) -> Option<Arc<OsrCode>> {
        let id = script.id();
        {
            let mut guard = self.lock();
            let BridgeState { units, stats } = &mut *guard;
            let unit = units.entry(id).or_default();
            match unit.state {
                TierState::CompileFailed | TierState::CompileRequested => return None,
                TierState::Interpreting => {
                    unit.state = TierState::CompileRequested;
                    stats.compile_requests += 1;
                }
                _ => return unit.code.clone(),
            }
        }

        tracing::debug!(target: "heron::osr", script = script.name(), pc = %pc, "requesting OSR compile");
        let compiled = self.tier.compile(script, pc);

        let mut guard = self.lock();
        let BridgeState { units, stats } = &mut *guard;
        let unit = units.entry(id).or_default();
        match compiled {
            Ok(code) => {
                let code = Arc::new(code);
                unit.state = TierState::CompileSucceeded;
                unit.code = Some(Arc::clone(&code));
                tracing::debug!(
                    target: "heron::osr",
                    script = script.name(),
                    entry = %code.entry,
                    osr_pc = %code.osr_pc,
                    "OSR compile succeeded"
                );
                Some(code)
            }
            Err(err) => {
                unit.state = TierState::CompileFailed;
                stats.compile_failures += 1;
                tracing::debug!(target: "heron::osr", script = script.name(), error = %err, "OSR compile failed");
                None
            }
        }
    }

    fn transfer_with(&self, code: &OsrCode, frame: &mut InterpreterFrame) -> Result<OsrOutcome> {
        let id = frame.script().id();
        if code.osr_pc != frame.pc() {
            self.lock().stats.pc_mismatches += 1;
            return Err(OsrError::PcMismatch {
                expected: code.osr_pc,
                actual: frame.pc(),
            });
        }
        if code.bailout_expected {
            return Err(OsrError::BailoutExpected);
        }
        self.lock().stats.attempts += 1;

        let snapshot = match self.prepare_transfer(frame, code.entry) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                if matches!(err, OsrError::OutOfMemory { .. }) {
                    self.zone.oom().report_out_of_memory("osr snapshot");
                    self.lock().stats.out_of_memory += 1;
                    tracing::warn!(
                        target: "heron::osr",
                        script = frame.script().name(),
                        bytes = frame.byte_size(),
                        "snapshot allocation failed, continuing in interpreter"
                    );
                }
                return Err(err);
            }
        };
        {
            let mut guard = self.lock();
            let unit = guard.units.entry(id).or_default();
            if unit.active == 0 {
                unit.state = TierState::TransferPrepared;
            }
        }

        if frame.is_debuggee()
            && let Some(observer) = &self.observer
        {
            observer.relocate(frame, &snapshot);
        }

        {
            let mut guard = self.lock();
            let unit = guard.units.entry(id).or_default();
            unit.active += 1;
            unit.state = TierState::Transferred;
            guard.stats.transfers += 1;
        }
        tracing::debug!(
            target: "heron::osr",
            script = frame.script().name(),
            pc = %frame.pc(),
            slots = snapshot.slots().len(),
            bytes = snapshot.byte_size(),
            "transferring frame"
        );

        let exit = self.tier.enter(code, &snapshot, frame);
        drop(snapshot);

        match exit {
            Ok(TierExit::Returned(value)) => {
                self.leave_compiled(id, None);
                Ok(OsrOutcome::Returned(value))
            }
            Ok(TierExit::Bailout { reason, state }) => {
                self.leave_compiled(id, Some(reason));
                restore_frame(frame, &state)?;
                Ok(OsrOutcome::BailedOut(reason))
            }
            Err(err) => {
                self.leave_compiled(id, None);
                Err(err.into())
            }
        }
    }

    /// A frame of unit `id` left compiled code, by bailing out when `bailout`
    /// is set. An invalidated unit stays forgotten.
    fn leave_compiled(&self, id: ScriptId, bailout: Option<BailoutReason>) {
        let mut guard = self.lock();
        let BridgeState { units, stats } = &mut *guard;
        if bailout.is_some() {
            stats.bailouts += 1;
        }
        let Some(unit) = units.get_mut(&id) else {
            return;
        };
        unit.active = unit.active.saturating_sub(1);
        if let Some(reason) = bailout {
            unit.bailouts += 1;
            if unit.bailouts >= DEOPT_THRESHOLD && unit.code.is_some() {
                unit.code = None;
                stats.deoptimizations += 1;
                tracing::debug!(target: "heron::osr", script = id.0, ?reason, "deoptimized after repeated bailouts");
            } else {
                tracing::debug!(target: "heron::osr", script = id.0, ?reason, bailouts = unit.bailouts, "bailout");
            }
        }
        unit.state = if unit.active > 0 {
            TierState::Transferred
        } else {
            unit.resting_state()
        };
    }
}

impl fmt::Debug for OsrBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OsrBridge")
            .field("config", &self.config)
            .field("region", &self.region)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Builder for `OsrBridge`
pub struct OsrBridgeBuilder {
    tier: Arc<dyn OptimizingTier>,
    config: Option<OsrConfig>,
    zone: Option<Arc<Zone>>,
    observer: Option<Arc<dyn FrameObserver>>,
}

impl OsrBridgeBuilder {
    /// Use `config` instead of the environment
    pub fn config(mut self, config: OsrConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Report out-of-memory to `zone`
    pub fn zone(mut self, zone: Arc<Zone>) -> Self {
        self.zone = Some(zone);
        self
    }

    /// Let `observer` relocate debuggee frames
    pub fn observer(mut self, observer: Arc<dyn FrameObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Build the bridge
    pub fn build(self) -> OsrBridge {
        let config = self.config.unwrap_or_else(OsrConfig::from_env);
        OsrBridge {
            region: OsrTempRegion::new(config.region_capacity),
            config,
            tier: self.tier,
            zone: self.zone.unwrap_or_else(Zone::new),
            observer: self.observer,
            state: Mutex::new(BridgeState::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heron_vm_bytecode::Opcode;
    use heron_vm_core::VmError;

    struct RejectingTier;

    impl OptimizingTier for RejectingTier {
        fn compile(&self, _script: &Arc<Script>, _pc: PcOffset) -> Result<OsrCode> {
            Err(OsrError::Compile("unsupported opcode".into()))
        }

        fn enter(&self, _code: &OsrCode, _snapshot: &OsrSnapshot, _frame: &InterpreterFrame) -> VmResult<TierExit> {
            Err(VmError::internal("never compiled"))
        }
    }

    fn frame() -> InterpreterFrame {
        let script = Script::builder().local_count(2).op(Opcode::LoopEntry).build().unwrap();
        InterpreterFrame::new(Arc::new(script), Value::Undefined, vec![])
    }

    #[test]
    fn test_snapshot_releases_lease_on_drop() {
        let bridge = OsrBridge::builder(Arc::new(RejectingTier))
            .config(OsrConfig::default())
            .build();
        let frame = frame();
        let snapshot = bridge.prepare_transfer(&frame, CodeEntry(1)).unwrap();
        assert_eq!(bridge.region().live_leases(), 1);
        assert_eq!(snapshot.byte_size(), crate::FIXED_FRAME_SIZE + 2 * crate::SLOT_SIZE);
        drop(snapshot);
        assert_eq!(bridge.region().live_leases(), 0);
    }

    #[test]
    fn test_transfer_without_code() {
        let bridge = OsrBridge::builder(Arc::new(RejectingTier))
            .config(OsrConfig::default())
            .build();
        let mut frame = frame();
        let id = frame.script().id();
        assert!(matches!(bridge.transfer(&mut frame), Err(OsrError::NoCompiledCode(got)) if got == id));
        assert_eq!(bridge.tier_state(id), TierState::Interpreting);
    }
}
