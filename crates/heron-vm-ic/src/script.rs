//! Per-unit IC state and dispatch
//!
//! `IcScript` is created once when a unit is prepared for execution. It
//! holds one entry per IC-bearing instruction (plus the prologue's `this`
//! and argument monitors for functions), the unit's stub arena and its
//! update chains.
//!
//! Dispatch snapshots the entry's chains by value under a short lock, then
//! releases it before any guard or handler runs. A handler that re-enters
//! the same entry (a call stub whose callee calls back into this site)
//! therefore sees a consistent chain, and the outer dispatch keeps walking
//! the stubs it captured even if the inner one attached or discarded some.

use crate::attach::AttachSite;
use crate::cache_ir::CacheIrOp;
use crate::chain::Chain;
use crate::codegen::StubOutcome;
use crate::error::{IcError, Result};
use crate::fallback;
use crate::monitor::MonitorChain;
use crate::operands::IcOperands;
use crate::runtime::IcRuntime;
use crate::space::{StubId, StubSpace};
use crate::state::AttachState;
use crate::stats::IcStats;
use crate::stub::{Stub, StubFlavor};
use crate::trace::trace_stub;
use crate::update::UpdateChain;
use heron_vm_bytecode::{IcKind, Opcode, PcOffset, Script, ScriptId};
use heron_vm_core::{GroupId, ObjectGroup, PropertyKey, TypeSet, Value, VmError, VmResult};
use heron_vm_gc::Tracer;
use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Handle to an IC entry, tagged with the unit that issued it.
///
/// Accessors of `IcScript` panic when handed an entry of another unit;
/// `IcScript::dispatch` reports it as an internal error instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IcEntryId {
    script: ScriptId,
    index: u32,
}

impl IcEntryId {
    /// Index within the unit
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// Unit the entry belongs to
    pub fn script(self) -> ScriptId {
        self.script
    }
}

impl fmt::Display for IcEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ic#{}", self.index)
    }
}

/// Immutable description of an entry's site
#[derive(Debug, Clone)]
pub(crate) struct IcSite {
    pub(crate) pc: PcOffset,
    pub(crate) kind: IcKind,
    pub(crate) opcode: Option<Opcode>,
    pub(crate) key: Option<PropertyKey>,
}

impl IcSite {
    pub(crate) fn op_name(&self) -> &'static str {
        self.opcode.map_or("Prologue", Opcode::name)
    }
}

/// Mutable state of an entry
pub(crate) struct IcEntry {
    pub(crate) chain: Chain,
    pub(crate) state: AttachState,
    pub(crate) entered_count: u64,
    pub(crate) monitor: Option<MonitorChain>,
    pub(crate) saw_double_result: bool,
}

impl IcEntry {
    pub(crate) fn attach_site(&mut self, pc: PcOffset) -> AttachSite<'_> {
        AttachSite {
            pc,
            chain: &mut self.chain,
            state: &mut self.state,
        }
    }
}

/// Everything behind the unit's lock
pub(crate) struct IcScriptState {
    pub(crate) space: StubSpace,
    pub(crate) entries: Vec<IcEntry>,
    pub(crate) update_chains: FxHashMap<(GroupId, PropertyKey), UpdateChain>,
    pub(crate) stats: IcStats,
}

/// Chains of one entry captured at dispatch entry
pub(crate) struct DispatchSnapshot {
    pub(crate) stubs: SmallVec<[Arc<Stub>; 8]>,
    pub(crate) monitor: SmallVec<[Arc<Stub>; 4]>,
}

impl DispatchSnapshot {
    pub(crate) fn monitor_accepts(&self, value: &Value) -> bool {
        self.monitor
            .iter()
            .any(|stub| stub.kind().type_guard().is_some_and(|guard| guard.accepts(value)))
    }
}

fn collect_stubs<A: smallvec::Array<Item = Arc<Stub>>>(space: &StubSpace, chain: &Chain) -> SmallVec<A> {
    chain
        .stubs(space)
        .into_iter()
        .map(|id| Arc::clone(space.get(id)))
        .collect()
}

/// IC engine of one bytecode unit
pub struct IcScript {
    script: Arc<Script>,
    runtime: Arc<IcRuntime>,
    sites: Vec<IcSite>,
    prologue_len: usize,
    state: Mutex<IcScriptState>,
}

impl IcScript {
    /// Allocate every entry of `script`: for functions a `this` monitor and
    /// one monitor per argument at `PcOffset::NON_OP`, then one entry per
    /// IC-bearing instruction in offset order
    pub fn new(script: Arc<Script>, runtime: Arc<IcRuntime>) -> Result<Self> {
        let mut sites = Vec::with_capacity(script.ic_entry_count());
        if script.is_function() {
            for _ in 0..=script.arg_count() {
                sites.push(IcSite {
                    pc: PcOffset::NON_OP,
                    kind: IcKind::TypeMonitor,
                    opcode: None,
                    key: None,
                });
            }
        }
        let prologue_len = sites.len();

        for (pc, opcode, kind) in script.ic_sites() {
            let key = match opcode {
                Opcode::GetProp(name) | Opcode::SetProp(name) => {
                    Some(PropertyKey::new(script.name_at(name)?))
                }
                _ => None,
            };
            sites.push(IcSite {
                pc,
                kind,
                opcode: Some(opcode),
                key,
            });
        }

        let mut space = StubSpace::new(runtime.config().stub_space_limit);
        let entries = sites
            .iter()
            .map(|site| {
                let chain = Chain::new(&mut space, Stub::fallback(site.kind));
                let monitor = site.kind.is_monitored().then(|| MonitorChain::new(&mut space));
                IcEntry {
                    chain,
                    state: AttachState::new(),
                    entered_count: 0,
                    monitor,
                    saw_double_result: false,
                }
            })
            .collect();

        tracing::debug!(
            target: "heron::ic",
            script = script.name(),
            entries = sites.len(),
            prologue = prologue_len,
            "prepared IC entries"
        );

        Ok(Self {
            script,
            runtime,
            sites,
            prologue_len,
            state: Mutex::new(IcScriptState {
                space,
                entries,
                update_chains: FxHashMap::default(),
                stats: IcStats::default(),
            }),
        })
    }

    /// The unit
    pub fn script(&self) -> &Arc<Script> {
        &self.script
    }

    /// The shared runtime
    pub fn runtime(&self) -> &Arc<IcRuntime> {
        &self.runtime
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, IcScriptState> {
        self.state.lock()
    }

    pub(crate) fn site(&self, id: IcEntryId) -> &IcSite {
        &self.sites[self.slot(id)]
    }

    fn entry_id(&self, index: usize) -> IcEntryId {
        IcEntryId {
            script: self.script.id(),
            index: index as u32,
        }
    }

    /// Whether `id` was issued by this unit
    pub fn owns(&self, id: IcEntryId) -> bool {
        id.script == self.script.id() && id.index() < self.sites.len()
    }

    /// Position of `id` in this unit's entries
    fn slot(&self, id: IcEntryId) -> usize {
        assert!(
            self.owns(id),
            "{id} of unit {:?} used with unit {:?}",
            id.script,
            self.script.id()
        );
        id.index()
    }

    /// Number of entries, prologue included
    pub fn entry_count(&self) -> usize {
        self.sites.len()
    }

    /// Every entry in allocation order
    pub fn entries(&self) -> impl Iterator<Item = IcEntryId> + '_ {
        (0..self.sites.len()).map(|index| self.entry_id(index))
    }

    /// Entry of the instruction at `pc`
    pub fn entry_for_pc(&self, pc: PcOffset) -> Option<IcEntryId> {
        self.sites[self.prologue_len..]
            .binary_search_by_key(&pc, |site| site.pc)
            .ok()
            .map(|index| self.entry_id(index + self.prologue_len))
    }

    /// Prologue entry monitoring `this`
    pub fn this_entry(&self) -> Option<IcEntryId> {
        (self.prologue_len > 0).then(|| self.entry_id(0))
    }

    /// Prologue entry monitoring argument `index`
    pub fn argument_entry(&self, index: usize) -> Option<IcEntryId> {
        (index + 1 < self.prologue_len).then(|| self.entry_id(index + 1))
    }

    /// Offset of an entry, `PcOffset::NON_OP` for prologue entries
    pub fn entry_pc(&self, id: IcEntryId) -> PcOffset {
        self.site(id).pc
    }

    /// Kind of an entry
    pub fn entry_kind(&self, id: IcEntryId) -> IcKind {
        self.site(id).kind
    }

    fn snapshot(&self, id: IcEntryId) -> DispatchSnapshot {
        let index = self.slot(id);
        let state = self.lock();
        let entry = &state.entries[index];
        DispatchSnapshot {
            stubs: collect_stubs(&state.space, &entry.chain),
            monitor: entry
                .monitor
                .as_ref()
                .map(|monitor| collect_stubs(&state.space, monitor.chain()))
                .unwrap_or_default(),
        }
    }

    /// Run the operation of entry `id` on `operands`.
    ///
    /// Tries the optimized stubs in chain order and runs the first whose
    /// guard holds; otherwise runs the entry's fallback. Errors of the
    /// operation itself propagate unchanged.
    pub fn dispatch(&self, id: IcEntryId, operands: IcOperands<'_>) -> VmResult<Value> {
        if !self.owns(id) {
            return Err(VmError::internal(format!(
                "{id} does not belong to unit {}",
                self.script.name()
            )));
        }
        let snapshot = self.snapshot(id);
        let site = self.site(id);

        if site.kind == IcKind::TypeMonitor {
            let value = operands.unary().ok_or_else(|| {
                VmError::internal(format!("type monitor at {} expects one operand", site.pc))
            })?;
            self.record_monitored(id, &snapshot, value, true);
            return Ok(value.clone());
        }

        let realm = self.runtime.realm();
        for stub in &snapshot.stubs {
            let Some(code) = stub.code() else {
                continue;
            };
            let handler = code.handler();
            let flavor = stub.kind().flavor();

            let result = if flavor == Some(StubFlavor::Updated) {
                if !handler.guard(stub, &operands) {
                    continue;
                }
                if let (Some((Value::Object(obj), rhs)), Some(key)) = (operands.binary(), &site.key) {
                    self.record_write(obj.group(), key, rhs);
                }
                handler.run(stub, &operands, realm)?
            } else {
                match handler.invoke(stub, &operands, realm)? {
                    StubOutcome::Matched(value) => value,
                    StubOutcome::GuardFailed => continue,
                }
            };

            self.lock().stats.stub_hits += 1;
            if flavor == Some(StubFlavor::Monitored) {
                self.record_monitored(id, &snapshot, &result, false);
            }
            return Ok(result);
        }

        fallback::run(self, id, operands, &snapshot)
    }

    /// Route `value` through the monitor chain of `id`. The captured chain
    /// is tried first; only a miss takes the lock and runs the monitor
    /// fallback.
    pub(crate) fn record_monitored(&self, id: IcEntryId, snapshot: &DispatchSnapshot, value: &Value, count_entry: bool) {
        if snapshot.monitor_accepts(value) {
            return;
        }
        let index = self.slot(id);
        let mut guard = self.lock();
        let IcScriptState {
            space,
            entries,
            stats,
            ..
        } = &mut *guard;
        let entry = &mut entries[index];
        if count_entry {
            entry.entered_count += 1;
        }
        if let Some(monitor) = entry.monitor.as_mut() {
            monitor.record_result(&self.runtime, space, stats, value);
        }
    }

    /// Check a write of `value` to `key` on an object of `group` against
    /// its update chain, running the update fallback on a miss. Returns
    /// whether an existing guard accepted the value.
    pub fn record_write(&self, group: &Arc<ObjectGroup>, key: &PropertyKey, value: &Value) -> bool {
        let mut guard = self.lock();
        let IcScriptState {
            space,
            update_chains,
            stats,
            ..
        } = &mut *guard;
        let chain = update_chains
            .entry((group.id(), key.clone()))
            .or_insert_with(|| UpdateChain::new(space, Arc::clone(group), key.clone()));
        chain.record_write(&self.runtime, space, stats, value)
    }

    fn dispatch_at(&self, pc: PcOffset, operands: IcOperands<'_>) -> VmResult<Value> {
        let id = self.entry_for_pc(pc).ok_or(IcError::NoEntry(pc))?;
        self.dispatch(id, operands)
    }

    /// `JumpIfFalse` condition at `pc`
    pub fn to_bool(&self, pc: PcOffset, value: &Value) -> VmResult<bool> {
        Ok(matches!(self.dispatch_at(pc, IcOperands::Unary(value))?, Value::Boolean(true)))
    }

    /// Unary arithmetic at `pc`
    pub fn unary(&self, pc: PcOffset, operand: &Value) -> VmResult<Value> {
        self.dispatch_at(pc, IcOperands::Unary(operand))
    }

    /// Binary arithmetic at `pc`
    pub fn binary(&self, pc: PcOffset, lhs: &Value, rhs: &Value) -> VmResult<Value> {
        self.dispatch_at(pc, IcOperands::Binary(lhs, rhs))
    }

    /// Comparison at `pc`
    pub fn compare(&self, pc: PcOffset, lhs: &Value, rhs: &Value) -> VmResult<bool> {
        Ok(matches!(self.dispatch_at(pc, IcOperands::Binary(lhs, rhs))?, Value::Boolean(true)))
    }

    /// Named property read at `pc`
    pub fn get_prop(&self, pc: PcOffset, target: &Value) -> VmResult<Value> {
        self.dispatch_at(pc, IcOperands::Unary(target))
    }

    /// Named property write at `pc`
    pub fn set_prop(&self, pc: PcOffset, target: &Value, rhs: &Value) -> VmResult<Value> {
        self.dispatch_at(pc, IcOperands::Binary(target, rhs))
    }

    /// Element read at `pc`
    pub fn get_elem(&self, pc: PcOffset, target: &Value, index: &Value) -> VmResult<Value> {
        self.dispatch_at(pc, IcOperands::Binary(target, index))
    }

    /// `key in target` at `pc`
    pub fn has_prop(&self, pc: PcOffset, key: &Value, target: &Value) -> VmResult<bool> {
        Ok(matches!(self.dispatch_at(pc, IcOperands::Binary(key, target))?, Value::Boolean(true)))
    }

    /// Element write at `pc`
    pub fn set_elem(&self, pc: PcOffset, target: &Value, index: &Value, rhs: &Value) -> VmResult<Value> {
        self.dispatch_at(pc, IcOperands::Ternary(target, index, rhs))
    }

    /// Own-property test at `pc`
    pub fn has_own(&self, pc: PcOffset, key: &Value, target: &Value) -> VmResult<bool> {
        Ok(matches!(self.dispatch_at(pc, IcOperands::Binary(key, target))?, Value::Boolean(true)))
    }

    /// `value instanceof ctor` at `pc`
    pub fn instance_of(&self, pc: PcOffset, value: &Value, ctor: &Value) -> VmResult<bool> {
        Ok(matches!(self.dispatch_at(pc, IcOperands::Binary(value, ctor))?, Value::Boolean(true)))
    }

    /// Call at `pc`
    pub fn call(&self, pc: PcOffset, callee: &Value, this: &Value, args: &[Value]) -> VmResult<Value> {
        self.dispatch_at(pc, IcOperands::Call { callee, this, args })
    }

    /// `typeof` at `pc`
    pub fn type_of(&self, pc: PcOffset, value: &Value) -> VmResult<Value> {
        self.dispatch_at(pc, IcOperands::Unary(value))
    }

    /// Iterator creation at `pc`
    pub fn get_iterator(&self, pc: PcOffset, value: &Value) -> VmResult<Value> {
        self.dispatch_at(pc, IcOperands::Unary(value))
    }

    /// Aliased-variable read at `pc`: monitors and returns `value`
    pub fn monitor_aliased(&self, pc: PcOffset, value: &Value) -> VmResult<Value> {
        self.dispatch_at(pc, IcOperands::Unary(value))
    }

    /// Loop entry at `pc`: counts the entry and returns the count
    pub fn loop_entry(&self, pc: PcOffset) -> VmResult<u64> {
        let id = self.entry_for_pc(pc).ok_or(IcError::NoEntry(pc))?;
        Ok(fallback::warm_up(self, id))
    }

    /// Monitor the receiver on function entry
    pub fn monitor_this(&self, this: &Value) -> VmResult<()> {
        match self.this_entry() {
            Some(id) => self.dispatch(id, IcOperands::Unary(this)).map(drop),
            None => Ok(()),
        }
    }

    /// Monitor argument `index` on function entry
    pub fn monitor_argument(&self, index: usize, arg: &Value) -> VmResult<()> {
        match self.argument_entry(index) {
            Some(id) => self.dispatch(id, IcOperands::Unary(arg)).map(drop),
            None => Ok(()),
        }
    }

    /// Optimized stubs of the main chain, in dispatch order
    pub fn stubs(&self, id: IcEntryId) -> Vec<Arc<Stub>> {
        self.snapshot(id).stubs.into_vec()
    }

    /// Main chain bookkeeping of an entry
    pub fn chain(&self, id: IcEntryId) -> Chain {
        self.lock().entries[self.slot(id)].chain
    }

    /// Stubs visited walking `next` from the head, fallback included
    pub fn chain_path(&self, id: IcEntryId) -> Vec<StubId> {
        let index = self.slot(id);
        let state = self.lock();
        let head = state.entries[index].chain.head();
        state.space.walk(head).take(state.space.len() + 1).collect()
    }

    /// Attach state of an entry
    pub fn attach_state(&self, id: IcEntryId) -> AttachState {
        self.lock().entries[self.slot(id)].state
    }

    /// Times the entry's fallback ran
    pub fn entered_count(&self, id: IcEntryId) -> u64 {
        self.lock().entries[self.slot(id)].entered_count
    }

    /// Whether a binary-arithmetic fallback ever produced a double
    pub fn saw_double_result(&self, id: IcEntryId) -> bool {
        self.lock().entries[self.slot(id)].saw_double_result
    }

    /// Stubs of an entry's monitor chain, in dispatch order
    pub fn monitor_stubs(&self, id: IcEntryId) -> Vec<Arc<Stub>> {
        self.snapshot(id).monitor.into_vec()
    }

    /// Types observed at a monitored entry
    pub fn site_types(&self, id: IcEntryId) -> Option<TypeSet> {
        self.lock().entries[self.slot(id)]
            .monitor
            .as_ref()
            .map(|monitor| monitor.types().clone())
    }

    /// Whether the monitor chain of `id` currently accepts `value`
    pub fn monitor_accepts(&self, id: IcEntryId, value: &Value) -> bool {
        let index = self.slot(id);
        let state = self.lock();
        state.entries[index]
            .monitor
            .as_ref()
            .is_some_and(|monitor| monitor.accepts(&state.space, value))
    }

    /// Stubs of the update chain of `(group, key)`, empty when no write was
    /// checked yet
    pub fn update_stubs(&self, group: &ObjectGroup, key: &PropertyKey) -> Vec<Arc<Stub>> {
        let state = self.lock();
        state
            .update_chains
            .get(&(group.id(), key.clone()))
            .map(|chain| {
                chain
                    .chain()
                    .stubs(&state.space)
                    .into_iter()
                    .map(|id| Arc::clone(state.space.get(id)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether the update chain of `(group, key)` currently accepts `value`
    pub fn update_accepts(&self, group: &ObjectGroup, key: &PropertyKey, value: &Value) -> bool {
        let state = self.lock();
        state
            .update_chains
            .get(&(group.id(), key.clone()))
            .is_some_and(|chain| chain.accepts(&state.space, value))
    }

    /// Stubs allocated in the unit's arena, fallbacks included
    pub fn allocated_stubs(&self) -> usize {
        self.lock().space.len()
    }

    /// Counter snapshot
    pub fn stats(&self) -> IcStats {
        IcStats {
            code_cache_hits: self.runtime.code_cache().hits(),
            ..self.lock().stats
        }
    }

    /// Unlink every main-chain stub of `id` specialized as `op`. Returns how
    /// many were removed.
    pub fn unlink_stubs_with_kind(&self, id: IcEntryId, op: CacheIrOp) -> usize {
        let index = self.slot(id);
        let mut guard = self.lock();
        let IcScriptState {
            space,
            entries,
            stats,
            ..
        } = &mut *guard;
        let entry = &mut entries[index];
        let removed = entry
            .chain
            .unlink_matching(space, self.runtime.zone(), |stub| stub.kind().cache_ir_op() == Some(op));
        for _ in 0..removed {
            entry.state.track_unlinked_stub();
        }
        stats.stubs_discarded += removed as u64;
        removed
    }

    /// Discard the optimized main-chain stubs of every entry and reset their
    /// attach state, after a runtime assumption the stubs relied on was
    /// invalidated. Monitor and update chains are kept: they only widen.
    pub fn purge_optimized_stubs(&self) {
        let mut guard = self.lock();
        let IcScriptState {
            space,
            entries,
            stats,
            ..
        } = &mut *guard;
        for (site, entry) in self.sites.iter().zip(entries.iter_mut()) {
            entry.attach_site(site.pc).discard_stubs(&self.runtime, space, stats);
            entry.state.reset();
        }
        tracing::debug!(target: "heron::ic", script = self.script.name(), "purged optimized stubs");
    }

    /// Trace every stub reachable from a live chain
    pub fn trace(&self, tracer: &mut dyn Tracer) {
        let state = self.lock();
        let space = &state.space;
        let mut trace_chain = |chain: &Chain| {
            for id in space.walk(chain.head()) {
                trace_stub(space.get(id), tracer);
            }
        };
        for entry in &state.entries {
            trace_chain(&entry.chain);
            if let Some(monitor) = &entry.monitor {
                trace_chain(monitor.chain());
            }
        }
        for chain in state.update_chains.values() {
            trace_chain(chain.chain());
        }
    }
}

impl fmt::Debug for IcScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IcScript")
            .field("script", &self.script.name())
            .field("entries", &self.sites.len())
            .field("prologue", &self.prologue_len)
            .finish()
    }
}
