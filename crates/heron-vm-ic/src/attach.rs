//! Attach controller
//!
//! Drives an entry's `AttachState`: transitions before each attempt,
//! asks the IR generator for a recipe, compiles it through the runtime's
//! code cache and links the stub at the head of the main chain. Resource
//! failures are reported to the zone and the entry simply stays on its
//! fallback.

use crate::cache_ir::StubRecipe;
use crate::chain::Chain;
use crate::codegen::CodegenError;
use crate::error::{IcError, Result};
use crate::ir_generator::IrGenerator;
use crate::runtime::IcRuntime;
use crate::space::{StubId, StubSpace};
use crate::state::{AttachDecision, AttachState, IcMode};
use crate::stats::IcStats;
use crate::stub::Stub;
use heron_vm_bytecode::PcOffset;

/// Compile `recipe` through the runtime's code cache
pub fn build_stub(runtime: &IcRuntime, recipe: StubRecipe) -> Result<Stub> {
    let (op, kind, data) = recipe.into_parts();
    let code = runtime.code_cache().get_or_compile(op, runtime.strategy())?;
    Ok(Stub::optimized(kind, data, code))
}

/// Report an attach-side failure. Out-of-memory goes to the zone's
/// reporter; either way the caller continues on the generic path.
pub fn report_attach_failure(runtime: &IcRuntime, stats: &mut IcStats, pc: PcOffset, err: &IcError) {
    let what = match err {
        IcError::OutOfMemory { what } => *what,
        IcError::Codegen(CodegenError::OutOfMemory) => "stub code",
        _ => {
            tracing::debug!(target: "heron::ic", %pc, error = %err, "stub not compiled");
            return;
        }
    };
    runtime.zone().oom().report_out_of_memory(what);
    stats.oom_recoveries += 1;
    tracing::warn!(target: "heron::ic", %pc, error = %err, "stub attach failed, staying on fallback");
}

/// Main chain plus attach state of one entry
pub struct AttachSite<'a> {
    /// Entry offset, for diagnostics
    pub pc: PcOffset,
    /// Main chain
    pub chain: &'a mut Chain,
    /// Attach state
    pub state: &'a mut AttachState,
}

impl AttachSite<'_> {
    /// Unlink every optimized stub, keeping the state's stub count in step
    pub fn discard_stubs(&mut self, runtime: &IcRuntime, space: &mut StubSpace, stats: &mut IcStats) {
        let removed = self.chain.discard_all(space, runtime.zone());
        for _ in 0..removed {
            self.state.track_unlinked_stub();
        }
        stats.stubs_discarded += removed as u64;
    }

    /// Advance the mode before an attempt, discarding stubs on a transition
    pub fn maybe_transition(&mut self, runtime: &IcRuntime, space: &mut StubSpace, stats: &mut IcStats) {
        let before = self.state.mode();
        if !self.state.maybe_transition(runtime.config().max_optimized_stubs) {
            return;
        }
        self.discard_stubs(runtime, space, stats);
        let after = self.state.mode();
        match after {
            IcMode::Megamorphic => stats.megamorphic_transitions += 1,
            IcMode::Generic => stats.generic_transitions += 1,
            _ => {}
        }
        tracing::debug!(
            target: "heron::ic",
            pc = %self.pc,
            from = ?before,
            to = ?after,
            failures = self.state.num_failures(),
            "IC state transition"
        );
    }

    /// Ask `generator` for a stub and link it.
    ///
    /// Returns `Attach` only when a stub was actually linked; a codegen or
    /// allocation failure is reported and answered with `NoAction`.
    pub fn try_attach(
        &mut self,
        runtime: &IcRuntime,
        space: &mut StubSpace,
        stats: &mut IcStats,
        generator: &mut dyn IrGenerator,
    ) -> AttachDecision {
        if !runtime.config().enabled || !self.state.can_attach_stub(runtime.config().max_optimized_stubs) {
            return AttachDecision::NoAction;
        }
        self.state.track_attempt();

        match generator.try_attach_stub() {
            AttachDecision::Attach => match generator.take_recipe() {
                Some(recipe) => self.link(runtime, space, stats, recipe),
                None => AttachDecision::NoAction,
            },
            AttachDecision::TemporarilyUnoptimizable => {
                stats.temporarily_unoptimizable += 1;
                AttachDecision::TemporarilyUnoptimizable
            }
            other => other,
        }
    }

    /// Compile and link `recipe` at the head of the chain
    pub fn link(
        &mut self,
        runtime: &IcRuntime,
        space: &mut StubSpace,
        stats: &mut IcStats,
        recipe: StubRecipe,
    ) -> AttachDecision {
        let op = recipe.code_key();
        match self.insert(runtime, space, recipe) {
            Ok(id) => {
                self.state.track_attached();
                stats.stubs_attached += 1;
                tracing::debug!(
                    target: "heron::ic",
                    pc = %self.pc,
                    stub = %id,
                    ?op,
                    stubs = self.state.num_optimized_stubs(),
                    "attached stub"
                );
                AttachDecision::Attach
            }
            Err(err) => {
                report_attach_failure(runtime, stats, self.pc, &err);
                AttachDecision::NoAction
            }
        }
    }

    fn insert(&mut self, runtime: &IcRuntime, space: &mut StubSpace, recipe: StubRecipe) -> Result<StubId> {
        let stub = build_stub(runtime, recipe)?;
        self.chain.insert_head(space, stub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IcConfig;
    use crate::ir_generator::ToBoolIrGenerator;
    use heron_vm_bytecode::IcKind;
    use heron_vm_core::Value;

    fn fixture(config: IcConfig) -> (std::sync::Arc<IcRuntime>, StubSpace, Chain, AttachState) {
        let runtime = IcRuntime::builder().config(config).build();
        let mut space = StubSpace::new(config.stub_space_limit);
        let chain = Chain::new(&mut space, Stub::fallback(IcKind::ToBool));
        (runtime, space, chain, AttachState::new())
    }

    #[test]
    fn test_attach_links_at_head() {
        let (runtime, mut space, mut chain, mut state) = fixture(IcConfig::default());
        let mut stats = IcStats::default();
        let mut site = AttachSite {
            pc: PcOffset::new(0),
            chain: &mut chain,
            state: &mut state,
        };
        site.maybe_transition(&runtime, &mut space, &mut stats);
        let value = Value::Int32(1);
        let decision = site.try_attach(&runtime, &mut space, &mut stats, &mut ToBoolIrGenerator::new(&value));
        assert_eq!(decision, AttachDecision::Attach);
        assert_eq!(chain.len(&space), 1);
        assert_eq!(state.num_optimized_stubs(), 1);
        assert_eq!(stats.stubs_attached, 1);
    }

    #[test]
    fn test_exhausted_space_reports_oom() {
        let (runtime, mut space, mut chain, mut state) =
            fixture(IcConfig::default().with_stub_space_limit(0));
        let mut stats = IcStats::default();
        let mut site = AttachSite {
            pc: PcOffset::new(0),
            chain: &mut chain,
            state: &mut state,
        };
        let value = Value::Null;
        let decision = site.try_attach(&runtime, &mut space, &mut stats, &mut ToBoolIrGenerator::new(&value));
        assert_eq!(decision, AttachDecision::NoAction);
        assert_eq!(runtime.zone().oom().count(), 1);
        assert_eq!(stats.oom_recoveries, 1);
        assert!(chain.is_fallback_only());
        assert_eq!(state.num_optimized_stubs(), 0);
    }

    #[test]
    fn test_disabled_config_never_attaches() {
        let (runtime, mut space, mut chain, mut state) = fixture(IcConfig::default().disabled());
        let mut stats = IcStats::default();
        let mut site = AttachSite {
            pc: PcOffset::new(0),
            chain: &mut chain,
            state: &mut state,
        };
        let value = Value::Int32(0);
        let decision = site.try_attach(&runtime, &mut space, &mut stats, &mut ToBoolIrGenerator::new(&value));
        assert_eq!(decision, AttachDecision::NoAction);
        assert_eq!(state.attempts(), 0);
    }
}
