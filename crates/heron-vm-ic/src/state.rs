//! Attach state of an IC entry
//!
//! ```text
//! Uninitialized -> Optimizable(n) -> Megamorphic -> Generic
//!                        \______________________/^
//! ```
//!
//! A site leaves `Optimizable` when it holds `K` stubs (polymorphism is too
//! high: `Megamorphic`) or when attach attempts kept failing
//! (`Generic`). Both discard the specialized stubs and stop attaching. A
//! megamorphic site that keeps reaching its fallback settles in `Generic`.

/// Result of asking an IR generator to specialize an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachDecision {
    /// A recipe was produced; compile it and link the stub
    Attach,
    /// The operands cannot be specialized
    NoAction,
    /// A transient condition prevents specialization right now. Counted as
    /// an attempt but not as a failure.
    TemporarilyUnoptimizable,
    /// Specialization needs the outcome of the generic operation; retry
    /// afterwards
    Deferred,
}

/// Specialization mode of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IcMode {
    /// Fallback never entered
    #[default]
    Uninitialized,
    /// Stubs may be attached
    Optimizable,
    /// Too many shapes seen; specialization abandoned
    Megamorphic,
    /// Attach attempts kept failing; specialization abandoned
    Generic,
}

/// Failures tolerated before any stub is attached
const BASE_MAX_FAILURES: u32 = 5;

/// Extra failures tolerated per attached stub
const FAILURES_PER_STUB: u32 = 40;

/// Mode plus saturating counters, owned by the entry's fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttachState {
    mode: IcMode,
    num_optimized_stubs: u8,
    num_failures: u16,
    attempts: u32,
}

impl AttachState {
    /// Fresh state
    pub fn new() -> Self {
        Self::default()
    }

    /// Current mode
    pub fn mode(&self) -> IcMode {
        self.mode
    }

    /// Optimized stubs currently linked into the main chain
    pub fn num_optimized_stubs(&self) -> usize {
        self.num_optimized_stubs as usize
    }

    /// Failed attach attempts since the last successful attach
    pub fn num_failures(&self) -> u32 {
        u32::from(self.num_failures)
    }

    /// Attach attempts of any outcome
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Failure budget, growing with the number of stubs already attached
    pub fn max_failures(&self) -> u32 {
        BASE_MAX_FAILURES + FAILURES_PER_STUB * u32::from(self.num_optimized_stubs)
    }

    /// Whether specialization was abandoned
    pub fn is_terminal(&self) -> bool {
        matches!(self.mode, IcMode::Megamorphic | IcMode::Generic)
    }

    /// Advance the mode before an attach attempt. Returns true when the
    /// caller must discard the entry's specialized stubs.
    pub fn maybe_transition(&mut self, cap: usize) -> bool {
        match self.mode {
            IcMode::Generic => false,
            IcMode::Uninitialized => {
                self.mode = IcMode::Optimizable;
                false
            }
            IcMode::Optimizable => {
                if self.num_failures() >= self.max_failures() {
                    self.mode = IcMode::Generic;
                    true
                } else if self.num_optimized_stubs() >= cap {
                    self.mode = IcMode::Megamorphic;
                    true
                } else {
                    false
                }
            }
            IcMode::Megamorphic => {
                if self.num_failures() >= self.max_failures() {
                    self.mode = IcMode::Generic;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Whether another stub may be attached under cap `cap`
    pub fn can_attach_stub(&self, cap: usize) -> bool {
        matches!(self.mode, IcMode::Uninitialized | IcMode::Optimizable)
            && self.num_optimized_stubs() < cap
    }

    /// Count an attach attempt
    pub fn track_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// A stub was linked
    pub fn track_attached(&mut self) {
        debug_assert!(!self.is_terminal(), "attached in terminal mode");
        self.mode = IcMode::Optimizable;
        self.num_failures = 0;
        self.num_optimized_stubs = self.num_optimized_stubs.saturating_add(1);
    }

    /// The fallback ran without linking a stub
    pub fn track_not_attached(&mut self) {
        self.num_failures = self.num_failures.saturating_add(1);
    }

    /// A stub was unlinked
    pub fn track_unlinked_stub(&mut self) {
        debug_assert!(self.num_optimized_stubs > 0, "unlinked more stubs than attached");
        self.num_optimized_stubs = self.num_optimized_stubs.saturating_sub(1);
    }

    /// Forget everything, used when all stubs were purged because a runtime
    /// assumption they relied on was invalidated
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
