//! IC counters

/// Snapshot of a unit's IC counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IcStats {
    /// Dispatches that reached a main-chain fallback
    pub fallback_hits: u64,
    /// Dispatches answered by an optimized stub
    pub stub_hits: u64,
    /// Main-chain stubs linked
    pub stubs_attached: u64,
    /// Main-chain stubs unlinked
    pub stubs_discarded: u64,
    /// Entries that went megamorphic
    pub megamorphic_transitions: u64,
    /// Entries that went generic
    pub generic_transitions: u64,
    /// Attach attempts answered with `TemporarilyUnoptimizable`
    pub temporarily_unoptimizable: u64,
    /// Deferred attaches retried after the generic operation
    pub deferred_attaches: u64,
    /// Attaches abandoned because stub or code allocation failed
    pub oom_recoveries: u64,
    /// Results that reached a monitor-chain fallback
    pub monitor_fallback_hits: u64,
    /// Monitor-chain stubs linked or widened
    pub monitor_stubs_attached: u64,
    /// Writes that reached an update-chain fallback
    pub update_fallback_hits: u64,
    /// Update-chain stubs linked or widened
    pub update_stubs_attached: u64,
    /// Stub-code cache lookups answered without compiling, runtime-wide
    pub code_cache_hits: u64,
}
