//! OSR counters

/// Snapshot of OSR bridge counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OsrStats {
    /// Transfers attempted with compiled code available.
    pub attempts: u64,
    /// Frames transferred into compiled code.
    pub transfers: u64,
    /// Compilations requested from the optimizing tier.
    pub compile_requests: u64,
    /// Compilations the optimizing tier rejected.
    pub compile_failures: u64,
    /// Snapshots that could not be allocated.
    pub out_of_memory: u64,
    /// Bailouts from compiled code back into the interpreter.
    pub bailouts: u64,
    /// Units whose compiled code was dropped after repeated bailouts.
    pub deoptimizations: u64,
    /// Transfers skipped because the compiled entry is at another loop.
    pub pc_mismatches: u64,
}
