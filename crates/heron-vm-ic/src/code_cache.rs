//! Stub-code cache
//!
//! Handlers are compiled once per structural signature (`CacheIrOp`) and
//! shared by every stub with that signature, across sites and units. The
//! cache belongs to an `IcRuntime` and is cleared on teardown.

use crate::cache_ir::CacheIrOp;
use crate::codegen::{CodegenError, CodegenStrategy, StubHandler};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a compiled handler, traced as a GC code thing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct CodeId(pub u64);

/// A compiled handler plus its identity
#[derive(Clone)]
pub struct CompiledCode {
    id: CodeId,
    op: CacheIrOp,
    handler: Arc<dyn StubHandler>,
}

impl CompiledCode {
    /// Code identity
    pub fn id(&self) -> CodeId {
        self.id
    }

    /// Signature the code was compiled for
    pub fn op(&self) -> CacheIrOp {
        self.op
    }

    /// The handler
    pub fn handler(&self) -> &dyn StubHandler {
        &*self.handler
    }
}

impl fmt::Debug for CompiledCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledCode")
            .field("id", &self.id.0)
            .field("op", &self.op)
            .finish()
    }
}

/// Cache of compiled handlers keyed by signature
#[derive(Default)]
pub struct StubCodeCache {
    entries: Mutex<FxHashMap<CacheIrOp, CompiledCode>>,
    next_id: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl StubCodeCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached code for `op`, compiling it with `strategy` on a miss.
    ///
    /// The lock is not held while the strategy compiles. If two callers
    /// race, the first insertion wins and both get the same code.
    pub fn get_or_compile(
        &self,
        op: CacheIrOp,
        strategy: &dyn CodegenStrategy,
    ) -> Result<CompiledCode, CodegenError> {
        if let Some(code) = self.entries.lock().get(&op) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(code.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let handler = strategy.compile(op)?;
        let code = CompiledCode {
            id: CodeId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1),
            op,
            handler,
        };
        Ok(self.entries.lock().entry(op).or_insert(code).clone())
    }

    /// Cached code for `op` without compiling
    pub fn get(&self, op: CacheIrOp) -> Option<CompiledCode> {
        self.entries.lock().get(&op).cloned()
    }

    /// Number of distinct signatures compiled
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing was compiled
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Lookups answered from the cache
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that invoked the strategy
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Drop every compiled handler. Stubs already holding code keep it.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl fmt::Debug for StubCodeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubCodeCache")
            .field("len", &self.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}
