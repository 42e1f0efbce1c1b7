//! IC runtime
//!
//! Owns what every unit's IC engine shares: configuration, the zone stubs
//! are traced against, the realm handlers allocate into, the codegen
//! strategy and the stub-code cache. Created once by the host and injected
//! into each `IcScript`; `teardown` releases the cache when the host shuts
//! down.

use crate::code_cache::StubCodeCache;
use crate::codegen::{CodegenStrategy, InterpretingBackend};
use crate::config::IcConfig;
use heron_vm_core::Realm;
use heron_vm_gc::Zone;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared state of the IC engine
pub struct IcRuntime {
    config: IcConfig,
    zone: Arc<Zone>,
    realm: Arc<Realm>,
    code_cache: StubCodeCache,
    strategy: Box<dyn CodegenStrategy>,
    torn_down: AtomicBool,
}

impl IcRuntime {
    /// Runtime with default configuration, a fresh zone and realm, and the
    /// interpreting backend
    pub fn new() -> Arc<Self> {
        Self::builder().build()
    }

    /// Start building a runtime
    pub fn builder() -> IcRuntimeBuilder {
        IcRuntimeBuilder::default()
    }

    /// Configuration
    pub fn config(&self) -> &IcConfig {
        &self.config
    }

    /// Zone stubs are traced against
    pub fn zone(&self) -> &Arc<Zone> {
        &self.zone
    }

    /// Realm handlers allocate into
    pub fn realm(&self) -> &Arc<Realm> {
        &self.realm
    }

    /// Stub-code cache
    pub fn code_cache(&self) -> &StubCodeCache {
        &self.code_cache
    }

    /// Codegen strategy
    pub fn strategy(&self) -> &dyn CodegenStrategy {
        &*self.strategy
    }

    /// Release the stub-code cache. Units created afterwards recompile on
    /// demand; stubs already linked keep their code.
    pub fn teardown(&self) {
        self.code_cache.clear();
        self.torn_down.store(true, Ordering::Release);
        tracing::debug!(target: "heron::ic", "IC runtime torn down");
    }

    /// Whether `teardown` ran
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }
}

impl fmt::Debug for IcRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IcRuntime")
            .field("config", &self.config)
            .field("code_cache", &self.code_cache)
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

/// Builder for `IcRuntime`
#[derive(Default)]
pub struct IcRuntimeBuilder {
    config: Option<IcConfig>,
    zone: Option<Arc<Zone>>,
    realm: Option<Arc<Realm>>,
    strategy: Option<Box<dyn CodegenStrategy>>,
}

impl IcRuntimeBuilder {
    /// Use `config` instead of the defaults
    pub fn config(mut self, config: IcConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Share an existing zone
    pub fn zone(mut self, zone: Arc<Zone>) -> Self {
        self.zone = Some(zone);
        self
    }

    /// Share an existing realm
    pub fn realm(mut self, realm: Arc<Realm>) -> Self {
        self.realm = Some(realm);
        self
    }

    /// Compile handlers with `strategy`
    pub fn strategy(mut self, strategy: impl CodegenStrategy + 'static) -> Self {
        self.strategy = Some(Box::new(strategy));
        self
    }

    /// Build the runtime
    pub fn build(self) -> Arc<IcRuntime> {
        Arc::new(IcRuntime {
            config: self.config.unwrap_or_default(),
            zone: self.zone.unwrap_or_else(Zone::new),
            realm: self.realm.unwrap_or_else(Realm::new),
            code_cache: StubCodeCache::new(),
            strategy: self.strategy.unwrap_or_else(|| Box::new(InterpretingBackend)),
            torn_down: AtomicBool::new(false),
        })
    }
}
