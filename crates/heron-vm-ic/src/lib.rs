//! # Heron VM inline caches
//!
//! Every IC-bearing instruction of a bytecode unit owns an IC entry. An
//! entry anchors a chain of stubs, each a guard plus handler specialized for
//! operands seen earlier, terminated by a fallback stub that runs the
//! canonical operation and decides whether to attach a new stub.
//!
//! Monitored sites (property reads, element reads, calls and prologue type
//! checks) additionally route every result through a monitor chain that
//! widens the site's observed types. Property writes consult an update
//! chain scoped to `(group, property)` before they store.
//!
//! Stubs live in a per-unit arena and are linked by `StubId`. Unlinked stubs
//! are never freed while the unit lives, so a dispatch that captured a chain
//! head before a nested call mutated the chain still walks valid stubs.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod attach;
pub mod cache_ir;
pub mod chain;
pub mod code_cache;
pub mod codegen;
pub mod config;
pub mod error;
mod fallback;
pub mod ir_generator;
pub mod monitor;
pub mod operands;
pub mod runtime;
pub mod script;
pub mod space;
pub mod state;
pub mod stats;
pub mod stub;
pub mod trace;
pub mod update;

pub use cache_ir::{CacheIrOp, StubRecipe, TypeGuardKind};
pub use chain::Chain;
pub use code_cache::{CodeId, CompiledCode, StubCodeCache};
pub use codegen::{CodegenError, CodegenStrategy, InterpretingBackend, StubHandler, StubOutcome};
pub use config::IcConfig;
pub use error::{IcError, Result};
pub use operands::IcOperands;
pub use runtime::{IcRuntime, IcRuntimeBuilder};
pub use script::{IcEntryId, IcScript};
pub use space::{StubId, StubSpace};
pub use state::{AttachDecision, AttachState, IcMode};
pub use stats::IcStats;
pub use stub::{Stub, StubData, StubFlavor, StubKind, TypeGuard};
