//! Heron VM tracing and barrier contracts
//!
//! The inline-cache engine never runs a collector itself. It needs three
//! things from the heap it lives in:
//! - a way to report the edges a stub holds (`Tracer`)
//! - a way to learn whether an incremental trace is in progress, so an edge
//!   about to be removed can be traced once more (`Zone`)
//! - a sink for allocation failures (`OomReporter`)

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod barrier;
pub mod object;
pub mod oom;
pub mod tracer;

pub use barrier::{BarrierTracer, Zone};
pub use object::{GcKind, GcThing, MarkColor};
pub use oom::OomReporter;
pub use tracer::{EdgeRecorder, Tracer};
