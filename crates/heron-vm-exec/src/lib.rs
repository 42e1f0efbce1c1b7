//! OSR bridge of the Heron VM
//!
//! Counts loop entries through the IC engine's warm-up sites, requests
//! compilation from an optimizing tier once a loop is hot, and transfers
//! the live interpreter frame into the compiled code. A bailout restores
//! the frame from the same layout the snapshot was taken in.

#![warn(clippy::all)]
#![warn(missing_docs)]

mod config;
mod error;
mod frame;
mod osr;
mod region;
mod stats;
mod tier;

pub use config::{DEFAULT_REGION_CAPACITY, DEFAULT_WARMUP_THRESHOLD, OsrConfig};
pub use error::{OsrError, Result};
pub use frame::{FIXED_FRAME_SIZE, FrameHeader, FrameState, InterpreterFrame, SLOT_SIZE, restore_frame};
pub use osr::{DEOPT_THRESHOLD, FrameObserver, OsrBridge, OsrBridgeBuilder, OsrOutcome, OsrSnapshot};
pub use region::{OsrTempRegion, RegionLease};
pub use stats::OsrStats;
pub use tier::{BailoutReason, CodeEntry, OptimizingTier, OsrCode, TierExit, TierState};
