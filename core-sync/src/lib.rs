//! # Library Synchronization Engine
//!
//! Keeps a local media library database mirroring a remote catalog server:
//! full passes on a schedule, push-notification-driven updates in between,
//! and watched/resume state flowing both ways.
//!
//! ## Architecture
//!
//! - [`context`] - shared handle bundle (bridge traits, flags, clock)
//! - [`delta`] - checksum-based change detection over section listings
//! - [`pipeline`] - concurrent fetch workers feeding a single apply worker
//!   per category, with sampled progress reporting
//! - [`views`] - library section reconciliation (create/rename/remove)
//! - [`orchestrator`] - pass structure, scheduling, and the main loop
//! - [`notifications`] - timeline and playback push-message processing
//! - [`sessions`] - playback session attribution
//! - [`clock`] - empirical remote clock offset estimation
//! - [`fanart`] - low-priority background artwork downloads
//!
//! All I/O goes through the `bridge-traits` contracts; the engine itself
//! never opens a socket or a database.
//!
//! ## Usage
//!
//! ```no_run
//! # async fn example(ctx: core_sync::SyncContext) -> core_sync::Result<()> {
//! let mut orchestrator = core_sync::SyncOrchestrator::new(ctx);
//! orchestrator.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod context;
pub mod delta;
pub mod error;
pub mod fanart;
pub mod notifications;
pub mod orchestrator;
pub mod pipeline;
pub mod sessions;
pub mod views;

#[cfg(test)]
pub(crate) mod testutil;

pub use clock::ClockReconciler;
pub use context::{ClockOffset, EngineFlags, SyncContext, SyncContextBuilder, UserIdentity};
pub use delta::{ApplyOp, DeltaMode, DeltaPlan, WorkItem};
pub use error::{Result, SyncError};
pub use fanart::{FanartQueue, FanartRequest, FanartWorker};
pub use notifications::{EventProcessor, PendingEvent};
pub use orchestrator::{SyncOrchestrator, MIN_SCHEMA_VERSION};
pub use pipeline::{Pipeline, PipelineOutcome, ProgressSnapshot, StageCounters};
pub use sessions::{session_is_ours, SessionCache};
pub use views::ViewMaintainer;
