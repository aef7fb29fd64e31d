//! # Event Bus
//!
//! Decoupled progress and lifecycle reporting over `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The sync engine never talks to a UI directly. Every user-visible
//! occurrence (pass started, percent complete, warning, fatal halt) is
//! published as a [`SyncEvent`]; the hosting application subscribes and
//! renders notifications, progress bars, or log lines as it sees fit.
//! Emission is fire-and-forget: an event bus with no subscribers drops
//! events without error, and a lagging subscriber misses old events rather
//! than blocking the engine.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, SyncEvent};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(SyncEvent::PassStarted { pass: "full".to_string() });
//! assert!(matches!(rx.recv().await, Ok(SyncEvent::PassStarted { .. })));
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default per-subscriber buffer size.
const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Events published by the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    /// A sync pass began.
    PassStarted {
        /// Which pass ("full", "incremental", "repair").
        pass: String,
    },
    /// Progress update from the pipeline reporter.
    Progress {
        /// Category currently being synced.
        category: String,
        /// Items fetched from the remote server so far.
        fetched: u64,
        /// Items applied to the local store so far.
        applied: u64,
        /// Total items queued for this pipeline run.
        total: u64,
        /// Combined percentage (0-100) over both stages.
        percent: u8,
        /// Name of the view currently being applied.
        view_name: String,
    },
    /// A sync pass finished successfully.
    PassCompleted {
        pass: String,
        items_fetched: u64,
        items_applied: u64,
        items_failed: u64,
        duration_secs: u64,
    },
    /// A sync pass failed; the last-success timestamp was not advanced.
    PassFailed {
        pass: String,
        message: String,
        /// Whether the next scheduled cycle will retry automatically.
        recoverable: bool,
    },
    /// The engine was cancelled mid-pass.
    Cancelled,
    /// Views were created, renamed, or removed during view maintenance.
    ViewsChanged {
        created: u64,
        renamed: u64,
        removed: u64,
    },
    /// A single item was applied outside a full pass (notification-driven).
    ItemApplied { item_id: String, kind: String },
    /// A single item was removed outside a full pass.
    ItemRemoved { item_id: String },
    /// One-time user-visible warning (e.g. remote server returned
    /// unauthorized mid-pass).
    Warning { message: String },
    /// The local schema is out of date; the engine has halted and a
    /// destructive reset is required before sync can resume.
    SchemaResetRequired { current: String, minimum: String },
}

/// Broadcast channel for [`SyncEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    ///
    /// Dropped silently when nobody is subscribed; the engine must not
    /// depend on anyone listening.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.sender.send(event);
    }

    /// Create an independent receiver for all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}
