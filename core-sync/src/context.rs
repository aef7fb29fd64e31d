//! # Sync Context
//!
//! One shared handle bundle passed to every engine component: the bridge
//! trait objects, the event bus, runtime flags, and the remote clock
//! offset. Built once at startup by the embedder and cloned (cheaply, all
//! fields are `Arc`) wherever needed.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use bridge_traits::{
    ArtworkFetcher, ListArtifacts, LibraryIndex, LocalLibrary, NotificationQueue, RemoteCatalog,
    SettingsProvider,
};
use core_runtime::EventBus;

// ============================================================================
// Engine Flags
// ============================================================================

/// Shared runtime flags steering all engine tasks.
///
/// `stop` is a hard shutdown: every loop observes the token and exits.
/// `suspend` pauses work without tearing tasks down (e.g. while the host is
/// playing media). `scan_in_progress` is set for the duration of a full
/// pass so ancillary workers (fanart) stay off the remote connection.
#[derive(Debug)]
pub struct EngineFlags {
    stop: CancellationToken,
    suspended: AtomicBool,
    scan_in_progress: AtomicBool,
}

impl EngineFlags {
    pub fn new() -> Self {
        Self {
            stop: CancellationToken::new(),
            suspended: AtomicBool::new(false),
            scan_in_progress: AtomicBool::new(false),
        }
    }

    /// Token observed by every engine loop; cancelled exactly once.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Request engine shutdown. Idempotent.
    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn set_suspended(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::SeqCst);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn set_scan_in_progress(&self, active: bool) {
        self.scan_in_progress.store(active, Ordering::SeqCst);
    }

    pub fn is_scan_in_progress(&self) -> bool {
        self.scan_in_progress.load(Ordering::SeqCst)
    }
}

impl Default for EngineFlags {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Clock Offset
// ============================================================================

/// Measured difference between the local clock and the remote server's
/// clock, in seconds (`local - remote`).
///
/// Written by the clock reconciler, read wherever a remote timestamp is
/// translated into local time. Zero until the first successful estimate.
#[derive(Debug, Default)]
pub struct ClockOffset {
    offset_secs: AtomicI64,
}

impl ClockOffset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, offset_secs: i64) {
        self.offset_secs.store(offset_secs, Ordering::SeqCst);
    }

    pub fn get(&self) -> i64 {
        self.offset_secs.load(Ordering::SeqCst)
    }

    /// Translate a remote-clock Unix timestamp into local time.
    pub fn to_local(&self, remote_ts: i64) -> i64 {
        remote_ts + self.get()
    }
}

// ============================================================================
// User Identity
// ============================================================================

/// The identity playback sessions are matched against.
#[derive(Debug, Clone, Default)]
pub struct UserIdentity {
    pub user_id: String,
    pub user_name: String,
    /// Whether the connected server belongs to this account. Sessions on a
    /// non-owned server are always treated as ours.
    pub server_owned: bool,
    /// Whether an account token is configured; without one, identity
    /// comparison falls back to the owner-match policy.
    pub signed_in: bool,
}

// ============================================================================
// Sync Context
// ============================================================================

/// Everything the engine needs, wired up once by the embedder.
#[derive(Clone)]
pub struct SyncContext {
    pub catalog: Arc<dyn RemoteCatalog>,
    pub library: Arc<dyn LocalLibrary>,
    pub index: Arc<dyn LibraryIndex>,
    pub artifacts: Arc<dyn ListArtifacts>,
    pub notifications: Arc<dyn NotificationQueue>,
    pub settings: Arc<dyn SettingsProvider>,
    /// Absent when the embedder does not cache artwork.
    pub artwork: Option<Arc<dyn ArtworkFetcher>>,
    pub events: EventBus,
    pub flags: Arc<EngineFlags>,
    pub clock: Arc<ClockOffset>,
    pub user: UserIdentity,
}

impl SyncContext {
    pub fn builder() -> SyncContextBuilder {
        SyncContextBuilder::default()
    }
}

/// Builder for [`SyncContext`]. All bridge handles are required; flags,
/// clock, event bus, and user identity default to fresh instances.
#[derive(Default)]
pub struct SyncContextBuilder {
    catalog: Option<Arc<dyn RemoteCatalog>>,
    library: Option<Arc<dyn LocalLibrary>>,
    index: Option<Arc<dyn LibraryIndex>>,
    artifacts: Option<Arc<dyn ListArtifacts>>,
    notifications: Option<Arc<dyn NotificationQueue>>,
    settings: Option<Arc<dyn SettingsProvider>>,
    artwork: Option<Arc<dyn ArtworkFetcher>>,
    events: Option<EventBus>,
    flags: Option<Arc<EngineFlags>>,
    clock: Option<Arc<ClockOffset>>,
    user: Option<UserIdentity>,
}

impl SyncContextBuilder {
    pub fn catalog(mut self, catalog: Arc<dyn RemoteCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn library(mut self, library: Arc<dyn LocalLibrary>) -> Self {
        self.library = Some(library);
        self
    }

    pub fn index(mut self, index: Arc<dyn LibraryIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn artifacts(mut self, artifacts: Arc<dyn ListArtifacts>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn notifications(mut self, notifications: Arc<dyn NotificationQueue>) -> Self {
        self.notifications = Some(notifications);
        self
    }

    pub fn settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn artwork(mut self, artwork: Arc<dyn ArtworkFetcher>) -> Self {
        self.artwork = Some(artwork);
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn flags(mut self, flags: Arc<EngineFlags>) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn clock(mut self, clock: Arc<ClockOffset>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn user(mut self, user: UserIdentity) -> Self {
        self.user = Some(user);
        self
    }

    /// Finish the build. Panics if a required bridge handle is missing;
    /// wiring happens once at startup and a missing handle is a programming
    /// error, not a runtime condition.
    pub fn build(self) -> SyncContext {
        SyncContext {
            catalog: self.catalog.expect("catalog handle is required"),
            library: self.library.expect("library handle is required"),
            index: self.index.expect("index handle is required"),
            artifacts: self.artifacts.expect("artifacts handle is required"),
            notifications: self.notifications.expect("notification queue is required"),
            settings: self.settings.expect("settings provider is required"),
            artwork: self.artwork,
            events: self.events.unwrap_or_default(),
            flags: self.flags.unwrap_or_default(),
            clock: self.clock.unwrap_or_default(),
            user: self.user.unwrap_or_default(),
        }
    }
}
