//! Settings Provider
//!
//! Read-only access to the handful of user preferences the sync engine
//! consumes. Persistence and the settings UI live elsewhere; the engine
//! re-reads values at the start of each cycle so changes take effect
//! without a restart.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How to decide whether a remote playback session belongs to the
/// configured local user.
///
/// The remote server sometimes reports the server owner's sessions with
/// user id "1". When no account token is configured the engine cannot
/// compare identities, so `TrustOwnerIdOne` treats those sessions as ours.
/// Deployments with several unauthenticated local users should use
/// `RequireExact`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerMatchPolicy {
    #[default]
    TrustOwnerIdOne,
    RequireExact,
}

/// Snapshot of all engine-relevant settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Number of concurrent fetch workers.
    pub worker_count: usize,
    /// Minimum seconds to wait after a change notification before fetching
    /// the (possibly still-processing) item.
    pub safety_margin_secs: u64,
    /// Seconds between scheduled full syncs.
    pub full_sync_interval_secs: u64,
    /// Whether music sections are synchronized at all.
    pub music_enabled: bool,
    /// Whether background (notification-driven) sync is enabled.
    pub background_sync_enabled: bool,
    /// Whether to fetch additional fanart in the background.
    pub fanart_enabled: bool,
    /// Whether progress is reported while syncing.
    pub progress_reports_enabled: bool,
    pub owner_match: OwnerMatchPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            worker_count: 3,
            safety_margin_secs: 30,
            full_sync_interval_secs: 60 * 60,
            music_enabled: false,
            background_sync_enabled: true,
            fanart_enabled: false,
            progress_reports_enabled: true,
            owner_match: OwnerMatchPolicy::default(),
        }
    }
}

/// Read-only settings accessor.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    /// Current settings snapshot.
    async fn sync_settings(&self) -> SyncSettings;

    /// A pending manual scan request ("full" or "repair"), consumed on read.
    async fn take_scan_request(&self) -> Option<ScanRequest>;
}

/// Manual scan trigger set from outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanRequest {
    Full,
    Repair,
}

/// Fixed settings backed by an in-memory snapshot. Used in tests and by
/// embedders that manage preferences themselves.
pub struct StaticSettings {
    settings: SyncSettings,
    scan_request: std::sync::Mutex<Option<ScanRequest>>,
}

impl StaticSettings {
    pub fn new(settings: SyncSettings) -> Self {
        Self {
            settings,
            scan_request: std::sync::Mutex::new(None),
        }
    }

    /// Queue a manual scan request for the next orchestrator cycle.
    pub fn request_scan(&self, request: ScanRequest) {
        if let Ok(mut slot) = self.scan_request.lock() {
            *slot = Some(request);
        }
    }
}

#[async_trait]
impl SettingsProvider for StaticSettings {
    async fn sync_settings(&self) -> SyncSettings {
        self.settings.clone()
    }

    async fn take_scan_request(&self) -> Option<ScanRequest> {
        self.scan_request.lock().ok().and_then(|mut slot| slot.take())
    }
}
