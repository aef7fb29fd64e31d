//! # Sync Orchestrator
//!
//! Drives everything: schema validation, the startup sync, the scheduled
//! full passes, and the notification-driven incremental loop in between.
//!
//! ## Full pass structure
//!
//! A full pass is two sweeps over every enabled view:
//!
//! 1. **Additions first.** New items are fetched and applied so fresh
//!    content is available as early as possible; watched/resume state is
//!    backfilled from the server's leaf listings in the same sweep.
//! 2. **Reconciliation.** A compare sweep refreshes items whose checksum
//!    changed and removes local items the server no longer lists. A repair
//!    pass replaces this sweep with an unconditional refetch of everything
//!    and skips deletions.
//!
//! Shows sync in three phases (shows, seasons, episodes) and music in
//! three (artists, albums, tracks) so parents always exist before their
//! children are applied.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use bridge_traits::{
    CategoryStore, Checksum, Fetched, LibraryCategory, MediaKind, PlaystateUpdate, RemoteItem,
    ScanRequest, SectionFilter, StoredView, SyncSettings,
};
use core_runtime::SyncEvent;

use crate::clock::ClockReconciler;
use crate::context::SyncContext;
use crate::delta::{ApplyOp, DeltaMode, DeltaPlan};
use crate::error::{Result, SyncError};
use crate::fanart::{FanartQueue, FanartRequest};
use crate::notifications::EventProcessor;
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::views::ViewMaintainer;

/// Oldest local schema this engine can write to. Older stores must be
/// reset; sync halts until then.
pub const MIN_SCHEMA_VERSION: &str = "2.0.0";

/// Attempts for the startup sync before giving up until the next cycle.
const STARTUP_SYNC_ATTEMPTS: u32 = 3;

/// Delay before retrying after a failed pass.
const RETRY_INTERVAL_SECS: i64 = 60;

/// How often queued change events are processed.
const PENDING_TICK_SECS: i64 = 5;

/// Daily re-estimation of the remote clock offset.
const CLOCK_RESYNC_INTERVAL_SECS: i64 = 24 * 60 * 60;

/// Main loop granularity.
const LOOP_TICK: Duration = Duration::from_millis(100);

/// Pause granularity while suspended.
const SUSPEND_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Default, Clone, Copy)]
struct PassTotals {
    fetched: u64,
    applied: u64,
    failed: u64,
}

impl PassTotals {
    fn add(&mut self, outcome: &PipelineOutcome) {
        self.fetched += outcome.fetched;
        self.applied += outcome.applied;
        self.failed += outcome.failed;
    }
}

/// The engine's top-level driver. Construct once, then either call
/// [`full_sync`](Self::full_sync) directly or hand the orchestrator a task
/// via [`run`](Self::run).
pub struct SyncOrchestrator {
    ctx: SyncContext,
    views: Vec<StoredView>,
    fanart: Option<FanartQueue>,
    /// Local timestamp after which the next scheduled pass runs.
    next_sync_due: i64,
    last_clock_sync: i64,
}

impl SyncOrchestrator {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            views: Vec::new(),
            fanart: None,
            next_sync_due: 0,
            last_clock_sync: 0,
        }
    }

    /// Route artwork downloads for applied items to a fanart worker.
    pub fn with_fanart(mut self, queue: FanartQueue) -> Self {
        self.fanart = Some(queue);
        self
    }

    // ========================================================================
    // Schema
    // ========================================================================

    /// Validate the local schema, stamping fresh stores with the current
    /// version.
    pub async fn check_schema(&self) -> Result<()> {
        match self.ctx.library.schema_version().await? {
            None => {
                info!(version = MIN_SCHEMA_VERSION, "Initializing fresh local store");
                self.ctx.library.set_schema_version(MIN_SCHEMA_VERSION).await?;
                Ok(())
            }
            Some(current) if version_components(&current) < version_components(MIN_SCHEMA_VERSION) => {
                error!(
                    current = %current,
                    minimum = MIN_SCHEMA_VERSION,
                    "Local store schema is too old; reset required"
                );
                self.ctx.events.emit(SyncEvent::SchemaResetRequired {
                    current: current.clone(),
                    minimum: MIN_SCHEMA_VERSION.to_string(),
                });
                Err(SyncError::SchemaOutOfDate {
                    current,
                    minimum: MIN_SCHEMA_VERSION.to_string(),
                })
            }
            Some(_) => Ok(()),
        }
    }

    // ========================================================================
    // Full passes
    // ========================================================================

    /// Run one full sync pass over every enabled view.
    pub async fn full_sync(&mut self, repair: bool) -> Result<()> {
        let settings = self.ctx.settings.sync_settings().await;
        let label = if repair { "repair" } else { "full" };
        let started = std::time::Instant::now();

        info!(pass = label, "Sync pass starting");
        self.ctx.events.emit(SyncEvent::PassStarted {
            pass: label.to_string(),
        });
        self.ctx.flags.set_scan_in_progress(true);

        let result = self.run_sweeps(repair, &settings).await;
        self.ctx.flags.set_scan_in_progress(false);

        match result {
            Ok(totals) => {
                let duration_secs = started.elapsed().as_secs();
                info!(
                    pass = label,
                    fetched = totals.fetched,
                    applied = totals.applied,
                    failed = totals.failed,
                    duration_secs,
                    "Sync pass complete"
                );
                self.ctx.events.emit(SyncEvent::PassCompleted {
                    pass: label.to_string(),
                    items_fetched: totals.fetched,
                    items_applied: totals.applied,
                    items_failed: totals.failed,
                    duration_secs,
                });
                Ok(())
            }
            Err(SyncError::Cancelled) => {
                info!(pass = label, "Sync pass cancelled");
                self.ctx.events.emit(SyncEvent::Cancelled);
                Err(SyncError::Cancelled)
            }
            Err(e) => {
                warn!(pass = label, error = %e, "Sync pass failed");
                self.ctx.events.emit(SyncEvent::PassFailed {
                    pass: label.to_string(),
                    message: e.to_string(),
                    recoverable: e.is_recoverable(),
                });
                Err(e)
            }
        }
    }

    async fn run_sweeps(&mut self, repair: bool, settings: &SyncSettings) -> Result<PassTotals> {
        let mut totals = PassTotals::default();

        // Sweep 1: views, then additions with playstate backfill.
        self.views = ViewMaintainer::new(&self.ctx).maintain().await?;
        self.sweep_categories(DeltaMode::NewItemsOnly, true, settings, &mut totals)
            .await?;

        // Sweep 2: reconcile (or refetch everything under repair).
        let mode = if repair {
            DeltaMode::ForceAll
        } else {
            DeltaMode::Compare
        };
        self.sweep_categories(mode, false, settings, &mut totals).await?;

        Ok(totals)
    }

    async fn sweep_categories(
        &mut self,
        mode: DeltaMode,
        backfill_playstate: bool,
        settings: &SyncSettings,
        totals: &mut PassTotals,
    ) -> Result<()> {
        self.check_stop()?;
        self.sync_movies(mode, backfill_playstate, settings, totals).await?;
        self.check_stop()?;
        self.sync_shows(mode, backfill_playstate, settings, totals).await?;
        if settings.music_enabled {
            self.check_stop()?;
            self.sync_music(mode, backfill_playstate, settings, totals).await?;
        }
        Ok(())
    }

    async fn sync_movies(
        &self,
        mode: DeltaMode,
        backfill_playstate: bool,
        settings: &SyncSettings,
        totals: &mut PassTotals,
    ) -> Result<()> {
        let views = self.views_of_kind(MediaKind::Movie);
        if views.is_empty() {
            return Ok(());
        }

        // Everything but a repair sweep needs to know what is already
        // mirrored; repair refetches unconditionally.
        let local = if mode == DeltaMode::ForceAll {
            HashMap::new()
        } else {
            self.ctx.index.checksums(MediaKind::Movie).await?
        };

        let mut plan = DeltaPlan::new();
        for view in &views {
            self.check_stop()?;
            let items = self
                .section_listing(&view.id, SectionFilter::Default, &view.name)
                .await?;
            plan.scan(
                &items,
                &local,
                mode,
                ApplyOp::AddOrUpdate,
                Some(&view.id),
                Some(&view.name),
            );
        }

        let store = self.ctx.library.category(LibraryCategory::Movies).await?;
        let outcome = self
            .pipeline(settings)
            .run(
                Arc::clone(&self.ctx.catalog),
                Arc::clone(&store),
                LibraryCategory::Movies,
                plan.take_queue(),
            )
            .await?;
        if outcome.unauthorized {
            return Err(SyncError::Unauthorized);
        }
        totals.add(&outcome);

        if mode.derives_deletions() {
            self.remove_gone(&plan, &local, store.as_ref()).await;
        }
        if backfill_playstate {
            for view in &views {
                self.reconcile_playstate(view, store.as_ref()).await?;
            }
        }
        Ok(())
    }

    async fn sync_shows(
        &self,
        mode: DeltaMode,
        backfill_playstate: bool,
        settings: &SyncSettings,
        totals: &mut PassTotals,
    ) -> Result<()> {
        let views = self.views_of_kind(MediaKind::Show);
        if views.is_empty() {
            return Ok(());
        }

        let local = if mode == DeltaMode::ForceAll {
            HashMap::new()
        } else {
            let mut merged = self.ctx.index.checksums(MediaKind::Show).await?;
            merged.extend(self.ctx.index.checksums(MediaKind::Season).await?);
            merged.extend(self.ctx.index.checksums(MediaKind::Episode).await?);
            merged
        };

        let store = self.ctx.library.category(LibraryCategory::Shows).await?;
        let mut plan = DeltaPlan::new();

        // Phase 1: the shows themselves. Listings are kept so seasons can
        // be enumerated per surviving show afterwards.
        let mut show_rows: Vec<(RemoteItem, String, String)> = Vec::new();
        for view in &views {
            self.check_stop()?;
            let items = self
                .section_listing(&view.id, SectionFilter::Default, &view.name)
                .await?;
            plan.scan(
                &items,
                &local,
                mode,
                ApplyOp::AddOrUpdate,
                Some(&view.id),
                Some(&view.name),
            );
            show_rows.extend(
                items
                    .into_iter()
                    .filter(|i| i.id.is_some())
                    .map(|i| (i, view.id.clone(), view.name.clone())),
            );
        }
        let outcome = self
            .pipeline(settings)
            .run(
                Arc::clone(&self.ctx.catalog),
                Arc::clone(&store),
                LibraryCategory::Shows,
                plan.take_queue(),
            )
            .await?;
        if outcome.unauthorized {
            return Err(SyncError::Unauthorized);
        }
        totals.add(&outcome);

        // Phase 2: seasons of every listed show.
        for (show, view_id, view_name) in &show_rows {
            self.check_stop()?;
            let show_id = show.id.as_deref().unwrap_or_default();
            let seasons = match self.ctx.catalog.fetch_children(show_id).await {
                Ok(Fetched::Ok(seasons)) => seasons,
                Ok(Fetched::Unauthorized) => return Err(SyncError::Unauthorized),
                Ok(Fetched::NotFound) => continue,
                Err(e) => {
                    warn!(show_id, error = %e, "Season listing failed, skipping show");
                    continue;
                }
            };
            plan.scan(
                &seasons,
                &local,
                mode,
                ApplyOp::AddSeason,
                Some(view_id),
                Some(view_name),
            );
        }
        let outcome = self
            .pipeline(settings)
            .run(
                Arc::clone(&self.ctx.catalog),
                Arc::clone(&store),
                LibraryCategory::Shows,
                plan.take_queue(),
            )
            .await?;
        if outcome.unauthorized {
            return Err(SyncError::Unauthorized);
        }
        totals.add(&outcome);

        // Phase 3: episodes, via the per-view leaf listing.
        for view in &views {
            self.check_stop()?;
            let leaves = match self.ctx.catalog.fetch_leaves(&view.id, None).await {
                Ok(Fetched::Ok(leaves)) => leaves,
                Ok(Fetched::Unauthorized) => return Err(SyncError::Unauthorized),
                Ok(Fetched::NotFound) => continue,
                Err(e) => {
                    warn!(view = %view.name, error = %e, "Episode listing failed, skipping view");
                    continue;
                }
            };
            let listings: Vec<RemoteItem> = leaves.iter().map(|p| p.as_listing()).collect();
            plan.scan(
                &listings,
                &local,
                mode,
                ApplyOp::AddEpisode,
                Some(&view.id),
                Some(&view.name),
            );
        }
        let outcome = self
            .pipeline(settings)
            .run(
                Arc::clone(&self.ctx.catalog),
                Arc::clone(&store),
                LibraryCategory::Shows,
                plan.take_queue(),
            )
            .await?;
        if outcome.unauthorized {
            return Err(SyncError::Unauthorized);
        }
        totals.add(&outcome);

        if mode.derives_deletions() {
            self.remove_gone(&plan, &local, store.as_ref()).await;
        }
        if backfill_playstate {
            for view in &views {
                self.reconcile_playstate(view, store.as_ref()).await?;
            }
        }
        Ok(())
    }

    async fn sync_music(
        &self,
        mode: DeltaMode,
        backfill_playstate: bool,
        settings: &SyncSettings,
        totals: &mut PassTotals,
    ) -> Result<()> {
        let views = self.views_of_kind(MediaKind::Artist);
        if views.is_empty() {
            return Ok(());
        }

        let local = if mode == DeltaMode::ForceAll {
            HashMap::new()
        } else {
            let mut merged = self.ctx.index.checksums(MediaKind::Artist).await?;
            merged.extend(self.ctx.index.checksums(MediaKind::Album).await?);
            merged.extend(self.ctx.index.checksums(MediaKind::Track).await?);
            merged
        };

        let store = self.ctx.library.category(LibraryCategory::Music).await?;
        let mut plan = DeltaPlan::new();

        // Parents strictly before children: artists, albums, tracks.
        let phases = [
            (SectionFilter::Artists, ApplyOp::AddOrUpdate),
            (SectionFilter::Albums, ApplyOp::AddAlbum),
            (SectionFilter::Tracks, ApplyOp::AddTrack),
        ];
        for (filter, op) in phases {
            for view in &views {
                self.check_stop()?;
                let items = self.section_listing(&view.id, filter, &view.name).await?;
                plan.scan(&items, &local, mode, op, Some(&view.id), Some(&view.name));
            }
            let outcome = self
                .pipeline(settings)
                .run(
                    Arc::clone(&self.ctx.catalog),
                    Arc::clone(&store),
                    LibraryCategory::Music,
                    plan.take_queue(),
                )
                .await?;
            if outcome.unauthorized {
                return Err(SyncError::Unauthorized);
            }
            totals.add(&outcome);
        }

        if mode.derives_deletions() {
            self.remove_gone(&plan, &local, store.as_ref()).await;
        }
        if backfill_playstate {
            for view in &views {
                self.reconcile_playstate(view, store.as_ref()).await?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Shared pass helpers
    // ========================================================================

    fn views_of_kind(&self, kind: MediaKind) -> Vec<StoredView> {
        self.views
            .iter()
            .filter(|v| v.kind == kind && v.sync_enabled)
            .cloned()
            .collect()
    }

    fn pipeline(&self, settings: &SyncSettings) -> Pipeline {
        Pipeline::new(
            Arc::clone(&self.ctx.flags),
            self.ctx.events.clone(),
            settings.worker_count,
        )
        .with_progress(settings.progress_reports_enabled)
        .with_fanart(if settings.fanart_enabled {
            self.fanart.clone()
        } else {
            None
        })
    }

    async fn section_listing(
        &self,
        view_id: &str,
        filter: SectionFilter,
        view_name: &str,
    ) -> Result<Vec<RemoteItem>> {
        match self.ctx.catalog.fetch_section_items(view_id, filter).await {
            Ok(Fetched::Ok(items)) => Ok(items),
            Ok(Fetched::Unauthorized) => Err(SyncError::Unauthorized),
            Ok(Fetched::NotFound) => {
                warn!(view = view_name, "Section listing missing, skipping view");
                Ok(vec![])
            }
            Err(e) => {
                warn!(view = view_name, error = %e, "Section listing failed, skipping view");
                Ok(vec![])
            }
        }
    }

    /// Remove local items the remote stopped listing. Failures are logged
    /// and retried implicitly on the next compare sweep.
    async fn remove_gone(
        &self,
        plan: &DeltaPlan,
        local: &HashMap<String, Checksum>,
        store: &dyn CategoryStore,
    ) {
        for id in plan.deletions(local) {
            debug!(item_id = %id, "Removing item no longer on server");
            match store.remove(&id).await {
                Ok(()) => self.ctx.events.emit(SyncEvent::ItemRemoved { item_id: id }),
                Err(e) => warn!(item_id = %id, error = %e, "Remove failed"),
            }
        }
    }

    /// Copy watched/resume state from the server's leaf listing onto
    /// already-mirrored items.
    async fn reconcile_playstate(&self, view: &StoredView, store: &dyn CategoryStore) -> Result<()> {
        let leaves = match self.ctx.catalog.fetch_leaves(&view.id, None).await {
            Ok(Fetched::Ok(leaves)) => leaves,
            Ok(Fetched::Unauthorized) => return Err(SyncError::Unauthorized),
            Ok(Fetched::NotFound) => return Ok(()),
            Err(e) => {
                warn!(view = %view.name, error = %e, "Leaf listing failed, skipping playstate backfill");
                return Ok(());
            }
        };

        for payload in leaves {
            let ud = &payload.user_data;
            if ud.view_count.is_none() && ud.view_offset.is_none() && ud.last_viewed_at.is_none() {
                continue;
            }
            let Some(record) = self.ctx.index.record(&payload.id).await? else {
                continue;
            };

            let duration = ud.duration.unwrap_or(0);
            let mut view_offset = ud.view_offset.unwrap_or(0);
            // Some server versions report the offset in milliseconds.
            if duration > 0 && view_offset > duration {
                view_offset /= 1000;
            }

            let update = PlaystateUpdate {
                remote_id: record.remote_id.clone(),
                local_id: record.local_id,
                file_id: record.local_file_id,
                kind: record.kind,
                view_offset,
                play_count: ud.view_count.unwrap_or(0),
                duration,
                last_played: ud
                    .last_viewed_at
                    .map(|ts| self.ctx.clock.to_local(ts))
                    .unwrap_or_else(|| Utc::now().timestamp()),
            };
            if let Err(e) = store.update_playstate(&update).await {
                warn!(item_id = %record.remote_id, error = %e, "Playstate backfill failed for item");
            }
        }
        Ok(())
    }

    fn check_stop(&self) -> Result<()> {
        if self.ctx.flags.is_stopped() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Scheduled loop
    // ========================================================================

    /// Run the engine until stopped: startup sync with retries, scheduled
    /// full passes, daily clock re-estimation, and the notification loop.
    pub async fn run(&mut self) -> Result<()> {
        self.check_schema().await?;

        if let Err(e) = ClockReconciler::new(&self.ctx).reconcile().await {
            warn!(error = %e, "Clock offset estimation failed; remote timestamps taken as-is");
        }
        self.last_clock_sync = Utc::now().timestamp();

        self.startup_sync().await?;

        let settings = self.ctx.settings.sync_settings().await;
        if settings.fanart_enabled {
            self.queue_missing_fanart().await;
        }

        let mut processor = EventProcessor::new(self.ctx.clone()).with_fanart(self.fanart.clone());
        let mut last_pending_tick = 0i64;
        let mut notifications_alive = true;

        loop {
            if self.ctx.flags.is_stopped() {
                info!("Sync engine stopping");
                return Ok(());
            }
            if self.ctx.flags.is_suspended() {
                self.idle(SUSPEND_TICK).await;
                continue;
            }

            let settings = self.ctx.settings.sync_settings().await;
            let now = Utc::now().timestamp();

            if let Some(request) = self.ctx.settings.take_scan_request().await {
                let repair = matches!(request, ScanRequest::Repair);
                self.scheduled_pass(repair).await?;
            } else if now >= self.next_sync_due {
                self.scheduled_pass(false).await?;
            } else if now - self.last_clock_sync >= CLOCK_RESYNC_INTERVAL_SECS {
                if let Err(e) = ClockReconciler::new(&self.ctx).reconcile().await {
                    warn!(error = %e, "Scheduled clock re-estimation failed");
                }
                self.last_clock_sync = now;
            }

            if settings.background_sync_enabled && notifications_alive {
                loop {
                    match self.ctx.notifications.try_recv().await {
                        Ok(Some(message)) => {
                            if let Err(e) = processor.handle_message(message).await {
                                warn!(error = %e, "Notification handling failed");
                            }
                        }
                        Ok(None) => break,
                        Err(_) => {
                            warn!("Notification transport closed; background sync disabled");
                            notifications_alive = false;
                            break;
                        }
                    }
                }
                if now - last_pending_tick >= PENDING_TICK_SECS {
                    last_pending_tick = now;
                    if let Err(e) = processor.process_pending().await {
                        warn!(error = %e, "Pending change events failed this round");
                    }
                }
            }

            self.idle(LOOP_TICK).await;
        }
    }

    /// Initial full sync, retried a few times before the engine settles
    /// into the scheduled loop.
    async fn startup_sync(&mut self) -> Result<()> {
        for attempt in 1..=STARTUP_SYNC_ATTEMPTS {
            match self.full_sync(false).await {
                Ok(()) => {
                    self.mark_synced().await;
                    return Ok(());
                }
                Err(SyncError::Cancelled) => return Ok(()),
                Err(e @ SyncError::SchemaOutOfDate { .. }) => return Err(e),
                Err(e) => {
                    warn!(attempt, error = %e, "Startup sync failed");
                    self.idle(Duration::from_secs(1)).await;
                }
            }
        }
        self.ctx.events.emit(SyncEvent::Warning {
            message: "Initial synchronization failed; will keep retrying in the background"
                .to_string(),
        });
        self.next_sync_due = Utc::now().timestamp() + RETRY_INTERVAL_SECS;
        Ok(())
    }

    async fn scheduled_pass(&mut self, repair: bool) -> Result<()> {
        match self.full_sync(repair).await {
            Ok(()) => {
                self.mark_synced().await;
                Ok(())
            }
            Err(SyncError::Cancelled) => Ok(()),
            Err(e @ SyncError::SchemaOutOfDate { .. }) => Err(e),
            Err(_) => {
                // Already logged and surfaced by full_sync.
                self.next_sync_due = Utc::now().timestamp() + RETRY_INTERVAL_SECS;
                Ok(())
            }
        }
    }

    async fn mark_synced(&mut self) {
        let interval = self.ctx.settings.sync_settings().await.full_sync_interval_secs;
        self.next_sync_due = Utc::now().timestamp() + interval as i64;
    }

    async fn queue_missing_fanart(&self) {
        let Some(queue) = &self.fanart else { return };
        match self.ctx.index.missing_fanart().await {
            Ok(missing) => {
                if !missing.is_empty() {
                    info!(count = missing.len(), "Queueing items with missing artwork");
                }
                for (remote_id, kind) in missing {
                    queue.push(FanartRequest {
                        remote_id,
                        kind,
                        refresh: false,
                    });
                }
            }
            Err(e) => warn!(error = %e, "Could not list items with missing artwork"),
        }
    }

    async fn idle(&self, duration: Duration) {
        let token = self.ctx.flags.stop_token();
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }
}

/// Parse a dotted version string into comparable components; missing or
/// malformed parts count as zero.
fn version_components(version: &str) -> (u64, u64, u64) {
    let mut parts = version
        .split('.')
        .map(|p| p.trim().parse::<u64>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}
