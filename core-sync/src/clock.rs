//! # Clock Reconciliation
//!
//! The remote server timestamps playback with its own clock, which may
//! drift arbitrarily from ours. The reconciler estimates `local - remote`
//! empirically: it picks an unplayed probe item, toggles its watched flag
//! on the server, reads back the `last_viewed_at` the server recorded for
//! that toggle, and compares it with our own clock. The probe's watched
//! flag is restored afterwards.
//!
//! Estimation fails closed: with no usable probe item (empty library,
//! everything played) the offset stays at its last known value and the
//! caller decides how loudly to complain.

use chrono::Utc;
use tracing::{debug, info, warn};

use bridge_traits::{Fetched, MediaKind};

use crate::context::SyncContext;
use crate::error::{Result, SyncError};

/// Section kinds searched for a probe item.
const PROBE_KINDS: [MediaKind; 3] = [MediaKind::Movie, MediaKind::Show, MediaKind::Artist];

/// Grace subtracted from the `viewed_since` readback filter, covering the
/// case where the server clock is slightly ahead of ours.
const READBACK_SLACK_SECS: i64 = 5 * 60;

pub struct ClockReconciler<'a> {
    ctx: &'a SyncContext,
}

impl<'a> ClockReconciler<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Estimate the clock offset and store it in the shared [`ClockOffset`].
    ///
    /// Returns the measured offset in seconds.
    ///
    /// [`ClockOffset`]: crate::context::ClockOffset
    pub async fn reconcile(&self) -> Result<i64> {
        let sections = match self.ctx.catalog.list_sections().await? {
            Fetched::Ok(sections) => sections,
            Fetched::Unauthorized => return Err(SyncError::Unauthorized),
            Fetched::NotFound => {
                return Err(SyncError::ClockSyncUnavailable(
                    "section listing unavailable".to_string(),
                ))
            }
        };

        for section in sections.iter().filter(|s| PROBE_KINDS.contains(&s.kind)) {
            let leaves = match self.ctx.catalog.fetch_leaves(&section.id, None).await {
                Ok(Fetched::Ok(leaves)) => leaves,
                Ok(Fetched::Unauthorized) => return Err(SyncError::Unauthorized),
                Ok(Fetched::NotFound) => continue,
                Err(e) => {
                    warn!(view = %section.name, error = %e, "Leaf listing failed, trying next section");
                    continue;
                }
            };

            // An unplayed, never-resumed item: toggling it is invisible to
            // the user once restored.
            let Some(probe) = leaves.iter().find(|p| {
                p.user_data.view_count.unwrap_or(0) == 0 && p.user_data.view_offset.is_none()
            }) else {
                continue;
            };

            match self.probe_offset(&section.id, &probe.id).await {
                Ok(offset) => {
                    info!(offset_secs = offset, "Remote clock offset estimated");
                    self.ctx.clock.set(offset);
                    return Ok(offset);
                }
                Err(e) => {
                    debug!(item_id = %probe.id, error = %e, "Probe failed, trying next section");
                }
            }
        }

        Err(SyncError::ClockSyncUnavailable(
            "no unplayed item available as a probe".to_string(),
        ))
    }

    async fn probe_offset(&self, view_id: &str, probe_id: &str) -> Result<i64> {
        let local_ts = Utc::now().timestamp();
        self.ctx.catalog.set_watched(probe_id, true).await?;

        let readback = self
            .ctx
            .catalog
            .fetch_leaves(view_id, Some(local_ts - READBACK_SLACK_SECS))
            .await;

        // Restore the flag before looking at the result; the probe must not
        // leave a trace even when the readback failed.
        if let Err(e) = self.ctx.catalog.set_watched(probe_id, false).await {
            warn!(item_id = %probe_id, error = %e, "Could not restore probe watched flag");
        }

        let leaves = match readback? {
            Fetched::Ok(leaves) => leaves,
            Fetched::Unauthorized => return Err(SyncError::Unauthorized),
            Fetched::NotFound => {
                return Err(SyncError::ClockSyncUnavailable(
                    "readback listing unavailable".to_string(),
                ))
            }
        };

        let remote_ts = leaves
            .iter()
            .find(|p| p.id == probe_id)
            .and_then(|p| p.user_data.last_viewed_at)
            .ok_or_else(|| {
                SyncError::ClockSyncUnavailable(
                    "probe item missing from readback; clocks differ too much".to_string(),
                )
            })?;

        Ok(local_ts - remote_ts)
    }
}
