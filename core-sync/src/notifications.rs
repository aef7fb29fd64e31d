//! # Notification-Driven Sync
//!
//! Keeps the mirror current between full passes by reacting to the
//! server's push notifications.
//!
//! ## Timeline messages
//!
//! Catalog changes arrive as timeline entries. An entry is queued as a
//! [`PendingEvent`] when it is actionable: a deletion, or a leaf item the
//! server has finished processing. New-item events are held back for a
//! safety margin after arrival because the server keeps enriching metadata
//! for a while after it first announces an item; deletions skip the margin.
//! Repeat notifications for the same item merge into the queued event
//! (latest state wins) rather than queueing twice. An event that keeps
//! failing is dropped after a bounded number of attempts so the queue
//! cannot wedge.
//!
//! ## Playing messages
//!
//! Playback-state reports update local watched/resume state, but only for
//! sessions attributable to the configured user (see [`sessions`]).
//!
//! [`sessions`]: crate::sessions

use chrono::Utc;
use tracing::{debug, warn};

use bridge_traits::{
    Fetched, MediaKind, NotificationMessage, PlayState, PlayingEntry, PlaystateUpdate,
    TimelineEntry, TimelineState,
};
use core_runtime::SyncEvent;

use crate::context::SyncContext;
use crate::error::Result;
use crate::fanart::{FanartQueue, FanartRequest};
use crate::sessions::{session_is_ours, SessionCache};

/// Attempts before a failing event is dropped.
const MAX_EVENT_ATTEMPTS: u32 = 3;

/// Timeline entries from the server's DVR subsystem reuse ids and are
/// never mirrored.
const DVR_IDENTIFIER_MARKER: &str = "tv.plex";

/// One queued catalog change awaiting processing.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    pub item_id: String,
    pub kind: Option<MediaKind>,
    pub state: TimelineState,
    /// Local Unix timestamp of the (latest) notification.
    pub queued_at: i64,
    pub attempts: u32,
}

/// Consumes decoded notifications and applies them to the mirror.
pub struct EventProcessor {
    ctx: SyncContext,
    pending: Vec<PendingEvent>,
    sessions: SessionCache,
    fanart: Option<FanartQueue>,
}

impl EventProcessor {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            pending: Vec::new(),
            sessions: SessionCache::new(),
            fanart: None,
        }
    }

    /// Queue fanart downloads for items added through notifications.
    pub fn with_fanart(mut self, queue: Option<FanartQueue>) -> Self {
        self.fanart = queue;
        self
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Ingest one decoded message. Timeline entries are queued; playing
    /// entries are handled immediately.
    pub async fn handle_message(&mut self, message: NotificationMessage) -> Result<()> {
        match message {
            NotificationMessage::Timeline(entries) => {
                let now = Utc::now().timestamp();
                for entry in entries {
                    self.queue_timeline(entry, now);
                }
                Ok(())
            }
            NotificationMessage::Playing(entries) => {
                for entry in entries {
                    self.handle_playing(entry).await?;
                }
                Ok(())
            }
        }
    }

    fn queue_timeline(&mut self, entry: TimelineEntry, now: i64) {
        if entry.identifier.contains(DVR_IDENTIFIER_MARKER) {
            debug!(identifier = %entry.identifier, "Ignoring DVR timeline entry");
            return;
        }

        let Some(state) = TimelineState::from_wire_code(entry.state_code) else {
            debug!(code = entry.state_code, "Unknown timeline state code");
            return;
        };
        let kind = MediaKind::from_wire_code(entry.type_code);

        // Only two states are actionable; everything else is the server
        // narrating its own processing.
        let actionable = match state {
            TimelineState::Deleted => kind.is_some(),
            TimelineState::Finished => kind.map_or(false, |k| k.is_leaf()),
            _ => false,
        };
        if !actionable {
            return;
        }

        let item_id = match entry.item_id.as_deref() {
            Some(id) if id != "0" => id.to_string(),
            _ => {
                warn!(?entry, "Malformed timeline entry without an item id");
                return;
            }
        };

        if let Some(existing) = self.pending.iter_mut().find(|e| e.item_id == item_id) {
            // Latest state wins; the margin restarts from the newest
            // notification since the server is clearly still working.
            existing.state = state;
            existing.kind = kind;
            existing.queued_at = now;
            return;
        }

        self.pending.push(PendingEvent {
            item_id,
            kind,
            state,
            queued_at: now,
            attempts: 0,
        });
    }

    /// Process queued events that are ripe. Deletions are always ripe;
    /// additions wait out the configured safety margin.
    pub async fn process_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let margin = self.ctx.settings.sync_settings().await.safety_margin_secs as i64;
        let now = Utc::now().timestamp();

        let events = std::mem::take(&mut self.pending);
        for mut event in events {
            if self.ctx.flags.is_stopped() {
                self.pending.push(event);
                continue;
            }

            let ripe =
                event.state == TimelineState::Deleted || now - event.queued_at >= margin;
            if !ripe {
                self.pending.push(event);
                continue;
            }

            let done = if event.state == TimelineState::Deleted {
                self.remove_item(&event).await
            } else {
                self.apply_new_item(&event).await
            };

            if !done {
                event.attempts += 1;
                if event.attempts >= MAX_EVENT_ATTEMPTS {
                    warn!(
                        item_id = %event.item_id,
                        attempts = event.attempts,
                        "Dropping change event that keeps failing"
                    );
                } else {
                    self.pending.push(event);
                }
            }
        }
        Ok(())
    }

    /// Fetch and apply one announced item. `false` schedules a retry.
    async fn apply_new_item(&self, event: &PendingEvent) -> bool {
        let payload = match self.ctx.catalog.fetch_item(&event.item_id).await {
            Ok(Fetched::Ok(payload)) => payload,
            Ok(Fetched::NotFound) => {
                debug!(item_id = %event.item_id, "Announced item not on server yet");
                return false;
            }
            Ok(Fetched::Unauthorized) => {
                warn!("Remote server rejected credentials while processing a change event");
                return false;
            }
            Err(e) => {
                warn!(item_id = %event.item_id, error = %e, "Change event fetch failed");
                return false;
            }
        };

        let Some(category) = payload.kind.category() else {
            return true;
        };
        let store = match self.ctx.library.category(category).await {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, "Could not acquire store handle");
                return false;
            }
        };

        let view_tag = payload.library_section_title.as_deref();
        let view_id = payload.library_section_id.as_deref();
        let result = match payload.kind {
            MediaKind::Movie => store.add_or_update(&payload, view_tag, view_id).await,
            MediaKind::Episode => store.add_episode(&payload, view_tag, view_id).await,
            MediaKind::Track => store.add_track(&payload, view_tag, view_id).await,
            // Container kinds are refreshed implicitly by their leaves.
            _ => {
                debug!(item_id = %payload.id, kind = %payload.kind, "Ignoring non-leaf change event");
                return true;
            }
        };

        match result {
            Ok(()) => {
                self.ctx.events.emit(SyncEvent::ItemApplied {
                    item_id: payload.id.clone(),
                    kind: payload.kind.to_string(),
                });
                if let Some(queue) = &self.fanart {
                    if payload.kind == MediaKind::Movie {
                        queue.push(FanartRequest {
                            remote_id: payload.id,
                            kind: MediaKind::Movie,
                            refresh: false,
                        });
                    }
                }
                true
            }
            Err(e) => {
                warn!(item_id = %payload.id, error = %e, "Change event apply failed");
                false
            }
        }
    }

    async fn remove_item(&self, event: &PendingEvent) -> bool {
        let Some(category) = event.kind.and_then(|k| k.category()) else {
            return true;
        };
        let store = match self.ctx.library.category(category).await {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, "Could not acquire store handle");
                return false;
            }
        };

        match store.remove(&event.item_id).await {
            Ok(()) => {
                self.ctx.events.emit(SyncEvent::ItemRemoved {
                    item_id: event.item_id.clone(),
                });
                true
            }
            Err(e) => {
                warn!(item_id = %event.item_id, error = %e, "Change event remove failed");
                false
            }
        }
    }

    async fn handle_playing(&mut self, entry: PlayingEntry) -> Result<()> {
        if entry.state == PlayState::Buffering {
            return Ok(());
        }

        let Some(record) = self.ctx.index.record(&entry.item_id).await? else {
            debug!(item_id = %entry.item_id, "Playback report for an unmirrored item");
            return Ok(());
        };

        let mut session = if self.ctx.user.server_owned {
            let Some(session) = self.sessions.resolve(&self.ctx, &entry.session_key).await? else {
                warn!(session_key = %entry.session_key, "Playback session could not be identified");
                return Ok(());
            };
            let policy = self.ctx.settings.sync_settings().await.owner_match;
            if !session_is_ours(&session, &self.ctx.user, policy) {
                debug!(
                    session_user = %session.user_name,
                    "Ignoring another user's playback"
                );
                return Ok(());
            }
            session
        } else {
            // A shared server exposes no session listing; every report the
            // player forwards is the local user's.
            self.sessions
                .resolve(&self.ctx, &entry.session_key)
                .await?
                .unwrap_or_default()
        };

        // The session listing often omits the duration; fill it once from a
        // metadata fetch and keep the enriched entry cached.
        if session.duration.is_none() {
            if let Ok(Fetched::Ok(payload)) = self.ctx.catalog.fetch_item(&entry.item_id).await {
                session.duration = payload.user_data.duration;
                if session.view_count.is_none() {
                    session.view_count = payload.user_data.view_count;
                }
                self.sessions.update(&entry.session_key, session.clone());
            }
        }

        let duration = session.duration.unwrap_or(0);
        let mut view_offset = entry.view_offset;
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
            play_count: session.view_count.unwrap_or(0),
            duration,
            last_played: Utc::now().timestamp(),
        };

        let Some(category) = record.kind.category() else {
            return Ok(());
        };
        let store = self.ctx.library.category(category).await?;
        if let Err(e) = store.update_playstate(&update).await {
            warn!(item_id = %record.remote_id, error = %e, "Playstate update failed");
        }
        Ok(())
    }
}
