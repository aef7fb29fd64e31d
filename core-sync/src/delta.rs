//! # Delta Computation
//!
//! Decides which remote items need a full metadata fetch, by comparing the
//! shallow section listing against the checksums already recorded in the
//! local mirror.
//!
//! ## Overview
//!
//! A [`DeltaPlan`] accumulates one category's listings across views and
//! phases. Each scanned listing contributes work items to the fetch queue
//! according to the [`DeltaMode`], and every seen id is recorded in the
//! remote index so deletions can be derived afterwards (everything local
//! that the remote no longer lists). Placeholder rows without a stable id
//! are skipped on both sides.

use std::collections::{HashMap, HashSet};

use bridge_traits::{Checksum, MediaKind, RemoteItem};

// ============================================================================
// Apply Operations
// ============================================================================

/// The local-store operation a fetched payload is applied with.
///
/// A closed set: the apply worker dispatches on this enum rather than on
/// stringly-typed method names, so an unhandled kind is a compile error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOp {
    /// The category's primary kind (movie, show, artist, photo).
    AddOrUpdate,
    AddSeason,
    AddEpisode,
    AddAlbum,
    AddTrack,
}

// ============================================================================
// Delta Mode
// ============================================================================

/// How listings are compared against the local mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaMode {
    /// Queue only items the mirror has never seen. Stale items are left
    /// alone; deletions are not derived.
    NewItemsOnly,
    /// Queue new and stale items; derive deletions afterwards.
    Compare,
    /// Queue every listed item unconditionally (repair).
    ForceAll,
}

impl DeltaMode {
    /// Deletions are only meaningful when the listing was actually compared
    /// against the mirror.
    pub fn derives_deletions(&self) -> bool {
        matches!(self, Self::Compare)
    }
}

// ============================================================================
// Work Items
// ============================================================================

/// One queued fetch-and-apply unit.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub item_id: String,
    pub op: ApplyOp,
    pub kind: Option<MediaKind>,
    pub view_id: Option<String>,
    /// View name at scan time, used as the tag applied items are filed
    /// under and surfaced in progress reports.
    pub view_name: Option<String>,
    pub title: String,
}

// ============================================================================
// Delta Plan
// ============================================================================

/// Accumulated fetch queue and remote-id index for one category pass.
#[derive(Debug, Default)]
pub struct DeltaPlan {
    /// Every stable id seen in any scanned listing this pass.
    seen: HashSet<String>,
    queue: Vec<WorkItem>,
}

impl DeltaPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare one listing against the mirror and queue the items that need
    /// fetching.
    pub fn scan(
        &mut self,
        items: &[RemoteItem],
        local: &HashMap<String, Checksum>,
        mode: DeltaMode,
        op: ApplyOp,
        view_id: Option<&str>,
        view_name: Option<&str>,
    ) {
        for item in items {
            let Some(id) = item.id.as_deref() else {
                continue;
            };
            self.seen.insert(id.to_string());

            let needed = match mode {
                DeltaMode::ForceAll => true,
                DeltaMode::NewItemsOnly => !local.contains_key(id),
                DeltaMode::Compare => match local.get(id) {
                    None => true,
                    Some(stored) => item.checksum().as_ref() != Some(stored),
                },
            };

            if needed {
                self.queue.push(WorkItem {
                    item_id: id.to_string(),
                    op,
                    kind: item.kind,
                    view_id: view_id.map(str::to_string),
                    view_name: view_name.map(str::to_string),
                    title: item.title.clone(),
                });
            }
        }
    }

    /// Whether an id was seen in any scanned listing. Used by container
    /// phases to enumerate children only for parents that still exist.
    pub fn has_seen(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Drain the accumulated queue for a pipeline run. The seen-id index is
    /// kept so a plan can span several phases (shows, then seasons, then
    /// episodes) and still derive deletions over the whole category.
    pub fn take_queue(&mut self) -> Vec<WorkItem> {
        std::mem::take(&mut self.queue)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Local ids the remote no longer lists, in no particular order.
    pub fn deletions(&self, local: &HashMap<String, Checksum>) -> Vec<String> {
        local
            .keys()
            .filter(|id| !self.seen.contains(*id))
            .cloned()
            .collect()
    }
}
