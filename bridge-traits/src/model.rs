//! # Shared Data Model
//!
//! Types exchanged between the sync engine and its external collaborators:
//! the remote catalog server, the local library store, and the inbound
//! notification channel.
//!
//! ## Checksums
//!
//! Change detection relies on a cheap fingerprint rather than content
//! hashing: the composite of an item's stable id and its last-modified
//! timestamp. Two equal checksums mean no work is needed for that item.
//! Items without a stable id (synthetic placeholder rows such as an
//! "all episodes" entry) have no checksum and are excluded from sync
//! entirely.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Media Kinds
// ============================================================================

/// The kind of a remote library item.
///
/// Wire codes follow the remote server's timeline notification `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Container,
    Movie,
    Show,
    Season,
    Episode,
    Artist,
    Album,
    Track,
    Photo,
}

/// Which local library category a kind belongs to.
///
/// The apply stage runs exactly one writer per category, so the category is
/// also the unit of write serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryCategory {
    Movies,
    Shows,
    Music,
    Photos,
}

impl MediaKind {
    /// Map a timeline notification type code to a kind.
    ///
    /// Returns `None` for codes the engine does not track (e.g. 12 for
    /// trailers/extras).
    pub fn from_wire_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Movie),
            2 => Some(Self::Show),
            3 => Some(Self::Season),
            4 => Some(Self::Episode),
            8 => Some(Self::Artist),
            9 => Some(Self::Album),
            10 => Some(Self::Track),
            _ => None,
        }
    }

    /// The timeline notification type code for this kind, if it has one.
    pub fn wire_code(&self) -> Option<u32> {
        match self {
            Self::Movie => Some(1),
            Self::Show => Some(2),
            Self::Season => Some(3),
            Self::Episode => Some(4),
            Self::Artist => Some(8),
            Self::Album => Some(9),
            Self::Track => Some(10),
            Self::Container | Self::Photo => None,
        }
    }

    /// Parse the kind from the remote server's string representation.
    pub fn from_remote_str(s: &str) -> Option<Self> {
        match s {
            "movie" => Some(Self::Movie),
            "show" => Some(Self::Show),
            "season" => Some(Self::Season),
            "episode" => Some(Self::Episode),
            "artist" => Some(Self::Artist),
            "album" => Some(Self::Album),
            "track" => Some(Self::Track),
            "photo" => Some(Self::Photo),
            _ => None,
        }
    }

    /// The local library category this kind is written to.
    pub fn category(&self) -> Option<LibraryCategory> {
        match self {
            Self::Movie => Some(LibraryCategory::Movies),
            Self::Show | Self::Season | Self::Episode => Some(LibraryCategory::Shows),
            Self::Artist | Self::Album | Self::Track => Some(LibraryCategory::Music),
            Self::Photo => Some(LibraryCategory::Photos),
            Self::Container => None,
        }
    }

    /// Leaf kinds carry playable media and are the only kinds for which
    /// "finished processing" notifications are acted upon.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Movie | Self::Episode | Self::Track)
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Container => "container",
            Self::Movie => "movie",
            Self::Show => "show",
            Self::Season => "season",
            Self::Episode => "episode",
            Self::Artist => "artist",
            Self::Album => "album",
            Self::Track => "track",
            Self::Photo => "photo",
        };
        write!(f, "{}", s)
    }
}

impl std::fmt::Display for LibraryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Movies => "movies",
            Self::Shows => "shows",
            Self::Music => "music",
            Self::Photos => "photos",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Checksum
// ============================================================================

/// Change-detection fingerprint: remote id plus last-modified timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Build the composite fingerprint for an item.
    ///
    /// `updated_at` of zero (never modified / not reported) still yields a
    /// stable value for the id.
    pub fn compose(id: &str, updated_at: i64) -> Self {
        if updated_at == 0 {
            Self(format!("K{}", id))
        } else {
            Self(format!("K{}{}", id, updated_at))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Remote Items
// ============================================================================

/// A single entry in a remote section listing.
///
/// Listing entries are intentionally shallow: only what is needed to decide
/// whether a full payload fetch is warranted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    /// Stable remote id. `None` for synthetic placeholder rows, which are
    /// never queued and never deleted.
    pub id: Option<String>,
    pub kind: Option<MediaKind>,
    pub parent_id: Option<String>,
    pub view_id: Option<String>,
    /// Last-modified Unix timestamp as reported by the server, 0 if absent.
    pub updated_at: i64,
    pub title: String,
}

impl RemoteItem {
    /// The delta-comparison fingerprint, or `None` when the item has no
    /// stable id.
    pub fn checksum(&self) -> Option<Checksum> {
        self.id
            .as_deref()
            .map(|id| Checksum::compose(id, self.updated_at))
    }
}

/// Watched/resume state attached to a fetched payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    pub view_count: Option<u64>,
    /// Resume offset in seconds.
    pub view_offset: Option<u64>,
    /// Runtime in seconds.
    pub duration: Option<u64>,
    /// Remote-clock Unix timestamp of the last playback.
    pub last_viewed_at: Option<i64>,
}

/// The full metadata payload for one remote item, as returned by a
/// single-item fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemPayload {
    pub id: String,
    pub kind: MediaKind,
    pub parent_id: Option<String>,
    /// Id of the library section the item belongs to.
    pub library_section_id: Option<String>,
    /// Human-readable name of the library section.
    pub library_section_title: Option<String>,
    pub updated_at: i64,
    pub title: String,
    pub user_data: UserData,
    /// Remaining metadata attributes, passed through to the local store.
    pub attributes: HashMap<String, String>,
}

impl ItemPayload {
    pub fn checksum(&self) -> Checksum {
        Checksum::compose(&self.id, self.updated_at)
    }

    /// Project the payload down to a shallow listing entry. Leaf listings
    /// (episodes, tracks) come back as full payloads; delta comparison only
    /// needs the listing shape.
    pub fn as_listing(&self) -> RemoteItem {
        RemoteItem {
            id: Some(self.id.clone()),
            kind: Some(self.kind),
            parent_id: self.parent_id.clone(),
            view_id: self.library_section_id.clone(),
            updated_at: self.updated_at,
            title: self.title.clone(),
        }
    }
}

// ============================================================================
// Views (library sections)
// ============================================================================

/// A top-level library grouping on the remote server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteView {
    pub id: String,
    pub name: String,
    pub kind: MediaKind,
}

/// A view as recorded in the local mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredView {
    pub id: String,
    pub name: String,
    pub kind: MediaKind,
    /// Id of the local tag generated for the view's items.
    pub tag_id: i64,
    pub sync_enabled: bool,
}

// ============================================================================
// Local Records
// ============================================================================

/// The local mirror's record of one successfully applied remote item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    pub remote_id: String,
    pub view_id: Option<String>,
    pub kind: MediaKind,
    pub local_id: i64,
    pub local_file_id: Option<i64>,
    pub local_path_id: Option<i64>,
    pub parent_id: Option<String>,
    /// The checksum observed at the last successful apply. A mismatch with
    /// the remote listing marks the record stale.
    pub checksum: Checksum,
    pub fanart_synced: bool,
}

/// A watched/resume update dispatched to the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaystateUpdate {
    pub remote_id: String,
    pub local_id: i64,
    pub file_id: Option<i64>,
    pub kind: MediaKind,
    /// Resume offset in seconds (already normalized by the engine).
    pub view_offset: u64,
    pub play_count: u64,
    pub duration: u64,
    /// Local-clock Unix timestamp of the playback event.
    pub last_played: i64,
}

// ============================================================================
// Sessions
// ============================================================================

/// One active playback session on the remote server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub user_id: String,
    pub user_name: String,
    /// Runtime of the playing item in seconds; filled lazily from a
    /// metadata fetch when the session listing omits it.
    pub duration: Option<u64>,
    pub view_count: Option<u64>,
}
