//! Local Store Abstractions
//!
//! Contracts for the on-device library database the engine keeps
//! synchronized. The schema and ORM layer are owned elsewhere; the engine
//! only sees category-scoped write handles plus a read-only index of what
//! has been mirrored so far.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::model::{
    Checksum, ItemPayload, LibraryCategory, LocalRecord, MediaKind, PlaystateUpdate, RemoteView,
    StoredView,
};

/// Write handle for one library category.
///
/// The engine guarantees a single writer per category at any time; the
/// implementation does not need its own cross-category locking. Handles are
/// acquired per batch of work via [`LocalLibrary::category`].
#[async_trait]
pub trait CategoryStore: Send + Sync {
    /// Insert or update the primary item kind of this category
    /// (movie, show, artist, photo).
    async fn add_or_update(
        &self,
        payload: &ItemPayload,
        view_tag: Option<&str>,
        view_id: Option<&str>,
    ) -> Result<()>;

    /// Insert or update a season. Only meaningful for the shows category;
    /// other categories return `BridgeError::NotAvailable`.
    async fn add_season(
        &self,
        payload: &ItemPayload,
        view_tag: Option<&str>,
        view_id: Option<&str>,
    ) -> Result<()>;

    /// Insert or update an episode (shows category only).
    async fn add_episode(
        &self,
        payload: &ItemPayload,
        view_tag: Option<&str>,
        view_id: Option<&str>,
    ) -> Result<()>;

    /// Insert or update an album (music category only).
    async fn add_album(
        &self,
        payload: &ItemPayload,
        view_tag: Option<&str>,
        view_id: Option<&str>,
    ) -> Result<()>;

    /// Insert or update a track (music category only).
    async fn add_track(
        &self,
        payload: &ItemPayload,
        view_tag: Option<&str>,
        view_id: Option<&str>,
    ) -> Result<()>;

    /// Remove an item (and its children, for container kinds) by remote id.
    async fn remove(&self, remote_id: &str) -> Result<()>;

    /// Update watched/resume state for an already-mirrored item.
    async fn update_playstate(&self, update: &PlaystateUpdate) -> Result<()>;
}

/// The local library database, handing out category-scoped write handles.
#[async_trait]
pub trait LocalLibrary: Send + Sync {
    /// Acquire the write handle for a category.
    async fn category(&self, category: LibraryCategory) -> Result<std::sync::Arc<dyn CategoryStore>>;

    /// Validate that the local schema matches what the engine expects.
    /// Returns the stored schema version string, or `None` when the store
    /// has never been initialized.
    async fn schema_version(&self) -> Result<Option<String>>;

    /// Record the schema version after a successful initialization.
    async fn set_schema_version(&self, version: &str) -> Result<()>;
}

/// Read side of the local mirror, used for delta computation and event
/// processing. Owned by the store layer; never written by the engine
/// directly.
#[async_trait]
pub trait LibraryIndex: Send + Sync {
    /// All stored checksums for one item kind, keyed by remote id.
    async fn checksums(&self, kind: MediaKind) -> Result<HashMap<String, Checksum>>;

    /// Look up the mirror record for a remote id.
    async fn record(&self, remote_id: &str) -> Result<Option<LocalRecord>>;

    /// All records belonging to one view.
    async fn records_in_view(&self, view_id: &str) -> Result<Vec<LocalRecord>>;

    /// All views currently recorded in the mirror.
    async fn views(&self) -> Result<Vec<StoredView>>;

    /// Look up a stored view by name (used to detect shared tags before
    /// removing generated artifacts on rename).
    async fn view_by_name(&self, name: &str) -> Result<Option<StoredView>>;

    /// Record a newly seen view; returns the generated tag id.
    async fn add_view(&self, view: &RemoteView) -> Result<i64>;

    /// Rename a stored view in place; returns the new tag id. The store
    /// retags all child records as part of the rename.
    async fn rename_view(&self, view_id: &str, new_name: &str) -> Result<i64>;

    /// Remove a view record. Child records are removed separately through
    /// the category stores so category write serialization is preserved.
    async fn remove_view(&self, view_id: &str) -> Result<()>;

    /// Mark an item's fanart as synced.
    async fn set_fanart_synced(&self, remote_id: &str) -> Result<()>;

    /// Remote ids of movies/shows still missing fanart.
    async fn missing_fanart(&self) -> Result<Vec<(String, MediaKind)>>;
}

/// Generated list artifacts (smart playlists, navigation nodes) that mirror
/// views. Created when a view first appears, recreated on rename, removed
/// when the view disappears.
#[async_trait]
pub trait ListArtifacts: Send + Sync {
    async fn create(&self, view: &RemoteView) -> Result<()>;

    async fn remove(&self, view_name: &str, kind: MediaKind) -> Result<()>;
}

/// Downloads and caches artwork for one item. Caching internals are out of
/// scope here; the engine only schedules the work.
#[async_trait]
pub trait ArtworkFetcher: Send + Sync {
    /// Fetch artwork for the item. `refresh` forces re-download of artwork
    /// that is already cached.
    async fn fetch(&self, remote_id: &str, kind: MediaKind, refresh: bool) -> Result<bool>;
}
